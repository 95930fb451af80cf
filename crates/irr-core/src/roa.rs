//! Route origin authorisations

use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};

use crate::prefix::PrefixBits;

/// One ROA: `asn` may originate `prefix` up to `max_length`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Roa {
    pub prefix: IpNetwork,
    pub asn: u32,
    pub max_length: u8,
    pub trust_anchor: String,
}

impl Roa {
    pub fn new(prefix: IpNetwork, asn: u32, max_length: u8, trust_anchor: impl Into<String>) -> Self {
        Self {
            prefix,
            asn,
            max_length,
            trust_anchor: trust_anchor.into(),
        }
    }

    /// Network bits of the prefix, truncated to its own length
    pub fn bits(&self) -> PrefixBits {
        PrefixBits::from_network(&self.prefix)
    }

    /// Whether this ROA makes a route from `origin` with `prefix_length` valid
    ///
    /// Coverage must be established separately. AS0 never validates.
    pub fn authorises(&self, origin: u32, prefix_length: u8) -> bool {
        origin != 0 && self.asn == origin && prefix_length <= self.max_length
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authorises() {
        let roa = Roa::new("192.0.2.0/24".parse().unwrap(), 65546, 28, "TEST");
        assert!(roa.authorises(65546, 24));
        assert!(roa.authorises(65546, 28));
        assert!(!roa.authorises(65546, 29));
        assert!(!roa.authorises(65547, 24));
    }

    #[test]
    fn test_as0_never_authorises() {
        let roa = Roa::new("192.0.2.0/24".parse().unwrap(), 0, 32, "TEST");
        assert!(!roa.authorises(0, 24));
    }
}
