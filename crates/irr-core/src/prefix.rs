//! Bit-level prefix helpers shared by the RPKI trie and the preference tree

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use ipnetwork::IpNetwork;

/// Address family of a prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AddressFamily {
    V4,
    V6,
}

impl AddressFamily {
    /// Number of bits in an address of this family
    pub fn max_len(&self) -> u8 {
        match self {
            AddressFamily::V4 => 32,
            AddressFamily::V6 => 128,
        }
    }
}

/// Network bits of a prefix, left-aligned in a `u128`
///
/// Bits beyond `len` are always zero, so two values compare equal exactly
/// when they describe the same network.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PrefixBits {
    family: AddressFamily,
    bits: u128,
    len: u8,
}

fn mask(len: u8) -> u128 {
    if len == 0 { 0 } else { u128::MAX << (128 - u32::from(len)) }
}

impl PrefixBits {
    /// Build from raw parts, truncating anything past `len`
    pub fn new(family: AddressFamily, bits: u128, len: u8) -> Self {
        let len = len.min(family.max_len());
        Self {
            family,
            bits: bits & mask(len),
            len,
        }
    }

    /// Bits of a network truncated to its own prefix length
    pub fn from_network(network: &IpNetwork) -> Self {
        let (family, bits) = address_bits(network.ip());
        Self::new(family, bits, network.prefix())
    }

    /// Full-length bit string of a single address
    pub fn from_address(address: IpAddr) -> Self {
        let (family, bits) = address_bits(address);
        Self::new(family, bits, family.max_len())
    }

    pub fn family(&self) -> AddressFamily {
        self.family
    }

    pub fn len(&self) -> u8 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bit at `index`, counted from the most significant bit
    pub fn bit(&self, index: u8) -> bool {
        debug_assert!(index < 128);
        (self.bits >> (127 - u32::from(index))) & 1 == 1
    }

    /// Same network shortened to `len` bits
    pub fn truncate(&self, len: u8) -> Self {
        Self::new(self.family, self.bits, len.min(self.len))
    }

    /// True when `self` covers `other` (equal prefixes included)
    pub fn covers(&self, other: &PrefixBits) -> bool {
        self.family == other.family
            && self.len <= other.len
            && other.bits & mask(self.len) == self.bits
    }

    /// Length of the longest shared leading bit run, capped by both lengths
    pub fn common_len(&self, other: &PrefixBits) -> u8 {
        let diff = (self.bits ^ other.bits).leading_zeros();
        let cap = self.len.min(other.len);
        u8::try_from(diff).map_or(cap, |d| d.min(cap))
    }

    /// Convert back into a network
    pub fn to_network(&self) -> IpNetwork {
        let address = match self.family {
            AddressFamily::V4 => IpAddr::V4(Ipv4Addr::from((self.bits >> 96) as u32)),
            AddressFamily::V6 => IpAddr::V6(Ipv6Addr::from(self.bits)),
        };
        // len never exceeds the family maximum
        match IpNetwork::new(address, self.len) {
            Ok(network) => network,
            Err(_) => unreachable!("prefix length bounded by address family"),
        }
    }

    /// Big-endian key bytes: family tag, address bytes, length
    pub fn to_key_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(18);
        match self.family {
            AddressFamily::V4 => {
                out.push(4);
                out.extend_from_slice(&((self.bits >> 96) as u32).to_be_bytes());
            }
            AddressFamily::V6 => {
                out.push(6);
                out.extend_from_slice(&self.bits.to_be_bytes());
            }
        }
        out.push(self.len);
        out
    }
}

impl fmt::Debug for PrefixBits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PrefixBits({})", self.to_network())
    }
}

fn address_bits(address: IpAddr) -> (AddressFamily, u128) {
    match address {
        IpAddr::V4(v4) => (AddressFamily::V4, u128::from(u32::from(v4)) << 96),
        IpAddr::V6(v6) => (AddressFamily::V6, u128::from(v6)),
    }
}

/// First and last address covered by a network
pub fn network_bounds(network: &IpNetwork) -> (IpAddr, IpAddr) {
    match network {
        IpNetwork::V4(v4) => (IpAddr::V4(v4.network()), IpAddr::V4(v4.broadcast())),
        IpNetwork::V6(v6) => {
            let first = u128::from(v6.network());
            let host_mask = if v6.prefix() == 0 {
                u128::MAX
            } else {
                !mask(v6.prefix())
            };
            (
                IpAddr::V6(Ipv6Addr::from(first)),
                IpAddr::V6(Ipv6Addr::from(first | host_mask)),
            )
        }
    }
}

/// Normalise a network so no host bits are set
pub fn normalise(network: &IpNetwork) -> IpNetwork {
    PrefixBits::from_network(network).to_network()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn net(s: &str) -> IpNetwork {
        s.parse().unwrap()
    }

    #[test]
    fn test_truncated_to_own_length() {
        let bits = PrefixBits::from_network(&net("192.0.2.77/24"));
        assert_eq!(bits.len(), 24);
        assert_eq!(bits.to_network(), net("192.0.2.0/24"));
    }

    #[test]
    fn test_covers() {
        let roa = PrefixBits::from_network(&net("192.0.2.0/24"));
        assert!(roa.covers(&PrefixBits::from_network(&net("192.0.2.0/24"))));
        assert!(roa.covers(&PrefixBits::from_network(&net("192.0.2.128/25"))));
        assert!(!roa.covers(&PrefixBits::from_network(&net("192.0.0.0/16"))));
        assert!(!roa.covers(&PrefixBits::from_network(&net("198.51.100.0/24"))));
        assert!(!roa.covers(&PrefixBits::from_network(&net("2001:db8::/32"))));
    }

    #[test]
    fn test_bit_and_common_len() {
        let a = PrefixBits::from_network(&net("128.0.0.0/1"));
        assert!(a.bit(0));
        let b = PrefixBits::from_network(&net("192.0.2.0/24"));
        let c = PrefixBits::from_network(&net("192.0.3.0/24"));
        assert_eq!(b.common_len(&c), 23);
        assert_eq!(b.common_len(&b), 24);
    }

    #[test]
    fn test_zero_length_prefix() {
        let all = PrefixBits::from_network(&net("0.0.0.0/0"));
        assert!(all.is_empty());
        assert!(all.covers(&PrefixBits::from_network(&net("10.0.0.0/8"))));
        assert_eq!(all.to_network(), net("0.0.0.0/0"));
    }

    #[test]
    fn test_network_bounds() {
        let (first, last) = network_bounds(&net("2001:db8::/32"));
        assert_eq!(first.to_string(), "2001:db8::");
        assert_eq!(last.to_string(), "2001:db8:ffff:ffff:ffff:ffff:ffff:ffff");
        let (first, last) = network_bounds(&net("192.0.2.0/24"));
        assert_eq!(first.to_string(), "192.0.2.0");
        assert_eq!(last.to_string(), "192.0.2.255");
    }
}
