//! ROA export document parsing
//!
//! Accepts `{"roas": [{"prefix": "...", "asn": "AS...", "maxLength": n, "ta": "..."}]}`.
//! The whole document is validated before any ROA is returned.

use ipnetwork::IpNetwork;
use serde::Deserialize;

use irr_core::prefix::normalise;
use irr_core::{Roa, parse_asn};

use crate::error::RoaParseError;

#[derive(Debug, Deserialize)]
struct RoaDocument {
    roas: Vec<RoaEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum AsnValue {
    Number(u32),
    Text(String),
}

#[derive(Debug, Deserialize)]
struct RoaEntry {
    prefix: String,
    asn: AsnValue,
    #[serde(rename = "maxLength")]
    max_length: u32,
    ta: String,
}

impl RoaEntry {
    fn into_roa(self) -> Result<Roa, RoaParseError> {
        let prefix: IpNetwork = self.prefix.parse().map_err(|e: ipnetwork::IpNetworkError| {
            RoaParseError::InvalidPrefix {
                prefix: self.prefix.clone(),
                reason: e.to_string(),
            }
        })?;
        if normalise(&prefix) != prefix {
            return Err(RoaParseError::InvalidPrefix {
                prefix: self.prefix,
                reason: "host bits set".into(),
            });
        }

        let asn = match self.asn {
            AsnValue::Number(asn) => asn,
            AsnValue::Text(text) => parse_asn(&text).ok_or(RoaParseError::InvalidAsn(text))?,
        };

        let family_max = if prefix.is_ipv4() { 32 } else { 128 };
        let invalid_max_length = |reason: &str| RoaParseError::InvalidMaxLength {
            prefix: prefix.to_string(),
            max_length: self.max_length,
            reason: reason.to_string(),
        };
        if self.max_length < u32::from(prefix.prefix()) {
            return Err(invalid_max_length("shorter than the prefix length"));
        }
        if self.max_length > family_max {
            return Err(invalid_max_length("longer than the address length"));
        }
        let max_length = u8::try_from(self.max_length)
            .map_err(|_| invalid_max_length("longer than the address length"))?;

        Ok(Roa::new(prefix, asn, max_length, self.ta))
    }
}

/// Parse and validate a complete ROA document
pub fn parse_roa_document(text: &str) -> Result<Vec<Roa>, RoaParseError> {
    let document: RoaDocument =
        serde_json::from_str(text).map_err(|e| RoaParseError::Malformed(e.to_string()))?;
    document.roas.into_iter().map(RoaEntry::into_roa).collect()
}
