//! Stored registry records and their derived status fields

use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};

use crate::object_class::ObjectClass;

/// Reserved source name for records synthesised from ROAs
pub const PSEUDO_SOURCE: &str = "RPKI";

/// RPKI origin validation outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RpkiStatus {
    Valid,
    Invalid,
    #[default]
    NotFound,
}

impl RpkiStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RpkiStatus::Valid => "valid",
            RpkiStatus::Invalid => "invalid",
            RpkiStatus::NotFound => "not_found",
        }
    }

    /// Invalid routes are hidden from downstream consumers
    pub fn is_visible(&self) -> bool {
        !matches!(self, RpkiStatus::Invalid)
    }
}

impl fmt::Display for RpkiStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scope filter outcome (stored, computed elsewhere)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeFilterStatus {
    #[default]
    InScope,
    OutScopeAs,
    OutScopePrefix,
}

/// Inter-registry route preference outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutePreferenceStatus {
    #[default]
    Visible,
    Suppressed,
}

impl RoutePreferenceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoutePreferenceStatus::Visible => "visible",
            RoutePreferenceStatus::Suppressed => "suppressed",
        }
    }
}

impl fmt::Display for RoutePreferenceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of change applied to a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatabaseOperation {
    AddOrUpdate,
    Delete,
}

impl DatabaseOperation {
    /// Keyword used on NRTM operation lines
    pub fn nrtm_keyword(&self) -> &'static str {
        match self {
            DatabaseOperation::AddOrUpdate => "ADD",
            DatabaseOperation::Delete => "DEL",
        }
    }
}

impl fmt::Display for DatabaseOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.nrtm_keyword())
    }
}

/// Unique identity of a record: primary key within a source
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordKey {
    pub rpsl_pk: String,
    pub source: String,
}

impl RecordKey {
    pub fn new(rpsl_pk: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            rpsl_pk: rpsl_pk.into(),
            source: source.into(),
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.rpsl_pk, self.source)
    }
}

/// A validated registry object as held by the record store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub rpsl_pk: String,
    /// Upper-cased source; empty when the text declared none
    pub source: String,
    pub object_class: ObjectClass,
    pub object_text: String,
    /// Attribute name (lower case) to values, in order of appearance
    pub attributes: BTreeMap<String, Vec<String>>,
    pub prefix: Option<IpNetwork>,
    pub ip_first: Option<IpAddr>,
    pub ip_last: Option<IpAddr>,
    pub asn_first: Option<u32>,
    pub asn_last: Option<u32>,
    pub rpki_status: RpkiStatus,
    pub scopefilter_status: ScopeFilterStatus,
    pub route_preference_status: RoutePreferenceStatus,
    pub updated: DateTime<Utc>,
}

impl Record {
    pub fn key(&self) -> RecordKey {
        RecordKey::new(self.rpsl_pk.clone(), self.source.clone())
    }

    /// First value of an attribute
    pub fn first_value(&self, attribute: &str) -> Option<&str> {
        self.attributes
            .get(attribute)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// The `source` attribute as written in the object text
    pub fn declared_source(&self) -> Option<&str> {
        self.first_value("source")
    }

    pub fn is_route(&self) -> bool {
        self.object_class.is_route()
    }

    /// Origin AS of a route object
    pub fn origin(&self) -> Option<u32> {
        if self.is_route() { self.asn_first } else { None }
    }

    /// Visible to queries and downstream mirrors
    pub fn is_visible(&self) -> bool {
        self.rpki_status.is_visible()
            && self.route_preference_status == RoutePreferenceStatus::Visible
    }
}

/// Format an AS number the way RPSL writes it
pub fn format_asn(asn: u32) -> String {
    format!("AS{asn}")
}

/// Parse `AS65546` / `as65546` / `65546`
pub fn parse_asn(value: &str) -> Option<u32> {
    let value = value.trim();
    let digits = match value.get(..2) {
        Some(head) if head.eq_ignore_ascii_case("AS") => &value[2..],
        _ => value,
    };
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_asn() {
        assert_eq!(parse_asn("AS65546"), Some(65546));
        assert_eq!(parse_asn("as0"), Some(0));
        assert_eq!(parse_asn("65546"), Some(65546));
        assert_eq!(parse_asn("ASX"), None);
        assert_eq!(parse_asn("AS4294967296"), None);
    }

    #[test]
    fn test_status_visibility() {
        assert!(RpkiStatus::Valid.is_visible());
        assert!(RpkiStatus::NotFound.is_visible());
        assert!(!RpkiStatus::Invalid.is_visible());
        assert_eq!(RpkiStatus::default(), RpkiStatus::NotFound);
        assert_eq!(RoutePreferenceStatus::default(), RoutePreferenceStatus::Visible);
    }

    #[test]
    fn test_operation_keywords() {
        assert_eq!(DatabaseOperation::AddOrUpdate.to_string(), "ADD");
        assert_eq!(DatabaseOperation::Delete.to_string(), "DEL");
    }

    #[test]
    fn test_record_key_display() {
        let key = RecordKey::new("192.0.2.0/24AS65546", "TEST");
        assert_eq!(key.to_string(), "192.0.2.0/24AS65546/TEST");
    }
}
