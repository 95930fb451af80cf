//! Record filters for [`crate::DatabaseHandler::execute_query`]

use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};

use irr_core::prefix::PrefixBits;
use irr_core::{ObjectClass, Record, RecordKey, RoutePreferenceStatus, RpkiStatus};

/// Conjunctive record filter; unset fields match everything
#[derive(Debug, Clone, Default)]
pub struct RecordQuery {
    pub sources: Option<Vec<String>>,
    pub object_classes: Option<Vec<ObjectClass>>,
    pub rpsl_pks: Option<Vec<String>>,
    pub rpki_status: Option<Vec<RpkiStatus>>,
    pub route_preference_status: Option<Vec<RoutePreferenceStatus>>,
    pub origin: Option<u32>,
    /// Prefix equal to or more specific than this one
    pub covered_by: Option<IpNetwork>,
    /// Hide records that are invisible to downstream consumers
    pub visible_only: bool,
}

impl RecordQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sources<I, S>(mut self, sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.sources = Some(
            sources
                .into_iter()
                .map(|s| s.as_ref().to_ascii_uppercase())
                .collect(),
        );
        self
    }

    pub fn object_classes(mut self, classes: impl IntoIterator<Item = ObjectClass>) -> Self {
        self.object_classes = Some(classes.into_iter().collect());
        self
    }

    /// Route and route6 only
    pub fn routes(self) -> Self {
        self.object_classes([ObjectClass::Route, ObjectClass::Route6])
    }

    pub fn rpsl_pk(mut self, rpsl_pk: impl Into<String>) -> Self {
        self.rpsl_pks.get_or_insert_with(Vec::new).push(rpsl_pk.into());
        self
    }

    pub fn rpki_status(mut self, statuses: impl IntoIterator<Item = RpkiStatus>) -> Self {
        self.rpki_status = Some(statuses.into_iter().collect());
        self
    }

    pub fn route_preference_status(
        mut self,
        statuses: impl IntoIterator<Item = RoutePreferenceStatus>,
    ) -> Self {
        self.route_preference_status = Some(statuses.into_iter().collect());
        self
    }

    pub fn origin(mut self, asn: u32) -> Self {
        self.origin = Some(asn);
        self
    }

    pub fn covered_by(mut self, prefix: IpNetwork) -> Self {
        self.covered_by = Some(prefix);
        self
    }

    pub fn visible_only(mut self) -> Self {
        self.visible_only = true;
        self
    }

    /// Whether a source database needs to be read at all
    pub fn wants_source(&self, source: &str) -> bool {
        self.sources
            .as_ref()
            .is_none_or(|sources| sources.iter().any(|s| s == source))
    }

    pub fn matches(&self, record: &Record) -> bool {
        if !self.wants_source(&record.source) {
            return false;
        }
        if let Some(classes) = &self.object_classes
            && !classes.contains(&record.object_class)
        {
            return false;
        }
        if let Some(pks) = &self.rpsl_pks
            && !pks.iter().any(|pk| pk == &record.rpsl_pk)
        {
            return false;
        }
        if let Some(statuses) = &self.rpki_status
            && !statuses.contains(&record.rpki_status)
        {
            return false;
        }
        if let Some(statuses) = &self.route_preference_status
            && !statuses.contains(&record.route_preference_status)
        {
            return false;
        }
        if let Some(origin) = self.origin
            && record.origin() != Some(origin)
        {
            return false;
        }
        if let Some(outer) = &self.covered_by {
            let covered = record.prefix.as_ref().is_some_and(|prefix| {
                PrefixBits::from_network(outer).covers(&PrefixBits::from_network(prefix))
            });
            if !covered {
                return false;
            }
        }
        !self.visible_only || record.is_visible()
    }
}

/// Slim projection of a route record for the status passes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteSummary {
    pub key: RecordKey,
    pub object_class: ObjectClass,
    pub prefix: IpNetwork,
    pub origin: u32,
    pub rpki_status: RpkiStatus,
    pub route_preference_status: RoutePreferenceStatus,
}

impl RouteSummary {
    /// None for non-route records or routes missing prefix or origin
    pub fn from_record(record: &Record) -> Option<Self> {
        if !record.is_route() {
            return None;
        }
        Some(Self {
            key: record.key(),
            object_class: record.object_class,
            prefix: record.prefix?,
            origin: record.origin()?,
            rpki_status: record.rpki_status,
            route_preference_status: record.route_preference_status,
        })
    }

    pub fn source(&self) -> &str {
        &self.key.source
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use irr_core::{RecordParser, RpslParser};

    fn route(prefix: &str, origin: &str, source: &str) -> Record {
        let text = format!("route: {prefix}\norigin: {origin}\nsource: {source}\n");
        RpslParser::new().record_from_text(&text, false).unwrap()
    }

    #[test]
    fn test_empty_query_matches_all() {
        let record = route("192.0.2.0/24", "AS65546", "TEST");
        assert!(RecordQuery::new().matches(&record));
    }

    #[test]
    fn test_filters_combine() {
        let record = route("192.0.2.0/24", "AS65546", "TEST");
        assert!(RecordQuery::new().sources(["test"]).origin(65546).matches(&record));
        assert!(!RecordQuery::new().sources(["OTHER"]).matches(&record));
        assert!(!RecordQuery::new().origin(65547).matches(&record));
        assert!(
            RecordQuery::new()
                .covered_by("192.0.0.0/16".parse().unwrap())
                .matches(&record)
        );
        assert!(
            !RecordQuery::new()
                .covered_by("192.0.2.0/25".parse().unwrap())
                .matches(&record)
        );
    }

    #[test]
    fn test_visible_only() {
        let mut record = route("192.0.2.0/24", "AS65546", "TEST");
        record.rpki_status = RpkiStatus::Invalid;
        assert!(!RecordQuery::new().visible_only().matches(&record));
        assert!(RecordQuery::new().matches(&record));
    }

    #[test]
    fn test_route_summary() {
        let record = route("192.0.2.0/24", "AS65546", "TEST");
        let summary = RouteSummary::from_record(&record).unwrap();
        assert_eq!(summary.origin, 65546);
        assert_eq!(summary.source(), "TEST");
    }
}
