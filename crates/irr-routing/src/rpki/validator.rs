//! RPKI route origin validation
//!
//! [`BulkRouteValidator`] loads every ROA into a [`RoaTrie`] once and pays off
//! when many routes are validated; [`SingleRouteValidator`] asks ROA storage
//! for the covering set of one route. Both apply the same rule through
//! [`status_from_covering`] and give identical answers for identical input.

use std::collections::HashSet;

use ipnetwork::IpNetwork;
use tracing::{debug, info, instrument};

use irr_core::{PSEUDO_SOURCE, RecordKey, Roa, RpkiStatus};
use irr_storage::{RoaStore, RouteSummary};

use super::trie::RoaTrie;
use crate::error::RoutingResult;

/// Decide a status from the ROAs covering a route
///
/// No covering ROA is `not_found`. Any covering ROA that authorises the
/// origin at this length is `valid`. Coverage without authorisation,
/// including coverage by AS0 ROAs only, is `invalid`.
pub fn status_from_covering<'a>(
    covering: impl IntoIterator<Item = &'a Roa>,
    origin: u32,
    prefix_length: u8,
) -> RpkiStatus {
    let mut covered = false;
    for roa in covering {
        if roa.authorises(origin, prefix_length) {
            return RpkiStatus::Valid;
        }
        covered = true;
    }
    if covered {
        RpkiStatus::Invalid
    } else {
        RpkiStatus::NotFound
    }
}

/// Validation of one route
pub trait RouteValidator: Send + Sync {
    fn validate_route(&self, prefix: &IpNetwork, origin: u32, source: &str) -> RoutingResult<RpkiStatus>;
}

fn normalise_sources(sources: impl IntoIterator<Item = String>) -> HashSet<String> {
    sources.into_iter().map(|s| s.to_ascii_uppercase()).collect()
}

/// Records whose RPKI status changed, by new status
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RpkiDeltas {
    pub now_valid: Vec<RecordKey>,
    pub now_invalid: Vec<RecordKey>,
    pub now_not_found: Vec<RecordKey>,
}

impl RpkiDeltas {
    pub fn len(&self) -> usize {
        self.now_valid.len() + self.now_invalid.len() + self.now_not_found.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flattened `(key, new status)` pairs for the status update
    pub fn changes(&self) -> Vec<(RecordKey, RpkiStatus)> {
        let tagged = |keys: &[RecordKey], status: RpkiStatus| {
            keys.iter()
                .map(move |key| (key.clone(), status))
                .collect::<Vec<_>>()
        };
        let mut changes = tagged(&self.now_valid, RpkiStatus::Valid);
        changes.extend(tagged(&self.now_invalid, RpkiStatus::Invalid));
        changes.extend(tagged(&self.now_not_found, RpkiStatus::NotFound));
        changes
    }
}

/// Trie-backed validator for whole-table passes
pub struct BulkRouteValidator {
    trie: RoaTrie,
    excluded_sources: HashSet<String>,
}

impl BulkRouteValidator {
    pub fn new(roas: impl IntoIterator<Item = Roa>, excluded_sources: impl IntoIterator<Item = String>) -> Self {
        Self {
            trie: RoaTrie::from_roas(roas),
            excluded_sources: normalise_sources(excluded_sources),
        }
    }

    /// Load every stored ROA
    pub fn from_store(store: &RoaStore, excluded_sources: impl IntoIterator<Item = String>) -> RoutingResult<Self> {
        let roas = store.all()?;
        debug!(roas = roas.len(), "Building ROA trie");
        Ok(Self::new(roas, excluded_sources))
    }

    pub fn roa_count(&self) -> usize {
        self.trie.len()
    }

    pub fn status_for(&self, prefix: &IpNetwork, origin: u32, source: &str) -> RpkiStatus {
        if self.excluded_sources.contains(&source.to_ascii_uppercase()) {
            return RpkiStatus::NotFound;
        }
        status_from_covering(self.trie.covering(prefix), origin, prefix.prefix())
    }

    /// Re-validate routes and return only the records whose status changed
    ///
    /// Pseudo-source records are never re-validated.
    #[instrument(skip(self, routes), fields(routes = routes.len()))]
    pub fn validate_all(&self, routes: &[RouteSummary]) -> RpkiDeltas {
        let mut deltas = RpkiDeltas::default();
        for route in routes {
            if route.source() == PSEUDO_SOURCE {
                continue;
            }
            let status = self.status_for(&route.prefix, route.origin, route.source());
            if status == route.rpki_status {
                continue;
            }
            let target = match status {
                RpkiStatus::Valid => &mut deltas.now_valid,
                RpkiStatus::Invalid => &mut deltas.now_invalid,
                RpkiStatus::NotFound => &mut deltas.now_not_found,
            };
            target.push(route.key.clone());
        }
        info!(
            now_valid = deltas.now_valid.len(),
            now_invalid = deltas.now_invalid.len(),
            now_not_found = deltas.now_not_found.len(),
            "RPKI validation pass complete"
        );
        deltas
    }
}

impl RouteValidator for BulkRouteValidator {
    fn validate_route(&self, prefix: &IpNetwork, origin: u32, source: &str) -> RoutingResult<RpkiStatus> {
        Ok(self.status_for(prefix, origin, source))
    }
}

/// Storage-backed validator for ad hoc single routes
pub struct SingleRouteValidator {
    store: RoaStore,
    excluded_sources: HashSet<String>,
}

impl SingleRouteValidator {
    pub fn new(store: RoaStore, excluded_sources: impl IntoIterator<Item = String>) -> Self {
        Self {
            store,
            excluded_sources: normalise_sources(excluded_sources),
        }
    }
}

impl RouteValidator for SingleRouteValidator {
    fn validate_route(&self, prefix: &IpNetwork, origin: u32, source: &str) -> RoutingResult<RpkiStatus> {
        if self.excluded_sources.contains(&source.to_ascii_uppercase()) {
            return Ok(RpkiStatus::NotFound);
        }
        let covering = self.store.covering(prefix)?;
        Ok(status_from_covering(&covering, origin, prefix.prefix()))
    }
}
