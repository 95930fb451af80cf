//! Inter-registry route preference
//!
//! Routes from ranked sources are placed in a [`RadixTree`]. A route whose
//! source has the highest preference seen is always visible. Any other route
//! is suppressed when an overlapping route (covering, covered or equal) has
//! a strictly higher preference. Overlapping routes of equal preference all
//! stay visible.

use std::collections::HashMap;

use tracing::{info, instrument};

use irr_core::{PrefixBits, RecordKey, RoutePreferenceStatus, Settings};
use irr_storage::RouteSummary;

use super::radix::RadixTree;

/// Records whose route preference status changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreferenceDeltas {
    pub to_visible: Vec<RecordKey>,
    pub to_suppressed: Vec<RecordKey>,
}

impl PreferenceDeltas {
    pub fn len(&self) -> usize {
        self.to_visible.len() + self.to_suppressed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn changes(&self) -> Vec<(RecordKey, RoutePreferenceStatus)> {
        self.to_visible
            .iter()
            .map(|key| (key.clone(), RoutePreferenceStatus::Visible))
            .chain(
                self.to_suppressed
                    .iter()
                    .map(|key| (key.clone(), RoutePreferenceStatus::Suppressed)),
            )
            .collect()
    }
}

struct Ranked<'a> {
    route: &'a RouteSummary,
    preference: u32,
}

/// Computes route preference status from per-source ranks
#[derive(Debug, Clone, Default)]
pub struct RoutePreferenceResolver {
    preferences: HashMap<String, u32>,
}

impl RoutePreferenceResolver {
    pub fn new(preferences: HashMap<String, u32>) -> Self {
        Self {
            preferences: preferences
                .into_iter()
                .map(|(source, preference)| (source.to_ascii_uppercase(), preference))
                .collect(),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.route_preferences())
    }

    pub fn preference(&self, source: &str) -> Option<u32> {
        self.preferences.get(source).copied()
    }

    /// Status each route should have, with the currently stored one
    fn decide<'a>(&self, routes: &'a [RouteSummary]) -> Vec<(&'a RouteSummary, RoutePreferenceStatus)> {
        let mut decided = Vec::with_capacity(routes.len());
        let mut tree: RadixTree<Ranked<'a>> = RadixTree::new();

        for route in routes {
            match self.preference(route.source()) {
                Some(preference) => tree.insert(
                    PrefixBits::from_network(&route.prefix),
                    Ranked { route, preference },
                ),
                None => decided.push((route, RoutePreferenceStatus::Visible)),
            }
        }

        let Some(global_max) = tree.entries().flat_map(|(_, v)| v).map(|r| r.preference).max() else {
            return decided;
        };

        for (prefix, ranked) in tree.entries() {
            let overlap_max = tree
                .overlapping(prefix)
                .iter()
                .map(|r| r.preference)
                .max()
                .unwrap_or(0);
            for entry in ranked {
                let status = if entry.preference == global_max || overlap_max <= entry.preference {
                    RoutePreferenceStatus::Visible
                } else {
                    RoutePreferenceStatus::Suppressed
                };
                decided.push((entry.route, status));
            }
        }
        decided
    }

    /// Routes whose stored status differs from the computed one
    ///
    /// Unranked routes are always visible, so any of them currently
    /// suppressed is returned in `to_visible`.
    #[instrument(skip(self, routes), fields(routes = routes.len()))]
    pub fn resolve(&self, routes: &[RouteSummary]) -> PreferenceDeltas {
        let mut deltas = PreferenceDeltas::default();
        for (route, status) in self.decide(routes) {
            if route.route_preference_status == status {
                continue;
            }
            match status {
                RoutePreferenceStatus::Visible => deltas.to_visible.push(route.key.clone()),
                RoutePreferenceStatus::Suppressed => deltas.to_suppressed.push(route.key.clone()),
            }
        }
        deltas.to_visible.sort();
        deltas.to_suppressed.sort();
        info!(
            to_visible = deltas.to_visible.len(),
            to_suppressed = deltas.to_suppressed.len(),
            "Route preference pass complete"
        );
        deltas
    }
}
