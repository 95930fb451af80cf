//! Route preference pass over every stored route

use std::sync::Arc;

use tracing::instrument;

use irr_core::Settings;
use irr_routing::RoutePreferenceResolver;
use irr_storage::{DatabaseHandler, StorageContext};

use crate::error::MirrorResult;

pub struct RoutePreferenceUpdateRunner {
    settings: Arc<Settings>,
    storage: Arc<StorageContext>,
}

impl RoutePreferenceUpdateRunner {
    pub fn new(settings: Arc<Settings>, storage: Arc<StorageContext>) -> Self {
        Self { settings, storage }
    }

    /// Recompute preference status; returns the number of records flipped
    #[instrument(skip(self))]
    pub fn run(&self) -> MirrorResult<usize> {
        let resolver = RoutePreferenceResolver::from_settings(&self.settings);
        let mut handler = DatabaseHandler::new(self.storage.clone());
        let result = handler
            .route_summaries(None)
            .map(|routes| resolver.resolve(&routes))
            .and_then(|deltas| handler.update_route_preference_status(&deltas.changes()))
            .and_then(|changed| handler.commit().map(|()| changed));
        if result.is_err() {
            handler.rollback();
        }
        Ok(result?)
    }
}
