//! ROA import and RPKI re-validation

use std::sync::Arc;

use tracing::{info, instrument};

use irr_core::{PSEUDO_SOURCE, Roa, Settings};
use irr_routing::{BulkRouteValidator, parse_roa_document, pseudo_route_record};
use irr_storage::{DatabaseHandler, JournalOrigin, RecordQuery};

use super::MirrorServices;
use crate::error::{MirrorError, MirrorResult};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoaImportSummary {
    pub roas: usize,
    pub pseudo_records: usize,
    /// Route records whose RPKI status changed
    pub status_changes: usize,
}

/// Replaces the ROA set, regenerates pseudo records and re-validates routes
pub struct RoaImportRunner {
    settings: Arc<Settings>,
    services: MirrorServices,
}

impl RoaImportRunner {
    pub fn new(settings: Arc<Settings>, services: MirrorServices) -> Self {
        Self { settings, services }
    }

    /// Download and validate the configured ROA export
    #[instrument(skip(self))]
    pub async fn fetch(&self) -> MirrorResult<Vec<Roa>> {
        let url = self
            .settings
            .rpki
            .roa_source
            .as_deref()
            .ok_or_else(|| MirrorError::Config("no roa_source configured".into()))?;
        let text = self.services.retriever.retrieve_contents(url).await?;
        let roas = parse_roa_document(&text)?;
        info!(roas = roas.len(), "Parsed ROA export");
        Ok(roas)
    }

    /// Download, validate and apply the configured ROA export
    ///
    /// A document that fails to parse aborts before storage is touched.
    pub async fn run(&self) -> MirrorResult<RoaImportSummary> {
        let roas = self.fetch().await?;
        self.apply(roas)
    }

    /// Store `roas` and bring pseudo records and route statuses in line
    ///
    /// Blocks on storage locks; async callers run it on a blocking thread.
    pub fn apply(&self, roas: Vec<Roa>) -> MirrorResult<RoaImportSummary> {
        self.services.storage.roa_store().replace_all(&roas)?;

        let mut handler = DatabaseHandler::new(self.services.storage.clone());
        let result = self.refresh(&mut handler, roas);
        if result.is_err() {
            handler.rollback();
        }
        let summary = result?;
        info!(
            roas = summary.roas,
            pseudo_records = summary.pseudo_records,
            status_changes = summary.status_changes,
            "ROA import complete"
        );
        Ok(summary)
    }

    fn refresh(&self, handler: &mut DatabaseHandler, roas: Vec<Roa>) -> MirrorResult<RoaImportSummary> {
        let remarks = &self.settings.rpki.pseudo_irr_remarks;
        handler.delete_all_records_with_journal(PSEUDO_SOURCE)?;
        for roa in &roas {
            handler.upsert_record(pseudo_route_record(roa, remarks)?, JournalOrigin::PseudoIrr, None)?;
        }
        // Release the pseudo source before the status pass locks other sources
        handler.commit()?;
        let roa_count = roas.len();

        let validator = BulkRouteValidator::new(roas, self.settings.rpki.excluded_sources.clone());
        let routes = handler.route_summaries(None)?;
        let deltas = validator.validate_all(&routes);
        let status_changes = handler.update_rpki_status(&deltas.changes())?;
        handler.commit()?;

        Ok(RoaImportSummary {
            roas: roa_count,
            pseudo_records: handler
                .execute_query(&RecordQuery::new().sources([PSEUDO_SOURCE]))?
                .len(),
            status_changes,
        })
    }
}
