//! Incremental update over NRTM

use std::sync::Arc;

use tracing::{info, instrument};

use irr_core::{Settings, SourceSettings};
use irr_routing::{RouteValidator, SingleRouteValidator};
use irr_storage::DatabaseHandler;

use super::MirrorServices;
use crate::error::{MirrorError, MirrorResult};
use crate::nrtm::{ApplyCounts, END_MARKERS, NrtmStreamParser, ParsedStream, replication_query};

/// Pulls and applies everything after the newest mirrored serial
pub struct NrtmImportRunner {
    source: String,
    settings: Arc<Settings>,
    services: MirrorServices,
}

impl NrtmImportRunner {
    pub fn new(source: impl Into<String>, settings: Arc<Settings>, services: MirrorServices) -> Self {
        Self {
            source: source.into().to_ascii_uppercase(),
            settings,
            services,
        }
    }

    fn source_settings(&self) -> MirrorResult<&SourceSettings> {
        self.settings
            .source(&self.source)
            .ok_or_else(|| MirrorError::Config(format!("source {} is not configured", self.source)))
    }

    /// Query the upstream server and parse its complete response
    #[instrument(skip(self), fields(source = %self.source))]
    pub async fn fetch(&self, newest_mirror: u64) -> MirrorResult<ParsedStream> {
        let settings = self.source_settings()?;
        let host = settings
            .nrtm_host
            .as_deref()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| MirrorError::Config(format!("source {} has no nrtm_host", self.source)))?;

        let query = replication_query(&self.source, newest_mirror + 1);
        info!(%host, port = settings.nrtm_port(), %query, "Retrieving NRTM updates");
        let response = self
            .services
            .replication
            .replication_query(host, settings.nrtm_port(), &query, END_MARKERS)
            .await?;

        NrtmStreamParser::new(&self.source, settings.object_class_filter.clone()).parse(&response)
    }

    /// Apply every parsed operation in order
    #[instrument(skip(self, handler, stream), fields(source = %self.source, operations = stream.operations.len()))]
    pub fn apply(&self, handler: &mut DatabaseHandler, stream: &ParsedStream) -> MirrorResult<ApplyCounts> {
        let validator = self.settings.rpki_enabled().then(|| {
            SingleRouteValidator::new(
                self.services.storage.roa_store(),
                self.settings.rpki.excluded_sources.clone(),
            )
        });
        let validator = validator.as_ref().map(|v| v as &dyn RouteValidator);

        let mut counts = ApplyCounts::default();
        for operation in &stream.operations {
            counts.add(operation.apply(handler, self.services.parser.as_ref(), validator)?);
        }
        if let Some(serial) = stream.highest_serial() {
            handler.force_record_serial_seen(&self.source, serial);
        }

        info!(
            applied = counts.applied,
            unknown_class = counts.unknown_class,
            filtered = counts.filtered,
            invalid = counts.invalid,
            newest = ?stream.highest_serial(),
            "NRTM import complete"
        );
        Ok(counts)
    }
}
