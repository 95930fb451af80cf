//! Full reload of a source from its export files

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use irr_core::{Settings, SourceSettings};
use irr_routing::BulkRouteValidator;
use irr_storage::{DatabaseHandler, JournalOrigin};

use super::MirrorServices;
use crate::error::{MirrorError, MirrorResult};
use crate::nrtm::ApplyCounts;
use crate::retrieval::RetrievedFile;
use crate::text::{is_comment_paragraph, split_paragraphs};

/// Downloaded export of one source
#[derive(Debug)]
pub struct FullImportData {
    /// Serial matching the export, when a serial file is configured
    pub serial: Option<u64>,
    pub files: Vec<RetrievedFile>,
}

/// Wipes a source and loads it from its export files
pub struct FullImportRunner {
    source: String,
    settings: Arc<Settings>,
    services: MirrorServices,
}

impl FullImportRunner {
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

    /// Download the export
    ///
    /// Returns `None` without downloading the export files when the
    /// upstream serial is not newer than `newest_mirror` and `force` is
    /// not set.
    #[instrument(skip(self), fields(source = %self.source))]
    pub async fn fetch(&self, newest_mirror: Option<u64>, force: bool) -> MirrorResult<Option<FullImportData>> {
        let settings = self.source_settings()?;
        if settings.import_source.is_empty() {
            return Err(MirrorError::Config(format!(
                "source {} has no import_source to reload from",
                self.source
            )));
        }

        let serial = match &settings.import_serial_source {
            Some(url) => {
                let text = self.services.retriever.retrieve_contents(url).await?;
                let serial = text.trim().parse::<u64>().map_err(|_| {
                    MirrorError::protocol(format!("invalid serial {:?} in {url}", text.trim()))
                })?;
                Some(serial)
            }
            None => None,
        };
        if !force
            && let (Some(serial), Some(newest)) = (serial, newest_mirror)
            && serial <= newest
        {
            info!(serial, newest, "Upstream serial is not newer, skipping full import");
            return Ok(None);
        }

        let mut files = Vec::with_capacity(settings.import_source.len());
        for url in &settings.import_source {
            debug!(%url, "Retrieving export file");
            files.push(self.services.retriever.retrieve_file(url).await?);
        }
        Ok(Some(FullImportData { serial, files }))
    }

    /// Replace the source's records with the downloaded export
    ///
    /// Journaling is off for the rest of the handler's unit of work.
    #[instrument(skip(self, handler, data), fields(source = %self.source, files = data.files.len()))]
    pub fn load(&self, handler: &mut DatabaseHandler, data: FullImportData) -> MirrorResult<ApplyCounts> {
        let validator = if self.settings.rpki_enabled() {
            Some(BulkRouteValidator::from_store(
                &self.services.storage.roa_store(),
                self.settings.rpki.excluded_sources.clone(),
            )?)
        } else {
            None
        };

        handler.delete_all_records_with_journal(&self.source)?;
        handler.disable_journaling();

        let mut counts = ApplyCounts::default();
        for file in data.files {
            let text = file.read_to_string()?;
            self.load_text(handler, &text, validator.as_ref(), &mut counts)?;
            if let Err(err) = file.cleanup() {
                warn!(%err, "Failed to remove temporary export file");
            }
        }
        if let Some(serial) = data.serial {
            handler.force_record_serial_seen(&self.source, serial);
        }

        info!(
            loaded = counts.applied,
            unknown_class = counts.unknown_class,
            filtered = counts.filtered,
            invalid = counts.invalid,
            serial = ?data.serial,
            "Full import complete"
        );
        Ok(counts)
    }

    fn load_text(
        &self,
        handler: &mut DatabaseHandler,
        text: &str,
        validator: Option<&BulkRouteValidator>,
        counts: &mut ApplyCounts,
    ) -> MirrorResult<()> {
        let filter = self.source_settings()?.object_class_filter.as_deref();
        for paragraph in split_paragraphs(text) {
            if paragraph.lines().next().is_some_and(|line| line.trim() == "# EOF") {
                break;
            }
            if is_comment_paragraph(&paragraph) {
                continue;
            }

            let mut record = match self.services.parser.record_from_text(&paragraph, false) {
                Ok(record) => record,
                Err(err) if err.is_unknown_class() => {
                    counts.unknown_class += 1;
                    continue;
                }
                Err(err) => {
                    warn!(%err, "Skipping unparseable object in export");
                    counts.invalid += 1;
                    continue;
                }
            };
            if filter.is_some_and(|classes| !classes.contains(&record.object_class)) {
                counts.filtered += 1;
                continue;
            }
            if record.source != self.source {
                warn!(pk = %record.rpsl_pk, found = %record.source, "Skipping object with foreign source in export");
                counts.invalid += 1;
                continue;
            }
            if let Some(validator) = validator
                && let (Some(prefix), Some(origin)) = (record.prefix, record.origin())
            {
                record.rpki_status = validator.status_for(&prefix, origin, &record.source);
            }
            handler.upsert_record(record, JournalOrigin::Mirror, None)?;
            counts.applied += 1;
        }
        Ok(())
    }
}
