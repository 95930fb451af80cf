//! One mirror pass for one source
//!
//! | Condition                       | Action              |
//! |---------------------------------|---------------------|
//! | `force_reload` set              | full reload         |
//! | no newest-mirror serial         | full reload         |
//! | no NRTM host configured         | full reload         |
//! | otherwise                       | NRTM from newest+1  |

use std::sync::Arc;

use tracing::{error, info, instrument};

use irr_core::Settings;
use irr_storage::DatabaseHandler;

use super::{FullImportRunner, MirrorServices, NrtmImportRunner};
use crate::error::{MirrorError, MirrorResult};
use crate::nrtm::ApplyCounts;

/// Result of one mirror pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MirrorRunOutcome {
    FullImport(ApplyCounts),
    /// Full reload skipped, upstream serial not newer
    UpToDate,
    Incremental(ApplyCounts),
    Failed {
        message: String,
        /// A consistency guarantee would have been violated
        integrity: bool,
    },
}

impl MirrorRunOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// Decides between a full reload and an incremental pull, and runs it
pub struct MirrorUpdateRunner {
    source: String,
    settings: Arc<Settings>,
    services: MirrorServices,
}

impl MirrorUpdateRunner {
    pub fn new(source: impl Into<String>, settings: Arc<Settings>, services: MirrorServices) -> Self {
        Self {
            source: source.into().to_ascii_uppercase(),
            settings,
            services,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Run one pass; failures are logged and recorded, never returned
    #[instrument(skip(self), fields(source = %self.source))]
    pub async fn run(&self) -> MirrorRunOutcome {
        let status = match self.services.storage.source_status(&self.source) {
            Ok(status) => status,
            Err(err) => return self.fail(None, MirrorError::from(err), false),
        };
        let newest_mirror = status.as_ref().and_then(|s| s.serial_newest_mirror);
        let force_reload = status.as_ref().is_some_and(|s| s.force_reload);
        let nrtm_enabled = self
            .settings
            .source(&self.source)
            .is_some_and(|s| s.nrtm_enabled());

        match newest_mirror {
            Some(newest) if !force_reload && nrtm_enabled => {
                let runner = NrtmImportRunner::new(&self.source, self.settings.clone(), self.services.clone());
                let fetched = runner.fetch(newest).await;
                self.complete(fetched, force_reload, |handler, stream| {
                    runner.apply(handler, &stream).map(MirrorRunOutcome::Incremental)
                })
            }
            _ => {
                info!(force_reload, ?newest_mirror, nrtm_enabled, "Running full import");
                let runner = FullImportRunner::new(&self.source, self.settings.clone(), self.services.clone());
                let fetched = runner.fetch(newest_mirror, force_reload).await;
                self.complete(fetched, force_reload, |handler, data| match data {
                    Some(data) => runner.load(handler, data).map(MirrorRunOutcome::FullImport),
                    None => Ok(MirrorRunOutcome::UpToDate),
                })
            }
        }
    }

    /// Storage stage of a run, after every network call has finished
    fn complete<T>(
        &self,
        fetched: MirrorResult<T>,
        force_reload: bool,
        stage: impl FnOnce(&mut DatabaseHandler, T) -> MirrorResult<MirrorRunOutcome>,
    ) -> MirrorRunOutcome {
        let mut handler = DatabaseHandler::new(self.services.storage.clone());
        let result = fetched
            .and_then(|data| stage(&mut handler, data))
            .and_then(|outcome| {
                handler.commit()?;
                Ok(outcome)
            });
        match result {
            Ok(outcome) => outcome,
            Err(err) => self.fail(Some(handler), err, force_reload),
        }
    }

    fn fail(&self, handler: Option<DatabaseHandler>, err: MirrorError, force_reload: bool) -> MirrorRunOutcome {
        if err.is_io() {
            error!(source = %self.source, "Mirror update failed for {}: {err}", self.source);
        } else if err.is_integrity() {
            error!(source = %self.source, error = ?err, "Integrity violation during mirror update");
        } else {
            error!(source = %self.source, error = ?err, "Mirror update failed");
        }

        // A failed run leaves the source as it was
        let mut handler = handler.unwrap_or_else(|| DatabaseHandler::new(self.services.storage.clone()));
        handler.rollback();
        handler.record_mirror_error(&self.source, err.to_string());
        if force_reload {
            handler.set_force_reload(&self.source);
        }
        if let Err(commit_err) = handler.commit() {
            error!(source = %self.source, error = ?commit_err, "Failed to record mirror error");
        }

        MirrorRunOutcome::Failed {
            message: err.to_string(),
            integrity: err.is_integrity(),
        }
    }
}
