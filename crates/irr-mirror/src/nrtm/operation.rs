//! Applying a single NRTM operation

use tracing::{debug, error, info};

use irr_core::{DatabaseOperation, ObjectClass, RecordParser};
use irr_routing::RouteValidator;
use irr_storage::{DatabaseHandler, JournalOrigin};

use crate::error::MirrorResult;

/// One `ADD`/`DEL` from a parsed stream
#[derive(Debug, Clone, PartialEq)]
pub struct NrtmOperation {
    pub source: String,
    pub operation: DatabaseOperation,
    pub serial: u64,
    pub object_text: String,
    pub object_class_filter: Option<Vec<ObjectClass>>,
}

/// What happened to one operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// Class not in the object class table
    UnknownClass,
    /// Class excluded by the source's filter
    Filtered,
    /// Unparseable text or a foreign source; recorded as a mirror error
    Invalid,
}

/// Per-run tally of operation outcomes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyCounts {
    pub applied: usize,
    pub unknown_class: usize,
    pub filtered: usize,
    pub invalid: usize,
}

impl ApplyCounts {
    pub fn add(&mut self, outcome: ApplyOutcome) {
        match outcome {
            ApplyOutcome::Applied => self.applied += 1,
            ApplyOutcome::UnknownClass => self.unknown_class += 1,
            ApplyOutcome::Filtered => self.filtered += 1,
            ApplyOutcome::Invalid => self.invalid += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.applied + self.unknown_class + self.filtered + self.invalid
    }
}

impl NrtmOperation {
    fn class_allowed(&self, class: ObjectClass) -> bool {
        self.object_class_filter
            .as_ref()
            .is_none_or(|filter| filter.contains(&class))
    }

    /// Apply to the handler's unit of work
    ///
    /// Record-level problems are skipped and reported through the outcome.
    /// Only storage failures are returned as errors.
    pub fn apply(
        &self,
        handler: &mut DatabaseHandler,
        parser: &dyn RecordParser,
        validator: Option<&dyn RouteValidator>,
    ) -> MirrorResult<ApplyOutcome> {
        let mut record = match parser.record_from_text(&self.object_text, false) {
            Ok(record) => record,
            Err(err) if err.is_unknown_class() => {
                if self.object_class_filter.is_some() {
                    debug!(source = %self.source, serial = self.serial, %err, "Skipping operation");
                } else {
                    info!(source = %self.source, serial = self.serial, %err, "Ignoring operation for unknown object class");
                }
                return Ok(ApplyOutcome::UnknownClass);
            }
            Err(err) => {
                let message = format!(
                    "Parsing errors occurred while processing NRTM operation {} {}: {err}",
                    self.operation, self.serial
                );
                error!(source = %self.source, serial = self.serial, %err, "Unable to parse object in NRTM stream");
                handler.record_mirror_error(&self.source, message);
                return Ok(ApplyOutcome::Invalid);
            }
        };

        if !self.class_allowed(record.object_class) {
            return Ok(ApplyOutcome::Filtered);
        }

        if record.source != self.source {
            let message = format!(
                "Incorrect source in NRTM operation {} {}: expected {}, found {:?}",
                self.operation,
                self.serial,
                self.source,
                record.declared_source().unwrap_or_default()
            );
            error!(source = %self.source, serial = self.serial, pk = %record.rpsl_pk, "Object source does not match stream source");
            handler.record_mirror_error(&self.source, message);
            return Ok(ApplyOutcome::Invalid);
        }

        match self.operation {
            DatabaseOperation::AddOrUpdate => {
                if let Some(validator) = validator
                    && let (Some(prefix), Some(origin)) = (record.prefix, record.origin())
                {
                    record.rpki_status = validator.validate_route(&prefix, origin, &record.source)?;
                }
                debug!(source = %self.source, serial = self.serial, pk = %record.rpsl_pk, "Applying ADD");
                handler.upsert_record(record, JournalOrigin::Mirror, Some(self.serial))?;
            }
            DatabaseOperation::Delete => {
                debug!(source = %self.source, serial = self.serial, pk = %record.rpsl_pk, "Applying DEL");
                handler.delete_record(&record.key(), JournalOrigin::Mirror, Some(self.serial))?;
            }
        }
        Ok(ApplyOutcome::Applied)
    }
}
