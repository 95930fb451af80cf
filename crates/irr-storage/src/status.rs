//! Per-source status and serial bookkeeping
//!
//! [`StatusTracker`] collects everything a unit of work learns about its
//! sources (journaled and forced serials, mirror errors, exported serials)
//! and folds it into the persisted [`SourceStatus`] rows in [`StatusTracker::finalise_source`].

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use redb::{ReadableTable, WriteTransaction};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use irr_core::{DatabaseOperation, Record};

use crate::error::{StorageError, StorageResult, db_err};
use crate::journal::{self, JournalEntry, JournalOrigin};
use crate::tables::{JOURNAL, SOURCE_STATUS, decode, encode};

/// Persisted per-source status row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceStatus {
    pub source: String,
    pub serial_oldest_seen: Option<u64>,
    pub serial_newest_seen: Option<u64>,
    pub serial_oldest_journal: Option<u64>,
    pub serial_newest_journal: Option<u64>,
    pub serial_last_export: Option<u64>,
    pub serial_newest_mirror: Option<u64>,
    /// Next mirror run must do a full reload
    pub force_reload: bool,
    /// Most recent mirror error only
    pub last_error: Option<String>,
    pub last_error_timestamp: Option<DateTime<Utc>>,
    pub updated: DateTime<Utc>,
}

impl SourceStatus {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            serial_oldest_seen: None,
            serial_newest_seen: None,
            serial_oldest_journal: None,
            serial_newest_journal: None,
            serial_last_export: None,
            serial_newest_mirror: None,
            force_reload: false,
            last_error: None,
            last_error_timestamp: None,
            updated: Utc::now(),
        }
    }
}

pub(crate) fn read_status<T>(table: &T, source: &str) -> StorageResult<Option<SourceStatus>>
where
    T: ReadableTable<&'static [u8], &'static [u8]>,
{
    match table.get(source.as_bytes()).map_err(db_err)? {
        Some(bytes) => Ok(Some(decode(bytes.value())?)),
        None => Ok(None),
    }
}

pub(crate) fn write_status(txn: &WriteTransaction, status: &SourceStatus) -> StorageResult<()> {
    let bytes = encode(status)?;
    let mut table = txn.open_table(SOURCE_STATUS).map_err(db_err)?;
    table
        .insert(status.source.as_bytes(), bytes.as_slice())
        .map_err(db_err)?;
    Ok(())
}

/// What one unit of work learned about one source
#[derive(Debug, Default)]
struct PendingStatus {
    seen: Option<(u64, u64)>,
    newest_mirror: Option<u64>,
    newest_journaled: Option<u64>,
    wiped: bool,
    mirror_error: Option<(String, DateTime<Utc>)>,
    exported: Option<u64>,
    force_reload: bool,
}

impl PendingStatus {
    fn see(&mut self, serial: u64) {
        self.seen = Some(match self.seen {
            Some((oldest, newest)) => (oldest.min(serial), newest.max(serial)),
            None => (serial, serial),
        });
    }
}

/// Journal writer and status collector for one unit of work
#[derive(Debug, Default)]
pub struct StatusTracker {
    pending: BTreeMap<String, PendingStatus>,
    journaling_suspended: bool,
}

impl StatusTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop journaling for the rest of this unit of work
    pub fn suspend_journaling(&mut self) {
        self.journaling_suspended = true;
    }

    pub fn journaling_suspended(&self) -> bool {
        self.journaling_suspended
    }

    /// Sources touched so far
    pub fn touched_sources(&self) -> impl Iterator<Item = &str> {
        self.pending.keys().map(String::as_str)
    }

    pub fn is_touched(&self, source: &str) -> bool {
        self.pending.contains_key(source)
    }

    /// Whether upstream serials were applied to `source` in this unit of work
    pub fn has_forced_serials(&self, source: &str) -> bool {
        self.pending.get(source).is_some_and(|p| p.newest_mirror.is_some())
    }

    /// Drop what was collected for a source after it committed
    pub(crate) fn forget(&mut self, source: &str) {
        self.pending.remove(source);
    }

    /// Mark a source for finalise without other changes
    pub fn touch(&mut self, source: &str) {
        self.entry(source);
    }

    fn entry(&mut self, source: &str) -> &mut PendingStatus {
        self.pending.entry(source.to_string()).or_default()
    }

    /// Journal one applied change
    ///
    /// `txn` must be the write transaction of the record's source, whose
    /// writer lock serializes allocation against every other writer to that
    /// source. Returns the serial written, if any.
    pub(crate) fn record_operation(
        &mut self,
        txn: &WriteTransaction,
        journaling: bool,
        record: &Record,
        operation: DatabaseOperation,
        origin: JournalOrigin,
        forced_serial: Option<u64>,
    ) -> StorageResult<Option<u64>> {
        let source = record.source.as_str();
        self.entry(source);

        if !journaling || self.journaling_suspended {
            if let Some(serial) = forced_serial {
                self.remember_forced(source, serial);
            }
            return Ok(None);
        }

        let serial = match forced_serial {
            Some(serial) => {
                let table = txn.open_table(JOURNAL).map_err(db_err)?;
                if journal::contains_serial(&table, serial)? {
                    error!(%source, serial, "Forced serial already journaled");
                    return Err(StorageError::integrity(format!(
                        "serial {serial} already present in journal of {source}"
                    )));
                }
                serial
            }
            None => self.next_serial(txn, source)?,
        };

        let entry = JournalEntry {
            rpsl_pk: record.rpsl_pk.clone(),
            source: source.to_string(),
            serial,
            operation,
            object_class: record.object_class,
            object_text: record.object_text.clone(),
            origin,
            timestamp: Utc::now(),
        };
        journal::append_entry(txn, &entry)?;

        let pending = self.entry(source);
        pending.see(serial);
        pending.newest_journaled = Some(pending.newest_journaled.map_or(serial, |n| n.max(serial)));
        if forced_serial.is_some() {
            pending.newest_mirror = Some(pending.newest_mirror.map_or(serial, |n| n.max(serial)));
        }

        debug!(%source, serial, %operation, %origin, "Journaled change");
        Ok(Some(serial))
    }

    /// `max(serial) + 1` over the journal and every serial already seen
    fn next_serial(&self, txn: &WriteTransaction, source: &str) -> StorageResult<u64> {
        let journal_newest = {
            let table = txn.open_table(JOURNAL).map_err(db_err)?;
            journal::serial_bounds(&table)?.map(|(_, newest)| newest)
        };
        let pending = self.pending.get(source);
        let wiped = pending.is_some_and(|p| p.wiped);
        let stored_newest = if wiped {
            None
        } else {
            let table = txn.open_table(SOURCE_STATUS).map_err(db_err)?;
            read_status(&table, source)?.and_then(|s| s.serial_newest_seen)
        };
        let pending_newest = pending.and_then(|p| p.seen.map(|(_, newest)| newest));

        let newest = [journal_newest, stored_newest, pending_newest]
            .into_iter()
            .flatten()
            .max()
            .unwrap_or(0);
        Ok(newest + 1)
    }

    fn remember_forced(&mut self, source: &str, serial: u64) {
        let pending = self.entry(source);
        pending.see(serial);
        pending.newest_mirror = Some(pending.newest_mirror.map_or(serial, |n| n.max(serial)));
    }

    /// Advance bookkeeping for an acknowledged serial without a journal row
    pub fn force_record_serial_seen(&mut self, source: &str, serial: u64) {
        self.remember_forced(source, serial);
    }

    pub fn record_mirror_error(&mut self, source: &str, message: impl Into<String>) {
        self.entry(source).mirror_error = Some((message.into(), Utc::now()));
    }

    pub fn record_serial_exported(&mut self, source: &str, serial: u64) {
        self.entry(source).exported = Some(serial);
    }

    /// Keep `force_reload` set through finalise instead of clearing it
    pub fn request_force_reload(&mut self, source: &str) {
        self.entry(source).force_reload = true;
    }

    /// Forget seen serials after the source's records and journal were wiped
    pub fn reset_source(&mut self, source: &str) {
        let pending = self.entry(source);
        pending.wiped = true;
        pending.seen = None;
        pending.newest_mirror = None;
        pending.newest_journaled = None;
    }

    /// Newest serial journaled for `source` in this unit of work
    pub fn newest_journaled(&self, source: &str) -> Option<u64> {
        self.pending.get(source).and_then(|p| p.newest_journaled)
    }

    /// Fold pending knowledge about `source` into its status row
    pub(crate) fn finalise_source(&self, txn: &WriteTransaction, source: &str) -> StorageResult<SourceStatus> {
        let Some(pending) = self.pending.get(source) else {
            return Err(StorageError::not_found(format!("no pending status for {source}")));
        };

        let mut status = {
            let table = txn.open_table(SOURCE_STATUS).map_err(db_err)?;
            read_status(&table, source)?.unwrap_or_else(|| SourceStatus::new(source))
        };

        if pending.wiped {
            status.serial_oldest_seen = None;
            status.serial_newest_seen = None;
            status.serial_newest_mirror = None;
        }
        status.force_reload = pending.force_reload;

        if let Some((oldest, newest)) = pending.seen {
            status.serial_oldest_seen =
                Some(status.serial_oldest_seen.map_or(oldest, |s| s.min(oldest)));
            status.serial_newest_seen =
                Some(status.serial_newest_seen.map_or(newest, |s| s.max(newest)));
        }

        let bounds = {
            let table = txn.open_table(JOURNAL).map_err(db_err)?;
            journal::serial_bounds(&table)?
        };
        status.serial_oldest_journal = bounds.map(|(oldest, _)| oldest);
        status.serial_newest_journal = bounds.map(|(_, newest)| newest);

        if let Some(serial) = pending.newest_mirror {
            status.serial_newest_mirror = Some(serial);
        }
        if let Some((message, timestamp)) = &pending.mirror_error {
            status.last_error = Some(message.clone());
            status.last_error_timestamp = Some(*timestamp);
        }
        if let Some(serial) = pending.exported {
            status.serial_last_export = Some(serial);
        }
        status.updated = Utc::now();

        write_status(txn, &status)?;
        debug!(%source, newest_mirror = ?status.serial_newest_mirror, "Finalised source status");
        Ok(status)
    }

    /// Drop everything collected; journaling suspension is kept
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_see_widens() {
        let mut pending = PendingStatus::default();
        pending.see(10);
        pending.see(7);
        pending.see(12);
        assert_eq!(pending.seen, Some((7, 12)));
    }

    #[test]
    fn test_forced_serial_tracks_newest_mirror() {
        let mut tracker = StatusTracker::new();
        tracker.force_record_serial_seen("TEST", 100);
        tracker.force_record_serial_seen("TEST", 99);
        let pending = &tracker.pending["TEST"];
        assert_eq!(pending.newest_mirror, Some(100));
        assert_eq!(pending.seen, Some((99, 100)));
    }

    #[test]
    fn test_reset_forgets_serials() {
        let mut tracker = StatusTracker::new();
        tracker.force_record_serial_seen("TEST", 5);
        tracker.reset_source("TEST");
        tracker.force_record_serial_seen("TEST", 3);
        let pending = &tracker.pending["TEST"];
        assert!(pending.wiped);
        assert_eq!(pending.newest_mirror, Some(3));
    }
}
