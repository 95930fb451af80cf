//! Unit of work over the record store
//!
//! A [`DatabaseHandler`] opens one redb write transaction per source on the
//! first write to that source and holds it until commit or rollback. The
//! write transaction is the source's exclusive lock: serial allocation for
//! one source is serialized across every handler in the process, while
//! handlers working on different sources never block each other.
//!
//! Commits are atomic per source. A unit of work spanning several sources
//! commits them one after another.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::Utc;
use redb::WriteTransaction;
use tracing::{debug, info, instrument, warn};

use irr_core::{DatabaseOperation, Record, RecordKey, RoutePreferenceStatus, RpkiStatus};

use crate::batch::{BatchedWriter, FlushReason, PendingUpsert};
use crate::context::{ChangeEvent, StorageContext};
use crate::error::{StorageError, StorageResult, db_err};
use crate::journal::{self, JournalEntry, JournalOrigin};
use crate::query::{RecordQuery, RouteSummary};
use crate::status::{SourceStatus, StatusTracker, read_status};
use crate::tables::{
    JOURNAL, RECORDS, SOURCE_STATUS, clear_table, read_all_records, read_record, remove_record,
    write_record,
};

fn txn_for<'a>(
    txns: &'a BTreeMap<String, WriteTransaction>,
    source: &str,
) -> StorageResult<&'a WriteTransaction> {
    txns.get(source)
        .ok_or_else(|| StorageError::not_found(format!("no open transaction for {source}")))
}

/// Transactional handle used by mirror runs and status passes
pub struct DatabaseHandler {
    ctx: Arc<StorageContext>,
    txns: BTreeMap<String, WriteTransaction>,
    batch: BatchedWriter,
    tracker: StatusTracker,
    wiped: BTreeSet<String>,
}

impl DatabaseHandler {
    pub fn new(ctx: Arc<StorageContext>) -> Self {
        let batch = BatchedWriter::new(ctx.config().batch_size);
        Self {
            ctx,
            txns: BTreeMap::new(),
            batch,
            tracker: StatusTracker::new(),
            wiped: BTreeSet::new(),
        }
    }

    pub fn context(&self) -> &Arc<StorageContext> {
        &self.ctx
    }

    /// Take the write lock of `source` if this handler does not hold it yet
    fn ensure_txn(&mut self, source: &str) -> StorageResult<()> {
        if source.is_empty() {
            return Err(StorageError::InvalidSource(String::new()));
        }
        if !self.txns.contains_key(source) {
            let storage = self.ctx.source_storage(source)?;
            let txn = storage.db().begin_write().map_err(db_err)?;
            debug!(%source, "Opened write transaction");
            self.txns.insert(source.to_string(), txn);
        }
        Ok(())
    }

    /// Write out the cache; on failure the whole unit of work is rolled back
    fn flush(&mut self, reason: FlushReason) -> StorageResult<()> {
        if self.batch.is_empty() {
            return Ok(());
        }
        let pending = self.batch.drain();
        debug!(count = pending.len(), %reason, "Flushing write-behind cache");
        if let Err(err) = self.write_batch(pending) {
            self.rollback();
            return Err(err);
        }
        Ok(())
    }

    fn write_batch(&mut self, pending: Vec<PendingUpsert>) -> StorageResult<()> {
        for upsert in pending {
            let source = upsert.record.source.clone();
            self.ensure_txn(&source)?;
            let txn = txn_for(&self.txns, &source)?;
            write_record(txn, &upsert.record)?;
            let journaling = self.ctx.journaling_enabled_for(&source);
            self.tracker.record_operation(
                txn,
                journaling,
                &upsert.record,
                DatabaseOperation::AddOrUpdate,
                upsert.origin,
                upsert.forced_serial,
            )?;
        }
        Ok(())
    }

    /// Insert or replace a record by (primary key, source)
    pub fn upsert_record(
        &mut self,
        record: Record,
        origin: JournalOrigin,
        forced_serial: Option<u64>,
    ) -> StorageResult<()> {
        self.ensure_txn(&record.source)?;
        if self.batch.contains(&record.key()) {
            self.flush(FlushReason::KeyCollision)?;
        }
        let full = self.batch.push(PendingUpsert {
            record,
            origin,
            forced_serial,
        });
        if full {
            self.flush(FlushReason::Capacity)?;
        }
        Ok(())
    }

    /// Delete a record by (primary key, source)
    ///
    /// Returns the removed record. A key with no stored row is logged and
    /// skipped; a forced serial is still remembered.
    pub fn delete_record(
        &mut self,
        key: &RecordKey,
        origin: JournalOrigin,
        forced_serial: Option<u64>,
    ) -> StorageResult<Option<Record>> {
        self.flush(FlushReason::PreDelete)?;
        self.ensure_txn(&key.source)?;
        let txn = txn_for(&self.txns, &key.source)?;
        let removed = remove_record(txn, &key.rpsl_pk)?;
        match &removed {
            Some(record) => {
                let journaling = self.ctx.journaling_enabled_for(&key.source);
                self.tracker.record_operation(
                    txn,
                    journaling,
                    record,
                    DatabaseOperation::Delete,
                    origin,
                    forced_serial,
                )?;
            }
            None => {
                warn!(%key, "Attempted to delete record, but no stored row matched");
                if let Some(serial) = forced_serial {
                    self.tracker.force_record_serial_seen(&key.source, serial);
                }
            }
        }
        Ok(removed)
    }

    /// Read one record, seeing this unit of work's own writes
    pub fn get_record(&mut self, key: &RecordKey) -> StorageResult<Option<Record>> {
        self.flush(FlushReason::PreQuery)?;
        if let Some(txn) = self.txns.get(&key.source) {
            let table = txn.open_table(RECORDS).map_err(db_err)?;
            return read_record(&table, &key.rpsl_pk);
        }
        let Some(storage) = self.ctx.existing_source_storage(&key.source)? else {
            return Ok(None);
        };
        let read_txn = storage.db().begin_read().map_err(db_err)?;
        let table = read_txn.open_table(RECORDS).map_err(db_err)?;
        read_record(&table, &key.rpsl_pk)
    }

    fn source_records(&self, source: &str) -> StorageResult<Vec<Record>> {
        if let Some(txn) = self.txns.get(source) {
            let table = txn.open_table(RECORDS).map_err(db_err)?;
            return read_all_records(&table);
        }
        let Some(storage) = self.ctx.existing_source_storage(source)? else {
            return Ok(Vec::new());
        };
        let read_txn = storage.db().begin_read().map_err(db_err)?;
        let table = read_txn.open_table(RECORDS).map_err(db_err)?;
        read_all_records(&table)
    }

    /// All records matching `query`, ordered by source then primary key
    #[instrument(skip(self, query))]
    pub fn execute_query(&mut self, query: &RecordQuery) -> StorageResult<Vec<Record>> {
        self.flush(FlushReason::PreQuery)?;
        let sources = match &query.sources {
            Some(sources) => sources.clone(),
            None => self.ctx.known_sources()?,
        };

        let mut results = Vec::new();
        for source in sources {
            match &query.rpsl_pks {
                Some(pks) => {
                    for pk in pks {
                        if let Some(record) = self.get_record(&RecordKey::new(pk.clone(), source.clone()))?
                            && query.matches(&record)
                        {
                            results.push(record);
                        }
                    }
                }
                None => results.extend(
                    self.source_records(&source)?
                        .into_iter()
                        .filter(|record| query.matches(record)),
                ),
            }
        }
        Ok(results)
    }

    /// Slim projections of route records for the status passes
    pub fn route_summaries(&mut self, sources: Option<&[String]>) -> StorageResult<Vec<RouteSummary>> {
        let mut query = RecordQuery::new().routes();
        if let Some(sources) = sources {
            query = query.sources(sources);
        }
        Ok(self
            .execute_query(&query)?
            .iter()
            .filter_map(RouteSummary::from_record)
            .collect())
    }

    /// Whether `source` replays upstream serials into its journal
    ///
    /// Local allocation on such a source would take serials the upstream
    /// will send later.
    fn is_mirrored(&self, txn: &WriteTransaction, source: &str) -> StorageResult<bool> {
        if self.ctx.config().mirrored_sources.contains(source) || self.tracker.has_forced_serials(source) {
            return Ok(true);
        }
        let table = txn.open_table(SOURCE_STATUS).map_err(db_err)?;
        Ok(read_status(&table, source)?.is_some_and(|s| s.serial_newest_mirror.is_some()))
    }

    /// Change one derived status field, journaling the flip
    ///
    /// Flips on mirrored sources are stored but not journaled.
    fn apply_status_flip(
        &mut self,
        key: &RecordKey,
        origin: JournalOrigin,
        mutate: impl FnOnce(&mut Record) -> bool,
    ) -> StorageResult<bool> {
        self.flush(FlushReason::PreQuery)?;
        self.ensure_txn(&key.source)?;
        let txn = txn_for(&self.txns, &key.source)?;
        let stored = {
            let table = txn.open_table(RECORDS).map_err(db_err)?;
            read_record(&table, &key.rpsl_pk)?
        };
        let Some(mut record) = stored else {
            debug!(%key, "Record vanished before status update");
            return Ok(false);
        };
        if !mutate(&mut record) {
            return Ok(false);
        }
        record.updated = Utc::now();
        write_record(txn, &record)?;

        let operation = if record.is_visible() {
            DatabaseOperation::AddOrUpdate
        } else {
            DatabaseOperation::Delete
        };
        let journaling = self.ctx.journaling_enabled_for(&key.source) && !self.is_mirrored(txn, &key.source)?;
        self.tracker
            .record_operation(txn, journaling, &record, operation, origin, None)?;
        Ok(true)
    }

    /// Apply status changes one source at a time, in source order
    ///
    /// Each source is committed before the next one is locked, so a status
    /// pass holds at most one source lock at any moment.
    fn apply_status_changes<S: Copy>(
        &mut self,
        changes: &[(RecordKey, S)],
        origin: JournalOrigin,
        mutate: impl Fn(&mut Record, S) -> bool,
    ) -> StorageResult<usize> {
        let mut by_source: BTreeMap<&str, Vec<(&RecordKey, S)>> = BTreeMap::new();
        for (key, status) in changes {
            by_source.entry(key.source.as_str()).or_default().push((key, *status));
        }

        let mut applied = 0;
        for (source, changes) in by_source {
            for (key, status) in changes {
                let flipped = self.apply_status_flip(key, origin, |record| mutate(record, status))?;
                applied += usize::from(flipped);
            }
            self.commit_source(source)?;
        }
        Ok(applied)
    }

    /// Store new RPKI statuses, journaling each flip. Returns flips applied.
    ///
    /// Commits every source it changes.
    #[instrument(skip(self, changes), fields(count = changes.len()))]
    pub fn update_rpki_status(&mut self, changes: &[(RecordKey, RpkiStatus)]) -> StorageResult<usize> {
        let applied = self.apply_status_changes(changes, JournalOrigin::RpkiStatus, |record, status| {
            let changed = record.rpki_status != status;
            record.rpki_status = status;
            changed
        })?;
        info!(applied, "Updated RPKI status");
        Ok(applied)
    }

    /// Store new route preference statuses, journaling each flip
    ///
    /// Commits every source it changes.
    #[instrument(skip(self, changes), fields(count = changes.len()))]
    pub fn update_route_preference_status(
        &mut self,
        changes: &[(RecordKey, RoutePreferenceStatus)],
    ) -> StorageResult<usize> {
        let applied = self.apply_status_changes(changes, JournalOrigin::RoutePreference, |record, status| {
            let changed = record.route_preference_status != status;
            record.route_preference_status = status;
            changed
        })?;
        info!(applied, "Updated route preference status");
        Ok(applied)
    }

    /// Wipe all records and the journal of a source
    #[instrument(skip(self))]
    pub fn delete_all_records_with_journal(&mut self, source: &str) -> StorageResult<usize> {
        self.flush(FlushReason::PreDelete)?;
        self.ensure_txn(source)?;
        let txn = txn_for(&self.txns, source)?;
        let records = clear_table(txn, RECORDS)?;
        let entries = clear_table(txn, JOURNAL)?;
        self.tracker.reset_source(source);
        self.wiped.insert(source.to_string());
        info!(%source, records, entries, "Wiped source");
        Ok(records)
    }

    /// Stop journaling for the rest of this handler's life
    pub fn disable_journaling(&mut self) {
        self.tracker.suspend_journaling();
    }

    pub fn force_record_serial_seen(&mut self, source: &str, serial: u64) {
        self.tracker.force_record_serial_seen(source, serial);
    }

    pub fn record_mirror_error(&mut self, source: &str, message: impl Into<String>) {
        self.tracker.record_mirror_error(source, message);
    }

    pub fn record_serial_exported(&mut self, source: &str, serial: u64) {
        self.tracker.record_serial_exported(source, serial);
    }

    /// Make the next mirror run of `source` a full reload
    pub fn set_force_reload(&mut self, source: &str) {
        self.tracker.request_force_reload(source);
    }

    /// Delete journal entries with a serial below `before_serial`
    #[instrument(skip(self))]
    pub fn expire_journal(&mut self, source: &str, before_serial: u64) -> StorageResult<usize> {
        self.flush(FlushReason::PreDelete)?;
        self.ensure_txn(source)?;
        let txn = txn_for(&self.txns, source)?;
        let removed = journal::remove_before(txn, before_serial)?;
        self.tracker.touch(source);
        info!(%source, before_serial, removed, "Expired journal entries");
        Ok(removed)
    }

    /// Journal entries in `[start, end]`, ascending
    pub fn journal_entries(
        &mut self,
        source: &str,
        start: u64,
        end: Option<u64>,
    ) -> StorageResult<Vec<JournalEntry>> {
        self.flush(FlushReason::PreQuery)?;
        if let Some(txn) = self.txns.get(source) {
            let table = txn.open_table(JOURNAL).map_err(db_err)?;
            return journal::read_range(&table, start, end);
        }
        let Some(storage) = self.ctx.existing_source_storage(source)? else {
            return Ok(Vec::new());
        };
        let read_txn = storage.db().begin_read().map_err(db_err)?;
        let table = read_txn.open_table(JOURNAL).map_err(db_err)?;
        journal::read_range(&table, start, end)
    }

    /// Status as of the last finalise visible to this handler
    pub fn source_status(&mut self, source: &str) -> StorageResult<Option<SourceStatus>> {
        if let Some(txn) = self.txns.get(source) {
            let table = txn.open_table(SOURCE_STATUS).map_err(db_err)?;
            return read_status(&table, source);
        }
        self.ctx.source_status(source)
    }

    /// Finalise and commit one source, releasing its lock
    ///
    /// Other sources stay open. Any failure rolls back the whole unit of work.
    fn commit_source(&mut self, source: &str) -> StorageResult<()> {
        let result = self.try_commit_source(source);
        if result.is_err() {
            self.rollback();
        }
        result
    }

    fn try_commit_source(&mut self, source: &str) -> StorageResult<()> {
        self.flush(FlushReason::PreCommit)?;
        let Some(txn) = self.txns.remove(source) else {
            return Ok(());
        };
        let status = if self.tracker.is_touched(source) {
            Some(self.tracker.finalise_source(&txn, source)?)
        } else {
            None
        };
        txn.commit().map_err(db_err)?;
        self.tracker.forget(source);
        debug!(%source, "Committed source");

        if self.wiped.remove(source) {
            self.ctx.notify(ChangeEvent::FullReload {
                source: source.to_string(),
            });
        }
        if let Some(status) = status {
            self.ctx.notify(ChangeEvent::Committed {
                source: source.to_string(),
                serial_newest: status.serial_newest_journal,
            });
        }
        Ok(())
    }

    /// Flush, finalise status rows and commit every open transaction
    ///
    /// Any failure before the first source commits rolls everything back.
    #[instrument(skip(self))]
    pub fn commit(&mut self) -> StorageResult<()> {
        let statuses = match self.prepare_commit() {
            Ok(statuses) => statuses,
            Err(err) => {
                self.rollback();
                return Err(err);
            }
        };

        let txns = std::mem::take(&mut self.txns);
        let wiped = std::mem::take(&mut self.wiped);
        self.tracker.clear();
        for (source, txn) in txns {
            // Remaining transactions abort on drop
            txn.commit().map_err(db_err)?;
            debug!(%source, "Committed source");
        }

        for source in wiped {
            self.ctx.notify(ChangeEvent::FullReload { source });
        }
        for (source, status) in statuses {
            self.ctx.notify(ChangeEvent::Committed {
                source,
                serial_newest: status.serial_newest_journal,
            });
        }
        Ok(())
    }

    fn prepare_commit(&mut self) -> StorageResult<BTreeMap<String, SourceStatus>> {
        self.flush(FlushReason::PreCommit)?;
        let touched: Vec<String> = self.tracker.touched_sources().map(str::to_string).collect();
        let mut statuses = BTreeMap::new();
        for source in touched {
            self.ensure_txn(&source)?;
            let txn = txn_for(&self.txns, &source)?;
            let status = self.tracker.finalise_source(txn, &source)?;
            statuses.insert(source, status);
        }
        Ok(statuses)
    }

    /// Abort every open transaction and drop pending writes
    pub fn rollback(&mut self) {
        self.batch.drain();
        self.tracker.clear();
        self.wiped.clear();
        for (source, txn) in std::mem::take(&mut self.txns) {
            if let Err(err) = txn.abort() {
                warn!(%source, error = %err, "Failed to abort transaction");
            }
        }
    }
}
