//! redb table definitions and storage manager
//!
//! Every source lives in its own database file so that writers to different
//! sources never contend for redb's single writer. ROAs live in a separate
//! database shared by the whole process.

use std::path::PathBuf;
use std::sync::Arc;

use redb::{Database, ReadableTable, TableDefinition, WriteTransaction};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, instrument};

use irr_core::Record;

use crate::error::{StorageError, StorageResult, db_err};

/// Type alias for scan results to simplify complex type
pub type ScanResults = Vec<(Vec<u8>, Vec<u8>)>;

// Key: rpsl_pk bytes, Value: serialized Record
pub const RECORDS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("records");

// Key: serial as big-endian u64, Value: serialized JournalEntry
pub const JOURNAL: TableDefinition<&[u8], &[u8]> = TableDefinition::new("journal");

// Key: source name, Value: serialized SourceStatus
pub const SOURCE_STATUS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("source_status");

// Key: prefix key bytes ++ asn ++ max_length ++ trust anchor, Value: serialized Roa
pub const ROAS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("roas");

/// Which set of tables a database file carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableSet {
    /// Records, journal and status of one source
    Source,
    /// The process-wide ROA set
    Roas,
}

/// Configuration for redb storage
#[derive(Debug, Clone)]
pub struct RedbStorageConfig {
    /// Path to the database file
    pub db_path: PathBuf,
    pub tables: TableSet,
}

impl RedbStorageConfig {
    pub fn source(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            tables: TableSet::Source,
        }
    }

    pub fn roas(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            tables: TableSet::Roas,
        }
    }
}

/// One redb database file
pub struct RedbStorage {
    db: Arc<Database>,
    config: RedbStorageConfig,
}

impl RedbStorage {
    /// Open or create the database
    #[instrument(skip(config), fields(path = %config.db_path.display()))]
    pub fn open(config: RedbStorageConfig) -> StorageResult<Self> {
        if let Some(parent) = config.db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::create(&config.db_path).map_err(|e| StorageError::Io(e.to_string()))?;

        info!("Opened redb database");

        let storage = Self {
            db: Arc::new(db),
            config,
        };
        storage.init_tables()?;

        Ok(storage)
    }

    fn init_tables(&self) -> StorageResult<()> {
        let write_txn = self.db.begin_write().map_err(db_err)?;

        match self.config.tables {
            TableSet::Source => {
                write_txn.open_table(RECORDS).map_err(db_err)?;
                write_txn.open_table(JOURNAL).map_err(db_err)?;
                write_txn.open_table(SOURCE_STATUS).map_err(db_err)?;
            }
            TableSet::Roas => {
                write_txn.open_table(ROAS).map_err(db_err)?;
            }
        }

        write_txn.commit().map_err(db_err)?;

        debug!(tables = ?self.config.tables, "Initialized redb tables");
        Ok(())
    }

    /// Get a reference to the database
    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn config(&self) -> &RedbStorageConfig {
        &self.config
    }

    /// Get a value from a table in a fresh read transaction
    pub fn get(
        &self,
        table: TableDefinition<&[u8], &[u8]>,
        key: &[u8],
    ) -> StorageResult<Option<Vec<u8>>> {
        let read_txn = self.db.begin_read().map_err(db_err)?;
        let table = read_txn.open_table(table).map_err(db_err)?;
        let value = table.get(key).map_err(db_err)?.map(|v| v.value().to_vec());
        Ok(value)
    }

    /// Iterate over all entries in a table with a prefix
    pub fn scan_prefix(
        &self,
        table: TableDefinition<&[u8], &[u8]>,
        prefix: &[u8],
    ) -> StorageResult<ScanResults> {
        let read_txn = self.db.begin_read().map_err(db_err)?;
        let table = read_txn.open_table(table).map_err(db_err)?;
        scan_table_prefix(&table, prefix)
    }

    /// Number of entries in a table
    pub fn count(&self, table: TableDefinition<&[u8], &[u8]>) -> StorageResult<usize> {
        let read_txn = self.db.begin_read().map_err(db_err)?;
        let table = read_txn.open_table(table).map_err(db_err)?;
        let mut count = 0;
        for entry in table.iter().map_err(db_err)? {
            entry.map_err(db_err)?;
            count += 1;
        }
        Ok(count)
    }
}

/// Prefix scan over an already opened table
pub(crate) fn scan_table_prefix<T>(table: &T, prefix: &[u8]) -> StorageResult<ScanResults>
where
    T: ReadableTable<&'static [u8], &'static [u8]>,
{
    let mut results = Vec::new();
    for entry in table.range(prefix..).map_err(db_err)? {
        let (key, value) = entry.map_err(db_err)?;
        let key_bytes = key.value();
        if !key_bytes.starts_with(prefix) {
            break;
        }
        results.push((key_bytes.to_vec(), value.value().to_vec()));
    }
    Ok(results)
}

/// All keys of a table, for wiping without holding an iterator
pub(crate) fn all_keys<T>(table: &T) -> StorageResult<Vec<Vec<u8>>>
where
    T: ReadableTable<&'static [u8], &'static [u8]>,
{
    let mut keys = Vec::new();
    for entry in table.iter().map_err(db_err)? {
        let (key, _) = entry.map_err(db_err)?;
        keys.push(key.value().to_vec());
    }
    Ok(keys)
}

pub(crate) fn encode<T: Serialize>(value: &T) -> StorageResult<Vec<u8>> {
    postcard::to_allocvec(value).map_err(|e| StorageError::Serialization(e.to_string()))
}

pub(crate) fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StorageResult<T> {
    Ok(postcard::from_bytes(bytes)?)
}

/// Read one record by primary key
pub(crate) fn read_record<T>(table: &T, rpsl_pk: &str) -> StorageResult<Option<Record>>
where
    T: ReadableTable<&'static [u8], &'static [u8]>,
{
    match table.get(rpsl_pk.as_bytes()).map_err(db_err)? {
        Some(bytes) => Ok(Some(decode(bytes.value())?)),
        None => Ok(None),
    }
}

/// Decode every record of a table, in primary key order
pub(crate) fn read_all_records<T>(table: &T) -> StorageResult<Vec<Record>>
where
    T: ReadableTable<&'static [u8], &'static [u8]>,
{
    let mut records = Vec::new();
    for entry in table.iter().map_err(db_err)? {
        let (_, value) = entry.map_err(db_err)?;
        records.push(decode(value.value())?);
    }
    Ok(records)
}

/// Insert or replace a record, returning the row it replaced
pub(crate) fn write_record(txn: &WriteTransaction, record: &Record) -> StorageResult<Option<Record>> {
    let bytes = encode(record)?;
    let mut table = txn.open_table(RECORDS).map_err(db_err)?;
    let previous = table
        .insert(record.rpsl_pk.as_bytes(), bytes.as_slice())
        .map_err(db_err)?;
    match previous {
        Some(old) => Ok(Some(decode(old.value())?)),
        None => Ok(None),
    }
}

/// Remove a record, returning the removed row
pub(crate) fn remove_record(txn: &WriteTransaction, rpsl_pk: &str) -> StorageResult<Option<Record>> {
    let mut table = txn.open_table(RECORDS).map_err(db_err)?;
    let removed = table.remove(rpsl_pk.as_bytes()).map_err(db_err)?;
    match removed {
        Some(old) => Ok(Some(decode(old.value())?)),
        None => Ok(None),
    }
}

/// Remove every row of a table inside `txn`, returning how many went
pub(crate) fn clear_table(
    txn: &WriteTransaction,
    definition: TableDefinition<&[u8], &[u8]>,
) -> StorageResult<usize> {
    let mut table = txn.open_table(definition).map_err(db_err)?;
    let keys = all_keys(&table)?;
    for key in &keys {
        table.remove(key.as_slice()).map_err(db_err)?;
    }
    Ok(keys.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (RedbStorage, TempDir) {
        let temp = TempDir::new().unwrap();
        let storage = RedbStorage::open(RedbStorageConfig::source(temp.path().join("TEST.redb"))).unwrap();
        (storage, temp)
    }

    #[test]
    fn test_open_creates_tables() {
        let (storage, _temp) = setup();
        assert_eq!(storage.count(RECORDS).unwrap(), 0);
        assert_eq!(storage.count(JOURNAL).unwrap(), 0);
        assert_eq!(storage.count(SOURCE_STATUS).unwrap(), 0);
    }

    #[test]
    fn test_scan_prefix_stops_at_boundary() {
        let (storage, _temp) = setup();
        let txn = storage.db().begin_write().unwrap();
        {
            let mut table = txn.open_table(RECORDS).unwrap();
            table.insert(b"ab1".as_slice(), b"1".as_slice()).unwrap();
            table.insert(b"ab2".as_slice(), b"2".as_slice()).unwrap();
            table.insert(b"ac1".as_slice(), b"3".as_slice()).unwrap();
        }
        txn.commit().unwrap();

        let results = storage.scan_prefix(RECORDS, b"ab").unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[1].1, b"2".to_vec());
    }

    #[test]
    fn test_clear_table() {
        let (storage, _temp) = setup();
        let txn = storage.db().begin_write().unwrap();
        {
            let mut table = txn.open_table(JOURNAL).unwrap();
            for serial in 1u64..=5 {
                table
                    .insert(serial.to_be_bytes().as_slice(), b"x".as_slice())
                    .unwrap();
            }
        }
        assert_eq!(clear_table(&txn, JOURNAL).unwrap(), 5);
        txn.commit().unwrap();
        assert_eq!(storage.count(JOURNAL).unwrap(), 0);
    }
}
