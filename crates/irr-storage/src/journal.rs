//! Serial-numbered change journal
//!
//! Each source database keeps one journal table keyed by serial. Serials are
//! stored big-endian so table order equals serial order.

use std::fmt;

use chrono::{DateTime, Utc};
use redb::{ReadableTable, WriteTransaction};
use serde::{Deserialize, Serialize};

use irr_core::{DatabaseOperation, ObjectClass};

use crate::error::{StorageResult, db_err};
use crate::tables::{JOURNAL, decode, encode};

/// What caused a journaled change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JournalOrigin {
    /// Applied from an upstream mirror
    Mirror,
    /// Pseudo record generated from a ROA
    PseudoIrr,
    /// Visibility changed by RPKI validation
    RpkiStatus,
    /// Visibility changed by route preference
    RoutePreference,
    /// Authoritative local change
    AuthChange,
    Unknown,
}

impl JournalOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mirror => "mirror",
            Self::PseudoIrr => "pseudo_irr",
            Self::RpkiStatus => "rpki_status",
            Self::RoutePreference => "route_preference",
            Self::AuthChange => "auth_change",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for JournalOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One journaled change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub rpsl_pk: String,
    pub source: String,
    pub serial: u64,
    pub operation: DatabaseOperation,
    pub object_class: ObjectClass,
    /// Full object text after an add, or the removed text for a delete
    pub object_text: String,
    pub origin: JournalOrigin,
    pub timestamp: DateTime<Utc>,
}

pub(crate) fn serial_key(serial: u64) -> [u8; 8] {
    serial.to_be_bytes()
}

fn key_serial(key: &[u8]) -> u64 {
    let mut bytes = [0u8; 8];
    let len = key.len().min(8);
    bytes[..len].copy_from_slice(&key[..len]);
    u64::from_be_bytes(bytes)
}

/// Oldest and newest serial present in a journal table
pub(crate) fn serial_bounds<T>(table: &T) -> StorageResult<Option<(u64, u64)>>
where
    T: ReadableTable<&'static [u8], &'static [u8]>,
{
    let first = table.first().map_err(db_err)?;
    let last = table.last().map_err(db_err)?;
    match (first, last) {
        (Some((first, _)), Some((last, _))) => {
            Ok(Some((key_serial(first.value()), key_serial(last.value()))))
        }
        _ => Ok(None),
    }
}

pub(crate) fn contains_serial<T>(table: &T, serial: u64) -> StorageResult<bool>
where
    T: ReadableTable<&'static [u8], &'static [u8]>,
{
    Ok(table
        .get(serial_key(serial).as_slice())
        .map_err(db_err)?
        .is_some())
}

pub(crate) fn append_entry(txn: &WriteTransaction, entry: &JournalEntry) -> StorageResult<()> {
    let bytes = encode(entry)?;
    let mut table = txn.open_table(JOURNAL).map_err(db_err)?;
    table
        .insert(serial_key(entry.serial).as_slice(), bytes.as_slice())
        .map_err(db_err)?;
    Ok(())
}

/// Entries with `start <= serial <= end`, ascending
pub(crate) fn read_range<T>(table: &T, start: u64, end: Option<u64>) -> StorageResult<Vec<JournalEntry>>
where
    T: ReadableTable<&'static [u8], &'static [u8]>,
{
    let start_key = serial_key(start);
    let mut entries = Vec::new();
    for item in table.range(start_key.as_slice()..).map_err(db_err)? {
        let (key, value) = item.map_err(db_err)?;
        if end.is_some_and(|end| key_serial(key.value()) > end) {
            break;
        }
        entries.push(decode(value.value())?);
    }
    Ok(entries)
}

/// Remove entries with `serial < before`, returning how many went
pub(crate) fn remove_before(txn: &WriteTransaction, before: u64) -> StorageResult<usize> {
    let mut table = txn.open_table(JOURNAL).map_err(db_err)?;
    let end_key = serial_key(before);
    let mut keys = Vec::new();
    for item in table.range(..end_key.as_slice()).map_err(db_err)? {
        let (key, _) = item.map_err(db_err)?;
        keys.push(key.value().to_vec());
    }
    for key in &keys {
        table.remove(key.as_slice()).map_err(db_err)?;
    }
    Ok(keys.len())
}
