//! ROA storage
//!
//! ROAs are keyed by their prefix bits followed by asn, max length and trust
//! anchor, so every ROA for one exact prefix sits under a common key prefix.
//! A covering query probes each shorter truncation of the route prefix.

use std::sync::Arc;

use ipnetwork::IpNetwork;
use tracing::{info, instrument};

use irr_core::{PrefixBits, Roa};

use crate::error::{StorageResult, db_err};
use crate::tables::{ROAS, RedbStorage, clear_table, decode, encode, scan_table_prefix};

fn roa_key(roa: &Roa) -> Vec<u8> {
    let mut key = roa.bits().to_key_bytes();
    key.extend_from_slice(&roa.asn.to_be_bytes());
    key.push(roa.max_length);
    key.extend_from_slice(roa.trust_anchor.as_bytes());
    key
}

/// ROA storage manager
#[derive(Clone)]
pub struct RoaStore {
    storage: Arc<RedbStorage>,
}

impl RoaStore {
    pub fn new(storage: Arc<RedbStorage>) -> Self {
        Self { storage }
    }

    /// Replace the whole ROA set in one write transaction
    ///
    /// Readers see either the old set or the new one, never an empty gap.
    #[instrument(skip(self, roas), fields(count = roas.len()))]
    pub fn replace_all(&self, roas: &[Roa]) -> StorageResult<usize> {
        let write_txn = self.storage.db().begin_write().map_err(db_err)?;
        let removed = clear_table(&write_txn, ROAS)?;
        {
            let mut table = write_txn.open_table(ROAS).map_err(db_err)?;
            for roa in roas {
                let value = encode(roa)?;
                table
                    .insert(roa_key(roa).as_slice(), value.as_slice())
                    .map_err(db_err)?;
            }
        }
        write_txn.commit().map_err(db_err)?;

        info!(removed, inserted = roas.len(), "Replaced ROA set");
        Ok(roas.len())
    }

    pub fn all(&self) -> StorageResult<Vec<Roa>> {
        self.storage
            .scan_prefix(ROAS, &[])?
            .into_iter()
            .map(|(_, value)| decode(&value))
            .collect()
    }

    pub fn count(&self) -> StorageResult<usize> {
        self.storage.count(ROAS)
    }

    /// ROAs whose prefix covers or equals `prefix`
    pub fn covering(&self, prefix: &IpNetwork) -> StorageResult<Vec<Roa>> {
        let bits = PrefixBits::from_network(prefix);
        let read_txn = self.storage.db().begin_read().map_err(db_err)?;
        let table = read_txn.open_table(ROAS).map_err(db_err)?;

        let mut roas = Vec::new();
        for len in 0..=bits.len() {
            for (_, value) in scan_table_prefix(&table, &bits.truncate(len).to_key_bytes())? {
                roas.push(decode(&value)?);
            }
        }
        Ok(roas)
    }
}
