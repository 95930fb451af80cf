//! Write-behind cache for record upserts
//!
//! Upserts are held in memory and written out in arrival order at one of the
//! named [`FlushReason`] points. A read never sees storage older than the
//! writes its own unit of work already issued.

use std::collections::HashSet;
use std::fmt;

use irr_core::{Record, RecordKey};

use crate::journal::JournalOrigin;

/// Why a batch is being written out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    /// A read is about to run in the same unit of work
    PreQuery,
    /// The unit of work is committing
    PreCommit,
    /// An upsert for a key that is already pending arrived
    KeyCollision,
    /// The batch reached its capacity
    Capacity,
    /// A delete or wipe is about to run
    PreDelete,
}

impl fmt::Display for FlushReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FlushReason::PreQuery => "pre_query",
            FlushReason::PreCommit => "pre_commit",
            FlushReason::KeyCollision => "key_collision",
            FlushReason::Capacity => "capacity",
            FlushReason::PreDelete => "pre_delete",
        };
        f.write_str(name)
    }
}

/// One upsert waiting to be written
#[derive(Debug, Clone)]
pub struct PendingUpsert {
    pub record: Record,
    pub origin: JournalOrigin,
    pub forced_serial: Option<u64>,
}

/// Bounded in-memory upsert queue
#[derive(Debug)]
pub struct BatchedWriter {
    capacity: usize,
    pending: Vec<PendingUpsert>,
    keys: HashSet<RecordKey>,
}

impl BatchedWriter {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            pending: Vec::new(),
            keys: HashSet::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn contains(&self, key: &RecordKey) -> bool {
        self.keys.contains(key)
    }

    /// Queue an upsert. Returns true when the batch is now full.
    ///
    /// Callers flush on [`FlushReason::KeyCollision`] before pushing a key
    /// that [`Self::contains`].
    pub fn push(&mut self, upsert: PendingUpsert) -> bool {
        self.keys.insert(upsert.record.key());
        self.pending.push(upsert);
        self.pending.len() >= self.capacity
    }

    /// Take every pending upsert in arrival order
    pub fn drain(&mut self) -> Vec<PendingUpsert> {
        self.keys.clear();
        std::mem::take(&mut self.pending)
    }
}
