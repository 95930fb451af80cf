//! # IRR Storage
//!
//! Record store, change journal and per-source status for the routing
//! registry mirror, built on redb.
//!
//! ## Layout
//!
//! - One database file per source: records, journal and status row
//! - One ROA database shared by the process
//!
//! ## Key Types
//!
//! - [`StorageContext`]: opened once per process, shared by `Arc`
//! - [`DatabaseHandler`]: unit of work with a write-behind cache
//! - [`StatusTracker`]: serial allocation and status bookkeeping
//! - [`RoaStore`]: atomic ROA set replacement and covering lookups
//!
//! ## Example
//!
//! ```rust,ignore
//! use irr_storage::{DatabaseHandler, JournalOrigin, StorageConfig, StorageContext};
//!
//! let ctx = Arc::new(StorageContext::open(StorageConfig::with_base_dir("/var/lib/irr"))?);
//! let mut handler = DatabaseHandler::new(ctx);
//! handler.upsert_record(record, JournalOrigin::AuthChange, None)?;
//! handler.commit()?;
//! ```

pub mod batch;
pub mod context;
pub mod error;
pub mod handler;
pub mod journal;
pub mod query;
pub mod roa_store;
pub mod status;
pub mod tables;

pub use batch::{BatchedWriter, FlushReason, PendingUpsert};
pub use context::{ChangeEvent, StorageConfig, StorageContext};
pub use error::{StorageError, StorageResult};
pub use handler::DatabaseHandler;
pub use journal::{JournalEntry, JournalOrigin};
pub use query::{RecordQuery, RouteSummary};
pub use roa_store::RoaStore;
pub use status::{SourceStatus, StatusTracker};
pub use tables::{RedbStorage, RedbStorageConfig};
