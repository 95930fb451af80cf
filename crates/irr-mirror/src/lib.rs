//! # IRR Mirror
//!
//! Keeps local copies of upstream registries in sync and serves the local
//! journal to downstream mirrors.
//!
//! ## Runs
//!
//! - [`MirrorUpdateRunner`]: per-source pass choosing between a full
//!   reload ([`FullImportRunner`]) and an NRTM pull ([`NrtmImportRunner`])
//! - [`RoaImportRunner`]: ROA set replacement and RPKI re-validation
//! - [`RoutePreferenceUpdateRunner`]: inter-registry route preference
//!
//! ## NRTM
//!
//! - [`NrtmStreamParser`]: validates a complete response before anything
//!   is applied
//! - [`NrtmOperation::apply`]: one `ADD`/`DEL` into a
//!   [`DatabaseHandler`](irr_storage::DatabaseHandler), journaled with the
//!   upstream serial
//! - [`NrtmGenerator`]: journal to NRTM response
//!
//! ## Example
//!
//! ```rust,ignore
//! let services = MirrorServices::new(storage, Arc::new(retriever), Arc::new(WhoisClient::default()));
//! let outcome = MirrorUpdateRunner::new("EXAMPLE", settings, services).run().await;
//! ```

pub mod error;
pub mod nrtm;
pub mod retrieval;
pub mod runner;
pub mod text;

pub use error::{MirrorError, MirrorResult};
pub use nrtm::{
    ApplyCounts, ApplyOutcome, NrtmGenerator, NrtmOperation, NrtmStreamParser, NrtmVersion,
    ParsedStream,
};
pub use retrieval::{DefaultRetriever, FileRetriever, ReplicationClient, RetrievedFile, WhoisClient};
pub use runner::{
    FullImportRunner, MirrorRunOutcome, MirrorServices, MirrorUpdateRunner, NrtmImportRunner,
    RoaImportRunner, RoaImportSummary, RoutePreferenceUpdateRunner,
};
