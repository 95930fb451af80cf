//! Mirror runs
//!
//! Every runner performs its network I/O first and only then opens a
//! [`DatabaseHandler`](irr_storage::DatabaseHandler), so no write
//! transaction is held while waiting on a remote server.

pub mod full_import;
pub mod nrtm_import;
pub mod preference;
pub mod roa_import;
pub mod update;

use std::sync::Arc;

use irr_core::{RecordParser, RpslParser};
use irr_storage::StorageContext;

use crate::retrieval::{FileRetriever, ReplicationClient};

pub use full_import::{FullImportData, FullImportRunner};
pub use nrtm_import::NrtmImportRunner;
pub use preference::RoutePreferenceUpdateRunner;
pub use roa_import::{RoaImportRunner, RoaImportSummary};
pub use update::{MirrorRunOutcome, MirrorUpdateRunner};

/// Collaborators shared by every runner
#[derive(Clone)]
pub struct MirrorServices {
    pub storage: Arc<StorageContext>,
    pub retriever: Arc<dyn FileRetriever>,
    pub replication: Arc<dyn ReplicationClient>,
    pub parser: Arc<dyn RecordParser>,
}

impl MirrorServices {
    pub fn new(
        storage: Arc<StorageContext>,
        retriever: Arc<dyn FileRetriever>,
        replication: Arc<dyn ReplicationClient>,
    ) -> Self {
        Self {
            storage,
            retriever,
            replication,
            parser: Arc::new(RpslParser::new()),
        }
    }

    pub fn with_parser(mut self, parser: Arc<dyn RecordParser>) -> Self {
        self.parser = parser;
        self
    }
}
