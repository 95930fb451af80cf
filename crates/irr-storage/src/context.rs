//! Process-wide storage context
//!
//! Owns one redb database per source under `<base_dir>/sources/` plus the
//! ROA database, and the change notification channel. Constructed once and
//! shared by `Arc` with every handler and runner.

use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::{debug, info, instrument};

use irr_core::Settings;

use crate::error::{StorageError, StorageResult, db_err};
use crate::roa_store::RoaStore;
use crate::status::{SourceStatus, read_status};
use crate::tables::{RedbStorage, RedbStorageConfig, SOURCE_STATUS};

const SOURCE_DIR: &str = "sources";
const DB_EXTENSION: &str = "redb";

/// Something committed that live subscribers may care about
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    /// Records and journal of a source were replaced wholesale
    FullReload { source: String },
    /// A unit of work touching `source` committed
    Committed {
        source: String,
        serial_newest: Option<u64>,
    },
}

/// Storage configuration
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub base_dir: PathBuf,
    /// Global journaling switch
    pub journaling_enabled: bool,
    /// Sources that keep a journal
    pub journaled_sources: HashSet<String>,
    /// Sources whose journal serials come from an upstream server
    pub mirrored_sources: HashSet<String>,
    /// Write-behind cache capacity
    pub batch_size: usize,
    /// Buffered change events per subscriber
    pub notify_capacity: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("./irr-data"),
            journaling_enabled: true,
            journaled_sources: HashSet::new(),
            mirrored_sources: HashSet::new(),
            batch_size: 5000,
            notify_capacity: 256,
        }
    }
}

impl StorageConfig {
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            ..Default::default()
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            base_dir: settings.data_dir.clone(),
            journaling_enabled: settings.journaling_enabled,
            journaled_sources: settings
                .sources
                .iter()
                .filter(|(_, source)| source.keep_journal)
                .map(|(name, _)| name.clone())
                .collect(),
            mirrored_sources: settings
                .sources
                .iter()
                .filter(|(_, source)| source.nrtm_enabled())
                .map(|(name, _)| name.clone())
                .collect(),
            batch_size: settings.batch_size,
            ..Default::default()
        }
    }

    pub fn with_journaled_source(mut self, source: impl AsRef<str>) -> Self {
        self.journaled_sources
            .insert(source.as_ref().to_ascii_uppercase());
        self
    }

    pub fn with_mirrored_source(mut self, source: impl AsRef<str>) -> Self {
        self.mirrored_sources
            .insert(source.as_ref().to_ascii_uppercase());
        self
    }

    pub fn with_journaling(mut self, enabled: bool) -> Self {
        self.journaling_enabled = enabled;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    fn source_dir(&self) -> PathBuf {
        self.base_dir.join(SOURCE_DIR)
    }

    fn source_path(&self, source: &str) -> PathBuf {
        self.source_dir().join(format!("{source}.{DB_EXTENSION}"))
    }
}

fn check_source_name(source: &str) -> StorageResult<()> {
    let valid = !source.is_empty()
        && source
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '-');
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidSource(source.to_string()))
    }
}

/// Shared storage state
pub struct StorageContext {
    config: StorageConfig,
    sources: DashMap<String, Arc<RedbStorage>>,
    roas: Arc<RedbStorage>,
    notifier: broadcast::Sender<ChangeEvent>,
}

impl StorageContext {
    #[instrument(skip(config), fields(base_dir = %config.base_dir.display()))]
    pub fn open(config: StorageConfig) -> StorageResult<Self> {
        std::fs::create_dir_all(config.source_dir())?;
        let roas = RedbStorage::open(RedbStorageConfig::roas(config.base_dir.join("roas.redb")))?;
        let (notifier, _) = broadcast::channel(config.notify_capacity.max(1));

        info!("Opened storage context");
        Ok(Self {
            config,
            sources: DashMap::new(),
            roas: Arc::new(roas),
            notifier,
        })
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub fn base_dir(&self) -> &Path {
        &self.config.base_dir
    }

    /// Database of one source, created on first use
    pub fn source_storage(&self, source: &str) -> StorageResult<Arc<RedbStorage>> {
        check_source_name(source)?;
        if let Some(storage) = self.sources.get(source) {
            return Ok(storage.value().clone());
        }
        let entry = self.sources.entry(source.to_string()).or_try_insert_with(|| {
            debug!(%source, "Opening source database");
            RedbStorage::open(RedbStorageConfig::source(self.config.source_path(source)))
                .map(Arc::new)
        })?;
        Ok(entry.value().clone())
    }

    /// Database of a source only if it already exists on disk
    pub(crate) fn existing_source_storage(&self, source: &str) -> StorageResult<Option<Arc<RedbStorage>>> {
        check_source_name(source)?;
        if self.sources.contains_key(source) || self.config.source_path(source).exists() {
            self.source_storage(source).map(Some)
        } else {
            Ok(None)
        }
    }

    /// Every source with a database, on disk or open
    pub fn known_sources(&self) -> StorageResult<Vec<String>> {
        let mut names: BTreeSet<String> = self.sources.iter().map(|e| e.key().clone()).collect();
        for entry in std::fs::read_dir(self.config.source_dir())? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(DB_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str())
                && check_source_name(stem).is_ok()
            {
                names.insert(stem.to_string());
            }
        }
        Ok(names.into_iter().collect())
    }

    pub fn roa_store(&self) -> RoaStore {
        RoaStore::new(self.roas.clone())
    }

    pub fn journaling_enabled_for(&self, source: &str) -> bool {
        self.config.journaling_enabled && self.config.journaled_sources.contains(source)
    }

    /// Committed status of one source
    pub fn source_status(&self, source: &str) -> StorageResult<Option<SourceStatus>> {
        let Some(storage) = self.existing_source_storage(source)? else {
            return Ok(None);
        };
        let read_txn = storage.db().begin_read().map_err(db_err)?;
        let table = read_txn.open_table(SOURCE_STATUS).map_err(db_err)?;
        read_status(&table, source)
    }

    /// Committed status of every known source, by name
    pub fn all_statuses(&self) -> StorageResult<Vec<SourceStatus>> {
        let mut statuses = Vec::new();
        for source in self.known_sources()? {
            if let Some(status) = self.source_status(&source)? {
                statuses.push(status);
            }
        }
        Ok(statuses)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.notifier.subscribe()
    }

    pub(crate) fn notify(&self, event: ChangeEvent) {
        // No subscribers is not an error
        let _ = self.notifier.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_source_databases_are_separate_files() {
        let temp = TempDir::new().unwrap();
        let ctx = StorageContext::open(StorageConfig::with_base_dir(temp.path())).unwrap();

        ctx.source_storage("ALPHA").unwrap();
        ctx.source_storage("BETA").unwrap();

        assert!(temp.path().join("sources/ALPHA.redb").exists());
        assert!(temp.path().join("sources/BETA.redb").exists());
        assert_eq!(ctx.known_sources().unwrap(), vec!["ALPHA", "BETA"]);
    }

    #[test]
    fn test_invalid_source_name() {
        let temp = TempDir::new().unwrap();
        let ctx = StorageContext::open(StorageConfig::with_base_dir(temp.path())).unwrap();
        assert!(matches!(
            ctx.source_storage("../escape"),
            Err(StorageError::InvalidSource(_))
        ));
    }

    #[test]
    fn test_status_of_unknown_source() {
        let temp = TempDir::new().unwrap();
        let ctx = StorageContext::open(StorageConfig::with_base_dir(temp.path())).unwrap();
        assert!(ctx.source_status("NOPE").unwrap().is_none());
        assert!(!temp.path().join("sources/NOPE.redb").exists());
    }

    #[test]
    fn test_journaling_switches() {
        let temp = TempDir::new().unwrap();
        let config = StorageConfig::with_base_dir(temp.path()).with_journaled_source("test");
        let ctx = StorageContext::open(config.clone()).unwrap();
        assert!(ctx.journaling_enabled_for("TEST"));
        assert!(!ctx.journaling_enabled_for("OTHER"));
        drop(ctx);

        let ctx = StorageContext::open(config.with_journaling(false)).unwrap();
        assert!(!ctx.journaling_enabled_for("TEST"));
    }
}
