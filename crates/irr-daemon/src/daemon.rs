//! Wiring of settings, storage and runners, and the periodic loop

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use irr_core::Settings;
use irr_mirror::{
    DefaultRetriever, MirrorRunOutcome, MirrorServices, MirrorUpdateRunner, NrtmGenerator,
    NrtmVersion, RoaImportRunner, RoaImportSummary, RoutePreferenceUpdateRunner, WhoisClient,
};
use irr_storage::{DatabaseHandler, SourceStatus, StorageConfig, StorageContext};

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(600);
const NRTM_TIMEOUT: Duration = Duration::from_secs(300);

/// One process worth of mirror state
#[derive(Clone)]
pub struct Daemon {
    settings: Arc<Settings>,
    storage: Arc<StorageContext>,
    services: MirrorServices,
    // Serializes preference passes started by different source loops
    preference_lock: Arc<Mutex<()>>,
}

impl Daemon {
    pub fn open(settings: Settings) -> anyhow::Result<Self> {
        let storage = StorageContext::open(StorageConfig::from_settings(&settings))
            .with_context(|| format!("opening storage in {}", settings.data_dir.display()))?;
        let storage = Arc::new(storage);
        let services = MirrorServices::new(
            storage.clone(),
            Arc::new(DefaultRetriever::new(DOWNLOAD_TIMEOUT)?),
            Arc::new(WhoisClient::new(NRTM_TIMEOUT)),
        );
        Ok(Self::with_services(settings, services))
    }

    pub fn with_services(settings: Settings, services: MirrorServices) -> Self {
        Self {
            settings: Arc::new(settings),
            storage: services.storage.clone(),
            services,
            preference_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    fn configured_source(&self, source: &str) -> anyhow::Result<String> {
        let source = source.to_ascii_uppercase();
        if self.settings.source(&source).is_none() {
            bail!("source {source} is not configured");
        }
        Ok(source)
    }

    /// One mirror pass per source, sources in parallel
    pub async fn mirror_once(&self, source: Option<&str>) -> anyhow::Result<Vec<(String, MirrorRunOutcome)>> {
        let sources = match source {
            Some(source) => vec![self.configured_source(source)?],
            None => self.settings.source_names(),
        };

        let mut tasks = JoinSet::new();
        for source in sources {
            let runner = MirrorUpdateRunner::new(&source, self.settings.clone(), self.services.clone());
            tasks.spawn(async move { (source, runner.run().await) });
        }
        let mut outcomes = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            outcomes.push(joined?);
        }
        outcomes.sort_by(|a, b| a.0.cmp(&b.0));

        if !self.settings.route_preferences().is_empty() {
            self.update_preference().await?;
        }
        Ok(outcomes)
    }

    pub async fn import_roas(&self) -> anyhow::Result<RoaImportSummary> {
        let runner = RoaImportRunner::new(self.settings.clone(), self.services.clone());
        let roas = runner.fetch().await?;
        let summary = tokio::task::spawn_blocking(move || runner.apply(roas)).await??;
        Ok(summary)
    }

    /// Returns the number of records whose preference status flipped
    pub async fn update_preference(&self) -> anyhow::Result<usize> {
        let _guard = self.preference_lock.lock().await;
        let runner = RoutePreferenceUpdateRunner::new(self.settings.clone(), self.storage.clone());
        let changed = tokio::task::spawn_blocking(move || runner.run()).await??;
        Ok(changed)
    }

    pub fn status(&self) -> anyhow::Result<Vec<SourceStatus>> {
        Ok(self.storage.all_statuses()?)
    }

    pub fn nrtm(&self, source: &str, start: u64, end: Option<u64>, version: &str) -> anyhow::Result<String> {
        let version = NrtmVersion::parse(version)
            .with_context(|| format!("unsupported NRTM version {version}"))?;
        let mut handler = DatabaseHandler::new(self.storage.clone());
        Ok(NrtmGenerator::new().generate(&mut handler, source, version, start, end)?)
    }

    pub fn force_reload(&self, source: &str) -> anyhow::Result<()> {
        let source = self.configured_source(source)?;
        let mut handler = DatabaseHandler::new(self.storage.clone());
        handler.set_force_reload(&source);
        handler.commit()?;
        info!(%source, "Full reload scheduled");
        Ok(())
    }

    pub fn expire_journal(&self, source: &str, before_serial: u64) -> anyhow::Result<usize> {
        let source = self.configured_source(source)?;
        let mut handler = DatabaseHandler::new(self.storage.clone());
        let removed = handler.expire_journal(&source, before_serial)?;
        handler.commit()?;
        Ok(removed)
    }

    async fn source_loop(self, source: String) -> anyhow::Result<()> {
        let timer = self
            .settings
            .source(&source)
            .map_or(300, |s| s.import_timer)
            .max(1);
        let mut interval = tokio::time::interval(Duration::from_secs(timer));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let runner = MirrorUpdateRunner::new(&source, self.settings.clone(), self.services.clone());
        loop {
            interval.tick().await;
            match runner.run().await {
                MirrorRunOutcome::Failed { message, integrity: true } => {
                    bail!("integrity violation while mirroring {source}: {message}");
                }
                MirrorRunOutcome::Failed { .. } => {}
                _ => {
                    if let Some(settings) = self.settings.source(&source)
                        && settings.route_object_preference.is_some()
                        && let Err(err) = self.update_preference().await
                    {
                        error!(%source, error = ?err, "Route preference update failed");
                    }
                }
            }
        }
    }

    async fn roa_loop(self) -> anyhow::Result<()> {
        let mut interval = tokio::time::interval(Duration::from_secs(self.settings.rpki.roa_import_timer.max(1)));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            match self.import_roas().await {
                Ok(summary) => info!(roas = summary.roas, status_changes = summary.status_changes, "ROA import finished"),
                Err(err) => error!(error = ?err, "ROA import failed"),
            }
        }
    }

    /// Run every periodic task until interrupted or a task fails fatally
    pub async fn run(&self) -> anyhow::Result<()> {
        let mut tasks = JoinSet::new();
        for source in self.settings.source_names() {
            tasks.spawn(self.clone().source_loop(source));
        }
        if self.settings.rpki_enabled() {
            tasks.spawn(self.clone().roa_loop());
        }
        if tasks.is_empty() {
            warn!("No sources configured and RPKI disabled, nothing to do");
            return Ok(());
        }
        info!(tasks = tasks.len(), "Daemon started");

        let result = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                Ok(())
            }
            Some(joined) = tasks.join_next() => match joined {
                Ok(result) => result,
                Err(err) => Err(err.into()),
            },
        };
        tasks.shutdown().await;
        result
    }
}
