//! Sync orchestrator: pulls pages, maps and upserts records, reconciles
//! deletions and keeps the run log current.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use vehisync_adapters::mapper::raw_slug;
use vehisync_adapters::{
    map_vehicle, to_external_payload, RawVehicle, ReferenceSnapshot, SourceError, VehicleSource,
};
use vehisync_core::{ItemError, RunType, SyncRun};
use vehisync_storage::{
    ArtifactStore, MemoryReferenceStore, MemoryRunLog, MemorySettingsStore, MemoryVehicleStore,
    ReferenceStore, RunLogStore, SettingsStore, StoreError, VehicleStore,
};

use crate::config::SyncOptions;
use crate::coordinator::SyncCoordinator;
use crate::scheduler;
use crate::settings::{SettingsUpdate, SyncSettings};
use crate::upsert::{UpsertOutcome, VehicleUpsertService};

pub const STOPPED_MESSAGE: &str = "manually stopped";

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("a sync run is already in progress")]
    AlreadyRunning,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("upstream source failed: {0}")]
    Source(#[from] SourceError),
    #[error("vehicle not found upstream")]
    NotFoundUpstream,
    #[error("{0}")]
    Item(String),
    #[error("invalid settings: {0}")]
    InvalidSettings(String),
    #[error("scheduler error: {0}")]
    Scheduler(String),
}

/// Who asked for a run. Stored as the run's `triggered_by`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trigger {
    Manual,
    Webhook,
    Scheduler,
    Cli,
}

impl Trigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trigger::Manual => "manual",
            Trigger::Webhook => "webhook",
            Trigger::Scheduler => "scheduler",
            Trigger::Cli => "cli",
        }
    }

    fn single_run_type(&self) -> RunType {
        match self {
            Trigger::Webhook => RunType::Webhook,
            _ => RunType::Manual,
        }
    }
}

/// Everything the orchestrator reads from or writes to.
#[derive(Clone)]
pub struct SyncBackends {
    pub vehicles: Arc<dyn VehicleStore>,
    pub runs: Arc<dyn RunLogStore>,
    pub references: Arc<dyn ReferenceStore>,
    pub settings: Arc<dyn SettingsStore>,
    pub source: Arc<dyn VehicleSource>,
    pub artifacts: Option<ArtifactStore>,
}

impl SyncBackends {
    pub fn in_memory(source: Arc<dyn VehicleSource>, references: MemoryReferenceStore) -> Self {
        Self {
            vehicles: Arc::new(MemoryVehicleStore::new()),
            runs: Arc::new(MemoryRunLog::new()),
            references: Arc::new(references),
            settings: Arc::new(MemorySettingsStore::new()),
            source,
            artifacts: None,
        }
    }

    pub fn with_artifacts(mut self, artifacts: Option<ArtifactStore>) -> Self {
        self.artifacts = artifacts;
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncStatus {
    pub is_running: bool,
    pub current_run: Option<SyncRun>,
    pub last_completed_run: Option<SyncRun>,
    pub config: SyncSettings,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PushReport {
    pub attempted: usize,
    pub pushed: usize,
    pub failed: usize,
}

enum Plan {
    Full,
    Incremental(Option<DateTime<Utc>>),
    Single(String),
}

enum Flow {
    Finished,
    Stopped,
}

struct Snapshot {
    items: Vec<RawVehicle>,
    truncated: bool,
}

struct Inner {
    backends: SyncBackends,
    upsert: VehicleUpsertService,
    coordinator: SyncCoordinator,
    options: SyncOptions,
}

/// Cheap to clone; every clone drives the same coordinator and stores.
#[derive(Clone)]
pub struct SyncService {
    inner: Arc<Inner>,
}

impl SyncService {
    pub fn new(backends: SyncBackends, options: SyncOptions) -> Self {
        let upsert = VehicleUpsertService::new(Arc::clone(&backends.vehicles));
        Self {
            inner: Arc::new(Inner {
                backends,
                upsert,
                coordinator: SyncCoordinator::new(),
                options,
            }),
        }
    }

    pub fn backends(&self) -> &SyncBackends {
        &self.inner.backends
    }

    pub fn coordinator(&self) -> &SyncCoordinator {
        &self.inner.coordinator
    }

    pub fn options(&self) -> &SyncOptions {
        &self.inner.options
    }

    pub async fn settings(&self) -> Result<SyncSettings, SyncError> {
        let values = self.inner.backends.settings.all().await?;
        Ok(SyncSettings::from_map(&values))
    }

    /// Start a full sync in the background and return its run id.
    pub async fn start_full_sync(&self, trigger: Trigger) -> Result<Uuid, SyncError> {
        let run = self.begin_guarded(RunType::Full, trigger).await?;
        let run_id = run.id;
        self.spawn(run, Plan::Full);
        Ok(run_id)
    }

    /// Run a full sync to completion and return the final run record.
    pub async fn execute_full_sync(&self, trigger: Trigger) -> Result<SyncRun, SyncError> {
        let run = self.begin_guarded(RunType::Full, trigger).await?;
        Ok(self.drive(run, Plan::Full).await)
    }

    /// Start an incremental sync in the background.
    ///
    /// With a `slug` this syncs that one vehicle and bypasses the single-flight
    /// guard. Otherwise records modified after `since` (or after the last
    /// completed run) are pulled.
    pub async fn start_incremental_sync(
        &self,
        since: Option<DateTime<Utc>>,
        slug: Option<String>,
        trigger: Trigger,
    ) -> Result<Uuid, SyncError> {
        let (run, plan) = self.begin_incremental(since, slug, trigger).await?;
        let run_id = run.id;
        self.spawn(run, plan);
        Ok(run_id)
    }

    pub async fn execute_incremental_sync(
        &self,
        since: Option<DateTime<Utc>>,
        slug: Option<String>,
        trigger: Trigger,
    ) -> Result<SyncRun, SyncError> {
        let (run, plan) = self.begin_incremental(since, slug, trigger).await?;
        Ok(self.drive(run, plan).await)
    }

    pub async fn get_sync_status(&self) -> Result<SyncStatus, SyncError> {
        let runs = &self.inner.backends.runs;
        let current_run = match self.inner.coordinator.active_run() {
            Some(run_id) => runs.get_run(run_id).await?,
            None => None,
        };
        Ok(SyncStatus {
            is_running: self.inner.coordinator.is_running(),
            current_run,
            last_completed_run: runs.last_completed_run().await?,
            config: self.settings().await?,
        })
    }

    /// Mark the active guarded run failed and release the guard.
    ///
    /// In-flight requests finish; the orchestrator stops before its next batch.
    pub async fn stop_active_sync(&self) -> Result<Option<SyncRun>, SyncError> {
        let Some(run_id) = self.inner.coordinator.take_active() else {
            return Ok(None);
        };
        let runs = &self.inner.backends.runs;
        let Some(mut run) = runs.get_run(run_id).await? else {
            warn!(%run_id, "active run has no log entry");
            return Ok(None);
        };
        if run.is_running() {
            run.fail(STOPPED_MESSAGE);
            if runs.update_if_running(&run).await? {
                info!(%run_id, processed = run.processed_count, "sync run stopped");
                return Ok(Some(run));
            }
        }
        Ok(runs.get_run(run_id).await?)
    }

    pub async fn recent_runs(&self, limit: usize) -> Result<Vec<SyncRun>, SyncError> {
        Ok(self.inner.backends.runs.recent_runs(limit).await?)
    }

    pub async fn get_run(&self, run_id: Uuid) -> Result<Option<SyncRun>, SyncError> {
        Ok(self.inner.backends.runs.get_run(run_id).await?)
    }

    /// Send locally edited vehicles upstream.
    pub async fn push_pending_vehicles(&self, limit: usize) -> Result<PushReport, SyncError> {
        let backends = &self.inner.backends;
        let pending = backends.vehicles.pending_push(limit).await?;
        let mut report = PushReport::default();

        for mut record in pending {
            report.attempted += 1;
            let payload = to_external_payload(&record);
            match backends.source.push_vehicle(&payload).await {
                Ok(external_id) => {
                    debug!(slug = record.slug.as_str(), external_id = external_id.as_str(), "pushed vehicle");
                    record.external_sync_id = Some(external_id);
                    record.last_sync_at = Some(Utc::now());
                    record.needs_sync = false;
                    record.sync_error = None;
                    report.pushed += 1;
                }
                Err(err) => {
                    warn!(slug = record.slug.as_str(), error = %err, "vehicle push failed");
                    record.sync_error = Some(err.to_string());
                    report.failed += 1;
                }
            }
            backends.vehicles.save(&record).await?;
        }

        info!(
            attempted = report.attempted,
            pushed = report.pushed,
            failed = report.failed,
            "push of pending vehicles finished"
        );
        Ok(report)
    }

    /// Persist a settings change and apply it to the scheduler.
    pub async fn update_settings(&self, update: SettingsUpdate) -> Result<SyncSettings, SyncError> {
        update.validate().map_err(SyncError::InvalidSettings)?;
        for (key, value) in update.to_pairs() {
            self.inner.backends.settings.set(key, &value).await?;
        }
        let settings = self.settings().await?;
        self.configure_scheduler(&settings).await?;
        Ok(settings)
    }

    /// Replace the running scheduler (if any) with one matching `settings`.
    pub async fn configure_scheduler(&self, settings: &SyncSettings) -> Result<(), SyncError> {
        let mut slot = self.inner.coordinator.scheduler.lock().await;
        if let Some(mut existing) = slot.take() {
            existing
                .shutdown()
                .await
                .map_err(|e| SyncError::Scheduler(e.to_string()))?;
        }
        if settings.enable_auto_sync {
            let sched = scheduler::start_scheduler(self.clone(), settings.sync_interval_minutes)
                .await
                .map_err(|e| SyncError::Scheduler(format!("{e:#}")))?;
            *slot = Some(sched);
        } else {
            info!("auto sync disabled; scheduler not running");
        }
        Ok(())
    }

    pub async fn shutdown_scheduler(&self) -> Result<(), SyncError> {
        if let Some(mut sched) = self.inner.coordinator.scheduler.lock().await.take() {
            sched
                .shutdown()
                .await
                .map_err(|e| SyncError::Scheduler(e.to_string()))?;
        }
        Ok(())
    }

    /// One scheduler firing. Busy or disabled ticks are skipped, never queued.
    pub async fn run_scheduled_tick(&self) -> Option<Uuid> {
        let settings = match self.settings().await {
            Ok(settings) => settings,
            Err(err) => {
                warn!(error = %err, "scheduled tick could not read settings");
                return None;
            }
        };
        if !settings.enable_auto_sync {
            debug!("auto sync disabled; skipping tick");
            return None;
        }
        if self.inner.coordinator.is_running() {
            info!("sync already running; skipping scheduled tick");
            return None;
        }
        match self.start_incremental_sync(None, None, Trigger::Scheduler).await {
            Ok(run_id) => Some(run_id),
            Err(SyncError::AlreadyRunning) => {
                info!("sync already running; skipping scheduled tick");
                None
            }
            Err(err) => {
                error!(error = %err, "scheduled sync could not start");
                None
            }
        }
    }

    async fn begin_guarded(&self, run_type: RunType, trigger: Trigger) -> Result<SyncRun, SyncError> {
        let coordinator = &self.inner.coordinator;
        if !coordinator.try_begin() {
            return Err(SyncError::AlreadyRunning);
        }
        let run = SyncRun::start(run_type, trigger.as_str());
        if let Err(err) = self.inner.backends.runs.create_run(&run).await {
            coordinator.abort();
            return Err(err.into());
        }
        coordinator.set_active(run.id);
        info!(run_id = %run.id, run_type = run_type.as_str(), trigger = trigger.as_str(), "sync run started");
        Ok(run)
    }

    async fn begin_incremental(
        &self,
        since: Option<DateTime<Utc>>,
        slug: Option<String>,
        trigger: Trigger,
    ) -> Result<(SyncRun, Plan), SyncError> {
        match slug {
            Some(slug) => {
                let run = SyncRun::start(trigger.single_run_type(), trigger.as_str());
                self.inner.backends.runs.create_run(&run).await?;
                info!(run_id = %run.id, slug = slug.as_str(), trigger = trigger.as_str(), "single vehicle sync started");
                Ok((run, Plan::Single(slug)))
            }
            None => {
                let run = self.begin_guarded(RunType::Incremental, trigger).await?;
                Ok((run, Plan::Incremental(since)))
            }
        }
    }

    fn spawn(&self, run: SyncRun, plan: Plan) {
        let this = self.clone();
        tokio::spawn(async move {
            this.drive(run, plan).await;
        });
    }

    async fn drive(&self, mut run: SyncRun, plan: Plan) -> SyncRun {
        let result = match &plan {
            Plan::Full => self.run_full(&mut run).await,
            Plan::Incremental(since) => self.run_incremental(&mut run, *since).await,
            Plan::Single(slug) => self.run_single(&mut run, slug).await,
        };

        let runs = &self.inner.backends.runs;
        let stopped = matches!(result, Ok(Flow::Stopped));
        match result {
            Ok(Flow::Finished) => run.complete(),
            Ok(Flow::Stopped) => info!(run_id = %run.id, "sync run halted after stop request"),
            Err(err) => {
                error!(run_id = %run.id, error = %err, "sync run failed");
                run.fail(err.to_string());
            }
        }

        if !stopped {
            match runs.update_if_running(&run).await {
                Ok(true) => info!(
                    run_id = %run.id,
                    status = run.status.as_str(),
                    processed = run.processed_count,
                    created = run.created_count,
                    updated = run.updated_count,
                    deleted = run.deleted_count,
                    errors = run.error_count,
                    "sync run finished"
                ),
                Ok(false) => info!(run_id = %run.id, "run already finalized; keeping stored state"),
                Err(err) => error!(run_id = %run.id, error = %err, "could not persist final run state"),
            }
        }
        if run.run_type.is_guarded() {
            self.inner.coordinator.finish(run.id);
        }

        match runs.get_run(run.id).await {
            Ok(Some(stored)) => stored,
            _ => run,
        }
    }

    async fn run_full(&self, run: &mut SyncRun) -> Result<Flow, SyncError> {
        let settings = self.settings().await?;
        let refs = ReferenceSnapshot::load(self.inner.backends.references.as_ref()).await?;
        let snapshot = self.collect(run, None, settings.max_vehicles_per_sync).await?;
        let seen: HashSet<String> = snapshot.items.iter().filter_map(raw_slug).collect();

        if let Flow::Stopped = self.process(run, snapshot.items, &refs).await? {
            return Ok(Flow::Stopped);
        }

        // a stop can land after the last batch was persisted
        if !self.owns(run) {
            return Ok(Flow::Stopped);
        }
        if snapshot.truncated {
            warn!(run_id = %run.id, "listing snapshot was truncated; skipping deletion of unseen vehicles");
        } else {
            let vehicles = &self.inner.backends.vehicles;
            let stale = vehicles.slugs_not_in(&seen).await?;
            if !self.owns(run) {
                return Ok(Flow::Stopped);
            }
            if !stale.is_empty() {
                run.deleted_count = vehicles.delete_by_slugs(&stale).await?;
                info!(run_id = %run.id, deleted = run.deleted_count, "removed vehicles no longer listed upstream");
            }
        }
        Ok(Flow::Finished)
    }

    async fn run_incremental(
        &self,
        run: &mut SyncRun,
        since: Option<DateTime<Utc>>,
    ) -> Result<Flow, SyncError> {
        let since = match since {
            Some(since) => Some(since),
            None => self
                .inner
                .backends
                .runs
                .last_completed_batch_run()
                .await?
                .and_then(|last| last.completed_at),
        };
        info!(run_id = %run.id, since = ?since, "incremental window");

        let settings = self.settings().await?;
        let refs = ReferenceSnapshot::load(self.inner.backends.references.as_ref()).await?;
        let snapshot = self.collect(run, since, settings.max_vehicles_per_sync).await?;
        self.process(run, snapshot.items, &refs).await
    }

    async fn run_single(&self, run: &mut SyncRun, slug: &str) -> Result<Flow, SyncError> {
        let refs = ReferenceSnapshot::load(self.inner.backends.references.as_ref()).await?;
        let raw = self
            .inner
            .backends
            .source
            .fetch_one(slug)
            .await?
            .ok_or(SyncError::NotFoundUpstream)?;

        run.processed_count = 1;
        match self.process_item(&raw, &refs, Utc::now()).await {
            Ok(outcome) => {
                count_outcome(run, outcome);
                Ok(Flow::Finished)
            }
            Err(item) => {
                let message = item.message.clone();
                run.record_item_error(item, self.inner.options.max_item_errors);
                Err(SyncError::Item(message))
            }
        }
    }

    /// Page through the listing, honoring the page cap and the vehicle cap.
    async fn collect(
        &self,
        run: &SyncRun,
        since: Option<DateTime<Utc>>,
        max_vehicles: usize,
    ) -> Result<Snapshot, SyncError> {
        let options = &self.inner.options;
        let mut items = Vec::new();
        let mut truncated = false;
        let mut page = 1u32;

        loop {
            let fetched = self
                .inner
                .backends
                .source
                .fetch_page(page, options.page_size, since)
                .await?;
            self.archive_page(run, page, fetched.raw_body.as_deref()).await;

            let count = fetched.items.len();
            let last_page =
                count < options.page_size as usize || (fetched.pages > 0 && page >= fetched.pages);
            debug!(run_id = %run.id, page, count, total = fetched.total, "collected listing page");
            items.extend(fetched.items);

            if items.len() >= max_vehicles {
                truncated = items.len() > max_vehicles || !last_page;
                items.truncate(max_vehicles);
                if truncated {
                    warn!(run_id = %run.id, max_vehicles, "vehicle cap reached; listing truncated");
                }
                break;
            }
            if last_page {
                break;
            }
            if page >= options.max_pages {
                warn!(run_id = %run.id, max_pages = options.max_pages, "page cap reached; listing truncated");
                truncated = true;
                break;
            }
            page += 1;
        }

        Ok(Snapshot { items, truncated })
    }

    async fn archive_page(&self, run: &SyncRun, page: u32, body: Option<&[u8]>) {
        let (Some(store), Some(body)) = (&self.inner.backends.artifacts, body) else {
            return;
        };
        match store.store_page(Utc::now(), run.id, body).await {
            Ok(stored) => debug!(
                page,
                path = %stored.relative_path.display(),
                deduplicated = stored.deduplicated,
                "archived listing page"
            ),
            Err(err) => warn!(page, error = %err, "could not archive listing page"),
        }
    }

    /// Batches run sequentially, items inside a batch concurrently. Counters
    /// are persisted after every batch.
    async fn process(
        &self,
        run: &mut SyncRun,
        items: Vec<RawVehicle>,
        refs: &ReferenceSnapshot,
    ) -> Result<Flow, SyncError> {
        let options = &self.inner.options;
        let synced_at = Utc::now();
        let batches: Vec<&[RawVehicle]> = items.chunks(options.batch_size.max(1)).collect();
        let batch_count = batches.len();

        for (index, batch) in batches.into_iter().enumerate() {
            if !self.owns(run) {
                return Ok(Flow::Stopped);
            }

            let results =
                join_all(batch.iter().map(|raw| self.process_item(raw, refs, synced_at))).await;
            for result in results {
                run.processed_count += 1;
                match result {
                    Ok(outcome) => count_outcome(run, outcome),
                    Err(item) => {
                        warn!(
                            run_id = %run.id,
                            slug = item.slug.as_deref().unwrap_or("<missing>"),
                            error = item.message.as_str(),
                            "vehicle failed to sync"
                        );
                        run.record_item_error(item, options.max_item_errors);
                    }
                }
            }

            if !self.inner.backends.runs.update_if_running(&*run).await? {
                return Ok(Flow::Stopped);
            }
            if index + 1 < batch_count && !options.batch_pause.is_zero() {
                tokio::time::sleep(options.batch_pause).await;
            }
        }
        Ok(Flow::Finished)
    }

    async fn process_item(
        &self,
        raw: &RawVehicle,
        refs: &ReferenceSnapshot,
        synced_at: DateTime<Utc>,
    ) -> Result<UpsertOutcome, ItemError> {
        let record = map_vehicle(raw, refs, synced_at).map_err(|err| ItemError {
            slug: raw_slug(raw),
            message: err.to_string(),
        })?;
        let slug = record.slug.clone();
        self.inner.upsert.upsert(record).await.map_err(|err| ItemError {
            slug: Some(slug),
            message: err.to_string(),
        })
    }

    fn owns(&self, run: &SyncRun) -> bool {
        !run.run_type.is_guarded() || self.inner.coordinator.is_active(run.id)
    }
}

fn count_outcome(run: &mut SyncRun, outcome: UpsertOutcome) {
    match outcome {
        UpsertOutcome::Created => run.created_count += 1,
        UpsertOutcome::Updated => run.updated_count += 1,
    }
}
