//! Vehicle sync engine: orchestration, single-flight coordination, upserts and
//! the auto-sync scheduler.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};
use vehisync_adapters::{FixtureVehicleSource, HttpVehicleSource, VehicleSource};
use vehisync_storage::{ArtifactStore, HttpClientConfig, HttpFetcher, MemoryReferenceStore, PgStores};

pub mod config;
pub mod coordinator;
pub mod scheduler;
pub mod service;
pub mod settings;
pub mod upsert;

pub use config::{EngineConfig, SyncOptions};
pub use coordinator::SyncCoordinator;
pub use service::{
    PushReport, SyncBackends, SyncError, SyncService, SyncStatus, Trigger, STOPPED_MESSAGE,
};
pub use settings::{SettingsUpdate, SyncSettings};
pub use upsert::{UpsertOutcome, VehicleUpsertService};

pub const CRATE_NAME: &str = "vehisync-sync";

fn build_source(config: &EngineConfig) -> Result<Arc<dyn VehicleSource>> {
    match &config.source_url {
        Some(url) => {
            let http = HttpFetcher::new(HttpClientConfig {
                timeout: Duration::from_secs(config.http_timeout_secs),
                user_agent: Some(config.user_agent.clone()),
                bearer_token: config.source_token.clone(),
                ..Default::default()
            })?;
            let source = HttpVehicleSource::new(url, http)
                .with_context(|| format!("configuring source {url}"))?;
            info!(url = url.as_str(), "using HTTP vehicle source");
            Ok(Arc::new(source))
        }
        None => {
            info!(
                dir = %config.fixtures_dir.display(),
                "no source url configured; using fixture pages"
            );
            Ok(Arc::new(FixtureVehicleSource::new(config.fixtures_dir.clone())))
        }
    }
}

fn load_reference_file(config: &EngineConfig) -> Result<MemoryReferenceStore> {
    if config.reference_file.exists() {
        MemoryReferenceStore::load_yaml(&config.reference_file)
    } else {
        warn!(
            path = %config.reference_file.display(),
            "reference data file not found; labels will be slugified"
        );
        Ok(MemoryReferenceStore::new())
    }
}

/// Wire stores and source from configuration.
///
/// Postgres backs every store when `DATABASE_URL` is set; otherwise the
/// in-memory stores are used with reference data from the YAML file.
pub async fn build_service(config: &EngineConfig) -> Result<SyncService> {
    let source = build_source(config)?;
    let artifacts = config.artifacts_dir.clone().map(ArtifactStore::new);

    let backends = match &config.database_url {
        Some(url) => {
            let pg = PgStores::connect(url)
                .await
                .context("connecting to postgres")?;
            pg.migrate().await.context("running migrations")?;
            let pg = Arc::new(pg);
            SyncBackends {
                vehicles: pg.clone(),
                runs: pg.clone(),
                references: pg.clone(),
                settings: pg,
                source,
                artifacts,
            }
        }
        None => SyncBackends::in_memory(source, load_reference_file(config)?)
            .with_artifacts(artifacts),
    };

    Ok(SyncService::new(backends, SyncOptions::default()))
}

pub async fn build_service_from_env() -> Result<SyncService> {
    build_service(&EngineConfig::from_env()).await
}
