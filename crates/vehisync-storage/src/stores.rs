use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;
use vehisync_core::{ReferenceDomain, ReferenceEntry, SyncRun, VehicleRecord};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("corrupt row: {0}")]
    Corrupt(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Local vehicle store keyed by slug.
#[async_trait]
pub trait VehicleStore: Send + Sync {
    async fn find_by_slug(&self, slug: &str) -> Result<Option<VehicleRecord>, StoreError>;

    /// Insert or replace the record stored under `record.slug`.
    async fn save(&self, record: &VehicleRecord) -> Result<(), StoreError>;

    async fn delete_by_slugs(&self, slugs: &[String]) -> Result<u64, StoreError>;

    /// Slugs of every stored vehicle absent from `keep`.
    async fn slugs_not_in(&self, keep: &HashSet<String>) -> Result<Vec<String>, StoreError>;

    async fn count(&self) -> Result<u64, StoreError>;

    /// Locally edited vehicles waiting to be pushed upstream.
    async fn pending_push(&self, limit: usize) -> Result<Vec<VehicleRecord>, StoreError>;
}

#[async_trait]
pub trait RunLogStore: Send + Sync {
    async fn create_run(&self, run: &SyncRun) -> Result<(), StoreError>;

    /// Overwrite a run only while it is still `running`. Returns whether it was written.
    async fn update_if_running(&self, run: &SyncRun) -> Result<bool, StoreError>;

    async fn get_run(&self, id: Uuid) -> Result<Option<SyncRun>, StoreError>;

    async fn last_completed_run(&self) -> Result<Option<SyncRun>, StoreError>;

    /// Latest completed full or incremental run. Single-vehicle runs never
    /// move the incremental watermark.
    async fn last_completed_batch_run(&self) -> Result<Option<SyncRun>, StoreError>;

    async fn recent_runs(&self, limit: usize) -> Result<Vec<SyncRun>, StoreError>;
}

#[async_trait]
pub trait ReferenceStore: Send + Sync {
    async fn entries(&self, domain: ReferenceDomain) -> Result<Vec<ReferenceEntry>, StoreError>;
}

#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn all(&self) -> Result<BTreeMap<String, String>, StoreError>;

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
}
