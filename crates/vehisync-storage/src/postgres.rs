//! Postgres-backed stores.

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::Row;
use tracing::info;
use uuid::Uuid;
use vehisync_core::{
    ItemError, ReferenceDomain, ReferenceEntry, RunStatus, RunType, SyncRun, VehicleRecord,
};

use crate::stores::{ReferenceStore, RunLogStore, SettingsStore, StoreError, VehicleStore};

/// One pool implementing every store contract.
#[derive(Debug, Clone)]
pub struct PgStores {
    pool: PgPool,
}

impl PgStores {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(8)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        info!("database migrations applied");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn count_to_db(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn count_from_db(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

fn run_from_row(row: &PgRow) -> Result<SyncRun, StoreError> {
    let run_type: String = row.try_get("run_type")?;
    let status: String = row.try_get("status")?;
    let item_errors: Json<Vec<ItemError>> = row.try_get("item_errors")?;
    Ok(SyncRun {
        id: row.try_get("id")?,
        run_type: RunType::parse(&run_type)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown run_type {run_type}")))?,
        status: RunStatus::parse(&status)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown run status {status}")))?,
        triggered_by: row.try_get("triggered_by")?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
        processed_count: count_from_db(row.try_get("processed_count")?),
        created_count: count_from_db(row.try_get("created_count")?),
        updated_count: count_from_db(row.try_get("updated_count")?),
        deleted_count: count_from_db(row.try_get("deleted_count")?),
        error_count: count_from_db(row.try_get("error_count")?),
        error_message: row.try_get("error_message")?,
        item_errors: item_errors.0,
    })
}

const RUN_COLUMNS: &str = "id, run_type, status, triggered_by, started_at, completed_at, \
     processed_count, created_count, updated_count, deleted_count, error_count, \
     error_message, item_errors";

#[async_trait]
impl VehicleStore for PgStores {
    async fn find_by_slug(&self, slug: &str) -> Result<Option<VehicleRecord>, StoreError> {
        let row = sqlx::query("SELECT data FROM vehicles WHERE slug = $1")
            .bind(slug)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| {
            let data: Json<VehicleRecord> = row.try_get("data")?;
            Ok::<_, StoreError>(data.0)
        })
        .transpose()
    }

    async fn save(&self, record: &VehicleRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO vehicles (slug, data, needs_sync, updated_at)
            VALUES ($1, $2, $3, now())
            ON CONFLICT (slug) DO UPDATE
               SET data = EXCLUDED.data,
                   needs_sync = EXCLUDED.needs_sync,
                   updated_at = now()
            "#,
        )
        .bind(&record.slug)
        .bind(Json(record))
        .bind(record.needs_sync)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_by_slugs(&self, slugs: &[String]) -> Result<u64, StoreError> {
        if slugs.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query("DELETE FROM vehicles WHERE slug = ANY($1)")
            .bind(slugs.to_vec())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn slugs_not_in(&self, keep: &HashSet<String>) -> Result<Vec<String>, StoreError> {
        let keep: Vec<String> = keep.iter().cloned().collect();
        let rows = sqlx::query("SELECT slug FROM vehicles WHERE NOT (slug = ANY($1)) ORDER BY slug")
            .bind(keep)
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| row.try_get::<String, _>("slug").map_err(StoreError::from))
            .collect()
    }

    async fn count(&self) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM vehicles")
            .fetch_one(&self.pool)
            .await?;
        Ok(count_from_db(count))
    }

    async fn pending_push(&self, limit: usize) -> Result<Vec<VehicleRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT data FROM vehicles WHERE needs_sync ORDER BY updated_at LIMIT $1",
        )
        .bind(count_to_db(limit as u64))
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| {
                let data: Json<VehicleRecord> = row.try_get("data")?;
                Ok::<_, StoreError>(data.0)
            })
            .collect()
    }
}

#[async_trait]
impl RunLogStore for PgStores {
    async fn create_run(&self, run: &SyncRun) -> Result<(), StoreError> {
        sqlx::query(&format!(
            "INSERT INTO sync_runs ({RUN_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)"
        ))
        .bind(run.id)
        .bind(run.run_type.as_str())
        .bind(run.status.as_str())
        .bind(&run.triggered_by)
        .bind(run.started_at)
        .bind(run.completed_at)
        .bind(count_to_db(run.processed_count))
        .bind(count_to_db(run.created_count))
        .bind(count_to_db(run.updated_count))
        .bind(count_to_db(run.deleted_count))
        .bind(count_to_db(run.error_count))
        .bind(&run.error_message)
        .bind(Json(&run.item_errors))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_if_running(&self, run: &SyncRun) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE sync_runs
               SET status = $2,
                   completed_at = $3,
                   processed_count = $4,
                   created_count = $5,
                   updated_count = $6,
                   deleted_count = $7,
                   error_count = $8,
                   error_message = $9,
                   item_errors = $10
             WHERE id = $1 AND status = 'running'
            "#,
        )
        .bind(run.id)
        .bind(run.status.as_str())
        .bind(run.completed_at)
        .bind(count_to_db(run.processed_count))
        .bind(count_to_db(run.created_count))
        .bind(count_to_db(run.updated_count))
        .bind(count_to_db(run.deleted_count))
        .bind(count_to_db(run.error_count))
        .bind(&run.error_message)
        .bind(Json(&run.item_errors))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn get_run(&self, id: Uuid) -> Result<Option<SyncRun>, StoreError> {
        let row = sqlx::query(&format!("SELECT {RUN_COLUMNS} FROM sync_runs WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(run_from_row).transpose()
    }

    async fn last_completed_run(&self) -> Result<Option<SyncRun>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {RUN_COLUMNS} FROM sync_runs WHERE status = 'completed' \
             ORDER BY completed_at DESC LIMIT 1"
        ))
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(run_from_row).transpose()
    }

    async fn last_completed_batch_run(&self) -> Result<Option<SyncRun>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {RUN_COLUMNS} FROM sync_runs WHERE status = 'completed' \
             AND run_type IN ('full', 'incremental') ORDER BY completed_at DESC LIMIT 1"
        ))
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(run_from_row).transpose()
    }

    async fn recent_runs(&self, limit: usize) -> Result<Vec<SyncRun>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {RUN_COLUMNS} FROM sync_runs ORDER BY started_at DESC LIMIT $1"
        ))
        .bind(count_to_db(limit as u64))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(run_from_row).collect()
    }
}

#[async_trait]
impl ReferenceStore for PgStores {
    async fn entries(&self, domain: ReferenceDomain) -> Result<Vec<ReferenceEntry>, StoreError> {
        let rows = sqlx::query(
            "SELECT name, value FROM reference_entries WHERE domain = $1 ORDER BY name",
        )
        .bind(domain.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| {
                Ok::<_, StoreError>(ReferenceEntry {
                    name: row.try_get("name")?,
                    value: row.try_get("value")?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl SettingsStore for PgStores {
    async fn all(&self) -> Result<BTreeMap<String, String>, StoreError> {
        let rows = sqlx::query("SELECT key, value FROM sync_settings")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| {
                let key: String = row.try_get("key")?;
                let value: String = row.try_get("value")?;
                Ok::<_, StoreError>((key, value))
            })
            .collect()
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO sync_settings (key, value) VALUES ($1, $2)
            ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
