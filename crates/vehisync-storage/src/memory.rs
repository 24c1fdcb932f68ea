//! In-process stores backing fixture mode and tests.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use anyhow::Context;
use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;
use vehisync_core::{ReferenceDomain, ReferenceEntry, RunStatus, SyncRun, VehicleRecord};

use crate::stores::{ReferenceStore, RunLogStore, SettingsStore, StoreError, VehicleStore};

#[derive(Debug, Default)]
pub struct MemoryVehicleStore {
    vehicles: RwLock<BTreeMap<String, VehicleRecord>>,
}

impl MemoryVehicleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_vehicles(vehicles: impl IntoIterator<Item = VehicleRecord>) -> Self {
        Self {
            vehicles: RwLock::new(
                vehicles
                    .into_iter()
                    .map(|v| (v.slug.clone(), v))
                    .collect(),
            ),
        }
    }

    pub async fn slugs(&self) -> Vec<String> {
        self.vehicles.read().await.keys().cloned().collect()
    }
}

#[async_trait]
impl VehicleStore for MemoryVehicleStore {
    async fn find_by_slug(&self, slug: &str) -> Result<Option<VehicleRecord>, StoreError> {
        Ok(self.vehicles.read().await.get(slug).cloned())
    }

    async fn save(&self, record: &VehicleRecord) -> Result<(), StoreError> {
        self.vehicles
            .write()
            .await
            .insert(record.slug.clone(), record.clone());
        Ok(())
    }

    async fn delete_by_slugs(&self, slugs: &[String]) -> Result<u64, StoreError> {
        let mut vehicles = self.vehicles.write().await;
        Ok(slugs
            .iter()
            .filter(|slug| vehicles.remove(slug.as_str()).is_some())
            .count() as u64)
    }

    async fn slugs_not_in(&self, keep: &HashSet<String>) -> Result<Vec<String>, StoreError> {
        Ok(self
            .vehicles
            .read()
            .await
            .keys()
            .filter(|slug| !keep.contains(slug.as_str()))
            .cloned()
            .collect())
    }

    async fn count(&self) -> Result<u64, StoreError> {
        Ok(self.vehicles.read().await.len() as u64)
    }

    async fn pending_push(&self, limit: usize) -> Result<Vec<VehicleRecord>, StoreError> {
        Ok(self
            .vehicles
            .read()
            .await
            .values()
            .filter(|v| v.needs_sync)
            .take(limit)
            .cloned()
            .collect())
    }
}

#[derive(Debug, Default)]
pub struct MemoryRunLog {
    runs: RwLock<Vec<SyncRun>>,
}

impl MemoryRunLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn all(&self) -> Vec<SyncRun> {
        self.runs.read().await.clone()
    }
}

#[async_trait]
impl RunLogStore for MemoryRunLog {
    async fn create_run(&self, run: &SyncRun) -> Result<(), StoreError> {
        self.runs.write().await.push(run.clone());
        Ok(())
    }

    async fn update_if_running(&self, run: &SyncRun) -> Result<bool, StoreError> {
        let mut runs = self.runs.write().await;
        match runs.iter_mut().find(|r| r.id == run.id) {
            Some(stored) if stored.is_running() => {
                *stored = run.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get_run(&self, id: Uuid) -> Result<Option<SyncRun>, StoreError> {
        Ok(self.runs.read().await.iter().find(|r| r.id == id).cloned())
    }

    async fn last_completed_run(&self) -> Result<Option<SyncRun>, StoreError> {
        Ok(self
            .runs
            .read()
            .await
            .iter()
            .filter(|r| r.status == RunStatus::Completed)
            .max_by_key(|r| r.completed_at)
            .cloned())
    }

    async fn last_completed_batch_run(&self) -> Result<Option<SyncRun>, StoreError> {
        Ok(self
            .runs
            .read()
            .await
            .iter()
            .filter(|r| r.status == RunStatus::Completed && r.run_type.is_guarded())
            .max_by_key(|r| r.completed_at)
            .cloned())
    }

    async fn recent_runs(&self, limit: usize) -> Result<Vec<SyncRun>, StoreError> {
        let mut runs = self.runs.read().await.clone();
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        runs.truncate(limit);
        Ok(runs)
    }
}

/// Reference collections held in memory, optionally seeded from YAML.
///
/// The YAML layout maps a domain name to its entries:
///
/// ```yaml
/// fuel_type:
///   - { name: Benzina, value: benzina }
/// ```
#[derive(Debug, Default, Clone)]
pub struct MemoryReferenceStore {
    entries: BTreeMap<ReferenceDomain, Vec<ReferenceEntry>>,
}

impl MemoryReferenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entries(mut self, domain: ReferenceDomain, entries: Vec<ReferenceEntry>) -> Self {
        self.entries.entry(domain).or_default().extend(entries);
        self
    }

    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let entries: BTreeMap<ReferenceDomain, Vec<ReferenceEntry>> =
            serde_yaml::from_str(yaml).context("parsing reference data yaml")?;
        Ok(Self { entries })
    }

    pub fn load_yaml(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_yaml_str(&yaml).with_context(|| format!("loading {}", path.display()))
    }
}

#[async_trait]
impl ReferenceStore for MemoryReferenceStore {
    async fn entries(&self, domain: ReferenceDomain) -> Result<Vec<ReferenceEntry>, StoreError> {
        Ok(self.entries.get(&domain).cloned().unwrap_or_default())
    }
}

#[derive(Debug, Default)]
pub struct MemorySettingsStore {
    values: RwLock<BTreeMap<String, String>>,
}

impl MemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_values<K, V>(values: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            values: RwLock::new(
                values
                    .into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
            ),
        }
    }
}

#[async_trait]
impl SettingsStore for MemorySettingsStore {
    async fn all(&self) -> Result<BTreeMap<String, String>, StoreError> {
        Ok(self.values.read().await.clone())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.values
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vehisync_core::RunType;

    #[tokio::test]
    async fn reconciliation_queries_see_only_absent_slugs() {
        let store = MemoryVehicleStore::with_vehicles(
            ["a", "b", "c"].into_iter().map(VehicleRecord::new),
        );
        let keep: HashSet<String> = ["a".to_string(), "c".to_string()].into_iter().collect();

        let stale = store.slugs_not_in(&keep).await.unwrap();
        assert_eq!(stale, vec!["b".to_string()]);

        let deleted = store
            .delete_by_slugs(&["b".to_string(), "zzz".to_string()])
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(store.slugs().await, vec!["a".to_string(), "c".to_string()]);
    }

    #[tokio::test]
    async fn finalized_runs_are_not_overwritten() {
        let log = MemoryRunLog::new();
        let mut run = SyncRun::start(RunType::Full, "test");
        log.create_run(&run).await.unwrap();

        run.processed_count = 3;
        assert!(log.update_if_running(&run).await.unwrap());

        run.fail("manually stopped");
        assert!(log.update_if_running(&run).await.unwrap());

        run.status = RunStatus::Completed;
        assert!(!log.update_if_running(&run).await.unwrap());

        let stored = log.get_run(run.id).await.unwrap().unwrap();
        assert_eq!(stored.status, RunStatus::Failed);
        assert_eq!(stored.processed_count, 3);
        assert!(log.last_completed_run().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reference_yaml_is_grouped_by_domain() {
        let store = MemoryReferenceStore::from_yaml_str(
            "fuel_type:\n  - { name: Benzina, value: benzina }\n  - { name: Dièsel, value: diesel }\ncolor:\n  - { name: Blanc, value: blanc }\n",
        )
        .unwrap();
        assert_eq!(store.entries(ReferenceDomain::FuelType).await.unwrap().len(), 2);
        assert_eq!(
            store.entries(ReferenceDomain::Color).await.unwrap(),
            vec![ReferenceEntry::new("Blanc", "blanc")]
        );
        assert!(store.entries(ReferenceDomain::Connector).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn batch_watermark_ignores_single_vehicle_runs() {
        let log = MemoryRunLog::new();
        let mut full = SyncRun::start(RunType::Full, "cli");
        log.create_run(&full).await.unwrap();
        full.complete();
        assert!(log.update_if_running(&full).await.unwrap());

        let mut webhook = SyncRun::start(RunType::Webhook, "webhook");
        log.create_run(&webhook).await.unwrap();
        webhook.complete();
        webhook.completed_at = full.completed_at.map(|at| at + chrono::Duration::minutes(5));
        assert!(log.update_if_running(&webhook).await.unwrap());

        assert_eq!(log.last_completed_run().await.unwrap().map(|r| r.id), Some(webhook.id));
        assert_eq!(
            log.last_completed_batch_run().await.unwrap().map(|r| r.id),
            Some(full.id)
        );
    }

    #[test]
    fn seed_reference_data_has_unique_labels_per_domain() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../reference_data.yaml");
        let store = MemoryReferenceStore::load_yaml(&path).unwrap();
        let mut synonyms = 0;
        for (domain, entries) in &store.entries {
            let names: HashSet<&str> = entries.iter().map(|e| e.name.as_str()).collect();
            assert_eq!(names.len(), entries.len(), "duplicate label in {domain}");
            let values: HashSet<&str> = entries.iter().map(|e| e.value.as_str()).collect();
            synonyms += entries.len() - values.len();
        }
        assert!(synonyms > 0, "seed data should map several labels onto one slug");
    }
}
