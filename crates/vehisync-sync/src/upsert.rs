use std::sync::Arc;

use serde::Serialize;
use tracing::debug;
use vehisync_core::VehicleRecord;
use vehisync_storage::{StoreError, VehicleStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UpsertOutcome {
    Created,
    Updated,
}

/// Insert-or-merge keyed by slug.
#[derive(Clone)]
pub struct VehicleUpsertService {
    store: Arc<dyn VehicleStore>,
}

impl VehicleUpsertService {
    pub fn new(store: Arc<dyn VehicleStore>) -> Self {
        Self { store }
    }

    /// Concurrent writes for the same slug are last-write-wins.
    pub async fn upsert(&self, record: VehicleRecord) -> Result<UpsertOutcome, StoreError> {
        match self.store.find_by_slug(&record.slug).await? {
            Some(mut existing) => {
                existing.merge_from(record);
                self.store.save(&existing).await?;
                debug!(slug = existing.slug.as_str(), "updated vehicle");
                Ok(UpsertOutcome::Updated)
            }
            None => {
                self.store.save(&record).await?;
                debug!(slug = record.slug.as_str(), "created vehicle");
                Ok(UpsertOutcome::Created)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vehisync_storage::MemoryVehicleStore;

    #[tokio::test]
    async fn second_apply_updates_without_duplicating() {
        let store = Arc::new(MemoryVehicleStore::new());
        let service = VehicleUpsertService::new(store.clone());

        let mut record = VehicleRecord::new("kia-niro");
        record.price = 21_000.0;
        assert_eq!(service.upsert(record.clone()).await.unwrap(), UpsertOutcome::Created);
        assert_eq!(service.upsert(record.clone()).await.unwrap(), UpsertOutcome::Updated);

        assert_eq!(store.count().await.unwrap(), 1);
        assert_eq!(store.find_by_slug("kia-niro").await.unwrap(), Some(record));
    }

    #[tokio::test]
    async fn merge_keeps_local_push_flag_and_absent_fields() {
        let mut stored = VehicleRecord::new("seat-ibiza");
        stored.color = Some("blanc".into());
        stored.needs_sync = true;
        let store = Arc::new(MemoryVehicleStore::with_vehicles([stored]));
        let service = VehicleUpsertService::new(store.clone());

        let mut incoming = VehicleRecord::new("seat-ibiza");
        incoming.sold = true;
        service.upsert(incoming).await.unwrap();

        let saved = store.find_by_slug("seat-ibiza").await.unwrap().unwrap();
        assert_eq!(saved.color.as_deref(), Some("blanc"));
        assert!(saved.sold);
        assert!(saved.needs_sync);
    }
}
