//! Reference-data resolution: label -> canonical slug within one domain.

use std::collections::HashMap;

use vehisync_core::{ReferenceDomain, ReferenceEntry};
use vehisync_storage::{ReferenceStore, StoreError};

use crate::ev_catalog;

/// Every reference collection, read once at the start of a run.
#[derive(Debug, Clone, Default)]
pub struct ReferenceSnapshot {
    domains: HashMap<ReferenceDomain, Vec<ReferenceEntry>>,
}

impl ReferenceSnapshot {
    pub async fn load(store: &dyn ReferenceStore) -> Result<Self, StoreError> {
        let mut domains = HashMap::new();
        for domain in ReferenceDomain::ALL {
            domains.insert(domain, store.entries(domain).await?);
        }
        Ok(Self { domains })
    }

    pub fn with_entries(mut self, domain: ReferenceDomain, entries: Vec<ReferenceEntry>) -> Self {
        self.domains.entry(domain).or_default().extend(entries);
        self
    }

    pub fn entry_count(&self) -> usize {
        self.domains.values().map(Vec::len).sum()
    }

    /// Case-insensitive exact match on `name` in `domain` only. Electric
    /// sub-domains fall back to the built-in catalog on a miss.
    pub fn try_resolve(&self, domain: ReferenceDomain, label: &str) -> Option<String> {
        let label = label.trim();
        if label.is_empty() {
            return None;
        }
        let wanted = label.to_lowercase();
        let persisted = self.domains.get(&domain).and_then(|entries| {
            entries
                .iter()
                .find(|entry| entry.name.trim().to_lowercase() == wanted)
                .map(|entry| entry.value.clone())
        });

        persisted.or_else(|| {
            domain
                .is_electric()
                .then(|| ev_catalog::lookup(domain, label))
                .flatten()
                .map(ToString::to_string)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vehisync_storage::MemoryReferenceStore;

    fn snapshot() -> ReferenceSnapshot {
        ReferenceSnapshot::default()
            .with_entries(
                ReferenceDomain::FuelType,
                vec![
                    ReferenceEntry::new("Benzina", "benzina"),
                    ReferenceEntry::new("Dièsel", "diesel"),
                ],
            )
            .with_entries(
                ReferenceDomain::Color,
                vec![ReferenceEntry::new("Negre", "negre")],
            )
            .with_entries(
                ReferenceDomain::UpholsteryColor,
                vec![ReferenceEntry::new("Negre", "negre-tapisseria")],
            )
    }

    #[test]
    fn resolution_is_case_insensitive_but_exact() {
        let refs = snapshot();
        assert_eq!(refs.try_resolve(ReferenceDomain::FuelType, "DIÈSEL"), Some("diesel".into()));
        assert_eq!(refs.try_resolve(ReferenceDomain::FuelType, " benzina "), Some("benzina".into()));
        assert_eq!(refs.try_resolve(ReferenceDomain::FuelType, "Benzin"), None);
        assert_eq!(refs.try_resolve(ReferenceDomain::FuelType, ""), None);
    }

    #[test]
    fn overlapping_labels_do_not_leak_across_domains() {
        let refs = snapshot();
        assert_eq!(refs.try_resolve(ReferenceDomain::Color, "Negre"), Some("negre".into()));
        assert_eq!(
            refs.try_resolve(ReferenceDomain::UpholsteryColor, "Negre"),
            Some("negre-tapisseria".into())
        );
        assert_eq!(refs.try_resolve(ReferenceDomain::BodyType, "Negre"), None);
    }

    #[test]
    fn electric_domains_fall_back_to_builtin_catalog() {
        let refs = snapshot().with_entries(
            ReferenceDomain::Connector,
            vec![ReferenceEntry::new("CCS Combo", "ccs2")],
        );
        assert_eq!(refs.try_resolve(ReferenceDomain::Connector, "CCS Combo"), Some("ccs2".into()));
        assert_eq!(refs.try_resolve(ReferenceDomain::Connector, "Tipo 2 (Mennekes)"), Some("tipus-2".into()));
        assert_eq!(refs.try_resolve(ReferenceDomain::Transmission, "Tipo 2 (Mennekes)"), None);
    }

    #[tokio::test]
    async fn load_reads_every_domain_from_store() {
        let store = MemoryReferenceStore::new()
            .with_entries(ReferenceDomain::FuelType, vec![ReferenceEntry::new("Elèctric", "electric")])
            .with_entries(ReferenceDomain::Color, vec![ReferenceEntry::new("Blau", "blau")]);
        let refs = ReferenceSnapshot::load(&store).await.unwrap();
        assert_eq!(refs.entry_count(), 2);
        assert_eq!(refs.try_resolve(ReferenceDomain::FuelType, "elèctric"), Some("electric".into()));
    }
}
