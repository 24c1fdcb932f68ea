//! Engine settings persisted in the settings store.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

pub const ENABLE_AUTO_SYNC: &str = "enable_auto_sync";
pub const SYNC_INTERVAL_MINUTES: &str = "sync_interval_minutes";
pub const MAX_VEHICLES_PER_SYNC: &str = "max_vehicles_per_sync";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSettings {
    pub enable_auto_sync: bool,
    pub sync_interval_minutes: u32,
    pub max_vehicles_per_sync: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            enable_auto_sync: false,
            sync_interval_minutes: 30,
            max_vehicles_per_sync: 1000,
        }
    }
}

fn parse_positive<T>(values: &BTreeMap<String, String>, key: &str, default: T) -> T
where
    T: std::str::FromStr + PartialOrd + Default + Copy,
{
    match values.get(key) {
        None => default,
        Some(raw) => match raw.trim().parse::<T>() {
            Ok(value) if value > T::default() => value,
            _ => {
                warn!(key, value = raw.as_str(), "ignoring invalid setting");
                default
            }
        },
    }
}

impl SyncSettings {
    /// Missing or unparsable values fall back to their defaults.
    pub fn from_map(values: &BTreeMap<String, String>) -> Self {
        let defaults = Self::default();
        Self {
            enable_auto_sync: values
                .get(ENABLE_AUTO_SYNC)
                .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
                .unwrap_or(defaults.enable_auto_sync),
            sync_interval_minutes: parse_positive(
                values,
                SYNC_INTERVAL_MINUTES,
                defaults.sync_interval_minutes,
            ),
            max_vehicles_per_sync: parse_positive(
                values,
                MAX_VEHICLES_PER_SYNC,
                defaults.max_vehicles_per_sync,
            ),
        }
    }
}

/// Partial settings change; `None` leaves a value as stored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsUpdate {
    #[serde(default)]
    pub enable_auto_sync: Option<bool>,
    #[serde(default)]
    pub sync_interval_minutes: Option<u32>,
    #[serde(default)]
    pub max_vehicles_per_sync: Option<usize>,
}

impl SettingsUpdate {
    pub fn validate(&self) -> Result<(), String> {
        if self.sync_interval_minutes == Some(0) {
            return Err("sync_interval_minutes must be at least 1".to_string());
        }
        if self.max_vehicles_per_sync == Some(0) {
            return Err("max_vehicles_per_sync must be at least 1".to_string());
        }
        Ok(())
    }

    pub fn to_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(v) = self.enable_auto_sync {
            pairs.push((ENABLE_AUTO_SYNC, v.to_string()));
        }
        if let Some(v) = self.sync_interval_minutes {
            pairs.push((SYNC_INTERVAL_MINUTES, v.to_string()));
        }
        if let Some(v) = self.max_vehicles_per_sync {
            pairs.push((MAX_VEHICLES_PER_SYNC, v.to_string()));
        }
        pairs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn empty_store_yields_defaults() {
        assert_eq!(SyncSettings::from_map(&BTreeMap::new()), SyncSettings::default());
    }

    #[test]
    fn stored_values_are_parsed_and_bad_ones_ignored() {
        let settings = SyncSettings::from_map(&map(&[
            (ENABLE_AUTO_SYNC, "TRUE"),
            (SYNC_INTERVAL_MINUTES, "120"),
            (MAX_VEHICLES_PER_SYNC, "0"),
        ]));
        assert!(settings.enable_auto_sync);
        assert_eq!(settings.sync_interval_minutes, 120);
        assert_eq!(settings.max_vehicles_per_sync, 1000);

        let settings = SyncSettings::from_map(&map(&[(SYNC_INTERVAL_MINUTES, "soon")]));
        assert_eq!(settings.sync_interval_minutes, 30);
    }

    #[test]
    fn updates_reject_zero_and_serialize_only_present_fields() {
        let update = SettingsUpdate {
            sync_interval_minutes: Some(0),
            ..Default::default()
        };
        assert!(update.validate().is_err());

        let update = SettingsUpdate {
            enable_auto_sync: Some(true),
            ..Default::default()
        };
        assert!(update.validate().is_ok());
        assert_eq!(update.to_pairs(), vec![(ENABLE_AUTO_SYNC, "true".to_string())]);
    }
}
