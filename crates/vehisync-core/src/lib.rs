//! Core domain model for the vehicle synchronization engine.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const CRATE_NAME: &str = "vehisync-core";

/// Reference collections used to canonicalize enumerated vehicle attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceDomain {
    FuelType,
    Color,
    VehicleState,
    BodyType,
    Transmission,
    UpholsteryType,
    UpholsteryColor,
    PropulsionType,
    BatteryType,
    ChargingCable,
    Connector,
    ChargingSpeed,
    EmissionClass,
}

impl ReferenceDomain {
    pub const ALL: [ReferenceDomain; 13] = [
        ReferenceDomain::FuelType,
        ReferenceDomain::Color,
        ReferenceDomain::VehicleState,
        ReferenceDomain::BodyType,
        ReferenceDomain::Transmission,
        ReferenceDomain::UpholsteryType,
        ReferenceDomain::UpholsteryColor,
        ReferenceDomain::PropulsionType,
        ReferenceDomain::BatteryType,
        ReferenceDomain::ChargingCable,
        ReferenceDomain::Connector,
        ReferenceDomain::ChargingSpeed,
        ReferenceDomain::EmissionClass,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReferenceDomain::FuelType => "fuel_type",
            ReferenceDomain::Color => "color",
            ReferenceDomain::VehicleState => "vehicle_state",
            ReferenceDomain::BodyType => "body_type",
            ReferenceDomain::Transmission => "transmission",
            ReferenceDomain::UpholsteryType => "upholstery_type",
            ReferenceDomain::UpholsteryColor => "upholstery_color",
            ReferenceDomain::PropulsionType => "propulsion_type",
            ReferenceDomain::BatteryType => "battery_type",
            ReferenceDomain::ChargingCable => "charging_cable",
            ReferenceDomain::Connector => "connector",
            ReferenceDomain::ChargingSpeed => "charging_speed",
            ReferenceDomain::EmissionClass => "emission_class",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|d| d.as_str() == value)
    }

    /// Electric-vehicle sub-domains also have an in-process catalog fallback.
    pub fn is_electric(&self) -> bool {
        matches!(
            self,
            ReferenceDomain::BatteryType
                | ReferenceDomain::ChargingCable
                | ReferenceDomain::Connector
                | ReferenceDomain::ChargingSpeed
                | ReferenceDomain::EmissionClass
        )
    }
}

impl fmt::Display for ReferenceDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Display label + canonical slug pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceEntry {
    pub name: String,
    pub value: String,
}

impl ReferenceEntry {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Local canonical vehicle, keyed by `slug`.
///
/// Enumerated attributes hold canonical slugs. Numeric technical attributes are
/// kept as numeric strings the way the listing platform exposes them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct VehicleRecord {
    pub slug: String,
    pub original_id: Option<String>,
    pub status: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,

    pub vehicle_type: Option<String>,
    pub brand: Option<String>,
    pub model: Option<String>,
    pub version: Option<String>,

    pub active: bool,
    pub featured: u32,
    pub sold: bool,
    pub reserved: bool,
    pub created_at: Option<DateTime<Utc>>,

    pub price: f64,
    /// Stored as `"si"` / `"no"` for existing consumers, never as a boolean.
    pub garantia: String,

    pub fuel_type: Option<String>,
    pub transmission: Option<String>,
    pub body_type: Option<String>,
    pub power_hp: Option<String>,
    pub displacement: Option<String>,
    pub mileage: Option<String>,
    pub year: Option<String>,
    pub color: Option<String>,
    pub state: Option<String>,
    pub upholstery_type: Option<String>,
    pub upholstery_color: Option<String>,

    pub propulsion_type: Option<String>,
    pub battery_type: Option<String>,
    pub charging_cables: Vec<String>,
    pub connectors: Vec<String>,
    pub charging_speed: Option<String>,
    pub emission_class: Option<String>,
    pub range_km: Option<String>,

    pub car_extras: Vec<String>,
    pub motorcycle_extras: Vec<String>,
    pub motorhome_extras: Vec<String>,
    pub cabin_extras: Vec<String>,

    pub featured_image_url: Option<String>,
    pub gallery_urls: Vec<String>,

    pub last_sync_at: Option<DateTime<Utc>>,
    pub external_sync_id: Option<String>,
    pub sync_error: Option<String>,
    pub needs_sync: bool,
}

fn overwrite_if_some<T>(target: &mut Option<T>, incoming: Option<T>) {
    if incoming.is_some() {
        *target = incoming;
    }
}

impl VehicleRecord {
    pub fn new(slug: impl Into<String>) -> Self {
        Self {
            slug: slug.into(),
            garantia: "no".to_string(),
            ..Default::default()
        }
    }

    /// Apply an incoming record on top of a stored one.
    ///
    /// Optional attributes only overwrite when provided. Flags, price, lists and
    /// media always overwrite. `needs_sync` stays as stored.
    pub fn merge_from(&mut self, incoming: VehicleRecord) {
        overwrite_if_some(&mut self.original_id, incoming.original_id);
        overwrite_if_some(&mut self.status, incoming.status);
        overwrite_if_some(&mut self.title, incoming.title);
        overwrite_if_some(&mut self.description, incoming.description);

        overwrite_if_some(&mut self.vehicle_type, incoming.vehicle_type);
        overwrite_if_some(&mut self.brand, incoming.brand);
        overwrite_if_some(&mut self.model, incoming.model);
        overwrite_if_some(&mut self.version, incoming.version);

        self.active = incoming.active;
        self.featured = incoming.featured;
        self.sold = incoming.sold;
        self.reserved = incoming.reserved;
        overwrite_if_some(&mut self.created_at, incoming.created_at);

        self.price = incoming.price;
        self.garantia = incoming.garantia;

        overwrite_if_some(&mut self.fuel_type, incoming.fuel_type);
        overwrite_if_some(&mut self.transmission, incoming.transmission);
        overwrite_if_some(&mut self.body_type, incoming.body_type);
        overwrite_if_some(&mut self.power_hp, incoming.power_hp);
        overwrite_if_some(&mut self.displacement, incoming.displacement);
        overwrite_if_some(&mut self.mileage, incoming.mileage);
        overwrite_if_some(&mut self.year, incoming.year);
        overwrite_if_some(&mut self.color, incoming.color);
        overwrite_if_some(&mut self.state, incoming.state);
        overwrite_if_some(&mut self.upholstery_type, incoming.upholstery_type);
        overwrite_if_some(&mut self.upholstery_color, incoming.upholstery_color);

        overwrite_if_some(&mut self.propulsion_type, incoming.propulsion_type);
        overwrite_if_some(&mut self.battery_type, incoming.battery_type);
        self.charging_cables = incoming.charging_cables;
        self.connectors = incoming.connectors;
        overwrite_if_some(&mut self.charging_speed, incoming.charging_speed);
        overwrite_if_some(&mut self.emission_class, incoming.emission_class);
        overwrite_if_some(&mut self.range_km, incoming.range_km);

        self.car_extras = incoming.car_extras;
        self.motorcycle_extras = incoming.motorcycle_extras;
        self.motorhome_extras = incoming.motorhome_extras;
        self.cabin_extras = incoming.cabin_extras;

        overwrite_if_some(&mut self.featured_image_url, incoming.featured_image_url);
        self.gallery_urls = incoming.gallery_urls;

        overwrite_if_some(&mut self.last_sync_at, incoming.last_sync_at);
        overwrite_if_some(&mut self.external_sync_id, incoming.external_sync_id);
        self.sync_error = incoming.sync_error;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunType {
    Full,
    Incremental,
    Webhook,
    Manual,
}

impl RunType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunType::Full => "full",
            RunType::Incremental => "incremental",
            RunType::Webhook => "webhook",
            RunType::Manual => "manual",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "full" => Some(RunType::Full),
            "incremental" => Some(RunType::Incremental),
            "webhook" => Some(RunType::Webhook),
            "manual" => Some(RunType::Manual),
            _ => None,
        }
    }

    /// Full and incremental runs go through the single-flight guard.
    pub fn is_guarded(&self) -> bool {
        matches!(self, RunType::Full | RunType::Incremental)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "running" => Some(RunStatus::Running),
            "completed" => Some(RunStatus::Completed),
            "failed" => Some(RunStatus::Failed),
            _ => None,
        }
    }
}

/// A single record that failed to map or persist during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemError {
    pub slug: Option<String>,
    pub message: String,
}

/// Persistent log entry for one sync run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRun {
    pub id: Uuid,
    pub run_type: RunType,
    pub status: RunStatus,
    pub triggered_by: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub processed_count: u64,
    pub created_count: u64,
    pub updated_count: u64,
    pub deleted_count: u64,
    pub error_count: u64,
    /// Run-fatal error only. Per-item failures live in `item_errors`.
    pub error_message: Option<String>,
    pub item_errors: Vec<ItemError>,
}

impl SyncRun {
    pub fn start(run_type: RunType, triggered_by: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            run_type,
            status: RunStatus::Running,
            triggered_by: triggered_by.into(),
            started_at: Utc::now(),
            completed_at: None,
            processed_count: 0,
            created_count: 0,
            updated_count: 0,
            deleted_count: 0,
            error_count: 0,
            error_message: None,
            item_errors: Vec::new(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == RunStatus::Running
    }

    /// Count a failed item, retaining at most `retain` details.
    pub fn record_item_error(&mut self, error: ItemError, retain: usize) {
        self.error_count += 1;
        if self.item_errors.len() < retain {
            self.item_errors.push(error);
        }
    }

    pub fn complete(&mut self) {
        self.status = RunStatus::Completed;
        self.completed_at = Some(Utc::now());
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        self.status = RunStatus::Failed;
        self.completed_at = Some(Utc::now());
        self.error_message = Some(message.into());
    }
}
