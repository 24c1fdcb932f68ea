//! Upstream vehicle object -> canonical [`VehicleRecord`].

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::{json, Map, Value as JsonValue};
use thiserror::Error;
use vehisync_core::{ReferenceDomain, VehicleRecord};

use crate::normalize::{
    clean_field_value, clean_list, coerce_bool, coerce_featured, coerce_garantia,
    coerce_numeric_string, coerce_price, convert_extras_to_slugs, convert_label_to_slug,
    convert_labels_to_slugs, field_to_slug, ExtrasKind,
};
use crate::raw::{RawField, RawVehicle};
use crate::reference::ReferenceSnapshot;

/// Upstream attribute keys.
pub mod keys {
    pub const ID: &str = "id";
    pub const SLUG: &str = "slug";
    pub const STATUS: &str = "status";
    pub const TITLE: &str = "titol-anunci";
    pub const DESCRIPTION: &str = "descripcio-anunci";
    pub const VEHICLE_TYPE: &str = "tipus-vehicle";
    pub const BRAND: [&str; 2] = ["marques-cotxe", "marques-de-moto"];
    pub const MODEL: [&str; 2] = ["models-cotxe", "models-moto"];
    pub const VERSION: &str = "versio";
    pub const ACTIVE: &str = "anunci-actiu";
    pub const FEATURED: &str = "anunci-destacat";
    pub const SOLD: &str = "venut";
    pub const RESERVED: &str = "reservat";
    pub const CREATED_AT: &str = "data-creacio";
    pub const MODIFIED_AT: &str = "data-modificacio";
    pub const PRICE: &str = "preu";
    pub const WARRANTY: &str = "garantia";
    pub const FUEL_TYPE: &str = "tipus-combustible";
    pub const TRANSMISSION: &str = "tipus-canvi";
    pub const BODY_TYPE: [&str; 3] = ["carrosseria-cotxe", "carrosseria-moto", "carrosseria-caravana"];
    pub const POWER_HP: &str = "potencia-cv";
    pub const DISPLACEMENT: &str = "cilindrada";
    pub const MILEAGE: &str = "quilometratge";
    pub const YEAR: &str = "any-fabricacio";
    pub const COLOR: &str = "color-vehicle";
    pub const STATE: &str = "estat-vehicle";
    pub const UPHOLSTERY_TYPE: &str = "tipus-tapisseria";
    pub const UPHOLSTERY_COLOR: &str = "color-tapisseria";
    pub const PROPULSION_TYPE: &str = "tipus-propulsor";
    pub const BATTERY: &str = "bateria";
    pub const CHARGING_CABLES: &str = "cables-recarrega";
    pub const CONNECTORS: &str = "connectors";
    pub const CHARGING_SPEED: &str = "velocitat-recarrega";
    pub const EMISSIONS: &str = "emissions-vehicle";
    pub const RANGE: &str = "autonomia-wltp";
    pub const FEATURED_IMAGE: &str = "imatge-destacada-url";
    pub const GALLERY: &str = "galeria-vehicle";
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MapError {
    #[error("vehicle payload has no slug")]
    MissingSlug,
}

/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS` and bare dates (all read as UTC).
pub fn parse_timestamp(value: &RawField) -> Option<DateTime<Utc>> {
    let text = clean_field_value(value)?;
    let text = text.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

pub fn raw_slug(raw: &RawVehicle) -> Option<String> {
    clean_field_value(&raw.field(keys::SLUG)).map(|slug| slug.trim().to_string())
}

pub fn modified_at(raw: &RawVehicle) -> Option<DateTime<Utc>> {
    parse_timestamp(&raw.field(keys::MODIFIED_AT))
}

pub fn map_vehicle(
    raw: &RawVehicle,
    refs: &ReferenceSnapshot,
    synced_at: DateTime<Utc>,
) -> Result<VehicleRecord, MapError> {
    let slug = raw_slug(raw).ok_or(MapError::MissingSlug)?;
    let label = |key: &str, domain: ReferenceDomain| convert_label_to_slug(&raw.field(key), domain, refs);

    let mut record = VehicleRecord::new(slug);
    record.original_id = clean_field_value(&raw.field(keys::ID));
    record.status = clean_field_value(&raw.field(keys::STATUS));
    record.title = clean_field_value(&raw.field(keys::TITLE));
    record.description = clean_field_value(&raw.field(keys::DESCRIPTION));

    record.vehicle_type = field_to_slug(&raw.field(keys::VEHICLE_TYPE));
    record.brand = field_to_slug(&raw.first_present(&keys::BRAND));
    record.model = field_to_slug(&raw.first_present(&keys::MODEL));
    record.version = clean_field_value(&raw.field(keys::VERSION));

    record.active = coerce_bool(&raw.field(keys::ACTIVE));
    record.featured = coerce_featured(&raw.field(keys::FEATURED));
    record.sold = coerce_bool(&raw.field(keys::SOLD));
    record.reserved = coerce_bool(&raw.field(keys::RESERVED));
    record.created_at = parse_timestamp(&raw.field(keys::CREATED_AT));

    record.price = coerce_price(&raw.field(keys::PRICE));
    record.garantia = coerce_garantia(&raw.field(keys::WARRANTY));

    record.fuel_type = label(keys::FUEL_TYPE, ReferenceDomain::FuelType);
    record.transmission = label(keys::TRANSMISSION, ReferenceDomain::Transmission);
    record.body_type = convert_label_to_slug(
        &raw.first_present(&keys::BODY_TYPE),
        ReferenceDomain::BodyType,
        refs,
    );
    record.power_hp = coerce_numeric_string(&raw.field(keys::POWER_HP));
    record.displacement = coerce_numeric_string(&raw.field(keys::DISPLACEMENT));
    record.mileage = coerce_numeric_string(&raw.field(keys::MILEAGE));
    record.year = coerce_numeric_string(&raw.field(keys::YEAR));
    record.color = label(keys::COLOR, ReferenceDomain::Color);
    record.state = label(keys::STATE, ReferenceDomain::VehicleState);
    record.upholstery_type = label(keys::UPHOLSTERY_TYPE, ReferenceDomain::UpholsteryType);
    record.upholstery_color = label(keys::UPHOLSTERY_COLOR, ReferenceDomain::UpholsteryColor);

    record.propulsion_type = label(keys::PROPULSION_TYPE, ReferenceDomain::PropulsionType);
    record.battery_type = label(keys::BATTERY, ReferenceDomain::BatteryType);
    record.charging_cables =
        convert_labels_to_slugs(&raw.field(keys::CHARGING_CABLES), ReferenceDomain::ChargingCable, refs);
    record.connectors =
        convert_labels_to_slugs(&raw.field(keys::CONNECTORS), ReferenceDomain::Connector, refs);
    record.charging_speed = label(keys::CHARGING_SPEED, ReferenceDomain::ChargingSpeed);
    record.emission_class = label(keys::EMISSIONS, ReferenceDomain::EmissionClass);
    record.range_km = coerce_numeric_string(&raw.field(keys::RANGE));

    record.car_extras = convert_extras_to_slugs(&raw.field(ExtrasKind::Car.source_key()), ExtrasKind::Car);
    record.motorcycle_extras =
        convert_extras_to_slugs(&raw.field(ExtrasKind::Motorcycle.source_key()), ExtrasKind::Motorcycle);
    record.motorhome_extras =
        convert_extras_to_slugs(&raw.field(ExtrasKind::Motorhome.source_key()), ExtrasKind::Motorhome);
    record.cabin_extras =
        convert_extras_to_slugs(&raw.field(ExtrasKind::Cabin.source_key()), ExtrasKind::Cabin);

    record.featured_image_url = clean_field_value(&raw.field(keys::FEATURED_IMAGE));
    record.gallery_urls = clean_list(&raw.field(keys::GALLERY));

    record.last_sync_at = Some(synced_at);
    Ok(record)
}

fn insert_opt(map: &mut Map<String, JsonValue>, key: &str, value: &Option<String>) {
    if let Some(value) = value {
        map.insert(key.to_string(), JsonValue::String(value.clone()));
    }
}

/// Outbound payload in the platform's own key vocabulary.
pub fn to_external_payload(record: &VehicleRecord) -> JsonValue {
    let mut map = Map::new();
    map.insert(keys::SLUG.into(), json!(record.slug));
    insert_opt(&mut map, keys::ID, &record.external_sync_id.clone().or(record.original_id.clone()));
    insert_opt(&mut map, keys::STATUS, &record.status);
    insert_opt(&mut map, keys::TITLE, &record.title);
    insert_opt(&mut map, keys::DESCRIPTION, &record.description);
    insert_opt(&mut map, keys::VEHICLE_TYPE, &record.vehicle_type);
    insert_opt(&mut map, keys::BRAND[0], &record.brand);
    insert_opt(&mut map, keys::MODEL[0], &record.model);
    insert_opt(&mut map, keys::VERSION, &record.version);

    map.insert(keys::ACTIVE.into(), json!(record.active));
    map.insert(keys::FEATURED.into(), json!(record.featured));
    map.insert(keys::SOLD.into(), json!(record.sold));
    map.insert(keys::RESERVED.into(), json!(record.reserved));
    map.insert(keys::PRICE.into(), json!(record.price));
    map.insert(keys::WARRANTY.into(), json!(record.garantia));

    insert_opt(&mut map, keys::FUEL_TYPE, &record.fuel_type);
    insert_opt(&mut map, keys::TRANSMISSION, &record.transmission);
    insert_opt(&mut map, keys::BODY_TYPE[0], &record.body_type);
    insert_opt(&mut map, keys::POWER_HP, &record.power_hp);
    insert_opt(&mut map, keys::DISPLACEMENT, &record.displacement);
    insert_opt(&mut map, keys::MILEAGE, &record.mileage);
    insert_opt(&mut map, keys::YEAR, &record.year);
    insert_opt(&mut map, keys::COLOR, &record.color);
    insert_opt(&mut map, keys::STATE, &record.state);
    insert_opt(&mut map, keys::UPHOLSTERY_TYPE, &record.upholstery_type);
    insert_opt(&mut map, keys::UPHOLSTERY_COLOR, &record.upholstery_color);
    insert_opt(&mut map, keys::PROPULSION_TYPE, &record.propulsion_type);
    insert_opt(&mut map, keys::BATTERY, &record.battery_type);
    map.insert(keys::CHARGING_CABLES.into(), json!(record.charging_cables));
    map.insert(keys::CONNECTORS.into(), json!(record.connectors));
    insert_opt(&mut map, keys::CHARGING_SPEED, &record.charging_speed);
    insert_opt(&mut map, keys::EMISSIONS, &record.emission_class);
    insert_opt(&mut map, keys::RANGE, &record.range_km);

    let extras = [
        (ExtrasKind::Car, &record.car_extras),
        (ExtrasKind::Motorcycle, &record.motorcycle_extras),
        (ExtrasKind::Motorhome, &record.motorhome_extras),
        (ExtrasKind::Cabin, &record.cabin_extras),
    ];
    for (kind, values) in extras {
        map.insert(kind.source_key().into(), json!(values));
    }

    insert_opt(&mut map, keys::FEATURED_IMAGE, &record.featured_image_url);
    map.insert(keys::GALLERY.into(), json!(record.gallery_urls));
    JsonValue::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use vehisync_core::ReferenceEntry;

    fn refs() -> ReferenceSnapshot {
        ReferenceSnapshot::default()
            .with_entries(
                ReferenceDomain::FuelType,
                vec![ReferenceEntry::new("Dièsel", "diesel")],
            )
            .with_entries(ReferenceDomain::Color, vec![ReferenceEntry::new("Negre", "negre")])
            .with_entries(
                ReferenceDomain::BodyType,
                vec![ReferenceEntry::new("Berlina", "berlina")],
            )
    }

    fn synced_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap()
    }

    #[test]
    fn maps_a_car_with_messy_fields() {
        let raw: RawVehicle = json!({
            "id": 812,
            "slug": "bmw-320d",
            "titol-anunci": "BMW 320d Touring",
            "tipus-vehicle": "Cotxe",
            "marques-cotxe": ["BMW"],
            "models-cotxe": "Sèrie 3",
            "anunci-actiu": "true",
            "anunci-destacat": "3",
            "venut": 0,
            "reservat": false,
            "data-creacio": "2026-02-14 09:30:00",
            "preu": "18900",
            "garantia": true,
            "tipus-combustible": ["", "Dièsel"],
            "carrosseria-cotxe": "Berlina",
            "potencia-cv": "190 CV",
            "quilometratge": 85000,
            "color-vehicle": "NEGRE",
            "estat-vehicle": "Seminou",
            "extres-cotxe": ["Navegador GPS", "Sostre obert"],
            "galeria-vehicle": [{"url": "https://cdn.test/1.jpg"}, "", "https://cdn.test/2.jpg"]
        })
        .into();

        let record = map_vehicle(&raw, &refs(), synced_at()).unwrap();
        assert_eq!(record.slug, "bmw-320d");
        assert_eq!(record.original_id.as_deref(), Some("812"));
        assert_eq!(record.vehicle_type.as_deref(), Some("cotxe"));
        assert_eq!(record.brand.as_deref(), Some("bmw"));
        assert_eq!(record.model.as_deref(), Some("serie-3"));
        assert!(record.active);
        assert_eq!(record.featured, 3);
        assert!(!record.sold);
        assert_eq!(record.price, 18_900.0);
        assert_eq!(record.garantia, "si");
        assert_eq!(record.fuel_type.as_deref(), Some("diesel"));
        assert_eq!(record.body_type.as_deref(), Some("berlina"));
        assert_eq!(record.power_hp.as_deref(), Some("190"));
        assert_eq!(record.mileage.as_deref(), Some("85000"));
        assert_eq!(record.color.as_deref(), Some("negre"));
        assert_eq!(record.state.as_deref(), Some("seminou"));
        assert_eq!(record.car_extras, vec!["navegador-gps", "sostre-obert"]);
        assert_eq!(record.gallery_urls.len(), 2);
        assert_eq!(record.last_sync_at, Some(synced_at()));
        assert!(record.created_at.is_some());
        assert!(!record.needs_sync);
    }

    #[test]
    fn motorcycle_keys_and_electric_catalog_are_used() {
        let raw: RawVehicle = json!({
            "slug": "zero-sr",
            "marques-de-moto": "Zero",
            "models-moto": "SR/F",
            "carrosseria-moto": "Naked",
            "connectors": ["Tipo 2 (Mennekes)", "CCS Combo"],
            "velocitat-recarrega": "Fast charging",
            "extres-moto": "ABS, Control de tracció"
        })
        .into();

        let record = map_vehicle(&raw, &refs(), synced_at()).unwrap();
        assert_eq!(record.brand.as_deref(), Some("zero"));
        assert_eq!(record.model.as_deref(), Some("srf"));
        assert_eq!(record.body_type.as_deref(), Some("naked"));
        assert_eq!(record.connectors, vec!["tipus-2", "ccs-combo"]);
        assert_eq!(record.charging_speed.as_deref(), Some("carrega-rapida"));
        assert_eq!(record.motorcycle_extras, vec!["abs", "control-de-traccio"]);
        assert_eq!(record.featured, 0);
        assert_eq!(record.garantia, "no");
    }

    #[test]
    fn missing_slug_is_an_item_error() {
        let raw: RawVehicle = json!({ "titol-anunci": "Sense slug", "slug": "" }).into();
        assert_eq!(map_vehicle(&raw, &refs(), synced_at()), Err(MapError::MissingSlug));
    }

    #[test]
    fn timestamps_accept_common_upstream_formats() {
        assert!(parse_timestamp(&RawField::from("2026-02-14T09:30:00+01:00")).is_some());
        assert!(parse_timestamp(&RawField::from("2026-02-14 09:30:00")).is_some());
        assert!(parse_timestamp(&RawField::from("2026-02-14")).is_some());
        assert!(parse_timestamp(&RawField::from("ahir")).is_none());
    }

    #[test]
    fn external_payload_uses_platform_keys() {
        let mut record = VehicleRecord::new("seat-leon");
        record.brand = Some("seat".into());
        record.garantia = "si".into();
        record.car_extras = vec!["abs".into()];

        let payload = to_external_payload(&record);
        assert_eq!(payload["slug"], "seat-leon");
        assert_eq!(payload["marques-cotxe"], "seat");
        assert_eq!(payload["garantia"], "si");
        assert_eq!(payload["extres-cotxe"], json!(["abs"]));
        assert!(payload.get("color-vehicle").is_none());
    }
}
