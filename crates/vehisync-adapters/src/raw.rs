//! Loosely-typed upstream payloads.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

/// One upstream attribute value as it actually arrives on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum RawField {
    Absent,
    Scalar(String),
    List(Vec<String>),
    Bool(bool),
    Num(f64),
}

/// Object-shaped values carry their text under one of these keys.
const OBJECT_TEXT_KEYS: [&str; 4] = ["value", "url", "name", "slug"];

fn object_text(object: &Map<String, JsonValue>) -> Option<String> {
    OBJECT_TEXT_KEYS
        .iter()
        .find_map(|key| object.get(*key).and_then(JsonValue::as_str))
        .map(ToString::to_string)
}

fn element_text(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        JsonValue::Bool(b) => Some(b.to_string()),
        JsonValue::Object(object) => object_text(object),
        JsonValue::Null | JsonValue::Array(_) => None,
    }
}

impl RawField {
    pub fn from_json(value: Option<&JsonValue>) -> Self {
        match value {
            None | Some(JsonValue::Null) => RawField::Absent,
            Some(JsonValue::String(s)) => RawField::Scalar(s.clone()),
            Some(JsonValue::Bool(b)) => RawField::Bool(*b),
            Some(JsonValue::Number(n)) => n.as_f64().map(RawField::Num).unwrap_or(RawField::Absent),
            Some(JsonValue::Array(items)) => {
                RawField::List(items.iter().filter_map(element_text).collect())
            }
            Some(JsonValue::Object(object)) => object_text(object)
                .map(RawField::Scalar)
                .unwrap_or(RawField::Absent),
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, RawField::Absent)
    }
}

impl From<&str> for RawField {
    fn from(value: &str) -> Self {
        RawField::Scalar(value.to_string())
    }
}

impl From<bool> for RawField {
    fn from(value: bool) -> Self {
        RawField::Bool(value)
    }
}

impl From<f64> for RawField {
    fn from(value: f64) -> Self {
        RawField::Num(value)
    }
}

impl From<Vec<&str>> for RawField {
    fn from(value: Vec<&str>) -> Self {
        RawField::List(value.into_iter().map(ToString::to_string).collect())
    }
}

/// A flat upstream vehicle object with hyphenated keys.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawVehicle(pub Map<String, JsonValue>);

impl RawVehicle {
    pub fn field(&self, key: &str) -> RawField {
        RawField::from_json(self.0.get(key))
    }

    /// First key in `keys` carrying a value.
    pub fn first_present(&self, keys: &[&str]) -> RawField {
        keys.iter()
            .map(|key| self.field(key))
            .find(|field| !field.is_absent())
            .unwrap_or(RawField::Absent)
    }
}

impl From<JsonValue> for RawVehicle {
    fn from(value: JsonValue) -> Self {
        match value {
            JsonValue::Object(map) => RawVehicle(map),
            _ => RawVehicle::default(),
        }
    }
}

/// One page of the upstream listing endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VehiclePage {
    #[serde(default)]
    pub items: Vec<RawVehicle>,
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub pages: u32,
    /// Response body as received, kept for the raw page archive.
    #[serde(skip)]
    pub raw_body: Option<Vec<u8>>,
}
