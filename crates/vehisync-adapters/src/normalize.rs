//! Field normalization: total functions from [`RawField`] to canonical values.
//!
//! Nothing in here fails. Malformed input degrades to `None`, `false`, `0` or a
//! best-effort slug.

use tracing::{debug, warn};
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;
use vehisync_core::ReferenceDomain;

use crate::raw::RawField;
use crate::reference::ReferenceSnapshot;

/// Which per-vehicle-kind feature list an extras field feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtrasKind {
    Car,
    Motorcycle,
    Motorhome,
    Cabin,
}

impl ExtrasKind {
    pub const ALL: [ExtrasKind; 4] = [
        ExtrasKind::Car,
        ExtrasKind::Motorcycle,
        ExtrasKind::Motorhome,
        ExtrasKind::Cabin,
    ];

    /// Upstream key carrying this list.
    pub fn source_key(&self) -> &'static str {
        match self {
            ExtrasKind::Car => "extres-cotxe",
            ExtrasKind::Motorcycle => "extres-moto",
            ExtrasKind::Motorhome => "extres-autocaravana",
            ExtrasKind::Cabin => "extres-habitacle",
        }
    }
}

fn format_number(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn present(value: &str) -> Option<String> {
    (!value.trim().is_empty()).then(|| value.to_string())
}

/// Collapse a raw value to one optional string.
///
/// Lists yield their first non-empty element and blank strings mean absent.
/// Anything else passes through as received.
pub fn clean_field_value(value: &RawField) -> Option<String> {
    match value {
        RawField::Absent => None,
        RawField::Scalar(s) => present(s),
        RawField::List(items) => items.iter().find_map(|item| present(item)),
        RawField::Bool(b) => Some(b.to_string()),
        RawField::Num(n) => Some(format_number(*n)),
    }
}

/// Deterministic slug: lowercase ASCII alphanumerics separated by single hyphens.
///
/// Diacritics are stripped (`Dièsel` -> `diesel`), whitespace and hyphen runs
/// become one hyphen, every other character is dropped. Applying it to its own
/// output is a no-op.
pub fn normalize_to_slug(value: &str) -> Option<String> {
    let mut slug = String::with_capacity(value.len());
    let mut pending_separator = false;

    for c in value.to_lowercase().nfd() {
        if is_combining_mark(c) {
            continue;
        }
        if c.is_whitespace() || c == '-' {
            pending_separator = true;
        } else if c.is_ascii_lowercase() || c.is_ascii_digit() {
            if pending_separator && !slug.is_empty() {
                slug.push('-');
            }
            pending_separator = false;
            slug.push(c);
        }
    }

    (!slug.is_empty()).then_some(slug)
}

pub fn field_to_slug(value: &RawField) -> Option<String> {
    clean_field_value(value).and_then(|v| normalize_to_slug(&v))
}

/// Reference lookup first, slugification on a miss.
pub fn convert_label_to_slug(
    value: &RawField,
    domain: ReferenceDomain,
    refs: &ReferenceSnapshot,
) -> Option<String> {
    let label = clean_field_value(value)?;
    label_to_slug(label.trim(), domain, refs)
}

fn label_to_slug(label: &str, domain: ReferenceDomain, refs: &ReferenceSnapshot) -> Option<String> {
    refs.try_resolve(domain, label).or_else(|| {
        let fallback = normalize_to_slug(label);
        warn!(
            %domain,
            label,
            fallback = fallback.as_deref().unwrap_or(""),
            "no reference entry for label; using slug fallback"
        );
        fallback
    })
}

fn list_elements(value: &RawField) -> Vec<String> {
    match value {
        RawField::Absent => Vec::new(),
        RawField::List(items) => items.clone(),
        RawField::Scalar(s) => s.split(',').map(ToString::to_string).collect(),
        RawField::Bool(_) | RawField::Num(_) => clean_field_value(value).into_iter().collect(),
    }
}

/// Per-element [`convert_label_to_slug`] for multi-valued reference fields.
pub fn convert_labels_to_slugs(
    value: &RawField,
    domain: ReferenceDomain,
    refs: &ReferenceSnapshot,
) -> Vec<String> {
    list_elements(value)
        .iter()
        .filter_map(|item| non_empty(item))
        .filter_map(|label| label_to_slug(&label, domain, refs))
        .collect()
}

/// Slugify every element of a feature list, keeping source order and repeats.
pub fn convert_extras_to_slugs(value: &RawField, kind: ExtrasKind) -> Vec<String> {
    let slugs: Vec<String> = list_elements(value)
        .iter()
        .filter_map(|item| normalize_to_slug(item))
        .collect();
    debug!(?kind, count = slugs.len(), "normalized extras");
    slugs
}

/// Non-empty strings in source order, for media lists.
pub fn clean_list(value: &RawField) -> Vec<String> {
    list_elements(value)
        .iter()
        .filter_map(|item| non_empty(item))
        .collect()
}

/// `true`, `"true"`, `1` and `"1"` are true; everything else is false.
pub fn coerce_bool(value: &RawField) -> bool {
    match value {
        RawField::Bool(b) => *b,
        RawField::Num(n) => *n == 1.0,
        RawField::Scalar(s) => {
            let s = s.trim();
            s.eq_ignore_ascii_case("true") || s == "1"
        }
        RawField::List(_) => clean_field_value(value)
            .map(|first| coerce_bool(&RawField::Scalar(first)))
            .unwrap_or(false),
        RawField::Absent => false,
    }
}

fn non_negative_integer(value: f64) -> u32 {
    if value.is_finite() && value > 0.0 {
        value.trunc() as u32
    } else {
        0
    }
}

/// Featured rank: booleans map to 0/1, numbers and numeric strings to a
/// non-negative integer, anything else to 0.
pub fn coerce_featured(value: &RawField) -> u32 {
    match value {
        RawField::Bool(b) => u32::from(*b),
        RawField::Num(n) => non_negative_integer(*n),
        RawField::Scalar(s) => {
            let s = s.trim();
            if s.eq_ignore_ascii_case("true") {
                1
            } else {
                s.parse::<f64>().map(non_negative_integer).unwrap_or(0)
            }
        }
        RawField::List(_) => clean_field_value(value)
            .map(|first| coerce_featured(&RawField::Scalar(first)))
            .unwrap_or(0),
        RawField::Absent => 0,
    }
}

/// Price as a float, 0 when it cannot be parsed.
pub fn coerce_price(value: &RawField) -> f64 {
    match value {
        RawField::Num(n) if n.is_finite() => *n,
        RawField::Num(_) | RawField::Bool(_) | RawField::Absent => 0.0,
        RawField::Scalar(_) | RawField::List(_) => clean_field_value(value)
            .and_then(|s| s.trim().parse::<f64>().ok())
            .filter(|n| n.is_finite())
            .unwrap_or(0.0),
    }
}

/// Warranty flag kept in its historical `"si"` / `"no"` string form.
pub fn coerce_garantia(value: &RawField) -> String {
    let literal_yes = clean_field_value(value)
        .map(|v| matches!(v.trim().to_lowercase().as_str(), "si" | "sí"))
        .unwrap_or(false);
    if coerce_bool(value) || literal_yes {
        "si".to_string()
    } else {
        "no".to_string()
    }
}

/// Digits and decimal point only (`"150 CV"` -> `"150"`).
pub fn coerce_numeric_string(value: &RawField) -> Option<String> {
    let cleaned = clean_field_value(value)?;
    let digits: String = cleaned
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    let digits = digits.trim_matches('.').to_string();
    (!digits.is_empty()).then_some(digits)
}
