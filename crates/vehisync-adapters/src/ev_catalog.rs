//! Built-in electric-vehicle catalog, used before persisted reference data exists.

use vehisync_core::ReferenceDomain;

/// Canonical value with its Catalan, Spanish and English labels.
#[derive(Debug, Clone, Copy)]
pub struct CatalogEntry {
    pub value: &'static str,
    pub labels: [&'static str; 3],
}

const fn entry(value: &'static str, ca: &'static str, es: &'static str, en: &'static str) -> CatalogEntry {
    CatalogEntry {
        value,
        labels: [ca, es, en],
    }
}

const BATTERY_TYPES: &[CatalogEntry] = &[
    entry("ions-liti", "Ions de liti", "Iones de litio", "Lithium-ion"),
    entry("liti-ferrofosfat", "Liti-ferrofosfat (LFP)", "Litio-ferrofosfato (LFP)", "Lithium iron phosphate (LFP)"),
    entry("niquel-manganes-cobalt", "Níquel-manganès-cobalt (NMC)", "Níquel-manganeso-cobalto (NMC)", "Nickel manganese cobalt (NMC)"),
    entry("niquel-hidrur-metallic", "Níquel-hidrur metàl·lic", "Níquel-hidruro metálico", "Nickel-metal hydride"),
    entry("estat-solid", "Estat sòlid", "Estado sólido", "Solid-state"),
];

const CHARGING_CABLES: &[CatalogEntry] = &[
    entry("cable-mode-2", "Cable Mode 2", "Cable Modo 2", "Mode 2 cable"),
    entry("cable-mode-3", "Cable Mode 3", "Cable Modo 3", "Mode 3 cable"),
    entry("cable-schuko", "Cable Schuko", "Cable Schuko", "Schuko cable"),
];

const CONNECTORS: &[CatalogEntry] = &[
    entry("tipus-1", "Tipus 1 (Yazaki)", "Tipo 1 (Yazaki)", "Type 1 (Yazaki)"),
    entry("tipus-2", "Tipus 2 (Mennekes)", "Tipo 2 (Mennekes)", "Type 2 (Mennekes)"),
    entry("ccs-combo", "CCS Combo", "CCS Combo", "CCS Combo"),
    entry("chademo", "CHAdeMO", "CHAdeMO", "CHAdeMO"),
    entry("schuko", "Schuko", "Schuko", "Schuko"),
    entry("tesla-supercharger", "Tesla Supercharger", "Tesla Supercharger", "Tesla Supercharger"),
];

const CHARGING_SPEEDS: &[CatalogEntry] = &[
    entry("carrega-lenta", "Càrrega lenta", "Carga lenta", "Slow charging"),
    entry("carrega-semirapida", "Càrrega semiràpida", "Carga semirrápida", "Semi-fast charging"),
    entry("carrega-rapida", "Càrrega ràpida", "Carga rápida", "Fast charging"),
    entry("carrega-ultrarapida", "Càrrega ultraràpida", "Carga ultrarrápida", "Ultra-fast charging"),
];

const EMISSION_CLASSES: &[CatalogEntry] = &[
    entry("etiqueta-0", "Etiqueta 0 emissions", "Etiqueta 0 emisiones", "Zero emissions label"),
    entry("etiqueta-eco", "Etiqueta ECO", "Etiqueta ECO", "ECO label"),
    entry("etiqueta-c", "Etiqueta C", "Etiqueta C", "C label"),
    entry("etiqueta-b", "Etiqueta B", "Etiqueta B", "B label"),
    entry("sense-etiqueta", "Sense etiqueta", "Sin etiqueta", "No label"),
];

pub fn entries(domain: ReferenceDomain) -> &'static [CatalogEntry] {
    match domain {
        ReferenceDomain::BatteryType => BATTERY_TYPES,
        ReferenceDomain::ChargingCable => CHARGING_CABLES,
        ReferenceDomain::Connector => CONNECTORS,
        ReferenceDomain::ChargingSpeed => CHARGING_SPEEDS,
        ReferenceDomain::EmissionClass => EMISSION_CLASSES,
        _ => &[],
    }
}

/// Exact label match in any display language.
pub fn lookup(domain: ReferenceDomain, label: &str) -> Option<&'static str> {
    let label = label.trim();
    entries(domain)
        .iter()
        .find(|entry| entry.labels.iter().any(|l| *l == label))
        .map(|entry| entry.value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_match_in_every_language() {
        assert_eq!(lookup(ReferenceDomain::ChargingSpeed, "Càrrega ràpida"), Some("carrega-rapida"));
        assert_eq!(lookup(ReferenceDomain::ChargingSpeed, "Carga rápida"), Some("carrega-rapida"));
        assert_eq!(lookup(ReferenceDomain::ChargingSpeed, "Fast charging"), Some("carrega-rapida"));
    }

    #[test]
    fn matching_is_exact_and_domain_scoped() {
        assert_eq!(lookup(ReferenceDomain::ChargingSpeed, "fast charging"), None);
        assert_eq!(lookup(ReferenceDomain::Connector, "Schuko"), Some("schuko"));
        assert_eq!(lookup(ReferenceDomain::ChargingCable, "Schuko"), None);
        assert_eq!(lookup(ReferenceDomain::FuelType, "Etiqueta ECO"), None);
    }
}
