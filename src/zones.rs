//! Mapping between device registers and zone records.
//!
//! Each per-zone register is described once in [`ZONE_FIELDS`]; request building,
//! presence detection and extraction are all driven from that table.

use crate::models::touchline::{RawValueMap, RegisterPath, Zone, ZoneDescriptor, ZoneId};
use chrono::{DateTime, Utc};
use log::warn;
use thiserror::Error;

/// Controller-wide status register appended to full-fleet requests.
pub const SYSTEM_STATUS_REGISTER: &str = "SystemStatus";

#[derive(Debug, Clone, PartialEq, Error)]
#[error("register {register} has unusable value {raw:?}: {reason}")]
pub struct FieldConversionError {
    pub register: String,
    pub raw: String,
    pub reason: String,
}

/// Typed value of one converted register.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Celsius(f64),
    Text(String),
}

/// One per-zone register and how it lands on a [`Zone`].
///
/// `convert` returns `Ok(None)` for a value that means "unset", which is skipped
/// without a warning.
pub struct ZoneField {
    pub suffix: &'static str,
    pub convert: fn(&str) -> Result<Option<FieldValue>, String>,
    pub assign: fn(&mut Zone, FieldValue),
}

/// Per-zone registers in request order.
pub const ZONE_FIELDS: &[ZoneField] = &[
    ZoneField {
        suffix: "RaumTemp",
        convert: hundredths_celsius,
        assign: set_current_temperature,
    },
    ZoneField {
        suffix: "SollTemp",
        convert: hundredths_celsius,
        assign: set_target_temperature,
    },
    ZoneField {
        suffix: "name",
        convert: text,
        assign: set_name,
    },
];

const NAME_SUFFIX: &str = "name";

fn hundredths_celsius(raw: &str) -> Result<Option<FieldValue>, String> {
    raw.trim()
        .parse::<i64>()
        .map(|hundredths| Some(FieldValue::Celsius(hundredths as f64 / 100.0)))
        .map_err(|e| e.to_string())
}

fn text(raw: &str) -> Result<Option<FieldValue>, String> {
    Ok((!raw.is_empty()).then(|| FieldValue::Text(raw.to_string())))
}

fn set_current_temperature(zone: &mut Zone, value: FieldValue) {
    if let FieldValue::Celsius(c) = value {
        zone.current_temperature = Some(c);
    }
}

fn set_target_temperature(zone: &mut Zone, value: FieldValue) {
    if let FieldValue::Celsius(c) = value {
        zone.target_temperature = Some(c);
    }
}

fn set_name(zone: &mut Zone, value: FieldValue) {
    if let FieldValue::Text(name) = value {
        zone.name = name;
    }
}

fn register_key(zone: ZoneId, suffix: &'static str) -> String {
    RegisterPath::zone(zone, suffix).to_string()
}

/// Registers requested for a single zone.
pub fn zone_request_items(zone: ZoneId) -> Vec<RegisterPath> {
    ZONE_FIELDS.iter().map(|f| RegisterPath::zone(zone, f.suffix)).collect()
}

/// Registers requested for every zone index below `max_zones`, then the system status.
pub fn build_zone_request_items(max_zones: u32) -> Vec<RegisterPath> {
    let mut items: Vec<RegisterPath> = (0..max_zones).flat_map(|i| zone_request_items(ZoneId(i))).collect();
    items.push(RegisterPath::system(0, SYSTEM_STATUS_REGISTER));
    items
}

/// Zones with at least one register present in `values`, in index order.
pub fn list_available_zones(values: &RawValueMap, max_zones: u32) -> Vec<ZoneDescriptor> {
    (0..max_zones)
        .map(ZoneId)
        .filter(|&id| ZONE_FIELDS.iter().any(|f| values.contains_key(&register_key(id, f.suffix))))
        .map(|id| {
            let name = values
                .get(&register_key(id, NAME_SUFFIX))
                .filter(|n| !n.is_empty())
                .cloned()
                .unwrap_or_else(|| format!("Zone {}", id.index()));
            ZoneDescriptor { id, name }
        })
        .collect()
}

/// Build the zone record for `zone`, stamped with the current time.
pub fn extract_zone_data(values: &RawValueMap, zone: ZoneId) -> Zone {
    extract_zone_data_at(values, zone, Utc::now())
}

/// As [`extract_zone_data`] with an explicit timestamp.
///
/// A register whose value fails conversion is logged and left unset; the rest of
/// the zone is still returned. An empty name keeps the default name silently.
pub fn extract_zone_data_at(values: &RawValueMap, zone: ZoneId, now: DateTime<Utc>) -> Zone {
    let mut record = Zone::new(zone, now);
    for field in ZONE_FIELDS {
        let key = register_key(zone, field.suffix);
        let Some(raw) = values.get(&key) else { continue };
        match convert_field(field, &key, raw) {
            Ok(Some(value)) => (field.assign)(&mut record, value),
            Ok(None) => {}
            Err(e) => warn!("Zone {}: {}", zone, e),
        }
    }
    record
}

fn convert_field(field: &ZoneField, key: &str, raw: &str) -> Result<Option<FieldValue>, FieldConversionError> {
    (field.convert)(raw).map_err(|reason| FieldConversionError {
        register: key.to_string(),
        raw: raw.to_string(),
        reason,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn values(pairs: &[(&str, &str)]) -> RawValueMap {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    fn names(items: &[RegisterPath]) -> Vec<String> {
        items.iter().map(|i| i.to_string()).collect()
    }

    #[test]
    fn extracts_scaled_temperatures_and_name() {
        let v = values(&[("G2.RaumTemp", "2050"), ("G2.SollTemp", "2100"), ("G2.name", "Office")]);
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap();
        let zone = extract_zone_data_at(&v, ZoneId(2), ts);

        assert_eq!(zone.id, ZoneId(2));
        assert_eq!(zone.current_temperature, Some(20.5));
        assert_eq!(zone.target_temperature, Some(21.0));
        assert_eq!(zone.name, "Office");
        assert_eq!(zone.last_updated, ts);
        assert_eq!(zone.last_seen(), ts);
    }

    #[test]
    fn bad_field_leaves_rest_of_zone_intact() {
        let v = values(&[("G2.RaumTemp", "warm"), ("G2.SollTemp", "2100"), ("G2.name", "Office")]);
        let zone = extract_zone_data(&v, ZoneId(2));

        assert_eq!(zone.current_temperature, None);
        assert_eq!(zone.target_temperature, Some(21.0));
        assert_eq!(zone.name, "Office");
    }

    #[test]
    fn missing_registers_fall_back_to_defaults() {
        let v = values(&[("G1.RaumTemp", "1900")]);
        let zone = extract_zone_data(&v, ZoneId(3));

        assert_eq!(zone.name, "Zone G3");
        assert_eq!(zone.current_temperature, None);
        assert_eq!(zone.target_temperature, None);
    }

    #[test]
    fn negative_and_padded_values_convert() {
        let v = values(&[("G0.RaumTemp", "-150"), ("G0.SollTemp", " 2000 ")]);
        let zone = extract_zone_data(&v, ZoneId(0));
        assert_eq!(zone.current_temperature, Some(-1.5));
        assert_eq!(zone.target_temperature, Some(20.0));
    }

    #[test]
    fn empty_name_keeps_default_without_error() {
        let v = values(&[("G1.name", ""), ("G1.RaumTemp", "2000")]);
        let zone = extract_zone_data(&v, ZoneId(1));
        assert_eq!(zone.name, "Zone G1");
        assert_eq!(zone.current_temperature, Some(20.0));

        let name_field = ZONE_FIELDS.iter().find(|f| f.suffix == NAME_SUFFIX).unwrap();
        assert_eq!(convert_field(name_field, "G1.name", ""), Ok(None));
        assert_eq!(
            convert_field(name_field, "G1.name", "Hall"),
            Ok(Some(FieldValue::Text("Hall".to_string())))
        );
    }

    #[test]
    fn conversion_error_names_register_and_value() {
        let err = convert_field(&ZONE_FIELDS[0], "G4.RaumTemp", "21.5").unwrap_err();
        assert_eq!(err.register, "G4.RaumTemp");
        assert_eq!(err.raw, "21.5");
        assert!(err.to_string().contains("G4.RaumTemp"));
    }

    #[test]
    fn lists_only_zones_with_registers() {
        let v = values(&[("G1.name", "Bath")]);
        let zones = list_available_zones(&v, 3);
        assert_eq!(
            zones,
            vec![ZoneDescriptor {
                id: ZoneId(1),
                name: "Bath".to_string()
            }]
        );
    }

    #[test]
    fn listed_zone_without_name_uses_index_name() {
        let v = values(&[("G0.SollTemp", "2000"), ("G4.RaumTemp", "1800"), ("R0.SystemStatus", "1")]);
        let zones = list_available_zones(&v, 7);
        assert_eq!(zones.len(), 2);
        assert_eq!(zones[0].name, "Zone 0");
        assert_eq!(zones[1].id, ZoneId(4));
        assert_eq!(zones[1].index(), 4);
        assert_eq!(zones[1].name, "Zone 4");
    }

    #[test]
    fn zones_beyond_max_are_ignored() {
        let v = values(&[("G5.RaumTemp", "2000")]);
        assert!(list_available_zones(&v, 5).is_empty());
        assert_eq!(list_available_zones(&v, 6).len(), 1);
    }

    #[test]
    fn full_request_lists_zone_registers_then_status() {
        let items = build_zone_request_items(2);
        assert_eq!(
            names(&items),
            [
                "G0.RaumTemp",
                "G0.SollTemp",
                "G0.name",
                "G1.RaumTemp",
                "G1.SollTemp",
                "G1.name",
                "R0.SystemStatus",
            ]
        );
    }

    #[test]
    fn single_zone_request_has_three_registers() {
        assert_eq!(names(&zone_request_items(ZoneId(6))), ["G6.RaumTemp", "G6.SollTemp", "G6.name"]);
    }
}
