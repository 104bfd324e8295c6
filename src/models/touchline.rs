//! Data model for the Roth Touchline read protocol.
//!
//! Notes
//! - Registers are addressed as `<scope><index>.<field>` (`G3.RaumTemp`, `R0.SystemStatus`).
//! - Temperatures arrive as hundredths of a degree Celsius and are stored as `f64` °C.
//! - Timestamps are assigned locally; the device protocol carries none.

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Register name to raw string value, as parsed from one response payload.
///
/// Registers the device did not report are absent; there are no empty entries.
pub type RawValueMap = BTreeMap<String, String>;

// =====================
// Identifiers
// =====================

/// Heating zone identifier; the wrapped value is the zone index.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ZoneId(pub u32);

impl ZoneId {
    pub fn index(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ZoneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "G{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid zone id {0:?}: expected G<index>")]
pub struct ZoneIdError(pub String);

impl FromStr for ZoneId {
    type Err = ZoneIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.strip_prefix('G').ok_or_else(|| ZoneIdError(s.to_string()))?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ZoneIdError(s.to_string()));
        }
        digits.parse::<u32>().map(ZoneId).map_err(|_| ZoneIdError(s.to_string()))
    }
}

impl Serialize for ZoneId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

// =====================
// Registers
// =====================

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum RegisterScope {
    /// Per-zone registers, prefix `G`.
    Zone,
    /// Controller-wide registers, prefix `R`.
    System,
}

impl RegisterScope {
    fn prefix(self) -> char {
        match self {
            RegisterScope::Zone => 'G',
            RegisterScope::System => 'R',
        }
    }
}

/// One addressable device datum.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RegisterPath {
    pub scope: RegisterScope,
    pub index: u32,
    pub field: Cow<'static, str>,
}

impl RegisterPath {
    pub fn zone(zone: ZoneId, field: impl Into<Cow<'static, str>>) -> Self {
        RegisterPath {
            scope: RegisterScope::Zone,
            index: zone.0,
            field: field.into(),
        }
    }

    pub fn system(index: u32, field: impl Into<Cow<'static, str>>) -> Self {
        RegisterPath {
            scope: RegisterScope::System,
            index,
            field: field.into(),
        }
    }
}

impl fmt::Display for RegisterPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}.{}", self.scope.prefix(), self.index, self.field)
    }
}

// =====================
// Zones
// =====================

/// A zone the device reported at least one register for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ZoneDescriptor {
    pub id: ZoneId,
    pub name: String,
}

impl ZoneDescriptor {
    pub fn index(&self) -> u32 {
        self.id.0
    }
}

/// Normalized state of one heating zone.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Zone {
    pub id: ZoneId,
    pub name: String,
    /// Measured room temperature, °C.
    pub current_temperature: Option<f64>,
    /// Setpoint, °C.
    pub target_temperature: Option<f64>,
    pub last_updated: DateTime<Utc>,
}

impl Zone {
    /// An empty record carrying the fallback display name.
    pub fn new(id: ZoneId, last_updated: DateTime<Utc>) -> Self {
        Zone {
            id,
            name: format!("Zone {}", id),
            current_temperature: None,
            target_temperature: None,
            last_updated,
        }
    }

    /// When the device last answered for this zone.
    pub fn last_seen(&self) -> DateTime<Utc> {
        self.last_updated
    }
}

/// Full zone state as of one successful poll. Replaced wholesale, never patched.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ZoneSnapshot {
    pub refreshed_at: Option<DateTime<Utc>>,
    pub zones: BTreeMap<ZoneId, Zone>,
}

impl ZoneSnapshot {
    pub fn new(refreshed_at: DateTime<Utc>, zones: impl IntoIterator<Item = Zone>) -> Self {
        ZoneSnapshot {
            refreshed_at: Some(refreshed_at),
            zones: zones.into_iter().map(|z| (z.id, z)).collect(),
        }
    }

    pub fn get(&self, id: ZoneId) -> Option<&Zone> {
        self.zones.get(&id)
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn zone_id_round_trips_through_text() {
        assert_eq!("G0".parse::<ZoneId>(), Ok(ZoneId(0)));
        assert_eq!("G13".parse::<ZoneId>(), Ok(ZoneId(13)));
        assert_eq!(ZoneId(4).to_string(), "G4");
    }

    #[test]
    fn zone_id_rejects_malformed_text() {
        for bad in ["", "G", "3", "R3", "G-1", "G+1", "G1a", "g1"] {
            assert!(bad.parse::<ZoneId>().is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn register_paths_render_wire_names() {
        assert_eq!(RegisterPath::zone(ZoneId(3), "RaumTemp").to_string(), "G3.RaumTemp");
        assert_eq!(RegisterPath::system(0, "SystemStatus").to_string(), "R0.SystemStatus");
    }

    #[test]
    fn snapshot_serializes_with_zone_id_keys() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let mut zone = Zone::new(ZoneId(2), ts);
        zone.current_temperature = Some(20.5);
        let snapshot = ZoneSnapshot::new(ts, [zone]);

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["zones"]["G2"]["id"], "G2");
        assert_eq!(json["zones"]["G2"]["name"], "Zone G2");
        assert_eq!(json["zones"]["G2"]["current_temperature"], 20.5);
        assert!(json["zones"]["G2"]["target_temperature"].is_null());
    }
}
