//! Persisted snapshot
//!
//! Layout written to the state store:
//!
//! ```text
//! { "<unit>": { "<lane>": { index, material, color, ... } },
//!   "system": { current_load, num_units, num_lanes, extruders, ... } }
//! ```
//!
//! Unit sections sit next to `system` at the top level. Unknown keys are
//! ignored when reading so older or newer files still load.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;
use crate::lane::LaneStatus;

/// Top-level key of the system section. Units may not use this name.
pub const SYSTEM_KEY: &str = "system";

/// Persisted state of one lane.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LaneSnapshot {
    pub index: usize,
    pub material: Option<String>,
    pub color: Option<String>,
    pub spool_id: Option<u32>,
    pub weight: Option<f64>,
    pub extruder_temp: Option<f64>,
    pub tool_loaded: bool,
    pub hub_loaded: bool,
    pub map: String,
    pub runout_lane: Option<String>,
    pub status: LaneStatus,
    pub prep: bool,
    pub load: bool,
}

/// Persisted state of one extruder.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtruderSnapshot {
    pub lane_loaded: Option<String>,
    pub tool_start_status: bool,
    pub tool_end_status: bool,
    pub buffer: Option<String>,
    pub buffer_status: Option<String>,
}

/// Toolchange counters.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolchangeSnapshot {
    /// Expected number of changes in the current print, if set.
    pub total: Option<u32>,
    pub current: u32,
    pub last_tool: Option<String>,
}

/// Results of `CALIBRATE_AFC`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationSnapshot {
    /// Lane name to measured load-sensor-to-hub distance.
    pub dist_hub: BTreeMap<String, f64>,
    /// Hub (or direct lane) name to measured bowden length.
    pub bowden_length: BTreeMap<String, f64>,
}

impl CalibrationSnapshot {
    pub fn is_empty(&self) -> bool {
        self.dist_hub.is_empty() && self.bowden_length.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemSnapshot {
    pub current_load: Option<String>,
    pub num_units: usize,
    pub num_lanes: usize,
    pub num_extruders: usize,
    pub extruders: BTreeMap<String, ExtruderSnapshot>,
    pub toolchanges: ToolchangeSnapshot,
    pub calibration: CalibrationSnapshot,
    pub saved_at: Option<DateTime<Utc>>,
}

/// Whole persisted document.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Snapshot {
    /// Unit name to lane name to lane state.
    pub units: BTreeMap<String, BTreeMap<String, LaneSnapshot>>,
    pub system: SystemSnapshot,
}

impl Snapshot {
    /// Lane state by lane name, searching every unit.
    pub fn lane(&self, name: &str) -> Option<(&str, &LaneSnapshot)> {
        self.units.iter().find_map(|(unit, lanes)| {
            lanes.get(name).map(|lane| (unit.as_str(), lane))
        })
    }

    /// Names of lanes recorded as loaded in the toolhead, in unit order.
    pub fn tool_loaded_lanes(&self) -> Vec<&str> {
        self.units
            .values()
            .flat_map(|lanes| lanes.iter())
            .filter(|(_, lane)| lane.tool_loaded)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    pub fn to_value(&self) -> Result<Value> {
        let mut root = Map::new();
        for (unit, lanes) in &self.units {
            root.insert(unit.clone(), serde_json::to_value(lanes)?);
        }
        root.insert(SYSTEM_KEY.to_string(), serde_json::to_value(&self.system)?);
        Ok(Value::Object(root))
    }

    /// Parse a stored document. Sections that cannot be read are skipped
    /// with a warning rather than failing the whole load.
    pub fn from_value(value: &Value) -> Result<Self> {
        let mut snapshot = Snapshot::default();
        let Some(root) = value.as_object() else {
            warn!("Persisted state is not an object, ignoring it");
            return Ok(snapshot);
        };

        for (key, section) in root {
            if key == SYSTEM_KEY {
                snapshot.system = serde_json::from_value(section.clone())?;
                continue;
            }
            let Some(lanes) = section.as_object() else {
                continue;
            };
            let mut unit = BTreeMap::new();
            for (lane, state) in lanes {
                match serde_json::from_value::<LaneSnapshot>(state.clone()) {
                    Ok(parsed) => {
                        unit.insert(lane.clone(), parsed);
                    }
                    Err(e) => warn!("Ignoring persisted state of {}.{}: {}", key, lane, e),
                }
            }
            snapshot.units.insert(key.clone(), unit);
        }

        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn sample() -> Snapshot {
        let mut snapshot = Snapshot::default();
        let mut lanes = BTreeMap::new();
        lanes.insert(
            "lane1".to_string(),
            LaneSnapshot {
                index: 0,
                material: Some("PLA".to_string()),
                color: Some("#ff0000".to_string()),
                tool_loaded: true,
                hub_loaded: true,
                map: "T0".to_string(),
                status: LaneStatus::Tooled,
                prep: true,
                load: true,
                ..Default::default()
            },
        );
        lanes.insert(
            "lane2".to_string(),
            LaneSnapshot {
                index: 1,
                map: "T1".to_string(),
                runout_lane: Some("lane1".to_string()),
                ..Default::default()
            },
        );
        snapshot.units.insert("Turtle_1".to_string(), lanes);
        snapshot.system.current_load = Some("lane1".to_string());
        snapshot.system.num_units = 1;
        snapshot.system.num_lanes = 2;
        snapshot
    }

    #[test]
    fn test_layout_has_units_beside_system() {
        let value = sample().to_value().unwrap();
        assert_eq!(value["Turtle_1"]["lane1"]["status"], "Tooled");
        assert_eq!(value["Turtle_1"]["lane2"]["runout_lane"], "lane1");
        assert_eq!(value["system"]["current_load"], "lane1");
    }

    #[test]
    fn test_value_round_trip() {
        let snapshot = sample();
        let restored = Snapshot::from_value(&snapshot.to_value().unwrap()).unwrap();
        assert_eq!(restored, snapshot);
    }

    #[test]
    fn test_unknown_keys_ignored() {
        let value = json!({
            "Turtle_1": {
                "lane1": {"map": "T0", "tool_loaded": true, "future_field": 3},
                "lane2": {"status": "NotAStatus"}
            },
            "version": 2,
            "system": {"current_load": "lane1", "extra": {"a": 1}}
        });
        let snapshot = Snapshot::from_value(&value).unwrap();
        assert_eq!(snapshot.tool_loaded_lanes(), vec!["lane1"]);
        assert!(snapshot.lane("lane2").is_none());
        assert_eq!(snapshot.lane("lane1").unwrap().0, "Turtle_1");
    }
}
