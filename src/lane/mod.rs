//! Lanes
//!
//! A lane is one spool feeding filament towards the hub. Its two sensors
//! (prep at the entry, load at the drive gear) form a small sub-state
//! machine: new filament at prep is advanced until the load sensor trips.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::{BufferId, ExtruderId, HubRef, LaneConfig, LaneId, LaneRefs, Settings, UnitId};
use crate::espooler::Espooler;
use crate::indicator::LedAddress;
use crate::sensor::EventThrottle;

/// Lane status as shown to users and persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LaneStatus {
    #[default]
    None,
    Loaded,
    Tooled,
    ToolLoading,
    ToolUnloading,
    HubLoading,
    Ejecting,
    Calibrating,
    Error,
}

impl fmt::Display for LaneStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LaneStatus::None => "None",
            LaneStatus::Loaded => "Loaded",
            LaneStatus::Tooled => "Tooled",
            LaneStatus::ToolLoading => "Tool Loading",
            LaneStatus::ToolUnloading => "Tool Unloading",
            LaneStatus::HubLoading => "HUB Loading",
            LaneStatus::Ejecting => "Ejecting",
            LaneStatus::Calibrating => "Calibrating",
            LaneStatus::Error => "Error",
        };
        write!(f, "{}", name)
    }
}

/// Spool metadata attached to a lane.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Spool {
    pub spool_id: Option<u32>,
    pub material: Option<String>,
    /// `#rrggbb`
    pub color: Option<String>,
    /// Remaining weight in grams.
    pub weight: Option<f64>,
    pub extruder_temp: Option<f64>,
}

/// What a prep edge asks the orchestrator to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrepAction {
    /// Filament at prep only: advance to the load sensor.
    Advance,
    /// Both sensors see filament.
    MarkLoaded,
    /// Filament removed from an idle lane.
    Cleared,
    Ignore,
}

/// One filament lane.
#[derive(Debug)]
pub struct Lane {
    pub id: LaneId,
    pub name: String,
    pub unit: UnitId,
    /// Position within the unit, used by selectors.
    pub index: usize,
    pub hub: HubRef,
    pub extruder: ExtruderId,
    pub buffer: Option<BufferId>,

    pub prep_state: bool,
    pub load_state: bool,
    pub status: LaneStatus,
    /// Filament parked just before the hub.
    pub loaded_to_hub: bool,
    pub tool_loaded: bool,

    pub spool: Spool,
    pub runout_lane: Option<LaneId>,
    /// Tool command alias (`T0`, `T1`, ...).
    pub map: String,
    pub led: LedAddress,

    /// Load sensor to hub distance (mm).
    pub dist_hub: f64,
    pub park_dist: f64,
    /// Bowden length for lanes without a hub.
    pub bowden_length: Option<f64>,
    /// Advance new filament up to the hub after prep.
    pub load_to_hub: bool,
    pub espooler: Option<Espooler>,

    pub(crate) prep_throttle: EventThrottle,
    pub(crate) prep_busy: bool,
}

impl Lane {
    pub fn new(
        id: LaneId,
        config: &LaneConfig,
        refs: &LaneRefs,
        settings: &Settings,
        led_chain: &str,
    ) -> Self {
        Self {
            id,
            name: config.name.clone(),
            unit: refs.unit,
            index: refs.index,
            hub: refs.hub,
            extruder: refs.extruder,
            buffer: refs.buffer,
            prep_state: false,
            load_state: false,
            status: LaneStatus::None,
            loaded_to_hub: false,
            tool_loaded: false,
            spool: Spool {
                extruder_temp: config.extruder_temp,
                ..Default::default()
            },
            runout_lane: refs.runout,
            map: refs.map.clone(),
            led: LedAddress {
                chain: led_chain.to_string(),
                index: config.led_index.unwrap_or(refs.index),
            },
            dist_hub: config.dist_hub,
            park_dist: config.park_dist,
            bowden_length: config.bowden_length,
            load_to_hub: config.load_to_hub.unwrap_or(settings.load_to_hub),
            espooler: config.espooler.clone().map(Espooler::new),
            prep_throttle: EventThrottle::new(settings.prep_min_interval),
            prep_busy: false,
        }
    }

    pub fn is_direct(&self) -> bool {
        self.hub == HubRef::Direct
    }

    /// Ready to be loaded into the toolhead.
    pub fn is_ready(&self) -> bool {
        self.prep_state && self.load_state
    }

    /// Decide how to react to the current sensor levels after a prep edge.
    pub fn prep_action(&self, prep_done: bool) -> PrepAction {
        match (self.prep_state, self.load_state) {
            (true, true) if self.status != LaneStatus::Tooled => PrepAction::MarkLoaded,
            (true, false) if prep_done && !self.tool_loaded => PrepAction::Advance,
            (false, _) if !self.tool_loaded => PrepAction::Cleared,
            _ => PrepAction::Ignore,
        }
    }
}

/// One-line ASCII rendering of a lane's filament path, used in failure
/// diagnostics. `None` marks sensors the path does not have.
pub fn sensor_path(
    lane: &str,
    prep: bool,
    load: bool,
    hub: Option<bool>,
    tool: Option<bool>,
) -> String {
    let mark = |state: bool| if state { "#" } else { "-" };
    let mut path = format!("{} [prep {}]=[load {}]", lane, mark(prep), mark(load));
    match hub {
        Some(state) => path.push_str(&format!("=[hub {}]", mark(state))),
        None => path.push_str("=[direct]"),
    }
    match tool {
        Some(state) => path.push_str(&format!("=[tool {}]", mark(state))),
        None => path.push_str("=[tool ?]"),
    }
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HubId;

    fn lane() -> Lane {
        let refs = LaneRefs {
            unit: UnitId(0),
            index: 2,
            hub: HubRef::Hub(HubId(0)),
            extruder: ExtruderId(0),
            buffer: None,
            map: "T2".to_string(),
            runout: None,
        };
        let config = LaneConfig {
            name: "lane3".to_string(),
            unit: "Turtle_1".to_string(),
            ..Default::default()
        };
        Lane::new(LaneId(2), &config, &refs, &Settings::default(), "Turtle_1")
    }

    #[test]
    fn test_new_lane_from_refs() {
        let lane = lane();
        assert_eq!(lane.map, "T2");
        assert_eq!(lane.led.index, 2);
        assert!(lane.load_to_hub);
        assert!(!lane.is_direct());
        assert_eq!(lane.status, LaneStatus::None);
    }

    #[test]
    fn test_prep_action_decisions() {
        let mut lane = lane();
        lane.prep_state = true;
        assert_eq!(lane.prep_action(false), PrepAction::Ignore);
        assert_eq!(lane.prep_action(true), PrepAction::Advance);

        lane.load_state = true;
        assert_eq!(lane.prep_action(true), PrepAction::MarkLoaded);

        lane.prep_state = false;
        assert_eq!(lane.prep_action(true), PrepAction::Cleared);

        lane.tool_loaded = true;
        assert_eq!(lane.prep_action(true), PrepAction::Ignore);
    }

    #[test]
    fn test_status_display() {
        assert_eq!(LaneStatus::HubLoading.to_string(), "HUB Loading");
        assert_eq!(LaneStatus::Tooled.to_string(), "Tooled");
    }

    #[test]
    fn test_sensor_path_render() {
        assert_eq!(
            sensor_path("lane1", true, true, Some(false), None),
            "lane1 [prep #]=[load #]=[hub -]=[tool ?]"
        );
        assert_eq!(
            sensor_path("lane4", true, false, None, Some(true)),
            "lane4 [prep #]=[load -]=[direct]=[tool #]"
        );
    }
}
