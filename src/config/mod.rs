//! Configuration
//!
//! The AFC configuration is a single JSON document. Every section falls back
//! to defaults so a minimal file only needs to name units, hubs, extruders and
//! lanes. Cross-references between sections are checked by [`Registry`].

mod registry;

pub use registry::{BufferId, ExtruderId, HubId, HubRef, LaneId, LaneRefs, Registry, UnitId};

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{AfcError, Result};

/// Lane hub value meaning "feeds the toolhead directly, no hub".
pub const DIRECT_HUB: &str = "direct";

/// Runout lane value meaning "no fallback lane".
pub const NO_RUNOUT_LANE: &str = "NONE";

/// Complete AFC configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AfcConfig {
    /// Global motion and behaviour settings.
    pub settings: Settings,

    /// Tip forming parameters used when no tip forming macro is set.
    pub tip_forming: TipFormingConfig,

    /// Indicator colours.
    pub leds: LedConfig,

    /// Units, in declaration order.
    pub units: Vec<UnitConfig>,

    /// Hubs shared by lanes of a unit.
    pub hubs: Vec<HubConfig>,

    /// Toolhead-side adapters.
    pub extruders: Vec<ExtruderConfig>,

    /// Tension compensators.
    pub buffers: Vec<BufferConfig>,

    /// Lanes, in declaration order (this order assigns default tool maps).
    pub lanes: Vec<LaneConfig>,
}

impl AfcConfig {
    /// Load a configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| AfcError::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: AfcConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Resolve every cross-reference and check value ranges.
    pub fn validate(&self) -> Result<Registry> {
        self.settings.validate()?;
        for lane in &self.lanes {
            if let Some(espooler) = &lane.espooler {
                espooler.validate(&lane.name)?;
            }
        }
        Registry::resolve(self)
    }

    /// Look up a lane configuration by name.
    pub fn lane(&self, name: &str) -> Option<&LaneConfig> {
        self.lanes.iter().find(|l| l.name == name)
    }
}

/// Post-load macro steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostLoadStep {
    Purge,
    Wipe,
    Kick,
}

/// Global settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Speed for long moves (mm/s).
    pub long_moves_speed: f64,
    /// Acceleration for long moves (mm/s^2).
    pub long_moves_accel: f64,
    /// Speed for short moves (mm/s).
    pub short_moves_speed: f64,
    /// Acceleration for short moves (mm/s^2).
    pub short_moves_accel: f64,
    /// Step used by bounded short-move loops (mm).
    pub short_move_dis: f64,
    /// Hub distances above this use long move speeds (mm).
    pub long_move_threshold: f64,

    /// Advance newly inserted filament up to the hub.
    pub load_to_hub: bool,
    /// Step used while advancing from prep to load sensor (mm).
    pub prep_step: f64,
    /// Maximum prep advance moves before the lane is faulted.
    pub prep_max_attempts: u32,
    /// Minimum seconds between handled prep edges.
    pub prep_min_interval: f64,
    /// Sensor debounce window in seconds (0 passes edges through).
    pub debounce_delay: f64,

    /// Maximum moves while pushing filament past the hub.
    pub max_hub_attempts: u32,
    /// Maximum moves while searching for the toolhead sensor.
    pub max_tool_attempts: u32,
    /// Maximum station retracts while unloading the toolhead.
    pub tool_max_unload_attempts: u32,

    /// Retract before unloading to stop oozing (mm).
    pub pre_unload_retract: f64,
    /// Z lift applied before unloading (mm).
    pub z_hop: f64,
    /// XY speed used when restoring position (mm/s).
    pub resume_speed: f64,
    /// Z speed used when restoring position (mm/s).
    pub resume_z_speed: f64,

    /// Run the tool cut macro before unloading.
    pub tool_cut: bool,
    pub tool_cut_cmd: String,
    /// Run the park macro after cutting.
    pub park: bool,
    pub park_cmd: String,
    /// Form a tip before unloading.
    pub form_tip: bool,
    /// Macro replacing the built-in tip forming routine.
    pub form_tip_cmd: Option<String>,

    pub poop: bool,
    pub poop_cmd: String,
    pub wipe: bool,
    pub wipe_cmd: String,
    pub kick: bool,
    pub kick_cmd: String,
    /// Order in which enabled post-load macros run.
    pub post_load_sequence: Vec<PostLoadStep>,

    /// Material name to extrusion temperature.
    pub default_material_temps: BTreeMap<String, f64>,
    /// Extruder minimum extrusion temperature, used as fallback target.
    pub min_extrude_temp: f64,
    /// Heater tolerance band around the target (degrees).
    pub temp_tolerance: f64,

    /// Eject the exhausted lane after an infinite-spool handoff.
    pub unload_on_runout: bool,
}

impl Default for Settings {
    fn default() -> Self {
        let mut temps = BTreeMap::new();
        temps.insert("PLA".to_string(), 210.0);
        temps.insert("PETG".to_string(), 235.0);
        temps.insert("ABS".to_string(), 235.0);
        temps.insert("ASA".to_string(), 235.0);
        temps.insert("TPU".to_string(), 225.0);

        Self {
            long_moves_speed: 100.0,
            long_moves_accel: 400.0,
            short_moves_speed: 25.0,
            short_moves_accel: 400.0,
            short_move_dis: 10.0,
            long_move_threshold: 200.0,
            load_to_hub: true,
            prep_step: 10.0,
            prep_max_attempts: 40,
            prep_min_interval: 1.0,
            debounce_delay: 0.0,
            max_hub_attempts: 20,
            max_tool_attempts: 20,
            tool_max_unload_attempts: 2,
            pre_unload_retract: 2.0,
            z_hop: 5.0,
            resume_speed: 120.0,
            resume_z_speed: 30.0,
            tool_cut: false,
            tool_cut_cmd: "AFC_CUT".to_string(),
            park: false,
            park_cmd: "AFC_PARK".to_string(),
            form_tip: false,
            form_tip_cmd: None,
            poop: false,
            poop_cmd: "AFC_POOP".to_string(),
            wipe: false,
            wipe_cmd: "AFC_BRUSH".to_string(),
            kick: false,
            kick_cmd: "AFC_KICK".to_string(),
            post_load_sequence: vec![
                PostLoadStep::Purge,
                PostLoadStep::Wipe,
                PostLoadStep::Kick,
                PostLoadStep::Wipe,
            ],
            default_material_temps: temps,
            min_extrude_temp: 170.0,
            temp_tolerance: 5.0,
            unload_on_runout: true,
        }
    }
}

impl Settings {
    fn validate(&self) -> Result<()> {
        let positive = [
            ("long_moves_speed", self.long_moves_speed),
            ("short_moves_speed", self.short_moves_speed),
            ("short_move_dis", self.short_move_dis),
            ("prep_step", self.prep_step),
        ];
        for (field, value) in positive {
            if value <= 0.0 {
                return Err(AfcError::InvalidConfig {
                    field: field.to_string(),
                    reason: format!("must be positive, got {}", value),
                });
            }
        }
        let caps = [
            ("prep_max_attempts", self.prep_max_attempts),
            ("max_hub_attempts", self.max_hub_attempts),
            ("max_tool_attempts", self.max_tool_attempts),
            ("tool_max_unload_attempts", self.tool_max_unload_attempts),
        ];
        for (field, value) in caps {
            if value == 0 {
                return Err(AfcError::InvalidConfig {
                    field: field.to_string(),
                    reason: "retry caps must be at least 1".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Macro name for a post-load step, if that step is enabled.
    pub fn post_load_macro(&self, step: PostLoadStep) -> Option<&str> {
        match step {
            PostLoadStep::Purge if self.poop => Some(&self.poop_cmd),
            PostLoadStep::Wipe if self.wipe => Some(&self.wipe_cmd),
            PostLoadStep::Kick if self.kick => Some(&self.kick_cmd),
            _ => None,
        }
    }

    /// Speed and acceleration for a move of the given length.
    pub fn move_profile(&self, distance: f64) -> (f64, f64) {
        if distance.abs() > self.long_move_threshold {
            (self.long_moves_speed, self.long_moves_accel)
        } else {
            (self.short_moves_speed, self.short_moves_accel)
        }
    }
}

/// Built-in tip forming parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TipFormingConfig {
    /// Volume rammed before unloading (mm^3), 0 disables ramming.
    pub ramming_volume: f64,
    /// Temperature to switch to while forming the tip, 0 keeps the current one.
    pub toolchange_temp: f64,
    pub unloading_speed_start: f64,
    pub unloading_speed: f64,
    pub cooling_tube_position: f64,
    pub cooling_tube_length: f64,
    pub initial_cooling_speed: f64,
    pub final_cooling_speed: f64,
    pub cooling_moves: u32,
    pub use_skinnydip: bool,
    pub skinnydip_distance: f64,
    pub dip_insertion_speed: f64,
    pub dip_extraction_speed: f64,
    pub melt_zone_pause: f64,
    pub cooling_zone_pause: f64,
}

impl Default for TipFormingConfig {
    fn default() -> Self {
        Self {
            ramming_volume: 0.0,
            toolchange_temp: 0.0,
            unloading_speed_start: 40.0,
            unloading_speed: 15.0,
            cooling_tube_position: 35.0,
            cooling_tube_length: 10.0,
            initial_cooling_speed: 10.0,
            final_cooling_speed: 50.0,
            cooling_moves: 4,
            use_skinnydip: false,
            skinnydip_distance: 4.0,
            dip_insertion_speed: 4.0,
            dip_extraction_speed: 4.0,
            melt_zone_pause: 4.0,
            cooling_zone_pause: 0.0,
        }
    }
}

/// Indicator colours as `"r,g,b,w"` (0..1) or `#rrggbb`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedConfig {
    pub fault: String,
    pub ready: String,
    pub not_ready: String,
    pub loading: String,
    pub unloading: String,
    pub tool_loaded: String,
    pub prep_loaded: String,
    pub selected: String,
}

impl Default for LedConfig {
    fn default() -> Self {
        Self {
            fault: "1,0,0,0".to_string(),
            ready: "0,0.8,0,0".to_string(),
            not_ready: "0,0,0,0".to_string(),
            loading: "1,1,1,0".to_string(),
            unloading: "1,1,0.5,0".to_string(),
            tool_loaded: "0,0,1,0".to_string(),
            prep_loaded: "1,1,0,0".to_string(),
            selected: "0,1,1,0".to_string(),
        }
    }
}

/// Hardware family of a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitKind {
    /// Every lane has its own drive and all lanes share one hub.
    #[default]
    SharedHub,
    /// A rotating cam engages one lane at a time.
    CamSelector,
}

/// A group of lanes sharing a hub.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UnitConfig {
    pub name: String,
    pub kind: UnitKind,
    /// Default hub for lanes of this unit.
    pub hub: Option<String>,
    /// Default extruder for lanes of this unit.
    pub extruder: Option<String>,
    /// Default buffer for lanes of this unit.
    pub buffer: Option<String>,
    /// LED chain name (defaults to the unit name).
    pub led_chain: Option<String>,
}

/// Hub junction and optional cutter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    pub name: String,
    /// Tube length between hub and toolhead entry (mm).
    pub bowden_length: f64,
    /// First step when pushing past the hub sensor (mm).
    pub clear_step: f64,
    /// Cutter parameters, `None` when the hub has no cutter.
    pub cutter: Option<CutterConfig>,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            bowden_length: 900.0,
            clear_step: 65.0,
            cutter: None,
        }
    }
}

/// Hub cutter servo parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CutterConfig {
    /// Step while advancing to the hub sensor (mm).
    pub cut_step: f64,
    /// Feed after normalising position, before clipping (mm).
    pub cut_dist: f64,
    /// Retract after the cut (mm).
    pub cut_clear: f64,
    pub prep_angle: f64,
    pub clip_angle: f64,
    pub pass_angle: f64,
    /// Clip a second time.
    pub cut_confirm: bool,
    /// Seconds to let the servo finish moving.
    pub settle_time: f64,
}

impl Default for CutterConfig {
    fn default() -> Self {
        Self {
            cut_step: 5.0,
            cut_dist: 50.0,
            cut_clear: 120.0,
            prep_angle: 75.0,
            clip_angle: 160.0,
            pass_angle: 0.0,
            cut_confirm: false,
            settle_time: 0.5,
        }
    }
}

/// How the toolhead detects filament.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolSensorMode {
    /// No sensor, trust the bowden length.
    None,
    /// Discrete switch before the extruder gears.
    #[default]
    Switch,
    /// Buffer compression stands in for a switch (ram sensing).
    Buffer,
}

/// Toolhead-side adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtruderConfig {
    pub name: String,
    pub tool_start: ToolSensorMode,
    /// Whether a sensor after the extruder gears is fitted.
    pub tool_end: bool,
    /// Buffer used for ram sensing.
    pub buffer: Option<String>,
    /// Insertion distance from the tool sensor to the nozzle (mm).
    pub tool_stn: f64,
    /// Retract distance per unload attempt (mm).
    pub tool_stn_unload: f64,
    pub tool_load_speed: f64,
    pub tool_unload_speed: f64,
}

impl Default for ExtruderConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            tool_start: ToolSensorMode::Switch,
            tool_end: false,
            buffer: None,
            tool_stn: 72.0,
            tool_stn_unload: 100.0,
            tool_load_speed: 25.0,
            tool_unload_speed: 25.0,
        }
    }
}

/// Buffer variants.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BufferKindConfig {
    /// Dual sensor buffer driving the lane rotation distance.
    Turtleneck {
        #[serde(default = "default_multiplier_high")]
        multiplier_high: f64,
        #[serde(default = "default_multiplier_low")]
        multiplier_low: f64,
    },
    /// Single sensor buffer pushing filament on trigger.
    Belay {
        #[serde(default = "default_belay_distance")]
        distance: f64,
        #[serde(default = "default_belay_velocity")]
        velocity: f64,
        #[serde(default = "default_belay_accel")]
        accel: f64,
    },
}

fn default_multiplier_high() -> f64 {
    1.1
}

fn default_multiplier_low() -> f64 {
    0.9
}

fn default_belay_distance() -> f64 {
    5.0
}

fn default_belay_velocity() -> f64 {
    25.0
}

fn default_belay_accel() -> f64 {
    400.0
}

/// Tension compensator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferConfig {
    pub name: String,
    #[serde(flatten)]
    pub kind: BufferKindConfig,
}

/// Espooler assist motor parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EspoolerConfig {
    /// Extruder advance that triggers one assist pulse (mm).
    pub delta_movement: f64,
    /// Filament paid out per assist pulse (mm).
    pub mm_movement: f64,
    /// Filament paid out per spool rotation (mm).
    pub mm_per_rotation: f64,
    /// Motor cycles (ms at cruise duty) for one rotation.
    pub cycles_per_rotation: f64,
    /// Cruise duty cycle (0..1).
    pub pwm_value: f64,
    pub enable_kick_start: bool,
    /// Full-duty kick before cruising (s).
    pub kick_start_time: f64,
    /// Multiplier applied to the cruise time.
    pub scaling: f64,
}

impl Default for EspoolerConfig {
    fn default() -> Self {
        Self {
            delta_movement: 150.0,
            mm_movement: 50.0,
            mm_per_rotation: 245.0,
            cycles_per_rotation: 800.0,
            pwm_value: 0.6,
            enable_kick_start: true,
            kick_start_time: 0.070,
            scaling: 1.0,
        }
    }
}

impl EspoolerConfig {
    fn validate(&self, lane: &str) -> Result<()> {
        let positive = [
            ("delta_movement", self.delta_movement),
            ("mm_per_rotation", self.mm_per_rotation),
            ("cycles_per_rotation", self.cycles_per_rotation),
        ];
        for (field, value) in positive {
            if value <= 0.0 {
                return Err(AfcError::InvalidConfig {
                    field: format!("{}.espooler.{}", lane, field),
                    reason: format!("must be positive, got {}", value),
                });
            }
        }
        if !(0.0..=1.0).contains(&self.pwm_value) {
            return Err(AfcError::InvalidConfig {
                field: format!("{}.espooler.pwm_value", lane),
                reason: format!("duty cycle must be between 0 and 1, got {}", self.pwm_value),
            });
        }
        if self.mm_movement < 0.0 || self.scaling < 0.0 {
            return Err(AfcError::InvalidConfig {
                field: format!("{}.espooler", lane),
                reason: "mm_movement and scaling must not be negative".to_string(),
            });
        }
        Ok(())
    }
}

/// One filament lane.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LaneConfig {
    pub name: String,
    pub unit: String,
    /// Position within the unit (defaults to declaration order in the unit).
    pub index: Option<usize>,
    /// Hub name or `"direct"`, defaults to the unit hub.
    pub hub: Option<String>,
    pub extruder: Option<String>,
    pub buffer: Option<String>,
    /// Load sensor to hub distance (mm).
    pub dist_hub: f64,
    /// Final retract after ejecting (mm).
    pub park_dist: f64,
    /// Bowden length for direct lanes (mm).
    pub bowden_length: Option<f64>,
    /// Override of the global `load_to_hub`.
    pub load_to_hub: Option<bool>,
    /// Tool command alias, defaults to `T<n>`.
    pub map: Option<String>,
    pub runout_lane: Option<String>,
    pub led_index: Option<usize>,
    /// Extrusion temperature override.
    pub extruder_temp: Option<f64>,
    pub espooler: Option<EspoolerConfig>,
}

impl Default for LaneConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            unit: String::new(),
            index: None,
            hub: None,
            extruder: None,
            buffer: None,
            dist_hub: 60.0,
            park_dist: 10.0,
            bowden_length: None,
            load_to_hub: None,
            map: None,
            runout_lane: None,
            led_index: None,
            extruder_temp: None,
            espooler: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let json = r#"{
            "units": [{"name": "Turtle_1", "hub": "hub1", "extruder": "extruder"}],
            "hubs": [{"name": "hub1"}],
            "extruders": [{"name": "extruder"}],
            "lanes": [{"name": "lane1", "unit": "Turtle_1"}]
        }"#;
        let config: AfcConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.settings.prep_max_attempts, 40);
        assert_eq!(config.hubs[0].bowden_length, 900.0);
        assert_eq!(config.lanes[0].dist_hub, 60.0);
        assert_eq!(config.extruders[0].tool_start, ToolSensorMode::Switch);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_buffer_kind_tagged() {
        let json = r#"{"name": "TN", "type": "turtleneck", "multiplier_high": 1.2}"#;
        let buffer: BufferConfig = serde_json::from_str(json).unwrap();
        match buffer.kind {
            BufferKindConfig::Turtleneck {
                multiplier_high,
                multiplier_low,
            } => {
                assert_eq!(multiplier_high, 1.2);
                assert_eq!(multiplier_low, 0.9);
            }
            _ => panic!("expected turtleneck"),
        }
    }

    #[test]
    fn test_move_profile_threshold() {
        let settings = Settings::default();
        assert_eq!(settings.move_profile(60.0).0, settings.short_moves_speed);
        assert_eq!(settings.move_profile(-900.0).0, settings.long_moves_speed);
    }

    #[test]
    fn test_post_load_macro_respects_flags() {
        let mut settings = Settings::default();
        assert_eq!(settings.post_load_macro(PostLoadStep::Wipe), None);
        settings.wipe = true;
        assert_eq!(settings.post_load_macro(PostLoadStep::Wipe), Some("AFC_BRUSH"));
    }

    #[test]
    fn test_invalid_settings_rejected() {
        let mut config = AfcConfig::default();
        config.settings.short_move_dis = 0.0;
        let err = config.validate().unwrap_err();
        assert_eq!(err.error_code(), "INVALID_CONFIG");
    }

    fn one_lane() -> AfcConfig {
        let json = r#"{
            "units": [{"name": "Turtle_1", "hub": "hub1", "extruder": "extruder"}],
            "hubs": [{"name": "hub1"}],
            "extruders": [{"name": "extruder"}],
            "lanes": [{"name": "lane1", "unit": "Turtle_1"}]
        }"#;
        serde_json::from_str(json).unwrap()
    }

    #[test_case(|s: &mut Settings| { s.prep_max_attempts = 0 }, "prep_max_attempts" ; "prep")]
    #[test_case(|s: &mut Settings| { s.max_hub_attempts = 0 }, "max_hub_attempts" ; "hub")]
    #[test_case(|s: &mut Settings| { s.max_tool_attempts = 0 }, "max_tool_attempts" ; "tool")]
    #[test_case(|s: &mut Settings| { s.tool_max_unload_attempts = 0 }, "tool_max_unload_attempts" ; "unload")]
    fn test_zero_retry_cap_rejected(edit: fn(&mut Settings), field: &str) {
        let mut config = one_lane();
        edit(&mut config.settings);
        match config.validate().unwrap_err() {
            AfcError::InvalidConfig { field: f, .. } => assert_eq!(f, field),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_espooler_divisors_validated() {
        let mut config = one_lane();
        config.lanes[0].espooler = Some(EspoolerConfig {
            mm_per_rotation: 0.0,
            ..EspoolerConfig::default()
        });
        match config.validate().unwrap_err() {
            AfcError::InvalidConfig { field, .. } => {
                assert_eq!(field, "lane1.espooler.mm_per_rotation")
            }
            other => panic!("unexpected error {:?}", other),
        }

        config.lanes[0].espooler = Some(EspoolerConfig::default());
        assert!(config.validate().is_ok());
    }
}
