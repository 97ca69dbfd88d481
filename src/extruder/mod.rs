//! Extruder adapter
//!
//! Toolhead-side state: which sensor tells us filament reached the tool,
//! the insertion distances, and which lane is currently loaded.

use crate::config::{BufferId, ExtruderConfig, ExtruderId, LaneId, ToolSensorMode};

#[derive(Debug, Clone)]
pub struct Extruder {
    pub id: ExtruderId,
    pub name: String,
    pub tool_start: ToolSensorMode,
    /// Sensor after the gears is fitted.
    pub tool_end: bool,
    pub tool_start_state: bool,
    pub tool_end_state: bool,
    pub tool_stn: f64,
    pub tool_stn_unload: f64,
    pub tool_load_speed: f64,
    pub tool_unload_speed: f64,
    /// Buffer used for ram sensing.
    pub buffer: Option<BufferId>,
    pub lane_loaded: Option<LaneId>,
}

impl Extruder {
    pub fn new(id: ExtruderId, config: &ExtruderConfig, buffer: Option<BufferId>) -> Self {
        Self {
            id,
            name: config.name.clone(),
            tool_start: config.tool_start,
            tool_end: config.tool_end,
            tool_start_state: false,
            tool_end_state: false,
            tool_stn: config.tool_stn,
            tool_stn_unload: config.tool_stn_unload,
            tool_load_speed: config.tool_load_speed,
            tool_unload_speed: config.tool_unload_speed,
            buffer,
            lane_loaded: None,
        }
    }

    /// Buffer compression stands in for the toolhead switch.
    pub fn uses_ram(&self) -> bool {
        self.tool_start == ToolSensorMode::Buffer
    }

    pub fn has_switch(&self) -> bool {
        self.tool_start == ToolSensorMode::Switch
    }

    /// Human readable state of the start sensor for status output.
    pub fn tool_start_label(&self) -> &'static str {
        match self.tool_start {
            ToolSensorMode::None => "n/a",
            ToolSensorMode::Buffer => "buffer",
            ToolSensorMode::Switch if self.tool_start_state => "triggered",
            ToolSensorMode::Switch => "open",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sensor_modes() {
        let mut config = ExtruderConfig {
            name: "extruder".to_string(),
            ..Default::default()
        };
        let extruder = Extruder::new(ExtruderId(0), &config, None);
        assert!(extruder.has_switch());
        assert!(!extruder.uses_ram());
        assert_eq!(extruder.tool_start_label(), "open");

        config.tool_start = ToolSensorMode::Buffer;
        let extruder = Extruder::new(ExtruderId(0), &config, Some(BufferId(0)));
        assert!(extruder.uses_ram());
        assert_eq!(extruder.tool_start_label(), "buffer");
    }
}
