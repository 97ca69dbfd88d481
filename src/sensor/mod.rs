//! Sensor edges
//!
//! Binary filament sensors report level changes as [`SensorEvent`]s. Every
//! pin is filtered through a [`Debouncer`] before the orchestrator sees it.

mod debounce;

pub use debounce::{Debouncer, EventThrottle};

use std::fmt;

use serde::{Deserialize, Serialize};

/// Which physical sensor an event belongs to. The owner name identifies the
/// lane, hub, extruder or buffer carrying the pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PinKind {
    /// Filament present at the lane entry.
    Prep,
    /// Filament reached the lane drive gear.
    Load,
    /// Hub junction.
    Hub,
    /// Toolhead sensor before the extruder gears.
    ToolStart,
    /// Toolhead sensor after the extruder gears.
    ToolEnd,
    /// Turtleneck buffer compressed.
    BufferAdvance,
    /// Turtleneck buffer expanded.
    BufferTrailing,
    /// Belay buffer trigger.
    Belay,
    /// Filament fed through the bypass.
    Bypass,
}

impl fmt::Display for PinKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PinKind::Prep => "prep",
            PinKind::Load => "load",
            PinKind::Hub => "hub",
            PinKind::ToolStart => "tool_start",
            PinKind::ToolEnd => "tool_end",
            PinKind::BufferAdvance => "buffer_advance",
            PinKind::BufferTrailing => "buffer_trailing",
            PinKind::Belay => "belay",
            PinKind::Bypass => "bypass",
        };
        write!(f, "{}", name)
    }
}

/// Name used for the single bypass sensor.
pub const BYPASS_OWNER: &str = "bypass";

/// A raw level change reported by the sensor bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorEvent {
    pub kind: PinKind,
    pub owner: String,
    /// Host clock in seconds.
    pub timestamp: f64,
    pub state: bool,
}

impl SensorEvent {
    pub fn new(kind: PinKind, owner: impl Into<String>, timestamp: f64, state: bool) -> Self {
        Self {
            kind,
            owner: owner.into(),
            timestamp,
            state,
        }
    }
}
