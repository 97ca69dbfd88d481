//! Hardware seams
//!
//! The orchestrator never talks to pins or motors directly. Everything it
//! drives or reads goes through the traits in this module:
//! - `Actuator` for lane feed steppers
//! - `SensorBus` for filament sensor levels and edges
//! - `Toolhead` and `Heater` for the printer side
//! - `Host` for print state, pause/resume and macros
//! - `StateStore` for the persisted JSON snapshot
//!
//! [`sim`] provides an in-memory filament path used by the CLI bench and the
//! tests.

pub mod sim;
mod spoolman;
mod store;

pub use spoolman::SpoolmanClient;
pub use store::{JsonFileStore, MemoryStore};

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::indicator::Color;
use crate::sensor::{PinKind, SensorEvent};

/// Toolhead position.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub e: f64,
}

/// Absolute target for a manual toolhead move; `None` axes stay put.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AxisTarget {
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub z: Option<f64>,
}

impl AxisTarget {
    pub fn z(z: f64) -> Self {
        Self {
            z: Some(z),
            ..Default::default()
        }
    }

    pub fn xy(x: f64, y: f64) -> Self {
        Self {
            x: Some(x),
            y: Some(y),
            z: None,
        }
    }
}

/// Lane feed stepper.
pub trait Actuator {
    /// Relative filament move. Blocks until the move has finished.
    fn move_filament(&mut self, distance: f64, speed: f64, accel: f64, assist: bool)
        -> Result<()>;

    fn enable(&mut self, enabled: bool);

    /// Follow the extruder motion instead of moving independently.
    fn sync_to_extruder(&mut self, synced: bool);

    /// Scale the rotation distance while synced (buffer compensation).
    fn set_rotation_multiplier(&mut self, multiplier: f64);
}

/// Source of filament sensor levels and edges.
pub trait SensorBus {
    /// Current raw level of a pin.
    fn level(&self, kind: PinKind, owner: &str) -> bool;

    /// Drain edges recorded since the last poll.
    fn poll(&mut self) -> Vec<SensorEvent>;
}

/// Printer motion adapter.
pub trait Toolhead {
    fn is_homed(&self) -> bool;

    fn position(&self) -> Position;

    fn manual_move(&mut self, target: AxisTarget, speed: f64) -> Result<()>;

    /// Relative extruder move (negative retracts).
    fn extrude(&mut self, distance: f64, speed: f64) -> Result<()>;

    /// Total extruder travel since startup, used by the espooler.
    fn extruder_position(&self) -> f64;

    fn wait_moves(&mut self);
}

/// Hotend heater.
pub trait Heater {
    fn temperature(&self) -> f64;

    fn target(&self) -> f64;

    fn set_target(&mut self, temp: f64, wait: bool) -> Result<()>;
}

/// Print host: scheduler state, pause/resume and macro execution.
pub trait Host {
    fn is_printing(&self) -> bool;

    fn is_paused(&self) -> bool;

    fn pause(&mut self);

    fn resume(&mut self);

    fn run_macro(&mut self, name: &str) -> Result<()>;

    /// Block for `seconds` of host time.
    fn dwell(&mut self, seconds: f64);

    /// Monotonic host clock in seconds.
    fn now(&self) -> f64;
}

/// LED chains.
pub trait Indicator {
    fn set_color(&mut self, chain: &str, index: usize, color: Color);
}

/// Cutter servo.
pub trait Servo {
    fn set_angle(&mut self, angle: f64) -> Result<()>;
}

/// Cam lane selector.
pub trait Selector {
    /// Returns true when the home switch was found.
    fn home(&mut self) -> Result<bool>;

    fn select(&mut self, index: usize) -> Result<()>;
}

/// Espooler assist motor.
pub trait SpoolMotor {
    /// Drive the motor at `duty` for `seconds`.
    fn pulse(&mut self, duty: f64, seconds: f64);

    fn stop(&mut self);
}

/// Persistent key-value store holding the JSON snapshot.
pub trait StateStore {
    fn load(&self) -> Result<Option<serde_json::Value>>;

    fn save(&mut self, value: &serde_json::Value) -> Result<()>;
}

/// Spool metadata from a spool registry.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SpoolInfo {
    pub material: Option<String>,
    /// `#rrggbb`
    pub color_hex: Option<String>,
    /// Remaining weight in grams.
    pub remaining_weight: Option<f64>,
    pub extruder_temp: Option<f64>,
}

/// External spool registry.
pub trait SpoolRegistry {
    fn lookup(&self, spool_id: u32) -> Result<SpoolInfo>;

    /// Tell the registry which spool is being printed from.
    fn set_active(&mut self, spool_id: Option<u32>) -> Result<()>;
}

/// Every device the orchestrator drives, keyed by the configuration name of
/// the object that owns it. Names are resolved once at startup.
pub struct Hardware {
    /// Feed actuator per lane.
    pub actuators: HashMap<String, Box<dyn Actuator>>,
    /// Espooler motor per lane (only lanes with an espooler).
    pub spool_motors: HashMap<String, Box<dyn SpoolMotor>>,
    /// Cutter servo per hub (only hubs with a cutter).
    pub cutters: HashMap<String, Box<dyn Servo>>,
    /// Heater per extruder.
    pub heaters: HashMap<String, Box<dyn Heater>>,
    /// Selector per cam-selector unit.
    pub selectors: HashMap<String, Box<dyn Selector>>,
    pub toolhead: Box<dyn Toolhead>,
    pub host: Box<dyn Host>,
    pub sensors: Box<dyn SensorBus>,
    pub indicators: Box<dyn Indicator>,
    pub store: Box<dyn StateStore>,
    pub spool_registry: Option<Box<dyn SpoolRegistry>>,
}
