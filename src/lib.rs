//! AFC - Automated Filament Changer orchestration core
//!
//! Coordinates a multi-lane filament changer feeding one toolhead:
//! - Lanes advance new filament from the prep to the load sensor
//! - A shared hub merges the lanes into one bowden tube, one lane at a time
//! - TOOL_LOAD, TOOL_UNLOAD and CHANGE_TOOL move filament between lane and
//!   nozzle with bounded retries, pausing the print on failure
//! - Buffers and espoolers assist the loaded lane while printing
//!
//! # Architecture
//!
//! [`Afc`] owns every lane, hub, extruder, buffer and unit and drives the
//! hardware through the traits in [`hal`]. State is persisted as a JSON
//! snapshot after every change and restored at startup.

pub mod buffer;
pub mod cli;
pub mod config;
pub mod error;
pub mod espooler;
pub mod extruder;
pub mod hal;
pub mod hub;
pub mod indicator;
pub mod lane;
pub mod orchestrator;
pub mod recovery;
pub mod sensor;
pub mod state;
pub mod unit;

pub use config::AfcConfig;
pub use error::{AfcError, Result};
pub use orchestrator::{Afc, AfcState, CalibrationTarget};
