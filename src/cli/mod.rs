//! CLI Module
//!
//! Command-line bench for the AFC orchestrator. Every command runs against
//! the simulated filament path, with state carried between invocations in
//! the snapshot file.

pub mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// AFC bench - drive the filament changer orchestrator on simulated hardware
#[derive(Parser, Debug)]
#[command(name = "afc-cli")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// JSON configuration (a four-lane bench is used when omitted)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Persisted state file
    #[arg(short, long, global = true, default_value = "afc_state.json")]
    pub state: PathBuf,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Home the units and bring every lane to a known state
    #[command(name = "prep")]
    Prep,

    /// Load a lane into the toolhead
    #[command(name = "tool-load")]
    ToolLoad {
        /// Lane name or tool alias
        lane: String,
    },

    /// Unload the toolhead
    #[command(name = "tool-unload")]
    ToolUnload {
        /// Lane to unload (defaults to the loaded lane)
        lane: Option<String>,
    },

    /// Switch the toolhead to another lane
    #[command(name = "change-tool")]
    ChangeTool {
        /// Lane name or tool alias (T0, T1, ...)
        target: String,
    },

    /// Move a lane by a relative distance
    #[command(name = "lane-move")]
    LaneMove {
        lane: String,

        /// Distance in mm (negative retracts)
        #[arg(allow_hyphen_values = true)]
        distance: f64,
    },

    /// Eject a lane's filament
    #[command(name = "lane-unload")]
    LaneUnload { lane: String },

    /// Park a lane's filament at the hub
    #[command(name = "hub-load")]
    HubLoad { lane: String },

    /// Set or clear the spool id of a lane
    #[command(name = "set-spool-id")]
    SetSpoolId {
        lane: String,

        /// Spool id (omit to clear)
        spool_id: Option<u32>,
    },

    /// Set the filament colour of a lane
    #[command(name = "set-color")]
    SetColor { lane: String, color: String },

    /// Set the filament material of a lane
    #[command(name = "set-material")]
    SetMaterial { lane: String, material: String },

    /// Set the remaining spool weight of a lane (grams)
    #[command(name = "set-weight")]
    SetWeight { lane: String, weight: f64 },

    /// Set the runout lane of a lane (NONE clears it)
    #[command(name = "set-runout")]
    SetRunout { lane: String, runout: String },

    /// Assign a tool alias to a lane
    #[command(name = "set-map")]
    SetMap { lane: String, map: String },

    /// Set the number of tool changes expected in the print (0 disables)
    #[command(name = "set-toolchanges")]
    SetToolchanges { total: u32 },

    /// Measure hub and bowden distances
    #[command(name = "calibrate")]
    Calibrate {
        /// Lane name or "all" for dist_hub calibration
        #[arg(short, long)]
        lane: Option<String>,

        /// Lane used to measure the bowden length
        #[arg(short, long)]
        bowden: Option<String>,
    },

    /// Acknowledge the last failure
    #[command(name = "reset-failure")]
    ResetFailure,

    /// Restore the saved position and resume
    #[command(name = "resume")]
    Resume,

    /// Print the lane table
    #[command(name = "status")]
    Status,

    /// Print the status JSON
    #[command(name = "status-json")]
    StatusJson,

    /// Validate a configuration file
    #[command(name = "check-config")]
    CheckConfig,
}
