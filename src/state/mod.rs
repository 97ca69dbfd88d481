//! State Persistence
//!
//! Snapshot types written after every state change and read back at
//! startup. Capturing and applying a snapshot is done by the orchestrator,
//! which owns the live objects.

mod snapshot;

pub use snapshot::{
    CalibrationSnapshot, ExtruderSnapshot, LaneSnapshot, Snapshot, SystemSnapshot,
    ToolchangeSnapshot, SYSTEM_KEY,
};
