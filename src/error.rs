//! Error handling for AFC
//!
//! Every failure carries a stable error code and a kind that decides how the
//! orchestrator reacts: configuration errors abort startup, precondition errors
//! reject a command before any motion, sensor timeouts disable the lane and
//! pause the print.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for AFC operations
pub type Result<T> = std::result::Result<T, AfcError>;

/// Broad classes of failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Unresolved or invalid cross-reference in the configuration
    ConfigReference,
    /// Operation rejected before any motion was issued
    Precondition,
    /// A bounded retry loop ran out of attempts
    SensorTimeout,
    /// Persisted state disagrees with live sensors
    RuntimeInconsistency,
    /// Filament ran out on the active lane with no fallback
    Runout,
    /// Storage, registry or device failure
    Io,
}

/// Main error type for AFC operations
#[derive(Error, Debug)]
pub enum AfcError {
    // Configuration Errors
    #[error("Unknown {kind} '{name}' referenced by {referenced_by}")]
    UnresolvedReference {
        kind: &'static str,
        name: String,
        referenced_by: String,
    },

    #[error("Duplicate {kind} name: {name}")]
    DuplicateName { kind: &'static str, name: String },

    #[error("Invalid configuration for {field}: {reason}")]
    InvalidConfig { field: String, reason: String },

    #[error("No {device} hardware provided for '{name}'")]
    MissingDevice { device: &'static str, name: String },

    // Precondition Errors
    #[error("Printer must be homed before moving filament")]
    NotHomed,

    #[error("Hub {hub} is not clear, cannot load {lane}")]
    HubNotClear { lane: String, hub: String },

    #[error("Hub {hub} is in use by {owner}")]
    HubBusy { hub: String, owner: String },

    #[error("{lane} has no filament at the load sensor")]
    LaneNotReady { lane: String },

    #[error("Filament detected in bypass, lane operations disabled")]
    BypassActive,

    #[error("Unknown lane: {name}")]
    UnknownLane { name: String },

    #[error("{loaded} is already loaded in the toolhead, cannot load {requested}")]
    ToolAlreadyLoaded { loaded: String, requested: String },

    #[error("No lane is loaded in the toolhead")]
    NoLaneLoaded,

    #[error("{lane} is loaded in the toolhead, unload it first")]
    LaneInToolhead { lane: String },

    #[error("State must be confirmed with RESET_FAILURE: {reason}")]
    StateUnconfirmed { reason: String },

    #[error("Cannot {action} while printing")]
    PrintInProgress { action: &'static str },

    // Sensor Timeout Errors
    #[error("{lane} failed to move past the hub after {attempts} attempts")]
    PastHub { lane: String, attempts: u32 },

    #[error("{lane} failed to reach the toolhead sensor after {attempts} attempts")]
    FailedToReachTool { lane: String, attempts: u32 },

    #[error("{lane} is stuck in the toolhead after {attempts} unload attempts")]
    StuckInToolhead { lane: String, attempts: u32 },

    #[error("Hub did not clear while unloading {lane} after {attempts} attempts")]
    HubNotClearing { lane: String, attempts: u32 },

    #[error("{lane} did not reach the load sensor after {attempts} attempts")]
    FailedToReload { lane: String, attempts: u32 },

    #[error("{lane} did not clear the load sensor after {attempts} attempts")]
    EjectFailed { lane: String, attempts: u32 },

    #[error("Hub {hub} never triggered during cut of {lane}")]
    HubCutTimeout { lane: String, hub: String },

    #[error("Selector of unit {unit} failed to home")]
    SelectorHomeFailed { unit: String },

    // Runtime Errors
    #[error("State mismatch on {lane}: {detail}")]
    StateMismatch { lane: String, detail: String },

    #[error("Filament runout on {lane} and no runout lane is set")]
    FilamentRunout { lane: String },

    // Hardware and I/O Errors
    #[error("Hardware error on {device}: {reason}")]
    Hardware { device: String, reason: String },

    #[error("Spool registry error: {reason}")]
    SpoolRegistry { reason: String },

    #[error("Failed to read file: {path}: {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file: {path}: {source}")]
    FileWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AfcError {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            AfcError::UnresolvedReference { .. }
            | AfcError::DuplicateName { .. }
            | AfcError::InvalidConfig { .. }
            | AfcError::MissingDevice { .. } => ErrorKind::ConfigReference,

            AfcError::NotHomed
            | AfcError::HubNotClear { .. }
            | AfcError::HubBusy { .. }
            | AfcError::LaneNotReady { .. }
            | AfcError::BypassActive
            | AfcError::UnknownLane { .. }
            | AfcError::ToolAlreadyLoaded { .. }
            | AfcError::NoLaneLoaded
            | AfcError::LaneInToolhead { .. }
            | AfcError::StateUnconfirmed { .. }
            | AfcError::PrintInProgress { .. } => ErrorKind::Precondition,

            AfcError::PastHub { .. }
            | AfcError::FailedToReachTool { .. }
            | AfcError::StuckInToolhead { .. }
            | AfcError::HubNotClearing { .. }
            | AfcError::FailedToReload { .. }
            | AfcError::EjectFailed { .. }
            | AfcError::HubCutTimeout { .. }
            | AfcError::SelectorHomeFailed { .. } => ErrorKind::SensorTimeout,

            AfcError::StateMismatch { .. } => ErrorKind::RuntimeInconsistency,

            AfcError::FilamentRunout { .. } => ErrorKind::Runout,

            AfcError::Hardware { .. }
            | AfcError::SpoolRegistry { .. }
            | AfcError::FileRead { .. }
            | AfcError::FileWrite { .. }
            | AfcError::Serialization(_)
            | AfcError::Io(_) => ErrorKind::Io,
        }
    }

    /// Get the error code for this error type
    pub fn error_code(&self) -> &'static str {
        match self {
            AfcError::UnresolvedReference { .. } => "UNRESOLVED_REFERENCE",
            AfcError::DuplicateName { .. } => "DUPLICATE_NAME",
            AfcError::InvalidConfig { .. } => "INVALID_CONFIG",
            AfcError::MissingDevice { .. } => "MISSING_DEVICE",
            AfcError::NotHomed => "NOT_HOMED",
            AfcError::HubNotClear { .. } => "HUB_NOT_CLEAR",
            AfcError::HubBusy { .. } => "HUB_BUSY",
            AfcError::LaneNotReady { .. } => "LANE_NOT_READY",
            AfcError::BypassActive => "BYPASS_ACTIVE",
            AfcError::UnknownLane { .. } => "UNKNOWN_LANE",
            AfcError::ToolAlreadyLoaded { .. } => "TOOL_ALREADY_LOADED",
            AfcError::NoLaneLoaded => "NO_LANE_LOADED",
            AfcError::LaneInToolhead { .. } => "LANE_IN_TOOLHEAD",
            AfcError::StateUnconfirmed { .. } => "STATE_UNCONFIRMED",
            AfcError::PrintInProgress { .. } => "PRINT_IN_PROGRESS",
            AfcError::PastHub { .. } => "PAST_HUB",
            AfcError::FailedToReachTool { .. } => "FAILED_TO_REACH_TOOL",
            AfcError::StuckInToolhead { .. } => "STUCK_IN_TOOLHEAD",
            AfcError::HubNotClearing { .. } => "HUB_NOT_CLEARING",
            AfcError::FailedToReload { .. } => "FAILED_TO_RELOAD",
            AfcError::EjectFailed { .. } => "EJECT_FAILED",
            AfcError::HubCutTimeout { .. } => "HUB_CUT_TIMEOUT",
            AfcError::SelectorHomeFailed { .. } => "SELECTOR_HOME_FAILED",
            AfcError::StateMismatch { .. } => "STATE_MISMATCH",
            AfcError::FilamentRunout { .. } => "FILAMENT_RUNOUT",
            AfcError::Hardware { .. } => "HARDWARE_ERROR",
            AfcError::SpoolRegistry { .. } => "SPOOL_REGISTRY_ERROR",
            AfcError::FileRead { .. } => "FILE_READ_ERROR",
            AfcError::FileWrite { .. } => "FILE_WRITE_ERROR",
            AfcError::Serialization(_) => "SERIALIZATION_ERROR",
            AfcError::Io(_) => "IO_ERROR",
        }
    }

    /// Fatal errors disable the offending lane and raise the fault indicator.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::SensorTimeout | ErrorKind::Runout
        ) || matches!(self, AfcError::Hardware { .. })
    }

    /// Returns a user-facing recovery suggestion.
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            AfcError::NotHomed => Some("Home all axes and retry."),
            AfcError::HubNotClear { .. } => {
                Some("Check the hub for stuck filament, then RESET_FAILURE.")
            }
            AfcError::HubBusy { .. } => Some("Wait for the other lane to finish its move."),
            AfcError::LaneNotReady { .. } => Some("Insert filament until the load sensor triggers."),
            AfcError::BypassActive => Some("Remove filament from the bypass."),
            AfcError::StateUnconfirmed { .. } => {
                Some("Verify the toolhead by hand, then run RESET_FAILURE.")
            }
            AfcError::PastHub { .. } | AfcError::FailedToReachTool { .. } => {
                Some("Check the bowden path for a jam, clear it and RESUME.")
            }
            AfcError::StuckInToolhead { .. } => {
                Some("Heat the nozzle and pull the filament by hand, then RESET_FAILURE.")
            }
            AfcError::HubNotClearing { .. } => {
                Some("Check for a broken filament tip left in the hub.")
            }
            AfcError::FailedToReload { .. } => Some("Re-insert the filament into the lane."),
            AfcError::FilamentRunout { .. } => {
                Some("Load a new spool and RESUME, or set a runout lane.")
            }
            AfcError::StateMismatch { .. } => {
                Some("Confirm what is in the toolhead, then run RESET_FAILURE.")
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = AfcError::HubNotClear {
            lane: "lane3".to_string(),
            hub: "Turtle_1".to_string(),
        };
        assert_eq!(err.error_code(), "HUB_NOT_CLEAR");
        assert_eq!(err.kind(), ErrorKind::Precondition);
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_timeouts_are_fatal() {
        let err = AfcError::StuckInToolhead {
            lane: "lane1".to_string(),
            attempts: 2,
        };
        assert_eq!(err.kind(), ErrorKind::SensorTimeout);
        assert!(err.is_fatal());
        assert!(err.recovery_suggestion().is_some());
    }

    #[test]
    fn test_config_errors_are_not_fatal_at_runtime() {
        let err = AfcError::UnresolvedReference {
            kind: "hub",
            name: "missing".to_string(),
            referenced_by: "lane1".to_string(),
        };
        assert_eq!(err.kind(), ErrorKind::ConfigReference);
        assert!(!err.is_fatal());
        assert_eq!(
            err.to_string(),
            "Unknown hub 'missing' referenced by lane1"
        );
    }
}
