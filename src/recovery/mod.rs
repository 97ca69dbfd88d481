//! Failure handling
//!
//! Every failed sequence ends up in [`Afc::handle_failure`]. Rejected
//! commands only warn. Fatal errors disable the lane and light its fault
//! LED, and any failure past that point pauses a running print with the
//! toolhead position saved. The position is saved
//! once per episode so a second failure cannot overwrite the spot the print
//! has to return to.

use log::{error, info, warn};

use crate::config::LaneId;
use crate::error::{AfcError, ErrorKind, Result};
use crate::hal::{AxisTarget, Position};
use crate::indicator::LedRole;
use crate::lane::{sensor_path, LaneStatus};
use crate::orchestrator::{Afc, AfcState};

/// Error flag and the single saved-position slot.
#[derive(Debug, Clone, Default)]
pub struct ErrorHandler {
    error: bool,
    last_error: Option<String>,
    saved_position: Option<Position>,
    pauses: u32,
}

impl ErrorHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_error(&self) -> bool {
        self.error
    }

    /// Message of the error that raised the flag.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn saved_position(&self) -> Option<Position> {
        self.saved_position
    }

    /// Pauses requested since startup.
    pub fn pause_count(&self) -> u32 {
        self.pauses
    }

    /// Store `position` unless one is already held. Returns true if stored.
    pub fn save_position(&mut self, position: Position) -> bool {
        if self.saved_position.is_some() {
            return false;
        }
        self.saved_position = Some(position);
        true
    }

    pub fn clear_position(&mut self) {
        self.saved_position = None;
    }

    fn raise(&mut self, err: &AfcError) {
        self.error = true;
        self.last_error = Some(format!("{}: {}", err.error_code(), err));
    }

    fn clear(&mut self) {
        self.error = false;
        self.last_error = None;
    }
}

impl Afc {
    /// Central failure sink for every sequence.
    pub(crate) fn handle_failure(&mut self, lane: Option<LaneId>, err: &AfcError) {
        self.ctx.current_loading = None;

        // Rejected before any motion: the print, the lane and the error flag
        // are left alone.
        if err.kind() == ErrorKind::Precondition {
            warn!("[{}] {}", err.error_code(), err);
            if let Some(suggestion) = err.recovery_suggestion() {
                info!("{}", suggestion);
            }
            self.finish();
            return;
        }

        if err.is_fatal() {
            if let Some(lane) = lane {
                self.disable_lane(lane);
                self.lanes[lane.0].status = LaneStatus::Error;
                self.set_led(lane, LedRole::Fault);
            }
        }

        self.errors.raise(err);
        self.ctx.state = AfcState::Error;
        error!("[{}] {}", err.error_code(), err);
        if let Some(lane) = lane {
            let l = &self.lanes[lane.0];
            let tool = self.extruders[l.extruder.0]
                .has_switch()
                .then_some(self.extruders[l.extruder.0].tool_start_state);
            error!(
                "{}",
                sensor_path(&l.name, l.prep_state, l.load_state, self.hub_state(lane), tool)
            );
        }
        if let Some(suggestion) = err.recovery_suggestion() {
            info!("{}", suggestion);
        }

        self.pause_if_printing();
        self.persist();
    }

    fn pause_if_printing(&mut self) {
        let host = &mut self.devices.host;
        if !host.is_printing() || host.is_paused() {
            return;
        }
        let position = self.devices.toolhead.position();
        if self.errors.save_position(position) {
            info!(
                "Saved position X{:.2} Y{:.2} Z{:.2}",
                position.x, position.y, position.z
            );
        }
        host.pause();
        self.errors.pauses += 1;
    }

    /// Pause the print for a lane-level intervention, saving the position.
    pub(crate) fn pause_for_intervention(&mut self) {
        self.pause_if_printing();
    }

    /// RESET_FAILURE: acknowledge the last failure. No motion.
    pub fn reset_failure(&mut self) {
        self.errors.clear();
        self.errors.clear_position();
        self.ctx.in_toolchange = false;
        self.ctx.current_loading = None;
        if self.ctx.pending_inconsistency.take().is_some() {
            info!("Persisted state confirmed");
        }
        self.ctx.state = AfcState::Idle;
        info!("Failure state reset");
    }

    /// RESUME: put the toolhead back where the print left it, then let the
    /// host resume.
    pub fn resume(&mut self) -> Result<()> {
        let intercept = self.errors.is_error()
            || self.devices.host.is_paused()
            || self.errors.saved_position().is_some();
        if !intercept {
            self.devices.host.resume();
            return Ok(());
        }

        if self.errors.saved_position().is_some() {
            self.restore_position()?;
        }
        self.errors.clear();
        self.ctx.in_toolchange = false;
        self.ctx.state = AfcState::Idle;
        self.devices.host.resume();
        info!("Resumed");
        Ok(())
    }

    /// Move back to the saved position: lift to a safe Z first when below
    /// it, then X/Y, then the saved Z. Clears the slot.
    pub(crate) fn restore_position(&mut self) -> Result<()> {
        let Some(saved) = self.errors.saved_position() else {
            return Ok(());
        };
        let previous = self.ctx.state;
        self.ctx.state = AfcState::Restoring;

        let safe_z = saved.z + self.settings.z_hop;
        let z_speed = self.settings.resume_z_speed;
        let toolhead = &mut self.devices.toolhead;
        if toolhead.position().z < safe_z {
            toolhead.manual_move(AxisTarget::z(safe_z), z_speed)?;
        }
        toolhead.manual_move(AxisTarget::xy(saved.x, saved.y), self.settings.resume_speed)?;
        toolhead.manual_move(AxisTarget::z(saved.z), z_speed)?;
        toolhead.wait_moves();

        self.errors.clear_position();
        self.ctx.state = previous;
        Ok(())
    }
}
