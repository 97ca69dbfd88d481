//! Print-time assistance: buffer compensation and espooler pulses.

use log::{debug, warn};

use crate::buffer::BufferAction;
use crate::config::LaneId;
use crate::orchestrator::Afc;

impl Afc {
    /// Start buffer compensation and spool assist for a freshly loaded lane.
    pub(crate) fn engage_assist(&mut self, lane: LaneId) {
        if let Some(buffer) = self.lanes[lane.0].buffer {
            self.buffers[buffer.0].enable(lane);
            debug!("{} engaged on {}", self.buffers[buffer.0].name, self.lanes[lane.0].name);
        }
        let position = self.devices.toolhead.extruder_position();
        if let Some(espooler) = self.lanes[lane.0].espooler.as_mut() {
            espooler.enable(position);
        }
    }

    /// Stop buffer compensation and spool assist before unloading.
    pub(crate) fn disengage_assist(&mut self, lane: LaneId) {
        if let Some(buffer) = self.lanes[lane.0].buffer {
            if let Some((engaged, action)) = self.buffers[buffer.0].disable() {
                self.apply_buffer_action(engaged, action);
            }
        }
        if let Some(espooler) = self.lanes[lane.0].espooler.as_mut() {
            espooler.disable();
        }
        if let Some(motor) = self.devices.spool_motors[lane.0].as_mut() {
            motor.stop();
        }
    }

    pub(crate) fn apply_buffer_action(&mut self, lane: LaneId, action: BufferAction) {
        match action {
            BufferAction::SetMultiplier(multiplier) => {
                debug!("{} rotation multiplier {}", self.lanes[lane.0].name, multiplier);
                self.devices.actuators[lane.0].set_rotation_multiplier(multiplier);
            }
            BufferAction::Push {
                distance,
                velocity,
                accel,
            } => {
                if let Err(e) =
                    self.devices.actuators[lane.0].move_filament(distance, velocity, accel, false)
                {
                    warn!("Buffer push on {} failed: {}", self.lanes[lane.0].name, e);
                }
            }
        }
    }

    /// Fire espooler pulses that are due. Host reactor hook, called
    /// periodically while printing.
    pub fn espooler_tick(&mut self) {
        if !self.devices.host.is_printing() || self.errors.is_error() || self.ctx.in_toolchange {
            return;
        }
        let position = self.devices.toolhead.extruder_position();
        for (index, lane) in self.lanes.iter_mut().enumerate() {
            let Some(pulse) = lane.espooler.as_mut().and_then(|e| e.tick(position)) else {
                continue;
            };
            if let Some(motor) = self.devices.spool_motors[index].as_mut() {
                for (duty, seconds) in pulse.segments() {
                    motor.pulse(duty, seconds);
                }
            }
        }
    }
}
