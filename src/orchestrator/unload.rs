//! TOOL_UNLOAD: pull filament out of the toolhead back behind the hub.

use log::{debug, info, warn};

use crate::config::{HubId, HubRef, LaneId, ToolSensorMode};
use crate::error::{AfcError, Result};
use crate::hal::AxisTarget;
use crate::hub::CutStep;
use crate::indicator::LedRole;
use crate::lane::LaneStatus;
use crate::orchestrator::tip::{TipPlan, TipStep};
use crate::orchestrator::{Afc, AfcState, Drive};

impl Afc {
    /// TOOL_UNLOAD. Without a lane the one loaded in the toolhead is used.
    pub fn tool_unload(&mut self, name: Option<&str>) -> Result<()> {
        let lane = match name {
            Some(name) => self.resolve_lane(name),
            None => self
                .ctx
                .current
                .or_else(|| self.tool_loaded_lane())
                .ok_or(AfcError::NoLaneLoaded),
        };
        let lane = match lane {
            Ok(lane) => lane,
            Err(err) => return self.fail(None, err),
        };
        if !self.lanes[lane.0].tool_loaded {
            info!("{} is not loaded in the toolhead", self.lanes[lane.0].name);
            return Ok(());
        }
        if let Err(err) = self.check_motion_allowed() {
            return self.fail(Some(lane), err);
        }

        self.begin(AfcState::Unloading);
        self.lanes[lane.0].status = LaneStatus::ToolUnloading;
        self.set_led(lane, LedRole::Unloading);
        info!("Unloading {}", self.lanes[lane.0].name);

        // The print position is taken before the retract and z-hop. A change
        // already holds one; a plain unload drops its own once it succeeds.
        let saved_here = self.devices.host.is_printing() && {
            let position = self.devices.toolhead.position();
            self.errors.save_position(position)
        };

        match self.unload_sequence(lane) {
            Ok(()) => {
                if saved_here {
                    self.errors.clear_position();
                }
                self.finish();
                Ok(())
            }
            Err(err) => self.fail(Some(lane), err),
        }
    }

    fn unload_sequence(&mut self, lane: LaneId) -> Result<()> {
        self.disengage_assist(lane);

        let extruder = self.lanes[lane.0].extruder;
        let unload_speed = self.extruders[extruder.0].tool_unload_speed;

        self.extrude(-self.settings.pre_unload_retract, unload_speed)?;
        let z = self.devices.toolhead.position().z;
        self.devices
            .toolhead
            .manual_move(AxisTarget::z(z + self.settings.z_hop), self.settings.resume_z_speed)?;

        self.heat_for(lane)?;

        if self.settings.tool_cut {
            let cut = self.settings.tool_cut_cmd.clone();
            self.devices.host.run_macro(&cut)?;
        }
        if self.settings.park {
            let park = self.settings.park_cmd.clone();
            self.devices.host.run_macro(&park)?;
        }
        if self.settings.form_tip {
            match self.settings.form_tip_cmd.clone() {
                Some(cmd) => self.devices.host.run_macro(&cmd)?,
                None => self.form_tip(lane)?,
            }
        }

        let cut = self.with_hub(lane, |afc| {
            afc.retract_from_tool(lane)?;
            afc.sync_lane(lane, false);

            let bowden = afc.bowden_length(lane);
            afc.move_lane(
                lane,
                -bowden,
                afc.settings.long_moves_speed,
                afc.settings.long_moves_accel,
                true,
            )?;

            let HubRef::Hub(hub) = afc.lanes[lane.0].hub else {
                return Ok(false);
            };
            afc.clear_hub(lane, hub)?;
            afc.cut_at_hub(lane, hub)
        })?;

        let l = &mut self.lanes[lane.0];
        l.status = LaneStatus::None;
        l.tool_loaded = false;
        l.loaded_to_hub = l.hub != HubRef::Direct && !cut;
        self.extruders[extruder.0].lane_loaded = None;
        self.ctx.current = None;
        self.ctx.active_spool = None;
        self.disable_lane(lane);
        if let Some(registry) = self.devices.spool_registry.as_mut() {
            if let Err(e) = registry.set_active(None) {
                warn!("Could not clear active spool: {}", e);
            }
        }
        self.refresh_led(lane);
        self.persist();
        info!("{} unloaded", self.lanes[lane.0].name);
        Ok(())
    }

    /// Synced retracts until the toolhead no longer reports filament.
    fn retract_from_tool(&mut self, lane: LaneId) -> Result<()> {
        let extruder = &self.extruders[self.lanes[lane.0].extruder.0];
        let (mode, distance, speed) = (
            extruder.tool_start,
            extruder.tool_stn_unload,
            extruder.tool_unload_speed,
        );
        let cap = self.settings.tool_max_unload_attempts;
        self.sync_lane(lane, true);

        let cleared = match mode {
            ToolSensorMode::None => {
                self.extrude(-distance, speed)?;
                return Ok(());
            }
            ToolSensorMode::Switch => self.retry_until(
                Drive::Extruder,
                cap,
                speed,
                0.0,
                |_| -distance,
                |afc| !afc.extruders[afc.lanes[lane.0].extruder.0].tool_start_state,
            )?,
            ToolSensorMode::Buffer => {
                self.extrude(-distance, speed)?;
                self.retry_until(
                    Drive::Extruder,
                    cap.saturating_sub(1),
                    speed,
                    0.0,
                    |_| -distance,
                    |afc| !afc.buffer_trailing(lane),
                )?
            }
        };
        match cleared {
            Some(moves) => {
                debug!("{} left the toolhead after {} retracts", self.lanes[lane.0].name, moves);
                Ok(())
            }
            None => Err(AfcError::StuckInToolhead {
                lane: self.lanes[lane.0].name.clone(),
                attempts: cap,
            }),
        }
    }

    /// Short retracts until the hub sensor clears.
    fn clear_hub(&mut self, lane: LaneId, hub: HubId) -> Result<()> {
        let short = self.settings.short_move_dis;
        let cap = self.hubs[hub.0].clear_attempts(short);
        let (speed, accel) = (self.settings.short_moves_speed, self.settings.short_moves_accel);
        let cleared = self.retry_until(
            Drive::Lane(lane),
            cap,
            speed,
            accel,
            |_| -short,
            |afc| !afc.hubs[hub.0].state,
        )?;
        if cleared.is_none() {
            return Err(AfcError::HubNotClearing {
                lane: self.lanes[lane.0].name.clone(),
                attempts: cap,
            });
        }
        Ok(())
    }

    /// Run the hub cutter, if fitted. Returns whether a cut was made.
    fn cut_at_hub(&mut self, lane: LaneId, hub: HubId) -> Result<bool> {
        let Some(plan) = self.hubs[hub.0].cutter_plan(self.settings.max_hub_attempts) else {
            return Ok(false);
        };
        info!("Cutting {} at {}", self.lanes[lane.0].name, self.hubs[hub.0].name);
        let (speed, accel) = (self.settings.short_moves_speed, self.settings.short_moves_accel);

        for step in plan.steps {
            match step {
                CutStep::Servo(angle) => {
                    if let Some(servo) = self.devices.cutters[hub.0].as_mut() {
                        servo.set_angle(angle)?;
                    }
                }
                CutStep::Settle(seconds) => self.devices.host.dwell(seconds),
                CutStep::AdvanceToHub { step, max_attempts } => {
                    let reached = self.retry_until(
                        Drive::Lane(lane),
                        max_attempts,
                        speed,
                        accel,
                        |_| step,
                        |afc| afc.hubs[hub.0].state,
                    )?;
                    if reached.is_none() {
                        return Err(AfcError::HubCutTimeout {
                            lane: self.lanes[lane.0].name.clone(),
                            hub: self.hubs[hub.0].name.clone(),
                        });
                    }
                }
                CutStep::Move(distance) => self.move_lane(lane, distance, speed, accel, false)?,
            }
        }
        Ok(true)
    }

    /// Built-in tip shaping on the synced lane.
    fn form_tip(&mut self, lane: LaneId) -> Result<()> {
        let extruder = self.lanes[lane.0].extruder;
        let plan = TipPlan::build(&self.tip_forming);
        debug!("Forming tip in {} steps", plan.steps.len());
        for step in plan.steps {
            match step {
                TipStep::Extrude { distance, speed } => self.extrude(distance, speed)?,
                TipStep::Dwell(seconds) => self.devices.host.dwell(seconds),
                TipStep::SetTemp(temp) => self.devices.heaters[extruder.0].set_target(temp, false)?,
            }
        }
        Ok(())
    }
}
