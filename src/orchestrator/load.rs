//! TOOL_LOAD: move a lane's filament from the hub into the nozzle.

use log::{debug, info, warn};

use crate::config::{HubRef, LaneId, ToolSensorMode};
use crate::error::{AfcError, Result};
use crate::indicator::LedRole;
use crate::lane::LaneStatus;
use crate::orchestrator::{Afc, AfcState, Drive};

impl Afc {
    /// TOOL_LOAD. Loading the lane that is already current does nothing.
    pub fn tool_load(&mut self, name: &str) -> Result<()> {
        let lane = match self.resolve_lane(name) {
            Ok(lane) => lane,
            Err(err) => return self.fail(None, err),
        };
        if self.ctx.current == Some(lane) && self.lanes[lane.0].tool_loaded {
            info!("{} already loaded", self.lanes[lane.0].name);
            return Ok(());
        }
        if let Err(err) = self.check_load(lane) {
            return self.fail(Some(lane), err);
        }

        self.ctx.current_loading = Some(lane);
        self.begin(AfcState::Loading);
        self.lanes[lane.0].status = LaneStatus::ToolLoading;
        self.set_led(lane, LedRole::Loading);
        info!("Loading {}", self.lanes[lane.0].name);

        match self.load_sequence(lane) {
            Ok(()) => {
                self.ctx.current_loading = None;
                self.finish();
                self.run_post_load();
                Ok(())
            }
            Err(err) => {
                self.sync_lane(lane, false);
                let l = &mut self.lanes[lane.0];
                l.status = if l.load_state {
                    LaneStatus::Loaded
                } else {
                    LaneStatus::None
                };
                self.fail(Some(lane), err)
            }
        }
    }

    /// Preconditions checked before any motion.
    fn check_load(&self, lane: LaneId) -> Result<()> {
        self.check_motion_allowed()?;
        if let Some(loaded) = self.tool_loaded_lane() {
            return Err(AfcError::ToolAlreadyLoaded {
                loaded: self.lanes[loaded.0].name.clone(),
                requested: self.lanes[lane.0].name.clone(),
            });
        }
        let l = &self.lanes[lane.0];
        if let HubRef::Hub(hub) = l.hub {
            if self.hubs[hub.0].state {
                return Err(AfcError::HubNotClear {
                    lane: l.name.clone(),
                    hub: self.hubs[hub.0].name.clone(),
                });
            }
        }
        if !l.load_state {
            return Err(AfcError::LaneNotReady {
                lane: l.name.clone(),
            });
        }
        Ok(())
    }

    fn load_sequence(&mut self, lane: LaneId) -> Result<()> {
        self.heat_for(lane)?;

        let (unit, index) = (self.lanes[lane.0].unit, self.lanes[lane.0].index);
        self.units[unit.0].policy.select_lane(index)?;

        self.with_hub(lane, |afc| {
            afc.feed_to_tool(lane)?;
            afc.insert_into_tool(lane)
        })?;

        let extruder = self.lanes[lane.0].extruder;
        let l = &mut self.lanes[lane.0];
        l.status = LaneStatus::Tooled;
        l.tool_loaded = true;
        l.loaded_to_hub = l.hub != HubRef::Direct;
        self.extruders[extruder.0].lane_loaded = Some(lane);
        self.ctx.current = Some(lane);
        self.ctx.active_spool = self.lanes[lane.0].spool.spool_id;
        self.set_led(lane, LedRole::ToolLoaded);
        self.persist();

        let spool_id = self.ctx.active_spool;
        if let Some(registry) = self.devices.spool_registry.as_mut() {
            if let Err(e) = registry.set_active(spool_id) {
                warn!("Could not set active spool: {}", e);
            }
        }
        self.engage_assist(lane);
        info!("{} is now loaded in the toolhead", self.lanes[lane.0].name);
        Ok(())
    }

    /// Hub, past-hub and bowden moves up to the toolhead sensor, or to the
    /// end of the bowden when the toolhead has none.
    fn feed_to_tool(&mut self, lane: LaneId) -> Result<()> {
        let short = self.settings.short_move_dis;
        let (speed, accel) = (self.settings.short_moves_speed, self.settings.short_moves_accel);

        if let HubRef::Hub(hub) = self.lanes[lane.0].hub {
            if !self.lanes[lane.0].loaded_to_hub {
                let dist_hub = self.lanes[lane.0].dist_hub;
                self.move_lane_auto(lane, dist_hub, false)?;
            }

            let clear_step = self.hubs[hub.0].clear_step;
            let cap = self.settings.max_hub_attempts;
            let past = self.retry_until(
                Drive::Lane(lane),
                cap,
                speed,
                accel,
                |attempt| if attempt == 0 { clear_step } else { short },
                |afc| afc.hubs[hub.0].state,
            )?;
            if past.is_none() {
                return Err(AfcError::PastHub {
                    lane: self.lanes[lane.0].name.clone(),
                    attempts: cap,
                });
            }
        }

        let bowden = self.bowden_length(lane);
        self.move_lane(
            lane,
            bowden,
            self.settings.long_moves_speed,
            self.settings.long_moves_accel,
            true,
        )?;

        let extruder = &self.extruders[self.lanes[lane.0].extruder.0];
        if extruder.tool_start == ToolSensorMode::None {
            // Nothing to search for: the bowden length ends at the gears.
            debug!("{} has no toolhead sensor, inserting blind", extruder.name);
            return Ok(());
        }
        let ram = extruder.uses_ram();
        let cap = self.settings.max_tool_attempts;
        let reached = self.retry_until(
            Drive::Lane(lane),
            cap,
            speed,
            accel,
            |_| short,
            |afc| afc.filament_at_tool(lane, ram),
        )?;
        match reached {
            Some(moves) => debug!("{} reached the toolhead after {} moves", self.lanes[lane.0].name, moves),
            None => {
                return Err(AfcError::FailedToReachTool {
                    lane: self.lanes[lane.0].name.clone(),
                    attempts: cap,
                })
            }
        }
        Ok(())
    }

    /// Sync into the extruder gears and push to the nozzle.
    fn insert_into_tool(&mut self, lane: LaneId) -> Result<()> {
        let extruder = &self.extruders[self.lanes[lane.0].extruder.0];
        let (tool_stn, load_speed, ram) =
            (extruder.tool_stn, extruder.tool_load_speed, extruder.uses_ram());

        self.sync_lane(lane, true);
        self.extrude(tool_stn, load_speed)?;

        if ram {
            // Relieve the compression left by ramming into the gears.
            self.sync_lane(lane, false);
            let short = self.settings.short_move_dis;
            let cap = self.settings.max_tool_attempts;
            let (speed, accel) = (self.settings.short_moves_speed, self.settings.short_moves_accel);
            let relaxed = self.retry_until(
                Drive::Lane(lane),
                cap,
                speed,
                accel,
                |_| -short,
                |afc| afc.buffer_trailing(lane),
            )?;
            if relaxed.is_none() {
                warn!(
                    "{} buffer never reported trailing after {} retracts",
                    self.lanes[lane.0].name, cap
                );
            }
            self.sync_lane(lane, true);
        }
        Ok(())
    }

    /// Filament has reached the toolhead: the switch, or buffer compression
    /// in ram mode.
    pub(crate) fn filament_at_tool(&self, lane: LaneId, ram: bool) -> bool {
        if ram {
            self.buffer_advancing(lane)
        } else {
            self.extruders[self.lanes[lane.0].extruder.0].tool_start_state
        }
    }

    fn ram_buffer(&self, lane: LaneId) -> Option<&crate::buffer::Buffer> {
        let extruder = &self.extruders[self.lanes[lane.0].extruder.0];
        extruder
            .buffer
            .or(self.lanes[lane.0].buffer)
            .map(|b| &self.buffers[b.0])
    }

    pub(crate) fn buffer_advancing(&self, lane: LaneId) -> bool {
        self.ram_buffer(lane).is_some_and(|b| b.advancing())
    }

    pub(crate) fn buffer_trailing(&self, lane: LaneId) -> bool {
        self.ram_buffer(lane).is_some_and(|b| b.trailing())
    }

    /// Purge, wipe and kick macros in the configured order.
    fn run_post_load(&mut self) {
        let sequence = self.settings.post_load_sequence.clone();
        for step in sequence {
            let Some(name) = self.settings.post_load_macro(step).map(str::to_string) else {
                continue;
            };
            debug!("Post-load {:?}: {}", step, name);
            if let Err(e) = self.devices.host.run_macro(&name) {
                warn!("{} failed: {}", name, e);
            }
        }
    }
}
