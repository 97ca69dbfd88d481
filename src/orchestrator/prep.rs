//! PREP and the lane sensor callbacks.

use log::{debug, info, warn};

use crate::config::LaneId;
use crate::error::{AfcError, Result};
use crate::indicator::LedRole;
use crate::lane::{LaneStatus, PrepAction};
use crate::orchestrator::{Afc, AfcState, Drive};

impl Afc {
    /// PREP: home the units and bring every lane to a known state.
    pub fn prep(&mut self) -> Result<()> {
        info!("AFC PREP");
        self.pump();

        for unit in 0..self.units.len() {
            if let Err(err) = self.units[unit].policy.home() {
                warn!("{}: {}", self.units[unit].name, err);
                self.handle_failure(None, &err);
            }
        }

        for index in 0..self.lanes.len() {
            let lane = LaneId(index);
            if self.lanes[index].tool_loaded {
                self.lanes[index].status = LaneStatus::Tooled;
                self.sync_lane(lane, true);
                self.engage_assist(lane);
                self.set_led(lane, LedRole::ToolLoaded);
                continue;
            }
            match (self.lanes[index].prep_state, self.lanes[index].load_state) {
                (true, true) => {
                    self.lanes[index].status = LaneStatus::Loaded;
                    self.set_led(lane, LedRole::Ready);
                }
                (true, false) => {
                    if let Err(err) = self.prep_advance(lane) {
                        self.handle_failure(Some(lane), &err);
                    }
                }
                (false, _) => {
                    self.lanes[index].status = LaneStatus::None;
                    self.lanes[index].loaded_to_hub = false;
                    self.set_led(lane, LedRole::NotReady);
                }
            }
        }

        self.ctx.prep_done = true;
        self.finish();
        self.persist();
        Ok(())
    }

    /// Advance filament from the prep sensor to the load sensor.
    pub(crate) fn prep_advance(&mut self, lane: LaneId) -> Result<()> {
        let step = self.settings.prep_step;
        let max_attempts = self.settings.prep_max_attempts;
        let (speed, accel) = (self.settings.short_moves_speed, self.settings.short_moves_accel);

        self.set_led(lane, LedRole::Loading);
        let moved = self.retry_until(
            Drive::Lane(lane),
            max_attempts,
            speed,
            accel,
            |_| step,
            |afc| afc.lanes[lane.0].load_state,
        );
        match moved {
            Ok(Some(moves)) => debug!("{} reached load after {} moves", self.lanes[lane.0].name, moves),
            Ok(None) => {
                self.disable_lane(lane);
                return Err(AfcError::FailedToReload {
                    lane: self.lanes[lane.0].name.clone(),
                    attempts: max_attempts,
                });
            }
            Err(err) => {
                self.disable_lane(lane);
                return Err(err);
            }
        }

        self.lanes[lane.0].status = LaneStatus::Loaded;
        self.set_led(lane, LedRole::Ready);

        if self.lanes[lane.0].load_to_hub && !self.lanes[lane.0].loaded_to_hub {
            self.hub_load_lane(lane)?;
        }
        self.disable_lane(lane);
        self.persist();
        Ok(())
    }

    /// Park the filament just before the hub. Skipped when the hub is busy.
    pub(crate) fn hub_load_lane(&mut self, lane: LaneId) -> Result<()> {
        if self.lanes[lane.0].is_direct() || self.lanes[lane.0].loaded_to_hub {
            return Ok(());
        }
        if !self.lanes[lane.0].load_state {
            return Err(AfcError::LaneNotReady {
                lane: self.lanes[lane.0].name.clone(),
            });
        }

        let result = self.with_hub(lane, |afc| {
            let hub_was_clear = afc.hub_state(lane) == Some(false);
            let previous = afc.lanes[lane.0].status;
            afc.lanes[lane.0].status = LaneStatus::HubLoading;

            let dist_hub = afc.lanes[lane.0].dist_hub;
            afc.move_lane_auto(lane, dist_hub, false)?;

            // The tip must stop short of the hub sensor.
            if hub_was_clear && afc.hub_state(lane) == Some(true) {
                let step = afc.settings.short_move_dis;
                let cap = afc.settings.max_hub_attempts;
                let (speed, accel) = (afc.settings.short_moves_speed, afc.settings.short_moves_accel);
                let cleared = afc.retry_until(
                    Drive::Lane(lane),
                    cap,
                    speed,
                    accel,
                    |_| -step,
                    |afc| afc.hub_state(lane) != Some(true),
                )?;
                if cleared.is_none() {
                    return Err(AfcError::HubNotClearing {
                        lane: afc.lanes[lane.0].name.clone(),
                        attempts: cap,
                    });
                }
            }

            afc.lanes[lane.0].status = previous;
            afc.lanes[lane.0].loaded_to_hub = true;
            Ok(())
        });

        match result {
            Err(AfcError::HubBusy { hub, owner }) => {
                info!(
                    "{} busy with {}, leaving {} at the load sensor",
                    hub, owner, self.lanes[lane.0].name
                );
                Ok(())
            }
            other => other,
        }
    }

    /// Prep sensor edge.
    pub(crate) fn on_prep(&mut self, lane: LaneId, level: bool) {
        self.lanes[lane.0].prep_state = level;
        if self.lanes[lane.0].prep_busy {
            return;
        }

        match self.lanes[lane.0].prep_action(self.ctx.prep_done) {
            PrepAction::Advance => {
                if self.ctx.state != AfcState::Idle {
                    debug!("{} inserted during a sequence, not advancing", self.lanes[lane.0].name);
                    return;
                }
                let now = self.devices.host.now();
                if !self.lanes[lane.0].prep_throttle.allow(now) {
                    debug!("{} prep edge throttled", self.lanes[lane.0].name);
                    return;
                }
                info!("{} filament inserted", self.lanes[lane.0].name);
                self.lanes[lane.0].prep_busy = true;
                self.ctx.state = AfcState::Moving;
                let result = self.prep_advance(lane);
                self.lanes[lane.0].prep_busy = false;
                self.finish();
                if let Err(err) = result {
                    self.handle_failure(Some(lane), &err);
                }
            }
            PrepAction::MarkLoaded => {
                self.lanes[lane.0].status = LaneStatus::Loaded;
                self.set_led(lane, LedRole::Ready);
                self.persist();
            }
            PrepAction::Cleared => {
                let l = &mut self.lanes[lane.0];
                l.status = LaneStatus::None;
                l.loaded_to_hub = false;
                self.set_led(lane, LedRole::NotReady);
                self.persist();
            }
            PrepAction::Ignore => {}
        }
    }

    /// Load sensor edge.
    pub(crate) fn on_load(&mut self, lane: LaneId, level: bool) {
        self.lanes[lane.0].load_state = level;

        if level {
            let l = &mut self.lanes[lane.0];
            if l.prep_state && l.status == LaneStatus::None {
                l.status = LaneStatus::Loaded;
                self.set_led(lane, LedRole::Ready);
            }
            return;
        }

        let runout = self.ctx.current == Some(lane)
            && self.lanes[lane.0].tool_loaded
            && self.ctx.state == AfcState::Idle
            && !self.ctx.in_toolchange
            && self.devices.host.is_printing();
        if runout {
            self.handle_runout(lane);
        }
    }
}
