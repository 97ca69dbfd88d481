//! CHANGE_TOOL and the infinite-spool runout handoff.

use log::{info, warn};

use crate::config::LaneId;
use crate::error::{AfcError, Result};
use crate::orchestrator::Afc;

impl Afc {
    /// CHANGE_TOOL: switch the toolhead to a lane, by name or tool alias.
    pub fn change_tool(&mut self, target: &str) -> Result<()> {
        let lane = match self.resolve_lane(target) {
            Ok(lane) => lane,
            Err(err) => return self.fail(None, err),
        };

        let counter = &mut self.ctx.toolchanges;
        if let Some(total) = counter.total {
            counter.current += 1;
            info!("Tool change {} of {}", counter.current, total);
        }

        if self.ctx.current == Some(lane) {
            info!("{} already loaded", self.lanes[lane.0].name);
            return Ok(());
        }
        self.change_to(lane, true)
    }

    /// Unload whatever is loaded, then load `lane`. The toolhead position is
    /// saved once per change and only restored when `restore` is set.
    pub(crate) fn change_to(&mut self, lane: LaneId, restore: bool) -> Result<()> {
        if let Err(err) = self.check_motion_allowed() {
            return self.fail(Some(lane), err);
        }

        if !self.ctx.in_toolchange {
            self.ctx.in_toolchange = true;
            let position = self.devices.toolhead.position();
            self.errors.save_position(position);
        }

        if let Some(current) = self.ctx.current {
            let name = self.lanes[current.0].name.clone();
            self.tool_unload(Some(&name))?;
        }
        let name = self.lanes[lane.0].name.clone();
        self.tool_load(&name)?;
        self.ctx.toolchanges.last_tool = Some(name);

        if restore {
            if let Err(err) = self.restore_position() {
                return self.fail(Some(lane), err);
            }
            self.ctx.in_toolchange = false;
        }
        self.persist();
        Ok(())
    }

    /// The current lane ran out while printing.
    pub(crate) fn handle_runout(&mut self, lane: LaneId) {
        let Some(next) = self.lanes[lane.0].runout_lane else {
            let err = AfcError::FilamentRunout {
                lane: self.lanes[lane.0].name.clone(),
            };
            self.handle_failure(Some(lane), &err);
            return;
        };
        info!(
            "Runout on {}, continuing with {}",
            self.lanes[lane.0].name, self.lanes[next.0].name
        );

        self.pause_for_intervention();
        if self.change_to(next, false).is_err() {
            return;
        }
        self.swap_maps(lane, next);

        if self.settings.unload_on_runout {
            if let Err(err) = self.eject(lane) {
                warn!("Could not eject {}: {}", self.lanes[lane.0].name, err);
                self.handle_failure(Some(lane), &err);
                return;
            }
        }
        self.persist();

        if let Err(err) = self.resume() {
            self.handle_failure(Some(next), &err);
        }
    }

    /// Exchange tool aliases between two lanes.
    pub(crate) fn swap_maps(&mut self, a: LaneId, b: LaneId) {
        if a == b {
            return;
        }
        let map = std::mem::take(&mut self.lanes[a.0].map);
        let other = std::mem::replace(&mut self.lanes[b.0].map, map);
        self.lanes[a.0].map = other;
    }
}
