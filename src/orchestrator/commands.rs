//! Lane commands: manual moves, eject, hub load and spool metadata.

use log::{info, warn};

use crate::config::{LaneId, NO_RUNOUT_LANE};
use crate::error::{AfcError, Result};
use crate::indicator::{Color, LedRole};
use crate::lane::LaneStatus;
use crate::orchestrator::{Afc, AfcState, Drive};

impl Afc {
    // ========================================================================
    // Motion commands
    // ========================================================================

    /// LANE_MOVE: relative move of a lane that is not in the toolhead.
    pub fn lane_move(&mut self, name: &str, distance: f64) -> Result<()> {
        let lane = self.motion_target(name)?;
        self.begin(AfcState::Moving);
        let result = self.with_hub(lane, |afc| {
            afc.move_lane_auto(lane, distance, false)?;
            afc.disable_lane(lane);
            Ok(())
        });
        match result {
            Ok(()) => {
                self.finish();
                Ok(())
            }
            Err(err) => self.fail(Some(lane), err),
        }
    }

    /// LANE_UNLOAD: eject a lane's filament back out of the unit.
    pub fn lane_unload(&mut self, name: &str) -> Result<()> {
        let lane = self.motion_target(name)?;
        self.begin(AfcState::Moving);
        match self.eject(lane) {
            Ok(()) => {
                self.finish();
                Ok(())
            }
            Err(err) => self.fail(Some(lane), err),
        }
    }

    /// HUB_LOAD: park a lane's filament at the hub on demand.
    pub fn hub_load(&mut self, name: &str) -> Result<()> {
        let lane = self.motion_target(name)?;
        self.begin(AfcState::Moving);
        let result = self.hub_load_lane(lane);
        self.disable_lane(lane);
        match result {
            Ok(()) => {
                self.finish();
                self.persist();
                Ok(())
            }
            Err(err) => self.fail(Some(lane), err),
        }
    }

    /// Resolve a lane for a manual motion command and check it may move.
    fn motion_target(&mut self, name: &str) -> Result<LaneId> {
        let lane = match self.resolve_lane(name) {
            Ok(lane) => lane,
            Err(err) => return self.fail(None, err),
        };
        let checked = self.check_motion_allowed().and_then(|_| {
            if self.lanes[lane.0].tool_loaded {
                Err(AfcError::LaneInToolhead {
                    lane: self.lanes[lane.0].name.clone(),
                })
            } else {
                Ok(())
            }
        });
        match checked {
            Ok(()) => Ok(lane),
            Err(err) => self.fail(Some(lane), err),
        }
    }

    /// Retract from the hub past the load sensor and park the tip.
    pub(crate) fn eject(&mut self, lane: LaneId) -> Result<()> {
        if self.lanes[lane.0].tool_loaded {
            return Err(AfcError::LaneInToolhead {
                lane: self.lanes[lane.0].name.clone(),
            });
        }
        info!("Ejecting {}", self.lanes[lane.0].name);
        self.lanes[lane.0].status = LaneStatus::Ejecting;
        self.set_led(lane, LedRole::Unloading);

        if self.lanes[lane.0].loaded_to_hub {
            let dist_hub = self.lanes[lane.0].dist_hub;
            self.move_lane_auto(lane, -dist_hub, false)?;
            self.lanes[lane.0].loaded_to_hub = false;
        }

        let short = self.settings.short_move_dis;
        let cap = self.settings.prep_max_attempts;
        let (speed, accel) = (self.settings.short_moves_speed, self.settings.short_moves_accel);
        let cleared = self.retry_until(
            Drive::Lane(lane),
            cap,
            speed,
            accel,
            |_| -short,
            |afc| !afc.lanes[lane.0].load_state,
        )?;
        if cleared.is_none() {
            return Err(AfcError::EjectFailed {
                lane: self.lanes[lane.0].name.clone(),
                attempts: cap,
            });
        }

        let park = self.lanes[lane.0].park_dist;
        self.move_lane_auto(lane, -park, false)?;
        self.disable_lane(lane);

        self.lanes[lane.0].status = LaneStatus::None;
        self.refresh_led(lane);
        self.persist();
        Ok(())
    }

    // ========================================================================
    // Spool metadata
    // ========================================================================

    /// SET_SPOOL_ID. With a spool registry the material, colour and weight
    /// are filled in from it.
    pub fn set_spool_id(&mut self, name: &str, spool_id: Option<u32>) -> Result<()> {
        let lane = self.resolve_lane(name)?;

        let info = match (spool_id, self.devices.spool_registry.as_ref()) {
            (Some(id), Some(registry)) => match registry.lookup(id) {
                Ok(info) => Some(info),
                Err(e) => {
                    warn!("Spool {} lookup failed: {}", id, e);
                    None
                }
            },
            _ => None,
        };

        let spool = &mut self.lanes[lane.0].spool;
        spool.spool_id = spool_id;
        match (spool_id, info) {
            (None, _) => {
                spool.material = None;
                spool.color = None;
                spool.weight = None;
            }
            (Some(_), Some(info)) => {
                spool.material = info.material.or(spool.material.take());
                spool.color = info.color_hex.or(spool.color.take());
                spool.weight = info.remaining_weight.or(spool.weight);
                if info.extruder_temp.is_some() {
                    spool.extruder_temp = info.extruder_temp;
                }
            }
            (Some(_), None) => {}
        }

        if self.ctx.current == Some(lane) {
            self.ctx.active_spool = spool_id;
            if let Some(registry) = self.devices.spool_registry.as_mut() {
                if let Err(e) = registry.set_active(spool_id) {
                    warn!("Could not set active spool: {}", e);
                }
            }
        }
        self.persist();
        Ok(())
    }

    /// SET_COLOR: `#rrggbb`, `rrggbb` or `r,g,b`.
    pub fn set_color(&mut self, name: &str, color: &str) -> Result<()> {
        let lane = self.resolve_lane(name)?;
        let color = color.trim();
        let parsed = if !color.contains(',') && !color.starts_with('#') {
            Color::parse(&format!("#{}", color))?
        } else {
            Color::parse(color)?
        };
        self.lanes[lane.0].spool.color = Some(parsed.to_hex());
        self.persist();
        Ok(())
    }

    pub fn set_material(&mut self, name: &str, material: &str) -> Result<()> {
        let lane = self.resolve_lane(name)?;
        self.lanes[lane.0].spool.material = Some(material.trim().to_string());
        self.persist();
        Ok(())
    }

    /// SET_WEIGHT in grams.
    pub fn set_weight(&mut self, name: &str, weight: f64) -> Result<()> {
        let lane = self.resolve_lane(name)?;
        if weight < 0.0 {
            return Err(AfcError::InvalidConfig {
                field: "weight".to_string(),
                reason: format!("must not be negative, got {}", weight),
            });
        }
        self.lanes[lane.0].spool.weight = Some(weight);
        self.persist();
        Ok(())
    }

    /// SET_RUNOUT. `NONE` clears the runout lane.
    pub fn set_runout(&mut self, name: &str, runout: &str) -> Result<()> {
        let lane = self.resolve_lane(name)?;
        let runout = if runout.eq_ignore_ascii_case(NO_RUNOUT_LANE) {
            None
        } else {
            let other = self.resolve_lane(runout)?;
            if other == lane {
                return Err(AfcError::InvalidConfig {
                    field: format!("{}.runout_lane", self.lanes[lane.0].name),
                    reason: "a lane cannot be its own runout lane".to_string(),
                });
            }
            Some(other)
        };
        self.lanes[lane.0].runout_lane = runout;
        info!(
            "{} runout lane: {}",
            self.lanes[lane.0].name,
            runout.map_or(NO_RUNOUT_LANE, |r| self.lanes[r.0].name.as_str())
        );
        self.persist();
        Ok(())
    }

    /// SET_MAP. The lane holding `map` takes over this lane's old alias.
    pub fn set_map(&mut self, name: &str, map: &str) -> Result<()> {
        let lane = self.resolve_lane(name)?;
        let map = map.trim();
        match self.lanes.iter().find(|l| l.map == map).map(|l| l.id) {
            Some(holder) => self.swap_maps(lane, holder),
            None => self.lanes[lane.0].map = map.to_string(),
        }
        self.persist();
        Ok(())
    }

    /// SET_TOOLCHANGES. Zero turns counting off.
    pub fn set_toolchanges(&mut self, total: u32) {
        let counter = &mut self.ctx.toolchanges;
        counter.total = (total > 0).then_some(total);
        counter.current = 0;
        self.persist();
    }
}
