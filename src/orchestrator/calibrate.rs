//! CALIBRATE_AFC: measure hub and bowden distances with the lane sensors.

use log::{info, warn};

use crate::config::{HubId, HubRef, LaneId};
use crate::error::{AfcError, Result};
use crate::indicator::LedRole;
use crate::lane::LaneStatus;
use crate::orchestrator::{Afc, AfcState, Drive};
use crate::state::CalibrationSnapshot;

/// Longest path searched while calibrating (mm).
const MAX_CALIBRATION_TRAVEL: f64 = 3000.0;

/// What CALIBRATE_AFC measures `dist_hub` for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationTarget<'a> {
    All,
    Lane(&'a str),
    /// Only the bowden length.
    BowdenOnly,
}

impl<'a> CalibrationTarget<'a> {
    /// `all`, a lane name, or an empty string for none.
    pub fn parse(value: &'a str) -> Self {
        match value.trim() {
            "" => CalibrationTarget::BowdenOnly,
            v if v.eq_ignore_ascii_case("all") => CalibrationTarget::All,
            v => CalibrationTarget::Lane(v),
        }
    }
}

impl Afc {
    /// CALIBRATE_AFC. `bowden` names the lane used to measure its hub's
    /// bowden length. Returns the values measured by this run.
    pub fn calibrate(
        &mut self,
        target: CalibrationTarget<'_>,
        bowden: Option<&str>,
    ) -> Result<CalibrationSnapshot> {
        if self.devices.host.is_printing() {
            return Err(AfcError::PrintInProgress {
                action: "calibrate",
            });
        }
        if let Err(err) = self.check_motion_allowed() {
            return self.fail(None, err);
        }

        let lanes: Vec<LaneId> = match target {
            CalibrationTarget::All => self
                .lanes
                .iter()
                .filter(|l| {
                    let ready = !l.is_direct() && !l.tool_loaded && l.load_state;
                    if !ready {
                        info!("Skipping {} for calibration", l.name);
                    }
                    ready
                })
                .map(|l| l.id)
                .collect(),
            CalibrationTarget::Lane(name) => match self.resolve_lane(name) {
                Ok(lane) => vec![lane],
                Err(err) => return self.fail(None, err),
            },
            CalibrationTarget::BowdenOnly => Vec::new(),
        };
        let bowden_lane = match bowden.map(|name| self.resolve_lane(name)).transpose() {
            Ok(lane) => lane,
            Err(err) => return self.fail(None, err),
        };

        let mut measured = CalibrationSnapshot::default();
        self.begin(AfcState::Moving);

        for lane in lanes {
            match self.calibrate_lane(lane, |afc, lane| afc.measure_dist_hub(lane)) {
                Ok(dist_hub) => {
                    let name = self.lanes[lane.0].name.clone();
                    info!("{} dist_hub: {:.1}", name, dist_hub);
                    self.lanes[lane.0].dist_hub = dist_hub;
                    measured.dist_hub.insert(name, dist_hub);
                }
                Err(err) => return self.fail(Some(lane), err),
            }
        }

        if let Some(lane) = bowden_lane {
            let HubRef::Hub(hub) = self.lanes[lane.0].hub else {
                let err = AfcError::InvalidConfig {
                    field: format!("{}.bowden_length", self.lanes[lane.0].name),
                    reason: "bowden calibration needs a lane behind a hub".to_string(),
                };
                return self.fail(None, err);
            };
            match self.calibrate_lane(lane, |afc, lane| afc.measure_bowden(lane, hub)) {
                Ok(length) => {
                    let name = self.hubs[hub.0].name.clone();
                    info!("{} bowden_length: {:.1}", name, length);
                    self.hubs[hub.0].bowden_length = length;
                    measured.bowden_length.insert(name, length);
                }
                Err(err) => return self.fail(Some(lane), err),
            }
        }

        self.calibration
            .dist_hub
            .extend(measured.dist_hub.iter().map(|(k, v)| (k.clone(), *v)));
        self.calibration
            .bowden_length
            .extend(measured.bowden_length.iter().map(|(k, v)| (k.clone(), *v)));
        self.finish();
        self.persist();
        Ok(measured)
    }

    /// Run one measurement holding the hub, with the lane marked busy.
    fn calibrate_lane(
        &mut self,
        lane: LaneId,
        measure: impl FnOnce(&mut Self, LaneId) -> Result<f64>,
    ) -> Result<f64> {
        let l = &self.lanes[lane.0];
        if l.tool_loaded {
            return Err(AfcError::LaneInToolhead {
                lane: l.name.clone(),
            });
        }
        if !l.load_state {
            return Err(AfcError::LaneNotReady {
                lane: l.name.clone(),
            });
        }
        if let HubRef::Hub(hub) = l.hub {
            if self.hubs[hub.0].state {
                return Err(AfcError::HubNotClear {
                    lane: l.name.clone(),
                    hub: self.hubs[hub.0].name.clone(),
                });
            }
        }

        let previous = self.lanes[lane.0].status;
        self.lanes[lane.0].status = LaneStatus::Calibrating;
        self.set_led(lane, LedRole::Loading);

        let value = self.with_hub(lane, |afc| measure(afc, lane))?;

        self.lanes[lane.0].status = previous;
        self.lanes[lane.0].loaded_to_hub = true;
        self.disable_lane(lane);
        self.refresh_led(lane);
        Ok(value)
    }

    fn calibration_cap(&self) -> u32 {
        (MAX_CALIBRATION_TRAVEL / self.settings.short_move_dis).ceil() as u32
    }

    /// Travel from the load sensor trip to the hub trip.
    fn measure_dist_hub(&mut self, lane: LaneId) -> Result<f64> {
        let HubRef::Hub(hub) = self.lanes[lane.0].hub else {
            return Err(AfcError::InvalidConfig {
                field: format!("{}.dist_hub", self.lanes[lane.0].name),
                reason: "direct lanes have no hub".to_string(),
            });
        };
        let short = self.settings.short_move_dis;
        let (speed, accel) = (self.settings.short_moves_speed, self.settings.short_moves_accel);
        let name = self.lanes[lane.0].name.clone();

        // Find the load sensor edge from behind.
        let cap = self.settings.prep_max_attempts;
        let behind = self.retry_until(Drive::Lane(lane), cap, speed, accel, |_| -short, |afc| {
            !afc.lanes[lane.0].load_state
        })?;
        if behind.is_none() {
            return Err(AfcError::EjectFailed {
                lane: name,
                attempts: cap,
            });
        }
        let back = self.retry_until(Drive::Lane(lane), cap, speed, accel, |_| short, |afc| {
            afc.lanes[lane.0].load_state
        })?;
        if back.is_none() {
            return Err(AfcError::FailedToReload {
                lane: name,
                attempts: cap,
            });
        }

        let cap = self.calibration_cap();
        let moves = self.retry_until(Drive::Lane(lane), cap, speed, accel, |_| short, |afc| {
            afc.hubs[hub.0].state
        })?;
        let Some(moves) = moves else {
            return Err(AfcError::PastHub {
                lane: name,
                attempts: cap,
            });
        };
        self.park_behind_hub(lane, hub)?;
        Ok(moves as f64 * short - short)
    }

    /// Travel from the hub trip to the toolhead sensor trip.
    fn measure_bowden(&mut self, lane: LaneId, hub: HubId) -> Result<f64> {
        let short = self.settings.short_move_dis;
        let (speed, accel) = (self.settings.short_moves_speed, self.settings.short_moves_accel);
        let name = self.lanes[lane.0].name.clone();
        let cap = self.calibration_cap();

        let at_hub = self.retry_until(Drive::Lane(lane), cap, speed, accel, |_| short, |afc| {
            afc.hubs[hub.0].state
        })?;
        if at_hub.is_none() {
            return Err(AfcError::PastHub {
                lane: name,
                attempts: cap,
            });
        }

        let ram = self.extruders[self.lanes[lane.0].extruder.0].uses_ram();
        let moves = self.retry_until(Drive::Lane(lane), cap, speed, accel, |_| short, |afc| {
            afc.filament_at_tool(lane, ram)
        })?;
        let Some(moves) = moves else {
            return Err(AfcError::FailedToReachTool {
                lane: name,
                attempts: cap,
            });
        };
        let travelled = moves as f64 * short;

        self.move_lane(
            lane,
            -travelled,
            self.settings.long_moves_speed,
            self.settings.long_moves_accel,
            false,
        )?;
        self.park_behind_hub(lane, hub)?;
        Ok(travelled - self.hubs[hub.0].clear_step)
    }

    /// Short retracts until the hub sensor clears.
    fn park_behind_hub(&mut self, lane: LaneId, hub: HubId) -> Result<()> {
        let short = self.settings.short_move_dis;
        let cap = self.hubs[hub.0].clear_attempts(short);
        let (speed, accel) = (self.settings.short_moves_speed, self.settings.short_moves_accel);
        let cleared = self.retry_until(Drive::Lane(lane), cap, speed, accel, |_| -short, |afc| {
            !afc.hubs[hub.0].state
        })?;
        if cleared.is_none() {
            return Err(AfcError::HubNotClearing {
                lane: self.lanes[lane.0].name.clone(),
                attempts: cap,
            });
        }
        Ok(())
    }

    /// Apply stored calibration results over the configured distances.
    pub(crate) fn apply_calibration(&mut self, calibration: CalibrationSnapshot) {
        for (name, dist_hub) in &calibration.dist_hub {
            match self.lanes.iter_mut().find(|l| &l.name == name) {
                Some(lane) => lane.dist_hub = *dist_hub,
                None => warn!("Calibration for unknown lane {} ignored", name),
            }
        }
        for (name, length) in &calibration.bowden_length {
            if let Some(hub) = self.hubs.iter_mut().find(|h| &h.name == name) {
                hub.bowden_length = *length;
            } else if let Some(lane) = self.lanes.iter_mut().find(|l| &l.name == name) {
                lane.bowden_length = Some(*length);
            } else {
                warn!("Calibration for unknown hub {} ignored", name);
            }
        }
        self.calibration = calibration;
    }
}
