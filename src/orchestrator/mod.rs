//! Orchestrator
//!
//! [`Afc`] owns every lane, hub, extruder, buffer and unit together with the
//! hardware handles, and runs the filament sequences over them:
//! - PREP at startup and prep/load edges afterwards
//! - TOOL_LOAD, TOOL_UNLOAD and CHANGE_TOOL
//! - lane commands, calibration and status
//!
//! Sensor edges are drained from the bus after every move, so callbacks
//! observe the path while a sequence is blocked on motion. Every bounded
//! loop goes through [`Afc::retry_until`]: the condition is checked before
//! each move and the cap counts moves issued.

mod assist;
mod calibrate;
mod change;
mod commands;
mod load;
mod persist;
mod prep;
mod status;
pub mod tip;
mod unload;

pub use calibrate::CalibrationTarget;

use std::collections::HashMap;
use std::fmt;

use log::{debug, info};
use serde::Serialize;

use crate::buffer::Buffer;
use crate::config::{
    AfcConfig, BufferId, ExtruderId, HubId, HubRef, LaneId, Registry, Settings, TipFormingConfig,
    UnitId, UnitKind,
};
use crate::error::{AfcError, Result};
use crate::extruder::Extruder;
use crate::hal::{
    Actuator, Hardware, Heater, Host, Indicator, SensorBus, Servo, SpoolMotor, SpoolRegistry,
    StateStore, Toolhead,
};
use crate::hub::Hub;
use crate::indicator::{LedPalette, LedRole};
use crate::lane::Lane;
use crate::recovery::ErrorHandler;
use crate::sensor::{Debouncer, PinKind};
use crate::state::CalibrationSnapshot;
use crate::unit::{CamSelectorPolicy, SharedHubPolicy, Unit, UnitPolicy};

/// Overall orchestrator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum AfcState {
    /// Constructed, PREP not run yet.
    #[default]
    Init,
    Idle,
    Loading,
    Unloading,
    /// Manual lane move, eject, hub load or calibration.
    Moving,
    Restoring,
    Error,
}

impl fmt::Display for AfcState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AfcState::Init => "Init",
            AfcState::Idle => "Idle",
            AfcState::Loading => "Loading",
            AfcState::Unloading => "Unloading",
            AfcState::Moving => "Moving",
            AfcState::Restoring => "Restoring",
            AfcState::Error => "Error",
        };
        write!(f, "{}", name)
    }
}

/// Toolchange counters for the current print.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ToolchangeCounter {
    /// Set with SET_TOOLCHANGES; counting is off while `None`.
    pub total: Option<u32>,
    pub current: u32,
    pub last_tool: Option<String>,
}

/// Mutable orchestration state shared by every sequence.
#[derive(Debug, Clone, Default)]
pub struct Context {
    /// Lane loaded in the toolhead.
    pub current: Option<LaneId>,
    /// Lane being loaded right now.
    pub current_loading: Option<LaneId>,
    pub state: AfcState,
    pub toolchanges: ToolchangeCounter,
    pub in_toolchange: bool,
    pub prep_done: bool,
    /// Bypass sensor level.
    pub bypass: bool,
    /// Startup mismatch waiting for RESET_FAILURE.
    pub pending_inconsistency: Option<String>,
    pub active_spool: Option<u32>,
}

/// Hardware handles resolved to typed ids.
pub(crate) struct Devices {
    /// By lane id.
    pub actuators: Vec<Box<dyn Actuator>>,
    /// By lane id.
    pub spool_motors: Vec<Option<Box<dyn SpoolMotor>>>,
    /// By hub id.
    pub cutters: Vec<Option<Box<dyn Servo>>>,
    /// By extruder id.
    pub heaters: Vec<Box<dyn Heater>>,
    pub toolhead: Box<dyn Toolhead>,
    pub host: Box<dyn Host>,
    pub sensors: Box<dyn SensorBus>,
    pub indicators: Box<dyn Indicator>,
    pub store: Box<dyn StateStore>,
    pub spool_registry: Option<Box<dyn SpoolRegistry>>,
}

/// What moves filament in a bounded loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Drive {
    Lane(LaneId),
    Extruder,
}

/// The automated filament changer.
pub struct Afc {
    pub(crate) settings: Settings,
    pub(crate) tip_forming: TipFormingConfig,
    pub(crate) registry: Registry,
    pub(crate) lanes: Vec<Lane>,
    pub(crate) hubs: Vec<Hub>,
    pub(crate) extruders: Vec<Extruder>,
    pub(crate) buffers: Vec<Buffer>,
    pub(crate) units: Vec<Unit>,
    pub(crate) ctx: Context,
    pub(crate) errors: ErrorHandler,
    pub(crate) palette: LedPalette,
    pub(crate) devices: Devices,
    pub(crate) calibration: CalibrationSnapshot,
    debouncers: HashMap<(PinKind, String), Debouncer>,
}

fn take_device<T: ?Sized>(
    devices: &mut HashMap<String, Box<T>>,
    device: &'static str,
    name: &str,
) -> Result<Box<T>> {
    devices
        .remove(name)
        .ok_or_else(|| AfcError::MissingDevice {
            device,
            name: name.to_string(),
        })
}

impl Afc {
    /// Validate `config`, bind every hardware handle to its object and
    /// restore the persisted snapshot.
    pub fn new(config: AfcConfig, mut hardware: Hardware) -> Result<Self> {
        let registry = config.validate()?;
        let palette = LedPalette::from_config(&config.leds)?;

        let mut actuators = Vec::with_capacity(config.lanes.len());
        let mut spool_motors = Vec::with_capacity(config.lanes.len());
        for lane in &config.lanes {
            actuators.push(take_device(&mut hardware.actuators, "actuator", &lane.name)?);
            spool_motors.push(match lane.espooler {
                Some(_) => Some(take_device(
                    &mut hardware.spool_motors,
                    "spool motor",
                    &lane.name,
                )?),
                None => None,
            });
        }

        let mut cutters = Vec::with_capacity(config.hubs.len());
        for hub in &config.hubs {
            cutters.push(match hub.cutter {
                Some(_) => Some(take_device(&mut hardware.cutters, "cutter servo", &hub.name)?),
                None => None,
            });
        }

        let mut heaters = Vec::with_capacity(config.extruders.len());
        for extruder in &config.extruders {
            heaters.push(take_device(&mut hardware.heaters, "heater", &extruder.name)?);
        }

        let mut units = Vec::with_capacity(config.units.len());
        for (position, unit) in config.units.iter().enumerate() {
            let id = UnitId(position);
            let policy: Box<dyn UnitPolicy> = match unit.kind {
                UnitKind::SharedHub => Box::new(SharedHubPolicy),
                UnitKind::CamSelector => Box::new(CamSelectorPolicy::new(
                    &unit.name,
                    take_device(&mut hardware.selectors, "selector", &unit.name)?,
                )),
            };
            units.push(Unit::new(id, unit, registry.unit_lanes(id).to_vec(), policy));
        }

        let lanes = config
            .lanes
            .iter()
            .enumerate()
            .map(|(position, lane)| {
                let id = LaneId(position);
                let refs = registry.lane_refs(id);
                Lane::new(
                    id,
                    lane,
                    refs,
                    &config.settings,
                    &units[refs.unit.0].led_chain,
                )
            })
            .collect();

        let hubs = config
            .hubs
            .iter()
            .enumerate()
            .map(|(position, hub)| Hub::new(HubId(position), hub))
            .collect();

        let extruders = config
            .extruders
            .iter()
            .enumerate()
            .map(|(position, extruder)| {
                let id = ExtruderId(position);
                Extruder::new(id, extruder, registry.extruder_buffer(id))
            })
            .collect();

        let buffers = config
            .buffers
            .iter()
            .enumerate()
            .map(|(position, buffer)| Buffer::new(BufferId(position), buffer))
            .collect();

        let devices = Devices {
            actuators,
            spool_motors,
            cutters,
            heaters,
            toolhead: hardware.toolhead,
            host: hardware.host,
            sensors: hardware.sensors,
            indicators: hardware.indicators,
            store: hardware.store,
            spool_registry: hardware.spool_registry,
        };

        let mut afc = Self {
            settings: config.settings,
            tip_forming: config.tip_forming,
            registry,
            lanes,
            hubs,
            extruders,
            buffers,
            units,
            ctx: Context::default(),
            errors: ErrorHandler::new(),
            palette,
            devices,
            calibration: CalibrationSnapshot::default(),
            debouncers: HashMap::new(),
        };

        afc.read_levels();
        afc.restore_persisted();
        afc.check_consistency();

        info!(
            "AFC ready: {} units, {} lanes, {} hubs",
            afc.units.len(),
            afc.lanes.len(),
            afc.hubs.len()
        );
        Ok(afc)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn lane(&self, name: &str) -> Option<&Lane> {
        self.lanes.iter().find(|l| l.name == name)
    }

    pub fn lanes(&self) -> &[Lane] {
        &self.lanes
    }

    pub fn hub(&self, name: &str) -> Option<&Hub> {
        self.hubs.iter().find(|h| h.name == name)
    }

    pub fn extruder(&self, name: &str) -> Option<&Extruder> {
        self.extruders.iter().find(|e| e.name == name)
    }

    pub fn buffer(&self, name: &str) -> Option<&Buffer> {
        self.buffers.iter().find(|b| b.name == name)
    }

    pub fn units(&self) -> &[Unit] {
        &self.units
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn state(&self) -> AfcState {
        self.ctx.state
    }

    pub fn errors(&self) -> &ErrorHandler {
        &self.errors
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Name of the lane loaded in the toolhead.
    pub fn current_lane(&self) -> Option<&str> {
        self.ctx.current.map(|id| self.lanes[id.0].name.as_str())
    }

    /// Lane with `tool_loaded` set, if any.
    pub(crate) fn tool_loaded_lane(&self) -> Option<LaneId> {
        self.lanes.iter().find(|l| l.tool_loaded).map(|l| l.id)
    }

    /// Resolve a lane name or tool alias.
    pub(crate) fn resolve_lane(&self, target: &str) -> Result<LaneId> {
        self.registry.lane_id(target).or_else(|err| {
            self.lanes
                .iter()
                .find(|l| l.map == target)
                .map(|l| l.id)
                .ok_or(err)
        })
    }

    // ========================================================================
    // Sensors
    // ========================================================================

    /// Drain sensor edges and react to them. Host reactor hook.
    pub fn poll_sensors(&mut self) {
        self.pump();
    }

    /// Seed sensor state from current levels; no edges exist yet at startup.
    fn read_levels(&mut self) {
        let sensors = &self.devices.sensors;
        for lane in self.lanes.iter_mut() {
            lane.prep_state = sensors.level(PinKind::Prep, &lane.name);
            lane.load_state = sensors.level(PinKind::Load, &lane.name);
        }
        for hub in self.hubs.iter_mut() {
            hub.state = sensors.level(PinKind::Hub, &hub.name);
        }
        for extruder in self.extruders.iter_mut() {
            if extruder.has_switch() {
                extruder.tool_start_state = sensors.level(PinKind::ToolStart, &extruder.name);
            }
            if extruder.tool_end {
                extruder.tool_end_state = sensors.level(PinKind::ToolEnd, &extruder.name);
            }
        }
        for buffer in self.buffers.iter_mut() {
            for pin in [PinKind::BufferAdvance, PinKind::BufferTrailing, PinKind::Belay] {
                let level = sensors.level(pin, &buffer.name);
                buffer.on_event(pin, level);
            }
        }
        self.ctx.bypass = sensors.level(PinKind::Bypass, crate::sensor::BYPASS_OWNER);
        // Anything queued before startup is already reflected in the levels
        self.devices.sensors.poll();
    }

    pub(crate) fn pump(&mut self) {
        let events = self.devices.sensors.poll();
        let window = self.settings.debounce_delay;
        let mut accepted = Vec::new();

        for event in events {
            let debouncer = self
                .debouncers
                .entry((event.kind, event.owner.clone()))
                .or_insert_with(|| Debouncer::new(window, !event.state));
            if let Some(level) = debouncer.feed(event.timestamp, event.state) {
                accepted.push((event.kind, event.owner, level));
            }
        }

        let now = self.devices.host.now();
        for ((kind, owner), debouncer) in self.debouncers.iter_mut() {
            if let Some(level) = debouncer.settle(now) {
                accepted.push((*kind, owner.clone(), level));
            }
        }

        for (kind, owner, level) in accepted {
            self.dispatch(kind, &owner, level);
        }
    }

    fn dispatch(&mut self, kind: PinKind, owner: &str, level: bool) {
        debug!("{} {} -> {}", owner, kind, level);
        match kind {
            PinKind::Prep | PinKind::Load => {
                let Ok(lane) = self.registry.lane_id(owner) else {
                    debug!("Edge for unknown lane {}", owner);
                    return;
                };
                if kind == PinKind::Prep {
                    self.on_prep(lane, level);
                } else {
                    self.on_load(lane, level);
                }
            }
            PinKind::Hub => {
                if let Some(hub) = self.registry.hub_id(owner) {
                    self.hubs[hub.0].state = level;
                }
            }
            PinKind::ToolStart | PinKind::ToolEnd => {
                if let Some(extruder) = self.registry.extruder_id(owner) {
                    let extruder = &mut self.extruders[extruder.0];
                    if kind == PinKind::ToolStart {
                        extruder.tool_start_state = level;
                    } else {
                        extruder.tool_end_state = level;
                    }
                }
            }
            PinKind::BufferAdvance | PinKind::BufferTrailing | PinKind::Belay => {
                if let Some(buffer) = self.registry.buffer_id(owner) {
                    let action = self.buffers[buffer.0].on_event(kind, level);
                    if let (Some(action), Some(lane)) = (action, self.buffers[buffer.0].lane()) {
                        self.apply_buffer_action(lane, action);
                    }
                }
            }
            PinKind::Bypass => {
                if self.ctx.bypass != level {
                    info!(
                        "Bypass {}",
                        if level { "filament detected" } else { "cleared" }
                    );
                }
                self.ctx.bypass = level;
            }
        }
    }

    // ========================================================================
    // Motion
    // ========================================================================

    /// Relative lane move, followed by a sensor drain.
    pub(crate) fn move_lane(
        &mut self,
        lane: LaneId,
        distance: f64,
        speed: f64,
        accel: f64,
        assist: bool,
    ) -> Result<()> {
        let actuator = &mut self.devices.actuators[lane.0];
        actuator.enable(true);
        actuator.move_filament(distance, speed, accel, assist)?;
        self.pump();
        Ok(())
    }

    /// Lane move using the long or short profile depending on distance.
    pub(crate) fn move_lane_auto(&mut self, lane: LaneId, distance: f64, assist: bool) -> Result<()> {
        let (speed, accel) = self.settings.move_profile(distance);
        self.move_lane(lane, distance, speed, accel, assist)
    }

    pub(crate) fn extrude(&mut self, distance: f64, speed: f64) -> Result<()> {
        self.devices.toolhead.extrude(distance, speed)?;
        self.devices.toolhead.wait_moves();
        self.pump();
        Ok(())
    }

    pub(crate) fn sync_lane(&mut self, lane: LaneId, synced: bool) {
        self.devices.actuators[lane.0].sync_to_extruder(synced);
    }

    pub(crate) fn disable_lane(&mut self, lane: LaneId) {
        self.devices.actuators[lane.0].enable(false);
    }

    /// Move in `distance(attempt)` steps until `done` holds. The condition is
    /// checked before every move; returns the number of moves issued, or
    /// `None` when `max_attempts` moves did not satisfy it.
    pub(crate) fn retry_until<D, F>(
        &mut self,
        drive: Drive,
        max_attempts: u32,
        speed: f64,
        accel: f64,
        distance: D,
        done: F,
    ) -> Result<Option<u32>>
    where
        D: Fn(u32) -> f64,
        F: Fn(&Self) -> bool,
    {
        for attempt in 0..max_attempts {
            if done(self) {
                return Ok(Some(attempt));
            }
            match drive {
                Drive::Lane(lane) => self.move_lane(lane, distance(attempt), speed, accel, false)?,
                Drive::Extruder => self.extrude(distance(attempt), speed)?,
            }
        }
        Ok(done(self).then_some(max_attempts))
    }

    /// Run `sequence` holding the lane's hub token. The token is released
    /// whatever the outcome.
    pub(crate) fn with_hub<T>(
        &mut self,
        lane: LaneId,
        sequence: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<T> {
        let hub = match self.lanes[lane.0].hub {
            HubRef::Hub(hub) => Some(hub),
            HubRef::Direct => None,
        };
        if let Some(hub) = hub {
            if let Err(owner) = self.hubs[hub.0].try_acquire(lane) {
                return Err(AfcError::HubBusy {
                    hub: self.hubs[hub.0].name.clone(),
                    owner: self.lanes[owner.0].name.clone(),
                });
            }
        }
        let result = sequence(self);
        if let Some(hub) = hub {
            self.hubs[hub.0].release(lane);
        }
        result
    }

    /// Hub sensor level of the lane's hub; direct lanes have none.
    pub(crate) fn hub_state(&self, lane: LaneId) -> Option<bool> {
        match self.lanes[lane.0].hub {
            HubRef::Hub(hub) => Some(self.hubs[hub.0].state),
            HubRef::Direct => None,
        }
    }

    /// Bowden length between the hub (or lane, for direct lanes) and the tool.
    pub(crate) fn bowden_length(&self, lane: LaneId) -> f64 {
        let lane = &self.lanes[lane.0];
        match lane.hub {
            HubRef::Hub(hub) => self.hubs[hub.0].bowden_length,
            HubRef::Direct => lane.bowden_length.unwrap_or_default(),
        }
    }

    // ========================================================================
    // Guards and helpers
    // ========================================================================

    /// Common preconditions for commands that move filament.
    pub(crate) fn check_motion_allowed(&self) -> Result<()> {
        if !self.devices.toolhead.is_homed() {
            return Err(AfcError::NotHomed);
        }
        if self.ctx.bypass {
            return Err(AfcError::BypassActive);
        }
        if let Some(reason) = &self.ctx.pending_inconsistency {
            return Err(AfcError::StateUnconfirmed {
                reason: reason.clone(),
            });
        }
        Ok(())
    }

    /// Extrusion temperature for a lane and whether it is the fallback.
    pub(crate) fn lane_temperature(&self, lane: LaneId) -> (f64, bool) {
        let spool = &self.lanes[lane.0].spool;
        if let Some(temp) = spool.extruder_temp {
            return (temp, false);
        }
        if let Some(temp) = spool
            .material
            .as_ref()
            .and_then(|m| self.settings.default_material_temps.get(m))
        {
            return (*temp, false);
        }
        (self.settings.min_extrude_temp + 5.0, true)
    }

    /// Bring the lane's extruder into its extrusion band.
    pub(crate) fn heat_for(&mut self, lane: LaneId) -> Result<()> {
        let (target, fallback) = self.lane_temperature(lane);
        let tolerance = self.settings.temp_tolerance;
        let heater = &mut self.devices.heaters[self.lanes[lane.0].extruder.0];
        let current = heater.temperature();

        if current < target - tolerance {
            info!("Heating to {:.0} for {}", target, self.lanes[lane.0].name);
            heater.set_target(target, true)?;
        } else if current > target + tolerance && !fallback {
            heater.set_target(target, false)?;
        }
        Ok(())
    }

    /// Show `role` on the lane LED, as adjusted by the unit policy.
    pub(crate) fn set_led(&mut self, lane: LaneId, role: LedRole) {
        let lane = &self.lanes[lane.0];
        let role = self.units[lane.unit.0].policy.led_role(lane.index, role);
        let color = self.palette.color(role);
        self.devices
            .indicators
            .set_color(&lane.led.chain, lane.led.index, color);
    }

    /// LED role matching a lane's idle state.
    pub(crate) fn idle_led(&self, lane: LaneId) -> LedRole {
        let lane = &self.lanes[lane.0];
        if lane.tool_loaded {
            LedRole::ToolLoaded
        } else if lane.is_ready() {
            LedRole::Ready
        } else if lane.prep_state {
            LedRole::PrepLoaded
        } else {
            LedRole::NotReady
        }
    }

    pub(crate) fn refresh_led(&mut self, lane: LaneId) {
        let role = self.idle_led(lane);
        self.set_led(lane, role);
    }

    /// Enter `state` for a motion sequence. A pending error state is kept.
    pub(crate) fn begin(&mut self, state: AfcState) {
        if self.ctx.state != AfcState::Error {
            self.ctx.state = state;
        }
    }

    /// Leave a motion sequence without error.
    pub(crate) fn finish(&mut self) {
        if self.ctx.state != AfcState::Error {
            self.ctx.state = AfcState::Idle;
        }
    }

    /// Route a failed command through the error handler and hand it back.
    pub(crate) fn fail<T>(&mut self, lane: Option<LaneId>, err: AfcError) -> Result<T> {
        self.handle_failure(lane, &err);
        Err(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::commands::bench_config;
    use crate::hal::sim::{SimHandle, SimWorld};
    use crate::hal::MemoryStore;

    fn bench() -> (Afc, SimHandle) {
        let config = bench_config();
        let world = SimWorld::from_config(&config);
        let hardware = SimWorld::hardware(&world, Box::new(MemoryStore::new()));
        let mut afc = Afc::new(config, hardware).unwrap();
        afc.prep().unwrap();
        (afc, world)
    }

    fn hub_of(afc: &Afc, lane: LaneId) -> HubId {
        match afc.lanes[lane.0].hub {
            HubRef::Hub(hub) => hub,
            HubRef::Direct => panic!("bench lanes share a hub"),
        }
    }

    #[test]
    fn test_held_hub_rejects_other_lane() {
        let (mut afc, world) = bench();
        let lane1 = afc.registry.lane_id("lane1").unwrap();
        let hub = hub_of(&afc, lane1);
        afc.hubs[hub.0].try_acquire(lane1).unwrap();
        let count = world.borrow().motion_count();

        let err = afc.lane_move("lane2", 10.0).unwrap_err();
        match &err {
            AfcError::HubBusy { owner, .. } => assert_eq!(owner, "lane1"),
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(err.error_code(), "HUB_BUSY");
        assert_eq!(world.borrow().motion_count(), count);
        assert!(!afc.errors.is_error());
        assert_eq!(afc.hubs[hub.0].owner(), Some(lane1));

        afc.hubs[hub.0].release(lane1);
        afc.lane_move("lane2", 10.0).unwrap();
        assert!(afc.hubs[hub.0].owner().is_none());
    }

    #[test]
    fn test_hub_token_released_when_sequence_fails() {
        let (mut afc, _world) = bench();
        let lane1 = afc.registry.lane_id("lane1").unwrap();
        let hub = hub_of(&afc, lane1);

        let result: Result<()> = afc.with_hub(lane1, |afc| {
            assert_eq!(afc.hubs[hub.0].owner(), Some(lane1));
            Err(AfcError::NotHomed)
        });

        assert!(result.is_err());
        assert!(afc.hubs[hub.0].owner().is_none());
    }
}
