//! Simulated filament path
//!
//! Models each lane as a filament tip moving along a fixed path of sensors:
//! load sensor, hub, toolhead sensor, extruder gears. Moves issued through
//! the hardware handles update the tips and record sensor edges, so the
//! orchestrator sees the same event stream it would get from a printer.
//!
//! All handles share one [`SimWorld`] through `Rc<RefCell<_>>`; the control
//! loop is single threaded.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use crate::config::{AfcConfig, BufferKindConfig, ToolSensorMode, UnitKind, DIRECT_HUB};
use crate::error::{AfcError, Result};
use crate::hal::{
    Actuator, AxisTarget, Hardware, Heater, Host, Indicator, Position, Selector, SensorBus,
    Servo, SpoolInfo, SpoolMotor, SpoolRegistry, StateStore, Toolhead,
};
use crate::indicator::Color;
use crate::sensor::{PinKind, SensorEvent, BYPASS_OWNER};

/// Load sensor position measured from the prep sensor (mm).
pub const SIM_LOAD_AT: f64 = 45.0;
/// Gap between the end of `dist_hub` and the hub sensor (mm).
pub const SIM_HUB_GAP: f64 = 20.0;
/// Extra distance past bowden + clear step before the toolhead sensor (mm).
pub const SIM_TOOL_GAP: f64 = 15.0;
/// Toolhead end sensor distance after the start sensor (mm).
pub const SIM_TOOL_END_GAP: f64 = 20.0;

/// Shared handle to the simulated world.
pub type SimHandle = Rc<RefCell<SimWorld>>;

/// Slack state of the filament between lane drive and extruder gears.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Tension {
    #[default]
    Neutral,
    /// Lane pushed against gripping gears.
    Compressed,
    /// Lane pulled against gripping gears.
    Stretched,
}

/// One simulated lane.
#[derive(Debug, Clone)]
pub struct SimLane {
    pub name: String,
    pub hub: Option<String>,
    pub extruder: String,
    pub buffer: Option<String>,
    /// Filament present at the prep sensor.
    pub inserted: bool,
    /// Filament tip position along the lane path (mm).
    pub tip: f64,
    pub load_at: f64,
    pub hub_at: f64,
    /// Toolhead sensor, also where the extruder gears grip.
    pub tool_start_at: f64,
    pub tool_end_at: f64,
    pub tool_stn: f64,
    /// Jam: the tip cannot advance beyond this.
    pub max_tip: Option<f64>,
    /// Snag: the tip cannot retract below this.
    pub min_tip: Option<f64>,
    pub enabled: bool,
    pub synced: bool,
    pub multiplier: f64,
    pub tension: Tension,
    /// Distances of every actuator move issued to this lane.
    pub moves: Vec<f64>,
}

impl SimLane {
    fn clamp(&self, target: f64) -> f64 {
        let mut tip = target;
        if let Some(max) = self.max_tip {
            if tip > max {
                tip = max.max(self.tip);
            }
        }
        if let Some(min) = self.min_tip {
            if tip < min {
                tip = min.min(self.tip);
            }
        }
        tip
    }

    fn in_gears(&self) -> bool {
        self.tip > self.tool_start_at
    }
}

/// Printer-side state.
#[derive(Debug, Clone, Default)]
pub struct SimToolhead {
    pub homed: bool,
    pub position: Position,
    pub moves: Vec<AxisTarget>,
    pub extrusions: Vec<f64>,
}

/// Host scheduler state.
#[derive(Debug, Clone, Default)]
pub struct SimHost {
    pub printing: bool,
    pub paused: bool,
    pub pause_calls: usize,
    pub resume_calls: usize,
    pub macros: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct SimHeater {
    pub temperature: f64,
    pub target: f64,
    /// `(temp, wait)` for each set_target call.
    pub calls: Vec<(f64, bool)>,
}

#[derive(Debug, Clone, Default)]
pub struct SimSelector {
    pub home_ok: bool,
    pub homed: bool,
    pub selected: Option<usize>,
    pub selects: Vec<usize>,
}

/// The whole simulated machine.
pub struct SimWorld {
    pub clock: f64,
    pub lanes: Vec<SimLane>,
    pub toolhead: SimToolhead,
    pub host: SimHost,
    pub heaters: BTreeMap<String, SimHeater>,
    pub servo_angles: BTreeMap<String, Vec<f64>>,
    pub selectors: BTreeMap<String, SimSelector>,
    pub spool_pulses: BTreeMap<String, Vec<(f64, f64)>>,
    /// Lane and number of toolhead extrusions issued at each spool motor stop.
    pub spool_stops: Vec<(String, usize)>,
    pub leds: HashMap<(String, usize), Color>,
    pub spools: HashMap<u32, SpoolInfo>,
    pub active_spool: Option<u32>,
    pub bypass: bool,
    forced: HashMap<(PinKind, String), bool>,
    pins: Vec<(PinKind, String)>,
    levels: HashMap<(PinKind, String), bool>,
    events: Vec<SensorEvent>,
}

impl SimWorld {
    /// Build a world matching `config`. Every lane starts with filament at
    /// the prep sensor only.
    pub fn from_config(config: &AfcConfig) -> SimHandle {
        let mut lanes = Vec::new();
        let mut pins = Vec::new();

        for lane in &config.lanes {
            let unit = config.units.iter().find(|u| u.name == lane.unit);
            let hub_name = lane
                .hub
                .clone()
                .or_else(|| unit.and_then(|u| u.hub.clone()))
                .filter(|h| h != DIRECT_HUB);
            let hub = hub_name
                .as_ref()
                .and_then(|name| config.hubs.iter().find(|h| &h.name == name));
            let extruder_name = lane
                .extruder
                .clone()
                .or_else(|| unit.and_then(|u| u.extruder.clone()))
                .or_else(|| config.extruders.first().map(|e| e.name.clone()))
                .unwrap_or_default();
            let extruder = config.extruders.iter().find(|e| e.name == extruder_name);
            let buffer = lane
                .buffer
                .clone()
                .or_else(|| unit.and_then(|u| u.buffer.clone()))
                .or_else(|| extruder.and_then(|e| e.buffer.clone()));

            let load_at = SIM_LOAD_AT;
            let (hub_at, tool_start_at) = match hub {
                Some(hub) => {
                    let hub_at = load_at + lane.dist_hub + SIM_HUB_GAP;
                    (
                        hub_at,
                        hub_at + hub.bowden_length + hub.clear_step + SIM_TOOL_GAP,
                    )
                }
                None => {
                    let bowden = lane.bowden_length.unwrap_or(0.0);
                    (f64::INFINITY, load_at + bowden + 35.0)
                }
            };

            pins.push((PinKind::Prep, lane.name.clone()));
            pins.push((PinKind::Load, lane.name.clone()));

            lanes.push(SimLane {
                name: lane.name.clone(),
                hub: hub_name,
                extruder: extruder_name,
                buffer,
                inserted: true,
                tip: 0.0,
                load_at,
                hub_at,
                tool_start_at,
                tool_end_at: tool_start_at + SIM_TOOL_END_GAP,
                tool_stn: extruder.map(|e| e.tool_stn).unwrap_or(72.0),
                max_tip: None,
                min_tip: None,
                enabled: false,
                synced: false,
                multiplier: 1.0,
                tension: Tension::Neutral,
                moves: Vec::new(),
            });
        }

        for hub in &config.hubs {
            pins.push((PinKind::Hub, hub.name.clone()));
        }
        let mut heaters = BTreeMap::new();
        for extruder in &config.extruders {
            if extruder.tool_start == ToolSensorMode::Switch {
                pins.push((PinKind::ToolStart, extruder.name.clone()));
            }
            if extruder.tool_end {
                pins.push((PinKind::ToolEnd, extruder.name.clone()));
            }
            heaters.insert(
                extruder.name.clone(),
                SimHeater {
                    temperature: 25.0,
                    target: 0.0,
                    calls: Vec::new(),
                },
            );
        }
        for buffer in &config.buffers {
            match buffer.kind {
                BufferKindConfig::Turtleneck { .. } => {
                    pins.push((PinKind::BufferAdvance, buffer.name.clone()));
                    pins.push((PinKind::BufferTrailing, buffer.name.clone()));
                }
                BufferKindConfig::Belay { .. } => {
                    pins.push((PinKind::Belay, buffer.name.clone()));
                }
            }
        }
        pins.push((PinKind::Bypass, BYPASS_OWNER.to_string()));

        let mut selectors = BTreeMap::new();
        for unit in &config.units {
            if unit.kind == UnitKind::CamSelector {
                selectors.insert(
                    unit.name.clone(),
                    SimSelector {
                        home_ok: true,
                        ..Default::default()
                    },
                );
            }
        }
        let mut servo_angles = BTreeMap::new();
        for hub in &config.hubs {
            if hub.cutter.is_some() {
                servo_angles.insert(hub.name.clone(), Vec::new());
            }
        }
        let mut spool_pulses = BTreeMap::new();
        for lane in &config.lanes {
            if lane.espooler.is_some() {
                spool_pulses.insert(lane.name.clone(), Vec::new());
            }
        }

        let mut world = SimWorld {
            clock: 0.0,
            lanes,
            toolhead: SimToolhead {
                homed: true,
                position: Position {
                    x: 150.0,
                    y: 150.0,
                    z: 10.0,
                    e: 0.0,
                },
                ..Default::default()
            },
            host: SimHost::default(),
            heaters,
            servo_angles,
            selectors,
            spool_pulses,
            spool_stops: Vec::new(),
            leds: HashMap::new(),
            spools: HashMap::new(),
            active_spool: None,
            bypass: false,
            forced: HashMap::new(),
            pins,
            levels: HashMap::new(),
            events: Vec::new(),
        };
        world.levels = world.compute_levels();
        Rc::new(RefCell::new(world))
    }

    /// Wire every simulated device into a [`Hardware`] bundle.
    pub fn hardware(world: &SimHandle, store: Box<dyn StateStore>) -> Hardware {
        let inner = world.borrow();
        let mut actuators: HashMap<String, Box<dyn Actuator>> = HashMap::new();
        for lane in &inner.lanes {
            actuators.insert(
                lane.name.clone(),
                Box::new(SimActuator {
                    world: world.clone(),
                    lane: lane.name.clone(),
                }),
            );
        }
        let mut heaters: HashMap<String, Box<dyn Heater>> = HashMap::new();
        for name in inner.heaters.keys() {
            heaters.insert(
                name.clone(),
                Box::new(SimHeaterHandle {
                    world: world.clone(),
                    name: name.clone(),
                }),
            );
        }
        let mut cutters: HashMap<String, Box<dyn Servo>> = HashMap::new();
        for name in inner.servo_angles.keys() {
            cutters.insert(
                name.clone(),
                Box::new(SimServo {
                    world: world.clone(),
                    hub: name.clone(),
                }),
            );
        }
        let mut selectors: HashMap<String, Box<dyn Selector>> = HashMap::new();
        for name in inner.selectors.keys() {
            selectors.insert(
                name.clone(),
                Box::new(SimSelectorHandle {
                    world: world.clone(),
                    unit: name.clone(),
                }),
            );
        }
        let mut spool_motors: HashMap<String, Box<dyn SpoolMotor>> = HashMap::new();
        for name in inner.spool_pulses.keys() {
            spool_motors.insert(
                name.clone(),
                Box::new(SimSpoolMotor {
                    world: world.clone(),
                    lane: name.clone(),
                }),
            );
        }
        drop(inner);

        Hardware {
            actuators,
            spool_motors,
            cutters,
            heaters,
            selectors,
            toolhead: Box::new(SimToolheadHandle {
                world: world.clone(),
            }),
            host: Box::new(SimHostHandle {
                world: world.clone(),
            }),
            sensors: Box::new(SimSensorBus {
                world: world.clone(),
            }),
            indicators: Box::new(SimIndicator {
                world: world.clone(),
            }),
            store,
            spool_registry: Some(Box::new(SimSpoolRegistry {
                world: world.clone(),
            })),
        }
    }

    // ========================================================================
    // Scenario scripting
    // ========================================================================

    pub fn lane(&self, name: &str) -> &SimLane {
        self.lanes
            .iter()
            .find(|l| l.name == name)
            .unwrap_or_else(|| panic!("no simulated lane {}", name))
    }

    pub fn lane_mut(&mut self, name: &str) -> &mut SimLane {
        self.lanes
            .iter_mut()
            .find(|l| l.name == name)
            .unwrap_or_else(|| panic!("no simulated lane {}", name))
    }

    /// Filament sitting just past the load sensor.
    pub fn place_at_load(&mut self, lane: &str) {
        let l = self.lane_mut(lane);
        l.inserted = true;
        l.tip = l.load_at + 5.0;
        self.refresh();
    }

    /// Filament parked just before the hub sensor.
    pub fn place_at_hub(&mut self, lane: &str) {
        let l = self.lane_mut(lane);
        l.inserted = true;
        l.tip = if l.hub_at.is_finite() {
            l.hub_at - 10.0
        } else {
            l.load_at + 5.0
        };
        self.refresh();
    }

    /// Filament loaded all the way to the nozzle.
    pub fn place_in_tool(&mut self, lane: &str) {
        let l = self.lane_mut(lane);
        l.inserted = true;
        l.tip = l.tool_start_at + l.tool_stn;
        l.synced = true;
        self.refresh();
    }

    /// Insert fresh filament at the prep sensor.
    pub fn insert(&mut self, lane: &str) {
        let l = self.lane_mut(lane);
        l.inserted = true;
        l.tip = 0.0;
        self.refresh();
    }

    /// Pull the filament out of the lane completely.
    pub fn remove(&mut self, lane: &str) {
        let l = self.lane_mut(lane);
        l.inserted = false;
        l.tip = 0.0;
        self.refresh();
    }

    /// The spool ran out: the tail passes the prep and load sensors while
    /// the rest of the filament stays in the path.
    pub fn run_out(&mut self, lane: &str) {
        self.lane_mut(lane).inserted = false;
        self.refresh();
    }

    /// Override a sensor level (`None` returns it to the modelled level).
    pub fn force(&mut self, kind: PinKind, owner: &str, level: Option<bool>) {
        let key = (kind, owner.to_string());
        match level {
            Some(level) => {
                self.forced.insert(key, level);
            }
            None => {
                self.forced.remove(&key);
            }
        }
        self.refresh();
    }

    pub fn set_bypass(&mut self, present: bool) {
        self.bypass = present;
        self.refresh();
    }

    /// Extruder consumption while printing, without moving lane tips.
    pub fn consume(&mut self, mm: f64) {
        self.toolhead.position.e += mm;
    }

    /// Total number of motion commands issued to lanes and the toolhead.
    pub fn motion_count(&self) -> usize {
        self.lanes.iter().map(|l| l.moves.len()).sum::<usize>()
            + self.toolhead.moves.len()
            + self.toolhead.extrusions.len()
    }

    pub fn led(&self, chain: &str, index: usize) -> Option<Color> {
        self.leds.get(&(chain.to_string(), index)).copied()
    }

    // ========================================================================
    // Physics
    // ========================================================================

    fn move_lane(&mut self, name: &str, distance: f64, speed: f64) {
        let lane = self.lane_mut(name);
        lane.moves.push(distance);
        if lane.synced {
            // Synced steppers only move with the extruder.
            return;
        }
        let target = lane.tip + distance;
        if distance > 0.0 && target > lane.tool_start_at && lane.tip >= lane.tool_start_at {
            // Pushing against gears that do not turn.
            lane.tension = Tension::Compressed;
        } else if distance > 0.0 && target > lane.tool_start_at {
            lane.tip = lane.clamp(lane.tool_start_at);
            lane.tension = Tension::Compressed;
        } else if distance < 0.0 && lane.in_gears() {
            lane.tension = Tension::Stretched;
        } else {
            lane.tip = lane.clamp(target);
            lane.tension = Tension::Neutral;
        }
        self.advance_clock(distance, speed);
        self.refresh();
    }

    fn extrude(&mut self, distance: f64, speed: f64) {
        self.toolhead.extrusions.push(distance);
        self.toolhead.position.e += distance;
        for lane in self.lanes.iter_mut() {
            if lane.synced || lane.in_gears() {
                lane.tip = lane.clamp(lane.tip + distance);
                lane.tension = Tension::Neutral;
            }
        }
        self.advance_clock(distance, speed);
        self.refresh();
    }

    fn advance_clock(&mut self, distance: f64, speed: f64) {
        if speed > 0.0 {
            self.clock += distance.abs() / speed;
        }
    }

    fn compute_levels(&self) -> HashMap<(PinKind, String), bool> {
        let mut levels = HashMap::new();
        for (kind, owner) in &self.pins {
            let key = (*kind, owner.clone());
            let level = match self.forced.get(&key) {
                Some(level) => *level,
                None => self.modelled_level(*kind, owner),
            };
            levels.insert(key, level);
        }
        levels
    }

    fn modelled_level(&self, kind: PinKind, owner: &str) -> bool {
        match kind {
            PinKind::Prep => self.lane(owner).inserted,
            PinKind::Load => {
                let l = self.lane(owner);
                l.inserted && l.tip >= l.load_at
            }
            PinKind::Hub => self
                .lanes
                .iter()
                .any(|l| l.hub.as_deref() == Some(owner) && l.tip >= l.hub_at),
            PinKind::ToolStart => self
                .lanes
                .iter()
                .any(|l| l.extruder == owner && l.tip >= l.tool_start_at),
            PinKind::ToolEnd => self
                .lanes
                .iter()
                .any(|l| l.extruder == owner && l.tip >= l.tool_end_at),
            PinKind::BufferAdvance => self.lanes.iter().any(|l| {
                l.buffer.as_deref() == Some(owner)
                    && l.tip >= l.tool_start_at
                    && l.tension == Tension::Compressed
            }),
            PinKind::BufferTrailing => self.lanes.iter().any(|l| {
                l.buffer.as_deref() == Some(owner)
                    && l.in_gears()
                    && l.tension == Tension::Stretched
            }),
            PinKind::Belay => false,
            PinKind::Bypass => self.bypass,
        }
    }

    fn refresh(&mut self) {
        let levels = self.compute_levels();
        for (kind, owner) in &self.pins {
            let key = (*kind, owner.clone());
            let new = levels[&key];
            if self.levels.get(&key).copied() != Some(new) {
                self.events
                    .push(SensorEvent::new(*kind, owner.clone(), self.clock, new));
            }
        }
        self.levels = levels;
    }
}

struct SimActuator {
    world: SimHandle,
    lane: String,
}

impl Actuator for SimActuator {
    fn move_filament(
        &mut self,
        distance: f64,
        speed: f64,
        _accel: f64,
        _assist: bool,
    ) -> Result<()> {
        let mut world = self.world.borrow_mut();
        if !world.lane(&self.lane).enabled {
            return Err(AfcError::Hardware {
                device: self.lane.clone(),
                reason: "stepper not enabled".to_string(),
            });
        }
        world.move_lane(&self.lane, distance, speed);
        Ok(())
    }

    fn enable(&mut self, enabled: bool) {
        self.world.borrow_mut().lane_mut(&self.lane).enabled = enabled;
    }

    fn sync_to_extruder(&mut self, synced: bool) {
        self.world.borrow_mut().lane_mut(&self.lane).synced = synced;
    }

    fn set_rotation_multiplier(&mut self, multiplier: f64) {
        self.world.borrow_mut().lane_mut(&self.lane).multiplier = multiplier;
    }
}

struct SimSensorBus {
    world: SimHandle,
}

impl SensorBus for SimSensorBus {
    fn level(&self, kind: PinKind, owner: &str) -> bool {
        self.world
            .borrow()
            .levels
            .get(&(kind, owner.to_string()))
            .copied()
            .unwrap_or(false)
    }

    fn poll(&mut self) -> Vec<SensorEvent> {
        std::mem::take(&mut self.world.borrow_mut().events)
    }
}

struct SimToolheadHandle {
    world: SimHandle,
}

impl Toolhead for SimToolheadHandle {
    fn is_homed(&self) -> bool {
        self.world.borrow().toolhead.homed
    }

    fn position(&self) -> Position {
        self.world.borrow().toolhead.position
    }

    fn manual_move(&mut self, target: AxisTarget, speed: f64) -> Result<()> {
        let mut world = self.world.borrow_mut();
        let pos = &mut world.toolhead.position;
        let before = *pos;
        if let Some(x) = target.x {
            pos.x = x;
        }
        if let Some(y) = target.y {
            pos.y = y;
        }
        if let Some(z) = target.z {
            pos.z = z;
        }
        let after = *pos;
        let distance =
            ((after.x - before.x).powi(2) + (after.y - before.y).powi(2) + (after.z - before.z).powi(2))
                .sqrt();
        world.toolhead.moves.push(target);
        world.advance_clock(distance, speed);
        Ok(())
    }

    fn extrude(&mut self, distance: f64, speed: f64) -> Result<()> {
        self.world.borrow_mut().extrude(distance, speed);
        Ok(())
    }

    fn extruder_position(&self) -> f64 {
        self.world.borrow().toolhead.position.e
    }

    fn wait_moves(&mut self) {}
}

struct SimHeaterHandle {
    world: SimHandle,
    name: String,
}

impl Heater for SimHeaterHandle {
    fn temperature(&self) -> f64 {
        self.world.borrow().heaters[&self.name].temperature
    }

    fn target(&self) -> f64 {
        self.world.borrow().heaters[&self.name].target
    }

    fn set_target(&mut self, temp: f64, wait: bool) -> Result<()> {
        let mut world = self.world.borrow_mut();
        let heater = world
            .heaters
            .get_mut(&self.name)
            .ok_or_else(|| AfcError::Hardware {
                device: self.name.clone(),
                reason: "no such heater".to_string(),
            })?;
        heater.target = temp;
        heater.calls.push((temp, wait));
        if wait {
            heater.temperature = temp;
        }
        Ok(())
    }
}

struct SimHostHandle {
    world: SimHandle,
}

impl Host for SimHostHandle {
    fn is_printing(&self) -> bool {
        self.world.borrow().host.printing
    }

    fn is_paused(&self) -> bool {
        self.world.borrow().host.paused
    }

    fn pause(&mut self) {
        let mut world = self.world.borrow_mut();
        world.host.paused = true;
        world.host.pause_calls += 1;
    }

    fn resume(&mut self) {
        let mut world = self.world.borrow_mut();
        world.host.paused = false;
        world.host.resume_calls += 1;
    }

    fn run_macro(&mut self, name: &str) -> Result<()> {
        self.world.borrow_mut().host.macros.push(name.to_string());
        Ok(())
    }

    fn dwell(&mut self, seconds: f64) {
        self.world.borrow_mut().clock += seconds.max(0.0);
    }

    fn now(&self) -> f64 {
        self.world.borrow().clock
    }
}

struct SimIndicator {
    world: SimHandle,
}

impl Indicator for SimIndicator {
    fn set_color(&mut self, chain: &str, index: usize, color: Color) {
        self.world
            .borrow_mut()
            .leds
            .insert((chain.to_string(), index), color);
    }
}

struct SimServo {
    world: SimHandle,
    hub: String,
}

impl Servo for SimServo {
    fn set_angle(&mut self, angle: f64) -> Result<()> {
        self.world
            .borrow_mut()
            .servo_angles
            .entry(self.hub.clone())
            .or_default()
            .push(angle);
        Ok(())
    }
}

struct SimSelectorHandle {
    world: SimHandle,
    unit: String,
}

impl Selector for SimSelectorHandle {
    fn home(&mut self) -> Result<bool> {
        let mut world = self.world.borrow_mut();
        let selector = world.selectors.entry(self.unit.clone()).or_default();
        selector.homed = selector.home_ok;
        selector.selected = None;
        Ok(selector.home_ok)
    }

    fn select(&mut self, index: usize) -> Result<()> {
        let mut world = self.world.borrow_mut();
        let selector = world.selectors.entry(self.unit.clone()).or_default();
        if !selector.homed {
            return Err(AfcError::Hardware {
                device: self.unit.clone(),
                reason: "selector not homed".to_string(),
            });
        }
        selector.selected = Some(index);
        selector.selects.push(index);
        Ok(())
    }
}

struct SimSpoolMotor {
    world: SimHandle,
    lane: String,
}

impl SpoolMotor for SimSpoolMotor {
    fn pulse(&mut self, duty: f64, seconds: f64) {
        self.world
            .borrow_mut()
            .spool_pulses
            .entry(self.lane.clone())
            .or_default()
            .push((duty, seconds));
    }

    fn stop(&mut self) {
        let mut world = self.world.borrow_mut();
        let extrusions = world.toolhead.extrusions.len();
        world.spool_stops.push((self.lane.clone(), extrusions));
    }
}

struct SimSpoolRegistry {
    world: SimHandle,
}

impl SpoolRegistry for SimSpoolRegistry {
    fn lookup(&self, spool_id: u32) -> Result<SpoolInfo> {
        self.world
            .borrow()
            .spools
            .get(&spool_id)
            .cloned()
            .ok_or_else(|| AfcError::SpoolRegistry {
                reason: format!("spool {} not found", spool_id),
            })
    }

    fn set_active(&mut self, spool_id: Option<u32>) -> Result<()> {
        self.world.borrow_mut().active_spool = spool_id;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ExtruderConfig, HubConfig, LaneConfig, UnitConfig};
    use crate::hal::MemoryStore;

    fn config() -> AfcConfig {
        let mut config = AfcConfig::default();
        config.units.push(UnitConfig {
            name: "Turtle_1".to_string(),
            hub: Some("hub1".to_string()),
            ..Default::default()
        });
        config.hubs.push(HubConfig {
            name: "hub1".to_string(),
            ..Default::default()
        });
        config.extruders.push(ExtruderConfig {
            name: "extruder".to_string(),
            ..Default::default()
        });
        config.lanes.push(LaneConfig {
            name: "lane1".to_string(),
            unit: "Turtle_1".to_string(),
            ..Default::default()
        });
        config
    }

    #[test]
    fn test_geometry_from_config() {
        let world = SimWorld::from_config(&config());
        let w = world.borrow();
        let lane = w.lane("lane1");
        assert_eq!(lane.load_at, SIM_LOAD_AT);
        assert_eq!(lane.hub_at, SIM_LOAD_AT + 60.0 + SIM_HUB_GAP);
        assert_eq!(lane.tool_start_at, lane.hub_at + 900.0 + 65.0 + SIM_TOOL_GAP);
    }

    #[test]
    fn test_moves_generate_edges() {
        let world = SimWorld::from_config(&config());
        let mut hw = SimWorld::hardware(&world, Box::new(MemoryStore::new()));
        let actuator = hw.actuators.get_mut("lane1").unwrap();
        actuator.enable(true);
        actuator.move_filament(50.0, 25.0, 400.0, false).unwrap();

        let events = hw.sensors.poll();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, PinKind::Load);
        assert!(events[0].state);
        assert!(hw.sensors.level(PinKind::Load, "lane1"));
        assert!(hw.sensors.poll().is_empty());
    }

    #[test]
    fn test_disabled_actuator_refuses_moves() {
        let world = SimWorld::from_config(&config());
        let mut hw = SimWorld::hardware(&world, Box::new(MemoryStore::new()));
        let result = hw
            .actuators
            .get_mut("lane1")
            .unwrap()
            .move_filament(10.0, 25.0, 400.0, false);
        assert!(result.is_err());
    }

    #[test]
    fn test_jam_limits_tip() {
        let world = SimWorld::from_config(&config());
        world.borrow_mut().lane_mut("lane1").max_tip = Some(30.0);
        world.borrow_mut().lane_mut("lane1").enabled = true;
        world.borrow_mut().move_lane("lane1", 100.0, 25.0);
        assert_eq!(world.borrow().lane("lane1").tip, 30.0);
    }

    #[test]
    fn test_forced_level_overrides_model() {
        let world = SimWorld::from_config(&config());
        let hw = SimWorld::hardware(&world, Box::new(MemoryStore::new()));
        world.borrow_mut().force(PinKind::Hub, "hub1", Some(true));
        assert!(hw.sensors.level(PinKind::Hub, "hub1"));
        world.borrow_mut().force(PinKind::Hub, "hub1", None);
        assert!(!hw.sensors.level(PinKind::Hub, "hub1"));
    }
}
