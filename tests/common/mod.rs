//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use afc::cli::commands::bench_config;
use afc::config::{BufferConfig, BufferKindConfig, ToolSensorMode};
use afc::hal::sim::{SimHandle, SimWorld};
use afc::hal::{MemoryStore, StateStore};
use afc::{Afc, AfcConfig};

/// Tip position after PREP: 5 prep steps plus the 60mm hub advance.
pub const PARKED_TIP: f64 = 110.0;
/// Tip position with filament at the nozzle (tool sensor at 1105 + 72).
pub const NOZZLE_TIP: f64 = 1177.0;

pub struct Rig {
    pub afc: Afc,
    pub world: SimHandle,
}

impl Rig {
    pub fn tip(&self, lane: &str) -> f64 {
        self.world.borrow().lane(lane).tip
    }

    pub fn moves(&self, lane: &str) -> Vec<f64> {
        self.world.borrow().lane(lane).moves.clone()
    }

    pub fn motion_count(&self) -> usize {
        self.world.borrow().motion_count()
    }

    pub fn set_printing(&self, printing: bool) {
        self.world.borrow_mut().host.printing = printing;
    }
}

/// Four lanes behind hub `Turtle_1`, one extruder with a toolhead switch.
pub fn config() -> AfcConfig {
    bench_config()
}

/// Same bench, but the extruder senses filament through a turtleneck buffer.
pub fn ram_config() -> AfcConfig {
    let mut config = bench_config();
    config.buffers.push(BufferConfig {
        name: "TN".to_string(),
        kind: BufferKindConfig::Turtleneck {
            multiplier_high: 1.1,
            multiplier_low: 0.9,
        },
    });
    config.extruders[0].tool_start = ToolSensorMode::Buffer;
    config.extruders[0].buffer = Some("TN".to_string());
    config
}

pub fn rig_with_store(config: AfcConfig, store: Box<dyn StateStore>) -> Rig {
    let world = SimWorld::from_config(&config);
    let hardware = SimWorld::hardware(&world, store);
    let afc = Afc::new(config, hardware).unwrap();
    Rig { afc, world }
}

pub fn rig(config: AfcConfig) -> Rig {
    rig_with_store(config, Box::new(MemoryStore::new()))
}

/// A rig that already ran PREP.
pub fn prepped(config: AfcConfig) -> Rig {
    let mut rig = rig(config);
    rig.afc.prep().unwrap();
    rig
}
