//! CLI Command Implementations
//!
//! Each command opens the bench (configuration, simulated hardware seeded
//! from the snapshot, PREP), runs one orchestrator operation and prints the
//! outcome.

use std::path::Path;

use log::{debug, info, warn};

use crate::config::{AfcConfig, ExtruderConfig, HubConfig, LaneConfig, UnitConfig};
use crate::error::Result;
use crate::hal::sim::{SimHandle, SimWorld};
use crate::hal::{JsonFileStore, StateStore};
use crate::orchestrator::{Afc, CalibrationTarget};
use crate::state::Snapshot;

/// Orchestrator wired to the simulated machine.
pub struct Bench {
    pub afc: Afc,
    pub world: SimHandle,
}

/// Four lanes behind one hub feeding one extruder.
pub fn bench_config() -> AfcConfig {
    let mut config = AfcConfig::default();
    config.units.push(UnitConfig {
        name: "Turtle_1".to_string(),
        hub: Some("Turtle_1".to_string()),
        extruder: Some("extruder".to_string()),
        ..Default::default()
    });
    config.hubs.push(HubConfig {
        name: "Turtle_1".to_string(),
        ..Default::default()
    });
    config.extruders.push(ExtruderConfig {
        name: "extruder".to_string(),
        ..Default::default()
    });
    for i in 1..=4 {
        config.lanes.push(LaneConfig {
            name: format!("lane{}", i),
            unit: "Turtle_1".to_string(),
            ..Default::default()
        });
    }
    config
}

fn load_config(path: Option<&Path>) -> Result<AfcConfig> {
    match path {
        Some(path) => {
            info!("Loading configuration: {}", path.display());
            AfcConfig::from_file(path)
        }
        None => Ok(bench_config()),
    }
}

/// Put simulated filament where the snapshot says it was.
fn seed_world(world: &SimHandle, snapshot: &Snapshot) {
    let mut world = world.borrow_mut();
    for lanes in snapshot.units.values() {
        for (name, lane) in lanes {
            if !world.lanes.iter().any(|l| &l.name == name) {
                debug!("Snapshot lane {} not on the bench", name);
                continue;
            }
            if lane.tool_loaded {
                world.place_in_tool(name);
            } else if lane.hub_loaded {
                world.place_at_hub(name);
            } else if lane.load {
                world.place_at_load(name);
            } else if !lane.prep {
                world.remove(name);
            }
        }
    }
}

/// Build the bench and run PREP.
pub fn open_bench(config: Option<&Path>, state: &Path) -> Result<Bench> {
    let config = load_config(config)?;
    config.validate()?;

    let world = SimWorld::from_config(&config);
    let store = JsonFileStore::new(state);
    match store.load() {
        Ok(Some(value)) => seed_world(&world, &Snapshot::from_value(&value)?),
        Ok(None) => {}
        Err(e) => warn!("Ignoring state file: {}", e),
    }

    let hardware = SimWorld::hardware(&world, Box::new(store));
    let mut afc = Afc::new(config, hardware)?;
    afc.prep()?;
    Ok(Bench { afc, world })
}

/// Validate a configuration without touching hardware.
pub fn check_config(path: Option<&Path>) -> Result<()> {
    let config = load_config(path)?;
    let registry = config.validate()?;
    println!(
        "Configuration OK: {} units, {} lanes, {} hubs, {} extruders",
        registry.unit_count(),
        registry.lane_count(),
        config.hubs.len(),
        config.extruders.len()
    );
    for id in registry.lane_ids() {
        let refs = registry.lane_refs(id);
        println!(
            "  {} -> {} ({})",
            registry.lane_name(id),
            refs.map,
            registry.unit_name(refs.unit)
        );
    }
    Ok(())
}

pub fn prep(bench: &Bench) -> Result<()> {
    print!("{}", bench.afc.status_table());
    Ok(())
}

pub fn tool_load(bench: &mut Bench, lane: &str) -> Result<()> {
    bench.afc.tool_load(lane)?;
    println!("Loaded: {}", bench.afc.current_lane().unwrap_or("none"));
    Ok(())
}

pub fn tool_unload(bench: &mut Bench, lane: Option<&str>) -> Result<()> {
    bench.afc.tool_unload(lane)?;
    println!("Toolhead empty");
    Ok(())
}

pub fn change_tool(bench: &mut Bench, target: &str) -> Result<()> {
    bench.afc.change_tool(target)?;
    println!("Loaded: {}", bench.afc.current_lane().unwrap_or("none"));
    Ok(())
}

pub fn lane_move(bench: &mut Bench, lane: &str, distance: f64) -> Result<()> {
    bench.afc.lane_move(lane, distance)?;
    println!("Moved {} by {:.1}mm", lane, distance);
    Ok(())
}

pub fn lane_unload(bench: &mut Bench, lane: &str) -> Result<()> {
    bench.afc.lane_unload(lane)?;
    println!("Ejected {}", lane);
    Ok(())
}

pub fn hub_load(bench: &mut Bench, lane: &str) -> Result<()> {
    bench.afc.hub_load(lane)?;
    println!("{} parked at the hub", lane);
    Ok(())
}

pub fn set_spool_id(bench: &mut Bench, lane: &str, spool_id: Option<u32>) -> Result<()> {
    bench.afc.set_spool_id(lane, spool_id)?;
    match spool_id {
        Some(id) => println!("{} spool: {}", lane, id),
        None => println!("{} spool cleared", lane),
    }
    Ok(())
}

pub fn set_color(bench: &mut Bench, lane: &str, color: &str) -> Result<()> {
    bench.afc.set_color(lane, color)?;
    let stored = bench
        .afc
        .lane(lane)
        .and_then(|l| l.spool.color.clone())
        .unwrap_or_default();
    println!("{} color: {}", lane, stored);
    Ok(())
}

pub fn set_material(bench: &mut Bench, lane: &str, material: &str) -> Result<()> {
    bench.afc.set_material(lane, material)?;
    println!("{} material: {}", lane, material);
    Ok(())
}

pub fn set_weight(bench: &mut Bench, lane: &str, weight: f64) -> Result<()> {
    bench.afc.set_weight(lane, weight)?;
    println!("{} weight: {:.0}g", lane, weight);
    Ok(())
}

pub fn set_runout(bench: &mut Bench, lane: &str, runout: &str) -> Result<()> {
    bench.afc.set_runout(lane, runout)?;
    println!("{} runout lane: {}", lane, runout);
    Ok(())
}

pub fn set_map(bench: &mut Bench, lane: &str, map: &str) -> Result<()> {
    bench.afc.set_map(lane, map)?;
    println!("{} mapped to {}", lane, map);
    Ok(())
}

pub fn set_toolchanges(bench: &mut Bench, total: u32) -> Result<()> {
    bench.afc.set_toolchanges(total);
    println!("Tool changes expected: {}", total);
    Ok(())
}

pub fn calibrate(bench: &mut Bench, lane: Option<&str>, bowden: Option<&str>) -> Result<()> {
    let target = CalibrationTarget::parse(lane.unwrap_or(""));
    let measured = bench.afc.calibrate(target, bowden)?;

    if measured.is_empty() {
        println!("Nothing calibrated");
        return Ok(());
    }
    for (lane, dist) in &measured.dist_hub {
        println!("{} dist_hub: {:.1}mm", lane, dist);
    }
    for (hub, length) in &measured.bowden_length {
        println!("{} bowden_length: {:.1}mm", hub, length);
    }
    Ok(())
}

pub fn reset_failure(bench: &mut Bench) -> Result<()> {
    bench.afc.reset_failure();
    println!("Failure state reset");
    Ok(())
}

pub fn resume(bench: &mut Bench) -> Result<()> {
    bench.afc.resume()?;
    println!("Resumed");
    Ok(())
}

pub fn status(bench: &Bench) -> Result<()> {
    print!("{}", bench.afc.status_table());
    Ok(())
}

pub fn status_json(bench: &Bench) -> Result<()> {
    let value = bench.afc.status_json()?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}
