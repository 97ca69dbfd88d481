//! Persistence Tests
//!
//! Snapshot writes, restart restore and the startup consistency check.

mod common;

use std::path::Path;

use afc::hal::sim::{SimHandle, SimWorld};
use afc::hal::JsonFileStore;
use afc::lane::LaneStatus;
use afc::{Afc, AfcError, AfcState, CalibrationTarget};
use common::{config, rig_with_store};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

/// Start a fresh controller on `world` reading state from `path`.
fn restart(world: &SimHandle, path: &Path) -> Afc {
    let hardware = SimWorld::hardware(world, Box::new(JsonFileStore::new(path)));
    Afc::new(config(), hardware).unwrap()
}

/// PREP, load lane1 and tag its spool, persisting to `path`.
fn first_session(path: &Path) {
    let mut rig = rig_with_store(config(), Box::new(JsonFileStore::new(path)));
    rig.afc.prep().unwrap();
    rig.afc.tool_load("lane1").unwrap();
    rig.afc.set_color("lane1", "ff0000").unwrap();
    rig.afc.set_weight("lane1", 640.0).unwrap();
    rig.afc.set_runout("lane1", "lane3").unwrap();
}

// === Restore Tests ===

#[test]
fn test_state_restored_after_restart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("afc_state.json");
    first_session(&path);
    assert!(path.exists());

    let world = SimWorld::from_config(&config());
    {
        let mut w = world.borrow_mut();
        w.place_in_tool("lane1");
        for lane in ["lane2", "lane3", "lane4"] {
            w.place_at_hub(lane);
        }
    }
    let afc = restart(&world, &path);

    assert_eq!(afc.current_lane(), Some("lane1"));
    assert!(afc.context().pending_inconsistency.is_none());

    let lane1 = afc.lane("lane1").unwrap();
    assert!(lane1.tool_loaded);
    assert_eq!(lane1.status, LaneStatus::Tooled);
    assert_eq!(lane1.spool.color.as_deref(), Some("#ff0000"));
    assert_eq!(lane1.spool.weight, Some(640.0));
    let runout = lane1.runout_lane.unwrap();
    assert_eq!(afc.lanes()[runout.0].name, "lane3");

    let extruder = afc.extruder("extruder").unwrap();
    assert_eq!(extruder.lane_loaded, Some(lane1.id));
    assert!(afc.lane("lane2").unwrap().loaded_to_hub);
}

#[test]
fn test_restart_mismatch_blocks_motion_until_reset() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("afc_state.json");
    first_session(&path);

    // Toolhead sensor reads empty although lane1 was recorded as loaded.
    let world = SimWorld::from_config(&config());
    let mut afc = restart(&world, &path);

    let reason = afc.context().pending_inconsistency.clone().unwrap();
    assert!(reason.contains("lane1"));

    let err = afc.tool_unload(None).unwrap_err();
    assert!(matches!(err, AfcError::StateUnconfirmed { .. }));
    let err = afc.lane_move("lane2", 10.0).unwrap_err();
    assert!(matches!(err, AfcError::StateUnconfirmed { .. }));
    assert_eq!(world.borrow().motion_count(), 0);

    afc.reset_failure();
    assert!(afc.context().pending_inconsistency.is_none());
    assert_eq!(afc.state(), AfcState::Idle);
}

#[test]
fn test_unrecorded_filament_in_toolhead_flagged() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("afc_state.json");

    let world = SimWorld::from_config(&config());
    world.borrow_mut().place_in_tool("lane3");
    let mut afc = restart(&world, &path);

    assert!(afc.context().pending_inconsistency.is_some());
    let err = afc.tool_load("lane1").unwrap_err();
    assert_eq!(err.error_code(), "STATE_UNCONFIRMED");
}

#[test]
fn test_corrupt_state_file_ignored() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("afc_state.json");
    std::fs::write(&path, "{ not json").unwrap();

    let world = SimWorld::from_config(&config());
    let afc = restart(&world, &path);

    assert_eq!(afc.current_lane(), None);
    assert!(afc.context().pending_inconsistency.is_none());
}

// === Snapshot Content Tests ===

#[test]
fn test_snapshot_file_layout() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("afc_state.json");
    first_session(&path);

    let text = std::fs::read_to_string(&path).unwrap();
    let value: serde_json::Value = serde_json::from_str(&text).unwrap();

    assert_eq!(value["Turtle_1"]["lane1"]["tool_loaded"], true);
    assert_eq!(value["Turtle_1"]["lane1"]["color"], "#ff0000");
    assert_eq!(value["Turtle_1"]["lane2"]["map"], "T1");
    assert_eq!(value["system"]["current_load"], "lane1");
    assert_eq!(value["system"]["num_lanes"], 4);
    assert_eq!(value["system"]["extruders"]["extruder"]["lane_loaded"], "lane1");
}

#[test]
fn test_calibration_survives_restart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("afc_state.json");

    let mut rig = rig_with_store(config(), Box::new(JsonFileStore::new(&path)));
    rig.afc.prep().unwrap();
    rig.afc
        .calibrate(CalibrationTarget::Lane("lane2"), Some("lane2"))
        .unwrap();
    drop(rig);

    let world = SimWorld::from_config(&config());
    let afc = restart(&world, &path);

    assert_eq!(afc.lane("lane2").unwrap().dist_hub, 70.0);
    assert_eq!(afc.lane("lane1").unwrap().dist_hub, 60.0);
    assert_eq!(afc.hub("Turtle_1").unwrap().bowden_length, 915.0);
}

#[test]
fn test_toolchange_counter_survives_restart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("afc_state.json");

    let mut rig = rig_with_store(config(), Box::new(JsonFileStore::new(&path)));
    rig.afc.prep().unwrap();
    rig.afc.set_toolchanges(5);
    rig.afc.change_tool("T1").unwrap();
    drop(rig);

    let world = SimWorld::from_config(&config());
    world.borrow_mut().place_in_tool("lane2");
    let afc = restart(&world, &path);

    let counter = &afc.context().toolchanges;
    assert_eq!(counter.total, Some(5));
    assert_eq!(counter.current, 1);
    assert_eq!(counter.last_tool.as_deref(), Some("lane2"));
}

#[test]
fn test_status_json_reports_live_flags() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("afc_state.json");
    first_session(&path);

    let world = SimWorld::from_config(&config());
    let afc = restart(&world, &path);
    let value = afc.status_json().unwrap();

    assert_eq!(value["system"]["state"], "Init");
    assert!(value["system"]["pending_inconsistency"].is_string());
    assert_eq!(value["system"]["current_load"], "lane1");
}
