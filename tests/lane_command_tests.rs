//! Lane Command Tests
//!
//! LANE_MOVE, LANE_UNLOAD, HUB_LOAD, CALIBRATE_AFC and the spool metadata
//! setters.

mod common;

use afc::hal::SpoolInfo;
use afc::lane::LaneStatus;
use afc::{AfcError, AfcState, CalibrationTarget};
use common::{config, prepped, PARKED_TIP};
use test_case::test_case;

// === Motion Command Tests ===

#[test]
fn test_lane_move_relative() {
    let mut rig = prepped(config());
    rig.afc.lane_move("lane1", -20.0).unwrap();

    pretty_assertions::assert_eq!(rig.tip("lane1"), PARKED_TIP - 20.0);
    pretty_assertions::assert_eq!(*rig.moves("lane1").last().unwrap(), -20.0);
    assert!(!rig.world.borrow().lane("lane1").enabled);
    pretty_assertions::assert_eq!(rig.afc.state(), AfcState::Idle);
}

#[test]
fn test_lane_move_refused_for_loaded_lane() {
    let mut rig = prepped(config());
    rig.afc.tool_load("lane1").unwrap();
    let count = rig.motion_count();

    let err = rig.afc.lane_move("lane1", 10.0).unwrap_err();
    assert!(matches!(err, AfcError::LaneInToolhead { .. }));
    let err = rig.afc.lane_unload("lane1").unwrap_err();
    assert!(matches!(err, AfcError::LaneInToolhead { .. }));
    pretty_assertions::assert_eq!(rig.motion_count(), count);
}

#[test]
fn test_lane_unload_ejects_past_load_sensor() {
    let mut rig = prepped(config());
    rig.afc.lane_unload("lane2").unwrap();

    // Back out of the hub, one short step off the load sensor, then park.
    pretty_assertions::assert_eq!(rig.moves("lane2")[6..].to_vec(), vec![-60.0, -10.0, -10.0]);
    let lane2 = rig.afc.lane("lane2").unwrap();
    pretty_assertions::assert_eq!(lane2.status, LaneStatus::None);
    assert!(!lane2.loaded_to_hub);
    assert!(!lane2.load_state);
    pretty_assertions::assert_eq!(rig.tip("lane2"), 30.0);
}

#[test]
fn test_hub_load_parks_lane() {
    let mut config = config();
    config.settings.load_to_hub = false;
    let mut rig = prepped(config);

    let lane3 = rig.afc.lane("lane3").unwrap();
    assert!(!lane3.loaded_to_hub);
    pretty_assertions::assert_eq!(rig.tip("lane3"), 50.0);

    rig.afc.hub_load("lane3").unwrap();

    let lane3 = rig.afc.lane("lane3").unwrap();
    assert!(lane3.loaded_to_hub);
    pretty_assertions::assert_eq!(lane3.status, LaneStatus::Loaded);
    pretty_assertions::assert_eq!(rig.tip("lane3"), PARKED_TIP);
    assert!(!rig.afc.hub("Turtle_1").unwrap().state);
}

#[test]
fn test_hub_load_backs_off_when_hub_trips() {
    let mut config = config();
    config.settings.load_to_hub = false;
    config.lanes[0].dist_hub = 100.0;
    let mut rig = prepped(config);

    // The configured distance overshoots the real hub at 125mm.
    rig.world.borrow_mut().lane_mut("lane1").hub_at = 125.0;
    rig.afc.hub_load("lane1").unwrap();

    pretty_assertions::assert_eq!(rig.tip("lane1"), 120.0);
    assert!(!rig.afc.hub("Turtle_1").unwrap().state);
}

#[test]
fn test_load_after_hub_load() {
    let mut config = config();
    config.settings.load_to_hub = false;
    let mut rig = prepped(config);

    rig.afc.tool_load("lane1").unwrap();

    // dist_hub first, since the lane was only at the load sensor.
    pretty_assertions::assert_eq!(rig.moves("lane1")[5], 60.0);
    pretty_assertions::assert_eq!(rig.afc.current_lane(), Some("lane1"));
}

// === Calibration Tests ===

#[test]
fn test_calibrate_lane_and_bowden() {
    let mut rig = prepped(config());
    let measured = rig
        .afc
        .calibrate(CalibrationTarget::Lane("lane1"), Some("lane1"))
        .unwrap();

    pretty_assertions::assert_eq!(measured.dist_hub["lane1"], 70.0);
    pretty_assertions::assert_eq!(measured.bowden_length["Turtle_1"], 915.0);
    pretty_assertions::assert_eq!(rig.afc.lane("lane1").unwrap().dist_hub, 70.0);
    pretty_assertions::assert_eq!(rig.afc.hub("Turtle_1").unwrap().bowden_length, 915.0);

    let lane1 = rig.afc.lane("lane1").unwrap();
    pretty_assertions::assert_eq!(lane1.status, LaneStatus::Loaded);
    assert!(lane1.loaded_to_hub);
    assert!(!rig.afc.hub("Turtle_1").unwrap().state);
    pretty_assertions::assert_eq!(rig.tip("lane1"), 115.0);
    pretty_assertions::assert_eq!(rig.afc.state(), AfcState::Idle);

    let snapshot = rig.afc.snapshot();
    pretty_assertions::assert_eq!(snapshot.system.calibration.dist_hub["lane1"], 70.0);
}

#[test]
fn test_calibrate_all_lanes() {
    let mut rig = prepped(config());
    let measured = rig.afc.calibrate(CalibrationTarget::All, None).unwrap();

    pretty_assertions::assert_eq!(measured.dist_hub.len(), 4);
    assert!(measured.dist_hub.values().all(|d| *d == 70.0));
    assert!(measured.bowden_length.is_empty());
}

#[test]
fn test_calibrate_refused_while_printing() {
    let mut rig = prepped(config());
    rig.set_printing(true);

    let err = rig
        .afc
        .calibrate(CalibrationTarget::All, None)
        .unwrap_err();
    assert!(matches!(err, AfcError::PrintInProgress { .. }));
    pretty_assertions::assert_eq!(rig.world.borrow().host.pause_calls, 0);
}

#[test_case("" => CalibrationTarget::BowdenOnly ; "empty")]
#[test_case("all" => CalibrationTarget::All ; "all")]
#[test_case("ALL" => CalibrationTarget::All ; "upper case")]
#[test_case("lane2" => CalibrationTarget::Lane("lane2") ; "lane")]
fn test_calibration_target_parse(value: &str) -> CalibrationTarget<'_> {
    CalibrationTarget::parse(value)
}

// === Spool Metadata Tests ===

#[test]
fn test_set_spool_id_fills_from_registry() {
    let mut rig = prepped(config());
    rig.world.borrow_mut().spools.insert(
        7,
        SpoolInfo {
            material: Some("PETG".to_string()),
            color_hex: Some("#00ff00".to_string()),
            remaining_weight: Some(812.0),
            extruder_temp: Some(240.0),
        },
    );
    rig.afc.tool_load("lane2").unwrap();

    rig.afc.set_spool_id("lane2", Some(7)).unwrap();

    let spool = &rig.afc.lane("lane2").unwrap().spool;
    pretty_assertions::assert_eq!(spool.spool_id, Some(7));
    pretty_assertions::assert_eq!(spool.material.as_deref(), Some("PETG"));
    pretty_assertions::assert_eq!(spool.color.as_deref(), Some("#00ff00"));
    pretty_assertions::assert_eq!(spool.weight, Some(812.0));
    pretty_assertions::assert_eq!(spool.extruder_temp, Some(240.0));
    pretty_assertions::assert_eq!(rig.afc.context().active_spool, Some(7));
    pretty_assertions::assert_eq!(rig.world.borrow().active_spool, Some(7));

    rig.afc.set_spool_id("lane2", None).unwrap();
    let spool = &rig.afc.lane("lane2").unwrap().spool;
    assert!(spool.material.is_none());
    assert!(spool.color.is_none());
    pretty_assertions::assert_eq!(rig.world.borrow().active_spool, None);
}

#[test]
fn test_unknown_spool_keeps_metadata() {
    let mut rig = prepped(config());
    rig.afc.set_material("lane1", "ABS").unwrap();

    rig.afc.set_spool_id("lane1", Some(99)).unwrap();

    let spool = &rig.afc.lane("lane1").unwrap().spool;
    pretty_assertions::assert_eq!(spool.spool_id, Some(99));
    pretty_assertions::assert_eq!(spool.material.as_deref(), Some("ABS"));
}

#[test_case("#FF8000" ; "hash upper")]
#[test_case("ff8000" ; "bare hex")]
#[test_case("1,0.502,0" ; "channels")]
fn test_set_color_formats(color: &str) {
    let mut rig = prepped(config());
    rig.afc.set_color("lane1", color).unwrap();
    pretty_assertions::assert_eq!(
        rig.afc.lane("lane1").unwrap().spool.color.as_deref(),
        Some("#ff8000")
    );
}

#[test]
fn test_set_color_rejects_garbage() {
    let mut rig = prepped(config());
    let err = rig.afc.set_color("lane1", "blue").unwrap_err();
    assert!(matches!(err, AfcError::InvalidConfig { .. }));
    // Setters never raise the error flag.
    assert!(!rig.afc.errors().is_error());
}

#[test]
fn test_set_weight_rejects_negative() {
    let mut rig = prepped(config());
    assert!(rig.afc.set_weight("lane1", -5.0).is_err());
    rig.afc.set_weight("lane1", 250.0).unwrap();
    pretty_assertions::assert_eq!(rig.afc.lane("lane1").unwrap().spool.weight, Some(250.0));
}

#[test]
fn test_set_runout() {
    let mut rig = prepped(config());
    rig.afc.set_runout("lane1", "lane4").unwrap();
    let runout = rig.afc.lane("lane1").unwrap().runout_lane.unwrap();
    pretty_assertions::assert_eq!(rig.afc.lanes()[runout.0].name, "lane4");

    let err = rig.afc.set_runout("lane1", "lane1").unwrap_err();
    assert!(matches!(err, AfcError::InvalidConfig { .. }));

    rig.afc.set_runout("lane1", "NONE").unwrap();
    assert!(rig.afc.lane("lane1").unwrap().runout_lane.is_none());
}

#[test]
fn test_set_map_swaps_with_holder() {
    let mut rig = prepped(config());
    rig.afc.set_map("lane1", "T3").unwrap();

    pretty_assertions::assert_eq!(rig.afc.lane("lane1").unwrap().map, "T3");
    pretty_assertions::assert_eq!(rig.afc.lane("lane4").unwrap().map, "T0");

    rig.afc.tool_load("T3").unwrap();
    pretty_assertions::assert_eq!(rig.afc.current_lane(), Some("lane1"));
}

#[test]
fn test_status_table_lists_lanes() {
    let mut rig = prepped(config());
    rig.afc.set_material("lane2", "PLA").unwrap();
    rig.afc.tool_load("lane2").unwrap();

    let table = rig.afc.status_table();
    assert!(table.contains("Current lane: lane2"));
    assert!(table.contains("Turtle_1 (shared hub)"));
    let row = table.lines().find(|l| l.starts_with("lane2")).unwrap();
    assert!(row.contains("Tooled"));
    assert!(row.contains("PLA"));
}
