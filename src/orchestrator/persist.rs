//! Snapshot capture, restore and the startup consistency check.

use std::collections::{BTreeMap, HashSet};

use chrono::Utc;
use log::{info, warn};

use crate::config::{HubRef, LaneId};
use crate::error::AfcError;
use crate::lane::LaneStatus;
use crate::orchestrator::{Afc, ToolchangeCounter};
use crate::state::{ExtruderSnapshot, LaneSnapshot, Snapshot, SystemSnapshot, ToolchangeSnapshot};

impl Afc {
    /// Capture the persisted view of the current state.
    pub fn snapshot(&self) -> Snapshot {
        let mut units: BTreeMap<String, BTreeMap<String, LaneSnapshot>> = BTreeMap::new();
        for unit in &self.units {
            let lanes = unit
                .lanes
                .iter()
                .map(|id| {
                    let lane = &self.lanes[id.0];
                    let snapshot = LaneSnapshot {
                        index: lane.index,
                        material: lane.spool.material.clone(),
                        color: lane.spool.color.clone(),
                        spool_id: lane.spool.spool_id,
                        weight: lane.spool.weight,
                        extruder_temp: lane.spool.extruder_temp,
                        tool_loaded: lane.tool_loaded,
                        hub_loaded: lane.loaded_to_hub,
                        map: lane.map.clone(),
                        runout_lane: lane.runout_lane.map(|r| self.lanes[r.0].name.clone()),
                        status: lane.status,
                        prep: lane.prep_state,
                        load: lane.load_state,
                    };
                    (lane.name.clone(), snapshot)
                })
                .collect();
            units.insert(unit.name.clone(), lanes);
        }

        let extruders = self
            .extruders
            .iter()
            .map(|extruder| {
                let buffer = extruder.buffer.map(|b| &self.buffers[b.0]);
                (
                    extruder.name.clone(),
                    ExtruderSnapshot {
                        lane_loaded: extruder.lane_loaded.map(|l| self.lanes[l.0].name.clone()),
                        tool_start_status: extruder.tool_start_state,
                        tool_end_status: extruder.tool_end_state,
                        buffer: buffer.map(|b| b.name.clone()),
                        buffer_status: buffer.map(|b| b.status().to_string()),
                    },
                )
            })
            .collect();

        let counter = &self.ctx.toolchanges;
        Snapshot {
            units,
            system: SystemSnapshot {
                current_load: self.current_lane().map(str::to_string),
                num_units: self.units.len(),
                num_lanes: self.lanes.len(),
                num_extruders: self.extruders.len(),
                extruders,
                toolchanges: ToolchangeSnapshot {
                    total: counter.total,
                    current: counter.current,
                    last_tool: counter.last_tool.clone(),
                },
                calibration: self.calibration.clone(),
                saved_at: Some(Utc::now()),
            },
        }
    }

    /// Write the snapshot. Failures are logged and never abort a sequence.
    pub(crate) fn persist(&mut self) {
        let value = match self.snapshot().to_value() {
            Ok(value) => value,
            Err(e) => {
                warn!("Could not serialize state: {}", e);
                return;
            }
        };
        if let Err(e) = self.devices.store.save(&value) {
            warn!("Could not save state: {}", e);
        }
    }

    /// Apply the stored snapshot, if any, to the freshly built objects.
    pub(crate) fn restore_persisted(&mut self) {
        let value = match self.devices.store.load() {
            Ok(Some(value)) => value,
            Ok(None) => return,
            Err(e) => {
                warn!("Ignoring unreadable persisted state: {}", e);
                return;
            }
        };
        let snapshot = match Snapshot::from_value(&value) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("Ignoring persisted state: {}", e);
                return;
            }
        };

        let mut tool_loaded: Option<LaneId> = None;
        for index in 0..self.lanes.len() {
            let name = self.lanes[index].name.clone();
            let Some((_, saved)) = snapshot.lane(&name) else {
                continue;
            };
            let runout = match saved.runout_lane.as_deref() {
                Some(other) if other != name => self.registry.lane_id(other).ok(),
                _ => None,
            };

            let lane = &mut self.lanes[index];
            lane.spool.material = saved.material.clone();
            lane.spool.color = saved.color.clone();
            lane.spool.spool_id = saved.spool_id;
            lane.spool.weight = saved.weight;
            if saved.extruder_temp.is_some() {
                lane.spool.extruder_temp = saved.extruder_temp;
            }
            lane.loaded_to_hub = saved.hub_loaded && lane.hub != HubRef::Direct;
            if saved.runout_lane.is_some() {
                lane.runout_lane = runout;
            }

            if saved.tool_loaded {
                match tool_loaded {
                    None => {
                        lane.tool_loaded = true;
                        lane.status = LaneStatus::Tooled;
                        tool_loaded = Some(lane.id);
                    }
                    Some(_) => warn!(
                        "{} also recorded as loaded in the toolhead, keeping the first lane",
                        name
                    ),
                }
            }
        }

        self.restore_maps(&snapshot);

        if let Some(lane) = tool_loaded {
            let extruder = self.lanes[lane.0].extruder;
            self.extruders[extruder.0].lane_loaded = Some(lane);
            self.ctx.current = Some(lane);
            self.ctx.active_spool = self.lanes[lane.0].spool.spool_id;
        }

        let toolchanges = &snapshot.system.toolchanges;
        self.ctx.toolchanges = ToolchangeCounter {
            total: toolchanges.total,
            current: toolchanges.current,
            last_tool: toolchanges.last_tool.clone(),
        };

        self.apply_calibration(snapshot.system.calibration.clone());
        info!("Restored persisted state");
    }

    /// Restore tool aliases unless doing so would create duplicates.
    fn restore_maps(&mut self, snapshot: &Snapshot) {
        let maps: Vec<String> = self
            .lanes
            .iter()
            .map(|lane| {
                snapshot
                    .lane(&lane.name)
                    .map(|(_, saved)| saved.map.clone())
                    .filter(|map| !map.is_empty())
                    .unwrap_or_else(|| lane.map.clone())
            })
            .collect();

        let unique = {
            let mut seen = HashSet::new();
            maps.iter().all(|map| seen.insert(map.as_str()))
        };
        if !unique {
            warn!("Persisted tool maps overlap, keeping configured maps");
            return;
        }
        for (lane, map) in self.lanes.iter_mut().zip(maps) {
            lane.map = map;
        }
    }

    /// Compare the persisted toolhead state with the live sensor. A mismatch
    /// blocks motion commands until RESET_FAILURE.
    pub(crate) fn check_consistency(&mut self) {
        let mismatch = match self.ctx.current {
            Some(lane) => {
                let extruder = &self.extruders[self.lanes[lane.0].extruder.0];
                (extruder.has_switch() && !extruder.tool_start_state).then(|| AfcError::StateMismatch {
                    lane: self.lanes[lane.0].name.clone(),
                    detail: "recorded in the toolhead but the toolhead sensor is clear".to_string(),
                })
            }
            None => self
                .extruders
                .iter()
                .find(|e| e.has_switch() && e.tool_start_state)
                .map(|e| AfcError::StateMismatch {
                    lane: e.name.clone(),
                    detail: "toolhead sensor triggered but no lane is recorded as loaded"
                        .to_string(),
                }),
        };

        if let Some(err) = mismatch {
            warn!("[{}] {}", err.error_code(), err);
            if let Some(suggestion) = err.recovery_suggestion() {
                warn!("{}", suggestion);
            }
            self.ctx.pending_inconsistency = Some(err.to_string());
        }
    }
}
