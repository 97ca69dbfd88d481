//! AFC_STATUS text table and the status JSON.

use std::fmt::Write;

use serde_json::{json, Value};

use crate::config::UnitKind;
use crate::error::Result;
use crate::orchestrator::Afc;

fn mark(level: bool) -> &'static str {
    if level {
        "#"
    } else {
        "-"
    }
}

impl Afc {
    /// AFC_STATUS: one row per lane, grouped by unit.
    pub fn status_table(&self) -> String {
        let mut out = String::new();
        let ctx = &self.ctx;

        let _ = writeln!(out, "AFC state: {}", ctx.state);
        let _ = writeln!(out, "Current lane: {}", self.current_lane().unwrap_or("none"));
        if let Some(total) = ctx.toolchanges.total {
            let _ = writeln!(out, "Tool changes: {} of {}", ctx.toolchanges.current, total);
        }
        if ctx.bypass {
            let _ = writeln!(out, "Bypass: filament detected");
        }
        if let Some(error) = self.errors.last_error() {
            let _ = writeln!(out, "Error: {}", error);
        }
        if let Some(reason) = &ctx.pending_inconsistency {
            let _ = writeln!(out, "Unconfirmed: {}", reason);
        }

        for unit in &self.units {
            let kind = match unit.policy.kind() {
                UnitKind::SharedHub => "shared hub",
                UnitKind::CamSelector => "cam selector",
            };
            let _ = writeln!(out);
            let _ = writeln!(out, "{} ({})", unit.name, kind);
            let _ = writeln!(
                out,
                "{:<10} {:<4} {:<15} {:<4} {:<4} {:<4} {:<9} {:<9} {:>7}",
                "LANE", "MAP", "STATUS", "PREP", "LOAD", "HUB", "TOOL", "MATERIAL", "WEIGHT"
            );
            let _ = writeln!(out, "{:-<80}", "");

            for id in &unit.lanes {
                let lane = &self.lanes[id.0];
                let extruder = &self.extruders[lane.extruder.0];
                let hub = self.hub_state(lane.id).map_or("n/a", mark);
                let tool = if lane.tool_loaded {
                    extruder.name.as_str()
                } else {
                    "-"
                };
                let weight = lane
                    .spool
                    .weight
                    .map_or_else(|| "-".to_string(), |w| format!("{:.0}g", w));
                let _ = writeln!(
                    out,
                    "{:<10} {:<4} {:<15} {:<4} {:<4} {:<4} {:<9} {:<9} {:>7}",
                    lane.name,
                    lane.map,
                    lane.status.to_string(),
                    mark(lane.prep_state),
                    mark(lane.load_state),
                    hub,
                    tool,
                    lane.spool.material.as_deref().unwrap_or("-"),
                    weight
                );
            }
        }

        for extruder in &self.extruders {
            let _ = writeln!(out);
            let _ = writeln!(
                out,
                "{}: tool_start {}, loaded {}",
                extruder.name,
                extruder.tool_start_label(),
                extruder
                    .lane_loaded
                    .map_or("none", |l| self.lanes[l.0].name.as_str())
            );
            if let Some(buffer) = extruder.buffer {
                let buffer = &self.buffers[buffer.0];
                let _ = writeln!(out, "{}: {}", buffer.name, buffer.status());
            }
        }
        out
    }

    /// Snapshot plus live orchestration flags, for status endpoints.
    pub fn status_json(&self) -> Result<Value> {
        let mut value = self.snapshot().to_value()?;
        let live = json!({
            "state": self.ctx.state,
            "error": self.errors.last_error(),
            "in_toolchange": self.ctx.in_toolchange,
            "bypass": self.ctx.bypass,
            "pending_inconsistency": self.ctx.pending_inconsistency,
            "current_loading": self
                .ctx
                .current_loading
                .map(|l| self.lanes[l.0].name.clone()),
            "saved_position": self.errors.saved_position(),
            "active_spool": self.ctx.active_spool,
        });
        if let (Some(system), Value::Object(live)) = (value.get_mut("system"), live) {
            if let Some(system) = system.as_object_mut() {
                system.extend(live);
            }
        }
        Ok(value)
    }
}
