//! Hub
//!
//! The hub is where every lane of a unit merges into one bowden tube. Only
//! one lane may move filament across it at a time, enforced by an exclusive
//! token held for the duration of a hub-crossing sequence.

mod cutter;

pub use cutter::{CutStep, CutterPlan};

use crate::config::{CutterConfig, HubConfig, HubId, LaneId};

/// Hub junction state.
#[derive(Debug, Clone)]
pub struct Hub {
    pub id: HubId,
    pub name: String,
    /// Hub sensor level.
    pub state: bool,
    pub bowden_length: f64,
    /// First step when pushing past the hub sensor.
    pub clear_step: f64,
    pub cutter: Option<CutterConfig>,
    owner: Option<LaneId>,
}

impl Hub {
    pub fn new(id: HubId, config: &HubConfig) -> Self {
        Self {
            id,
            name: config.name.clone(),
            state: false,
            bowden_length: config.bowden_length,
            clear_step: config.clear_step,
            cutter: config.cutter.clone(),
            owner: None,
        }
    }

    /// Lane currently holding the token.
    pub fn owner(&self) -> Option<LaneId> {
        self.owner
    }

    /// Take the token for `lane`. Re-acquiring by the holder succeeds; any
    /// other holder is returned as the error.
    pub fn try_acquire(&mut self, lane: LaneId) -> std::result::Result<(), LaneId> {
        match self.owner {
            Some(owner) if owner != lane => Err(owner),
            _ => {
                self.owner = Some(lane);
                Ok(())
            }
        }
    }

    pub fn release(&mut self, lane: LaneId) {
        if self.owner == Some(lane) {
            self.owner = None;
        }
    }

    /// Cut sequence for this hub, if it has a cutter.
    pub fn cutter_plan(&self, max_attempts: u32) -> Option<CutterPlan> {
        self.cutter
            .as_ref()
            .map(|cutter| CutterPlan::build(cutter, max_attempts))
    }

    /// Number of short retracts allowed while waiting for the hub to clear.
    pub fn clear_attempts(&self, short_move_dis: f64) -> u32 {
        (self.bowden_length / short_move_dis).ceil().max(1.0) as u32
    }
}
