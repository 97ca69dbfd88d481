//! Hub cutter sequence
//!
//! The cut is built as a plain list of steps so it can be checked without
//! hardware; the orchestrator walks the list and drives the servo and lane.

use crate::config::CutterConfig;

/// One step of a hub cut.
#[derive(Debug, Clone, PartialEq)]
pub enum CutStep {
    /// Move the cutter servo to an angle.
    Servo(f64),
    /// Wait for the servo to finish.
    Settle(f64),
    /// Advance the lane in `step` increments until the hub sensor triggers.
    AdvanceToHub { step: f64, max_attempts: u32 },
    /// Relative lane move.
    Move(f64),
}

/// Ordered cut sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct CutterPlan {
    pub steps: Vec<CutStep>,
}

impl CutterPlan {
    pub fn build(config: &CutterConfig, max_attempts: u32) -> Self {
        let settle = CutStep::Settle(config.settle_time);
        let mut steps = vec![
            CutStep::Servo(config.prep_angle),
            settle.clone(),
            CutStep::AdvanceToHub {
                step: config.cut_step,
                max_attempts,
            },
            // Normalise the tip position just behind the blade
            CutStep::Move(-4.0 * config.cut_step),
            CutStep::Move(config.cut_dist),
            settle.clone(),
            CutStep::Servo(config.clip_angle),
            settle.clone(),
        ];

        if config.cut_confirm {
            steps.extend([
                CutStep::Servo(config.prep_angle),
                settle.clone(),
                CutStep::Servo(config.clip_angle),
                settle.clone(),
            ]);
        }

        steps.extend([
            CutStep::Servo(config.pass_angle),
            settle,
            CutStep::Move(-config.cut_clear),
        ]);

        Self { steps }
    }

    /// Servo angles in the order they are commanded.
    pub fn servo_angles(&self) -> Vec<f64> {
        self.steps
            .iter()
            .filter_map(|s| match s {
                CutStep::Servo(angle) => Some(*angle),
                _ => None,
            })
            .collect()
    }
}
