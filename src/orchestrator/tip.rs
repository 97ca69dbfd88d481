//! Tip forming
//!
//! Built-in replacement for a slicer's tip shaping: ram, pull the tip into
//! the cooling tube, dip it up and down a few times to solidify it, and
//! optionally skinny-dip it back into the melt zone.

use crate::config::TipFormingConfig;

/// Cross-section of 1.75 mm filament (mm^2).
const FILAMENT_AREA: f64 = 2.405;

/// Share of the ramming length for each ramming move.
const RAMMING_PROFILE: [f64; 4] = [0.15, 0.2, 0.3, 0.35];

#[derive(Debug, Clone, PartialEq)]
pub enum TipStep {
    /// Relative extruder move (mm, mm/s).
    Extrude { distance: f64, speed: f64 },
    Dwell(f64),
    /// Switch the hotend target without waiting.
    SetTemp(f64),
}

/// Ordered tip-forming moves.
#[derive(Debug, Clone, PartialEq)]
pub struct TipPlan {
    pub steps: Vec<TipStep>,
}

impl TipPlan {
    pub fn build(config: &TipFormingConfig) -> Self {
        let mut steps = Vec::new();

        if config.toolchange_temp > 0.0 {
            steps.push(TipStep::SetTemp(config.toolchange_temp));
        }

        if config.ramming_volume > 0.0 {
            let length = config.ramming_volume / FILAMENT_AREA;
            let count = RAMMING_PROFILE.len() as f64;
            for (i, share) in RAMMING_PROFILE.iter().enumerate() {
                let speed = config.unloading_speed_start * (i as f64 + 1.0) / count;
                steps.push(TipStep::Extrude {
                    distance: length * share,
                    speed,
                });
            }
        }

        // Fast out of the melt zone, then slow into the cooling tube
        let fast = config.cooling_tube_position / 2.0;
        steps.push(TipStep::Extrude {
            distance: -fast,
            speed: config.unloading_speed_start,
        });
        steps.push(TipStep::Extrude {
            distance: -(config.cooling_tube_position - fast),
            speed: config.unloading_speed,
        });

        let moves = config.cooling_moves;
        for i in 0..moves {
            let ratio = if moves > 1 {
                i as f64 / (moves - 1) as f64
            } else {
                0.0
            };
            let speed = config.initial_cooling_speed
                + (config.final_cooling_speed - config.initial_cooling_speed) * ratio;
            steps.push(TipStep::Extrude {
                distance: config.cooling_tube_length,
                speed,
            });
            steps.push(TipStep::Extrude {
                distance: -config.cooling_tube_length,
                speed,
            });
        }

        if config.use_skinnydip {
            steps.push(TipStep::Extrude {
                distance: config.skinnydip_distance,
                speed: config.dip_insertion_speed,
            });
            steps.push(TipStep::Dwell(config.melt_zone_pause));
            steps.push(TipStep::Extrude {
                distance: -config.skinnydip_distance,
                speed: config.dip_extraction_speed,
            });
            steps.push(TipStep::Dwell(config.cooling_zone_pause));
        }

        Self { steps }
    }

    /// Net extruder travel of the plan.
    pub fn net_extrusion(&self) -> f64 {
        self.steps
            .iter()
            .map(|s| match s {
                TipStep::Extrude { distance, .. } => *distance,
                _ => 0.0,
            })
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_default_plan_ends_in_cooling_tube() {
        let config = TipFormingConfig::default();
        let plan = TipPlan::build(&config);

        assert_relative_eq!(plan.net_extrusion(), -config.cooling_tube_position);
        assert!(!plan.steps.iter().any(|s| matches!(s, TipStep::SetTemp(_))));
        // two unload moves plus a pair per cooling move
        assert_eq!(plan.steps.len(), 2 + 2 * config.cooling_moves as usize);
    }

    #[test]
    fn test_cooling_speeds_ramp() {
        let config = TipFormingConfig::default();
        let plan = TipPlan::build(&config);
        let speeds: Vec<f64> = plan.steps[2..]
            .iter()
            .step_by(2)
            .map(|s| match s {
                TipStep::Extrude { speed, .. } => *speed,
                _ => 0.0,
            })
            .collect();
        assert_relative_eq!(speeds[0], config.initial_cooling_speed);
        assert_relative_eq!(*speeds.last().unwrap(), config.final_cooling_speed);
    }

    #[test]
    fn test_ramming_and_skinnydip() {
        let config = TipFormingConfig {
            ramming_volume: 24.05,
            toolchange_temp: 200.0,
            use_skinnydip: true,
            ..Default::default()
        };
        let plan = TipPlan::build(&config);

        assert_eq!(plan.steps[0], TipStep::SetTemp(200.0));
        // ramming adds 10 mm; the dip is net zero
        assert_relative_eq!(
            plan.net_extrusion(),
            10.0 - config.cooling_tube_position,
            epsilon = 1e-9
        );
        assert_eq!(
            plan.steps.last(),
            Some(&TipStep::Dwell(config.cooling_zone_pause))
        );
    }
}
