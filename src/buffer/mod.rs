//! Buffers
//!
//! A buffer sits between the lane and the toolhead and reports filament
//! tension. Turtleneck buffers have two switches and trim the synced lane's
//! rotation distance; Belay buffers have one switch and push filament when
//! it trips.

use crate::config::{BufferConfig, BufferId, BufferKindConfig, LaneId};
use crate::sensor::PinKind;

#[derive(Debug, Clone, PartialEq)]
pub enum BufferKind {
    Turtleneck {
        advance_state: bool,
        trailing_state: bool,
        multiplier_high: f64,
        multiplier_low: f64,
    },
    Belay {
        state: bool,
        distance: f64,
        velocity: f64,
        accel: f64,
    },
}

/// What the orchestrator has to do for the engaged lane.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BufferAction {
    SetMultiplier(f64),
    Push {
        distance: f64,
        velocity: f64,
        accel: f64,
    },
}

#[derive(Debug, Clone)]
pub struct Buffer {
    pub id: BufferId,
    pub name: String,
    pub kind: BufferKind,
    enabled: bool,
    lane: Option<LaneId>,
}

impl Buffer {
    pub fn new(id: BufferId, config: &BufferConfig) -> Self {
        let kind = match config.kind {
            BufferKindConfig::Turtleneck {
                multiplier_high,
                multiplier_low,
            } => BufferKind::Turtleneck {
                advance_state: false,
                trailing_state: false,
                multiplier_high,
                multiplier_low,
            },
            BufferKindConfig::Belay {
                distance,
                velocity,
                accel,
            } => BufferKind::Belay {
                state: false,
                distance,
                velocity,
                accel,
            },
        };
        Self {
            id,
            name: config.name.clone(),
            kind,
            enabled: false,
            lane: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Lane the buffer is compensating for.
    pub fn lane(&self) -> Option<LaneId> {
        self.lane
    }

    pub fn enable(&mut self, lane: LaneId) {
        self.enabled = true;
        self.lane = Some(lane);
    }

    /// Disengage. Returns the lane whose multiplier has to be reset.
    pub fn disable(&mut self) -> Option<(LaneId, BufferAction)> {
        self.enabled = false;
        let lane = self.lane.take()?;
        match self.kind {
            BufferKind::Turtleneck { .. } => Some((lane, BufferAction::SetMultiplier(1.0))),
            BufferKind::Belay { .. } => None,
        }
    }

    /// Record a sensor level. Returns an action only while enabled.
    pub fn on_event(&mut self, pin: PinKind, level: bool) -> Option<BufferAction> {
        let action = match (&mut self.kind, pin) {
            (
                BufferKind::Turtleneck {
                    advance_state,
                    multiplier_low,
                    ..
                },
                PinKind::BufferAdvance,
            ) => {
                *advance_state = level;
                level.then_some(BufferAction::SetMultiplier(*multiplier_low))
            }
            (
                BufferKind::Turtleneck {
                    trailing_state,
                    multiplier_high,
                    ..
                },
                PinKind::BufferTrailing,
            ) => {
                *trailing_state = level;
                level.then_some(BufferAction::SetMultiplier(*multiplier_high))
            }
            (
                BufferKind::Belay {
                    state,
                    distance,
                    velocity,
                    accel,
                },
                PinKind::Belay,
            ) => {
                *state = level;
                level.then_some(BufferAction::Push {
                    distance: *distance,
                    velocity: *velocity,
                    accel: *accel,
                })
            }
            _ => None,
        };
        if self.enabled {
            action
        } else {
            None
        }
    }

    /// Filament pushed against the gears.
    pub fn advancing(&self) -> bool {
        match self.kind {
            BufferKind::Turtleneck { advance_state, .. } => advance_state,
            BufferKind::Belay { state, .. } => state,
        }
    }

    /// Filament pulled tight against the gears.
    pub fn trailing(&self) -> bool {
        match self.kind {
            BufferKind::Turtleneck { trailing_state, .. } => trailing_state,
            BufferKind::Belay { .. } => false,
        }
    }

    pub fn status(&self) -> &'static str {
        match self.kind {
            BufferKind::Turtleneck {
                advance_state: true,
                ..
            } => "Advancing",
            BufferKind::Turtleneck {
                trailing_state: true,
                ..
            } => "Trailing",
            BufferKind::Belay { state: true, .. } => "Triggered",
            _ => "Neutral",
        }
    }
}
