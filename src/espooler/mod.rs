//! Espooler
//!
//! While printing, the spool motor pays out filament in short pulses so the
//! extruder never has to drag the full spool. Pulses are driven by extruder
//! travel: every `delta_movement` mm of advance fires one pulse.

use crate::config::EspoolerConfig;

/// Full duty used for the kick-start.
const KICK_DUTY: f64 = 1.0;

/// One assist pulse to send to the spool motor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AssistPulse {
    /// Full-duty kick before cruising (s).
    pub kick: Option<f64>,
    pub duty: f64,
    /// Cruise time (s).
    pub seconds: f64,
}

#[derive(Debug, Clone)]
pub struct Espooler {
    config: EspoolerConfig,
    enabled: bool,
    last_position: f64,
    pulses: u64,
}

impl Espooler {
    pub fn new(config: EspoolerConfig) -> Self {
        Self {
            config,
            enabled: false,
            last_position: 0.0,
            pulses: 0,
        }
    }

    /// Start assisting, measuring from the current extruder position.
    pub fn enable(&mut self, extruder_position: f64) {
        self.enabled = true;
        self.last_position = extruder_position;
    }

    pub fn disable(&mut self) {
        self.enabled = false;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Pulses fired since startup.
    pub fn pulse_count(&self) -> u64 {
        self.pulses
    }

    /// Seconds at cruise duty to pay out `mm_movement`.
    pub fn cruise_time(&self) -> f64 {
        let c = &self.config;
        c.mm_movement / c.mm_per_rotation * c.cycles_per_rotation / 1000.0 * c.scaling
    }

    /// Check extruder travel and return a pulse when one is due.
    pub fn tick(&mut self, extruder_position: f64) -> Option<AssistPulse> {
        if !self.enabled {
            return None;
        }
        if extruder_position - self.last_position < self.config.delta_movement {
            return None;
        }
        self.last_position = extruder_position;
        self.pulses += 1;
        Some(AssistPulse {
            kick: self
                .config
                .enable_kick_start
                .then_some(self.config.kick_start_time),
            duty: self.config.pwm_value,
            seconds: self.cruise_time(),
        })
    }
}

impl AssistPulse {
    /// `(duty, seconds)` segments in the order the motor runs them.
    pub fn segments(&self) -> Vec<(f64, f64)> {
        let mut segments = Vec::with_capacity(2);
        if let Some(kick) = self.kick {
            segments.push((KICK_DUTY, kick));
        }
        segments.push((self.duty, self.seconds));
        segments
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_cruise_time_formula() {
        let espooler = Espooler::new(EspoolerConfig::default());
        assert_relative_eq!(espooler.cruise_time(), 50.0 / 245.0 * 0.8, epsilon = 1e-9);
    }

    #[test]
    fn test_one_pulse_per_delta() {
        let mut espooler = Espooler::new(EspoolerConfig {
            delta_movement: 100.0,
            ..Default::default()
        });
        assert_eq!(espooler.tick(500.0), None);

        espooler.enable(0.0);
        assert_eq!(espooler.tick(99.0), None);
        let pulse = espooler.tick(150.0).unwrap();
        assert_eq!(pulse.kick, Some(0.070));
        assert_eq!(pulse.duty, 0.6);
        assert_eq!(espooler.pulse_count(), 1);

        // Reference moved to 150
        assert_eq!(espooler.tick(240.0), None);
        assert!(espooler.tick(250.0).is_some());
    }

    #[test]
    fn test_segments_without_kick() {
        let pulse = AssistPulse {
            kick: None,
            duty: 0.5,
            seconds: 0.2,
        };
        assert_eq!(pulse.segments(), vec![(0.5, 0.2)]);
    }

    #[test]
    fn test_disable_stops_pulses() {
        let mut espooler = Espooler::new(EspoolerConfig::default());
        espooler.enable(0.0);
        espooler.disable();
        assert_eq!(espooler.tick(1000.0), None);
    }
}
