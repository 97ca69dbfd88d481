//! Debounce state machine
//!
//! A raw edge only becomes the accepted level once it has stayed unchanged
//! for the debounce window. Bounces inside the window are discarded.

/// Stable-for-window debounce of one binary pin.
#[derive(Debug, Clone)]
pub struct Debouncer {
    window: f64,
    stable: bool,
    pending: Option<(bool, f64)>,
}

impl Debouncer {
    /// Create a debouncer that starts at `initial`.
    pub fn new(window: f64, initial: bool) -> Self {
        Self {
            window: window.max(0.0),
            stable: initial,
            pending: None,
        }
    }

    /// The currently accepted level.
    pub fn state(&self) -> bool {
        self.stable
    }

    /// Feed a raw edge. Returns the new accepted level when the edge is
    /// accepted immediately (zero window).
    pub fn feed(&mut self, timestamp: f64, raw: bool) -> Option<bool> {
        if self.window == 0.0 {
            self.pending = None;
            return self.accept(raw);
        }
        match self.pending {
            // Bounce back to the accepted level cancels the pending change.
            Some(_) if raw == self.stable => self.pending = None,
            Some((level, _)) if level == raw => {}
            _ if raw != self.stable => self.pending = Some((raw, timestamp)),
            _ => {}
        }
        None
    }

    /// Promote a pending level that has been stable for the whole window.
    pub fn settle(&mut self, now: f64) -> Option<bool> {
        match self.pending {
            Some((level, since)) if now - since >= self.window => {
                self.pending = None;
                self.accept(level)
            }
            _ => None,
        }
    }

    fn accept(&mut self, level: bool) -> Option<bool> {
        if level == self.stable {
            return None;
        }
        self.stable = level;
        Some(level)
    }
}

/// Rejects events arriving faster than a minimum interval.
#[derive(Debug, Clone)]
pub struct EventThrottle {
    min_interval: f64,
    last: Option<f64>,
}

impl EventThrottle {
    pub fn new(min_interval: f64) -> Self {
        Self {
            min_interval,
            last: None,
        }
    }

    /// Returns true and records `now` if enough time has passed.
    pub fn allow(&mut self, now: f64) -> bool {
        match self.last {
            Some(last) if now - last < self.min_interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_window_passes_edges() {
        let mut pin = Debouncer::new(0.0, false);
        assert_eq!(pin.feed(0.0, true), Some(true));
        assert_eq!(pin.feed(0.01, true), None);
        assert_eq!(pin.feed(0.02, false), Some(false));
        assert!(!pin.state());
    }

    #[test]
    fn test_change_accepted_after_window() {
        let mut pin = Debouncer::new(0.05, false);
        assert_eq!(pin.feed(1.0, true), None);
        assert_eq!(pin.settle(1.02), None);
        assert_eq!(pin.settle(1.05), Some(true));
        assert!(pin.state());
    }

    #[test]
    fn test_bounce_inside_window_discarded() {
        let mut pin = Debouncer::new(0.05, false);
        pin.feed(1.0, true);
        pin.feed(1.01, false);
        assert_eq!(pin.settle(2.0), None);
        assert!(!pin.state());
    }

    #[test]
    fn test_repeated_raw_level_keeps_first_timestamp() {
        let mut pin = Debouncer::new(0.05, false);
        pin.feed(1.0, true);
        pin.feed(1.04, true);
        assert_eq!(pin.settle(1.05), Some(true));
    }

    #[test]
    fn test_throttle_min_interval() {
        let mut throttle = EventThrottle::new(1.0);
        assert!(throttle.allow(10.0));
        assert!(!throttle.allow(10.5));
        assert!(throttle.allow(11.0));
    }
}
