//! Units
//!
//! A unit is a box of lanes. The load and unload sequences are the same for
//! every unit; what differs between hardware families is captured by
//! [`UnitPolicy`]: how a lane is engaged, whether anything needs homing, and
//! how lane LEDs are coloured.

use log::{debug, info};

use crate::config::{LaneId, UnitConfig, UnitId, UnitKind};
use crate::error::{AfcError, Result};
use crate::hal::Selector;
use crate::indicator::LedRole;

/// Per-hardware-family behaviour of a unit.
pub trait UnitPolicy {
    fn kind(&self) -> UnitKind;

    /// Bring the unit to a known mechanical state at PREP.
    fn home(&mut self) -> Result<()>;

    /// Engage the lane at `index` before it moves filament.
    fn select_lane(&mut self, index: usize) -> Result<()>;

    /// Adjust the LED role of the lane at `index`.
    fn led_role(&self, _index: usize, role: LedRole) -> LedRole {
        role
    }
}

/// Every lane has its own drive; nothing to select.
#[derive(Debug, Default)]
pub struct SharedHubPolicy;

impl UnitPolicy for SharedHubPolicy {
    fn kind(&self) -> UnitKind {
        UnitKind::SharedHub
    }

    fn home(&mut self) -> Result<()> {
        Ok(())
    }

    fn select_lane(&mut self, _index: usize) -> Result<()> {
        Ok(())
    }
}

/// A cam selector engages one lane at a time and must be homed first.
pub struct CamSelectorPolicy {
    unit: String,
    selector: Box<dyn Selector>,
    homed: bool,
    selected: Option<usize>,
}

impl CamSelectorPolicy {
    pub fn new(unit: &str, selector: Box<dyn Selector>) -> Self {
        Self {
            unit: unit.to_string(),
            selector,
            homed: false,
            selected: None,
        }
    }

    pub fn selected(&self) -> Option<usize> {
        self.selected
    }
}

impl UnitPolicy for CamSelectorPolicy {
    fn kind(&self) -> UnitKind {
        UnitKind::CamSelector
    }

    fn home(&mut self) -> Result<()> {
        self.selected = None;
        self.homed = self.selector.home()?;
        if !self.homed {
            return Err(AfcError::SelectorHomeFailed {
                unit: self.unit.clone(),
            });
        }
        info!("{} selector homed", self.unit);
        Ok(())
    }

    fn select_lane(&mut self, index: usize) -> Result<()> {
        if self.selected == Some(index) {
            return Ok(());
        }
        if !self.homed {
            self.home()?;
        }
        self.selector.select(index)?;
        self.selected = Some(index);
        debug!("{} selector engaged lane index {}", self.unit, index);
        Ok(())
    }

    fn led_role(&self, index: usize, role: LedRole) -> LedRole {
        match role {
            LedRole::Ready if self.selected == Some(index) => LedRole::Selected,
            other => other,
        }
    }
}

/// A unit and its lanes.
pub struct Unit {
    pub id: UnitId,
    pub name: String,
    pub led_chain: String,
    pub lanes: Vec<LaneId>,
    pub policy: Box<dyn UnitPolicy>,
}

impl Unit {
    pub fn new(
        id: UnitId,
        config: &UnitConfig,
        lanes: Vec<LaneId>,
        policy: Box<dyn UnitPolicy>,
    ) -> Self {
        Self {
            id,
            name: config.name.clone(),
            led_chain: config
                .led_chain
                .clone()
                .unwrap_or_else(|| config.name.clone()),
            lanes,
            policy,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MockSelector {
        home_ok: bool,
        homes: usize,
        selects: Vec<usize>,
    }

    impl Selector for MockSelector {
        fn home(&mut self) -> Result<bool> {
            self.homes += 1;
            Ok(self.home_ok)
        }

        fn select(&mut self, index: usize) -> Result<()> {
            self.selects.push(index);
            Ok(())
        }
    }

    fn cam(home_ok: bool) -> CamSelectorPolicy {
        CamSelectorPolicy::new(
            "Cam_1",
            Box::new(MockSelector {
                home_ok,
                homes: 0,
                selects: Vec::new(),
            }),
        )
    }

    #[test]
    fn test_select_homes_first() {
        let mut policy = cam(true);
        policy.select_lane(2).unwrap();
        assert_eq!(policy.selected(), Some(2));
        assert!(policy.homed);
    }

    #[test]
    fn test_home_failure() {
        let mut policy = cam(false);
        let err = policy.select_lane(1).unwrap_err();
        assert_eq!(err.error_code(), "SELECTOR_HOME_FAILED");
        assert_eq!(policy.selected(), None);
    }

    #[test]
    fn test_selected_lane_led() {
        let mut policy = cam(true);
        policy.select_lane(0).unwrap();
        assert_eq!(policy.led_role(0, LedRole::Ready), LedRole::Selected);
        assert_eq!(policy.led_role(1, LedRole::Ready), LedRole::Ready);
        assert_eq!(policy.led_role(0, LedRole::Fault), LedRole::Fault);
    }

    #[test]
    fn test_shared_hub_is_passive() {
        let mut policy = SharedHubPolicy;
        assert!(policy.home().is_ok());
        assert!(policy.select_lane(3).is_ok());
        assert_eq!(policy.kind(), UnitKind::SharedHub);
        assert_eq!(policy.led_role(3, LedRole::Ready), LedRole::Ready);
    }
}
