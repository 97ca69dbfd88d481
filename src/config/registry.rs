//! Typed registry
//!
//! Names in the configuration are resolved to typed ids once at startup so
//! the state machine never has to look up a hardware object by string.

use std::collections::HashMap;
use std::fmt;

use crate::config::{AfcConfig, ToolSensorMode, DIRECT_HUB, NO_RUNOUT_LANE};
use crate::error::{AfcError, Result};
use crate::state::SYSTEM_KEY;

macro_rules! typed_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub usize);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

typed_id!(LaneId);
typed_id!(UnitId);
typed_id!(HubId);
typed_id!(ExtruderId);
typed_id!(BufferId);

/// Where a lane's filament joins the shared path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HubRef {
    Hub(HubId),
    /// Lane feeds the toolhead without passing a hub.
    Direct,
}

/// Resolved references of one lane.
#[derive(Debug, Clone)]
pub struct LaneRefs {
    pub unit: UnitId,
    pub index: usize,
    pub hub: HubRef,
    pub extruder: ExtruderId,
    pub buffer: Option<BufferId>,
    pub map: String,
    pub runout: Option<LaneId>,
}

/// Bidirectional name/id table for one kind of object.
#[derive(Debug, Clone, Default)]
struct NameTable {
    names: Vec<String>,
    index: HashMap<String, usize>,
}

impl NameTable {
    fn build<'a>(kind: &'static str, names: impl Iterator<Item = &'a str>) -> Result<Self> {
        let mut table = NameTable::default();
        for name in names {
            if name.is_empty() {
                return Err(AfcError::InvalidConfig {
                    field: kind.to_string(),
                    reason: "name must not be empty".to_string(),
                });
            }
            if table.index.contains_key(name) {
                return Err(AfcError::DuplicateName {
                    kind,
                    name: name.to_string(),
                });
            }
            table.index.insert(name.to_string(), table.names.len());
            table.names.push(name.to_string());
        }
        Ok(table)
    }

    fn get(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    fn resolve(&self, kind: &'static str, name: &str, referenced_by: &str) -> Result<usize> {
        self.get(name).ok_or_else(|| AfcError::UnresolvedReference {
            kind,
            name: name.to_string(),
            referenced_by: referenced_by.to_string(),
        })
    }
}

/// All configuration names resolved to typed ids.
#[derive(Debug, Clone)]
pub struct Registry {
    lanes: NameTable,
    units: NameTable,
    hubs: NameTable,
    extruders: NameTable,
    buffers: NameTable,
    lane_refs: Vec<LaneRefs>,
    unit_lanes: Vec<Vec<LaneId>>,
    extruder_buffers: Vec<Option<BufferId>>,
}

impl Registry {
    /// Resolve every cross-reference in `config`.
    pub fn resolve(config: &AfcConfig) -> Result<Self> {
        let units = NameTable::build("unit", config.units.iter().map(|u| u.name.as_str()))?;
        if units.get(SYSTEM_KEY).is_some() {
            return Err(AfcError::InvalidConfig {
                field: "unit".to_string(),
                reason: format!("'{}' is reserved for the persisted system section", SYSTEM_KEY),
            });
        }
        let hubs = NameTable::build("hub", config.hubs.iter().map(|h| h.name.as_str()))?;
        let extruders =
            NameTable::build("extruder", config.extruders.iter().map(|e| e.name.as_str()))?;
        let buffers = NameTable::build("buffer", config.buffers.iter().map(|b| b.name.as_str()))?;
        let lanes = NameTable::build("lane", config.lanes.iter().map(|l| l.name.as_str()))?;

        let mut extruder_buffers = Vec::with_capacity(config.extruders.len());
        for extruder in &config.extruders {
            let buffer = match &extruder.buffer {
                Some(name) => Some(BufferId(buffers.resolve("buffer", name, &extruder.name)?)),
                None => None,
            };
            if extruder.tool_start == ToolSensorMode::Buffer && buffer.is_none() {
                return Err(AfcError::InvalidConfig {
                    field: format!("{}.buffer", extruder.name),
                    reason: "buffer ram sensing needs a buffer".to_string(),
                });
            }
            extruder_buffers.push(buffer);
        }

        let mut unit_lanes: Vec<Vec<LaneId>> = vec![Vec::new(); config.units.len()];
        let mut lane_refs = Vec::with_capacity(config.lanes.len());
        let mut maps: HashMap<String, String> = HashMap::new();

        for (position, lane) in config.lanes.iter().enumerate() {
            let unit = UnitId(units.resolve("unit", &lane.unit, &lane.name)?);
            let unit_cfg = &config.units[unit.0];

            let hub_name = lane.hub.as_ref().or(unit_cfg.hub.as_ref()).ok_or_else(|| {
                AfcError::InvalidConfig {
                    field: format!("{}.hub", lane.name),
                    reason: "no hub set on the lane or its unit".to_string(),
                }
            })?;
            let hub = if hub_name == DIRECT_HUB {
                if lane.bowden_length.is_none() {
                    return Err(AfcError::InvalidConfig {
                        field: format!("{}.bowden_length", lane.name),
                        reason: "direct lanes need their own bowden length".to_string(),
                    });
                }
                HubRef::Direct
            } else {
                HubRef::Hub(HubId(hubs.resolve("hub", hub_name, &lane.name)?))
            };

            let extruder = match lane.extruder.as_ref().or(unit_cfg.extruder.as_ref()) {
                Some(name) => ExtruderId(extruders.resolve("extruder", name, &lane.name)?),
                None if config.extruders.len() == 1 => ExtruderId(0),
                None => {
                    return Err(AfcError::InvalidConfig {
                        field: format!("{}.extruder", lane.name),
                        reason: "no extruder set and more than one is configured".to_string(),
                    })
                }
            };

            let buffer = match lane.buffer.as_ref().or(unit_cfg.buffer.as_ref()) {
                Some(name) => Some(BufferId(buffers.resolve("buffer", name, &lane.name)?)),
                None => extruder_buffers[extruder.0],
            };

            let runout = match lane.runout_lane.as_deref() {
                None | Some(NO_RUNOUT_LANE) => None,
                Some(name) if name == lane.name => {
                    return Err(AfcError::InvalidConfig {
                        field: format!("{}.runout_lane", lane.name),
                        reason: "a lane cannot be its own runout lane".to_string(),
                    })
                }
                Some(name) => Some(LaneId(lanes.resolve("lane", name, &lane.name)?)),
            };

            let map = lane
                .map
                .clone()
                .unwrap_or_else(|| format!("T{}", position));
            if let Some(other) = maps.insert(map.clone(), lane.name.clone()) {
                return Err(AfcError::DuplicateName {
                    kind: "map",
                    name: format!("{} ({} and {})", map, other, lane.name),
                });
            }

            let index = lane.index.unwrap_or(unit_lanes[unit.0].len());
            unit_lanes[unit.0].push(LaneId(position));

            lane_refs.push(LaneRefs {
                unit,
                index,
                hub,
                extruder,
                buffer,
                map,
                runout,
            });
        }

        Ok(Self {
            lanes,
            units,
            hubs,
            extruders,
            buffers,
            lane_refs,
            unit_lanes,
            extruder_buffers,
        })
    }

    /// Resolve a lane name.
    pub fn lane_id(&self, name: &str) -> Result<LaneId> {
        self.lanes
            .get(name)
            .map(LaneId)
            .ok_or_else(|| AfcError::UnknownLane {
                name: name.to_string(),
            })
    }

    pub fn lane_name(&self, id: LaneId) -> &str {
        &self.lanes.names[id.0]
    }

    pub fn unit_name(&self, id: UnitId) -> &str {
        &self.units.names[id.0]
    }

    pub fn hub_name(&self, id: HubId) -> &str {
        &self.hubs.names[id.0]
    }

    pub fn extruder_name(&self, id: ExtruderId) -> &str {
        &self.extruders.names[id.0]
    }

    pub fn buffer_name(&self, id: BufferId) -> &str {
        &self.buffers.names[id.0]
    }

    pub fn hub_id(&self, name: &str) -> Option<HubId> {
        self.hubs.get(name).map(HubId)
    }

    pub fn extruder_id(&self, name: &str) -> Option<ExtruderId> {
        self.extruders.get(name).map(ExtruderId)
    }

    pub fn buffer_id(&self, name: &str) -> Option<BufferId> {
        self.buffers.get(name).map(BufferId)
    }

    pub fn lane_refs(&self, id: LaneId) -> &LaneRefs {
        &self.lane_refs[id.0]
    }

    pub fn unit_lanes(&self, id: UnitId) -> &[LaneId] {
        &self.unit_lanes[id.0]
    }

    pub fn extruder_buffer(&self, id: ExtruderId) -> Option<BufferId> {
        self.extruder_buffers[id.0]
    }

    pub fn lane_count(&self) -> usize {
        self.lanes.names.len()
    }

    pub fn unit_count(&self) -> usize {
        self.units.names.len()
    }

    pub fn lane_ids(&self) -> impl Iterator<Item = LaneId> {
        (0..self.lanes.names.len()).map(LaneId)
    }

    pub fn unit_ids(&self) -> impl Iterator<Item = UnitId> {
        (0..self.units.names.len()).map(UnitId)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ExtruderConfig, HubConfig, LaneConfig, UnitConfig};

    fn base_config() -> AfcConfig {
        let mut config = AfcConfig::default();
        config.units.push(UnitConfig {
            name: "Turtle_1".to_string(),
            hub: Some("hub1".to_string()),
            ..Default::default()
        });
        config.hubs.push(HubConfig {
            name: "hub1".to_string(),
            ..Default::default()
        });
        config.extruders.push(ExtruderConfig {
            name: "extruder".to_string(),
            ..Default::default()
        });
        for name in ["lane1", "lane2"] {
            config.lanes.push(LaneConfig {
                name: name.to_string(),
                unit: "Turtle_1".to_string(),
                ..Default::default()
            });
        }
        config
    }

    #[test]
    fn test_resolves_defaults_from_unit() {
        let registry = Registry::resolve(&base_config()).unwrap();
        let lane2 = registry.lane_id("lane2").unwrap();
        let refs = registry.lane_refs(lane2);

        assert_eq!(refs.hub, HubRef::Hub(HubId(0)));
        assert_eq!(refs.extruder, ExtruderId(0));
        assert_eq!(refs.index, 1);
        assert_eq!(refs.map, "T1");
        assert_eq!(registry.unit_lanes(UnitId(0)).len(), 2);
    }

    #[test]
    fn test_unknown_hub_is_config_error() {
        let mut config = base_config();
        config.lanes[0].hub = Some("nowhere".to_string());
        let err = Registry::resolve(&config).unwrap_err();
        assert_eq!(err.error_code(), "UNRESOLVED_REFERENCE");
    }

    #[test]
    fn test_duplicate_lane_rejected() {
        let mut config = base_config();
        config.lanes[1].name = "lane1".to_string();
        let err = Registry::resolve(&config).unwrap_err();
        assert_eq!(err.error_code(), "DUPLICATE_NAME");
    }

    #[test]
    fn test_direct_lane_needs_bowden() {
        let mut config = base_config();
        config.lanes[0].hub = Some(DIRECT_HUB.to_string());
        assert!(Registry::resolve(&config).is_err());

        config.lanes[0].bowden_length = Some(500.0);
        let registry = Registry::resolve(&config).unwrap();
        assert_eq!(registry.lane_refs(LaneId(0)).hub, HubRef::Direct);
    }

    #[test]
    fn test_runout_lane_resolution() {
        let mut config = base_config();
        config.lanes[0].runout_lane = Some("lane2".to_string());
        config.lanes[1].runout_lane = Some(NO_RUNOUT_LANE.to_string());
        let registry = Registry::resolve(&config).unwrap();
        assert_eq!(registry.lane_refs(LaneId(0)).runout, Some(LaneId(1)));
        assert_eq!(registry.lane_refs(LaneId(1)).runout, None);

        config.lanes[1].runout_lane = Some("lane2".to_string());
        assert!(Registry::resolve(&config).is_err());
    }

    #[test]
    fn test_system_unit_name_reserved() {
        let mut config = base_config();
        config.units[0].name = "system".to_string();
        for lane in config.lanes.iter_mut() {
            lane.unit = "system".to_string();
        }
        match Registry::resolve(&config).unwrap_err() {
            AfcError::InvalidConfig { field, .. } => assert_eq!(field, "unit"),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_unknown_lane_lookup() {
        let registry = Registry::resolve(&base_config()).unwrap();
        let err = registry.lane_id("lane9").unwrap_err();
        assert_eq!(err.error_code(), "UNKNOWN_LANE");
    }
}
