//! Lane indicator colours
//!
//! Lanes show their state on an LED chain. The orchestrator picks a
//! [`LedRole`], the unit policy may adjust it, and the palette turns it into
//! a [`Color`].

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::LedConfig;
use crate::error::{AfcError, Result};

/// RGBW colour, each channel in 0..=1.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Color {
    pub r: f64,
    pub g: f64,
    pub b: f64,
    pub w: f64,
}

impl Color {
    pub const OFF: Color = Color {
        r: 0.0,
        g: 0.0,
        b: 0.0,
        w: 0.0,
    };

    /// Parse `"r,g,b[,w]"` with channels in 0..=1, or `#rrggbb`.
    pub fn parse(value: &str) -> Result<Self> {
        let value = value.trim();
        let invalid = |reason: &str| AfcError::InvalidConfig {
            field: format!("color '{}'", value),
            reason: reason.to_string(),
        };

        if let Some(hex) = value.strip_prefix('#') {
            if hex.len() != 6 || !hex.is_ascii() {
                return Err(invalid("hex colours need six digits"));
            }
            let channel = |i: usize| {
                u8::from_str_radix(&hex[i..i + 2], 16)
                    .map(|v| v as f64 / 255.0)
                    .map_err(|_| invalid("not a hex number"))
            };
            return Ok(Color {
                r: channel(0)?,
                g: channel(2)?,
                b: channel(4)?,
                w: 0.0,
            });
        }

        let parts: Vec<f64> = value
            .split(',')
            .map(|p| p.trim().parse::<f64>())
            .collect::<std::result::Result<_, _>>()
            .map_err(|_| invalid("channels must be numbers"))?;
        if parts.len() < 3 || parts.len() > 4 {
            return Err(invalid("expected 3 or 4 channels"));
        }
        if parts.iter().any(|c| !(0.0..=1.0).contains(c)) {
            return Err(invalid("channels must be between 0 and 1"));
        }
        Ok(Color {
            r: parts[0],
            g: parts[1],
            b: parts[2],
            w: parts.get(3).copied().unwrap_or(0.0),
        })
    }

    /// Hex form without the white channel, as stored with spool metadata.
    pub fn to_hex(&self) -> String {
        let byte = |c: f64| (c.clamp(0.0, 1.0) * 255.0).round() as u8;
        format!("#{:02x}{:02x}{:02x}", byte(self.r), byte(self.g), byte(self.b))
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{},{}", self.r, self.g, self.b, self.w)
    }
}

/// Meaning of a lane LED.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedRole {
    Fault,
    Ready,
    NotReady,
    Loading,
    Unloading,
    ToolLoaded,
    PrepLoaded,
    /// Lane currently engaged by a selector.
    Selected,
}

/// Colours for every role.
#[derive(Debug, Clone)]
pub struct LedPalette {
    fault: Color,
    ready: Color,
    not_ready: Color,
    loading: Color,
    unloading: Color,
    tool_loaded: Color,
    prep_loaded: Color,
    selected: Color,
}

impl LedPalette {
    pub fn from_config(config: &LedConfig) -> Result<Self> {
        Ok(Self {
            fault: Color::parse(&config.fault)?,
            ready: Color::parse(&config.ready)?,
            not_ready: Color::parse(&config.not_ready)?,
            loading: Color::parse(&config.loading)?,
            unloading: Color::parse(&config.unloading)?,
            tool_loaded: Color::parse(&config.tool_loaded)?,
            prep_loaded: Color::parse(&config.prep_loaded)?,
            selected: Color::parse(&config.selected)?,
        })
    }

    pub fn color(&self, role: LedRole) -> Color {
        match role {
            LedRole::Fault => self.fault,
            LedRole::Ready => self.ready,
            LedRole::NotReady => self.not_ready,
            LedRole::Loading => self.loading,
            LedRole::Unloading => self.unloading,
            LedRole::ToolLoaded => self.tool_loaded,
            LedRole::PrepLoaded => self.prep_loaded,
            LedRole::Selected => self.selected,
        }
    }
}

/// Address of one LED on a chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedAddress {
    pub chain: String,
    pub index: usize,
}
