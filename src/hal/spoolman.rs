//! Spoolman registry client
//!
//! Looks spools up over HTTP when built with the `spoolman` feature. The
//! active spool is only tracked locally; reporting it to the print host is
//! the host's business.

use std::env;

use log::info;
use serde::Deserialize;

use crate::error::{AfcError, Result};
use crate::hal::{SpoolInfo, SpoolRegistry};

#[derive(Debug, Deserialize)]
struct SpoolResponse {
    #[serde(default)]
    remaining_weight: Option<f64>,
    filament: FilamentResponse,
}

#[derive(Debug, Deserialize)]
struct FilamentResponse {
    #[serde(default)]
    material: Option<String>,
    #[serde(default)]
    color_hex: Option<String>,
    #[serde(default)]
    settings_extruder_temp: Option<f64>,
}

impl From<SpoolResponse> for SpoolInfo {
    fn from(spool: SpoolResponse) -> Self {
        SpoolInfo {
            material: spool.filament.material,
            color_hex: spool.filament.color_hex.map(|hex| {
                if hex.starts_with('#') {
                    hex
                } else {
                    format!("#{}", hex)
                }
            }),
            remaining_weight: spool.remaining_weight,
            extruder_temp: spool.filament.settings_extruder_temp,
        }
    }
}

/// HTTP client for a Spoolman server.
pub struct SpoolmanClient {
    base_url: String,
    timeout_ms: u64,
    active: Option<u32>,
}

impl SpoolmanClient {
    /// Create a client from `AFC_SPOOLMAN_URL` / `AFC_SPOOLMAN_TIMEOUT_MS`.
    pub fn from_env() -> Self {
        let base_url =
            env::var("AFC_SPOOLMAN_URL").unwrap_or_else(|_| "http://localhost:7912".into());
        let timeout_ms = env::var("AFC_SPOOLMAN_TIMEOUT_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(5_000);
        Self::new(base_url, timeout_ms)
    }

    pub fn new(base_url: String, timeout_ms: u64) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout_ms,
            active: None,
        }
    }

    pub fn spool_url(&self, spool_id: u32) -> String {
        format!("{}/api/v1/spool/{}", self.base_url, spool_id)
    }

    pub fn active(&self) -> Option<u32> {
        self.active
    }

    #[cfg(feature = "spoolman")]
    fn fetch(&self, spool_id: u32) -> Result<SpoolResponse> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_millis(self.timeout_ms))
            .build()
            .map_err(|e| AfcError::SpoolRegistry {
                reason: e.to_string(),
            })?;

        let url = self.spool_url(spool_id);
        let response = client.get(&url).send().map_err(|e| {
            if e.is_timeout() {
                AfcError::SpoolRegistry {
                    reason: format!("request to {} timed out after {} ms", url, self.timeout_ms),
                }
            } else {
                AfcError::SpoolRegistry {
                    reason: format!("cannot reach {}: {}", self.base_url, e),
                }
            }
        })?;

        if !response.status().is_success() {
            return Err(AfcError::SpoolRegistry {
                reason: format!("spool {} lookup returned {}", spool_id, response.status()),
            });
        }

        response
            .json::<SpoolResponse>()
            .map_err(|e| AfcError::SpoolRegistry {
                reason: format!("invalid spool response: {}", e),
            })
    }

    #[cfg(not(feature = "spoolman"))]
    fn fetch(&self, _spool_id: u32) -> Result<SpoolResponse> {
        Err(AfcError::SpoolRegistry {
            reason: format!(
                "spool lookups not compiled (timeout {} ms). Build with --features spoolman",
                self.timeout_ms
            ),
        })
    }
}

impl SpoolRegistry for SpoolmanClient {
    fn lookup(&self, spool_id: u32) -> Result<SpoolInfo> {
        self.fetch(spool_id).map(SpoolInfo::from)
    }

    fn set_active(&mut self, spool_id: Option<u32>) -> Result<()> {
        if self.active != spool_id {
            info!("Active spool: {:?}", spool_id);
        }
        self.active = spool_id;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spool_url_trims_slash() {
        let client = SpoolmanClient::new("http://printer:7912/".to_string(), 1000);
        assert_eq!(client.spool_url(7), "http://printer:7912/api/v1/spool/7");
    }

    #[test]
    fn test_response_conversion_adds_hash() {
        let json = r#"{
            "id": 3,
            "remaining_weight": 812.5,
            "filament": {"material": "PETG", "color_hex": "1a2b3c", "settings_extruder_temp": 240}
        }"#;
        let spool: SpoolResponse = serde_json::from_str(json).unwrap();
        let info = SpoolInfo::from(spool);
        assert_eq!(info.material.as_deref(), Some("PETG"));
        assert_eq!(info.color_hex.as_deref(), Some("#1a2b3c"));
        assert_eq!(info.remaining_weight, Some(812.5));
        assert_eq!(info.extruder_temp, Some(240.0));
    }

    #[test]
    fn test_set_active_tracks_spool() {
        let mut client = SpoolmanClient::new("http://localhost:7912".to_string(), 1000);
        client.set_active(Some(4)).unwrap();
        assert_eq!(client.active(), Some(4));
        client.set_active(None).unwrap();
        assert_eq!(client.active(), None);
    }
}
