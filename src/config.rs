use crate::error::{AdError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

const CONFIG_DIR: &str = "signalflow-ads";
const CONFIG_FILE: &str = "config.json";

/// Width/height pair in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Size { width, height }
    }
}

fn default_skip_cooldown_secs() -> u32 {
    10
}

fn default_desktop_size() -> Size {
    Size::new(640, 360)
}

fn default_mobile_size() -> Size {
    Size::new(360, 240)
}

fn default_fallback_exit_url() -> String {
    "http://tapgerine.com".to_string()
}

fn default_exit_url_param() -> String {
    "aff_sub4".to_string()
}

fn default_beacon_timeout_ms() -> u64 {
    5000
}

/// Player settings persisted as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerConfig {
    /// Seconds an impression must run before the skip affordance unlocks.
    #[serde(default = "default_skip_cooldown_secs")]
    pub skip_cooldown_secs: u32,
    #[serde(default = "default_desktop_size")]
    pub desktop_size: Size,
    #[serde(default = "default_mobile_size")]
    pub mobile_size: Size,
    /// Where a skip click goes when the page carries no exit URL parameter.
    #[serde(default = "default_fallback_exit_url")]
    pub fallback_exit_url: String,
    /// Query parameter on the host page holding the skip exit URL.
    #[serde(default = "default_exit_url_param")]
    pub exit_url_param: String,
    /// Endpoint returning `{"ua": .., "ip": ..}` for ad-tag macros.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_info_url: Option<String>,
    #[serde(default = "default_beacon_timeout_ms")]
    pub beacon_timeout_ms: u64,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        PlayerConfig {
            skip_cooldown_secs: default_skip_cooldown_secs(),
            desktop_size: default_desktop_size(),
            mobile_size: default_mobile_size(),
            fallback_exit_url: default_fallback_exit_url(),
            exit_url_param: default_exit_url_param(),
            client_info_url: None,
            beacon_timeout_ms: default_beacon_timeout_ms(),
        }
    }
}

impl PlayerConfig {
    /// `<config_dir>/signalflow-ads/config.json`, or a relative fallback when
    /// the platform has no config directory.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .map(|d| d.join(CONFIG_DIR).join(CONFIG_FILE))
            .unwrap_or_else(|| PathBuf::from(CONFIG_FILE))
    }

    /// Load config from JSON, or fall back to defaults if missing or corrupt.
    pub fn load_from(path: &Path) -> Self {
        if path.exists() {
            match fs::read_to_string(path) {
                Ok(data) => match serde_json::from_str(&data) {
                    Ok(config) => return config,
                    Err(e) => warn!(path = %path.display(), "corrupt config file, using defaults: {}", e),
                },
                Err(e) => warn!(path = %path.display(), "could not read config file: {}", e),
            }
        }
        PlayerConfig::default()
    }

    /// Persist config to JSON, creating the parent directory if needed.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|e| AdError::Config(format!("create {}: {}", parent.display(), e)))?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| AdError::Config(format!("serialize: {}", e)))?;
        fs::write(path, json).map_err(|e| AdError::Config(format!("write {}: {}", path.display(), e)))?;
        Ok(())
    }
}
