//! Build-time WiFi configuration.
//!
//! Credentials are baked in at compile time:
//!
//! ```text
//! EMG_WIFI_SSID="lab network" EMG_WIFI_PASSWORD=secret cargo build --release
//! ```
//!
//! The node configuration itself uses `NodeConfig::default()` on the device.

use serde::{Deserialize, Serialize};

/// Network the station joins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WifiConfig {
    /// WiFi network SSID.
    pub ssid: String,

    /// WiFi network password (empty for open networks).
    pub password: String,
}

impl Default for WifiConfig {
    fn default() -> Self {
        Self {
            ssid: "aalto open".to_string(),
            password: String::new(),
        }
    }
}

impl WifiConfig {
    /// Read `EMG_WIFI_SSID` / `EMG_WIFI_PASSWORD` captured at build time.
    pub fn from_build_env() -> Self {
        let defaults = Self::default();
        Self {
            ssid: option_env!("EMG_WIFI_SSID")
                .map(str::to_string)
                .unwrap_or(defaults.ssid),
            password: option_env!("EMG_WIFI_PASSWORD")
                .map(str::to_string)
                .unwrap_or(defaults.password),
        }
    }

    pub fn is_open(&self) -> bool {
        self.password.is_empty()
    }
}
