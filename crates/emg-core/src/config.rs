//! Node configuration.
//!
//! Every section deserializes with defaults, so a partial JSON document only
//! needs the values that differ from the stock firmware:
//!
//! ```json
//! { "cloud": { "host": "127.0.0.1", "port": 8443 }, "sampling": { "samples": 4096 } }
//! ```
//!
//! Linux loads this from a file; ESP32 uses the defaults compiled in.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The document is not valid JSON for this schema.
    #[error("Invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),

    /// A value is outside the range the node can operate with.
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue {
        field: &'static str,
        reason: &'static str,
    },
}

/// Complete node configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NodeConfig {
    pub cloud: CloudConfig,
    pub sampling: SamplingConfig,
    pub battery: BatteryCalibration,
    pub timing: TimingConfig,

    /// Sensor reading above which the signal LED turns green.
    pub signal_threshold: u16,

    /// MAC address sent on registration. Empty means "ask the network interface".
    pub mac_address: String,

    /// Bytes of the registration response body skipped before looking for the id.
    pub identity_prefix_len: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            cloud: CloudConfig::default(),
            sampling: SamplingConfig::default(),
            battery: BatteryCalibration::default(),
            timing: TimingConfig::default(),
            signal_threshold: 2000,
            mac_address: "00-B0-D0-63-C2-52".to_string(),
            identity_prefix_len: 12,
        }
    }
}

/// Longest accepted power-button hold, one hour.
pub const MAX_BUTTON_HOLD_MS: u64 = 3_600_000;

impl NodeConfig {
    /// Parse and validate a JSON document.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: NodeConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the node cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fs = self.sampling.frequency_hz;
        if !(fs > 0.0 && fs <= 1_000_000.0) {
            return Err(ConfigError::InvalidValue {
                field: "sampling.frequencyHz",
                reason: "must be in (0, 1000000]",
            });
        }
        if self.sampling.samples < 4 {
            return Err(ConfigError::InvalidValue {
                field: "sampling.samples",
                reason: "must be at least 4",
            });
        }
        if self.battery.raw_span == 0 {
            return Err(ConfigError::InvalidValue {
                field: "battery.rawSpan",
                reason: "must be non-zero",
            });
        }
        if self.timing.button_hold_ms == 0 || self.timing.button_hold_ms > MAX_BUTTON_HOLD_MS {
            return Err(ConfigError::InvalidValue {
                field: "timing.buttonHoldMs",
                reason: "must be in (0, 3600000]",
            });
        }
        if self.cloud.host.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "cloud.host",
                reason: "must not be empty",
            });
        }
        Ok(())
    }
}

// ============================================================================
// Sections
// ============================================================================

/// Remote service endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CloudConfig {
    /// Host name, also sent as the `Host` header.
    pub host: String,

    pub port: u16,

    /// Reads that stall longer than this end the response.
    pub read_timeout_ms: u64,
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            host: "lambda.proto.aalto.fi".to_string(),
            port: 443,
            read_timeout_ms: 2000,
        }
    }
}

/// Acquisition parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SamplingConfig {
    pub frequency_hz: f64,

    /// Buffer length N.
    pub samples: usize,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            frequency_hz: 2000.0,
            samples: 8192,
        }
    }
}

impl SamplingConfig {
    /// Inter-sample interval in whole microseconds.
    pub fn interval_micros(&self) -> u64 {
        (1_000_000.0 / self.frequency_hz) as u64
    }
}

/// Linear battery calibration: `raw_empty` reads 0%, `raw_empty + raw_span` reads 100%.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BatteryCalibration {
    pub raw_empty: u16,
    pub raw_span: u16,
}

impl Default for BatteryCalibration {
    fn default() -> Self {
        Self {
            raw_empty: 3300,
            raw_span: 770,
        }
    }
}

/// Lifecycle timing, all in milliseconds unless stated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TimingConfig {
    /// Continuous button assertion required before going to sleep.
    pub button_hold_ms: u64,

    /// Blink period while associating.
    pub connect_blink_ms: u32,

    /// Failed association checks before the association is started over.
    pub reassociate_after: u32,

    /// Pause between association and registration.
    pub registration_delay_ms: u32,

    /// Pause between registration and the first battery report.
    pub battery_report_delay_ms: u32,

    /// Pause between poll cycles.
    pub poll_interval_ms: u32,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            button_hold_ms: 5000,
            connect_blink_ms: 500,
            reassociate_after: 25,
            registration_delay_ms: 5000,
            battery_report_delay_ms: 5000,
            poll_interval_ms: 1,
        }
    }
}
