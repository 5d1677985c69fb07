//! ESP32-specific components for the EMG node.
//!
//! This crate provides the platform side of the traits in `emg-core` and
//! `emg-protocol`:
//! - WiFi station management ([`wifi::EspNetwork`])
//! - TLS transport with the ESP-IDF certificate bundle ([`tls::EspTlsTransport`])
//! - ADC inputs, status LEDs, buzzer and deep sleep ([`board::EspBoard`])
//! - The local control server ([`http::start_control_server`])
//!
//! # Example
//!
//! ```ignore
//! use emg_esp32::{board::EspBoard, config::WifiConfig, wifi::EspNetwork};
//!
//! let network = EspNetwork::new(peripherals.modem, sysloop, Some(nvs), &WifiConfig::from_build_env())?;
//! let board = EspBoard::new(pins, peripherals.adc1, peripherals.ledc)?;
//! ```

pub mod board;
pub mod config;
pub mod http;
pub mod tls;
pub mod wifi;
