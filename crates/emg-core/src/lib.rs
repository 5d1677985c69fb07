//! # emg-core
//!
//! Core data model and signal processing for the EMG telemetry node.
//!
//! This crate provides:
//! - Data model types (DeviceIdentity, BatteryLevel, LifecycleState, StatusIndicators)
//! - Node configuration with the stock device defaults
//! - Hardware traits the platform crates implement (Board, Clock, Network)
//! - Fixed-rate acquisition and spectral analysis
//! - Control endpoint logic (without I/O)
//!
//! This crate is intentionally runtime-agnostic and contains no async code,
//! making it usable on both Linux (tokio) and ESP32 (esp-idf) targets.

pub mod config;
pub mod control;
pub mod hal;
pub mod model;
pub mod spectral;

pub use config::{ConfigError, NodeConfig};
pub use control::{ControlEndpoint, ControlResponse, MeasureTrigger, TriggerAck};
pub use hal::{Board, Clock, Network};
pub use model::*;
pub use spectral::{SampleBuffer, SpectralAnalyzer, SpectralResult};
