//! # emg-node
//!
//! Device lifecycle for the EMG telemetry node.
//!
//! [`DeviceLifecycle`] owns the board, the network, the reporter and the
//! analyzer, and drives them from one blocking poll loop. It is generic over
//! the hardware traits in `emg-core` and the transport in `emg-protocol`, so
//! the same state machine runs on the ESP32 and in the Linux simulator.

pub mod lifecycle;

pub use lifecycle::{DeviceContext, DeviceLifecycle, PollOutcome};
