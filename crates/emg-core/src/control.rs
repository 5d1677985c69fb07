//! Local control endpoint logic (framework-agnostic).
//!
//! The inbound HTTP server runs in its own task on both platforms (axum on
//! Linux, esp-idf httpd on ESP32). Those wrappers only translate their
//! request/response types; routing and acknowledgement text live here.
//!
//! The only state shared with the lifecycle is the [`MeasureTrigger`] flag.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{info, warn};

/// Path that starts a measurement.
pub const MEASURE_PATH: &str = "/measure";

pub const STARTED_BODY: &str = "Request received! Measurement started!";
pub const ALREADY_RUNNING_BODY: &str = "Request received! Measurement already running!";
pub const NOT_FOUND_BODY: &str = "Request not found!";

/// Result of asking for a measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerAck {
    /// A new measurement will run on the next poll cycle.
    Started,
    /// One is already pending or running; nothing new was queued.
    AlreadyRunning,
}

/// At-most-one measurement request flag.
///
/// Set by the control endpoint, cleared by the lifecycle once the result has
/// been reported. Cloning shares the same flag.
#[derive(Debug, Clone, Default)]
pub struct MeasureTrigger {
    pending: Arc<AtomicBool>,
}

impl MeasureTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a measurement.
    pub fn request(&self) -> TriggerAck {
        match self
            .pending
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => TriggerAck::Started,
            Err(_) => TriggerAck::AlreadyRunning,
        }
    }

    /// Whether a measurement is requested or in progress.
    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    /// Mark the current measurement as finished.
    pub fn complete(&self) {
        self.pending.store(false, Ordering::Release);
    }
}

/// A plain-text response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlResponse {
    pub status: u16,
    pub body: &'static str,
}

impl ControlResponse {
    pub const CONTENT_TYPE: &'static str = "text/plain";
}

/// Routes control requests.
#[derive(Debug, Clone)]
pub struct ControlEndpoint {
    trigger: MeasureTrigger,
}

impl ControlEndpoint {
    pub fn new(trigger: MeasureTrigger) -> Self {
        Self { trigger }
    }

    /// Handle `GET /measure`.
    pub fn measure(&self) -> ControlResponse {
        match self.trigger.request() {
            TriggerAck::Started => {
                info!("Measurement started!");
                ControlResponse {
                    status: 200,
                    body: STARTED_BODY,
                }
            }
            TriggerAck::AlreadyRunning => {
                info!("Measurement already running!");
                ControlResponse {
                    status: 200,
                    body: ALREADY_RUNNING_BODY,
                }
            }
        }
    }

    /// Handle any request that is not `GET /measure`.
    pub fn not_found(&self, path: &str) -> ControlResponse {
        warn!("Wrong request: {}", path);
        ControlResponse {
            status: 404,
            body: NOT_FOUND_BODY,
        }
    }

    /// Dispatch a request by method and path.
    ///
    /// Query strings are ignored.
    pub fn handle(&self, method: &str, path: &str) -> ControlResponse {
        let route = path.split('?').next().unwrap_or(path);
        if method.eq_ignore_ascii_case("GET") && route == MEASURE_PATH {
            self.measure()
        } else {
            self.not_found(path)
        }
    }
}
