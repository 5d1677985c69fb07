//! Cloud reporting.
//!
//! Each operation is one connection: connect, send the framed request, scan
//! the response, close. Reports are best-effort with no retry and no backoff;
//! a failed report is returned to the caller, which logs it and moves on.

use thiserror::Error;
use tracing::{info, warn};

use emg_core::config::CloudConfig;
use emg_core::{BatteryLevel, DeviceIdentity, SpectralResult};

use crate::request::{
    BatteryBody, DeactivationBody, Endpoint, MeasurementBody, RegisterBody, Request,
    RequestBuilder,
};
use crate::scanner::{ResponseScanner, ScannedResponse};
use crate::transport::{TransportChannel, TransportError};

/// Errors that abort a single report.
#[derive(Debug, Error)]
pub enum ReportError {
    /// Connect, send or receive failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The request body could not be serialized.
    #[error("Failed to serialize request body: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Performs the four cloud operations over a transport.
pub struct TelemetryReporter<T> {
    transport: T,
    builder: RequestBuilder,
    port: u16,
    identity_prefix_len: usize,
}

impl<T: TransportChannel> TelemetryReporter<T> {
    pub fn new(transport: T, cloud: &CloudConfig, identity_prefix_len: usize) -> Self {
        Self {
            transport,
            builder: RequestBuilder::new(cloud.host.clone()),
            port: cloud.port,
            identity_prefix_len,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Register the node and return the identity assigned by the service.
    ///
    /// A response that does not have the expected shape yields an empty or
    /// partial identity, not an error.
    pub fn register(
        &mut self,
        mac_address: &str,
        ip_address: &str,
    ) -> Result<DeviceIdentity, ReportError> {
        let request = self.builder.build(
            Endpoint::RegisterDevice,
            &RegisterBody {
                mac_address,
                ip_address,
            },
        )?;
        let response = self.exchange(
            &request,
            ResponseScanner::with_field(self.identity_prefix_len),
        )?;

        let identity = response.field.unwrap_or_default();
        if identity.is_empty() {
            warn!("No device id found in registration response");
        } else {
            info!("Registered with device id {}", identity);
        }
        Ok(identity)
    }

    /// Report the current battery level.
    pub fn report_battery(
        &mut self,
        device_id: &DeviceIdentity,
        battery_level: BatteryLevel,
    ) -> Result<(), ReportError> {
        let request = self.builder.build(
            Endpoint::ReportBattery,
            &BatteryBody {
                device_id,
                battery_level,
            },
        )?;
        self.exchange(&request, ResponseScanner::new())?;
        Ok(())
    }

    /// Tell the service the node is going to sleep.
    pub fn report_deactivation(&mut self, device_id: &DeviceIdentity) -> Result<(), ReportError> {
        let request = self
            .builder
            .build(Endpoint::ReportDeactivation, &DeactivationBody { device_id })?;
        self.exchange(&request, ResponseScanner::new())?;
        Ok(())
    }

    /// Upload a measurement result, rounded to three decimals.
    pub fn report_measurement(
        &mut self,
        device_id: &DeviceIdentity,
        result: SpectralResult,
    ) -> Result<(), ReportError> {
        let request = self.builder.build(
            Endpoint::ReportMeasurement,
            &MeasurementBody {
                device_id,
                value: result.rounded(),
            },
        )?;
        self.exchange(&request, ResponseScanner::new())?;
        Ok(())
    }

    /// One connection: connect, send, scan, close.
    fn exchange(
        &mut self,
        request: &Request,
        scanner: ResponseScanner,
    ) -> Result<ScannedResponse, ReportError> {
        let host = self.builder.host();
        info!("Connecting to {}...", host);
        self.transport.connect(host, self.port)?;
        info!(
            "Connection succeeded, {} {}",
            request.endpoint.method().as_str(),
            request.endpoint.path()
        );

        let result = self
            .transport
            .send(request.to_frame().as_bytes())
            .and_then(|()| scanner.scan(&mut self.transport));
        self.transport.close();

        Ok(result?)
    }
}
