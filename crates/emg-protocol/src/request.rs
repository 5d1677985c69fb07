//! Request framing.
//!
//! Every outbound request has the same shape:
//!
//! ```text
//! POST /api/devices/battery HTTP/1.1\r\n
//! Host: lambda.proto.aalto.fi\r\n
//! Content-Type: application/json\r\n
//! Content-Length: 39\r\n
//! \r\n
//! {"deviceId":"abc123","batteryLevel":99}
//! ```
//!
//! The body is serialized first and `Content-Length` is taken from the
//! serialized bytes; the peer stalls or truncates on any mismatch.

use serde::{Serialize, Serializer};
use serde_json::value::RawValue;

use emg_core::{BatteryLevel, DeviceIdentity};

pub const HTTP_VERSION: &str = "HTTP/1.1";
pub const CONTENT_TYPE: &str = "application/json";

/// Request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Post,
    Put,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Post => "POST",
            Method::Put => "PUT",
        }
    }
}

/// The four cloud operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    RegisterDevice,
    ReportBattery,
    ReportDeactivation,
    ReportMeasurement,
}

impl Endpoint {
    pub fn method(self) -> Method {
        match self {
            Endpoint::ReportMeasurement => Method::Put,
            _ => Method::Post,
        }
    }

    pub fn path(self) -> &'static str {
        match self {
            Endpoint::RegisterDevice => "/api/devices",
            Endpoint::ReportBattery => "/api/devices/battery",
            Endpoint::ReportDeactivation => "/api/devices/turn-off",
            Endpoint::ReportMeasurement => "/api/datapoints",
        }
    }
}

// ============================================================================
// Bodies
// ============================================================================

/// `POST /api/devices`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterBody<'a> {
    pub mac_address: &'a str,
    pub ip_address: &'a str,
}

/// `POST /api/devices/battery`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatteryBody<'a> {
    pub device_id: &'a DeviceIdentity,
    pub battery_level: BatteryLevel,
}

/// `POST /api/devices/turn-off`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeactivationBody<'a> {
    pub device_id: &'a DeviceIdentity,
}

/// `PUT /api/datapoints`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MeasurementBody<'a> {
    pub device_id: &'a DeviceIdentity,
    /// Frequency in Hz, always written with three decimals (`87.500`).
    #[serde(serialize_with = "three_decimals")]
    pub value: f64,
}

/// Fixed-point text for a finite value. NaN and infinities are not JSON and
/// fail serialization.
fn three_decimals<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    let raw = RawValue::from_string(format!("{:.3}", value)).map_err(serde::ser::Error::custom)?;
    raw.serialize(serializer)
}

// ============================================================================
// Framing
// ============================================================================

/// A serialized request, ready to frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub endpoint: Endpoint,
    host: String,
    body: String,
}

impl Request {
    pub fn body(&self) -> &str {
        &self.body
    }

    /// Exact byte length of the body.
    pub fn content_length(&self) -> usize {
        self.body.len()
    }

    /// The full request text: start line, headers, blank line, body.
    pub fn to_frame(&self) -> String {
        format!(
            "{} {} {}\r\nHost: {}\r\nContent-Type: {}\r\nContent-Length: {}\r\n\r\n{}",
            self.endpoint.method().as_str(),
            self.endpoint.path(),
            HTTP_VERSION,
            self.host,
            CONTENT_TYPE,
            self.content_length(),
            self.body
        )
    }
}

/// Builds requests for one cloud host.
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    host: String,
}

impl RequestBuilder {
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into() }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Serialize `body` and wrap it for `endpoint`.
    pub fn build<B: Serialize>(
        &self,
        endpoint: Endpoint,
        body: &B,
    ) -> Result<Request, serde_json::Error> {
        Ok(Request {
            endpoint,
            host: self.host.clone(),
            body: serde_json::to_string(body)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Split a frame into its header lines and body.
    fn split_frame(frame: &str) -> (Vec<&str>, &str) {
        let (head, body) = frame.split_once("\r\n\r\n").expect("header boundary");
        (head.split("\r\n").collect(), body)
    }

    fn content_length(headers: &[&str]) -> usize {
        headers
            .iter()
            .find_map(|h| h.strip_prefix("Content-Length: "))
            .expect("Content-Length header")
            .parse()
            .unwrap()
    }

    #[test]
    fn test_battery_frame() {
        let builder = RequestBuilder::new("lambda.proto.aalto.fi");
        let id = DeviceIdentity::new("abc123");
        let request = builder
            .build(
                Endpoint::ReportBattery,
                &BatteryBody {
                    device_id: &id,
                    battery_level: BatteryLevel::from_raw(4063, 3300, 770),
                },
            )
            .unwrap();

        let frame = request.to_frame();
        let (headers, body) = split_frame(&frame);

        assert_eq!(headers[0], "POST /api/devices/battery HTTP/1.1");
        assert_eq!(headers[1], "Host: lambda.proto.aalto.fi");
        assert_eq!(headers[2], "Content-Type: application/json");
        assert_eq!(body, r#"{"deviceId":"abc123","batteryLevel":99}"#);
        assert_eq!(content_length(&headers), body.len());
    }

    #[test]
    fn test_endpoint_routes() {
        assert_eq!(Endpoint::RegisterDevice.method(), Method::Post);
        assert_eq!(Endpoint::RegisterDevice.path(), "/api/devices");
        assert_eq!(Endpoint::ReportDeactivation.path(), "/api/devices/turn-off");
        assert_eq!(Endpoint::ReportMeasurement.method(), Method::Put);
        assert_eq!(Endpoint::ReportMeasurement.path(), "/api/datapoints");
    }

    #[test]
    fn test_content_length_matches_body_bytes() {
        let builder = RequestBuilder::new("example.org");
        let ids = ["", "7", "abc123", "dévice-ü", "id with \"quotes\""];
        let values = [0.0, 1.5, 423.095, 99999.999];

        for raw_id in ids {
            let id = DeviceIdentity::new(raw_id);
            let mut requests = vec![
                builder
                    .build(Endpoint::ReportDeactivation, &DeactivationBody { device_id: &id })
                    .unwrap(),
                builder
                    .build(
                        Endpoint::ReportBattery,
                        &BatteryBody {
                            device_id: &id,
                            battery_level: BatteryLevel::FULL,
                        },
                    )
                    .unwrap(),
                builder
                    .build(
                        Endpoint::RegisterDevice,
                        &RegisterBody {
                            mac_address: raw_id,
                            ip_address: "192.168.1.20",
                        },
                    )
                    .unwrap(),
            ];
            for value in values {
                requests.push(
                    builder
                        .build(
                            Endpoint::ReportMeasurement,
                            &MeasurementBody {
                                device_id: &id,
                                value,
                            },
                        )
                        .unwrap(),
                );
            }

            for request in requests {
                let frame = request.to_frame();
                let (headers, body) = split_frame(&frame);
                assert_eq!(content_length(&headers), body.as_bytes().len(), "{}", frame);
                assert_eq!(body, request.body());
            }
        }
    }

    #[test]
    fn test_numeric_identity_is_unquoted() {
        let builder = RequestBuilder::new("example.org");
        let id = DeviceIdentity::new("42");
        let request = builder
            .build(
                Endpoint::ReportMeasurement,
                &MeasurementBody {
                    device_id: &id,
                    value: 12.25,
                },
            )
            .unwrap();
        assert_eq!(request.body(), r#"{"deviceId":42,"value":12.250}"#);
    }

    #[test]
    fn test_measurement_value_has_three_decimals() {
        let builder = RequestBuilder::new("example.org");
        let id = DeviceIdentity::new("abc123");
        let body = |value: f64| {
            builder
                .build(
                    Endpoint::ReportMeasurement,
                    &MeasurementBody {
                        device_id: &id,
                        value,
                    },
                )
                .map(|request| request.body().to_string())
        };

        assert_eq!(body(87.5).unwrap(), r#"{"deviceId":"abc123","value":87.500}"#);
        assert_eq!(body(0.0).unwrap(), r#"{"deviceId":"abc123","value":0.000}"#);
        assert_eq!(body(423.095).unwrap(), r#"{"deviceId":"abc123","value":423.095}"#);
        assert!(body(f64::NAN).is_err());
    }
}
