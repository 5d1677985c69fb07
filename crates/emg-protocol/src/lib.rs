//! # emg-protocol
//!
//! Outbound protocol layer for the EMG node.
//!
//! This crate defines:
//! - The byte-stream transport contract ([`TransportChannel`]) and a plain TCP implementation
//! - Request framing with an exact `Content-Length` ([`RequestBuilder`])
//! - Incremental response scanning and the registration id extractor ([`ResponseScanner`])
//! - The four cloud operations ([`TelemetryReporter`])
//!
//! It is deliberately not an HTTP client: no redirects, no chunked
//! transfer, no header parsing beyond finding where the body starts.

pub mod reporter;
pub mod request;
pub mod scanner;
pub mod transport;

pub use reporter::{ReportError, TelemetryReporter};
pub use request::{Endpoint, Method, Request, RequestBuilder};
pub use scanner::{FieldExtractor, ResponseScanner, ScannedResponse};
pub use transport::{is_tls_read_timeout, TcpTransport, TransportChannel, TransportError};
