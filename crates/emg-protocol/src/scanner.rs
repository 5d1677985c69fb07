//! Incremental response scanning.
//!
//! Responses are read line by line until a line holding only `\r` (the
//! header/body boundary), then byte by byte until the stream runs dry.
//! Nothing in the headers is interpreted; the status line is only logged.
//!
//! # Registration id extraction
//!
//! The registration endpoint returns the new device id inside a JSON body.
//! Rather than parse JSON, [`FieldExtractor`] relies on the fixed shape of
//! that one response:
//!
//! 1. skip a fixed number of leading body bytes,
//! 2. wait for the first `:` after them,
//! 3. capture everything up to the next `,`.
//!
//! This is brittle on purpose and must not be reused for other responses. A
//! `:` inside the skipped prefix is ignored, a `:` inside the captured value
//! is kept, and a reordered or reformatted response yields a wrong id.

use emg_core::DeviceIdentity;
use tracing::{debug, warn};

use crate::transport::{TransportChannel, TransportError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    SkipPrefix,
    SeekColon,
    Capture,
    Done,
}

/// Streaming "find key, skip to value, read until terminator" tokenizer.
#[derive(Debug, Clone)]
pub struct FieldExtractor {
    phase: Phase,
    prefix_len: usize,
    skipped: usize,
    value: Vec<u8>,
}

impl FieldExtractor {
    pub fn new(prefix_len: usize) -> Self {
        Self {
            phase: if prefix_len == 0 {
                Phase::SeekColon
            } else {
                Phase::SkipPrefix
            },
            prefix_len,
            skipped: 0,
            value: Vec::new(),
        }
    }

    /// Feed the next body byte.
    pub fn feed(&mut self, byte: u8) {
        match self.phase {
            Phase::SkipPrefix => {
                self.skipped += 1;
                if self.skipped >= self.prefix_len {
                    self.phase = Phase::SeekColon;
                }
            }
            Phase::SeekColon => {
                if byte == b':' {
                    self.phase = Phase::Capture;
                }
            }
            Phase::Capture => {
                if byte == b',' {
                    self.phase = Phase::Done;
                } else {
                    self.value.push(byte);
                }
            }
            Phase::Done => {}
        }
    }

    /// Whether the terminating comma has been seen.
    pub fn is_complete(&self) -> bool {
        self.phase == Phase::Done
    }

    /// The captured token, trimmed of whitespace and surrounding quotes.
    ///
    /// Partial if the body ended before the terminator, empty if no colon
    /// was found. A token that was quoted keeps that fact, so it is sent
    /// back as a string.
    pub fn finish(self) -> DeviceIdentity {
        let raw = String::from_utf8_lossy(&self.value);
        let token = raw.trim();
        let quoted = token.starts_with('"') || token.ends_with('"');
        let id = token.trim_matches('"').trim().to_string();
        if quoted {
            DeviceIdentity::quoted(id)
        } else {
            DeviceIdentity::new(id)
        }
    }
}

/// What was read from one response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScannedResponse {
    /// First line of the response, without line terminators.
    pub status_line: Option<String>,
    /// Whether the header/body boundary was seen.
    pub headers_complete: bool,
    /// Body bytes, lossily decoded.
    pub body: String,
    /// Extracted field, when scanning with an extractor.
    pub field: Option<DeviceIdentity>,
}

/// Reads one response off a transport.
#[derive(Debug, Clone, Default)]
pub struct ResponseScanner {
    extractor: Option<FieldExtractor>,
}

impl ResponseScanner {
    /// Scan headers and body only.
    pub fn new() -> Self {
        Self::default()
    }

    /// Also extract the registration id from the body.
    pub fn with_field(prefix_len: usize) -> Self {
        Self {
            extractor: Some(FieldExtractor::new(prefix_len)),
        }
    }

    /// Consume the response.
    ///
    /// A missing boundary or field is not an error: the result simply has
    /// `headers_complete == false` and an empty or partial field.
    pub fn scan<T: TransportChannel + ?Sized>(
        mut self,
        transport: &mut T,
    ) -> Result<ScannedResponse, TransportError> {
        let mut response = ScannedResponse::default();

        while let Some(line) = transport.read_line()? {
            if line == "\r" {
                response.headers_complete = true;
                break;
            }
            if response.status_line.is_none() {
                response.status_line = Some(line.trim_end().to_string());
            }
        }
        if response.headers_complete {
            debug!("headers received");
        } else {
            warn!("Response ended before the header boundary");
        }

        let mut body = Vec::new();
        while let Some(byte) = transport.read_byte_available()? {
            body.push(byte);
            if let Some(extractor) = self.extractor.as_mut() {
                extractor.feed(byte);
            }
        }
        response.body = String::from_utf8_lossy(&body).into_owned();
        response.field = self.extractor.map(FieldExtractor::finish);

        debug!(
            "Response {:?}: {}",
            response.status_line.as_deref().unwrap_or(""),
            response.body
        );
        Ok(response)
    }
}
