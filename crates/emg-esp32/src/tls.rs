//! TLS transport over ESP-TLS.
//!
//! Server certificates are checked against the ESP-IDF certificate bundle.
//! ESP-TLS applies `timeout_ms` to the socket as well, so a stalled read
//! fails after the timeout. A timeout is reported as end of stream; any
//! other read error is a TLS failure.

use std::io;

use esp_idf_svc::tls::{Config, EspTls, InternalSocket};
use log::{debug, warn};

use emg_protocol::{is_tls_read_timeout, TransportChannel, TransportError};

const READ_CHUNK: usize = 512;

pub struct EspTlsTransport {
    timeout_ms: u32,
    tls: Option<EspTls<InternalSocket>>,
    buf: [u8; READ_CHUNK],
    start: usize,
    end: usize,
}

impl EspTlsTransport {
    pub fn new(timeout_ms: u32) -> Self {
        Self {
            timeout_ms,
            tls: None,
            buf: [0; READ_CHUNK],
            start: 0,
            end: 0,
        }
    }

    /// Make sure buffered bytes are available. `false` at end of stream.
    fn fill(&mut self) -> Result<bool, TransportError> {
        if self.start < self.end {
            return Ok(true);
        }
        let tls = self.tls.as_mut().ok_or(TransportError::NotConnected)?;
        match tls.read(&mut self.buf) {
            Ok(0) => Ok(false),
            Ok(n) => {
                self.start = 0;
                self.end = n;
                Ok(true)
            }
            Err(e) if is_tls_read_timeout(e.code()) => {
                debug!("TLS read timed out: {}", e);
                Ok(false)
            }
            Err(e) => {
                warn!("TLS read failed: {}", e);
                Err(TransportError::Tls(e.to_string()))
            }
        }
    }

    fn next_byte(&mut self) -> Result<Option<u8>, TransportError> {
        if !self.fill()? {
            return Ok(None);
        }
        let byte = self.buf[self.start];
        self.start += 1;
        Ok(Some(byte))
    }
}

impl TransportChannel for EspTlsTransport {
    fn connect(&mut self, host: &str, port: u16) -> Result<(), TransportError> {
        self.close();

        let connect_err = |e: esp_idf_svc::sys::EspError| TransportError::Connect {
            host: host.to_string(),
            port,
            source: io::Error::new(io::ErrorKind::Other, e),
        };

        let mut tls = EspTls::new().map_err(connect_err)?;
        let config = Config {
            common_name: Some(host),
            timeout_ms: self.timeout_ms,
            use_crt_bundle_attach: true,
            ..Default::default()
        };
        tls.connect(host, port, &config).map_err(connect_err)?;

        debug!("TLS connected to {}:{}", host, port);
        self.tls = Some(tls);
        Ok(())
    }

    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let tls = self.tls.as_mut().ok_or(TransportError::NotConnected)?;
        tls.write_all(bytes)
            .map_err(|e| TransportError::Tls(e.to_string()))
    }

    fn read_line(&mut self) -> Result<Option<String>, TransportError> {
        let mut raw = Vec::new();
        while let Some(byte) = self.next_byte()? {
            if byte == b'\n' {
                return Ok(Some(String::from_utf8_lossy(&raw).into_owned()));
            }
            raw.push(byte);
        }
        if raw.is_empty() {
            Ok(None)
        } else {
            Ok(Some(String::from_utf8_lossy(&raw).into_owned()))
        }
    }

    fn read_byte_available(&mut self) -> Result<Option<u8>, TransportError> {
        self.next_byte()
    }

    fn close(&mut self) {
        if self.tls.take().is_some() {
            debug!("TLS connection closed");
        }
        self.start = 0;
        self.end = 0;
    }
}
