//! Byte-stream transport.
//!
//! The reporter talks to the cloud over a connection-oriented stream and
//! finds message boundaries itself. Implementations:
//! - `TcpTransport` (here): plain TCP, used by the Linux simulator and tests
//! - `EspTlsTransport` (`emg-esp32`): ESP-IDF TLS with the certificate bundle
//!
//! Connect failures are reported, never retried here.

use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

/// Errors raised by a transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Could not open the connection.
    #[error("Connection to {host}:{port} failed: {source}")]
    Connect {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },

    /// Send or receive on a channel that is not open.
    #[error("Channel is not connected")]
    NotConnected,

    /// Read or write failed mid-stream.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The TLS stack rejected the operation.
    #[error("TLS error: {0}")]
    Tls(String),
}

/// A connection-oriented byte stream.
pub trait TransportChannel {
    /// Open a connection. Any previous connection is dropped first.
    fn connect(&mut self, host: &str, port: u16) -> Result<(), TransportError>;

    /// Write all bytes.
    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Next line with the `\n` removed and any `\r` kept.
    ///
    /// `None` once the stream has ended (or stalled past the read timeout).
    fn read_line(&mut self) -> Result<Option<String>, TransportError>;

    /// Next byte, or `None` when nothing more is available.
    fn read_byte_available(&mut self) -> Result<Option<u8>, TransportError>;

    /// Close the connection. Safe to call when not connected.
    fn close(&mut self);
}

impl<T: TransportChannel + ?Sized> TransportChannel for Box<T> {
    fn connect(&mut self, host: &str, port: u16) -> Result<(), TransportError> {
        (**self).connect(host, port)
    }

    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        (**self).send(bytes)
    }

    fn read_line(&mut self) -> Result<Option<String>, TransportError> {
        (**self).read_line()
    }

    fn read_byte_available(&mut self) -> Result<Option<u8>, TransportError> {
        (**self).read_byte_available()
    }

    fn close(&mut self) {
        (**self).close()
    }
}

/// Whether an I/O error is a read timeout rather than a failure.
pub(crate) fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

/// mbedTLS: no data before the socket receive timeout.
pub const TLS_ERR_WANT_READ: i32 = -0x6900;
/// mbedTLS: the read timer expired.
pub const TLS_ERR_TIMEOUT: i32 = -0x6800;
/// ESP-IDF `ESP_ERR_TIMEOUT`.
pub const ESP_ERR_TIMEOUT: i32 = 0x107;

/// Whether a TLS read error code is a timeout rather than a failure.
///
/// A timeout ends the response like a closed stream; any other code is a
/// broken connection and must surface as [`TransportError::Tls`].
pub fn is_tls_read_timeout(code: i32) -> bool {
    matches!(code, TLS_ERR_WANT_READ | TLS_ERR_TIMEOUT | ESP_ERR_TIMEOUT)
}

/// Split a raw line off its `\n` terminator.
pub(crate) fn line_from_bytes(mut raw: Vec<u8>) -> String {
    if raw.last() == Some(&b'\n') {
        raw.pop();
    }
    String::from_utf8_lossy(&raw).into_owned()
}

/// Plain TCP transport.
///
/// A read that stalls past `read_timeout` is treated as end of stream, which
/// is how a keep-alive response without framing is terminated.
#[derive(Debug)]
pub struct TcpTransport {
    connect_timeout: Duration,
    read_timeout: Duration,
    stream: Option<BufReader<TcpStream>>,
}

impl TcpTransport {
    pub fn new(connect_timeout: Duration, read_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            read_timeout,
            stream: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn reader(&mut self) -> Result<&mut BufReader<TcpStream>, TransportError> {
        self.stream.as_mut().ok_or(TransportError::NotConnected)
    }

    fn open(&self, host: &str, port: u16) -> io::Result<TcpStream> {
        let mut last_err = io::Error::new(io::ErrorKind::NotFound, "no address resolved");
        for addr in (host, port).to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, self.connect_timeout) {
                Ok(stream) => {
                    stream.set_read_timeout(Some(self.read_timeout))?;
                    stream.set_nodelay(true)?;
                    return Ok(stream);
                }
                Err(e) => last_err = e,
            }
        }
        Err(last_err)
    }
}

impl TransportChannel for TcpTransport {
    fn connect(&mut self, host: &str, port: u16) -> Result<(), TransportError> {
        self.close();
        let stream = self.open(host, port).map_err(|source| TransportError::Connect {
            host: host.to_string(),
            port,
            source,
        })?;
        debug!("TCP connected to {}:{}", host, port);
        self.stream = Some(BufReader::new(stream));
        Ok(())
    }

    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let stream = self.reader()?.get_mut();
        stream.write_all(bytes)?;
        stream.flush()?;
        Ok(())
    }

    fn read_line(&mut self) -> Result<Option<String>, TransportError> {
        let reader = self.reader()?;
        let mut raw = Vec::new();
        match reader.read_until(b'\n', &mut raw) {
            Ok(0) => Ok(None),
            Ok(_) => Ok(Some(line_from_bytes(raw))),
            Err(e) if is_timeout(&e) => {
                if raw.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(line_from_bytes(raw)))
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    fn read_byte_available(&mut self) -> Result<Option<u8>, TransportError> {
        let reader = self.reader()?;
        let mut byte = [0u8; 1];
        match reader.read(&mut byte) {
            Ok(0) => Ok(None),
            Ok(_) => Ok(Some(byte[0])),
            Err(e) if is_timeout(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn close(&mut self) {
        if let Some(reader) = self.stream.take() {
            let _ = reader.get_ref().shutdown(Shutdown::Both);
            debug!("TCP connection closed");
        }
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    fn transport() -> TcpTransport {
        TcpTransport::new(Duration::from_secs(1), Duration::from_millis(200))
    }

    #[test]
    fn test_tls_timeout_codes() {
        assert!(is_tls_read_timeout(-0x6900));
        assert!(is_tls_read_timeout(-0x6800));
        assert!(is_tls_read_timeout(0x107));

        // Bad record MAC, fatal alert, reset connection.
        assert!(!is_tls_read_timeout(-0x7180));
        assert!(!is_tls_read_timeout(-0x7780));
        assert!(!is_tls_read_timeout(-0x0050));
        assert!(!is_tls_read_timeout(0));
    }

    #[test]
    fn test_not_connected() {
        let mut t = transport();
        assert!(matches!(t.send(b"x"), Err(TransportError::NotConnected)));
        assert!(matches!(t.read_line(), Err(TransportError::NotConnected)));
        t.close();
    }

    #[test]
    fn test_connect_refused_is_reported() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = transport().connect("127.0.0.1", port).unwrap_err();
        match err {
            TransportError::Connect { host, port: p, .. } => {
                assert_eq!(host, "127.0.0.1");
                assert_eq!(p, port);
            }
            other => panic!("Expected Connect error, got {:?}", other),
        }
    }

    #[test]
    fn test_lines_keep_carriage_return() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            stream.write_all(b"HTTP/1.1 200 OK\r\n\r\nok").unwrap();
        });

        let mut t = transport();
        t.connect("127.0.0.1", port).unwrap();
        server.join().unwrap();

        assert_eq!(t.read_line().unwrap().as_deref(), Some("HTTP/1.1 200 OK\r"));
        assert_eq!(t.read_line().unwrap().as_deref(), Some("\r"));
        assert_eq!(t.read_byte_available().unwrap(), Some(b'o'));
        assert_eq!(t.read_byte_available().unwrap(), Some(b'k'));
        assert_eq!(t.read_byte_available().unwrap(), None);
        t.close();
        assert!(!t.is_connected());
    }

    #[test]
    fn test_stalled_peer_ends_stream() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let (done_tx, done_rx) = std::sync::mpsc::channel::<()>();
        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            stream.write_all(b"partial").unwrap();
            // Hold the connection open without sending more.
            let _ = done_rx.recv();
        });

        let mut t = transport();
        t.connect("127.0.0.1", port).unwrap();
        assert_eq!(t.read_line().unwrap().as_deref(), Some("partial"));
        assert_eq!(t.read_line().unwrap(), None);
        assert_eq!(t.read_byte_available().unwrap(), None);

        done_tx.send(()).unwrap();
        server.join().unwrap();
    }
}
