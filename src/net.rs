//! Byte-oriented transport: TCP or local-domain socket, optional TLS
//! upgrade, read/write timeouts, byte counters.

use std::fmt;
use std::io::{BufReader, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::time::Duration;

use crate::error::{Error, Result};

/// Composed transport target, shown to users through `scheme()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scheme {
    Tcp { host: String, port: u16 },
    Unix { path: String },
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scheme::Tcp { host, port } => write!(f, "tcp://{host}:{port}"),
            Scheme::Unix { path } => write!(f, "unix://{path}"),
        }
    }
}

/// Transport-level options, settable before `connect`.
#[derive(Debug, Clone)]
pub struct NetOptions {
    pub connect_timeout: Option<Duration>,
    pub read_timeout: Option<Duration>,
    pub write_timeout: Option<Duration>,
    /// Initial capacity of the command serialization buffer.
    pub cmd_buffer_size: usize,
    /// Capacity of the buffered reader wrapping the socket.
    pub read_buffer_size: usize,
    pub ssl_key: Option<String>,
    pub ssl_cert: Option<String>,
    pub ssl_ca: Option<String>,
    pub ssl_capath: Option<String>,
    pub ssl_cipher: Option<String>,
    pub ssl_verify_server_cert: bool,
}

impl Default for NetOptions {
    fn default() -> Self {
        Self {
            connect_timeout: None,
            read_timeout: None,
            write_timeout: None,
            cmd_buffer_size: 4 * 1024,
            read_buffer_size: 32 * 1024,
            ssl_key: None,
            ssl_cert: None,
            ssl_ca: None,
            ssl_capath: None,
            ssl_cipher: None,
            ssl_verify_server_cert: false,
        }
    }
}

impl NetOptions {
    pub fn has_ssl_material(&self) -> bool {
        self.ssl_key.is_some()
            || self.ssl_cert.is_some()
            || self.ssl_ca.is_some()
            || self.ssl_capath.is_some()
            || self.ssl_cipher.is_some()
    }
}

enum Stream {
    Tcp(BufReader<TcpStream>),
    Unix(BufReader<UnixStream>),
    #[cfg(feature = "tls")]
    Tls(BufReader<native_tls::TlsStream<TcpStream>>),
}

/// The connection's owned transport.
pub struct Net {
    stream: Option<Stream>,
    pub options: NetOptions,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

impl Net {
    pub fn new(options: NetOptions) -> Self {
        Self {
            stream: None,
            options,
            bytes_sent: 0,
            bytes_received: 0,
        }
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    /// Dial the target. Failure is reported as `Error::Connection` carrying
    /// the OS error string so callers can surface errno-level detail.
    pub fn connect(&mut self, scheme: &Scheme) -> Result<()> {
        let read_buffer_size = self.options.read_buffer_size;
        let stream = match scheme {
            Scheme::Tcp { host, port } => {
                let stream = self
                    .dial_tcp(host, *port)
                    .map_err(|e| Error::Connection(e.to_string()))?;
                stream.set_nodelay(true).map_err(Error::Io)?;
                stream
                    .set_read_timeout(self.options.read_timeout)
                    .map_err(Error::Io)?;
                stream
                    .set_write_timeout(self.options.write_timeout)
                    .map_err(Error::Io)?;
                Stream::Tcp(BufReader::with_capacity(read_buffer_size, stream))
            }
            Scheme::Unix { path } => {
                let stream =
                    UnixStream::connect(path).map_err(|e| Error::Connection(e.to_string()))?;
                stream
                    .set_read_timeout(self.options.read_timeout)
                    .map_err(Error::Io)?;
                stream
                    .set_write_timeout(self.options.write_timeout)
                    .map_err(Error::Io)?;
                Stream::Unix(BufReader::with_capacity(read_buffer_size, stream))
            }
        };
        self.stream = Some(stream);
        Ok(())
    }

    fn dial_tcp(&self, host: &str, port: u16) -> std::io::Result<TcpStream> {
        match self.options.connect_timeout {
            None => TcpStream::connect((host, port)),
            Some(timeout) => {
                let mut last_err = None;
                for addr in (host, port).to_socket_addrs()? {
                    match TcpStream::connect_timeout(&addr, timeout) {
                        Ok(stream) => return Ok(stream),
                        Err(e) => last_err = Some(e),
                    }
                }
                Err(last_err.unwrap_or_else(|| {
                    std::io::Error::new(std::io::ErrorKind::InvalidInput, "no addresses resolved")
                }))
            }
        }
    }

    pub fn close(&mut self) {
        self.stream = None;
    }

    pub fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        match self.stream.as_mut() {
            None => Err(Error::ServerGone),
            Some(Stream::Tcp(r)) => r.read_exact(buf).map_err(Error::Io),
            Some(Stream::Unix(r)) => r.read_exact(buf).map_err(Error::Io),
            #[cfg(feature = "tls")]
            Some(Stream::Tls(r)) => r.read_exact(buf).map_err(Error::Io),
        }?;
        self.bytes_received += buf.len() as u64;
        Ok(())
    }

    pub fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        match self.stream.as_mut() {
            None => Err(Error::ServerGone),
            Some(Stream::Tcp(r)) => r.get_mut().write_all(buf).map_err(Error::Io),
            Some(Stream::Unix(r)) => r.get_mut().write_all(buf).map_err(Error::Io),
            #[cfg(feature = "tls")]
            Some(Stream::Tls(r)) => r.get_mut().write_all(buf).map_err(Error::Io),
        }?;
        self.bytes_sent += buf.len() as u64;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        match self.stream.as_mut() {
            None => Err(Error::ServerGone),
            Some(Stream::Tcp(r)) => r.get_mut().flush().map_err(Error::Io),
            Some(Stream::Unix(r)) => r.get_mut().flush().map_err(Error::Io),
            #[cfg(feature = "tls")]
            Some(Stream::Tls(r)) => r.get_mut().flush().map_err(Error::Io),
        }
    }

    /// Raw descriptor for the readiness multiplexer.
    pub fn raw_fd(&self) -> Option<RawFd> {
        match self.stream.as_ref() {
            None => None,
            Some(Stream::Tcp(r)) => Some(r.get_ref().as_raw_fd()),
            Some(Stream::Unix(r)) => Some(r.get_ref().as_raw_fd()),
            #[cfg(feature = "tls")]
            Some(Stream::Tls(r)) => Some(r.get_ref().get_ref().as_raw_fd()),
        }
    }

    /// Switch an established TCP stream to TLS. Any bytes still sitting in
    /// the read buffer would be lost, so this is only legal at the handshake
    /// point where the server is waiting for the client.
    #[cfg(feature = "tls")]
    pub fn upgrade_tls(&mut self, host: &str) -> Result<()> {
        let tcp = match self.stream.take() {
            Some(Stream::Tcp(r)) => r.into_inner(),
            other => {
                self.stream = other;
                return Err(Error::BadConfig(
                    "TLS switchover requires a plain TCP stream".to_owned(),
                ));
            }
        };

        let mut builder = native_tls::TlsConnector::builder();
        if !self.options.ssl_verify_server_cert {
            builder.danger_accept_invalid_certs(true);
            builder.danger_accept_invalid_hostnames(true);
        }
        if let Some(ca) = &self.options.ssl_ca {
            let pem = std::fs::read(ca).map_err(Error::Io)?;
            let cert = native_tls::Certificate::from_pem(&pem)
                .map_err(|e| Error::BadConfig(format!("bad CA certificate: {e}")))?;
            builder.add_root_certificate(cert);
        }
        if let (Some(cert), Some(key)) = (&self.options.ssl_cert, &self.options.ssl_key) {
            let cert_pem = std::fs::read(cert).map_err(Error::Io)?;
            let key_pem = std::fs::read(key).map_err(Error::Io)?;
            let identity = native_tls::Identity::from_pkcs8(&cert_pem, &key_pem)
                .map_err(|e| Error::BadConfig(format!("bad client identity: {e}")))?;
            builder.identity(identity);
        }

        let connector = builder
            .build()
            .map_err(|e| Error::Connection(e.to_string()))?;
        let tls = connector
            .connect(host, tcp)
            .map_err(|e| Error::Connection(e.to_string()))?;
        self.stream = Some(Stream::Tls(BufReader::with_capacity(
            self.options.read_buffer_size,
            tls,
        )));
        Ok(())
    }

    #[cfg(not(feature = "tls"))]
    pub fn upgrade_tls(&mut self, _host: &str) -> Result<()> {
        Err(Error::BadConfig(
            "TLS requested but the tls feature is not enabled".to_owned(),
        ))
    }
}
