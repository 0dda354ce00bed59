//! Transport seam of the engine and its std TCP/TLS implementation.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rustls::pki_types::ServerName;
use rustls::{ClientConfig, ClientConnection};
use thiserror::Error;
use tracing::{debug, warn};

use crate::error::ClientError;
use crate::options::{ClientOptions, Mode};
use crate::tls;

/// Granularity at which a blocking receive notices a wake request.
const WAKE_POLL: Duration = Duration::from_millis(100);

#[derive(Error, Debug)]
pub enum NetError {
    #[error("Operation would block")]
    WouldBlock,

    #[error("Timed out")]
    Timeout,

    #[error("Connection closed")]
    Closed,

    #[error("Woken up")]
    Wake,

    #[error("TLS: {0}")]
    Tls(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Byte transport used by a session.
///
/// `receive` returning `Ok(0)` means the peer closed the connection.
pub trait Network {
    /// Opens the connection, waiting at most `timeout` for it.
    fn connect(&mut self, host: &str, port: u16, timeout: Duration) -> Result<(), NetError>;

    fn send(&mut self, buf: &[u8], timeout: Duration) -> Result<usize, NetError>;

    fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, NetError>;

    fn disconnect(&mut self) -> Result<(), NetError>;
}

fn map_io(e: io::Error, mode: Mode) -> NetError {
    match e.kind() {
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted => {
            match mode {
                Mode::Blocking => NetError::Timeout,
                Mode::NonBlocking => NetError::WouldBlock,
            }
        }
        io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::UnexpectedEof => NetError::Closed,
        _ => NetError::Io(e),
    }
}

/// Socket timeouts reject a zero duration.
fn at_least_1ms(timeout: Duration) -> Duration {
    timeout.max(Duration::from_millis(1))
}

struct TlsStream {
    conn: ClientConnection,
    sock: TcpStream,
}

impl TlsStream {
    fn handshake(
        config: Arc<ClientConfig>,
        host: &str,
        mut sock: TcpStream,
        timeout: Duration,
    ) -> Result<Self, NetError> {
        let name = ServerName::try_from(host.to_string())
            .map_err(|_| NetError::Tls(format!("Invalid server name: {}", host)))?;
        let mut conn =
            ClientConnection::new(config, name).map_err(|e| NetError::Tls(e.to_string()))?;

        sock.set_read_timeout(Some(at_least_1ms(timeout)))?;
        sock.set_write_timeout(Some(at_least_1ms(timeout)))?;

        while conn.is_handshaking() {
            conn.complete_io(&mut sock)
                .map_err(|e| NetError::Tls(e.to_string()))?;
        }

        Ok(TlsStream { conn, sock })
    }

    fn flush(&mut self, mode: Mode) -> Result<(), NetError> {
        while self.conn.wants_write() {
            self.conn
                .write_tls(&mut self.sock)
                .map_err(|e| map_io(e, mode))?;
        }

        Ok(())
    }

    fn send(&mut self, buf: &[u8], mode: Mode) -> Result<usize, NetError> {
        // Earlier records have to leave before more plaintext is taken.
        self.flush(mode)?;

        let n = self.conn.writer().write(buf)?;

        // The plaintext is owned by rustls now; leftovers go out on the next call.
        match self.flush(mode) {
            Ok(()) | Err(NetError::WouldBlock) | Err(NetError::Timeout) => Ok(n),
            Err(e) => Err(e),
        }
    }

    fn receive(&mut self, buf: &mut [u8], mode: Mode) -> Result<usize, NetError> {
        match self.flush(mode) {
            Ok(()) | Err(NetError::WouldBlock) | Err(NetError::Timeout) => {}
            Err(e) => return Err(e),
        }

        loop {
            match self.conn.reader().read(buf) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(map_io(e, mode)),
            }

            match self.conn.read_tls(&mut self.sock) {
                Ok(0) => return Ok(0),
                Ok(_) => {
                    self.conn
                        .process_new_packets()
                        .map_err(|e| NetError::Tls(e.to_string()))?;
                }
                Err(e) => return Err(map_io(e, mode)),
            }
        }
    }
}

enum Stream {
    Plain(TcpStream),
    Tls(Box<TlsStream>),
}

impl Stream {
    fn socket(&self) -> &TcpStream {
        match self {
            Stream::Plain(sock) => sock,
            Stream::Tls(tls) => &tls.sock,
        }
    }
}

/// `Network` over a std `TcpStream`, optionally wrapped in TLS.
///
/// Connecting always blocks up to the timeout; afterwards the socket follows
/// the configured `Mode`. A blocking receive polls the wake flag, when one
/// is installed, so another thread can interrupt a long wait.
pub struct TcpNetwork {
    mode: Mode,
    tls: Option<Arc<ClientConfig>>,
    wake: Option<Arc<AtomicBool>>,
    stream: Option<Stream>,
}

impl TcpNetwork {
    pub fn new(mode: Mode) -> Self {
        TcpNetwork {
            mode,
            tls: None,
            wake: None,
            stream: None,
        }
    }

    /// Plain or TLS transport as described by `options`.
    pub fn from_options(options: &ClientOptions) -> Result<Self, ClientError> {
        let mut network = Self::new(options.mode);

        if options.tls.enabled {
            network.tls = Some(tls::client_config(&options.tls)?);
        }

        Ok(network)
    }

    pub fn with_tls(mut self, config: Arc<ClientConfig>) -> Self {
        self.tls = Some(config);
        self
    }

    /// Flag that makes `receive` return `NetError::Wake` once it is set.
    pub fn with_wake(mut self, wake: Arc<AtomicBool>) -> Self {
        self.wake = Some(wake);
        self
    }

    fn take_wake(&self) -> bool {
        self.wake
            .as_ref()
            .map_or(false, |w| w.swap(false, Ordering::SeqCst))
    }

    fn stream(&mut self) -> Result<&mut Stream, NetError> {
        self.stream.as_mut().ok_or(NetError::Closed)
    }

    fn read_once(&mut self, buf: &mut [u8]) -> Result<usize, NetError> {
        let mode = self.mode;

        match self.stream()? {
            Stream::Plain(sock) => sock.read(buf).map_err(|e| map_io(e, mode)),
            Stream::Tls(tls) => tls.receive(buf, mode),
        }
    }
}

impl Network for TcpNetwork {
    fn connect(&mut self, host: &str, port: u16, timeout: Duration) -> Result<(), NetError> {
        let mut last_error = None;
        let mut connected = None;

        for addr in (host, port).to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, at_least_1ms(timeout)) {
                Ok(sock) => {
                    connected = Some(sock);
                    break;
                }
                Err(e) => {
                    debug!("Connecting to {} failed: {}", addr, e);
                    last_error = Some(e);
                }
            }
        }

        let sock = match (connected, last_error) {
            (Some(sock), _) => sock,
            (None, Some(e)) => return Err(e.into()),
            (None, None) => {
                return Err(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("{} did not resolve", host),
                )
                .into())
            }
        };

        sock.set_nodelay(true)?;

        let stream = match &self.tls {
            Some(config) => Stream::Tls(Box::new(TlsStream::handshake(
                config.clone(),
                host,
                sock,
                timeout,
            )?)),
            None => Stream::Plain(sock),
        };

        stream
            .socket()
            .set_nonblocking(self.mode == Mode::NonBlocking)?;
        self.stream = Some(stream);

        Ok(())
    }

    fn send(&mut self, buf: &[u8], timeout: Duration) -> Result<usize, NetError> {
        let mode = self.mode;

        match self.stream()? {
            Stream::Plain(sock) => {
                if mode == Mode::Blocking {
                    sock.set_write_timeout(Some(at_least_1ms(timeout)))?;
                }
                sock.write(buf).map_err(|e| map_io(e, mode))
            }
            Stream::Tls(tls) => {
                if mode == Mode::Blocking {
                    tls.sock.set_write_timeout(Some(at_least_1ms(timeout)))?;
                }
                tls.send(buf, mode)
            }
        }
    }

    fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, NetError> {
        if self.mode == Mode::NonBlocking {
            if self.take_wake() {
                return Err(NetError::Wake);
            }
            return self.read_once(buf);
        }

        let started = Instant::now();
        loop {
            if self.take_wake() {
                return Err(NetError::Wake);
            }

            let left = timeout.saturating_sub(started.elapsed());
            if left.is_zero() {
                return Err(NetError::Timeout);
            }

            let slice = match self.wake {
                Some(_) => left.min(WAKE_POLL),
                None => left,
            };
            self.stream()?.socket().set_read_timeout(Some(at_least_1ms(slice)))?;

            match self.read_once(buf) {
                Err(NetError::Timeout) => continue,
                other => return other,
            }
        }
    }

    fn disconnect(&mut self) -> Result<(), NetError> {
        let stream = match self.stream.take() {
            Some(stream) => stream,
            None => return Ok(()),
        };

        match stream {
            Stream::Tls(mut tls) => {
                tls.conn.send_close_notify();
                if let Err(e) = tls.flush(self.mode) {
                    debug!("Sending close_notify failed: {}", e);
                }
                shutdown(&tls.sock)
            }
            Stream::Plain(sock) => shutdown(&sock),
        }
    }
}

fn shutdown(sock: &TcpStream) -> Result<(), NetError> {
    match sock.shutdown(Shutdown::Both) {
        Err(e) if e.kind() != io::ErrorKind::NotConnected => {
            warn!("Socket shutdown failed: {}", e);
            Err(e.into())
        }
        _ => Ok(()),
    }
}
