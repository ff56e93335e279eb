//! # Connections and Dialing
//!
//! Purpose: Define the seam between the pool and the wire. The pool only
//! knows `Connection` and `Dialer`; `TcpDialer` is the concrete RESP2/TCP
//! collaborator.
//!
//! ## Design Principles
//! 1. **Strategy Pattern**: Any dial function can back the pool, which keeps
//!    pool behavior testable without a network.
//! 2. **Cache-Friendly Buffers**: Each TCP connection reuses its own buffers.
//! 3. **Timeouts Are Errors**: An expired read/write surfaces as `Timeout`, and
//!    the pool never reuses a connection after it.

use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::resp::{encode_command, read_response, RespValue};

/// A live session to the store.
///
/// Exclusively owned by whichever caller currently holds it.
pub trait Connection: Send {
    /// Sends one command and reads one reply.
    ///
    /// `timeout` bounds this whole round-trip, however the reply is split
    /// across reads; `None` uses the connection's configured per-read default.
    fn exec(&mut self, args: &[&[u8]], timeout: Option<Duration>) -> ClientResult<RespValue>;
}

/// Opens new connections for the pool.
pub trait Dialer: Send + Sync {
    /// Establishes a session or fails with a connection error.
    fn dial(&self) -> ClientResult<Box<dyn Connection>>;
}

impl<F> Dialer for F
where
    F: Fn() -> ClientResult<Box<dyn Connection>> + Send + Sync,
{
    fn dial(&self) -> ClientResult<Box<dyn Connection>> {
        self()
    }
}

/// Dials RESP2 sessions over TCP.
#[derive(Debug, Clone)]
pub struct TcpDialer {
    addr: String,
    connect_timeout: Option<Duration>,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
}

impl TcpDialer {
    /// Builds a dialer from client configuration.
    ///
    /// Only the address syntax is checked here; name resolution happens on
    /// each dial so a store that moves is picked up.
    pub fn new(config: &ClientConfig) -> ClientResult<Self> {
        let addr = parse_address(&config.addr)?;
        Ok(TcpDialer {
            addr,
            connect_timeout: config.connect_timeout,
            read_timeout: config.read_timeout,
            write_timeout: config.write_timeout,
        })
    }

    /// Normalized `host:port` this dialer connects to.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    fn connect_stream(&self) -> io::Result<TcpStream> {
        let addrs: Vec<SocketAddr> = self.addr.to_socket_addrs()?.collect();
        let mut last_err = None;
        for addr in addrs {
            let attempt = match self.connect_timeout {
                Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
                None => TcpStream::connect(addr),
            };
            match attempt {
                Ok(stream) => return Ok(stream),
                Err(err) => last_err = Some(err),
            }
        }
        Err(last_err.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, "address resolved to nothing")
        }))
    }
}

impl Dialer for TcpDialer {
    fn dial(&self) -> ClientResult<Box<dyn Connection>> {
        let connect_err = |source| ClientError::Connect {
            addr: self.addr.clone(),
            source,
        };
        let stream = self.connect_stream().map_err(connect_err)?;
        // Disable Nagle to keep request latency low for small payloads.
        stream.set_nodelay(true).map_err(connect_err)?;
        tracing::debug!(addr = %self.addr, "dialed store");

        Ok(Box::new(TcpConnection {
            reader: BufReader::new(stream),
            line_buf: Vec::with_capacity(128),
            write_buf: Vec::with_capacity(256),
            read_timeout: self.read_timeout,
            write_timeout: self.write_timeout,
        }))
    }
}

/// Single TCP session with reusable buffers.
pub struct TcpConnection {
    // Buffered reader reduces syscalls while still allowing direct writes.
    reader: BufReader<TcpStream>,
    line_buf: Vec<u8>,
    write_buf: Vec<u8>,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
}

impl TcpConnection {
    fn apply_timeouts(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        let stream = self.reader.get_ref();
        // A zero duration is rejected by the socket API; treat it as 1ms.
        let clamp = |d: Duration| d.max(Duration::from_millis(1));
        stream.set_read_timeout(timeout.or(self.read_timeout).map(clamp))?;
        stream.set_write_timeout(timeout.or(self.write_timeout).map(clamp))?;
        Ok(())
    }
}

impl Connection for TcpConnection {
    fn exec(&mut self, args: &[&[u8]], timeout: Option<Duration>) -> ClientResult<RespValue> {
        let deadline = timeout.and_then(|timeout| Instant::now().checked_add(timeout));
        self.apply_timeouts(timeout)?;

        self.write_buf.clear();
        encode_command(args, &mut self.write_buf);

        let stream = self.reader.get_mut();
        stream.write_all(&self.write_buf).map_err(map_io)?;
        stream.flush().map_err(map_io)?;

        let mut reader = DeadlineReader {
            inner: &mut self.reader,
            deadline,
        };
        read_response(&mut reader, &mut self.line_buf).map_err(|err| match err {
            ClientError::Io(io_err) => map_io(io_err),
            other => other,
        })
    }
}

/// Bounds a whole reply by one deadline.
///
/// A socket read timeout only limits each `read` call, so before every read
/// that reaches the socket the timeout is re-armed with the time left. A reply
/// trickling in byte by byte still fails once the deadline passes.
struct DeadlineReader<'a> {
    inner: &'a mut BufReader<TcpStream>,
    deadline: Option<Instant>,
}

impl DeadlineReader<'_> {
    fn arm(&mut self) -> io::Result<()> {
        let deadline = match self.deadline {
            Some(deadline) => deadline,
            None => return Ok(()),
        };
        // Buffered bytes are served without touching the socket.
        if !self.inner.buffer().is_empty() {
            return Ok(());
        }
        let left = deadline
            .checked_duration_since(Instant::now())
            .filter(|left| !left.is_zero())
            .ok_or_else(|| io::Error::new(io::ErrorKind::TimedOut, "reply deadline expired"))?;
        self.inner
            .get_ref()
            .set_read_timeout(Some(left.max(Duration::from_millis(1))))
    }
}

impl Read for DeadlineReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.arm()?;
        self.inner.read(buf)
    }
}

impl BufRead for DeadlineReader<'_> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        self.arm()?;
        self.inner.fill_buf()
    }

    fn consume(&mut self, amt: usize) {
        self.inner.consume(amt)
    }
}

fn map_io(err: io::Error) -> ClientError {
    match err.kind() {
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => ClientError::Timeout,
        _ => ClientError::Io(err),
    }
}

/// Accepts `host:port` or `redis://host:port[/...]` and returns `host:port`.
pub fn parse_address(raw: &str) -> ClientResult<String> {
    let invalid = || ClientError::InvalidAddress(raw.to_string());
    let rest = match raw.split_once("://") {
        Some(("redis", rest)) => rest,
        Some(_) => return Err(invalid()),
        None => raw,
    };
    let authority = rest.split('/').next().unwrap_or_default();
    if authority.contains('@') {
        return Err(invalid());
    }
    let (host, port) = authority.rsplit_once(':').ok_or_else(invalid)?;
    if host.is_empty() || port.parse::<u16>().is_err() {
        return Err(invalid());
    }
    Ok(authority.to_string())
}
