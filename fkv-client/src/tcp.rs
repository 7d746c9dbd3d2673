//! # TCP Store
//!
//! Purpose: The production `Store`: one TCP connection per handle speaking
//! RESP, shared by every caller that holds the handle.
//!
//! ## Design Principles
//! 1. **Serialized Multiplexing**: A mutex around the socket lets unbounded
//!    callers share one connection; each command is written and its reply
//!    read under the same lock so replies never interleave.
//! 2. **Self-Healing**: An I/O or framing failure drops the socket; the next
//!    command reconnects with the original endpoints and timeout.
//! 3. **Bounded Connect**: The connect timeout covers the TCP connect and
//!    the handshake; `syncTimeout` only applies to commands afterwards.
//! 4. **Cache-Friendly Buffers**: The connection reuses its line and write
//!    buffers across commands.

use std::io::{self, BufReader, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use fkv_common::{FkvError, FkvResult};

use crate::config::{ConnectionConfig, Endpoint};
use crate::resp::{encode_command, read_response, RespValue};
use crate::store::{Store, StoreHandle};

/// `Store` backed by plain TCP sockets.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpStore;

impl Store for TcpStore {
    type Handle = TcpHandle;

    fn connect(&self, connection_string: &str, timeout: Duration) -> FkvResult<TcpHandle> {
        let config = ConnectionConfig::parse(connection_string)?;
        let connection = Connection::open(&config, timeout)?;
        Ok(TcpHandle {
            config,
            timeout,
            conn: Mutex::new(Some(connection)),
            closed: AtomicBool::new(false),
        })
    }
}

/// Shared handle to one TCP connection.
pub struct TcpHandle {
    config: ConnectionConfig,
    timeout: Duration,
    // None after a transport failure until the next command reconnects.
    conn: Mutex<Option<Connection>>,
    closed: AtomicBool,
}

impl TcpHandle {
    /// Returns true once `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl StoreHandle for TcpHandle {
    fn exec(&self, args: &[&[u8]]) -> FkvResult<RespValue> {
        if self.is_closed() {
            return Err(FkvError::closed());
        }

        let mut slot = self.conn.lock();
        // `close` may have taken the socket while we waited for the lock.
        if self.is_closed() {
            return Err(FkvError::closed());
        }
        if slot.is_none() {
            tracing::debug!("reconnecting broken store connection");
            *slot = Some(Connection::open(&self.config, self.timeout)?);
        }

        let Some(conn) = slot.as_mut() else {
            return Err(FkvError::closed());
        };
        let response = conn.exec(args);
        if response.is_err() {
            // The reply stream may be out of sync; never reuse this socket.
            *slot = None;
        }
        response
    }

    fn close(&self) -> FkvResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        match self.conn.lock().take() {
            Some(conn) => conn.close(),
            None => Ok(()),
        }
    }
}

/// Single TCP connection with reusable buffers.
///
/// The buffers are stored on the connection to avoid per-call allocations.
struct Connection {
    // Buffered reader reduces syscalls while still allowing direct writes.
    reader: BufReader<TcpStream>,
    line_buf: Vec<u8>,
    write_buf: Vec<u8>,
}

impl Connection {
    /// Connects to the first reachable endpoint and runs the handshake.
    ///
    /// **Logic**:
    /// 1. Connect with `timeout` per resolved address.
    /// 2. Run the handshake with socket timeouts set to what is left of
    ///    `timeout`; a handshake that stalls fails with `ConnectTimeout`.
    /// 3. Switch the socket to `syncTimeout` for regular commands.
    ///
    /// A zero `timeout` disables both limits.
    fn open(config: &ConnectionConfig, timeout: Duration) -> FkvResult<Self> {
        let deadline = (!timeout.is_zero()).then(|| Instant::now() + timeout);
        let stream = connect_any(&config.endpoints, timeout)?;
        // Disable Nagle to keep request latency low for small payloads.
        stream.set_nodelay(true)?;

        let mut conn = Connection {
            reader: BufReader::new(stream),
            line_buf: Vec::with_capacity(128),
            write_buf: Vec::with_capacity(256),
        };
        conn.handshake(config, deadline).map_err(|err| match err {
            FkvError::ConnectionUnavailable(source) if is_timeout(&source) => {
                FkvError::ConnectTimeout(timeout)
            }
            other => other,
        })?;

        let stream = conn.reader.get_ref();
        stream.set_read_timeout(config.sync_timeout)?;
        stream.set_write_timeout(config.sync_timeout)?;
        Ok(conn)
    }

    fn handshake(&mut self, config: &ConnectionConfig, deadline: Option<Instant>) -> FkvResult<()> {
        if let Some(password) = &config.password {
            match &config.user {
                Some(user) => {
                    self.expect_ok(&[b"AUTH", user.as_bytes(), password.as_bytes()], deadline)?
                }
                None => self.expect_ok(&[b"AUTH", password.as_bytes()], deadline)?,
            }
        }
        if let Some(database) = config.database {
            let database = database.to_string();
            self.expect_ok(&[b"SELECT", database.as_bytes()], deadline)?;
        }
        if let Some(name) = &config.client_name {
            self.expect_ok(&[b"CLIENT", b"SETNAME", name.as_bytes()], deadline)?;
        }
        Ok(())
    }

    fn expect_ok(&mut self, args: &[&[u8]], deadline: Option<Instant>) -> FkvResult<()> {
        if let Some(deadline) = deadline {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(io::Error::from(io::ErrorKind::TimedOut).into());
            }
            let stream = self.reader.get_ref();
            stream.set_read_timeout(Some(remaining))?;
            stream.set_write_timeout(Some(remaining))?;
        }
        match self.exec(args)?.into_result()? {
            RespValue::Simple(_) => Ok(()),
            _ => Err(FkvError::UnexpectedResponse),
        }
    }

    fn exec(&mut self, args: &[&[u8]]) -> FkvResult<RespValue> {
        self.write_buf.clear();
        encode_command(args, &mut self.write_buf);

        let stream = self.reader.get_mut();
        stream.write_all(&self.write_buf)?;
        stream.flush()?;

        read_response(&mut self.reader, &mut self.line_buf)
    }

    fn close(mut self) -> FkvResult<()> {
        // QUIT is a courtesy; the socket is shut down regardless.
        let _ = self.exec(&[b"QUIT"]);
        match self.reader.get_ref().shutdown(Shutdown::Both) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotConnected => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

fn connect_any(endpoints: &[Endpoint], timeout: Duration) -> FkvResult<TcpStream> {
    let mut last_err = None;
    for endpoint in endpoints {
        let addrs = endpoint
            .address()
            .to_socket_addrs()
            .map_err(FkvError::ConnectionUnavailable)?;
        for addr in addrs {
            match connect_stream(&addr, timeout) {
                Ok(stream) => return Ok(stream),
                Err(err) => last_err = Some(err),
            }
        }
    }
    Err(last_err.unwrap_or_else(|| {
        FkvError::ConnectionUnavailable(io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            "no address resolved",
        ))
    }))
}

fn connect_stream(addr: &SocketAddr, timeout: Duration) -> FkvResult<TcpStream> {
    let result = if timeout.is_zero() {
        TcpStream::connect(addr)
    } else {
        TcpStream::connect_timeout(addr, timeout)
    };
    result.map_err(|err| {
        if is_timeout(&err) {
            FkvError::ConnectTimeout(timeout)
        } else {
            FkvError::ConnectionUnavailable(err)
        }
    })
}

// Socket timeouts surface as WouldBlock on Unix and TimedOut on Windows.
fn is_timeout(err: &io::Error) -> bool {
    matches!(err.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock)
}
