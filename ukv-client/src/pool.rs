//! # Connection Pool
//!
//! Purpose: Reuse TCP connections to one node so Direct calls and batches
//! avoid a handshake per request.
//!
//! ## Design Principles
//! 1. **Bounded Reuse**: At most `max_total` sockets per node, `max_idle` parked.
//! 2. **Short Critical Sections**: The lock covers only the idle queue and counters.
//! 3. **No Waiting**: An exhausted pool answers `PoolExhausted` at once.
//! 4. **Poisoned Connections Leave**: A connection that saw an IO or framing
//!    error is closed instead of returned.

use std::collections::VecDeque;
use std::fmt;
use std::io::{BufReader, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, warn};

use ukv_common::{KvError, KvResult, ProtocolCommand};

use crate::resp::{encode_request, read_response, RespValue};

/// Pool settings for one node.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Node address, e.g. "127.0.0.1:6379".
    pub addr: String,
    /// Maximum number of idle connections to keep.
    pub max_idle: usize,
    /// Maximum total connections (idle + in-use).
    pub max_total: usize,
    pub read_timeout: Option<Duration>,
    pub write_timeout: Option<Duration>,
    pub connect_timeout: Option<Duration>,
}

impl PoolConfig {
    pub fn new(addr: impl Into<String>) -> Self {
        PoolConfig {
            addr: addr.into(),
            max_idle: 8,
            max_total: 16,
            read_timeout: None,
            write_timeout: None,
            connect_timeout: None,
        }
    }

    /// Same limits, different node.
    pub fn for_addr(&self, addr: impl Into<String>) -> Self {
        PoolConfig {
            addr: addr.into(),
            ..self.clone()
        }
    }
}

struct PoolState {
    idle: VecDeque<Connection>,
    total: usize,
}

struct PoolInner {
    config: PoolConfig,
    state: Mutex<PoolState>,
}

/// Connection pool handle.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    pub fn new(config: PoolConfig) -> KvResult<Self> {
        if config.max_total == 0 {
            return Err(KvError::Config("max_total must be at least 1".into()));
        }
        let state = PoolState {
            idle: VecDeque::with_capacity(config.max_idle),
            total: 0,
        };
        Ok(ConnectionPool {
            inner: Arc::new(PoolInner {
                config,
                state: Mutex::new(state),
            }),
        })
    }

    pub fn addr(&self) -> &str {
        &self.inner.config.addr
    }

    /// Acquires a connection from the pool.
    pub fn acquire(&self) -> KvResult<PooledConnection> {
        if let Some(conn) = self.pop_idle() {
            return Ok(PooledConnection::new(self.inner.clone(), conn));
        }

        if !self.try_reserve() {
            return Err(KvError::PoolExhausted);
        }

        match Connection::connect(&self.inner.config) {
            Ok(conn) => Ok(PooledConnection::new(self.inner.clone(), conn)),
            Err(err) => {
                self.release_slot();
                Err(err)
            }
        }
    }

    /// Connections currently open (idle + in use).
    pub fn total(&self) -> usize {
        self.inner.state.lock().total
    }

    pub fn idle(&self) -> usize {
        self.inner.state.lock().idle.len()
    }

    fn pop_idle(&self) -> Option<Connection> {
        self.inner.state.lock().idle.pop_front()
    }

    fn try_reserve(&self) -> bool {
        let mut state = self.inner.state.lock();
        if state.total >= self.inner.config.max_total {
            return false;
        }
        state.total += 1;
        true
    }

    fn release_slot(&self) {
        let mut state = self.inner.state.lock();
        state.total = state.total.saturating_sub(1);
    }

    fn return_connection(&self, conn: Connection) {
        let mut state = self.inner.state.lock();
        if state.idle.len() < self.inner.config.max_idle {
            state.idle.push_back(conn);
        } else {
            state.total = state.total.saturating_sub(1);
        }
    }
}

impl fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("addr", &self.inner.config.addr)
            .finish()
    }
}

/// RAII wrapper returning a connection to the pool on drop.
pub struct PooledConnection {
    pool: Arc<PoolInner>,
    conn: Option<Connection>,
    valid: bool,
}

impl PooledConnection {
    fn new(pool: Arc<PoolInner>, conn: Connection) -> Self {
        PooledConnection {
            pool,
            conn: Some(conn),
            valid: true,
        }
    }

    fn conn(&mut self) -> KvResult<&mut Connection> {
        match self.conn.as_mut() {
            Some(conn) if self.valid => Ok(conn),
            _ => Err(KvError::Transport("connection already closed".into())),
        }
    }

    /// Sends one request and reads its reply.
    pub fn exec(&mut self, command: ProtocolCommand, args: &[&[u8]]) -> KvResult<RespValue> {
        let result = self.conn().and_then(|conn| conn.exec(command, args));
        if result.is_err() {
            self.invalidate();
        }
        result
    }

    /// Writes pre-encoded request bytes.
    pub fn write_raw(&mut self, bytes: &[u8]) -> KvResult<()> {
        let result = self.conn().and_then(|conn| conn.write_raw(bytes));
        if result.is_err() {
            self.invalidate();
        }
        result
    }

    /// Reads the next reply.
    pub fn read_reply(&mut self) -> KvResult<RespValue> {
        let result = self.conn().and_then(|conn| conn.read());
        if result.is_err() {
            self.invalidate();
        }
        result
    }

    /// Marks the connection broken; it is closed instead of returned.
    pub fn invalidate(&mut self) {
        if self.valid {
            warn!(target: "ukv::pool", addr = %self.pool.config.addr, "dropping broken connection");
        }
        self.valid = false;
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn addr(&self) -> &str {
        &self.pool.config.addr
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let conn = match self.conn.take() {
            Some(conn) => conn,
            None => return,
        };

        let pool = ConnectionPool {
            inner: self.pool.clone(),
        };

        if self.valid {
            pool.return_connection(conn);
        } else {
            pool.release_slot();
        }
    }
}

impl fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("addr", &self.pool.config.addr)
            .field("valid", &self.valid)
            .finish()
    }
}

/// Single TCP connection with reusable buffers.
pub struct Connection {
    reader: BufReader<TcpStream>,
    line_buf: Vec<u8>,
    write_buf: Vec<u8>,
}

impl Connection {
    /// Opens a connection outside any pool.
    pub fn connect(config: &PoolConfig) -> KvResult<Self> {
        let stream = connect_stream(config)?;
        if let Some(timeout) = config.read_timeout {
            stream.set_read_timeout(Some(timeout))?;
        }
        if let Some(timeout) = config.write_timeout {
            stream.set_write_timeout(Some(timeout))?;
        }
        stream.set_nodelay(true)?;
        debug!(target: "ukv::pool", addr = %config.addr, "connected");

        Ok(Connection {
            reader: BufReader::new(stream),
            line_buf: Vec::with_capacity(128),
            write_buf: Vec::with_capacity(256),
        })
    }

    pub fn exec(&mut self, command: ProtocolCommand, args: &[&[u8]]) -> KvResult<RespValue> {
        self.write_buf.clear();
        encode_request(command, args, &mut self.write_buf);

        let stream = self.reader.get_mut();
        stream.write_all(&self.write_buf)?;
        stream.flush()?;

        self.read()
    }

    fn write_raw(&mut self, bytes: &[u8]) -> KvResult<()> {
        let stream = self.reader.get_mut();
        stream.write_all(bytes)?;
        stream.flush()?;
        Ok(())
    }

    fn read(&mut self) -> KvResult<RespValue> {
        read_response(&mut self.reader, &mut self.line_buf)
    }
}

fn connect_stream(config: &PoolConfig) -> KvResult<TcpStream> {
    let addr = resolve_addr(&config.addr)?;
    let stream = match config.connect_timeout {
        Some(timeout) => TcpStream::connect_timeout(&addr, timeout)?,
        None => TcpStream::connect(addr)?,
    };
    Ok(stream)
}

fn resolve_addr(addr: &str) -> KvResult<SocketAddr> {
    if let Ok(parsed) = addr.parse() {
        return Ok(parsed);
    }
    addr.to_socket_addrs()
        .map_err(|_| KvError::InvalidAddress(addr.to_string()))?
        .next()
        .ok_or_else(|| KvError::InvalidAddress(addr.to_string()))
}
