//! # Pipelines and Transactions
//!
//! Purpose: Record requests on one connection and answer them in a single
//! round trip when the owning session flushes.
//!
//! ## Design Principles
//! 1. **FIFO Replies**: RESP answers requests in order, so the Nth reply
//!    completes the Nth pending result.
//! 2. **Late Writes by Default**: Encoded requests stay in a buffer until
//!    sync unless the flush policy asks for earlier writes.
//! 3. **Transaction Framing Is Internal**: MULTI is queued at open and EXEC at
//!    sync; callers never enqueue them.
//! 4. **No Hung Waiters**: Every pending result is completed, with a reply or
//!    an error, before sync or discard returns.
//!
//! ## Transaction Reply Stream
//!
//! ```text
//! MULTI       -> +OK
//! cmd 1..n    -> +QUEUED (or -ERR, which makes EXEC fail with EXECABORT)
//! EXEC        -> *n [reply 1 .. reply n]   or *-1 when a WATCH fired
//! ```

use std::fmt;

use serde::Deserialize;
use tracing::{debug, warn};

use ukv_common::{KvError, KvResult, ProtocolCommand, SessionMisuse, Strategy};
use ukv_dispatch::{Completer, Invocation, Pending};

use crate::native::NativeCommands;
use crate::pool::PooledConnection;
use crate::resp::{encode_request, server_error, RespValue};

/// When recorded requests are written to the socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushPolicy {
    /// Write everything in one go at sync.
    #[default]
    OnSync,
    /// Write each request as it is recorded.
    EachCommand,
    /// Write whenever this many requests are buffered.
    Buffered(usize),
}

/// What a batch frames its requests as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchMode {
    Pipeline,
    Transaction,
}

impl BatchMode {
    pub fn for_strategy(strategy: Strategy) -> KvResult<Self> {
        match strategy {
            Strategy::Pipelined => Ok(BatchMode::Pipeline),
            Strategy::Transactional => Ok(BatchMode::Transaction),
            Strategy::Direct => Err(SessionMisuse::StrategyMismatch.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BatchState {
    Open,
    Synced,
    Discarded,
}

/// Requests recorded on one connection.
pub struct RespBatch {
    conn: PooledConnection,
    mode: BatchMode,
    policy: FlushPolicy,
    buf: Vec<u8>,
    buffered: usize,
    written: usize,
    completers: Vec<Completer<RespValue>>,
    write_error: Option<String>,
    state: BatchState,
}

impl RespBatch {
    pub fn new(conn: PooledConnection, mode: BatchMode, policy: FlushPolicy) -> Self {
        let mut batch = RespBatch {
            conn,
            mode,
            policy,
            buf: Vec::with_capacity(512),
            buffered: 0,
            written: 0,
            completers: Vec::new(),
            write_error: None,
            state: BatchState::Open,
        };
        if mode == BatchMode::Transaction {
            encode_request(ProtocolCommand::Multi, &[], &mut batch.buf);
            batch.buffered = 1;
            batch.apply_policy();
        }
        batch
    }

    pub fn mode(&self) -> BatchMode {
        self.mode
    }

    /// Number of requests recorded so far.
    pub fn len(&self) -> usize {
        self.completers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.completers.is_empty()
    }

    pub fn addr(&self) -> &str {
        self.conn.addr()
    }

    fn apply_policy(&mut self) {
        let due = match self.policy {
            FlushPolicy::OnSync => false,
            FlushPolicy::EachCommand => true,
            FlushPolicy::Buffered(n) => self.buffered >= n.max(1),
        };
        if due {
            if let Err(err) = self.write_buffered() {
                self.write_error = Some(err.to_string());
            }
        }
    }

    fn write_buffered(&mut self) -> KvResult<()> {
        if self.buf.is_empty() || self.write_error.is_some() {
            return Ok(());
        }
        self.conn.write_raw(&self.buf)?;
        self.written += self.buffered;
        self.buffered = 0;
        self.buf.clear();
        Ok(())
    }

    fn fail_all(&mut self, err: impl Fn() -> KvError) {
        for completer in self.completers.drain(..) {
            completer.fail(err());
        }
    }

    fn broken(&mut self, reason: String) -> KvError {
        warn!(target: "ukv::batch", addr = %self.conn.addr(), error = %reason, "batch transport failed");
        self.conn.invalidate();
        self.fail_all(|| KvError::Transport(reason.clone()));
        KvError::Transport(reason)
    }

    fn sync_pipeline(&mut self) -> KvResult<()> {
        let completers: Vec<_> = self.completers.drain(..).collect();
        let mut pending = completers.into_iter();
        while let Some(completer) = pending.next() {
            match self.conn.read_reply() {
                Ok(reply) => completer.complete(reply.into_native()),
                Err(err) => {
                    let reason = err.to_string();
                    warn!(
                        target: "ukv::batch",
                        addr = %self.conn.addr(),
                        error = %reason,
                        "pipeline read failed; failing remaining entries"
                    );
                    self.conn.invalidate();
                    completer.fail(KvError::Transport(reason.clone()));
                    for rest in pending.by_ref() {
                        rest.fail(KvError::Transport(reason.clone()));
                    }
                }
            }
        }
        Ok(())
    }

    fn sync_transaction(&mut self) -> KvResult<()> {
        let opened = match self.conn.read_reply() {
            Ok(reply) => reply,
            Err(err) => return Err(self.broken(err.to_string())),
        };
        if let RespValue::Error(message) = &opened {
            let err = server_error(message);
            self.conn.invalidate();
            self.fail_all(|| err.duplicate());
            return Err(err);
        }

        for _ in 0..self.completers.len() {
            // A rejected command shows up again as EXECABORT below.
            if let Err(err) = self.conn.read_reply() {
                return Err(self.broken(err.to_string()));
            }
        }

        let committed = match self.conn.read_reply() {
            Ok(reply) => reply,
            Err(err) => return Err(self.broken(err.to_string())),
        };
        match committed {
            RespValue::Array(items) if items.len() == self.completers.len() => {
                for (completer, item) in self.completers.drain(..).zip(items) {
                    completer.complete(item.into_native());
                }
                Ok(())
            }
            RespValue::Nil => {
                debug!(target: "ukv::batch", "transaction aborted by WATCH");
                self.fail_all(|| KvError::TransactionAborted);
                Err(KvError::TransactionAborted)
            }
            RespValue::Error(message) if message.starts_with(b"EXECABORT") => {
                debug!(
                    target: "ukv::batch",
                    reason = %String::from_utf8_lossy(&message),
                    "transaction aborted by server"
                );
                self.fail_all(|| KvError::TransactionAborted);
                Err(KvError::TransactionAborted)
            }
            RespValue::Error(message) => {
                let err = server_error(&message);
                self.fail_all(|| err.duplicate());
                Err(err)
            }
            _ => {
                self.conn.invalidate();
                self.fail_all(|| KvError::UnexpectedResponse {
                    command: ProtocolCommand::Exec,
                });
                Err(KvError::UnexpectedResponse {
                    command: ProtocolCommand::Exec,
                })
            }
        }
    }

    /// Sends everything and completes every pending reply.
    pub fn sync(&mut self) -> KvResult<()> {
        if self.state != BatchState::Open {
            return Ok(());
        }
        self.state = BatchState::Synced;
        debug!(
            target: "ukv::batch",
            addr = %self.conn.addr(),
            mode = ?self.mode,
            commands = self.completers.len(),
            "syncing batch"
        );

        if let Some(reason) = self.write_error.take() {
            return Err(self.broken(reason));
        }
        if self.mode == BatchMode::Transaction {
            encode_request(ProtocolCommand::Exec, &[], &mut self.buf);
            self.buffered += 1;
        }
        if let Err(err) = self.write_buffered() {
            return Err(self.broken(err.to_string()));
        }

        match self.mode {
            BatchMode::Pipeline => self.sync_pipeline(),
            BatchMode::Transaction => self.sync_transaction(),
        }
    }

    /// Abandons the batch; pending replies complete with `Discarded`.
    pub fn discard(&mut self) -> KvResult<()> {
        if self.state != BatchState::Open {
            return Ok(());
        }
        self.state = BatchState::Discarded;
        self.fail_all(|| KvError::Discarded);
        self.buf.clear();
        self.buffered = 0;

        if self.written == 0 {
            return Ok(());
        }
        if self.write_error.is_some() {
            self.conn.invalidate();
            return Ok(());
        }
        match self.mode {
            BatchMode::Pipeline => {
                // Replies for written requests are still in flight.
                self.conn.invalidate();
                Ok(())
            }
            BatchMode::Transaction => {
                let written = self.written;
                let result = self.conn.exec(ProtocolCommand::Discard, &[]).and_then(|reply| {
                    // The DISCARD reply trails the replies to what was already written.
                    let mut last = reply;
                    for _ in 0..written {
                        last = self.conn.read_reply()?;
                    }
                    match last {
                        RespValue::Error(message) => Err(server_error(&message)),
                        _ => Ok(()),
                    }
                });
                if result.is_err() {
                    self.conn.invalidate();
                }
                result
            }
        }
    }
}

impl NativeCommands for RespBatch {
    fn call(&mut self, command: ProtocolCommand, args: &[&[u8]]) -> Invocation<RespValue> {
        if self.state != BatchState::Open {
            return Invocation::ready(Err(KvError::Transport("batch already closed".into())));
        }
        encode_request(command, args, &mut self.buf);
        self.buffered += 1;
        let (completer, pending) = Pending::channel();
        self.completers.push(completer);
        self.apply_policy();
        Invocation::Pending(pending)
    }
}

impl Drop for RespBatch {
    fn drop(&mut self) {
        if self.state == BatchState::Open && self.written > 0 {
            self.conn.invalidate();
        }
    }
}

impl fmt::Debug for RespBatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RespBatch")
            .field("addr", &self.conn.addr())
            .field("mode", &self.mode)
            .field("policy", &self.policy)
            .field("commands", &self.completers.len())
            .field("written", &self.written)
            .finish()
    }
}
