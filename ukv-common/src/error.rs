//! # Error Taxonomy
//!
//! One error type for every layer: session misuse, topology capability
//! refusals, and failures raised by the native driver. The dispatch core
//! never swallows an error; it either returns it to the Direct caller or
//! attaches it to the deferred entry that failed.

use std::fmt;

use thiserror::Error;

use crate::command::ProtocolCommand;
use crate::types::{Strategy, Topology};

/// Result alias used across the workspace.
pub type KvResult<T> = Result<T, KvError>;

/// Ways a caller can break the session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMisuse {
    /// A batched strategy was requested but no session is open.
    NoActiveSession,
    /// A session is already open on this connection (sessions do not nest).
    AlreadyOpen,
    /// The session was flushed once already.
    AlreadyFlushed,
    /// An entry was appended to a session that was already flushed.
    AppendAfterFlush,
    /// The open session batches with a different strategy than requested.
    StrategyMismatch,
}

impl fmt::Display for SessionMisuse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            SessionMisuse::NoActiveSession => "no active session",
            SessionMisuse::AlreadyOpen => "a session is already open",
            SessionMisuse::AlreadyFlushed => "session already flushed",
            SessionMisuse::AppendAfterFlush => "cannot append to a flushed session",
            SessionMisuse::StrategyMismatch => "open session uses a different strategy",
        };
        f.write_str(text)
    }
}

/// Errors surfaced by the dispatch core, the driver and the facade.
#[derive(Debug, Error)]
pub enum KvError {
    /// Session lifecycle violated; never retried.
    #[error("session misuse: {0}")]
    Session(SessionMisuse),

    /// The bound topology cannot run this command under this strategy.
    #[error("{command} is not supported by the {topology} topology under {strategy} execution")]
    Unsupported {
        command: ProtocolCommand,
        topology: Topology,
        strategy: Strategy,
    },

    /// Network or IO failure while reading/writing.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Wire framing or parse error.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Server returned an error reply.
    #[error("server error: {message}")]
    Server { message: String },

    /// Reply shape did not match what the command produces.
    #[error("unexpected response for {command}")]
    UnexpectedResponse { command: ProtocolCommand },

    /// The store refused to commit the transaction.
    #[error("transaction aborted")]
    TransactionAborted,

    /// The batch holding this entry was discarded before it ran.
    #[error("batch discarded before execution")]
    Discarded,

    /// The batch transport broke before this entry's reply arrived.
    #[error("transport failure: {0}")]
    Transport(String),

    /// Pool is at capacity and no idle connections are available.
    #[error("connection pool exhausted")]
    PoolExhausted,

    /// Address could not be parsed into a socket address.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// A converter rejected the native value.
    #[error("conversion failed: {0}")]
    Conversion(String),

    /// Configuration is inconsistent or unreadable.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl KvError {
    /// Returns true for session lifecycle violations.
    pub fn is_session_misuse(&self) -> bool {
        matches!(self, KvError::Session(_))
    }

    /// Returns true for topology capability refusals.
    pub fn is_unsupported(&self) -> bool {
        matches!(self, KvError::Unsupported { .. })
    }

    /// Returns the misuse kind, if this is a session error.
    pub fn session_misuse(&self) -> Option<SessionMisuse> {
        match self {
            KvError::Session(kind) => Some(*kind),
            _ => None,
        }
    }

    /// Copies the error for fan-out to several pending entries.
    ///
    /// `std::io::Error` is not `Clone`; IO failures are carried as transport
    /// errors with the same message.
    pub fn duplicate(&self) -> KvError {
        match self {
            KvError::Session(kind) => KvError::Session(*kind),
            KvError::Unsupported {
                command,
                topology,
                strategy,
            } => KvError::Unsupported {
                command: *command,
                topology: *topology,
                strategy: *strategy,
            },
            KvError::Io(err) => KvError::Transport(err.to_string()),
            KvError::Protocol(message) => KvError::Protocol(message.clone()),
            KvError::Server { message } => KvError::Server {
                message: message.clone(),
            },
            KvError::UnexpectedResponse { command } => {
                KvError::UnexpectedResponse { command: *command }
            }
            KvError::TransactionAborted => KvError::TransactionAborted,
            KvError::Discarded => KvError::Discarded,
            KvError::Transport(message) => KvError::Transport(message.clone()),
            KvError::PoolExhausted => KvError::PoolExhausted,
            KvError::InvalidAddress(addr) => KvError::InvalidAddress(addr.clone()),
            KvError::Conversion(message) => KvError::Conversion(message.clone()),
            KvError::Config(message) => KvError::Config(message.clone()),
        }
    }
}

impl From<SessionMisuse> for KvError {
    fn from(kind: SessionMisuse) -> Self {
        KvError::Session(kind)
    }
}
