//! # Shared Type Definitions
//!
//! The two orthogonal dispatch choices (`Topology`, `Strategy`) and the public
//! result values the facade hands back to callers.
//!
//! ## Design Principles
//!
//! 1. **Orthogonal Choices**: Topology and strategy are independent enums,
//!    combined at the call site instead of encoded in a type hierarchy.
//! 2. **Binary-Safe Values**: Payloads are `Bytes` so replies are shared
//!    without copying.
//! 3. **One Sequence Type**: Batched results are reported as `Value` so a
//!    flushed session can return heterogeneous replies in order.

use std::fmt;
use std::time::Duration;

use bytes::Bytes;

/// Deployment mode of the store behind a logical client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topology {
    /// Single node.
    Standalone,
    /// Failover-aware single logical node, discovered through sentinels.
    Sentinel,
    /// Sharded multi-node deployment.
    Cluster,
}

impl Topology {
    pub const fn name(self) -> &'static str {
        match self {
            Topology::Standalone => "standalone",
            Topology::Sentinel => "sentinel",
            Topology::Cluster => "cluster",
        }
    }
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// When a command runs and when its converter is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    /// Run now, convert now.
    Direct,
    /// Batch client-side, resolve at flush.
    Pipelined,
    /// Batch inside MULTI/EXEC on the store, resolve at commit.
    Transactional,
}

impl Strategy {
    pub const fn name(self) -> &'static str {
        match self {
            Strategy::Direct => "direct",
            Strategy::Pipelined => "pipelined",
            Strategy::Transactional => "transactional",
        }
    }

    /// Returns true when results are deferred to a session flush.
    pub const fn is_batched(self) -> bool {
        matches!(self, Strategy::Pipelined | Strategy::Transactional)
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome of a command that only acknowledges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Success,
    Failure,
}

impl Status {
    pub fn is_success(self) -> bool {
        self == Status::Success
    }
}

impl From<bool> for Status {
    fn from(ok: bool) -> Self {
        if ok {
            Status::Success
        } else {
            Status::Failure
        }
    }
}

/// TTL state returned by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    /// Key is missing or already expired.
    Missing,
    /// Key exists without expiration.
    NoExpiry,
    /// Key expires after the provided duration.
    ExpiresIn(Duration),
}

impl Ttl {
    /// Decodes the integer TTL reply (-2 missing, -1 persistent).
    pub fn from_seconds(value: i64) -> Option<Self> {
        match value {
            -2 => Some(Ttl::Missing),
            -1 => Some(Ttl::NoExpiry),
            secs if secs >= 0 => Some(Ttl::ExpiresIn(Duration::from_secs(secs as u64))),
            _ => None,
        }
    }
}

/// Public result value reported by flushed sessions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Status(Status),
    Integer(i64),
    Bool(bool),
    Bytes(Bytes),
    Text(String),
    Ttl(Ttl),
    List(Vec<Value>),
}

impl Value {
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(data) => Some(data),
            Value::Text(text) => Some(text.as_bytes()),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(value) => Some(*value),
            _ => None,
        }
    }
}

impl From<Status> for Value {
    fn from(status: Status) -> Self {
        Value::Status(status)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<Bytes> for Value {
    fn from(data: Bytes) -> Self {
        Value::Bytes(data)
    }
}

impl From<String> for Value {
    fn from(text: String) -> Self {
        Value::Text(text)
    }
}

impl From<Ttl> for Value {
    fn from(ttl: Ttl) -> Self {
        Value::Ttl(ttl)
    }
}

impl<A: Into<Value>, B: Into<Value>> From<(A, B)> for Value {
    fn from((first, second): (A, B)) -> Self {
        Value::List(vec![first.into(), second.into()])
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }
}
