//! # Client Facade
//!
//! Purpose: Expose a compact, blocking API over any topology, with pipelines
//! and transactions as explicit batch objects.
//!
//! ## Design Principles
//! 1. **Facade Pattern**: `KvClient` hides bindings, pools and the protocol.
//! 2. **Explicit Batches**: `pipeline()` and `transaction()` return a `Batch`
//!    that owns the session; there is no hidden "current pipeline".
//! 3. **One Descriptor Set**: Direct calls and batches both take descriptors
//!    from `Commands`, so conversion is identical under every strategy.

use std::time::Duration;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use ukv_common::{KvError, KvResult, ProtocolCommand, Strategy, Topology, Ttl, Value};
use ukv_dispatch::{Dispatcher, Session, TopologyBinding};

use crate::commands::{ClientCommand, Commands};
use crate::config::ClientConfig;
use crate::topology::Binding;

/// Blocking client over a standalone, sentinel or cluster deployment.
#[derive(Debug)]
pub struct KvClient {
    dispatcher: Dispatcher<Binding>,
    commands: Commands,
}

impl KvClient {
    /// Connects to a standalone node with default settings.
    pub fn connect(addr: impl Into<String>) -> KvResult<Self> {
        Self::with_config(ClientConfig::standalone(addr))
    }

    pub fn with_config(config: ClientConfig) -> KvResult<Self> {
        let binding = config.build_binding()?;
        debug!(target: "ukv::client", topology = %binding.topology(), "client ready");
        Ok(Self::with_binding(binding, config.key_prefix.as_deref()))
    }

    /// Wraps an already built binding.
    pub fn with_binding(binding: Binding, key_prefix: Option<&str>) -> Self {
        KvClient {
            dispatcher: Dispatcher::new(binding),
            commands: Commands::new(key_prefix),
        }
    }

    pub fn topology(&self) -> Topology {
        self.dispatcher.binding().topology()
    }

    pub fn binding(&self) -> &Binding {
        self.dispatcher.binding()
    }

    /// Descriptor constructors with this client's key prefix.
    pub fn commands(&self) -> &Commands {
        &self.commands
    }

    /// Runs a descriptor now.
    pub fn execute<P>(&self, command: ClientCommand<P>) -> KvResult<Option<P>> {
        self.dispatcher.execute(command)
    }

    /// Opens a pipeline. Only one batch may be open per client.
    pub fn pipeline(&self) -> KvResult<Batch<'_>> {
        Ok(Batch {
            session: self.dispatcher.begin_pipeline()?,
            commands: &self.commands,
        })
    }

    /// Opens a MULTI/EXEC transaction. Only one batch may be open per client.
    pub fn transaction(&self) -> KvResult<Batch<'_>> {
        Ok(Batch {
            session: self.dispatcher.begin_transaction()?,
            commands: &self.commands,
        })
    }

    /// Re-resolves the sentinel master; returns true if it moved.
    pub fn refresh_topology(&self) -> KvResult<bool> {
        self.dispatcher.binding().refresh()
    }

    /// Returns `Ok(None)` when the key is missing.
    pub fn get(&self, key: &[u8]) -> KvResult<Option<Bytes>> {
        self.execute(self.commands.get(key))
    }

    pub fn set(&self, key: &[u8], value: impl Into<Bytes>) -> KvResult<()> {
        self.execute(self.commands.set(key, value)).map(|_| ())
    }

    pub fn set_with_ttl(&self, key: &[u8], value: impl Into<Bytes>, ttl: Duration) -> KvResult<()> {
        self.execute(self.commands.set_ex(key, value, ttl)).map(|_| ())
    }

    /// Returns true when a key was removed.
    pub fn delete(&self, key: &[u8]) -> KvResult<bool> {
        Ok(self.execute(self.commands.del(key))?.unwrap_or(false))
    }

    pub fn exists(&self, key: &[u8]) -> KvResult<bool> {
        Ok(self.execute(self.commands.exists(key))?.unwrap_or(false))
    }

    pub fn incr_by(&self, key: &[u8], by: i64) -> KvResult<i64> {
        self.execute(self.commands.incr_by(key, by))?
            .ok_or(KvError::UnexpectedResponse {
                command: ProtocolCommand::IncrBy,
            })
    }

    /// Returns true when the TTL was set.
    pub fn expire(&self, key: &[u8], ttl: Duration) -> KvResult<bool> {
        Ok(self.execute(self.commands.expire(key, ttl))?.unwrap_or(false))
    }

    pub fn ttl(&self, key: &[u8]) -> KvResult<Ttl> {
        Ok(self.execute(self.commands.ttl(key))?.unwrap_or(Ttl::Missing))
    }

    /// Returns the raw reply payload.
    pub fn ping(&self, payload: Option<&[u8]>) -> KvResult<Bytes> {
        Ok(self.execute(self.commands.ping(payload))?.unwrap_or_default())
    }

    pub fn info(&self, section: Option<&str>) -> KvResult<String> {
        Ok(self.execute(self.commands.info(section))?.unwrap_or_default())
    }

    pub fn get_json<T: DeserializeOwned + 'static>(&self, key: &[u8]) -> KvResult<Option<T>> {
        self.execute(self.commands.get_json(key))
    }

    pub fn set_json<T: Serialize + ?Sized>(&self, key: &[u8], value: &T) -> KvResult<()> {
        self.execute(self.commands.set_json(key, value)?).map(|_| ())
    }
}

/// Open pipeline or transaction. Dropping it unflushed discards it.
#[derive(Debug)]
pub struct Batch<'c> {
    session: Session<'c, Binding, Value>,
    commands: &'c Commands,
}

impl<'c> Batch<'c> {
    pub fn strategy(&self) -> Strategy {
        self.session.strategy()
    }

    /// Descriptor constructors with the client's key prefix.
    pub fn commands(&self) -> &'c Commands {
        self.commands
    }

    /// Queues a descriptor; returns its position in the flushed results.
    pub fn enqueue<P>(&mut self, command: ClientCommand<P>) -> KvResult<usize>
    where
        P: Into<Value> + 'static,
    {
        self.session.enqueue(command)
    }

    pub fn get(&mut self, key: &[u8]) -> KvResult<usize> {
        let command = self.commands.get(key);
        self.enqueue(command)
    }

    pub fn set(&mut self, key: &[u8], value: impl Into<Bytes>) -> KvResult<usize> {
        let command = self.commands.set(key, value);
        self.enqueue(command)
    }

    pub fn incr_by(&mut self, key: &[u8], by: i64) -> KvResult<usize> {
        let command = self.commands.incr_by(key, by);
        self.enqueue(command)
    }

    pub fn del(&mut self, key: &[u8]) -> KvResult<usize> {
        let command = self.commands.del(key);
        self.enqueue(command)
    }

    pub fn len(&self) -> usize {
        self.session.len()
    }

    pub fn is_empty(&self) -> bool {
        self.session.is_empty()
    }

    pub fn is_open(&self) -> bool {
        self.session.is_open()
    }

    /// Sends the batch; one result per queued command, in order.
    pub fn flush(&mut self) -> KvResult<Vec<KvResult<Option<Value>>>> {
        self.session.flush()
    }

    /// Alias of `flush` for transactions.
    pub fn commit(&mut self) -> KvResult<Vec<KvResult<Option<Value>>>> {
        self.flush()
    }

    pub fn discard(&mut self) -> KvResult<()> {
        self.session.discard()
    }
}
