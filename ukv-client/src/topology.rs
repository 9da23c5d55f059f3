//! # Topology Bindings
//!
//! Purpose: Connect the dispatch core to a standalone node, a sentinel-managed
//! master, or a cluster of nodes.
//!
//! ## Design Principles
//! 1. **One Handle Type**: Every binding hands executors `dyn NativeCommands`,
//!    backed by a pooled connection (Direct) or a `RespBatch` (batched).
//! 2. **Routing Is Pluggable**: Cluster node choice is delegated to a
//!    `NodeLocator`; slot maps are out of scope.
//! 3. **Failover by Refresh**: The sentinel binding re-resolves the master on
//!    demand instead of tracking it in the background.

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use ukv_common::{KvError, KvResult, ProtocolCommand, Strategy, Topology};
use ukv_dispatch::{Capabilities, NativeBatch, Operation, TopologyBinding};

use crate::batch::{BatchMode, FlushPolicy, RespBatch};
use crate::native::NativeCommands;
use crate::pool::{Connection, ConnectionPool, PoolConfig};
use crate::resp::RespValue;

impl NativeBatch for RespBatch {
    type Handle = dyn NativeCommands;

    fn with_handle<T>(&mut self, _op: &Operation, f: impl FnOnce(&mut Self::Handle) -> T) -> KvResult<T> {
        Ok(f(self))
    }

    fn sync(&mut self) -> KvResult<()> {
        RespBatch::sync(self)
    }

    fn discard(&mut self) -> KvResult<()> {
        RespBatch::discard(self)
    }
}

/// One node behind one pool.
#[derive(Debug, Clone)]
pub struct StandaloneBinding {
    pool: ConnectionPool,
    caps: Capabilities,
    policy: FlushPolicy,
}

impl StandaloneBinding {
    pub fn new(config: PoolConfig) -> KvResult<Self> {
        Ok(StandaloneBinding {
            pool: ConnectionPool::new(config)?,
            caps: Capabilities::for_topology(Topology::Standalone),
            policy: FlushPolicy::default(),
        })
    }

    pub fn with_flush_policy(mut self, policy: FlushPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_capabilities(mut self, caps: Capabilities) -> Self {
        self.caps = caps;
        self
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }
}

impl TopologyBinding for StandaloneBinding {
    type Handle = dyn NativeCommands;
    type Batch = RespBatch;

    fn topology(&self) -> Topology {
        Topology::Standalone
    }

    fn capabilities(&self) -> &Capabilities {
        &self.caps
    }

    fn with_handle<T>(&self, _op: &Operation, f: impl FnOnce(&mut Self::Handle) -> T) -> KvResult<T> {
        let mut conn = self.pool.acquire()?;
        Ok(f(&mut conn))
    }

    fn open_batch(&self, strategy: Strategy) -> KvResult<RespBatch> {
        let mode = BatchMode::for_strategy(strategy)?;
        Ok(RespBatch::new(self.pool.acquire()?, mode, self.policy))
    }
}

/// Master discovered through sentinels.
pub struct SentinelBinding {
    master: String,
    sentinels: Vec<String>,
    template: PoolConfig,
    pool: RwLock<ConnectionPool>,
    caps: Capabilities,
    policy: FlushPolicy,
}

impl SentinelBinding {
    /// Resolves the current master of `master` and pools connections to it.
    ///
    /// `template` supplies pool limits and timeouts; its address is ignored.
    pub fn new(master: impl Into<String>, sentinels: Vec<String>, template: PoolConfig) -> KvResult<Self> {
        let master = master.into();
        if sentinels.is_empty() {
            return Err(KvError::Config("at least one sentinel address is required".into()));
        }
        let addr = resolve_master(&master, &sentinels, &template)?;
        let pool = ConnectionPool::new(template.for_addr(addr))?;
        Ok(SentinelBinding {
            master,
            sentinels,
            template,
            pool: RwLock::new(pool),
            caps: Capabilities::for_topology(Topology::Sentinel),
            policy: FlushPolicy::default(),
        })
    }

    pub fn with_flush_policy(mut self, policy: FlushPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_capabilities(mut self, caps: Capabilities) -> Self {
        self.caps = caps;
        self
    }

    /// Address of the master currently in use.
    pub fn master_addr(&self) -> String {
        self.pool.read().addr().to_string()
    }

    /// Asks the sentinels again and switches pools if the master moved.
    pub fn refresh(&self) -> KvResult<bool> {
        let addr = resolve_master(&self.master, &self.sentinels, &self.template)?;
        if addr == self.pool.read().addr() {
            return Ok(false);
        }
        debug!(target: "ukv::sentinel", master = %self.master, addr = %addr, "master moved");
        *self.pool.write() = ConnectionPool::new(self.template.for_addr(addr))?;
        Ok(true)
    }

    fn current(&self) -> ConnectionPool {
        self.pool.read().clone()
    }
}

impl TopologyBinding for SentinelBinding {
    type Handle = dyn NativeCommands;
    type Batch = RespBatch;

    fn topology(&self) -> Topology {
        Topology::Sentinel
    }

    fn capabilities(&self) -> &Capabilities {
        &self.caps
    }

    fn with_handle<T>(&self, _op: &Operation, f: impl FnOnce(&mut Self::Handle) -> T) -> KvResult<T> {
        let mut conn = self.current().acquire()?;
        Ok(f(&mut conn))
    }

    fn open_batch(&self, strategy: Strategy) -> KvResult<RespBatch> {
        let mode = BatchMode::for_strategy(strategy)?;
        Ok(RespBatch::new(self.current().acquire()?, mode, self.policy))
    }
}

impl fmt::Debug for SentinelBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SentinelBinding")
            .field("master", &self.master)
            .field("sentinels", &self.sentinels)
            .field("addr", &self.master_addr())
            .finish()
    }
}

fn resolve_master(master: &str, sentinels: &[String], template: &PoolConfig) -> KvResult<String> {
    let mut last_err = None;
    for sentinel in sentinels {
        match ask_sentinel(master, &template.for_addr(sentinel.as_str())) {
            Ok(Some(addr)) => {
                debug!(target: "ukv::sentinel", sentinel = %sentinel, master, addr = %addr, "master resolved");
                return Ok(addr);
            }
            Ok(None) => {
                debug!(target: "ukv::sentinel", sentinel = %sentinel, master, "sentinel does not know master");
            }
            Err(err) => {
                warn!(target: "ukv::sentinel", sentinel = %sentinel, error = %err, "sentinel unreachable");
                last_err = Some(err);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| {
        KvError::Config(format!("no sentinel knows a master named {}", master))
    }))
}

fn ask_sentinel(master: &str, config: &PoolConfig) -> KvResult<Option<String>> {
    let mut conn = Connection::connect(config)?;
    let reply = conn.exec(ProtocolCommand::SentinelGetMasterAddr, &[master.as_bytes()])?;
    match reply {
        RespValue::Nil => Ok(None),
        RespValue::Array(items) => match items.as_slice() {
            [RespValue::Bulk(host), RespValue::Bulk(port)] => Ok(Some(format!(
                "{}:{}",
                String::from_utf8_lossy(host),
                String::from_utf8_lossy(port)
            ))),
            _ => Err(KvError::UnexpectedResponse {
                command: ProtocolCommand::SentinelGetMasterAddr,
            }),
        },
        other => other
            .into_native()
            .and(Err(KvError::UnexpectedResponse {
                command: ProtocolCommand::SentinelGetMasterAddr,
            })),
    }
}

/// Chooses the cluster node for an operation.
pub trait NodeLocator: Send + Sync {
    /// Index in `0..nodes` for `key`; keyless operations pass `None`.
    fn locate(&self, key: Option<&[u8]>, nodes: usize) -> usize;
}

impl<F> NodeLocator for F
where
    F: Fn(Option<&[u8]>, usize) -> usize + Send + Sync,
{
    fn locate(&self, key: Option<&[u8]>, nodes: usize) -> usize {
        self(key, nodes)
    }
}

/// Hashes the key over the node list; keyless operations go to the first node.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyHashLocator;

impl NodeLocator for KeyHashLocator {
    fn locate(&self, key: Option<&[u8]>, nodes: usize) -> usize {
        match key {
            Some(key) if nodes > 1 => {
                let mut hasher = DefaultHasher::new();
                hash_tag(key).hash(&mut hasher);
                (hasher.finish() % nodes as u64) as usize
            }
            _ => 0,
        }
    }
}

/// `{tag}` section of a key, so related keys land on the same node.
fn hash_tag(key: &[u8]) -> &[u8] {
    if let Some(open) = key.iter().position(|&b| b == b'{') {
        if let Some(len) = key[open + 1..].iter().position(|&b| b == b'}') {
            if len > 0 {
                return &key[open + 1..open + 1 + len];
            }
        }
    }
    key
}

struct ClusterShared {
    pools: Vec<ConnectionPool>,
    locator: Box<dyn NodeLocator>,
    policy: FlushPolicy,
}

impl ClusterShared {
    fn node_for(&self, op: &Operation) -> usize {
        self.locator
            .locate(op.key(), self.pools.len())
            .min(self.pools.len() - 1)
    }
}

/// Several nodes, one pool each.
pub struct ClusterBinding {
    shared: Arc<ClusterShared>,
    caps: Capabilities,
}

impl ClusterBinding {
    pub fn new(nodes: Vec<String>, template: PoolConfig) -> KvResult<Self> {
        Self::with_locator(nodes, template, KeyHashLocator)
    }

    pub fn with_locator(
        nodes: Vec<String>,
        template: PoolConfig,
        locator: impl NodeLocator + 'static,
    ) -> KvResult<Self> {
        if nodes.is_empty() {
            return Err(KvError::Config("cluster needs at least one node".into()));
        }
        let pools = nodes
            .into_iter()
            .map(|addr| ConnectionPool::new(template.for_addr(addr)))
            .collect::<KvResult<Vec<_>>>()?;
        Ok(ClusterBinding {
            shared: Arc::new(ClusterShared {
                pools,
                locator: Box::new(locator),
                policy: FlushPolicy::default(),
            }),
            caps: Capabilities::for_topology(Topology::Cluster),
        })
    }

    pub fn with_flush_policy(mut self, policy: FlushPolicy) -> Self {
        if let Some(shared) = Arc::get_mut(&mut self.shared) {
            shared.policy = policy;
        }
        self
    }

    pub fn with_capabilities(mut self, caps: Capabilities) -> Self {
        self.caps = caps;
        self
    }

    pub fn nodes(&self) -> impl Iterator<Item = &str> {
        self.shared.pools.iter().map(|pool| pool.addr())
    }
}

impl TopologyBinding for ClusterBinding {
    type Handle = dyn NativeCommands;
    type Batch = ClusterBatch;

    fn topology(&self) -> Topology {
        Topology::Cluster
    }

    fn capabilities(&self) -> &Capabilities {
        &self.caps
    }

    fn with_handle<T>(&self, op: &Operation, f: impl FnOnce(&mut Self::Handle) -> T) -> KvResult<T> {
        let node = self.shared.node_for(op);
        let mut conn = self.shared.pools[node].acquire()?;
        Ok(f(&mut conn))
    }

    fn open_batch(&self, strategy: Strategy) -> KvResult<ClusterBatch> {
        Ok(ClusterBatch {
            shared: self.shared.clone(),
            mode: BatchMode::for_strategy(strategy)?,
            batches: Vec::new(),
        })
    }
}

impl fmt::Debug for ClusterBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterBinding")
            .field("nodes", &self.nodes().collect::<Vec<_>>())
            .finish()
    }
}

/// Per-node sub-batches opened on first use.
///
/// Transactions are pinned to the node of their first command.
pub struct ClusterBatch {
    shared: Arc<ClusterShared>,
    mode: BatchMode,
    batches: Vec<(usize, RespBatch)>,
}

impl ClusterBatch {
    fn batch_for(&mut self, op: &Operation) -> KvResult<&mut RespBatch> {
        let node = self.shared.node_for(op);
        if self.mode == BatchMode::Transaction {
            if let Some((pinned, _)) = self.batches.first() {
                if *pinned != node {
                    return Err(KvError::Unsupported {
                        command: op.command(),
                        topology: Topology::Cluster,
                        strategy: Strategy::Transactional,
                    });
                }
            }
        }
        let position = match self.batches.iter().position(|(id, _)| *id == node) {
            Some(position) => position,
            None => {
                let conn = self.shared.pools[node].acquire()?;
                self.batches
                    .push((node, RespBatch::new(conn, self.mode, self.shared.policy)));
                self.batches.len() - 1
            }
        };
        Ok(&mut self.batches[position].1)
    }

    /// Nodes touched so far, in first-use order.
    pub fn nodes(&self) -> Vec<&str> {
        self.batches.iter().map(|(_, batch)| batch.addr()).collect()
    }
}

impl NativeBatch for ClusterBatch {
    type Handle = dyn NativeCommands;

    fn with_handle<T>(&mut self, op: &Operation, f: impl FnOnce(&mut Self::Handle) -> T) -> KvResult<T> {
        let batch = self.batch_for(op)?;
        Ok(f(batch))
    }

    fn sync(&mut self) -> KvResult<()> {
        let mut first_err = None;
        for (_, batch) in &mut self.batches {
            if let Err(err) = batch.sync() {
                // Entries of the failed node already carry the error.
                if self.mode == BatchMode::Pipeline {
                    warn!(target: "ukv::cluster", addr = %batch.addr(), error = %err, "node pipeline failed");
                } else if first_err.is_none() {
                    first_err = Some(err);
                }
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    fn discard(&mut self) -> KvResult<()> {
        let mut first_err = None;
        for (_, batch) in &mut self.batches {
            if let Err(err) = batch.discard() {
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

impl fmt::Debug for ClusterBatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterBatch")
            .field("mode", &self.mode)
            .field("nodes", &self.nodes())
            .finish()
    }
}

/// Any of the three bindings, chosen at runtime from configuration.
#[derive(Debug)]
pub enum Binding {
    Standalone(StandaloneBinding),
    Sentinel(SentinelBinding),
    Cluster(ClusterBinding),
}

/// Batch of whichever binding opened it.
#[derive(Debug)]
pub enum AnyBatch {
    Node(RespBatch),
    Cluster(ClusterBatch),
}

impl Binding {
    /// Re-resolves the sentinel master; a no-op for other topologies.
    pub fn refresh(&self) -> KvResult<bool> {
        match self {
            Binding::Sentinel(binding) => binding.refresh(),
            _ => Ok(false),
        }
    }
}

impl TopologyBinding for Binding {
    type Handle = dyn NativeCommands;
    type Batch = AnyBatch;

    fn topology(&self) -> Topology {
        match self {
            Binding::Standalone(binding) => binding.topology(),
            Binding::Sentinel(binding) => binding.topology(),
            Binding::Cluster(binding) => binding.topology(),
        }
    }

    fn capabilities(&self) -> &Capabilities {
        match self {
            Binding::Standalone(binding) => binding.capabilities(),
            Binding::Sentinel(binding) => binding.capabilities(),
            Binding::Cluster(binding) => binding.capabilities(),
        }
    }

    fn with_handle<T>(&self, op: &Operation, f: impl FnOnce(&mut Self::Handle) -> T) -> KvResult<T> {
        match self {
            Binding::Standalone(binding) => binding.with_handle(op, f),
            Binding::Sentinel(binding) => binding.with_handle(op, f),
            Binding::Cluster(binding) => binding.with_handle(op, f),
        }
    }

    fn open_batch(&self, strategy: Strategy) -> KvResult<AnyBatch> {
        match self {
            Binding::Standalone(binding) => binding.open_batch(strategy).map(AnyBatch::Node),
            Binding::Sentinel(binding) => binding.open_batch(strategy).map(AnyBatch::Node),
            Binding::Cluster(binding) => binding.open_batch(strategy).map(AnyBatch::Cluster),
        }
    }
}

impl NativeBatch for AnyBatch {
    type Handle = dyn NativeCommands;

    fn with_handle<T>(&mut self, op: &Operation, f: impl FnOnce(&mut Self::Handle) -> T) -> KvResult<T> {
        match self {
            AnyBatch::Node(batch) => NativeBatch::with_handle(batch, op, f),
            AnyBatch::Cluster(batch) => batch.with_handle(op, f),
        }
    }

    fn sync(&mut self) -> KvResult<()> {
        match self {
            AnyBatch::Node(batch) => batch.sync(),
            AnyBatch::Cluster(batch) => NativeBatch::sync(batch),
        }
    }

    fn discard(&mut self) -> KvResult<()> {
        match self {
            AnyBatch::Node(batch) => batch.discard(),
            AnyBatch::Cluster(batch) => NativeBatch::discard(batch),
        }
    }
}
