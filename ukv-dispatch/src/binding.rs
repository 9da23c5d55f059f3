//! # Topology Binding
//!
//! Purpose: Hide the deployment mode behind one seam. A binding knows which
//! driver handle to hand an executor, how to open a batch for a batched
//! strategy, and which commands its topology refuses.
//!
//! ## Design Principles
//! 1. **Composition**: Topology is a binding value and strategy is an enum
//!    argument; the two are combined per call instead of per subclass.
//! 2. **One Handle Type**: Direct and batch handles share `Handle`, so a single
//!    executor runs unchanged under every strategy.
//! 3. **Check Before Acquire**: Capability refusals are raised before any
//!    connection or batch slot is touched.

use std::collections::HashMap;

use ukv_common::{KvError, KvResult, ProtocolCommand, Strategy, Topology};

use crate::descriptor::Operation;

/// A deployment mode the dispatch core can run commands against.
pub trait TopologyBinding {
    /// Driver command surface an executor operates on.
    type Handle: ?Sized;
    /// Open batch for the Pipelined and Transactional strategies.
    type Batch: NativeBatch<Handle = Self::Handle>;

    fn topology(&self) -> Topology;

    fn capabilities(&self) -> &Capabilities;

    /// Runs `f` against a Direct handle suitable for `op`.
    fn with_handle<T>(&self, op: &Operation, f: impl FnOnce(&mut Self::Handle) -> T) -> KvResult<T>;

    /// Opens a batch for a batched strategy.
    fn open_batch(&self, strategy: Strategy) -> KvResult<Self::Batch>;
}

/// Driver-side batch: commands are recorded now and answered at `sync`.
pub trait NativeBatch {
    type Handle: ?Sized;

    /// Runs `f` against the batch handle suitable for `op`.
    fn with_handle<T>(&mut self, op: &Operation, f: impl FnOnce(&mut Self::Handle) -> T) -> KvResult<T>;

    /// Sends the batch and materializes every pending result it produced.
    fn sync(&mut self) -> KvResult<()>;

    /// Abandons the batch; pending results complete with `Discarded`.
    fn discard(&mut self) -> KvResult<()>;
}

/// Strategy mask for capability rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Unsupported(u8);

impl Unsupported {
    pub const NONE: Unsupported = Unsupported(0);
    pub const DIRECT: Unsupported = Unsupported(1);
    pub const PIPELINE: Unsupported = Unsupported(1 << 1);
    pub const TRANSACTION: Unsupported = Unsupported(1 << 2);
    pub const BATCHED: Unsupported = Unsupported(Self::PIPELINE.0 | Self::TRANSACTION.0);
    pub const ALL: Unsupported = Unsupported(Self::DIRECT.0 | Self::BATCHED.0);

    pub const fn of(strategy: Strategy) -> Unsupported {
        match strategy {
            Strategy::Direct => Self::DIRECT,
            Strategy::Pipelined => Self::PIPELINE,
            Strategy::Transactional => Self::TRANSACTION,
        }
    }

    pub const fn union(self, other: Unsupported) -> Unsupported {
        Unsupported(self.0 | other.0)
    }

    pub const fn without(self, other: Unsupported) -> Unsupported {
        Unsupported(self.0 & !other.0)
    }

    pub const fn contains(self, other: Unsupported) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

/// Per-topology table of refused commands.
#[derive(Debug, Clone)]
pub struct Capabilities {
    topology: Topology,
    rules: HashMap<ProtocolCommand, Unsupported>,
}

impl Capabilities {
    /// Table that refuses nothing except batch-owned control commands.
    pub fn permissive(topology: Topology) -> Self {
        Capabilities {
            topology,
            rules: HashMap::new(),
        }
    }

    /// Default rules for a topology.
    pub fn for_topology(topology: Topology) -> Self {
        use ProtocolCommand::*;

        let caps = Capabilities::permissive(topology);
        match topology {
            Topology::Standalone => caps,
            Topology::Sentinel => caps
                .deny(ClusterInfo, Unsupported::ALL)
                .deny(ClusterNodes, Unsupported::ALL)
                .deny(ConfigSet, Unsupported::ALL)
                .deny(FlushAll, Unsupported::ALL)
                .deny(BgSave, Unsupported::ALL),
            Topology::Cluster => caps
                .deny(Select, Unsupported::ALL)
                .deny(FlushAll, Unsupported::ALL)
                .deny(BgSave, Unsupported::ALL)
                .deny(ConfigSet, Unsupported::ALL)
                .deny(Keys, Unsupported::BATCHED)
                .deny(Scan, Unsupported::BATCHED)
                .deny(RandomKey, Unsupported::BATCHED)
                .deny(DbSize, Unsupported::BATCHED),
        }
    }

    pub fn topology(&self) -> Topology {
        self.topology
    }

    /// Refuses `command` under the strategies in `mask`.
    pub fn deny(mut self, command: ProtocolCommand, mask: Unsupported) -> Self {
        let rule = self.rules.entry(command).or_insert(Unsupported::NONE);
        *rule = rule.union(mask);
        self
    }

    /// Lifts a refusal for the strategies in `mask`.
    pub fn allow(mut self, command: ProtocolCommand, mask: Unsupported) -> Self {
        if let Some(rule) = self.rules.get_mut(&command) {
            *rule = rule.without(mask);
            if rule.is_empty() {
                self.rules.remove(&command);
            }
        }
        self
    }

    pub fn supports(&self, command: ProtocolCommand, strategy: Strategy) -> bool {
        if strategy.is_batched() && command.is_transaction_control() {
            return false;
        }
        self.rules
            .get(&command)
            .map_or(true, |rule| !rule.contains(Unsupported::of(strategy)))
    }

    /// Fails with `Unsupported` when the topology refuses `command` under `strategy`.
    pub fn check(&self, command: ProtocolCommand, strategy: Strategy) -> KvResult<()> {
        if self.supports(command, strategy) {
            Ok(())
        } else {
            Err(KvError::Unsupported {
                command,
                topology: self.topology,
                strategy,
            })
        }
    }
}
