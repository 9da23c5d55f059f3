//! # UnifiedKV Client
//!
//! Purpose: A synchronous Redis-compatible client that runs every command
//! through the dispatch core, directly or inside a pipeline or transaction,
//! against a standalone node, a sentinel-managed master, or a cluster.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: Reuse TCP connections per node.
//! 2. **Descriptor Per Command**: `Commands` builds executor/converter pairs
//!    once; strategies decide when they run.
//! 3. **Protocol Clarity**: Encode/parse RESP2 explicitly for correctness.
//! 4. **Configurable Topology**: `ClientConfig` picks the binding at runtime.

mod batch;
mod client;
mod commands;
mod config;
mod native;
mod pool;
mod resp;
mod topology;

pub use batch::{BatchMode, FlushPolicy, RespBatch};
pub use client::{Batch, KvClient};
pub use commands::{ClientCommand, Commands};
pub use config::{ClientConfig, TopologyConfig};
pub use native::NativeCommands;
pub use pool::{ConnectionPool, PoolConfig, PooledConnection};
pub use resp::RespValue;
pub use topology::{
    AnyBatch, Binding, ClusterBatch, ClusterBinding, KeyHashLocator, NodeLocator, SentinelBinding,
    StandaloneBinding,
};

pub use ukv_common::{KvError, KvResult, Status, Strategy, Topology, Ttl, Value};
pub use ukv_dispatch::{Capabilities, Unsupported};
