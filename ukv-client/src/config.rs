//! Client configuration: which topology to bind, pool limits, timeouts, key
//! prefix and batch flush policy. Loadable from JSON.

use std::time::Duration;

use serde::Deserialize;

use ukv_common::{KvError, KvResult};

use crate::batch::FlushPolicy;
use crate::pool::PoolConfig;
use crate::topology::{Binding, ClusterBinding, SentinelBinding, StandaloneBinding};

/// Deployment the client connects to.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum TopologyConfig {
    Standalone { addr: String },
    Sentinel { master: String, sentinels: Vec<String> },
    Cluster { nodes: Vec<String> },
}

/// Configuration for `KvClient`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub topology: TopologyConfig,
    /// Maximum idle connections kept per node.
    pub max_idle: usize,
    /// Maximum total connections per node (idle + in-use).
    pub max_total: usize,
    pub read_timeout_ms: Option<u64>,
    pub write_timeout_ms: Option<u64>,
    pub connect_timeout_ms: Option<u64>,
    /// Prepended to every key the client sends.
    pub key_prefix: Option<String>,
    pub flush_policy: FlushPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            topology: TopologyConfig::Standalone {
                addr: "127.0.0.1:6379".to_string(),
            },
            max_idle: 8,
            max_total: 16,
            read_timeout_ms: None,
            write_timeout_ms: None,
            connect_timeout_ms: None,
            key_prefix: None,
            flush_policy: FlushPolicy::OnSync,
        }
    }
}

impl ClientConfig {
    /// Standalone configuration for `addr` with default limits.
    pub fn standalone(addr: impl Into<String>) -> Self {
        ClientConfig {
            topology: TopologyConfig::Standalone { addr: addr.into() },
            ..ClientConfig::default()
        }
    }

    /// Parses and validates a JSON document.
    pub fn from_json(text: &str) -> KvResult<Self> {
        let config: ClientConfig =
            serde_json::from_str(text).map_err(|err| KvError::Config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> KvResult<()> {
        if self.max_total == 0 {
            return Err(KvError::Config("max_total must be at least 1".into()));
        }
        if self.max_idle > self.max_total {
            return Err(KvError::Config(format!(
                "max_idle ({}) exceeds max_total ({})",
                self.max_idle, self.max_total
            )));
        }
        if self.flush_policy == FlushPolicy::Buffered(0) {
            return Err(KvError::Config("buffered flush policy needs a size".into()));
        }
        match &self.topology {
            TopologyConfig::Standalone { addr } if addr.is_empty() => {
                Err(KvError::Config("standalone address is empty".into()))
            }
            TopologyConfig::Sentinel { master, .. } if master.is_empty() => {
                Err(KvError::Config("sentinel master name is empty".into()))
            }
            TopologyConfig::Sentinel { sentinels, .. } if sentinels.is_empty() => {
                Err(KvError::Config("sentinel list is empty".into()))
            }
            TopologyConfig::Cluster { nodes } if nodes.is_empty() => {
                Err(KvError::Config("cluster node list is empty".into()))
            }
            _ => Ok(()),
        }
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout_ms.map(Duration::from_millis)
    }

    pub fn write_timeout(&self) -> Option<Duration> {
        self.write_timeout_ms.map(Duration::from_millis)
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_ms.map(Duration::from_millis)
    }

    /// Pool settings shared by every node; the address is filled per node.
    pub fn pool_template(&self) -> PoolConfig {
        PoolConfig {
            addr: String::new(),
            max_idle: self.max_idle,
            max_total: self.max_total,
            read_timeout: self.read_timeout(),
            write_timeout: self.write_timeout(),
            connect_timeout: self.connect_timeout(),
        }
    }

    /// Builds the binding this configuration describes.
    pub fn build_binding(&self) -> KvResult<Binding> {
        self.validate()?;
        let template = self.pool_template();
        let binding = match &self.topology {
            TopologyConfig::Standalone { addr } => Binding::Standalone(
                StandaloneBinding::new(template.for_addr(addr.as_str()))?
                    .with_flush_policy(self.flush_policy),
            ),
            TopologyConfig::Sentinel { master, sentinels } => Binding::Sentinel(
                SentinelBinding::new(master.as_str(), sentinels.clone(), template)?
                    .with_flush_policy(self.flush_policy),
            ),
            TopologyConfig::Cluster { nodes } => Binding::Cluster(
                ClusterBinding::new(nodes.clone(), template)?.with_flush_policy(self.flush_policy),
            ),
        };
        Ok(binding)
    }
}
