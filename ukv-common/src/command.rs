//! # Protocol Commands
//!
//! Identifiers for every store command the facade can dispatch. A
//! `ProtocolCommand` is the opaque operation tag carried by each command
//! descriptor: it names the operation in logs and errors, selects the
//! capability rule a topology applies to it, and supplies the wire tokens
//! that open the request.
//!
//! ## Grouping
//!
//! ```text
//! Key         DEL EXISTS EXPIRE TTL KEYS SCAN RANDOMKEY TYPE
//! String      GET SET SETEX INCRBY MGET
//! Hash        HGET HSET HDEL HGETALL
//! List        LPUSH RPUSH LRANGE LLEN
//! Connection  PING ECHO SELECT
//! Server      INFO DBSIZE CONFIG GET / SET FLUSHDB FLUSHALL BGSAVE TIME
//! Cluster     CLUSTER INFO / NODES
//! Transaction MULTI EXEC DISCARD WATCH UNWATCH
//! Sentinel    SENTINEL get-master-addr-by-name
//! ```

use std::fmt;

/// Command family, used for capability rules and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandGroup {
    Key,
    String,
    Hash,
    List,
    Connection,
    Server,
    Cluster,
    Transaction,
    Sentinel,
}

/// Operation identifier for one store command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolCommand {
    Del,
    Exists,
    Expire,
    Ttl,
    Keys,
    Scan,
    RandomKey,
    Type,

    Get,
    Set,
    SetEx,
    IncrBy,
    MGet,

    HGet,
    HSet,
    HDel,
    HGetAll,

    LPush,
    RPush,
    LRange,
    LLen,

    Ping,
    Echo,
    Select,

    Info,
    DbSize,
    ConfigGet,
    ConfigSet,
    FlushDb,
    FlushAll,
    BgSave,
    Time,

    ClusterInfo,
    ClusterNodes,

    Multi,
    Exec,
    Discard,
    Watch,
    Unwatch,

    SentinelGetMasterAddr,
}

impl ProtocolCommand {
    /// Every command, in declaration order.
    pub const ALL: [ProtocolCommand; 40] = [
        Self::Del,
        Self::Exists,
        Self::Expire,
        Self::Ttl,
        Self::Keys,
        Self::Scan,
        Self::RandomKey,
        Self::Type,
        Self::Get,
        Self::Set,
        Self::SetEx,
        Self::IncrBy,
        Self::MGet,
        Self::HGet,
        Self::HSet,
        Self::HDel,
        Self::HGetAll,
        Self::LPush,
        Self::RPush,
        Self::LRange,
        Self::LLen,
        Self::Ping,
        Self::Echo,
        Self::Select,
        Self::Info,
        Self::DbSize,
        Self::ConfigGet,
        Self::ConfigSet,
        Self::FlushDb,
        Self::FlushAll,
        Self::BgSave,
        Self::Time,
        Self::ClusterInfo,
        Self::ClusterNodes,
        Self::Multi,
        Self::Exec,
        Self::Discard,
        Self::Watch,
        Self::Unwatch,
        Self::SentinelGetMasterAddr,
    ];

    /// Leading wire tokens of the request (command name plus subcommand).
    pub const fn wire(self) -> &'static [&'static [u8]] {
        match self {
            Self::Del => &[b"DEL"],
            Self::Exists => &[b"EXISTS"],
            Self::Expire => &[b"EXPIRE"],
            Self::Ttl => &[b"TTL"],
            Self::Keys => &[b"KEYS"],
            Self::Scan => &[b"SCAN"],
            Self::RandomKey => &[b"RANDOMKEY"],
            Self::Type => &[b"TYPE"],
            Self::Get => &[b"GET"],
            Self::Set => &[b"SET"],
            Self::SetEx => &[b"SETEX"],
            Self::IncrBy => &[b"INCRBY"],
            Self::MGet => &[b"MGET"],
            Self::HGet => &[b"HGET"],
            Self::HSet => &[b"HSET"],
            Self::HDel => &[b"HDEL"],
            Self::HGetAll => &[b"HGETALL"],
            Self::LPush => &[b"LPUSH"],
            Self::RPush => &[b"RPUSH"],
            Self::LRange => &[b"LRANGE"],
            Self::LLen => &[b"LLEN"],
            Self::Ping => &[b"PING"],
            Self::Echo => &[b"ECHO"],
            Self::Select => &[b"SELECT"],
            Self::Info => &[b"INFO"],
            Self::DbSize => &[b"DBSIZE"],
            Self::ConfigGet => &[b"CONFIG", b"GET"],
            Self::ConfigSet => &[b"CONFIG", b"SET"],
            Self::FlushDb => &[b"FLUSHDB"],
            Self::FlushAll => &[b"FLUSHALL"],
            Self::BgSave => &[b"BGSAVE"],
            Self::Time => &[b"TIME"],
            Self::ClusterInfo => &[b"CLUSTER", b"INFO"],
            Self::ClusterNodes => &[b"CLUSTER", b"NODES"],
            Self::Multi => &[b"MULTI"],
            Self::Exec => &[b"EXEC"],
            Self::Discard => &[b"DISCARD"],
            Self::Watch => &[b"WATCH"],
            Self::Unwatch => &[b"UNWATCH"],
            Self::SentinelGetMasterAddr => &[b"SENTINEL", b"get-master-addr-by-name"],
        }
    }

    /// Human-readable command name.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Del => "DEL",
            Self::Exists => "EXISTS",
            Self::Expire => "EXPIRE",
            Self::Ttl => "TTL",
            Self::Keys => "KEYS",
            Self::Scan => "SCAN",
            Self::RandomKey => "RANDOMKEY",
            Self::Type => "TYPE",
            Self::Get => "GET",
            Self::Set => "SET",
            Self::SetEx => "SETEX",
            Self::IncrBy => "INCRBY",
            Self::MGet => "MGET",
            Self::HGet => "HGET",
            Self::HSet => "HSET",
            Self::HDel => "HDEL",
            Self::HGetAll => "HGETALL",
            Self::LPush => "LPUSH",
            Self::RPush => "RPUSH",
            Self::LRange => "LRANGE",
            Self::LLen => "LLEN",
            Self::Ping => "PING",
            Self::Echo => "ECHO",
            Self::Select => "SELECT",
            Self::Info => "INFO",
            Self::DbSize => "DBSIZE",
            Self::ConfigGet => "CONFIG GET",
            Self::ConfigSet => "CONFIG SET",
            Self::FlushDb => "FLUSHDB",
            Self::FlushAll => "FLUSHALL",
            Self::BgSave => "BGSAVE",
            Self::Time => "TIME",
            Self::ClusterInfo => "CLUSTER INFO",
            Self::ClusterNodes => "CLUSTER NODES",
            Self::Multi => "MULTI",
            Self::Exec => "EXEC",
            Self::Discard => "DISCARD",
            Self::Watch => "WATCH",
            Self::Unwatch => "UNWATCH",
            Self::SentinelGetMasterAddr => "SENTINEL GET-MASTER-ADDR-BY-NAME",
        }
    }

    /// Command family.
    pub const fn group(self) -> CommandGroup {
        match self {
            Self::Del
            | Self::Exists
            | Self::Expire
            | Self::Ttl
            | Self::Keys
            | Self::Scan
            | Self::RandomKey
            | Self::Type => CommandGroup::Key,
            Self::Get | Self::Set | Self::SetEx | Self::IncrBy | Self::MGet => CommandGroup::String,
            Self::HGet | Self::HSet | Self::HDel | Self::HGetAll => CommandGroup::Hash,
            Self::LPush | Self::RPush | Self::LRange | Self::LLen => CommandGroup::List,
            Self::Ping | Self::Echo | Self::Select => CommandGroup::Connection,
            Self::Info
            | Self::DbSize
            | Self::ConfigGet
            | Self::ConfigSet
            | Self::FlushDb
            | Self::FlushAll
            | Self::BgSave
            | Self::Time => CommandGroup::Server,
            Self::ClusterInfo | Self::ClusterNodes => CommandGroup::Cluster,
            Self::Multi | Self::Exec | Self::Discard | Self::Watch | Self::Unwatch => {
                CommandGroup::Transaction
            }
            Self::SentinelGetMasterAddr => CommandGroup::Sentinel,
        }
    }

    /// Check if command never modifies the keyspace.
    pub const fn is_readonly(self) -> bool {
        matches!(
            self,
            Self::Exists
                | Self::Ttl
                | Self::Keys
                | Self::Scan
                | Self::RandomKey
                | Self::Type
                | Self::Get
                | Self::MGet
                | Self::HGet
                | Self::HGetAll
                | Self::LRange
                | Self::LLen
                | Self::Ping
                | Self::Echo
                | Self::Info
                | Self::DbSize
                | Self::ConfigGet
                | Self::Time
                | Self::ClusterInfo
                | Self::ClusterNodes
                | Self::SentinelGetMasterAddr
        )
    }

    /// Check if command is a server administration operation.
    pub const fn is_admin(self) -> bool {
        matches!(
            self,
            Self::ConfigGet
                | Self::ConfigSet
                | Self::FlushDb
                | Self::FlushAll
                | Self::BgSave
                | Self::ClusterInfo
                | Self::ClusterNodes
        )
    }

    /// Check if command frames a transaction (owned by the batch, not callers).
    pub const fn is_transaction_control(self) -> bool {
        matches!(self, Self::Multi | Self::Exec | Self::Discard)
    }
}

impl fmt::Display for ProtocolCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
