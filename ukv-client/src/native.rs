//! Driver command surface handed to executors.
//!
//! A pooled connection answers immediately; a batch records the request and
//! answers with a pending reply. Executors only see this trait, so one
//! descriptor runs under every strategy.

use ukv_common::ProtocolCommand;
use ukv_dispatch::Invocation;

use crate::pool::PooledConnection;
use crate::resp::RespValue;

/// One request against the bound node: wire tokens of `command` followed by `args`.
pub trait NativeCommands {
    fn call(&mut self, command: ProtocolCommand, args: &[&[u8]]) -> Invocation<RespValue>;
}

impl NativeCommands for PooledConnection {
    fn call(&mut self, command: ProtocolCommand, args: &[&[u8]]) -> Invocation<RespValue> {
        Invocation::ready(self.exec(command, args).and_then(RespValue::into_native))
    }
}
