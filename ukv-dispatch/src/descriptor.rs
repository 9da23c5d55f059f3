//! # Command Descriptors
//!
//! A descriptor pairs an operation identifier with the executor that runs it
//! and the converter that shapes its reply. Each per-command method builds one
//! descriptor and hands it to whichever strategy is active; the descriptor
//! itself does not know whether it will run now or at flush.

use std::fmt;

use bytes::Bytes;

use ukv_common::ProtocolCommand;

use crate::converter::Converter;
use crate::executor::{Executor, Invocation};

/// Operation identifier: the command, its routing key and diagnostic arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    command: ProtocolCommand,
    key: Option<Bytes>,
    args: Vec<(&'static str, String)>,
}

impl Operation {
    pub fn new(command: ProtocolCommand) -> Self {
        Operation {
            command,
            key: None,
            args: Vec::new(),
        }
    }

    /// Sets the key used to route the operation to a node.
    pub fn with_key(mut self, key: impl Into<Bytes>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Records a named argument for logs and errors.
    pub fn arg(mut self, name: &'static str, value: impl fmt::Display) -> Self {
        self.args.push((name, value.to_string()));
        self
    }

    pub fn command(&self) -> ProtocolCommand {
        self.command
    }

    pub fn key(&self) -> Option<&[u8]> {
        self.key.as_deref()
    }

    pub fn args(&self) -> &[(&'static str, String)] {
        &self.args
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.command)?;
        if let Some(key) = &self.key {
            write!(f, " key={}", String::from_utf8_lossy(key))?;
        }
        for (name, value) in &self.args {
            write!(f, " {}={}", name, value)?;
        }
        Ok(())
    }
}

impl From<ProtocolCommand> for Operation {
    fn from(command: ProtocolCommand) -> Self {
        Operation::new(command)
    }
}

/// Command descriptor for handle type `H`, native type `N`, public type `P`.
pub struct Command<H: ?Sized, N, P> {
    operation: Operation,
    executor: Executor<H, N>,
    converter: Converter<N, P>,
}

impl<H: ?Sized, N, P> Command<H, N, P> {
    pub fn new(operation: impl Into<Operation>, executor: Executor<H, N>, converter: Converter<N, P>) -> Self {
        Command {
            operation: operation.into(),
            executor,
            converter,
        }
    }

    /// Builds a descriptor from closures.
    pub fn from_fn<E, C>(operation: impl Into<Operation>, execute: E, convert: C) -> Self
    where
        E: FnOnce(&mut H) -> Invocation<N> + Send + 'static,
        C: FnOnce(N) -> P + Send + 'static,
        N: 'static,
        P: 'static,
    {
        Command::new(operation, Executor::new(execute), Converter::new(convert))
    }

    pub fn operation(&self) -> &Operation {
        &self.operation
    }

    pub fn command(&self) -> ProtocolCommand {
        self.operation.command
    }

    /// Splits the descriptor for execution.
    pub fn into_parts(self) -> (Operation, Executor<H, N>, Converter<N, P>) {
        (self.operation, self.executor, self.converter)
    }
}

impl<H: ?Sized, N: 'static> Command<H, N, N> {
    /// Descriptor whose native value is already the public value.
    pub fn identity<E>(operation: impl Into<Operation>, execute: E) -> Self
    where
        E: FnOnce(&mut H) -> Invocation<N> + Send + 'static,
    {
        Command::new(operation, Executor::new(execute), Converter::identity())
    }
}

impl<H: ?Sized, N, P> fmt::Debug for Command<H, N, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("operation", &self.operation)
            .finish()
    }
}
