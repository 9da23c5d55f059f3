//! # Deferred Results
//!
//! A deferred result is a command that has been handed to a batch but whose
//! reply has not been read yet. It carries the pending native result and the
//! converter that will shape it, and is resolved once when its session flushes.

use std::fmt;

use ukv_common::KvResult;

use crate::converter::Converter;
use crate::descriptor::Operation;
use crate::pending::Pending;

/// Pending native result paired with the converter that finishes it.
pub struct Deferred<N, P> {
    operation: Operation,
    pending: Pending<N>,
    converter: Converter<N, P>,
}

impl<N, P> Deferred<N, P> {
    pub fn new(operation: Operation, pending: Pending<N>, converter: Converter<N, P>) -> Self {
        Deferred {
            operation,
            pending,
            converter,
        }
    }

    pub fn operation(&self) -> &Operation {
        &self.operation
    }

    /// Waits for the native result and converts it. Nulls skip conversion.
    pub fn resolve(self) -> KvResult<Option<P>> {
        let native = self.pending.wait()?;
        self.converter.apply(native)
    }
}

impl<N, P> fmt::Debug for Deferred<N, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferred")
            .field("operation", &self.operation)
            .field("pending", &self.pending)
            .finish()
    }
}

/// Session entry with its native and public types erased to `R`.
pub(crate) trait Resolve<R>: Send {
    fn operation(&self) -> &Operation;

    fn resolve_boxed(self: Box<Self>) -> KvResult<Option<R>>;
}

impl<N, P, R> Resolve<R> for Deferred<N, P>
where
    P: Into<R>,
    Deferred<N, P>: Send,
{
    fn operation(&self) -> &Operation {
        &self.operation
    }

    fn resolve_boxed(self: Box<Self>) -> KvResult<Option<R>> {
        Ok((*self).resolve()?.map(Into::into))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ukv_common::{KvError, ProtocolCommand, Value};

    fn op() -> Operation {
        Operation::new(ProtocolCommand::Get).with_key("k")
    }

    #[test]
    fn resolve_converts_materialized_value() {
        let (completer, pending) = Pending::channel();
        let deferred = Deferred::new(op(), pending, Converter::new(|n: i64| n * 2));
        completer.succeed(Some(21));
        assert_eq!(deferred.resolve().unwrap(), Some(42));
    }

    #[test]
    fn resolve_short_circuits_null() {
        let deferred = Deferred::new(
            op(),
            Pending::ready(Ok(None)),
            Converter::new(|_: i64| -> i64 { panic!("null must not be converted") }),
        );
        assert_eq!(deferred.resolve().unwrap(), None);
    }

    #[test]
    fn erased_entry_widens_public_type() {
        let deferred = Deferred::new(op(), Pending::ready(Ok(Some(3i64))), Converter::identity());
        let entry: Box<dyn Resolve<Value>> = Box::new(deferred);
        assert_eq!(entry.operation().command(), ProtocolCommand::Get);
        assert_eq!(entry.resolve_boxed().unwrap(), Some(Value::Integer(3)));
    }

    #[test]
    fn native_errors_surface_on_resolve() {
        let deferred: Deferred<i64, i64> = Deferred::new(
            op(),
            Pending::ready(Err(KvError::Server {
                message: "WRONGTYPE".into(),
            })),
            Converter::identity(),
        );
        assert!(matches!(deferred.resolve(), Err(KvError::Server { .. })));
    }
}
