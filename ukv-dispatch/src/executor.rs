//! # Executors
//!
//! An executor receives the driver's command surface for the bound topology
//! and invokes exactly one native operation on it. Direct handles answer with
//! a materialized result; batch handles answer with a pending one.

use std::fmt;

use ukv_common::KvResult;

use crate::pending::{NativeResult, Pending};

/// What a native handle returns for one invocation.
pub enum Invocation<N> {
    /// Result is available now (Direct handles).
    Ready(NativeResult<N>),
    /// Result materializes when the owning batch syncs.
    Pending(Pending<N>),
}

impl<N> Invocation<N> {
    /// Wraps an immediate result.
    pub fn ready(result: NativeResult<N>) -> Self {
        Invocation::Ready(result)
    }

    /// Returns the result, blocking if it is still pending.
    pub fn wait(self) -> NativeResult<N> {
        match self {
            Invocation::Ready(result) => result,
            Invocation::Pending(pending) => pending.wait(),
        }
    }

    /// Returns a pending handle, wrapping immediate results.
    pub fn into_pending(self) -> Pending<N> {
        match self {
            Invocation::Ready(result) => Pending::ready(result),
            Invocation::Pending(pending) => pending,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Invocation::Pending(_))
    }
}

impl<N: Send + 'static> Invocation<N> {
    /// Reshapes the native value (e.g. reply frame to integer) without
    /// changing when it materializes.
    pub fn map<M: 'static, F>(self, f: F) -> Invocation<M>
    where
        F: FnOnce(N) -> KvResult<M> + Send + 'static,
    {
        match self {
            Invocation::Ready(result) => Invocation::Ready(match result {
                Ok(Some(value)) => f(value).map(Some),
                Ok(None) => Ok(None),
                Err(err) => Err(err),
            }),
            Invocation::Pending(pending) => Invocation::Pending(pending.map(f)),
        }
    }
}

impl<N> fmt::Debug for Invocation<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Invocation::Ready(result) => f
                .debug_tuple("Ready")
                .field(&result.as_ref().map(|value| value.is_some()))
                .finish(),
            Invocation::Pending(pending) => f.debug_tuple("Pending").field(pending).finish(),
        }
    }
}

/// One native operation against a handle of type `H`.
pub struct Executor<H: ?Sized, N> {
    run: Box<dyn FnOnce(&mut H) -> Invocation<N> + Send>,
}

impl<H: ?Sized, N> Executor<H, N> {
    pub fn new<F>(run: F) -> Self
    where
        F: FnOnce(&mut H) -> Invocation<N> + Send + 'static,
    {
        Executor { run: Box::new(run) }
    }

    /// Invokes the native operation.
    pub fn invoke(self, handle: &mut H) -> Invocation<N> {
        (self.run)(handle)
    }
}

impl<H: ?Sized, N> fmt::Debug for Executor<H, N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Executor")
    }
}
