//! # Pending Native Results
//!
//! Purpose: Represent a native reply that will materialize later, so batched
//! commands can be enqueued now and resolved at flush.
//!
//! ## Design Principles
//! 1. **Promise Pattern**: `Pending::channel()` splits a slot into a
//!    `Completer` (driver side) and a `Pending` (dispatch side).
//! 2. **Single Suspension Point**: `wait()` is the only call that blocks, and
//!    the core only calls it while flushing a session or finishing a Direct call.
//! 3. **No Lost Wakeups**: A completer dropped without a value completes the
//!    slot with a transport error, so a waiter can never hang on it.

use std::fmt;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use ukv_common::{KvError, KvResult};

/// Native outcome: `Ok(None)` is the null native result, not an error.
pub type NativeResult<N> = KvResult<Option<N>>;

struct Slot<N> {
    value: Mutex<Option<NativeResult<N>>>,
    ready: Condvar,
}

impl<N> Slot<N> {
    fn new() -> Self {
        Slot {
            value: Mutex::new(None),
            ready: Condvar::new(),
        }
    }

    fn fill(&self, result: NativeResult<N>) {
        let mut value = self.value.lock();
        if value.is_none() {
            *value = Some(result);
            self.ready.notify_all();
        }
    }

    fn take(&self) -> NativeResult<N> {
        let mut value = self.value.lock();
        loop {
            if let Some(result) = value.take() {
                return result;
            }
            self.ready.wait(&mut value);
        }
    }

    fn is_filled(&self) -> bool {
        self.value.lock().is_some()
    }
}

enum State<N> {
    Ready(NativeResult<N>),
    Slot(Arc<Slot<N>>),
    Deferred(Box<dyn FnOnce() -> NativeResult<N> + Send>),
}

/// Handle to a native result that may not exist yet.
pub struct Pending<N> {
    state: State<N>,
}

impl<N> Pending<N> {
    /// Creates a pending result that is already materialized.
    pub fn ready(result: NativeResult<N>) -> Self {
        Pending {
            state: State::Ready(result),
        }
    }

    /// Creates a connected completer/pending pair.
    pub fn channel() -> (Completer<N>, Pending<N>) {
        let slot = Arc::new(Slot::new());
        (
            Completer {
                slot: Some(slot.clone()),
            },
            Pending {
                state: State::Slot(slot),
            },
        )
    }

    /// Returns true when `wait` would not block.
    pub fn is_ready(&self) -> bool {
        match &self.state {
            State::Ready(_) => true,
            State::Slot(slot) => slot.is_filled(),
            State::Deferred(_) => false,
        }
    }

    /// Blocks until the native result materializes and returns it.
    pub fn wait(self) -> NativeResult<N> {
        match self.state {
            State::Ready(result) => result,
            State::Slot(slot) => slot.take(),
            State::Deferred(resolve) => resolve(),
        }
    }
}

impl<N: Send + 'static> Pending<N> {
    /// Maps the materialized value lazily; `None` and errors pass through.
    pub fn map<M: 'static, F>(self, f: F) -> Pending<M>
    where
        F: FnOnce(N) -> KvResult<M> + Send + 'static,
    {
        match self.state {
            State::Ready(result) => Pending::ready(map_native(result, f)),
            state => {
                let inner = Pending { state };
                Pending {
                    state: State::Deferred(Box::new(move || map_native(inner.wait(), f))),
                }
            }
        }
    }
}

fn map_native<N, M>(result: NativeResult<N>, f: impl FnOnce(N) -> KvResult<M>) -> NativeResult<M> {
    match result? {
        Some(value) => f(value).map(Some),
        None => Ok(None),
    }
}

impl<N> fmt::Debug for Pending<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pending")
            .field("ready", &self.is_ready())
            .finish()
    }
}

/// Driver-side half of a pending result.
pub struct Completer<N> {
    slot: Option<Arc<Slot<N>>>,
}

impl<N> Completer<N> {
    /// Materializes the native result and wakes any waiter.
    pub fn complete(mut self, result: NativeResult<N>) {
        if let Some(slot) = self.slot.take() {
            slot.fill(result);
        }
    }

    /// Completes with a value.
    pub fn succeed(self, value: Option<N>) {
        self.complete(Ok(value));
    }

    /// Completes with an error.
    pub fn fail(self, err: KvError) {
        self.complete(Err(err));
    }
}

impl<N> Drop for Completer<N> {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            slot.fill(Err(KvError::Transport(
                "reply dropped before completion".to_string(),
            )));
        }
    }
}

impl<N> fmt::Debug for Completer<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completer")
            .field("open", &self.slot.is_some())
            .finish()
    }
}
