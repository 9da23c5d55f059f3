//! # Sessions
//!
//! Purpose: Hold the ordered deferred results of one pipeline or transaction
//! until the caller flushes them in a single round trip.
//!
//! ## Design Principles
//! 1. **FIFO Resolution**: Entries resolve in the order they were appended and
//!    `flush` returns exactly one result per entry.
//! 2. **Single Use**: A session flushes once; it rejects appends and a second
//!    flush afterwards.
//! 3. **Per-Entry Failure**: A failed entry carries its own error; the others
//!    still resolve unless the batch transport fails as a whole.
//! 4. **No Leaks**: Dropping an open session discards its batch.

use std::fmt;
use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, trace, warn};

use ukv_common::{KvResult, SessionMisuse, Strategy};

use crate::binding::{NativeBatch, TopologyBinding};
use crate::deferred::{Deferred, Resolve};
use crate::descriptor::Command;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Open,
    Flushed,
    Discarded,
}

/// Releases a dispatcher's open-session flag when the session closes.
pub(crate) struct SessionGuard<'d> {
    flag: &'d AtomicBool,
}

impl<'d> SessionGuard<'d> {
    /// Claims the flag; fails if another session holds it.
    pub(crate) fn acquire(flag: &'d AtomicBool) -> KvResult<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| SessionMisuse::AlreadyOpen)?;
        Ok(SessionGuard { flag })
    }
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Open batch of deferred results whose public values widen to `R`.
pub struct Session<'d, B: TopologyBinding, R> {
    binding: &'d B,
    strategy: Strategy,
    batch: Option<B::Batch>,
    entries: Vec<Box<dyn Resolve<R>>>,
    state: SessionState,
    guard: Option<SessionGuard<'d>>,
}

impl<'d, B: TopologyBinding, R> Session<'d, B, R> {
    /// Opens a session holding the connection's open-session flag; the
    /// dispatcher's `begin_*` calls are the only way in.
    pub(crate) fn open(binding: &'d B, strategy: Strategy, guard: SessionGuard<'d>) -> KvResult<Self> {
        if !strategy.is_batched() {
            return Err(SessionMisuse::StrategyMismatch.into());
        }
        let batch = binding.open_batch(strategy)?;
        debug!(
            target: "ukv::session",
            topology = %binding.topology(),
            strategy = %strategy,
            "session opened"
        );
        Ok(Session {
            binding,
            strategy,
            batch: Some(batch),
            entries: Vec::new(),
            state: SessionState::Open,
            guard: Some(guard),
        })
    }

    /// True when this session was opened on `binding`.
    pub(crate) fn is_bound_to(&self, binding: &B) -> bool {
        std::ptr::eq(self.binding, binding)
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn is_open(&self) -> bool {
        self.state == SessionState::Open
    }

    /// Number of entries awaiting flush.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn ensure_appendable(&self) -> KvResult<()> {
        match self.state {
            SessionState::Open => Ok(()),
            SessionState::Flushed => Err(SessionMisuse::AppendAfterFlush.into()),
            SessionState::Discarded => Err(SessionMisuse::NoActiveSession.into()),
        }
    }

    /// Appends an already-created deferred result; returns its position.
    pub fn append<N, P>(&mut self, deferred: Deferred<N, P>) -> KvResult<usize>
    where
        N: Send + 'static,
        P: Into<R> + 'static,
    {
        self.ensure_appendable()?;
        trace!(
            target: "ukv::session",
            index = self.entries.len(),
            operation = %deferred.operation(),
            "entry appended"
        );
        self.entries.push(Box::new(deferred));
        Ok(self.entries.len() - 1)
    }

    /// Runs `command` against the batch handle and appends its deferred result.
    pub fn enqueue<N, P>(&mut self, command: Command<B::Handle, N, P>) -> KvResult<usize>
    where
        N: Send + 'static,
        P: Into<R> + 'static,
    {
        self.ensure_appendable()?;
        self.binding
            .capabilities()
            .check(command.command(), self.strategy)?;

        let (operation, executor, converter) = command.into_parts();
        let batch = self
            .batch
            .as_mut()
            .ok_or(SessionMisuse::NoActiveSession)?;
        let pending = batch
            .with_handle(&operation, |handle| executor.invoke(handle))?
            .into_pending();
        self.append(Deferred::new(operation, pending, converter))
    }

    /// Sends the batch and resolves every entry in append order.
    ///
    /// The outer error reports a batch-wide failure (transport, aborted
    /// transaction); inner errors belong to individual entries. A batch-wide
    /// failure replaces the per-entry results, which are dropped unread.
    pub fn flush(&mut self) -> KvResult<Vec<KvResult<Option<R>>>> {
        match self.state {
            SessionState::Open => {}
            SessionState::Flushed => return Err(SessionMisuse::AlreadyFlushed.into()),
            SessionState::Discarded => return Err(SessionMisuse::NoActiveSession.into()),
        }
        self.state = SessionState::Flushed;
        self.guard = None;

        let entries = mem::take(&mut self.entries);
        let mut batch = self.batch.take().ok_or(SessionMisuse::NoActiveSession)?;
        debug!(
            target: "ukv::session",
            strategy = %self.strategy,
            entries = entries.len(),
            "flushing session"
        );
        if let Err(err) = batch.sync() {
            warn!(target: "ukv::session", error = %err, "batch failed as a whole");
            return Err(err);
        }

        let results: Vec<_> = entries
            .into_iter()
            .enumerate()
            .map(|(index, entry)| {
                trace!(target: "ukv::session", index, operation = %entry.operation(), "resolving entry");
                let result = entry.resolve_boxed();
                if let Err(err) = &result {
                    debug!(target: "ukv::session", index, error = %err, "entry failed");
                }
                result
            })
            .collect();
        Ok(results)
    }

    /// Abandons the session without running its entries.
    pub fn discard(&mut self) -> KvResult<()> {
        match self.state {
            SessionState::Open => {}
            SessionState::Flushed => return Err(SessionMisuse::AlreadyFlushed.into()),
            SessionState::Discarded => return Err(SessionMisuse::NoActiveSession.into()),
        }
        self.state = SessionState::Discarded;
        self.guard = None;
        debug!(
            target: "ukv::session",
            strategy = %self.strategy,
            entries = self.entries.len(),
            "discarding session"
        );
        let result = match self.batch.take() {
            Some(mut batch) => batch.discard(),
            None => Ok(()),
        };
        self.entries.clear();
        result
    }
}

impl<B: TopologyBinding, R> Drop for Session<'_, B, R> {
    fn drop(&mut self) {
        if self.is_open() {
            warn!(
                target: "ukv::session",
                entries = self.entries.len(),
                "session dropped while open; discarding"
            );
            if let Err(err) = self.discard() {
                warn!(target: "ukv::session", error = %err, "discard on drop failed");
            }
        }
    }
}

impl<B: TopologyBinding, R> fmt::Debug for Session<'_, B, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("strategy", &self.strategy)
            .field("state", &self.state)
            .field("entries", &self.entries.len())
            .finish()
    }
}
