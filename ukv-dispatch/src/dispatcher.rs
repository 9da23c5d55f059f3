//! # Strategy Dispatch
//!
//! Runs a command descriptor under one of the three execution strategies.
//! Direct runs and converts at once; Pipelined and Transactional enqueue into
//! the caller's open session and resolve at flush.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::debug;

use ukv_common::{KvResult, SessionMisuse, Strategy};

use crate::binding::TopologyBinding;
use crate::descriptor::Command;
use crate::session::{Session, SessionGuard};

/// What a strategy-selected call produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<P> {
    /// Direct execution finished with this public value.
    Completed(Option<P>),
    /// The command was queued at this position of the session.
    Queued { index: usize },
}

impl<P> Outcome<P> {
    /// Returns the Direct value, or `None` for queued commands.
    pub fn completed(self) -> Option<Option<P>> {
        match self {
            Outcome::Completed(value) => Some(value),
            Outcome::Queued { .. } => None,
        }
    }

    pub fn is_queued(&self) -> bool {
        matches!(self, Outcome::Queued { .. })
    }
}

/// Runs `command` now and converts its reply.
pub fn execute<B, N, P>(binding: &B, command: Command<B::Handle, N, P>) -> KvResult<Option<P>>
where
    B: TopologyBinding,
{
    binding
        .capabilities()
        .check(command.command(), Strategy::Direct)?;

    let (operation, executor, converter) = command.into_parts();
    debug!(
        target: "ukv::dispatch",
        topology = %binding.topology(),
        operation = %operation,
        "direct execute"
    );
    let native = binding
        .with_handle(&operation, |handle| executor.invoke(handle))?
        .wait()?;
    converter.apply(native)
}

/// Runs `command` under `strategy`.
///
/// Batched strategies require an open session of the same kind, opened on
/// `binding`, and never fall back to Direct execution.
pub fn run<B, N, P, R>(
    binding: &B,
    strategy: Strategy,
    session: Option<&mut Session<'_, B, R>>,
    command: Command<B::Handle, N, P>,
) -> KvResult<Outcome<P>>
where
    B: TopologyBinding,
    N: Send + 'static,
    P: Into<R> + 'static,
{
    if strategy == Strategy::Direct {
        return execute(binding, command).map(Outcome::Completed);
    }

    let session = session
        .filter(|session| session.is_bound_to(binding))
        .ok_or(SessionMisuse::NoActiveSession)?;
    if session.strategy() != strategy {
        return Err(SessionMisuse::StrategyMismatch.into());
    }
    debug!(
        target: "ukv::dispatch",
        topology = %binding.topology(),
        strategy = %strategy,
        operation = %command.operation(),
        "enqueue"
    );
    let index = session.enqueue(command)?;
    Ok(Outcome::Queued { index })
}

/// A logical connection: one binding and at most one open session.
#[derive(Debug)]
pub struct Dispatcher<B> {
    binding: B,
    session_open: AtomicBool,
}

impl<B: TopologyBinding> Dispatcher<B> {
    pub fn new(binding: B) -> Self {
        Dispatcher {
            binding,
            session_open: AtomicBool::new(false),
        }
    }

    pub fn binding(&self) -> &B {
        &self.binding
    }

    /// Returns true while a pipeline or transaction is open.
    pub fn has_open_session(&self) -> bool {
        self.session_open.load(Ordering::Acquire)
    }

    /// Direct strategy.
    pub fn execute<N, P>(&self, command: Command<B::Handle, N, P>) -> KvResult<Option<P>> {
        execute(&self.binding, command)
    }

    /// Opens a pipeline session.
    pub fn begin_pipeline<R>(&self) -> KvResult<Session<'_, B, R>> {
        self.begin(Strategy::Pipelined)
    }

    /// Opens a transaction session.
    pub fn begin_transaction<R>(&self) -> KvResult<Session<'_, B, R>> {
        self.begin(Strategy::Transactional)
    }

    fn begin<R>(&self, strategy: Strategy) -> KvResult<Session<'_, B, R>> {
        let guard = SessionGuard::acquire(&self.session_open)?;
        Session::open(&self.binding, strategy, guard)
    }

    /// Strategy-selected entry point; see [`run`].
    pub fn run<N, P, R>(
        &self,
        strategy: Strategy,
        session: Option<&mut Session<'_, B, R>>,
        command: Command<B::Handle, N, P>,
    ) -> KvResult<Outcome<P>>
    where
        N: Send + 'static,
        P: Into<R> + 'static,
    {
        run(&self.binding, strategy, session, command)
    }
}
