//! In-memory binding for dispatch tests. Batched calls are queued and only
//! run against the store when the batch syncs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing_subscriber::EnvFilter;

use ukv_common::{KvError, KvResult, ProtocolCommand, SessionMisuse, Strategy, Topology, Value};

use crate::binding::{Capabilities, NativeBatch, TopologyBinding};
use crate::converter::Converter;
use crate::deferred::Deferred;
use crate::descriptor::{Command, Operation};
use crate::dispatcher::{execute, run, Dispatcher, Outcome};
use crate::executor::{Executor, Invocation};
use crate::pending::{Completer, NativeResult, Pending};

type Store = HashMap<String, i64>;
type Call = Box<dyn FnOnce(&mut Store) -> NativeResult<i64> + Send>;

pub(crate) struct MemHandle {
    store: Arc<Mutex<Store>>,
    queue: Option<Vec<(Call, Completer<i64>)>>,
}

impl MemHandle {
    fn call(&mut self, f: impl FnOnce(&mut Store) -> NativeResult<i64> + Send + 'static) -> Invocation<i64> {
        match &mut self.queue {
            None => Invocation::ready(f(&mut *self.store.lock())),
            Some(queue) => {
                let (completer, pending) = Pending::channel();
                queue.push((Box::new(f), completer));
                Invocation::Pending(pending)
            }
        }
    }
}

pub(crate) struct MemBinding {
    store: Arc<Mutex<Store>>,
    caps: Capabilities,
    fail_sync: bool,
    handles: AtomicUsize,
}

impl MemBinding {
    fn new(topology: Topology) -> Self {
        MemBinding {
            store: Arc::new(Mutex::new(HashMap::new())),
            caps: Capabilities::for_topology(topology),
            fail_sync: false,
            handles: AtomicUsize::new(0),
        }
    }

    fn failing_sync(mut self) -> Self {
        self.fail_sync = true;
        self
    }

    fn value(&self, key: &str) -> Option<i64> {
        self.store.lock().get(key).copied()
    }

    fn handles(&self) -> usize {
        self.handles.load(Ordering::SeqCst)
    }
}

impl TopologyBinding for MemBinding {
    type Handle = MemHandle;
    type Batch = MemBatch;

    fn topology(&self) -> Topology {
        self.caps.topology()
    }

    fn capabilities(&self) -> &Capabilities {
        &self.caps
    }

    fn with_handle<T>(&self, _op: &Operation, f: impl FnOnce(&mut MemHandle) -> T) -> KvResult<T> {
        self.handles.fetch_add(1, Ordering::SeqCst);
        let mut handle = MemHandle {
            store: self.store.clone(),
            queue: None,
        };
        Ok(f(&mut handle))
    }

    fn open_batch(&self, _strategy: Strategy) -> KvResult<MemBatch> {
        Ok(MemBatch {
            handle: MemHandle {
                store: self.store.clone(),
                queue: Some(Vec::new()),
            },
            fail_sync: self.fail_sync,
        })
    }
}

pub(crate) struct MemBatch {
    handle: MemHandle,
    fail_sync: bool,
}

impl MemBatch {
    fn take_queue(&mut self) -> Vec<(Call, Completer<i64>)> {
        self.handle.queue.as_mut().map(std::mem::take).unwrap_or_default()
    }
}

impl NativeBatch for MemBatch {
    type Handle = MemHandle;

    fn with_handle<T>(&mut self, _op: &Operation, f: impl FnOnce(&mut MemHandle) -> T) -> KvResult<T> {
        Ok(f(&mut self.handle))
    }

    fn sync(&mut self) -> KvResult<()> {
        let queue = self.take_queue();
        if self.fail_sync {
            for (_, completer) in queue {
                completer.fail(KvError::Transport("connection reset".into()));
            }
            return Err(KvError::Transport("connection reset".into()));
        }
        let mut store = self.handle.store.lock();
        for (call, completer) in queue {
            completer.complete(call(&mut *store));
        }
        Ok(())
    }

    fn discard(&mut self) -> KvResult<()> {
        for (_, completer) in self.take_queue() {
            completer.fail(KvError::Discarded);
        }
        Ok(())
    }
}

fn constant(value: Option<i64>) -> Command<MemHandle, i64, i64> {
    Command::identity(ProtocolCommand::Echo, move |h: &mut MemHandle| {
        h.call(move |_| Ok(value))
    })
}

fn doubled(value: Option<i64>) -> Command<MemHandle, i64, i64> {
    Command::from_fn(
        ProtocolCommand::Echo,
        move |h: &mut MemHandle| h.call(move |_| Ok(value)),
        |n| n * 2,
    )
}

fn incr(key: &'static str, by: i64) -> Command<MemHandle, i64, i64> {
    Command::identity(
        Operation::new(ProtocolCommand::IncrBy).with_key(key).arg("by", by),
        move |h: &mut MemHandle| {
            h.call(move |store| {
                let entry = store.entry(key.to_string()).or_insert(0);
                *entry += by;
                Ok(Some(*entry))
            })
        },
    )
}

fn get(key: &'static str) -> Command<MemHandle, i64, i64> {
    Command::identity(
        Operation::new(ProtocolCommand::Get).with_key(key),
        move |h: &mut MemHandle| h.call(move |store| Ok(store.get(key).copied())),
    )
}

fn failing(message: &'static str) -> Command<MemHandle, i64, i64> {
    Command::identity(ProtocolCommand::Get, move |h: &mut MemHandle| {
        h.call(move |_| {
            Err(KvError::Server {
                message: message.to_string(),
            })
        })
    })
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn values(results: Vec<KvResult<Option<i64>>>) -> Vec<Option<i64>> {
    results.into_iter().map(|r| r.unwrap()).collect()
}

fn misuse<T: std::fmt::Debug>(result: KvResult<T>) -> SessionMisuse {
    result.unwrap_err().session_misuse().expect("session misuse")
}

#[test]
fn direct_execute_runs_and_converts_immediately() {
    let binding = MemBinding::new(Topology::Standalone);
    assert_eq!(execute(&binding, incr("hits", 2)).unwrap(), Some(2));
    assert_eq!(execute(&binding, doubled(Some(4))).unwrap(), Some(8));
    assert_eq!(execute(&binding, doubled(None)).unwrap(), None);
    assert_eq!(binding.value("hits"), Some(2));
}

#[test]
fn flush_resolves_example_in_order() {
    init_tracing();
    let dispatcher = Dispatcher::new(MemBinding::new(Topology::Standalone));
    let mut session = dispatcher.begin_pipeline::<i64>().unwrap();
    for value in [Some(10), None, Some(30)] {
        session.enqueue(doubled(value)).unwrap();
    }
    assert_eq!(session.len(), 3);
    assert_eq!(values(session.flush().unwrap()), vec![Some(20), None, Some(60)]);
}

#[test]
fn flush_preserves_order_for_any_length() {
    init_tracing();
    let dispatcher = Dispatcher::new(MemBinding::new(Topology::Standalone));
    for n in [0usize, 1, 7] {
        let mut session = dispatcher.begin_pipeline::<i64>().unwrap();
        for i in 0..n {
            session.enqueue(constant(Some(i as i64))).unwrap();
        }
        let expected: Vec<_> = (0..n).map(|i| Some(i as i64)).collect();
        assert_eq!(values(session.flush().unwrap()), expected);
    }
}

#[test]
fn batched_commands_run_only_at_flush() {
    let dispatcher = Dispatcher::new(MemBinding::new(Topology::Standalone));
    let mut session = dispatcher.begin_transaction::<i64>().unwrap();
    session.enqueue(incr("n", 1)).unwrap();
    session.enqueue(incr("n", 1)).unwrap();
    session.enqueue(get("n")).unwrap();
    assert_eq!(dispatcher.binding().value("n"), None);

    assert_eq!(values(session.flush().unwrap()), vec![Some(1), Some(2), Some(2)]);
    assert_eq!(dispatcher.binding().value("n"), Some(2));
}

#[test]
fn null_results_skip_conversion_in_sessions() {
    let dispatcher = Dispatcher::new(MemBinding::new(Topology::Standalone));
    let mut session = dispatcher.begin_pipeline::<i64>().unwrap();
    session
        .enqueue(Command::from_fn(
            ProtocolCommand::Get,
            |h: &mut MemHandle| h.call(|_| Ok(None)),
            |_: i64| -> i64 { panic!("null must not be converted") },
        ))
        .unwrap();
    assert_eq!(values(session.flush().unwrap()), vec![None]);
}

#[test]
fn direct_and_pipelined_agree() {
    let dispatcher = Dispatcher::new(MemBinding::new(Topology::Standalone));
    for value in [Some(-3), Some(0), None] {
        let direct = dispatcher.execute(doubled(value)).unwrap();
        let mut session = dispatcher.begin_pipeline::<i64>().unwrap();
        session.enqueue(doubled(value)).unwrap();
        let batched = session.flush().unwrap().pop().unwrap().unwrap();
        assert_eq!(direct, batched);
    }
}

#[test]
fn flushed_session_rejects_reuse() {
    let dispatcher = Dispatcher::new(MemBinding::new(Topology::Standalone));
    let mut session = dispatcher.begin_pipeline::<i64>().unwrap();
    session.enqueue(constant(Some(1))).unwrap();
    session.flush().unwrap();

    assert!(!session.is_open());
    assert_eq!(misuse(session.flush()), SessionMisuse::AlreadyFlushed);
    assert_eq!(misuse(session.enqueue(constant(Some(2)))), SessionMisuse::AppendAfterFlush);
    assert_eq!(misuse(session.discard()), SessionMisuse::AlreadyFlushed);
}

#[test]
fn batched_strategy_without_session_fails_fast() {
    let binding = MemBinding::new(Topology::Standalone);
    let err = run::<_, _, _, i64>(&binding, Strategy::Pipelined, None, incr("n", 1)).unwrap_err();
    assert_eq!(err.session_misuse(), Some(SessionMisuse::NoActiveSession));
    assert_eq!(binding.value("n"), None);
    assert_eq!(binding.handles(), 0);
}

#[test]
fn run_selects_strategy() {
    let dispatcher = Dispatcher::new(MemBinding::new(Topology::Standalone));
    let direct = dispatcher
        .run::<_, _, i64>(Strategy::Direct, None, doubled(Some(5)))
        .unwrap();
    assert_eq!(direct, Outcome::Completed(Some(10)));

    let mut session = dispatcher.begin_transaction::<i64>().unwrap();
    let queued = dispatcher
        .run(Strategy::Transactional, Some(&mut session), doubled(Some(5)))
        .unwrap();
    assert_eq!(queued, Outcome::Queued { index: 0 });
    assert!(queued.is_queued());

    let mismatch = dispatcher.run(Strategy::Pipelined, Some(&mut session), constant(Some(1)));
    assert_eq!(misuse(mismatch), SessionMisuse::StrategyMismatch);
    assert_eq!(values(session.flush().unwrap()), vec![Some(10)]);
}

#[test]
fn sessions_from_another_connection_are_rejected() {
    let first = Dispatcher::new(MemBinding::new(Topology::Standalone));
    let second = Dispatcher::new(MemBinding::new(Topology::Standalone));
    let mut session = first.begin_pipeline::<i64>().unwrap();

    let foreign = run(second.binding(), Strategy::Pipelined, Some(&mut session), constant(Some(1)));
    assert_eq!(misuse(foreign), SessionMisuse::NoActiveSession);
    assert!(session.is_empty());

    let own = run(first.binding(), Strategy::Pipelined, Some(&mut session), constant(Some(2)));
    assert_eq!(own.unwrap(), Outcome::Queued { index: 0 });
    assert_eq!(values(session.flush().unwrap()), vec![Some(2)]);
}

#[test]
fn sessions_do_not_nest() {
    init_tracing();
    let dispatcher = Dispatcher::new(MemBinding::new(Topology::Standalone));
    let mut first = dispatcher.begin_pipeline::<i64>().unwrap();
    assert!(dispatcher.has_open_session());
    assert_eq!(
        misuse(dispatcher.begin_transaction::<i64>()),
        SessionMisuse::AlreadyOpen
    );
    assert_eq!(
        misuse(dispatcher.begin_pipeline::<Value>()),
        SessionMisuse::AlreadyOpen
    );
    first.flush().unwrap();
    assert!(!dispatcher.has_open_session());
    assert!(dispatcher.begin_transaction::<i64>().is_ok());
}

#[test]
fn unsupported_commands_fail_before_handle_acquired() {
    let dispatcher = Dispatcher::new(MemBinding::new(Topology::Cluster));
    let binding = dispatcher.binding();
    let keys: Command<MemHandle, i64, i64> = Command::identity(ProtocolCommand::Keys, |h: &mut MemHandle| {
        h.call(|store| Ok(Some(store.len() as i64)))
    });
    let mut session = dispatcher.begin_pipeline::<i64>().unwrap();
    let err = run(binding, Strategy::Pipelined, Some(&mut session), keys).unwrap_err();
    assert!(err.is_unsupported());
    assert!(session.is_empty());

    let select: Command<MemHandle, i64, i64> =
        Command::identity(ProtocolCommand::Select, |h: &mut MemHandle| h.call(|_| Ok(Some(1))));
    assert!(execute(binding, select).unwrap_err().is_unsupported());
    assert_eq!(binding.handles(), 0);
}

#[test]
fn discard_drops_entries_and_releases_connection() {
    init_tracing();
    let dispatcher = Dispatcher::new(MemBinding::new(Topology::Standalone));
    let mut session = dispatcher.begin_transaction::<i64>().unwrap();
    session.enqueue(incr("n", 5)).unwrap();
    session.discard().unwrap();

    assert!(!dispatcher.has_open_session());
    assert_eq!(dispatcher.binding().value("n"), None);
    assert_eq!(misuse(session.flush()), SessionMisuse::NoActiveSession);
    assert_eq!(misuse(session.enqueue(incr("n", 1))), SessionMisuse::NoActiveSession);
}

#[test]
fn dropping_open_session_discards_it() {
    init_tracing();
    let dispatcher = Dispatcher::new(MemBinding::new(Topology::Standalone));
    {
        let mut session = dispatcher.begin_pipeline::<i64>().unwrap();
        session.enqueue(incr("n", 1)).unwrap();
    }
    assert!(!dispatcher.has_open_session());
    assert_eq!(dispatcher.binding().value("n"), None);
}

#[test]
fn entry_errors_do_not_abort_flush() {
    init_tracing();
    let dispatcher = Dispatcher::new(MemBinding::new(Topology::Standalone));
    let mut session = dispatcher.begin_pipeline::<i64>().unwrap();
    session.enqueue(constant(Some(1))).unwrap();
    session.enqueue(failing("WRONGTYPE")).unwrap();
    session
        .enqueue(Command::new(
            ProtocolCommand::Get,
            Executor::new(|h: &mut MemHandle| h.call(|_| Ok(Some(-1)))),
            Converter::try_new(|n: i64| {
                u32::try_from(n)
                    .map(i64::from)
                    .map_err(|e| KvError::Conversion(e.to_string()))
            }),
        ))
        .unwrap();
    session.enqueue(constant(Some(3))).unwrap();

    let results = session.flush().unwrap();
    assert_eq!(results.len(), 4);
    assert_eq!(results[0].as_ref().unwrap(), &Some(1));
    assert!(matches!(results[1], Err(KvError::Server { .. })));
    assert!(matches!(results[2], Err(KvError::Conversion(_))));
    assert_eq!(results[3].as_ref().unwrap(), &Some(3));
}

#[test]
fn batch_failure_fails_flush_as_a_whole() {
    init_tracing();
    let dispatcher = Dispatcher::new(MemBinding::new(Topology::Standalone).failing_sync());
    let mut session = dispatcher.begin_pipeline::<i64>().unwrap();
    session.enqueue(incr("n", 1)).unwrap();
    assert!(matches!(session.flush(), Err(KvError::Transport(_))));
    assert!(!dispatcher.has_open_session());
    assert_eq!(misuse(session.flush()), SessionMisuse::AlreadyFlushed);
}

#[test]
fn session_widens_heterogeneous_results() {
    let dispatcher = Dispatcher::new(MemBinding::new(Topology::Standalone));
    let mut session = dispatcher.begin_pipeline::<Value>().unwrap();
    session.enqueue(incr("n", 4)).unwrap();
    session
        .enqueue(Command::from_fn(
            ProtocolCommand::Exists,
            |h: &mut MemHandle| h.call(|store| Ok(Some(store.len() as i64))),
            |n| n > 0,
        ))
        .unwrap();
    let index = session
        .append(Deferred::new(
            Operation::new(ProtocolCommand::Echo),
            Pending::ready(Ok(Some("pong".to_string()))),
            Converter::identity(),
        ))
        .unwrap();
    assert_eq!(index, 2);

    let results: Vec<_> = session.flush().unwrap().into_iter().map(|r| r.unwrap()).collect();
    assert_eq!(
        results,
        vec![
            Some(Value::Integer(4)),
            Some(Value::Bool(true)),
            Some(Value::Text("pong".into()))
        ]
    );
}
