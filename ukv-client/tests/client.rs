use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use tracing_subscriber::EnvFilter;

use ukv_client::{
    Binding, ClientConfig, ClusterBinding, FlushPolicy, KvClient, KvError, PoolConfig, Status,
    Strategy, TopologyConfig, Ttl, Value,
};
use ukv_common::SessionMisuse;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Clone, Default)]
struct Behavior {
    /// EXEC answers *-1, as if a WATCHed key changed.
    abort_exec: bool,
    /// Close each connection after answering this many commands.
    close_after: Option<usize>,
    /// Answer SENTINEL get-master-addr-by-name with this address.
    master: Option<String>,
}

#[derive(Default)]
struct Store {
    strings: HashMap<Vec<u8>, Vec<u8>>,
    hashes: HashMap<Vec<u8>, HashMap<Vec<u8>, Vec<u8>>>,
    lists: HashMap<Vec<u8>, Vec<Vec<u8>>>,
}

/// In-process RESP2 server with just enough commands for the client tests.
struct MiniServer {
    addr: String,
    log: Arc<Mutex<Vec<Vec<String>>>>,
    store: Arc<Mutex<Store>>,
}

impl MiniServer {
    fn spawn(behavior: Behavior) -> MiniServer {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr").to_string();
        let log = Arc::new(Mutex::new(Vec::new()));
        let store = Arc::new(Mutex::new(Store::default()));

        let (log_ref, store_ref) = (log.clone(), store.clone());
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                let (log, store, behavior) = (log_ref.clone(), store_ref.clone(), behavior.clone());
                thread::spawn(move || serve(stream, log, store, behavior));
            }
        });

        MiniServer { addr, log, store }
    }

    fn commands(&self) -> Vec<Vec<String>> {
        self.log.lock().unwrap().clone()
    }

    fn names(&self) -> Vec<String> {
        self.commands().into_iter().map(|args| args[0].clone()).collect()
    }

    fn string(&self, key: &str) -> Option<Vec<u8>> {
        self.store.lock().unwrap().strings.get(key.as_bytes()).cloned()
    }
}

fn serve(mut stream: TcpStream, log: Arc<Mutex<Vec<Vec<String>>>>, store: Arc<Mutex<Store>>, behavior: Behavior) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(5)));
    let mut reader = BufReader::new(stream.try_clone().expect("clone"));
    let mut queued: Option<Vec<Vec<Vec<u8>>>> = None;
    let mut answered = 0;

    while let Ok(args) = read_command(&mut reader) {
        log.lock()
            .unwrap()
            .push(args.iter().map(|a| String::from_utf8_lossy(a).into_owned()).collect());
        let name = String::from_utf8_lossy(&args[0]).to_ascii_uppercase();

        let reply = match (name.as_str(), queued.as_mut()) {
            ("MULTI", None) => {
                queued = Some(Vec::new());
                simple("OK")
            }
            ("EXEC", Some(_)) => {
                let commands = queued.take().unwrap_or_default();
                if behavior.abort_exec {
                    b"*-1\r\n".to_vec()
                } else {
                    let mut store = store.lock().unwrap();
                    let mut out = format!("*{}\r\n", commands.len()).into_bytes();
                    for command in &commands {
                        out.extend(execute(&mut store, command, &behavior));
                    }
                    out
                }
            }
            ("DISCARD", Some(_)) => {
                queued = None;
                simple("OK")
            }
            (_, Some(commands)) => {
                commands.push(args);
                simple("QUEUED")
            }
            _ => execute(&mut store.lock().unwrap(), &args, &behavior),
        };

        if stream.write_all(&reply).and_then(|_| stream.flush()).is_err() {
            break;
        }
        answered += 1;
        if behavior.close_after == Some(answered) {
            let _ = stream.shutdown(Shutdown::Both);
            break;
        }
    }
}

fn execute(store: &mut Store, args: &[Vec<u8>], behavior: &Behavior) -> Vec<u8> {
    let name = String::from_utf8_lossy(&args[0]).to_ascii_uppercase();
    match name.as_str() {
        "PING" => match args.get(1) {
            Some(payload) => bulk(payload),
            None => simple("PONG"),
        },
        "SET" => {
            store.strings.insert(args[1].clone(), args[2].clone());
            simple("OK")
        }
        "SETEX" => {
            store.strings.insert(args[1].clone(), args[3].clone());
            simple("OK")
        }
        "GET" => match store.strings.get(&args[1]) {
            Some(value) => bulk(value),
            None => b"$-1\r\n".to_vec(),
        },
        "INCRBY" => {
            let by: i64 = String::from_utf8_lossy(&args[2]).parse().unwrap_or(0);
            let current = store.strings.get(&args[1]).cloned().unwrap_or_else(|| b"0".to_vec());
            match String::from_utf8_lossy(&current).parse::<i64>() {
                Ok(value) => {
                    let next = value + by;
                    store.strings.insert(args[1].clone(), next.to_string().into_bytes());
                    integer(next)
                }
                Err(_) => error("ERR value is not an integer or out of range"),
            }
        }
        "DEL" => integer(store.strings.remove(&args[1]).map_or(0, |_| 1)),
        "EXISTS" => integer(store.strings.contains_key(&args[1]) as i64),
        "TTL" => integer(if store.strings.contains_key(&args[1]) { -1 } else { -2 }),
        "KEYS" => {
            let prefix = args[1].strip_suffix(b"*").unwrap_or(&args[1]);
            let mut keys: Vec<_> = store.strings.keys().filter(|k| k.starts_with(prefix)).cloned().collect();
            keys.sort();
            array(keys.iter().map(|k| bulk(k)))
        }
        "HSET" => {
            let fields = store.hashes.entry(args[1].clone()).or_default();
            integer(fields.insert(args[2].clone(), args[3].clone()).is_none() as i64)
        }
        "HGET" => match store.hashes.get(&args[1]).and_then(|h| h.get(&args[2])) {
            Some(value) => bulk(value),
            None => b"$-1\r\n".to_vec(),
        },
        "LPUSH" => {
            let list = store.lists.entry(args[1].clone()).or_default();
            for value in &args[2..] {
                list.insert(0, value.clone());
            }
            integer(list.len() as i64)
        }
        "LRANGE" => {
            let list = store.lists.get(&args[1]).cloned().unwrap_or_default();
            array(list.iter().map(|v| bulk(v)))
        }
        "INFO" => bulk(b"# Server\r\nrole:master"),
        "SENTINEL" => match &behavior.master {
            Some(addr) => {
                let (host, port) = addr.rsplit_once(':').expect("host:port");
                array([bulk(host.as_bytes()), bulk(port.as_bytes())].into_iter())
            }
            None => b"*-1\r\n".to_vec(),
        },
        _ => error(&format!("ERR unknown command '{}'", name)),
    }
}

fn read_command(reader: &mut BufReader<TcpStream>) -> std::io::Result<Vec<Vec<u8>>> {
    let mut line = Vec::new();
    read_line(reader, &mut line)?;
    if line.first() != Some(&b'*') {
        return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "expected array"));
    }
    let count = parse_usize(&line[1..])?;
    let mut args = Vec::with_capacity(count);
    for _ in 0..count {
        read_line(reader, &mut line)?;
        if line.first() != Some(&b'$') {
            return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "expected bulk"));
        }
        let len = parse_usize(&line[1..])?;
        let mut data = vec![0u8; len + 2];
        reader.read_exact(&mut data)?;
        data.truncate(len);
        args.push(data);
    }
    Ok(args)
}

fn read_line(reader: &mut BufReader<TcpStream>, buf: &mut Vec<u8>) -> std::io::Result<()> {
    buf.clear();
    if reader.read_until(b'\n', buf)? == 0 {
        return Err(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof"));
    }
    if buf.len() < 2 || buf[buf.len() - 2] != b'\r' {
        return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "invalid line"));
    }
    buf.truncate(buf.len() - 2);
    Ok(())
}

fn parse_usize(data: &[u8]) -> std::io::Result<usize> {
    std::str::from_utf8(data)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidData, "digit"))
}

fn simple(msg: &str) -> Vec<u8> {
    format!("+{}\r\n", msg).into_bytes()
}

fn error(msg: &str) -> Vec<u8> {
    format!("-{}\r\n", msg).into_bytes()
}

fn integer(value: i64) -> Vec<u8> {
    format!(":{}\r\n", value).into_bytes()
}

fn bulk(data: &[u8]) -> Vec<u8> {
    let mut out = format!("${}\r\n", data.len()).into_bytes();
    out.extend_from_slice(data);
    out.extend_from_slice(b"\r\n");
    out
}

fn array(items: impl Iterator<Item = Vec<u8>>) -> Vec<u8> {
    let items: Vec<_> = items.collect();
    let mut out = format!("*{}\r\n", items.len()).into_bytes();
    for item in items {
        out.extend(item);
    }
    out
}

fn config_for(topology: TopologyConfig) -> ClientConfig {
    ClientConfig {
        topology,
        max_idle: 1,
        max_total: 1,
        read_timeout_ms: Some(2000),
        write_timeout_ms: Some(2000),
        connect_timeout_ms: Some(2000),
        ..ClientConfig::default()
    }
}

fn client_for(server: &MiniServer) -> KvClient {
    init_tracing();
    KvClient::with_config(config_for(TopologyConfig::Standalone {
        addr: server.addr.clone(),
    }))
    .expect("client")
}

fn ok_values(results: Vec<ukv_client::KvResult<Option<Value>>>) -> Vec<Option<Value>> {
    results.into_iter().map(|r| r.expect("entry")).collect()
}

fn bytes(data: &'static [u8]) -> Option<Value> {
    Some(Value::Bytes(Bytes::from_static(data)))
}

#[test]
fn direct_set_get_roundtrip() {
    let server = MiniServer::spawn(Behavior::default());
    let client = client_for(&server);

    client.set(b"key", "value").expect("set");
    assert_eq!(client.get(b"key").expect("get"), Some(Bytes::from_static(b"value")));
    assert_eq!(client.get(b"missing").expect("get"), None);
    assert_eq!(client.ttl(b"key").expect("ttl"), Ttl::NoExpiry);
    assert!(client.delete(b"key").expect("delete"));
    assert_eq!(client.ping(None).expect("ping"), Bytes::from_static(b"PONG"));
    assert_eq!(server.names(), vec!["SET", "GET", "GET", "TTL", "DEL", "PING"]);
}

#[test]
fn pipeline_resolves_in_order() {
    let server = MiniServer::spawn(Behavior::default());
    let client = client_for(&server);

    let mut batch = client.pipeline().expect("pipeline");
    assert_eq!(batch.strategy(), Strategy::Pipelined);
    batch.set(b"a", "1").unwrap();
    batch.incr_by(b"n", 1).unwrap();
    batch.incr_by(b"n", 10).unwrap();
    batch.get(b"a").unwrap();
    batch.get(b"missing").unwrap();
    assert!(server.commands().is_empty(), "nothing is sent before flush");

    let results = ok_values(batch.flush().expect("flush"));
    assert_eq!(
        results,
        vec![
            Some(Value::Status(Status::Success)),
            Some(Value::Integer(1)),
            Some(Value::Integer(11)),
            bytes(b"1"),
            None,
        ]
    );
    assert_eq!(server.names(), vec!["SET", "INCRBY", "INCRBY", "GET", "GET"]);
}

#[test]
fn pipeline_isolates_entry_errors() {
    let server = MiniServer::spawn(Behavior::default());
    let client = client_for(&server);

    let mut batch = client.pipeline().unwrap();
    batch.set(b"s", "text").unwrap();
    batch.incr_by(b"s", 1).unwrap();
    batch.get(b"s").unwrap();
    let results = batch.flush().unwrap();

    assert!(matches!(results[0], Ok(Some(Value::Status(Status::Success)))));
    assert!(matches!(results[1], Err(KvError::Server { .. })));
    assert_eq!(results[2].as_ref().unwrap(), &bytes(b"text"));
}

#[test]
fn flushed_batch_rejects_reuse() {
    let server = MiniServer::spawn(Behavior::default());
    let client = client_for(&server);

    let mut batch = client.pipeline().unwrap();
    batch.set(b"k", "v").unwrap();
    batch.flush().unwrap();

    let again = batch.flush().unwrap_err();
    assert_eq!(again.session_misuse(), Some(SessionMisuse::AlreadyFlushed));
    let append = batch.get(b"k").unwrap_err();
    assert_eq!(append.session_misuse(), Some(SessionMisuse::AppendAfterFlush));
}

#[test]
fn transaction_commits_with_multi_exec() {
    let server = MiniServer::spawn(Behavior::default());
    let client = client_for(&server);

    let mut tx = client.transaction().expect("transaction");
    tx.incr_by(b"n", 2).unwrap();
    tx.incr_by(b"n", 3).unwrap();
    let lpush = tx.commands().lpush(b"l", ["x", "y"]);
    tx.enqueue(lpush).unwrap();
    let results = ok_values(tx.commit().expect("commit"));

    assert_eq!(
        results,
        vec![Some(Value::Integer(2)), Some(Value::Integer(5)), Some(Value::Integer(2))]
    );
    assert_eq!(server.names(), vec!["MULTI", "INCRBY", "INCRBY", "LPUSH", "EXEC"]);
    assert_eq!(server.string("n"), Some(b"5".to_vec()));
}

#[test]
fn aborted_transaction_fails_as_a_whole() {
    let server = MiniServer::spawn(Behavior {
        abort_exec: true,
        ..Behavior::default()
    });
    let client = client_for(&server);

    let mut tx = client.transaction().unwrap();
    tx.set(b"k", "v").unwrap();
    assert!(matches!(tx.commit(), Err(KvError::TransactionAborted)));

    // The connection is still usable afterwards.
    client.set(b"k", "direct").unwrap();
    assert_eq!(server.string("k"), Some(b"direct".to_vec()));
}

#[test]
fn discarded_transaction_sends_discard() {
    let server = MiniServer::spawn(Behavior::default());
    let mut config = config_for(TopologyConfig::Standalone {
        addr: server.addr.clone(),
    });
    config.flush_policy = FlushPolicy::EachCommand;
    let client = KvClient::with_config(config).unwrap();

    let mut tx = client.transaction().unwrap();
    tx.set(b"k", "v").unwrap();
    tx.discard().unwrap();
    assert!(!tx.is_open());

    assert_eq!(client.get(b"k").unwrap(), None);
    assert_eq!(server.names(), vec!["MULTI", "SET", "DISCARD", "GET"]);
}

#[test]
fn dropped_pipeline_sends_nothing() {
    let server = MiniServer::spawn(Behavior::default());
    let client = client_for(&server);
    {
        let mut batch = client.pipeline().unwrap();
        batch.set(b"k", "v").unwrap();
    }
    assert_eq!(client.get(b"k").unwrap(), None);
    assert_eq!(server.names(), vec!["GET"]);
}

#[test]
fn batches_do_not_nest() {
    let server = MiniServer::spawn(Behavior::default());
    let client = client_for(&server);

    let _open = client.pipeline().unwrap();
    let err = client.transaction().unwrap_err();
    assert_eq!(err.session_misuse(), Some(SessionMisuse::AlreadyOpen));
}

#[test]
fn read_failure_fails_remaining_entries() {
    let server = MiniServer::spawn(Behavior {
        close_after: Some(2),
        ..Behavior::default()
    });
    let client = client_for(&server);

    let mut batch = client.pipeline().unwrap();
    for key in [b"a", b"b", b"c", b"d"] {
        batch.set(key, "v").unwrap();
    }
    let results = batch.flush().expect("batch flushes with per-entry errors");
    assert!(results[0].is_ok());
    assert!(results[1].is_ok());
    assert!(matches!(results[2], Err(KvError::Transport(_))));
    assert!(matches!(results[3], Err(KvError::Transport(_))));
}

#[test]
fn key_prefix_and_json() {
    let server = MiniServer::spawn(Behavior::default());
    let mut config = config_for(TopologyConfig::Standalone {
        addr: server.addr.clone(),
    });
    config.key_prefix = Some("app:".into());
    let client = KvClient::with_config(config).unwrap();

    client.set_json(b"cfg", &vec!["a", "b"]).unwrap();
    assert_eq!(server.string("app:cfg"), Some(br#"["a","b"]"#.to_vec()));
    let decoded: Option<Vec<String>> = client.get_json(b"cfg").unwrap();
    assert_eq!(decoded, Some(vec!["a".to_string(), "b".to_string()]));

    let keys = client.execute(client.commands().keys(b"*")).unwrap();
    assert_eq!(keys, Some(vec![Bytes::from_static(b"cfg")]));
}

#[test]
fn sentinel_resolves_master() {
    init_tracing();
    let master = MiniServer::spawn(Behavior::default());
    let sentinel = MiniServer::spawn(Behavior {
        master: Some(master.addr.clone()),
        ..Behavior::default()
    });
    let client = KvClient::with_config(config_for(TopologyConfig::Sentinel {
        master: "mymaster".into(),
        sentinels: vec![sentinel.addr.clone()],
    }))
    .expect("sentinel client");

    client.set(b"k", "v").unwrap();
    assert_eq!(master.string("k"), Some(b"v".to_vec()));
    assert_eq!(
        sentinel.commands(),
        vec![vec![
            "SENTINEL".to_string(),
            "get-master-addr-by-name".to_string(),
            "mymaster".to_string()
        ]]
    );
    assert!(!client.refresh_topology().unwrap());

    let caps = client.binding();
    let err = ukv_dispatch::TopologyBinding::capabilities(caps)
        .check(ukv_common::ProtocolCommand::ClusterNodes, Strategy::Direct)
        .unwrap_err();
    assert!(err.is_unsupported());
}

#[test]
fn cluster_routes_and_pins() {
    init_tracing();
    let first = MiniServer::spawn(Behavior::default());
    let second = MiniServer::spawn(Behavior::default());
    let mut template = PoolConfig::new("");
    template.read_timeout = Some(Duration::from_secs(2));
    let locator = |key: Option<&[u8]>, _nodes: usize| match key {
        Some(key) if key.starts_with(b"b") => 1,
        _ => 0,
    };
    let binding = ClusterBinding::with_locator(
        vec![first.addr.clone(), second.addr.clone()],
        template,
        locator,
    )
    .unwrap();
    let client = KvClient::with_binding(Binding::Cluster(binding), None);

    let mut batch = client.pipeline().unwrap();
    batch.set(b"a1", "x").unwrap();
    batch.set(b"b1", "y").unwrap();
    batch.get(b"a1").unwrap();
    batch.get(b"b1").unwrap();
    let keys = batch.commands().keys(b"*");
    assert!(batch.enqueue(keys).unwrap_err().is_unsupported());
    let results = ok_values(batch.flush().unwrap());
    assert_eq!(results[2], bytes(b"x"));
    assert_eq!(results[3], bytes(b"y"));
    assert_eq!(first.names(), vec!["SET", "GET"]);
    assert_eq!(second.names(), vec!["SET", "GET"]);

    let mut tx = client.transaction().unwrap();
    tx.set(b"a2", "1").unwrap();
    let err = tx.set(b"b2", "2").unwrap_err();
    assert!(err.is_unsupported());
    let results = ok_values(tx.commit().unwrap());
    assert_eq!(results, vec![Some(Value::Status(Status::Success))]);
    assert_eq!(first.string("a2"), Some(b"1".to_vec()));
    assert_eq!(second.string("b2"), None);
}
