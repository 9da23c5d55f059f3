//! # Dispatch Benchmark Harness
//!
//! Purpose: Compare Direct round-trips with pipelined batches against a live
//! Redis-compatible server, so the cost of deferred dispatch can be tracked.
//!
//! ## Design Principles
//! 1. **Deterministic Workload**: Fixed PRNG seeds pick the keys.
//! 2. **Allocation Control**: Keys and values are built before timing starts.
//! 3. **Same Descriptors**: Both modes run the descriptors from `Commands`, so
//!    only the strategy differs between the measured loops.
//!
//! Usage: `ukv-bench [addr] [ops] [batch] [value_size]`

use std::env;
use std::hint::black_box;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use bytes::Bytes;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ukv_client::{ClientConfig, KvClient};

const DEFAULT_ADDR: &str = "127.0.0.1:6379";
const DEFAULT_OP_COUNT: usize = 100_000;
const DEFAULT_BATCH: usize = 64;
const DEFAULT_VALUE_SIZE: usize = 128;
const KEY_SPACE: usize = 1 << 12;

struct BenchConfig {
    addr: String,
    op_count: usize,
    batch: usize,
    value_size: usize,
}

impl BenchConfig {
    fn from_args() -> Self {
        let mut args = env::args().skip(1);
        let addr = args.next().unwrap_or_else(|| DEFAULT_ADDR.to_string());
        BenchConfig {
            addr,
            op_count: parse_usize(args.next(), DEFAULT_OP_COUNT),
            batch: parse_usize(args.next(), DEFAULT_BATCH).max(1),
            value_size: parse_usize(args.next(), DEFAULT_VALUE_SIZE),
        }
    }
}

fn parse_usize(value: Option<String>, fallback: usize) -> usize {
    value.and_then(|raw| raw.parse().ok()).unwrap_or(fallback)
}

struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }

    #[inline]
    fn next_index(&mut self) -> usize {
        (self.next_u64() as usize) & (KEY_SPACE - 1)
    }
}

fn report(label: &str, ops: usize, elapsed: Duration) {
    let secs = elapsed.as_secs_f64();
    let ops_per_sec = (ops as f64) / secs;
    let micros_per_op = (secs * 1e6) / (ops as f64);
    println!("{label}: {ops} ops in {secs:.3}s ({ops_per_sec:.0} ops/s, {micros_per_op:.2} us/op)");
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let config = BenchConfig::from_args();
    let client = KvClient::with_config(ClientConfig {
        max_idle: 1,
        max_total: 1,
        read_timeout_ms: Some(5_000),
        write_timeout_ms: Some(5_000),
        connect_timeout_ms: Some(1_000),
        key_prefix: Some("ukv-bench:".into()),
        ..ClientConfig::standalone(config.addr.as_str())
    })
    .with_context(|| format!("connecting to {}", config.addr))?;
    client.ping(None).context("server did not answer PING")?;

    let keys: Vec<Vec<u8>> = (0..KEY_SPACE).map(|i| format!("key:{i:05}").into_bytes()).collect();
    let value = Bytes::from(vec![b'x'; config.value_size]);
    info!(
        addr = %config.addr,
        ops = config.op_count,
        batch = config.batch,
        value_size = config.value_size,
        "starting benchmark"
    );

    let mut rng = XorShift64::new(0xA5A5_A5A5_A5A5_A5A5);
    let start = Instant::now();
    for _ in 0..config.op_count {
        client.set(&keys[rng.next_index()], value.clone())?;
    }
    report("SET direct", config.op_count, start.elapsed());

    let mut rng = XorShift64::new(0xA5A5_A5A5_A5A5_A5A5);
    let start = Instant::now();
    let mut failed = 0;
    for chunk in chunks(config.op_count, config.batch) {
        let mut batch = client.pipeline()?;
        for _ in 0..chunk {
            batch.set(&keys[rng.next_index()], value.clone())?;
        }
        failed += batch.flush()?.iter().filter(|r| r.is_err()).count();
    }
    report("SET pipelined", config.op_count, start.elapsed());

    let mut rng = XorShift64::new(0x0FED_CBA9_8765_4321);
    let start = Instant::now();
    for _ in 0..config.op_count {
        black_box(client.get(&keys[rng.next_index()])?);
    }
    report("GET direct", config.op_count, start.elapsed());

    let mut rng = XorShift64::new(0x0FED_CBA9_8765_4321);
    let start = Instant::now();
    for chunk in chunks(config.op_count, config.batch) {
        let mut batch = client.pipeline()?;
        for _ in 0..chunk {
            batch.get(&keys[rng.next_index()])?;
        }
        for result in batch.flush()? {
            match result {
                Ok(value) => {
                    black_box(value);
                }
                Err(_) => failed += 1,
            }
        }
    }
    report("GET pipelined", config.op_count, start.elapsed());

    if failed > 0 {
        bail!("{failed} pipelined commands failed");
    }
    Ok(())
}

/// Splits `total` into batch sizes of at most `size`.
fn chunks(total: usize, size: usize) -> impl Iterator<Item = usize> {
    (0..total).step_by(size).map(move |start| size.min(total - start))
}
