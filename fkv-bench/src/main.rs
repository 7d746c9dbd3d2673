//! # Pool Benchmark Harness
//!
//! Purpose: Drive the task operations from many threads through one shared
//! `ConnectionPool` so throughput and connection reuse can be compared over
//! time.
//!
//! ## Design Principles
//! 1. **Deterministic Workload**: Each worker uses a fixed PRNG seed.
//! 2. **Self-Contained by Default**: Without `FLOWKV_CONNECTION_STRING` the
//!    harness starts an in-process fake server.
//! 3. **Floor-Sized Workers**: Worker count follows the process thread floor
//!    after the task options are applied.
//!
//! Usage: `fkv-bench [ops_per_worker] [key_count] [value_size]`

use std::env;
use std::hint::black_box;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde_json::json;
use tracing_subscriber::EnvFilter;

use fkv_client::ConnectionPool;
use fkv_common::{
    AddInput, ConnectionDescriptor, GetInput, KeyValuePairInput, ObjectType, StoreValue,
    TaskOptions,
};
use fkv_tasks::{add, floor, get, CancellationToken};
use fkv_testkit::FakeServer;

const DEFAULT_OP_COUNT: usize = 10_000;
const DEFAULT_KEY_COUNT: usize = 1 << 10;
const DEFAULT_VALUE_SIZE: usize = 64;

struct BenchConfig {
    op_count: usize,
    key_count: usize,
    value_size: usize,
}

impl BenchConfig {
    fn from_args() -> Self {
        let mut args = env::args().skip(1);
        BenchConfig {
            op_count: parse_usize(args.next(), DEFAULT_OP_COUNT),
            key_count: parse_usize(args.next(), DEFAULT_KEY_COUNT).max(1),
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

    fn next_index(&mut self, len: usize) -> usize {
        (self.next_u64() % len as u64) as usize
    }
}

fn report(label: &str, ops: usize, elapsed: Duration) {
    let secs = elapsed.as_secs_f64();
    let ops_per_sec = (ops as f64) / secs;
    let micros_per_op = (secs * 1e6) / (ops as f64);
    println!("{label}: {ops} ops in {secs:.3}s ({ops_per_sec:.0} ops/s, {micros_per_op:.1} us/op)");
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Err(err) = run() {
        eprintln!("fkv-bench failed: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let config = BenchConfig::from_args();
    let options = TaskOptions::default();
    let workers = floor::apply(&options).workers.max(1);

    let (_server, connection) = match env::var("FLOWKV_CONNECTION_STRING") {
        Ok(_) => (None, ConnectionDescriptor::from_env()),
        Err(_) => {
            let server = FakeServer::start().context("failed to start fake server")?;
            let connection = ConnectionDescriptor::new(server.connection_string());
            (Some(server), connection)
        }
    };
    tracing::info!(
        workers,
        ops = config.op_count,
        keys = config.key_count,
        "starting benchmark"
    );

    let keys: Vec<StoreValue> = (0..config.key_count)
        .map(|idx| StoreValue::from(format!("bench:{idx:08}")))
        .collect();
    let value = StoreValue::from("x".repeat(config.value_size));
    let pool = ConnectionPool::tcp();
    let cancel = CancellationToken::new();

    let start = Instant::now();
    thread::scope(|scope| -> Result<()> {
        let handles: Vec<_> = (0..workers)
            .map(|worker| {
                let (pool, keys, value, connection, cancel) = (&pool, &keys, &value, &connection, &cancel);
                scope.spawn(move || -> Result<()> {
                    let mut rng = XorShift64::new(0x1234_5678_9ABC_DEF0 ^ worker as u64);
                    for _ in 0..config.op_count {
                        let key = keys[rng.next_index(keys.len())].clone();
                        let input = AddInput {
                            input_object_type: ObjectType::KeyValuePair,
                            key_value_pair_input: vec![KeyValuePairInput::new(key, value.clone())],
                            set_input: Vec::new(),
                        };
                        black_box(add(pool, &input, connection, &options, cancel)?);
                    }
                    Ok(())
                })
            })
            .collect();
        for handle in handles {
            handle
                .join()
                .map_err(|_| anyhow::anyhow!("worker panicked"))??;
        }
        Ok(())
    })?;
    report("ADD", workers * config.op_count, start.elapsed());

    let start = Instant::now();
    thread::scope(|scope| -> Result<()> {
        let handles: Vec<_> = (0..workers)
            .map(|worker| {
                let (pool, keys, connection, cancel) = (&pool, &keys, &connection, &cancel);
                scope.spawn(move || -> Result<()> {
                    let mut rng = XorShift64::new(0x0FED_CBA9_8765_4321 ^ worker as u64);
                    for _ in 0..config.op_count {
                        let input = GetInput {
                            object_type: ObjectType::KeyValuePair,
                            key: vec![keys[rng.next_index(keys.len())].clone()],
                            set_key: None,
                        };
                        black_box(get(pool, &input, connection, &options, cancel)?);
                    }
                    Ok(())
                })
            })
            .collect();
        for handle in handles {
            handle
                .join()
                .map_err(|_| anyhow::anyhow!("worker panicked"))??;
        }
        Ok(())
    })?;
    report("GET", workers * config.op_count, start.elapsed());

    let stats = pool.stats();
    let closed = pool.shutdown();
    let summary = json!({
        "workers": workers,
        "connectsAttempted": stats.connects_attempted,
        "connectsFailed": stats.connects_failed,
        "cacheHits": stats.cache_hits,
        "closedAtShutdown": closed,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
