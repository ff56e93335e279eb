//! In-memory RESP store behind the `Connection` seam.
//!
//! Interprets the commands the client issues, pages `SCAN` results, and can
//! inject faults so pool accounting can be checked without a network.

#![allow(dead_code)]

use std::collections::{BTreeMap, VecDeque};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use rkv_client::{
    Backpressure, ClientError, ClientOptions, ClientResult, Connection, ConnectionPool, Dialer, KVClient,
    PoolConfig, RespValue,
};

/// Failure modes a command can be replaced with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Broken socket.
    Io,
    /// Deadline expired mid round-trip.
    Timeout,
    /// Store answered with an error reply.
    Server,
    /// Reply of the wrong type.
    Garbage,
}

#[derive(Default)]
struct State {
    strings: BTreeMap<String, Vec<u8>>,
    hashes: BTreeMap<String, BTreeMap<String, Vec<u8>>>,
    page_size: usize,
    endless_scan: bool,
    queued: VecDeque<Fault>,
    fault_rate: f64,
    rng: Option<StdRng>,
    commands: usize,
}

/// Shared fake store; clones see the same data.
#[derive(Clone)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
    dials: Arc<AtomicUsize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore {
            state: Arc::new(Mutex::new(State {
                page_size: 10,
                ..State::default()
            })),
            dials: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_page_size(self, page_size: usize) -> Self {
        self.state.lock().unwrap().page_size = page_size.max(1);
        self
    }

    pub fn endless_scan(self) -> Self {
        self.state.lock().unwrap().endless_scan = true;
        self
    }

    pub fn put(&self, key: &str, value: &[u8]) {
        self.state.lock().unwrap().strings.insert(key.to_string(), value.to_vec());
    }

    pub fn put_hash(&self, key: &str, field: &str, value: &[u8]) {
        self.state
            .lock()
            .unwrap()
            .hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_vec());
    }

    /// Replaces the next command with `fault`.
    pub fn inject(&self, fault: Fault) {
        self.state.lock().unwrap().queued.push_back(fault);
    }

    /// Fails each command with probability `rate`, deterministically per seed.
    pub fn set_fault_rate(&self, rate: f64, seed: u64) {
        let mut state = self.state.lock().unwrap();
        state.fault_rate = rate;
        state.rng = Some(StdRng::seed_from_u64(seed));
    }

    pub fn commands(&self) -> usize {
        self.state.lock().unwrap().commands
    }

    pub fn dials(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }

    pub fn dialer(&self) -> Arc<dyn Dialer> {
        let store = self.clone();
        Arc::new(move || -> ClientResult<Box<dyn Connection>> {
            store.dials.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(MemoryConnection {
                state: store.state.clone(),
            }))
        })
    }

    pub fn pool(&self, max_idle: usize, max_active: usize, backpressure: Backpressure) -> ConnectionPool {
        let config = PoolConfig {
            max_idle,
            max_active,
            backpressure,
        };
        ConnectionPool::with_dialer(config, self.dialer()).unwrap()
    }

    pub fn client(&self) -> KVClient {
        KVClient::from_pool(self.pool(2, 4, Backpressure::FailFast), ClientOptions::default())
    }
}

struct MemoryConnection {
    state: Arc<Mutex<State>>,
}

impl Connection for MemoryConnection {
    fn exec(&mut self, args: &[&[u8]], _timeout: Option<Duration>) -> ClientResult<RespValue> {
        let mut state = self.state.lock().unwrap();
        state.commands += 1;

        let mut fault = state.queued.pop_front();
        if fault.is_none() && state.fault_rate > 0.0 {
            let rate = state.fault_rate;
            if let Some(rng) = state.rng.as_mut() {
                if rng.gen_bool(rate) {
                    fault = Some(match rng.gen_range(0..4) {
                        0 => Fault::Io,
                        1 => Fault::Timeout,
                        2 => Fault::Server,
                        _ => Fault::Garbage,
                    });
                }
            }
        }
        match fault {
            Some(Fault::Io) => {
                return Err(ClientError::Io(io::Error::new(io::ErrorKind::BrokenPipe, "injected")))
            }
            Some(Fault::Timeout) => return Err(ClientError::Timeout),
            Some(Fault::Server) => return Ok(RespValue::Error(b"ERR injected".to_vec())),
            Some(Fault::Garbage) => return Ok(RespValue::Integer(-42)),
            None => {}
        }

        let args: Vec<String> = args.iter().map(|arg| String::from_utf8_lossy(arg).into_owned()).collect();
        Ok(state.dispatch(&args))
    }
}

impl State {
    fn dispatch(&mut self, args: &[String]) -> RespValue {
        let name = args[0].to_ascii_uppercase();
        match (name.as_str(), &args[1..]) {
            ("PING", []) => simple("PONG"),
            ("GET", [key]) => RespValue::Bulk(self.strings.get(key).cloned()),
            ("SET", [key, value]) => {
                self.strings.insert(key.clone(), value.as_bytes().to_vec());
                simple("OK")
            }
            ("EXISTS", [key]) => RespValue::Integer(self.contains(key) as i64),
            ("DEL", [key]) => {
                let removed = self.strings.remove(key).is_some() | self.hashes.remove(key).is_some();
                RespValue::Integer(removed as i64)
            }
            ("INCR", [key]) => {
                let current = match self.strings.get(key) {
                    Some(raw) => match std::str::from_utf8(raw).ok().and_then(|s| s.parse::<i64>().ok()) {
                        Some(value) => value,
                        None => return error("ERR value is not an integer or out of range"),
                    },
                    None => 0,
                };
                let next = current + 1;
                self.strings.insert(key.clone(), next.to_string().into_bytes());
                RespValue::Integer(next)
            }
            ("HMGET", [key, fields @ ..]) if !fields.is_empty() => {
                let hash = self.hashes.get(key);
                RespValue::Array(
                    fields
                        .iter()
                        .map(|field| RespValue::Bulk(hash.and_then(|h| h.get(field).cloned())))
                        .collect(),
                )
            }
            ("HKEYS", [key]) => RespValue::Array(
                self.hashes
                    .get(key)
                    .map(|h| h.keys().map(|field| bulk(field.as_bytes())).collect())
                    .unwrap_or_default(),
            ),
            ("HGETALL", [key]) => RespValue::Array(
                self.hashes
                    .get(key)
                    .map(|h| {
                        h.iter()
                            .flat_map(|(field, value)| [bulk(field.as_bytes()), bulk(value)])
                            .collect()
                    })
                    .unwrap_or_default(),
            ),
            ("HSET", [key, field, value]) => {
                let created = self
                    .hashes
                    .entry(key.clone())
                    .or_default()
                    .insert(field.clone(), value.as_bytes().to_vec())
                    .is_none();
                RespValue::Integer(created as i64)
            }
            ("SCAN", [cursor, _, pattern, ..]) => self.scan(cursor, pattern),
            _ => error("ERR unknown command"),
        }
    }

    fn contains(&self, key: &str) -> bool {
        self.strings.contains_key(key) || self.hashes.contains_key(key)
    }

    fn scan(&self, cursor: &str, pattern: &str) -> RespValue {
        let offset: usize = match cursor.parse() {
            Ok(offset) => offset,
            Err(_) => return error("ERR invalid cursor"),
        };
        if self.endless_scan {
            return RespValue::Array(vec![
                bulk((offset + 1).to_string().as_bytes()),
                RespValue::Array(Vec::new()),
            ]);
        }

        let keys: Vec<&String> = self.strings.keys().chain(self.hashes.keys()).collect();
        let mut sorted = keys;
        sorted.sort();
        let end = (offset + self.page_size).min(sorted.len());
        let batch = sorted[offset.min(end)..end]
            .iter()
            .filter(|key| glob_match(pattern.as_bytes(), key.as_bytes()))
            .map(|key| bulk(key.as_bytes()))
            .collect();
        let next = if end >= sorted.len() { 0 } else { end };
        RespValue::Array(vec![bulk(next.to_string().as_bytes()), RespValue::Array(batch)])
    }
}

fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    match (pattern.first(), text.first()) {
        (None, None) => true,
        (Some(b'*'), _) => glob_match(&pattern[1..], text) || (!text.is_empty() && glob_match(pattern, &text[1..])),
        (Some(b'?'), Some(_)) => glob_match(&pattern[1..], &text[1..]),
        (Some(p), Some(t)) if p == t => glob_match(&pattern[1..], &text[1..]),
        _ => false,
    }
}

fn simple(text: &str) -> RespValue {
    RespValue::Simple(text.as_bytes().to_vec())
}

fn error(text: &str) -> RespValue {
    RespValue::Error(text.as_bytes().to_vec())
}

fn bulk(data: &[u8]) -> RespValue {
    RespValue::Bulk(Some(data.to_vec()))
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
