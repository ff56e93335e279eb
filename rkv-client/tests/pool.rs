mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use common::{init_tracing, Fault, MemoryStore};
use rkv_client::{Backpressure, ClientOptions, HashReadErrors, KVClient};

#[test]
fn outstanding_connections_never_exceed_active_cap() {
    init_tracing();
    let store = MemoryStore::new();
    let pool = store.pool(
        2,
        4,
        Backpressure::Block {
            timeout: Duration::from_secs(10),
        },
    );
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let workers: Vec<_> = (0..16)
        .map(|_| {
            let pool = pool.clone();
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            thread::spawn(move || {
                for _ in 0..25 {
                    let mut conn = pool.borrow().expect("borrow");
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    assert!(pool.stats().open <= 4);
                    conn.exec(&[b"PING"]).expect("ping");
                    thread::sleep(Duration::from_micros(200));
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().expect("worker");
    }

    assert!(peak.load(Ordering::SeqCst) <= 4);
    let stats = pool.stats();
    assert_eq!(stats.borrowed, 16 * 25);
    assert_eq!(stats.borrowed, stats.released);
    assert_eq!(stats.checked_out, 0);
    assert!(stats.idle <= 2);
    assert!(store.dials() <= 4 + stats.discarded as usize);
}

#[test]
fn every_borrow_is_released_under_injected_faults() {
    init_tracing();
    let store = MemoryStore::new().with_page_size(3);
    for idx in 0..20 {
        store.put(&format!("key:{idx}"), b"v");
    }
    store.put_hash("h", "a", b"1");
    store.set_fault_rate(0.3, 7);

    let client = KVClient::from_pool(store.pool(2, 4, Backpressure::FailFast), ClientOptions::default());
    let mut rng = StdRng::seed_from_u64(99);
    let mut failures = 0;
    for _ in 0..1000 {
        let result = match rng.gen_range(0..9) {
            0 => client.ping().map(|_| ()),
            1 => client.get("key:1").map(|_| ()),
            2 => client.set("key:2", b"value").map(|_| ()),
            3 => client.exists("key:3").map(|_| ()),
            4 => client.delete("key:missing").map(|_| ()),
            5 => client.incr("counter").map(|_| ()),
            6 => client.hget_many("h", &["a", "b"]).map(|_| ()),
            7 => client.hgetall("h").map(|_| ()),
            _ => client.list_keys("key:*").map(|_| ()),
        };
        if result.is_err() {
            failures += 1;
        }
    }

    assert!(failures > 0, "fault injection never fired");
    let stats = client.pool().stats();
    assert_eq!(stats.borrowed, stats.released);
    assert_eq!(stats.checked_out, 0);
    assert!(stats.open <= 4);
}

#[test]
fn transport_faults_discard_and_redial() {
    let store = MemoryStore::new();
    let client = store.client();
    store.inject(Fault::Io);
    assert!(client.ping().unwrap_err().is_transport());
    client.ping().expect("ping after redial");
    assert_eq!(store.dials(), 2);
    assert_eq!(client.pool().stats().discarded, 1);
}

#[test]
fn server_and_shape_faults_keep_connection() {
    let store = MemoryStore::new();
    let client = store.client();
    store.inject(Fault::Server);
    assert!(client.get("k").is_err());
    store.inject(Fault::Garbage);
    assert!(client.get("k").is_err());
    client.ping().expect("ping");
    assert_eq!(store.dials(), 1);
    assert_eq!(client.pool().stats().discarded, 0);
}

#[test]
fn close_twice_then_borrow_fails() {
    let store = MemoryStore::new();
    let client = store.client();
    client.ping().expect("ping");
    client.pool().close();
    client.pool().close();
    let err = client.get("k").unwrap_err();
    assert!(err.is_pool_closed());
    let stats = client.pool().stats();
    assert!(stats.closed);
    assert_eq!(stats.idle, 0);
    assert_eq!(stats.open, 0);
}

#[test]
fn close_during_concurrent_use_does_not_leak() {
    let store = MemoryStore::new();
    let client = store.client();
    let workers: Vec<_> = (0..4)
        .map(|_| {
            let client = client.clone();
            thread::spawn(move || {
                for _ in 0..200 {
                    if let Err(err) = client.incr("hits") {
                        assert!(err.is_pool_closed() || err.root().to_string().contains("exhausted"));
                    }
                }
            })
        })
        .collect();
    thread::sleep(Duration::from_millis(2));
    client.pool().close();
    for worker in workers {
        worker.join().expect("worker");
    }
    let stats = client.pool().stats();
    assert_eq!(stats.borrowed, stats.released);
    assert_eq!(stats.open, 0);
}

#[test]
fn unrepresentable_timeouts_mean_no_limit() {
    let store = MemoryStore::new();
    let client = store.client().with_timeout(Duration::MAX);
    client.ping().expect("ping");
    client.set("k", b"v").expect("set");
    assert_eq!(client.list_keys("*").expect("list_keys"), vec!["k".to_string()]);
    assert!(client.scan("*").all(|page| page.is_ok()));

    let blocking = KVClient::from_pool(
        store.pool(1, 1, Backpressure::Block { timeout: Duration::MAX }),
        ClientOptions::default(),
    );
    assert_eq!(blocking.incr("n").expect("incr"), 1);
    assert_eq!(blocking.pool().stats().checked_out, 0);
}

#[test]
fn hash_reads_propagate_by_default_and_suppress_on_request() {
    let store = MemoryStore::new();
    store.put_hash("h", "a", b"1");
    let client = store.client();

    store.inject(Fault::Io);
    assert!(client.hkeys("h").is_err());
    store.inject(Fault::Io);
    assert!(client.hgetall("h").is_err());

    let lenient = client.with_hash_read_errors(HashReadErrors::Suppress);
    store.inject(Fault::Io);
    assert_eq!(lenient.hkeys("h").expect("suppressed"), Vec::<String>::new());
    store.inject(Fault::Server);
    assert!(lenient.hgetall("h").expect("suppressed").is_empty());
    assert_eq!(lenient.hkeys("h").expect("hkeys"), vec!["a".to_string()]);

    // Caller mistakes are never suppressed.
    let commands = store.commands();
    assert!(lenient.hkeys("").unwrap_err().is_usage());
    assert!(lenient.hgetall("").unwrap_err().is_usage());
    assert_eq!(store.commands(), commands);
}
