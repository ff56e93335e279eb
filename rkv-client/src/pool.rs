//! # Connection Pool
//!
//! Purpose: Reuse store connections across operations while bounding how
//! many are open at once.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: Keep a bounded set of reusable connections.
//! 2. **Minimal Locking**: Hold the mutex only while moving idle connections
//!    and adjusting counters; dialing happens outside the lock.
//! 3. **Explicit Backpressure**: At capacity the pool either fails fast or
//!    waits on a condition variable with a bound, never unbounded.
//! 4. **RAII Release**: `PooledConnection` returns itself on drop, so every
//!    exit path of an operation releases exactly once.
//!
//! ## State Overview
//!
//! ```text
//! ConnectionPool (Arc, cheap to clone)
//!   └── PoolInner
//!         ├── dialer: Arc<dyn Dialer>
//!         ├── state: Mutex<PoolState { idle, open, closed }>
//!         ├── available: Condvar      (signalled on release/discard/close)
//!         └── counters: dialed / borrowed / released / discarded
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::config::{Backpressure, ClientConfig, PoolConfig};
use crate::conn::{Connection, Dialer, TcpDialer};
use crate::error::{ClientError, ClientResult};
use crate::resp::RespValue;

struct PoolState {
    idle: VecDeque<Box<dyn Connection>>,
    // Idle plus checked out; never exceeds `max_active`.
    open: usize,
    closed: bool,
}

struct PoolInner {
    config: PoolConfig,
    dialer: Arc<dyn Dialer>,
    state: Mutex<PoolState>,
    available: Condvar,
    dialed: AtomicU64,
    borrowed: AtomicU64,
    released: AtomicU64,
    discarded: AtomicU64,
}

/// Point-in-time view of pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Connections waiting in the idle set.
    pub idle: usize,
    /// Open connections (idle + checked out).
    pub open: usize,
    /// Connections currently held by callers.
    pub checked_out: usize,
    /// Connections dialed over the pool's lifetime.
    pub dialed: u64,
    /// Successful borrows.
    pub borrowed: u64,
    /// Handles given back (reused or discarded).
    pub released: u64,
    /// Connections dropped instead of reused.
    pub discarded: u64,
    /// Whether `close` has run.
    pub closed: bool,
}

/// Connection pool handle.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("config", &self.inner.config)
            .field("stats", &self.stats())
            .finish()
    }
}

impl ConnectionPool {
    /// Opens a TCP pool for the configured address.
    ///
    /// No connection is dialed until the first borrow.
    pub fn open(config: &ClientConfig) -> ClientResult<Self> {
        let dialer = TcpDialer::new(config)?;
        tracing::info!(
            addr = dialer.addr(),
            max_idle = config.max_idle,
            max_active = config.max_active,
            "connection pool opened"
        );
        ConnectionPool::with_dialer(config.pool_config(), Arc::new(dialer))
    }

    /// Creates a pool backed by an arbitrary dialer.
    pub fn with_dialer(config: PoolConfig, dialer: Arc<dyn Dialer>) -> ClientResult<Self> {
        if config.max_active == 0 {
            return Err(ClientError::usage("max_active must be at least 1"));
        }
        let state = PoolState {
            idle: VecDeque::with_capacity(config.max_idle.min(config.max_active)),
            open: 0,
            closed: false,
        };
        Ok(ConnectionPool {
            inner: Arc::new(PoolInner {
                config,
                dialer,
                state: Mutex::new(state),
                available: Condvar::new(),
                dialed: AtomicU64::new(0),
                borrowed: AtomicU64::new(0),
                released: AtomicU64::new(0),
                discarded: AtomicU64::new(0),
            }),
        })
    }

    /// Pool sizing in effect.
    pub fn config(&self) -> PoolConfig {
        self.inner.config
    }

    /// Borrows a connection using the configured backpressure policy.
    pub fn borrow(&self) -> ClientResult<PooledConnection> {
        self.borrow_until(None)
    }

    /// Borrows a connection, waiting no later than `deadline`.
    ///
    /// The wait is bounded by whichever is earlier: the deadline or the
    /// `Backpressure::Block` timeout. Under `FailFast` the deadline only
    /// matters if it has already passed.
    pub fn borrow_until(&self, deadline: Option<Instant>) -> ClientResult<PooledConnection> {
        let conn = match self.checkout(deadline)? {
            Slot::Idle(conn) => conn,
            Slot::Reserved => match self.inner.dialer.dial() {
                Ok(conn) => {
                    self.inner.dialed.fetch_add(1, Ordering::Relaxed);
                    conn
                }
                Err(err) => {
                    self.release_slot();
                    return Err(err);
                }
            },
        };
        self.inner.borrowed.fetch_add(1, Ordering::Relaxed);
        Ok(PooledConnection {
            pool: self.inner.clone(),
            conn: Some(conn),
            valid: true,
        })
    }

    fn checkout(&self, deadline: Option<Instant>) -> ClientResult<Slot> {
        let wait = match self.inner.config.backpressure {
            Backpressure::FailFast => Wait::FailFast,
            // An unrepresentable block timeout waits without bound.
            Backpressure::Block { timeout } => match (Instant::now().checked_add(timeout), deadline) {
                (Some(block), Some(deadline)) => Wait::Until(block.min(deadline)),
                (Some(block), None) => Wait::Until(block),
                (None, Some(deadline)) => Wait::Until(deadline),
                (None, None) => Wait::Forever,
            },
        };

        let mut state = self.inner.state.lock();
        loop {
            if state.closed {
                return Err(ClientError::PoolClosed);
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Err(ClientError::Timeout);
            }
            if let Some(conn) = state.idle.pop_front() {
                return Ok(Slot::Idle(conn));
            }
            if state.open < self.inner.config.max_active {
                state.open += 1;
                return Ok(Slot::Reserved);
            }

            let until = match wait {
                Wait::FailFast => return Err(ClientError::PoolExhausted),
                Wait::Forever => {
                    self.inner.available.wait(&mut state);
                    continue;
                }
                Wait::Until(until) => until,
            };
            if self.inner.available.wait_until(&mut state, until).timed_out() {
                // One last look: a release may have raced with the timeout.
                if state.closed {
                    return Err(ClientError::PoolClosed);
                }
                if let Some(conn) = state.idle.pop_front() {
                    return Ok(Slot::Idle(conn));
                }
                if state.open < self.inner.config.max_active {
                    state.open += 1;
                    return Ok(Slot::Reserved);
                }
                return Err(if deadline.is_some_and(|d| d <= until) {
                    ClientError::Timeout
                } else {
                    ClientError::PoolExhausted
                });
            }
        }
    }

    fn release_slot(&self) {
        let mut state = self.inner.state.lock();
        state.open = state.open.saturating_sub(1);
        drop(state);
        self.inner.available.notify_one();
    }

    /// Closes the pool.
    ///
    /// Idle connections are dropped now; checked-out connections are dropped
    /// when their holders release them. Later borrows fail with `PoolClosed`.
    /// Calling this more than once is a no-op.
    pub fn close(&self) {
        let drained = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            let drained: Vec<_> = state.idle.drain(..).collect();
            state.open = state.open.saturating_sub(drained.len());
            drained
        };
        self.inner.available.notify_all();
        let dropped = drained.len();
        // Sockets close outside the lock.
        drop(drained);
        tracing::info!(dropped_idle = dropped, "connection pool closed");
    }

    /// Whether `close` has run.
    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Returns a snapshot of pool counters.
    pub fn stats(&self) -> PoolStats {
        let (idle, open, closed) = {
            let state = self.inner.state.lock();
            (state.idle.len(), state.open, state.closed)
        };
        PoolStats {
            idle,
            open,
            checked_out: open.saturating_sub(idle),
            dialed: self.inner.dialed.load(Ordering::Relaxed),
            borrowed: self.inner.borrowed.load(Ordering::Relaxed),
            released: self.inner.released.load(Ordering::Relaxed),
            discarded: self.inner.discarded.load(Ordering::Relaxed),
            closed,
        }
    }
}

enum Slot {
    Idle(Box<dyn Connection>),
    Reserved,
}

#[derive(Clone, Copy)]
enum Wait {
    FailFast,
    Until(Instant),
    Forever,
}

impl PoolInner {
    fn give_back(&self, conn: Box<dyn Connection>, valid: bool) {
        self.released.fetch_add(1, Ordering::Relaxed);
        let mut state = self.state.lock();
        let discard = if valid && !state.closed && state.idle.len() < self.config.max_idle {
            state.idle.push_back(conn);
            None
        } else {
            state.open = state.open.saturating_sub(1);
            Some(conn)
        };
        drop(state);
        self.available.notify_one();

        if let Some(conn) = discard {
            self.discarded.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(valid, "discarding connection");
            drop(conn);
        }
    }
}

/// A connection checked out of the pool for one logical operation.
///
/// Dropping the handle releases it: healthy connections go back to the idle
/// set, connections that saw a transport error are discarded.
pub struct PooledConnection {
    pool: Arc<PoolInner>,
    conn: Option<Box<dyn Connection>>,
    valid: bool,
}

impl PooledConnection {
    /// Executes a command and returns the parsed reply.
    ///
    /// A server error reply is returned as `Ok(RespValue::Error)`; only
    /// transport-level failures poison the connection.
    pub fn exec(&mut self, args: &[&[u8]]) -> ClientResult<RespValue> {
        self.exec_until(args, None)
    }

    /// Executes a command that must complete before `deadline`.
    pub fn exec_until(&mut self, args: &[&[u8]], deadline: Option<Instant>) -> ClientResult<RespValue> {
        if !self.valid {
            return Err(ClientError::Protocol);
        }
        let timeout = match deadline {
            Some(deadline) => match remaining(deadline) {
                Some(left) => Some(left),
                None => return Err(ClientError::Timeout),
            },
            None => None,
        };
        let conn = match self.conn.as_mut() {
            Some(conn) => conn,
            None => return Err(ClientError::Protocol),
        };
        let response = conn.exec(args, timeout);
        if let Err(err) = &response {
            if err.poisons_connection() {
                // Protocol state is unknown; never hand this one out again.
                self.valid = false;
            }
        }
        response
    }

    /// Marks the connection as unusable so it is discarded on release.
    pub fn invalidate(&mut self) {
        self.valid = false;
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.give_back(conn, self.valid);
        }
    }
}

fn remaining(deadline: Instant) -> Option<Duration> {
    deadline
        .checked_duration_since(Instant::now())
        .filter(|left| !left.is_zero())
}
