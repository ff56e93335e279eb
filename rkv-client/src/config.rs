//! # Client Configuration
//!
//! Plain configuration structs with `Default`, also deserializable so they can
//! be embedded in an application's own config file.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// What `borrow` does when every connection slot is checked out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backpressure {
    /// Return `PoolExhausted` immediately.
    FailFast,
    /// Wait up to `timeout` for a connection to be released.
    Block { timeout: Duration },
}

/// How `hkeys` and `hgetall` treat errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashReadErrors {
    /// Return the error to the caller.
    Propagate,
    /// Report any error as an empty result; an absent key and an unreachable
    /// store look the same.
    Suppress,
}

/// Pool sizing and backpressure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Maximum number of idle connections to keep.
    pub max_idle: usize,
    /// Maximum open connections (idle + checked out).
    pub max_active: usize,
    /// Behavior when `max_active` connections are open and none is idle.
    pub backpressure: Backpressure,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            max_idle: 8,
            max_active: 16,
            backpressure: Backpressure::FailFast,
        }
    }
}

/// Configuration for the client, its pool, and process setup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Store address, `host:port` or `redis://host:port`.
    pub addr: String,
    /// Maximum idle connections kept in the pool.
    pub max_idle: usize,
    /// Maximum open connections (idle + checked out).
    pub max_active: usize,
    /// Behavior when the pool is at capacity.
    pub backpressure: Backpressure,
    /// Optional TCP connect timeout.
    pub connect_timeout: Option<Duration>,
    /// Optional TCP read timeout.
    pub read_timeout: Option<Duration>,
    /// Optional TCP write timeout.
    pub write_timeout: Option<Duration>,
    /// Default per-operation deadline; `None` waits indefinitely.
    pub op_timeout: Option<Duration>,
    /// Upper bound on SCAN round-trips for one enumeration.
    pub scan_max_iterations: usize,
    /// Optional COUNT hint sent with each SCAN.
    pub scan_count: Option<usize>,
    /// Error policy for `hkeys` / `hgetall`.
    pub hash_read_errors: HashReadErrors,
    /// Issue a PING during setup so a bad address fails early.
    pub verify_on_setup: bool,
    /// Install the shutdown hook during setup.
    pub shutdown_hook: bool,
    /// Exit the process (status 0) after a termination signal closes the pool.
    pub exit_on_signal: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        let pool = PoolConfig::default();
        ClientConfig {
            addr: "127.0.0.1:6379".to_string(),
            max_idle: pool.max_idle,
            max_active: pool.max_active,
            backpressure: pool.backpressure,
            connect_timeout: Some(Duration::from_secs(5)),
            read_timeout: None,
            write_timeout: None,
            op_timeout: None,
            scan_max_iterations: 100_000,
            scan_count: None,
            hash_read_errors: HashReadErrors::Propagate,
            verify_on_setup: true,
            shutdown_hook: true,
            exit_on_signal: true,
        }
    }
}

impl ClientConfig {
    /// Default configuration pointed at `addr`.
    pub fn new(addr: impl Into<String>) -> Self {
        ClientConfig {
            addr: addr.into(),
            ..ClientConfig::default()
        }
    }

    /// Pool sizing extracted from this configuration.
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            max_idle: self.max_idle,
            max_active: self.max_active,
            backpressure: self.backpressure,
        }
    }
}
