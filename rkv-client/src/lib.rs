//! # rkv Sync Client
//!
//! Purpose: Provide a blocking, pooled client for RESP2 key/value stores:
//! scalar get/set/delete, existence checks, counters, hash fields, and
//! pattern-based key enumeration.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: Reuse connections; bound how many are open.
//! 2. **Scoped Acquisition**: Every operation releases its connection on every
//!    exit path.
//! 3. **Typed Failures**: Transport, usage, and shape errors stay distinct.
//! 4. **Explicit Lifecycle**: Pools are owned values; shutdown is a cancellable
//!    task, not hidden global state.
//!
//! ## Example
//!
//! ```rust,no_run
//! use rkv_client::{setup_database, ClientConfig};
//!
//! let db = setup_database(ClientConfig::new("127.0.0.1:6379"))?;
//! let client = db.client();
//! client.set("user:1", b"alice")?;
//! assert_eq!(client.get("user:1")?, Some(b"alice".to_vec()));
//! let users = client.list_keys("user:*")?;
//! # let _ = users;
//! # Ok::<(), rkv_client::ClientError>(())
//! ```

mod client;
mod config;
mod conn;
mod database;
mod error;
mod pool;
mod reconcile;
mod resp;
mod scan;
mod shutdown;

pub use client::{ClientOptions, KVClient};
pub use config::{Backpressure, ClientConfig, HashReadErrors, PoolConfig};
pub use conn::{parse_address, Connection, Dialer, TcpConnection, TcpDialer};
pub use database::{setup_database, Database};
pub use error::{preview, ClientError, ClientResult, ShapeError};
pub use pool::{ConnectionPool, PoolStats, PooledConnection};
pub use reconcile::reconcile;
pub use resp::{encode_command, read_response, RespValue};
pub use scan::{ScanIter, ScanSettings, CURSOR_START};
pub use shutdown::{HookOptions, ShutdownHook, ShutdownReason};
