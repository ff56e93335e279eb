//! # Synchronous Client API
//!
//! Purpose: Expose a compact, blocking API for scalar, counter, hash, and
//! key-enumeration commands against a RESP2 store.
//!
//! ## Design Principles
//! 1. **Facade Pattern**: `KVClient` hides pooling and protocol details.
//! 2. **Scoped Acquisition**: Every call borrows one connection and releases it
//!    on every exit path; the `PooledConnection` guard makes that structural.
//! 3. **Validate Before I/O**: Usage errors never touch the network.
//! 4. **Context Once**: Errors leave the facade wrapped with the operation and
//!    key, with values shown only as short previews.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use crate::config::{ClientConfig, HashReadErrors};
use crate::error::{preview, ClientError, ClientResult};
use crate::pool::ConnectionPool;
use crate::reconcile::reconcile;
use crate::resp::RespValue;
use crate::scan::{collect_keys, ScanIter, ScanSettings};

/// Per-client behavior that does not belong to the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientOptions {
    /// Deadline applied to every operation, including the pool wait.
    pub op_timeout: Option<Duration>,
    /// Bounds for key enumeration.
    pub scan: ScanSettings,
    /// Error policy for `hkeys` / `hgetall`.
    pub hash_read_errors: HashReadErrors,
}

impl ClientOptions {
    /// Extracts client options from a full configuration.
    pub fn from_config(config: &ClientConfig) -> Self {
        ClientOptions {
            op_timeout: config.op_timeout,
            scan: ScanSettings {
                max_iterations: config.scan_max_iterations,
                count: config.scan_count,
            },
            hash_read_errors: config.hash_read_errors,
        }
    }
}

impl Default for ClientOptions {
    fn default() -> Self {
        ClientOptions::from_config(&ClientConfig::default())
    }
}

/// Synchronous client with connection pooling.
///
/// Cheap to clone; clones share the pool. Each call acquires a connection,
/// executes its command(s), and returns the connection to the pool.
#[derive(Debug, Clone)]
pub struct KVClient {
    pool: ConnectionPool,
    options: ClientOptions,
}

impl KVClient {
    /// Opens a pool for `addr` with default configuration.
    pub fn connect(addr: impl Into<String>) -> ClientResult<Self> {
        Self::with_config(ClientConfig::new(addr))
    }

    /// Opens a pool from a custom configuration.
    pub fn with_config(config: ClientConfig) -> ClientResult<Self> {
        let pool = ConnectionPool::open(&config)?;
        Ok(KVClient::from_pool(pool, ClientOptions::from_config(&config)))
    }

    /// Binds a client to an existing pool.
    pub fn from_pool(pool: ConnectionPool, options: ClientOptions) -> Self {
        KVClient { pool, options }
    }

    /// Returns a client sharing this pool whose operations must finish within
    /// `timeout`. Expiry surfaces as a timeout error and the connection in use
    /// is discarded.
    pub fn with_timeout(&self, timeout: Duration) -> KVClient {
        let mut options = self.options;
        options.op_timeout = Some(timeout);
        KVClient {
            pool: self.pool.clone(),
            options,
        }
    }

    /// Returns a client sharing this pool with a different hash error policy.
    pub fn with_hash_read_errors(&self, policy: HashReadErrors) -> KVClient {
        let mut options = self.options;
        options.hash_read_errors = policy;
        KVClient {
            pool: self.pool.clone(),
            options,
        }
    }

    /// The shared pool.
    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// Options in effect.
    pub fn options(&self) -> ClientOptions {
        self.options
    }

    pub(crate) fn scan_settings(&self) -> ScanSettings {
        self.options.scan
    }

    /// A timeout too large to represent as an instant means no deadline.
    pub(crate) fn deadline(&self) -> Option<Instant> {
        self.options
            .op_timeout
            .and_then(|timeout| Instant::now().checked_add(timeout))
    }

    fn call(&self, args: &[&[u8]]) -> ClientResult<RespValue> {
        let deadline = self.deadline();
        let mut conn = self.pool.borrow_until(deadline)?;
        conn.exec_until(args, deadline)?.into_result()
    }

    /// Confirms the store is reachable.
    pub fn ping(&self) -> ClientResult<()> {
        let result = match self.call(&[b"PING"]) {
            Ok(RespValue::Simple(_)) | Ok(RespValue::Bulk(Some(_))) => Ok(()),
            Ok(_) => Err(ClientError::UnexpectedResponse),
            Err(err) => Err(err),
        };
        result.map_err(|err| err.context("ping", "cannot 'PING' store"))
    }

    /// Fetches a value by key.
    ///
    /// Returns `Ok(None)` when the key is missing; an empty value is
    /// `Ok(Some(vec![]))`.
    pub fn get(&self, key: &str) -> ClientResult<Option<Vec<u8>>> {
        let result = check_key(key).and_then(|()| match self.call(&[b"GET", key.as_bytes()])? {
            RespValue::Bulk(data) => Ok(data),
            _ => Err(ClientError::UnexpectedResponse),
        });
        result.map_err(|err| err.context("get", format!("error getting key {key}")))
    }

    /// Sets a value for a key without expiration.
    pub fn set(&self, key: &str, value: &[u8]) -> ClientResult<()> {
        let result = check_key(key).and_then(|()| match self.call(&[b"SET", key.as_bytes(), value])? {
            RespValue::Simple(_) => Ok(()),
            _ => Err(ClientError::UnexpectedResponse),
        });
        result.map_err(|err| {
            err.context("set", format!("error setting key {key} to {}", preview(value)))
        })
    }

    /// Returns true when the key exists.
    pub fn exists(&self, key: &str) -> ClientResult<bool> {
        let result = check_key(key).and_then(|()| match self.call(&[b"EXISTS", key.as_bytes()])? {
            RespValue::Integer(count) => Ok(count > 0),
            _ => Err(ClientError::UnexpectedResponse),
        });
        result.map_err(|err| err.context("exists", format!("error checking if key {key} exists")))
    }

    /// Deletes a key. Returns true when a key was removed; deleting an absent
    /// key is not an error.
    pub fn delete(&self, key: &str) -> ClientResult<bool> {
        let result = check_key(key).and_then(|()| match self.call(&[b"DEL", key.as_bytes()])? {
            RespValue::Integer(count) => Ok(count > 0),
            _ => Err(ClientError::UnexpectedResponse),
        });
        result.map_err(|err| err.context("delete", format!("error deleting key {key}")))
    }

    /// Increments a counter and returns the new value.
    ///
    /// An absent counter starts at 0. A non-numeric value is reported by the
    /// store as a server error.
    pub fn incr(&self, key: &str) -> ClientResult<i64> {
        let result = check_key(key).and_then(|()| match self.call(&[b"INCR", key.as_bytes()])? {
            RespValue::Integer(value) => Ok(value),
            _ => Err(ClientError::UnexpectedResponse),
        });
        result.map_err(|err| err.context("incr", format!("error incrementing counter {key}")))
    }

    /// Fetches several hash fields in one round-trip.
    ///
    /// Fields absent from the hash map to `None`. An empty `fields` slice is a
    /// usage error and issues no request.
    pub fn hget_many(&self, key: &str, fields: &[&str]) -> ClientResult<HashMap<String, Option<Vec<u8>>>> {
        let result = self.hget_many_inner(key, fields);
        result.map_err(|err| {
            err.context(
                "hget_many",
                format!("error getting fields {} of hash {key}", fields.join(",")),
            )
        })
    }

    fn hget_many_inner(&self, key: &str, fields: &[&str]) -> ClientResult<HashMap<String, Option<Vec<u8>>>> {
        check_key(key)?;
        if fields.is_empty() {
            return Err(ClientError::usage("at least one field is required"));
        }

        let mut args: Vec<&[u8]> = Vec::with_capacity(fields.len() + 2);
        args.push(b"HMGET");
        args.push(key.as_bytes());
        args.extend(fields.iter().map(|field| field.as_bytes()));

        let values = self.call(&args).and_then(|reply| match reply {
            RespValue::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    RespValue::Bulk(data) => Ok(data),
                    _ => Err(ClientError::UnexpectedResponse),
                })
                .collect::<ClientResult<Vec<_>>>()
                .map(Some),
            RespValue::NullArray => Ok(None),
            _ => Err(ClientError::UnexpectedResponse),
        });

        let names: Vec<String> = fields.iter().map(|field| field.to_string()).collect();
        reconcile(Some(names.as_slice()), values)
    }

    /// Lists the field names of a hash; an absent key yields an empty list.
    ///
    /// `HashReadErrors::Suppress` applies to store and transport failures,
    /// never to an invalid key.
    pub fn hkeys(&self, key: &str) -> ClientResult<Vec<String>> {
        let context = || format!("error listing fields of hash {key}");
        check_key(key).map_err(|err| err.context("hkeys", context()))?;
        match (self.hkeys_inner(key), self.options.hash_read_errors) {
            (Ok(names), _) => Ok(names),
            (Err(_), HashReadErrors::Suppress) => Ok(Vec::new()),
            (Err(err), HashReadErrors::Propagate) => Err(err.context("hkeys", context())),
        }
    }

    fn hkeys_inner(&self, key: &str) -> ClientResult<Vec<String>> {
        match self.call(&[b"HKEYS", key.as_bytes()])? {
            RespValue::Array(items) => items
                .into_iter()
                .map(|item| {
                    item.into_bytes()
                        .map(|raw| String::from_utf8_lossy(&raw).into_owned())
                        .ok_or(ClientError::UnexpectedResponse)
                })
                .collect(),
            RespValue::NullArray => Ok(Vec::new()),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Fetches every field of a hash; an absent key yields an empty map.
    pub fn hgetall(&self, key: &str) -> ClientResult<HashMap<String, Vec<u8>>> {
        let context = || format!("error getting all fields of hash {key}");
        check_key(key).map_err(|err| err.context("hgetall", context()))?;
        match (self.hgetall_inner(key), self.options.hash_read_errors) {
            (Ok(map), _) => Ok(map),
            (Err(_), HashReadErrors::Suppress) => Ok(HashMap::new()),
            (Err(err), HashReadErrors::Propagate) => Err(err.context("hgetall", context())),
        }
    }

    fn hgetall_inner(&self, key: &str) -> ClientResult<HashMap<String, Vec<u8>>> {
        let flat = match self.call(&[b"HGETALL", key.as_bytes()])? {
            RespValue::Array(items) => Some(items),
            RespValue::NullArray => None,
            _ => return Err(ClientError::UnexpectedResponse),
        };
        let (fields, values) = match flat {
            Some(items) => split_pairs(items).map(|(f, v)| (Some(f), Some(v)))?,
            None => (None, None),
        };
        reconcile(fields.as_deref(), Ok(values))
    }

    /// Sets one hash field.
    pub fn hset(&self, key: &str, field: &str, value: &[u8]) -> ClientResult<()> {
        let result = check_key(key)
            .and_then(|()| check_field(field))
            .and_then(|()| match self.call(&[b"HSET", key.as_bytes(), field.as_bytes(), value])? {
                RespValue::Integer(_) => Ok(()),
                _ => Err(ClientError::UnexpectedResponse),
            });
        result.map_err(|err| {
            err.context(
                "hset",
                format!("error setting field {field} of hash {key} to {}", preview(value)),
            )
        })
    }

    /// Lists keys matching a glob-style `pattern`.
    ///
    /// Runs the full `SCAN` loop on one connection. Keys come back in batch
    /// order and may repeat if the key set changes mid-scan. An error at any
    /// step discards the keys gathered so far.
    pub fn list_keys(&self, pattern: &str) -> ClientResult<Vec<String>> {
        self.list_keys_inner(pattern)
            .map_err(|err| err.context("list_keys", format!("error retrieving '{pattern}' keys")))
    }

    fn list_keys_inner(&self, pattern: &str) -> ClientResult<Vec<String>> {
        let deadline = self.deadline();
        let mut conn = self.pool.borrow_until(deadline)?;
        collect_keys(&mut conn, pattern, self.options.scan, deadline)
    }

    /// Like `list_keys`, but each key appears once, in first-seen order.
    pub fn list_keys_unique(&self, pattern: &str) -> ClientResult<Vec<String>> {
        let keys = self.list_keys(pattern)?;
        let mut seen = HashSet::with_capacity(keys.len());
        Ok(keys.into_iter().filter(|key| seen.insert(key.clone())).collect())
    }

    /// Caller-driven enumeration, one batch per round-trip.
    pub fn scan(&self, pattern: &str) -> ScanIter {
        ScanIter::new(self.clone(), pattern)
    }
}

fn check_key(key: &str) -> ClientResult<()> {
    if key.is_empty() {
        return Err(ClientError::usage("key must not be empty"));
    }
    Ok(())
}

fn check_field(field: &str) -> ClientResult<()> {
    if field.is_empty() {
        return Err(ClientError::usage("field must not be empty"));
    }
    Ok(())
}

/// Splits `[f1, v1, f2, v2, ...]` into field names and values.
///
/// An odd-length reply leaves one more field than values, which the
/// reconciler reports as a length mismatch.
fn split_pairs(items: Vec<RespValue>) -> ClientResult<(Vec<String>, Vec<Vec<u8>>)> {
    let mut fields = Vec::with_capacity(items.len() / 2 + 1);
    let mut values = Vec::with_capacity(items.len() / 2);
    for (idx, item) in items.into_iter().enumerate() {
        let raw = item.into_bytes().ok_or(ClientError::UnexpectedResponse)?;
        if idx % 2 == 0 {
            fields.push(String::from_utf8_lossy(&raw).into_owned());
        } else {
            values.push(raw);
        }
    }
    Ok((fields, values))
}
