//! # Cursor-Based Key Enumeration
//!
//! Purpose: Walk the store's `SCAN` pagination until the cursor returns to 0.
//!
//! ## Consistency
//! `SCAN` has no snapshot isolation. If keys change during the walk, a key may
//! be reported zero, one, or several times. Callers that need each key once
//! should deduplicate (`KVClient::list_keys_unique` does).
//!
//! ## Termination
//! A misbehaving store could hand out cursors forever, so every walk is bounded
//! by `max_iterations` round-trips and fails with `ScanNotTerminated` past it.

use std::time::Instant;

use crate::client::KVClient;
use crate::error::{ClientError, ClientResult};
use crate::pool::PooledConnection;
use crate::resp::RespValue;

/// Cursor value that both starts and ends an enumeration.
pub const CURSOR_START: u64 = 0;

/// Bounds applied to one enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanSettings {
    /// Maximum `SCAN` round-trips before giving up.
    pub max_iterations: usize,
    /// Optional `COUNT` hint per round-trip.
    pub count: Option<usize>,
}

/// Issues one `SCAN` and returns `(next_cursor, keys)`.
pub(crate) fn scan_page(
    conn: &mut PooledConnection,
    cursor: u64,
    pattern: &str,
    count: Option<usize>,
    deadline: Option<Instant>,
) -> ClientResult<(u64, Vec<String>)> {
    let cursor_arg = cursor.to_string();
    let count_arg = count.map(|count| count.to_string());
    let mut args: Vec<&[u8]> = vec![
        &b"SCAN"[..],
        cursor_arg.as_bytes(),
        &b"MATCH"[..],
        pattern.as_bytes(),
    ];
    if let Some(count_arg) = &count_arg {
        args.push(&b"COUNT"[..]);
        args.push(count_arg.as_bytes());
    }

    match conn.exec_until(&args, deadline)?.into_result()? {
        RespValue::Array(parts) => parse_page(parts),
        _ => Err(ClientError::UnexpectedResponse),
    }
}

fn parse_page(parts: Vec<RespValue>) -> ClientResult<(u64, Vec<String>)> {
    let mut parts = parts.into_iter();
    let (cursor, batch) = match (parts.next(), parts.next(), parts.next()) {
        (Some(cursor), Some(batch), None) => (cursor, batch),
        _ => return Err(ClientError::UnexpectedResponse),
    };

    let next = match cursor {
        RespValue::Bulk(Some(raw)) | RespValue::Simple(raw) => std::str::from_utf8(&raw)
            .ok()
            .and_then(|text| text.parse::<u64>().ok())
            .ok_or(ClientError::UnexpectedResponse)?,
        RespValue::Integer(value) if value >= 0 => value as u64,
        _ => return Err(ClientError::UnexpectedResponse),
    };

    let keys = match batch {
        RespValue::Array(items) => items
            .into_iter()
            .map(|item| match item.into_bytes() {
                Some(raw) => Ok(String::from_utf8_lossy(&raw).into_owned()),
                None => Err(ClientError::UnexpectedResponse),
            })
            .collect::<ClientResult<Vec<_>>>()?,
        RespValue::NullArray => Vec::new(),
        _ => return Err(ClientError::UnexpectedResponse),
    };

    Ok((next, keys))
}

/// Runs a complete enumeration on one connection.
///
/// Keys are returned in batch order. Any error discards the keys collected so
/// far.
pub(crate) fn collect_keys(
    conn: &mut PooledConnection,
    pattern: &str,
    settings: ScanSettings,
    deadline: Option<Instant>,
) -> ClientResult<Vec<String>> {
    let mut keys = Vec::new();
    let mut cursor = CURSOR_START;
    for _ in 0..settings.max_iterations {
        let (next, batch) = scan_page(conn, cursor, pattern, settings.count, deadline)?;
        keys.extend(batch);
        if next == CURSOR_START {
            return Ok(keys);
        }
        cursor = next;
    }
    Err(ClientError::ScanNotTerminated {
        pattern: pattern.to_string(),
        iterations: settings.max_iterations,
    })
}

/// Caller-driven enumeration yielding one batch per `SCAN` round-trip.
///
/// Each page borrows a connection for just that round-trip, so a paused
/// iterator holds no pool resources. The client's operation timeout applies
/// per page. After the first error the iterator is fused.
pub struct ScanIter {
    client: KVClient,
    pattern: String,
    cursor: u64,
    iterations: usize,
    done: bool,
}

impl ScanIter {
    pub(crate) fn new(client: KVClient, pattern: impl Into<String>) -> Self {
        ScanIter {
            client,
            pattern: pattern.into(),
            cursor: CURSOR_START,
            iterations: 0,
            done: false,
        }
    }

    /// Cursor the next page will be requested with.
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Round-trips issued so far.
    pub fn iterations(&self) -> usize {
        self.iterations
    }

    fn next_page(&mut self) -> ClientResult<Vec<String>> {
        let settings = self.client.scan_settings();
        if self.iterations >= settings.max_iterations {
            return Err(ClientError::ScanNotTerminated {
                pattern: self.pattern.clone(),
                iterations: self.iterations,
            });
        }
        let deadline = self.client.deadline();
        let mut conn = self.client.pool().borrow_until(deadline)?;
        let (next, batch) = scan_page(&mut conn, self.cursor, &self.pattern, settings.count, deadline)?;
        self.iterations += 1;
        self.cursor = next;
        if next == CURSOR_START {
            self.done = true;
        }
        Ok(batch)
    }
}

impl Iterator for ScanIter {
    type Item = ClientResult<Vec<String>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_page() {
            Ok(batch) => Some(Ok(batch)),
            Err(err) => {
                self.done = true;
                let context = format!("error retrieving '{}' keys", self.pattern);
                Some(Err(err.context("scan", context)))
            }
        }
    }
}

impl std::iter::FusedIterator for ScanIter {}

#[cfg(test)]
mod tests {
    use super::*;

    fn bulk(text: &str) -> RespValue {
        RespValue::Bulk(Some(text.as_bytes().to_vec()))
    }

    #[test]
    fn parses_page_with_bulk_cursor() {
        let page = parse_page(vec![
            bulk("42"),
            RespValue::Array(vec![bulk("user:1"), bulk("user:2")]),
        ])
        .unwrap();
        assert_eq!(page, (42, vec!["user:1".to_string(), "user:2".to_string()]));
    }

    #[test]
    fn parses_final_empty_page() {
        let page = parse_page(vec![bulk("0"), RespValue::Array(Vec::new())]).unwrap();
        assert_eq!(page, (0, Vec::new()));
    }

    #[test]
    fn rejects_malformed_pages() {
        assert!(parse_page(vec![bulk("x"), RespValue::Array(Vec::new())]).is_err());
        assert!(parse_page(vec![bulk("-1"), RespValue::Array(Vec::new())]).is_err());
        assert!(parse_page(vec![bulk("0")]).is_err());
        assert!(parse_page(vec![bulk("0"), RespValue::Integer(3)]).is_err());
        assert!(parse_page(vec![bulk("0"), RespValue::Array(vec![RespValue::Integer(1)])]).is_err());
        assert!(parse_page(vec![bulk("0"), RespValue::Array(Vec::new()), bulk("extra")]).is_err());
    }
}
