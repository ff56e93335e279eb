//! # Client Errors
//!
//! Purpose: One error type for every client operation, split into the
//! categories callers need to tell apart: transport, usage, shape, and
//! pool lifecycle.
//!
//! ## Design Principles
//! 1. **Typed Categories**: "store unreachable" and "store replied in an
//!    unexpected shape" are different variants, never the same string.
//! 2. **Context Once**: Operations wrap their error exactly once with the
//!    operation name and key; classification helpers look through the wrapper.
//! 3. **Bounded Messages**: Values only ever appear as short previews.

use std::io;

use thiserror::Error;

/// Result type for the client.
pub type ClientResult<T> = Result<T, ClientError>;

/// Values longer than this are previewed instead of printed in full.
const PREVIEW_LIMIT: usize = 15;

/// Number of bytes kept in a truncated preview.
const PREVIEW_KEEP: usize = 12;

/// Response violated the structural contract of a multi-value reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ShapeError {
    /// Field list or value list was absent.
    #[error("cannot pair fields with values: one or both sequences are nil")]
    NilResult,
    /// Field and value lists have different lengths.
    #[error("cannot pair {fields} fields with {values} values: lengths differ")]
    LengthMismatch { fields: usize, values: usize },
}

/// Errors surfaced by the client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Network or IO failure while reading/writing an established session.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    /// Dialing the store failed.
    #[error("cannot connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },
    /// Address could not be parsed.
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    /// RESP2 framing or parse error.
    #[error("protocol error")]
    Protocol,
    /// Deadline expired before the round-trip (or pool wait) completed.
    #[error("operation timed out")]
    Timeout,
    /// Server returned an error reply.
    #[error("server error: {}", String::from_utf8_lossy(.message))]
    Server { message: Vec<u8> },
    /// Reply type did not match the issued command.
    #[error("unexpected response")]
    UnexpectedResponse,
    /// Reply shape could not be reconciled with the request.
    #[error("shape error: {0}")]
    Shape(#[from] ShapeError),
    /// Caller supplied invalid arguments; no I/O was issued.
    #[error("usage error: {0}")]
    Usage(String),
    /// Pool is at capacity and no connection became available in time.
    #[error("connection pool exhausted")]
    PoolExhausted,
    /// Pool was closed; no further connections are handed out.
    #[error("connection pool closed")]
    PoolClosed,
    /// Scan cursor never returned to zero within the iteration guard.
    #[error("scan of '{pattern}' did not terminate after {iterations} iterations")]
    ScanNotTerminated { pattern: String, iterations: usize },
    /// Operation-level context around a lower-level error.
    #[error("{context}: {source}")]
    Command {
        op: &'static str,
        context: String,
        #[source]
        source: Box<ClientError>,
    },
}

impl ClientError {
    /// Builds a usage error.
    pub fn usage(message: impl Into<String>) -> Self {
        ClientError::Usage(message.into())
    }

    /// Wraps `self` with operation context.
    pub(crate) fn context(self, op: &'static str, context: impl Into<String>) -> Self {
        ClientError::Command {
            op,
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Returns the innermost error, skipping operation context.
    pub fn root(&self) -> &ClientError {
        match self {
            ClientError::Command { source, .. } => source.root(),
            other => other,
        }
    }

    /// Name of the operation that failed, if the error carries context.
    pub fn operation(&self) -> Option<&'static str> {
        match self {
            ClientError::Command { op, .. } => Some(op),
            _ => None,
        }
    }

    /// True for dial, IO, framing, and timeout failures.
    pub fn is_transport(&self) -> bool {
        matches!(
            self.root(),
            ClientError::Io(_)
                | ClientError::Connect { .. }
                | ClientError::Protocol
                | ClientError::Timeout
        )
    }

    /// True when the caller's arguments were rejected before any I/O.
    pub fn is_usage(&self) -> bool {
        matches!(self.root(), ClientError::Usage(_))
    }

    /// True when the reply was reachable but structurally wrong.
    pub fn is_shape(&self) -> bool {
        matches!(self.root(), ClientError::Shape(_))
    }

    /// True when a deadline expired.
    pub fn is_timeout(&self) -> bool {
        matches!(self.root(), ClientError::Timeout)
    }

    /// True when the pool had already been closed.
    pub fn is_pool_closed(&self) -> bool {
        matches!(self.root(), ClientError::PoolClosed)
    }

    /// True when the connection that produced this error must not be reused.
    pub(crate) fn poisons_connection(&self) -> bool {
        self.is_transport()
    }
}

/// Renders a bounded preview of an opaque value for error messages.
pub fn preview(value: &[u8]) -> String {
    if value.len() > PREVIEW_LIMIT {
        format!("{}...", String::from_utf8_lossy(&value[..PREVIEW_KEEP]))
    } else {
        String::from_utf8_lossy(value).into_owned()
    }
}
