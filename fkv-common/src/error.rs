//! # Error Taxonomy
//!
//! Purpose: Give every layer (codec, pool, store transport, task operations)
//! one error type so failures propagate unchanged with `?`.
//!
//! ## Design Principles
//! 1. **Fail Fast**: Nothing in this workspace retries internally; the variant
//!    tells the caller whether a retry could help.
//! 2. **Preserve Causes**: Transport failures keep the original `io::Error`.

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Result alias used across the workspace.
pub type FkvResult<T> = Result<T, FkvError>;

/// Errors surfaced by the pool, the store transport and the task operations.
#[derive(Debug, Error)]
pub enum FkvError {
    /// Malformed connection string. Not retried.
    #[error("invalid connection identity: {0}")]
    IdentityInvalid(String),

    /// The store did not accept the connection within the configured timeout.
    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// Transport-level failure while connecting or talking to the store.
    #[error("connection unavailable: {0}")]
    ConnectionUnavailable(#[from] io::Error),

    /// A task value cannot be represented as a store key or value.
    #[error("unsupported value type: {0}")]
    UnsupportedValueType(String),

    /// The store answered with a result the operation treats as failure.
    #[error("store operation failed: {0}")]
    StoreOperationFailed(String),

    /// The store returned an error reply.
    #[error("server error: {0}")]
    Server(String),

    /// RESP framing or parse error.
    #[error("protocol error")]
    Protocol,

    /// Reply type did not match the command that was sent.
    #[error("unexpected response")]
    UnexpectedResponse,

    /// Task input is missing required fields for the selected object type.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The caller's cancellation token fired between items.
    #[error("operation cancelled")]
    Cancelled,
}

impl FkvError {
    /// Returns `true` for failures a caller may retry with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FkvError::ConnectTimeout(_) | FkvError::ConnectionUnavailable(_)
        )
    }

    /// Returns `true` when the operation stopped because of cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, FkvError::Cancelled)
    }

    /// Builds a server error from a raw RESP error payload.
    pub fn server(message: &[u8]) -> Self {
        FkvError::Server(String::from_utf8_lossy(message).into_owned())
    }

    /// Closed-connection error used once a handle has been released.
    pub fn closed() -> Self {
        FkvError::ConnectionUnavailable(io::Error::new(
            io::ErrorKind::NotConnected,
            "connection closed",
        ))
    }
}
