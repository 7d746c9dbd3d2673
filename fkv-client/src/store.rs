//! # Store Capability
//!
//! The pool only needs two things from a store: a way to open a handle and a
//! way to close it. Task operations additionally issue commands through the
//! handle. Keeping this behind traits lets tests count connects with a fake
//! and keeps the pool free of transport details.

use std::time::Duration;

use fkv_common::FkvResult;

use crate::resp::RespValue;

/// Factory for physical connections.
pub trait Store: Send + Sync {
    /// Handle type produced by `connect`.
    type Handle: StoreHandle;

    /// Opens one physical connection.
    ///
    /// Blocks for at most `timeout` while establishing the connection.
    fn connect(&self, connection_string: &str, timeout: Duration) -> FkvResult<Self::Handle>;
}

/// A live connection that many threads may share.
pub trait StoreHandle: Send + Sync + 'static {
    /// Executes one command and returns the raw reply.
    ///
    /// Error replies come back as `RespValue::Error`; only transport and
    /// framing failures are returned as `Err`.
    fn exec(&self, args: &[&[u8]]) -> FkvResult<RespValue>;

    /// Closes the connection. Later `exec` calls fail.
    fn close(&self) -> FkvResult<()>;
}
