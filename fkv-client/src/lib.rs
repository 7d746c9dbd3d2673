//! # FlowKV Client
//!
//! Purpose: Provide a synchronous, Redis-compatible client whose connections
//! are cached per (connection string, timeout) and shared by every thread in
//! the process.
//!
//! ## Design Principles
//! 1. **Shared Handles**: One multiplexed connection per identity instead of
//!    a pool of exclusive sockets.
//! 2. **Strategy Pattern**: `ConnectionPool` is generic over `Store`, so the
//!    TCP transport can be swapped for a test double.
//! 3. **Minimal Allocation**: Reuse buffers for RESP framing and parsing.
//! 4. **Protocol Clarity**: Encode/parse RESP explicitly for correctness.

mod config;
mod metrics;
mod pool;
mod resp;
mod store;
mod tcp;

pub use config::{redact, ConnectionConfig, Endpoint, DEFAULT_PORT};
pub use metrics::{PoolStats, PoolStatsSnapshot};
pub use pool::{ConnectionIdentity, ConnectionPool, Unpooled};
pub use resp::{encode_command, read_response, RespValue};
pub use store::{Store, StoreHandle};
pub use tcp::{TcpHandle, TcpStore};
