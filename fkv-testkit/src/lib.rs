//! # FlowKV Test Kit
//!
//! A small in-memory, Redis-compatible server for exercising the blocking
//! client end to end without an external store.

mod protocol;
mod server;

pub use protocol::{RespError, RespParser};
pub use server::{FakeServer, FakeServerBuilder};
