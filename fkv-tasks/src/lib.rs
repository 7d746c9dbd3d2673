//! # FlowKV Tasks
//!
//! Purpose: The operations flow steps call (`add`, `get`, `remove`,
//! `command`). Each takes the `ConnectionPool` by reference, resolves a
//! connection from the task's `ConnectionDescriptor`, and honors a
//! `CancellationToken` between batch items.

mod cancel;
mod flatten;
pub mod floor;
mod ops;

pub use cancel::CancellationToken;
pub use flatten::flatten_reply;
pub use floor::ThreadFloor;
pub use ops::{add, command, get, lease, remove, Lease};
