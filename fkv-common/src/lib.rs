// fkv-common - Shared types for FlowKV
//
// This crate defines the error taxonomy, the store value codec and the task
// input/output types consumed by the client and the task operations.

pub mod error;
pub mod types;
pub mod value;

// Re-export for convenience
pub use error::*;
pub use types::*;
pub use value::*;
