//! # Task Input/Output Types
//!
//! Purpose: Describe the payloads flow steps hand to the task operations and
//! the results they get back. All types are serde-friendly with camelCase
//! field names so a flow engine can pass JSON straight through.
//!
//! ## Design Principles
//! 1. **Boundary Decoding**: Values are `StoreValue` already, so malformed
//!    inputs fail during deserialization instead of deep in a batch.
//! 2. **Explicit Defaults**: Every optional knob has a documented default.

use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::value::StoreValue;

/// Default connect timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 5;

/// Default minimum worker threads requested by a task.
pub const DEFAULT_MIN_WORKERS: usize = 4;

/// Default minimum async I/O completion threads requested by a task.
pub const DEFAULT_MIN_IO_COMPLETION: usize = 1;

/// Connection string used by `ConnectionDescriptor::from_env` when unset.
pub const DEFAULT_CONNECTION_STRING: &str = "127.0.0.1:6379";

/// Which store structure a task reads or writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ObjectType {
    #[default]
    KeyValuePair,
    Set,
}

/// Write condition for key/value inserts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WhenValueExists {
    #[default]
    InsertAlways,
    InsertOnlyIfValueExists,
    InsertOnlyIfValueDoesNotExist,
}

impl WhenValueExists {
    /// Returns the `SET` condition flag, if any.
    pub fn set_flag(self) -> Option<&'static [u8]> {
        match self {
            WhenValueExists::InsertAlways => None,
            WhenValueExists::InsertOnlyIfValueExists => Some(b"XX"),
            WhenValueExists::InsertOnlyIfValueDoesNotExist => Some(b"NX"),
        }
    }
}

/// Where and how to connect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionDescriptor {
    /// Store connection string, e.g. `"cache.local:6379,password=secret"`.
    pub connection_string: String,
    /// Connect timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout: u64,
    /// Share a cached connection (recommended) instead of opening a fresh one.
    #[serde(default = "default_true")]
    pub use_cached_connection: bool,
}

impl ConnectionDescriptor {
    /// Creates a descriptor with the default timeout and pooling enabled.
    pub fn new(connection_string: impl Into<String>) -> Self {
        ConnectionDescriptor {
            connection_string: connection_string.into(),
            timeout: DEFAULT_TIMEOUT_SECS,
            use_cached_connection: true,
        }
    }

    /// Sets the connect timeout in seconds.
    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout = seconds;
        self
    }

    /// Requests a fresh, caller-owned connection instead of a cached one.
    pub fn unpooled(mut self) -> Self {
        self.use_cached_connection = false;
        self
    }

    /// Connect timeout as a `Duration`.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    /// Create a descriptor from environment variables.
    ///
    /// Reads:
    /// - `FLOWKV_CONNECTION_STRING` - connection string (defaults to "127.0.0.1:6379")
    /// - `FLOWKV_TIMEOUT` - connect timeout in seconds (defaults to 5)
    /// - `FLOWKV_USE_CACHED` - `false`/`0` disables pooling (defaults to true)
    pub fn from_env() -> Self {
        let connection_string = env::var("FLOWKV_CONNECTION_STRING")
            .unwrap_or_else(|_| DEFAULT_CONNECTION_STRING.to_string());
        let timeout = env::var("FLOWKV_TIMEOUT")
            .ok()
            .and_then(|raw| raw.trim().parse().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);
        let use_cached_connection = env::var("FLOWKV_USE_CACHED")
            .map(|raw| !matches!(raw.trim(), "0" | "false" | "FALSE" | "False"))
            .unwrap_or(true);

        ConnectionDescriptor {
            connection_string,
            timeout,
            use_cached_connection,
        }
    }
}

/// Process-level thread floor hint carried by every task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskOptions {
    /// Minimum number of worker threads.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Minimum number of asynchronous I/O completion threads.
    #[serde(default = "default_io_completion")]
    pub input_output_completion_ports: usize,
}

impl Default for TaskOptions {
    fn default() -> Self {
        TaskOptions {
            workers: DEFAULT_MIN_WORKERS,
            input_output_completion_ports: DEFAULT_MIN_IO_COMPLETION,
        }
    }
}

/// One key/value pair to insert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyValuePairInput {
    pub key: StoreValue,
    pub value: StoreValue,
    /// Expiration in seconds; `None` keeps the key until deleted.
    #[serde(default)]
    pub time_to_live: Option<u64>,
    #[serde(default)]
    pub value_exists: WhenValueExists,
}

impl KeyValuePairInput {
    pub fn new(key: impl Into<StoreValue>, value: impl Into<StoreValue>) -> Self {
        KeyValuePairInput {
            key: key.into(),
            value: value.into(),
            time_to_live: None,
            value_exists: WhenValueExists::InsertAlways,
        }
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.time_to_live.map(Duration::from_secs)
    }
}

/// A set key and the members to add or remove.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetInput {
    pub key: StoreValue,
    #[serde(default)]
    pub value: Vec<StoreValue>,
}

/// Input for the add task.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddInput {
    #[serde(default)]
    pub input_object_type: ObjectType,
    #[serde(default)]
    pub key_value_pair_input: Vec<KeyValuePairInput>,
    #[serde(default)]
    pub set_input: Vec<SetInput>,
}

/// Input for the get task.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetInput {
    #[serde(default)]
    pub object_type: ObjectType,
    /// Keys to read when `object_type` is `KeyValuePair`.
    #[serde(default)]
    pub key: Vec<StoreValue>,
    /// Set to read when `object_type` is `Set`.
    #[serde(default)]
    pub set_key: Option<StoreValue>,
}

/// Input for the remove task.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteInput {
    #[serde(default)]
    pub object_type: ObjectType,
    #[serde(default)]
    pub set_input: Option<SetInput>,
    #[serde(default)]
    pub key: Vec<StoreValue>,
}

/// Input for the raw command task.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandInput {
    /// Command name, optionally followed by literal words (e.g. `"CLIENT LIST"`).
    pub command: String,
    #[serde(default)]
    pub parameters: Vec<StoreValue>,
}

/// Generic task result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResult {
    /// Whether the store applied the operation.
    pub success: bool,
    /// Task-specific payload (echoed value, count, ...).
    pub value: Value,
}

impl TaskResult {
    pub fn new(success: bool, value: impl Into<Value>) -> Self {
        TaskResult {
            success,
            value: value.into(),
        }
    }
}

/// Output of the get task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GetOutput {
    /// One entry per requested key, `None` when the key is missing.
    Values(Vec<Option<StoreValue>>),
    /// Members of the requested set.
    Members(Vec<StoreValue>),
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_true() -> bool {
    true
}

fn default_workers() -> usize {
    DEFAULT_MIN_WORKERS
}

fn default_io_completion() -> usize {
    DEFAULT_MIN_IO_COMPLETION
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn descriptor_defaults_apply() {
        let descriptor: ConnectionDescriptor =
            serde_json::from_value(json!({"connectionString": "cache:6379"})).unwrap();
        assert_eq!(descriptor.timeout(), Duration::from_secs(5));
        assert!(descriptor.use_cached_connection);
    }

    #[test]
    fn add_input_decodes_camel_case() {
        let input: AddInput = serde_json::from_value(json!({
            "inputObjectType": "KeyValuePair",
            "keyValuePairInput": [
                {"key": "a", "value": 1, "timeToLive": 30, "valueExists": "InsertOnlyIfValueDoesNotExist"}
            ]
        }))
        .unwrap();
        let pair = &input.key_value_pair_input[0];
        assert_eq!(pair.key, StoreValue::from("a"));
        assert_eq!(pair.value, StoreValue::Int32(1));
        assert_eq!(pair.ttl(), Some(Duration::from_secs(30)));
        assert_eq!(pair.value_exists.set_flag(), Some(b"NX".as_slice()));
    }

    #[test]
    fn unsupported_value_fails_decoding() {
        let result = serde_json::from_value::<GetInput>(json!({"key": [{"bad": true}]}));
        assert!(result.is_err());
    }

    #[test]
    fn options_default_to_documented_floor() {
        let options: TaskOptions = serde_json::from_value(json!({})).unwrap();
        assert_eq!(options, TaskOptions::default());
        assert_eq!(options.workers, 4);
        assert_eq!(options.input_output_completion_ports, 1);
    }
}
