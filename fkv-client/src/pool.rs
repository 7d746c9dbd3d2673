//! # Connection Pool
//!
//! Purpose: Share one live connection per (connection string, timeout)
//! identity across every caller in the process, create it lazily on first
//! use, and tear everything down on shutdown.
//!
//! ## Design Principles
//! 1. **Single Creation**: At most one physical connection is created per
//!    identity, even when many threads miss the cache at the same time.
//! 2. **Minimal Locking**: The registry lock only guards O(1) map operations;
//!    connecting happens under a per-identity mutex, so a slow store never
//!    stalls callers of other identities.
//! 3. **No Poisoning**: A failed attempt retires its slot and removes it from
//!    the registry; the next caller starts from scratch.
//! 4. **Fail Fast**: The pool never retries; retry policy belongs to callers.
//!
//! ## Structure Overview
//!
//! ```text
//! ConnectionPool
//!   ├── store: S (connect capability)
//!   ├── registry: RwLock<HashMap<ConnectionIdentity, Arc<Slot>>>
//!   │     └── Slot
//!   │           ├── handle: OnceLock<Arc<H>>   (lock-free reads once published)
//!   │           └── retired: Mutex<bool>       (held while connecting)
//!   └── stats: Arc<PoolStats>
//! ```
//!
//! ## `get_or_create` Protocol
//!
//! 1. Read-lock the registry and return the published handle on a hit.
//! 2. Write-lock the registry and insert an empty slot if absent.
//! 3. Lock the slot, re-check for a handle published by a racing caller and
//!    restart if the slot was retired meanwhile.
//! 4. Connect. Publish on success; on failure retire the slot and drop it
//!    from the registry before returning the error.
//!
//! Lock order: the registry lock is never held while waiting on a slot lock.

use std::fmt;
use std::ops::Deref;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use ahash::RandomState;
use hashbrown::HashMap;
use parking_lot::{Mutex, RwLock};

use fkv_common::{ConnectionDescriptor, FkvResult};

use crate::config::redact;
use crate::metrics::{PoolStats, PoolStatsSnapshot};
use crate::store::{Store, StoreHandle};
use crate::tcp::TcpStore;

/// Cache key for pooled connections.
///
/// The timeout only affects the initial connect, yet two descriptors that
/// differ only in timeout still get separate connections.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionIdentity {
    timeout: Duration,
    connection_string: String,
}

impl ConnectionIdentity {
    pub fn new(connection_string: impl Into<String>, timeout: Duration) -> Self {
        ConnectionIdentity {
            timeout,
            connection_string: connection_string.into(),
        }
    }

    pub fn connection_string(&self) -> &str {
        &self.connection_string
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl From<&ConnectionDescriptor> for ConnectionIdentity {
    fn from(descriptor: &ConnectionDescriptor) -> Self {
        ConnectionIdentity::new(descriptor.connection_string.clone(), descriptor.timeout())
    }
}

impl fmt::Display for ConnectionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}s-{}",
            self.timeout.as_secs_f64(),
            redact(&self.connection_string)
        )
    }
}

struct Slot<H> {
    handle: OnceLock<Arc<H>>,
    // Held for the whole connect attempt; true once the slot left the registry.
    retired: Mutex<bool>,
}

impl<H> Slot<H> {
    fn new() -> Self {
        Slot {
            handle: OnceLock::new(),
            retired: Mutex::new(false),
        }
    }
}

type Registry<H> = HashMap<ConnectionIdentity, Arc<Slot<H>>, RandomState>;

/// Registry of shared store connections keyed by `ConnectionIdentity`.
///
/// Pass the pool by reference to whatever issues store calls; dropping it
/// runs `shutdown`.
pub struct ConnectionPool<S: Store = TcpStore> {
    store: S,
    registry: RwLock<Registry<S::Handle>>,
    stats: Arc<PoolStats>,
}

impl ConnectionPool<TcpStore> {
    /// Creates a pool that connects over TCP.
    pub fn tcp() -> Self {
        ConnectionPool::new(TcpStore)
    }
}

impl<S: Store> ConnectionPool<S> {
    /// Creates an empty pool on top of `store`.
    pub fn new(store: S) -> Self {
        ConnectionPool {
            store,
            registry: RwLock::new(HashMap::with_hasher(RandomState::new())),
            stats: Arc::new(PoolStats::new()),
        }
    }

    /// The underlying store capability.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Returns the shared handle for `identity`, connecting on first use.
    ///
    /// **Input**: the identity to resolve.
    /// **Output**: a handle shared with every other caller of the same identity.
    ///
    /// # Errors
    /// Propagates the store's connect failure unchanged (`IdentityInvalid`,
    /// `ConnectTimeout`, `ConnectionUnavailable`). The identity is left absent
    /// so the next call retries.
    pub fn get_or_create(&self, identity: &ConnectionIdentity) -> FkvResult<Arc<S::Handle>> {
        if let Some(handle) = self.lookup(identity) {
            self.stats.record_hit();
            return Ok(handle);
        }

        loop {
            let slot = self.slot_for(identity);
            let mut retired = slot.retired.lock();

            // A racing caller may have published while we waited for the lock.
            if let Some(handle) = slot.handle.get() {
                self.stats.record_hit();
                return Ok(Arc::clone(handle));
            }
            if *retired {
                continue;
            }

            match self.connect(identity.connection_string(), identity.timeout()) {
                Ok(handle) => {
                    let handle = Arc::new(handle);
                    let _ = slot.handle.set(Arc::clone(&handle));
                    tracing::debug!(identity = %identity, "created pooled store connection");
                    return Ok(handle);
                }
                Err(err) => {
                    *retired = true;
                    self.forget(identity, &slot);
                    tracing::warn!(identity = %identity, error = %err, "store connection failed");
                    return Err(err);
                }
            }
        }
    }

    /// Opens a fresh connection that bypasses the registry.
    ///
    /// The returned guard closes the connection when dropped or released.
    pub fn create_unpooled(
        &self,
        connection_string: &str,
        timeout: Duration,
    ) -> FkvResult<Unpooled<S::Handle>> {
        let handle = self.connect(connection_string, timeout)?;
        Ok(Unpooled {
            handle: Some(handle),
            stats: Arc::clone(&self.stats),
        })
    }

    /// Drops every cached connection and closes it.
    ///
    /// **Output**: number of handles that received a close attempt.
    ///
    /// **Logic**:
    /// 1. Swap the registry for an empty one under the write lock.
    /// 2. For each drained slot, wait out any in-flight connect and retire it.
    /// 3. Close the published handle; log and count failures, keep sweeping.
    ///
    /// Idempotent. The pool stays usable: later calls reconnect lazily.
    pub fn shutdown(&self) -> usize {
        let drained = std::mem::take(&mut *self.registry.write());
        if drained.is_empty() {
            return 0;
        }

        let mut closed = 0;
        for (identity, slot) in drained {
            let mut retired = slot.retired.lock();
            *retired = true;
            let Some(handle) = slot.handle.get() else {
                continue;
            };

            closed += 1;
            match handle.close() {
                Ok(()) => self.stats.record_close(true),
                Err(err) => {
                    self.stats.record_close(false);
                    tracing::warn!(identity = %identity, error = %err, "failed to close pooled store connection");
                }
            }
        }

        tracing::info!(closed, "connection pool shut down");
        closed
    }

    /// Returns true when a connection for `identity` is published.
    pub fn contains(&self, identity: &ConnectionIdentity) -> bool {
        self.lookup(identity).is_some()
    }

    /// Number of published connections.
    pub fn len(&self) -> usize {
        self.registry
            .read()
            .values()
            .filter(|slot| slot.handle.get().is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns a snapshot of pool counters.
    pub fn stats(&self) -> PoolStatsSnapshot {
        self.stats.snapshot()
    }

    fn lookup(&self, identity: &ConnectionIdentity) -> Option<Arc<S::Handle>> {
        let registry = self.registry.read();
        registry
            .get(identity)
            .and_then(|slot| slot.handle.get().cloned())
    }

    fn slot_for(&self, identity: &ConnectionIdentity) -> Arc<Slot<S::Handle>> {
        let mut registry = self.registry.write();
        let slot = registry
            .entry(identity.clone())
            .or_insert_with(|| Arc::new(Slot::new()));
        Arc::clone(slot)
    }

    fn forget(&self, identity: &ConnectionIdentity, slot: &Arc<Slot<S::Handle>>) {
        let mut registry = self.registry.write();
        if registry
            .get(identity)
            .is_some_and(|current| Arc::ptr_eq(current, slot))
        {
            registry.remove(identity);
        }
    }

    fn connect(&self, connection_string: &str, timeout: Duration) -> FkvResult<S::Handle> {
        let result = self.store.connect(connection_string, timeout);
        self.stats.record_connect(result.is_ok());
        result
    }
}

impl<S: Store> Drop for ConnectionPool<S> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// RAII guard for a connection that is not shared through the registry.
///
/// Closes the connection exactly once, either through `release` or on drop.
pub struct Unpooled<H: StoreHandle> {
    handle: Option<H>,
    stats: Arc<PoolStats>,
}

impl<H: StoreHandle> Unpooled<H> {
    /// Closes the connection and reports the close result.
    pub fn release(mut self) -> FkvResult<()> {
        match self.handle.take() {
            Some(handle) => close_owned(&handle, &self.stats),
            None => Ok(()),
        }
    }
}

impl<H: StoreHandle> Deref for Unpooled<H> {
    type Target = H;

    fn deref(&self) -> &H {
        // Only `release` and `drop` take the handle, and both consume the guard.
        self.handle.as_ref().expect("unpooled handle present until release")
    }
}

impl<H: StoreHandle> Drop for Unpooled<H> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            if let Err(err) = close_owned(&handle, &self.stats) {
                tracing::warn!(error = %err, "failed to close unpooled store connection");
            }
        }
    }
}

fn close_owned<H: StoreHandle>(handle: &H, stats: &PoolStats) -> FkvResult<()> {
    let result = handle.close();
    stats.record_close(result.is_ok());
    result
}
