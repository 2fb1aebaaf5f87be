//! Keyed mutual exclusion over a bounded lock table.
//!
//! Callers holding the same key serialize; callers with different keys
//! usually proceed independently. Keys are hashed onto a fixed number of
//! shards, so memory stays bounded no matter how many distinct keys are seen,
//! at the price of occasional contention between unrelated keys that land on
//! the same shard.

use arbor_core::{ConfigError, HierarchyContext, HierarchyError, HierarchyResult};
use std::collections::hash_map::RandomState;
use std::fmt;
use std::future::Future;
use std::hash::{BuildHasher, Hash};
use tokio::sync::Mutex;

/// Sharded keyed mutex.
pub struct PartitionLock {
    shards: Box<[Mutex<()>]>,
    hasher: RandomState,
}

impl PartitionLock {
    /// Create a lock table with `shards` independent mutexes.
    pub fn new(shards: usize) -> Result<Self, ConfigError> {
        if shards == 0 {
            return Err(ConfigError::InvalidValue {
                field: "lock_shards".to_string(),
                value: shards.to_string(),
                reason: "at least one lock shard is required".to_string(),
            });
        }

        Ok(Self {
            shards: (0..shards).map(|_| Mutex::new(())).collect(),
            hasher: RandomState::new(),
        })
    }

    /// Number of shards in the table.
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Shard index a key maps to. Stable for the lifetime of this table.
    pub fn shard_for<K: Hash + ?Sized>(&self, key: &K) -> usize {
        (self.hasher.hash_one(key) % self.shards.len() as u64) as usize
    }

    /// Run `f` while holding the lock for `key`.
    ///
    /// The lock is released on every exit path, including errors, panics
    /// unwinding through `f`, and the caller dropping the returned future.
    /// Returns [`HierarchyError::Cancelled`] without running `f` if `ctx` is
    /// cancelled before the lock is acquired.
    pub async fn with_partition_lock<K, T, F, Fut>(
        &self,
        key: &K,
        ctx: &HierarchyContext,
        f: F,
    ) -> HierarchyResult<T>
    where
        K: Hash + fmt::Debug + ?Sized,
        F: FnOnce() -> Fut,
        Fut: Future<Output = HierarchyResult<T>>,
    {
        if ctx.is_cancelled() {
            return Err(HierarchyError::Cancelled);
        }

        let shard = self.shard_for(key);
        let _guard = tokio::select! {
            guard = self.shards[shard].lock() => guard,
            _ = ctx.cancelled() => {
                tracing::debug!(?key, shard, "Partition lock wait cancelled");
                return Err(HierarchyError::Cancelled);
            }
        };

        f().await
    }
}

impl fmt::Debug for PartitionLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartitionLock")
            .field("shards", &self.shards.len())
            .finish()
    }
}
