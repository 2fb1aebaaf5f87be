//! Memoizing tenant hierarchy cache.
//!
//! Every query follows the same path:
//!
//! 1. Read the cache without locking and return on a hit.
//! 2. On a miss, take the partition lock for the query.
//! 3. Read the cache again, since a racing caller may have filled it.
//! 4. Still missing: ask the loader and store what it returns.
//! 5. Answer from the cache.
//!
//! Parent and ancestor queries share one partition per tenant because a
//! single ancestor-chain load answers both. Failed loads store nothing, so
//! the next caller retries.

use crate::loader::PooledTenantLoader;
use crate::partition::PartitionLock;
use crate::pool::WorkerPool;
use crate::stats::{HierarchyStats, HierarchyStatsSnapshot};
use arbor_core::{
    CacheError, ConfigError, HierarchyConfig, HierarchyContext, HierarchyError, HierarchyResult,
    HierarchyTopology, RemoteTenantService, TenantHierarchyApi, TenantId,
};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use once_cell::sync::OnceCell;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::runtime::Handle;

/// Which kind of load a partition serializes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryType {
    Root,
    Ancestors,
}

/// Partition lock key: one per (query type, tenant).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PartitionKey {
    pub query: QueryType,
    pub tenant_id: Option<TenantId>,
}

impl PartitionKey {
    pub fn root() -> Self {
        Self {
            query: QueryType::Root,
            tenant_id: None,
        }
    }

    pub fn ancestors(tenant_id: TenantId) -> Self {
        Self {
            query: QueryType::Ancestors,
            tenant_id: Some(tenant_id),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct CachedParent {
    /// `None` marks a root.
    parent: Option<TenantId>,
    stored_at: Instant,
}

/// Process-wide memo of tenant → parent relationships.
pub struct TenantHierarchyCache {
    root_id: OnceCell<TenantId>,
    tenants: DashMap<TenantId, CachedParent>,
    loader: Arc<dyn TenantHierarchyApi>,
    partitions: PartitionLock,
    config: HierarchyConfig,
    stats: HierarchyStats,
}

impl TenantHierarchyCache {
    /// Build a cache that fills itself from `loader`.
    pub fn new(
        loader: Arc<dyn TenantHierarchyApi>,
        config: HierarchyConfig,
    ) -> HierarchyResult<Self> {
        config.validate()?;
        let partitions = PartitionLock::new(config.lock_shards)?;

        Ok(Self {
            root_id: OnceCell::new(),
            tenants: DashMap::new(),
            loader,
            partitions,
            config,
            stats: HierarchyStats::new(),
        })
    }

    /// Build a cache over `remote`, loading through a dedicated worker pool
    /// of `config.pool_size` workers on the current tokio runtime.
    pub fn pooled(
        ctx: &HierarchyContext,
        remote: Arc<dyn RemoteTenantService>,
        config: HierarchyConfig,
    ) -> HierarchyResult<Self> {
        let runtime = Handle::try_current().map_err(|_| ConfigError::MissingRequired {
            field: "tokio runtime".to_string(),
        })?;
        Self::pooled_on(ctx, remote, config, &runtime)
    }

    /// Like [`TenantHierarchyCache::pooled`], with the pool's workers spawned
    /// on `runtime`.
    ///
    /// A loader override carried by `ctx` replaces the pooled loader. The
    /// pool is not tied to `ctx`'s cancellation; it lives as long as the
    /// cache and `runtime`.
    pub fn pooled_on(
        ctx: &HierarchyContext,
        remote: Arc<dyn RemoteTenantService>,
        config: HierarchyConfig,
        runtime: &Handle,
    ) -> HierarchyResult<Self> {
        config.validate()?;

        let loader: Arc<dyn TenantHierarchyApi> = match ctx.loader_override() {
            Some(loader) => {
                tracing::debug!("Using loader override for tenant hierarchy cache");
                Arc::clone(loader)
            }
            None => {
                let pool =
                    WorkerPool::spawn_on(&HierarchyContext::new(), config.pool_size, runtime)?;
                Arc::new(PooledTenantLoader::new(pool, remote))
            }
        };

        tracing::info!(
            pool_size = config.pool_size,
            lock_shards = config.lock_shards,
            eviction = ?config.eviction,
            topology = ?config.topology,
            "Tenant hierarchy cache created"
        );

        Self::new(loader, config)
    }

    pub fn config(&self) -> &HierarchyConfig {
        &self.config
    }

    pub fn stats(&self) -> HierarchyStatsSnapshot {
        self.stats.snapshot()
    }

    /// Number of tenant entries held, expired ones included.
    pub fn cached_len(&self) -> usize {
        self.tenants.len()
    }

    /// The root tenant, if it has been resolved.
    pub fn known_root(&self) -> Option<TenantId> {
        self.root_id.get().copied()
    }

    /// Drop expired entries. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let before = self.tenants.len();
        self.tenants.retain(|_, entry| !self.is_expired(entry));
        let purged = before.saturating_sub(self.tenants.len());
        if purged > 0 {
            tracing::debug!(purged, "Purged expired tenant hierarchy entries");
        }
        purged
    }

    // ------------------------------------------------------------------------
    // Load coordination
    // ------------------------------------------------------------------------

    async fn load<T, C, L, Fut>(
        &self,
        ctx: &HierarchyContext,
        key: PartitionKey,
        cached: C,
        load: L,
    ) -> HierarchyResult<T>
    where
        C: Fn() -> HierarchyResult<T>,
        L: FnOnce() -> Fut,
        Fut: Future<Output = HierarchyResult<()>>,
    {
        if let Some(result) = settled(cached()) {
            if result.is_ok() {
                self.stats.record_hit();
            }
            return result;
        }

        self.stats.record_miss();
        tracing::debug!(query = ?key.query, tenant_id = ?key.tenant_id, "Tenant hierarchy cache miss");

        let cached = &cached;
        let stats = &self.stats;
        self.partitions
            .with_partition_lock(&key, ctx, move || async move {
                if let Some(result) = settled(cached()) {
                    return result;
                }

                let outcome = load().await;
                stats.record_load(outcome.is_ok());
                outcome?;

                cached()
            })
            .await
    }

    async fn load_root(&self, ctx: &HierarchyContext) -> HierarchyResult<()> {
        let root = self.loader.root(ctx).await?;
        self.store_root(root);
        Ok(())
    }

    async fn load_ancestors(
        &self,
        ctx: &HierarchyContext,
        tenant_id: TenantId,
    ) -> HierarchyResult<()> {
        let ancestors = self.loader.ancestors(ctx, tenant_id).await?;
        self.store_ancestors(tenant_id, &ancestors);
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Cache reads
    // ------------------------------------------------------------------------

    fn cached_root(&self) -> HierarchyResult<TenantId> {
        self.known_root()
            .ok_or_else(|| HierarchyError::not_found_in_cache(None))
    }

    fn cached_parent(&self, tenant_id: TenantId) -> HierarchyResult<Option<TenantId>> {
        if self.is_known_root(tenant_id) {
            return Ok(None);
        }

        self.cached_entry(tenant_id)
            .ok_or_else(|| HierarchyError::not_found_in_cache(Some(tenant_id)))
    }

    fn cached_ancestors(&self, tenant_id: TenantId) -> HierarchyResult<Vec<TenantId>> {
        if self.is_known_root(tenant_id) {
            return Ok(Vec::new());
        }

        let mut chain = Vec::new();
        let mut current = tenant_id;
        let mut limit = self.tenants.len();

        loop {
            let parent = match self.cached_entry(current) {
                None => return Err(HierarchyError::not_found_in_cache(Some(current))),
                Some(None) => return Ok(chain),
                Some(Some(parent)) => parent,
            };

            // Each hop consumes a distinct entry, so a longer walk is a cycle.
            if chain.len() >= limit {
                limit = self.tenants.len();
                if chain.len() >= limit {
                    return Err(CacheError::CorruptChain {
                        tenant_id,
                        depth: chain.len(),
                    }
                    .into());
                }
            }

            chain.push(parent);
            if self.is_known_root(parent) {
                return Ok(chain);
            }
            current = parent;
        }
    }

    /// `None` on a miss, `Some(None)` for a tenant marked as a root.
    fn cached_entry(&self, tenant_id: TenantId) -> Option<Option<TenantId>> {
        let entry = self.tenants.get(&tenant_id)?;
        if self.is_expired(&entry) {
            return None;
        }
        Some(entry.parent)
    }

    fn is_known_root(&self, tenant_id: TenantId) -> bool {
        self.root_id.get() == Some(&tenant_id)
    }

    fn is_expired(&self, entry: &CachedParent) -> bool {
        self.config.eviction.is_expired(entry.stored_at.elapsed())
    }

    // ------------------------------------------------------------------------
    // Cache writes
    // ------------------------------------------------------------------------

    fn store_root(&self, root: TenantId) {
        if let Err(offered) = self.root_id.set(root) {
            if self.root_id.get() != Some(&offered) {
                tracing::warn!(
                    known_root = ?self.root_id.get(),
                    offered_root = %offered,
                    "Ignoring conflicting root tenant"
                );
            }
            return;
        }
        tracing::debug!(root = %root, "Root tenant resolved");
    }

    fn store_ancestors(&self, tenant_id: TenantId, ancestors: &[TenantId]) {
        let now = Instant::now();

        let mut child = tenant_id;
        for &parent in ancestors {
            self.store_parent(child, Some(parent), now);
            child = parent;
        }

        match (ancestors.last().copied(), self.config.topology) {
            (Some(root), HierarchyTopology::SingleTree) => {
                self.store_parent(root, None, now);
                self.store_root(root);
            }
            (Some(root), HierarchyTopology::Forest) => self.store_parent(root, None, now),
            (None, HierarchyTopology::SingleTree) => {
                if self.root_id.get().is_none() {
                    self.store_parent(tenant_id, None, now);
                    self.store_root(tenant_id);
                }
            }
            (None, HierarchyTopology::Forest) => self.store_parent(tenant_id, None, now),
        }

        tracing::debug!(
            tenant_id = %tenant_id,
            depth = ancestors.len(),
            "Stored tenant ancestors"
        );
    }

    /// Insert unless a live entry already exists. Entries are immutable
    /// until they expire.
    fn store_parent(&self, tenant_id: TenantId, parent: Option<TenantId>, now: Instant) {
        let fresh = CachedParent {
            parent,
            stored_at: now,
        };

        match self.tenants.entry(tenant_id) {
            Entry::Occupied(mut occupied) => {
                let existing = *occupied.get();
                if self.is_expired(&existing) {
                    occupied.insert(fresh);
                } else if existing.parent != parent {
                    tracing::warn!(
                        tenant_id = %tenant_id,
                        cached_parent = ?existing.parent,
                        offered_parent = ?parent,
                        "Ignoring conflicting tenant parent"
                    );
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(fresh);
            }
        }
    }
}

/// `None` for a cache miss; any other outcome is final.
fn settled<T>(result: HierarchyResult<T>) -> Option<HierarchyResult<T>> {
    match result {
        Err(err) if err.is_cache_miss() => None,
        other => Some(other),
    }
}

impl fmt::Debug for TenantHierarchyCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TenantHierarchyCache")
            .field("root_id", &self.known_root())
            .field("cached", &self.tenants.len())
            .field("partitions", &self.partitions)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl TenantHierarchyApi for TenantHierarchyCache {
    async fn parent(
        &self,
        ctx: &HierarchyContext,
        tenant_id: TenantId,
    ) -> HierarchyResult<Option<TenantId>> {
        self.load(
            ctx,
            PartitionKey::ancestors(tenant_id),
            || self.cached_parent(tenant_id),
            || self.load_ancestors(ctx, tenant_id),
        )
        .await
    }

    async fn ancestors(
        &self,
        ctx: &HierarchyContext,
        tenant_id: TenantId,
    ) -> HierarchyResult<Vec<TenantId>> {
        self.load(
            ctx,
            PartitionKey::ancestors(tenant_id),
            || self.cached_ancestors(tenant_id),
            || self.load_ancestors(ctx, tenant_id),
        )
        .await
    }

    async fn root(&self, ctx: &HierarchyContext) -> HierarchyResult<TenantId> {
        self.load(
            ctx,
            PartitionKey::root(),
            || self.cached_root(),
            || self.load_root(ctx),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_core::{EvictionPolicy, RemoteError, RemoteOperation};
    use arbor_test_utils::fixtures::*;
    use arbor_test_utils::{tenant, RecordingHierarchy, StaticTenantDirectory, TenantTree};
    use std::time::Duration;

    fn cache_over(
        directory: &Arc<StaticTenantDirectory>,
        config: HierarchyConfig,
    ) -> TenantHierarchyCache {
        let remote: Arc<dyn RemoteTenantService> = directory.clone();
        TenantHierarchyCache::pooled(&HierarchyContext::new(), remote, config).expect("cache")
    }

    #[tokio::test]
    async fn test_root_loads_once() {
        let directory = Arc::new(sample_directory());
        let cache = cache_over(&directory, HierarchyConfig::default());
        let ctx = HierarchyContext::new();

        assert_eq!(cache.root(&ctx).await, Ok(ROOT));
        assert_eq!(cache.root(&ctx).await, Ok(ROOT));
        assert_eq!(directory.calls(RemoteOperation::Root), 1);
        assert_eq!(cache.known_root(), Some(ROOT));
    }

    #[tokio::test]
    async fn test_root_failure_is_not_cached() {
        let directory = Arc::new(sample_directory());
        let cache = cache_over(&directory, HierarchyConfig::default());
        let ctx = HierarchyContext::new();

        directory.fail_next(1);
        assert!(cache.root(&ctx).await.is_err());
        assert_eq!(cache.known_root(), None);

        assert_eq!(cache.root(&ctx).await, Ok(ROOT));
        assert_eq!(directory.calls(RemoteOperation::Root), 2);
    }

    #[tokio::test]
    async fn test_parent_of_unresolved_root_infers_root() {
        let directory = Arc::new(sample_directory());
        let cache = cache_over(&directory, HierarchyConfig::default());
        let ctx = HierarchyContext::new();

        assert_eq!(cache.parent(&ctx, ROOT).await, Ok(None));
        assert_eq!(cache.known_root(), Some(ROOT));
        assert_eq!(cache.root(&ctx).await, Ok(ROOT));
        assert_eq!(directory.calls(RemoteOperation::Root), 0);
    }

    #[tokio::test]
    async fn test_ancestors_then_chain_served_from_cache() {
        let directory = Arc::new(sample_directory());
        let cache = cache_over(&directory, HierarchyConfig::default());
        let ctx = HierarchyContext::new();

        assert_eq!(
            cache.ancestors(&ctx, CUSTOMER).await,
            Ok(vec![PROVIDER, ROOT])
        );
        assert_eq!(cache.parent(&ctx, CUSTOMER).await, Ok(Some(PROVIDER)));
        assert_eq!(cache.parent(&ctx, PROVIDER).await, Ok(Some(ROOT)));
        assert_eq!(cache.ancestors(&ctx, PROVIDER).await, Ok(vec![ROOT]));
        assert_eq!(cache.ancestors(&ctx, ROOT).await, Ok(vec![]));
        assert_eq!(cache.parent(&ctx, ROOT).await, Ok(None));
        assert_eq!(cache.root(&ctx).await, Ok(ROOT));

        assert_eq!(directory.total_calls(), 1);
        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.remote_loads, 1);
        assert_eq!(stats.hits, 6);
    }

    #[tokio::test]
    async fn test_parent_uses_ancestor_load() {
        let directory = Arc::new(sample_directory());
        let cache = cache_over(&directory, HierarchyConfig::default());
        let ctx = HierarchyContext::new();

        assert_eq!(cache.parent(&ctx, SIBLING).await, Ok(Some(PROVIDER)));
        assert_eq!(directory.calls(RemoteOperation::Parent), 0);
        assert_eq!(directory.calls_for(RemoteOperation::Ancestors, SIBLING), 1);
    }

    #[tokio::test]
    async fn test_failed_load_retries_next_call() {
        let directory = Arc::new(sample_directory());
        let cache = cache_over(&directory, HierarchyConfig::default());
        let ctx = HierarchyContext::new();

        directory.fail_tenant(CUSTOMER);
        assert!(matches!(
            cache.ancestors(&ctx, CUSTOMER).await,
            Err(HierarchyError::Remote(RemoteError::LoadFailed { .. }))
        ));
        assert_eq!(cache.cached_len(), 0);

        directory.heal_tenant(CUSTOMER);
        assert_eq!(
            cache.ancestors(&ctx, CUSTOMER).await,
            Ok(vec![PROVIDER, ROOT])
        );
        assert_eq!(directory.calls_for(RemoteOperation::Ancestors, CUSTOMER), 2);
        assert_eq!(cache.stats().load_failures, 1);
    }

    #[tokio::test]
    async fn test_unknown_tenant_surfaces_remote_error() {
        let directory = Arc::new(sample_directory());
        let cache = cache_over(&directory, HierarchyConfig::default());

        assert_eq!(
            cache.ancestors(&HierarchyContext::new(), UNKNOWN).await,
            Err(RemoteError::TenantNotFound { tenant_id: UNKNOWN }.into())
        );
    }

    #[tokio::test]
    async fn test_empty_chain_for_non_root_after_root_known() {
        // A loader that claims a non-root tenant has no ancestors.
        let tree = TenantTree::new().with_root(ROOT).with_root(SECOND_ROOT);
        let cache = TenantHierarchyCache::new(
            Arc::new(RecordingHierarchy::new(tree)),
            HierarchyConfig::default(),
        )
        .expect("cache");
        let ctx = HierarchyContext::new();

        assert_eq!(cache.root(&ctx).await, Ok(ROOT));
        assert_eq!(
            cache.ancestors(&ctx, SECOND_ROOT).await,
            Err(HierarchyError::not_found_in_cache(Some(SECOND_ROOT)))
        );
    }

    #[tokio::test]
    async fn test_conflicting_root_is_ignored() {
        let directory = Arc::new(StaticTenantDirectory::new(sample_forest()));
        let cache = cache_over(&directory, HierarchyConfig::default());
        let ctx = HierarchyContext::new();

        assert_eq!(
            cache.ancestors(&ctx, CUSTOMER).await,
            Ok(vec![PROVIDER, ROOT])
        );
        assert_eq!(
            cache.ancestors(&ctx, SECOND_CHILD).await,
            Ok(vec![SECOND_ROOT])
        );
        assert_eq!(cache.known_root(), Some(ROOT));
    }

    #[tokio::test]
    async fn test_forest_topology_keeps_trees_apart() {
        let directory = Arc::new(StaticTenantDirectory::new(sample_forest()));
        let config = HierarchyConfig::default().with_topology(HierarchyTopology::Forest);
        let cache = cache_over(&directory, config);
        let ctx = HierarchyContext::new();

        assert_eq!(
            cache.ancestors(&ctx, SECOND_CHILD).await,
            Ok(vec![SECOND_ROOT])
        );
        assert_eq!(cache.known_root(), None);
        assert_eq!(cache.ancestors(&ctx, SECOND_ROOT).await, Ok(vec![]));
        assert_eq!(cache.parent(&ctx, SECOND_ROOT).await, Ok(None));

        assert_eq!(cache.ancestors(&ctx, ROOT).await, Ok(vec![]));
        assert_eq!(
            cache.ancestors(&ctx, CUSTOMER).await,
            Ok(vec![PROVIDER, ROOT])
        );

        assert_eq!(cache.root(&ctx).await, Ok(ROOT));
        assert_eq!(directory.calls(RemoteOperation::Root), 1);
        assert_eq!(directory.calls(RemoteOperation::Ancestors), 3);
    }

    #[tokio::test]
    async fn test_ttl_expires_entries_but_not_root() {
        let directory = Arc::new(sample_directory());
        let config = HierarchyConfig::default()
            .with_eviction(EvictionPolicy::Ttl(Duration::from_millis(30)));
        let cache = cache_over(&directory, config);
        let ctx = HierarchyContext::new();

        assert_eq!(
            cache.ancestors(&ctx, CUSTOMER).await,
            Ok(vec![PROVIDER, ROOT])
        );
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(cache.root(&ctx).await, Ok(ROOT));
        assert_eq!(directory.calls(RemoteOperation::Root), 0);

        assert_eq!(
            cache.ancestors(&ctx, CUSTOMER).await,
            Ok(vec![PROVIDER, ROOT])
        );
        assert_eq!(directory.calls_for(RemoteOperation::Ancestors, CUSTOMER), 2);
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let directory = Arc::new(sample_directory());
        let config = HierarchyConfig::default()
            .with_eviction(EvictionPolicy::Ttl(Duration::from_millis(20)));
        let cache = cache_over(&directory, config);
        let ctx = HierarchyContext::new();

        cache.ancestors(&ctx, CUSTOMER).await.expect("ancestors");
        assert_eq!(cache.cached_len(), 3);
        assert_eq!(cache.purge_expired(), 0);

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(cache.purge_expired(), 3);
        assert_eq!(cache.cached_len(), 0);
        assert_eq!(cache.known_root(), Some(ROOT));
    }

    #[tokio::test]
    async fn test_cycle_reported_as_corrupt_chain() {
        let cache = TenantHierarchyCache::new(
            Arc::new(RecordingHierarchy::default()),
            HierarchyConfig::default(),
        )
        .expect("cache");
        let now = Instant::now();
        cache.store_parent(tenant(1), Some(tenant(2)), now);
        cache.store_parent(tenant(2), Some(tenant(1)), now);

        assert!(matches!(
            cache.ancestors(&HierarchyContext::new(), tenant(1)).await,
            Err(HierarchyError::Cache(CacheError::CorruptChain { .. }))
        ));
        assert_eq!(cache.stats().hits, 0);
    }

    #[tokio::test]
    async fn test_is_ancestor() {
        let directory = Arc::new(sample_directory());
        let cache = cache_over(&directory, HierarchyConfig::default());
        let ctx = HierarchyContext::new();

        assert_eq!(cache.is_ancestor(&ctx, PROVIDER, CUSTOMER).await, Ok(true));
        assert_eq!(cache.is_ancestor(&ctx, ROOT, CUSTOMER).await, Ok(true));
        assert_eq!(cache.is_ancestor(&ctx, SIBLING, CUSTOMER).await, Ok(false));
    }

    #[tokio::test]
    async fn test_cancelled_context_returns_cancelled_on_miss() {
        let directory = Arc::new(sample_directory());
        let cache = cache_over(&directory, HierarchyConfig::default());
        let (ctx, cancel) = HierarchyContext::cancellable();
        cancel.send(true).expect("receiver alive");

        assert_eq!(
            cache.ancestors(&ctx, CUSTOMER).await,
            Err(HierarchyError::Cancelled)
        );
        assert_eq!(directory.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let result = TenantHierarchyCache::new(
            Arc::new(RecordingHierarchy::default()),
            HierarchyConfig::default().with_lock_shards(0),
        );
        assert!(matches!(result, Err(HierarchyError::Config(_))));
    }
}
