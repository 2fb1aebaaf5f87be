//! Remote tenant loads executed on the worker pool.

use crate::pool::{JobOptions, WorkerPool};
use arbor_core::{
    HierarchyContext, HierarchyResult, RemoteTenantService, TenantHierarchyApi, TenantId,
};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// [`TenantHierarchyApi`] that forwards every query to a
/// [`RemoteTenantService`], one pool job per call.
///
/// Bursts of cache misses queue on the pool instead of fanning out to the
/// remote service.
#[derive(Clone)]
pub struct PooledTenantLoader {
    pool: WorkerPool,
    remote: Arc<dyn RemoteTenantService>,
}

impl PooledTenantLoader {
    pub fn new(pool: WorkerPool, remote: Arc<dyn RemoteTenantService>) -> Self {
        Self { pool, remote }
    }

    fn options(name: &'static str, ctx: &HierarchyContext) -> JobOptions {
        JobOptions::new().named(name).with_context(ctx.clone())
    }
}

impl fmt::Debug for PooledTenantLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledTenantLoader")
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl TenantHierarchyApi for PooledTenantLoader {
    async fn parent(
        &self,
        ctx: &HierarchyContext,
        tenant_id: TenantId,
    ) -> HierarchyResult<Option<TenantId>> {
        let remote = Arc::clone(&self.remote);
        self.pool
            .run(
                move |ctx| async move {
                    tracing::debug!(tenant_id = %tenant_id, "Loading tenant parent");
                    remote.get_parent(&ctx, tenant_id).await
                },
                Self::options("parent", ctx),
            )
            .await
    }

    async fn ancestors(
        &self,
        ctx: &HierarchyContext,
        tenant_id: TenantId,
    ) -> HierarchyResult<Vec<TenantId>> {
        let remote = Arc::clone(&self.remote);
        self.pool
            .run(
                move |ctx| async move {
                    tracing::debug!(tenant_id = %tenant_id, "Loading tenant ancestors");
                    let ancestors = remote.get_ancestors(&ctx, tenant_id).await?;
                    tracing::debug!(
                        tenant_id = %tenant_id,
                        depth = ancestors.len(),
                        "Loaded tenant ancestors"
                    );
                    Ok(ancestors)
                },
                Self::options("ancestors", ctx),
            )
            .await
    }

    async fn root(&self, ctx: &HierarchyContext) -> HierarchyResult<TenantId> {
        let remote = Arc::clone(&self.remote);
        self.pool
            .run(
                move |ctx| async move {
                    tracing::debug!("Loading root tenant");
                    remote.get_root(&ctx).await
                },
                Self::options("root", ctx),
            )
            .await
    }
}
