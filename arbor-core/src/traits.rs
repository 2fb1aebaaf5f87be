//! Trait seams around the hierarchy cache.
//!
//! [`RemoteTenantService`] is the expensive collaborator the cache protects.
//! [`TenantHierarchyApi`] is what the cache (and every loader or test double
//! standing in for it) exposes to consumers.

use crate::{HierarchyContext, HierarchyResult, TenantId};
use async_trait::async_trait;

/// Tenant-management service that answers hierarchy questions remotely.
///
/// Implementations typically wrap a REST client. Errors are propagated to
/// callers verbatim and are never cached.
#[async_trait]
pub trait RemoteTenantService: Send + Sync {
    /// Fetch the distinguished root tenant.
    async fn get_root(&self, ctx: &HierarchyContext) -> HierarchyResult<TenantId>;

    /// Fetch the immediate parent, `None` for a root tenant.
    async fn get_parent(
        &self,
        ctx: &HierarchyContext,
        tenant_id: TenantId,
    ) -> HierarchyResult<Option<TenantId>>;

    /// Fetch the ancestor chain ordered from immediate parent to root.
    async fn get_ancestors(
        &self,
        ctx: &HierarchyContext,
        tenant_id: TenantId,
    ) -> HierarchyResult<Vec<TenantId>>;
}

/// Tenant hierarchy queries consumed by tenant access control.
#[async_trait]
pub trait TenantHierarchyApi: Send + Sync {
    /// Parent of `tenant_id`, `None` for the root.
    async fn parent(
        &self,
        ctx: &HierarchyContext,
        tenant_id: TenantId,
    ) -> HierarchyResult<Option<TenantId>>;

    /// Consecutive ancestors of `tenant_id`, starting with the immediate
    /// parent and ending with the root. Empty for the root itself.
    async fn ancestors(
        &self,
        ctx: &HierarchyContext,
        tenant_id: TenantId,
    ) -> HierarchyResult<Vec<TenantId>>;

    /// The root tenant id.
    async fn root(&self, ctx: &HierarchyContext) -> HierarchyResult<TenantId>;

    /// Whether `candidate` appears in the ancestor chain of `tenant_id`.
    async fn is_ancestor(
        &self,
        ctx: &HierarchyContext,
        candidate: TenantId,
        tenant_id: TenantId,
    ) -> HierarchyResult<bool> {
        Ok(self.ancestors(ctx, tenant_id).await?.contains(&candidate))
    }
}
