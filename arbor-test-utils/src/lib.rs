//! ARBOR Test Utilities
//!
//! Shared test infrastructure for the ARBOR workspace:
//! - `StaticTenantDirectory`, an in-memory remote tenant service with call
//!   accounting and fault injection
//! - `RecordingHierarchy`, a canned hierarchy for override injection
//! - Proptest generators for tenant trees
//! - Fixtures and assertions for common scenarios

pub use arbor_core::{
    CacheError, ConfigError, HierarchyContext, HierarchyError, HierarchyResult, PoolError,
    RemoteError, RemoteOperation, RemoteTenantService, TenantHierarchyApi, TenantId,
};

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use uuid::Uuid;

/// Deterministic tenant id for test `n`.
pub const fn tenant(n: u128) -> TenantId {
    TenantId::new(Uuid::from_u128(n))
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// TENANT TREES
// ============================================================================

/// A static parent map describing one or more tenant trees.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TenantTree {
    roots: Vec<TenantId>,
    parents: HashMap<TenantId, Option<TenantId>>,
}

impl TenantTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a root tenant. The first root added is the primary root.
    pub fn with_root(mut self, root: TenantId) -> Self {
        self.roots.push(root);
        self.parents.insert(root, None);
        self
    }

    pub fn with_child(mut self, child: TenantId, parent: TenantId) -> Self {
        self.parents.insert(child, Some(parent));
        self
    }

    /// The primary root, if any root was added.
    pub fn root(&self) -> Option<TenantId> {
        self.roots.first().copied()
    }

    pub fn roots(&self) -> &[TenantId] {
        &self.roots
    }

    pub fn contains(&self, tenant_id: TenantId) -> bool {
        self.parents.contains_key(&tenant_id)
    }

    /// All tenants in ascending id order.
    pub fn tenants(&self) -> Vec<TenantId> {
        let mut tenants: Vec<_> = self.parents.keys().copied().collect();
        tenants.sort();
        tenants
    }

    /// `None` if the tenant is unknown, `Some(None)` for a root.
    pub fn parent_of(&self, tenant_id: TenantId) -> Option<Option<TenantId>> {
        self.parents.get(&tenant_id).copied()
    }

    /// Ancestor chain from immediate parent to root, `None` if unknown.
    pub fn ancestors_of(&self, tenant_id: TenantId) -> Option<Vec<TenantId>> {
        let mut chain = Vec::new();
        let mut current = self.parent_of(tenant_id)?;
        while let Some(parent) = current {
            if chain.len() > self.parents.len() {
                break;
            }
            chain.push(parent);
            current = self.parent_of(parent).flatten();
        }
        Some(chain)
    }

    /// Number of tenants in the tree.
    pub fn len(&self) -> usize {
        self.parents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parents.is_empty()
    }
}

// ============================================================================
// IN-MEMORY REMOTE SERVICE
// ============================================================================

/// One recorded call against a [`StaticTenantDirectory`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RemoteCall {
    operation: RemoteOperation,
    tenant_id: Option<TenantId>,
}

#[derive(Debug, Default)]
struct FaultPlan {
    fail_next: usize,
    failing: HashSet<TenantId>,
    panicking: HashSet<TenantId>,
}

/// In-memory [`RemoteTenantService`] backed by a [`TenantTree`].
///
/// Records every call, tracks how many calls overlap, and can be told to
/// fail or panic on demand.
#[derive(Debug, Default)]
pub struct StaticTenantDirectory {
    tree: TenantTree,
    latency: Duration,
    calls: Mutex<Vec<RemoteCall>>,
    faults: Mutex<FaultPlan>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl StaticTenantDirectory {
    pub fn new(tree: TenantTree) -> Self {
        Self {
            tree,
            ..Self::default()
        }
    }

    /// Delay every answer by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Fail the next `count` calls, whatever they ask for.
    pub fn fail_next(&self, count: usize) {
        lock(&self.faults).fail_next = count;
    }

    /// Fail every call concerning `tenant_id` until healed.
    pub fn fail_tenant(&self, tenant_id: TenantId) {
        lock(&self.faults).failing.insert(tenant_id);
    }

    pub fn heal_tenant(&self, tenant_id: TenantId) {
        lock(&self.faults).failing.remove(&tenant_id);
    }

    /// Panic inside every call concerning `tenant_id`.
    pub fn panic_on(&self, tenant_id: TenantId) {
        lock(&self.faults).panicking.insert(tenant_id);
    }

    pub fn total_calls(&self) -> usize {
        lock(&self.calls).len()
    }

    pub fn calls(&self, operation: RemoteOperation) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|call| call.operation == operation)
            .count()
    }

    pub fn calls_for(&self, operation: RemoteOperation, tenant_id: TenantId) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|call| call.operation == operation && call.tenant_id == Some(tenant_id))
            .count()
    }

    /// Highest number of calls that were in progress at the same time.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    async fn serve<T>(
        &self,
        operation: RemoteOperation,
        tenant_id: Option<TenantId>,
        answer: impl FnOnce(&TenantTree) -> HierarchyResult<T>,
    ) -> HierarchyResult<T> {
        lock(&self.calls).push(RemoteCall {
            operation,
            tenant_id,
        });

        let _in_flight = InFlight::enter(&self.in_flight, &self.peak_in_flight);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        self.check_faults(operation, tenant_id)?;
        answer(&self.tree)
    }

    fn check_faults(
        &self,
        operation: RemoteOperation,
        tenant_id: Option<TenantId>,
    ) -> HierarchyResult<()> {
        let mut faults = lock(&self.faults);

        if let Some(id) = tenant_id {
            if faults.panicking.contains(&id) {
                drop(faults);
                panic!("injected panic for tenant {id}");
            }
        }

        let tenant_failing = tenant_id.is_some_and(|id| faults.failing.contains(&id));
        if faults.fail_next > 0 || tenant_failing {
            faults.fail_next = faults.fail_next.saturating_sub(1);
            return Err(RemoteError::LoadFailed {
                operation,
                reason: "injected failure".to_string(),
            }
            .into());
        }

        Ok(())
    }
}

struct InFlight<'a> {
    active: &'a AtomicUsize,
}

impl<'a> InFlight<'a> {
    fn enter(active: &'a AtomicUsize, peak: &AtomicUsize) -> Self {
        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        Self { active }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl RemoteTenantService for StaticTenantDirectory {
    async fn get_root(&self, _ctx: &HierarchyContext) -> HierarchyResult<TenantId> {
        self.serve(RemoteOperation::Root, None, |tree| {
            tree.root().ok_or_else(|| {
                RemoteError::Unavailable {
                    reason: "no root tenant configured".to_string(),
                }
                .into()
            })
        })
        .await
    }

    async fn get_parent(
        &self,
        _ctx: &HierarchyContext,
        tenant_id: TenantId,
    ) -> HierarchyResult<Option<TenantId>> {
        self.serve(RemoteOperation::Parent, Some(tenant_id), |tree| {
            tree.parent_of(tenant_id)
                .ok_or_else(|| RemoteError::TenantNotFound { tenant_id }.into())
        })
        .await
    }

    async fn get_ancestors(
        &self,
        _ctx: &HierarchyContext,
        tenant_id: TenantId,
    ) -> HierarchyResult<Vec<TenantId>> {
        self.serve(RemoteOperation::Ancestors, Some(tenant_id), |tree| {
            tree.ancestors_of(tenant_id)
                .ok_or_else(|| RemoteError::TenantNotFound { tenant_id }.into())
        })
        .await
    }
}

// ============================================================================
// OVERRIDE DOUBLE
// ============================================================================

/// Canned [`TenantHierarchyApi`] for context override injection.
///
/// Answers from a fixed tree and counts how often it was consulted.
#[derive(Debug, Default)]
pub struct RecordingHierarchy {
    tree: TenantTree,
    calls: AtomicUsize,
}

impl RecordingHierarchy {
    pub fn new(tree: TenantTree) -> Self {
        Self {
            tree,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn record(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl TenantHierarchyApi for RecordingHierarchy {
    async fn parent(
        &self,
        _ctx: &HierarchyContext,
        tenant_id: TenantId,
    ) -> HierarchyResult<Option<TenantId>> {
        self.record();
        self.tree
            .parent_of(tenant_id)
            .ok_or_else(|| RemoteError::TenantNotFound { tenant_id }.into())
    }

    async fn ancestors(
        &self,
        _ctx: &HierarchyContext,
        tenant_id: TenantId,
    ) -> HierarchyResult<Vec<TenantId>> {
        self.record();
        self.tree
            .ancestors_of(tenant_id)
            .ok_or_else(|| RemoteError::TenantNotFound { tenant_id }.into())
    }

    async fn root(&self, _ctx: &HierarchyContext) -> HierarchyResult<TenantId> {
        self.record();
        self.tree.root().ok_or_else(|| {
            CacheError::NotFoundInCache { tenant_id: None }.into()
        })
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for tenant trees.

    use super::*;
    use proptest::prelude::*;
    use proptest::sample::Index;

    /// Generate a single tree of 1..=`max_tenants` tenants.
    ///
    /// Tenant `tenant(1)` is the root; every later tenant picks an earlier
    /// one as its parent, so the result is always acyclic.
    pub fn arb_tenant_tree(max_tenants: usize) -> impl Strategy<Value = TenantTree> {
        prop::collection::vec(any::<Index>(), 0..max_tenants.max(1)).prop_map(|picks| {
            let mut tree = TenantTree::new().with_root(tenant(1));
            for (offset, pick) in picks.iter().enumerate() {
                let existing = offset + 1;
                let parent = tenant(pick.index(existing) as u128 + 1);
                tree = tree.with_child(tenant(existing as u128 + 1), parent);
            }
            tree
        })
    }

    /// Generate a forest of `trees` independent trees.
    pub fn arb_tenant_forest(
        trees: usize,
        max_tenants_per_tree: usize,
    ) -> impl Strategy<Value = TenantTree> {
        prop::collection::vec(arb_tenant_tree(max_tenants_per_tree), trees.max(1)).prop_map(
            |trees| {
                let mut forest = TenantTree::new();
                for (n, tree) in trees.iter().enumerate() {
                    // Shift each tree into its own id range.
                    let shift = |id: TenantId| {
                        tenant(id.as_uuid().as_u128() + (n as u128) * 1_000_000)
                    };
                    for root in tree.roots() {
                        forest = forest.with_root(shift(*root));
                    }
                    for id in tree.tenants() {
                        if let Some(Some(parent)) = tree.parent_of(id) {
                            forest = forest.with_child(shift(id), shift(parent));
                        }
                    }
                }
                forest
            },
        )
    }

    /// Pick one tenant out of a generated tree.
    pub fn arb_tree_and_tenant(
        max_tenants: usize,
    ) -> impl Strategy<Value = (TenantTree, TenantId)> {
        arb_tenant_tree(max_tenants).prop_flat_map(|tree| {
            let tenants = tree.tenants();
            (Just(tree), proptest::sample::select(tenants))
        })
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    //! Ready-made hierarchies.

    use super::*;

    pub const ROOT: TenantId = tenant(0xA0);
    pub const PROVIDER: TenantId = tenant(0xA1);
    pub const CUSTOMER: TenantId = tenant(0xA2);
    pub const SIBLING: TenantId = tenant(0xA3);
    pub const OTHER_PROVIDER: TenantId = tenant(0xA4);
    pub const UNKNOWN: TenantId = tenant(0xDEAD);

    /// ```text
    /// ROOT
    /// ├── PROVIDER
    /// │   ├── CUSTOMER
    /// │   └── SIBLING
    /// └── OTHER_PROVIDER
    /// ```
    pub fn sample_tree() -> TenantTree {
        TenantTree::new()
            .with_root(ROOT)
            .with_child(PROVIDER, ROOT)
            .with_child(CUSTOMER, PROVIDER)
            .with_child(SIBLING, PROVIDER)
            .with_child(OTHER_PROVIDER, ROOT)
    }

    pub const SECOND_ROOT: TenantId = tenant(0xB0);
    pub const SECOND_CHILD: TenantId = tenant(0xB1);

    /// [`sample_tree`] plus an unrelated `SECOND_ROOT -> SECOND_CHILD` tree.
    pub fn sample_forest() -> TenantTree {
        sample_tree()
            .with_root(SECOND_ROOT)
            .with_child(SECOND_CHILD, SECOND_ROOT)
    }

    pub fn sample_directory() -> StaticTenantDirectory {
        StaticTenantDirectory::new(sample_tree())
    }

    /// A linear chain `tenant(1) <- tenant(2) <- ... <- tenant(depth)`.
    pub fn chain(depth: u128) -> TenantTree {
        let mut tree = TenantTree::new().with_root(tenant(1));
        for n in 2..=depth.max(1) {
            tree = tree.with_child(tenant(n), tenant(n - 1));
        }
        tree
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions over hierarchy results.

    use super::*;

    /// Assert that a HierarchyResult is a remote error.
    #[track_caller]
    pub fn assert_remote_error<T: std::fmt::Debug>(result: &HierarchyResult<T>) {
        match result {
            Err(HierarchyError::Remote(_)) => {}
            other => panic!("Expected Remote error, got: {:?}", other),
        }
    }

    /// Assert that a HierarchyResult is a recovered job panic.
    #[track_caller]
    pub fn assert_job_panicked<T: std::fmt::Debug>(result: &HierarchyResult<T>) {
        match result {
            Err(HierarchyError::Pool(PoolError::JobPanicked { .. })) => {}
            other => panic!("Expected JobPanicked error, got: {:?}", other),
        }
    }

    /// Assert that a HierarchyResult is a cancellation.
    #[track_caller]
    pub fn assert_cancelled<T: std::fmt::Debug>(result: &HierarchyResult<T>) {
        match result {
            Err(HierarchyError::Cancelled) => {}
            other => panic!("Expected Cancelled, got: {:?}", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn test_tree_ancestors() {
        let tree = sample_tree();
        assert_eq!(tree.ancestors_of(CUSTOMER), Some(vec![PROVIDER, ROOT]));
        assert_eq!(tree.ancestors_of(ROOT), Some(vec![]));
        assert_eq!(tree.ancestors_of(UNKNOWN), None);
        assert_eq!(tree.parent_of(ROOT), Some(None));
    }

    #[test]
    fn test_chain_fixture() {
        let tree = chain(4);
        assert_eq!(tree.len(), 4);
        assert_eq!(
            tree.ancestors_of(tenant(4)),
            Some(vec![tenant(3), tenant(2), tenant(1)])
        );
    }

    #[tokio::test]
    async fn test_directory_counts_calls() {
        let directory = sample_directory();
        let ctx = HierarchyContext::new();

        assert_eq!(directory.get_root(&ctx).await, Ok(ROOT));
        assert_eq!(
            directory.get_ancestors(&ctx, CUSTOMER).await,
            Ok(vec![PROVIDER, ROOT])
        );
        assert_eq!(directory.get_parent(&ctx, SIBLING).await, Ok(Some(PROVIDER)));

        assert_eq!(directory.total_calls(), 3);
        assert_eq!(directory.calls_for(RemoteOperation::Ancestors, CUSTOMER), 1);
        assert_eq!(directory.peak_in_flight(), 1);
    }

    #[tokio::test]
    async fn test_directory_fault_injection() {
        let directory = sample_directory();
        let ctx = HierarchyContext::new();

        directory.fail_next(1);
        assert!(directory.get_root(&ctx).await.is_err());
        assert_eq!(directory.get_root(&ctx).await, Ok(ROOT));

        directory.fail_tenant(CUSTOMER);
        assert!(directory.get_ancestors(&ctx, CUSTOMER).await.is_err());
        directory.heal_tenant(CUSTOMER);
        assert!(directory.get_ancestors(&ctx, CUSTOMER).await.is_ok());

        assert_eq!(
            directory.get_parent(&ctx, UNKNOWN).await,
            Err(RemoteError::TenantNotFound { tenant_id: UNKNOWN }.into())
        );
    }
}
