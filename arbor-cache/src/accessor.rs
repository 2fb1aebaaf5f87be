//! Access to the shared tenant hierarchy.
//!
//! A [`HierarchyAccessor`] owns one lazily built [`TenantHierarchyCache`].
//! Services install one accessor per process with [`install_global`] and
//! resolve the hierarchy per request with [`tenant_hierarchy_api`], which
//! honors a hierarchy override carried by the request context.

use crate::hierarchy::TenantHierarchyCache;
use arbor_core::{
    ConfigError, HierarchyConfig, HierarchyContext, HierarchyResult, RemoteTenantService,
    TenantHierarchyApi,
};
use once_cell::sync::OnceCell;
use std::fmt;
use std::sync::Arc;
use tokio::runtime::Handle;

static GLOBAL_ACCESSOR: OnceCell<HierarchyAccessor> = OnceCell::new();

/// Owner of a lazily constructed, shared tenant hierarchy cache.
pub struct HierarchyAccessor {
    remote: Arc<dyn RemoteTenantService>,
    config: HierarchyConfig,
    runtime: Handle,
    shared: OnceCell<Arc<dyn TenantHierarchyApi>>,
}

impl HierarchyAccessor {
    /// The shared cache's workers run on `runtime`, not on the runtime of the
    /// caller that first builds it. `runtime` must outlive the accessor.
    pub fn new(
        remote: Arc<dyn RemoteTenantService>,
        config: HierarchyConfig,
        runtime: Handle,
    ) -> Self {
        Self {
            remote,
            config,
            runtime,
            shared: OnceCell::new(),
        }
    }

    /// The context's hierarchy override, or the shared cache.
    ///
    /// The cache is built on first use, exactly once even under concurrent
    /// first calls. A loader override on the context that triggers
    /// construction becomes the cache's loader. A failed construction is not
    /// remembered; the next call tries again.
    pub fn get(&self, ctx: &HierarchyContext) -> HierarchyResult<Arc<dyn TenantHierarchyApi>> {
        if let Some(api) = ctx.hierarchy_override() {
            return Ok(Arc::clone(api));
        }

        self.shared
            .get_or_try_init(|| {
                let cache = TenantHierarchyCache::pooled_on(
                    ctx,
                    Arc::clone(&self.remote),
                    self.config.clone(),
                    &self.runtime,
                )?;
                Ok(Arc::new(cache) as Arc<dyn TenantHierarchyApi>)
            })
            .map(Arc::clone)
    }

    /// Whether the shared cache has been built.
    pub fn is_initialized(&self) -> bool {
        self.shared.get().is_some()
    }

    pub fn config(&self) -> &HierarchyConfig {
        &self.config
    }
}

impl fmt::Debug for HierarchyAccessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HierarchyAccessor")
            .field("config", &self.config)
            .field("initialized", &self.is_initialized())
            .finish_non_exhaustive()
    }
}

/// Install the process-wide accessor. Only the first call succeeds.
pub fn install_global(accessor: HierarchyAccessor) -> HierarchyResult<()> {
    GLOBAL_ACCESSOR.set(accessor).map_err(|_| {
        ConfigError::AlreadyInstalled {
            component: "tenant hierarchy accessor".to_string(),
        }
        .into()
    })
}

/// Resolve the tenant hierarchy for a request.
///
/// Returns the context's hierarchy override if present, otherwise the shared
/// cache of the installed accessor.
pub fn tenant_hierarchy_api(
    ctx: &HierarchyContext,
) -> HierarchyResult<Arc<dyn TenantHierarchyApi>> {
    if let Some(api) = ctx.hierarchy_override() {
        return Ok(Arc::clone(api));
    }

    GLOBAL_ACCESSOR
        .get()
        .ok_or_else(|| ConfigError::MissingRequired {
            field: "tenant hierarchy accessor".to_string(),
        })?
        .get(ctx)
}
