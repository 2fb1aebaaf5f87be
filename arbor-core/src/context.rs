//! Per-request context threaded through every hierarchy call.
//!
//! Carries two things:
//!
//! - an optional cancellation signal (`watch::Receiver<bool>`, flipped to
//!   `true` to cancel), honored by lock acquisition and pool waits
//! - typed override slots for the hierarchy API and for the loader used when
//!   a cache is constructed
//!
//! Overrides are `Arc<dyn TenantHierarchyApi>`, so a mismatched override is a
//! compile error rather than a silent fallback to the shared instance.

use crate::TenantHierarchyApi;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

/// Request-scoped context for hierarchy lookups.
#[derive(Clone, Default)]
pub struct HierarchyContext {
    cancel: Option<watch::Receiver<bool>>,
    hierarchy: Option<Arc<dyn TenantHierarchyApi>>,
    loader: Option<Arc<dyn TenantHierarchyApi>>,
}

impl HierarchyContext {
    /// An empty context: never cancelled, no overrides.
    pub fn new() -> Self {
        Self::default()
    }

    /// A context paired with the sender that cancels it.
    pub fn cancellable() -> (Self, watch::Sender<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self::new().with_cancellation(rx), tx)
    }

    /// Attach a cancellation signal. Sending `true` cancels.
    pub fn with_cancellation(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Serve hierarchy lookups from `api` instead of the shared cache.
    pub fn with_hierarchy_override(mut self, api: Arc<dyn TenantHierarchyApi>) -> Self {
        self.hierarchy = Some(api);
        self
    }

    /// Use `loader` instead of the pooled remote loader when a cache is built
    /// from this context.
    pub fn with_loader_override(mut self, loader: Arc<dyn TenantHierarchyApi>) -> Self {
        self.loader = Some(loader);
        self
    }

    pub fn hierarchy_override(&self) -> Option<&Arc<dyn TenantHierarchyApi>> {
        self.hierarchy.as_ref()
    }

    pub fn loader_override(&self) -> Option<&Arc<dyn TenantHierarchyApi>> {
        self.loader.as_ref()
    }

    /// Whether the cancellation signal has fired.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Resolves once the context is cancelled.
    ///
    /// Never resolves for a context without a signal, or whose sender was
    /// dropped without cancelling.
    pub async fn cancelled(&self) {
        let Some(rx) = self.cancel.as_ref() else {
            return std::future::pending().await;
        };
        let mut rx = rx.clone();
        if rx.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

impl fmt::Debug for HierarchyContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HierarchyContext")
            .field("cancellable", &self.cancel.is_some())
            .field("cancelled", &self.is_cancelled())
            .field("hierarchy_override", &self.hierarchy.is_some())
            .field("loader_override", &self.loader.is_some())
            .finish()
    }
}
