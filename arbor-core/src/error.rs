//! Error types for ARBOR operations

use crate::TenantId;
use std::fmt;
use thiserror::Error;

/// Remote tenant-management operation that produced an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteOperation {
    Root,
    Parent,
    Ancestors,
}

impl RemoteOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            RemoteOperation::Root => "root",
            RemoteOperation::Parent => "parent",
            RemoteOperation::Ancestors => "ancestors",
        }
    }
}

impl fmt::Display for RemoteOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cache lookup errors.
///
/// `NotFoundInCache` is the internal "go load it" signal. Callers only see it
/// when a successful reload still leaves the key unresolved.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Tenant not found in cache: {}", display_tenant(.tenant_id))]
    NotFoundInCache { tenant_id: Option<TenantId> },

    #[error("Cached ancestor chain for {tenant_id} exceeds {depth} hops")]
    CorruptChain { tenant_id: TenantId, depth: usize },
}

/// Errors reported by the remote tenant-management collaborator.
///
/// These are never cached; the next call retries the remote fetch.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    #[error("Remote {operation} load failed: {reason}")]
    LoadFailed {
        operation: RemoteOperation,
        reason: String,
    },

    #[error("Tenant does not exist: {tenant_id}")]
    TenantNotFound { tenant_id: TenantId },

    #[error("Tenant service unavailable: {reason}")]
    Unavailable { reason: String },
}

/// Worker pool errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("Worker pool is closed")]
    Closed,

    #[error("No result from job")]
    NoJobResult,

    #[error("Job {job} panicked: {message}")]
    JobPanicked { job: String, message: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Missing required configuration: {field}")]
    MissingRequired { field: String },

    #[error("{component} is already installed")]
    AlreadyInstalled { component: String },
}

/// Master error type for all ARBOR errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HierarchyError {
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Operation cancelled")]
    Cancelled,
}

impl HierarchyError {
    /// Shorthand for a cache miss on `tenant_id` (or on the root when `None`).
    pub fn not_found_in_cache(tenant_id: Option<TenantId>) -> Self {
        CacheError::NotFoundInCache { tenant_id }.into()
    }

    /// True for the internal cache-miss signal.
    pub fn is_cache_miss(&self) -> bool {
        matches!(self, HierarchyError::Cache(CacheError::NotFoundInCache { .. }))
    }

    /// True when the error came from the remote collaborator.
    pub fn is_remote(&self) -> bool {
        matches!(self, HierarchyError::Remote(_))
    }
}

/// Result type alias for ARBOR operations.
pub type HierarchyResult<T> = Result<T, HierarchyError>;

fn display_tenant(tenant_id: &Option<TenantId>) -> String {
    match tenant_id {
        Some(id) => id.to_string(),
        None => "root".to_string(),
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_in_cache_display() {
        let err = HierarchyError::not_found_in_cache(Some(TenantId::nil()));
        let msg = format!("{}", err);
        assert!(msg.contains("Tenant not found in cache"));
        assert!(msg.contains("00000000-0000-0000-0000-000000000000"));

        let root_miss = HierarchyError::not_found_in_cache(None);
        assert!(format!("{}", root_miss).ends_with("root"));
    }

    #[test]
    fn test_remote_error_display() {
        let err = RemoteError::LoadFailed {
            operation: RemoteOperation::Ancestors,
            reason: "connection reset".to_string(),
        };
        assert_eq!(
            format!("{}", err),
            "Remote ancestors load failed: connection reset"
        );
    }

    #[test]
    fn test_error_classification() {
        assert!(HierarchyError::not_found_in_cache(None).is_cache_miss());
        assert!(!HierarchyError::Cancelled.is_cache_miss());

        let remote: HierarchyError = RemoteError::Unavailable {
            reason: "503".to_string(),
        }
        .into();
        assert!(remote.is_remote());
        assert!(!remote.is_cache_miss());
    }

    #[test]
    fn test_pool_error_converts() {
        let err: HierarchyError = PoolError::JobPanicked {
            job: "ancestors".to_string(),
            message: "boom".to_string(),
        }
        .into();
        assert!(matches!(err, HierarchyError::Pool(PoolError::JobPanicked { .. })));
        assert!(format!("{}", err).contains("boom"));
    }
}
