//! ARBOR Core - Tenant Hierarchy Types
//!
//! Shared vocabulary for the tenant hierarchy cache: identifiers, the error
//! taxonomy, configuration, the per-request context and the two traits that
//! sit on either side of the cache.
//!
//! This crate contains no coordination logic. The cache, partition lock and
//! worker pool live in `arbor-cache`.

pub mod config;
pub mod context;
pub mod error;
pub mod identity;
pub mod traits;

pub use config::{
    EvictionPolicy, HierarchyConfig, HierarchyTopology, DEFAULT_LOCK_SHARDS, DEFAULT_POOL_SIZE,
};
pub use context::HierarchyContext;
pub use error::{
    CacheError, ConfigError, HierarchyError, HierarchyResult, PoolError, RemoteError,
    RemoteOperation,
};
pub use identity::TenantId;
pub use traits::{RemoteTenantService, TenantHierarchyApi};
