//! ARBOR Cache - Single-Flight Tenant Hierarchy Cache
//!
//! Answers root, parent and ancestor-chain queries from memory, loading
//! misses from a remote tenant service. Concurrent misses for the same tenant
//! collapse into one remote call, and a fixed-size worker pool caps how many
//! remote calls run at once.
//!
//! Shared types and traits live in `arbor-core`.

pub mod accessor;
pub mod hierarchy;
pub mod loader;
pub mod partition;
pub mod pool;
pub mod stats;

pub use accessor::{install_global, tenant_hierarchy_api, HierarchyAccessor};
pub use hierarchy::{PartitionKey, QueryType, TenantHierarchyCache};
pub use loader::PooledTenantLoader;
pub use partition::PartitionLock;
pub use pool::{JobHandle, JobOptions, WorkerPool};
pub use stats::{HierarchyStats, HierarchyStatsSnapshot};

// Re-export the core vocabulary so most callers need one import.
pub use arbor_core::{
    EvictionPolicy, HierarchyConfig, HierarchyContext, HierarchyError, HierarchyResult,
    HierarchyTopology, RemoteTenantService, TenantHierarchyApi, TenantId,
};
