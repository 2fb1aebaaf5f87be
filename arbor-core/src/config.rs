//! Configuration types

use crate::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default number of workers bounding in-flight remote calls.
pub const DEFAULT_POOL_SIZE: usize = 4;

/// Default number of partition lock shards.
pub const DEFAULT_LOCK_SHARDS: usize = 64;

const ENV_POOL_SIZE: &str = "ARBOR_HIERARCHY_POOL_SIZE";
const ENV_LOCK_SHARDS: &str = "ARBOR_HIERARCHY_LOCK_SHARDS";
const ENV_ENTRY_TTL_SECS: &str = "ARBOR_HIERARCHY_ENTRY_TTL_SECS";
const ENV_TOPOLOGY: &str = "ARBOR_HIERARCHY_TOPOLOGY";

/// How long cached hierarchy entries live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EvictionPolicy {
    /// Entries live as long as the cache (the hierarchy is assumed static).
    #[default]
    Never,
    /// Entries older than the duration are treated as misses and reloaded.
    Ttl(Duration),
}

impl EvictionPolicy {
    /// Whether an entry of the given age should be treated as absent.
    pub fn is_expired(&self, age: Duration) -> bool {
        match self {
            EvictionPolicy::Never => false,
            EvictionPolicy::Ttl(ttl) => age >= *ttl,
        }
    }
}

/// Shape of the tenant hierarchy served by the remote service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HierarchyTopology {
    /// One distinguished root; the last element of any chain is that root.
    #[default]
    SingleTree,
    /// Several independent trees; each chain ends at its own root.
    Forest,
}

impl HierarchyTopology {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "single-tree" | "single_tree" | "singletree" => Some(HierarchyTopology::SingleTree),
            "forest" => Some(HierarchyTopology::Forest),
            _ => None,
        }
    }
}

/// Tenant hierarchy cache configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HierarchyConfig {
    /// Number of workers issuing remote calls concurrently.
    pub pool_size: usize,
    /// Number of partition lock shards.
    pub lock_shards: usize,
    /// Entry lifetime policy.
    pub eviction: EvictionPolicy,
    /// Single tree or forest.
    pub topology: HierarchyTopology,
}

impl Default for HierarchyConfig {
    fn default() -> Self {
        Self {
            pool_size: DEFAULT_POOL_SIZE,
            lock_shards: DEFAULT_LOCK_SHARDS,
            eviction: EvictionPolicy::Never,
            topology: HierarchyTopology::SingleTree,
        }
    }
}

impl HierarchyConfig {
    /// Create a new config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create HierarchyConfig from environment variables.
    ///
    /// Environment variables:
    /// - `ARBOR_HIERARCHY_POOL_SIZE`: Concurrent remote calls (default: 4)
    /// - `ARBOR_HIERARCHY_LOCK_SHARDS`: Partition lock shards (default: 64)
    /// - `ARBOR_HIERARCHY_ENTRY_TTL_SECS`: Entry TTL, 0 or unset never evicts
    /// - `ARBOR_HIERARCHY_TOPOLOGY`: `single-tree` (default) or `forest`
    ///
    /// Unparseable values fall back to the defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let pool_size = lookup(ENV_POOL_SIZE)
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(defaults.pool_size);

        let lock_shards = lookup(ENV_LOCK_SHARDS)
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(defaults.lock_shards);

        let eviction = match lookup(ENV_ENTRY_TTL_SECS).and_then(|s| s.trim().parse::<u64>().ok()) {
            Some(secs) if secs > 0 => EvictionPolicy::Ttl(Duration::from_secs(secs)),
            _ => defaults.eviction,
        };

        let topology = lookup(ENV_TOPOLOGY)
            .and_then(|s| HierarchyTopology::parse(&s))
            .unwrap_or(defaults.topology);

        Self {
            pool_size,
            lock_shards,
            eviction,
            topology,
        }
    }

    /// Set the worker pool size.
    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    /// Set the number of partition lock shards.
    pub fn with_lock_shards(mut self, lock_shards: usize) -> Self {
        self.lock_shards = lock_shards;
        self
    }

    /// Set the eviction policy.
    pub fn with_eviction(mut self, eviction: EvictionPolicy) -> Self {
        self.eviction = eviction;
        self
    }

    /// Set the hierarchy topology.
    pub fn with_topology(mut self, topology: HierarchyTopology) -> Self {
        self.topology = topology;
        self
    }

    /// Reject values the cache cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "pool_size".to_string(),
                value: self.pool_size.to_string(),
                reason: "minimum pool size is 1".to_string(),
            });
        }
        if self.lock_shards == 0 {
            return Err(ConfigError::InvalidValue {
                field: "lock_shards".to_string(),
                value: self.lock_shards.to_string(),
                reason: "at least one lock shard is required".to_string(),
            });
        }
        if self.eviction == EvictionPolicy::Ttl(Duration::ZERO) {
            return Err(ConfigError::InvalidValue {
                field: "eviction".to_string(),
                value: "0s".to_string(),
                reason: "a zero TTL would expire entries before they can be read".to_string(),
            });
        }
        Ok(())
    }
}
