//! `TierMem` Configuration System
//!
//! Process-wide tier configuration with garde validation. Values are read
//! from TOML, from a layered `config` source (defaults, optional file,
//! `TIERMEM_*` environment variables) or built in code.

use std::fmt;
use std::path::Path;

use garde::Validate;
use serde::{Deserialize, Serialize};

use crate::arena::scaled_arena_count;
use crate::error::{FatalError, TierError, TierResult};
use crate::types::NodeId;

/// Default per-zone limit in MB (effectively unlimited)
pub const DEFAULT_ZONE_LIMIT_MB: u64 = 1 << 30;

/// Highest NUMA node number accepted in configuration
pub const MAX_NODE_ID: u32 = 1023;

/// Environment variable prefix for layered loading
pub const ENV_PREFIX: &str = "TIERMEM";

const BYTES_PER_MB: u64 = 1024 * 1024;

/// Memory tier served by an arena pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemTier {
    /// Fast, directly attached memory
    Normal,
    /// Slower, larger expansion memory (remote node or expansion device)
    #[serde(alias = "exmem")]
    Expansion,
}

impl MemTier {
    /// Both tiers in declaration order
    pub const ALL: [Self; 2] = [Self::Normal, Self::Expansion];

    /// Stable lowercase name used in logs and metric labels
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Expansion => "expansion",
        }
    }
}

impl fmt::Display for MemTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordering of the two tiers: index 0 is preferred, index 1 is the fallback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "[MemTier; 2]", into = "[MemTier; 2]")]
pub struct TierPriority {
    preferred: MemTier,
    fallback: MemTier,
}

impl TierPriority {
    /// Build a priority order
    ///
    /// # Errors
    ///
    /// Returns error unless the two tiers differ.
    pub fn new(preferred: MemTier, fallback: MemTier) -> TierResult<Self> {
        if preferred == fallback {
            return Err(TierError::validation(
                "priority",
                format!("tier '{preferred}' listed twice"),
            ));
        }
        Ok(Self {
            preferred,
            fallback,
        })
    }

    /// Preferred tier (pool index 0)
    #[must_use]
    pub const fn preferred(self) -> MemTier {
        self.preferred
    }

    /// Fallback tier (pool index 1)
    #[must_use]
    pub const fn fallback(self) -> MemTier {
        self.fallback
    }

    /// Pool index serving `tier`
    #[must_use]
    pub fn pool_index(self, tier: MemTier) -> usize {
        usize::from(self.preferred != tier)
    }

    /// Tier served by pool `index`, if the index exists
    #[must_use]
    pub const fn tier_at(self, index: usize) -> Option<MemTier> {
        match index {
            0 => Some(self.preferred),
            1 => Some(self.fallback),
            _ => None,
        }
    }

    /// Tiers in pool order
    #[must_use]
    pub const fn ordered(self) -> [MemTier; 2] {
        [self.preferred, self.fallback]
    }
}

impl Default for TierPriority {
    fn default() -> Self {
        Self {
            preferred: MemTier::Normal,
            fallback: MemTier::Expansion,
        }
    }
}

impl TryFrom<[MemTier; 2]> for TierPriority {
    type Error = TierError;

    fn try_from([preferred, fallback]: [MemTier; 2]) -> TierResult<Self> {
        Self::new(preferred, fallback)
    }
}

impl From<TierPriority> for [MemTier; 2] {
    fn from(priority: TierPriority) -> Self {
        priority.ordered()
    }
}

/// Behaviour once a zone budget is exhausted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OomPolicy {
    /// Fail the allocation
    #[default]
    Oom,
    /// Interleave between the two tiers
    Interleave,
    /// Stay on the fallback tier
    Remain,
}

/// What to do when binding a fresh mapping to its node fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BindFailurePolicy {
    /// Return the region silently
    Ignore,
    /// Return the region; the failure is logged when metrics are reported
    #[default]
    Warn,
    /// Unmap the region and report no memory
    Fail,
}

/// Tier configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct TierConfig {
    /// Enable the expansion tier; when off no pools are built
    #[garde(skip)]
    pub use_expansion: bool,

    /// Pool ordering
    #[garde(skip)]
    pub priority: TierPriority,

    /// Normal zone budget (MB)
    #[garde(range(min = 1))]
    pub normal_zone_size_mb: u64,

    /// Expansion zone budget (MB)
    #[garde(range(min = 1))]
    pub expansion_zone_size_mb: u64,

    /// Scale arenas more aggressively and select by CPU
    #[garde(skip)]
    pub use_auto_arena_scaling: bool,

    /// Arenas in the normal pool (rewritten by scaling)
    #[garde(range(min = 1, max = 128))]
    pub nr_normal_arena: usize,

    /// Arenas in the expansion pool (rewritten by scaling)
    #[garde(range(min = 1, max = 128))]
    pub nr_expansion_arena: usize,

    /// Zone exhaustion policy
    #[garde(skip)]
    pub oom_policy: OomPolicy,

    /// NUMA node backing the normal tier
    #[garde(skip)]
    pub normal_node: NodeId,

    /// NUMA node backing the expansion tier
    #[garde(skip)]
    pub expansion_node: NodeId,

    /// Node binding failure policy
    #[garde(skip)]
    pub bind_failure: BindFailurePolicy,
}

impl Default for TierConfig {
    fn default() -> Self {
        Self {
            use_expansion: true,
            priority: TierPriority::default(),
            normal_zone_size_mb: DEFAULT_ZONE_LIMIT_MB,
            expansion_zone_size_mb: DEFAULT_ZONE_LIMIT_MB,
            use_auto_arena_scaling: true,
            nr_normal_arena: 1,
            nr_expansion_arena: 1,
            oom_policy: OomPolicy::Oom,
            normal_node: NodeId::new(0),
            expansion_node: NodeId::new(1),
            bind_failure: BindFailurePolicy::Warn,
        }
    }
}

impl TierConfig {
    /// Configuration placing both tiers on node 0, for hosts without an expansion node
    #[must_use]
    pub fn single_node() -> Self {
        Self {
            expansion_node: NodeId::new(0),
            ..Self::default()
        }
    }

    /// Parse and validate a TOML document
    ///
    /// # Errors
    ///
    /// Returns error if the document is malformed or fails validation.
    pub fn from_toml_str(input: &str) -> TierResult<Self> {
        let config: Self = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    /// Load defaults, then `path`, then `TIERMEM_*` environment overrides
    ///
    /// # Errors
    ///
    /// Returns error if a source cannot be read or the result fails validation.
    pub fn load(path: impl AsRef<Path>) -> TierResult<Self> {
        Self::layered(Some(path.as_ref()))
    }

    /// Load defaults overridden by `TIERMEM_*` environment variables
    ///
    /// # Errors
    ///
    /// Returns error if an override cannot be parsed or the result fails validation.
    pub fn from_env() -> TierResult<Self> {
        Self::layered(None)
    }

    fn layered(path: Option<&Path>) -> TierResult<Self> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&Self::default())?);
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        let settings = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns error if configuration validation fails.
    pub fn validate(&self) -> TierResult<()> {
        garde::Validate::validate(self, &())
            .map_err(|e| TierError::validation("config", format!("Validation failed: {e}")))?;

        for (field, node) in [
            ("normal_node", self.normal_node),
            ("expansion_node", self.expansion_node),
        ] {
            if node.get() > MAX_NODE_ID {
                return Err(TierError::validation(
                    field,
                    format!("node {} exceeds maximum {MAX_NODE_ID}", node.get()),
                ));
            }
        }

        if self.use_expansion && self.normal_node == self.expansion_node {
            tracing::warn!(
                "normal and expansion tiers share {}; placement will not separate them",
                self.normal_node
            );
        }

        Ok(())
    }

    /// NUMA node backing `tier`
    #[must_use]
    pub const fn node_for(&self, tier: MemTier) -> NodeId {
        match tier {
            MemTier::Normal => self.normal_node,
            MemTier::Expansion => self.expansion_node,
        }
    }

    /// Zone budget of `tier` in bytes
    #[must_use]
    pub const fn zone_size_bytes(&self, tier: MemTier) -> u64 {
        let mb = match tier {
            MemTier::Normal => self.normal_zone_size_mb,
            MemTier::Expansion => self.expansion_zone_size_mb,
        };
        mb.saturating_mul(BYTES_PER_MB)
    }

    /// Configured arena count for `tier`
    #[must_use]
    pub const fn arena_count(&self, tier: MemTier) -> usize {
        match tier {
            MemTier::Normal => self.nr_normal_arena,
            MemTier::Expansion => self.nr_expansion_arena,
        }
    }

    /// Rewrite both arena counts from the online CPU count
    ///
    /// # Errors
    ///
    /// Returns [`FatalError::InvalidCpuCount`] when `cpus` is zero.
    pub fn scale_arena_counts(&mut self, cpus: usize) -> Result<usize, FatalError> {
        let narenas = scaled_arena_count(cpus, self.use_auto_arena_scaling)?;
        self.nr_normal_arena = narenas;
        self.nr_expansion_arena = narenas;
        Ok(narenas)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() -> TierResult<()> {
        let config = TierConfig::default();
        config.validate()?;
        assert!(config.use_expansion);
        assert_eq!(config.priority.preferred(), MemTier::Normal);
        assert_eq!(config.node_for(MemTier::Expansion), NodeId::new(1));
        Ok(())
    }

    #[test]
    fn test_priority_pool_index() -> TierResult<()> {
        let priority = TierPriority::new(MemTier::Expansion, MemTier::Normal)?;
        assert_eq!(priority.pool_index(MemTier::Expansion), 0);
        assert_eq!(priority.pool_index(MemTier::Normal), 1);
        assert_eq!(priority.tier_at(1), Some(MemTier::Normal));
        assert_eq!(priority.tier_at(2), None);
        Ok(())
    }

    #[test]
    fn test_priority_rejects_duplicates() {
        assert!(TierPriority::new(MemTier::Normal, MemTier::Normal).is_err());
        let parsed = TierConfig::from_toml_str(r#"priority = ["expansion", "expansion"]"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_toml_parsing() -> TierResult<()> {
        let config = TierConfig::from_toml_str(
            r#"
            use_expansion = true
            priority = ["exmem", "normal"]
            expansion_zone_size_mb = 512
            use_auto_arena_scaling = false
            oom_policy = "interleave"
            expansion_node = 2
            bind_failure = "fail"
            "#,
        )?;

        assert_eq!(config.priority.preferred(), MemTier::Expansion);
        assert_eq!(config.zone_size_bytes(MemTier::Expansion), 512 * 1024 * 1024);
        assert_eq!(config.oom_policy, OomPolicy::Interleave);
        assert_eq!(config.expansion_node, NodeId::new(2));
        assert_eq!(config.bind_failure, BindFailurePolicy::Fail);
        // untouched fields keep their defaults
        assert_eq!(config.normal_zone_size_mb, DEFAULT_ZONE_LIMIT_MB);
        Ok(())
    }

    #[test]
    fn test_config_validation() {
        let mut config = TierConfig::default();
        config.nr_normal_arena = 0;
        assert!(config.validate().is_err());

        let mut config = TierConfig::default();
        config.expansion_node = NodeId::new(MAX_NODE_ID + 1);
        assert!(config.validate().is_err());

        let mut config = TierConfig::default();
        config.normal_zone_size_mb = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() -> Result<(), Box<dyn std::error::Error>> {
        let path = std::env::temp_dir().join(format!("tiermem-{}.toml", std::process::id()));
        std::fs::write(&path, "use_auto_arena_scaling = false\nnormal_zone_size_mb = 64\n")?;

        let loaded = TierConfig::load(&path);
        std::fs::remove_file(&path)?;
        let config = loaded?;

        assert!(!config.use_auto_arena_scaling);
        assert_eq!(config.normal_zone_size_mb, 64);
        assert_eq!(config.priority, TierPriority::default());
        Ok(())
    }

    #[test]
    fn test_scale_arena_counts() -> Result<(), FatalError> {
        let mut config = TierConfig::default();
        config.use_auto_arena_scaling = false;
        assert_eq!(config.scale_arena_counts(4)?, 4);
        assert_eq!(config.arena_count(MemTier::Normal), 4);
        assert_eq!(config.arena_count(MemTier::Expansion), 4);

        config.use_auto_arena_scaling = true;
        config.scale_arena_counts(4)?;
        assert_eq!(config.nr_normal_arena, 8);

        assert!(config.scale_arena_counts(0).is_err());
        Ok(())
    }
}
