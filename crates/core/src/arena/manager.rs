//! Arena Pool Manager - builds both tier pools and wires their hooks

use std::sync::Arc;

use tracing::{debug, error};

use super::{ArenaBackend, ArenaPool, ARENA_HARD_MAX};
use crate::config::{MemTier, TierConfig, TierPriority};
use crate::error::{FatalError, TierError, TierResult};
use crate::extent::{ExtentHooks, NodeExtentProvider};
use crate::types::ArenaId;

/// Pool plus the provider installed on all of its arenas
#[derive(Debug)]
struct TierSlot {
    pool: ArenaPool,
    provider: Arc<NodeExtentProvider>,
}

/// Owner of the two tier pools, ordered by [`TierPriority`]
#[derive(Debug)]
pub struct ArenaPoolManager {
    priority: TierPriority,
    preferred: TierSlot,
    fallback: TierSlot,
}

impl ArenaPoolManager {
    /// Create every arena of both pools and install their extent hooks
    ///
    /// `config` must already carry the scaled arena counts. Pools are built
    /// in priority order, one provider per tier shared by all of its arenas.
    ///
    /// # Errors
    ///
    /// Returns [`TierError::Fatal`] when arena creation, arena lookup or hook
    /// installation fails, and a validation error for arena counts outside
    /// `1..=ARENA_HARD_MAX`.
    pub fn build(config: &TierConfig, backend: &dyn ArenaBackend) -> TierResult<Self> {
        let priority = config.priority;
        let [first, second] = priority.ordered();

        let preferred = Self::build_tier(config, backend, first)?;
        let fallback = Self::build_tier(config, backend, second)?;

        Ok(Self {
            priority,
            preferred,
            fallback,
        })
    }

    fn build_tier(
        config: &TierConfig,
        backend: &dyn ArenaBackend,
        tier: MemTier,
    ) -> TierResult<TierSlot> {
        let count = config.arena_count(tier);
        if count == 0 || count > ARENA_HARD_MAX {
            return Err(TierError::validation(
                "arena_count",
                format!("{tier} pool needs 1..={ARENA_HARD_MAX} arenas, got {count}"),
            ));
        }

        let node = config.node_for(tier);
        let provider = Arc::new(NodeExtentProvider::new(node, config.bind_failure));
        let mut arena_ids = Vec::with_capacity(count);

        for slot in 0..count {
            let arena = backend.create_arena().map_err(|err| {
                error!("creating arena for {} slot {} failed: {}", tier, slot, err);
                FatalError::ArenaCreation { tier, slot }
            })?;

            if !backend.arena_exists(arena) {
                error!("{} vanished right after creation", arena);
                return Err(FatalError::ArenaMissing { arena }.into());
            }

            let hooks: Arc<dyn ExtentHooks> = Arc::clone(&provider) as Arc<dyn ExtentHooks>;
            backend.install_extent_hooks(arena, hooks).map_err(|err| {
                error!("installing {} hooks on {} failed: {}", node, arena, err);
                FatalError::HookInstallation { arena, node }
            })?;

            debug!("{} pool slot {}: {} bound to {}", tier, slot, arena, node);
            metrics::counter!("tiermem_arenas_created_total", "tier" => tier.as_str()).increment(1);
            arena_ids.push(arena);
        }

        let pool = ArenaPool::new(tier, node, config.zone_size_bytes(tier), arena_ids)?;
        Ok(TierSlot { pool, provider })
    }

    fn slot(&self, tier: MemTier) -> &TierSlot {
        if tier == self.priority.preferred() {
            &self.preferred
        } else {
            &self.fallback
        }
    }

    /// Tier ordering the pools were built with
    #[must_use]
    pub const fn priority(&self) -> TierPriority {
        self.priority
    }

    /// Pool serving `tier`
    #[must_use]
    pub fn pool(&self, tier: MemTier) -> &ArenaPool {
        &self.slot(tier).pool
    }

    /// Pool at priority `index` (0 preferred, 1 fallback)
    #[must_use]
    pub const fn pool_at(&self, index: usize) -> Option<&ArenaPool> {
        match index {
            0 => Some(&self.preferred.pool),
            1 => Some(&self.fallback.pool),
            _ => None,
        }
    }

    /// Extent provider installed on the arenas of `tier`
    #[must_use]
    pub fn provider(&self, tier: MemTier) -> &Arc<NodeExtentProvider> {
        &self.slot(tier).provider
    }

    /// Tier owning `arena`, if any pool contains it
    #[must_use]
    pub fn tier_of(&self, arena: ArenaId) -> Option<MemTier> {
        [&self.preferred, &self.fallback]
            .into_iter()
            .find(|slot| slot.pool.contains(arena))
            .map(|slot| slot.pool.tier())
    }

    /// Total arenas across both pools
    #[must_use]
    pub fn arena_total(&self) -> usize {
        self.preferred.pool.arena_count() + self.fallback.pool.arena_count()
    }
}
