//! Arena Pool - arena ids, zone budget and assignment counter for one tier

use crossbeam::utils::CachePadded;
use parking_lot::RwLock;

use super::ARENA_HARD_MAX;
use crate::config::MemTier;
use crate::error::{TierError, TierResult};
use crate::types::{ArenaId, NodeId};

/// Fixed set of arenas serving one memory tier
///
/// The id list is immutable once built. The zone counter and the
/// assignment counter are the only mutable state and each sits behind its
/// own lock, taken in write mode only for the mutation itself.
#[derive(Debug)]
pub struct ArenaPool {
    tier: MemTier,
    node: NodeId,
    arena_ids: Vec<ArenaId>,
    zone_size: u64,
    zone_allocated: CachePadded<RwLock<u64>>,
    arena_index: CachePadded<RwLock<u64>>,
}

impl ArenaPool {
    /// Create a pool over already-created arenas
    ///
    /// # Errors
    ///
    /// Returns error if `arena_ids` is empty or longer than [`ARENA_HARD_MAX`].
    pub fn new(
        tier: MemTier,
        node: NodeId,
        zone_size: u64,
        arena_ids: Vec<ArenaId>,
    ) -> TierResult<Self> {
        if arena_ids.is_empty() {
            return Err(TierError::EmptyPool { tier });
        }
        if arena_ids.len() > ARENA_HARD_MAX {
            return Err(TierError::validation(
                "arena_count",
                format!("{} arenas exceed the maximum of {ARENA_HARD_MAX}", arena_ids.len()),
            ));
        }

        Ok(Self {
            tier,
            node,
            arena_ids,
            zone_size,
            zone_allocated: CachePadded::new(RwLock::new(0)),
            arena_index: CachePadded::new(RwLock::new(0)),
        })
    }

    /// Tier served by this pool
    #[must_use]
    pub const fn tier(&self) -> MemTier {
        self.tier
    }

    /// NUMA node backing every arena of this pool
    #[must_use]
    pub const fn node(&self) -> NodeId {
        self.node
    }

    /// Number of arenas
    #[must_use]
    pub fn arena_count(&self) -> usize {
        self.arena_ids.len()
    }

    /// Arena ids in slot order
    #[must_use]
    pub fn arena_ids(&self) -> &[ArenaId] {
        &self.arena_ids
    }

    /// Whether `arena` belongs to this pool
    #[must_use]
    pub fn contains(&self, arena: ArenaId) -> bool {
        self.arena_ids.contains(&arena)
    }

    /// Arena serving `slot`, wrapping around the pool
    #[must_use]
    pub fn arena_for_slot(&self, slot: u64) -> Option<ArenaId> {
        let len = u64::try_from(self.arena_ids.len()).ok().filter(|len| *len > 0)?;
        let index = usize::try_from(slot % len).ok()?;
        self.arena_ids.get(index).copied()
    }

    /// Hand out the next assignment index
    ///
    /// Linearized by the assignment lock: no two callers get the same value.
    pub fn next_assignment(&self) -> u64 {
        let mut index = self.arena_index.write();
        let assigned = *index;
        *index = index.wrapping_add(1);
        drop(index);

        metrics::counter!("tiermem_thread_assignments_total", "tier" => self.tier.as_str())
            .increment(1);
        assigned
    }

    /// Number of assignments handed out so far
    #[must_use]
    pub fn assignments(&self) -> u64 {
        *self.arena_index.read()
    }

    /// Zone budget in bytes
    #[must_use]
    pub const fn zone_size(&self) -> u64 {
        self.zone_size
    }

    /// Bytes currently charged against the zone
    #[must_use]
    pub fn allocated(&self) -> u64 {
        *self.zone_allocated.read()
    }

    /// Bytes still available in the zone
    #[must_use]
    pub fn remaining(&self) -> u64 {
        self.zone_size.saturating_sub(self.allocated())
    }

    /// Charge `bytes` against the zone budget, returning the new total
    ///
    /// # Errors
    ///
    /// Returns [`TierError::ZoneExhausted`] if the charge would exceed the budget;
    /// the counter is left unchanged in that case.
    pub fn try_charge(&self, bytes: u64) -> TierResult<u64> {
        let mut allocated = self.zone_allocated.write();
        let remaining = self.zone_size.saturating_sub(*allocated);
        if bytes > remaining {
            return Err(TierError::ZoneExhausted {
                tier: self.tier,
                requested: bytes,
                remaining,
            });
        }
        *allocated += bytes;
        let total = *allocated;
        drop(allocated);

        self.publish_allocated(total);
        Ok(total)
    }

    /// Return `bytes` to the zone budget, returning the new total
    pub fn uncharge(&self, bytes: u64) -> u64 {
        let mut allocated = self.zone_allocated.write();
        *allocated = allocated.saturating_sub(bytes);
        let total = *allocated;
        drop(allocated);

        self.publish_allocated(total);
        total
    }

    #[allow(clippy::cast_precision_loss)]
    fn publish_allocated(&self, total: u64) {
        metrics::gauge!("tiermem_zone_allocated_bytes", "tier" => self.tier.as_str())
            .set(total as f64);
    }
}
