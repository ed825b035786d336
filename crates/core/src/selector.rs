//! Arena Selection Strategies
//!
//! Given the pool of the requested tier, pick the arena the calling thread
//! should allocate from. One strategy is active per runtime:
//!
//! - [`CpuIndexedSelector`] maps the current CPU onto the pool with no
//!   shared state at all.
//! - [`ThreadAssignedSelector`] hands each thread one assignment index on
//!   first use and reuses it for the life of the thread.

use std::cell::RefCell;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::arena::ArenaPool;
use crate::topology::CpuTopology;
use crate::types::ArenaId;

/// Which selection strategy a runtime uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectorKind {
    /// CPU-indexed lookup, chosen with auto scaling
    AutoScale,
    /// Per-thread assignment from a monotonic counter
    Monotonic,
}

impl SelectorKind {
    /// Strategy matching the auto-scaling switch
    #[must_use]
    pub const fn for_auto_scale(auto_scale: bool) -> Self {
        if auto_scale {
            Self::AutoScale
        } else {
            Self::Monotonic
        }
    }

    /// Build the selector for this strategy
    #[must_use]
    pub fn build(self, topology: Arc<dyn CpuTopology>) -> Box<dyn ArenaSelector> {
        match self {
            Self::AutoScale => Box::new(CpuIndexedSelector::new(topology)),
            Self::Monotonic => Box::new(ThreadAssignedSelector::new()),
        }
    }

    /// Stable lowercase name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AutoScale => "auto_scale",
            Self::Monotonic => "monotonic",
        }
    }
}

impl fmt::Display for SelectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Arena selection strategy
pub trait ArenaSelector: Send + Sync + fmt::Debug {
    /// Strategy implemented by this selector
    fn kind(&self) -> SelectorKind;

    /// Arena in `pool` for the calling thread; `None` only for an empty pool
    fn select(&self, pool: &ArenaPool) -> Option<ArenaId>;
}

/// `pool.ids[cpu % arena_count]`, recomputed on every call
#[derive(Debug)]
pub struct CpuIndexedSelector {
    topology: Arc<dyn CpuTopology>,
}

impl CpuIndexedSelector {
    /// Selector reading the current CPU from `topology`
    #[must_use]
    pub fn new(topology: Arc<dyn CpuTopology>) -> Self {
        Self { topology }
    }
}

impl ArenaSelector for CpuIndexedSelector {
    fn kind(&self) -> SelectorKind {
        SelectorKind::AutoScale
    }

    #[inline]
    fn select(&self, pool: &ArenaPool) -> Option<ArenaId> {
        let cpu = u64::try_from(self.topology.current_cpu()).unwrap_or(0);
        pool.arena_for_slot(cpu)
    }
}

/// Source of selector ids keying the per-thread assignment cache
static NEXT_SELECTOR_ID: AtomicU64 = AtomicU64::new(0);

thread_local! {
    /// `(selector id, assigned index)` pairs of the current thread, dropped with the thread
    static ASSIGNED: RefCell<Vec<(u64, u64)>> = const { RefCell::new(Vec::new()) };
}

/// `pool.ids[assigned % arena_count]` with one assignment per thread
///
/// The assignment is taken from the counter of whichever pool the thread
/// asks for first and then reused for both tiers. The cache is keyed by
/// selector id, so independent runtimes never share assignments, and it
/// dies with its thread, so a new thread always draws a fresh index.
pub struct ThreadAssignedSelector {
    id: u64,
}

impl ThreadAssignedSelector {
    /// Selector with no threads assigned yet
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: NEXT_SELECTOR_ID.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Assignment index of the calling thread, if it has one
    #[must_use]
    pub fn assigned_index(&self) -> Option<u64> {
        ASSIGNED
            .try_with(|assigned| {
                assigned
                    .borrow()
                    .iter()
                    .find(|(id, _)| *id == self.id)
                    .map(|(_, index)| *index)
            })
            .ok()
            .flatten()
    }

    fn index_for(&self, pool: &ArenaPool) -> u64 {
        if let Some(index) = self.assigned_index() {
            return index;
        }

        let index = pool.next_assignment();
        tracing::trace!("thread assigned index {} from {} pool", index, pool.tier());
        // thread teardown: the index is used once and not cached
        let _ = ASSIGNED.try_with(|assigned| assigned.borrow_mut().push((self.id, index)));
        index
    }
}

impl Default for ThreadAssignedSelector {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ThreadAssignedSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadAssignedSelector")
            .field("id", &self.id)
            .field("current_thread", &self.assigned_index())
            .finish()
    }
}

impl ArenaSelector for ThreadAssignedSelector {
    fn kind(&self) -> SelectorKind {
        SelectorKind::Monotonic
    }

    #[inline]
    fn select(&self, pool: &ArenaPool) -> Option<ArenaId> {
        pool.arena_for_slot(self.index_for(pool))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemTier;
    use crate::error::TierResult;
    use crate::topology::FixedTopology;
    use crate::types::NodeId;
    use proptest::prelude::*;
    use std::collections::HashSet;

    fn pool(tier: MemTier, first: u32, count: u32) -> TierResult<ArenaPool> {
        ArenaPool::new(
            tier,
            NodeId::new(0),
            1 << 20,
            (first..first + count).map(ArenaId::new).collect(),
        )
    }

    #[test]
    fn test_kind_mapping() {
        assert_eq!(SelectorKind::for_auto_scale(true), SelectorKind::AutoScale);
        assert_eq!(SelectorKind::for_auto_scale(false), SelectorKind::Monotonic);

        let topology: Arc<dyn CpuTopology> = Arc::new(FixedTopology::new(2));
        assert_eq!(
            SelectorKind::Monotonic.build(Arc::clone(&topology)).kind(),
            SelectorKind::Monotonic
        );
        assert_eq!(SelectorKind::AutoScale.build(topology).kind(), SelectorKind::AutoScale);
    }

    #[test]
    fn test_cpu_indexed_follows_current_cpu() -> TierResult<()> {
        let topology = Arc::new(FixedTopology::new(8));
        let selector = CpuIndexedSelector::new(Arc::clone(&topology) as Arc<dyn CpuTopology>);
        let pool = pool(MemTier::Normal, 100, 4)?;

        topology.set_current_cpu(1);
        assert_eq!(selector.select(&pool), Some(ArenaId::new(101)));

        topology.set_current_cpu(6);
        assert_eq!(selector.select(&pool), Some(ArenaId::new(102)));
        assert_eq!(pool.assignments(), 0);
        Ok(())
    }

    #[test]
    fn test_thread_assignment_is_stable() -> TierResult<()> {
        let selector = ThreadAssignedSelector::new();
        let pool = pool(MemTier::Normal, 0, 4)?;

        assert_eq!(selector.assigned_index(), None);
        let first = selector.select(&pool);
        for _ in 0..10 {
            assert_eq!(selector.select(&pool), first);
        }
        assert_eq!(selector.assigned_index(), Some(0));
        assert_eq!(pool.assignments(), 1);
        Ok(())
    }

    #[test]
    fn test_thread_assignment_shared_across_tiers() -> TierResult<()> {
        let selector = ThreadAssignedSelector::new();
        let normal = pool(MemTier::Normal, 0, 4)?;
        let expansion = pool(MemTier::Expansion, 10, 4)?;

        // burn one index so the thread lands on slot 1
        normal.next_assignment();
        assert_eq!(selector.select(&normal), Some(ArenaId::new(1)));
        assert_eq!(selector.select(&expansion), Some(ArenaId::new(11)));
        assert_eq!(expansion.assignments(), 0);
        Ok(())
    }

    #[test]
    fn test_threads_get_distinct_arenas() -> TierResult<()> {
        let selector = Arc::new(ThreadAssignedSelector::new());
        let pool = Arc::new(pool(MemTier::Normal, 0, 8)?);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let selector = Arc::clone(&selector);
                let pool = Arc::clone(&pool);
                std::thread::spawn(move || {
                    let first = selector.select(&pool);
                    let again = selector.select(&pool);
                    (first, again)
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            #[allow(clippy::unwrap_used)]
            let (first, again) = handle.join().unwrap();
            assert_eq!(first, again);
            assert!(seen.insert(first));
        }
        assert_eq!(seen.len(), 8);
        Ok(())
    }

    #[test]
    fn test_sequential_threads_draw_fresh_indices() -> TierResult<()> {
        let selector = Arc::new(ThreadAssignedSelector::new());
        let pool = Arc::new(pool(MemTier::Normal, 0, 4)?);

        let mut arenas = Vec::new();
        for round in 0..4_u64 {
            let selector = Arc::clone(&selector);
            let worker_pool = Arc::clone(&pool);
            let handle = std::thread::spawn(move || selector.select(&worker_pool));
            #[allow(clippy::unwrap_used)]
            arenas.push(handle.join().unwrap());
            assert_eq!(pool.assignments(), round + 1);
        }

        let expected: Vec<_> = (0..4).map(|id| Some(ArenaId::new(id))).collect();
        assert_eq!(arenas, expected);
        Ok(())
    }

    #[test]
    fn test_selectors_do_not_share_thread_state() -> TierResult<()> {
        let pool = pool(MemTier::Normal, 0, 4)?;
        let a = ThreadAssignedSelector::new();
        let b = ThreadAssignedSelector::new();

        assert_eq!(a.select(&pool), Some(ArenaId::new(0)));
        assert_eq!(b.select(&pool), Some(ArenaId::new(1)));
        assert_eq!(a.select(&pool), Some(ArenaId::new(0)));
        Ok(())
    }

    proptest! {
        #[test]
        fn prop_cpu_selection_stays_in_pool(cpu in 0_usize..4096, count in 1_u32..=128) {
            let topology = Arc::new(FixedTopology::new(cpu + 1));
            topology.set_current_cpu(cpu);
            let selector = CpuIndexedSelector::new(topology);
            let pool = pool(MemTier::Expansion, 7, count).map_err(|e| TestCaseError::fail(e.to_string()))?;

            let selected = selector.select(&pool);
            let expected = ArenaId::new(7 + u32::try_from(cpu % count as usize).unwrap_or(0));
            prop_assert_eq!(selected, Some(expected));
        }

        #[test]
        fn prop_assigned_selection_stays_in_pool(burned in 0_u64..1000, count in 1_u32..=128) {
            let selector = ThreadAssignedSelector::new();
            let pool = pool(MemTier::Normal, 0, count).map_err(|e| TestCaseError::fail(e.to_string()))?;
            for _ in 0..burned {
                pool.next_assignment();
            }

            let selected = selector.select(&pool);
            prop_assert!(selected.is_some_and(|arena| pool.contains(arena)));
            prop_assert_eq!(selected, pool.arena_for_slot(burned));
        }
    }
}
