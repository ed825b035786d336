//! Tier Runtime - one-way initialization gate and process state
//!
//! [`TierRuntime`] is the explicitly constructed context replacing
//! process-wide globals. It moves from uninitialized to ready exactly once;
//! after that every call reads the immutable [`ProcessState`].

use std::fmt;
use std::sync::atomic::Ordering;
use std::sync::{Arc, OnceLock};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::arena::{ArenaBackend, ArenaPool, ArenaPoolManager};
use crate::config::{BindFailurePolicy, MemTier, OomPolicy, TierConfig};
use crate::error::{abort_on_fatal, TierError, TierResult};
use crate::extent::ExtentHooks;
use crate::selector::{ArenaSelector, SelectorKind};
use crate::topology::{CpuTopology, SystemTopology};
use crate::types::ArenaId;

/// Result of a successful [`TierRuntime::init`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitStatus {
    /// This call built the pools
    Initialized,
    /// An earlier call already built the pools
    AlreadyReady,
    /// The expansion tier is disabled; nothing was built
    ExpansionDisabled,
}

/// Everything built by initialization
#[derive(Debug)]
pub struct ProcessState {
    config: TierConfig,
    manager: ArenaPoolManager,
    selector: Box<dyn ArenaSelector>,
    current_priority: RwLock<usize>,
}

impl ProcessState {
    /// Effective configuration, arena counts already scaled
    #[must_use]
    pub const fn config(&self) -> &TierConfig {
        &self.config
    }

    /// Pools of both tiers
    #[must_use]
    pub const fn manager(&self) -> &ArenaPoolManager {
        &self.manager
    }

    /// Active selection strategy
    #[must_use]
    pub fn selector_kind(&self) -> SelectorKind {
        self.selector.kind()
    }

    /// Policy applied when a tier runs out of memory
    #[must_use]
    pub const fn oom_policy(&self) -> OomPolicy {
        self.config.oom_policy
    }

    /// Pool index currently preferred (0 or 1)
    #[must_use]
    pub fn current_priority(&self) -> usize {
        *self.current_priority.read()
    }

    /// Tier of the currently preferred pool
    #[must_use]
    pub fn current_tier(&self) -> MemTier {
        self.config
            .priority
            .tier_at(self.current_priority())
            .unwrap_or_else(|| self.config.priority.preferred())
    }

    /// Switch the preferred pool index
    ///
    /// # Errors
    ///
    /// Returns [`TierError::InvalidPriority`] for an index other than 0 or 1.
    pub fn set_current_priority(&self, index: usize) -> TierResult<()> {
        if self.config.priority.tier_at(index).is_none() {
            return Err(TierError::InvalidPriority { index });
        }
        *self.current_priority.write() = index;
        debug!("current priority set to pool {}", index);
        Ok(())
    }

    /// Arena the calling thread should use for `tier`
    ///
    /// # Errors
    ///
    /// Returns [`TierError::EmptyPool`] if the tier's pool has no arenas.
    pub fn select(&self, tier: MemTier) -> TierResult<ArenaId> {
        self.selector
            .select(self.manager.pool(tier))
            .ok_or(TierError::EmptyPool { tier })
    }

    /// Pool serving `tier`
    #[must_use]
    pub fn pool(&self, tier: MemTier) -> &ArenaPool {
        self.manager.pool(tier)
    }

    /// Publish extent provider counters, one label set per node
    ///
    /// Hooks only touch atomics; this copies them into the metrics registry
    /// and logs node binding failures unless the policy ignores them.
    pub fn report_metrics(&self) {
        for tier in MemTier::ALL {
            let provider = self.manager.provider(tier);
            let stats = provider.stats();
            let bind_failures = stats.bind_failures.load(Ordering::Relaxed);
            let (tier, node) = (tier.as_str(), provider.node().to_string());

            metrics::counter!("tiermem_extents_acquired_total", "tier" => tier, "node" => node.clone())
                .absolute(stats.acquired.load(Ordering::Relaxed));
            metrics::counter!("tiermem_extents_released_total", "tier" => tier, "node" => node.clone())
                .absolute(stats.released.load(Ordering::Relaxed));
            metrics::counter!("tiermem_bind_failures_total", "tier" => tier, "node" => node.clone())
                .absolute(bind_failures);

            if bind_failures > 0 && provider.bind_failure() != BindFailurePolicy::Ignore {
                warn!(
                    "{} extents of the {} tier could not be bound to {} (last errno {:?}, {} leaked)",
                    bind_failures,
                    tier,
                    node,
                    stats.last_bind_errno(),
                    stats.unmap_failures.load(Ordering::Relaxed)
                );
            }
        }
    }
}

/// Process entry point for tier-aware placement
pub struct TierRuntime {
    config: TierConfig,
    backend: Arc<dyn ArenaBackend>,
    topology: Arc<dyn CpuTopology>,
    init_lock: Mutex<()>,
    state: OnceLock<ProcessState>,
}

impl fmt::Debug for TierRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TierRuntime")
            .field("config", &self.config)
            .field("topology", &self.topology)
            .field("state", &self.state.get())
            .finish_non_exhaustive()
    }
}

impl TierRuntime {
    /// Create an uninitialized runtime
    #[must_use]
    pub fn new(
        config: TierConfig,
        backend: Arc<dyn ArenaBackend>,
        topology: Arc<dyn CpuTopology>,
    ) -> Self {
        Self {
            config,
            backend,
            topology,
            init_lock: Mutex::new(()),
            state: OnceLock::new(),
        }
    }

    /// Create an uninitialized runtime reading the host topology
    #[must_use]
    pub fn with_system_topology(config: TierConfig, backend: Arc<dyn ArenaBackend>) -> Self {
        Self::new(config, backend, Arc::new(SystemTopology))
    }

    /// Create an uninitialized runtime driving the linked jemalloc
    #[cfg(feature = "jemalloc")]
    #[must_use]
    pub fn jemalloc(config: TierConfig) -> Self {
        Self::with_system_topology(config, Arc::new(crate::arena::JemallocBackend::new()))
    }

    /// Configuration as supplied, before scaling
    #[must_use]
    pub const fn config(&self) -> &TierConfig {
        &self.config
    }

    /// Whether initialization has completed
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state.get().is_some()
    }

    /// Build pools and selector once
    ///
    /// Idempotent: later calls return [`InitStatus::AlreadyReady`] without
    /// touching the backend. With the expansion tier disabled nothing is
    /// built and [`InitStatus::ExpansionDisabled`] is returned.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a bad configuration and
    /// [`TierError::Fatal`] when the placement guarantee cannot be set up.
    /// The runtime stays uninitialized in both cases.
    pub fn init(&self) -> TierResult<InitStatus> {
        if !self.config.use_expansion {
            info!("expansion tier disabled, skipping arena pools");
            return Ok(InitStatus::ExpansionDisabled);
        }
        if self.is_ready() {
            return Ok(InitStatus::AlreadyReady);
        }

        let _guard = self.init_lock.lock();
        if self.is_ready() {
            return Ok(InitStatus::AlreadyReady);
        }

        let state = self.bootstrap()?;
        if self.state.set(state).is_err() {
            return Ok(InitStatus::AlreadyReady);
        }
        Ok(InitStatus::Initialized)
    }

    /// [`TierRuntime::init`], terminating the process on a fatal error
    ///
    /// # Errors
    ///
    /// Returns non-fatal errors (configuration) unchanged.
    pub fn init_or_abort(&self) -> TierResult<InitStatus> {
        match self.init() {
            Err(TierError::Fatal(fatal)) => abort_on_fatal(&fatal),
            other => other,
        }
    }

    fn bootstrap(&self) -> TierResult<ProcessState> {
        self.config.validate()?;

        let cpus = self.topology.online_cpus();
        let mut config = self.config.clone();
        let narenas = config.scale_arena_counts(cpus)?;

        let kind = SelectorKind::for_auto_scale(config.use_auto_arena_scaling);
        let selector = kind.build(Arc::clone(&self.topology));
        let manager = ArenaPoolManager::build(&config, self.backend.as_ref())?;

        info!(
            "tier pools ready: {} cpus, {} arenas per tier, {} selector, priority [{}, {}]",
            cpus,
            narenas,
            kind,
            config.priority.preferred(),
            config.priority.fallback()
        );

        Ok(ProcessState {
            config,
            manager,
            selector,
            current_priority: RwLock::new(0),
        })
    }

    /// Initialized state
    ///
    /// # Errors
    ///
    /// Returns [`TierError::ExpansionDisabled`] when the expansion tier is off
    /// and [`TierError::NotInitialized`] before a successful init.
    pub fn state(&self) -> TierResult<&ProcessState> {
        if !self.config.use_expansion {
            return Err(TierError::ExpansionDisabled);
        }
        self.state.get().ok_or(TierError::NotInitialized)
    }

    /// Pool index currently preferred (0 or 1)
    ///
    /// # Errors
    ///
    /// Returns error when the runtime is disabled or not yet initialized.
    pub fn current_priority(&self) -> TierResult<usize> {
        Ok(self.state()?.current_priority())
    }

    /// Switch the preferred pool index
    ///
    /// # Errors
    ///
    /// Returns [`TierError::InvalidPriority`] for an index other than 0 or 1,
    /// and error when the runtime is disabled or not yet initialized.
    pub fn set_current_priority(&self, index: usize) -> TierResult<()> {
        self.state()?.set_current_priority(index)
    }

    /// Arena the calling thread should use for `tier`
    ///
    /// # Errors
    ///
    /// Returns error when the runtime is disabled or not yet initialized.
    pub fn get_target_arena(&self, tier: MemTier) -> TierResult<ArenaId> {
        self.state()?.select(tier)
    }

    /// Charge `bytes` against the zone of `tier`
    ///
    /// # Errors
    ///
    /// Returns [`TierError::ZoneExhausted`] when the zone cannot take the charge.
    pub fn charge(&self, tier: MemTier, bytes: u64) -> TierResult<u64> {
        self.state()?.pool(tier).try_charge(bytes)
    }

    /// Return `bytes` to the zone of `tier`
    ///
    /// # Errors
    ///
    /// Returns error when the runtime is disabled or not yet initialized.
    pub fn uncharge(&self, tier: MemTier, bytes: u64) -> TierResult<u64> {
        Ok(self.state()?.pool(tier).uncharge(bytes))
    }
}
