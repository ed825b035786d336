//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tiermem_core::prelude::*;

/// In-memory backend handing out sequential arena ids
#[derive(Default)]
pub struct CountingBackend {
    next: AtomicU32,
    fail_after: Option<u32>,
    installed: Mutex<HashMap<ArenaId, Arc<dyn ExtentHooks>>>,
}

impl CountingBackend {
    /// Backend refusing every creation after `created` arenas
    pub fn failing_after(created: u32) -> Self {
        Self {
            fail_after: Some(created),
            ..Self::default()
        }
    }

    /// Arena ids handed out or refused so far
    pub fn created(&self) -> u32 {
        self.next.load(Ordering::SeqCst)
    }

    /// Hook object installed on `arena`
    pub fn hooks_for(&self, arena: ArenaId) -> Option<Arc<dyn ExtentHooks>> {
        self.installed.lock().get(&arena).cloned()
    }

    /// Number of arenas with hooks installed
    pub fn installed_count(&self) -> usize {
        self.installed.lock().len()
    }
}

impl ArenaBackend for CountingBackend {
    fn create_arena(&self) -> Result<ArenaId, BackendError> {
        let id = self.next.fetch_add(1, Ordering::SeqCst);
        if self.fail_after.is_some_and(|limit| id >= limit) {
            return Err(BackendError::ArenaCreate { code: 12 });
        }
        Ok(ArenaId::new(id))
    }

    fn arena_exists(&self, arena: ArenaId) -> bool {
        arena.get() < self.next.load(Ordering::SeqCst)
    }

    fn install_extent_hooks(
        &self,
        arena: ArenaId,
        hooks: Arc<dyn ExtentHooks>,
    ) -> Result<(), BackendError> {
        self.installed.lock().insert(arena, hooks);
        Ok(())
    }
}

/// Configuration with both tiers on node 0
pub fn local_config(auto_scale: bool) -> TierConfig {
    let mut config = TierConfig::single_node();
    config.use_auto_arena_scaling = auto_scale;
    config
}

/// Runtime over `backend` with a fixed CPU count
pub fn runtime(config: TierConfig, backend: &Arc<CountingBackend>, cpus: usize) -> TierRuntime {
    TierRuntime::new(
        config,
        Arc::clone(backend) as Arc<dyn ArenaBackend>,
        Arc::new(FixedTopology::new(cpus)),
    )
}

/// Route `tracing` output to the test harness, honoring `RUST_LOG`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
