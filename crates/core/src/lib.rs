//! `TierMem` Core - Tier-Aware Arena Placement
//!
//! This crate steers allocations of an arena-based allocator onto two memory
//! tiers (normal DRAM and expansion memory such as CXL-attached DRAM), each
//! backed by its own NUMA node.
//!
//! # Features
//!
//! - **Node-exact extents**: every extent is one anonymous mapping bound to its tier's node
//! - **Tier-dedicated pools**: arena counts scale with the online CPU count
//! - **Two selection strategies**: CPU-indexed lookup or per-thread assignment
//! - **One-way initialization**: idempotent, with fatal setup failures surfaced explicitly
//!
//! # Architecture
//!
//! - [`extent`] - Extent lifecycle contract and the NUMA-binding provider
//! - [`arena`] - Allocator backend, per-tier pools and the pool manager
//! - [`selector`] - Arena selection strategies
//! - [`runtime`] - Initialization gate and process state
//! - [`config`] - Tier configuration, loading and validation
//! - [`topology`] - CPU count and current-CPU queries
//!
//! # Example
//!
//! ```rust
//! use std::sync::{atomic::{AtomicU32, Ordering}, Arc};
//! use tiermem_core::prelude::*;
//!
//! #[derive(Default)]
//! struct CountingBackend(AtomicU32);
//!
//! impl ArenaBackend for CountingBackend {
//!     fn create_arena(&self) -> Result<ArenaId, BackendError> {
//!         Ok(ArenaId::new(self.0.fetch_add(1, Ordering::Relaxed)))
//!     }
//!
//!     fn arena_exists(&self, arena: ArenaId) -> bool {
//!         arena.get() < self.0.load(Ordering::Relaxed)
//!     }
//!
//!     fn install_extent_hooks(&self, _: ArenaId, _: Arc<dyn ExtentHooks>) -> Result<(), BackendError> {
//!         Ok(())
//!     }
//! }
//!
//! fn main() -> TierResult<()> {
//!     let runtime = TierRuntime::new(
//!         TierConfig::default(),
//!         Arc::new(CountingBackend::default()),
//!         Arc::new(FixedTopology::new(4)),
//!     );
//!     assert_eq!(runtime.init()?, InitStatus::Initialized);
//!
//!     let arena = runtime.get_target_arena(MemTier::Expansion)?;
//!     println!("expansion allocations go to {arena}");
//!     Ok(())
//! }
//! ```

#![deny(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::large_stack_arrays,
    clippy::indexing_slicing,
    missing_docs
)]
#![warn(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::cargo,
    clippy::correctness,
    clippy::suspicious,
    clippy::perf,
    clippy::style,
    clippy::complexity,
    clippy::diverging_sub_expression,
    clippy::unreachable,
    clippy::redundant_pattern_matching,
    clippy::manual_let_else,
    clippy::unnecessary_wraps,
    clippy::missing_errors_doc,
    clippy::cast_possible_truncation,
    clippy::undocumented_unsafe_blocks
)]
#![allow(clippy::multiple_crate_versions)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// Public modules
pub mod config;
pub mod error;
pub mod prelude;
pub mod types;

// Placement modules
pub mod arena;
pub mod extent;
pub mod runtime;
pub mod selector;
pub mod topology;

// Re-exports for convenience
pub use arena::{ArenaBackend, ArenaPool, ArenaPoolManager};
pub use config::{BindFailurePolicy, MemTier, OomPolicy, TierConfig, TierPriority};
pub use error::{BackendError, ExtentError, FatalError, TierError, TierResult};
pub use extent::{ExtentHooks, NodeExtentProvider};
pub use runtime::{InitStatus, ProcessState, TierRuntime};
pub use selector::{ArenaSelector, SelectorKind};
pub use types::{ArenaId, NodeId};

#[cfg(feature = "jemalloc")]
pub use arena::jemalloc::{mallocx_arena_flags, JemallocBackend};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build information
pub const BUILD_INFO: BuildInfo = BuildInfo {
    version: VERSION,
    git_hash: match option_env!("GIT_HASH") {
        Some(hash) => hash,
        None => "unknown",
    },
    numa_binding: extent::os::BINDING_ENABLED,
    jemalloc_backend: cfg!(feature = "jemalloc"),
    profile: if cfg!(debug_assertions) {
        "debug"
    } else {
        "release"
    },
};

/// Build information structure
#[derive(Debug, Clone)]
pub struct BuildInfo {
    /// Crate version
    pub version: &'static str,
    /// Git commit hash
    pub git_hash: &'static str,
    /// Whether extents are bound to NUMA nodes in this build
    pub numa_binding: bool,
    /// Whether the jemalloc backend is compiled in
    pub jemalloc_backend: bool,
    /// Build profile
    pub profile: &'static str,
}

impl BuildInfo {
    /// Get formatted build information
    #[must_use]
    pub fn formatted(&self) -> String {
        format!(
            "`TierMem` Core v{} ({})\nGit: {}\nNUMA binding: {}\njemalloc backend: {}",
            self.version, self.profile, self.git_hash, self.numa_binding, self.jemalloc_backend
        )
    }
}

/// Build a runtime over `backend` with the host topology and initialize it
///
/// Fatal setup failures terminate the process.
///
/// # Errors
///
/// Returns error if the configuration is invalid.
pub fn init_with_backend(
    config: TierConfig,
    backend: std::sync::Arc<dyn ArenaBackend>,
) -> TierResult<TierRuntime> {
    let runtime = TierRuntime::with_system_topology(config, backend);
    let status = runtime.init_or_abort()?;
    tracing::debug!("`TierMem` Core v{VERSION} init: {:?}", status);
    Ok(runtime)
}

/// Initialize placement on the linked jemalloc
///
/// Fatal setup failures terminate the process.
///
/// # Errors
///
/// Returns error if the configuration is invalid.
#[cfg(feature = "jemalloc")]
pub fn init(config: TierConfig) -> TierResult<TierRuntime> {
    init_with_backend(config, std::sync::Arc::new(JemallocBackend::new()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_info() {
        let formatted = BUILD_INFO.formatted();
        assert!(formatted.contains(VERSION));
        assert_eq!(BUILD_INFO.jemalloc_backend, cfg!(feature = "jemalloc"));
    }
}
