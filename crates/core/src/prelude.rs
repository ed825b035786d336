//! `TierMem` Core Prelude
//!
//! Common imports for embedding tier-aware placement.

// Re-export core types
pub use crate::arena::{ArenaBackend, ArenaPool, ArenaPoolManager};
pub use crate::config::{BindFailurePolicy, MemTier, OomPolicy, TierConfig, TierPriority};
pub use crate::error::{BackendError, ExtentError, FatalError, TierError, TierResult};
pub use crate::extent::{Extent, ExtentHooks, ExtentRequest, HookStatus, NodeExtentProvider};
pub use crate::runtime::{InitStatus, ProcessState, TierRuntime};
pub use crate::selector::{ArenaSelector, SelectorKind};
pub use crate::topology::{CpuTopology, FixedTopology, SystemTopology};
pub use crate::types::{ArenaId, NodeId};

#[cfg(feature = "jemalloc")]
pub use crate::arena::jemalloc::{mallocx_arena_flags, JemallocBackend};

// Re-export validation
pub use garde::Validate;
