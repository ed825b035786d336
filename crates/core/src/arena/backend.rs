//! Administrative interface of the underlying allocator.

use std::sync::Arc;

use crate::error::BackendError;
use crate::extent::ExtentHooks;
use crate::types::ArenaId;

/// Arena administration calls consumed by the pool manager
///
/// Implementations must keep `hooks` alive for as long as the arena exists,
/// which for every caller in this crate is the life of the process.
#[cfg_attr(test, mockall::automock)]
pub trait ArenaBackend: Send + Sync {
    /// Create a new arena and return its id
    ///
    /// # Errors
    ///
    /// Returns error if the allocator refuses to create another arena.
    fn create_arena(&self) -> Result<ArenaId, BackendError>;

    /// Whether `arena` is known to the allocator
    fn arena_exists(&self, arena: ArenaId) -> bool;

    /// Install `hooks` as the extent hook table of `arena`
    ///
    /// # Errors
    ///
    /// Returns error if the allocator rejects the hook table.
    fn install_extent_hooks(
        &self,
        arena: ArenaId,
        hooks: Arc<dyn ExtentHooks>,
    ) -> Result<(), BackendError>;
}
