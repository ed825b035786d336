//! Arena Pools - Tier-Dedicated Arena Sets
//!
//! One [`ArenaPool`] per tier, built once by [`ArenaPoolManager`] through an
//! [`ArenaBackend`]. Pool sizes follow the online CPU count:
//!
//! ```text
//! arenas = min(cpus << factor, ARENA_HARD_MAX)
//! ```
//!
//! where `factor` is [`ARENA_AUTOSCALE_FACTOR`] with auto scaling enabled and
//! [`ARENA_SCALE_FACTOR`] otherwise.

pub mod backend;
#[cfg(feature = "jemalloc")]
pub mod jemalloc;
pub mod manager;
pub mod pool;

pub use backend::ArenaBackend;
#[cfg(feature = "jemalloc")]
pub use jemalloc::JemallocBackend;
pub use manager::ArenaPoolManager;
pub use pool::ArenaPool;

use crate::error::FatalError;

/// Hard upper bound on arenas per pool
pub const ARENA_HARD_MAX: usize = 128;

/// Shift applied to the CPU count with auto scaling (two arenas per CPU)
pub const ARENA_AUTOSCALE_FACTOR: u32 = 1;

/// Shift applied to the CPU count without auto scaling (one arena per CPU)
pub const ARENA_SCALE_FACTOR: u32 = 0;

/// Arena count for one pool given the online CPU count
///
/// # Errors
///
/// Returns [`FatalError::InvalidCpuCount`] when `cpus` is zero.
pub fn scaled_arena_count(cpus: usize, auto_scale: bool) -> Result<usize, FatalError> {
    if cpus == 0 {
        return Err(FatalError::InvalidCpuCount { count: cpus });
    }

    let factor = if auto_scale {
        ARENA_AUTOSCALE_FACTOR
    } else {
        ARENA_SCALE_FACTOR
    };
    Ok(cpus.saturating_mul(1 << factor).min(ARENA_HARD_MAX))
}
