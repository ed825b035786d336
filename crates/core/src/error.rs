//! `TierMem` Core Error System
//!
//! Error types for each concern of the placement layer. Configuration,
//! backend and extent errors convert into [`TierError`]; [`FatalError`]
//! marks conditions under which the placement guarantee cannot be kept.

use thiserror::Error;

use crate::config::MemTier;
use crate::types::{ArenaId, NodeId};

/// Core result type for all operations
pub type TierResult<T> = Result<T, TierError>;

/// Conditions that leave the process without its placement guarantee (Copy for cheap propagation)
#[derive(Error, Debug, Copy, Clone, PartialEq, Eq)]
pub enum FatalError {
    /// The allocator refused to create an arena for a pool slot
    #[error("arena creation failed for {tier} pool slot {slot}")]
    ArenaCreation {
        /// Tier whose pool was being built
        tier: MemTier,
        /// Slot index inside the pool
        slot: usize,
    },

    /// A freshly created arena could not be looked up again
    #[error("{arena} was created but is not known to the allocator")]
    ArenaMissing {
        /// Arena that went missing
        arena: ArenaId,
    },

    /// Extent hooks could not be installed on an arena
    #[error("extent hook installation failed for {arena} on {node}")]
    HookInstallation {
        /// Target arena
        arena: ArenaId,
        /// Node the hooks bind to
        node: NodeId,
    },

    /// The online CPU count was not positive
    #[error("invalid online CPU count: {count}")]
    InvalidCpuCount {
        /// Reported count
        count: usize,
    },
}

/// Main error type for the placement layer
#[derive(Error, Debug)]
pub enum TierError {
    /// Unrecoverable setup failure
    #[error("Fatal error: {0}")]
    Fatal(#[from] FatalError),

    /// Configuration could not be loaded
    #[error("Configuration error: {message}")]
    Configuration {
        /// Error message
        message: String,
    },

    /// Configuration loaded but failed validation
    #[error("Validation failed for field '{field}': {reason}")]
    Validation {
        /// Field that failed validation
        field: String,
        /// Reason for validation failure
        reason: String,
    },

    /// Arena selection requested before a successful `init()`
    #[error("tier runtime is not initialized")]
    NotInitialized,

    /// The expansion tier is disabled by configuration
    #[error("expansion tier is disabled")]
    ExpansionDisabled,

    /// A pool holds no arenas
    #[error("{tier} pool has no arenas")]
    EmptyPool {
        /// Tier of the empty pool
        tier: MemTier,
    },

    /// Priority index outside the two pools
    #[error("invalid priority index {index}")]
    InvalidPriority {
        /// Rejected index
        index: usize,
    },

    /// A zone charge would exceed the pool budget
    #[error("{tier} zone exhausted: requested {requested} bytes, {remaining} remaining")]
    ZoneExhausted {
        /// Tier whose budget was exceeded
        tier: MemTier,
        /// Requested bytes
        requested: u64,
        /// Bytes still available
        remaining: u64,
    },

    /// Extent lifecycle failure
    #[error("Extent error: {0}")]
    Extent(#[from] ExtentError),

    /// Allocator administrative call failure
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),
}

/// Extent lifecycle errors raised by node extent providers
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtentError {
    /// A fixed target address was requested
    #[error("fixed-address extents are not supported (requested {address:#x})")]
    FixedAddress {
        /// Requested address
        address: usize,
    },

    /// The anonymous mapping failed
    #[error("mmap of {size} bytes failed: errno {errno}")]
    MapFailed {
        /// Requested size
        size: usize,
        /// OS error number
        errno: i32,
    },

    /// Binding to the NUMA node failed and the policy rejects the region
    #[error("binding {size} bytes to {node} failed: errno {errno}")]
    BindFailed {
        /// Target node
        node: NodeId,
        /// Region size
        size: usize,
        /// OS error number
        errno: i32,
    },

    /// Unmapping a released region failed
    #[error("munmap of {size} bytes failed: errno {errno}")]
    UnmapFailed {
        /// Region size
        size: usize,
        /// OS error number
        errno: i32,
    },

    /// Size or address not a multiple of the page size
    #[error("{what} {value:#x} is not aligned to page size {page_size}")]
    Misaligned {
        /// Which argument was misaligned
        what: &'static str,
        /// Offending value
        value: usize,
        /// Page size in effect
        page_size: usize,
    },

    /// Zero-length extent requested
    #[error("zero-sized extent requested")]
    ZeroSize,

    /// Alignment is not a power of two
    #[error("alignment {alignment} is not a power of two")]
    InvalidAlignment {
        /// Requested alignment
        alignment: usize,
    },
}

impl ExtentError {
    /// Whether the allocator contract was broken by the caller
    #[must_use]
    pub const fn is_precondition_violation(&self) -> bool {
        matches!(
            self,
            Self::Misaligned { .. } | Self::ZeroSize | Self::InvalidAlignment { .. }
        )
    }

    /// Whether this should reach the allocator as "no memory"
    #[must_use]
    pub const fn is_out_of_memory(&self) -> bool {
        matches!(
            self,
            Self::FixedAddress { .. } | Self::MapFailed { .. } | Self::BindFailed { .. }
        )
    }
}

/// Errors from the allocator administrative interface
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// `arenas.create` failed
    #[error("arena creation failed: code {code}")]
    ArenaCreate {
        /// Return code from the allocator
        code: i32,
    },

    /// Per-arena hook configuration failed
    #[error("installing extent hooks on {arena} failed: code {code}")]
    HookInstall {
        /// Target arena
        arena: ArenaId,
        /// Return code from the allocator
        code: i32,
    },

    /// The allocator rejected a control name
    #[error("invalid control name: {name}")]
    InvalidName {
        /// Offending name
        name: String,
    },
}

impl TierError {
    /// Create configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create validation error
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Whether the error is unrecoverable
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }
}

impl From<config::ConfigError> for TierError {
    fn from(err: config::ConfigError) -> Self {
        Self::config(err.to_string())
    }
}

impl From<toml::de::Error> for TierError {
    fn from(err: toml::de::Error) -> Self {
        Self::config(err.to_string())
    }
}

/// Log a fatal error and terminate the process
pub fn abort_on_fatal(err: &FatalError) -> ! {
    tracing::error!("unrecoverable placement failure, aborting: {err}");
    std::process::abort()
}
