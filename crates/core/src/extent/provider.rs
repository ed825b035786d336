//! Node Extent Provider - NUMA-bound extents for one memory tier
//!
//! Every extent is a single anonymous mapping bound to the provider's node.
//! Split, merge, commit, decommit and purge are all declined, so the only
//! lifecycle events an extent sees are acquire and release/destroy and it
//! never straddles or loses its node affinity.

use std::ptr::NonNull;
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};

use super::{os, Extent, ExtentHooks, ExtentRequest, HookStatus};
use crate::config::BindFailurePolicy;
use crate::error::ExtentError;
use crate::types::NodeId;

/// Per-provider counters
#[derive(Debug, Default)]
pub struct ProviderStats {
    /// Extents handed out
    pub acquired: AtomicU64,
    /// Extents returned to the OS
    pub released: AtomicU64,
    /// Failed node bindings
    pub bind_failures: AtomicU64,
    /// Bytes currently mapped through this provider
    pub mapped_bytes: AtomicU64,
    /// Regions that could not be returned after a rejected binding
    pub unmap_failures: AtomicU64,
    last_bind_errno: AtomicI32,
}

impl ProviderStats {
    fn record_acquire(&self, size: usize) {
        self.acquired.fetch_add(1, Ordering::Relaxed);
        self.mapped_bytes
            .fetch_add(u64::try_from(size).unwrap_or(u64::MAX), Ordering::Relaxed);
    }

    /// OS error of the most recent failed binding
    #[must_use]
    pub fn last_bind_errno(&self) -> Option<i32> {
        match self.last_bind_errno.load(Ordering::Relaxed) {
            0 => None,
            errno => Some(errno),
        }
    }

    fn record_bind_failure(&self, errno: i32) {
        self.bind_failures.fetch_add(1, Ordering::Relaxed);
        self.last_bind_errno.store(errno, Ordering::Relaxed);
    }

    fn record_release(&self, size: usize) {
        self.released.fetch_add(1, Ordering::Relaxed);
        self.mapped_bytes
            .fetch_sub(u64::try_from(size).unwrap_or(0), Ordering::Relaxed);
    }
}

/// Extent hooks placing memory on a single NUMA node
#[derive(Debug)]
pub struct NodeExtentProvider {
    node: NodeId,
    bind_failure: BindFailurePolicy,
    stats: ProviderStats,
}

impl NodeExtentProvider {
    /// Create a provider for `node`
    #[must_use]
    pub fn new(node: NodeId, bind_failure: BindFailurePolicy) -> Self {
        Self {
            node,
            bind_failure,
            stats: ProviderStats::default(),
        }
    }

    /// Binding failure policy in effect
    #[must_use]
    pub const fn bind_failure(&self) -> BindFailurePolicy {
        self.bind_failure
    }

    /// Provider counters
    #[must_use]
    pub const fn stats(&self) -> &ProviderStats {
        &self.stats
    }

    fn check_page_multiple(what: &'static str, value: usize) -> Result<(), ExtentError> {
        let page_size = os::page_size();
        if value % page_size == 0 {
            Ok(())
        } else {
            Err(ExtentError::Misaligned {
                what,
                value,
                page_size,
            })
        }
    }

    /// Apply the binding policy to a fresh mapping
    ///
    /// Runs inside the allocator's extent hook, so failures are only
    /// counted here; [`crate::ProcessState::report_metrics`] logs them.
    fn bind(&self, base: NonNull<u8>, size: usize) -> Result<(), ExtentError> {
        let Err(errno) = os::bind_to_node(base, size, self.node) else {
            return Ok(());
        };
        self.stats.record_bind_failure(errno);

        match self.bind_failure {
            BindFailurePolicy::Ignore | BindFailurePolicy::Warn => Ok(()),
            BindFailurePolicy::Fail => {
                // SAFETY: mapping was created above and never handed out
                if unsafe { os::unmap(base, size) }.is_err() {
                    self.stats.unmap_failures.fetch_add(1, Ordering::Relaxed);
                }
                Err(ExtentError::BindFailed {
                    node: self.node,
                    size,
                    errno,
                })
            }
        }
    }
}

impl ExtentHooks for NodeExtentProvider {
    fn node(&self) -> NodeId {
        self.node
    }

    fn acquire(&self, request: &ExtentRequest) -> Result<Extent, ExtentError> {
        let size = request.size;
        if size == 0 {
            return Err(ExtentError::ZeroSize);
        }
        Self::check_page_multiple("size", size)?;
        if !request.alignment.is_power_of_two() {
            return Err(ExtentError::InvalidAlignment {
                alignment: request.alignment,
            });
        }
        if let Some(address) = request.requested_address {
            return Err(ExtentError::FixedAddress {
                address: address.as_ptr() as usize,
            });
        }

        let base = os::map_anonymous(size, request.alignment)
            .map_err(|errno| ExtentError::MapFailed { size, errno })?;
        self.bind(base, size)?;

        self.stats.record_acquire(size);
        Ok(Extent {
            base,
            size,
            zeroed: false,
            committed: true,
        })
    }

    unsafe fn release(
        &self,
        region: NonNull<u8>,
        size: usize,
        _committed: bool,
    ) -> Result<HookStatus, ExtentError> {
        Self::check_page_multiple("address", region.as_ptr() as usize)?;
        Self::check_page_multiple("size", size)?;

        os::unmap(region, size).map_err(|errno| ExtentError::UnmapFailed { size, errno })?;
        self.stats.record_release(size);
        Ok(HookStatus::Done)
    }

    unsafe fn destroy(&self, _region: NonNull<u8>, _size: usize, _committed: bool) {}

    fn commit(
        &self,
        _region: NonNull<u8>,
        _size: usize,
        _offset: usize,
        _length: usize,
    ) -> HookStatus {
        HookStatus::Unsupported
    }

    fn decommit(
        &self,
        _region: NonNull<u8>,
        _size: usize,
        _offset: usize,
        _length: usize,
    ) -> HookStatus {
        HookStatus::Unsupported
    }

    fn purge_lazy(
        &self,
        _region: NonNull<u8>,
        _size: usize,
        _offset: usize,
        _length: usize,
    ) -> HookStatus {
        HookStatus::Unsupported
    }

    fn purge_forced(
        &self,
        _region: NonNull<u8>,
        _size: usize,
        _offset: usize,
        _length: usize,
    ) -> HookStatus {
        HookStatus::Unsupported
    }

    fn split(
        &self,
        _region: NonNull<u8>,
        _size: usize,
        _size_a: usize,
        _size_b: usize,
        _committed: bool,
    ) -> HookStatus {
        HookStatus::Unsupported
    }

    fn merge(
        &self,
        _region_a: NonNull<u8>,
        _size_a: usize,
        _region_b: NonNull<u8>,
        _size_b: usize,
        _committed: bool,
    ) -> HookStatus {
        HookStatus::Unsupported
    }
}
