//! Extent Lifecycle Hooks
//!
//! The allocator obtains raw memory for an arena through a fixed set of
//! lifecycle callbacks. [`ExtentHooks`] is that contract in Rust form; the
//! allocator backend adapts it to whatever calling convention the allocator
//! uses (see `arena::jemalloc`).
//!
//! Return conventions are explicit here: [`HookStatus::Unsupported`] is what
//! jemalloc spells as `true` ("opt out") for the boolean hooks.

pub mod os;
pub mod provider;

use std::ptr::NonNull;

use crate::error::ExtentError;
use crate::types::NodeId;

pub use provider::NodeExtentProvider;

/// Outcome of a lifecycle hook that either acts or declines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookStatus {
    /// The hook performed the operation
    Done,
    /// The hook declines; the allocator must cope without it
    Unsupported,
}

impl HookStatus {
    /// Value in the allocator's inverted convention (`true` means failure)
    #[must_use]
    pub const fn as_opt_out(self) -> bool {
        matches!(self, Self::Unsupported)
    }
}

/// Parameters of an extent acquisition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtentRequest {
    /// Bytes requested, a page multiple
    pub size: usize,
    /// Required alignment, a power of two
    pub alignment: usize,
    /// Fixed target address, if the allocator asked for one
    pub requested_address: Option<NonNull<u8>>,
}

impl ExtentRequest {
    /// Request for `size` bytes at any address
    #[must_use]
    pub const fn new(size: usize, alignment: usize) -> Self {
        Self {
            size,
            alignment,
            requested_address: None,
        }
    }

    /// Same request pinned to `address`
    #[must_use]
    pub const fn at(self, address: NonNull<u8>) -> Self {
        Self {
            requested_address: Some(address),
            ..self
        }
    }
}

/// A region handed to the allocator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extent {
    /// Start of the region
    pub base: NonNull<u8>,
    /// Region length
    pub size: usize,
    /// Whether the region is known to be zero-filled
    pub zeroed: bool,
    /// Whether the region is committed
    pub committed: bool,
}

/// Extent lifecycle contract invoked by the allocator for one arena
pub trait ExtentHooks: Send + Sync + std::fmt::Debug {
    /// NUMA node this hook table places memory on
    fn node(&self) -> NodeId;

    /// Obtain a fresh region
    ///
    /// # Errors
    ///
    /// Returns an out-of-memory class error when no region can be produced,
    /// or a precondition error when the request breaks the alignment contract.
    fn acquire(&self, request: &ExtentRequest) -> Result<Extent, ExtentError>;

    /// Give a region back to the OS
    ///
    /// # Safety
    ///
    /// `region` must come from [`ExtentHooks::acquire`] on this object, span
    /// exactly `size` bytes and have no live references into it.
    ///
    /// # Errors
    ///
    /// Returns error on misaligned input or when the OS refuses the release.
    unsafe fn release(
        &self,
        region: NonNull<u8>,
        size: usize,
        committed: bool,
    ) -> Result<HookStatus, ExtentError>;

    /// Final teardown notification for a region
    ///
    /// # Safety
    ///
    /// Same as [`ExtentHooks::release`].
    unsafe fn destroy(&self, region: NonNull<u8>, size: usize, committed: bool);

    /// Commit pages `offset..offset + length` of a region
    fn commit(&self, region: NonNull<u8>, size: usize, offset: usize, length: usize)
        -> HookStatus;

    /// Decommit pages `offset..offset + length` of a region
    fn decommit(
        &self,
        region: NonNull<u8>,
        size: usize,
        offset: usize,
        length: usize,
    ) -> HookStatus;

    /// Lazily purge pages of a region
    fn purge_lazy(
        &self,
        region: NonNull<u8>,
        size: usize,
        offset: usize,
        length: usize,
    ) -> HookStatus;

    /// Forcibly purge pages of a region
    fn purge_forced(
        &self,
        region: NonNull<u8>,
        size: usize,
        offset: usize,
        length: usize,
    ) -> HookStatus;

    /// Split a region into `size_a` and `size_b`
    fn split(
        &self,
        region: NonNull<u8>,
        size: usize,
        size_a: usize,
        size_b: usize,
        committed: bool,
    ) -> HookStatus;

    /// Merge two adjacent regions
    fn merge(
        &self,
        region_a: NonNull<u8>,
        size_a: usize,
        region_b: NonNull<u8>,
        size_b: usize,
        committed: bool,
    ) -> HookStatus;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hook_status_convention() {
        assert!(HookStatus::Unsupported.as_opt_out());
        assert!(!HookStatus::Done.as_opt_out());
    }

    #[test]
    fn test_request_builders() {
        let request = ExtentRequest::new(8192, 4096);
        assert!(request.requested_address.is_none());

        let pinned = request.at(NonNull::dangling());
        assert!(pinned.requested_address.is_some());
        assert_eq!(pinned.size, 8192);
    }
}
