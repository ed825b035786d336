//! Thin wrappers over the OS memory interfaces used by extent providers.
//!
//! Nothing in here allocates on the heap: these functions run inside the
//! allocator's extent hooks, where re-entering `malloc` is not allowed.

use std::ptr::{self, NonNull};
use std::sync::OnceLock;

use crate::types::NodeId;

/// Fallback page size when `sysconf` gives no answer
pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// Whether node binding is compiled in
pub const BINDING_ENABLED: bool = cfg!(all(target_os = "linux", feature = "numa"));

/// Words in the node mask handed to `mbind` (covers nodes 0..=1023)
#[cfg(all(target_os = "linux", feature = "numa"))]
const NODE_MASK_WORDS: usize = 16;

static PAGE_SIZE: OnceLock<usize> = OnceLock::new();

/// System page size
pub fn page_size() -> usize {
    *PAGE_SIZE.get_or_init(|| {
        // SAFETY: sysconf has no preconditions
        let raw = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        usize::try_from(raw)
            .ok()
            .filter(|size| size.is_power_of_two())
            .unwrap_or(DEFAULT_PAGE_SIZE)
    })
}

fn last_errno() -> i32 {
    std::io::Error::last_os_error().raw_os_error().unwrap_or(0)
}

fn mmap_private(size: usize) -> Result<NonNull<u8>, i32> {
    // SAFETY: anonymous private mapping at a kernel-chosen address
    let raw = unsafe {
        libc::mmap(
            ptr::null_mut(),
            size,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
            -1,
            0,
        )
    };

    if raw == libc::MAP_FAILED {
        return Err(last_errno());
    }
    NonNull::new(raw.cast::<u8>()).ok_or(libc::ENOMEM)
}

/// Map `size` bytes of anonymous private memory aligned to `alignment`
///
/// `size` must be a page multiple and `alignment` a power of two. Alignments
/// above the page size are met by over-mapping and trimming both ends.
///
/// # Errors
///
/// Returns the OS error number if the mapping fails.
pub fn map_anonymous(size: usize, alignment: usize) -> Result<NonNull<u8>, i32> {
    let page = page_size();
    if alignment <= page {
        return mmap_private(size);
    }

    let padded = size.checked_add(alignment - page).ok_or(libc::ENOMEM)?;
    let base = mmap_private(padded)?;

    // SAFETY: every range handed to the closure lies inside the fresh mapping
    trim_to_alignment(base, padded, size, alignment, |region, len| unsafe {
        unmap(region, len)
    })
}

/// Cut the slack around the aligned `size` bytes of a padded mapping
///
/// When a trim fails, whatever is still mapped is handed to `release` once
/// more so an error never leaves part of the mapping behind.
fn trim_to_alignment<F>(
    base: NonNull<u8>,
    padded: usize,
    size: usize,
    alignment: usize,
    mut release: F,
) -> Result<NonNull<u8>, i32>
where
    F: FnMut(NonNull<u8>, usize) -> Result<(), i32>,
{
    let addr = base.as_ptr() as usize;
    let head = addr.next_multiple_of(alignment) - addr;
    let tail = padded - head - size;
    let aligned = NonNull::new(base.as_ptr().wrapping_add(head)).ok_or(libc::ENOMEM)?;

    if head > 0 {
        if let Err(errno) = release(base, head) {
            let _ = release(base, padded);
            return Err(errno);
        }
    }
    if tail > 0 {
        let tail_start =
            NonNull::new(aligned.as_ptr().wrapping_add(size)).ok_or(libc::ENOMEM)?;
        if let Err(errno) = release(tail_start, tail) {
            let _ = release(aligned, size + tail);
            return Err(errno);
        }
    }

    Ok(aligned)
}

/// Restrict the physical backing of a region to `node`
///
/// # Errors
///
/// Returns the OS error number when the kernel rejects the policy.
#[cfg(all(target_os = "linux", feature = "numa"))]
pub fn bind_to_node(region: NonNull<u8>, size: usize, node: NodeId) -> Result<(), i32> {
    const MPOL_BIND: libc::c_int = 2;
    let bits = libc::c_ulong::BITS as usize;

    let index = node.get() as usize;
    let mut mask: [libc::c_ulong; NODE_MASK_WORDS] = [0; NODE_MASK_WORDS];
    let word = mask.get_mut(index / bits).ok_or(libc::EINVAL)?;
    *word |= 1 << (index % bits);

    // maxnode counts one past the last mask bit, as libnuma passes it
    let maxnode = NODE_MASK_WORDS * bits + 1;

    // SAFETY: region is a live mapping of `size` bytes and mask outlives the call
    let rc = unsafe {
        libc::syscall(
            libc::SYS_mbind,
            region.as_ptr(),
            size,
            MPOL_BIND,
            mask.as_ptr(),
            maxnode,
            0_u32,
        )
    };

    if rc < 0 {
        Err(last_errno())
    } else {
        Ok(())
    }
}

/// Node binding is compiled out; every region is accepted as-is
///
/// # Errors
///
/// Never fails.
#[cfg(not(all(target_os = "linux", feature = "numa")))]
pub const fn bind_to_node(_region: NonNull<u8>, _size: usize, _node: NodeId) -> Result<(), i32> {
    Ok(())
}

/// Return a region to the OS
///
/// # Safety
///
/// `region..region + size` must be a mapping owned by the caller with no live references.
///
/// # Errors
///
/// Returns the OS error number if `munmap` fails.
pub unsafe fn unmap(region: NonNull<u8>, size: usize) -> Result<(), i32> {
    if libc::munmap(region.as_ptr().cast(), size) == 0 {
        Ok(())
    } else {
        Err(last_errno())
    }
}
