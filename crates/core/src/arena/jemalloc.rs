//! jemalloc Backend - `mallctl` arena administration and extent hook shims
//!
//! Each installed hook table is a leaked [`HookTable`] whose first field is
//! jemalloc's `extent_hooks_t`. jemalloc passes that pointer back to every
//! hook, so a single set of `extern "C"` shims recovers the [`ExtentHooks`]
//! object for any node. Tables are cached per hook object and live for the
//! rest of the process, matching the lifetime of the arenas using them.
//!
//! The shims run inside the allocator and never log or unwind. Failures
//! surface as provider counters and are logged by
//! [`crate::ProcessState::report_metrics`].

use std::ffi::{c_uint, c_void, CString};
use std::fmt;
use std::mem;
use std::ptr::{self, NonNull};
use std::sync::Arc;

use dashmap::DashMap;
use libc::{c_int, size_t};
use tikv_jemalloc_sys::{extent_hooks_t, mallctl};

use super::ArenaBackend;
use crate::error::{BackendError, ExtentError};
use crate::extent::{ExtentHooks, ExtentRequest};
use crate::types::ArenaId;

/// Bit offset of the arena field in `mallocx` flags
const MALLOCX_ARENA_SHIFT: u32 = 20;

/// `MALLOCX_ARENA(arena)`: route a `mallocx` call to `arena`
#[must_use]
pub const fn mallocx_arena_flags(arena: ArenaId) -> c_int {
    // jemalloc caps arena ids far below 2^11, the shifted value fits
    #[allow(clippy::cast_possible_wrap)]
    let id = arena.get().wrapping_add(1) as c_int;
    id << MALLOCX_ARENA_SHIFT
}

#[repr(C)]
struct HookTable {
    raw: extent_hooks_t,
    hooks: Arc<dyn ExtentHooks>,
}

const RAW_HOOKS: extent_hooks_t = extent_hooks_t {
    alloc: Some(extent_alloc),
    dalloc: Some(extent_dalloc),
    destroy: Some(extent_destroy),
    commit: Some(extent_commit),
    decommit: Some(extent_decommit),
    purge_lazy: Some(extent_purge_lazy),
    purge_forced: Some(extent_purge_forced),
    split: Some(extent_split),
    merge: Some(extent_merge),
};

/// [`ArenaBackend`] over the linked jemalloc
pub struct JemallocBackend {
    tables: DashMap<usize, &'static HookTable>,
}

impl JemallocBackend {
    /// Backend with no hook tables installed yet
    #[must_use]
    pub fn new() -> Self {
        Self {
            tables: DashMap::new(),
        }
    }

    /// Number of distinct hook tables handed to jemalloc
    #[must_use]
    pub fn table_count(&self) -> usize {
        self.tables.len()
    }

    fn hook_table(&self, hooks: Arc<dyn ExtentHooks>) -> &'static HookTable {
        let key = Arc::as_ptr(&hooks).cast::<()>() as usize;
        *self
            .tables
            .entry(key)
            .or_insert_with(|| &*Box::leak(Box::new(HookTable { raw: RAW_HOOKS, hooks })))
    }

    fn read_uint(name: &'static [u8]) -> Result<c_uint, c_int> {
        let mut value: c_uint = 0;
        let mut len: size_t = mem::size_of::<c_uint>();
        // SAFETY: name is NUL terminated, out buffer matches the control's type
        let code = unsafe {
            mallctl(
                name.as_ptr().cast(),
                ptr::addr_of_mut!(value).cast(),
                &mut len,
                ptr::null_mut(),
                0,
            )
        };
        if code == 0 {
            Ok(value)
        } else {
            Err(code)
        }
    }
}

impl Default for JemallocBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for JemallocBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JemallocBackend")
            .field("tables", &self.tables.len())
            .finish()
    }
}

impl ArenaBackend for JemallocBackend {
    fn create_arena(&self) -> Result<ArenaId, BackendError> {
        Self::read_uint(b"arenas.create\0")
            .map(ArenaId::new)
            .map_err(|code| BackendError::ArenaCreate { code })
    }

    fn arena_exists(&self, arena: ArenaId) -> bool {
        Self::read_uint(b"arenas.narenas\0").is_ok_and(|narenas| arena.get() < narenas)
    }

    fn install_extent_hooks(
        &self,
        arena: ArenaId,
        hooks: Arc<dyn ExtentHooks>,
    ) -> Result<(), BackendError> {
        let name = format!("arena.{}.extent_hooks", arena.get());
        let name = CString::new(name.clone()).map_err(|_| BackendError::InvalidName { name })?;

        let table = self.hook_table(hooks);
        let mut new_hooks: *mut extent_hooks_t = ptr::addr_of!(table.raw).cast_mut();
        // SAFETY: the table is leaked and never written by jemalloc
        let code = unsafe {
            mallctl(
                name.as_ptr(),
                ptr::null_mut(),
                ptr::null_mut(),
                ptr::addr_of_mut!(new_hooks).cast(),
                mem::size_of::<*mut extent_hooks_t>(),
            )
        };
        if code == 0 {
            Ok(())
        } else {
            Err(BackendError::HookInstall { arena, code })
        }
    }
}

/// Recover the hook object behind a table pointer installed by this module
///
/// # Safety
///
/// `raw` must be the `raw` field of a leaked [`HookTable`].
unsafe fn hooks_of<'a>(raw: *mut extent_hooks_t) -> &'a dyn ExtentHooks {
    &*(*raw.cast::<HookTable>()).hooks
}

fn region(addr: *mut c_void) -> NonNull<u8> {
    NonNull::new(addr.cast::<u8>()).unwrap_or_else(|| std::process::abort())
}

fn fail_or_abort(err: &ExtentError) -> bool {
    if err.is_precondition_violation() {
        std::process::abort();
    }
    true
}

unsafe extern "C" fn extent_alloc(
    raw: *mut extent_hooks_t,
    new_addr: *mut c_void,
    size: size_t,
    alignment: size_t,
    zero: *mut bool,
    commit: *mut bool,
    _arena_ind: c_uint,
) -> *mut c_void {
    let mut request = ExtentRequest::new(size, alignment);
    if let Some(address) = NonNull::new(new_addr.cast::<u8>()) {
        request = request.at(address);
    }

    match hooks_of(raw).acquire(&request) {
        Ok(extent) => {
            if !zero.is_null() {
                *zero = extent.zeroed;
            }
            if !commit.is_null() {
                *commit = extent.committed;
            }
            extent.base.as_ptr().cast()
        }
        Err(err) => {
            if err.is_precondition_violation() {
                std::process::abort();
            }
            ptr::null_mut()
        }
    }
}

unsafe extern "C" fn extent_dalloc(
    raw: *mut extent_hooks_t,
    addr: *mut c_void,
    size: size_t,
    committed: bool,
    _arena_ind: c_uint,
) -> bool {
    match hooks_of(raw).release(region(addr), size, committed) {
        Ok(status) => status.as_opt_out(),
        Err(err) => fail_or_abort(&err),
    }
}

unsafe extern "C" fn extent_destroy(
    raw: *mut extent_hooks_t,
    addr: *mut c_void,
    size: size_t,
    committed: bool,
    _arena_ind: c_uint,
) {
    hooks_of(raw).destroy(region(addr), size, committed);
}

unsafe extern "C" fn extent_commit(
    raw: *mut extent_hooks_t,
    addr: *mut c_void,
    size: size_t,
    offset: size_t,
    length: size_t,
    _arena_ind: c_uint,
) -> bool {
    hooks_of(raw)
        .commit(region(addr), size, offset, length)
        .as_opt_out()
}

unsafe extern "C" fn extent_decommit(
    raw: *mut extent_hooks_t,
    addr: *mut c_void,
    size: size_t,
    offset: size_t,
    length: size_t,
    _arena_ind: c_uint,
) -> bool {
    hooks_of(raw)
        .decommit(region(addr), size, offset, length)
        .as_opt_out()
}

unsafe extern "C" fn extent_purge_lazy(
    raw: *mut extent_hooks_t,
    addr: *mut c_void,
    size: size_t,
    offset: size_t,
    length: size_t,
    _arena_ind: c_uint,
) -> bool {
    hooks_of(raw)
        .purge_lazy(region(addr), size, offset, length)
        .as_opt_out()
}

unsafe extern "C" fn extent_purge_forced(
    raw: *mut extent_hooks_t,
    addr: *mut c_void,
    size: size_t,
    offset: size_t,
    length: size_t,
    _arena_ind: c_uint,
) -> bool {
    hooks_of(raw)
        .purge_forced(region(addr), size, offset, length)
        .as_opt_out()
}

unsafe extern "C" fn extent_split(
    raw: *mut extent_hooks_t,
    addr: *mut c_void,
    size: size_t,
    size_a: size_t,
    size_b: size_t,
    committed: bool,
    _arena_ind: c_uint,
) -> bool {
    hooks_of(raw)
        .split(region(addr), size, size_a, size_b, committed)
        .as_opt_out()
}

unsafe extern "C" fn extent_merge(
    raw: *mut extent_hooks_t,
    addr_a: *mut c_void,
    size_a: size_t,
    addr_b: *mut c_void,
    size_b: size_t,
    committed: bool,
    _arena_ind: c_uint,
) -> bool {
    hooks_of(raw)
        .merge(region(addr_a), size_a, region(addr_b), size_b, committed)
        .as_opt_out()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BindFailurePolicy;
    use crate::extent::NodeExtentProvider;
    use crate::types::NodeId;
    use std::sync::atomic::Ordering;

    #[test]
    fn test_mallocx_arena_flags() {
        assert_eq!(mallocx_arena_flags(ArenaId::new(0)), 1 << 20);
        assert_eq!(mallocx_arena_flags(ArenaId::new(5)), 6 << 20);
    }

    #[test]
    fn test_tables_are_cached_per_hook_object() {
        let backend = JemallocBackend::new();
        let provider: Arc<dyn ExtentHooks> =
            Arc::new(NodeExtentProvider::new(NodeId::new(0), BindFailurePolicy::Ignore));

        let first = backend.hook_table(Arc::clone(&provider));
        let second = backend.hook_table(Arc::clone(&provider));
        assert!(ptr::eq(first, second));
        assert_eq!(backend.table_count(), 1);
    }

    #[test]
    fn test_allocation_flows_through_provider() -> Result<(), BackendError> {
        let backend = JemallocBackend::new();
        let provider = Arc::new(NodeExtentProvider::new(NodeId::new(0), BindFailurePolicy::Ignore));

        let arena = backend.create_arena()?;
        assert!(backend.arena_exists(arena));
        backend.install_extent_hooks(arena, Arc::clone(&provider) as Arc<dyn ExtentHooks>)?;

        let flags = mallocx_arena_flags(arena);
        // SAFETY: plain jemalloc allocation freed with matching flags
        unsafe {
            let block = tikv_jemalloc_sys::mallocx(4 << 20, flags);
            assert!(!block.is_null());
            tikv_jemalloc_sys::dallocx(block, flags);
        }
        assert!(provider.stats().acquired.load(Ordering::Relaxed) >= 1);
        Ok(())
    }
}
