//! Root allocator - pass-through to the host allocator
//!
//! `Gmem` forwards every operation to `std::alloc`, which is the platform
//! (libc) allocator. It is the ultimate parent for arenas and is usable
//! from the start of the process with no setup.
//!
//! Debug builds keep a shadow registry of live allocations so the one
//! contract the interface cannot enforce - callers resupplying the exact
//! `old_size` they were granted - is checked while testing. Release builds
//! compile the registry out; the allocator stays stateless.

use core::ptr::NonNull;
use std::alloc::{alloc, alloc_zeroed, dealloc, handle_alloc_error, realloc, Layout};

use super::{Mem, MemOp, OpKind};

/// The libc-backed root allocator. Zero-sized; use [`GMEM`].
///
/// Freeing or growing through `Gmem` must supply the alignment of the
/// original allocation (0 = [`MAX_ALIGN`](super::MAX_ALIGN)), the same way
/// `old_size` must be resupplied. [`MemBuf`](super::MemBuf) records both.
pub struct Gmem;

/// Process-wide root allocator instance.
pub static GMEM: Gmem = Gmem;

impl Mem for Gmem {
    fn run(&self, op: MemOp) -> NonNull<u8> {
        op.validate();
        match op.kind {
            OpKind::Alloc => self.host_alloc(op.size, op.effective_align(), op.zeroed),
            OpKind::Grow => match op.old_ptr {
                None => self.host_alloc(op.size, op.effective_align(), op.zeroed),
                Some(old) => {
                    debug_assert!(op.size >= op.old_size, "grow must not decrease size");
                    let ptr = self.host_realloc(old, op.old_size, op.size, op.effective_align());
                    if op.zeroed && op.size > op.old_size {
                        // Only the added tail needs clearing.
                        unsafe {
                            ptr.as_ptr()
                                .add(op.old_size)
                                .write_bytes(0, op.size - op.old_size);
                        }
                    }
                    ptr
                }
            },
            OpKind::Shrink => {
                let old = op.old_ptr.expect("shrink of null pointer");
                debug_assert!(op.size <= op.old_size, "shrink must not increase size");
                self.host_realloc(old, op.old_size, op.size, op.effective_align())
            }
            OpKind::Free => {
                let Some(old) = op.old_ptr else {
                    return NonNull::dangling();
                };
                shadow::retire(old.as_ptr() as usize, op.old_size);
                let layout = layout_for(op.old_size, op.effective_align());
                unsafe { dealloc(old.as_ptr(), layout) };
                old
            }
        }
    }
}

impl Gmem {
    fn host_alloc(&self, size: usize, align: usize, zeroed: bool) -> NonNull<u8> {
        let layout = layout_for(size, align);
        let raw = unsafe {
            if zeroed {
                alloc_zeroed(layout)
            } else {
                alloc(layout)
            }
        };
        let Some(ptr) = NonNull::new(raw) else {
            handle_alloc_error(layout);
        };
        shadow::record(ptr.as_ptr() as usize, size);
        ptr
    }

    fn host_realloc(
        &self,
        old: NonNull<u8>,
        old_size: usize,
        size: usize,
        align: usize,
    ) -> NonNull<u8> {
        shadow::retire(old.as_ptr() as usize, old_size);
        let old_layout = layout_for(old_size, align);
        let raw = unsafe { realloc(old.as_ptr(), old_layout, size) };
        let Some(ptr) = NonNull::new(raw) else {
            handle_alloc_error(layout_for(size, align));
        };
        shadow::record(ptr.as_ptr() as usize, size);
        ptr
    }
}

fn layout_for(size: usize, align: usize) -> Layout {
    match Layout::from_size_align(size, align) {
        Ok(layout) => layout,
        Err(_) => panic!("invalid layout: size={size} align={align}"),
    }
}

/// Shadow bookkeeping of live root allocations, debug builds only.
#[cfg(debug_assertions)]
mod shadow {
    use dashmap::DashMap;
    use once_cell::sync::Lazy;

    static LIVE: Lazy<DashMap<usize, usize>> = Lazy::new(DashMap::new);

    pub fn record(ptr: usize, size: usize) {
        LIVE.insert(ptr, size);
    }

    pub fn retire(ptr: usize, old_size: usize) {
        let (_, granted) = LIVE
            .remove(&ptr)
            .expect("pointer was not allocated by the root allocator (or double free)");
        assert_eq!(
            granted, old_size,
            "old_size {old_size} does not match the {granted} bytes last granted"
        );
    }
}

#[cfg(not(debug_assertions))]
mod shadow {
    #[inline(always)]
    pub fn record(_ptr: usize, _size: usize) {}

    #[inline(always)]
    pub fn retire(_ptr: usize, _old_size: usize) {}
}
