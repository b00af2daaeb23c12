//! Uniform allocator interface
//!
//! Design: every allocator in the crate (root, arena, scratch scope) is
//! driven through a single operation descriptor dispatched via one indirect
//! call. Clients hold a borrowed `&dyn Mem` and never inspect allocator
//! internals, so containers and other consumers stay allocator-agnostic.
//!
//! Contract:
//! - Failure is fatal. There is no recoverable-error channel; callers that
//!   need resilience must check their preconditions up front.
//! - Allocating 0 bytes is an error.
//! - Grow with no old pointer behaves like alloc.
//! - An alignment of 0 is interpreted as [`MAX_ALIGN`].
//! - `old_size` and the alignment are never recomputed: the caller must
//!   resupply the exact values it last requested. The allocator stays
//!   stateless about the blocks it hands out, so this cannot be checked in
//!   release builds (debug builds shadow-check the size, see `gmem`).
//!   [`MemBuf`] carries both for you and removes this failure class by
//!   construction.

mod arena;
mod gmem;
pub mod tmem;


pub use arena::{Arena, ArenaStats};
pub use gmem::{Gmem, GMEM};

use core::ptr::NonNull;

/// Maximum natural alignment of the platform (`max_align_t`).
///
/// Requests with `align == 0` use this. 16 on every supported target.
pub const MAX_ALIGN: usize = 16;

/// Allocator operation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Free,
    Grow,
    Alloc,
    Shrink,
}

/// Operation descriptor, constructed per call and never stored.
#[derive(Debug, Clone, Copy)]
pub struct MemOp {
    pub kind: OpKind,
    pub zeroed: bool,
    pub size: usize,
    pub align: usize,
    pub old_ptr: Option<NonNull<u8>>,
    pub old_size: usize,
}

impl MemOp {
    /// Alloc descriptor.
    #[inline]
    pub fn alloc(size: usize, align: usize, zeroed: bool) -> Self {
        Self {
            kind: OpKind::Alloc,
            zeroed,
            size,
            align,
            old_ptr: None,
            old_size: 0,
        }
    }

    /// Grow descriptor. `old_ptr == None` degrades to alloc.
    #[inline]
    pub fn grow(
        old_ptr: Option<NonNull<u8>>,
        old_size: usize,
        size: usize,
        align: usize,
        zeroed: bool,
    ) -> Self {
        Self {
            kind: OpKind::Grow,
            zeroed,
            size,
            align,
            old_ptr,
            old_size,
        }
    }

    /// Shrink descriptor.
    #[inline]
    pub fn shrink(old_ptr: NonNull<u8>, old_size: usize, size: usize, align: usize) -> Self {
        Self {
            kind: OpKind::Shrink,
            zeroed: false,
            size,
            align,
            old_ptr: Some(old_ptr),
            old_size,
        }
    }

    /// Free descriptor. `align` must match the allocating request.
    #[inline]
    pub fn free(old_ptr: NonNull<u8>, old_size: usize, align: usize) -> Self {
        Self {
            kind: OpKind::Free,
            zeroed: false,
            size: 0,
            align,
            old_ptr: Some(old_ptr),
            old_size,
        }
    }

    /// The alignment this op actually requests, with 0 meaning [`MAX_ALIGN`].
    #[inline]
    pub(crate) fn effective_align(&self) -> usize {
        let align = if self.align == 0 { MAX_ALIGN } else { self.align };
        assert!(align.is_power_of_two(), "alignment must be a power of two");
        align
    }

    /// Fatal precondition checks shared by all allocators.
    #[inline]
    pub(crate) fn validate(&self) {
        match self.kind {
            OpKind::Alloc | OpKind::Grow | OpKind::Shrink => {
                assert!(self.size > 0, "zero-size {:?} request", self.kind);
            }
            OpKind::Free => {}
        }
    }
}

/// The allocator interface.
///
/// One required entry point; dispatch through `&dyn Mem` is a single
/// indirect call with no allocation for the abstraction itself. The
/// provided methods build descriptors so trait-object users get the full
/// surface.
///
/// Addresses returned by the *same* allocator may be invalidated by later
/// calls if its growth strategy is non-stable; [`Arena`] documents exactly
/// when stability holds.
pub trait Mem {
    /// Execute one operation. Diverges (panics/aborts) on any failure.
    ///
    /// For `Free` the returned pointer is meaningless (the old pointer is
    /// echoed back for uniformity).
    fn run(&self, op: MemOp) -> NonNull<u8>;

    /// Allocate `size` bytes aligned to `align` (0 = [`MAX_ALIGN`]).
    #[inline]
    fn alloc(&self, size: usize, align: usize) -> NonNull<u8> {
        self.run(MemOp::alloc(size, align, false))
    }

    /// Allocate zero-filled.
    #[inline]
    fn alloc_zeroed(&self, size: usize, align: usize) -> NonNull<u8> {
        self.run(MemOp::alloc(size, align, true))
    }

    /// Grow `old_ptr` from `old_size` to `size` bytes. The first `old_size`
    /// bytes are preserved; the pointer may change.
    #[inline]
    fn grow(&self, old_ptr: NonNull<u8>, old_size: usize, size: usize, align: usize) -> NonNull<u8> {
        self.run(MemOp::grow(Some(old_ptr), old_size, size, align, false))
    }

    /// Shrink `old_ptr` from `old_size` to `size` bytes.
    #[inline]
    fn shrink(&self, old_ptr: NonNull<u8>, old_size: usize, size: usize, align: usize) -> NonNull<u8> {
        self.run(MemOp::shrink(old_ptr, old_size, size, align))
    }

    /// Release `old_ptr`. `old_size` and `align` must be the exact values
    /// last granted/requested for it (0 = [`MAX_ALIGN`]).
    #[inline]
    fn free(&self, old_ptr: NonNull<u8>, old_size: usize, align: usize) {
        self.run(MemOp::free(old_ptr, old_size, align));
    }
}

/// Align `x` upward to the next multiple of `align` (power of two).
#[inline(always)]
pub(crate) const fn align_up(x: usize, align: usize) -> usize {
    (x.wrapping_add(align).wrapping_sub(1)) & !align.wrapping_sub(1)
}

/// An owned buffer capability.
///
/// Wraps an allocation together with the size and alignment it was granted,
/// so grow/shrink/free always resubmit the exact `old_size`, the one
/// contract the raw interface cannot check for you.
///
/// The buffer does not borrow its allocator; each operation takes it again.
/// The caller must use the same allocator throughout and must not let the
/// buffer outlive it (for arenas: not past a pop below its position).
#[derive(Debug)]
pub struct MemBuf {
    ptr: NonNull<u8>,
    size: usize,
    align: usize,
}

impl MemBuf {
    /// Allocate a new buffer from `mem`.
    pub fn alloc_in(mem: &dyn Mem, size: usize, align: usize, zeroed: bool) -> Self {
        let ptr = mem.run(MemOp::alloc(size, align, zeroed));
        Self { ptr, size, align }
    }

    /// Grow in `mem` to `size` bytes, preserving contents.
    pub fn grow_in(&mut self, mem: &dyn Mem, size: usize, zeroed: bool) {
        self.ptr = mem.run(MemOp::grow(Some(self.ptr), self.size, size, self.align, zeroed));
        self.size = size;
    }

    /// Shrink in `mem` to `size` bytes.
    pub fn shrink_in(&mut self, mem: &dyn Mem, size: usize) {
        self.ptr = mem.run(MemOp::shrink(self.ptr, self.size, size, self.align));
        self.size = size;
    }

    /// Release the buffer back to `mem`, resupplying the recorded size and
    /// alignment.
    pub fn free_in(self, mem: &dyn Mem) {
        mem.run(MemOp::free(self.ptr, self.size, self.align));
    }

    #[inline]
    pub fn as_ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    #[inline]
    pub fn align(&self) -> usize {
        self.align
    }

    /// View the buffer as bytes.
    ///
    /// # Safety
    ///
    /// The allocation must still be live: same allocator, not freed, and for
    /// arena-backed buffers not popped past.
    #[inline]
    pub unsafe fn as_slice(&self) -> &[u8] {
        core::slice::from_raw_parts(self.ptr.as_ptr(), self.size)
    }

    /// Mutable view of the buffer.
    ///
    /// # Safety
    ///
    /// Same as [`MemBuf::as_slice`].
    #[inline]
    pub unsafe fn as_mut_slice(&mut self) -> &mut [u8] {
        core::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.size)
    }
}

#[cfg(test)]
mod align_tests {
    use super::*;

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 8), 0);
        assert_eq!(align_up(1, 8), 8);
        assert_eq!(align_up(8, 8), 8);
        assert_eq!(align_up(9, 8), 16);
    }

    #[test]
    fn test_align_up_preserves_aligned_values() {
        for align in [1usize, 2, 4, 16, 64] {
            assert_eq!(align_up(align * 3, align), align * 3);
        }
    }
}
