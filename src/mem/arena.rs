//! Arena - chained-block bump allocator
//!
//! Design: a block of memory treated as a stack. Allocation bumps a cursor;
//! when the current block runs out a new one is obtained from the parent
//! allocator and linked to the previous one. There is no per-object free:
//! reclamation is bulk, either by popping back to a bookmarked position or
//! by destroying the whole chain.
//!
//! Pointer stability: an address stays valid until the arena is popped past
//! it. The only allocation an arena ever relocates is the one currently
//! being grown, and only when it cannot extend in place.

use core::cell::Cell;
use core::ptr::NonNull;

use crate::logging;

use super::{align_up, Mem, MemOp, OpKind, MAX_ALIGN};

/// Embedded at the start of every block; its size is part of the block's
/// capacity and of the arena's counts.
#[repr(C)]
struct BlockHeader {
    prev: Option<NonNull<BlockHeader>>,
    capacity: usize,
}

const BLOCK_HEADER: usize = core::mem::size_of::<BlockHeader>();

/// Chained-block bump allocator.
///
/// Interior mutability via `Cell` lets scratch handles and clients share an
/// arena within one thread; the same cells make the type `!Sync`, so the
/// single-thread contract is enforced by construction rather than by locks.
pub struct Arena<'p> {
    parent: &'p dyn Mem,
    /// Current block from which we allocate, newest first.
    block: Cell<Option<NonNull<BlockHeader>>>,
    /// Bytes used in the current block, header included.
    block_count: Cell<usize>,
    /// `block_count` plus the full capacities of all previous blocks.
    total_count: Cell<usize>,
    min_block_size: usize,
}

/// Point-in-time arena counters.
#[derive(Debug, Clone, Copy)]
pub struct ArenaStats {
    pub total_count: usize,
    pub block_count: usize,
    pub blocks: usize,
}

impl<'p> Arena<'p> {
    /// Create an empty arena. No block is acquired until the first
    /// allocation.
    pub fn new(parent: &'p dyn Mem, min_block_size: usize) -> Self {
        assert!(
            min_block_size > BLOCK_HEADER,
            "min_block_size must exceed the block header"
        );
        Self {
            parent,
            block: Cell::new(None),
            block_count: Cell::new(0),
            total_count: Cell::new(0),
            min_block_size,
        }
    }

    /// Create an arena with a first block of at least `capacity` payload
    /// bytes already in place.
    pub fn with_capacity(parent: &'p dyn Mem, min_block_size: usize, capacity: usize) -> Self {
        let arena = Self::new(parent, min_block_size);
        let block_size = (BLOCK_HEADER + capacity).max(min_block_size);
        arena.push_block(block_size);
        arena
    }

    /// Cumulative bytes used across the whole chain. Values read here are
    /// the only valid bookmarks for [`Arena::pop_to`].
    #[inline]
    pub fn total_count(&self) -> usize {
        self.total_count.get()
    }

    /// Bytes used in the current block, header included.
    #[inline]
    pub fn block_count(&self) -> usize {
        self.block_count.get()
    }

    #[inline]
    pub fn min_block_size(&self) -> usize {
        self.min_block_size
    }

    /// Number of blocks in the chain.
    pub fn num_blocks(&self) -> usize {
        let mut n = 0;
        let mut cur = self.block.get();
        while let Some(b) = cur {
            n += 1;
            cur = unsafe { (*b.as_ptr()).prev };
        }
        n
    }

    pub fn stats(&self) -> ArenaStats {
        ArenaStats {
            total_count: self.total_count.get(),
            block_count: self.block_count.get(),
            blocks: self.num_blocks(),
        }
    }

    /// Rewind to a `total_count` value previously read from this arena,
    /// releasing blocks that become entirely unused back to the parent.
    ///
    /// Popping past the current position is a fatal usage error: it means
    /// the bookmark is stale (the arena was already popped below it) or was
    /// synthesized.
    pub fn pop_to(&self, new_total: usize) {
        assert!(
            new_total <= self.total_count.get(),
            "arena pop past current position: bookmark {} > total {}",
            new_total,
            self.total_count.get()
        );
        while let Some(b) = self.block.get() {
            // Bytes accounted to blocks below the current one.
            let below = self.total_count.get() - self.block_count.get();
            if new_total > below {
                // Target lies inside the current block: truncate the cursor.
                self.block_count.set(new_total - below);
                self.total_count.set(new_total);
                debug_assert!(self.block_count.get() >= BLOCK_HEADER);
                return;
            }
            // Current block is entirely above the target: release it.
            let header = unsafe { b.as_ptr().read() };
            self.parent.free(b.cast::<u8>(), header.capacity, 0);
            logging::log_block_release(header.capacity, below);
            self.block.set(header.prev);
            self.total_count.set(below);
            self.block_count.set(match header.prev {
                // A superseded block counts as fully used.
                Some(prev) => unsafe { (*prev.as_ptr()).capacity },
                None => 0,
            });
        }
        debug_assert_eq!(self.total_count.get(), new_total);
    }

    /// Release everything; equivalent to `pop_to(0)`.
    #[inline]
    pub fn pop_all(&self) {
        self.pop_to(0);
    }

    fn alloc_op(&self, op: MemOp) -> NonNull<u8> {
        let size = op.size;
        let align = op.effective_align();

        if let Some(b) = self.block.get() {
            let base = b.as_ptr() as usize;
            let capacity = unsafe { (*b.as_ptr()).capacity };
            let aligned = align_up(base + self.block_count.get(), align);
            let end = aligned.checked_add(size).expect("allocation size overflow");
            if end <= base + capacity {
                self.bump_to(end - base);
                return self.finish(aligned, size, op.zeroed);
            }
        }

        // Out of room (or no block yet): append a fresh block sized for the
        // request. Over-aligned requests reserve worst-case padding since the
        // parent only guarantees MAX_ALIGN.
        let extra = if align > MAX_ALIGN { align } else { 0 };
        let block_size = BLOCK_HEADER
            .checked_add(size)
            .and_then(|n| n.checked_add(extra))
            .expect("allocation size overflow")
            .max(self.min_block_size);
        let b = self.push_block(block_size);

        let base = b.as_ptr() as usize;
        let aligned = align_up(base + BLOCK_HEADER, align);
        self.bump_to(aligned + size - base);
        self.finish(aligned, size, op.zeroed)
    }

    fn grow_op(&self, op: MemOp) -> NonNull<u8> {
        let Some(old) = op.old_ptr else {
            // Grow on a null pointer behaves like alloc.
            return self.alloc_op(MemOp::alloc(op.size, op.align, op.zeroed));
        };
        let size = op.size;
        let align = op.effective_align();
        debug_assert!(size >= op.old_size, "grow must not decrease size");

        if self.is_top(old, op.old_size) {
            let Some(b) = self.block.get() else {
                unreachable!()
            };
            let base = b.as_ptr() as usize;
            let capacity = unsafe { (*b.as_ptr()).capacity };
            let end = (old.as_ptr() as usize)
                .checked_add(size)
                .expect("allocation size overflow");
            if end <= base + capacity {
                // The common case: the most recent allocation sits at the
                // top of the current block, so it extends in place.
                self.bump_to(end - base);
                if op.zeroed {
                    unsafe {
                        old.as_ptr()
                            .add(op.old_size)
                            .write_bytes(0, size - op.old_size);
                    }
                }
                return old;
            }
        }

        // Relocate: the old region stays wasted until its block is freed.
        logging::log_grow_relocation(op.old_size, size);
        let new = self.alloc_op(MemOp::alloc(size, align, false));
        unsafe {
            new.as_ptr()
                .copy_from_nonoverlapping(old.as_ptr(), op.old_size);
            if op.zeroed {
                new.as_ptr().add(op.old_size).write_bytes(0, size - op.old_size);
            }
        }
        new
    }

    fn shrink_op(&self, op: MemOp) -> NonNull<u8> {
        let old = op.old_ptr.expect("shrink of null pointer");
        debug_assert!(op.size <= op.old_size, "shrink must not increase size");

        if self.is_top(old, op.old_size) {
            // Truncate the cursor; the freed tail feeds the next allocation.
            let Some(b) = self.block.get() else {
                unreachable!()
            };
            self.bump_to(old.as_ptr() as usize + op.size - b.as_ptr() as usize);
        }
        // Not at the top: the logical size shrinks, the bytes stay put.
        old
    }

    /// Is `[old, old + old_size)` the most recent allocation, sitting at the
    /// very top of the current block?
    fn is_top(&self, old: NonNull<u8>, old_size: usize) -> bool {
        let Some(b) = self.block.get() else {
            return false;
        };
        let base = b.as_ptr() as usize;
        let addr = old.as_ptr() as usize;
        addr >= base + BLOCK_HEADER && addr + old_size == base + self.block_count.get()
    }

    /// Set the current block's cursor, keeping `total_count` in sync.
    fn bump_to(&self, new_block_count: usize) {
        let old = self.block_count.get();
        self.block_count.set(new_block_count);
        if new_block_count >= old {
            self.total_count
                .set(self.total_count.get() + (new_block_count - old));
        } else {
            self.total_count
                .set(self.total_count.get() - (old - new_block_count));
        }
    }

    fn finish(&self, addr: usize, size: usize, zeroed: bool) -> NonNull<u8> {
        // Addresses inside a live block are never null.
        let ptr = unsafe { NonNull::new_unchecked(addr as *mut u8) };
        if zeroed {
            unsafe { ptr.as_ptr().write_bytes(0, size) };
        }
        ptr
    }

    /// Acquire a block of `capacity` bytes (header included) from the parent
    /// and make it current.
    fn push_block(&self, capacity: usize) -> NonNull<BlockHeader> {
        let raw = self.parent.alloc(capacity, 0).cast::<BlockHeader>();
        unsafe {
            raw.as_ptr().write(BlockHeader {
                prev: self.block.get(),
                capacity,
            });
        }
        if let Some(old) = self.block.get() {
            // The superseded block's unused tail becomes permanently used.
            let old_capacity = unsafe { (*old.as_ptr()).capacity };
            let below = self.total_count.get() - self.block_count.get();
            self.total_count.set(below + old_capacity);
        }
        self.block.set(Some(raw));
        self.block_count.set(BLOCK_HEADER);
        self.total_count.set(self.total_count.get() + BLOCK_HEADER);
        logging::log_block_push(capacity, self.total_count.get());
        raw
    }
}

impl Mem for Arena<'_> {
    fn run(&self, op: MemOp) -> NonNull<u8> {
        op.validate();
        match op.kind {
            OpKind::Alloc => self.alloc_op(op),
            OpKind::Grow => self.grow_op(op),
            OpKind::Shrink => self.shrink_op(op),
            // Arenas reclaim in bulk only; per-object free is a no-op.
            OpKind::Free => op.old_ptr.unwrap_or(NonNull::dangling()),
        }
    }
}

impl Drop for Arena<'_> {
    fn drop(&mut self) {
        self.pop_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::GMEM;

    #[test]
    fn header_is_sixteen_bytes() {
        assert_eq!(BLOCK_HEADER, 16);
    }

    #[test]
    fn empty_arena_has_no_blocks() {
        let arena = Arena::new(&GMEM, 4096);
        assert_eq!(arena.total_count(), 0);
        assert_eq!(arena.num_blocks(), 0);
    }

    #[test]
    fn presized_arena_has_one_block() {
        let arena = Arena::with_capacity(&GMEM, 4096, 16 * 1024);
        assert_eq!(arena.num_blocks(), 1);
        assert_eq!(arena.total_count(), BLOCK_HEADER);
    }
}
