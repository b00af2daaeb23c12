//! Temporary memory - per-thread scratch scopes
//!
//! Scratch space comes from a thread-local ring of 8 arenas. Opening a
//! scope binds it to the next unpinned arena in rotation and bookmarks the
//! arena's position; dropping the scope pops the arena back to the
//! bookmark, releasing everything the scope allocated:
//!
//! ```ignore
//! fn print_stack_trace() {
//!     let tm = tmem::scope();
//!     let trace = build_stack_trace(&tm, 4, 1);
//!     println!("{trace}");
//! } // scratch released here
//! ```
//!
//! Arena fragmentation, ring rotation and pinning:
//!
//! Each scope is backed by an arena, which is a stack. If two scopes end up
//! backed by the same arena, the memory of one of them may not be poppable
//! because it is not entirely at the top of that stack; the arena then
//! carries some fragmentation until an enclosing scope pops below it.
//!
//! Arenas naturally defragment because they are stacks, but two mechanisms
//! keep fragmentation rare in the first place. Rotation: successive scopes
//! take successive ring slots, so overlapping scopes stay disjoint in most
//! call patterns. Pinning: a long-lived result arena handed down a call
//! chain can be pinned so nested scopes avoid its slot while any unpinned
//! slot remains:
//!
//! ```ignore
//! fn f(out: &Tmem) {
//!     let _p = out.pin(true);       // only out's slot pinned
//!     let tm = tmem::scope();       // never lands on out's slot
//!     let _q = tm.pin(false);       // now out's and tm's slots pinned
//! } // pins restored here
//! ```
//!
//! Pinning is advisory: with every slot pinned, scope selection proceeds by
//! rotation order anyway. Correctness never depends on finding an unpinned
//! slot.
//!
//! Initialize the system once per thread with [`setup`].

use core::cell::Cell;
use core::ptr::NonNull;

use crate::logging;

use super::{Arena, Mem, MemOp, OpKind, GMEM};

/// Width of the scratch ring. Bounds worst-case fragmentation from
/// concurrently open scopes without dynamic ring growth.
pub const RING_SLOTS: usize = 8;

/// Floor for each slot's arena block size.
const MIN_SLOT_BLOCK: usize = 4 * 1024;

/// Per-thread ring of scratch arenas.
///
/// Owns its 8 arenas exclusively; scopes borrow one slot each. Tests can
/// build independent rings directly instead of going through the
/// thread-local one.
pub struct TmemRing<'p> {
    /// Rotation cursor: the slot where the next scope scan starts.
    slot_idx: Cell<u8>,
    /// One pin bit per slot.
    pin_flags: Cell<u8>,
    /// Token of each slot's most recently opened, still-open scope
    /// (0 = none). Threaded as a linked stack through the guards
    /// (`Tmem::prev_top`). Tokens, not bookmarks: two scopes can open at
    /// the same arena position and must still be told apart on close.
    scope_tops: [Cell<u64>; RING_SLOTS],
    /// Next scope token, never reused within a ring.
    next_seq: Cell<u64>,
    slots: [Arena<'p>; RING_SLOTS],
}

impl<'p> TmemRing<'p> {
    /// Build a ring whose 8 arenas together reserve at least
    /// `min_total_size` bytes before chaining extra blocks.
    pub fn new(parent: &'p dyn Mem, min_total_size: usize) -> Self {
        let min_block = (min_total_size / RING_SLOTS).max(MIN_SLOT_BLOCK);
        Self {
            slot_idx: Cell::new(0),
            pin_flags: Cell::new(0),
            scope_tops: core::array::from_fn(|_| Cell::new(0)),
            next_seq: Cell::new(1),
            slots: core::array::from_fn(|_| Arena::new(parent, min_block)),
        }
    }

    /// Open a scratch scope.
    ///
    /// Scans the slots from the rotation cursor and binds the first one
    /// whose pin bit is clear, then advances the cursor past it. With every
    /// slot pinned the slot at the cursor is taken anyway.
    pub fn scope(&self) -> Tmem<'_, 'p> {
        let start = self.slot_idx.get() as usize;
        let pins = self.pin_flags.get();
        let mut chosen = start % RING_SLOTS;
        for i in 0..RING_SLOTS {
            let idx = (start + i) % RING_SLOTS;
            if pins & (1 << idx) == 0 {
                chosen = idx;
                break;
            }
        }
        self.slot_idx.set(((chosen + 1) % RING_SLOTS) as u8);

        let arena_pos = self.slots[chosen].total_count();
        let seq = self.next_seq.get();
        self.next_seq.set(seq + 1);
        let prev_top = self.scope_tops[chosen].replace(seq);
        logging::log_scope_open(chosen as u8, arena_pos);
        Tmem {
            ring: self,
            count: Cell::new(0),
            arena_pos,
            seq,
            slot_idx: chosen as u8,
            prev_top,
        }
    }

    /// Pin ring slots, returning a guard that restores the previous mask.
    ///
    /// `Some(handle)` with `exclusive == true` pins only the handle's slot;
    /// with `exclusive == false` it adds the slot to the current mask.
    /// `None` pins every slot.
    pub fn pin(&self, handle: Option<&Tmem<'_, 'p>>, exclusive: bool) -> PinGuard<'_, 'p> {
        let saved = self.pin_flags.get();
        let mask = match handle {
            Some(tm) => {
                let bit = 1u8 << tm.slot_idx;
                if exclusive {
                    bit
                } else {
                    saved | bit
                }
            }
            None => u8::MAX,
        };
        self.pin_flags.set(mask);
        logging::log_pin(mask);
        PinGuard { ring: self, saved }
    }

    /// The arena backing slot `idx`.
    #[inline]
    pub fn slot(&self, idx: usize) -> &Arena<'p> {
        &self.slots[idx]
    }

    /// Current pin mask, one bit per slot.
    #[inline]
    pub fn pin_flags(&self) -> u8 {
        self.pin_flags.get()
    }
}

/// A scratch scope: a lightweight handle bound to one ring slot.
///
/// Allocate through it like any other [`Mem`]; dropping it releases
/// everything allocated within the scope by popping the backing arena to
/// the position recorded at open.
pub struct Tmem<'r, 'p> {
    ring: &'r TmemRing<'p>,
    /// Bytes allocated through this handle, for diagnostics.
    count: Cell<usize>,
    /// The backing arena's `total_count` when this scope opened.
    arena_pos: usize,
    /// This scope's identity token from the ring's sequence.
    seq: u64,
    slot_idx: u8,
    /// The slot's previous scope token, restored on LIFO close.
    prev_top: u64,
}

impl<'r, 'p> Tmem<'r, 'p> {
    /// The ring slot this scope is bound to.
    #[inline]
    pub fn slot_idx(&self) -> u8 {
        self.slot_idx
    }

    /// Bytes allocated through this handle.
    #[inline]
    pub fn count(&self) -> usize {
        self.count.get()
    }

    /// The rewind bookmark recorded when this scope opened.
    #[inline]
    pub fn arena_pos(&self) -> usize {
        self.arena_pos
    }

    /// The arena backing this scope.
    #[inline]
    pub fn arena(&self) -> &'r Arena<'p> {
        &self.ring.slots[self.slot_idx as usize]
    }

    /// Pin this scope's slot. See [`TmemRing::pin`].
    #[inline]
    pub fn pin(&self, exclusive: bool) -> PinGuard<'r, 'p> {
        self.ring.pin(Some(self), exclusive)
    }
}

impl Mem for Tmem<'_, '_> {
    fn run(&self, op: MemOp) -> NonNull<u8> {
        let ptr = self.arena().run(op);
        let count = self.count.get();
        match op.kind {
            OpKind::Alloc => self.count.set(count + op.size),
            OpKind::Grow => {
                let old = if op.old_ptr.is_some() { op.old_size } else { 0 };
                self.count.set(count + op.size - old.min(op.size));
            }
            OpKind::Shrink => self.count.set(count.saturating_sub(op.old_size - op.size)),
            OpKind::Free => self.count.set(count.saturating_sub(op.old_size)),
        }
        ptr
    }
}

impl Drop for Tmem<'_, '_> {
    fn drop(&mut self) {
        let arena = self.arena();
        assert!(
            arena.total_count() >= self.arena_pos,
            "scratch scope closed after its arena was popped past its bookmark"
        );
        let top = &self.ring.scope_tops[self.slot_idx as usize];
        if top.get() == self.seq {
            arena.pop_to(self.arena_pos);
            top.set(self.prev_top);
            logging::log_scope_close(self.slot_idx, self.arena_pos, true);
        } else {
            // A later-opened scope on this arena is still open: skip the pop
            // and leave the reclamation to the enclosing scope. The arena
            // carries the gap as fragmentation until then.
            logging::log_scope_close(self.slot_idx, self.arena_pos, false);
        }
    }
}

/// Restores the ring's previous pin mask on drop.
pub struct PinGuard<'r, 'p> {
    ring: &'r TmemRing<'p>,
    saved: u8,
}

impl Drop for PinGuard<'_, '_> {
    fn drop(&mut self) {
        self.ring.pin_flags.set(self.saved);
        logging::log_pin(self.saved);
    }
}

thread_local! {
    static RING: Cell<Option<&'static TmemRing<'static>>> = const { Cell::new(None) };
}

/// One-time per-thread initialization of the scratch ring.
///
/// Must be called on a thread before its first [`scope`]. Calling it twice
/// on one thread is a fatal usage error. The ring lives for the rest of the
/// thread's lifetime.
pub fn setup(min_total_size: usize) {
    RING.with(|cell| {
        assert!(
            cell.get().is_none(),
            "tmem::setup called twice on this thread"
        );
        cell.set(Some(Box::leak(Box::new(TmemRing::new(&GMEM, min_total_size)))));
    });
    logging::log_tmem_setup(min_total_size);
}

/// This thread's scratch ring. Fatal if [`setup`] has not run here.
pub fn ring() -> &'static TmemRing<'static> {
    RING.with(|cell| cell.get())
        .expect("tmem::setup was not called on this thread")
}

/// Open a scratch scope on this thread's ring.
#[inline]
pub fn scope() -> Tmem<'static, 'static> {
    ring().scope()
}
