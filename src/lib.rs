//! Scratchmem - foundational memory layer for systems runtimes
//!
//! This crate provides the core allocation machinery statically linked into
//! runtime-heavy programs:
//!
//! 1. A uniform, operation-based allocator interface ([`Mem`])
//! 2. A chained-block bump arena ([`Arena`]) with O(1) bulk reclamation
//! 3. Per-thread scratch scopes ([`tmem`]) backed by a ring of 8 arenas,
//!    with pinning to keep long-lived result arenas out of scratch rotation
//!
//! Everything here is thread-local by construction: arenas, scratch scopes
//! and pin guards are `!Sync`, so cross-thread misuse is a compile error
//! rather than a runtime lock.

pub mod logging;
pub mod mem;

// Re-export core types
pub use mem::{Arena, ArenaStats, Gmem, Mem, MemBuf, MemOp, OpKind, GMEM, MAX_ALIGN};
pub use mem::tmem::{self, PinGuard, Tmem, TmemRing, RING_SLOTS};

/// Crate initialization.
///
/// Installs the logging subscriber. The root allocator needs no setup and
/// the scratch ring is per thread (see [`tmem::setup`]), so this is the
/// only process-wide entry point.
pub fn init() {
    logging::init();
}
