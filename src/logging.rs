//! Logging utilities for the memory layer
//!
//! Lightweight structured logging for allocator operations. Uses `tracing`
//! so hot-path events compile down to a branch on the subscriber filter.
//! Block traffic and scope churn log at TRACE, lifecycle events at DEBUG.

// Re-export tracing macros for use throughout the crate
pub use tracing::{debug, error, info, trace, warn, Level};

/// Initialize logging with sensible defaults
///
/// Call once, early. Honors `RUST_LOG`; without it, debug builds log at
/// DEBUG and release builds at INFO.
pub fn init() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        #[cfg(debug_assertions)]
        {
            EnvFilter::new("scratchmem=debug")
        }
        #[cfg(not(debug_assertions))]
        {
            EnvFilter::new("scratchmem=info")
        }
    });

    fmt()
        .with_env_filter(filter)
        .compact()
        .try_init()
        .ok(); // Ignore error if already initialized
}

/// Log a block acquired from a parent allocator
#[inline]
pub fn log_block_push(capacity: usize, total_count: usize) {
    trace!(
        target: "arena",
        capacity,
        total_count,
        "block pushed"
    );
}

/// Log a block released back to a parent allocator
#[inline]
pub fn log_block_release(capacity: usize, total_count: usize) {
    trace!(
        target: "arena",
        capacity,
        total_count,
        "block released"
    );
}

/// Log a relocating grow (the slow path that wastes the old region)
#[inline]
pub fn log_grow_relocation(old_size: usize, size: usize) {
    trace!(
        target: "arena",
        old_size,
        size,
        "grow relocated allocation"
    );
}

/// Log a scratch scope opening
#[inline]
pub fn log_scope_open(slot_idx: u8, arena_pos: usize) {
    trace!(
        target: "tmem",
        slot_idx,
        arena_pos,
        "scratch scope opened"
    );
}

/// Log a scratch scope closing
#[inline]
pub fn log_scope_close(slot_idx: u8, arena_pos: usize, popped: bool) {
    trace!(
        target: "tmem",
        slot_idx,
        arena_pos,
        popped,
        "scratch scope closed"
    );
}

/// Log a pin mask change
#[inline]
pub fn log_pin(pin_flags: u8) {
    trace!(
        target: "tmem",
        pin_flags,
        "pin mask updated"
    );
}

/// Log per-thread scratch ring setup
#[inline]
pub fn log_tmem_setup(min_total_size: usize) {
    debug!(
        target: "tmem",
        min_total_size,
        "scratch ring initialized for thread"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logging_functions() {
        // These should not panic
        log_block_push(4096, 4096);
        log_block_release(4096, 0);
        log_grow_relocation(64, 128);
        log_scope_open(0, 0);
        log_scope_close(0, 0, true);
        log_pin(0b0000_0001);
        log_tmem_setup(1 << 20);
    }
}
