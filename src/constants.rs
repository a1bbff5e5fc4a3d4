//! Compile-time ceilings for the worker fleet.

/// Maximum number of workers in the pool. The slave bookkeeping packs
/// worker indices into a single 64-bit mask, so this cannot grow past 64
/// without widening the mask.
pub const MAX_WORKERS: usize = 64;

/// Maximum number of split points a single worker can have open as master
/// at the same time.
pub const MAX_SPLITPOINTS_PER_THREAD: usize = 8;
