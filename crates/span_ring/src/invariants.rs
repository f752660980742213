//! Debug assertion macros for ring buffer and trace tree invariants.
//!
//! Only active in debug builds (`#[cfg(debug_assertions)]`), so there is
//! zero overhead in release builds.

// =============================================================================
// Window: Bounded Length
// =============================================================================

/// Assert that the window never holds more spans than its capacity.
///
/// **Invariant**: `0 ≤ len ≤ capacity`
///
/// Used in: `SpanRingBuffer::insert()` after updating `len`
macro_rules! debug_assert_window_bounded {
    ($len:expr, $capacity:expr) => {
        debug_assert!(
            $len <= $capacity,
            "window length {} exceeds capacity {}",
            $len,
            $capacity
        )
    };
}

/// Assert that the write cursor stays inside the slot array.
///
/// **Invariant**: `cursor < capacity`
///
/// Used in: `SpanRingBuffer::insert()` after advancing the cursor
macro_rules! debug_assert_cursor_in_range {
    ($cursor:expr, $capacity:expr) => {
        debug_assert!(
            $cursor < $capacity,
            "write cursor {} outside capacity {}",
            $cursor,
            $capacity
        )
    };
}

// =============================================================================
// Snapshot: Conservation
// =============================================================================

/// Assert that a flush drained exactly the spans the window reported.
///
/// **Invariant**: every occupied slot lands in the snapshot, no empty slot does
///
/// Used in: `SpanRingBuffer::flush()` after ordering the snapshot
macro_rules! debug_assert_snapshot_complete {
    ($taken:expr, $len:expr) => {
        debug_assert!(
            $taken == $len,
            "flush drained {} spans but window held {}",
            $taken,
            $len
        )
    };
}

// =============================================================================
// Tree: Worklist Progress
// =============================================================================

/// Assert that a resolution pass never grows the unresolved set.
///
/// **Invariant**: `remaining_after ≤ remaining_before`
///
/// Used in: `TraceTreeBuilder::resolve()` after each pass
macro_rules! debug_assert_worklist_shrinks {
    ($before:expr, $after:expr) => {
        debug_assert!(
            $after <= $before,
            "resolution pass grew the worklist from {} to {}",
            $before,
            $after
        )
    };
}

pub(crate) use debug_assert_cursor_in_range;
pub(crate) use debug_assert_snapshot_complete;
pub(crate) use debug_assert_window_bounded;
pub(crate) use debug_assert_worklist_shrinks;
