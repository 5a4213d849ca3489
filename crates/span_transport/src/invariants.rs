//! Debug assertion macros for batching invariants.
//!
//! Only active in debug builds (`debug_assert!`), so release builds pay nothing.

// =============================================================================
// Running size bookkeeping
// =============================================================================

/// Assert that the running size equals the process baseline plus every pending span.
///
/// **Invariant**: `baseline + sum(len(span) for span in pending) == running`
///
/// Used in: `BatchAccumulator` after every mutation
macro_rules! debug_assert_running_size {
    ($running:expr, $baseline:expr, $spans:expr) => {
        debug_assert_eq!(
            $running,
            $baseline + $spans.iter().map(|s| s.len()).sum::<usize>(),
            "running size drifted from baseline {} plus {} pending spans",
            $baseline,
            $spans.len()
        )
    };
}

// =============================================================================
// Datagram budget
// =============================================================================

/// Assert that a batch about to be handed out fits the per-datagram budget.
///
/// **Invariant**: `baseline + sum(len(span) for span in batch) <= max_batch_bytes`
///
/// Used in: `BatchAccumulator::try_add()` and `BatchAccumulator::take_pending()`
macro_rules! debug_assert_within_budget {
    ($size:expr, $budget:expr) => {
        debug_assert!(
            $size <= $budget,
            "batch of {} bytes exceeds budget of {} bytes",
            $size,
            $budget
        )
    };
}

/// Assert that no batch is ever handed out empty.
///
/// Used in: `BatchAccumulator::try_add()` when flushing before an overflowing span
macro_rules! debug_assert_non_empty_flush {
    ($spans:expr) => {
        debug_assert!(!$spans.is_empty(), "flushing an empty batch")
    };
}

pub(crate) use debug_assert_non_empty_flush;
pub(crate) use debug_assert_running_size;
pub(crate) use debug_assert_within_budget;
