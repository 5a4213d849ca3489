//! Batch Accumulator - Size-Bounded Greedy Packing
//!
//! Collects encoded spans into batches that fit one datagram. The running
//! size starts at the encoded process descriptor (every batch carries it) and
//! grows with each span added:
//!
//! ```text
//! running = len(process) + sum(len(span) for span in pending) <= max_batch_bytes
//! ```
//!
//! Spans are packed greedily: a span that would overflow the current batch
//! closes it, and a fresh batch starts with that span. A span that could not
//! fit even in an otherwise empty batch is rejected.
//!
//! The accumulator never touches the sender. Closed batches are handed back
//! to the caller, which sends them.

use crate::config::MaxBatchBytes;
use crate::invariants::{
    debug_assert_non_empty_flush, debug_assert_running_size, debug_assert_within_budget,
};
use crate::probe::Encoded;

/// A closed batch: the process descriptor plus the spans that fit with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedBatch {
    pub process: Encoded,
    pub spans: Vec<Encoded>,
}

impl EncodedBatch {
    /// Number of spans in the batch
    pub fn len(&self) -> usize {
        self.spans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    /// Process descriptor plus span bytes, excluding datagram framing
    pub fn payload_size(&self) -> usize {
        self.process.len() + self.spans.iter().map(Encoded::len).sum::<usize>()
    }
}

/// Outcome of [`BatchAccumulator::try_add`].
#[derive(Debug, PartialEq, Eq)]
pub enum Decision {
    /// The span joined the current batch.
    Added,
    /// The span did not fit. The returned batch holds everything pending before
    /// it and must be sent by the caller; the span now starts the next batch.
    AddedAfterFlush(EncodedBatch),
    /// The span cannot fit in any batch and was dropped.
    Rejected {
        /// Encoded size of the span
        size: usize,
        /// Space left for spans in an otherwise empty batch
        available: usize,
    },
}

/// Accumulates encoded spans for one append cycle.
#[derive(Debug)]
pub struct BatchAccumulator {
    /// Pending spans, in arrival order
    spans: Vec<Encoded>,
    /// Process size plus pending span sizes
    running: usize,
    /// Process descriptor for the current cycle
    process: Option<Encoded>,
    /// Per-datagram budget
    budget: MaxBatchBytes,
}

impl BatchAccumulator {
    /// Creates an accumulator with no cycle in progress
    pub fn new(budget: MaxBatchBytes) -> Self {
        Self {
            spans: Vec::new(),
            running: 0,
            process: None,
            budget,
        }
    }

    /// Starts a cycle, building the process descriptor if none is set.
    ///
    /// Idempotent within a cycle: `build` only runs when no descriptor is
    /// present. Returns `Ok(true)` if the descriptor was built by this call.
    /// If `build` fails the accumulator stays outside a cycle.
    pub fn begin_cycle<E>(
        &mut self,
        build: impl FnOnce() -> Result<Encoded, E>,
    ) -> Result<bool, E> {
        if self.process.is_some() {
            return Ok(false);
        }
        let process = build()?;
        self.running = process.len() + self.spans.iter().map(Encoded::len).sum::<usize>();
        self.process = Some(process);
        debug_assert_running_size!(self.running, self.baseline(), self.spans);
        Ok(true)
    }

    /// Offers one encoded span to the current batch.
    pub fn try_add(&mut self, span: Encoded) -> Decision {
        let budget = self.budget.get();
        let baseline = self.baseline();
        let size = span.len();

        // Even alone with the process descriptor it would not fit
        if baseline + size > budget {
            return Decision::Rejected {
                size,
                available: budget.saturating_sub(baseline),
            };
        }

        if self.running + size > budget {
            debug_assert_non_empty_flush!(self.spans);
            let flushed = self.close_batch();
            self.push(span);
            return Decision::AddedAfterFlush(flushed);
        }

        self.push(span);
        Decision::Added
    }

    /// Takes the pending spans as a batch, resetting to the baseline.
    ///
    /// Returns `None` if nothing is pending.
    pub fn take_pending(&mut self) -> Option<EncodedBatch> {
        if self.spans.is_empty() {
            return None;
        }
        Some(self.close_batch())
    }

    /// Ends the cycle, returning the final batch if spans are still pending.
    ///
    /// The process descriptor is cleared regardless, so the next cycle
    /// builds a fresh one.
    pub fn end_cycle(&mut self) -> Option<EncodedBatch> {
        let last = self.take_pending();
        self.process = None;
        self.running = 0;
        last
    }

    /// Resets the running size to the process baseline, dropping pending spans.
    pub fn reset(&mut self) {
        self.spans.clear();
        self.running = self.baseline();
    }

    /// Encoded size of the current process descriptor (0 outside a cycle).
    #[inline]
    pub fn baseline(&self) -> usize {
        self.process.as_ref().map_or(0, Encoded::len)
    }

    /// Process size plus pending span sizes
    #[inline]
    pub fn running_size(&self) -> usize {
        self.running
    }

    /// Number of pending spans
    #[inline]
    pub fn pending(&self) -> usize {
        self.spans.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    /// Whether a cycle is in progress (a process descriptor is set)
    #[inline]
    pub fn in_cycle(&self) -> bool {
        self.process.is_some()
    }

    #[inline]
    pub fn budget(&self) -> MaxBatchBytes {
        self.budget
    }

    fn push(&mut self, span: Encoded) {
        self.running += span.len();
        self.spans.push(span);
        debug_assert_within_budget!(self.running, self.budget.get());
        debug_assert_running_size!(self.running, self.baseline(), self.spans);
    }

    fn close_batch(&mut self) -> EncodedBatch {
        debug_assert_within_budget!(self.running, self.budget.get());
        let batch = EncodedBatch {
            process: self.process.clone().unwrap_or_default(),
            spans: std::mem::take(&mut self.spans),
        };
        self.reset();
        debug_assert_running_size!(self.running, self.baseline(), self.spans);
        batch
    }
}
