/// Cumulative counters for one transport (plain u64 - the transport is single-threaded)
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TransportMetrics {
    /// Spans in batches the sender accepted
    pub spans_sent: u64,
    /// Batches the sender accepted
    pub batches_sent: u64,
    /// Payload bytes (process + spans) in accepted batches
    pub bytes_sent: u64,
    /// Batches the sender reported as failed
    pub send_errors: u64,
    /// Spans lost in failed batches
    pub spans_failed: u64,
    /// Spans dropped for being too large for any datagram
    pub spans_dropped: u64,
    /// Spans dropped because they (or their process descriptor) failed to encode
    pub encode_errors: u64,
}

impl TransportMetrics {
    /// Record a batch the sender accepted
    pub fn record_success(&mut self, span_count: u64, bytes: u64) {
        self.spans_sent += span_count;
        self.batches_sent += 1;
        self.bytes_sent += bytes;
    }

    /// Record a batch the sender failed to send
    pub fn record_error(&mut self, span_count: u64) {
        self.send_errors += 1;
        self.spans_failed += span_count;
    }

    /// Record an oversized span
    pub fn record_dropped(&mut self) {
        self.spans_dropped += 1;
    }

    /// Record spans lost to an encoding failure
    pub fn record_encode_error(&mut self, span_count: u64) {
        self.encode_errors += span_count;
    }
}
