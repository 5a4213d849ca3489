//! Transport - Append/Flush Orchestration
//!
//! Ties the pieces together for one append cycle:
//!
//! ```text
//! append(source)
//!   ├─ begin_cycle: encode the process descriptor (baseline size)
//!   ├─ for each span: materialize → try_add
//!   │     ├─ Added            → keep going
//!   │     ├─ AddedAfterFlush  → send the closed batch, keep going
//!   │     └─ Rejected         → warn, drop the span, keep going
//!   └─ end_cycle: send the leftover batch, clear the process descriptor
//! ```
//!
//! All state is owned by the `Transport` value and calls are expected to be
//! serialized by the caller (`&mut self` enforces it). Sending is synchronous
//! and best-effort: a failed batch is counted and logged, never retried, and
//! never stops the rest of the cycle.

use crate::accumulator::{BatchAccumulator, Decision, EncodedBatch};
use crate::config::{MaxBatchBytes, TransportConfig};
use crate::encoding::{CompactEncoder, Encoder};
use crate::error::TransportError;
use crate::metrics::TransportMetrics;
use crate::probe::SizeProbe;
use crate::sender::{Sender, UdpSender};
use crate::span::{Span, SpanSource};
use tracing::{debug, trace, warn};

/// What one [`Transport::append`] call did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AppendSummary {
    /// Spans in batches the sender accepted
    pub spans_sent: usize,
    /// Batches the sender accepted
    pub batches_sent: usize,
    /// Batches the sender reported as failed
    pub send_failures: usize,
    /// Spans dropped for being too large for any datagram
    pub oversized_dropped: usize,
    /// Spans dropped because they or the process descriptor failed to encode
    pub encode_failures: usize,
}

impl AppendSummary {
    /// `true` if every span was sent
    pub fn is_clean(&self) -> bool {
        self.send_failures == 0 && self.oversized_dropped == 0 && self.encode_failures == 0
    }
}

/// Packs spans into size-bounded batches and hands them to a [`Sender`].
pub struct Transport<S: Sender = UdpSender, E: Encoder = CompactEncoder> {
    sender: S,
    probe: SizeProbe<E>,
    accumulator: BatchAccumulator,
    metrics: TransportMetrics,
    agent_host_port: String,
}

impl Transport<UdpSender, CompactEncoder> {
    /// Creates a transport sending compact-thrift batches over UDP.
    pub fn new(config: TransportConfig) -> Result<Self, TransportError> {
        let budget = config.max_batch_bytes()?;
        let sender = UdpSender::connect(&config.agent_host_port, budget.packet_size())?;
        Self::with_parts(config, sender, CompactEncoder)
    }
}

impl<S: Sender> Transport<S, CompactEncoder> {
    /// Creates a transport with an injected sender.
    pub fn with_sender(config: TransportConfig, sender: S) -> Result<Self, TransportError> {
        Self::with_parts(config, sender, CompactEncoder)
    }
}

impl<S: Sender, E: Encoder> Transport<S, E> {
    /// Creates a transport with an injected sender and encoder.
    ///
    /// [`UdpSender`] splices the encoded bytes into a compact-protocol
    /// `emitBatch` call, and the framing reserve
    /// ([`EMIT_BATCH_OVERHEAD`](crate::config::EMIT_BATCH_OVERHEAD)) is sized
    /// for that. An encoder other than [`CompactEncoder`] is only valid
    /// together with a sender that understands its output.
    pub fn with_parts(
        config: TransportConfig,
        sender: S,
        encoder: E,
    ) -> Result<Self, TransportError> {
        let budget = config.max_batch_bytes()?;
        debug!(
            agent = %config.agent_host_port,
            sender = sender.name(),
            max_batch_bytes = budget.get(),
            "transport created"
        );

        Ok(Self {
            sender,
            probe: SizeProbe::new(encoder),
            accumulator: BatchAccumulator::new(budget),
            metrics: TransportMetrics::default(),
            agent_host_port: config.agent_host_port,
        })
    }

    /// Sends every span of `source`, packed into as few datagrams as fit.
    ///
    /// Never fails: oversized or unencodable spans are dropped with a warning
    /// and failed sends are counted, and in every case the remaining spans
    /// still go out.
    pub fn append<T: SpanSource + ?Sized>(&mut self, source: &T) -> AppendSummary {
        let mut summary = AppendSummary::default();

        let probe = &mut self.probe;
        match self.accumulator.begin_cycle(|| probe.materialize(&source.process())) {
            Ok(true) => {
                trace!(process_size = self.accumulator.baseline(), "process descriptor encoded");
            }
            Ok(false) => {}
            Err(e) => {
                let spans = source.spans().len();
                warn!(spans, error = %e, "failed to encode process descriptor, dropping spans");
                self.metrics.record_encode_error(spans as u64);
                summary.encode_failures += spans;
                return summary;
            }
        }

        for span in source.spans() {
            let encoded = match self.probe.materialize(span) {
                Ok(encoded) => encoded,
                Err(e) => {
                    warn!(
                        operation = %span.operation_name,
                        error = %e,
                        "failed to encode span, dropping it"
                    );
                    self.metrics.record_encode_error(1);
                    summary.encode_failures += 1;
                    continue;
                }
            };

            match self.accumulator.try_add(encoded) {
                Decision::Added => {}
                Decision::AddedAfterFlush(batch) => {
                    self.emit(&batch, &mut summary);
                }
                Decision::Rejected { size, available } => {
                    warn!(
                        operation = %span.operation_name,
                        size,
                        available,
                        "span is too large to fit in a UDP packet when considering overhead, \
                         dropping it"
                    );
                    self.metrics.record_dropped();
                    summary.oversized_dropped += 1;
                }
            }
        }

        // Nothing is sent for a cycle without spans, not even the process
        if let Some(batch) = self.accumulator.end_cycle() {
            self.emit(&batch, &mut summary);
        }

        summary
    }

    /// Sends whatever is pending. Returns the number of spans in the flushed
    /// batch, or 0 (without touching the sender) if nothing is pending.
    pub fn flush(&mut self) -> usize {
        match self.accumulator.take_pending() {
            Some(batch) => {
                let mut summary = AppendSummary::default();
                self.emit(&batch, &mut summary);
                batch.len()
            }
            None => 0,
        }
    }

    /// Sends anything still pending, then releases the sender's resources.
    /// The transport must not be used afterwards.
    pub fn close(&mut self) {
        let flushed = self.flush();
        if flushed > 0 {
            debug!(spans = flushed, "flushed pending spans on close");
        }
        self.accumulator.end_cycle();
        self.sender.close();
        debug!(agent = %self.agent_host_port, "transport closed");
    }

    /// Encoded size of the process descriptor `source` would produce.
    pub fn measure_process<T: SpanSource + ?Sized>(&mut self, source: &T) -> thrift::Result<usize> {
        self.probe.measure(&source.process())
    }

    /// Encoded size of `span`.
    pub fn measure_span(&mut self, span: &Span) -> thrift::Result<usize> {
        self.probe.measure(span)
    }

    /// Whether `span` alone would fit a datagram next to `source`'s process descriptor.
    pub fn fits<T: SpanSource + ?Sized>(
        &mut self,
        source: &T,
        span: &Span,
    ) -> thrift::Result<bool> {
        let needed = self.measure_process(source)? + self.measure_span(span)?;
        Ok(needed <= self.max_batch_bytes().get())
    }

    #[inline]
    pub fn max_batch_bytes(&self) -> MaxBatchBytes {
        self.accumulator.budget()
    }

    pub fn agent_host_port(&self) -> &str {
        &self.agent_host_port
    }

    pub fn metrics(&self) -> &TransportMetrics {
        &self.metrics
    }

    pub fn sender(&self) -> &S {
        &self.sender
    }

    pub fn sender_mut(&mut self) -> &mut S {
        &mut self.sender
    }

    fn emit(&mut self, batch: &EncodedBatch, summary: &mut AppendSummary) {
        let spans = batch.len();
        let bytes = batch.payload_size();

        match self.sender.emit_batch(batch) {
            Ok(()) => {
                debug!(spans, bytes, "batch flushed");
                self.metrics.record_success(spans as u64, bytes as u64);
                summary.spans_sent += spans;
                summary.batches_sent += 1;
            }
            Err(e) => {
                let sender = self.sender.name();
                warn!(spans, bytes, sender, error = %e, "failed to send batch");
                self.metrics.record_error(spans as u64);
                summary.send_failures += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SendError;
    use crate::span::{Process, TraceBuffer};
    use std::sync::{Arc, Mutex};
    use tracing_subscriber::fmt::MakeWriter;

    /// Records every batch it is handed; optionally fails every n-th send
    #[derive(Default)]
    struct RecordingSender {
        batches: Vec<EncodedBatch>,
        fail_every: Option<usize>,
        calls: usize,
        closed: bool,
    }

    impl Sender for RecordingSender {
        fn emit_batch(&mut self, batch: &EncodedBatch) -> Result<(), SendError> {
            self.calls += 1;
            if self.closed {
                return Err(SendError::Closed);
            }
            if self.fail_every.is_some_and(|n| self.calls % n == 0) {
                return Err(SendError::Io(std::io::ErrorKind::ConnectionRefused.into()));
            }
            self.batches.push(batch.clone());
            Ok(())
        }

        fn close(&mut self) {
            self.closed = true;
        }

        fn name(&self) -> &str {
            "recording"
        }
    }

    /// Compact encoding, except for the entities it is told to refuse
    struct RefusingEncoder {
        process: bool,
        operation: &'static str,
    }

    impl RefusingEncoder {
        fn refusal() -> thrift::Error {
            thrift::new_protocol_error(thrift::ProtocolErrorKind::InvalidData, "refused")
        }
    }

    impl Encoder for RefusingEncoder {
        fn encode_process(&self, process: &Process, out: &mut Vec<u8>) -> thrift::Result<()> {
            if self.process {
                return Err(Self::refusal());
            }
            CompactEncoder.encode_process(process, out)
        }

        fn encode_span(&self, span: &Span, out: &mut Vec<u8>) -> thrift::Result<()> {
            if span.operation_name == self.operation {
                return Err(Self::refusal());
            }
            CompactEncoder.encode_span(span, out)
        }
    }

    /// Collects formatted log output
    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl CapturedLogs {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for CapturedLogs {
        type Writer = Self;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    fn config(packet: usize) -> TransportConfig {
        TransportConfig::default().with_max_packet_size(packet)
    }

    fn recording(packet: usize) -> Transport<RecordingSender> {
        Transport::with_sender(config(packet), RecordingSender::default()).unwrap()
    }

    fn buffer(spans: usize) -> TraceBuffer {
        let mut buffer = TraceBuffer::new("svc");
        for i in 0..spans {
            let mut span = Span::new(1, i as u64 + 1, 0, format!("op-{:04}", i));
            span.start_time = 1_000_000;
            span.duration = 10;
            buffer.push(span);
        }
        buffer
    }

    #[test]
    fn test_flush_with_nothing_staged() {
        let mut transport = recording(0);
        assert_eq!(transport.flush(), 0);
        assert_eq!(transport.sender().calls, 0);
    }

    #[test]
    fn test_empty_append_sends_nothing() {
        let mut transport = recording(0);
        let summary = transport.append(&buffer(0));
        assert_eq!(summary, AppendSummary::default());
        assert_eq!(transport.sender().calls, 0);
    }

    #[test]
    fn test_small_append_is_one_batch() {
        let mut transport = recording(0);
        let summary = transport.append(&buffer(5));

        assert_eq!(summary.batches_sent, 1);
        assert_eq!(summary.spans_sent, 5);
        assert!(summary.is_clean());
        assert_eq!(transport.sender().batches[0].len(), 5);
        assert_eq!(transport.flush(), 0);
    }

    #[test]
    fn test_splits_at_budget() {
        let source = buffer(10);
        let mut probe = SizeProbe::new(CompactEncoder);
        let process = probe.measure(&source.process()).unwrap();
        let span = probe.measure(&source.spans()[0]).unwrap();

        // Room for exactly three spans per datagram
        let mut transport = recording(process + 3 * span + crate::config::EMIT_BATCH_OVERHEAD);
        let summary = transport.append(&source);

        let counts: Vec<_> = transport.sender().batches.iter().map(EncodedBatch::len).collect();
        assert_eq!(counts, [3, 3, 3, 1]);
        assert_eq!(summary.spans_sent, 10);
        assert!(transport
            .sender()
            .batches
            .iter()
            .all(|b| b.payload_size() <= transport.max_batch_bytes().get()));
    }

    #[test]
    fn test_oversized_span_is_dropped_and_counted() {
        let mut source = buffer(2);
        let big = Span::new(1, 99, 0, "huge").with_tag("blob", "x".repeat(2000));
        source.push(big);
        source.push(Span::new(1, 100, 0, "after"));

        let mut transport = recording(1000);
        let summary = transport.append(&source);

        assert_eq!(summary.oversized_dropped, 1);
        assert_eq!(summary.spans_sent, 3);
        assert_eq!(transport.metrics().spans_dropped, 1);
        assert!(!summary.is_clean());
    }

    #[test]
    fn test_oversized_span_warning_names_operation_and_sizes() {
        let mut source = buffer(1);
        let big = Span::new(1, 99, 0, "huge").with_tag("blob", "x".repeat(2000));
        source.push(big.clone());

        let mut transport = recording(1000);
        let size = transport.measure_span(&big).unwrap();
        let process = transport.measure_process(&source).unwrap();
        let available = transport.max_batch_bytes().get() - process;

        let logs = CapturedLogs::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(logs.clone())
            .with_ansi(false)
            .without_time()
            .with_max_level(tracing::Level::WARN)
            .finish();
        let summary = tracing::subscriber::with_default(subscriber, || transport.append(&source));
        assert_eq!(summary.oversized_dropped, 1);

        let output = logs.contents();
        let warnings: Vec<&str> = output.lines().filter(|l| l.contains("too large")).collect();
        assert_eq!(warnings.len(), 1, "log output: {}", output);
        let warning = warnings[0];
        assert!(warning.contains("WARN"), "{}", warning);
        assert!(warning.contains("operation=huge"), "{}", warning);
        assert!(warning.contains(&format!("size={}", size)), "{}", warning);
        assert!(warning.contains(&format!("available={}", available)), "{}", warning);
    }

    #[test]
    fn test_send_failure_does_not_stop_cycle() {
        let source = buffer(10);
        let mut probe = SizeProbe::new(CompactEncoder);
        let packet = probe.measure(&source.process()).unwrap()
            + 2 * probe.measure(&source.spans()[0]).unwrap()
            + crate::config::EMIT_BATCH_OVERHEAD;

        let sender = RecordingSender {
            fail_every: Some(2),
            ..Default::default()
        };
        let mut transport = Transport::with_sender(config(packet), sender).unwrap();
        let summary = transport.append(&source);

        // Five batches of two; the 2nd and 4th sends fail
        assert_eq!(transport.sender().calls, 5);
        assert_eq!(summary.send_failures, 2);
        assert_eq!(summary.batches_sent, 3);
        assert_eq!(summary.spans_sent, 6);
        assert_eq!(transport.metrics().spans_failed, 4);
    }

    #[test]
    fn test_unencodable_span_is_skipped() {
        let encoder = RefusingEncoder {
            process: false,
            operation: "op-0001",
        };
        let mut transport =
            Transport::with_parts(config(0), RecordingSender::default(), encoder).unwrap();
        let summary = transport.append(&buffer(3));

        assert_eq!(summary.encode_failures, 1);
        assert_eq!(summary.spans_sent, 2);
        assert!(!summary.is_clean());
        assert_eq!(transport.metrics().encode_errors, 1);
    }

    #[test]
    fn test_unencodable_process_drops_cycle() {
        let encoder = RefusingEncoder {
            process: true,
            operation: "",
        };
        let mut transport =
            Transport::with_parts(config(0), RecordingSender::default(), encoder).unwrap();
        let summary = transport.append(&buffer(4));

        assert_eq!(summary.encode_failures, 4);
        assert_eq!(summary.batches_sent, 0);
        assert_eq!(transport.sender().calls, 0);
        assert_eq!(transport.metrics().encode_errors, 4);
        assert_eq!(transport.flush(), 0);
    }

    #[test]
    fn test_process_rebuilt_each_cycle() {
        let mut transport = recording(0);
        transport.append(&buffer(1));
        let renamed = {
            let mut b = TraceBuffer::new("other-service");
            b.push(Span::new(1, 1, 0, "op"));
            b
        };
        transport.append(&renamed);

        let batches = &transport.sender().batches;
        assert_eq!(batches.len(), 2);
        assert_ne!(batches[0].process, batches[1].process);
        assert_eq!(
            batches[1].process.len(),
            SizeProbe::new(CompactEncoder).measure(&renamed.process()).unwrap()
        );
    }

    #[test]
    fn test_close_releases_sender() {
        let mut transport = recording(0);
        transport.close();
        assert!(transport.sender().closed);
        assert_eq!(transport.sender().calls, 0);
    }

    #[test]
    fn test_close_sends_pending_spans_first() {
        let mut transport = recording(0);
        let source = buffer(2);

        // Stage spans without finishing the cycle
        let probe = &mut transport.probe;
        transport
            .accumulator
            .begin_cycle(|| probe.materialize(&source.process()))
            .unwrap();
        for span in source.spans() {
            let encoded = transport.probe.materialize(span).unwrap();
            assert_eq!(transport.accumulator.try_add(encoded), Decision::Added);
        }

        transport.close();

        let sender = transport.sender();
        assert!(sender.closed);
        assert_eq!(sender.batches.len(), 1);
        assert_eq!(sender.batches[0].len(), 2);
        assert_eq!(transport.metrics().spans_sent, 2);
        assert!(!transport.accumulator.in_cycle());
    }

    #[test]
    fn test_fits() {
        let source = buffer(1);
        let mut transport = recording(200);
        assert!(transport.fits(&source, &source.spans()[0]).unwrap());

        let big = Span::new(1, 1, 0, "x".repeat(500));
        assert!(!transport.fits(&source, &big).unwrap());
    }

    #[test]
    fn test_packet_too_small_fails_construction() {
        let result = Transport::with_sender(config(10), RecordingSender::default());
        assert!(matches!(result, Err(TransportError::PacketTooSmall { .. })));
    }
}
