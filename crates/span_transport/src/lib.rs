//! UDP Span Transport
//!
//! The batching core of a Jaeger-style tracing client. Finished spans are
//! encoded one by one (Thrift compact protocol) and packed greedily into
//! `emitBatch` datagrams that never exceed the configured packet size.
//!
//! # Example
//!
//! ```no_run
//! use span_transport::{Span, TraceBuffer, Transport, TransportConfig};
//!
//! let mut transport = Transport::new(TransportConfig::default())?;
//!
//! let mut buffer = TraceBuffer::new("checkout").with_process_tag("hostname", "web-1");
//! let mut span = Span::new(0x1234, 1, 0, "GET /cart");
//! span.finish();
//! buffer.push(span);
//!
//! let summary = transport.append(&buffer);
//! println!("sent {} spans in {} datagrams", summary.spans_sent, summary.batches_sent);
//! transport.close();
//! # Ok::<(), span_transport::TransportError>(())
//! ```

pub mod accumulator;
pub mod config;
pub mod encoding;
pub mod error;
mod invariants;
pub mod metrics;
pub mod probe;
pub mod sender;
pub mod span;
pub mod transport;

// Re-export main types
pub use accumulator::{BatchAccumulator, Decision, EncodedBatch};
pub use config::{
    default_max_packet_size, default_max_packet_size_for, MaxBatchBytes, TransportConfig,
    DEFAULT_AGENT_HOST_PORT, EMIT_BATCH_OVERHEAD, MAC_UDP_MAX_SIZE, UDP_PACKET_MAX_LENGTH,
};
pub use encoding::{CompactEncoder, Encoder};
pub use error::{SendError, TransportError};
pub use metrics::TransportMetrics;
pub use probe::{Encodable, Encoded, SizeProbe};
pub use sender::{NullSender, Sender, UdpSender};
pub use span::{Log, Process, Span, SpanSource, Tag, TagValue, TraceBuffer};
pub use transport::{AppendSummary, Transport};
