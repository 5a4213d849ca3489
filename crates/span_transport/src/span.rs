use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// A finished span, ready to be reported.
///
/// Times are Unix microseconds, which is the resolution the agent expects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Span {
    /// Unique trace identifier (128-bit, split into high/low halves on the wire)
    pub trace_id: u128,
    /// Unique span identifier (64-bit)
    pub span_id: u64,
    /// Parent span identifier (0 if root span)
    pub parent_span_id: u64,
    /// Operation name
    pub operation_name: String,
    /// Sampling/debug flags
    pub flags: i32,
    /// Span start time (Unix microseconds)
    pub start_time: u64,
    /// Span duration (microseconds)
    pub duration: u64,
    /// Span tags, in insertion order
    pub tags: Vec<Tag>,
    /// Timestamped log records
    pub logs: Vec<Log>,
}

/// Key/value metadata attached to a span, a log record or a process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    pub key: String,
    pub value: TagValue,
}

/// Tag value types supported by the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TagValue {
    String(String),
    // Long before Double so integral JSON numbers deserialize as Long
    Long(i64),
    Double(f64),
    Bool(bool),
    Binary(Vec<u8>),
}

/// A timestamped set of fields recorded while the span was active.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Log {
    /// Unix microseconds
    pub timestamp: u64,
    pub fields: Vec<Tag>,
}

/// Describes the process emitting spans. Sent once at the head of every batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Process {
    pub service_name: String,
    pub tags: Vec<Tag>,
}

/// Anything that can hand the transport a process descriptor and its finished spans.
pub trait SpanSource {
    /// Builds the process descriptor for the spans returned by [`SpanSource::spans`].
    fn process(&self) -> Process;

    /// Finished spans, in reporting order.
    fn spans(&self) -> &[Span];
}

/// Current time as Unix microseconds. Clocks set before the epoch read as zero.
pub fn unix_micros() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or_default()
}

impl Span {
    /// Creates a new span starting now
    pub fn new(
        trace_id: u128,
        span_id: u64,
        parent_span_id: u64,
        operation_name: impl Into<String>,
    ) -> Self {
        Self {
            trace_id,
            span_id,
            parent_span_id,
            operation_name: operation_name.into(),
            flags: 1,
            start_time: unix_micros(),
            duration: 0,
            tags: Vec::new(),
            logs: Vec::new(),
        }
    }

    /// Marks the span as finished now
    pub fn finish(&mut self) {
        self.duration = unix_micros().saturating_sub(self.start_time);
    }

    /// Adds a tag to the span
    pub fn set_tag(&mut self, key: impl Into<String>, value: impl Into<TagValue>) {
        self.tags.push(Tag::new(key, value));
    }

    /// Builder form of [`Span::set_tag`]
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<TagValue>) -> Self {
        self.set_tag(key, value);
        self
    }

    /// Records a log entry at the current time
    pub fn log(&mut self, fields: Vec<Tag>) {
        self.logs.push(Log {
            timestamp: unix_micros(),
            fields,
        });
    }

    /// Lower 64 bits of the trace id
    pub fn trace_id_low(&self) -> i64 {
        self.trace_id as u64 as i64
    }

    /// Upper 64 bits of the trace id
    pub fn trace_id_high(&self) -> i64 {
        (self.trace_id >> 64) as u64 as i64
    }
}

impl Tag {
    pub fn new(key: impl Into<String>, value: impl Into<TagValue>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

impl From<String> for TagValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<&str> for TagValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<f64> for TagValue {
    fn from(value: f64) -> Self {
        Self::Double(value)
    }
}

impl From<bool> for TagValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for TagValue {
    fn from(value: i64) -> Self {
        Self::Long(value)
    }
}

impl From<Vec<u8>> for TagValue {
    fn from(value: Vec<u8>) -> Self {
        Self::Binary(value)
    }
}

impl Process {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            tags: Vec::new(),
        }
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<TagValue>) -> Self {
        self.tags.push(Tag::new(key, value));
        self
    }
}

/// In-memory span source: a service description plus the spans finished so far.
#[derive(Debug, Clone)]
pub struct TraceBuffer {
    process: Process,
    spans: Vec<Span>,
}

impl TraceBuffer {
    /// Creates an empty buffer for the given service
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            process: Process::new(service_name),
            spans: Vec::new(),
        }
    }

    /// Adds a process-level tag (hostname, client version, ...)
    pub fn with_process_tag(mut self, key: impl Into<String>, value: impl Into<TagValue>) -> Self {
        self.process = self.process.with_tag(key, value);
        self
    }

    /// Records a finished span
    pub fn push(&mut self, span: Span) {
        self.spans.push(span);
    }

    /// Removes and returns every buffered span
    pub fn drain(&mut self) -> Vec<Span> {
        std::mem::take(&mut self.spans)
    }

    pub fn len(&self) -> usize {
        self.spans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }
}

impl SpanSource for TraceBuffer {
    fn process(&self) -> Process {
        self.process.clone()
    }

    fn spans(&self) -> &[Span] {
        &self.spans
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trace_id_halves() {
        let span = Span::new((7u128 << 64) | 42, 1, 0, "op");
        assert_eq!(span.trace_id_high(), 7);
        assert_eq!(span.trace_id_low(), 42);

        let span = Span::new(u128::MAX, 1, 0, "op");
        assert_eq!(span.trace_id_high(), -1);
        assert_eq!(span.trace_id_low(), -1);
    }

    #[test]
    fn test_tags_keep_insertion_order() {
        let span = Span::new(1, 1, 0, "op")
            .with_tag("b", 1i64)
            .with_tag("a", "x")
            .with_tag("c", true);
        let keys: Vec<_> = span.tags.iter().map(|t| t.key.as_str()).collect();
        assert_eq!(keys, ["b", "a", "c"]);
        assert_eq!(span.tags[1].value, TagValue::String("x".into()));
    }

    #[test]
    fn test_trace_buffer_drain() {
        let mut buffer = TraceBuffer::new("svc").with_process_tag("hostname", "box");
        assert!(buffer.is_empty());
        for i in 0..3 {
            buffer.push(Span::new(1, i, 0, format!("op-{}", i)));
        }
        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.spans()[2].span_id, 2);
        assert_eq!(buffer.process().service_name, "svc");
        assert_eq!(buffer.process().tags.len(), 1);

        let drained = buffer.drain();
        assert_eq!(drained.len(), 3);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_tag_value_serializes_untagged() {
        let json = serde_json::to_string(&Tag::new("k", 3i64)).unwrap();
        assert_eq!(json, r#"{"key":"k","value":3}"#);
    }
}
