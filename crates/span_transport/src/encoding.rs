//! Wire encoding
//!
//! Spans and process descriptors are serialized as the Jaeger Thrift model
//! through `thrift`'s compact protocol, and shipped to the agent inside a
//! oneway `emitBatch` call.
//!
//! Compact-encoded structs are self-delimiting (they end with a stop byte and
//! their field ids are relative to the struct), so a span encoded on its own can
//! be spliced verbatim into a batch. That is what lets the transport measure
//! each span exactly once and reuse the bytes when the batch is assembled.

use crate::span::{Log, Process, Span, Tag, TagValue};
use thrift::protocol::{
    TCompactOutputProtocol, TFieldIdentifier, TListIdentifier, TMessageIdentifier, TMessageType,
    TOutputProtocol, TStructIdentifier, TType,
};

/// Turns process descriptors and spans into their wire form.
///
/// Implementations must be deterministic: encoding the same entity twice
/// produces the same bytes.
pub trait Encoder {
    /// Appends the encoded process descriptor to `out`.
    fn encode_process(&self, process: &Process, out: &mut Vec<u8>) -> thrift::Result<()>;

    /// Appends the encoded span to `out`.
    fn encode_span(&self, span: &Span, out: &mut Vec<u8>) -> thrift::Result<()>;
}

/// Jaeger Thrift model over the compact protocol.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompactEncoder;

impl Encoder for CompactEncoder {
    fn encode_process(&self, process: &Process, out: &mut Vec<u8>) -> thrift::Result<()> {
        let mut o_prot = TCompactOutputProtocol::new(out);
        write_process(process, &mut o_prot)?;
        o_prot.flush()
    }

    fn encode_span(&self, span: &Span, out: &mut Vec<u8>) -> thrift::Result<()> {
        let mut o_prot = TCompactOutputProtocol::new(out);
        write_span(span, &mut o_prot)?;
        o_prot.flush()
    }
}

const EMIT_BATCH: &str = "emitBatch";

/// Jaeger `TagType` enum values
mod tag_type {
    pub const STRING: i32 = 0;
    pub const DOUBLE: i32 = 1;
    pub const BOOL: i32 = 2;
    pub const LONG: i32 = 3;
    pub const BINARY: i32 = 4;
}

fn write_tag(tag: &Tag, o_prot: &mut dyn TOutputProtocol) -> thrift::Result<()> {
    o_prot.write_struct_begin(&TStructIdentifier::new("Tag"))?;
    o_prot.write_field_begin(&TFieldIdentifier::new("key", TType::String, 1))?;
    o_prot.write_string(&tag.key)?;
    o_prot.write_field_end()?;

    let v_type = match &tag.value {
        TagValue::String(_) => tag_type::STRING,
        TagValue::Double(_) => tag_type::DOUBLE,
        TagValue::Bool(_) => tag_type::BOOL,
        TagValue::Long(_) => tag_type::LONG,
        TagValue::Binary(_) => tag_type::BINARY,
    };
    o_prot.write_field_begin(&TFieldIdentifier::new("vType", TType::I32, 2))?;
    o_prot.write_i32(v_type)?;
    o_prot.write_field_end()?;

    match &tag.value {
        TagValue::String(s) => {
            o_prot.write_field_begin(&TFieldIdentifier::new("vStr", TType::String, 3))?;
            o_prot.write_string(s)?;
        }
        TagValue::Double(d) => {
            o_prot.write_field_begin(&TFieldIdentifier::new("vDouble", TType::Double, 4))?;
            o_prot.write_double(*d)?;
        }
        TagValue::Bool(b) => {
            // folded into the field header by the compact protocol
            o_prot.write_field_begin(&TFieldIdentifier::new("vBool", TType::Bool, 5))?;
            o_prot.write_bool(*b)?;
        }
        TagValue::Long(l) => {
            o_prot.write_field_begin(&TFieldIdentifier::new("vLong", TType::I64, 6))?;
            o_prot.write_i64(*l)?;
        }
        TagValue::Binary(bytes) => {
            o_prot.write_field_begin(&TFieldIdentifier::new("vBinary", TType::String, 7))?;
            o_prot.write_bytes(bytes)?;
        }
    }
    o_prot.write_field_end()?;

    o_prot.write_field_stop()?;
    o_prot.write_struct_end()
}

fn write_tag_list(
    name: &str,
    id: i16,
    tags: &[Tag],
    o_prot: &mut dyn TOutputProtocol,
) -> thrift::Result<()> {
    // optional list: omitted when empty
    if tags.is_empty() {
        return Ok(());
    }
    o_prot.write_field_begin(&TFieldIdentifier::new(name, TType::List, id))?;
    o_prot.write_list_begin(&TListIdentifier::new(TType::Struct, tags.len() as i32))?;
    for tag in tags {
        write_tag(tag, o_prot)?;
    }
    o_prot.write_list_end()?;
    o_prot.write_field_end()
}

fn write_log(log: &Log, o_prot: &mut dyn TOutputProtocol) -> thrift::Result<()> {
    o_prot.write_struct_begin(&TStructIdentifier::new("Log"))?;
    o_prot.write_field_begin(&TFieldIdentifier::new("timestamp", TType::I64, 1))?;
    o_prot.write_i64(log.timestamp as i64)?;
    o_prot.write_field_end()?;

    // required, written even when empty
    o_prot.write_field_begin(&TFieldIdentifier::new("fields", TType::List, 2))?;
    o_prot.write_list_begin(&TListIdentifier::new(TType::Struct, log.fields.len() as i32))?;
    for tag in &log.fields {
        write_tag(tag, o_prot)?;
    }
    o_prot.write_list_end()?;
    o_prot.write_field_end()?;

    o_prot.write_field_stop()?;
    o_prot.write_struct_end()
}

fn write_process(process: &Process, o_prot: &mut dyn TOutputProtocol) -> thrift::Result<()> {
    o_prot.write_struct_begin(&TStructIdentifier::new("Process"))?;
    o_prot.write_field_begin(&TFieldIdentifier::new("serviceName", TType::String, 1))?;
    o_prot.write_string(&process.service_name)?;
    o_prot.write_field_end()?;
    write_tag_list("tags", 2, &process.tags, o_prot)?;
    o_prot.write_field_stop()?;
    o_prot.write_struct_end()
}

fn write_i64_field(
    name: &str,
    id: i16,
    value: i64,
    o_prot: &mut dyn TOutputProtocol,
) -> thrift::Result<()> {
    o_prot.write_field_begin(&TFieldIdentifier::new(name, TType::I64, id))?;
    o_prot.write_i64(value)?;
    o_prot.write_field_end()
}

fn write_span(span: &Span, o_prot: &mut dyn TOutputProtocol) -> thrift::Result<()> {
    o_prot.write_struct_begin(&TStructIdentifier::new("Span"))?;
    write_i64_field("traceIdLow", 1, span.trace_id_low(), o_prot)?;
    write_i64_field("traceIdHigh", 2, span.trace_id_high(), o_prot)?;
    write_i64_field("spanId", 3, span.span_id as i64, o_prot)?;
    write_i64_field("parentSpanId", 4, span.parent_span_id as i64, o_prot)?;

    o_prot.write_field_begin(&TFieldIdentifier::new("operationName", TType::String, 5))?;
    o_prot.write_string(&span.operation_name)?;
    o_prot.write_field_end()?;

    // field 6 (references) is never sent
    o_prot.write_field_begin(&TFieldIdentifier::new("flags", TType::I32, 7))?;
    o_prot.write_i32(span.flags)?;
    o_prot.write_field_end()?;

    write_i64_field("startTime", 8, span.start_time as i64, o_prot)?;
    write_i64_field("duration", 9, span.duration as i64, o_prot)?;
    write_tag_list("tags", 10, &span.tags, o_prot)?;

    if !span.logs.is_empty() {
        o_prot.write_field_begin(&TFieldIdentifier::new("logs", TType::List, 11))?;
        o_prot.write_list_begin(&TListIdentifier::new(TType::Struct, span.logs.len() as i32))?;
        for log in &span.logs {
            write_log(log, o_prot)?;
        }
        o_prot.write_list_end()?;
        o_prot.write_field_end()?;
    }

    o_prot.write_field_stop()?;
    o_prot.write_struct_end()
}

/// Copies an already-encoded struct into the output.
///
/// The bytes carry their own stop marker and nested field ids, so nothing
/// about the enclosing struct's field state changes.
fn write_encoded(bytes: &[u8], o_prot: &mut dyn TOutputProtocol) -> thrift::Result<()> {
    bytes.iter().try_for_each(|b| o_prot.write_byte(*b))
}

/// Writes a complete `Agent.emitBatch` datagram into `out`.
///
/// `process` and each entry of `spans` must be compact-encoded structs as
/// produced by [`CompactEncoder`]. Everything this function writes besides
/// those bytes is framing, bounded by
/// [`EMIT_BATCH_OVERHEAD`](crate::config::EMIT_BATCH_OVERHEAD).
pub fn write_emit_batch<'s, I>(
    out: &mut Vec<u8>,
    seq_id: i32,
    process: &[u8],
    spans: I,
) -> thrift::Result<()>
where
    I: IntoIterator<Item = &'s [u8]>,
    I::IntoIter: ExactSizeIterator,
{
    let spans = spans.into_iter();
    let mut o_prot = TCompactOutputProtocol::new(out);
    o_prot.write_message_begin(&TMessageIdentifier::new(
        EMIT_BATCH,
        TMessageType::OneWay,
        seq_id,
    ))?;

    // emitBatch_args { 1: Batch batch }
    o_prot.write_struct_begin(&TStructIdentifier::new("emitBatch_args"))?;
    o_prot.write_field_begin(&TFieldIdentifier::new("batch", TType::Struct, 1))?;

    // Batch { 1: Process process, 2: list<Span> spans }
    o_prot.write_struct_begin(&TStructIdentifier::new("Batch"))?;
    o_prot.write_field_begin(&TFieldIdentifier::new("process", TType::Struct, 1))?;
    write_encoded(process, &mut o_prot)?;
    o_prot.write_field_end()?;

    o_prot.write_field_begin(&TFieldIdentifier::new("spans", TType::List, 2))?;
    o_prot.write_list_begin(&TListIdentifier::new(TType::Struct, spans.len() as i32))?;
    for span in spans {
        write_encoded(span, &mut o_prot)?;
    }
    o_prot.write_list_end()?;
    o_prot.write_field_end()?;
    o_prot.write_field_stop()?;
    o_prot.write_struct_end()?;

    o_prot.write_field_end()?;
    o_prot.write_field_stop()?;
    o_prot.write_struct_end()?;
    o_prot.write_message_end()?;
    o_prot.flush()
}
