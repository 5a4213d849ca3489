//! Size probe
//!
//! The exact wire size of a span is only known once it has been encoded. The
//! probe encodes into a scratch buffer that is reused across calls and always
//! drained before returning, so consecutive measurements never see bytes left
//! over from a previous entity.
//!
//! Two phases:
//! - [`SizeProbe::measure`] encodes, reads the length, discards the bytes
//! - [`SizeProbe::materialize`] encodes and hands back an owned copy for batching

use crate::encoding::{CompactEncoder, Encoder};
use crate::span::{Process, Span};

/// An entity the probe knows how to hand to an [`Encoder`].
pub trait Encodable {
    fn encode_with<E: Encoder + ?Sized>(
        &self,
        encoder: &E,
        out: &mut Vec<u8>,
    ) -> thrift::Result<()>;
}

impl Encodable for Span {
    fn encode_with<E: Encoder + ?Sized>(
        &self,
        encoder: &E,
        out: &mut Vec<u8>,
    ) -> thrift::Result<()> {
        encoder.encode_span(self, out)
    }
}

impl Encodable for Process {
    fn encode_with<E: Encoder + ?Sized>(
        &self,
        encoder: &E,
        out: &mut Vec<u8>,
    ) -> thrift::Result<()> {
        encoder.encode_process(self, out)
    }
}

/// Serialized form of one entity. Its length is the measured wire size.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Encoded(Vec<u8>);

impl Encoded {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

/// Measures and materializes entities through an [`Encoder`] and a reusable scratch buffer.
pub struct SizeProbe<E = CompactEncoder> {
    encoder: E,
    scratch: Vec<u8>,
}

impl Default for SizeProbe<CompactEncoder> {
    fn default() -> Self {
        Self::new(CompactEncoder)
    }
}

impl<E: Encoder> SizeProbe<E> {
    pub fn new(encoder: E) -> Self {
        Self {
            encoder,
            scratch: Vec::new(),
        }
    }

    /// Returns the encoded size of `entity` without keeping the bytes.
    pub fn measure<T: Encodable + ?Sized>(&mut self, entity: &T) -> thrift::Result<usize> {
        let result = entity.encode_with(&self.encoder, &mut self.scratch);
        let len = self.scratch.len();
        self.scratch.clear();
        result.map(|()| len)
    }

    /// Encodes `entity` and returns its bytes.
    ///
    /// The scratch buffer is drained on failure too, so a half-written
    /// entity never leaks into the next call.
    pub fn materialize<T: Encodable + ?Sized>(&mut self, entity: &T) -> thrift::Result<Encoded> {
        let result = entity.encode_with(&self.encoder, &mut self.scratch);
        let encoded = result.map(|()| Encoded(self.scratch.clone()));
        self.scratch.clear();
        encoded
    }

    /// Bytes currently held in the scratch buffer. Zero between calls.
    #[inline]
    pub fn pending_bytes(&self) -> usize {
        self.scratch.len()
    }

    pub fn encoder(&self) -> &E {
        &self.encoder
    }
}
