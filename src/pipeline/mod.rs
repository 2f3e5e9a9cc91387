//! Streaming frame decoding.
//!
//! Providers deliver their token streams in different wire framings. The
//! decoders in [`decode`] turn a raw byte stream into a stream of JSON frames;
//! each provider adapter then maps frames to text fragments.
//!
//! ```text
//! HTTP body bytes → Decoder → JSON frames → adapter → text fragments
//! ```
//!
//! | Decoder | Framing |
//! |---------|---------|
//! | [`SseDecoder`] | `data: {...}` events separated by blank lines, `[DONE]` terminator |
//! | [`JsonArrayDecoder`] | a streamed JSON array of objects, or newline-delimited objects |

pub mod decode;

pub use decode::{JsonArrayDecoder, SseDecoder};

use bytes::Bytes;
use futures::Stream;
use serde_json::Value;
use std::pin::Pin;

/// Raw body chunks with the caller's error type.
pub type ByteStream<E> = Pin<Box<dyn Stream<Item = Result<Bytes, E>> + Send + 'static>>;

/// Decoded JSON frames. Upstream errors pass through unchanged.
pub type FrameStream<E> = Pin<Box<dyn Stream<Item = Result<Value, E>> + Send + 'static>>;

/// Turns a byte stream into JSON frames.
///
/// Decoders never fail on malformed payloads; frames that do not parse are
/// skipped. Only errors produced by the input stream reach the output.
pub trait Decoder: Send + Sync {
    fn decode_stream<E: Send + 'static>(&self, input: ByteStream<E>) -> FrameStream<E>;
}
