//! Incremental decoding of the AWS `application/vnd.amazon.eventstream`
//! binary protocol, as produced by Bedrock's streaming invoke endpoint.

use aws_smithy_eventstream::frame::{DecodedFrame, MessageFrameDecoder};
pub use aws_smithy_types::event_stream::{HeaderValue, Message};
use base64::Engine;
use bytes::{Bytes, BytesMut};
use tokio_util::codec::Decoder;

use crate::*;

/// Error type for EventStream decoding.
///
/// Wraps AWS Smithy's eventstream errors and satisfies the `tokio_util::codec::Decoder`
/// requirement of implementing `From<io::Error>`.
#[derive(Debug)]
pub enum EventStreamError {
	/// AWS EventStream protocol error (CRC mismatch, invalid headers, etc.)
	Protocol(aws_smithy_eventstream::error::Error),
	/// I/O error during decoding
	Io(std::io::Error),
}

impl std::fmt::Display for EventStreamError {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::Protocol(e) => write!(f, "{e}"),
			Self::Io(e) => write!(f, "{e}"),
		}
	}
}

impl std::error::Error for EventStreamError {
	fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
		match self {
			Self::Protocol(e) => Some(e),
			Self::Io(e) => Some(e),
		}
	}
}

impl From<std::io::Error> for EventStreamError {
	fn from(err: std::io::Error) -> Self {
		Self::Io(err)
	}
}

impl From<aws_smithy_eventstream::error::Error> for EventStreamError {
	fn from(err: aws_smithy_eventstream::error::Error) -> Self {
		Self::Protocol(err)
	}
}

/// A `tokio_util::codec::Decoder` wrapper around AWS Smithy's `MessageFrameDecoder`.
///
/// Frames split across reads are held by the inner decoder and surface exactly
/// once, at the call in which the final byte arrives.
#[derive(Default)]
pub struct EventStreamCodec {
	inner: MessageFrameDecoder,
}

impl EventStreamCodec {
	pub fn new() -> Self {
		Self::default()
	}
}

impl Decoder for EventStreamCodec {
	type Item = Message;
	type Error = EventStreamError;

	fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
		match self.inner.decode_frame(src)? {
			DecodedFrame::Complete(message) => Ok(Some(message)),
			DecodedFrame::Incomplete => Ok(None),
		}
	}
}

/// event_type extracts the `:event-type` header of a message, if present.
pub fn event_type(msg: &Message) -> Option<Strng> {
	msg
		.headers()
		.iter()
		.find(|h| h.name().as_str() == ":event-type")
		.and_then(|h| match h.value() {
			HeaderValue::String(s) => Some(strng::new(s.as_str())),
			_ => None,
		})
}

/// chunk_payload decodes the payload of a Bedrock invoke-stream message.
///
/// Bedrock wraps each provider event as `{"bytes": "<base64>"}`; the decoded
/// bytes are the provider's own JSON event.
pub fn chunk_payload(msg: &Message) -> Option<Bytes> {
	#[derive(serde::Deserialize)]
	struct Chunk {
		bytes: String,
	}
	let chunk: Chunk = serde_json::from_slice(msg.payload().as_ref()).ok()?;
	base64::engine::general_purpose::STANDARD
		.decode(chunk.bytes.as_bytes())
		.ok()
		.map(Bytes::from)
}

#[cfg(test)]
mod tests {
	use aws_smithy_eventstream::frame::write_message_to;
	use aws_smithy_types::event_stream::Header;

	use super::*;

	fn chunk_message(inner: &[u8]) -> Vec<u8> {
		let payload = serde_json::json!({
			"bytes": base64::engine::general_purpose::STANDARD.encode(inner),
		});
		let msg = Message::new(Bytes::from(serde_json::to_vec(&payload).unwrap()))
			.add_header(Header::new(
				":message-type",
				HeaderValue::String("event".into()),
			))
			.add_header(Header::new(":event-type", HeaderValue::String("chunk".into())));
		let mut out = Vec::new();
		write_message_to(&msg, &mut out).unwrap();
		out
	}

	#[test]
	fn decodes_chunk_messages() {
		let wire = chunk_message(br#"{"type":"message_stop"}"#);
		let mut codec = EventStreamCodec::new();
		let mut buf = BytesMut::from(&wire[..]);
		let msg = codec.decode(&mut buf).unwrap().expect("complete frame");
		assert_eq!(event_type(&msg).as_deref(), Some("chunk"));
		assert_eq!(
			chunk_payload(&msg).unwrap().as_ref(),
			br#"{"type":"message_stop"}"#
		);
	}

	#[test]
	fn split_frame_decodes_once() {
		let wire = chunk_message(br#"{"type":"ping"}"#);
		for cut in 1..wire.len() {
			let mut codec = EventStreamCodec::new();
			let mut buf = BytesMut::new();
			buf.extend_from_slice(&wire[..cut]);
			assert!(codec.decode(&mut buf).unwrap().is_none(), "split at {cut}");
			buf.extend_from_slice(&wire[cut..]);
			let msg = codec.decode(&mut buf).unwrap().expect("complete frame");
			assert_eq!(chunk_payload(&msg).unwrap().as_ref(), br#"{"type":"ping"}"#);
		}
	}
}
