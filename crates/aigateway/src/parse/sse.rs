//! Incremental server-sent-events parsing.
//!
//! The decoder consumes raw upstream bytes in whatever chunks they arrive and
//! yields complete events. Bytes belonging to an incomplete event stay in the
//! caller's buffer until the terminating blank line shows up, so a frame split
//! across two reads parses exactly once, when its final byte arrives.

use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::Decoder;

use crate::*;

/// A single SSE event. `data` is a zero-copy slice of the upstream buffer
/// whenever the event carried a single `data:` line (the common case).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
	pub event: Option<Strng>,
	pub data: Bytes,
}

impl Event {
	pub fn new(event: Option<&str>, data: impl Into<Bytes>) -> Self {
		Event {
			event: event.map(strng::new),
			data: data.into(),
		}
	}
}

#[derive(Debug, Default)]
pub struct SseDecoder {}

impl SseDecoder {
	pub fn new() -> Self {
		Self::default()
	}
}

impl Decoder for SseDecoder {
	type Item = Event;
	type Error = std::io::Error;

	fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
		loop {
			let Some(end) = find_event_end(src) else {
				return Ok(None);
			};
			let frame = src.split_to(end.frame_len).freeze();
			src.advance(end.delim_len);
			if let Some(ev) = parse_event(&frame) {
				return Ok(Some(ev));
			}
			// Comment-only or empty frame; keep scanning.
		}
	}
}

struct EventEnd {
	frame_len: usize,
	delim_len: usize,
}

// An event ends at a blank line: "\n\n" or "\r\n\r\n".
fn find_event_end(src: &BytesMut) -> Option<EventEnd> {
	let mut i = 0;
	while i < src.len() {
		if src[i] == b'\n' {
			let rest = &src[i + 1..];
			if rest.first() == Some(&b'\n') {
				return Some(EventEnd {
					frame_len: i + 1,
					delim_len: 1,
				});
			}
			if rest.len() >= 2 && rest[0] == b'\r' && rest[1] == b'\n' {
				return Some(EventEnd {
					frame_len: i + 1,
					delim_len: 2,
				});
			}
			if rest.len() == 1 && rest[0] == b'\r' {
				// Could still become \r\n; wait for more bytes
				return None;
			}
		}
		i += 1;
	}
	None
}

fn parse_event(frame: &Bytes) -> Option<Event> {
	let mut event = None;
	let mut single_data: Option<Bytes> = None;
	let mut joined: Option<Vec<u8>> = None;

	let mut start = 0;
	for (i, b) in frame.iter().enumerate() {
		if *b != b'\n' {
			continue;
		}
		let mut line_end = i;
		if line_end > start && frame[line_end - 1] == b'\r' {
			line_end -= 1;
		}
		handle_line(
			frame,
			start,
			line_end,
			&mut event,
			&mut single_data,
			&mut joined,
		);
		start = i + 1;
	}
	if start < frame.len() {
		handle_line(
			frame,
			start,
			frame.len(),
			&mut event,
			&mut single_data,
			&mut joined,
		);
	}

	let data = match (joined, single_data) {
		(Some(j), _) => Bytes::from(j),
		(None, Some(d)) => d,
		(None, None) => return None,
	};
	Some(Event { event, data })
}

fn handle_line(
	frame: &Bytes,
	start: usize,
	end: usize,
	event: &mut Option<Strng>,
	single_data: &mut Option<Bytes>,
	joined: &mut Option<Vec<u8>>,
) {
	if start >= end {
		return;
	}
	let line = &frame[start..end];
	if line[0] == b':' {
		// Comment line, discarded
		return;
	}
	if let Some(rest) = strip_field(line, b"data:") {
		let data_start = start + (line.len() - rest.len());
		let slice = frame.slice(data_start..end);
		match (joined.as_mut(), single_data.take()) {
			(Some(j), _) => {
				j.push(b'\n');
				j.extend_from_slice(&slice);
			},
			(None, Some(prev)) => {
				let mut j = Vec::with_capacity(prev.len() + slice.len() + 1);
				j.extend_from_slice(&prev);
				j.push(b'\n');
				j.extend_from_slice(&slice);
				*joined = Some(j);
			},
			(None, None) => *single_data = Some(slice),
		}
	} else if let Some(rest) = strip_field(line, b"event:") {
		*event = std::str::from_utf8(rest).ok().map(strng::new);
	}
	// Other fields (id, retry) are not meaningful to the gateway.
}

fn strip_field<'a>(line: &'a [u8], field: &[u8]) -> Option<&'a [u8]> {
	let rest = line.strip_prefix(field)?;
	Some(rest.strip_prefix(b" ").unwrap_or(rest))
}

/// encode_data renders one event as a `data: <payload>\n\n` frame.
pub fn encode_data(payload: &[u8], out: &mut Vec<u8>) {
	out.extend_from_slice(b"data: ");
	out.extend_from_slice(payload);
	out.extend_from_slice(b"\n\n");
}

/// encode_event renders one named event as `event: <name>\ndata: <payload>\n\n`.
pub fn encode_event(name: &str, payload: &[u8], out: &mut Vec<u8>) {
	out.extend_from_slice(b"event: ");
	out.extend_from_slice(name.as_bytes());
	out.push(b'\n');
	encode_data(payload, out);
}

/// The OpenAI-style stream terminator.
pub const DONE_FRAME: &[u8] = b"data: [DONE]\n\n";

/// is_done reports whether an event payload is the `[DONE]` terminator.
pub fn is_done(data: &[u8]) -> bool {
	data == b"[DONE]"
}

#[cfg(test)]
#[path = "sse_tests.rs"]
mod tests;
