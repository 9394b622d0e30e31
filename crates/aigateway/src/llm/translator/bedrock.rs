//! OpenAI Chat Completions ↔ Anthropic on AWS Bedrock.
//!
//! The body is the Messages schema with the model field deleted (it rides in
//! the URL) and `anthropic_version` pinned. Streaming frames arrive as AWS
//! event-stream messages wrapping base64 provider events and are reframed to
//! SSE on the way out.

use bytes::BytesMut;
use serde_json::{Map, Value};
use tokio_util::codec::Decoder;

use super::anthropic::State;
use super::{HeaderMutation, Headers, RequestTransform, ResponseTransform, Translator};
use crate::llm::types::completions;
use crate::llm::usage::UsageMode;
use crate::llm::{AIError, bedrock};
use crate::parse::{aws_eventstream, sse};
use crate::*;

pub struct FromOpenAI {
	provider: bedrock::Provider,
	state: State,
	decoder: aws_eventstream::EventStreamCodec,
	frames: BytesMut,
}

impl FromOpenAI {
	pub fn new(provider: &bedrock::Provider) -> Self {
		FromOpenAI {
			provider: provider.clone(),
			state: State::default(),
			decoder: aws_eventstream::EventStreamCodec::new(),
			frames: BytesMut::new(),
		}
	}
}

/// prepare_body strips the model field (Bedrock carries it in the path) and
/// pins the anthropic_version tag.
pub(super) fn prepare_body(body: Vec<u8>, version: &str) -> Result<Vec<u8>, AIError> {
	let mut map: Map<String, Value> =
		serde_json::from_slice(&body).map_err(AIError::RequestMarshal)?;
	map.shift_remove("model");
	map.insert(
		"anthropic_version".to_string(),
		Value::String(version.to_string()),
	);
	serde_json::to_vec(&map).map_err(AIError::RequestMarshal)
}

impl Translator for FromOpenAI {
	fn request_body(
		&mut self,
		raw: &Bytes,
		_force_mutation: bool,
	) -> Result<RequestTransform, AIError> {
		let req: completions::Request =
			serde_json::from_slice(raw).map_err(AIError::RequestSchema)?;
		let body = self
			.state
			.prepare_request(&req, self.provider.model.clone())?;
		let body = prepare_body(body, bedrock::ANTHROPIC_VERSION)?;
		let mut out = RequestTransform::default();
		out.set_path(
			self
				.provider
				.get_path(self.state.request_model.as_str(), self.state.stream)
				.to_string(),
		);
		out.set_body(body);
		Ok(out)
	}

	fn response_headers(&mut self, headers: &Headers) -> Result<HeaderMutation, AIError> {
		self.state.response_headers(headers)
	}

	fn response_body(
		&mut self,
		chunk: &[u8],
		end_of_stream: bool,
	) -> Result<ResponseTransform, AIError> {
		if !self.state.stream {
			// Non-streaming invoke returns the Messages schema directly.
			return self.state.response_body(chunk, end_of_stream, true);
		}
		// Unwrap event-stream frames into SSE events the shared state machine
		// understands, preserving frame boundaries across calls.
		self.frames.extend_from_slice(chunk);
		let mut sse_bytes = Vec::new();
		loop {
			let msg = match self.decoder.decode(&mut self.frames) {
				Ok(Some(msg)) => msg,
				Ok(None) => break,
				Err(e) => {
					return Err(AIError::UpstreamFraming(strng::format!(
						"event-stream decode: {e}"
					)));
				},
			};
			let Some(payload) = aws_eventstream::chunk_payload(&msg) else {
				debug!(
					event_type = ?aws_eventstream::event_type(&msg),
					"dropping event-stream message without chunk payload"
				);
				continue;
			};
			let name = json_event_name(&payload);
			match name {
				Some(name) => sse::encode_event(&name, &payload, &mut sse_bytes),
				None => sse::encode_data(&payload, &mut sse_bytes),
			}
		}
		self.state.response_body(&sse_bytes, end_of_stream, true)
	}

	fn streaming(&self) -> bool {
		self.state.stream
	}

	fn request_model(&self) -> Strng {
		self.state.request_model.clone()
	}

	fn usage_mode(&self) -> UsageMode {
		UsageMode::Cumulative
	}
}

/// json_event_name peeks at the `type` field of a provider event.
pub(super) fn json_event_name(payload: &[u8]) -> Option<String> {
	let v: Value = serde_json::from_slice(payload).ok()?;
	v.get("type").and_then(Value::as_str).map(str::to_string)
}
