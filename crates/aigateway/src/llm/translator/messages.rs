//! Native Anthropic Messages clients: Anthropic passthrough and
//! Anthropic-on-AWS.
//!
//! The body is semi-opaque here; only the model field is rewritten (or
//! deleted, for Bedrock) through the raw document so every unknown field and
//! the key order survive.

use bytes::BytesMut;
use serde_json::json;
use tokio_util::codec::Decoder;

use super::{
	HeaderMutation, Headers, RequestTransform, ResponseTransform, Translator, sse_rewrite_needed,
};
use crate::llm::types::messages::{self, typed};
use crate::llm::usage::UsageMode;
use crate::llm::{AIError, LLMTokenUsage, anthropic, bedrock};
use crate::parse::{aws_eventstream, sse};
use crate::*;

/// Watches the Messages event stream for usage and the provider model
/// without altering it.
#[derive(Default)]
struct Watcher {
	model: Option<Strng>,
	input_tokens: u64,
	cached_tokens: u64,
	output_tokens: u64,
	seen: bool,
}

impl Watcher {
	fn observe(&mut self, ev: &typed::MessagesStreamEvent) -> Option<LLMTokenUsage> {
		match ev {
			typed::MessagesStreamEvent::MessageStart { message } => {
				self.model = Some(strng::new(&message.model));
				self.input_tokens = message.usage.input_tokens;
				self.cached_tokens = message.usage.cache_read_input_tokens.unwrap_or_default();
				self.output_tokens = message.usage.output_tokens;
				self.seen = true;
				Some(self.usage())
			},
			typed::MessagesStreamEvent::MessageDelta { usage, .. } => {
				self.output_tokens = usage.output_tokens;
				if let Some(inp) = usage.input_tokens {
					self.input_tokens = inp;
				}
				if let Some(c) = usage.cache_read_input_tokens {
					self.cached_tokens = c;
				}
				self.seen = true;
				Some(self.usage())
			},
			_ => None,
		}
	}

	fn usage(&self) -> LLMTokenUsage {
		LLMTokenUsage::from_totals(self.input_tokens as u32, self.output_tokens as u32)
			.with_cached(self.cached_tokens as u32)
	}
}

/// The subset of the non-streaming response the gateway reads.
#[derive(serde::Deserialize)]
struct ResponseWatch {
	#[serde(default)]
	model: Option<String>,
	usage: typed::Usage,
}

pub struct Passthrough {
	provider: anthropic::Provider,
	stream: bool,
	request_model: Strng,
	buffered: BytesMut,
	decoder: sse::SseDecoder,
	watcher: Watcher,
}

impl Passthrough {
	pub fn new(provider: &anthropic::Provider) -> Self {
		Passthrough {
			provider: provider.clone(),
			stream: false,
			request_model: strng::EMPTY,
			buffered: BytesMut::new(),
			decoder: sse::SseDecoder::new(),
			watcher: Watcher::default(),
		}
	}
}

fn latch(raw: &Bytes, model_override: &Option<Strng>) -> Result<(bool, Strng), AIError> {
	let req: messages::Request = serde_json::from_slice(raw).map_err(AIError::RequestSchema)?;
	let model = match (model_override, &req.model) {
		(Some(m), _) => m.clone(),
		(None, Some(m)) => strng::new(m),
		(None, None) => return Err(AIError::MissingField(strng::literal!("model"))),
	};
	Ok((req.stream.unwrap_or_default(), model))
}

impl Translator for Passthrough {
	fn request_body(&mut self, raw: &Bytes, force_mutation: bool) -> Result<RequestTransform, AIError> {
		let (stream, model) = latch(raw, &self.provider.model)?;
		self.stream = stream;
		self.request_model = model;

		let mut out = RequestTransform::default();
		out.set_path(anthropic::DEFAULT_PATH);
		out
			.headers
			.set("anthropic-version", self.provider.version().to_string());
		if let Some(m) = &self.provider.model {
			let body = crate::json::set_field(raw, &["model"], json!(m.as_str()))
				.map_err(AIError::RequestMarshal)?;
			out.set_body(body);
		} else if force_mutation {
			out.set_body(raw.to_vec());
		}
		Ok(out)
	}

	fn response_headers(&mut self, _headers: &Headers) -> Result<HeaderMutation, AIError> {
		Ok(HeaderMutation::default())
	}

	fn response_body(
		&mut self,
		chunk: &[u8],
		end_of_stream: bool,
	) -> Result<ResponseTransform, AIError> {
		if !self.stream {
			self.buffered.extend_from_slice(chunk);
			if !end_of_stream {
				return Ok(ResponseTransform::default());
			}
			let resp: ResponseWatch =
				serde_json::from_slice(&self.buffered).map_err(AIError::ResponseParsing)?;
			let usage = LLMTokenUsage::from_totals(
				resp.usage.input_tokens as u32,
				resp.usage.output_tokens as u32,
			)
			.with_cached(resp.usage.cache_read_input_tokens.unwrap_or_default() as u32);
			let model = resp
				.model
				.as_deref()
				.filter(|m| !m.is_empty())
				.map(strng::new)
				.unwrap_or_else(|| self.request_model.clone());
			return Ok(ResponseTransform {
				headers: HeaderMutation::default(),
				body: None,
				usage: Some(usage),
				model: Some(model),
			});
		}

		self.buffered.extend_from_slice(chunk);
		let mut usage = None;
		while let Ok(Some(ev)) = self.decoder.decode(&mut self.buffered) {
			let Ok(parsed) = serde_json::from_slice::<typed::MessagesStreamEvent>(&ev.data) else {
				debug!("failed to parse streaming response frame");
				continue;
			};
			if let Some(u) = self.watcher.observe(&parsed) {
				usage = Some(u);
			}
		}
		let _ = end_of_stream;
		Ok(ResponseTransform {
			headers: HeaderMutation::default(),
			body: None,
			usage,
			model: Some(
				self
					.watcher
					.model
					.clone()
					.unwrap_or_else(|| self.request_model.clone()),
			),
		})
	}

	fn streaming(&self) -> bool {
		self.stream
	}

	fn request_model(&self) -> Strng {
		self.request_model.clone()
	}

	fn usage_mode(&self) -> UsageMode {
		UsageMode::Cumulative
	}
}

pub struct ToBedrock {
	provider: bedrock::Provider,
	stream: bool,
	request_model: Strng,
	buffered: BytesMut,
	decoder: aws_eventstream::EventStreamCodec,
	watcher: Watcher,
}

impl ToBedrock {
	pub fn new(provider: &bedrock::Provider) -> Self {
		ToBedrock {
			provider: provider.clone(),
			stream: false,
			request_model: strng::EMPTY,
			buffered: BytesMut::new(),
			decoder: aws_eventstream::EventStreamCodec::new(),
			watcher: Watcher::default(),
		}
	}
}

impl Translator for ToBedrock {
	fn request_body(
		&mut self,
		raw: &Bytes,
		_force_mutation: bool,
	) -> Result<RequestTransform, AIError> {
		let (stream, model) = latch(raw, &self.provider.model)?;
		self.stream = stream;
		self.request_model = model;

		// The model moves into the URL; anthropic_version takes its place in
		// the body. Applied to the raw document so the rest flows through.
		let body = crate::json::delete_field(raw, &["model"]).map_err(AIError::RequestMarshal)?;
		let body = crate::json::set_field(
			&body,
			&["anthropic_version"],
			json!(bedrock::ANTHROPIC_VERSION),
		)
		.map_err(AIError::RequestMarshal)?;

		let mut out = RequestTransform::default();
		out.set_path(
			self
				.provider
				.get_path(self.request_model.as_str(), self.stream)
				.to_string(),
		);
		out.set_body(body);
		Ok(out)
	}

	fn response_headers(&mut self, headers: &Headers) -> Result<HeaderMutation, AIError> {
		let mut hm = HeaderMutation::default();
		if self.stream && sse_rewrite_needed(headers) {
			hm.set(
				super::HEADER_CONTENT_TYPE,
				super::CONTENT_TYPE_EVENT_STREAM,
			);
		}
		Ok(hm)
	}

	fn response_body(
		&mut self,
		chunk: &[u8],
		end_of_stream: bool,
	) -> Result<ResponseTransform, AIError> {
		if !self.stream {
			self.buffered.extend_from_slice(chunk);
			if !end_of_stream {
				return Ok(ResponseTransform::default());
			}
			let resp: ResponseWatch =
				serde_json::from_slice(&self.buffered).map_err(AIError::ResponseParsing)?;
			let usage = LLMTokenUsage::from_totals(
				resp.usage.input_tokens as u32,
				resp.usage.output_tokens as u32,
			)
			.with_cached(resp.usage.cache_read_input_tokens.unwrap_or_default() as u32);
			return Ok(ResponseTransform {
				headers: HeaderMutation::default(),
				body: None,
				usage: Some(usage),
				// The model is virtualized through the URL on Bedrock.
				model: Some(self.request_model.clone()),
			});
		}

		// Reframe event-stream messages into the Messages SSE wire format.
		self.buffered.extend_from_slice(chunk);
		let mut body = Vec::new();
		let mut usage = None;
		loop {
			let msg = match self.decoder.decode(&mut self.buffered) {
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
			match serde_json::from_slice::<typed::MessagesStreamEvent>(&payload) {
				Ok(parsed) => {
					if let Some(u) = self.watcher.observe(&parsed) {
						usage = Some(u);
					}
					sse::encode_event(parsed.event_name(), &payload, &mut body);
				},
				Err(e) => {
					debug!("dropping malformed frame: {e}");
				},
			}
		}
		if end_of_stream {
			body.extend_from_slice(sse::DONE_FRAME);
		}
		Ok(ResponseTransform {
			headers: HeaderMutation::default(),
			body: Some(body),
			usage,
			model: Some(self.request_model.clone()),
		})
	}

	fn streaming(&self) -> bool {
		self.stream
	}

	fn request_model(&self) -> Strng {
		self.request_model.clone()
	}

	fn usage_mode(&self) -> UsageMode {
		UsageMode::Cumulative
	}
}
