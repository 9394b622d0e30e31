//! OpenAI ↔ OpenAI passthrough.
//!
//! The body flows through unmodified apart from the model-name override and
//! forcing `stream_options.include_usage` so usage is always observable;
//! the response path only watches frames for usage and the provider model.

use bytes::BytesMut;
use serde_json::json;
use tokio_util::codec::Decoder;

use super::{HeaderMutation, Headers, RequestTransform, ResponseTransform, Translator};
use crate::llm::types::completions;
use crate::llm::usage::UsageMode;
use crate::llm::{AIError, LLMTokenUsage, RouteType, openai};
use crate::parse::sse;
use crate::*;

pub struct Passthrough {
	provider: openai::Provider,
	stream: bool,
	request_model: Strng,
	response_model: Option<Strng>,
	buffered: BytesMut,
	decoder: sse::SseDecoder,
}

impl Passthrough {
	pub fn new(provider: &openai::Provider) -> Self {
		Passthrough {
			provider: provider.clone(),
			stream: false,
			request_model: strng::EMPTY,
			response_model: None,
			buffered: BytesMut::new(),
			decoder: sse::SseDecoder::new(),
		}
	}
}

/// The subset of a stream chunk the passthrough path actually reads.
#[derive(serde::Deserialize)]
struct StreamChunk {
	#[serde(default)]
	model: Option<String>,
	#[serde(default)]
	usage: Option<completions::Usage>,
}

impl Translator for Passthrough {
	fn request_body(&mut self, raw: &Bytes, force_mutation: bool) -> Result<RequestTransform, AIError> {
		let req: completions::Request =
			serde_json::from_slice(raw).map_err(AIError::RequestSchema)?;
		self.stream = req.stream.unwrap_or_default();
		self.request_model = match (&self.provider.model, &req.model) {
			(Some(m), _) => m.clone(),
			(None, Some(m)) => strng::new(m),
			(None, None) => return Err(AIError::MissingField(strng::literal!("model"))),
		};

		let mut out = RequestTransform::default();
		out.set_path(openai::path(RouteType::Completions));

		// The model override and the forced stream_options are applied to the
		// raw document so unknown sibling fields (and key order) survive.
		let mut body: Option<Vec<u8>> = None;
		if let Some(m) = &self.provider.model {
			body = Some(
				crate::json::set_field(raw, &["model"], json!(m.as_str()))
					.map_err(AIError::RequestMarshal)?,
			);
		}
		// If a user doesn't request usage, we will not get token information
		// which we need. We always set it.
		if self.stream && req.stream_options.is_none() {
			let current = body.as_deref().unwrap_or(raw.as_ref());
			body = Some(
				crate::json::set_field(current, &["stream_options"], json!({"include_usage": true}))
					.map_err(AIError::RequestMarshal)?,
			);
		}
		if body.is_none() && force_mutation {
			body = Some(raw.to_vec());
		}
		if let Some(b) = body {
			out.set_body(b);
		}
		Ok(out)
	}

	fn response_headers(&mut self, _headers: &Headers) -> Result<HeaderMutation, AIError> {
		// The upstream already speaks SSE (streaming) or JSON (not).
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
			let resp: completions::Response =
				serde_json::from_slice(&self.buffered).map_err(AIError::ResponseParsing)?;
			let usage = resp.usage.as_ref().map(usage_from);
			let model = resp
				.model
				.as_deref()
				.map(strng::new)
				.unwrap_or_else(|| self.request_model.clone());
			self.response_model = Some(model.clone());
			return Ok(ResponseTransform {
				headers: HeaderMutation::default(),
				body: None,
				usage,
				model: Some(model),
			});
		}

		// Streaming: watch complete frames for usage/model, pass bytes through.
		self.buffered.extend_from_slice(chunk);
		let mut usage = None;
		while let Ok(Some(ev)) = self.decoder.decode(&mut self.buffered) {
			if sse::is_done(&ev.data) {
				continue;
			}
			let Ok(parsed) = serde_json::from_slice::<StreamChunk>(&ev.data) else {
				debug!("failed to parse streaming response frame");
				continue;
			};
			if self.response_model.is_none()
				&& let Some(m) = parsed.model.as_deref().filter(|m| !m.is_empty())
			{
				self.response_model = Some(strng::new(m));
			}
			if let Some(u) = &parsed.usage {
				usage = Some(usage_from(u));
			}
		}
		let _ = end_of_stream;
		Ok(ResponseTransform {
			headers: HeaderMutation::default(),
			body: None,
			usage,
			model: Some(
				self
					.response_model
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

fn usage_from(u: &completions::Usage) -> LLMTokenUsage {
	LLMTokenUsage {
		input_tokens: u.prompt_tokens,
		output_tokens: u.completion_tokens,
		total_tokens: u.total_tokens,
		cached_input_tokens: u
			.prompt_tokens_details
			.as_ref()
			.map(|d| d.cached_tokens)
			.unwrap_or_default(),
	}
}
