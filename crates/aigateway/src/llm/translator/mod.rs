//! Schema translators.
//!
//! A translator is a per-request object mapping one canonical client schema
//! onto one provider schema, request and response, streaming and not. One
//! instance serves exactly one in-flight request and is only ever touched by
//! one worker; calls arrive in the fixed order `request_body` →
//! `response_headers` (once) → `response_body` (one or more times, the last
//! with `end_of_stream`). The final `end_of_stream` call is made even for
//! non-streaming responses.

use crate::llm::usage::UsageMode;
use crate::llm::{AIError, AIProvider, LLMTokenUsage, RouteType, types};
use crate::*;

pub mod anthropic;
pub mod bedrock;
pub mod embeddings;
pub mod gcp_anthropic;
pub mod gemini;
pub mod messages;
pub mod openai;
pub mod rerank;

#[cfg(test)]
#[path = "tests.rs"]
mod tests;

pub const HEADER_PATH: &str = ":path";
pub const HEADER_STATUS: &str = ":status";
pub const HEADER_CONTENT_LENGTH: &str = "content-length";
pub const HEADER_CONTENT_TYPE: &str = "content-type";
pub const CONTENT_TYPE_EVENT_STREAM: &str = "text/event-stream";
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// Response headers as handed to the translator. Pseudo headers (`:status`)
/// ride along with regular ones, which rules out `http::HeaderMap`.
#[derive(Debug, Default, Clone)]
pub struct Headers(Vec<(Strng, Strng)>);

impl Headers {
	pub fn new(headers: Vec<(Strng, Strng)>) -> Self {
		Headers(headers)
	}

	pub fn get(&self, name: &str) -> Option<&str> {
		self
			.0
			.iter()
			.find(|(k, _)| k.eq_ignore_ascii_case(name))
			.map(|(_, v)| v.as_str())
	}

	pub fn status(&self) -> Option<&str> {
		self.get(HEADER_STATUS)
	}

	pub fn content_type(&self) -> Option<&str> {
		self.get(HEADER_CONTENT_TYPE)
	}
}

impl<const N: usize> From<[(&str, &str); N]> for Headers {
	fn from(v: [(&str, &str); N]) -> Self {
		Headers(
			v.into_iter()
				.map(|(k, vv)| (strng::new(k), strng::new(vv)))
				.collect(),
		)
	}
}

/// Header edits to apply on the way out. Values are full overwrites.
#[derive(Debug, Default, Clone)]
pub struct HeaderMutation {
	pub set: Vec<(Strng, String)>,
	pub remove: Vec<Strng>,
}

impl HeaderMutation {
	pub fn set(&mut self, name: impl Into<Strng>, value: impl Into<String>) {
		self.set.push((name.into(), value.into()));
	}

	pub fn is_empty(&self) -> bool {
		self.set.is_empty() && self.remove.is_empty()
	}

	pub fn get(&self, name: &str) -> Option<&str> {
		self
			.set
			.iter()
			.find(|(k, _)| k.eq_ignore_ascii_case(name))
			.map(|(_, v)| v.as_str())
	}
}

/// The outcome of `request_body`. A rewritten body always carries a matching
/// content-length edit; a rewritten path always carries a `:path` edit.
#[derive(Debug, Default)]
pub struct RequestTransform {
	pub headers: HeaderMutation,
	pub body: Option<Vec<u8>>,
	/// Length of the rewritten body. The caller publishes it as dynamic
	/// metadata so the upstream header_mutation filter can restore the
	/// request content-length after the data plane re-buffers the body.
	pub content_length: Option<u64>,
}

impl RequestTransform {
	pub fn set_path(&mut self, path: impl Into<String>) {
		self.headers.set(HEADER_PATH, path);
	}

	pub fn set_body(&mut self, body: Vec<u8>) {
		let mut buf = itoa::Buffer::new();
		self
			.headers
			.set(HEADER_CONTENT_LENGTH, buf.format(body.len()));
		self.content_length = Some(body.len() as u64);
		self.body = Some(body);
	}
}

/// The outcome of one `response_body` call. `body: None` passes the original
/// chunk through untouched. `usage` is a per-call observation folded by the
/// caller's [`crate::llm::usage::Aggregator`].
#[derive(Debug, Default)]
pub struct ResponseTransform {
	pub headers: HeaderMutation,
	pub body: Option<Vec<u8>>,
	pub usage: Option<LLMTokenUsage>,
	pub model: Option<Strng>,
}

impl ResponseTransform {
	pub fn set_body(&mut self, body: Vec<u8>) {
		let mut buf = itoa::Buffer::new();
		self
			.headers
			.set(HEADER_CONTENT_LENGTH, buf.format(body.len()));
		self.body = Some(body);
	}
}

/// The capability set shared by every translator family.
pub trait Translator: Send {
	/// Translate the client request body. Latches the stream flag and the
	/// effective request model on the instance. With `force_mutation`, a
	/// concrete body is returned even when no rewrite is needed (retries).
	fn request_body(&mut self, raw: &Bytes, force_mutation: bool)
	-> Result<RequestTransform, AIError>;

	/// Translate the upstream response headers. For streaming responses from
	/// providers that do not emit SSE, rewrites content-type to
	/// text/event-stream before the first body byte goes downstream.
	fn response_headers(&mut self, headers: &Headers) -> Result<HeaderMutation, AIError>;

	/// Translate one chunk of the upstream response body. Streaming bodies
	/// are consumed as bytes arrive; complete frames are re-emitted and
	/// residual bytes buffered for the next call.
	fn response_body(&mut self, chunk: &[u8], end_of_stream: bool)
	-> Result<ResponseTransform, AIError>;

	/// Wrap an upstream error payload (possibly non-JSON) into the canonical
	/// error envelope.
	fn response_error(&mut self, headers: &Headers, body: &Bytes)
	-> Result<ResponseTransform, AIError> {
		Ok(wrap_upstream_error(headers, body))
	}

	/// Whether the request latched streaming mode.
	fn streaming(&self) -> bool;

	/// The effective request model (after any model-name override), used as
	/// the fallback response model.
	fn request_model(&self) -> Strng;

	/// How this provider reports usage across a streaming response.
	fn usage_mode(&self) -> UsageMode {
		UsageMode::Cumulative
	}
}

/// new_translator picks the translator for a (client schema, provider
/// schema) pair.
pub fn new_translator(
	route: RouteType,
	provider: &AIProvider,
) -> Result<Box<dyn Translator>, AIError> {
	Ok(match (route, provider) {
		(RouteType::Completions, AIProvider::OpenAI(p)) => Box::new(openai::Passthrough::new(p)),
		(RouteType::Completions, AIProvider::Anthropic(p)) => Box::new(anthropic::FromOpenAI::new(p)),
		(RouteType::Completions, AIProvider::Bedrock(p)) => Box::new(bedrock::FromOpenAI::new(p)),
		(RouteType::Completions, AIProvider::GcpAnthropic(p)) => {
			Box::new(gcp_anthropic::FromOpenAI::new(p))
		},
		(RouteType::Completions, AIProvider::Vertex(p)) => Box::new(gemini::FromOpenAI::new(p)),
		(RouteType::Messages, AIProvider::Anthropic(p)) => Box::new(messages::Passthrough::new(p)),
		(RouteType::Messages, AIProvider::Bedrock(p)) => Box::new(messages::ToBedrock::new(p)),
		(RouteType::Embeddings, AIProvider::OpenAI(p)) => Box::new(embeddings::Passthrough::new(p)),
		(RouteType::Rerank, AIProvider::Cohere(p)) => Box::new(rerank::Passthrough::new(p)),
		(route, p) => {
			return Err(AIError::UnsupportedConversion(strng::format!(
				"{route:?} to provider {}",
				p.provider()
			)));
		},
	})
}

/// wrap_upstream_error converts a non-2xx provider body into the canonical
/// error envelope, rewriting content-type and content-length to match.
pub fn wrap_upstream_error(headers: &Headers, body: &Bytes) -> ResponseTransform {
	let status = headers.status().unwrap_or("500");
	let message = String::from_utf8_lossy(body).into_owned();
	let envelope = types::ErrorEnvelope::upstream(status, message);
	let body = serde_json::to_vec(&envelope).expect("error envelope is always serializable");
	let mut out = ResponseTransform::default();
	out.headers.set(HEADER_CONTENT_TYPE, CONTENT_TYPE_JSON);
	out.set_body(body);
	out
}

/// sse_rewrite_needed reports whether the upstream content type requires the
/// streaming rewrite to text/event-stream. An upstream that already speaks
/// SSE is left untouched, even when the translator re-emits a different
/// event schema.
pub fn sse_rewrite_needed(headers: &Headers) -> bool {
	!matches!(headers.content_type(), Some(ct) if ct.starts_with(CONTENT_TYPE_EVENT_STREAM))
}

pub(crate) fn encode_chunk(
	resp: &types::completions::typed::StreamResponse,
	out: &mut Vec<u8>,
) -> Result<(), AIError> {
	let json = serde_json::to_vec(resp).map_err(AIError::ResponseMarshal)?;
	crate::parse::sse::encode_data(&json, out);
	Ok(())
}
