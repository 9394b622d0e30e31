//! OpenAI Embeddings passthrough.

use bytes::BytesMut;
use serde_json::json;

use super::{HeaderMutation, Headers, RequestTransform, ResponseTransform, Translator};
use crate::llm::types::embeddings;
use crate::llm::{AIError, LLMTokenUsage, RouteType, openai};
use crate::*;

pub struct Passthrough {
	provider: openai::Provider,
	request_model: Strng,
	buffered: BytesMut,
}

impl Passthrough {
	pub fn new(provider: &openai::Provider) -> Self {
		Passthrough {
			provider: provider.clone(),
			request_model: strng::EMPTY,
			buffered: BytesMut::new(),
		}
	}
}

impl Translator for Passthrough {
	fn request_body(&mut self, raw: &Bytes, force_mutation: bool) -> Result<RequestTransform, AIError> {
		let req: embeddings::Request =
			serde_json::from_slice(raw).map_err(AIError::RequestSchema)?;
		self.request_model = match (&self.provider.model, &req.model) {
			(Some(m), _) => m.clone(),
			(None, Some(m)) => strng::new(m),
			(None, None) => return Err(AIError::MissingField(strng::literal!("model"))),
		};
		let mut out = RequestTransform::default();
		out.set_path(openai::path(RouteType::Embeddings));
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
		// Embeddings never stream.
		self.buffered.extend_from_slice(chunk);
		if !end_of_stream {
			return Ok(ResponseTransform::default());
		}
		let resp: embeddings::Response =
			serde_json::from_slice(&self.buffered).map_err(AIError::ResponseParsing)?;
		let usage = LLMTokenUsage {
			input_tokens: resp.usage.prompt_tokens,
			output_tokens: 0,
			total_tokens: resp.usage.total_tokens,
			cached_input_tokens: 0,
		};
		let model = resp
			.model
			.as_deref()
			.filter(|m| !m.is_empty())
			.map(strng::new)
			.unwrap_or_else(|| self.request_model.clone());
		Ok(ResponseTransform {
			headers: HeaderMutation::default(),
			body: None,
			usage: Some(usage),
			model: Some(model),
		})
	}

	fn streaming(&self) -> bool {
		false
	}

	fn request_model(&self) -> Strng {
		self.request_model.clone()
	}
}
