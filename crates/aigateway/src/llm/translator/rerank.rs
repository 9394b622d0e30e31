//! Cohere Rerank v2 passthrough.

use bytes::BytesMut;
use serde_json::json;

use super::{HeaderMutation, Headers, RequestTransform, ResponseTransform, Translator};
use crate::llm::types::rerank;
use crate::llm::{AIError, LLMTokenUsage, cohere};
use crate::*;

pub struct Passthrough {
	provider: cohere::Provider,
	request_model: Strng,
	buffered: BytesMut,
}

impl Passthrough {
	pub fn new(provider: &cohere::Provider) -> Self {
		Passthrough {
			provider: provider.clone(),
			request_model: strng::EMPTY,
			buffered: BytesMut::new(),
		}
	}
}

impl Translator for Passthrough {
	fn request_body(&mut self, raw: &Bytes, force_mutation: bool) -> Result<RequestTransform, AIError> {
		let req: rerank::Request = serde_json::from_slice(raw).map_err(AIError::RequestSchema)?;
		self.request_model = match (&self.provider.model, &req.model) {
			(Some(m), _) => m.clone(),
			(None, Some(m)) => strng::new(m),
			(None, None) => return Err(AIError::MissingField(strng::literal!("model"))),
		};
		let mut out = RequestTransform::default();
		out.set_path(cohere::DEFAULT_PATH);
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
		// Rerank never streams.
		self.buffered.extend_from_slice(chunk);
		if !end_of_stream {
			return Ok(ResponseTransform::default());
		}
		let resp: rerank::Response =
			serde_json::from_slice(&self.buffered).map_err(AIError::ResponseParsing)?;
		let tokens = resp.meta.as_ref().and_then(|m| m.tokens.as_ref());
		let input = tokens.and_then(|t| t.input_tokens).unwrap_or_default();
		let output = tokens.and_then(|t| t.output_tokens).unwrap_or_default();
		Ok(ResponseTransform {
			headers: HeaderMutation::default(),
			body: None,
			usage: Some(LLMTokenUsage::from_totals(input, output)),
			model: Some(self.request_model.clone()),
		})
	}

	fn streaming(&self) -> bool {
		false
	}

	fn request_model(&self) -> Strng {
		self.request_model.clone()
	}
}
