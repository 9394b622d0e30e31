//! OpenAI Chat Completions ↔ Anthropic on GCP Vertex.
//!
//! Same body handling as Bedrock (model in the path, `anthropic_version`
//! pinned to the Vertex tag) but the upstream already frames streaming
//! responses as SSE.

use super::anthropic::State;
use super::{HeaderMutation, Headers, RequestTransform, ResponseTransform, Translator};
use crate::llm::types::completions;
use crate::llm::usage::UsageMode;
use crate::llm::{AIError, gcp_anthropic};
use crate::*;

pub struct FromOpenAI {
	provider: gcp_anthropic::Provider,
	state: State,
}

impl FromOpenAI {
	pub fn new(provider: &gcp_anthropic::Provider) -> Self {
		FromOpenAI {
			provider: provider.clone(),
			state: State::default(),
		}
	}
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
		let body = super::bedrock::prepare_body(body, gcp_anthropic::ANTHROPIC_VERSION)?;
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
		// Model virtualization is deterministic on Vertex; the request model
		// is authoritative.
		self.state.response_body(chunk, end_of_stream, true)
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
