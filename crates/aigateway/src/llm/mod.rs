use crate::*;

pub mod anthropic;
pub mod bedrock;
pub mod cohere;
pub mod gcp_anthropic;
pub mod openai;
pub mod vertex;

pub mod translator;
pub mod types;
pub mod usage;

/// RouteType identifies the canonical client schema a request arrived in,
/// derived from the route the data plane matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RouteType {
	/// OpenAI /v1/chat/completions
	Completions,
	/// OpenAI /v1/embeddings
	Embeddings,
	/// Cohere /v2/rerank
	Rerank,
	/// Anthropic /v1/messages
	Messages,
}

impl RouteType {
	/// from_path maps a request path onto the canonical schema it carries.
	pub fn from_path(path: &str) -> Option<RouteType> {
		let path = path.split('?').next().unwrap_or(path);
		if path.ends_with("/v1/chat/completions") {
			Some(RouteType::Completions)
		} else if path.ends_with("/v1/embeddings") {
			Some(RouteType::Embeddings)
		} else if path.ends_with("/v2/rerank") {
			Some(RouteType::Rerank)
		} else if path.ends_with("/v1/messages") {
			Some(RouteType::Messages)
		} else {
			None
		}
	}
}

/// AIProvider names the upstream schema a backend speaks, plus the
/// provider-specific knobs needed to address it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AIProvider {
	#[serde(rename = "openai")]
	OpenAI(openai::Provider),
	Anthropic(anthropic::Provider),
	Bedrock(bedrock::Provider),
	GcpAnthropic(gcp_anthropic::Provider),
	Vertex(vertex::Provider),
	Cohere(cohere::Provider),
}

trait Provider {
	const NAME: Strng;
}

impl AIProvider {
	pub fn provider(&self) -> Strng {
		match self {
			AIProvider::OpenAI(_) => openai::Provider::NAME,
			AIProvider::Anthropic(_) => anthropic::Provider::NAME,
			AIProvider::Bedrock(_) => bedrock::Provider::NAME,
			AIProvider::GcpAnthropic(_) => gcp_anthropic::Provider::NAME,
			AIProvider::Vertex(_) => vertex::Provider::NAME,
			AIProvider::Cohere(_) => cohere::Provider::NAME,
		}
	}

}

/// LLMTokenUsage is the uniform per-request accounting record extracted from
/// provider responses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LLMTokenUsage {
	pub input_tokens: u32,
	pub output_tokens: u32,
	pub total_tokens: u32,
	pub cached_input_tokens: u32,
}

impl LLMTokenUsage {
	pub fn from_totals(input: u32, output: u32) -> Self {
		LLMTokenUsage {
			input_tokens: input,
			output_tokens: output,
			total_tokens: input + output,
			cached_input_tokens: 0,
		}
	}

	pub fn with_cached(mut self, cached: u32) -> Self {
		self.cached_input_tokens = cached;
		self
	}
}

#[derive(thiserror::Error, Debug)]
pub enum AIError {
	/// The canonical request cannot be parsed. Surfaced to the client as 4xx.
	#[error("failed to parse request: {0}")]
	RequestSchema(serde_json::Error),
	/// The canonical request violates a constraint. Surfaced as 4xx.
	#[error("invalid request: {0}")]
	RequestConstraint(Strng),
	#[error("missing field: {0}")]
	MissingField(Strng),
	/// A canonical field cannot be mapped to the provider schema or back.
	/// Surfaced as 502.
	#[error("translation failed: {0}")]
	Translation(Strng),
	/// A streaming frame is malformed beyond recovery.
	#[error("malformed upstream frame: {0}")]
	UpstreamFraming(Strng),
	#[error("unsupported conversion: {0}")]
	UnsupportedConversion(Strng),
	#[error("failed to marshal request: {0}")]
	RequestMarshal(serde_json::Error),
	#[error("failed to parse response: {0}")]
	ResponseParsing(serde_json::Error),
	#[error("failed to marshal response: {0}")]
	ResponseMarshal(serde_json::Error),
}

impl AIError {
	/// client_error reports whether the failure is the client's fault (4xx)
	/// rather than a gateway/upstream translation failure (502).
	pub fn client_error(&self) -> bool {
		matches!(
			self,
			AIError::RequestSchema(_) | AIError::RequestConstraint(_) | AIError::MissingField(_)
		)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn route_type_from_path() {
		assert_eq!(
			RouteType::from_path("/v1/chat/completions"),
			Some(RouteType::Completions)
		);
		assert_eq!(
			RouteType::from_path("/openai/v1/chat/completions"),
			Some(RouteType::Completions)
		);
		assert_eq!(
			RouteType::from_path("/v1/embeddings"),
			Some(RouteType::Embeddings)
		);
		assert_eq!(RouteType::from_path("/v2/rerank"), Some(RouteType::Rerank));
		assert_eq!(
			RouteType::from_path("/v1/messages?beta=true"),
			Some(RouteType::Messages)
		);
		assert_eq!(RouteType::from_path("/v1/models"), None);
	}
}
