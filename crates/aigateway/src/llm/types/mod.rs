pub mod completions;
pub mod embeddings;
pub mod gemini;
pub mod messages;
pub mod rerank;

use serde::{Deserialize, Serialize};

/// The canonical error envelope returned to clients when an upstream
/// provider fails. Non-JSON upstream bodies are wrapped verbatim into
/// `message`.
#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct ErrorEnvelope {
	pub r#type: String,
	pub error: ErrorBody,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct ErrorBody {
	pub r#type: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub code: Option<String>,
	pub message: String,
}

impl ErrorEnvelope {
	pub fn upstream(status: &str, message: impl Into<String>) -> Self {
		ErrorEnvelope {
			r#type: "error".to_string(),
			error: ErrorBody {
				r#type: "upstream_backend_error".to_string(),
				code: Some(status.to_string()),
				message: message.into(),
			},
		}
	}
}
