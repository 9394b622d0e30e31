use serde::{Deserialize, Serialize};

/// The native Anthropic Messages request, treated as semi-opaque: only the
/// fields needed for observability, streaming detection and model override
/// are typed, the remainder passes through untouched.
#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct Request {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub model: Option<String>,
	pub messages: Vec<RequestMessage>,

	#[serde(skip_serializing_if = "Option::is_none")]
	pub system: Option<RequestContent>,

	#[serde(skip_serializing_if = "Option::is_none")]
	pub top_p: Option<f64>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub temperature: Option<f64>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub stream: Option<bool>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub max_tokens: Option<u64>,

	#[serde(flatten, default)]
	pub rest: serde_json::Value,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct RequestMessage {
	pub role: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub content: Option<RequestContent>,
	#[serde(flatten, default)]
	pub rest: serde_json::Value,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
#[serde(untagged)]
pub enum RequestContent {
	Text(String),
	Array(Vec<ContentPart>),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ContentPart {
	pub r#type: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub text: Option<String>,
	#[serde(flatten, default)]
	pub rest: serde_json::Value,
}

// 'typed' provides the strictly-typed Messages schema used when translating
// to or from other provider schemas.
pub mod typed {
	use serde::{Deserialize, Deserializer, Serialize};
	use serde_json::Value;

	use crate::serdes::is_default;

	#[derive(Copy, Clone, Deserialize, Serialize, Debug, PartialEq, Eq, Default)]
	#[serde(rename_all = "snake_case")]
	pub enum Role {
		#[default]
		User,
		Assistant,
	}

	#[derive(Clone, Deserialize, Serialize, Debug)]
	#[serde(rename_all = "snake_case")]
	pub struct ContentTextBlock {
		pub text: String,
	}

	#[derive(Clone, Deserialize, Serialize, Debug)]
	#[serde(rename_all = "snake_case", tag = "type")]
	pub enum ContentBlock {
		Text(ContentTextBlock),
		Image {
			source: Value,
		},
		Thinking {
			thinking: String,
			signature: String,
		},
		RedactedThinking {
			data: String,
		},
		/// Tool use content
		ToolUse {
			id: String,
			name: String,
			input: serde_json::Value,
		},
		/// Tool result content
		ToolResult {
			tool_use_id: String,
			content: ToolResultContent,
			#[serde(skip_serializing_if = "Option::is_none")]
			is_error: Option<bool>,
		},
		// There are LOTs of possible values; since we don't support them all, just allow them without failing
		#[serde(other)]
		Unknown,
	}

	#[derive(Debug, Serialize, Deserialize, Clone)]
	#[serde(untagged)]
	pub enum ToolResultContent {
		/// The text contents of the tool message.
		Text(String),
		/// An array of content parts with a defined type.
		Array(Vec<ToolResultContentPart>),
	}

	#[derive(Debug, Serialize, Deserialize, Clone)]
	#[serde(tag = "type", rename_all = "snake_case")]
	pub enum ToolResultContentPart {
		Text { text: String },
		Image { source: Value },
	}

	#[derive(Clone, Deserialize, Serialize, Debug)]
	#[serde(rename_all = "snake_case")]
	pub struct Message {
		pub role: Role,
		#[serde(deserialize_with = "deserialize_content")]
		pub content: Vec<ContentBlock>,
	}

	// Custom deserializer that handles both string and array formats
	fn deserialize_content<'de, D>(deserializer: D) -> Result<Vec<ContentBlock>, D::Error>
	where
		D: Deserializer<'de>,
	{
		use serde::de::Error;
		use serde_json::Value;

		let value = Value::deserialize(deserializer)?;

		match value {
			// If it's a string, wrap it in a Text content block
			Value::String(text) => Ok(vec![ContentBlock::Text(ContentTextBlock { text })]),
			// If it's an array, deserialize normally
			Value::Array(_) => Vec::<ContentBlock>::deserialize(value).map_err(D::Error::custom),
			// Reject other types
			_ => Err(D::Error::custom(
				"content must be either a string or an array",
			)),
		}
	}

	/// System prompt format - can be either a simple string or an array of content blocks
	#[derive(Clone, Debug, Serialize, Deserialize)]
	#[serde(untagged)]
	pub enum SystemPrompt {
		Text(String),
		Blocks(Vec<SystemContentBlock>),
	}

	#[derive(Clone, Debug, Serialize, Deserialize)]
	#[serde(tag = "type", rename_all = "snake_case")]
	pub enum SystemContentBlock {
		Text { text: String },
	}

	#[derive(Deserialize, Serialize, Default, Debug)]
	pub struct Request {
		/// The User/Assistant prompts.
		pub messages: Vec<Message>,
		/// The System prompt - can be a string or array of content blocks
		#[serde(skip_serializing_if = "Option::is_none")]
		pub system: Option<SystemPrompt>,
		/// The model to use.
		pub model: String,
		/// The maximum number of tokens to generate before stopping.
		pub max_tokens: u64,
		/// The stop sequences to use.
		#[serde(default, skip_serializing_if = "Vec::is_empty")]
		pub stop_sequences: Vec<String>,
		/// Whether to incrementally stream the response.
		#[serde(default, skip_serializing_if = "is_default")]
		pub stream: bool,
		#[serde(skip_serializing_if = "Option::is_none")]
		pub temperature: Option<f64>,
		/// Use nucleus sampling.
		#[serde(skip_serializing_if = "Option::is_none")]
		pub top_p: Option<f64>,
		/// Tools that the model may use
		#[serde(skip_serializing_if = "Option::is_none")]
		pub tools: Option<Vec<Tool>>,
		/// How the model should use tools
		#[serde(skip_serializing_if = "Option::is_none")]
		pub tool_choice: Option<ToolChoice>,
		/// Request metadata
		#[serde(skip_serializing_if = "Option::is_none")]
		pub metadata: Option<Metadata>,
	}

	/// Response body for the Messages API.
	#[derive(Debug, Serialize, Deserialize, Clone)]
	pub struct MessagesResponse {
		/// Unique object identifier.
		pub id: String,
		/// Object type. For Messages, this is always "message".
		pub r#type: String,
		/// Conversational role of the generated message. Always "assistant".
		pub role: Role,
		/// Content generated by the model, as an ordered list of blocks.
		pub content: Vec<ContentBlock>,
		/// The model that handled the request.
		pub model: String,
		/// In non-streaming mode this value is always non-null. In streaming
		/// mode, it is null in the message_start event and non-null otherwise.
		/// Kept as the raw provider string; mapping to a finish reason goes
		/// through a fixed table that rejects unknown values.
		#[serde(default)]
		pub stop_reason: Option<String>,
		/// Which custom stop sequence was generated, if any.
		#[serde(default)]
		pub stop_sequence: Option<String>,
		/// Billing and rate-limit usage.
		pub usage: Usage,
	}

	#[derive(Clone, Serialize, Deserialize, Debug)]
	#[serde(rename_all = "snake_case", tag = "type")]
	pub enum MessagesStreamEvent {
		MessageStart {
			message: MessagesResponse,
		},
		ContentBlockStart {
			index: usize,
			content_block: ContentBlock,
		},
		ContentBlockDelta {
			index: usize,
			delta: ContentBlockDelta,
		},
		ContentBlockStop {
			index: usize,
		},
		MessageDelta {
			delta: MessageDelta,
			usage: MessageDeltaUsage,
		},
		MessageStop,
		Ping,
		Error {
			error: Value,
		},
		// Unknown event kinds are forwarded as no-ops, never an error.
		#[serde(other)]
		Unknown,
	}

	impl MessagesStreamEvent {
		/// Get the SSE event name for this event type
		pub fn event_name(&self) -> &'static str {
			match self {
				Self::MessageStart { .. } => "message_start",
				Self::ContentBlockStart { .. } => "content_block_start",
				Self::ContentBlockDelta { .. } => "content_block_delta",
				Self::ContentBlockStop { .. } => "content_block_stop",
				Self::MessageDelta { .. } => "message_delta",
				Self::MessageStop => "message_stop",
				Self::Ping => "ping",
				Self::Error { .. } => "error",
				Self::Unknown => "unknown",
			}
		}
	}

	#[derive(Clone, Serialize, Deserialize, Debug, Eq, PartialEq)]
	#[serde(rename_all = "snake_case", tag = "type")]
	#[allow(clippy::enum_variant_names)]
	pub enum ContentBlockDelta {
		TextDelta {
			text: String,
		},
		InputJsonDelta {
			partial_json: String,
		},
		ThinkingDelta {
			thinking: String,
		},
		SignatureDelta {
			signature: String,
		},
		#[serde(other)]
		Unknown,
	}

	#[derive(Clone, Serialize, Deserialize, Debug, Eq, PartialEq, Default)]
	pub struct MessageDeltaUsage {
		/// Cumulative output tokens
		pub output_tokens: u64,
		/// Cumulative input tokens; only present on some models
		#[serde(skip_serializing_if = "Option::is_none")]
		pub input_tokens: Option<u64>,
		/// Cumulative cache read tokens
		#[serde(skip_serializing_if = "Option::is_none")]
		pub cache_read_input_tokens: Option<u64>,
	}

	#[derive(Clone, Serialize, Deserialize, Debug, Eq, PartialEq, Default)]
	pub struct MessageDelta {
		#[serde(default)]
		pub stop_reason: Option<String>,
		#[serde(default)]
		pub stop_sequence: Option<String>,
	}

	/// Error body for the Messages API.
	#[derive(Debug, Deserialize, Serialize, Clone)]
	pub struct MessagesErrorResponse {
		pub r#type: String,
		pub error: MessagesError,
	}

	#[derive(Debug, Deserialize, Serialize, Clone)]
	pub struct MessagesError {
		pub r#type: String,
		pub message: String,
	}

	/// Billing and rate-limit usage.
	#[derive(Copy, Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
	pub struct Usage {
		/// The number of input tokens which were used.
		#[serde(default)]
		pub input_tokens: u64,

		/// The number of output tokens which were used.
		#[serde(default)]
		pub output_tokens: u64,

		/// The number of input tokens used to create the cache entry.
		#[serde(skip_serializing_if = "Option::is_none")]
		pub cache_creation_input_tokens: Option<u64>,

		/// The number of input tokens read from the cache.
		#[serde(skip_serializing_if = "Option::is_none")]
		pub cache_read_input_tokens: Option<u64>,
	}

	/// Tool definition
	#[derive(Debug, Serialize, Deserialize)]
	pub struct Tool {
		/// Name of the tool
		pub name: String,
		/// Description of the tool
		#[serde(skip_serializing_if = "Option::is_none")]
		pub description: Option<String>,
		/// JSON schema for tool input
		pub input_schema: serde_json::Value,
	}

	/// Tool choice configuration
	#[derive(Debug, Serialize, Deserialize)]
	#[serde(tag = "type")]
	pub enum ToolChoice {
		/// Let model choose whether to use tools
		#[serde(rename = "auto")]
		Auto,
		/// Model must use one of the provided tools
		#[serde(rename = "any")]
		Any,
		/// Model must use a specific tool
		#[serde(rename = "tool")]
		Tool { name: String },
		/// Model must not use any tools
		#[serde(rename = "none")]
		None,
	}

	/// Message metadata
	#[derive(Debug, Serialize, Deserialize, Default)]
	pub struct Metadata {
		/// Custom metadata fields
		#[serde(flatten)]
		pub fields: std::collections::HashMap<String, String>,
	}
}
