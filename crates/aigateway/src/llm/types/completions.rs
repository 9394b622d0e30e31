use serde::{Deserialize, Serialize};

/// The OpenAI Chat Completions request as the gateway parses it. Only the
/// fields the translators inspect are typed; everything else rides along in
/// `rest` and is preserved on the wire.
#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct Request {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub model: Option<String>,
	pub messages: Vec<RequestMessage>,

	#[serde(skip_serializing_if = "Option::is_none")]
	pub stream: Option<bool>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub stream_options: Option<StreamOptions>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub temperature: Option<f64>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub top_p: Option<f64>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub max_tokens: Option<u64>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub max_completion_tokens: Option<u64>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub stop: Option<Stop>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub n: Option<u32>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub tools: Option<Vec<Tool>>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub tool_choice: Option<ToolChoiceOption>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub parallel_tool_calls: Option<bool>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub user: Option<String>,

	/// vLLM-style guided decoding, mapped onto Gemini response schemas.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub guided_choice: Option<Vec<String>>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub guided_regex: Option<String>,

	#[serde(flatten, default)]
	pub rest: serde_json::Value,
}

impl Request {
	pub fn max_output_tokens(&self) -> Option<u64> {
		self.max_completion_tokens.or(self.max_tokens)
	}

	pub fn stop_sequences(&self) -> Vec<String> {
		match &self.stop {
			Some(Stop::String(s)) => vec![s.clone()],
			Some(Stop::Array(v)) => v.clone(),
			None => Vec::new(),
		}
	}
}

#[derive(Debug, Deserialize, Clone, Serialize)]
#[serde(untagged)]
pub enum Stop {
	String(String),
	Array(Vec<String>),
}

#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct StreamOptions {
	pub include_usage: bool,
	#[serde(flatten, default)]
	pub rest: serde_json::Value,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct RequestMessage {
	pub role: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub content: Option<MessageContent>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub name: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub tool_calls: Option<Vec<MessageToolCall>>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub tool_call_id: Option<String>,
	#[serde(flatten, default)]
	pub rest: serde_json::Value,
}

impl RequestMessage {
	pub fn text(&self) -> Option<String> {
		match self.content.as_ref()? {
			MessageContent::Text(t) => Some(t.clone()),
			MessageContent::Parts(parts) => {
				let texts: Vec<&str> = parts
					.iter()
					.filter(|p| p.r#type == "text")
					.filter_map(|p| p.text.as_deref())
					.collect();
				if texts.is_empty() {
					None
				} else {
					Some(texts.join("\n"))
				}
			},
		}
	}
}

/// Chat message content is either a plain string or an ordered list of typed
/// parts. The distinction is preserved on the wire; a plain string is never
/// silently upgraded to a single-element array.
#[derive(Debug, Deserialize, Clone, Serialize)]
#[serde(untagged)]
pub enum MessageContent {
	Text(String),
	Parts(Vec<ContentPart>),
}

#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct ContentPart {
	pub r#type: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub text: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub image_url: Option<ImageUrl>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub input_audio: Option<InputAudio>,
	#[serde(flatten, default)]
	pub rest: serde_json::Value,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct ImageUrl {
	pub url: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub detail: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct InputAudio {
	pub data: String,
	pub format: String,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct MessageToolCall {
	pub id: String,
	pub r#type: String,
	pub function: FunctionCall,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct FunctionCall {
	pub name: String,
	pub arguments: String,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Tool {
	Function { function: FunctionObject },
}

#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct FunctionObject {
	pub name: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub description: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub parameters: Option<serde_json::Value>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub strict: Option<bool>,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
#[serde(untagged)]
pub enum ToolChoiceOption {
	Mode(ToolChoiceMode),
	Named(NamedToolChoice),
}

#[derive(Debug, Deserialize, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ToolChoiceMode {
	None,
	Auto,
	Required,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct NamedToolChoice {
	pub r#type: String,
	pub function: FunctionName,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct FunctionName {
	pub name: String,
}

/// The non-streaming Chat Completions response. Loosely typed so provider
/// extras survive passthrough; `usage` and `model` are what the gateway
/// actually reads.
#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct Response {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub model: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub usage: Option<Usage>,
	#[serde(flatten, default)]
	pub rest: serde_json::Value,
}

#[derive(Debug, Deserialize, Clone, Default, Serialize)]
pub struct Usage {
	#[serde(default)]
	pub prompt_tokens: u32,
	#[serde(default)]
	pub completion_tokens: u32,
	#[serde(default)]
	pub total_tokens: u32,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub prompt_tokens_details: Option<PromptTokensDetails>,
	#[serde(flatten, default)]
	pub rest: serde_json::Value,
}

#[derive(Debug, Deserialize, Clone, Default, Serialize)]
pub struct PromptTokensDetails {
	#[serde(default)]
	pub cached_tokens: u32,
	#[serde(flatten, default)]
	pub rest: serde_json::Value,
}

// 'typed' provides the strictly-typed structures the gateway itself emits
// when translating a provider response into the Chat Completions schema.
pub mod typed {
	use serde::{Deserialize, Serialize};

	pub use super::{FunctionCall, PromptTokensDetails, Usage};

	#[derive(Debug, Deserialize, Clone, Copy, Serialize, PartialEq, Eq)]
	#[serde(rename_all = "snake_case")]
	pub enum Role {
		System,
		Developer,
		User,
		Assistant,
		Tool,
	}

	#[derive(Debug, Deserialize, Clone, Copy, Serialize, PartialEq, Eq)]
	#[serde(rename_all = "snake_case")]
	pub enum FinishReason {
		Stop,
		Length,
		ToolCalls,
		ContentFilter,
	}

	#[derive(Debug, Deserialize, Clone, Serialize)]
	pub struct Response {
		pub id: String,
		pub object: String,
		pub created: u32,
		pub model: String,
		pub choices: Vec<ChatChoice>,
		#[serde(skip_serializing_if = "Option::is_none")]
		pub usage: Option<Usage>,
	}

	#[derive(Debug, Deserialize, Clone, Serialize)]
	pub struct ChatChoice {
		pub index: u32,
		pub message: ResponseMessage,
		#[serde(skip_serializing_if = "Option::is_none")]
		pub finish_reason: Option<FinishReason>,
	}

	#[derive(Debug, Deserialize, Clone, Serialize)]
	pub struct ResponseMessage {
		pub role: Role,
		#[serde(skip_serializing_if = "Option::is_none")]
		pub content: Option<String>,
		#[serde(skip_serializing_if = "Option::is_none")]
		pub tool_calls: Option<Vec<MessageToolCall>>,
		#[serde(skip_serializing_if = "Option::is_none")]
		pub reasoning_content: Option<String>,
	}

	#[derive(Debug, Deserialize, Clone, Serialize)]
	pub struct MessageToolCall {
		pub id: String,
		pub r#type: String,
		pub function: FunctionCall,
	}

	#[derive(Debug, Deserialize, Clone, Serialize)]
	pub struct StreamResponse {
		pub id: String,
		pub object: String,
		pub created: u32,
		pub model: String,
		pub choices: Vec<ChatChoiceStream>,
		#[serde(skip_serializing_if = "Option::is_none")]
		pub usage: Option<Usage>,
	}

	#[derive(Debug, Deserialize, Clone, Serialize)]
	pub struct ChatChoiceStream {
		pub index: u32,
		pub delta: StreamResponseDelta,
		#[serde(skip_serializing_if = "Option::is_none")]
		pub finish_reason: Option<FinishReason>,
	}

	#[derive(Debug, Deserialize, Clone, Default, Serialize)]
	pub struct StreamResponseDelta {
		#[serde(skip_serializing_if = "Option::is_none")]
		pub role: Option<Role>,
		#[serde(skip_serializing_if = "Option::is_none")]
		pub content: Option<String>,
		#[serde(skip_serializing_if = "Option::is_none")]
		pub reasoning_content: Option<String>,
		#[serde(skip_serializing_if = "Option::is_none")]
		pub tool_calls: Option<Vec<ToolCallChunk>>,
	}

	#[derive(Debug, Deserialize, Clone, Serialize)]
	pub struct ToolCallChunk {
		pub index: u32,
		#[serde(skip_serializing_if = "Option::is_none")]
		pub id: Option<String>,
		#[serde(skip_serializing_if = "Option::is_none")]
		pub r#type: Option<String>,
		#[serde(skip_serializing_if = "Option::is_none")]
		pub function: Option<FunctionCallChunk>,
	}

	#[derive(Debug, Deserialize, Clone, Default, Serialize)]
	pub struct FunctionCallChunk {
		#[serde(skip_serializing_if = "Option::is_none")]
		pub name: Option<String>,
		#[serde(skip_serializing_if = "Option::is_none")]
		pub arguments: Option<String>,
	}
}
