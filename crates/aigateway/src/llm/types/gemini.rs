use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The Gapic-shaped GenerateContent request for Gemini on Vertex.
#[derive(Debug, Deserialize, Clone, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest {
	pub contents: Vec<Content>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub system_instruction: Option<Content>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub generation_config: Option<GenerationConfig>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub tools: Option<Vec<Tool>>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub tool_config: Option<ToolConfig>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub safety_settings: Option<Value>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub labels: Option<Value>,
}

#[derive(Debug, Deserialize, Clone, Serialize, Default)]
pub struct Content {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub role: Option<String>,
	pub parts: Vec<Part>,
}

#[derive(Debug, Deserialize, Clone, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Part {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub text: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub inline_data: Option<Blob>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub file_data: Option<FileData>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub function_call: Option<FunctionCall>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub function_response: Option<FunctionResponse>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub thought: Option<bool>,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
	pub mime_type: String,
	pub data: String,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileData {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub mime_type: Option<String>,
	pub file_uri: String,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct FunctionCall {
	pub name: String,
	#[serde(default)]
	pub args: Value,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct FunctionResponse {
	pub name: String,
	pub response: Value,
}

#[derive(Debug, Deserialize, Clone, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub temperature: Option<f64>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub top_p: Option<f64>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub max_output_tokens: Option<u64>,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub stop_sequences: Vec<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub candidate_count: Option<u32>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub response_mime_type: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub response_schema: Option<Schema>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub thinking_config: Option<Value>,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct Tool {
	#[serde(rename = "functionDeclarations")]
	pub function_declarations: Vec<FunctionDeclaration>,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct FunctionDeclaration {
	pub name: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub description: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub parameters: Option<Schema>,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolConfig {
	pub function_calling_config: FunctionCallingConfig,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionCallingConfig {
	pub mode: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub allowed_function_names: Option<Vec<String>>,
}

/// The Gapic Schema shape for function declarations and response schemas.
/// JSON-schema inputs are dereferenced and converted into this form.
#[derive(Debug, Deserialize, Clone, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Schema {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub r#type: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub format: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub description: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub nullable: Option<bool>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub r#enum: Option<Vec<String>>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub items: Option<Box<Schema>>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub properties: Option<IndexMap<String, Schema>>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub required: Option<Vec<String>>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub pattern: Option<String>,
}

/// GenerateContentResponse, streaming and not.
#[derive(Debug, Deserialize, Clone, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentResponse {
	#[serde(default)]
	pub candidates: Vec<Candidate>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub usage_metadata: Option<UsageMetadata>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub model_version: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub response_id: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub content: Option<Content>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub finish_reason: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub index: Option<u32>,
}

#[derive(Debug, Deserialize, Clone, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct UsageMetadata {
	#[serde(default)]
	pub prompt_token_count: u32,
	#[serde(default)]
	pub candidates_token_count: u32,
	#[serde(default)]
	pub total_token_count: u32,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub cached_content_token_count: Option<u32>,
}

/// Vertex error body.
#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct ErrorResponse {
	pub error: ErrorDetail,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct ErrorDetail {
	#[serde(default)]
	pub code: i32,
	#[serde(default)]
	pub message: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub status: Option<String>,
}
