use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct Request {
	pub model: Option<String>,
	pub input: serde_json::Value,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub user: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub encoding_format: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub dimensions: Option<u32>,

	// Everything else - passthrough
	#[serde(flatten, default)]
	pub rest: serde_json::Value,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct Response {
	pub object: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub model: Option<String>,
	pub data: Vec<Embedding>,
	pub usage: Usage,
	#[serde(flatten, default)]
	pub rest: serde_json::Value,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct Embedding {
	pub index: u32,
	pub object: String,
	pub embedding: serde_json::Value,
	#[serde(flatten, default)]
	pub rest: serde_json::Value,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct Usage {
	#[serde(default)]
	pub prompt_tokens: u32,
	#[serde(default)]
	pub total_tokens: u32,
	#[serde(flatten, default)]
	pub rest: serde_json::Value,
}
