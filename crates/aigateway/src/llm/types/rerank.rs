use serde::{Deserialize, Serialize};

/// The Cohere Rerank v2 request.
#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct Request {
	pub model: Option<String>,
	pub query: String,
	pub documents: Vec<serde_json::Value>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub top_n: Option<u32>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub max_tokens_per_doc: Option<u32>,

	#[serde(flatten, default)]
	pub rest: serde_json::Value,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct Response {
	pub results: Vec<Result>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub id: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub meta: Option<Meta>,
	#[serde(flatten, default)]
	pub rest: serde_json::Value,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct Result {
	pub index: u32,
	pub relevance_score: f64,
	#[serde(flatten, default)]
	pub rest: serde_json::Value,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct Meta {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub billed_units: Option<BilledUnits>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub tokens: Option<Tokens>,
	#[serde(flatten, default)]
	pub rest: serde_json::Value,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct BilledUnits {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub input_tokens: Option<u32>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub output_tokens: Option<u32>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub search_units: Option<u32>,
	#[serde(flatten, default)]
	pub rest: serde_json::Value,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct Tokens {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub input_tokens: Option<u32>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub output_tokens: Option<u32>,
	#[serde(flatten, default)]
	pub rest: serde_json::Value,
}
