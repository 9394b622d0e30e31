//! Per-backend filter configuration.
//!
//! The route rules stamp the selected backend name onto the request as the
//! `x-ai-eg-backend` header; the ext_proc server looks the backend up here to
//! decide which translator family and credentials to apply.

use std::collections::HashMap;

use crate::llm::AIProvider;
use crate::serdes::yamlviajson;
use crate::*;

/// The request header carrying the selected backend name.
pub const SELECTED_BACKEND_HEADER: &str = "x-ai-eg-backend";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Config {
	#[serde(default)]
	pub backends: Vec<Backend>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Backend {
	pub name: Strng,
	/// The provider schema this backend speaks.
	pub schema: AIProvider,
	/// Auth material injected into the upstream request.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub auth: Option<BackendAuth>,
	/// Always return a concrete body from the request translation, even when
	/// no mutation is needed. Required for data-plane retries.
	#[serde(default)]
	pub force_request_body_mutation: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub enum BackendAuth {
	/// A static API key placed in a header (x-api-key, authorization, ...).
	ApiKey { header: Strng, prefix: Option<String>, key: Strng },
}

impl BackendAuth {
	pub fn header_value(&self) -> (Strng, String) {
		match self {
			BackendAuth::ApiKey { header, prefix, key } => {
				let value = match prefix {
					Some(p) => format!("{p}{key}"),
					None => key.to_string(),
				};
				(header.clone(), value)
			},
		}
	}
}

/// An immutable snapshot of the filter configuration, indexed by backend
/// name. Rebuilt wholesale on config change.
#[derive(Debug, Default)]
pub struct ConfigSnapshot {
	backends: HashMap<Strng, Arc<Backend>>,
}

impl ConfigSnapshot {
	pub fn new(config: Config) -> Self {
		ConfigSnapshot {
			backends: config
				.backends
				.into_iter()
				.map(|b| (b.name.clone(), Arc::new(b)))
				.collect(),
		}
	}

	pub fn backend(&self, name: &str) -> Option<Arc<Backend>> {
		self.backends.get(name).cloned()
	}

	pub fn is_empty(&self) -> bool {
		self.backends.is_empty()
	}
}

pub fn parse_config(contents: &str) -> anyhow::Result<Config> {
	yamlviajson::from_str(contents)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parse_backend_config() {
		let cfg = parse_config(
			r#"
backends:
- name: openai
  schema:
    openai: {}
  auth:
    apiKey:
      header: authorization
      prefix: "Bearer "
      key: sk-test
- name: bedrock
  schema:
    bedrock:
      region: us-east-1
  forceRequestBodyMutation: true
"#,
		)
		.unwrap();
		let snap = ConfigSnapshot::new(cfg);
		let openai = snap.backend("openai").unwrap();
		let (header, value) = openai.auth.as_ref().unwrap().header_value();
		assert_eq!(header, "authorization");
		assert_eq!(value, "Bearer sk-test");
		let bedrock = snap.backend("bedrock").unwrap();
		assert!(bedrock.force_request_body_mutation);
		assert!(snap.backend("missing").is_none());
	}
}
