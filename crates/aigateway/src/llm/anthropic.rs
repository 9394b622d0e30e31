use crate::*;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Provider {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub model: Option<Strng>,
	/// Value for the anthropic-version header; defaults to the pinned API
	/// version below.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub version: Option<Strng>,
}

impl super::Provider for Provider {
	const NAME: Strng = strng::literal!("anthropic");
}

pub const DEFAULT_HOST_STR: &str = "api.anthropic.com";
pub const DEFAULT_HOST: Strng = strng::literal!(DEFAULT_HOST_STR);
pub const DEFAULT_PATH: &str = "/v1/messages";

// https://docs.anthropic.com/en/api/versioning
pub const DEFAULT_VERSION: &str = "2023-06-01";

impl Provider {
	pub fn version(&self) -> Strng {
		self
			.version
			.clone()
			.unwrap_or_else(|| strng::literal!(DEFAULT_VERSION))
	}
}
