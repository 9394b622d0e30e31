use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};

use crate::*;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Provider {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub model: Option<Strng>,
	/// Required: AWS region
	pub region: Strng,
}

impl super::Provider for Provider {
	const NAME: Strng = strng::literal!("aws.bedrock");
}

/// The version tag Bedrock requires in the request body in place of the
/// model field.
pub const ANTHROPIC_VERSION: &str = "bedrock-2023-05-31";

// RFC 3986 unreserved characters stay literal; everything else (notably the
// ':' in versioned model ids) is percent-escaped.
const MODEL_ESCAPE: percent_encoding::AsciiSet = NON_ALPHANUMERIC
	.remove(b'-')
	.remove(b'.')
	.remove(b'_')
	.remove(b'~');

pub fn escape_model(model: &str) -> String {
	utf8_percent_encode(model, &MODEL_ESCAPE).to_string()
}

impl Provider {
	pub fn get_path(&self, model: &str, streaming: bool) -> Strng {
		let model = self.model.as_deref().unwrap_or(model);
		let escaped = escape_model(model);
		if streaming {
			strng::format!("/model/{escaped}/invoke-stream")
		} else {
			strng::format!("/model/{escaped}/invoke")
		}
	}

	pub fn get_host(&self) -> Strng {
		strng::format!("bedrock-runtime.{}.amazonaws.com", self.region)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn model_id_escaping() {
		assert_eq!(
			escape_model("anthropic.claude-3-5-sonnet-20241022-v2:0"),
			"anthropic.claude-3-5-sonnet-20241022-v2%3A0"
		);
	}

	#[test]
	fn path_for_model() {
		let p = Provider {
			model: None,
			region: strng::new("us-east-1"),
		};
		assert_eq!(
			p.get_path("anthropic.claude-3-5-sonnet-20241022-v2:0", false),
			"/model/anthropic.claude-3-5-sonnet-20241022-v2%3A0/invoke"
		);
		assert_eq!(
			p.get_path("anthropic.claude-3-5-sonnet-20241022-v2:0", true),
			"/model/anthropic.claude-3-5-sonnet-20241022-v2%3A0/invoke-stream"
		);
		assert_eq!(p.get_host(), "bedrock-runtime.us-east-1.amazonaws.com");
	}
}
