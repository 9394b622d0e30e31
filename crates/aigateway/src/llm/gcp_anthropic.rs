use crate::*;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Provider {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub model: Option<Strng>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub region: Option<Strng>,
	pub project_id: Strng,
}

impl super::Provider for Provider {
	const NAME: Strng = strng::literal!("gcp.anthropic");
}

/// The version tag Anthropic-on-Vertex requires in the request body in place
/// of the model field.
pub const ANTHROPIC_VERSION: &str = "vertex-2023-10-16";

impl Provider {
	fn location(&self) -> Strng {
		self
			.region
			.clone()
			.unwrap_or_else(|| strng::literal!("global"))
	}

	pub fn get_path(&self, model: &str, streaming: bool) -> Strng {
		let model = self.model.as_deref().unwrap_or(model);
		strng::format!(
			"/v1/projects/{}/locations/{}/publishers/anthropic/models/{}:{}",
			self.project_id,
			self.location(),
			model,
			if streaming {
				"streamRawPredict"
			} else {
				"rawPredict"
			}
		)
	}

	pub fn get_host(&self) -> Strng {
		match &self.region {
			None => strng::literal!("aiplatform.googleapis.com"),
			Some(region) => strng::format!("{region}-aiplatform.googleapis.com"),
		}
	}
}
