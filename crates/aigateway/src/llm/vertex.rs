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
	const NAME: Strng = strng::literal!("gcp.vertex_ai");
}

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
			"/v1/projects/{}/locations/{}/publishers/google/models/{}:{}",
			self.project_id,
			self.location(),
			model,
			if streaming {
				"streamGenerateContent?alt=sse"
			} else {
				"generateContent"
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
