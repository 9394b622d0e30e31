//! OpenAI Chat Completions ↔ Gemini on Vertex.
//!
//! Requests are rewritten into the Gapic shape (`contents[].parts[]`,
//! `generation_config`, `tools[].functionDeclarations[]`); tool parameter
//! schemas are dereferenced (with an explicit cycle guard) into the Gapic
//! `Schema` form. Guided choice/regex map onto `responseMimeType` +
//! `responseSchema`.

use std::collections::{HashMap, HashSet};

use bytes::BytesMut;
use indexmap::IndexMap;
use serde_json::Value;
use tokio_util::codec::Decoder;

use super::{
	HeaderMutation, Headers, RequestTransform, ResponseTransform, Translator, encode_chunk,
	sse_rewrite_needed,
};
use crate::llm::types::completions::{self, typed as chat};
use crate::llm::types::gemini;
use crate::llm::usage::UsageMode;
use crate::llm::{AIError, LLMTokenUsage, vertex};
use crate::parse::sse;
use crate::*;

const JSON_SCHEMA_MAX_RECURSION_DEPTH: usize = 32;

pub struct FromOpenAI {
	provider: vertex::Provider,
	stream: bool,
	request_model: Strng,
	buffered: BytesMut,
	decoder: sse::SseDecoder,
	machine: Option<StreamState>,
}

impl FromOpenAI {
	pub fn new(provider: &vertex::Provider) -> Self {
		FromOpenAI {
			provider: provider.clone(),
			stream: false,
			request_model: strng::EMPTY,
			buffered: BytesMut::new(),
			decoder: sse::SseDecoder::new(),
			machine: None,
		}
	}
}

impl Translator for FromOpenAI {
	fn request_body(
		&mut self,
		raw: &Bytes,
		_force_mutation: bool,
	) -> Result<RequestTransform, AIError> {
		let req: completions::Request =
			serde_json::from_slice(raw).map_err(AIError::RequestSchema)?;
		self.stream = req.stream.unwrap_or_default();
		self.request_model = match (&self.provider.model, &req.model) {
			(Some(m), _) => m.clone(),
			(None, Some(m)) => strng::new(m),
			(None, None) => return Err(AIError::MissingField(strng::literal!("model"))),
		};
		let xlated = to_gemini_request(&req)?;
		let mut map: serde_json::Map<String, Value> =
			crate::json::convert(&xlated).map_err(AIError::RequestMarshal)?;
		// The vendor extension bag is forwarded verbatim, taking precedence
		// over translated fields.
		if let Some(Value::Object(bag)) = req.rest.get("vertex") {
			for (k, v) in bag {
				map.insert(k.clone(), v.clone());
			}
		}
		let body = serde_json::to_vec(&map).map_err(AIError::RequestMarshal)?;
		let mut out = RequestTransform::default();
		out.set_path(
			self
				.provider
				.get_path(self.request_model.as_str(), self.stream)
				.to_string(),
		);
		out.set_body(body);
		Ok(out)
	}

	fn response_headers(&mut self, headers: &Headers) -> Result<HeaderMutation, AIError> {
		let mut hm = HeaderMutation::default();
		if self.stream && sse_rewrite_needed(headers) {
			hm.set(
				super::HEADER_CONTENT_TYPE,
				super::CONTENT_TYPE_EVENT_STREAM,
			);
		}
		Ok(hm)
	}

	fn response_body(
		&mut self,
		chunk: &[u8],
		end_of_stream: bool,
	) -> Result<ResponseTransform, AIError> {
		if !self.stream {
			self.buffered.extend_from_slice(chunk);
			if !end_of_stream {
				return Ok(ResponseTransform::default());
			}
			let resp: gemini::GenerateContentResponse =
				serde_json::from_slice(&self.buffered).map_err(AIError::ResponseParsing)?;
			let usage = resp.usage_metadata.as_ref().map(usage_from);
			let model = response_model(&resp, &self.request_model);
			let openai = from_gemini_response(resp, model.as_str())?;
			let body = serde_json::to_vec(&openai).map_err(AIError::ResponseMarshal)?;
			let mut out = ResponseTransform {
				headers: HeaderMutation::default(),
				body: None,
				usage,
				model: Some(model),
			};
			out.set_body(body);
			return Ok(out);
		}

		self.buffered.extend_from_slice(chunk);
		let request_model = self.request_model.clone();
		let machine = self
			.machine
			.get_or_insert_with(|| StreamState::new(request_model));
		let mut body = Vec::new();
		let mut usage = None;
		while let Ok(Some(ev)) = self.decoder.decode(&mut self.buffered) {
			if sse::is_done(&ev.data) {
				continue;
			}
			let resp: gemini::GenerateContentResponse = match serde_json::from_slice(&ev.data) {
				Ok(r) => r,
				Err(e) => {
					debug!("dropping malformed frame: {e}");
					continue;
				},
			};
			if let Some(u) = machine.on_chunk(resp, &mut body)? {
				usage = Some(u);
			}
		}
		if end_of_stream {
			if let Some(u) = machine.finish(&mut body)? {
				usage = Some(u);
			}
			body.extend_from_slice(sse::DONE_FRAME);
		}
		let model = machine.model.clone();
		Ok(ResponseTransform {
			headers: HeaderMutation::default(),
			body: Some(body),
			usage,
			model: Some(model),
		})
	}

	fn streaming(&self) -> bool {
		self.stream
	}

	fn request_model(&self) -> Strng {
		self.request_model.clone()
	}

	// Vertex reports streaming usage as per-chunk increments.
	fn usage_mode(&self) -> UsageMode {
		UsageMode::Additive
	}
}

fn response_model(resp: &gemini::GenerateContentResponse, request_model: &Strng) -> Strng {
	// The echoed versioned model wins when present; virtualization through
	// the path is otherwise deterministic.
	resp
		.model_version
		.as_deref()
		.filter(|m| !m.is_empty())
		.map(strng::new)
		.unwrap_or_else(|| request_model.clone())
}

fn usage_from(u: &gemini::UsageMetadata) -> LLMTokenUsage {
	LLMTokenUsage {
		input_tokens: u.prompt_token_count,
		output_tokens: u.candidates_token_count,
		total_tokens: u.total_token_count,
		cached_input_tokens: u.cached_content_token_count.unwrap_or_default(),
	}
}

fn translate_finish_reason(reason: &str) -> Result<chat::FinishReason, AIError> {
	Ok(match reason {
		"STOP" => chat::FinishReason::Stop,
		"MAX_TOKENS" => chat::FinishReason::Length,
		"SAFETY" | "RECITATION" | "BLOCKLIST" | "PROHIBITED_CONTENT" | "SPII" => {
			chat::FinishReason::ContentFilter
		},
		other => {
			return Err(AIError::Translation(strng::format!(
				"unknown finish reason {other:?}"
			)));
		},
	})
}

/// to_gemini_request rewrites an OpenAI completions request into the Gapic
/// GenerateContent shape.
pub(super) fn to_gemini_request(
	req: &completions::Request,
) -> Result<gemini::GenerateContentRequest, AIError> {
	let mut system_parts: Vec<gemini::Part> = Vec::new();
	let mut contents: Vec<gemini::Content> = Vec::new();
	// Tool results reference the call id; Gemini wants the function name.
	let mut call_names: HashMap<String, String> = HashMap::new();

	for msg in &req.messages {
		match msg.role.as_str() {
			"system" | "developer" => {
				if let Some(text) = msg.text() {
					system_parts.push(gemini::Part {
						text: Some(text),
						..Default::default()
					});
				}
			},
			"assistant" => {
				let mut parts = Vec::new();
				if let Some(text) = msg.text() {
					parts.push(gemini::Part {
						text: Some(text),
						..Default::default()
					});
				}
				for tc in msg.tool_calls.iter().flatten() {
					call_names.insert(tc.id.clone(), tc.function.name.clone());
					let args = serde_json::from_str(&tc.function.arguments)
						.unwrap_or(Value::Object(Default::default()));
					parts.push(gemini::Part {
						function_call: Some(gemini::FunctionCall {
							name: tc.function.name.clone(),
							args,
						}),
						..Default::default()
					});
				}
				if !parts.is_empty() {
					contents.push(gemini::Content {
						role: Some("model".to_string()),
						parts,
					});
				}
			},
			"tool" => {
				let name = msg
					.tool_call_id
					.as_ref()
					.and_then(|id| call_names.get(id).cloned())
					.unwrap_or_default();
				let output = msg.text().unwrap_or_default();
				contents.push(gemini::Content {
					role: Some("user".to_string()),
					parts: vec![gemini::Part {
						function_response: Some(gemini::FunctionResponse {
							name,
							response: serde_json::json!({ "output": output }),
						}),
						..Default::default()
					}],
				});
			},
			_ => {
				let parts = user_parts(msg)?;
				if !parts.is_empty() {
					contents.push(gemini::Content {
						role: Some("user".to_string()),
						parts,
					});
				}
			},
		}
	}

	let tools = match &req.tools {
		Some(tools) if !tools.is_empty() => {
			let decls = tools
				.iter()
				.map(|completions::Tool::Function { function }| {
					let parameters = function
						.parameters
						.as_ref()
						.map(|p| to_gemini_schema(p))
						.transpose()?;
					Ok(gemini::FunctionDeclaration {
						name: function.name.clone(),
						description: function.description.clone(),
						parameters,
					})
				})
				.collect::<Result<Vec<_>, AIError>>()?;
			Some(vec![gemini::Tool {
				function_declarations: decls,
			}])
		},
		_ => None,
	};

	let tool_config = req.tool_choice.as_ref().map(|choice| match choice {
		completions::ToolChoiceOption::Mode(completions::ToolChoiceMode::Auto) => {
			function_calling_config("AUTO", None)
		},
		completions::ToolChoiceOption::Mode(completions::ToolChoiceMode::Required) => {
			function_calling_config("ANY", None)
		},
		completions::ToolChoiceOption::Mode(completions::ToolChoiceMode::None) => {
			function_calling_config("NONE", None)
		},
		completions::ToolChoiceOption::Named(n) => {
			function_calling_config("ANY", Some(vec![n.function.name.clone()]))
		},
	});

	let mut generation_config = gemini::GenerationConfig {
		temperature: req.temperature,
		top_p: req.top_p,
		max_output_tokens: req.max_output_tokens(),
		stop_sequences: req.stop_sequences(),
		candidate_count: req.n,
		..Default::default()
	};
	if let Some(choices) = &req.guided_choice {
		generation_config.response_mime_type = Some("text/x.enum".to_string());
		generation_config.response_schema = Some(gemini::Schema {
			r#type: Some("STRING".to_string()),
			r#enum: Some(choices.clone()),
			..Default::default()
		});
	} else if let Some(regex) = &req.guided_regex {
		generation_config.response_mime_type = Some("text/plain".to_string());
		generation_config.response_schema = Some(gemini::Schema {
			r#type: Some("STRING".to_string()),
			pattern: Some(regex.clone()),
			..Default::default()
		});
	}

	Ok(gemini::GenerateContentRequest {
		contents,
		system_instruction: if system_parts.is_empty() {
			None
		} else {
			Some(gemini::Content {
				role: None,
				parts: system_parts,
			})
		},
		generation_config: Some(generation_config),
		tools,
		tool_config,
		safety_settings: None,
		labels: None,
	})
}

fn function_calling_config(
	mode: &str,
	allowed: Option<Vec<String>>,
) -> gemini::ToolConfig {
	gemini::ToolConfig {
		function_calling_config: gemini::FunctionCallingConfig {
			mode: mode.to_string(),
			allowed_function_names: allowed,
		},
	}
}

fn user_parts(msg: &completions::RequestMessage) -> Result<Vec<gemini::Part>, AIError> {
	let Some(content) = &msg.content else {
		return Ok(Vec::new());
	};
	match content {
		completions::MessageContent::Text(t) => Ok(vec![gemini::Part {
			text: Some(t.clone()),
			..Default::default()
		}]),
		completions::MessageContent::Parts(parts) => {
			let mut out = Vec::new();
			for part in parts {
				match part.r#type.as_str() {
					"text" => {
						if let Some(t) = &part.text {
							out.push(gemini::Part {
								text: Some(t.clone()),
								..Default::default()
							});
						}
					},
					"image_url" => {
						let Some(url) = part.image_url.as_ref().map(|i| i.url.as_str()) else {
							continue;
						};
						if let Some(rest) = url.strip_prefix("data:") {
							let (mime, data) = rest.split_once(";base64,").ok_or_else(|| {
								AIError::RequestConstraint(strng::literal!("malformed image data URI"))
							})?;
							out.push(gemini::Part {
								inline_data: Some(gemini::Blob {
									mime_type: mime.to_string(),
									data: data.to_string(),
								}),
								..Default::default()
							});
						} else {
							out.push(gemini::Part {
								file_data: Some(gemini::FileData {
									mime_type: None,
									file_uri: url.to_string(),
								}),
								..Default::default()
							});
						}
					},
					"input_audio" => {},
					other => {
						return Err(AIError::RequestConstraint(strng::format!(
							"unsupported content part {other:?}"
						)));
					},
				}
			}
			Ok(out)
		},
	}
}

/// to_gemini_schema dereferences a JSON schema and converts it to the Gapic
/// Schema shape. `$ref` cycles are refused explicitly.
pub(super) fn to_gemini_schema(root: &Value) -> Result<gemini::Schema, AIError> {
	let mut processed_refs = HashSet::new();
	convert_schema(root, root, &mut processed_refs, 0)
}

fn convert_schema(
	root: &Value,
	node: &Value,
	processed_refs: &mut HashSet<String>,
	depth: usize,
) -> Result<gemini::Schema, AIError> {
	if depth > JSON_SCHEMA_MAX_RECURSION_DEPTH {
		return Err(AIError::Translation(strng::literal!(
			"json schema recursion depth exceeded"
		)));
	}
	if let Some(reference) = node.get("$ref").and_then(Value::as_str) {
		if !processed_refs.insert(reference.to_string()) {
			return Err(AIError::Translation(strng::format!(
				"json schema reference cycle through {reference:?}"
			)));
		}
		let target = resolve_ref(root, reference)?;
		let out = convert_schema(root, target, processed_refs, depth + 1)?;
		processed_refs.remove(reference);
		return Ok(out);
	}

	let mut out = gemini::Schema {
		description: node
			.get("description")
			.and_then(Value::as_str)
			.map(str::to_string),
		format: node.get("format").and_then(Value::as_str).map(str::to_string),
		pattern: node
			.get("pattern")
			.and_then(Value::as_str)
			.map(str::to_string),
		..Default::default()
	};

	match node.get("type") {
		Some(Value::String(t)) => out.r#type = Some(t.to_uppercase()),
		// ["string", "null"] style nullable unions
		Some(Value::Array(types)) => {
			for t in types.iter().filter_map(Value::as_str) {
				if t == "null" {
					out.nullable = Some(true);
				} else {
					out.r#type = Some(t.to_uppercase());
				}
			}
		},
		_ => {},
	}

	if let Some(en) = node.get("enum").and_then(Value::as_array) {
		out.r#type.get_or_insert_with(|| "STRING".to_string());
		out.r#enum = Some(
			en.iter()
				.map(|v| match v {
					Value::String(s) => s.clone(),
					other => other.to_string(),
				})
				.collect(),
		);
	}

	if let Some(items) = node.get("items") {
		out.items = Some(Box::new(convert_schema(root, items, processed_refs, depth + 1)?));
	}

	if let Some(props) = node.get("properties").and_then(Value::as_object) {
		let mut converted = IndexMap::new();
		for (k, v) in props {
			converted.insert(
				k.clone(),
				convert_schema(root, v, processed_refs, depth + 1)?,
			);
		}
		out.properties = Some(converted);
	}

	if let Some(required) = node.get("required").and_then(Value::as_array) {
		out.required = Some(
			required
				.iter()
				.filter_map(Value::as_str)
				.map(str::to_string)
				.collect(),
		);
	}

	Ok(out)
}

fn resolve_ref<'a>(root: &'a Value, reference: &str) -> Result<&'a Value, AIError> {
	let Some(pointer) = reference.strip_prefix('#') else {
		return Err(AIError::Translation(strng::format!(
			"unsupported external schema reference {reference:?}"
		)));
	};
	root.pointer(pointer).ok_or_else(|| {
		AIError::Translation(strng::format!("unresolved schema reference {reference:?}"))
	})
}

/// from_gemini_response converts the non-streaming GenerateContent response
/// into a chat completion.
fn from_gemini_response(
	resp: gemini::GenerateContentResponse,
	model: &str,
) -> Result<chat::Response, AIError> {
	let usage = resp.usage_metadata.as_ref().map(|u| chat::Usage {
		prompt_tokens: u.prompt_token_count,
		completion_tokens: u.candidates_token_count,
		total_tokens: u.total_token_count,
		prompt_tokens_details: u.cached_content_token_count.map(|c| chat::PromptTokensDetails {
			cached_tokens: c,
			rest: Value::Object(Default::default()),
		}),
		rest: Value::Object(Default::default()),
	});
	let mut choices = Vec::new();
	for (i, candidate) in resp.candidates.into_iter().enumerate() {
		let mut content: Option<String> = None;
		let mut tool_calls = Vec::new();
		for part in candidate.content.into_iter().flat_map(|c| c.parts) {
			if let Some(text) = part.text {
				match &mut content {
					Some(c) => {
						c.push_str(&text);
					},
					None => content = Some(text),
				}
			}
			if let Some(fc) = part.function_call {
				tool_calls.push(chat::MessageToolCall {
					id: tool_call_id(),
					r#type: "function".to_string(),
					function: chat::FunctionCall {
						name: fc.name,
						arguments: serde_json::to_string(&fc.args)
							.map_err(AIError::ResponseMarshal)?,
					},
				});
			}
		}
		let finish_reason = match candidate.finish_reason.as_deref() {
			Some(r) if !tool_calls.is_empty() && r == "STOP" => Some(chat::FinishReason::ToolCalls),
			Some(r) => Some(translate_finish_reason(r)?),
			None => None,
		};
		choices.push(chat::ChatChoice {
			index: candidate.index.unwrap_or(i as u32),
			message: chat::ResponseMessage {
				role: chat::Role::Assistant,
				content,
				tool_calls: if tool_calls.is_empty() {
					None
				} else {
					Some(tool_calls)
				},
				reasoning_content: None,
			},
			finish_reason,
		});
	}
	Ok(chat::Response {
		id: resp
			.response_id
			.unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string()),
		object: "chat.completion".to_string(),
		created: chrono::Utc::now().timestamp() as u32,
		model: model.to_string(),
		choices,
		usage,
	})
}

fn tool_call_id() -> String {
	format!("call_{}", uuid::Uuid::new_v4().simple())
}

struct StreamState {
	request_model: Strng,
	model: Strng,
	id: String,
	created: u32,
	role_sent: bool,
	next_tool_index: u32,
	// Running sums mirroring the additive aggregation, for the final chunk.
	summed: LLMTokenUsage,
	usage_seen: bool,
	usage_emitted: bool,
}

impl StreamState {
	fn new(request_model: Strng) -> Self {
		StreamState {
			model: request_model.clone(),
			request_model,
			id: format!("chatcmpl-{}", uuid::Uuid::new_v4().simple()),
			created: chrono::Utc::now().timestamp() as u32,
			role_sent: false,
			next_tool_index: 0,
			summed: LLMTokenUsage::default(),
			usage_seen: false,
			usage_emitted: false,
		}
	}

	fn mk(
		&self,
		choices: Vec<chat::ChatChoiceStream>,
		usage: Option<chat::Usage>,
	) -> chat::StreamResponse {
		chat::StreamResponse {
			id: self.id.clone(),
			object: "chat.completion.chunk".to_string(),
			created: self.created,
			model: self.model.to_string(),
			choices,
			usage,
		}
	}

	fn on_chunk(
		&mut self,
		resp: gemini::GenerateContentResponse,
		out: &mut Vec<u8>,
	) -> Result<Option<LLMTokenUsage>, AIError> {
		if let Some(m) = resp.model_version.as_deref().filter(|m| !m.is_empty()) {
			self.model = strng::new(m);
		} else if self.model.is_empty() {
			self.model = self.request_model.clone();
		}
		let mut usage = None;
		if let Some(u) = &resp.usage_metadata {
			let delta = usage_from(u);
			self.summed.input_tokens += delta.input_tokens;
			self.summed.output_tokens += delta.output_tokens;
			self.summed.total_tokens += delta.total_tokens;
			self.summed.cached_input_tokens += delta.cached_input_tokens;
			self.usage_seen = true;
			usage = Some(delta);
		}
		for candidate in resp.candidates {
			let mut delta = chat::StreamResponseDelta {
				role: (!self.role_sent).then_some(chat::Role::Assistant),
				..Default::default()
			};
			self.role_sent = true;
			let mut tool_calls = Vec::new();
			for part in candidate.content.into_iter().flat_map(|c| c.parts) {
				if let Some(text) = part.text {
					match &mut delta.content {
						Some(c) => c.push_str(&text),
						None => delta.content = Some(text),
					}
				}
				if let Some(fc) = part.function_call {
					let index = self.next_tool_index;
					self.next_tool_index += 1;
					tool_calls.push(chat::ToolCallChunk {
						index,
						id: Some(tool_call_id()),
						r#type: Some("function".to_string()),
						function: Some(chat::FunctionCallChunk {
							name: Some(fc.name),
							arguments: Some(
								serde_json::to_string(&fc.args).map_err(AIError::ResponseMarshal)?,
							),
						}),
					});
				}
			}
			let had_tools = !tool_calls.is_empty();
			if had_tools {
				delta.tool_calls = Some(tool_calls);
			}
			let finish_reason = match candidate.finish_reason.as_deref() {
				Some("STOP") if had_tools => Some(chat::FinishReason::ToolCalls),
				Some(r) => Some(translate_finish_reason(r)?),
				None => None,
			};
			let chunk = self.mk(
				vec![chat::ChatChoiceStream {
					index: candidate.index.unwrap_or_default(),
					delta,
					finish_reason,
				}],
				None,
			);
			encode_chunk(&chunk, out)?;
		}
		Ok(usage)
	}

	fn finish(&mut self, out: &mut Vec<u8>) -> Result<Option<LLMTokenUsage>, AIError> {
		if self.usage_emitted || !self.usage_seen {
			return Ok(None);
		}
		self.usage_emitted = true;
		let chunk = self.mk(
			vec![],
			Some(chat::Usage {
				prompt_tokens: self.summed.input_tokens,
				completion_tokens: self.summed.output_tokens,
				total_tokens: self.summed.total_tokens,
				prompt_tokens_details: None,
				rest: Value::Object(Default::default()),
			}),
		);
		encode_chunk(&chunk, out)?;
		Ok(None)
	}
}
