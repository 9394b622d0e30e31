//! OpenAI Chat Completions ↔ Anthropic Messages.
//!
//! The request path rewrites the whole body into the Messages schema; the
//! response path maps content blocks back into chat choices, including
//! event-by-event reframing of the SSE stream.

use std::collections::HashMap;

use bytes::BytesMut;
use tokio_util::codec::Decoder;

use super::{
	HeaderMutation, Headers, RequestTransform, ResponseTransform, Translator, encode_chunk,
	sse_rewrite_needed,
};
use crate::llm::types::completions::{self, typed as chat};
use crate::llm::types::messages::typed as messages;
use crate::llm::usage::UsageMode;
use crate::llm::{AIError, LLMTokenUsage, anthropic};
use crate::parse::sse;
use crate::*;

const DEFAULT_MAX_TOKENS: u64 = 4096;

pub struct FromOpenAI {
	provider: anthropic::Provider,
	state: State,
}

/// State shared by every translator that speaks Messages upstream and Chat
/// Completions downstream (native Anthropic, Bedrock, GCP).
pub(super) struct State {
	pub stream: bool,
	pub request_model: Strng,
	pub response_model: Option<Strng>,
	buffered: BytesMut,
	decoder: sse::SseDecoder,
	machine: Option<StreamMachine>,
}

impl Default for State {
	fn default() -> Self {
		State {
			stream: false,
			request_model: strng::EMPTY,
			response_model: None,
			buffered: BytesMut::new(),
			decoder: sse::SseDecoder::new(),
			machine: None,
		}
	}
}

impl FromOpenAI {
	pub fn new(provider: &anthropic::Provider) -> Self {
		FromOpenAI {
			provider: provider.clone(),
			state: State::default(),
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
		let body = self
			.state
			.prepare_request(&req, self.provider.model.clone())?;
		let mut out = RequestTransform::default();
		out.set_path(anthropic::DEFAULT_PATH);
		out
			.headers
			.set("anthropic-version", self.provider.version().to_string());
		out.set_body(body);
		Ok(out)
	}

	fn response_headers(&mut self, headers: &Headers) -> Result<HeaderMutation, AIError> {
		self.state.response_headers(headers)
	}

	fn response_body(
		&mut self,
		chunk: &[u8],
		end_of_stream: bool,
	) -> Result<ResponseTransform, AIError> {
		self.state.response_body(chunk, end_of_stream, false)
	}

	fn streaming(&self) -> bool {
		self.state.stream
	}

	fn request_model(&self) -> Strng {
		self.state.request_model.clone()
	}

	fn usage_mode(&self) -> UsageMode {
		UsageMode::Cumulative
	}
}

impl State {
	/// prepare_request latches stream/model and returns the Messages body.
	pub(super) fn prepare_request(
		&mut self,
		req: &completions::Request,
		model_override: Option<Strng>,
	) -> Result<Vec<u8>, AIError> {
		let model = match (&model_override, &req.model) {
			(Some(m), _) => m.clone(),
			(None, Some(m)) => strng::new(m),
			(None, None) => return Err(AIError::MissingField(strng::literal!("model"))),
		};
		self.stream = req.stream.unwrap_or_default();
		self.request_model = model.clone();
		let xlated = to_messages_request(req, model.as_str())?;
		let mut map: serde_json::Map<String, serde_json::Value> =
			crate::json::convert(&xlated).map_err(AIError::RequestMarshal)?;
		// The vendor extension bag (thinking config and friends) is forwarded
		// verbatim, taking precedence over translated fields.
		if let Some(serde_json::Value::Object(bag)) = req.rest.get("anthropic") {
			for (k, v) in bag {
				map.insert(k.clone(), v.clone());
			}
		}
		serde_json::to_vec(&map).map_err(AIError::RequestMarshal)
	}

	pub(super) fn response_headers(&mut self, headers: &Headers) -> Result<HeaderMutation, AIError> {
		let mut hm = HeaderMutation::default();
		if self.stream && sse_rewrite_needed(headers) {
			hm.set(
				super::HEADER_CONTENT_TYPE,
				super::CONTENT_TYPE_EVENT_STREAM,
			);
		}
		Ok(hm)
	}

	/// response_body drives the non-streaming buffer or the streaming
	/// machine over SSE frames. `deterministic_model` forces the latched
	/// request model as the reported response model (Bedrock/GCP virtualize
	/// the model through the path, so the body echo is not authoritative).
	pub(super) fn response_body(
		&mut self,
		chunk: &[u8],
		end_of_stream: bool,
		deterministic_model: bool,
	) -> Result<ResponseTransform, AIError> {
		if !self.stream {
			return self.response_body_buffered(chunk, end_of_stream, deterministic_model);
		}
		self.buffered.extend_from_slice(chunk);
		let machine = self
			.machine
			.get_or_insert_with(|| StreamMachine::new(self.request_model.clone()));
		let mut body = Vec::new();
		let mut usage = None;
		loop {
			let ev = match self.decoder.decode(&mut self.buffered) {
				Ok(Some(ev)) => ev,
				Ok(None) => break,
				Err(e) => {
					return Err(AIError::UpstreamFraming(strng::format!("sse decode: {e}")));
				},
			};
			if let Some(u) = machine.on_frame(&ev, &mut body)? {
				usage = Some(u);
			}
		}
		if end_of_stream {
			if let Some(u) = machine.finish(&mut body)? {
				usage = Some(u);
			}
			body.extend_from_slice(sse::DONE_FRAME);
		}
		let model = if deterministic_model {
			Some(self.request_model.clone())
		} else {
			machine.response_model().or_else(|| Some(self.request_model.clone()))
		};
		self.response_model = model.clone();
		Ok(ResponseTransform {
			headers: HeaderMutation::default(),
			body: Some(body),
			usage,
			model,
		})
	}

	fn response_body_buffered(
		&mut self,
		chunk: &[u8],
		end_of_stream: bool,
		deterministic_model: bool,
	) -> Result<ResponseTransform, AIError> {
		self.buffered.extend_from_slice(chunk);
		if !end_of_stream {
			return Ok(ResponseTransform::default());
		}
		let resp: messages::MessagesResponse =
			serde_json::from_slice(&self.buffered).map_err(AIError::ResponseParsing)?;
		let usage = usage_from(&resp.usage);
		let model = if deterministic_model || resp.model.is_empty() {
			self.request_model.clone()
		} else {
			strng::new(&resp.model)
		};
		let openai = from_messages_response(resp, model.as_str())?;
		let body = serde_json::to_vec(&openai).map_err(AIError::ResponseMarshal)?;
		self.response_model = Some(model.clone());
		let mut out = ResponseTransform {
			headers: HeaderMutation::default(),
			body: None,
			usage: Some(usage),
			model: Some(model),
		};
		out.set_body(body);
		Ok(out)
	}
}

fn usage_from(u: &messages::Usage) -> LLMTokenUsage {
	LLMTokenUsage::from_totals(u.input_tokens as u32, u.output_tokens as u32)
		.with_cached(u.cache_read_input_tokens.unwrap_or_default() as u32)
}

/// The fixed stop-reason table. Unknown values fail translation.
pub(super) fn translate_stop_reason(reason: &str) -> Result<chat::FinishReason, AIError> {
	Ok(match reason {
		"end_turn" | "stop_sequence" | "pause_turn" => chat::FinishReason::Stop,
		"max_tokens" | "model_context_window_exceeded" => chat::FinishReason::Length,
		"tool_use" => chat::FinishReason::ToolCalls,
		"refusal" => chat::FinishReason::ContentFilter,
		other => {
			return Err(AIError::Translation(strng::format!(
				"unknown stop reason {other:?}"
			)));
		},
	})
}

/// to_messages_request translates an OpenAI completions request into an
/// Anthropic messages request.
pub(super) fn to_messages_request(
	req: &completions::Request,
	model: &str,
) -> Result<messages::Request, AIError> {
	// Anthropic has all system prompts in a single field. Join them
	let system = req
		.messages
		.iter()
		.filter(|m| m.role == "system" || m.role == "developer")
		.filter_map(|m| m.text())
		.collect::<Vec<_>>()
		.join("\n");

	let mut msgs: Vec<messages::Message> = Vec::new();
	for msg in &req.messages {
		match msg.role.as_str() {
			"system" | "developer" => {},
			"tool" => {
				let content = messages::ContentBlock::ToolResult {
					tool_use_id: msg.tool_call_id.clone().unwrap_or_default(),
					content: messages::ToolResultContent::Text(msg.text().unwrap_or_default()),
					is_error: None,
				};
				msgs.push(messages::Message {
					role: messages::Role::User,
					content: vec![content],
				});
			},
			"assistant" => {
				let mut content = Vec::new();
				if let Some(text) = msg.text() {
					content.push(messages::ContentBlock::Text(messages::ContentTextBlock {
						text,
					}));
				}
				for tc in msg.tool_calls.iter().flatten() {
					let input = serde_json::from_str(&tc.function.arguments)
						.unwrap_or(serde_json::Value::Object(Default::default()));
					content.push(messages::ContentBlock::ToolUse {
						id: tc.id.clone(),
						name: tc.function.name.clone(),
						input,
					});
				}
				if !content.is_empty() {
					msgs.push(messages::Message {
						role: messages::Role::Assistant,
						content,
					});
				}
			},
			// Default to user for other roles
			_ => {
				let content = user_content_blocks(msg)?;
				if !content.is_empty() {
					msgs.push(messages::Message {
						role: messages::Role::User,
						content,
					});
				}
			},
		}
	}

	let tools = req.tools.as_ref().map(|tools| {
		tools
			.iter()
			.map(|completions::Tool::Function { function }| messages::Tool {
				name: function.name.clone(),
				description: function.description.clone(),
				input_schema: function
					.parameters
					.clone()
					.unwrap_or(serde_json::Value::Object(Default::default())),
			})
			.collect::<Vec<_>>()
	});

	let tool_choice = match &req.tool_choice {
		Some(completions::ToolChoiceOption::Named(n)) => Some(messages::ToolChoice::Tool {
			name: n.function.name.clone(),
		}),
		Some(completions::ToolChoiceOption::Mode(completions::ToolChoiceMode::Auto)) => {
			Some(messages::ToolChoice::Auto)
		},
		Some(completions::ToolChoiceOption::Mode(completions::ToolChoiceMode::Required)) => {
			Some(messages::ToolChoice::Any)
		},
		Some(completions::ToolChoiceOption::Mode(completions::ToolChoiceMode::None)) => {
			Some(messages::ToolChoice::None)
		},
		None => None,
	};

	let metadata = req.user.clone().map(|user| messages::Metadata {
		fields: HashMap::from([("user_id".to_string(), user)]),
	});

	Ok(messages::Request {
		messages: msgs,
		system: if system.is_empty() {
			None
		} else {
			Some(messages::SystemPrompt::Text(system))
		},
		model: model.to_string(),
		max_tokens: req.max_output_tokens().unwrap_or(DEFAULT_MAX_TOKENS),
		stop_sequences: req.stop_sequences(),
		stream: req.stream.unwrap_or(false),
		temperature: req.temperature,
		top_p: req.top_p,
		tools,
		tool_choice,
		metadata,
	})
}

fn user_content_blocks(
	msg: &completions::RequestMessage,
) -> Result<Vec<messages::ContentBlock>, AIError> {
	let Some(content) = &msg.content else {
		return Ok(Vec::new());
	};
	match content {
		completions::MessageContent::Text(t) => Ok(vec![messages::ContentBlock::Text(
			messages::ContentTextBlock { text: t.clone() },
		)]),
		completions::MessageContent::Parts(parts) => {
			let mut out = Vec::new();
			for part in parts {
				match part.r#type.as_str() {
					"text" => {
						if let Some(t) = &part.text {
							out.push(messages::ContentBlock::Text(messages::ContentTextBlock {
								text: t.clone(),
							}));
						}
					},
					"image_url" => {
						let Some(url) = part.image_url.as_ref().map(|i| i.url.as_str()) else {
							continue;
						};
						out.push(messages::ContentBlock::Image {
							source: image_source(url)?,
						});
					},
					// Audio has no Messages equivalent; skipped rather than failed.
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

fn image_source(url: &str) -> Result<serde_json::Value, AIError> {
	if let Some(rest) = url.strip_prefix("data:") {
		let (media_type, data) = rest
			.split_once(";base64,")
			.ok_or_else(|| AIError::RequestConstraint(strng::literal!("malformed image data URI")))?;
		Ok(serde_json::json!({
			"type": "base64",
			"media_type": media_type,
			"data": data,
		}))
	} else {
		Ok(serde_json::json!({ "type": "url", "url": url }))
	}
}

/// from_messages_response translates a non-streaming Messages response into
/// a chat completion.
pub(super) fn from_messages_response(
	resp: messages::MessagesResponse,
	model: &str,
) -> Result<chat::Response, AIError> {
	let mut tool_calls: Vec<chat::MessageToolCall> = Vec::new();
	let mut content = None;
	let mut reasoning_content = None;
	for block in resp.content {
		match block {
			messages::ContentBlock::Text(messages::ContentTextBlock { text }) => {
				content = Some(text);
			},
			messages::ContentBlock::ToolUse { id, name, input } => {
				let Ok(args) = serde_json::to_string(&input) else {
					continue;
				};
				tool_calls.push(chat::MessageToolCall {
					id,
					r#type: "function".to_string(),
					function: chat::FunctionCall {
						name,
						arguments: args,
					},
				});
			},
			messages::ContentBlock::Thinking { thinking, .. } => {
				reasoning_content = Some(thinking);
			},
			// The remaining block kinds have no completion-side equivalent.
			_ => {},
		}
	}
	let finish_reason = resp
		.stop_reason
		.as_deref()
		.map(translate_stop_reason)
		.transpose()?;
	let usage = chat::Usage {
		prompt_tokens: resp.usage.input_tokens as u32,
		completion_tokens: resp.usage.output_tokens as u32,
		total_tokens: (resp.usage.input_tokens + resp.usage.output_tokens) as u32,
		prompt_tokens_details: resp.usage.cache_read_input_tokens.map(|c| {
			chat::PromptTokensDetails {
				cached_tokens: c as u32,
				rest: serde_json::Value::Object(Default::default()),
			}
		}),
		rest: serde_json::Value::Object(Default::default()),
	};
	Ok(chat::Response {
		id: resp.id,
		object: "chat.completion".to_string(),
		// No date in the messages response so just call it "now"
		created: chrono::Utc::now().timestamp() as u32,
		model: model.to_string(),
		choices: vec![chat::ChatChoice {
			index: 0,
			message: chat::ResponseMessage {
				role: chat::Role::Assistant,
				content,
				tool_calls: if tool_calls.is_empty() {
					None
				} else {
					Some(tool_calls)
				},
				reasoning_content,
			},
			finish_reason,
		}],
		usage: Some(usage),
	})
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
	AwaitingMessageStart,
	Streaming,
	Terminated,
}

enum Block {
	Content,
	Tool { index: u32 },
}

/// StreamMachine reframes an Anthropic event stream into OpenAI chat chunks.
///
/// Tool-call indices start at 0 and increase by one per distinct tool_use
/// block, in first-occurrence order; argument deltas reuse the index of
/// their block. Events are fed one complete frame at a time, so the machine
/// is insensitive to how the upstream bytes were chunked.
pub(super) struct StreamMachine {
	phase: Phase,
	request_model: Strng,
	message_id: String,
	model: String,
	created: u32,
	input_tokens: u64,
	cached_tokens: u64,
	latest_output: u64,
	usage_seen: bool,
	usage_emitted: bool,
	role_sent: bool,
	next_tool_index: u32,
	blocks: HashMap<usize, Block>,
	dropped_frames: u64,
}

impl StreamMachine {
	pub(super) fn new(request_model: Strng) -> Self {
		StreamMachine {
			phase: Phase::AwaitingMessageStart,
			request_model,
			message_id: "unknown".to_string(),
			model: String::new(),
			created: chrono::Utc::now().timestamp() as u32,
			input_tokens: 0,
			cached_tokens: 0,
			latest_output: 0,
			usage_seen: false,
			usage_emitted: false,
			role_sent: false,
			next_tool_index: 0,
			blocks: HashMap::new(),
			dropped_frames: 0,
		}
	}

	pub(super) fn response_model(&self) -> Option<Strng> {
		if self.model.is_empty() {
			None
		} else {
			Some(strng::new(&self.model))
		}
	}

	fn usage(&self) -> LLMTokenUsage {
		LLMTokenUsage::from_totals(self.input_tokens as u32, self.latest_output as u32)
			.with_cached(self.cached_tokens as u32)
	}

	fn mk(
		&self,
		choices: Vec<chat::ChatChoiceStream>,
		usage: Option<chat::Usage>,
	) -> chat::StreamResponse {
		chat::StreamResponse {
			id: self.message_id.clone(),
			object: "chat.completion.chunk".to_string(),
			created: self.created,
			model: if self.model.is_empty() {
				self.request_model.to_string()
			} else {
				self.model.clone()
			},
			choices,
			usage,
		}
	}

	fn chat_usage(&self) -> chat::Usage {
		chat::Usage {
			prompt_tokens: self.input_tokens as u32,
			completion_tokens: self.latest_output as u32,
			total_tokens: (self.input_tokens + self.latest_output) as u32,
			prompt_tokens_details: if self.cached_tokens > 0 {
				Some(chat::PromptTokensDetails {
					cached_tokens: self.cached_tokens as u32,
					rest: serde_json::Value::Object(Default::default()),
				})
			} else {
				None
			},
			rest: serde_json::Value::Object(Default::default()),
		}
	}

	/// on_frame feeds one SSE frame. Emits re-encoded chunks into `out` and
	/// returns a usage observation when one was extracted.
	pub(super) fn on_frame(
		&mut self,
		frame: &sse::Event,
		out: &mut Vec<u8>,
	) -> Result<Option<LLMTokenUsage>, AIError> {
		if sse::is_done(&frame.data) {
			// Not part of the Messages protocol, but harmless to accept.
			self.phase = Phase::Terminated;
			return Ok(None);
		}
		let ev: messages::MessagesStreamEvent = match serde_json::from_slice(&frame.data) {
			Ok(ev) => ev,
			Err(e) => {
				// A malformed message_start leaves us with no usable state.
				if self.phase == Phase::AwaitingMessageStart
					&& frame.event.as_deref() == Some("message_start")
				{
					return Err(AIError::Translation(strng::format!(
						"malformed message_start: {e}"
					)));
				}
				self.dropped_frames += 1;
				debug!("dropping malformed frame: {e}");
				return Ok(None);
			},
		};
		self.on_event(ev, out)
	}

	pub(super) fn on_event(
		&mut self,
		ev: messages::MessagesStreamEvent,
		out: &mut Vec<u8>,
	) -> Result<Option<LLMTokenUsage>, AIError> {
		match ev {
			messages::MessagesStreamEvent::MessageStart { message } => {
				self.phase = Phase::Streaming;
				self.message_id = message.id;
				self.model = message.model;
				self.input_tokens = message.usage.input_tokens;
				self.cached_tokens = message.usage.cache_read_input_tokens.unwrap_or_default();
				self.latest_output = message.usage.output_tokens;
				self.usage_seen = true;
				// The first chunk downstream carries the assistant role; it is
				// never repeated afterwards.
				let chunk = self.mk(
					vec![chat::ChatChoiceStream {
						index: 0,
						delta: chat::StreamResponseDelta {
							role: (!self.role_sent).then_some(chat::Role::Assistant),
							..Default::default()
						},
						finish_reason: None,
					}],
					None,
				);
				self.role_sent = true;
				encode_chunk(&chunk, out)?;
				Ok(Some(self.usage()))
			},
			messages::MessagesStreamEvent::ContentBlockStart {
				index,
				content_block,
			} => {
				match content_block {
					messages::ContentBlock::ToolUse { id, name, .. } => {
						let tool_index = self.next_tool_index;
						self.next_tool_index += 1;
						self.blocks.insert(index, Block::Tool { index: tool_index });
						let chunk = self.mk(
							vec![chat::ChatChoiceStream {
								index: 0,
								delta: chat::StreamResponseDelta {
									role: (!self.role_sent).then_some(chat::Role::Assistant),
									tool_calls: Some(vec![chat::ToolCallChunk {
										index: tool_index,
										id: Some(id),
										r#type: Some("function".to_string()),
										function: Some(chat::FunctionCallChunk {
											name: Some(name),
											arguments: None,
										}),
									}]),
									..Default::default()
								},
								finish_reason: None,
							}],
							None,
						);
						self.role_sent = true;
						encode_chunk(&chunk, out)?;
					},
					_ => {
						self.blocks.insert(index, Block::Content);
					},
				}
				Ok(None)
			},
			messages::MessagesStreamEvent::ContentBlockDelta { index, delta } => {
				let mut dr = chat::StreamResponseDelta {
					role: (!self.role_sent).then_some(chat::Role::Assistant),
					..Default::default()
				};
				match delta {
					messages::ContentBlockDelta::TextDelta { text } => {
						dr.content = Some(text);
					},
					messages::ContentBlockDelta::ThinkingDelta { thinking } => {
						dr.reasoning_content = Some(thinking);
					},
					messages::ContentBlockDelta::InputJsonDelta { partial_json } => {
						let Some(Block::Tool { index: tool_index }) = self.blocks.get(&index) else {
							// Argument delta for a block we never saw start; drop it.
							self.dropped_frames += 1;
							return Ok(None);
						};
						dr.tool_calls = Some(vec![chat::ToolCallChunk {
							index: *tool_index,
							id: None,
							r#type: None,
							function: Some(chat::FunctionCallChunk {
								name: None,
								arguments: Some(partial_json),
							}),
						}]);
					},
					messages::ContentBlockDelta::SignatureDelta { .. } => return Ok(None),
					messages::ContentBlockDelta::Unknown => return Ok(None),
				}
				self.role_sent = true;
				let chunk = self.mk(
					vec![chat::ChatChoiceStream {
						index: 0,
						delta: dr,
						finish_reason: None,
					}],
					None,
				);
				encode_chunk(&chunk, out)?;
				Ok(None)
			},
			messages::MessagesStreamEvent::ContentBlockStop { index } => {
				self.blocks.remove(&index);
				Ok(None)
			},
			messages::MessagesStreamEvent::MessageDelta { delta, usage } => {
				self.latest_output = usage.output_tokens;
				if let Some(inp) = usage.input_tokens {
					self.input_tokens = inp;
				}
				if let Some(cached) = usage.cache_read_input_tokens {
					self.cached_tokens = cached;
				}
				self.usage_seen = true;
				if let Some(reason) = delta.stop_reason.as_deref() {
					let finish = translate_stop_reason(reason)?;
					let chunk = self.mk(
						vec![chat::ChatChoiceStream {
							index: 0,
							delta: chat::StreamResponseDelta::default(),
							finish_reason: Some(finish),
						}],
						None,
					);
					encode_chunk(&chunk, out)?;
				}
				let chunk = self.mk(vec![], Some(self.chat_usage()));
				self.usage_emitted = true;
				encode_chunk(&chunk, out)?;
				Ok(Some(self.usage()))
			},
			messages::MessagesStreamEvent::MessageStop => {
				self.phase = Phase::Terminated;
				Ok(None)
			},
			messages::MessagesStreamEvent::Ping => Ok(None),
			messages::MessagesStreamEvent::Error { error } => {
				warn!("upstream stream error event: {error}");
				self.dropped_frames += 1;
				Ok(None)
			},
			// An unknown event type is a no-op, never an error.
			messages::MessagesStreamEvent::Unknown => Ok(None),
		}
	}

	/// finish flushes state at end of stream: a usage chunk is synthesized
	/// when usage was observed but the upstream never emitted a terminal
	/// frame (the content already streamed incrementally, including partial
	/// tool-call JSON).
	pub(super) fn finish(&mut self, out: &mut Vec<u8>) -> Result<Option<LLMTokenUsage>, AIError> {
		self.blocks.clear();
		if self.usage_emitted || self.phase == Phase::AwaitingMessageStart {
			return Ok(None);
		}
		let chunk = self.mk(vec![], Some(self.chat_usage()));
		self.usage_emitted = true;
		encode_chunk(&chunk, out)?;
		if self.usage_seen {
			Ok(Some(self.usage()))
		} else {
			Ok(None)
		}
	}
}
