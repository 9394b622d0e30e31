use aws_smithy_eventstream::frame::write_message_to;
use aws_smithy_types::event_stream::{Header, HeaderValue, Message};
use base64::Engine;
use bytes::BytesMut;
use serde_json::{Value, json};
use tokio_util::codec::Decoder;

use super::*;
use crate::llm;
use crate::llm::LLMTokenUsage;
use crate::llm::types::completions::typed as chat;
use crate::llm::usage::Aggregator;
use crate::parse::sse;

fn openai_provider(model: Option<&str>) -> llm::openai::Provider {
	llm::openai::Provider {
		model: model.map(strng::new),
	}
}

fn bedrock_provider() -> llm::bedrock::Provider {
	llm::bedrock::Provider {
		model: None,
		region: strng::new("us-east-1"),
	}
}

fn request(t: &mut dyn Translator, body: &str, force: bool) -> RequestTransform {
	t.request_body(&Bytes::copy_from_slice(body.as_bytes()), force)
		.expect("request translation")
}

/// Feed a full upstream body as a sequence of chunks, collecting the
/// downstream bytes and folding usage the way the ext_proc server does.
fn run_stream(
	t: &mut dyn Translator,
	chunks: &[&[u8]],
) -> (Vec<u8>, LLMTokenUsage, Option<Strng>) {
	let mut agg = Aggregator::new(t.usage_mode());
	let mut out = Vec::new();
	let mut model = None;
	let n = chunks.len();
	for (i, chunk) in chunks.iter().enumerate() {
		let res = t.response_body(chunk, i + 1 == n).expect("response translation");
		match res.body {
			Some(b) => out.extend_from_slice(&b),
			None => out.extend_from_slice(chunk),
		}
		if let Some(u) = res.usage {
			agg.observe(u);
		}
		if let Some(m) = res.model {
			model = Some(m);
		}
	}
	(out, agg.total(), model)
}

fn parse_chunks(bytes: &[u8]) -> (Vec<chat::StreamResponse>, bool) {
	let mut dec = sse::SseDecoder::new();
	let mut buf = BytesMut::from(bytes);
	let mut out = Vec::new();
	let mut done = false;
	while let Ok(Some(ev)) = dec.decode(&mut buf) {
		if sse::is_done(&ev.data) {
			done = true;
			continue;
		}
		out.push(serde_json::from_slice(&ev.data).expect("valid chunk json"));
	}
	assert!(buf.is_empty(), "no residual bytes downstream");
	(out, done)
}

fn bedrock_chunk(inner: &[u8]) -> Vec<u8> {
	let payload = json!({
		"bytes": base64::engine::general_purpose::STANDARD.encode(inner),
	});
	let msg = Message::new(Bytes::from(serde_json::to_vec(&payload).unwrap()))
		.add_header(Header::new(
			":message-type",
			HeaderValue::String("event".into()),
		))
		.add_header(Header::new(":event-type", HeaderValue::String("chunk".into())));
	let mut out = Vec::new();
	write_message_to(&msg, &mut out).unwrap();
	out
}

const ANTHROPIC_TOOL_STREAM: &[&str] = &[
	r#"{"type":"message_start","message":{"id":"msg_01","type":"message","role":"assistant","content":[],"model":"claude-3-5-sonnet-20241022","stop_reason":null,"stop_sequence":null,"usage":{"input_tokens":25,"output_tokens":1}}}"#,
	r#"{"type":"content_block_start","index":0,"content_block":{"type":"text","text":""}}"#,
	r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Let me check."}}"#,
	r#"{"type":"content_block_stop","index":0}"#,
	r#"{"type":"content_block_start","index":1,"content_block":{"type":"tool_use","id":"toolu_01","name":"get_weather","input":{}}}"#,
	r#"{"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"{\"location\": \"San Fra"}}"#,
	r#"{"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"ncisco\"}"}}"#,
	r#"{"type":"content_block_stop","index":1}"#,
	r#"{"type":"message_delta","delta":{"stop_reason":"tool_use","stop_sequence":null},"usage":{"output_tokens":30}}"#,
	r#"{"type":"message_stop"}"#,
];

fn anthropic_sse_stream() -> Vec<u8> {
	let mut out = Vec::new();
	for data in ANTHROPIC_TOOL_STREAM {
		let name = serde_json::from_str::<Value>(data).unwrap()["type"]
			.as_str()
			.unwrap()
			.to_string();
		sse::encode_event(&name, data.as_bytes(), &mut out);
	}
	out
}

// Property 1: a non-empty rewritten body always carries a matching decimal
// content-length header edit.
#[test]
fn content_length_matches_body() {
	let chat_req = r#"{"model":"m","messages":[{"role":"user","content":"hi"}]}"#;
	let msg_req = r#"{"model":"m","max_tokens":5,"messages":[{"role":"user","content":"hi"}]}"#;
	let cases: Vec<(Box<dyn Translator>, &str)> = vec![
		(
			Box::new(openai::Passthrough::new(&openai_provider(Some("o")))) as Box<dyn Translator>,
			chat_req,
		),
		(
			Box::new(anthropic::FromOpenAI::new(&Default::default())),
			chat_req,
		),
		(Box::new(bedrock::FromOpenAI::new(&bedrock_provider())), chat_req),
		(
			Box::new(gcp_anthropic::FromOpenAI::new(&llm::gcp_anthropic::Provider {
				model: None,
				region: Some(strng::new("us-east5")),
				project_id: strng::new("proj"),
			})),
			chat_req,
		),
		(
			Box::new(gemini::FromOpenAI::new(&llm::vertex::Provider {
				model: None,
				region: None,
				project_id: strng::new("proj"),
			})),
			chat_req,
		),
		(
			Box::new(messages::Passthrough::new(&llm::anthropic::Provider {
				model: Some(strng::new("claude")),
				version: None,
			})),
			msg_req,
		),
		(Box::new(messages::ToBedrock::new(&bedrock_provider())), msg_req),
	];
	for (mut t, body) in cases {
		let out = request(t.as_mut(), body, true);
		let b = out.body.expect("body rewritten");
		assert!(!b.is_empty());
		assert_eq!(
			out.headers.get(HEADER_CONTENT_LENGTH),
			Some(b.len().to_string().as_str()),
		);
	}
}

// Property 2: with an override M, the outgoing model equals M and the
// reported response model is the provider echo or M, never the original.
#[test]
fn model_override_round_trip() {
	let mut t = openai::Passthrough::new(&openai_provider(Some("gpt-5")));
	let out = request(
		&mut t,
		r#"{"unknown_field":1,"model":"gpt-4o","messages":[]}"#,
		false,
	);
	let body: Value = serde_json::from_slice(&out.body.expect("override forces body")).unwrap();
	assert_eq!(body["model"], "gpt-5");
	// Sibling unknown fields flow through untouched.
	assert_eq!(body["unknown_field"], 1);
	assert_eq!(t.request_model(), "gpt-5");

	// Response omits the model: the override wins, not the client value.
	let (_, _, model) = run_stream(&mut t, &[br#"{"choices":[]}"#]);
	assert_eq!(model.as_deref(), Some("gpt-5"));
}

// Property 9 / usage extraction for the non-streaming OpenAI path.
#[test]
fn openai_non_streaming_usage() {
	let mut t = openai::Passthrough::new(&openai_provider(None));
	request(&mut t, r#"{"model":"gpt-4o","messages":[]}"#, false);
	let (_, usage, model) = run_stream(
		&mut t,
		&[br#"{"model":"gpt-4o-2024-08-06","usage":{"prompt_tokens":10,"completion_tokens":5,"total_tokens":15}}"#],
	);
	assert_eq!(usage, LLMTokenUsage::from_totals(10, 5));
	assert_eq!(model.as_deref(), Some("gpt-4o-2024-08-06"));
}

#[test]
fn openai_forces_stream_usage_options() {
	let mut t = openai::Passthrough::new(&openai_provider(None));
	let out = request(&mut t, r#"{"model":"gpt-4o","stream":true,"messages":[]}"#, false);
	let body: Value = serde_json::from_slice(&out.body.expect("stream options added")).unwrap();
	assert_eq!(body["stream_options"]["include_usage"], true);
}

// Scenario S1: OpenAI passthrough streaming.
#[test]
fn openai_passthrough_streaming() {
	let mut t = openai::Passthrough::new(&openai_provider(None));
	request(&mut t, r#"{"model":"gpt-4o","stream":true,"messages":[]}"#, false);

	let mut upstream = Vec::new();
	for i in 0..12 {
		let frame = json!({
			"id": "chatcmpl-1",
			"object": "chat.completion.chunk",
			"created": 1,
			"model": "gpt-4o-mini-2024-07-18",
			"choices": [{"index": 0, "delta": {"content": format!("t{i}")}, "finish_reason": null}],
		});
		sse::encode_data(&serde_json::to_vec(&frame).unwrap(), &mut upstream);
	}
	let usage_frame = json!({
		"id": "chatcmpl-1",
		"object": "chat.completion.chunk",
		"created": 1,
		"model": "gpt-4o-mini-2024-07-18",
		"choices": [],
		"usage": {"prompt_tokens": 25, "completion_tokens": 12, "total_tokens": 37},
	});
	sse::encode_data(&serde_json::to_vec(&usage_frame).unwrap(), &mut upstream);
	upstream.extend_from_slice(sse::DONE_FRAME);

	// Split mid-frame to exercise the residual buffer.
	let cut = upstream.len() / 3;
	let (out, usage, model) = run_stream(&mut t, &[&upstream[..cut], &upstream[cut..]]);
	// Passthrough emits the upstream bytes unchanged.
	assert_eq!(out, upstream);
	let (frames, done) = parse_chunks(&out);
	assert!(frames.len() >= 12);
	assert!(done);
	assert_eq!(usage.output_tokens, 12);
	assert_eq!(model.as_deref(), Some("gpt-4o-mini-2024-07-18"));
}

// Scenario S2: OpenAI → AWS-Anthropic non-streaming request.
#[test]
fn bedrock_request_path_and_body() {
	let mut t = bedrock::FromOpenAI::new(&bedrock_provider());
	let out = request(
		&mut t,
		r#"{"model":"anthropic.claude-3-sonnet-20240229-v1:0","messages":[{"role":"user","content":"Hi"}]}"#,
		false,
	);
	assert_eq!(
		out.headers.get(HEADER_PATH),
		Some("/model/anthropic.claude-3-sonnet-20240229-v1%3A0/invoke"),
	);
	let body: Value = serde_json::from_slice(&out.body.expect("rewritten body")).unwrap();
	assert!(body.get("model").is_none());
	assert_eq!(body["anthropic_version"], "bedrock-2023-05-31");
	assert_eq!(body["messages"][0]["content"][0]["text"], "Hi");
}

// Scenario S3 / property 8: Anthropic streaming tool use reframed to OpenAI
// chunks with stable tool-call indices.
#[test]
fn anthropic_streaming_tool_use() {
	let mut t = anthropic::FromOpenAI::new(&Default::default());
	request(
		&mut t,
		r#"{"model":"claude-3-5-sonnet","stream":true,"messages":[{"role":"user","content":"weather?"}]}"#,
		false,
	);
	let upstream = anthropic_sse_stream();
	let (out, usage, model) = run_stream(&mut t, &[&upstream]);
	let (frames, done) = parse_chunks(&out);
	assert!(done);

	// The first chunk carries the assistant role exactly once.
	let roles: Vec<_> = frames
		.iter()
		.flat_map(|f| &f.choices)
		.filter_map(|c| c.delta.role)
		.collect();
	assert_eq!(roles, vec![chat::Role::Assistant]);

	let start = frames
		.iter()
		.flat_map(|f| &f.choices)
		.filter_map(|c| c.delta.tool_calls.as_ref())
		.find(|tc| tc[0].function.as_ref().and_then(|f| f.name.as_deref()) == Some("get_weather"))
		.expect("tool call start chunk");
	assert_eq!(start[0].index, 0);
	assert_eq!(start[0].id.as_deref(), Some("toolu_01"));

	let args: Vec<_> = frames
		.iter()
		.flat_map(|f| &f.choices)
		.filter_map(|c| c.delta.tool_calls.as_ref())
		.filter_map(|tc| tc[0].function.as_ref().and_then(|f| f.arguments.clone()))
		.collect();
	assert_eq!(args, vec![r#"{"location": "San Fra"#, r#"ncisco"}"#]);
	for f in frames.iter().flat_map(|f| &f.choices) {
		if let Some(tc) = &f.delta.tool_calls {
			assert_eq!(tc[0].index, 0, "argument deltas reuse the start index");
		}
	}

	let finish: Vec<_> = frames
		.iter()
		.flat_map(|f| &f.choices)
		.filter_map(|c| c.finish_reason)
		.collect();
	assert_eq!(finish, vec![chat::FinishReason::ToolCalls]);

	// Usage chunk is present and the aggregate keeps the latest totals.
	assert!(frames.iter().any(|f| f.usage.is_some()));
	assert_eq!(usage, LLMTokenUsage::from_totals(25, 30));
	assert_eq!(model.as_deref(), Some("claude-3-5-sonnet-20241022"));
}

// Property 8 with several distinct tools: indices assigned in
// first-occurrence order.
#[test]
fn tool_call_indices_first_occurrence_order() {
	let mut t = anthropic::FromOpenAI::new(&Default::default());
	request(
		&mut t,
		r#"{"model":"claude","stream":true,"messages":[]}"#,
		false,
	);
	let mut upstream = Vec::new();
	sse::encode_event(
		"message_start",
		ANTHROPIC_TOOL_STREAM[0].as_bytes(),
		&mut upstream,
	);
	for (block, name) in [(1, "alpha"), (2, "beta"), (3, "gamma")] {
		let start = json!({
			"type": "content_block_start",
			"index": block,
			"content_block": {"type": "tool_use", "id": format!("toolu_{block}"), "name": name, "input": {}},
		});
		sse::encode_event(
			"content_block_start",
			&serde_json::to_vec(&start).unwrap(),
			&mut upstream,
		);
	}
	let (out, _, _) = run_stream(&mut t, &[&upstream]);
	let (frames, _) = parse_chunks(&out);
	let indices: Vec<_> = frames
		.iter()
		.flat_map(|f| &f.choices)
		.filter_map(|c| c.delta.tool_calls.as_ref())
		.map(|tc| {
			(
				tc[0].index,
				tc[0]
					.function
					.as_ref()
					.and_then(|f| f.name.clone())
					.unwrap_or_default(),
			)
		})
		.collect();
	assert_eq!(
		indices,
		vec![
			(0, "alpha".to_string()),
			(1, "beta".to_string()),
			(2, "gamma".to_string()),
		]
	);
}

// Property 3: translation is deterministic under adversarial chunking. The
// `created` stamp is taken when the stream opens, so frames are compared
// with it normalized out.
#[test]
fn stream_chunking_invariance() {
	fn normalized(bytes: &[u8]) -> (Vec<Value>, bool) {
		let (frames, done) = parse_chunks(bytes);
		let frames = frames
			.into_iter()
			.map(|mut f| {
				f.created = 0;
				serde_json::to_value(&f).unwrap()
			})
			.collect();
		(frames, done)
	}

	let upstream = anthropic_sse_stream();
	let reference = {
		let mut t = anthropic::FromOpenAI::new(&Default::default());
		request(&mut t, r#"{"model":"claude","stream":true,"messages":[]}"#, false);
		run_stream(&mut t, &[&upstream])
	};
	let reference_frames = normalized(&reference.0);
	assert!(!reference_frames.0.is_empty());

	for cut in 1..upstream.len() {
		let mut t = anthropic::FromOpenAI::new(&Default::default());
		request(&mut t, r#"{"model":"claude","stream":true,"messages":[]}"#, false);
		let split = run_stream(&mut t, &[&upstream[..cut], &upstream[cut..]]);
		assert_eq!(
			normalized(&split.0),
			reference_frames,
			"frames differ when split at {cut}"
		);
		assert_eq!(split.1, reference.1, "usage differs when split at {cut}");
	}
}

// Property 4 / SSE reframing for a non-SSE upstream.
#[test]
fn bedrock_streaming_reframes_to_sse() {
	let mut t = bedrock::FromOpenAI::new(&bedrock_provider());
	request(
		&mut t,
		r#"{"model":"anthropic.claude-3-sonnet-20240229-v1:0","stream":true,"messages":[]}"#,
		false,
	);
	let headers = Headers::from([
		(":status", "200"),
		("content-type", "application/vnd.amazon.eventstream"),
	]);
	let hm = t.response_headers(&headers).unwrap();
	assert_eq!(hm.get(HEADER_CONTENT_TYPE), Some(CONTENT_TYPE_EVENT_STREAM));

	let mut upstream = Vec::new();
	for data in ANTHROPIC_TOOL_STREAM {
		upstream.extend_from_slice(&bedrock_chunk(data.as_bytes()));
	}
	// Arbitrary split across the binary framing.
	let cut = upstream.len() / 2;
	let (out, usage, model) = run_stream(&mut t, &[&upstream[..cut], &upstream[cut..]]);
	assert!(out.ends_with(sse::DONE_FRAME));
	let (frames, done) = parse_chunks(&out);
	assert!(done);
	assert!(!frames.is_empty());
	assert_eq!(usage, LLMTokenUsage::from_totals(25, 30));
	// Virtualization through the path is deterministic.
	assert_eq!(model.as_deref(), Some("anthropic.claude-3-sonnet-20240229-v1:0"));
}

// Anthropic client on Bedrock: the event stream is reframed back into the
// Messages SSE wire format.
#[test]
fn messages_to_bedrock_stream_reframe() {
	let mut t = messages::ToBedrock::new(&bedrock_provider());
	let out = request(
		&mut t,
		r#"{"model":"anthropic.claude-3-sonnet-20240229-v1:0","stream":true,"max_tokens":64,"messages":[{"role":"user","content":"Hi"}],"mystery":true}"#,
		false,
	);
	assert_eq!(
		out.headers.get(HEADER_PATH),
		Some("/model/anthropic.claude-3-sonnet-20240229-v1%3A0/invoke-stream"),
	);
	let body: Value = serde_json::from_slice(&out.body.unwrap()).unwrap();
	assert!(body.get("model").is_none());
	assert_eq!(body["anthropic_version"], "bedrock-2023-05-31");
	// Unknown fields survive the rewrite.
	assert_eq!(body["mystery"], true);

	let mut upstream = Vec::new();
	for data in ANTHROPIC_TOOL_STREAM {
		upstream.extend_from_slice(&bedrock_chunk(data.as_bytes()));
	}
	let (out, usage, _) = run_stream(&mut t, &[&upstream]);
	let text = std::str::from_utf8(&out).unwrap();
	assert!(text.starts_with("event: message_start\n"));
	assert!(text.contains("event: content_block_delta\n"));
	assert!(text.ends_with("data: [DONE]\n\n"));
	assert_eq!(usage, LLMTokenUsage::from_totals(25, 30));
}

// Anthropic passthrough: bytes unchanged, usage watched from the stream.
#[test]
fn messages_passthrough_watches_usage() {
	let mut t = messages::Passthrough::new(&Default::default());
	request(
		&mut t,
		r#"{"model":"claude-3-5-sonnet","stream":true,"max_tokens":64,"messages":[]}"#,
		false,
	);
	let upstream = anthropic_sse_stream();
	let (out, usage, model) = run_stream(&mut t, &[&upstream]);
	assert_eq!(out, upstream);
	assert_eq!(usage, LLMTokenUsage::from_totals(25, 30));
	assert_eq!(model.as_deref(), Some("claude-3-5-sonnet-20241022"));
}

// Scenario S6: error wrapping of a plain-text upstream failure.
#[test]
fn response_error_wraps_plain_text() {
	let mut t = openai::Passthrough::new(&openai_provider(None));
	request(&mut t, r#"{"model":"gpt-4o","messages":[]}"#, false);
	let headers = Headers::from([(":status", "503"), ("content-type", "text/plain")]);
	let out = t
		.response_error(&headers, &Bytes::from_static(b"service not available"))
		.unwrap();
	let body = out.body.expect("wrapped body");
	let parsed: Value = serde_json::from_slice(&body).unwrap();
	assert_eq!(
		parsed,
		json!({
			"type": "error",
			"error": {
				"type": "upstream_backend_error",
				"code": "503",
				"message": "service not available",
			},
		})
	);
	assert_eq!(out.headers.get(HEADER_CONTENT_TYPE), Some(CONTENT_TYPE_JSON));
	assert_eq!(
		out.headers.get(HEADER_CONTENT_LENGTH),
		Some(body.len().to_string().as_str()),
	);
}

// Unknown stop reasons fail translation rather than guessing.
#[test]
fn unknown_stop_reason_is_translation_error() {
	let mut t = anthropic::FromOpenAI::new(&Default::default());
	request(&mut t, r#"{"model":"claude","stream":true,"messages":[]}"#, false);
	let mut upstream = Vec::new();
	sse::encode_event(
		"message_start",
		ANTHROPIC_TOOL_STREAM[0].as_bytes(),
		&mut upstream,
	);
	sse::encode_event(
		"message_delta",
		br#"{"type":"message_delta","delta":{"stop_reason":"novel_reason","stop_sequence":null},"usage":{"output_tokens":2}}"#,
		&mut upstream,
	);
	let err = t.response_body(&upstream, true).unwrap_err();
	assert!(matches!(err, AIError::Translation(_)), "{err}");
}

// Unknown event kinds are forwarded as no-ops, never an error.
#[test]
fn unknown_stream_event_is_noop() {
	let mut t = anthropic::FromOpenAI::new(&Default::default());
	request(&mut t, r#"{"model":"claude","stream":true,"messages":[]}"#, false);
	let mut upstream = Vec::new();
	sse::encode_event(
		"message_start",
		ANTHROPIC_TOOL_STREAM[0].as_bytes(),
		&mut upstream,
	);
	sse::encode_event(
		"shiny_new_event",
		br#"{"type":"shiny_new_event","stuff":1}"#,
		&mut upstream,
	);
	let res = t.response_body(&upstream, true).unwrap();
	let (frames, done) = parse_chunks(&res.body.unwrap());
	assert!(done);
	// message_start role chunk + synthesized usage chunk only.
	assert_eq!(frames.len(), 2);
}

// A tool block that never receives stop still has its accumulated arguments
// on the wire when the stream ends.
#[test]
fn truncated_tool_block_flushes_at_eos() {
	let mut t = anthropic::FromOpenAI::new(&Default::default());
	request(&mut t, r#"{"model":"claude","stream":true,"messages":[]}"#, false);
	let mut upstream = Vec::new();
	for data in &ANTHROPIC_TOOL_STREAM[..7] {
		let name = serde_json::from_str::<Value>(data).unwrap()["type"]
			.as_str()
			.unwrap()
			.to_string();
		sse::encode_event(&name, data.as_bytes(), &mut upstream);
	}
	let (out, _, _) = run_stream(&mut t, &[&upstream]);
	let (frames, done) = parse_chunks(&out);
	assert!(done);
	let args: Vec<_> = frames
		.iter()
		.flat_map(|f| &f.choices)
		.filter_map(|c| c.delta.tool_calls.as_ref())
		.filter_map(|tc| tc[0].function.as_ref().and_then(|f| f.arguments.clone()))
		.collect();
	assert_eq!(args.join(""), r#"{"location": "San Francisco"}"#);
	// The synthesized final chunk still reports usage.
	assert!(frames.iter().any(|f| f.usage.is_some()));
}

#[test]
fn gemini_request_translation() {
	let mut t = gemini::FromOpenAI::new(&llm::vertex::Provider {
		model: None,
		region: Some(strng::new("us-central1")),
		project_id: strng::new("proj"),
	});
	let out = request(
		&mut t,
		r##"{
			"model": "gemini-2.0-flash",
			"messages": [
				{"role": "system", "content": "be brief"},
				{"role": "user", "content": "what is the weather?"}
			],
			"temperature": 0.5,
			"max_tokens": 100,
			"tools": [{"type": "function", "function": {"name": "get_weather", "parameters": {
				"type": "object",
				"properties": {"location": {"$ref": "#/$defs/loc"}},
				"required": ["location"],
				"$defs": {"loc": {"type": "string", "description": "city name"}}
			}}}],
			"tool_choice": "auto"
		}"##,
		false,
	);
	assert_eq!(
		out.headers.get(HEADER_PATH),
		Some("/v1/projects/proj/locations/us-central1/publishers/google/models/gemini-2.0-flash:generateContent"),
	);
	let body: Value = serde_json::from_slice(&out.body.unwrap()).unwrap();
	assert_eq!(body["systemInstruction"]["parts"][0]["text"], "be brief");
	assert_eq!(body["contents"][0]["role"], "user");
	assert_eq!(body["generationConfig"]["temperature"], 0.5);
	assert_eq!(body["generationConfig"]["maxOutputTokens"], 100);
	let decl = &body["tools"][0]["functionDeclarations"][0];
	assert_eq!(decl["name"], "get_weather");
	// $ref resolved into the Gapic shape.
	assert_eq!(decl["parameters"]["properties"]["location"]["type"], "STRING");
	assert_eq!(
		decl["parameters"]["properties"]["location"]["description"],
		"city name"
	);
	assert_eq!(body["toolConfig"]["functionCallingConfig"]["mode"], "AUTO");
}

#[test]
fn gemini_schema_cycle_is_refused() {
	let schema = json!({
		"type": "object",
		"properties": {"node": {"$ref": "#/$defs/node"}},
		"$defs": {"node": {"type": "object", "properties": {"next": {"$ref": "#/$defs/node"}}}},
	});
	let err = gemini::to_gemini_schema(&schema).unwrap_err();
	assert!(matches!(err, AIError::Translation(_)), "{err}");
}

#[test]
fn gemini_guided_choice() {
	let mut t = gemini::FromOpenAI::new(&llm::vertex::Provider {
		model: None,
		region: None,
		project_id: strng::new("proj"),
	});
	let out = request(
		&mut t,
		r#"{"model":"gemini-2.0-flash","messages":[{"role":"user","content":"pick"}],"guided_choice":["a","b"]}"#,
		false,
	);
	let body: Value = serde_json::from_slice(&out.body.unwrap()).unwrap();
	assert_eq!(body["generationConfig"]["responseMimeType"], "text/x.enum");
	assert_eq!(body["generationConfig"]["responseSchema"]["enum"], json!(["a", "b"]));
}

#[test]
fn gemini_streaming_additive_usage() {
	let mut t = gemini::FromOpenAI::new(&llm::vertex::Provider {
		model: None,
		region: None,
		project_id: strng::new("proj"),
	});
	request(
		&mut t,
		r#"{"model":"gemini-2.0-flash","stream":true,"messages":[]}"#,
		false,
	);
	let headers = Headers::from([(":status", "200"), ("content-type", "application/json")]);
	let hm = t.response_headers(&headers).unwrap();
	assert_eq!(hm.get(HEADER_CONTENT_TYPE), Some(CONTENT_TYPE_EVENT_STREAM));

	let mut upstream = Vec::new();
	for (text, out_tokens) in [("Hel", 2), ("lo", 3)] {
		let frame = json!({
			"candidates": [{"content": {"role": "model", "parts": [{"text": text}]}, "index": 0}],
			"usageMetadata": {"promptTokenCount": 0, "candidatesTokenCount": out_tokens, "totalTokenCount": out_tokens},
			"modelVersion": "gemini-2.0-flash-001",
		});
		sse::encode_data(&serde_json::to_vec(&frame).unwrap(), &mut upstream);
	}
	let final_frame = json!({
		"candidates": [{"content": {"role": "model", "parts": []}, "finishReason": "STOP", "index": 0}],
		"usageMetadata": {"promptTokenCount": 7, "candidatesTokenCount": 0, "totalTokenCount": 7},
	});
	sse::encode_data(&serde_json::to_vec(&final_frame).unwrap(), &mut upstream);

	let (out, usage, model) = run_stream(&mut t, &[&upstream]);
	let (frames, done) = parse_chunks(&out);
	assert!(done);
	let text: String = frames
		.iter()
		.flat_map(|f| &f.choices)
		.filter_map(|c| c.delta.content.clone())
		.collect();
	assert_eq!(text, "Hello");
	// Additive across chunks.
	assert_eq!(usage.input_tokens, 7);
	assert_eq!(usage.output_tokens, 5);
	assert_eq!(usage.total_tokens, 12);
	assert_eq!(model.as_deref(), Some("gemini-2.0-flash-001"));
}

#[test]
fn rerank_passthrough() {
	let mut t = rerank::Passthrough::new(&llm::cohere::Provider { model: None });
	let out = request(
		&mut t,
		r#"{"model":"rerank-v3.5","query":"q","documents":["a","b"],"top_n":1}"#,
		false,
	);
	assert_eq!(out.headers.get(HEADER_PATH), Some("/v2/rerank"));
	assert!(out.body.is_none());

	let upstream = br#"{"results":[{"index":1,"relevance_score":0.9}],"id":"x","meta":{"billed_units":{"search_units":1},"tokens":{"input_tokens":12,"output_tokens":2}}}"#;
	let (out, usage, model) = run_stream(&mut t, &[upstream]);
	assert_eq!(out, upstream);
	assert_eq!(usage, LLMTokenUsage::from_totals(12, 2));
	assert_eq!(model.as_deref(), Some("rerank-v3.5"));
}

#[test]
fn embeddings_passthrough() {
	let mut t = embeddings::Passthrough::new(&openai_provider(Some("text-embedding-4")));
	let out = request(&mut t, r#"{"model":"text-embedding-3","input":"hi"}"#, false);
	assert_eq!(out.headers.get(HEADER_PATH), Some("/v1/embeddings"));
	let body: Value = serde_json::from_slice(&out.body.unwrap()).unwrap();
	assert_eq!(body["model"], "text-embedding-4");

	let upstream = br#"{"object":"list","model":"text-embedding-4","data":[{"index":0,"object":"embedding","embedding":[0.1]}],"usage":{"prompt_tokens":4,"total_tokens":4}}"#;
	let (_, usage, model) = run_stream(&mut t, &[upstream]);
	assert_eq!(usage.input_tokens, 4);
	assert_eq!(usage.total_tokens, 4);
	assert_eq!(model.as_deref(), Some("text-embedding-4"));
}

// Anthropic non-streaming translation to a chat completion.
#[test]
fn anthropic_non_streaming_response() {
	let mut t = anthropic::FromOpenAI::new(&Default::default());
	request(&mut t, r#"{"model":"claude-3-5-sonnet","messages":[]}"#, false);
	let upstream = br#"{
		"id": "msg_01",
		"type": "message",
		"role": "assistant",
		"content": [
			{"type": "text", "text": "Hello!"},
			{"type": "tool_use", "id": "toolu_9", "name": "lookup", "input": {"q": 1}}
		],
		"model": "claude-3-5-sonnet-20241022",
		"stop_reason": "tool_use",
		"stop_sequence": null,
		"usage": {"input_tokens": 9, "output_tokens": 4, "cache_read_input_tokens": 3}
	}"#;
	let (out, usage, model) = run_stream(&mut t, &[upstream]);
	let resp: chat::Response = serde_json::from_slice(&out).unwrap();
	assert_eq!(resp.model, "claude-3-5-sonnet-20241022");
	assert_eq!(resp.choices[0].message.content.as_deref(), Some("Hello!"));
	let tc = resp.choices[0].message.tool_calls.as_ref().unwrap();
	assert_eq!(tc[0].function.name, "lookup");
	assert_eq!(tc[0].function.arguments, r#"{"q":1}"#);
	assert_eq!(
		resp.choices[0].finish_reason,
		Some(chat::FinishReason::ToolCalls)
	);
	assert_eq!(usage, LLMTokenUsage::from_totals(9, 4).with_cached(3));
	assert_eq!(model.as_deref(), Some("claude-3-5-sonnet-20241022"));
	// Cached input tokens surface in the translated usage block.
	assert_eq!(
		resp.usage.unwrap().prompt_tokens_details.unwrap().cached_tokens,
		3
	);
}

// OpenAI → Anthropic request translation details.
#[test]
fn openai_to_anthropic_request() {
	let mut t = anthropic::FromOpenAI::new(&llm::anthropic::Provider {
		model: None,
		version: None,
	});
	let out = request(
		&mut t,
		r#"{
			"model": "claude-3-5-sonnet",
			"messages": [
				{"role": "system", "content": "be kind"},
				{"role": "user", "content": [{"type": "text", "text": "hello"}]},
				{"role": "assistant", "content": null, "tool_calls": [
					{"id": "call_1", "type": "function", "function": {"name": "f", "arguments": "{\"x\":1}"}}
				]},
				{"role": "tool", "tool_call_id": "call_1", "content": "42"}
			],
			"max_completion_tokens": 32,
			"stop": ["END"],
			"temperature": 0.1
		}"#,
		false,
	);
	assert_eq!(out.headers.get(HEADER_PATH), Some("/v1/messages"));
	assert_eq!(out.headers.get("anthropic-version"), Some("2023-06-01"));
	let body: Value = serde_json::from_slice(&out.body.unwrap()).unwrap();
	assert_eq!(body["system"], "be kind");
	assert_eq!(body["max_tokens"], 32);
	assert_eq!(body["stop_sequences"], json!(["END"]));
	assert_eq!(body["temperature"], 0.1);
	let msgs = body["messages"].as_array().unwrap();
	assert_eq!(msgs.len(), 3);
	assert_eq!(msgs[0]["role"], "user");
	assert_eq!(msgs[1]["content"][0]["type"], "tool_use");
	assert_eq!(msgs[1]["content"][0]["id"], "call_1");
	assert_eq!(msgs[2]["content"][0]["type"], "tool_result");
	assert_eq!(msgs[2]["content"][0]["tool_use_id"], "call_1");
}

// Vendor extension bags are forwarded verbatim to the matching provider.
#[test]
fn anthropic_vendor_extension_bag_preserved() {
	let mut t = anthropic::FromOpenAI::new(&Default::default());
	let out = request(
		&mut t,
		r#"{"model":"claude-3-7-sonnet","messages":[{"role":"user","content":"hi"}],"anthropic":{"thinking":{"type":"enabled","budget_tokens":1024}}}"#,
		false,
	);
	let body: Value = serde_json::from_slice(&out.body.unwrap()).unwrap();
	assert_eq!(body["thinking"]["budget_tokens"], 1024);
	assert!(body.get("anthropic").is_none());
}
