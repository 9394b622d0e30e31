//! The upstream external processor.
//!
//! Each data-plane HTTP request is carried by one gRPC stream; the stream
//! binds a single translator instance which is driven in the fixed
//! RequestBody → ResponseHeaders → ResponseBody order. Token usage is
//! reported as dynamic metadata on the final response-body message.

use aigw_protos::envoy::config::core::v3 as core;
use aigw_protos::envoy::service::ext_proc::v3 as pb;
use aigw_protos::envoy::service::ext_proc::v3::external_processor_server::{
	ExternalProcessor, ExternalProcessorServer,
};
use bytes::BytesMut;
use pb::processing_request::Request as Incoming;
use pb::processing_response::Response as Outgoing;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status, Streaming};

use crate::filterapi::{self, ConfigSnapshot};
use crate::llm::translator::{self, HeaderMutation, Headers, Translator};
use crate::llm::{AIError, RouteType, usage};
use crate::*;

/// Filter-metadata namespace for the usage record.
pub const METADATA_NAMESPACE: &str = "aigateway.envoy.io";

/// Upper bound for messages arriving from the data plane (bodies are
/// streamed, but buffered request bodies can be large).
pub const MAX_RECEIVE_MESSAGE_SIZE: usize = 512 * 1024 * 1024;

pub struct ExtProcService {
	config: Arc<ConfigSnapshot>,
}

impl ExtProcService {
	pub fn new(config: Arc<ConfigSnapshot>) -> Self {
		ExtProcService { config }
	}
}

#[tonic::async_trait]
impl ExternalProcessor for ExtProcService {
	type ProcessStream =
		Pin<Box<dyn futures_core::Stream<Item = Result<pb::ProcessingResponse, Status>> + Send>>;

	async fn process(
		&self,
		request: Request<Streaming<pb::ProcessingRequest>>,
	) -> Result<Response<Self::ProcessStream>, Status> {
		let mut inbound = request.into_inner();
		let (tx, rx) = tokio::sync::mpsc::channel(16);
		let config = self.config.clone();
		tokio::task::spawn(async move {
			let mut handler = StreamHandler::new(config);
			loop {
				let msg = match inbound.next().await {
					Some(Ok(msg)) => msg,
					Some(Err(e)) => {
						debug!("processing stream error: {e}");
						return;
					},
					// Stream cancelled or finished; state is discarded.
					None => return,
				};
				let resp = match handler.handle(msg) {
					Ok(resp) => resp,
					Err(status) => {
						let _ = tx.send(Err(status)).await;
						return;
					},
				};
				if tx.send(Ok(resp)).await.is_err() {
					return;
				}
			}
		});
		Ok(Response::new(Box::pin(ReceiverStream::new(rx))))
	}
}

/// serve_uds runs the external processor on a unix domain socket until
/// shutdown is signalled. The socket is released on exit.
pub async fn serve_uds(
	path: &std::path::Path,
	config: Arc<ConfigSnapshot>,
	shutdown: impl Future<Output = ()>,
) -> anyhow::Result<()> {
	// A stale socket from an unclean exit would fail the bind.
	let _ = std::fs::remove_file(path);
	if let Some(parent) = path.parent() {
		std::fs::create_dir_all(parent)?;
	}
	let listener = tokio::net::UnixListener::bind(path)?;
	info!("external processor listening on {}", path.display());
	let incoming = tokio_stream::wrappers::UnixListenerStream::new(listener);
	tonic::transport::Server::builder()
		.add_service(
			ExternalProcessorServer::new(ExtProcService::new(config))
				.max_decoding_message_size(MAX_RECEIVE_MESSAGE_SIZE),
		)
		.serve_with_incoming_shutdown(incoming, shutdown)
		.await?;
	let _ = std::fs::remove_file(path);
	Ok(())
}

/// Per-stream state. Methods are called by exactly one task.
pub struct StreamHandler {
	config: Arc<ConfigSnapshot>,
	backend: Option<Arc<filterapi::Backend>>,
	translator: Option<Box<dyn Translator>>,
	aggregator: Option<usage::Aggregator>,
	response_model: Option<Strng>,
	upstream_error: bool,
	response_headers: Headers,
	error_buffer: BytesMut,
}

impl StreamHandler {
	pub fn new(config: Arc<ConfigSnapshot>) -> Self {
		StreamHandler {
			config,
			backend: None,
			translator: None,
			aggregator: None,
			response_model: None,
			upstream_error: false,
			response_headers: Headers::default(),
			error_buffer: BytesMut::new(),
		}
	}

	pub fn handle(&mut self, msg: pb::ProcessingRequest) -> Result<pb::ProcessingResponse, Status> {
		match msg.request {
			Some(Incoming::RequestHeaders(h)) => Ok(self.on_request_headers(h)),
			Some(Incoming::RequestBody(b)) => Ok(self.on_request_body(b)),
			Some(Incoming::ResponseHeaders(h)) => Ok(self.on_response_headers(h)),
			Some(Incoming::ResponseBody(b)) => self.on_response_body(b),
			Some(Incoming::RequestTrailers(_)) => Ok(trailers_response(true)),
			Some(Incoming::ResponseTrailers(_)) => Ok(trailers_response(false)),
			None => Err(Status::invalid_argument("empty processing request")),
		}
	}

	fn on_request_headers(&mut self, h: pb::HttpHeaders) -> pb::ProcessingResponse {
		let headers = to_headers(h.headers.as_ref());
		let route = headers.get(":path").and_then(RouteType::from_path);
		let backend = headers
			.get(filterapi::SELECTED_BACKEND_HEADER)
			.and_then(|name| self.config.backend(name));
		match (route, backend) {
			(Some(route), Some(backend)) => {
				match translator::new_translator(route, &backend.schema) {
					Ok(t) => {
						self.aggregator = Some(usage::Aggregator::new(t.usage_mode()));
						self.translator = Some(t);
						self.backend = Some(backend);
					},
					Err(e) => {
						warn!(backend = %backend.name, "no translator for request: {e}");
					},
				}
			},
			_ => {
				// Not an AI route for us; everything passes through untouched.
				trace!("request without route/backend match, passing through");
			},
		}
		wrap(Outgoing::RequestHeaders(pb::HeadersResponse {
			response: Some(pb::CommonResponse::default()),
		}))
	}

	fn on_request_body(&mut self, b: pb::HttpBody) -> pb::ProcessingResponse {
		let Some(translator) = self.translator.as_mut() else {
			return wrap(Outgoing::RequestBody(pb::BodyResponse { response: None }));
		};
		let force = self
			.backend
			.as_ref()
			.map(|b| b.force_request_body_mutation)
			.unwrap_or_default();
		let raw = Bytes::from(b.body);
		match translator.request_body(&raw, force) {
			Ok(mut transform) => {
				if let Some(auth) = self.backend.as_ref().and_then(|b| b.auth.as_ref()) {
					let (header, value) = auth.header_value();
					transform.headers.set(header, value);
				}
				let body_mutation = transform.body.map(|body| pb::BodyMutation {
					mutation: Some(pb::body_mutation::Mutation::Body(body.into())),
				});
				let mut resp = wrap(Outgoing::RequestBody(pb::BodyResponse {
					response: Some(pb::CommonResponse {
						header_mutation: Some(to_header_mutation(&transform.headers)),
						body_mutation,
						clear_route_cache: true,
						..Default::default()
					}),
				}));
				// The data plane re-buffers the mutated body, so the upstream
				// header_mutation filter restores content-length from here.
				resp.dynamic_metadata = transform.content_length.map(content_length_metadata);
				resp
			},
			Err(e) => immediate_error(&e),
		}
	}

	fn on_response_headers(&mut self, h: pb::HttpHeaders) -> pb::ProcessingResponse {
		self.response_headers = to_headers(h.headers.as_ref());
		self.upstream_error = !matches!(
			self.response_headers.status().and_then(|s| s.parse::<u16>().ok()),
			Some(200..=299)
		);
		let Some(translator) = self.translator.as_mut() else {
			return wrap(Outgoing::ResponseHeaders(pb::HeadersResponse {
				response: None,
			}));
		};
		if self.upstream_error {
			// The error body is wrapped once fully buffered; edits come then.
			return wrap(Outgoing::ResponseHeaders(pb::HeadersResponse {
				response: Some(pb::CommonResponse::default()),
			}));
		}
		match translator.response_headers(&self.response_headers) {
			Ok(hm) => {
				let mut hm = hm;
				if translator.streaming() {
					// The rewritten stream has no meaningful length up front.
					hm.remove.push(strng::new(translator::HEADER_CONTENT_LENGTH));
				}
				wrap(Outgoing::ResponseHeaders(pb::HeadersResponse {
					response: Some(pb::CommonResponse {
						header_mutation: Some(to_header_mutation(&hm)),
						..Default::default()
					}),
				}))
			},
			Err(e) => {
				warn!("response header translation failed: {e}");
				immediate_error(&e)
			},
		}
	}

	fn on_response_body(
		&mut self,
		b: pb::HttpBody,
	) -> Result<pb::ProcessingResponse, Status> {
		let Some(translator) = self.translator.as_mut() else {
			return Ok(streamed_body(b.body.into(), b.end_of_stream, None, None));
		};
		if self.upstream_error {
			self.error_buffer.extend_from_slice(&b.body);
			if !b.end_of_stream {
				return Ok(streamed_body(Bytes::new(), false, None, None));
			}
			let buffered = Bytes::from(std::mem::take(&mut self.error_buffer));
			let transform = translator
				.response_error(&self.response_headers, &buffered)
				.map_err(|e| Status::internal(e.to_string()))?;
			let body = transform.body.map(Bytes::from).unwrap_or(buffered);
			return Ok(streamed_body(
				body,
				true,
				Some(to_header_mutation(&transform.headers)),
				None,
			));
		}
		match translator.response_body(&b.body, b.end_of_stream) {
			Ok(transform) => {
				if let (Some(agg), Some(u)) = (self.aggregator.as_mut(), transform.usage) {
					agg.observe(u);
				}
				if let Some(m) = transform.model {
					self.response_model = Some(m);
				}
				let body = transform
					.body
					.map(Bytes::from)
					.unwrap_or_else(|| Bytes::from(b.body));
				let metadata = if b.end_of_stream {
					Some(self.usage_metadata())
				} else {
					None
				};
				let header_mutation = if transform.headers.is_empty() {
					None
				} else {
					Some(to_header_mutation(&transform.headers))
				};
				Ok(streamed_body(body, b.end_of_stream, header_mutation, metadata))
			},
			Err(e) => {
				warn!("response translation failed: {e}");
				Err(Status::internal(e.to_string()))
			},
		}
	}

	/// The per-request accounting record, placed under the gateway's
	/// filter-metadata namespace for access logs and rate limiting.
	fn usage_metadata(&self) -> prost_types::Struct {
		use prost_types::value::Kind;
		let usage = self
			.aggregator
			.as_ref()
			.map(|a| a.total())
			.unwrap_or_default();
		let number = |v: u32| prost_types::Value {
			kind: Some(Kind::NumberValue(v as f64)),
		};
		let string = |v: String| prost_types::Value {
			kind: Some(Kind::StringValue(v)),
		};
		let mut fields = std::collections::BTreeMap::from([
			("input_tokens".to_string(), number(usage.input_tokens)),
			("output_tokens".to_string(), number(usage.output_tokens)),
			("total_tokens".to_string(), number(usage.total_tokens)),
			(
				"cached_input_tokens".to_string(),
				number(usage.cached_input_tokens),
			),
		]);
		if let Some(model) = &self.response_model {
			fields.insert("response_model".to_string(), string(model.to_string()));
		}
		if let Some(backend) = &self.backend {
			fields.insert("backend".to_string(), string(backend.name.to_string()));
		}
		let inner = prost_types::Struct {
			fields: fields.into_iter().collect(),
		};
		prost_types::Struct {
			fields: std::collections::BTreeMap::from([(
				METADATA_NAMESPACE.to_string(),
				prost_types::Value {
					kind: Some(Kind::StructValue(inner)),
				},
			)])
			.into_iter()
			.collect(),
		}
	}
}

fn wrap(resp: Outgoing) -> pb::ProcessingResponse {
	pb::ProcessingResponse {
		response: Some(resp),
		..Default::default()
	}
}

/// The `content_length` entry consumed by the injected upstream
/// header_mutation filter (`%DYNAMIC_METADATA(aigateway.envoy.io:content_length)%`).
fn content_length_metadata(len: u64) -> prost_types::Struct {
	use prost_types::value::Kind;
	let inner = prost_types::Struct {
		fields: [(
			"content_length".to_string(),
			prost_types::Value {
				kind: Some(Kind::NumberValue(len as f64)),
			},
		)]
		.into_iter()
		.collect(),
	};
	prost_types::Struct {
		fields: [(
			METADATA_NAMESPACE.to_string(),
			prost_types::Value {
				kind: Some(Kind::StructValue(inner)),
			},
		)]
		.into_iter()
		.collect(),
	}
}

fn trailers_response(request: bool) -> pb::ProcessingResponse {
	let resp = pb::TrailersResponse::default();
	wrap(if request {
		Outgoing::RequestTrailers(resp)
	} else {
		Outgoing::ResponseTrailers(resp)
	})
}

fn streamed_body(
	body: Bytes,
	end_of_stream: bool,
	header_mutation: Option<pb::HeaderMutation>,
	dynamic_metadata: Option<prost_types::Struct>,
) -> pb::ProcessingResponse {
	pb::ProcessingResponse {
		response: Some(Outgoing::ResponseBody(pb::BodyResponse {
			response: Some(pb::CommonResponse {
				header_mutation,
				body_mutation: Some(pb::BodyMutation {
					mutation: Some(pb::body_mutation::Mutation::StreamedResponse(
						pb::StreamedBodyResponse {
							body: body.into(),
							end_of_stream,
						},
					)),
				}),
				..Default::default()
			}),
		})),
		dynamic_metadata,
		..Default::default()
	}
}

/// A request-schema failure is the client's fault and short-circuits with a
/// 4xx; anything else surfaces as a 502 from the gateway.
fn immediate_error(e: &AIError) -> pb::ProcessingResponse {
	let code = if e.client_error() { 400 } else { 502 };
	let envelope = crate::llm::types::ErrorEnvelope {
		r#type: "error".to_string(),
		error: crate::llm::types::ErrorBody {
			r#type: if e.client_error() {
				"invalid_request_error".to_string()
			} else {
				"translation_error".to_string()
			},
			code: Some(code.to_string()),
			message: e.to_string(),
		},
	};
	let body = serde_json::to_string(&envelope).expect("error envelope is always serializable");
	wrap(Outgoing::ImmediateResponse(pb::ImmediateResponse {
		status: Some(core::HttpStatus { code }),
		headers: Some(pb::HeaderMutation {
			set_headers: vec![set_header(
				translator::HEADER_CONTENT_TYPE,
				translator::CONTENT_TYPE_JSON,
			)],
			remove_headers: vec![],
		}),
		body,
		grpc_status: None,
		details: String::new(),
	}))
}

fn set_header(key: &str, value: &str) -> core::HeaderValueOption {
	core::HeaderValueOption {
		header: Some(core::HeaderValue {
			key: key.to_string(),
			value: String::new(),
			raw_value: value.as_bytes().to_vec(),
		}),
		append_action: core::header_value_option::HeaderAppendAction::OverwriteIfExistsOrAdd
			as i32,
	}
}

fn to_headers(map: Option<&core::HeaderMap>) -> Headers {
	let Some(map) = map else {
		return Headers::default();
	};
	Headers::new(
		map.headers
			.iter()
			.map(|h| {
				let value = if h.raw_value.is_empty() {
					strng::new(&h.value)
				} else {
					strng::new(String::from_utf8_lossy(&h.raw_value).as_ref())
				};
				(strng::new(&h.key), value)
			})
			.collect(),
	)
}

fn to_header_mutation(hm: &HeaderMutation) -> pb::HeaderMutation {
	pb::HeaderMutation {
		set_headers: hm
			.set
			.iter()
			.map(|(k, v)| set_header(k.as_str(), v.as_str()))
			.collect(),
		remove_headers: hm.remove.iter().map(|r| r.to_string()).collect(),
	}
}
