//! The central post-translate mutation: per-endpoint backend metadata, the
//! upstream translator filter, and the UDS cluster reaching it.

use aigw_protos::envoy::config::cluster::v3::Cluster;
use aigw_protos::envoy::config::cluster::v3::cluster as cluster_pb;
use aigw_protos::envoy::config::common::mutation_rules::v3 as mutation_rules;
use aigw_protos::envoy::config::core::v3 as core;
use aigw_protos::envoy::config::endpoint::v3 as endpoint;
use aigw_protos::envoy::extensions::filters::http::ext_proc::v3 as extproc_filter;
use aigw_protos::envoy::extensions::filters::http::header_mutation::v3 as header_mutation_filter;
use aigw_protos::envoy::extensions::filters::http::upstream_codec::v3::UpstreamCodec;
use aigw_protos::envoy::extensions::filters::network::http_connection_manager::v3 as hcm;
use aigw_protos::envoy::extensions::upstreams::http::v3 as upstreams_http;
use aigw_protos::extension::aigateway::v1 as ext;

use super::{ConfigurationError, RouteRuleRef, duration, pack, unpack};
use crate::store::RouteStore;
use crate::{names, *};

/// The map key Envoy requires for upstream HTTP protocol options.
const HTTP_PROTOCOL_OPTIONS_KEY: &str = "envoy.extensions.upstreams.http.v3.HttpProtocolOptions";

const DEFAULT_CONNECT_TIMEOUT_SECS: i64 = 10;
const UDS_BUFFER_LIMIT_BYTES: u32 = 50 * 1024 * 1024;
const UDS_STREAM_WINDOW_BYTES: u32 = 16 * 1024 * 1024;
const UDS_CONNECTION_WINDOW_BYTES: u32 = 32 * 1024 * 1024;
const EXTPROC_MESSAGE_TIMEOUT_SECS: i64 = 30;

/// post_translate applies the full snapshot mutation. Per-cluster failures
/// are logged and skipped rather than failing the whole xDS push.
pub fn post_translate(
	req: ext::PostTranslateModifyRequest,
	store: &RouteStore,
	uds_path: &str,
) -> ext::PostTranslateModifyResponse {
	let ext::PostTranslateModifyRequest {
		mut clusters,
		secrets,
		mut listeners,
		mut routes,
	} = req;

	for cluster in clusters.iter_mut() {
		if cluster.name == names::ORIGINAL_DST_CLUSTER {
			configure_original_dst(cluster);
			continue;
		}
		let Some(rule_ref) = RouteRuleRef::parse(&cluster.name) else {
			continue;
		};
		if has_inference_pool_metadata(cluster) {
			// Endpoint selection is the endpoint picker's job here; the
			// cluster-level stamp is already in place.
			trace!(cluster = %cluster.name, "inference pool cluster, skipping endpoint annotation");
		} else if let Err(e) = annotate_endpoints(cluster, &rule_ref, store) {
			warn!(cluster = %cluster.name, "skipping endpoint annotation: {e}");
		}
		if let Err(e) = ensure_upstream_extproc(cluster) {
			warn!(cluster = %cluster.name, "skipping translator filter injection: {e}");
		}
	}

	if !clusters.iter().any(|c| c.name == names::EXTPROC_UDS_CLUSTER) {
		clusters.push(uds_cluster(uds_path));
	}

	for pool in super::inference::discover_pools(&routes) {
		if !clusters.iter().any(|c| c.name == pool.cluster_name()) {
			clusters.push(super::inference::endpoint_picker_cluster(&pool));
		}
		super::inference::insert_listener_filter(&mut listeners, &pool);
		super::inference::disable_on_unrelated_routes(&mut routes, &pool);
	}

	super::mcp::apply(&mut listeners, &mut routes);

	ext::PostTranslateModifyResponse {
		clusters,
		secrets,
		listeners,
		routes,
	}
}

/// configure_original_dst sets up the legacy route-pinning cluster: the
/// destination is whatever ip:port the request carries in the
/// x-ai-eg-original-dst header. No-op once the lb config is in place.
fn configure_original_dst(cluster: &mut Cluster) {
	if cluster.lb_config.is_some() {
		return;
	}
	cluster.cluster_discovery_type = Some(cluster_pb::ClusterDiscoveryType::Type(
		cluster_pb::DiscoveryType::OriginalDst as i32,
	));
	cluster.lb_policy = cluster_pb::LbPolicy::ClusterProvided as i32;
	cluster.lb_config = Some(cluster_pb::LbConfig::OriginalDstLbConfig(
		cluster_pb::OriginalDstLbConfig {
			use_http_header: true,
			http_header_name: names::ORIGINAL_DST_HEADER.to_string(),
		},
	));
	if cluster.connect_timeout.is_none() {
		cluster.connect_timeout = Some(duration(DEFAULT_CONNECT_TIMEOUT_SECS));
	}
}

pub(super) fn has_inference_pool_metadata(cluster: &Cluster) -> bool {
	cluster
		.metadata
		.as_ref()
		.and_then(|m| m.filter_metadata.get(names::METADATA_NAMESPACE))
		.map(|s| s.fields.contains_key(names::METADATA_INFERENCE_POOL_KEY))
		.unwrap_or_default()
}

/// annotate_endpoints stamps the canonical backend name onto every endpoint
/// and aligns endpoint-group priorities with the backend refs.
fn annotate_endpoints(
	cluster: &mut Cluster,
	rule_ref: &RouteRuleRef,
	store: &RouteStore,
) -> Result<(), ConfigurationError> {
	let route = store
		.get(&rule_ref.namespace, &rule_ref.name)
		.ok_or_else(|| ConfigurationError::RouteNotFound {
			namespace: rule_ref.namespace.clone(),
			name: rule_ref.name.clone(),
		})?;
	let Some(rule) = route.rules.get(rule_ref.rule_index) else {
		return Err(ConfigurationError::RouteNotFound {
			namespace: rule_ref.namespace.clone(),
			name: strng::format!("{}#rule{}", rule_ref.name, rule_ref.rule_index),
		});
	};
	let Some(assignment) = cluster.load_assignment.as_mut() else {
		return Ok(());
	};
	for (ref_index, group) in assignment.endpoints.iter_mut().enumerate() {
		let Some(backend) = rule.backend_refs.get(ref_index) else {
			continue;
		};
		group.priority = backend.priority;
		let backend_name = rule_ref.backend_name(&backend.name, ref_index);
		for lb in group.lb_endpoints.iter_mut() {
			set_endpoint_metadata(lb, &backend_name);
		}
	}
	Ok(())
}

fn set_endpoint_metadata(lb: &mut endpoint::LbEndpoint, backend_name: &str) {
	let metadata = lb.metadata.get_or_insert_with(Default::default);
	let entry = metadata
		.filter_metadata
		.entry(names::METADATA_NAMESPACE.to_string())
		.or_default();
	entry.fields.insert(
		names::METADATA_BACKEND_NAME_KEY.to_string(),
		prost_types::Value {
			kind: Some(prost_types::value::Kind::StringValue(
				backend_name.to_string(),
			)),
		},
	);
}

/// ensure_upstream_extproc wires the translator into the cluster's upstream
/// filter chain: the ext_proc filter ahead of the terminal codec, and a
/// header_mutation filter behind it restoring the request content-length
/// from dynamic metadata. Applying it twice is a no-op.
pub(super) fn ensure_upstream_extproc(cluster: &mut Cluster) -> Result<(), ConfigurationError> {
	let mut options: upstreams_http::HttpProtocolOptions = match cluster
		.typed_extension_protocol_options
		.get(HTTP_PROTOCOL_OPTIONS_KEY)
	{
		Some(any) => unpack(any)?,
		None => Default::default(),
	};

	if options.http_filters.iter().any(|f| f.name == names::EXTPROC_FILTER) {
		return Ok(());
	}

	let inserted = [extproc_http_filter(), header_mutation_http_filter()];
	match options
		.http_filters
		.iter()
		.position(|f| f.name == names::UPSTREAM_CODEC_FILTER)
	{
		Some(codec) => {
			options.http_filters.splice(codec..codec, inserted);
		},
		None => {
			options.http_filters.extend(inserted);
			options.http_filters.push(hcm::HttpFilter {
				name: names::UPSTREAM_CODEC_FILTER.to_string(),
				config_type: Some(hcm::http_filter::ConfigType::TypedConfig(pack(
					&UpstreamCodec::default(),
				))),
				is_optional: false,
				disabled: false,
			});
		},
	}

	cluster
		.typed_extension_protocol_options
		.insert(HTTP_PROTOCOL_OPTIONS_KEY.to_string(), pack(&options));
	Ok(())
}

fn extproc_http_filter() -> hcm::HttpFilter {
	use extproc_filter::processing_mode::{BodySendMode, HeaderSendMode};
	let config = extproc_filter::ExternalProcessor {
		grpc_service: Some(core::GrpcService {
			target_specifier: Some(core::grpc_service::TargetSpecifier::EnvoyGrpc(
				core::grpc_service::EnvoyGrpc {
					cluster_name: names::EXTPROC_UDS_CLUSTER.to_string(),
					authority: String::new(),
				},
			)),
			timeout: None,
		}),
		failure_mode_allow: false,
		processing_mode: Some(extproc_filter::ProcessingMode {
			request_header_mode: HeaderSendMode::Send as i32,
			response_header_mode: HeaderSendMode::Send as i32,
			// The whole request body is needed to translate it; responses
			// stream through frame by frame.
			request_body_mode: BodySendMode::Buffered as i32,
			response_body_mode: BodySendMode::Streamed as i32,
			request_trailer_mode: HeaderSendMode::Skip as i32,
			response_trailer_mode: HeaderSendMode::Skip as i32,
		}),
		message_timeout: Some(duration(EXTPROC_MESSAGE_TIMEOUT_SECS)),
		allow_mode_override: true,
	};
	hcm::HttpFilter {
		name: names::EXTPROC_FILTER.to_string(),
		config_type: Some(hcm::http_filter::ConfigType::TypedConfig(pack(&config))),
		is_optional: false,
		disabled: false,
	}
}

fn header_mutation_http_filter() -> hcm::HttpFilter {
	let config = header_mutation_filter::HeaderMutation {
		mutations: Some(header_mutation_filter::Mutations {
			request_mutations: vec![mutation_rules::HeaderMutation {
				action: Some(mutation_rules::header_mutation::Action::Append(
					core::HeaderValueOption {
						header: Some(core::HeaderValue {
							key: "content-length".to_string(),
							value: format!(
								"%DYNAMIC_METADATA({}:content_length)%",
								names::METADATA_NAMESPACE
							),
							raw_value: vec![],
						}),
						append_action:
							core::header_value_option::HeaderAppendAction::OverwriteIfExistsOrAdd
								as i32,
					},
				)),
			}],
			response_mutations: vec![],
		}),
	};
	hcm::HttpFilter {
		name: names::HEADER_MUTATION_FILTER.to_string(),
		config_type: Some(hcm::http_filter::ConfigType::TypedConfig(pack(&config))),
		is_optional: false,
		disabled: false,
	}
}

/// The static cluster reaching the translator over its unix socket.
fn uds_cluster(uds_path: &str) -> Cluster {
	let options = upstreams_http::HttpProtocolOptions {
		common_http_protocol_options: None,
		upstream_protocol_options: Some(
			upstreams_http::http_protocol_options::UpstreamProtocolOptions::ExplicitHttpConfig(
				upstreams_http::http_protocol_options::ExplicitHttpConfig {
					protocol_config: Some(
						upstreams_http::http_protocol_options::explicit_http_config::ProtocolConfig::Http2ProtocolOptions(
							core::Http2ProtocolOptions {
								hpack_table_size: None,
								max_concurrent_streams: None,
								initial_stream_window_size: Some(UDS_STREAM_WINDOW_BYTES),
								initial_connection_window_size: Some(UDS_CONNECTION_WINDOW_BYTES),
							},
						),
					),
				},
			),
		),
		http_filters: vec![],
	};
	Cluster {
		name: names::EXTPROC_UDS_CLUSTER.to_string(),
		cluster_discovery_type: Some(cluster_pb::ClusterDiscoveryType::Type(
			cluster_pb::DiscoveryType::Static as i32,
		)),
		connect_timeout: Some(duration(DEFAULT_CONNECT_TIMEOUT_SECS)),
		per_connection_buffer_limit_bytes: Some(UDS_BUFFER_LIMIT_BYTES),
		typed_extension_protocol_options: [(HTTP_PROTOCOL_OPTIONS_KEY.to_string(), pack(&options))]
			.into_iter()
			.collect(),
		load_assignment: Some(endpoint::ClusterLoadAssignment {
			cluster_name: names::EXTPROC_UDS_CLUSTER.to_string(),
			endpoints: vec![endpoint::LocalityLbEndpoints {
				locality: None,
				lb_endpoints: vec![endpoint::LbEndpoint {
					host_identifier: Some(endpoint::lb_endpoint::HostIdentifier::Endpoint(
						endpoint::Endpoint {
							address: Some(core::Address {
								address: Some(core::address::Address::Pipe(core::Pipe {
									path: uds_path.to_string(),
									mode: 0,
								})),
							}),
						},
					)),
					metadata: None,
					load_balancing_weight: None,
				}],
				load_balancing_weight: None,
				priority: 0,
			}],
		}),
		..Default::default()
	}
}
