//! Inference-pool support: ORIGINAL_DST rewrites, endpoint-picker clusters
//! and the listener-level ext_proc filters that consult them.

use std::collections::HashMap;

use aigw_protos::envoy::config::cluster::v3::Cluster;
use aigw_protos::envoy::config::cluster::v3::cluster as cluster_pb;
use aigw_protos::envoy::config::core::v3 as core;
use aigw_protos::envoy::config::endpoint::v3 as endpoint;
use aigw_protos::envoy::config::listener::v3 as listener;
use aigw_protos::envoy::config::route::v3 as route_pb;
use aigw_protos::envoy::extensions::filters::http::ext_proc::v3 as extproc_filter;
use aigw_protos::envoy::extensions::filters::network::http_connection_manager::v3 as hcm;
use aigw_protos::envoy::extensions::transport_sockets::tls::v3 as tls;
use aigw_protos::extension::aigateway::v1 as ext;

use super::{BodyMode, ConfigurationError, InferencePoolRef, duration, pack, parse_inference_pool, unpack};
use crate::{names, *};

const EPP_CONNECT_TIMEOUT_SECS: i64 = 10;
// Endpoint pickers can hold a request while scoring; give them a generous
// per-message budget.
const EPP_MESSAGE_TIMEOUT_SECS: i64 = 300;

/// post_cluster reconfigures a cluster backed by an InferencePool to
/// ORIGINAL_DST with header-based, cluster-provided load balancing.
pub fn post_cluster(req: ext::PostClusterModifyRequest) -> ext::PostClusterModifyResponse {
	let Some(mut cluster) = req.cluster else {
		return ext::PostClusterModifyResponse { cluster: None };
	};
	let Some(pool) = pool_from_resources(
		req
			.post_cluster_context
			.as_ref()
			.map(|c| c.backend_extension_resources.as_slice())
			.unwrap_or_default(),
	) else {
		return ext::PostClusterModifyResponse {
			cluster: Some(cluster),
		};
	};

	cluster.cluster_discovery_type = Some(cluster_pb::ClusterDiscoveryType::Type(
		cluster_pb::DiscoveryType::OriginalDst as i32,
	));
	cluster.lb_policy = cluster_pb::LbPolicy::ClusterProvided as i32;
	cluster.lb_config = Some(cluster_pb::LbConfig::OriginalDstLbConfig(
		cluster_pb::OriginalDstLbConfig {
			use_http_header: true,
			http_header_name: names::INFERENCE_POOL_DST_HEADER.to_string(),
		},
	));
	cluster.connect_timeout = Some(duration(EPP_CONNECT_TIMEOUT_SECS));
	cluster.eds_cluster_config = None;
	cluster.load_balancing_policy = None;
	cluster.load_assignment = None;
	stamp_pool_metadata(cluster.metadata.get_or_insert_with(Default::default), &pool);

	ext::PostClusterModifyResponse {
		cluster: Some(cluster),
	}
}

/// post_route disables auto host rewrite and attaches the pool tuple to the
/// route so the listener filter wiring can find it later.
pub fn post_route(req: ext::PostRouteModifyRequest) -> ext::PostRouteModifyResponse {
	let Some(mut route) = req.route else {
		return ext::PostRouteModifyResponse { route: None };
	};
	let Some(pool) = pool_from_resources(
		req
			.post_route_context
			.as_ref()
			.map(|c| c.extension_resources.as_slice())
			.unwrap_or_default(),
	) else {
		return ext::PostRouteModifyResponse { route: Some(route) };
	};

	if let Some(route_pb::route::Action::Route(action)) = route.action.as_mut() {
		// The endpoint picker hands back a raw ip:port; rewriting the host
		// to it would break TLS and virtual hosting upstream.
		action.host_rewrite_specifier = Some(
			route_pb::route_action::HostRewriteSpecifier::AutoHostRewrite(false),
		);
	}
	stamp_pool_metadata(route.metadata.get_or_insert_with(Default::default), &pool);

	ext::PostRouteModifyResponse { route: Some(route) }
}

fn pool_from_resources(resources: &[ext::ExtensionResource]) -> Option<InferencePoolRef> {
	resources.iter().find_map(|r| {
		match parse_inference_pool(&r.unstructured_bytes) {
			Ok(pool) => Some(pool),
			Err(e) => {
				debug!("skipping extension resource: {e}");
				None
			},
		}
	})
}

fn stamp_pool_metadata(metadata: &mut core::Metadata, pool: &InferencePoolRef) {
	let entry = metadata
		.filter_metadata
		.entry(names::METADATA_NAMESPACE.to_string())
		.or_default();
	entry.fields.insert(
		names::METADATA_INFERENCE_POOL_KEY.to_string(),
		prost_types::Value {
			kind: Some(prost_types::value::Kind::StringValue(pool.encode())),
		},
	);
}

/// discover_pools collects the distinct inference pools referenced by route
/// metadata across the snapshot.
pub fn discover_pools(routes: &[route_pb::RouteConfiguration]) -> Vec<InferencePoolRef> {
	let mut pools: Vec<InferencePoolRef> = Vec::new();
	let mut seen = HashMap::new();
	for rc in routes {
		for vh in &rc.virtual_hosts {
			for route in &vh.routes {
				let Some(encoded) = route
					.metadata
					.as_ref()
					.and_then(|m| m.filter_metadata.get(names::METADATA_NAMESPACE))
					.and_then(|s| s.fields.get(names::METADATA_INFERENCE_POOL_KEY))
					.and_then(|v| match &v.kind {
						Some(prost_types::value::Kind::StringValue(s)) => Some(s.as_str()),
						_ => None,
					})
				else {
					continue;
				};
				let Some(pool) = InferencePoolRef::decode(encoded) else {
					warn!("malformed inference pool metadata {encoded:?}");
					continue;
				};
				if seen.insert(pool.cluster_name(), ()).is_none() {
					pools.push(pool);
				}
			}
		}
	}
	pools
}

/// route_uses_pool reports whether a route is pinned to the given pool.
fn route_uses_pool(route: &route_pb::Route, pool: &InferencePoolRef) -> bool {
	route
		.metadata
		.as_ref()
		.and_then(|m| m.filter_metadata.get(names::METADATA_NAMESPACE))
		.and_then(|s| s.fields.get(names::METADATA_INFERENCE_POOL_KEY))
		.and_then(|v| match &v.kind {
			Some(prost_types::value::Kind::StringValue(s)) => Some(s.as_str()),
			_ => None,
		})
		.and_then(InferencePoolRef::decode)
		.map(|p| p.cluster_name() == pool.cluster_name())
		.unwrap_or_default()
}

/// The STRICT_DNS cluster for a pool's endpoint-picker service. TLS with an
/// empty validation context: the EPP presents a self-signed cert.
pub fn endpoint_picker_cluster(pool: &InferencePoolRef) -> Cluster {
	let tls_context = tls::UpstreamTlsContext {
		common_tls_context: Some(tls::CommonTlsContext {
			validation_context_type: Some(
				tls::common_tls_context::ValidationContextType::ValidationContext(
					tls::CertificateValidationContext::default(),
				),
			),
		}),
		sni: String::new(),
	};
	Cluster {
		name: pool.cluster_name(),
		cluster_discovery_type: Some(cluster_pb::ClusterDiscoveryType::Type(
			cluster_pb::DiscoveryType::StrictDns as i32,
		)),
		connect_timeout: Some(duration(EPP_CONNECT_TIMEOUT_SECS)),
		transport_socket: Some(core::TransportSocket {
			name: "envoy.transport_sockets.tls".to_string(),
			config_type: Some(core::transport_socket::ConfigType::TypedConfig(pack(
				&tls_context,
			))),
		}),
		load_assignment: Some(endpoint::ClusterLoadAssignment {
			cluster_name: pool.cluster_name(),
			endpoints: vec![endpoint::LocalityLbEndpoints {
				locality: None,
				lb_endpoints: vec![endpoint::LbEndpoint {
					host_identifier: Some(endpoint::lb_endpoint::HostIdentifier::Endpoint(
						endpoint::Endpoint {
							address: Some(core::Address {
								address: Some(core::address::Address::SocketAddress(
									core::SocketAddress {
										protocol: core::socket_address::Protocol::Tcp as i32,
										address: pool.service_authority(),
										port_specifier: Some(
											core::socket_address::PortSpecifier::PortValue(
												pool.port as u32,
											),
										),
									},
								)),
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

/// insert_listener_filter adds the pool's ext_proc filter at the front of
/// every HCM filter chain on non-reserved listeners. Idempotent by filter
/// name.
pub fn insert_listener_filter(listeners: &mut [listener::Listener], pool: &InferencePoolRef) {
	for l in listeners.iter_mut() {
		if l.name.starts_with(names::RESERVED_LISTENER_PREFIX) || l.name == names::MCP_BACKEND_LISTENER
		{
			continue;
		}
		for chain in l.filter_chains.iter_mut() {
			for filter in chain.filters.iter_mut() {
				if let Err(e) = insert_into_hcm(filter, pool) {
					warn!(listener = %l.name, "skipping endpoint picker filter: {e}");
				}
			}
		}
	}
}

fn insert_into_hcm(
	filter: &mut listener::Filter,
	pool: &InferencePoolRef,
) -> Result<(), ConfigurationError> {
	let Some(listener::filter::ConfigType::TypedConfig(any)) = filter.config_type.as_ref() else {
		return Ok(());
	};
	if !any.type_url.ends_with("HttpConnectionManager") {
		return Ok(());
	}
	let mut manager: hcm::HttpConnectionManager = unpack(any)?;
	if manager.http_filters.iter().any(|f| f.name == pool.filter_name()) {
		return Ok(());
	}
	manager.http_filters.insert(0, endpoint_picker_http_filter(pool));
	filter.config_type = Some(listener::filter::ConfigType::TypedConfig(pack(&manager)));
	Ok(())
}

fn endpoint_picker_http_filter(pool: &InferencePoolRef) -> hcm::HttpFilter {
	use extproc_filter::processing_mode::{BodySendMode, HeaderSendMode};
	let request_body_mode = match pool.body_mode {
		BodyMode::Buffered => BodySendMode::Buffered,
		BodyMode::Streamed => BodySendMode::Streamed,
		BodyMode::Duplex => BodySendMode::FullDuplexStreamed,
	};
	let config = extproc_filter::ExternalProcessor {
		grpc_service: Some(core::GrpcService {
			target_specifier: Some(core::grpc_service::TargetSpecifier::EnvoyGrpc(
				core::grpc_service::EnvoyGrpc {
					cluster_name: pool.cluster_name(),
					authority: String::new(),
				},
			)),
			timeout: None,
		}),
		failure_mode_allow: false,
		processing_mode: Some(extproc_filter::ProcessingMode {
			request_header_mode: HeaderSendMode::Send as i32,
			response_header_mode: HeaderSendMode::Send as i32,
			request_body_mode: request_body_mode as i32,
			response_body_mode: BodySendMode::None as i32,
			request_trailer_mode: HeaderSendMode::Skip as i32,
			response_trailer_mode: HeaderSendMode::Skip as i32,
		}),
		message_timeout: Some(duration(EPP_MESSAGE_TIMEOUT_SECS)),
		allow_mode_override: pool.allow_mode_override,
	};
	hcm::HttpFilter {
		name: pool.filter_name(),
		config_type: Some(hcm::http_filter::ConfigType::TypedConfig(pack(&config))),
		is_optional: false,
		disabled: false,
	}
}

/// disable_on_unrelated_routes opts every route that does not use the pool
/// out of its filter via per-route config. Idempotent by config key.
pub fn disable_on_unrelated_routes(
	routes: &mut [route_pb::RouteConfiguration],
	pool: &InferencePoolRef,
) {
	let disabled = pack(&extproc_filter::ExtProcPerRoute {
		r#override: Some(extproc_filter::ext_proc_per_route::Override::Disabled(true)),
	});
	for rc in routes.iter_mut() {
		for vh in rc.virtual_hosts.iter_mut() {
			for route in vh.routes.iter_mut() {
				if route_uses_pool(route, pool) {
					route.typed_per_filter_config.remove(&pool.filter_name());
					continue;
				}
				route
					.typed_per_filter_config
					.entry(pool.filter_name())
					.or_insert_with(|| disabled.clone());
			}
		}
	}
}
