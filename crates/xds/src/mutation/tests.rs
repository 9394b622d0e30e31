use aigw_protos::envoy::config::cluster::v3::Cluster;
use aigw_protos::envoy::config::cluster::v3::cluster as cluster_pb;
use aigw_protos::envoy::config::core::v3 as core;
use aigw_protos::envoy::config::endpoint::v3 as endpoint;
use aigw_protos::envoy::config::listener::v3 as listener;
use aigw_protos::envoy::config::route::v3 as route_pb;
use aigw_protos::envoy::extensions::filters::http::ext_proc::v3 as extproc_filter;
use aigw_protos::envoy::extensions::filters::network::http_connection_manager::v3 as hcm;
use aigw_protos::envoy::extensions::upstreams::http::v3 as upstreams_http;
use aigw_protos::extension::aigateway::v1 as ext;
use prost_types::value::Kind;

use super::*;
use crate::store::{AIGatewayRoute, BackendRef, RouteRule, RouteStore};
use crate::{names, *};

const UDS: &str = "/var/run/aigateway/extproc.sock";

fn store_with_route() -> RouteStore {
	let store = RouteStore::new();
	store.replace(vec![AIGatewayRoute {
		namespace: strng::new("ns"),
		name: strng::new("r"),
		rules: vec![RouteRule {
			backend_refs: vec![
				BackendRef {
					name: strng::new("openai"),
					priority: 0,
				},
				BackendRef {
					name: strng::new("anthropic"),
					priority: 1,
				},
			],
		}],
	}]);
	store
}

fn lb_endpoint() -> endpoint::LbEndpoint {
	endpoint::LbEndpoint {
		host_identifier: Some(endpoint::lb_endpoint::HostIdentifier::Endpoint(
			endpoint::Endpoint {
				address: Some(core::Address {
					address: Some(core::address::Address::SocketAddress(core::SocketAddress {
						protocol: core::socket_address::Protocol::Tcp as i32,
						address: "10.0.0.1".to_string(),
						port_specifier: Some(core::socket_address::PortSpecifier::PortValue(443)),
					})),
				}),
			},
		)),
		metadata: None,
		load_balancing_weight: None,
	}
}

fn route_cluster(name: &str, groups: usize) -> Cluster {
	Cluster {
		name: name.to_string(),
		load_assignment: Some(endpoint::ClusterLoadAssignment {
			cluster_name: name.to_string(),
			endpoints: (0..groups)
				.map(|_| endpoint::LocalityLbEndpoints {
					locality: None,
					lb_endpoints: vec![lb_endpoint(), lb_endpoint()],
					load_balancing_weight: None,
					priority: 0,
				})
				.collect(),
		}),
		..Default::default()
	}
}

fn inference_pool_resource() -> ext::ExtensionResource {
	ext::ExtensionResource {
		unstructured_bytes: serde_json::to_vec(&serde_json::json!({
			"apiVersion": "inference.networking.k8s.io/v1",
			"kind": "InferencePool",
			"metadata": {"name": "test-pool", "namespace": "default"},
			"spec": {"extensionRef": {"name": "epp-svc", "portNumber": 9002}},
		}))
		.unwrap(),
	}
}

fn endpoint_backend_name(lb: &endpoint::LbEndpoint) -> Option<&str> {
	lb.metadata
		.as_ref()?
		.filter_metadata
		.get(names::METADATA_NAMESPACE)?
		.fields
		.get(names::METADATA_BACKEND_NAME_KEY)
		.and_then(|v| match &v.kind {
			Some(Kind::StringValue(s)) => Some(s.as_str()),
			_ => None,
		})
}

#[test]
fn route_rule_ref_parsing() {
	let r = RouteRuleRef::parse("httproute/ns/name/rule/3").unwrap();
	assert_eq!(r.namespace, "ns");
	assert_eq!(r.name, "name");
	assert_eq!(r.rule_index, 3);
	assert_eq!(
		r.backend_name("backend", 1),
		"ns/backend/route/name/rule/3/ref/1"
	);
	assert!(RouteRuleRef::parse("foo").is_none());
	assert!(RouteRuleRef::parse("httproute/ns/name/rule/x").is_none());
	assert!(RouteRuleRef::parse("httproute/ns/name/rule/0/extra").is_none());
}

#[test]
fn inference_pool_tuple_round_trip() {
	let pool = InferencePoolRef {
		namespace: strng::new("default"),
		name: strng::new("test-pool"),
		epp_service: strng::new("epp-svc"),
		port: 9002,
		body_mode: BodyMode::Streamed,
		allow_mode_override: true,
	};
	let encoded = pool.encode();
	assert_eq!(encoded, "default/test-pool/epp-svc/9002/Streamed/true");
	assert_eq!(InferencePoolRef::decode(&encoded).unwrap(), pool);

	// A host proxy that strips the trailing tuple fields leaves the body
	// mode and override flag at their defaults.
	let stripped = InferencePoolRef::decode("default/test-pool/epp-svc/9002").unwrap();
	assert_eq!(stripped.body_mode, BodyMode::Buffered);
	assert!(!stripped.allow_mode_override);
}

// Scenario S4: a snapshot with only cluster "foo" gains the UDS cluster;
// re-applying does not duplicate it.
#[test]
fn post_translate_adds_uds_cluster_once() {
	let store = RouteStore::new();
	let req = ext::PostTranslateModifyRequest {
		clusters: vec![Cluster {
			name: "foo".to_string(),
			..Default::default()
		}],
		..Default::default()
	};
	let resp = clusters::post_translate(req, &store, UDS);
	let got: Vec<&str> = resp.clusters.iter().map(|c| c.name.as_str()).collect();
	assert_eq!(got, vec!["foo", names::EXTPROC_UDS_CLUSTER]);

	let uds = &resp.clusters[1];
	assert_eq!(
		uds.cluster_discovery_type,
		Some(cluster_pb::ClusterDiscoveryType::Type(
			cluster_pb::DiscoveryType::Static as i32
		))
	);
	assert_eq!(uds.connect_timeout.as_ref().unwrap().seconds, 10);
	assert_eq!(uds.per_connection_buffer_limit_bytes, Some(50 * 1024 * 1024));
	let Some(endpoint::lb_endpoint::HostIdentifier::Endpoint(ep)) = uds
		.load_assignment
		.as_ref()
		.unwrap()
		.endpoints[0]
		.lb_endpoints[0]
		.host_identifier
		.as_ref()
	else {
		panic!("expected endpoint");
	};
	let Some(core::address::Address::Pipe(pipe)) =
		ep.address.as_ref().unwrap().address.as_ref()
	else {
		panic!("expected pipe address");
	};
	assert_eq!(pipe.path, UDS);

	let again = clusters::post_translate(
		ext::PostTranslateModifyRequest {
			clusters: resp.clusters.clone(),
			secrets: resp.secrets.clone(),
			listeners: resp.listeners.clone(),
			routes: resp.routes.clone(),
		},
		&store,
		UDS,
	);
	assert_eq!(again, resp);
}

// Property 6: per-endpoint metadata and priorities line up with the backend
// refs of the referenced route rule.
#[test]
fn cluster_endpoint_annotation() {
	let store = store_with_route();
	let req = ext::PostTranslateModifyRequest {
		clusters: vec![route_cluster("httproute/ns/r/rule/0", 2)],
		..Default::default()
	};
	let resp = clusters::post_translate(req, &store, UDS);
	let cluster = &resp.clusters[0];
	let groups = &cluster.load_assignment.as_ref().unwrap().endpoints;
	assert_eq!(groups.len(), 2);
	for (i, group) in groups.iter().enumerate() {
		let expected_backend = if i == 0 { "openai" } else { "anthropic" };
		assert_eq!(group.priority, i as u32);
		for lb in &group.lb_endpoints {
			assert_eq!(
				endpoint_backend_name(lb),
				Some(format!("ns/{expected_backend}/route/r/rule/0/ref/{i}").as_str()),
			);
		}
	}
}

// The translator filter lands ahead of the terminal codec, exactly once.
#[test]
fn upstream_extproc_filter_injection_is_idempotent() {
	let store = store_with_route();
	let req = ext::PostTranslateModifyRequest {
		clusters: vec![route_cluster("httproute/ns/r/rule/0", 1)],
		..Default::default()
	};
	let resp = clusters::post_translate(req, &store, UDS);
	let cluster = &resp.clusters[0];
	let any = cluster
		.typed_extension_protocol_options
		.get("envoy.extensions.upstreams.http.v3.HttpProtocolOptions")
		.expect("protocol options installed");
	let options: upstreams_http::HttpProtocolOptions = unpack(any).unwrap();
	let filter_names: Vec<&str> = options.http_filters.iter().map(|f| f.name.as_str()).collect();
	assert_eq!(
		filter_names,
		vec![
			names::EXTPROC_FILTER,
			names::HEADER_MUTATION_FILTER,
			names::UPSTREAM_CODEC_FILTER,
		]
	);
	let Some(hcm::http_filter::ConfigType::TypedConfig(cfg)) =
		options.http_filters[0].config_type.as_ref()
	else {
		panic!("expected typed config");
	};
	let ep: extproc_filter::ExternalProcessor = unpack(cfg).unwrap();
	let Some(core::grpc_service::TargetSpecifier::EnvoyGrpc(grpc)) = ep
		.grpc_service
		.as_ref()
		.and_then(|g| g.target_specifier.as_ref())
	else {
		panic!("expected envoy grpc target");
	};
	assert_eq!(grpc.cluster_name, names::EXTPROC_UDS_CLUSTER);

	// Property 5: applying the mutation twice yields the same snapshot.
	let again = clusters::post_translate(
		ext::PostTranslateModifyRequest {
			clusters: resp.clusters.clone(),
			secrets: resp.secrets.clone(),
			listeners: resp.listeners.clone(),
			routes: resp.routes.clone(),
		},
		&store,
		UDS,
	);
	assert_eq!(again, resp);
}

// A cluster naming a route absent from the snapshot is skipped, not failed.
#[test]
fn missing_route_skips_annotation() {
	let store = RouteStore::new();
	let req = ext::PostTranslateModifyRequest {
		clusters: vec![route_cluster("httproute/ns/gone/rule/0", 1)],
		..Default::default()
	};
	let resp = clusters::post_translate(req, &store, UDS);
	let cluster = &resp.clusters[0];
	for group in &cluster.load_assignment.as_ref().unwrap().endpoints {
		for lb in &group.lb_endpoints {
			assert!(endpoint_backend_name(lb).is_none());
		}
	}
	// The translator filter is still wired in.
	assert!(
		cluster
			.typed_extension_protocol_options
			.contains_key("envoy.extensions.upstreams.http.v3.HttpProtocolOptions")
	);
}

// Scenario S5 / property 7: the InferencePool cluster rewrite.
#[test]
fn post_cluster_inference_pool() {
	let req = ext::PostClusterModifyRequest {
		cluster: Some(Cluster {
			name: "httproute/default/r/rule/0".to_string(),
			lb_policy: cluster_pb::LbPolicy::RoundRobin as i32,
			eds_cluster_config: Some(cluster_pb::EdsClusterConfig {
				eds_config: None,
				service_name: "svc".to_string(),
			}),
			..Default::default()
		}),
		post_cluster_context: Some(ext::PostClusterContext {
			backend_extension_resources: vec![inference_pool_resource()],
		}),
	};
	let resp = inference::post_cluster(req);
	let cluster = resp.cluster.unwrap();
	assert_eq!(
		cluster.cluster_discovery_type,
		Some(cluster_pb::ClusterDiscoveryType::Type(
			cluster_pb::DiscoveryType::OriginalDst as i32
		))
	);
	assert_eq!(cluster.lb_policy, cluster_pb::LbPolicy::ClusterProvided as i32);
	let Some(cluster_pb::LbConfig::OriginalDstLbConfig(lb)) = cluster.lb_config.as_ref() else {
		panic!("expected original dst lb config");
	};
	assert!(lb.use_http_header);
	assert_eq!(lb.http_header_name, names::INFERENCE_POOL_DST_HEADER);
	assert_eq!(cluster.connect_timeout.as_ref().unwrap().seconds, 10);
	assert!(cluster.eds_cluster_config.is_none());
	assert!(cluster.load_balancing_policy.is_none());
	// The pool tuple is stamped onto the cluster for later discovery.
	let stamped = cluster
		.metadata
		.as_ref()
		.unwrap()
		.filter_metadata
		.get(names::METADATA_NAMESPACE)
		.unwrap()
		.fields
		.get(names::METADATA_INFERENCE_POOL_KEY)
		.unwrap();
	assert_eq!(
		stamped.kind,
		Some(Kind::StringValue(
			"default/test-pool/epp-svc/9002/Buffered/false".to_string()
		))
	);
}

// A cluster without pool resources is returned untouched.
#[test]
fn post_cluster_without_pool_is_untouched() {
	let req = ext::PostClusterModifyRequest {
		cluster: Some(Cluster {
			name: "plain".to_string(),
			lb_policy: cluster_pb::LbPolicy::RoundRobin as i32,
			..Default::default()
		}),
		post_cluster_context: None,
	};
	let resp = inference::post_cluster(req);
	let cluster = resp.cluster.unwrap();
	assert_eq!(cluster.lb_policy, cluster_pb::LbPolicy::RoundRobin as i32);
	assert!(cluster.lb_config.is_none());
}

#[test]
fn post_route_inference_pool() {
	let req = ext::PostRouteModifyRequest {
		route: Some(route_pb::Route {
			name: "r".to_string(),
			action: Some(route_pb::route::Action::Route(route_pb::RouteAction {
				cluster_specifier: Some(route_pb::route_action::ClusterSpecifier::Cluster(
					"c".to_string(),
				)),
				host_rewrite_specifier: Some(
					route_pb::route_action::HostRewriteSpecifier::AutoHostRewrite(true),
				),
				timeout: None,
			})),
			..Default::default()
		}),
		post_route_context: Some(ext::PostRouteContext {
			extension_resources: vec![inference_pool_resource()],
		}),
	};
	let resp = inference::post_route(req);
	let route = resp.route.unwrap();
	let Some(route_pb::route::Action::Route(action)) = route.action.as_ref() else {
		panic!("expected route action");
	};
	assert_eq!(
		action.host_rewrite_specifier,
		Some(route_pb::route_action::HostRewriteSpecifier::AutoHostRewrite(false)),
	);
	assert!(
		route
			.metadata
			.as_ref()
			.unwrap()
			.filter_metadata
			.contains_key(names::METADATA_NAMESPACE)
	);
}

fn pool_route(name: &str, pool: Option<&InferencePoolRef>) -> route_pb::Route {
	let mut route = route_pb::Route {
		name: name.to_string(),
		r#match: Some(route_pb::RouteMatch {
			path_specifier: Some(route_pb::route_match::PathSpecifier::Prefix("/".to_string())),
			headers: vec![],
		}),
		action: Some(route_pb::route::Action::Route(route_pb::RouteAction {
			cluster_specifier: Some(route_pb::route_action::ClusterSpecifier::Cluster(
				"c".to_string(),
			)),
			host_rewrite_specifier: None,
			timeout: None,
		})),
		..Default::default()
	};
	if let Some(pool) = pool {
		let metadata = route.metadata.get_or_insert_with(Default::default);
		let entry = metadata
			.filter_metadata
			.entry(names::METADATA_NAMESPACE.to_string())
			.or_default();
		entry.fields.insert(
			names::METADATA_INFERENCE_POOL_KEY.to_string(),
			prost_types::Value {
				kind: Some(Kind::StringValue(pool.encode())),
			},
		);
	}
	route
}

fn hcm_listener(name: &str) -> listener::Listener {
	let manager = hcm::HttpConnectionManager {
		stat_prefix: "ingress".to_string(),
		route_specifier: Some(hcm::http_connection_manager::RouteSpecifier::Rds(hcm::Rds {
			config_source: Some(core::ConfigSource::default()),
			route_config_name: "default".to_string(),
		})),
		http_filters: vec![hcm::HttpFilter {
			name: "envoy.filters.http.router".to_string(),
			config_type: None,
			is_optional: false,
			disabled: false,
		}],
	};
	listener::Listener {
		name: name.to_string(),
		address: None,
		filter_chains: vec![listener::FilterChain {
			filter_chain_match: None,
			filters: vec![listener::Filter {
				name: "envoy.filters.network.http_connection_manager".to_string(),
				config_type: Some(listener::filter::ConfigType::TypedConfig(pack(&manager))),
			}],
			transport_socket: None,
			name: "default".to_string(),
		}],
	}
}

// Pools discovered in route metadata get a picker cluster and a listener
// filter; unrelated routes are opted out explicitly.
#[test]
fn inference_pool_wiring_from_route_metadata() {
	let pool = InferencePoolRef {
		namespace: strng::new("default"),
		name: strng::new("test-pool"),
		epp_service: strng::new("epp-svc"),
		port: 9002,
		body_mode: BodyMode::Buffered,
		allow_mode_override: false,
	};
	let store = RouteStore::new();
	let req = ext::PostTranslateModifyRequest {
		clusters: vec![],
		secrets: vec![],
		listeners: vec![hcm_listener("ingress")],
		routes: vec![route_pb::RouteConfiguration {
			name: "default".to_string(),
			virtual_hosts: vec![route_pb::VirtualHost {
				name: "vh".to_string(),
				domains: vec!["*".to_string()],
				routes: vec![
					pool_route("with-pool", Some(&pool)),
					pool_route("plain", None),
				],
				typed_per_filter_config: Default::default(),
			}],
		}],
	};
	let resp = clusters::post_translate(req, &store, UDS);

	let picker = resp
		.clusters
		.iter()
		.find(|c| c.name == "envoy.clusters.endpointpicker_test-pool_default_ext_proc")
		.expect("endpoint picker cluster");
	assert_eq!(
		picker.cluster_discovery_type,
		Some(cluster_pb::ClusterDiscoveryType::Type(
			cluster_pb::DiscoveryType::StrictDns as i32
		))
	);
	assert!(picker.transport_socket.is_some());

	// The listener's HCM chain now leads with the picker filter.
	let l = &resp.listeners[0];
	let Some(listener::filter::ConfigType::TypedConfig(any)) =
		l.filter_chains[0].filters[0].config_type.as_ref()
	else {
		panic!("expected typed config");
	};
	let manager: hcm::HttpConnectionManager = unpack(any).unwrap();
	assert_eq!(
		manager.http_filters[0].name,
		"envoy.filters.http.ext_proc/endpointpicker/test-pool_default_ext_proc"
	);

	// Routes not using the pool are opted out via per-route config.
	let vh = &resp.routes[0].virtual_hosts[0];
	let plain = vh.routes.iter().find(|r| r.name == "plain").unwrap();
	let disabled = plain
		.typed_per_filter_config
		.get(&pool.filter_name())
		.expect("per-route disable");
	let per_route: extproc_filter::ExtProcPerRoute = unpack(disabled).unwrap();
	assert_eq!(
		per_route.r#override,
		Some(extproc_filter::ext_proc_per_route::Override::Disabled(true))
	);
	let with_pool = vh.routes.iter().find(|r| r.name == "with-pool").unwrap();
	assert!(!with_pool.typed_per_filter_config.contains_key(&pool.filter_name()));

	// Idempotent across repeated pushes.
	let again = clusters::post_translate(
		ext::PostTranslateModifyRequest {
			clusters: resp.clusters.clone(),
			secrets: resp.secrets.clone(),
			listeners: resp.listeners.clone(),
			routes: resp.routes.clone(),
		},
		&store,
		UDS,
	);
	assert_eq!(again, resp);
}

#[test]
fn virtual_host_legacy_route_pinning() {
	let pinned = route_pb::Route {
		name: "pinned".to_string(),
		r#match: Some(route_pb::RouteMatch {
			path_specifier: Some(route_pb::route_match::PathSpecifier::Prefix("/".to_string())),
			headers: vec![route_pb::HeaderMatcher {
				name: names::SELECTED_ROUTE_HEADER.to_string(),
				header_match_specifier: Some(
					route_pb::header_matcher::HeaderMatchSpecifier::ExactMatch(
						names::ORIGINAL_DST_CLUSTER.to_string(),
					),
				),
			}],
		}),
		action: Some(route_pb::route::Action::Route(route_pb::RouteAction {
			cluster_specifier: Some(route_pb::route_action::ClusterSpecifier::Cluster(
				"old".to_string(),
			)),
			host_rewrite_specifier: None,
			timeout: None,
		})),
		..Default::default()
	};
	let other = pool_route("other", None);
	let resp = vhost::post_virtual_host(ext::PostVirtualHostModifyRequest {
		virtual_host: Some(route_pb::VirtualHost {
			name: "vh".to_string(),
			domains: vec!["*".to_string()],
			routes: vec![pinned, other],
			typed_per_filter_config: Default::default(),
		}),
	});
	let vh = resp.virtual_host.unwrap();
	let Some(route_pb::route::Action::Route(action)) = vh.routes[0].action.as_ref() else {
		panic!("expected route action");
	};
	assert_eq!(
		action.cluster_specifier,
		Some(route_pb::route_action::ClusterSpecifier::Cluster(
			names::ORIGINAL_DST_CLUSTER.to_string()
		))
	);
	// Unmatched routes keep their cluster.
	let Some(route_pb::route::Action::Route(action)) = vh.routes[1].action.as_ref() else {
		panic!("expected route action");
	};
	assert_eq!(
		action.cluster_specifier,
		Some(route_pb::route_action::ClusterSpecifier::Cluster("c".to_string()))
	);
}

#[test]
fn mcp_filters_hoisted_to_backend_listener() {
	let manager = hcm::HttpConnectionManager {
		stat_prefix: "ingress".to_string(),
		route_specifier: None,
		http_filters: vec![
			hcm::HttpFilter {
				name: "aigateway.mcp/backend-a".to_string(),
				config_type: None,
				is_optional: false,
				disabled: false,
			},
			hcm::HttpFilter {
				name: "envoy.filters.http.router".to_string(),
				config_type: None,
				is_optional: false,
				disabled: false,
			},
		],
	};
	let mut listeners = vec![listener::Listener {
		name: "ingress".to_string(),
		address: None,
		filter_chains: vec![listener::FilterChain {
			filter_chain_match: None,
			filters: vec![listener::Filter {
				name: "envoy.filters.network.http_connection_manager".to_string(),
				config_type: Some(listener::filter::ConfigType::TypedConfig(pack(&manager))),
			}],
			transport_socket: None,
			name: "default".to_string(),
		}],
	}];
	let mut routes = vec![];
	mcp::apply(&mut listeners, &mut routes);

	assert_eq!(listeners.len(), 2);
	let backend = listeners
		.iter()
		.find(|l| l.name == names::MCP_BACKEND_LISTENER)
		.expect("backend listener");
	let Some(core::address::Address::SocketAddress(addr)) = backend
		.address
		.as_ref()
		.unwrap()
		.address
		.as_ref()
	else {
		panic!("expected socket address");
	};
	assert_eq!(addr.address, "127.0.0.1");

	// The MCP filter moved off the ingress listener.
	let Some(listener::filter::ConfigType::TypedConfig(any)) =
		listeners[0].filter_chains[0].filters[0].config_type.as_ref()
	else {
		panic!("expected typed config");
	};
	let ingress: hcm::HttpConnectionManager = unpack(any).unwrap();
	assert!(!ingress.http_filters.iter().any(|f| f.name.starts_with("aigateway.mcp/")));

	// Applying again changes nothing.
	let snapshot = listeners.clone();
	mcp::apply(&mut listeners, &mut routes);
	assert_eq!(listeners, snapshot);
}

#[test]
fn oauth_discovery_route_rewrite() {
	let mut routes = vec![route_pb::RouteConfiguration {
		name: "default".to_string(),
		virtual_hosts: vec![route_pb::VirtualHost {
			name: "vh".to_string(),
			domains: vec!["*".to_string()],
			routes: vec![route_pb::Route {
				name: "oauth".to_string(),
				r#match: Some(route_pb::RouteMatch {
					path_specifier: Some(route_pb::route_match::PathSpecifier::Path(
						"/.well-known/oauth-protected-resource".to_string(),
					)),
					headers: vec![],
				}),
				action: Some(route_pb::route::Action::DirectResponse(
					route_pb::DirectResponseAction {
						status: 401,
						body: Some(core::DataSource {
							specifier: Some(core::data_source::Specifier::InlineString(
								r#"{"resource":"https://gw.example.com/mcp","www-authenticate":"Bearer resource_metadata=\"https://gw.example.com\""}"#.to_string(),
							)),
						}),
					},
				)),
				..Default::default()
			}],
			typed_per_filter_config: Default::default(),
		}],
	}];
	let mut listeners = vec![];
	mcp::apply(&mut listeners, &mut routes);

	let route = &routes[0].virtual_hosts[0].routes[0];
	let www = route
		.response_headers_to_add
		.iter()
		.filter_map(|o| o.header.as_ref())
		.find(|h| h.key == "WWW-Authenticate")
		.expect("challenge moved to header");
	assert!(www.value.starts_with("Bearer "));
	assert!(
		route
			.response_headers_to_add
			.iter()
			.filter_map(|o| o.header.as_ref())
			.any(|h| h.key == "access-control-allow-origin")
	);
	let Some(route_pb::route::Action::DirectResponse(dr)) = route.action.as_ref() else {
		panic!("expected direct response");
	};
	let Some(core::data_source::Specifier::InlineString(body)) =
		dr.body.as_ref().unwrap().specifier.as_ref()
	else {
		panic!("expected inline body");
	};
	let parsed: serde_json::Value = serde_json::from_str(body).unwrap();
	assert!(parsed.get("www-authenticate").is_none());
	assert_eq!(parsed["resource"], "https://gw.example.com/mcp");

	// Applying again changes nothing.
	let snapshot = routes.clone();
	mcp::apply(&mut listeners, &mut routes);
	assert_eq!(routes, snapshot);
}

// The legacy route-pinning cluster selects its destination from the
// x-ai-eg-original-dst header.
#[test]
fn original_dst_cluster_is_configured() {
	let store = RouteStore::new();
	let req = ext::PostTranslateModifyRequest {
		clusters: vec![Cluster {
			name: names::ORIGINAL_DST_CLUSTER.to_string(),
			..Default::default()
		}],
		..Default::default()
	};
	let resp = clusters::post_translate(req, &store, UDS);
	let cluster = &resp.clusters[0];
	assert_eq!(
		cluster.cluster_discovery_type,
		Some(cluster_pb::ClusterDiscoveryType::Type(
			cluster_pb::DiscoveryType::OriginalDst as i32
		))
	);
	assert_eq!(cluster.lb_policy, cluster_pb::LbPolicy::ClusterProvided as i32);
	let Some(cluster_pb::LbConfig::OriginalDstLbConfig(lb)) = cluster.lb_config.as_ref() else {
		panic!("expected original dst lb config");
	};
	assert!(lb.use_http_header);
	assert_eq!(lb.http_header_name, names::ORIGINAL_DST_HEADER);
	// The translator filter never lands on this cluster.
	assert!(cluster.typed_extension_protocol_options.is_empty());

	let again = clusters::post_translate(
		ext::PostTranslateModifyRequest {
			clusters: resp.clusters.clone(),
			secrets: resp.secrets.clone(),
			listeners: resp.listeners.clone(),
			routes: resp.routes.clone(),
		},
		&store,
		UDS,
	);
	assert_eq!(again, resp);
}
