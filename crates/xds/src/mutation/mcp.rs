//! MCP gateway wiring.
//!
//! MCP per-backend filters are hoisted off the user-facing listeners onto a
//! synthetic loopback listener, and the OAuth discovery routes get their
//! WWW-Authenticate challenge moved from the response body into a proper
//! header plus permissive CORS for browser-based clients.

use aigw_protos::envoy::config::core::v3 as core;
use aigw_protos::envoy::config::listener::v3 as listener;
use aigw_protos::envoy::config::route::v3 as route_pb;
use aigw_protos::envoy::extensions::filters::network::http_connection_manager::v3 as hcm;

use super::{pack, unpack};
use crate::{names, *};

/// MCP per-backend HTTP filters carry this name prefix.
pub const MCP_FILTER_PREFIX: &str = "aigateway.mcp/";

const OAUTH_WELL_KNOWN_PATHS: &[&str] = &[
	"/.well-known/oauth-protected-resource",
	"/.well-known/oauth-authorization-server",
];

const WWW_AUTHENTICATE: &str = "WWW-Authenticate";

pub fn apply(
	listeners: &mut Vec<listener::Listener>,
	routes: &mut [route_pb::RouteConfiguration],
) {
	let mut hoisted: Vec<hcm::HttpFilter> = Vec::new();
	for l in listeners.iter_mut() {
		if l.name.starts_with(names::RESERVED_LISTENER_PREFIX)
			|| l.name == names::MCP_BACKEND_LISTENER
		{
			continue;
		}
		for chain in l.filter_chains.iter_mut() {
			for filter in chain.filters.iter_mut() {
				match hoist_from_hcm(filter) {
					Ok(mut filters) => {
						filters.retain(|f| !hoisted.iter().any(|h| h.name == f.name));
						hoisted.extend(filters);
					},
					Err(e) => warn!(listener = %l.name, "skipping MCP filter hoist: {e}"),
				}
			}
		}
	}

	if !hoisted.is_empty()
		&& !listeners.iter().any(|l| l.name == names::MCP_BACKEND_LISTENER)
	{
		listeners.push(backend_listener(hoisted));
	}

	for rc in routes.iter_mut() {
		for vh in rc.virtual_hosts.iter_mut() {
			for route in vh.routes.iter_mut() {
				if is_oauth_discovery(route) {
					rewrite_oauth_route(route);
				}
			}
		}
	}
}

fn hoist_from_hcm(
	filter: &mut listener::Filter,
) -> Result<Vec<hcm::HttpFilter>, super::ConfigurationError> {
	let Some(listener::filter::ConfigType::TypedConfig(any)) = filter.config_type.as_ref() else {
		return Ok(Vec::new());
	};
	if !any.type_url.ends_with("HttpConnectionManager") {
		return Ok(Vec::new());
	}
	let mut manager: hcm::HttpConnectionManager = unpack(any)?;
	let before = manager.http_filters.len();
	let (mcp, rest): (Vec<_>, Vec<_>) = manager
		.http_filters
		.drain(..)
		.partition(|f| f.name.starts_with(MCP_FILTER_PREFIX));
	manager.http_filters = rest;
	if manager.http_filters.len() != before {
		filter.config_type = Some(listener::filter::ConfigType::TypedConfig(pack(&manager)));
	}
	Ok(mcp)
}

fn backend_listener(mut http_filters: Vec<hcm::HttpFilter>) -> listener::Listener {
	// The hoisted filters still need a terminal router.
	if !http_filters.iter().any(|f| f.name == "envoy.filters.http.router") {
		http_filters.push(hcm::HttpFilter {
			name: "envoy.filters.http.router".to_string(),
			config_type: None,
			is_optional: false,
			disabled: false,
		});
	}
	let manager = hcm::HttpConnectionManager {
		stat_prefix: "aigateway_mcp_backend".to_string(),
		route_specifier: Some(hcm::http_connection_manager::RouteSpecifier::Rds(hcm::Rds {
			config_source: Some(core::ConfigSource::default()),
			route_config_name: names::MCP_BACKEND_LISTENER.to_string(),
		})),
		http_filters,
	};
	listener::Listener {
		name: names::MCP_BACKEND_LISTENER.to_string(),
		address: Some(core::Address {
			address: Some(core::address::Address::SocketAddress(core::SocketAddress {
				protocol: core::socket_address::Protocol::Tcp as i32,
				address: "127.0.0.1".to_string(),
				port_specifier: Some(core::socket_address::PortSpecifier::PortValue(
					names::MCP_BACKEND_LISTENER_PORT,
				)),
			})),
		}),
		filter_chains: vec![listener::FilterChain {
			filter_chain_match: None,
			filters: vec![listener::Filter {
				name: "envoy.filters.network.http_connection_manager".to_string(),
				config_type: Some(listener::filter::ConfigType::TypedConfig(pack(&manager))),
			}],
			transport_socket: None,
			name: names::MCP_BACKEND_LISTENER.to_string(),
		}],
	}
}

fn is_oauth_discovery(route: &route_pb::Route) -> bool {
	let Some(m) = route.r#match.as_ref() else {
		return false;
	};
	let path = match m.path_specifier.as_ref() {
		Some(route_pb::route_match::PathSpecifier::Path(p)) => p.as_str(),
		Some(route_pb::route_match::PathSpecifier::Prefix(p)) => p.as_str(),
		None => return false,
	};
	OAUTH_WELL_KNOWN_PATHS.iter().any(|p| path.starts_with(p))
}

fn rewrite_oauth_route(route: &mut route_pb::Route) {
	// The protected-resource challenge belongs in a header, not body text.
	let mut challenge_header = None;
	if let Some(route_pb::route::Action::DirectResponse(dr)) = route.action.as_mut()
		&& let Some(core::DataSource {
			specifier: Some(core::data_source::Specifier::InlineString(body)),
		}) = dr.body.as_mut()
		&& let Ok(mut parsed) = serde_json::from_str::<serde_json::Value>(body)
		&& let Some(challenge) = parsed
			.as_object_mut()
			.and_then(|o| o.shift_remove("www-authenticate"))
		&& let Some(challenge) = challenge.as_str()
	{
		challenge_header = Some(challenge.to_string());
		*body = serde_json::to_string(&parsed).expect("json round trip");
	}
	if let Some(challenge) = challenge_header {
		add_response_header(route, WWW_AUTHENTICATE, &challenge);
	}

	for (k, v) in [
		("access-control-allow-origin", "*"),
		("access-control-allow-methods", "GET, OPTIONS"),
		("access-control-allow-headers", "mcp-protocol-version, authorization, content-type"),
	] {
		add_response_header(route, k, v);
	}
}

fn add_response_header(route: &mut route_pb::Route, key: &str, value: &str) {
	let exists = route.response_headers_to_add.iter().any(|o| {
		o.header
			.as_ref()
			.map(|h| h.key.eq_ignore_ascii_case(key))
			.unwrap_or_default()
	});
	if exists {
		return;
	}
	route.response_headers_to_add.push(core::HeaderValueOption {
		header: Some(core::HeaderValue {
			key: key.to_string(),
			value: value.to_string(),
			raw_value: vec![],
		}),
		append_action: core::header_value_option::HeaderAppendAction::OverwriteIfExistsOrAdd as i32,
	});
}
