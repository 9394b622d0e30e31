//! The legacy route-pinning pattern: a route matched by the
//! `x-ai-eg-selected-route: original_destination_cluster` header is sent to
//! the ORIGINAL_DST cluster.

use aigw_protos::envoy::config::route::v3 as route_pb;
use aigw_protos::extension::aigateway::v1 as ext;

use crate::names;

pub fn post_virtual_host(
	req: ext::PostVirtualHostModifyRequest,
) -> ext::PostVirtualHostModifyResponse {
	let Some(mut vh) = req.virtual_host else {
		return ext::PostVirtualHostModifyResponse { virtual_host: None };
	};
	for route in vh.routes.iter_mut() {
		if !selects_original_dst(route) {
			continue;
		}
		if let Some(route_pb::route::Action::Route(action)) = route.action.as_mut() {
			action.cluster_specifier = Some(route_pb::route_action::ClusterSpecifier::Cluster(
				names::ORIGINAL_DST_CLUSTER.to_string(),
			));
		}
	}
	ext::PostVirtualHostModifyResponse {
		virtual_host: Some(vh),
	}
}

fn selects_original_dst(route: &route_pb::Route) -> bool {
	let Some(m) = route.r#match.as_ref() else {
		return false;
	};
	m.headers.iter().any(|h| {
		h.name == names::SELECTED_ROUTE_HEADER
			&& matches!(
				h.header_match_specifier.as_ref(),
				Some(route_pb::header_matcher::HeaderMatchSpecifier::ExactMatch(v))
					if v == names::ORIGINAL_DST_CLUSTER
			)
	})
}
