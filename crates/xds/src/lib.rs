pub use aigw_core::prelude::*;

pub mod mutation;
pub mod server;
pub mod store;

/// Cluster and filter names owned by the gateway on the data plane.
pub mod names {
	/// The static cluster reaching the translator process over UDS.
	pub const EXTPROC_UDS_CLUSTER: &str = "ai-gateway-extproc-uds";
	/// The upstream external-processor filter wiring in the translator.
	pub const EXTPROC_FILTER: &str = "envoy.filters.http.ext_proc/aigateway";
	/// The upstream header_mutation filter restoring content-length.
	pub const HEADER_MUTATION_FILTER: &str = "envoy.filters.http.header_mutation";
	/// The terminal upstream codec filter.
	pub const UPSTREAM_CODEC_FILTER: &str = "envoy.filters.http.upstream_codec";
	/// The legacy ORIGINAL_DST cluster name.
	pub const ORIGINAL_DST_CLUSTER: &str = "original_destination_cluster";
	/// The synthetic listener MCP per-backend filters are hoisted onto.
	pub const MCP_BACKEND_LISTENER: &str = "aigateway-mcp-backend-listener";
	pub const MCP_BACKEND_LISTENER_PORT: u32 = 1065;

	/// Filter-metadata namespace for gateway-owned metadata.
	pub const METADATA_NAMESPACE: &str = "aigateway.envoy.io";
	pub const METADATA_BACKEND_NAME_KEY: &str = "per_route_rule_backend_name";
	pub const METADATA_INFERENCE_POOL_KEY: &str = "per_route_rule_inference_pool";

	/// Headers used to steer routing on the data plane.
	pub const ORIGINAL_DST_HEADER: &str = "x-ai-eg-original-dst";
	pub const INFERENCE_POOL_DST_HEADER: &str = "x-gateway-destination-endpoint";
	pub const SELECTED_ROUTE_HEADER: &str = "x-ai-eg-selected-route";

	/// The host-proxy reserved listener prefix; such listeners are never
	/// touched by the MCP rewrite.
	pub const RESERVED_LISTENER_PREFIX: &str = "envoy-gateway/";

	pub fn endpoint_picker_cluster(pool: &str, namespace: &str) -> String {
		format!("envoy.clusters.endpointpicker_{pool}_{namespace}_ext_proc")
	}

	pub fn endpoint_picker_filter(pool: &str, namespace: &str) -> String {
		format!("envoy.filters.http.ext_proc/endpointpicker/{pool}_{namespace}_ext_proc")
	}
}
