// This build script generates the rust source files for the ext_proc data
// plane contract and the control-plane extension hooks.
fn main() -> Result<(), anyhow::Error> {
	let proto_files = [
		"proto/envoy/config/core/v3/base.proto",
		"proto/envoy/config/endpoint/v3/endpoint.proto",
		"proto/envoy/config/cluster/v3/cluster.proto",
		"proto/envoy/config/route/v3/route.proto",
		"proto/envoy/config/listener/v3/listener.proto",
		"proto/envoy/config/common/mutation_rules/v3/mutation_rules.proto",
		"proto/envoy/extensions/filters/network/http_connection_manager/v3/http_connection_manager.proto",
		"proto/envoy/extensions/upstreams/http/v3/http_protocol_options.proto",
		"proto/envoy/extensions/filters/http/ext_proc/v3/ext_proc.proto",
		"proto/envoy/extensions/filters/http/header_mutation/v3/header_mutation.proto",
		"proto/envoy/extensions/filters/http/upstream_codec/v3/upstream_codec.proto",
		"proto/envoy/extensions/transport_sockets/tls/v3/tls.proto",
		"proto/envoy/service/ext_proc/v3/external_processor.proto",
		"proto/extension/v1/extension.proto",
		"proto/grpc/health/v1/health.proto",
	]
	.iter()
	.map(|name| std::env::current_dir().unwrap().join(name))
	.collect::<Vec<_>>();
	let include_dirs = ["proto/"]
		.iter()
		.map(|i| std::env::current_dir().unwrap().join(i))
		.collect::<Vec<_>>();
	let fds = protox::compile(&proto_files, &include_dirs)?;
	let config = {
		let mut c = prost_build::Config::new();
		c.disable_comments(Some("."));
		// Any packing/unpacking in the mutation path needs prost::Name impls.
		c.enable_type_names();
		c
	};
	tonic_prost_build::configure()
		.build_server(true)
		.build_client(true)
		.compile_fds_with_config(fds, config)?;

	// This tells cargo to re-run this build script only when the proto files
	// we're interested in change or the any of the proto directories were updated.
	for path in [proto_files, include_dirs].concat() {
		println!("cargo:rerun-if-changed={}", path.to_str().unwrap());
	}
	Ok(())
}
