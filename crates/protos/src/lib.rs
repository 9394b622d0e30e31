#![allow(clippy::derive_partial_eq_without_eq)]

pub mod envoy {
	pub mod config {
		pub mod core {
			pub mod v3 {
				tonic::include_proto!("envoy.config.core.v3");
			}
		}
		pub mod endpoint {
			pub mod v3 {
				tonic::include_proto!("envoy.config.endpoint.v3");
			}
		}
		pub mod cluster {
			pub mod v3 {
				tonic::include_proto!("envoy.config.cluster.v3");
			}
		}
		pub mod route {
			pub mod v3 {
				tonic::include_proto!("envoy.config.route.v3");
			}
		}
		pub mod listener {
			pub mod v3 {
				tonic::include_proto!("envoy.config.listener.v3");
			}
		}
		pub mod common {
			pub mod mutation_rules {
				pub mod v3 {
					tonic::include_proto!("envoy.config.common.mutation_rules.v3");
				}
			}
		}
	}
	pub mod extensions {
		pub mod filters {
			pub mod network {
				pub mod http_connection_manager {
					pub mod v3 {
						tonic::include_proto!(
							"envoy.extensions.filters.network.http_connection_manager.v3"
						);
					}
				}
			}
			pub mod http {
				pub mod ext_proc {
					pub mod v3 {
						tonic::include_proto!("envoy.extensions.filters.http.ext_proc.v3");
					}
				}
				pub mod header_mutation {
					pub mod v3 {
						tonic::include_proto!("envoy.extensions.filters.http.header_mutation.v3");
					}
				}
				pub mod upstream_codec {
					pub mod v3 {
						tonic::include_proto!("envoy.extensions.filters.http.upstream_codec.v3");
					}
				}
			}
		}
		pub mod upstreams {
			pub mod http {
				pub mod v3 {
					tonic::include_proto!("envoy.extensions.upstreams.http.v3");
				}
			}
		}
		pub mod transport_sockets {
			pub mod tls {
				pub mod v3 {
					tonic::include_proto!("envoy.extensions.transport_sockets.tls.v3");
				}
			}
		}
	}
	pub mod service {
		pub mod ext_proc {
			pub mod v3 {
				tonic::include_proto!("envoy.service.ext_proc.v3");
			}
		}
	}
}

pub mod extension {
	pub mod aigateway {
		pub mod v1 {
			tonic::include_proto!("extension.aigateway.v1");
		}
	}
}

pub mod grpc {
	pub mod health {
		pub mod v1 {
			tonic::include_proto!("grpc.health.v1");
		}
	}
}
