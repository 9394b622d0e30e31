//! The extension gRPC server the host proxy calls during translation.

use aigw_protos::extension::aigateway::v1 as ext;
use aigw_protos::extension::aigateway::v1::ai_gateway_extension_server::{
	AiGatewayExtension, AiGatewayExtensionServer,
};
use aigw_protos::grpc::health::v1 as health_pb;
use aigw_protos::grpc::health::v1::health_server::{Health, HealthServer};
use tonic::{Request, Response, Status};

use crate::mutation;
use crate::store::RouteStore;
use crate::*;

/// Default listen address for the extension server.
pub const DEFAULT_ADDRESS: &str = "0.0.0.0:1063";
/// Default max receive message size (xDS snapshots are modest; the extproc
/// path carries its own much larger limit).
pub const DEFAULT_MAX_RECEIVE_MESSAGE_SIZE: usize = 4 * 1024 * 1024;

pub struct ExtensionServer {
	store: Arc<RouteStore>,
	uds_path: String,
}

impl ExtensionServer {
	pub fn new(store: Arc<RouteStore>, uds_path: impl Into<String>) -> Self {
		ExtensionServer {
			store,
			uds_path: uds_path.into(),
		}
	}
}

#[tonic::async_trait]
impl AiGatewayExtension for ExtensionServer {
	async fn post_translate_modify(
		&self,
		request: Request<ext::PostTranslateModifyRequest>,
	) -> Result<Response<ext::PostTranslateModifyResponse>, Status> {
		let req = request.into_inner();
		debug!(
			clusters = req.clusters.len(),
			listeners = req.listeners.len(),
			routes = req.routes.len(),
			"post translate"
		);
		Ok(Response::new(mutation::clusters::post_translate(
			req,
			&self.store,
			&self.uds_path,
		)))
	}

	async fn post_cluster_modify(
		&self,
		request: Request<ext::PostClusterModifyRequest>,
	) -> Result<Response<ext::PostClusterModifyResponse>, Status> {
		Ok(Response::new(mutation::inference::post_cluster(
			request.into_inner(),
		)))
	}

	async fn post_route_modify(
		&self,
		request: Request<ext::PostRouteModifyRequest>,
	) -> Result<Response<ext::PostRouteModifyResponse>, Status> {
		Ok(Response::new(mutation::inference::post_route(
			request.into_inner(),
		)))
	}

	async fn post_virtual_host_modify(
		&self,
		request: Request<ext::PostVirtualHostModifyRequest>,
	) -> Result<Response<ext::PostVirtualHostModifyResponse>, Status> {
		Ok(Response::new(mutation::vhost::post_virtual_host(
			request.into_inner(),
		)))
	}
}

/// HealthService reports serving unconditionally once the server listens.
#[derive(Default)]
pub struct HealthService {}

#[tonic::async_trait]
impl Health for HealthService {
	async fn check(
		&self,
		_request: Request<health_pb::HealthCheckRequest>,
	) -> Result<Response<health_pb::HealthCheckResponse>, Status> {
		Ok(Response::new(health_pb::HealthCheckResponse {
			status: health_pb::health_check_response::ServingStatus::Serving as i32,
		}))
	}

	async fn list(
		&self,
		_request: Request<health_pb::HealthListRequest>,
	) -> Result<Response<health_pb::HealthListResponse>, Status> {
		Ok(Response::new(health_pb::HealthListResponse {
			statuses: [(
				String::new(),
				health_pb::HealthCheckResponse {
					status: health_pb::health_check_response::ServingStatus::Serving as i32,
				},
			)]
			.into_iter()
			.collect(),
		}))
	}

	type WatchStream = Pin<
		Box<
			dyn futures::Stream<Item = Result<health_pb::HealthCheckResponse, Status>>
				+ Send,
		>,
	>;

	async fn watch(
		&self,
		_request: Request<health_pb::HealthCheckRequest>,
	) -> Result<Response<Self::WatchStream>, Status> {
		Err(Status::unimplemented("watch is not supported"))
	}
}

/// serve runs the extension server until shutdown is signalled.
pub async fn serve(
	addr: SocketAddr,
	store: Arc<RouteStore>,
	uds_path: String,
	max_receive_message_size: usize,
	shutdown: impl Future<Output = ()>,
) -> anyhow::Result<()> {
	info!("extension server listening on {addr}");
	tonic::transport::Server::builder()
		.add_service(
			AiGatewayExtensionServer::new(ExtensionServer::new(store, uds_path))
				.max_decoding_message_size(max_receive_message_size),
		)
		.add_service(HealthServer::new(HealthService::default()))
		.serve_with_shutdown(addr, shutdown)
		.await?;
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn health_is_serving() {
		let svc = HealthService::default();
		let resp = svc
			.check(Request::new(health_pb::HealthCheckRequest {
				service: String::new(),
			}))
			.await
			.unwrap()
			.into_inner();
		assert_eq!(
			resp.status,
			health_pb::health_check_response::ServingStatus::Serving as i32
		);

		let list = svc
			.list(Request::new(health_pb::HealthListRequest {}))
			.await
			.unwrap()
			.into_inner();
		assert_eq!(list.statuses.len(), 1);

		let watch = svc
			.watch(Request::new(health_pb::HealthCheckRequest {
				service: String::new(),
			}))
			.await;
		match watch {
			Err(e) => assert_eq!(e.code(), tonic::Code::Unimplemented),
			Ok(_) => panic!("expected watch to be unimplemented"),
		}
	}
}
