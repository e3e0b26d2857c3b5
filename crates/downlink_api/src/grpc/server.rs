use std::sync::Arc;

use common::auth::{AccessValidator, AuthTokenProvider};
use common::grpc::{run_grpc_server, GrpcServerConfig};
use lpwan_proto::api::v1::device_queue_service_server::DeviceQueueServiceServer;
use lpwan_proto::api::v1::fuota_deployment_service_server::FuotaDeploymentServiceServer;
use lpwan_proto::api::v1::multicast_group_service_server::MulticastGroupServiceServer;
use lpwan_proto::application_server::v1::application_server_service_server::ApplicationServerServiceServer;
use tokio_util::sync::CancellationToken;
use tonic::service::Routes;

use crate::domain::{DeviceQueueService, FuotaDeploymentService, MulticastService, UplinkService};
use crate::grpc::{
    ApplicationServerServiceHandler, DeviceQueueServiceHandler, FuotaDeploymentServiceHandler,
    MulticastGroupServiceHandler,
};

/// File descriptor sets registered with the reflection service.
pub const REFLECTION_DESCRIPTORS: &[&[u8]] = &[
    lpwan_proto::api::v1::FILE_DESCRIPTOR_SET,
    lpwan_proto::application_server::v1::FILE_DESCRIPTOR_SET,
];

/// Everything the downlink API handlers need.
#[derive(Clone)]
pub struct DownlinkApiServices {
    pub device_queue_service: Arc<DeviceQueueService>,
    pub multicast_service: Arc<MulticastService>,
    pub fuota_deployment_service: Arc<FuotaDeploymentService>,
    pub uplink_service: Arc<UplinkService>,
    pub auth_token_provider: Arc<dyn AuthTokenProvider>,
    pub access_validator: Arc<dyn AccessValidator>,
}

pub fn build_downlink_api_routes(services: &DownlinkApiServices) -> Routes {
    let device_queue_handler = DeviceQueueServiceHandler::new(
        services.device_queue_service.clone(),
        services.auth_token_provider.clone(),
        services.access_validator.clone(),
    );
    let multicast_group_handler = MulticastGroupServiceHandler::new(
        services.multicast_service.clone(),
        services.auth_token_provider.clone(),
        services.access_validator.clone(),
    );
    let fuota_deployment_handler = FuotaDeploymentServiceHandler::new(
        services.fuota_deployment_service.clone(),
        services.auth_token_provider.clone(),
        services.access_validator.clone(),
    );
    let uplink_handler = ApplicationServerServiceHandler::new(services.uplink_service.clone());

    let mut builder = Routes::builder();
    builder
        .add_service(DeviceQueueServiceServer::new(device_queue_handler))
        .add_service(MulticastGroupServiceServer::new(multicast_group_handler))
        .add_service(FuotaDeploymentServiceServer::new(fuota_deployment_handler))
        .add_service(ApplicationServerServiceServer::new(uplink_handler));
    builder.routes()
}

pub async fn run_downlink_grpc_server(
    config: GrpcServerConfig,
    services: DownlinkApiServices,
    cancellation_token: CancellationToken,
) -> anyhow::Result<()> {
    let routes = build_downlink_api_routes(&services);
    run_grpc_server(config, routes, REFLECTION_DESCRIPTORS, cancellation_token).await
}
