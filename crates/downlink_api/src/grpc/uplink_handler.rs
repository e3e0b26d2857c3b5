use std::sync::Arc;

use common::grpc::domain_error_to_status;
use lorawan::Eui64;
use lpwan_proto::application_server::v1::application_server_service_server::ApplicationServerService as ApplicationServerServiceTrait;
use lpwan_proto::application_server::v1::{HandleUplinkDataRequest, HandleUplinkDataResponse};
use tonic::{Request, Response, Status};
use tracing::{instrument, warn};

use crate::domain::{UplinkData, UplinkService};

/// Uplink ingress for the network server. Not user-authenticated.
pub struct ApplicationServerServiceHandler {
    domain_service: Arc<UplinkService>,
}

impl ApplicationServerServiceHandler {
    pub fn new(domain_service: Arc<UplinkService>) -> Self {
        Self { domain_service }
    }
}

#[tonic::async_trait]
impl ApplicationServerServiceTrait for ApplicationServerServiceHandler {
    #[instrument(
        name = "HandleUplinkData",
        skip(self, request),
        fields(f_port = request.get_ref().f_port, f_cnt = request.get_ref().f_cnt)
    )]
    async fn handle_uplink_data(
        &self,
        request: Request<HandleUplinkDataRequest>,
    ) -> Result<Response<HandleUplinkDataResponse>, Status> {
        let req = request.into_inner();
        let dev_eui = Eui64::from_slice(&req.dev_eui)
            .map_err(|e| Status::invalid_argument(format!("invalid dev_eui: {}", e)))?;
        let f_port = u8::try_from(req.f_port)
            .map_err(|_| Status::invalid_argument(format!("invalid f_port {}", req.f_port)))?;

        self.domain_service
            .handle_uplink(UplinkData {
                dev_eui,
                f_cnt: req.f_cnt,
                f_port,
                data: req.data,
            })
            .await
            .map_err(|e| {
                warn!(dev_eui = %dev_eui, error = %e, "handling uplink failed");
                domain_error_to_status(e)
            })?;

        Ok(Response::new(HandleUplinkDataResponse {}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::domain::{
        MockApplicationRepository, MockDeviceRepository, MockFuotaDeploymentRepository,
        MockMulticastGroupRepository, MockNetworkServerRepository, MockRemoteSessionRepository,
    };
    use common::network_server::MockNetworkServerPool;

    use crate::domain::MulticastService;

    fn handler(device_repo: MockDeviceRepository) -> ApplicationServerServiceHandler {
        let multicast = MulticastService::new(
            Arc::new(MockMulticastGroupRepository::new()),
            Arc::new(MockDeviceRepository::new()),
            Arc::new(MockApplicationRepository::new()),
            Arc::new(MockNetworkServerRepository::new()),
            Arc::new(MockNetworkServerPool::new()),
        );
        let service = UplinkService::new(
            Arc::new(device_repo),
            Arc::new(MockRemoteSessionRepository::new()),
            Arc::new(MockFuotaDeploymentRepository::new()),
            Arc::new(multicast),
        );
        ApplicationServerServiceHandler::new(Arc::new(service))
    }

    fn request(dev_eui: Vec<u8>, f_port: u32) -> Request<HandleUplinkDataRequest> {
        Request::new(HandleUplinkDataRequest {
            dev_eui,
            join_eui: vec![0; 8],
            f_cnt: 1,
            f_port,
            adr: true,
            dr: 5,
            data: vec![0x02, 0x00],
        })
    }

    #[tokio::test]
    async fn test_invalid_dev_eui_length() {
        let handler = handler(MockDeviceRepository::new());
        let status = handler
            .handle_uplink_data(request(vec![1, 2, 3], 200))
            .await
            .unwrap_err();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);
    }

    #[tokio::test]
    async fn test_invalid_f_port() {
        let handler = handler(MockDeviceRepository::new());
        let status = handler
            .handle_uplink_data(request(vec![1; 8], 300))
            .await
            .unwrap_err();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);
    }

    #[tokio::test]
    async fn test_unknown_device() {
        let mut device_repo = MockDeviceRepository::new();
        device_repo.expect_get_device().return_once(|_| Ok(None));

        let handler = handler(device_repo);
        let status = handler
            .handle_uplink_data(request(vec![1; 8], 200))
            .await
            .unwrap_err();
        assert_eq!(status.code(), tonic::Code::NotFound);
    }

    #[tokio::test]
    async fn test_application_port_acknowledged() {
        let mut device_repo = MockDeviceRepository::new();
        device_repo.expect_get_device().never();

        let handler = handler(device_repo);
        handler
            .handle_uplink_data(request(vec![1; 8], 10))
            .await
            .unwrap();
    }
}
