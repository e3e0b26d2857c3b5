use std::future::Future;
use std::pin::Pin;

use common::grpc::GrpcServerConfig;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::grpc::{run_downlink_grpc_server, DownlinkApiServices};

pub struct DownlinkApi {
    services: DownlinkApiServices,
    config: GrpcServerConfig,
}

impl DownlinkApi {
    pub fn new(services: DownlinkApiServices, config: GrpcServerConfig) -> Self {
        debug!("initializing downlink API module");
        Self { services, config }
    }

    pub fn into_runner_process(
        self,
    ) -> impl FnOnce(CancellationToken) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>
    {
        move |ctx| {
            Box::pin(async move { run_downlink_grpc_server(self.config, self.services, ctx).await })
        }
    }
}
