mod config;

use std::sync::Arc;
use std::time::Duration;

use common::auth::{JwtAuthTokenProvider, JwtConfig};
use common::network_server::GrpcNetworkServerPool;
use common::postgres::{
    PostgresAccessValidator, PostgresApplicationRepository, PostgresClient, PostgresConfig,
    PostgresDeviceRepository, PostgresFuotaDeploymentRepository,
    PostgresMulticastGroupRepository, PostgresRemoteSessionRepository,
};
use common::telemetry::{init_telemetry, shutdown_telemetry, TelemetryProviders};
use config::ServiceConfig;
use downlink_api::domain::{
    DeviceQueueService, FuotaDeploymentService, MulticastService, UplinkService,
};
use downlink_api::downlink_api::DownlinkApi;
use downlink_api::grpc::DownlinkApiServices;
use fuota_worker::{DeploymentStepper, FuotaWorker, RemoteSyncService};
use goose::MigrationRunner;
use lpwan_runner::Runner;
use tracing::{debug, error, info};

#[tokio::main]
async fn main() {
    let config = match ServiceConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    let telemetry_providers: Option<TelemetryProviders> =
        match init_telemetry(&config.telemetry_config()) {
            Ok(providers) => providers,
            Err(e) => {
                eprintln!("Failed to initialize telemetry: {}", e);
                std::process::exit(1);
            }
        };

    info!(
        otel_enabled = config.otel_enabled,
        otel_endpoint = %config.otel_endpoint,
        "starting lpwan-all-in-one service"
    );
    debug!("configuration: {:?}", config);

    let repos = match initialize_postgres(&config.postgres_config()).await {
        Ok(repos) => repos,
        Err(e) => {
            error!("failed to initialize PostgreSQL: {:#}", e);
            shutdown_telemetry(telemetry_providers);
            std::process::exit(1);
        }
    };

    let network_server_pool = Arc::new(GrpcNetworkServerPool::new(
        config.network_server_connect_timeout(),
    ));

    let device_queue_service = Arc::new(DeviceQueueService::new(
        repos.device.clone(),
        repos.application.clone(),
        repos.application.clone(),
        network_server_pool.clone(),
    ));
    let multicast_service = Arc::new(MulticastService::new(
        repos.multicast_group.clone(),
        repos.device.clone(),
        repos.application.clone(),
        repos.application.clone(),
        network_server_pool.clone(),
    ));
    let fuota_deployment_service = Arc::new(FuotaDeploymentService::new(
        repos.fuota_deployment.clone(),
        repos.device.clone(),
        repos.application.clone(),
        network_server_pool,
    ));
    let uplink_service = Arc::new(UplinkService::new(
        repos.device.clone(),
        repos.remote_session.clone(),
        repos.fuota_deployment.clone(),
        multicast_service.clone(),
    ));

    let downlink_api = DownlinkApi::new(
        DownlinkApiServices {
            device_queue_service: device_queue_service.clone(),
            multicast_service: multicast_service.clone(),
            fuota_deployment_service,
            uplink_service,
            auth_token_provider: Arc::new(JwtAuthTokenProvider::new(JwtConfig::new(
                config.jwt_secret.clone(),
                config.jwt_expiration_hours,
            ))),
            access_validator: repos.access_validator.clone(),
        },
        config.grpc_server_config(),
    );

    let stepper = Arc::new(DeploymentStepper::new(
        repos.fuota_deployment.clone(),
        repos.remote_session.clone(),
        repos.multicast_group.clone(),
        multicast_service,
        device_queue_service.clone(),
        config.fuota_config(),
    ));
    let sync_service = Arc::new(RemoteSyncService::new(
        repos.remote_session.clone(),
        device_queue_service,
        config.sync_config(),
    ));
    let fuota_worker = FuotaWorker::new(stepper, sync_service);

    let mut runner =
        Runner::new().with_named_process("downlink_api", downlink_api.into_runner_process());
    for (name, process) in fuota_worker.into_runner_processes() {
        runner = runner.with_named_process(name, process);
    }

    runner
        .with_closer(move || async move {
            info!("running cleanup tasks");
            shutdown_telemetry(telemetry_providers);
            Ok(())
        })
        .with_closer_timeout(Duration::from_secs(10))
        .run()
        .await;
}

struct PostgresRepositories {
    device: Arc<PostgresDeviceRepository>,
    application: Arc<PostgresApplicationRepository>,
    multicast_group: Arc<PostgresMulticastGroupRepository>,
    fuota_deployment: Arc<PostgresFuotaDeploymentRepository>,
    remote_session: Arc<PostgresRemoteSessionRepository>,
    access_validator: Arc<PostgresAccessValidator>,
}

async fn initialize_postgres(config: &PostgresConfig) -> anyhow::Result<PostgresRepositories> {
    info!("running PostgreSQL migrations");
    MigrationRunner::postgres(
        config.goose_binary_path.clone(),
        config.migrations_dir.clone(),
        config.dsn(),
    )
    .run_migrations()
    .await?;

    let client = PostgresClient::from_config(config)?;
    client.ping().await?;

    Ok(PostgresRepositories {
        device: Arc::new(PostgresDeviceRepository::new(client.clone())),
        application: Arc::new(PostgresApplicationRepository::new(client.clone())),
        multicast_group: Arc::new(PostgresMulticastGroupRepository::new(client.clone())),
        fuota_deployment: Arc::new(PostgresFuotaDeploymentRepository::new(client.clone())),
        remote_session: Arc::new(PostgresRemoteSessionRepository::new(client.clone())),
        access_validator: Arc::new(PostgresAccessValidator::new(client)),
    })
}
