use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use common::domain::{
    DeviceRepository, DomainError, DomainResult, FuotaDeployment, FuotaDeploymentDevice,
    FuotaDeploymentFilters, FuotaDeploymentListItem, FuotaDeploymentRepository,
    FuotaDeploymentState, MulticastGroupType, NetworkServerRepository,
};
use common::network_server::NetworkServerPool;
use lorawan::band::{max_payload_size, rx2_defaults, Region};
use lorawan::Eui64;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// Bytes of each fragment taken by the DataFragment header.
const DATA_FRAGMENT_OVERHEAD: usize = 3;

/// Largest multicast session timeout exponent that fits the 4-bit field.
const MAX_MULTICAST_TIMEOUT: u32 = 15;

#[derive(Debug, Clone)]
pub struct CreateFuotaDeploymentForDevice {
    pub dev_eui: Eui64,
    pub name: String,
    pub group_type: MulticastGroupType,
    pub dr: u32,
    /// Zero selects the region's RX2 frequency.
    pub frequency: u32,
    pub ping_slot_period: u32,
    pub payload: Vec<u8>,
    pub redundancy: u32,
    pub multicast_timeout: u32,
    pub unicast_timeout: Duration,
}

/// A page of results together with the total number of matching rows.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub total_count: i64,
    pub items: Vec<T>,
}

/// Fragment size for a data rate: the region's maximum FRMPayload (N) minus
/// the DataFragment header.
pub fn fragment_size(region: Region, dr: u8) -> DomainResult<u8> {
    let max = max_payload_size(region, dr)?;
    let size = max.n.saturating_sub(DATA_FRAGMENT_OVERHEAD);
    u8::try_from(size)
        .map_err(|_| DomainError::InvalidArgument(format!("fragment size {} out of range", size)))
}

/// Creates FUOTA deployments and reports their progress.
pub struct FuotaDeploymentService {
    fuota_deployment_repository: Arc<dyn FuotaDeploymentRepository>,
    device_repository: Arc<dyn DeviceRepository>,
    network_server_repository: Arc<dyn NetworkServerRepository>,
    network_server_pool: Arc<dyn NetworkServerPool>,
}

impl FuotaDeploymentService {
    pub fn new(
        fuota_deployment_repository: Arc<dyn FuotaDeploymentRepository>,
        device_repository: Arc<dyn DeviceRepository>,
        network_server_repository: Arc<dyn NetworkServerRepository>,
        network_server_pool: Arc<dyn NetworkServerPool>,
    ) -> Self {
        Self {
            fuota_deployment_repository,
            device_repository,
            network_server_repository,
            network_server_pool,
        }
    }

    /// Plans a deployment for a single device. The deployment starts in
    /// MC_CREATE and is due immediately.
    #[instrument(skip(self, input), fields(dev_eui = %input.dev_eui, name = %input.name))]
    pub async fn create_for_device(&self, input: CreateFuotaDeploymentForDevice) -> DomainResult<Uuid> {
        if input.name.trim().is_empty() {
            return Err(DomainError::InvalidArgument("name cannot be empty".to_string()));
        }
        if input.payload.is_empty() {
            return Err(DomainError::InvalidArgument("payload cannot be empty".to_string()));
        }
        if input.group_type != MulticastGroupType::ClassC {
            return Err(DomainError::InvalidArgument(
                "group_type is not supported".to_string(),
            ));
        }
        if input.multicast_timeout > MAX_MULTICAST_TIMEOUT {
            return Err(DomainError::InvalidArgument(format!(
                "multicast_timeout must be <= {}",
                MAX_MULTICAST_TIMEOUT
            )));
        }
        let dr = u8::try_from(input.dr)
            .map_err(|_| DomainError::InvalidArgument(format!("invalid data rate {}", input.dr)))?;
        let redundancy = u16::try_from(input.redundancy).map_err(|_| {
            DomainError::InvalidArgument(format!("redundancy {} out of range", input.redundancy))
        })?;

        self.device_repository
            .get_device(input.dev_eui)
            .await?
            .ok_or_else(|| DomainError::DeviceNotFound(input.dev_eui.to_string()))?;

        let network_server = self
            .network_server_repository
            .get_network_server_for_dev_eui(input.dev_eui)
            .await?
            .ok_or_else(|| {
                DomainError::NetworkServerNotFound(format!(
                    "no network server for device {}",
                    input.dev_eui
                ))
            })?;
        let version = self
            .network_server_pool
            .get(&network_server.server)?
            .get_version()
            .await?;
        let region: Region = version.region.parse()?;

        let frag_size = fragment_size(region, dr)?;
        let frequency = if input.frequency == 0 {
            rx2_defaults(region).frequency
        } else {
            input.frequency
        };

        let deployment = FuotaDeployment {
            id: Uuid::new_v4(),
            name: input.name,
            multicast_group_id: None,
            group_type: input.group_type,
            dr,
            frequency,
            ping_slot_period: input.ping_slot_period,
            fragmentation_matrix: 0,
            descriptor: [0; 4],
            payload: input.payload,
            frag_size,
            redundancy,
            block_ack_delay: 0,
            multicast_timeout: input.multicast_timeout as u8,
            unicast_timeout: input.unicast_timeout,
            state: FuotaDeploymentState::MulticastCreate,
            next_step_after: Utc::now(),
            created_at: None,
            updated_at: None,
        };

        self.fuota_deployment_repository
            .create_deployment_for_device(&deployment, input.dev_eui)
            .await?;

        info!(
            deployment_id = %deployment.id,
            region = %region,
            frag_size,
            "FUOTA deployment created"
        );
        Ok(deployment.id)
    }

    #[instrument(skip(self), fields(deployment_id = %id))]
    pub async fn get(&self, id: Uuid) -> DomainResult<FuotaDeployment> {
        self.fuota_deployment_repository
            .get_deployment(id)
            .await?
            .ok_or_else(|| DomainError::DeploymentNotFound(id.to_string()))
    }

    #[instrument(skip(self))]
    pub async fn list(
        &self,
        filters: FuotaDeploymentFilters,
    ) -> DomainResult<Page<FuotaDeploymentListItem>> {
        let total_count = self
            .fuota_deployment_repository
            .count_deployments(&filters)
            .await?;
        let items = self
            .fuota_deployment_repository
            .list_deployments(&filters)
            .await?;

        debug!(total_count, count = items.len(), "FUOTA deployments listed");
        Ok(Page { total_count, items })
    }

    #[instrument(skip(self), fields(deployment_id = %id, dev_eui = %dev_eui))]
    pub async fn get_deployment_device(
        &self,
        id: Uuid,
        dev_eui: Eui64,
    ) -> DomainResult<FuotaDeploymentDevice> {
        self.fuota_deployment_repository
            .get_deployment_device(id, dev_eui)
            .await?
            .ok_or_else(|| {
                DomainError::DeploymentDeviceNotFound(format!("{} in deployment {}", dev_eui, id))
            })
    }

    #[instrument(skip(self), fields(deployment_id = %id))]
    pub async fn list_deployment_devices(
        &self,
        id: Uuid,
        limit: i64,
        offset: i64,
    ) -> DomainResult<Page<FuotaDeploymentDevice>> {
        let total_count = self
            .fuota_deployment_repository
            .count_deployment_devices(id)
            .await?;
        let items = self
            .fuota_deployment_repository
            .list_deployment_devices(id, limit, offset)
            .await?;

        Ok(Page { total_count, items })
    }
}
