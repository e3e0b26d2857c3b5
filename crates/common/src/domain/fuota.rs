use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lorawan::Eui64;
use uuid::Uuid;

use crate::domain::device::DeviceKeys;
use crate::domain::multicast_group::MulticastGroupType;
use crate::domain::result::{DomainError, DomainResult};

/// Scheduling state of a deployment. Stored as text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FuotaDeploymentState {
    #[default]
    MulticastCreate,
    MulticastSetup,
    FragmentationSessionSetup,
    MulticastClassCSessionSetup,
    Enqueue,
    StatusRequest,
    SetDeviceStatus,
    Cleanup,
    Done,
}

impl FuotaDeploymentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            FuotaDeploymentState::MulticastCreate => "MC_CREATE",
            FuotaDeploymentState::MulticastSetup => "MC_SETUP",
            FuotaDeploymentState::FragmentationSessionSetup => "FRAG_SESS_SETUP",
            FuotaDeploymentState::MulticastClassCSessionSetup => "MC_SESS_C_SETUP",
            FuotaDeploymentState::Enqueue => "ENQUEUE",
            FuotaDeploymentState::StatusRequest => "STATUS_REQUEST",
            FuotaDeploymentState::SetDeviceStatus => "SET_DEVICE_STATUS",
            FuotaDeploymentState::Cleanup => "CLEANUP",
            FuotaDeploymentState::Done => "DONE",
        }
    }
}

impl fmt::Display for FuotaDeploymentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FuotaDeploymentState {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "MC_CREATE" => FuotaDeploymentState::MulticastCreate,
            "MC_SETUP" => FuotaDeploymentState::MulticastSetup,
            "FRAG_SESS_SETUP" => FuotaDeploymentState::FragmentationSessionSetup,
            "MC_SESS_C_SETUP" => FuotaDeploymentState::MulticastClassCSessionSetup,
            "ENQUEUE" => FuotaDeploymentState::Enqueue,
            "STATUS_REQUEST" => FuotaDeploymentState::StatusRequest,
            "SET_DEVICE_STATUS" => FuotaDeploymentState::SetDeviceStatus,
            "CLEANUP" => FuotaDeploymentState::Cleanup,
            "DONE" => FuotaDeploymentState::Done,
            other => {
                return Err(DomainError::InvalidArgument(format!(
                    "unknown deployment state: {}",
                    other
                )))
            }
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FuotaDeploymentDeviceState {
    #[default]
    Pending,
    Success,
    Error,
}

impl FuotaDeploymentDeviceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            FuotaDeploymentDeviceState::Pending => "PENDING",
            FuotaDeploymentDeviceState::Success => "SUCCESS",
            FuotaDeploymentDeviceState::Error => "ERROR",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, FuotaDeploymentDeviceState::Pending)
    }
}

impl FromStr for FuotaDeploymentDeviceState {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(FuotaDeploymentDeviceState::Pending),
            "SUCCESS" => Ok(FuotaDeploymentDeviceState::Success),
            "ERROR" => Ok(FuotaDeploymentDeviceState::Error),
            other => Err(DomainError::InvalidArgument(format!(
                "unknown deployment device state: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FuotaDeployment {
    pub id: Uuid,
    pub name: String,
    /// Set once the MC_CREATE step has created the group.
    pub multicast_group_id: Option<Uuid>,
    pub group_type: MulticastGroupType,
    pub dr: u8,
    pub frequency: u32,
    pub ping_slot_period: u32,
    pub fragmentation_matrix: u8,
    pub descriptor: [u8; 4],
    pub payload: Vec<u8>,
    pub frag_size: u8,
    pub redundancy: u16,
    pub block_ack_delay: u8,
    /// Session timeout exponent: the multicast session lasts 2^timeout seconds.
    pub multicast_timeout: u8,
    pub unicast_timeout: Duration,
    pub state: FuotaDeploymentState,
    pub next_step_after: DateTime<Utc>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FuotaDeploymentListItem {
    pub id: Uuid,
    pub name: String,
    pub state: FuotaDeploymentState,
    pub next_step_after: DateTime<Utc>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// A device row of a deployment, joined with the device name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FuotaDeploymentDevice {
    pub fuota_deployment_id: Uuid,
    pub dev_eui: Eui64,
    pub device_name: String,
    pub state: FuotaDeploymentDeviceState,
    pub error_message: String,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FuotaDeploymentFilters {
    pub dev_eui: Option<Eui64>,
    pub application_id: Option<i64>,
    pub limit: i64,
    pub offset: i64,
}

#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait FuotaDeploymentRepository: Send + Sync {
    /// Inserts the deployment and one PENDING device row in one transaction.
    async fn create_deployment_for_device(
        &self,
        deployment: &FuotaDeployment,
        dev_eui: Eui64,
    ) -> DomainResult<()>;

    async fn get_deployment(&self, id: Uuid) -> DomainResult<Option<FuotaDeployment>>;

    /// Returns up to `limit` due deployments that are not DONE and pushes their
    /// `next_step_after` forward by `lease`, skipping rows locked by another
    /// worker.
    async fn claim_due_deployments(
        &self,
        limit: i64,
        lease: Duration,
    ) -> DomainResult<Vec<FuotaDeployment>>;

    async fn update_deployment(&self, deployment: &FuotaDeployment) -> DomainResult<()>;

    async fn count_deployments(&self, filters: &FuotaDeploymentFilters) -> DomainResult<i64>;

    async fn list_deployments(
        &self,
        filters: &FuotaDeploymentFilters,
    ) -> DomainResult<Vec<FuotaDeploymentListItem>>;

    async fn get_deployment_device(
        &self,
        deployment_id: Uuid,
        dev_eui: Eui64,
    ) -> DomainResult<Option<FuotaDeploymentDevice>>;

    async fn count_deployment_devices(&self, deployment_id: Uuid) -> DomainResult<i64>;

    async fn list_deployment_devices(
        &self,
        deployment_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> DomainResult<Vec<FuotaDeploymentDevice>>;

    /// The oldest PENDING deployment row of a device.
    async fn get_pending_deployment_device(
        &self,
        dev_eui: Eui64,
    ) -> DomainResult<Option<FuotaDeploymentDevice>>;

    /// Moves a PENDING device row to a terminal state. Returns false when the
    /// row was missing or already terminal.
    async fn set_deployment_device_result(
        &self,
        deployment_id: Uuid,
        dev_eui: Eui64,
        state: FuotaDeploymentDeviceState,
        error_message: String,
    ) -> DomainResult<bool>;

    /// Service profile of the application that owns the deployment's devices.
    async fn get_service_profile_id(&self, deployment_id: Uuid) -> DomainResult<Option<Uuid>>;

    async fn get_device_keys(&self, deployment_id: Uuid) -> DomainResult<Vec<DeviceKeys>>;

    /// Marks PENDING devices whose multicast setup for `group_id` is not
    /// provisioned as ERROR. Returns the number of rows updated.
    async fn mark_multicast_setup_failures(
        &self,
        deployment_id: Uuid,
        group_id: Uuid,
        error_message: String,
    ) -> DomainResult<u64>;

    /// Marks PENDING devices whose fragmentation session for `frag_index` is
    /// not provisioned as ERROR.
    async fn mark_fragmentation_session_failures(
        &self,
        deployment_id: Uuid,
        frag_index: u8,
        error_message: String,
    ) -> DomainResult<u64>;

    /// Marks every remaining PENDING device as ERROR.
    async fn mark_incomplete(&self, deployment_id: Uuid, error_message: String)
        -> DomainResult<u64>;
}
