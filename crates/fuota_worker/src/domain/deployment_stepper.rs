use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use common::domain::{
    DomainError, DomainResult, FuotaDeployment, FuotaDeploymentRepository, FuotaDeploymentState,
    MulticastGroup, MulticastGroupRepository, RemoteFragmentationSession, RemoteMulticastClassCSession,
    RemoteMulticastSetup, RemoteSessionRepository, RemoteSetupState, RetryState,
};
use lorawan::applayer::{fragmentation, multicastsetup};
use lorawan::{Aes128Key, DevAddr};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::domain::{FuotaConfig, MulticastDownlink, UnicastDownlink};

pub const MULTICAST_SETUP_FAILED: &str =
    "The device failed to provision the remote multicast setup.";
pub const FRAGMENTATION_SESSION_FAILED: &str =
    "The device failed to provision the fragmentation session setup.";
pub const DEPLOYMENT_INCOMPLETE: &str = "Device did not complete the FUOTA deployment or did not confirm that it completed the FUOTA deployment.";

/// Drives deployments through their scheduling states.
pub struct DeploymentStepper {
    fuota_repository: Arc<dyn FuotaDeploymentRepository>,
    remote_session_repository: Arc<dyn RemoteSessionRepository>,
    multicast_group_repository: Arc<dyn MulticastGroupRepository>,
    multicast: Arc<dyn MulticastDownlink>,
    unicast: Arc<dyn UnicastDownlink>,
    config: FuotaConfig,
}

impl DeploymentStepper {
    pub fn new(
        fuota_repository: Arc<dyn FuotaDeploymentRepository>,
        remote_session_repository: Arc<dyn RemoteSessionRepository>,
        multicast_group_repository: Arc<dyn MulticastGroupRepository>,
        multicast: Arc<dyn MulticastDownlink>,
        unicast: Arc<dyn UnicastDownlink>,
        config: FuotaConfig,
    ) -> Self {
        Self {
            fuota_repository,
            remote_session_repository,
            multicast_group_repository,
            multicast,
            unicast,
            config,
        }
    }

    pub fn config(&self) -> &FuotaConfig {
        &self.config
    }

    /// Claims due deployments and runs one step on each.
    ///
    /// A failed step is logged and left alone; the deployment becomes due
    /// again once its lease expires.
    pub async fn process_due(&self) -> DomainResult<usize> {
        let deployments = self
            .fuota_repository
            .claim_due_deployments(self.config.batch_size, self.config.step_lease)
            .await?;

        let count = deployments.len();
        for mut deployment in deployments {
            let id = deployment.id;
            let state = deployment.state;

            if let Err(e) = self.step(&mut deployment).await {
                error!(deployment_id = %id, %state, error = %e, "deployment step failed");
                continue;
            }
            self.fuota_repository.update_deployment(&deployment).await?;
        }

        Ok(count)
    }

    /// Runs the step for the current state and moves the deployment to the
    /// next one. Nothing is persisted here.
    #[instrument(skip(self, deployment), fields(deployment_id = %deployment.id, state = %deployment.state))]
    pub async fn step(&self, deployment: &mut FuotaDeployment) -> DomainResult<()> {
        let (next_state, wait) = match deployment.state {
            FuotaDeploymentState::MulticastCreate => {
                self.multicast_create(deployment).await?;
                (FuotaDeploymentState::MulticastSetup, Duration::ZERO)
            }
            FuotaDeploymentState::MulticastSetup => {
                self.multicast_setup(deployment).await?;
                (
                    FuotaDeploymentState::FragmentationSessionSetup,
                    deployment
                        .unicast_timeout
                        .saturating_mul(self.config.remote_multicast_setup_retries),
                )
            }
            FuotaDeploymentState::FragmentationSessionSetup => {
                self.fragmentation_session_setup(deployment).await?;
                (
                    FuotaDeploymentState::MulticastClassCSessionSetup,
                    deployment
                        .unicast_timeout
                        .saturating_mul(self.config.remote_fragmentation_session_retries),
                )
            }
            FuotaDeploymentState::MulticastClassCSessionSetup => {
                let wait = self.multicast_class_c_session_setup(deployment).await?;
                (FuotaDeploymentState::Enqueue, wait)
            }
            FuotaDeploymentState::Enqueue => {
                self.enqueue(deployment).await?;
                (
                    FuotaDeploymentState::StatusRequest,
                    Duration::from_secs(1u64 << deployment.multicast_timeout.min(32)),
                )
            }
            FuotaDeploymentState::StatusRequest => {
                self.status_request(deployment).await?;
                (
                    FuotaDeploymentState::SetDeviceStatus,
                    deployment.unicast_timeout,
                )
            }
            FuotaDeploymentState::SetDeviceStatus => {
                self.set_device_status(deployment).await?;
                (FuotaDeploymentState::Cleanup, Duration::ZERO)
            }
            FuotaDeploymentState::Cleanup => {
                self.cleanup(deployment).await?;
                (FuotaDeploymentState::Done, Duration::ZERO)
            }
            FuotaDeploymentState::Done => {
                warn!("deployment already done");
                return Ok(());
            }
        };

        info!(next_state = %next_state, ?wait, "deployment step completed");
        deployment.state = next_state;
        deployment.next_step_after = after(Utc::now(), wait)?;
        Ok(())
    }

    /// Creates the deployment's multicast group. The group id is derived
    /// from the deployment, so a replay after a lost update reuses the group
    /// it already created.
    async fn multicast_create(&self, deployment: &mut FuotaDeployment) -> DomainResult<()> {
        let group_id = deployment.multicast_group_id.unwrap_or(deployment.id);
        if self
            .multicast_group_repository
            .get_multicast_group(group_id)
            .await?
            .is_some()
        {
            debug!(multicast_group_id = %group_id, "reusing existing fuota multicast group");
            deployment.multicast_group_id = Some(group_id);
            return Ok(());
        }

        let service_profile_id = self
            .fuota_repository
            .get_service_profile_id(deployment.id)
            .await?
            .ok_or_else(|| {
                DomainError::FailedPrecondition(format!(
                    "deployment {} has no device with a service profile",
                    deployment.id
                ))
            })?;

        let mc_addr = DevAddr::random();
        let mc_key = Aes128Key::random();
        let group = MulticastGroup {
            id: group_id,
            name: format!("fuota-{}", deployment.id),
            service_profile_id,
            mc_addr,
            mc_nwk_s_key: multicastsetup::mc_nwk_s_key(&mc_key, mc_addr),
            mc_app_s_key: multicastsetup::mc_app_s_key(&mc_key, mc_addr),
            mc_key,
            f_cnt: 0,
            group_type: deployment.group_type,
            dr: deployment.dr,
            frequency: deployment.frequency,
            ping_slot_period: deployment.ping_slot_period,
            created_at: None,
            updated_at: None,
        };

        let group = self.multicast.create_group(group).await?;
        debug!(multicast_group_id = %group.id, "fuota multicast group created");
        deployment.multicast_group_id = Some(group.id);
        Ok(())
    }

    async fn multicast_setup(&self, deployment: &FuotaDeployment) -> DomainResult<()> {
        let group_id = multicast_group_id(deployment)?;
        let group = self
            .multicast_group_repository
            .get_multicast_group(group_id)
            .await?
            .ok_or_else(|| DomainError::MulticastGroupNotFound(group_id.to_string()))?;

        let device_keys = self.fuota_repository.get_device_keys(deployment.id).await?;
        for keys in device_keys {
            let Some(mc_root_key) = keys.mc_root_key() else {
                warn!(dev_eui = %keys.dev_eui, "device has no AppKey or GenAppKey, skipping");
                continue;
            };
            let mc_ke_key = multicastsetup::mc_ke_key(&mc_root_key);

            let setup = RemoteMulticastSetup {
                dev_eui: keys.dev_eui,
                multicast_group_id: group_id,
                mc_group_id: self.config.mc_group_id,
                mc_addr: group.mc_addr,
                mc_key_encrypted: multicastsetup::encrypt_mc_key(&mc_ke_key, &group.mc_key),
                min_mc_f_cnt: 0,
                max_mc_f_cnt: u32::MAX,
                state: RemoteSetupState::Setup,
                retry: RetryState::new(deployment.unicast_timeout),
            };
            self.remote_session_repository
                .replace_remote_multicast_setup(&setup)
                .await?;
        }

        Ok(())
    }

    async fn fragmentation_session_setup(&self, deployment: &FuotaDeployment) -> DomainResult<()> {
        let group_id = multicast_group_id(deployment)?;
        let frag_size = deployment.frag_size as usize;
        if frag_size == 0 {
            return Err(DomainError::FailedPrecondition(
                "deployment has no fragment size".to_string(),
            ));
        }

        let padding = fragmentation::padding(deployment.payload.len(), frag_size);
        let nb_frag = fragmentation::nb_frag(deployment.payload.len(), frag_size);
        let nb_frag = u16::try_from(nb_frag).map_err(|_| {
            DomainError::InvalidArgument(format!("payload needs too many fragments: {}", nb_frag))
        })?;

        let dev_euis = self
            .remote_session_repository
            .get_dev_euis_with_multicast_setup(group_id)
            .await?;

        for dev_eui in dev_euis {
            let session = RemoteFragmentationSession {
                dev_eui,
                frag_index: self.config.frag_index,
                mc_group_ids: vec![self.config.mc_group_id],
                nb_frag,
                frag_size: deployment.frag_size,
                fragmentation_matrix: deployment.fragmentation_matrix,
                block_ack_delay: deployment.block_ack_delay,
                padding: padding as u8,
                descriptor: deployment.descriptor,
                state: RemoteSetupState::Setup,
                retry: RetryState::new(deployment.unicast_timeout),
            };
            self.remote_session_repository
                .replace_remote_fragmentation_session(&session)
                .await?;
        }

        Ok(())
    }

    /// Returns the time until the class-C session starts.
    async fn multicast_class_c_session_setup(
        &self,
        deployment: &FuotaDeployment,
    ) -> DomainResult<Duration> {
        let group_id = multicast_group_id(deployment)?;
        let wait = deployment
            .unicast_timeout
            .saturating_mul(self.config.remote_multicast_setup_retries);
        let session_time = after(Utc::now(), wait)?;

        let dev_euis = self
            .remote_session_repository
            .get_dev_euis_with_fragmentation_session(group_id, self.config.frag_index)
            .await?;

        for dev_eui in dev_euis {
            let session = RemoteMulticastClassCSession {
                dev_eui,
                multicast_group_id: group_id,
                mc_group_id: self.config.mc_group_id,
                session_time,
                session_time_out: deployment.multicast_timeout,
                dl_frequency: deployment.frequency,
                dr: deployment.dr,
                retry: RetryState::new(deployment.unicast_timeout),
            };
            self.remote_session_repository
                .replace_remote_multicast_class_c_session(&session)
                .await?;
        }

        Ok(wait)
    }

    async fn enqueue(&self, deployment: &FuotaDeployment) -> DomainResult<()> {
        let group_id = multicast_group_id(deployment)?;
        let frag_size = deployment.frag_size as usize;

        let mut data = deployment.payload.clone();
        data.resize(
            data.len() + fragmentation::padding(data.len(), frag_size),
            0,
        );
        let fragments =
            fragmentation::encode(&data, frag_size, deployment.redundancy as usize)?;

        let payloads = fragments
            .into_iter()
            .enumerate()
            .map(|(i, payload)| {
                let n = u16::try_from(i + 1).map_err(|_| {
                    DomainError::InvalidArgument("too many fragments".to_string())
                })?;
                Ok(fragmentation::Request::DataFragment {
                    frag_index: self.config.frag_index,
                    n,
                    payload,
                }
                .to_bytes())
            })
            .collect::<DomainResult<Vec<_>>>()?;

        let count = payloads.len();
        self.multicast
            .enqueue_all(group_id, fragmentation::DEFAULT_F_PORT, payloads)
            .await?;

        info!(multicast_group_id = %group_id, fragments = count, "fragments enqueued");
        Ok(())
    }

    async fn status_request(&self, deployment: &FuotaDeployment) -> DomainResult<()> {
        let group_id = multicast_group_id(deployment)?;
        let dev_euis = self
            .remote_session_repository
            .get_dev_euis_with_fragmentation_session(group_id, self.config.frag_index)
            .await?;

        let payload = fragmentation::Request::FragSessionStatus {
            frag_index: self.config.frag_index,
            participants: true,
        }
        .to_bytes();

        for dev_eui in dev_euis {
            if let Err(e) = self
                .unicast
                .send(dev_eui, fragmentation::DEFAULT_F_PORT, payload.clone())
                .await
            {
                warn!(dev_eui = %dev_eui, error = %e, "sending fragmentation session status request failed");
            }
        }

        Ok(())
    }

    async fn set_device_status(&self, deployment: &FuotaDeployment) -> DomainResult<()> {
        let group_id = multicast_group_id(deployment)?;

        let setup_failures = self
            .fuota_repository
            .mark_multicast_setup_failures(
                deployment.id,
                group_id,
                MULTICAST_SETUP_FAILED.to_string(),
            )
            .await?;
        let session_failures = self
            .fuota_repository
            .mark_fragmentation_session_failures(
                deployment.id,
                self.config.frag_index,
                FRAGMENTATION_SESSION_FAILED.to_string(),
            )
            .await?;
        let incomplete = self
            .fuota_repository
            .mark_incomplete(deployment.id, DEPLOYMENT_INCOMPLETE.to_string())
            .await?;

        info!(
            setup_failures,
            session_failures, incomplete, "pending deployment devices resolved"
        );
        Ok(())
    }

    async fn cleanup(&self, deployment: &FuotaDeployment) -> DomainResult<()> {
        let Some(group_id) = deployment.multicast_group_id else {
            return Ok(());
        };

        match self.multicast.delete_group(group_id).await {
            Ok(()) => Ok(()),
            Err(DomainError::MulticastGroupNotFound(_)) => {
                debug!(multicast_group_id = %group_id, "multicast group already deleted");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

fn multicast_group_id(deployment: &FuotaDeployment) -> DomainResult<Uuid> {
    deployment.multicast_group_id.ok_or_else(|| {
        DomainError::FailedPrecondition(format!(
            "deployment {} has no multicast group",
            deployment.id
        ))
    })
}

fn after(now: DateTime<Utc>, wait: Duration) -> DomainResult<DateTime<Utc>> {
    TimeDelta::from_std(wait)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .ok_or_else(|| DomainError::InvalidArgument(format!("wait out of range: {:?}", wait)))
}
