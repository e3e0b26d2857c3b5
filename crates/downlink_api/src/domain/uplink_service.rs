use std::sync::Arc;

use common::domain::{
    DeviceRepository, DomainError, DomainResult, FuotaDeploymentDeviceState,
    FuotaDeploymentRepository, RemoteMulticastSetup, RemoteSessionRepository,
};
use lorawan::applayer::{fragmentation, multicastsetup};
use lorawan::{encrypt_frm_payload, Eui64};
use tracing::{debug, info, instrument, warn};

use crate::domain::MulticastService;

/// An uplink forwarded by the network server. `data` is still encrypted.
#[derive(Debug, Clone)]
pub struct UplinkData {
    pub dev_eui: Eui64,
    pub f_cnt: u32,
    pub f_port: u8,
    pub data: Vec<u8>,
}

/// Handles application-layer answers sent by devices on the multicast setup
/// and fragmentation ports.
pub struct UplinkService {
    device_repository: Arc<dyn DeviceRepository>,
    remote_session_repository: Arc<dyn RemoteSessionRepository>,
    fuota_deployment_repository: Arc<dyn FuotaDeploymentRepository>,
    multicast_service: Arc<MulticastService>,
}

impl UplinkService {
    pub fn new(
        device_repository: Arc<dyn DeviceRepository>,
        remote_session_repository: Arc<dyn RemoteSessionRepository>,
        fuota_deployment_repository: Arc<dyn FuotaDeploymentRepository>,
        multicast_service: Arc<MulticastService>,
    ) -> Self {
        Self {
            device_repository,
            remote_session_repository,
            fuota_deployment_repository,
            multicast_service,
        }
    }

    #[instrument(skip(self, uplink), fields(dev_eui = %uplink.dev_eui, f_port = uplink.f_port, f_cnt = uplink.f_cnt))]
    pub async fn handle_uplink(&self, uplink: UplinkData) -> DomainResult<()> {
        if uplink.f_port != multicastsetup::DEFAULT_F_PORT
            && uplink.f_port != fragmentation::DEFAULT_F_PORT
        {
            debug!("uplink on application port ignored");
            return Ok(());
        }

        let device = self
            .device_repository
            .get_device(uplink.dev_eui)
            .await?
            .ok_or_else(|| DomainError::DeviceNotFound(uplink.dev_eui.to_string()))?;

        let payload = encrypt_frm_payload(
            &device.app_s_key,
            true,
            device.dev_addr,
            uplink.f_cnt,
            &uplink.data,
        );

        if uplink.f_port == multicastsetup::DEFAULT_F_PORT {
            let answer = multicastsetup::Answer::from_bytes(&payload)?;
            self.handle_multicast_setup_answer(uplink.dev_eui, answer)
                .await
        } else {
            let answer = fragmentation::Answer::from_bytes(&payload)?;
            self.handle_fragmentation_answer(uplink.dev_eui, answer)
                .await
        }
    }

    async fn handle_multicast_setup_answer(
        &self,
        dev_eui: Eui64,
        answer: multicastsetup::Answer,
    ) -> DomainResult<()> {
        info!(command = answer.name(), ?answer, "multicast setup answer received");

        match answer {
            multicastsetup::Answer::McGroupSetup {
                mc_group_id,
                id_error,
            } => {
                if id_error {
                    return Err(DomainError::InvalidArgument(format!(
                        "IDError for McGroupID: {}",
                        mc_group_id
                    )));
                }
                self.mark_multicast_setup(dev_eui, mc_group_id).await?;
            }
            multicastsetup::Answer::McGroupDelete {
                mc_group_id,
                mc_group_undefined,
            } => {
                if mc_group_undefined {
                    return Err(DomainError::InvalidArgument(format!(
                        "McGroupUndefined for McGroupID: {}",
                        mc_group_id
                    )));
                }
                let setup = self.mark_multicast_setup(dev_eui, mc_group_id).await?;

                match self
                    .multicast_service
                    .remove_device(setup.multicast_group_id, dev_eui)
                    .await
                {
                    Ok(()) => {}
                    Err(DomainError::DeviceNotFound(_))
                    | Err(DomainError::MulticastGroupNotFound(_)) => {
                        info!(
                            multicast_group_id = %setup.multicast_group_id,
                            "device was not a member of the multicast group"
                        );
                    }
                    Err(e) => return Err(e),
                }
            }
            multicastsetup::Answer::McClassCSession {
                mc_group_id,
                dr_error,
                freq_error,
                mc_group_undefined,
                ..
            } => {
                if dr_error || freq_error || mc_group_undefined {
                    return Err(DomainError::InvalidArgument(format!(
                        "DRError: {}, FreqError: {}, McGroupUndefined: {} for McGroupID: {}",
                        dr_error, freq_error, mc_group_undefined, mc_group_id
                    )));
                }
                let session = self
                    .remote_session_repository
                    .mark_remote_multicast_class_c_session_provisioned(dev_eui, mc_group_id)
                    .await?
                    .ok_or_else(|| {
                        DomainError::RemoteSessionNotFound(format!(
                            "class-c session {} of device {}",
                            mc_group_id, dev_eui
                        ))
                    })?;

                match self
                    .multicast_service
                    .add_device(session.multicast_group_id, dev_eui)
                    .await
                {
                    Ok(()) => {}
                    Err(DomainError::AlreadyExists(_)) => {
                        warn!(
                            multicast_group_id = %session.multicast_group_id,
                            "device was already added to the multicast group"
                        );
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        Ok(())
    }

    async fn mark_multicast_setup(
        &self,
        dev_eui: Eui64,
        mc_group_id: u8,
    ) -> DomainResult<RemoteMulticastSetup> {
        self.remote_session_repository
            .mark_remote_multicast_setup_provisioned(dev_eui, mc_group_id)
            .await?
            .ok_or_else(|| {
                DomainError::RemoteSessionNotFound(format!(
                    "multicast setup {} of device {}",
                    mc_group_id, dev_eui
                ))
            })
    }

    async fn handle_fragmentation_answer(
        &self,
        dev_eui: Eui64,
        answer: fragmentation::Answer,
    ) -> DomainResult<()> {
        info!(command = answer.name(), ?answer, "fragmentation answer received");

        match answer {
            fragmentation::Answer::FragSessionSetup {
                frag_index,
                encoding_unsupported,
                not_enough_memory,
                frag_session_index_not_supported,
                wrong_descriptor,
            } => {
                if encoding_unsupported
                    || not_enough_memory
                    || frag_session_index_not_supported
                    || wrong_descriptor
                {
                    return Err(DomainError::InvalidArgument(format!(
                        "EncodingUnsupported: {}, NotEnoughMemory: {}, FragSessionIndexNotSupported: {}, WrongDescriptor: {} for FragIndex: {}",
                        encoding_unsupported,
                        not_enough_memory,
                        frag_session_index_not_supported,
                        wrong_descriptor,
                        frag_index
                    )));
                }
                self.mark_fragmentation_session(dev_eui, frag_index).await
            }
            fragmentation::Answer::FragSessionDelete {
                frag_index,
                session_does_not_exist,
            } => {
                if session_does_not_exist {
                    return Err(DomainError::InvalidArgument(format!(
                        "SessionDoesNotExist for FragIndex: {}",
                        frag_index
                    )));
                }
                self.mark_fragmentation_session(dev_eui, frag_index).await
            }
            fragmentation::Answer::FragSessionStatus {
                nb_frag_received,
                missing_frag,
                not_enough_matrix_memory,
                ..
            } => {
                let deployment_device = self
                    .fuota_deployment_repository
                    .get_pending_deployment_device(dev_eui)
                    .await?
                    .ok_or_else(|| {
                        DomainError::DeploymentDeviceNotFound(format!(
                            "no pending deployment for device {}",
                            dev_eui
                        ))
                    })?;

                let (state, error_message) = frag_session_status_result(
                    nb_frag_received,
                    missing_frag,
                    not_enough_matrix_memory,
                );

                let updated = self
                    .fuota_deployment_repository
                    .set_deployment_device_result(
                        deployment_device.fuota_deployment_id,
                        dev_eui,
                        state,
                        error_message,
                    )
                    .await?;
                if !updated {
                    warn!(
                        deployment_id = %deployment_device.fuota_deployment_id,
                        "deployment device already in a terminal state"
                    );
                }
                Ok(())
            }
        }
    }

    async fn mark_fragmentation_session(&self, dev_eui: Eui64, frag_index: u8) -> DomainResult<()> {
        self.remote_session_repository
            .mark_remote_fragmentation_session_provisioned(dev_eui, frag_index)
            .await?
            .ok_or_else(|| {
                DomainError::RemoteSessionNotFound(format!(
                    "fragmentation session {} of device {}",
                    frag_index, dev_eui
                ))
            })?;
        Ok(())
    }
}

/// Outcome of a FragSessionStatusAns. Lack of matrix memory takes precedence
/// over missing fragments.
fn frag_session_status_result(
    nb_frag_received: u16,
    missing_frag: u8,
    not_enough_matrix_memory: bool,
) -> (FuotaDeploymentDeviceState, String) {
    if not_enough_matrix_memory {
        (
            FuotaDeploymentDeviceState::Error,
            "Not enough matrix memory.".to_string(),
        )
    } else if missing_frag > 0 {
        (
            FuotaDeploymentDeviceState::Error,
            format!(
                "{} fragments missed ({} received).",
                missing_frag, nb_frag_received
            ),
        )
    } else {
        (FuotaDeploymentDeviceState::Success, String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use common::domain::{
        Device, FuotaDeploymentDevice, MockApplicationRepository, MockDeviceRepository,
        MockFuotaDeploymentRepository, MockMulticastGroupRepository, MockNetworkServerRepository,
        MockRemoteSessionRepository, RemoteFragmentationSession, RemoteMulticastClassCSession,
        RemoteMulticastSetup,
        RemoteSetupState, RetryState,
    };
    use common::network_server::MockNetworkServerPool;
    use lorawan::{Aes128Key, DevAddr};
    use std::collections::HashMap;
    use std::time::Duration;
    use uuid::Uuid;

    const APP_S_KEY: Aes128Key = Aes128Key([7; 16]);
    const DEV_ADDR: DevAddr = DevAddr([1, 2, 3, 4]);

    fn dev_eui() -> Eui64 {
        "0102030405060708".parse().unwrap()
    }

    fn device_repo() -> MockDeviceRepository {
        let mut repo = MockDeviceRepository::new();
        repo.expect_get_device().returning(|eui| {
            Ok(Some(Device {
                dev_eui: eui,
                name: "device".to_string(),
                application_id: 1,
                device_profile_id: Uuid::nil(),
                dev_addr: DEV_ADDR,
                app_s_key: APP_S_KEY,
                f_cnt_down: 0,
                variables: HashMap::new(),
                created_at: None,
                updated_at: None,
            }))
        });
        repo
    }

    /// Multicast service whose groups are all missing.
    fn multicast_service() -> Arc<MulticastService> {
        let mut group_repo = MockMulticastGroupRepository::new();
        group_repo
            .expect_lock_multicast_group()
            .returning(|_| Ok(None));
        Arc::new(MulticastService::new(
            Arc::new(group_repo),
            Arc::new(MockDeviceRepository::new()),
            Arc::new(MockApplicationRepository::new()),
            Arc::new(MockNetworkServerRepository::new()),
            Arc::new(MockNetworkServerPool::new()),
        ))
    }

    fn service(
        remote_repo: MockRemoteSessionRepository,
        fuota_repo: MockFuotaDeploymentRepository,
    ) -> UplinkService {
        UplinkService::new(
            Arc::new(device_repo()),
            Arc::new(remote_repo),
            Arc::new(fuota_repo),
            multicast_service(),
        )
    }

    fn uplink(f_port: u8, plaintext: &[u8]) -> UplinkData {
        UplinkData {
            dev_eui: dev_eui(),
            f_cnt: 11,
            f_port,
            data: encrypt_frm_payload(&APP_S_KEY, true, DEV_ADDR, 11, plaintext),
        }
    }

    fn setup_record(mc_group_id: u8) -> RemoteMulticastSetup {
        RemoteMulticastSetup {
            dev_eui: dev_eui(),
            multicast_group_id: Uuid::from_u128(1),
            mc_group_id,
            mc_addr: DevAddr([9; 4]),
            mc_key_encrypted: Aes128Key([1; 16]),
            min_mc_f_cnt: 0,
            max_mc_f_cnt: u32::MAX,
            state: RemoteSetupState::Delete,
            retry: RetryState::new(Duration::from_secs(60)),
        }
    }

    fn pending_device() -> FuotaDeploymentDevice {
        FuotaDeploymentDevice {
            fuota_deployment_id: Uuid::from_u128(2),
            dev_eui: dev_eui(),
            device_name: "device".to_string(),
            state: FuotaDeploymentDeviceState::Pending,
            error_message: String::new(),
            created_at: Some(Utc::now()),
            updated_at: None,
        }
    }

    #[test]
    fn test_frag_session_status_result() {
        assert_eq!(
            frag_session_status_result(10, 0, false),
            (FuotaDeploymentDeviceState::Success, String::new())
        );
        assert_eq!(
            frag_session_status_result(8, 2, false),
            (
                FuotaDeploymentDeviceState::Error,
                "2 fragments missed (8 received).".to_string()
            )
        );
        assert_eq!(
            frag_session_status_result(8, 2, true),
            (
                FuotaDeploymentDeviceState::Error,
                "Not enough matrix memory.".to_string()
            )
        );
    }

    #[tokio::test]
    async fn test_other_ports_are_ignored() {
        let mut devices = MockDeviceRepository::new();
        devices.expect_get_device().never();
        let service = UplinkService::new(
            Arc::new(devices),
            Arc::new(MockRemoteSessionRepository::new()),
            Arc::new(MockFuotaDeploymentRepository::new()),
            multicast_service(),
        );

        service.handle_uplink(uplink(10, &[1, 2, 3])).await.unwrap();
    }

    #[tokio::test]
    async fn test_mc_group_setup_ans_marks_provisioned() {
        let mut remote = MockRemoteSessionRepository::new();
        remote
            .expect_mark_remote_multicast_setup_provisioned()
            .withf(|eui, id| *eui == dev_eui() && *id == 1)
            .times(1)
            .return_once(|_, id| Ok(Some(setup_record(id))));

        let service = service(remote, MockFuotaDeploymentRepository::new());
        service
            .handle_uplink(uplink(200, &[0x02, 0x01]))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_mc_group_setup_ans_id_error() {
        let mut remote = MockRemoteSessionRepository::new();
        remote
            .expect_mark_remote_multicast_setup_provisioned()
            .never();

        let service = service(remote, MockFuotaDeploymentRepository::new());
        let result = service.handle_uplink(uplink(200, &[0x02, 0x05])).await;
        assert!(matches!(result, Err(DomainError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_mc_group_delete_ans_tolerates_missing_membership() {
        let mut remote = MockRemoteSessionRepository::new();
        remote
            .expect_mark_remote_multicast_setup_provisioned()
            .times(1)
            .return_once(|_, id| Ok(Some(setup_record(id))));

        let service = service(remote, MockFuotaDeploymentRepository::new());
        service
            .handle_uplink(uplink(200, &[0x03, 0x00]))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_mc_group_setup_ans_unknown_record() {
        let mut remote = MockRemoteSessionRepository::new();
        remote
            .expect_mark_remote_multicast_setup_provisioned()
            .return_once(|_, _| Ok(None));

        let service = service(remote, MockFuotaDeploymentRepository::new());
        let result = service.handle_uplink(uplink(200, &[0x02, 0x00])).await;
        assert!(matches!(result, Err(DomainError::RemoteSessionNotFound(_))));
    }

    #[tokio::test]
    async fn test_mc_class_c_session_ans_errors_rejected() {
        let mut remote = MockRemoteSessionRepository::new();
        remote
            .expect_mark_remote_multicast_class_c_session_provisioned()
            .never();

        let service = service(remote, MockFuotaDeploymentRepository::new());
        // FreqError set.
        let result = service.handle_uplink(uplink(200, &[0x04, 0x08])).await;
        assert!(matches!(result, Err(DomainError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_mc_class_c_session_ans_adds_device() {
        let mut remote = MockRemoteSessionRepository::new();
        remote
            .expect_mark_remote_multicast_class_c_session_provisioned()
            .times(1)
            .return_once(|eui, mc_group_id| {
                Ok(Some(RemoteMulticastClassCSession {
                    dev_eui: eui,
                    multicast_group_id: Uuid::from_u128(1),
                    mc_group_id,
                    session_time: Utc::now(),
                    session_time_out: 6,
                    dl_frequency: 869_525_000,
                    dr: 0,
                    retry: RetryState::new(Duration::from_secs(60)),
                }))
            });

        let service = service(remote, MockFuotaDeploymentRepository::new());
        // The group is gone, so adding the device fails after provisioning.
        let result = service
            .handle_uplink(uplink(200, &[0x04, 0x00, 0x0a, 0x00, 0x00]))
            .await;
        assert!(matches!(
            result,
            Err(DomainError::MulticastGroupNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_frag_session_setup_ans_marks_provisioned() {
        let mut remote = MockRemoteSessionRepository::new();
        remote
            .expect_mark_remote_fragmentation_session_provisioned()
            .withf(|_, frag_index| *frag_index == 1)
            .times(1)
            .return_once(|eui, frag_index| {
                Ok(Some(RemoteFragmentationSession {
                    dev_eui: eui,
                    frag_index,
                    mc_group_ids: vec![0],
                    nb_frag: 4,
                    frag_size: 56,
                    fragmentation_matrix: 0,
                    block_ack_delay: 0,
                    padding: 0,
                    descriptor: [0; 4],
                    state: RemoteSetupState::Setup,
                    retry: RetryState::new(Duration::from_secs(60)),
                }))
            });

        let service = service(remote, MockFuotaDeploymentRepository::new());
        service
            .handle_uplink(uplink(201, &[0x02, 0x40]))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_frag_session_setup_ans_error_bits() {
        let mut remote = MockRemoteSessionRepository::new();
        remote
            .expect_mark_remote_fragmentation_session_provisioned()
            .never();

        let service = service(remote, MockFuotaDeploymentRepository::new());
        let result = service.handle_uplink(uplink(201, &[0x02, 0x02])).await;
        assert!(matches!(result, Err(DomainError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_frag_session_status_ans_missing_fragments() {
        let mut fuota = MockFuotaDeploymentRepository::new();
        fuota
            .expect_get_pending_deployment_device()
            .return_once(|_| Ok(Some(pending_device())));
        fuota
            .expect_set_deployment_device_result()
            .withf(|id, eui, state, message| {
                *id == Uuid::from_u128(2)
                    && *eui == dev_eui()
                    && *state == FuotaDeploymentDeviceState::Error
                    && message == "3 fragments missed (7 received)."
            })
            .times(1)
            .return_once(|_, _, _, _| Ok(true));

        let service = service(MockRemoteSessionRepository::new(), fuota);
        service
            .handle_uplink(uplink(201, &[0x01, 0x07, 0x00, 0x03, 0x00]))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_frag_session_status_ans_success() {
        let mut fuota = MockFuotaDeploymentRepository::new();
        fuota
            .expect_get_pending_deployment_device()
            .return_once(|_| Ok(Some(pending_device())));
        fuota
            .expect_set_deployment_device_result()
            .withf(|_, _, state, message| {
                *state == FuotaDeploymentDeviceState::Success && message.is_empty()
            })
            .times(1)
            .return_once(|_, _, _, _| Ok(true));

        let service = service(MockRemoteSessionRepository::new(), fuota);
        service
            .handle_uplink(uplink(201, &[0x01, 0x0a, 0x00, 0x00, 0x00]))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_frag_session_status_ans_without_pending_deployment() {
        let mut fuota = MockFuotaDeploymentRepository::new();
        fuota
            .expect_get_pending_deployment_device()
            .return_once(|_| Ok(None));
        fuota.expect_set_deployment_device_result().never();

        let service = service(MockRemoteSessionRepository::new(), fuota);
        let result = service
            .handle_uplink(uplink(201, &[0x01, 0x0a, 0x00, 0x00, 0x00]))
            .await;
        assert!(matches!(
            result,
            Err(DomainError::DeploymentDeviceNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_malformed_answer() {
        let service = service(
            MockRemoteSessionRepository::new(),
            MockFuotaDeploymentRepository::new(),
        );
        let result = service.handle_uplink(uplink(201, &[0x7f])).await;
        assert!(matches!(result, Err(DomainError::Lorawan(_))));
    }
}
