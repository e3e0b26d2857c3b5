use std::sync::Arc;

use common::domain::{
    DomainResult, RemoteFragmentationSession, RemoteMulticastClassCSession, RemoteMulticastSetup,
    RemoteSessionRepository, RemoteSetupState,
};
use lorawan::applayer::{fragmentation, multicastsetup};
use lorawan::gps::gps_time_u32;
use lorawan::Eui64;
use tracing::{debug, instrument, warn};

use crate::domain::{SyncConfig, UnicastDownlink};

/// Re-sends unprovisioned remote setup records to their devices.
///
/// Claiming a record bumps its retry count and `retry_after`, so a record
/// whose downlink fails is retried on a later pass until it runs out of
/// retries.
pub struct RemoteSyncService {
    remote_session_repository: Arc<dyn RemoteSessionRepository>,
    unicast: Arc<dyn UnicastDownlink>,
    config: SyncConfig,
}

impl RemoteSyncService {
    pub fn new(
        remote_session_repository: Arc<dyn RemoteSessionRepository>,
        unicast: Arc<dyn UnicastDownlink>,
        config: SyncConfig,
    ) -> Self {
        Self {
            remote_session_repository,
            unicast,
            config,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    #[instrument(skip(self))]
    pub async fn sync_multicast_setups(&self) -> DomainResult<usize> {
        let setups = self
            .remote_session_repository
            .claim_pending_remote_multicast_setups(self.config.batch_size, self.config.retries)
            .await?;

        for setup in &setups {
            let request = multicast_setup_request(setup);
            self.send(
                setup.dev_eui,
                multicastsetup::DEFAULT_F_PORT,
                request.name(),
                request.to_bytes(),
            )
            .await;
        }

        Ok(setups.len())
    }

    #[instrument(skip(self))]
    pub async fn sync_fragmentation_sessions(&self) -> DomainResult<usize> {
        let sessions = self
            .remote_session_repository
            .claim_pending_remote_fragmentation_sessions(
                self.config.batch_size,
                self.config.retries,
            )
            .await?;

        for session in &sessions {
            let request = fragmentation_session_request(session);
            self.send(
                session.dev_eui,
                fragmentation::DEFAULT_F_PORT,
                request.name(),
                request.to_bytes(),
            )
            .await;
        }

        Ok(sessions.len())
    }

    #[instrument(skip(self))]
    pub async fn sync_multicast_class_c_sessions(&self) -> DomainResult<usize> {
        let sessions = self
            .remote_session_repository
            .claim_pending_remote_multicast_class_c_sessions(
                self.config.batch_size,
                self.config.retries,
            )
            .await?;

        for session in &sessions {
            let request = class_c_session_request(session);
            self.send(
                session.dev_eui,
                multicastsetup::DEFAULT_F_PORT,
                request.name(),
                request.to_bytes(),
            )
            .await;
        }

        Ok(sessions.len())
    }

    async fn send(&self, dev_eui: Eui64, f_port: u8, command: &'static str, payload: Vec<u8>) {
        match self.unicast.send(dev_eui, f_port, payload).await {
            Ok(f_cnt) => {
                debug!(dev_eui = %dev_eui, command, f_cnt, "remote setup request enqueued")
            }
            Err(e) => {
                warn!(dev_eui = %dev_eui, command, error = %e, "enqueueing remote setup request failed")
            }
        }
    }
}

fn multicast_setup_request(setup: &RemoteMulticastSetup) -> multicastsetup::Request {
    match setup.state {
        RemoteSetupState::Setup => {
            multicastsetup::Request::McGroupSetup(multicastsetup::McGroupSetupReq {
                mc_group_id: setup.mc_group_id,
                mc_addr: setup.mc_addr,
                mc_key_encrypted: setup.mc_key_encrypted,
                min_mc_f_cnt: setup.min_mc_f_cnt,
                max_mc_f_cnt: setup.max_mc_f_cnt,
            })
        }
        RemoteSetupState::Delete => multicastsetup::Request::McGroupDelete {
            mc_group_id: setup.mc_group_id,
        },
    }
}

fn fragmentation_session_request(session: &RemoteFragmentationSession) -> fragmentation::Request {
    match session.state {
        RemoteSetupState::Setup => {
            fragmentation::Request::FragSessionSetup(fragmentation::FragSessionSetupReq {
                frag_index: session.frag_index,
                mc_group_bit_mask: session.mc_group_bit_mask(),
                nb_frag: session.nb_frag,
                frag_size: session.frag_size,
                fragmentation_matrix: session.fragmentation_matrix,
                block_ack_delay: session.block_ack_delay,
                padding: session.padding,
                descriptor: session.descriptor,
            })
        }
        RemoteSetupState::Delete => fragmentation::Request::FragSessionDelete {
            frag_index: session.frag_index,
        },
    }
}

fn class_c_session_request(session: &RemoteMulticastClassCSession) -> multicastsetup::Request {
    multicastsetup::Request::McClassCSession(multicastsetup::McClassCSessionReq {
        mc_group_id: session.mc_group_id,
        session_time: gps_time_u32(session.session_time),
        session_time_out: session.session_time_out,
        dl_frequency: session.dl_frequency,
        dr: session.dr,
    })
}
