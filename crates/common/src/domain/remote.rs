use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lorawan::{Aes128Key, DevAddr, Eui64};
use uuid::Uuid;

use crate::domain::result::{DomainError, DomainResult};

/// Whether a remote record asks the device to set up or tear down a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RemoteSetupState {
    #[default]
    Setup,
    Delete,
}

impl RemoteSetupState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RemoteSetupState::Setup => "SETUP",
            RemoteSetupState::Delete => "DELETE",
        }
    }
}

impl FromStr for RemoteSetupState {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SETUP" => Ok(RemoteSetupState::Setup),
            "DELETE" => Ok(RemoteSetupState::Delete),
            other => Err(DomainError::InvalidArgument(format!(
                "unknown remote setup state: {}",
                other
            ))),
        }
    }
}

/// Retry bookkeeping shared by every remote record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryState {
    pub state_provisioned: bool,
    pub retry_after: DateTime<Utc>,
    pub retry_count: u32,
    pub retry_interval: Duration,
}

impl RetryState {
    /// Unprovisioned, due immediately.
    pub fn new(retry_interval: Duration) -> Self {
        Self {
            state_provisioned: false,
            retry_after: Utc::now(),
            retry_count: 0,
            retry_interval,
        }
    }
}

/// McGroupSetupReq / McGroupDeleteReq state of one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteMulticastSetup {
    pub dev_eui: Eui64,
    pub multicast_group_id: Uuid,
    pub mc_group_id: u8,
    pub mc_addr: DevAddr,
    pub mc_key_encrypted: Aes128Key,
    pub min_mc_f_cnt: u32,
    pub max_mc_f_cnt: u32,
    pub state: RemoteSetupState,
    pub retry: RetryState,
}

/// FragSessionSetupReq / FragSessionDeleteReq state of one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFragmentationSession {
    pub dev_eui: Eui64,
    pub frag_index: u8,
    /// Multicast groups (McGroupID 0..=3) the session listens on.
    pub mc_group_ids: Vec<u8>,
    pub nb_frag: u16,
    pub frag_size: u8,
    pub fragmentation_matrix: u8,
    pub block_ack_delay: u8,
    pub padding: u8,
    pub descriptor: [u8; 4],
    pub state: RemoteSetupState,
    pub retry: RetryState,
}

impl RemoteFragmentationSession {
    pub fn mc_group_bit_mask(&self) -> [bool; 4] {
        let mut mask = [false; 4];
        for id in &self.mc_group_ids {
            if let Some(bit) = mask.get_mut(*id as usize) {
                *bit = true;
            }
        }
        mask
    }
}

/// McClassCSessionReq state of one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteMulticastClassCSession {
    pub dev_eui: Eui64,
    pub multicast_group_id: Uuid,
    pub mc_group_id: u8,
    pub session_time: DateTime<Utc>,
    pub session_time_out: u8,
    pub dl_frequency: u32,
    pub dr: u8,
    pub retry: RetryState,
}

#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait RemoteSessionRepository: Send + Sync {
    /// Stores the setup, replacing an earlier one for the same device and
    /// group. The retry state is reset with it.
    async fn replace_remote_multicast_setup(
        &self,
        setup: &RemoteMulticastSetup,
    ) -> DomainResult<()>;

    /// Replaces any session of the device that uses the same fragment index.
    async fn replace_remote_fragmentation_session(
        &self,
        session: &RemoteFragmentationSession,
    ) -> DomainResult<()>;

    /// Replaces any class-C session of the device for the same group.
    async fn replace_remote_multicast_class_c_session(
        &self,
        session: &RemoteMulticastClassCSession,
    ) -> DomainResult<()>;

    /// Claims unprovisioned, due setups with `retry_count < max_retry_count`.
    /// Claimed rows have their retry count incremented and `retry_after`
    /// pushed by their retry interval.
    async fn claim_pending_remote_multicast_setups(
        &self,
        limit: i64,
        max_retry_count: u32,
    ) -> DomainResult<Vec<RemoteMulticastSetup>>;

    /// As above. Multicast sessions are only claimed once a multicast setup
    /// for one of their groups is provisioned.
    async fn claim_pending_remote_fragmentation_sessions(
        &self,
        limit: i64,
        max_retry_count: u32,
    ) -> DomainResult<Vec<RemoteFragmentationSession>>;

    /// As above. Sessions are only claimed once the matching multicast setup
    /// is provisioned.
    async fn claim_pending_remote_multicast_class_c_sessions(
        &self,
        limit: i64,
        max_retry_count: u32,
    ) -> DomainResult<Vec<RemoteMulticastClassCSession>>;

    async fn mark_remote_multicast_setup_provisioned(
        &self,
        dev_eui: Eui64,
        mc_group_id: u8,
    ) -> DomainResult<Option<RemoteMulticastSetup>>;

    async fn mark_remote_fragmentation_session_provisioned(
        &self,
        dev_eui: Eui64,
        frag_index: u8,
    ) -> DomainResult<Option<RemoteFragmentationSession>>;

    async fn mark_remote_multicast_class_c_session_provisioned(
        &self,
        dev_eui: Eui64,
        mc_group_id: u8,
    ) -> DomainResult<Option<RemoteMulticastClassCSession>>;

    /// Devices with a provisioned SETUP record for the group.
    async fn get_dev_euis_with_multicast_setup(
        &self,
        multicast_group_id: Uuid,
    ) -> DomainResult<Vec<Eui64>>;

    /// Devices with a provisioned fragmentation session on `frag_index` whose
    /// multicast setup for the group is provisioned too.
    async fn get_dev_euis_with_fragmentation_session(
        &self,
        multicast_group_id: Uuid,
        frag_index: u8,
    ) -> DomainResult<Vec<Eui64>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mc_group_bit_mask() {
        let session = RemoteFragmentationSession {
            dev_eui: Eui64([1; 8]),
            frag_index: 0,
            mc_group_ids: vec![0, 2, 7],
            nb_frag: 10,
            frag_size: 56,
            fragmentation_matrix: 0,
            block_ack_delay: 0,
            padding: 0,
            descriptor: [0; 4],
            state: RemoteSetupState::Setup,
            retry: RetryState::new(Duration::from_secs(60)),
        };
        assert_eq!(session.mc_group_bit_mask(), [true, false, true, false]);
    }

    #[test]
    fn test_remote_setup_state_parse() {
        assert_eq!(
            "DELETE".parse::<RemoteSetupState>().unwrap(),
            RemoteSetupState::Delete
        );
        assert!("NOPE".parse::<RemoteSetupState>().is_err());
    }
}
