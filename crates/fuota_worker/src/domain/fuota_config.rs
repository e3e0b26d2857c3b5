use std::time::Duration;

/// Settings of the deployment step worker.
#[derive(Debug, Clone)]
pub struct FuotaConfig {
    pub poll_interval: Duration,
    pub batch_size: i64,
    /// How long a claimed deployment stays hidden from other workers.
    pub step_lease: Duration,
    /// McGroupID used on the devices for FUOTA multicast groups.
    pub mc_group_id: u8,
    pub frag_index: u8,
    pub remote_multicast_setup_retries: u32,
    pub remote_fragmentation_session_retries: u32,
}

impl Default for FuotaConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            batch_size: 10,
            step_lease: Duration::from_secs(300),
            mc_group_id: 0,
            frag_index: 0,
            remote_multicast_setup_retries: 3,
            remote_fragmentation_session_retries: 3,
        }
    }
}

/// Settings shared by the remote setup sync loops.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub interval: Duration,
    pub batch_size: i64,
    pub retries: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            batch_size: 100,
            retries: 3,
        }
    }
}
