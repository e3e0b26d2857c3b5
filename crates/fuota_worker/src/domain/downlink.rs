use async_trait::async_trait;
use common::domain::{DomainResult, MulticastGroup};
use downlink_api::domain::{
    DeviceQueueService, DownlinkPayload, EnqueueDeviceQueueItem, MulticastService,
};
use lorawan::Eui64;
use uuid::Uuid;

/// Unconfirmed application-layer downlinks to a single device.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UnicastDownlink: Send + Sync {
    /// Returns the frame counter used for the downlink.
    async fn send(&self, dev_eui: Eui64, f_port: u8, payload: Vec<u8>) -> DomainResult<u32>;
}

/// Multicast group lifecycle and bulk enqueue used by the step machine.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MulticastDownlink: Send + Sync {
    async fn create_group(&self, group: MulticastGroup) -> DomainResult<MulticastGroup>;

    async fn enqueue_all(
        &self,
        multicast_group_id: Uuid,
        f_port: u8,
        payloads: Vec<Vec<u8>>,
    ) -> DomainResult<Vec<u32>>;

    async fn delete_group(&self, multicast_group_id: Uuid) -> DomainResult<()>;
}

#[async_trait]
impl UnicastDownlink for DeviceQueueService {
    async fn send(&self, dev_eui: Eui64, f_port: u8, payload: Vec<u8>) -> DomainResult<u32> {
        self.enqueue(EnqueueDeviceQueueItem {
            dev_eui,
            confirmed: false,
            f_port: f_port as u32,
            payload: DownlinkPayload::Data(payload),
        })
        .await
    }
}

#[async_trait]
impl MulticastDownlink for MulticastService {
    async fn create_group(&self, group: MulticastGroup) -> DomainResult<MulticastGroup> {
        MulticastService::create_group(self, group).await
    }

    async fn enqueue_all(
        &self,
        multicast_group_id: Uuid,
        f_port: u8,
        payloads: Vec<Vec<u8>>,
    ) -> DomainResult<Vec<u32>> {
        self.enqueue_multiple(multicast_group_id, f_port as u32, payloads)
            .await
    }

    async fn delete_group(&self, multicast_group_id: Uuid) -> DomainResult<()> {
        MulticastService::delete_group(self, multicast_group_id).await
    }
}
