use std::sync::Arc;

use async_trait::async_trait;
use lorawan::Eui64;
use uuid::Uuid;

use crate::domain::{DeviceQueueItem, DomainResult, MulticastGroup, MulticastQueueItem};

/// Region and software version reported by a network server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkServerVersion {
    pub region: String,
    pub version: String,
}

/// Downstream LoRaWAN network-server API.
///
/// Payloads passed through here are already encrypted.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait NetworkServerClient: Send + Sync {
    async fn create_device_queue_item(&self, item: &DeviceQueueItem) -> DomainResult<()>;

    async fn flush_device_queue(&self, dev_eui: Eui64) -> DomainResult<()>;

    /// Items still pending at the network server, oldest first.
    async fn get_device_queue_items(&self, dev_eui: Eui64) -> DomainResult<Vec<DeviceQueueItem>>;

    async fn create_multicast_group(&self, group: &MulticastGroup) -> DomainResult<()>;

    async fn delete_multicast_group(&self, multicast_group_id: Uuid) -> DomainResult<()>;

    async fn add_device_to_multicast_group(
        &self,
        dev_eui: Eui64,
        multicast_group_id: Uuid,
    ) -> DomainResult<()>;

    async fn remove_device_from_multicast_group(
        &self,
        dev_eui: Eui64,
        multicast_group_id: Uuid,
    ) -> DomainResult<()>;

    async fn enqueue_multicast_queue_item(&self, item: &MulticastQueueItem) -> DomainResult<()>;

    async fn flush_multicast_queue(&self, multicast_group_id: Uuid) -> DomainResult<()>;

    async fn get_multicast_queue_items(
        &self,
        multicast_group_id: Uuid,
    ) -> DomainResult<Vec<MulticastQueueItem>>;

    async fn get_version(&self) -> DomainResult<NetworkServerVersion>;
}

/// Hands out network-server clients keyed by server address.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
pub trait NetworkServerPool: Send + Sync {
    fn get(&self, server: &str) -> DomainResult<Arc<dyn NetworkServerClient>>;
}
