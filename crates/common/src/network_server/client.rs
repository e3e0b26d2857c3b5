use async_trait::async_trait;
use lorawan::{DevAddr, Eui64};
use lpwan_proto::ns::v1 as ns;
use lpwan_proto::ns::v1::network_server_service_client::NetworkServerServiceClient;
use tonic::transport::Channel;
use tonic::Status;
use tracing::{debug, instrument};
use uuid::Uuid;

use super::{NetworkServerClient, NetworkServerVersion};
use crate::domain::{
    DeviceQueueItem, DomainError, DomainResult, MulticastGroup, MulticastGroupType,
    MulticastQueueItem,
};

fn status_err(status: Status) -> DomainError {
    DomainError::NetworkServerError(format!("{:?}: {}", status.code(), status.message()))
}

fn to_u8(value: u32, field: &str) -> DomainResult<u8> {
    u8::try_from(value)
        .map_err(|_| DomainError::NetworkServerError(format!("{} out of range: {}", field, value)))
}

fn uuid_from_bytes(bytes: &[u8]) -> DomainResult<Uuid> {
    Uuid::from_slice(bytes).map_err(|e| DomainError::NetworkServerError(e.to_string()))
}

fn queue_item_from_proto(item: ns::DeviceQueueItem) -> DomainResult<DeviceQueueItem> {
    Ok(DeviceQueueItem {
        dev_eui: Eui64::from_slice(&item.dev_eui)?,
        dev_addr: DevAddr::from_slice(&item.dev_addr)?,
        f_port: to_u8(item.f_port, "f_port")?,
        confirmed: item.confirmed,
        frm_payload: item.frm_payload,
        f_cnt: item.f_cnt,
    })
}

fn multicast_item_from_proto(item: ns::MulticastQueueItem) -> DomainResult<MulticastQueueItem> {
    Ok(MulticastQueueItem {
        multicast_group_id: uuid_from_bytes(&item.multicast_group_id)?,
        f_port: to_u8(item.f_port, "f_port")?,
        frm_payload: item.frm_payload,
        f_cnt: item.f_cnt,
    })
}

/// tonic-backed network-server client. Cloning shares the underlying channel.
#[derive(Clone)]
pub struct GrpcNetworkServerClient {
    server: String,
    client: NetworkServerServiceClient<Channel>,
}

impl GrpcNetworkServerClient {
    pub fn new(server: impl Into<String>, channel: Channel) -> Self {
        Self {
            server: server.into(),
            client: NetworkServerServiceClient::new(channel),
        }
    }
}

#[async_trait]
impl NetworkServerClient for GrpcNetworkServerClient {
    #[instrument(skip(self, item), fields(server = %self.server, dev_eui = %item.dev_eui, f_cnt = item.f_cnt))]
    async fn create_device_queue_item(&self, item: &DeviceQueueItem) -> DomainResult<()> {
        let request = ns::CreateDeviceQueueItemRequest {
            item: Some(ns::DeviceQueueItem {
                dev_eui: item.dev_eui.to_vec(),
                frm_payload: item.frm_payload.clone(),
                f_cnt: item.f_cnt,
                f_port: u32::from(item.f_port),
                confirmed: item.confirmed,
                dev_addr: item.dev_addr.to_vec(),
            }),
        };

        self.client
            .clone()
            .create_device_queue_item(request)
            .await
            .map_err(status_err)?;
        debug!("device queue item created at network server");
        Ok(())
    }

    #[instrument(skip(self), fields(server = %self.server, dev_eui = %dev_eui))]
    async fn flush_device_queue(&self, dev_eui: Eui64) -> DomainResult<()> {
        self.client
            .clone()
            .flush_device_queue_for_dev_eui(ns::FlushDeviceQueueForDevEuiRequest {
                dev_eui: dev_eui.to_vec(),
            })
            .await
            .map_err(status_err)?;
        Ok(())
    }

    #[instrument(skip(self), fields(server = %self.server, dev_eui = %dev_eui))]
    async fn get_device_queue_items(&self, dev_eui: Eui64) -> DomainResult<Vec<DeviceQueueItem>> {
        let response = self
            .client
            .clone()
            .get_device_queue_items_for_dev_eui(ns::GetDeviceQueueItemsForDevEuiRequest {
                dev_eui: dev_eui.to_vec(),
                count_only: false,
            })
            .await
            .map_err(status_err)?
            .into_inner();

        response
            .items
            .into_iter()
            .map(queue_item_from_proto)
            .collect()
    }

    #[instrument(skip(self, group), fields(server = %self.server, multicast_group_id = %group.id))]
    async fn create_multicast_group(&self, group: &MulticastGroup) -> DomainResult<()> {
        let group_type = match group.group_type {
            MulticastGroupType::ClassB => ns::MulticastGroupType::ClassB,
            MulticastGroupType::ClassC => ns::MulticastGroupType::ClassC,
        };

        let request = ns::CreateMulticastGroupRequest {
            multicast_group: Some(ns::MulticastGroup {
                id: group.id.as_bytes().to_vec(),
                mc_addr: group.mc_addr.to_vec(),
                mc_nwk_s_key: group.mc_nwk_s_key.to_vec(),
                f_cnt: group.f_cnt,
                group_type: group_type as i32,
                dr: u32::from(group.dr),
                frequency: group.frequency,
                ping_slot_period: group.ping_slot_period,
                service_profile_id: group.service_profile_id.as_bytes().to_vec(),
                routing_profile_id: Vec::new(),
            }),
        };

        self.client
            .clone()
            .create_multicast_group(request)
            .await
            .map_err(status_err)?;
        Ok(())
    }

    #[instrument(skip(self), fields(server = %self.server, multicast_group_id = %multicast_group_id))]
    async fn delete_multicast_group(&self, multicast_group_id: Uuid) -> DomainResult<()> {
        self.client
            .clone()
            .delete_multicast_group(ns::DeleteMulticastGroupRequest {
                id: multicast_group_id.as_bytes().to_vec(),
            })
            .await
            .map_err(status_err)?;
        Ok(())
    }

    #[instrument(skip(self), fields(server = %self.server, dev_eui = %dev_eui, multicast_group_id = %multicast_group_id))]
    async fn add_device_to_multicast_group(
        &self,
        dev_eui: Eui64,
        multicast_group_id: Uuid,
    ) -> DomainResult<()> {
        self.client
            .clone()
            .add_device_to_multicast_group(ns::AddDeviceToMulticastGroupRequest {
                dev_eui: dev_eui.to_vec(),
                multicast_group_id: multicast_group_id.as_bytes().to_vec(),
            })
            .await
            .map_err(status_err)?;
        Ok(())
    }

    #[instrument(skip(self), fields(server = %self.server, dev_eui = %dev_eui, multicast_group_id = %multicast_group_id))]
    async fn remove_device_from_multicast_group(
        &self,
        dev_eui: Eui64,
        multicast_group_id: Uuid,
    ) -> DomainResult<()> {
        self.client
            .clone()
            .remove_device_from_multicast_group(ns::RemoveDeviceFromMulticastGroupRequest {
                dev_eui: dev_eui.to_vec(),
                multicast_group_id: multicast_group_id.as_bytes().to_vec(),
            })
            .await
            .map_err(status_err)?;
        Ok(())
    }

    #[instrument(skip(self, item), fields(server = %self.server, multicast_group_id = %item.multicast_group_id, f_cnt = item.f_cnt))]
    async fn enqueue_multicast_queue_item(&self, item: &MulticastQueueItem) -> DomainResult<()> {
        let request = ns::EnqueueMulticastQueueItemRequest {
            multicast_queue_item: Some(ns::MulticastQueueItem {
                multicast_group_id: item.multicast_group_id.as_bytes().to_vec(),
                frm_payload: item.frm_payload.clone(),
                f_cnt: item.f_cnt,
                f_port: u32::from(item.f_port),
            }),
        };

        self.client
            .clone()
            .enqueue_multicast_queue_item(request)
            .await
            .map_err(status_err)?;
        Ok(())
    }

    #[instrument(skip(self), fields(server = %self.server, multicast_group_id = %multicast_group_id))]
    async fn flush_multicast_queue(&self, multicast_group_id: Uuid) -> DomainResult<()> {
        self.client
            .clone()
            .flush_multicast_queue_for_multicast_group(
                ns::FlushMulticastQueueForMulticastGroupRequest {
                    multicast_group_id: multicast_group_id.as_bytes().to_vec(),
                },
            )
            .await
            .map_err(status_err)?;
        Ok(())
    }

    #[instrument(skip(self), fields(server = %self.server, multicast_group_id = %multicast_group_id))]
    async fn get_multicast_queue_items(
        &self,
        multicast_group_id: Uuid,
    ) -> DomainResult<Vec<MulticastQueueItem>> {
        let response = self
            .client
            .clone()
            .get_multicast_queue_items_for_multicast_group(
                ns::GetMulticastQueueItemsForMulticastGroupRequest {
                    multicast_group_id: multicast_group_id.as_bytes().to_vec(),
                },
            )
            .await
            .map_err(status_err)?
            .into_inner();

        response
            .multicast_queue_items
            .into_iter()
            .map(multicast_item_from_proto)
            .collect()
    }

    #[instrument(skip(self), fields(server = %self.server))]
    async fn get_version(&self) -> DomainResult<NetworkServerVersion> {
        let response = self
            .client
            .clone()
            .get_version(ns::GetVersionRequest {})
            .await
            .map_err(status_err)?
            .into_inner();

        Ok(NetworkServerVersion {
            region: response.region,
            version: response.version,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_item_from_proto() {
        let item = queue_item_from_proto(ns::DeviceQueueItem {
            dev_eui: vec![1, 2, 3, 4, 5, 6, 7, 8],
            frm_payload: vec![0xaa],
            f_cnt: 7,
            f_port: 10,
            confirmed: true,
            dev_addr: vec![0x26, 0x01, 0x1b, 0xda],
        })
        .unwrap();

        assert_eq!(item.dev_eui.to_string(), "0102030405060708");
        assert_eq!(item.f_port, 10);
        assert_eq!(item.f_cnt, 7);
        assert!(item.confirmed);
    }

    #[test]
    fn test_queue_item_from_proto_rejects_bad_port() {
        let result = queue_item_from_proto(ns::DeviceQueueItem {
            dev_eui: vec![1, 2, 3, 4, 5, 6, 7, 8],
            frm_payload: vec![],
            f_cnt: 0,
            f_port: 300,
            confirmed: false,
            dev_addr: vec![0, 0, 0, 0],
        });
        assert!(matches!(result, Err(DomainError::NetworkServerError(_))));
    }

    #[test]
    fn test_status_err() {
        let err = status_err(Status::unavailable("connection refused"));
        match err {
            DomainError::NetworkServerError(msg) => {
                assert!(msg.contains("Unavailable"));
                assert!(msg.contains("connection refused"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
