use std::sync::Arc;

use common::domain::{
    ApplicationRepository, Device, DeviceQueueItem, DeviceRepository, DomainError, DomainResult,
    NetworkServerRepository,
};
use common::network_server::{NetworkServerClient, NetworkServerPool};
use lorawan::{encrypt_frm_payload, Eui64};
use tracing::{debug, info, instrument, warn};

use crate::domain::{delivered_before, validate_f_port};

/// What to send to a device: raw bytes, or an object for the device codec.
#[derive(Debug, Clone, PartialEq)]
pub enum DownlinkPayload {
    Data(Vec<u8>),
    Object(serde_json::Value),
}

#[derive(Debug, Clone)]
pub struct EnqueueDeviceQueueItem {
    pub dev_eui: Eui64,
    pub confirmed: bool,
    pub f_port: u32,
    pub payload: DownlinkPayload,
}

/// A pending downlink with its payload decrypted.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceQueueEntry {
    pub dev_eui: Eui64,
    pub confirmed: bool,
    pub f_cnt: u32,
    pub f_port: u8,
    pub data: Vec<u8>,
    /// Decoded payload, when the device has a codec that understands it.
    pub object: Option<serde_json::Value>,
}

/// Per-device downlink queue.
///
/// The device row stays locked from counter allocation until the network
/// server has accepted the item, so a frame counter is never handed out twice.
pub struct DeviceQueueService {
    device_repository: Arc<dyn DeviceRepository>,
    application_repository: Arc<dyn ApplicationRepository>,
    network_server_repository: Arc<dyn NetworkServerRepository>,
    network_server_pool: Arc<dyn NetworkServerPool>,
}

impl DeviceQueueService {
    pub fn new(
        device_repository: Arc<dyn DeviceRepository>,
        application_repository: Arc<dyn ApplicationRepository>,
        network_server_repository: Arc<dyn NetworkServerRepository>,
        network_server_pool: Arc<dyn NetworkServerPool>,
    ) -> Self {
        Self {
            device_repository,
            application_repository,
            network_server_repository,
            network_server_pool,
        }
    }

    async fn network_server_for(&self, dev_eui: Eui64) -> DomainResult<Arc<dyn NetworkServerClient>> {
        let network_server = self
            .network_server_repository
            .get_network_server_for_dev_eui(dev_eui)
            .await?
            .ok_or_else(|| {
                DomainError::NetworkServerNotFound(format!("no network server for device {}", dev_eui))
            })?;
        self.network_server_pool.get(&network_server.server)
    }

    async fn codec_for(&self, device: &Device) -> DomainResult<payload_codec::Codec> {
        let profile = self
            .application_repository
            .get_device_profile(device.device_profile_id)
            .await?
            .ok_or_else(|| DomainError::DeviceProfileNotFound(device.device_profile_id.to_string()))?;
        let application = self
            .application_repository
            .get_application(device.application_id)
            .await?
            .ok_or_else(|| DomainError::ApplicationNotFound(device.application_id.to_string()))?;
        Ok(profile.resolve_codec(&application))
    }

    /// Drops local rows the network server has delivered. Failures are only
    /// logged; the rows are pruned on a later call.
    async fn prune_delivered(&self, dev_eui: Eui64, counter: u32, pending: &[DeviceQueueItem]) {
        let before = delivered_before(counter, pending.iter().map(|item| item.f_cnt));
        if let Err(e) = self
            .device_repository
            .delete_device_queue_items_before(dev_eui, before)
            .await
        {
            warn!(error = %e, before, "pruning delivered device queue items failed");
        }
    }

    /// Encrypts and enqueues a downlink. Returns the frame counter used.
    #[instrument(skip(self, input), fields(dev_eui = %input.dev_eui, f_port = input.f_port))]
    pub async fn enqueue(&self, input: EnqueueDeviceQueueItem) -> DomainResult<u32> {
        let f_port = validate_f_port(input.f_port)?;

        let mut tx = self
            .device_repository
            .lock_device(input.dev_eui)
            .await?
            .ok_or_else(|| DomainError::DeviceNotFound(input.dev_eui.to_string()))?;
        let device = tx.device().clone();

        let data = match input.payload {
            DownlinkPayload::Data(data) => data,
            DownlinkPayload::Object(obj) => {
                let codec = self.codec_for(&device).await?;
                codec.encode(f_port, &device.variables, &obj)?
            }
        };

        let network_server = self.network_server_for(device.dev_eui).await?;

        let f_cnt = tx.allocate_frame_counter().await?;
        let item = DeviceQueueItem {
            dev_eui: device.dev_eui,
            dev_addr: device.dev_addr,
            f_port,
            confirmed: input.confirmed,
            frm_payload: encrypt_frm_payload(&device.app_s_key, false, device.dev_addr, f_cnt, &data),
            f_cnt,
        };
        tx.insert_queue_item(&item).await?;

        network_server.create_device_queue_item(&item).await?;
        tx.commit().await?;
        info!(f_cnt, "device queue item enqueued");

        match network_server.get_device_queue_items(device.dev_eui).await {
            Ok(pending) => {
                self.prune_delivered(device.dev_eui, f_cnt.saturating_add(1), &pending)
                    .await
            }
            Err(e) => warn!(error = %e, "listing network server queue for pruning failed"),
        }

        Ok(f_cnt)
    }

    /// Clears the queue at the network server and locally. The device
    /// frame counter is not touched.
    #[instrument(skip(self), fields(dev_eui = %dev_eui))]
    pub async fn flush(&self, dev_eui: Eui64) -> DomainResult<()> {
        self.device_repository
            .get_device(dev_eui)
            .await?
            .ok_or_else(|| DomainError::DeviceNotFound(dev_eui.to_string()))?;

        let network_server = self.network_server_for(dev_eui).await?;
        network_server.flush_device_queue(dev_eui).await?;

        let deleted = self.device_repository.delete_device_queue_items(dev_eui).await?;
        info!(deleted, "device queue flushed");
        Ok(())
    }

    /// Pending items as reported by the network server, decrypted. Local
    /// rows the network server no longer reports are pruned.
    #[instrument(skip(self), fields(dev_eui = %dev_eui))]
    pub async fn list(&self, dev_eui: Eui64) -> DomainResult<Vec<DeviceQueueEntry>> {
        let device = self
            .device_repository
            .get_device(dev_eui)
            .await?
            .ok_or_else(|| DomainError::DeviceNotFound(dev_eui.to_string()))?;

        let network_server = self.network_server_for(dev_eui).await?;
        let items = network_server.get_device_queue_items(dev_eui).await?;
        self.prune_delivered(dev_eui, device.f_cnt_down, &items).await;
        if items.is_empty() {
            return Ok(Vec::new());
        }

        let codec = self.codec_for(&device).await?;
        let entries: Vec<DeviceQueueEntry> = items
            .into_iter()
            .map(|item| {
                let data = encrypt_frm_payload(
                    &device.app_s_key,
                    false,
                    device.dev_addr,
                    item.f_cnt,
                    &item.frm_payload,
                );
                // Display only; an undecodable payload is returned as bytes.
                let object = codec.decode(item.f_port, &device.variables, &data).ok();
                DeviceQueueEntry {
                    dev_eui: item.dev_eui,
                    confirmed: item.confirmed,
                    f_cnt: item.f_cnt,
                    f_port: item.f_port,
                    data,
                    object,
                }
            })
            .collect();

        debug!(count = entries.len(), "device queue listed");
        Ok(entries)
    }
}
