use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lorawan::applayer::multicastsetup;
use lorawan::{Aes128Key, DevAddr, Eui64};
use uuid::Uuid;

use crate::domain::result::DomainResult;

/// An activated end-device.
#[derive(Debug, Clone, PartialEq)]
pub struct Device {
    pub dev_eui: Eui64,
    pub name: String,
    pub application_id: i64,
    pub device_profile_id: Uuid,
    pub dev_addr: DevAddr,
    pub app_s_key: Aes128Key,
    /// Next application downlink frame counter.
    pub f_cnt_down: u32,
    /// User variables exposed to payload codec scripts.
    pub variables: HashMap<String, String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Root keys of a device, used to derive multicast key material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceKeys {
    pub dev_eui: Eui64,
    pub app_key: Option<Aes128Key>,
    pub gen_app_key: Option<Aes128Key>,
}

impl DeviceKeys {
    /// McRootKey from the AppKey, or from the GenAppKey for LoRaWAN 1.0.x
    /// devices without one.
    pub fn mc_root_key(&self) -> Option<Aes128Key> {
        match (&self.app_key, &self.gen_app_key) {
            (Some(app_key), _) if !app_key.is_zero() => {
                Some(multicastsetup::mc_root_key_for_app_key(app_key))
            }
            (_, Some(gen_app_key)) => Some(multicastsetup::mc_root_key_for_gen_app_key(gen_app_key)),
            _ => None,
        }
    }
}

/// Local record of a downlink handed to the network server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceQueueItem {
    pub dev_eui: Eui64,
    pub dev_addr: DevAddr,
    pub f_port: u8,
    pub confirmed: bool,
    /// Encrypted FRMPayload.
    pub frm_payload: Vec<u8>,
    pub f_cnt: u32,
}

/// A transaction holding the row lock of one device.
///
/// Dropping the transaction without calling [`commit`](Self::commit) rolls it
/// back.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait DeviceTransaction: Send {
    /// The device as read under the lock.
    fn device(&self) -> &Device;

    /// Returns the current downlink counter and persists the next value.
    async fn allocate_frame_counter(&mut self) -> DomainResult<u32>;

    async fn insert_queue_item(&mut self, item: &DeviceQueueItem) -> DomainResult<()>;

    async fn commit(&mut self) -> DomainResult<()>;
}

#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait DeviceRepository: Send + Sync {
    async fn get_device(&self, dev_eui: Eui64) -> DomainResult<Option<Device>>;

    /// Opens a transaction and locks the device row (`SELECT ... FOR UPDATE`).
    /// Returns `None` if the device does not exist.
    async fn lock_device(&self, dev_eui: Eui64) -> DomainResult<Option<Box<dyn DeviceTransaction>>>;

    /// Removes local queue records; the frame counter is left untouched.
    async fn delete_device_queue_items(&self, dev_eui: Eui64) -> DomainResult<u64>;

    /// Removes local queue records with a frame counter below `f_cnt`.
    async fn delete_device_queue_items_before(&self, dev_eui: Eui64, f_cnt: u32)
        -> DomainResult<u64>;
}
