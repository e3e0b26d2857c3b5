use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lorawan::{Aes128Key, DevAddr, Eui64};
use uuid::Uuid;

use crate::domain::result::{DomainError, DomainResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MulticastGroupType {
    ClassB,
    #[default]
    ClassC,
}

impl MulticastGroupType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MulticastGroupType::ClassB => "CLASS_B",
            MulticastGroupType::ClassC => "CLASS_C",
        }
    }
}

impl fmt::Display for MulticastGroupType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MulticastGroupType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CLASS_B" => Ok(MulticastGroupType::ClassB),
            "CLASS_C" => Ok(MulticastGroupType::ClassC),
            other => Err(DomainError::InvalidArgument(format!(
                "unknown multicast group type: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MulticastGroup {
    pub id: Uuid,
    pub name: String,
    pub service_profile_id: Uuid,
    pub mc_addr: DevAddr,
    pub mc_nwk_s_key: Aes128Key,
    pub mc_app_s_key: Aes128Key,
    pub mc_key: Aes128Key,
    /// Shared downlink frame counter of the group.
    pub f_cnt: u32,
    pub group_type: MulticastGroupType,
    pub dr: u8,
    pub frequency: u32,
    pub ping_slot_period: u32,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MulticastQueueItem {
    pub multicast_group_id: Uuid,
    pub f_port: u8,
    /// Encrypted FRMPayload.
    pub frm_payload: Vec<u8>,
    pub f_cnt: u32,
}

/// A transaction holding the row lock of one multicast group.
///
/// Counter allocation, queue records and membership changes all happen under
/// this lock. Dropping the transaction without committing rolls it back.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait MulticastGroupTransaction: Send {
    fn group(&self) -> &MulticastGroup;

    async fn allocate_frame_counter(&mut self) -> DomainResult<u32>;

    async fn insert_queue_item(&mut self, item: &MulticastQueueItem) -> DomainResult<()>;

    /// Fails with `AlreadyExists` when the device is already a member.
    async fn add_device(&mut self, dev_eui: Eui64) -> DomainResult<()>;

    /// Returns false when the device was not a member.
    async fn remove_device(&mut self, dev_eui: Eui64) -> DomainResult<bool>;

    /// Deletes the group row together with its memberships and queue records.
    async fn delete_group(&mut self) -> DomainResult<()>;

    async fn commit(&mut self) -> DomainResult<()>;
}

#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait MulticastGroupRepository: Send + Sync {
    async fn get_multicast_group(&self, id: Uuid) -> DomainResult<Option<MulticastGroup>>;

    /// Inserts the group inside a new transaction and returns it still open,
    /// so the caller can mirror the group remotely before committing.
    async fn insert_multicast_group(
        &self,
        group: &MulticastGroup,
    ) -> DomainResult<Box<dyn MulticastGroupTransaction>>;

    /// Opens a transaction and locks the group row. Returns `None` if the
    /// group does not exist.
    async fn lock_multicast_group(
        &self,
        id: Uuid,
    ) -> DomainResult<Option<Box<dyn MulticastGroupTransaction>>>;

    async fn delete_multicast_queue_items(&self, id: Uuid) -> DomainResult<u64>;

    /// Removes local queue records with a frame counter below `f_cnt`.
    async fn delete_multicast_queue_items_before(&self, id: Uuid, f_cnt: u32) -> DomainResult<u64>;
}
