use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lorawan::{Aes128Key, DevAddr, Eui64};
use tokio_postgres::Row;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::domain::{
    DomainError, DomainResult, MulticastGroup, MulticastGroupRepository,
    MulticastGroupTransaction, MulticastQueueItem,
};
use crate::postgres::conversions::{insert_err, repo_err, to_enum, to_u32, to_u8};
use crate::postgres::{OwnedTransaction, PostgresClient};

const GROUP_COLUMNS: &str = "id, name, service_profile_id, mc_addr, mc_nwk_s_key, mc_app_s_key, \
     mc_key, f_cnt, group_type, dr, frequency, ping_slot_period, created_at, updated_at";

/// Multicast group row for PostgreSQL storage
#[derive(Debug, Clone)]
pub struct MulticastGroupRow {
    pub id: Uuid,
    pub name: String,
    pub service_profile_id: Uuid,
    pub mc_addr: Vec<u8>,
    pub mc_nwk_s_key: Vec<u8>,
    pub mc_app_s_key: Vec<u8>,
    pub mc_key: Vec<u8>,
    pub f_cnt: i64,
    pub group_type: String,
    pub dr: i16,
    pub frequency: i64,
    pub ping_slot_period: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Row> for MulticastGroupRow {
    fn from(row: &Row) -> Self {
        MulticastGroupRow {
            id: row.get(0),
            name: row.get(1),
            service_profile_id: row.get(2),
            mc_addr: row.get(3),
            mc_nwk_s_key: row.get(4),
            mc_app_s_key: row.get(5),
            mc_key: row.get(6),
            f_cnt: row.get(7),
            group_type: row.get(8),
            dr: row.get(9),
            frequency: row.get(10),
            ping_slot_period: row.get(11),
            created_at: row.get(12),
            updated_at: row.get(13),
        }
    }
}

impl TryFrom<MulticastGroupRow> for MulticastGroup {
    type Error = DomainError;

    fn try_from(row: MulticastGroupRow) -> DomainResult<Self> {
        Ok(MulticastGroup {
            id: row.id,
            name: row.name,
            service_profile_id: row.service_profile_id,
            mc_addr: DevAddr::from_slice(&row.mc_addr).map_err(repo_err)?,
            mc_nwk_s_key: Aes128Key::from_slice(&row.mc_nwk_s_key).map_err(repo_err)?,
            mc_app_s_key: Aes128Key::from_slice(&row.mc_app_s_key).map_err(repo_err)?,
            mc_key: Aes128Key::from_slice(&row.mc_key).map_err(repo_err)?,
            f_cnt: to_u32(row.f_cnt, "f_cnt")?,
            group_type: to_enum(&row.group_type)?,
            dr: to_u8(row.dr, "dr")?,
            frequency: to_u32(row.frequency, "frequency")?,
            ping_slot_period: to_u32(row.ping_slot_period, "ping_slot_period")?,
            created_at: Some(row.created_at),
            updated_at: Some(row.updated_at),
        })
    }
}

/// PostgreSQL implementation of MulticastGroupRepository trait
#[derive(Clone)]
pub struct PostgresMulticastGroupRepository {
    client: PostgresClient,
}

impl PostgresMulticastGroupRepository {
    pub fn new(client: PostgresClient) -> Self {
        Self { client }
    }

    async fn begin(&self) -> DomainResult<OwnedTransaction> {
        let conn = self
            .client
            .get_connection()
            .await
            .map_err(DomainError::RepositoryError)?;
        OwnedTransaction::begin(conn).await
    }
}

#[async_trait]
impl MulticastGroupRepository for PostgresMulticastGroupRepository {
    #[instrument(skip(self), fields(multicast_group_id = %id))]
    async fn get_multicast_group(&self, id: Uuid) -> DomainResult<Option<MulticastGroup>> {
        let conn = self
            .client
            .get_connection()
            .await
            .map_err(DomainError::RepositoryError)?;

        let row = conn
            .query_opt(
                &format!("SELECT {} FROM multicast_group WHERE id = $1", GROUP_COLUMNS),
                &[&id],
            )
            .await
            .map_err(repo_err)?;

        row.map(|r| MulticastGroup::try_from(MulticastGroupRow::from(&r)))
            .transpose()
    }

    #[instrument(skip(self, group), fields(multicast_group_id = %group.id))]
    async fn insert_multicast_group(
        &self,
        group: &MulticastGroup,
    ) -> DomainResult<Box<dyn MulticastGroupTransaction>> {
        let tx = self.begin().await?;
        let now = Utc::now();

        tx.client()?
            .execute(
                "INSERT INTO multicast_group (id, name, service_profile_id, mc_addr, mc_nwk_s_key,
                    mc_app_s_key, mc_key, f_cnt, group_type, dr, frequency, ping_slot_period,
                    created_at, updated_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $13)",
                &[
                    &group.id,
                    &group.name,
                    &group.service_profile_id,
                    &group.mc_addr.as_bytes().as_slice(),
                    &group.mc_nwk_s_key.as_bytes().as_slice(),
                    &group.mc_app_s_key.as_bytes().as_slice(),
                    &group.mc_key.as_bytes().as_slice(),
                    &i64::from(group.f_cnt),
                    &group.group_type.as_str(),
                    &i16::from(group.dr),
                    &i64::from(group.frequency),
                    &i64::from(group.ping_slot_period),
                    &now,
                ],
            )
            .await
            .map_err(|e| insert_err(e, group.id.to_string()))?;

        debug!("multicast group inserted");

        let mut group = group.clone();
        group.created_at = Some(now);
        group.updated_at = Some(now);
        Ok(Box::new(PostgresMulticastGroupTransaction { tx, group }))
    }

    #[instrument(skip(self), fields(multicast_group_id = %id))]
    async fn lock_multicast_group(
        &self,
        id: Uuid,
    ) -> DomainResult<Option<Box<dyn MulticastGroupTransaction>>> {
        let tx = self.begin().await?;

        let row = tx
            .client()?
            .query_opt(
                &format!(
                    "SELECT {} FROM multicast_group WHERE id = $1 FOR UPDATE",
                    GROUP_COLUMNS
                ),
                &[&id],
            )
            .await
            .map_err(repo_err)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let group = MulticastGroup::try_from(MulticastGroupRow::from(&row))?;

        debug!(f_cnt = group.f_cnt, "multicast group locked");
        Ok(Some(Box::new(PostgresMulticastGroupTransaction { tx, group })))
    }

    #[instrument(skip(self), fields(multicast_group_id = %id))]
    async fn delete_multicast_queue_items(&self, id: Uuid) -> DomainResult<u64> {
        let conn = self
            .client
            .get_connection()
            .await
            .map_err(DomainError::RepositoryError)?;

        let deleted = conn
            .execute(
                "DELETE FROM multicast_queue WHERE multicast_group_id = $1",
                &[&id],
            )
            .await
            .map_err(repo_err)?;

        debug!(deleted, "multicast queue items deleted");
        Ok(deleted)
    }

    #[instrument(skip(self), fields(multicast_group_id = %id))]
    async fn delete_multicast_queue_items_before(&self, id: Uuid, f_cnt: u32) -> DomainResult<u64> {
        let conn = self
            .client
            .get_connection()
            .await
            .map_err(DomainError::RepositoryError)?;

        let deleted = conn
            .execute(
                "DELETE FROM multicast_queue WHERE multicast_group_id = $1 AND f_cnt < $2",
                &[&id, &i64::from(f_cnt)],
            )
            .await
            .map_err(repo_err)?;

        debug!(deleted, f_cnt, "delivered multicast queue items pruned");
        Ok(deleted)
    }
}

/// Row-locked multicast group transaction.
pub struct PostgresMulticastGroupTransaction {
    tx: OwnedTransaction,
    group: MulticastGroup,
}

#[async_trait]
impl MulticastGroupTransaction for PostgresMulticastGroupTransaction {
    fn group(&self) -> &MulticastGroup {
        &self.group
    }

    async fn allocate_frame_counter(&mut self) -> DomainResult<u32> {
        let f_cnt = self.group.f_cnt;
        let next = f_cnt.checked_add(1).ok_or_else(|| {
            DomainError::FailedPrecondition(format!(
                "frame counter exhausted for multicast group {}",
                self.group.id
            ))
        })?;

        self.tx
            .client()?
            .execute(
                "UPDATE multicast_group SET f_cnt = $2, updated_at = now() WHERE id = $1",
                &[&self.group.id, &i64::from(next)],
            )
            .await
            .map_err(repo_err)?;

        self.group.f_cnt = next;
        Ok(f_cnt)
    }

    async fn insert_queue_item(&mut self, item: &MulticastQueueItem) -> DomainResult<()> {
        self.tx
            .client()?
            .execute(
                "INSERT INTO multicast_queue (multicast_group_id, f_port, frm_payload, f_cnt, created_at)
                 VALUES ($1, $2, $3, $4, now())",
                &[
                    &item.multicast_group_id,
                    &i16::from(item.f_port),
                    &item.frm_payload,
                    &i64::from(item.f_cnt),
                ],
            )
            .await
            .map_err(repo_err)?;
        Ok(())
    }

    async fn add_device(&mut self, dev_eui: Eui64) -> DomainResult<()> {
        self.tx
            .client()?
            .execute(
                "INSERT INTO device_multicast_group (dev_eui, multicast_group_id, created_at)
                 VALUES ($1, $2, now())",
                &[&dev_eui.as_bytes().as_slice(), &self.group.id],
            )
            .await
            .map_err(|e| {
                insert_err(
                    e,
                    format!("device {} in multicast group {}", dev_eui, self.group.id),
                )
            })?;
        Ok(())
    }

    async fn remove_device(&mut self, dev_eui: Eui64) -> DomainResult<bool> {
        let removed = self
            .tx
            .client()?
            .execute(
                "DELETE FROM device_multicast_group WHERE dev_eui = $1 AND multicast_group_id = $2",
                &[&dev_eui.as_bytes().as_slice(), &self.group.id],
            )
            .await
            .map_err(repo_err)?;
        Ok(removed > 0)
    }

    async fn delete_group(&mut self) -> DomainResult<()> {
        // Memberships, queue items and remote sessions cascade.
        self.tx
            .client()?
            .execute("DELETE FROM multicast_group WHERE id = $1", &[&self.group.id])
            .await
            .map_err(repo_err)?;
        Ok(())
    }

    async fn commit(&mut self) -> DomainResult<()> {
        self.tx.commit().await
    }
}
