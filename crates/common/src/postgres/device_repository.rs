use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lorawan::{Aes128Key, DevAddr, Eui64};
use tokio_postgres::Row;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::domain::{
    Device, DeviceQueueItem, DeviceRepository, DeviceTransaction, DomainError, DomainResult,
};
use crate::postgres::conversions::{repo_err, to_u32};
use crate::postgres::{OwnedTransaction, PostgresClient};

const DEVICE_COLUMNS: &str = "dev_eui, name, application_id, device_profile_id, dev_addr, \
     app_s_key, f_cnt_down, variables, created_at, updated_at";

/// Device row for PostgreSQL storage
#[derive(Debug, Clone)]
pub struct DeviceRow {
    pub dev_eui: Vec<u8>,
    pub name: String,
    pub application_id: i64,
    pub device_profile_id: Uuid,
    pub dev_addr: Vec<u8>,
    pub app_s_key: Vec<u8>,
    pub f_cnt_down: i64,
    pub variables: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Row> for DeviceRow {
    fn from(row: &Row) -> Self {
        DeviceRow {
            dev_eui: row.get(0),
            name: row.get(1),
            application_id: row.get(2),
            device_profile_id: row.get(3),
            dev_addr: row.get(4),
            app_s_key: row.get(5),
            f_cnt_down: row.get(6),
            variables: row.get(7),
            created_at: row.get(8),
            updated_at: row.get(9),
        }
    }
}

impl TryFrom<DeviceRow> for Device {
    type Error = DomainError;

    fn try_from(row: DeviceRow) -> DomainResult<Self> {
        let variables: HashMap<String, String> = if row.variables.is_null() {
            HashMap::new()
        } else {
            serde_json::from_value(row.variables).map_err(repo_err)?
        };

        Ok(Device {
            dev_eui: Eui64::from_slice(&row.dev_eui).map_err(repo_err)?,
            name: row.name,
            application_id: row.application_id,
            device_profile_id: row.device_profile_id,
            dev_addr: DevAddr::from_slice(&row.dev_addr).map_err(repo_err)?,
            app_s_key: Aes128Key::from_slice(&row.app_s_key).map_err(repo_err)?,
            f_cnt_down: to_u32(row.f_cnt_down, "f_cnt_down")?,
            variables,
            created_at: Some(row.created_at),
            updated_at: Some(row.updated_at),
        })
    }
}

/// PostgreSQL implementation of DeviceRepository trait
#[derive(Clone)]
pub struct PostgresDeviceRepository {
    client: PostgresClient,
}

impl PostgresDeviceRepository {
    pub fn new(client: PostgresClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl DeviceRepository for PostgresDeviceRepository {
    #[instrument(skip(self), fields(dev_eui = %dev_eui))]
    async fn get_device(&self, dev_eui: Eui64) -> DomainResult<Option<Device>> {
        let conn = self
            .client
            .get_connection()
            .await
            .map_err(DomainError::RepositoryError)?;

        let row = conn
            .query_opt(
                &format!("SELECT {} FROM device WHERE dev_eui = $1", DEVICE_COLUMNS),
                &[&dev_eui.as_bytes().as_slice()],
            )
            .await
            .map_err(repo_err)?;

        row.map(|r| Device::try_from(DeviceRow::from(&r))).transpose()
    }

    #[instrument(skip(self), fields(dev_eui = %dev_eui))]
    async fn lock_device(
        &self,
        dev_eui: Eui64,
    ) -> DomainResult<Option<Box<dyn DeviceTransaction>>> {
        let conn = self
            .client
            .get_connection()
            .await
            .map_err(DomainError::RepositoryError)?;
        let tx = OwnedTransaction::begin(conn).await?;

        let row = tx
            .client()?
            .query_opt(
                &format!(
                    "SELECT {} FROM device WHERE dev_eui = $1 FOR UPDATE",
                    DEVICE_COLUMNS
                ),
                &[&dev_eui.as_bytes().as_slice()],
            )
            .await
            .map_err(repo_err)?;

        // Dropping tx here rolls back the empty transaction.
        let Some(row) = row else {
            return Ok(None);
        };
        let device: Device = DeviceRow::from(&row).try_into()?;

        debug!(f_cnt_down = device.f_cnt_down, "device locked");
        Ok(Some(Box::new(PostgresDeviceTransaction { tx, device })))
    }

    #[instrument(skip(self), fields(dev_eui = %dev_eui))]
    async fn delete_device_queue_items(&self, dev_eui: Eui64) -> DomainResult<u64> {
        let conn = self
            .client
            .get_connection()
            .await
            .map_err(DomainError::RepositoryError)?;

        let deleted = conn
            .execute(
                "DELETE FROM device_queue WHERE dev_eui = $1",
                &[&dev_eui.as_bytes().as_slice()],
            )
            .await
            .map_err(repo_err)?;

        debug!(deleted, "device queue items deleted");
        Ok(deleted)
    }

    #[instrument(skip(self), fields(dev_eui = %dev_eui))]
    async fn delete_device_queue_items_before(
        &self,
        dev_eui: Eui64,
        f_cnt: u32,
    ) -> DomainResult<u64> {
        let conn = self
            .client
            .get_connection()
            .await
            .map_err(DomainError::RepositoryError)?;

        let deleted = conn
            .execute(
                "DELETE FROM device_queue WHERE dev_eui = $1 AND f_cnt < $2",
                &[&dev_eui.as_bytes().as_slice(), &i64::from(f_cnt)],
            )
            .await
            .map_err(repo_err)?;

        debug!(deleted, f_cnt, "delivered device queue items pruned");
        Ok(deleted)
    }
}

/// Row-locked device transaction.
pub struct PostgresDeviceTransaction {
    tx: OwnedTransaction,
    device: Device,
}

#[async_trait]
impl DeviceTransaction for PostgresDeviceTransaction {
    fn device(&self) -> &Device {
        &self.device
    }

    async fn allocate_frame_counter(&mut self) -> DomainResult<u32> {
        let f_cnt = self.device.f_cnt_down;
        let next = f_cnt.checked_add(1).ok_or_else(|| {
            DomainError::FailedPrecondition(format!(
                "downlink frame counter exhausted for device {}",
                self.device.dev_eui
            ))
        })?;

        self.tx
            .client()?
            .execute(
                "UPDATE device SET f_cnt_down = $2, updated_at = now() WHERE dev_eui = $1",
                &[&self.device.dev_eui.as_bytes().as_slice(), &i64::from(next)],
            )
            .await
            .map_err(repo_err)?;

        self.device.f_cnt_down = next;
        Ok(f_cnt)
    }

    async fn insert_queue_item(&mut self, item: &DeviceQueueItem) -> DomainResult<()> {
        self.tx
            .client()?
            .execute(
                "INSERT INTO device_queue (dev_eui, dev_addr, f_port, confirmed, frm_payload, f_cnt, created_at)
                 VALUES ($1, $2, $3, $4, $5, $6, now())",
                &[
                    &item.dev_eui.as_bytes().as_slice(),
                    &item.dev_addr.as_bytes().as_slice(),
                    &i16::from(item.f_port),
                    &item.confirmed,
                    &item.frm_payload,
                    &i64::from(item.f_cnt),
                ],
            )
            .await
            .map_err(repo_err)?;
        Ok(())
    }

    async fn commit(&mut self) -> DomainResult<()> {
        self.tx.commit().await
    }
}
