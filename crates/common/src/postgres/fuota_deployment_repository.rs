use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lorawan::{Aes128Key, Eui64};
use tokio_postgres::Row;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::domain::{
    DeviceKeys, DomainError, DomainResult, FuotaDeployment, FuotaDeploymentDevice,
    FuotaDeploymentDeviceState, FuotaDeploymentFilters, FuotaDeploymentListItem,
    FuotaDeploymentRepository,
};
use crate::postgres::conversions::{
    duration_secs, insert_err, repo_err, to_descriptor, to_duration, to_enum, to_u16, to_u32,
    to_u8,
};
use crate::postgres::PostgresClient;

const DEPLOYMENT_COLUMNS: &str = "id, name, multicast_group_id, group_type, dr, frequency, \
     ping_slot_period, fragmentation_matrix, descriptor, payload, frag_size, redundancy, \
     block_ack_delay, multicast_timeout, unicast_timeout, state, next_step_after, created_at, \
     updated_at";

const DEPLOYMENT_DEVICE_COLUMNS: &str = "fdd.fuota_deployment_id, fdd.dev_eui, d.name, fdd.state, \
     fdd.error_message, fdd.created_at, fdd.updated_at";

/// FUOTA deployment row for PostgreSQL storage
#[derive(Debug, Clone)]
pub struct FuotaDeploymentRow {
    pub id: Uuid,
    pub name: String,
    pub multicast_group_id: Option<Uuid>,
    pub group_type: String,
    pub dr: i16,
    pub frequency: i64,
    pub ping_slot_period: i64,
    pub fragmentation_matrix: i16,
    pub descriptor: Vec<u8>,
    pub payload: Vec<u8>,
    pub frag_size: i16,
    pub redundancy: i32,
    pub block_ack_delay: i16,
    pub multicast_timeout: i16,
    pub unicast_timeout: i64,
    pub state: String,
    pub next_step_after: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Row> for FuotaDeploymentRow {
    fn from(row: &Row) -> Self {
        FuotaDeploymentRow {
            id: row.get(0),
            name: row.get(1),
            multicast_group_id: row.get(2),
            group_type: row.get(3),
            dr: row.get(4),
            frequency: row.get(5),
            ping_slot_period: row.get(6),
            fragmentation_matrix: row.get(7),
            descriptor: row.get(8),
            payload: row.get(9),
            frag_size: row.get(10),
            redundancy: row.get(11),
            block_ack_delay: row.get(12),
            multicast_timeout: row.get(13),
            unicast_timeout: row.get(14),
            state: row.get(15),
            next_step_after: row.get(16),
            created_at: row.get(17),
            updated_at: row.get(18),
        }
    }
}

impl TryFrom<FuotaDeploymentRow> for FuotaDeployment {
    type Error = DomainError;

    fn try_from(row: FuotaDeploymentRow) -> DomainResult<Self> {
        Ok(FuotaDeployment {
            id: row.id,
            name: row.name,
            multicast_group_id: row.multicast_group_id,
            group_type: to_enum(&row.group_type)?,
            dr: to_u8(row.dr, "dr")?,
            frequency: to_u32(row.frequency, "frequency")?,
            ping_slot_period: to_u32(row.ping_slot_period, "ping_slot_period")?,
            fragmentation_matrix: to_u8(row.fragmentation_matrix, "fragmentation_matrix")?,
            descriptor: to_descriptor(&row.descriptor)?,
            payload: row.payload,
            frag_size: to_u8(row.frag_size, "frag_size")?,
            redundancy: to_u16(row.redundancy, "redundancy")?,
            block_ack_delay: to_u8(row.block_ack_delay, "block_ack_delay")?,
            multicast_timeout: to_u8(row.multicast_timeout, "multicast_timeout")?,
            unicast_timeout: to_duration(row.unicast_timeout, "unicast_timeout")?,
            state: to_enum(&row.state)?,
            next_step_after: row.next_step_after,
            created_at: Some(row.created_at),
            updated_at: Some(row.updated_at),
        })
    }
}

fn deployment_from_row(row: &Row) -> DomainResult<FuotaDeployment> {
    FuotaDeployment::try_from(FuotaDeploymentRow::from(row))
}

fn deployment_device_from_row(row: &Row) -> DomainResult<FuotaDeploymentDevice> {
    let dev_eui: Vec<u8> = row.get(1);
    let state: String = row.get(3);
    Ok(FuotaDeploymentDevice {
        fuota_deployment_id: row.get(0),
        dev_eui: Eui64::from_slice(&dev_eui).map_err(repo_err)?,
        device_name: row.get(2),
        state: to_enum(&state)?,
        error_message: row.get(4),
        created_at: Some(row.get(5)),
        updated_at: Some(row.get(6)),
    })
}

fn optional_key(bytes: Option<Vec<u8>>) -> DomainResult<Option<Aes128Key>> {
    bytes
        .map(|b| Aes128Key::from_slice(&b).map_err(repo_err))
        .transpose()
}

/// PostgreSQL implementation of FuotaDeploymentRepository trait
#[derive(Clone)]
pub struct PostgresFuotaDeploymentRepository {
    client: PostgresClient,
}

impl PostgresFuotaDeploymentRepository {
    pub fn new(client: PostgresClient) -> Self {
        Self { client }
    }

    async fn get_connection(&self) -> DomainResult<deadpool_postgres::Client> {
        self.client
            .get_connection()
            .await
            .map_err(DomainError::RepositoryError)
    }
}

#[async_trait]
impl FuotaDeploymentRepository for PostgresFuotaDeploymentRepository {
    #[instrument(skip(self, deployment), fields(deployment_id = %deployment.id, dev_eui = %dev_eui))]
    async fn create_deployment_for_device(
        &self,
        deployment: &FuotaDeployment,
        dev_eui: Eui64,
    ) -> DomainResult<()> {
        let mut conn = self.get_connection().await?;
        let transaction = conn.transaction().await.map_err(repo_err)?;
        let now = Utc::now();

        transaction
            .execute(
                &format!(
                    "INSERT INTO fuota_deployment ({}) VALUES
                     ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $18)",
                    DEPLOYMENT_COLUMNS
                ),
                &[
                    &deployment.id,
                    &deployment.name,
                    &deployment.multicast_group_id,
                    &deployment.group_type.as_str(),
                    &i16::from(deployment.dr),
                    &i64::from(deployment.frequency),
                    &i64::from(deployment.ping_slot_period),
                    &i16::from(deployment.fragmentation_matrix),
                    &deployment.descriptor.as_slice(),
                    &deployment.payload,
                    &i16::from(deployment.frag_size),
                    &i32::from(deployment.redundancy),
                    &i16::from(deployment.block_ack_delay),
                    &i16::from(deployment.multicast_timeout),
                    &duration_secs(deployment.unicast_timeout),
                    &deployment.state.as_str(),
                    &deployment.next_step_after,
                    &now,
                ],
            )
            .await
            .map_err(|e| insert_err(e, deployment.id.to_string()))?;

        transaction
            .execute(
                "INSERT INTO fuota_deployment_device
                    (fuota_deployment_id, dev_eui, state, error_message, created_at, updated_at)
                 VALUES ($1, $2, $3, '', $4, $4)",
                &[
                    &deployment.id,
                    &dev_eui.as_bytes().as_slice(),
                    &FuotaDeploymentDeviceState::Pending.as_str(),
                    &now,
                ],
            )
            .await
            .map_err(|e| insert_err(e, format!("{} / {}", deployment.id, dev_eui)))?;

        transaction.commit().await.map_err(repo_err)?;

        info!("fuota deployment created");
        Ok(())
    }

    #[instrument(skip(self), fields(deployment_id = %id))]
    async fn get_deployment(&self, id: Uuid) -> DomainResult<Option<FuotaDeployment>> {
        let conn = self.get_connection().await?;

        let row = conn
            .query_opt(
                &format!(
                    "SELECT {} FROM fuota_deployment WHERE id = $1",
                    DEPLOYMENT_COLUMNS
                ),
                &[&id],
            )
            .await
            .map_err(repo_err)?;

        row.as_ref().map(deployment_from_row).transpose()
    }

    #[instrument(skip(self))]
    async fn claim_due_deployments(
        &self,
        limit: i64,
        lease: Duration,
    ) -> DomainResult<Vec<FuotaDeployment>> {
        let conn = self.get_connection().await?;
        let lease_until = Utc::now()
            + chrono::Duration::from_std(lease).map_err(repo_err)?;

        let rows = conn
            .query(
                &format!(
                    "UPDATE fuota_deployment SET next_step_after = $2
                     WHERE id IN (
                         SELECT id FROM fuota_deployment
                         WHERE state <> 'DONE' AND next_step_after <= now()
                         ORDER BY next_step_after
                         LIMIT $1
                         FOR UPDATE SKIP LOCKED
                     )
                     RETURNING {}",
                    DEPLOYMENT_COLUMNS
                ),
                &[&limit, &lease_until],
            )
            .await
            .map_err(repo_err)?;

        if !rows.is_empty() {
            debug!(count = rows.len(), "claimed due fuota deployments");
        }
        rows.iter().map(deployment_from_row).collect()
    }

    #[instrument(skip(self, deployment), fields(deployment_id = %deployment.id, state = %deployment.state))]
    async fn update_deployment(&self, deployment: &FuotaDeployment) -> DomainResult<()> {
        let conn = self.get_connection().await?;

        let updated = conn
            .execute(
                "UPDATE fuota_deployment SET
                    multicast_group_id = $2,
                    frag_size = $3,
                    state = $4,
                    next_step_after = $5,
                    updated_at = now()
                 WHERE id = $1",
                &[
                    &deployment.id,
                    &deployment.multicast_group_id,
                    &i16::from(deployment.frag_size),
                    &deployment.state.as_str(),
                    &deployment.next_step_after,
                ],
            )
            .await
            .map_err(repo_err)?;

        if updated == 0 {
            return Err(DomainError::DeploymentNotFound(deployment.id.to_string()));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn count_deployments(&self, filters: &FuotaDeploymentFilters) -> DomainResult<i64> {
        let conn = self.get_connection().await?;
        let dev_eui = filters.dev_eui.map(|e| e.to_vec());

        let row = conn
            .query_one(
                "SELECT count(DISTINCT fd.id)
                 FROM fuota_deployment fd
                 LEFT JOIN fuota_deployment_device fdd ON fdd.fuota_deployment_id = fd.id
                 LEFT JOIN device d ON d.dev_eui = fdd.dev_eui
                 WHERE ($1::bytea IS NULL OR fdd.dev_eui = $1)
                   AND ($2::bigint IS NULL OR d.application_id = $2)",
                &[&dev_eui, &filters.application_id],
            )
            .await
            .map_err(repo_err)?;

        Ok(row.get(0))
    }

    #[instrument(skip(self))]
    async fn list_deployments(
        &self,
        filters: &FuotaDeploymentFilters,
    ) -> DomainResult<Vec<FuotaDeploymentListItem>> {
        let conn = self.get_connection().await?;
        let dev_eui = filters.dev_eui.map(|e| e.to_vec());

        let rows = conn
            .query(
                "SELECT DISTINCT fd.id, fd.name, fd.state, fd.next_step_after, fd.created_at, fd.updated_at
                 FROM fuota_deployment fd
                 LEFT JOIN fuota_deployment_device fdd ON fdd.fuota_deployment_id = fd.id
                 LEFT JOIN device d ON d.dev_eui = fdd.dev_eui
                 WHERE ($1::bytea IS NULL OR fdd.dev_eui = $1)
                   AND ($2::bigint IS NULL OR d.application_id = $2)
                 ORDER BY fd.created_at DESC
                 LIMIT $3 OFFSET $4",
                &[&dev_eui, &filters.application_id, &filters.limit, &filters.offset],
            )
            .await
            .map_err(repo_err)?;

        rows.iter()
            .map(|row| {
                let state: String = row.get(2);
                Ok(FuotaDeploymentListItem {
                    id: row.get(0),
                    name: row.get(1),
                    state: to_enum(&state)?,
                    next_step_after: row.get(3),
                    created_at: Some(row.get(4)),
                    updated_at: Some(row.get(5)),
                })
            })
            .collect()
    }

    #[instrument(skip(self), fields(deployment_id = %deployment_id, dev_eui = %dev_eui))]
    async fn get_deployment_device(
        &self,
        deployment_id: Uuid,
        dev_eui: Eui64,
    ) -> DomainResult<Option<FuotaDeploymentDevice>> {
        let conn = self.get_connection().await?;

        let row = conn
            .query_opt(
                &format!(
                    "SELECT {}
                     FROM fuota_deployment_device fdd
                     INNER JOIN device d ON d.dev_eui = fdd.dev_eui
                     WHERE fdd.fuota_deployment_id = $1 AND fdd.dev_eui = $2",
                    DEPLOYMENT_DEVICE_COLUMNS
                ),
                &[&deployment_id, &dev_eui.as_bytes().as_slice()],
            )
            .await
            .map_err(repo_err)?;

        row.as_ref().map(deployment_device_from_row).transpose()
    }

    #[instrument(skip(self), fields(deployment_id = %deployment_id))]
    async fn count_deployment_devices(&self, deployment_id: Uuid) -> DomainResult<i64> {
        let conn = self.get_connection().await?;

        let row = conn
            .query_one(
                "SELECT count(*) FROM fuota_deployment_device WHERE fuota_deployment_id = $1",
                &[&deployment_id],
            )
            .await
            .map_err(repo_err)?;

        Ok(row.get(0))
    }

    #[instrument(skip(self), fields(deployment_id = %deployment_id))]
    async fn list_deployment_devices(
        &self,
        deployment_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> DomainResult<Vec<FuotaDeploymentDevice>> {
        let conn = self.get_connection().await?;

        let rows = conn
            .query(
                &format!(
                    "SELECT {}
                     FROM fuota_deployment_device fdd
                     INNER JOIN device d ON d.dev_eui = fdd.dev_eui
                     WHERE fdd.fuota_deployment_id = $1
                     ORDER BY d.name
                     LIMIT $2 OFFSET $3",
                    DEPLOYMENT_DEVICE_COLUMNS
                ),
                &[&deployment_id, &limit, &offset],
            )
            .await
            .map_err(repo_err)?;

        rows.iter().map(deployment_device_from_row).collect()
    }

    #[instrument(skip(self), fields(dev_eui = %dev_eui))]
    async fn get_pending_deployment_device(
        &self,
        dev_eui: Eui64,
    ) -> DomainResult<Option<FuotaDeploymentDevice>> {
        let conn = self.get_connection().await?;

        let row = conn
            .query_opt(
                &format!(
                    "SELECT {}
                     FROM fuota_deployment_device fdd
                     INNER JOIN device d ON d.dev_eui = fdd.dev_eui
                     WHERE fdd.dev_eui = $1 AND fdd.state = 'PENDING'
                     ORDER BY fdd.created_at
                     LIMIT 1",
                    DEPLOYMENT_DEVICE_COLUMNS
                ),
                &[&dev_eui.as_bytes().as_slice()],
            )
            .await
            .map_err(repo_err)?;

        row.as_ref().map(deployment_device_from_row).transpose()
    }

    #[instrument(skip(self, error_message), fields(deployment_id = %deployment_id, dev_eui = %dev_eui, state = state.as_str()))]
    async fn set_deployment_device_result(
        &self,
        deployment_id: Uuid,
        dev_eui: Eui64,
        state: FuotaDeploymentDeviceState,
        error_message: String,
    ) -> DomainResult<bool> {
        let conn = self.get_connection().await?;

        // Terminal rows are never touched again.
        let updated = conn
            .execute(
                "UPDATE fuota_deployment_device
                 SET state = $3, error_message = $4, updated_at = now()
                 WHERE fuota_deployment_id = $1 AND dev_eui = $2 AND state = 'PENDING'",
                &[
                    &deployment_id,
                    &dev_eui.as_bytes().as_slice(),
                    &state.as_str(),
                    &error_message,
                ],
            )
            .await
            .map_err(repo_err)?;

        Ok(updated > 0)
    }

    #[instrument(skip(self), fields(deployment_id = %deployment_id))]
    async fn get_service_profile_id(&self, deployment_id: Uuid) -> DomainResult<Option<Uuid>> {
        let conn = self.get_connection().await?;

        let row = conn
            .query_opt(
                "SELECT a.service_profile_id
                 FROM fuota_deployment_device fdd
                 INNER JOIN device d ON d.dev_eui = fdd.dev_eui
                 INNER JOIN application a ON a.id = d.application_id
                 WHERE fdd.fuota_deployment_id = $1
                 LIMIT 1",
                &[&deployment_id],
            )
            .await
            .map_err(repo_err)?;

        Ok(row.map(|r| r.get(0)))
    }

    #[instrument(skip(self), fields(deployment_id = %deployment_id))]
    async fn get_device_keys(&self, deployment_id: Uuid) -> DomainResult<Vec<DeviceKeys>> {
        let conn = self.get_connection().await?;

        let rows = conn
            .query(
                "SELECT fdd.dev_eui, dk.app_key, dk.gen_app_key
                 FROM fuota_deployment_device fdd
                 LEFT JOIN device_keys dk ON dk.dev_eui = fdd.dev_eui
                 WHERE fdd.fuota_deployment_id = $1",
                &[&deployment_id],
            )
            .await
            .map_err(repo_err)?;

        rows.iter()
            .map(|row| {
                let dev_eui: Vec<u8> = row.get(0);
                Ok(DeviceKeys {
                    dev_eui: Eui64::from_slice(&dev_eui).map_err(repo_err)?,
                    app_key: optional_key(row.get(1))?,
                    gen_app_key: optional_key(row.get(2))?,
                })
            })
            .collect()
    }

    #[instrument(skip(self, error_message), fields(deployment_id = %deployment_id))]
    async fn mark_multicast_setup_failures(
        &self,
        deployment_id: Uuid,
        group_id: Uuid,
        error_message: String,
    ) -> DomainResult<u64> {
        let conn = self.get_connection().await?;

        conn.execute(
            "UPDATE fuota_deployment_device fdd
             SET state = 'ERROR', error_message = $3, updated_at = now()
             FROM remote_multicast_setup rms
             WHERE fdd.fuota_deployment_id = $1
               AND fdd.state = 'PENDING'
               AND rms.dev_eui = fdd.dev_eui
               AND rms.multicast_group_id = $2
               AND rms.state_provisioned = false",
            &[&deployment_id, &group_id, &error_message],
        )
        .await
        .map_err(repo_err)
    }

    #[instrument(skip(self, error_message), fields(deployment_id = %deployment_id))]
    async fn mark_fragmentation_session_failures(
        &self,
        deployment_id: Uuid,
        frag_index: u8,
        error_message: String,
    ) -> DomainResult<u64> {
        let conn = self.get_connection().await?;

        conn.execute(
            "UPDATE fuota_deployment_device fdd
             SET state = 'ERROR', error_message = $3, updated_at = now()
             FROM remote_fragmentation_session rfs
             WHERE fdd.fuota_deployment_id = $1
               AND fdd.state = 'PENDING'
               AND rfs.dev_eui = fdd.dev_eui
               AND rfs.frag_index = $2
               AND rfs.state_provisioned = false",
            &[&deployment_id, &i16::from(frag_index), &error_message],
        )
        .await
        .map_err(repo_err)
    }

    #[instrument(skip(self, error_message), fields(deployment_id = %deployment_id))]
    async fn mark_incomplete(
        &self,
        deployment_id: Uuid,
        error_message: String,
    ) -> DomainResult<u64> {
        let conn = self.get_connection().await?;

        conn.execute(
            "UPDATE fuota_deployment_device
             SET state = 'ERROR', error_message = $2, updated_at = now()
             WHERE fuota_deployment_id = $1 AND state = 'PENDING'",
            &[&deployment_id, &error_message],
        )
        .await
        .map_err(repo_err)
    }
}
