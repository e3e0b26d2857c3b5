use async_trait::async_trait;
use lorawan::{Aes128Key, DevAddr, Eui64};
use tokio_postgres::Row;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::domain::{
    DomainError, DomainResult, RemoteFragmentationSession, RemoteMulticastClassCSession,
    RemoteMulticastSetup, RemoteSessionRepository, RetryState,
};
use crate::postgres::conversions::{
    duration_secs, repo_err, to_descriptor, to_duration, to_enum, to_u16, to_u32,
    to_u8,
};
use crate::postgres::PostgresClient;

const SETUP_COLUMNS: &str = "dev_eui, multicast_group_id, mc_group_id, mc_addr, mc_key_encrypted, \
     min_mc_f_cnt, max_mc_f_cnt, state, state_provisioned, retry_after, retry_count, retry_interval";

const FRAG_SESSION_COLUMNS: &str = "dev_eui, frag_index, mc_group_ids, nb_frag, frag_size, \
     fragmentation_matrix, block_ack_delay, padding, descriptor, state, state_provisioned, \
     retry_after, retry_count, retry_interval";

const CLASS_C_COLUMNS: &str = "dev_eui, multicast_group_id, mc_group_id, session_time, \
     session_time_out, dl_frequency, dr, state_provisioned, retry_after, retry_count, retry_interval";

/// Reads the four retry columns starting at `offset`.
fn retry_from_row(row: &Row, offset: usize) -> DomainResult<RetryState> {
    let retry_count: i32 = row.get(offset + 2);
    Ok(RetryState {
        state_provisioned: row.get(offset),
        retry_after: row.get(offset + 1),
        retry_count: u32::try_from(retry_count).map_err(repo_err)?,
        retry_interval: to_duration(row.get(offset + 3), "retry_interval")?,
    })
}

fn setup_from_row(row: &Row) -> DomainResult<RemoteMulticastSetup> {
    let dev_eui: Vec<u8> = row.get(0);
    let mc_addr: Vec<u8> = row.get(3);
    let mc_key_encrypted: Vec<u8> = row.get(4);
    let state: String = row.get(7);
    Ok(RemoteMulticastSetup {
        dev_eui: Eui64::from_slice(&dev_eui).map_err(repo_err)?,
        multicast_group_id: row.get(1),
        mc_group_id: to_u8(row.get(2), "mc_group_id")?,
        mc_addr: DevAddr::from_slice(&mc_addr).map_err(repo_err)?,
        mc_key_encrypted: Aes128Key::from_slice(&mc_key_encrypted).map_err(repo_err)?,
        min_mc_f_cnt: to_u32(row.get(5), "min_mc_f_cnt")?,
        max_mc_f_cnt: to_u32(row.get(6), "max_mc_f_cnt")?,
        state: to_enum(&state)?,
        retry: retry_from_row(row, 8)?,
    })
}

fn frag_session_from_row(row: &Row) -> DomainResult<RemoteFragmentationSession> {
    let dev_eui: Vec<u8> = row.get(0);
    let mc_group_ids: Vec<i16> = row.get(2);
    let descriptor: Vec<u8> = row.get(8);
    let state: String = row.get(9);
    Ok(RemoteFragmentationSession {
        dev_eui: Eui64::from_slice(&dev_eui).map_err(repo_err)?,
        frag_index: to_u8(row.get(1), "frag_index")?,
        mc_group_ids: mc_group_ids
            .into_iter()
            .map(|id| to_u8(id, "mc_group_ids"))
            .collect::<DomainResult<_>>()?,
        nb_frag: to_u16(row.get(3), "nb_frag")?,
        frag_size: to_u8(row.get(4), "frag_size")?,
        fragmentation_matrix: to_u8(row.get(5), "fragmentation_matrix")?,
        block_ack_delay: to_u8(row.get(6), "block_ack_delay")?,
        padding: to_u8(row.get(7), "padding")?,
        descriptor: to_descriptor(&descriptor)?,
        state: to_enum(&state)?,
        retry: retry_from_row(row, 10)?,
    })
}

fn class_c_session_from_row(row: &Row) -> DomainResult<RemoteMulticastClassCSession> {
    let dev_eui: Vec<u8> = row.get(0);
    Ok(RemoteMulticastClassCSession {
        dev_eui: Eui64::from_slice(&dev_eui).map_err(repo_err)?,
        multicast_group_id: row.get(1),
        mc_group_id: to_u8(row.get(2), "mc_group_id")?,
        session_time: row.get(3),
        session_time_out: to_u8(row.get(4), "session_time_out")?,
        dl_frequency: to_u32(row.get(5), "dl_frequency")?,
        dr: to_u8(row.get(6), "dr")?,
        retry: retry_from_row(row, 7)?,
    })
}

fn retry_count_param(retry: &RetryState) -> i32 {
    i32::try_from(retry.retry_count).unwrap_or(i32::MAX)
}

/// PostgreSQL implementation of RemoteSessionRepository trait
#[derive(Clone)]
pub struct PostgresRemoteSessionRepository {
    client: PostgresClient,
}

impl PostgresRemoteSessionRepository {
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
impl RemoteSessionRepository for PostgresRemoteSessionRepository {
    #[instrument(skip(self, setup), fields(dev_eui = %setup.dev_eui, multicast_group_id = %setup.multicast_group_id))]
    async fn replace_remote_multicast_setup(
        &self,
        setup: &RemoteMulticastSetup,
    ) -> DomainResult<()> {
        let conn = self.get_connection().await?;

        conn.execute(
            &format!(
                "INSERT INTO remote_multicast_setup ({}, created_at, updated_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, now(), now())
                 ON CONFLICT (dev_eui, multicast_group_id) DO UPDATE SET
                    mc_group_id = EXCLUDED.mc_group_id,
                    mc_addr = EXCLUDED.mc_addr,
                    mc_key_encrypted = EXCLUDED.mc_key_encrypted,
                    min_mc_f_cnt = EXCLUDED.min_mc_f_cnt,
                    max_mc_f_cnt = EXCLUDED.max_mc_f_cnt,
                    state = EXCLUDED.state,
                    state_provisioned = EXCLUDED.state_provisioned,
                    retry_after = EXCLUDED.retry_after,
                    retry_count = EXCLUDED.retry_count,
                    retry_interval = EXCLUDED.retry_interval,
                    updated_at = now()",
                SETUP_COLUMNS
            ),
            &[
                &setup.dev_eui.as_bytes().as_slice(),
                &setup.multicast_group_id,
                &i16::from(setup.mc_group_id),
                &setup.mc_addr.as_bytes().as_slice(),
                &setup.mc_key_encrypted.as_bytes().as_slice(),
                &i64::from(setup.min_mc_f_cnt),
                &i64::from(setup.max_mc_f_cnt),
                &setup.state.as_str(),
                &setup.retry.state_provisioned,
                &setup.retry.retry_after,
                &retry_count_param(&setup.retry),
                &duration_secs(setup.retry.retry_interval),
            ],
        )
        .await
        .map_err(repo_err)?;

        debug!("remote multicast setup stored");
        Ok(())
    }

    #[instrument(skip(self, session), fields(dev_eui = %session.dev_eui, frag_index = session.frag_index))]
    async fn replace_remote_fragmentation_session(
        &self,
        session: &RemoteFragmentationSession,
    ) -> DomainResult<()> {
        let conn = self.get_connection().await?;
        let mc_group_ids: Vec<i16> = session.mc_group_ids.iter().map(|id| i16::from(*id)).collect();

        conn.execute(
            &format!(
                "INSERT INTO remote_fragmentation_session ({}, created_at, updated_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, now(), now())
                 ON CONFLICT (dev_eui, frag_index) DO UPDATE SET
                    mc_group_ids = EXCLUDED.mc_group_ids,
                    nb_frag = EXCLUDED.nb_frag,
                    frag_size = EXCLUDED.frag_size,
                    fragmentation_matrix = EXCLUDED.fragmentation_matrix,
                    block_ack_delay = EXCLUDED.block_ack_delay,
                    padding = EXCLUDED.padding,
                    descriptor = EXCLUDED.descriptor,
                    state = EXCLUDED.state,
                    state_provisioned = EXCLUDED.state_provisioned,
                    retry_after = EXCLUDED.retry_after,
                    retry_count = EXCLUDED.retry_count,
                    retry_interval = EXCLUDED.retry_interval,
                    created_at = now(),
                    updated_at = now()",
                FRAG_SESSION_COLUMNS
            ),
            &[
                &session.dev_eui.as_bytes().as_slice(),
                &i16::from(session.frag_index),
                &mc_group_ids,
                &i32::from(session.nb_frag),
                &i16::from(session.frag_size),
                &i16::from(session.fragmentation_matrix),
                &i16::from(session.block_ack_delay),
                &i16::from(session.padding),
                &session.descriptor.as_slice(),
                &session.state.as_str(),
                &session.retry.state_provisioned,
                &session.retry.retry_after,
                &retry_count_param(&session.retry),
                &duration_secs(session.retry.retry_interval),
            ],
        )
        .await
        .map_err(repo_err)?;

        debug!("remote fragmentation session stored");
        Ok(())
    }

    #[instrument(skip(self, session), fields(dev_eui = %session.dev_eui, multicast_group_id = %session.multicast_group_id))]
    async fn replace_remote_multicast_class_c_session(
        &self,
        session: &RemoteMulticastClassCSession,
    ) -> DomainResult<()> {
        let conn = self.get_connection().await?;

        conn.execute(
            &format!(
                "INSERT INTO remote_multicast_class_c_session ({}, created_at, updated_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, now(), now())
                 ON CONFLICT (dev_eui, multicast_group_id) DO UPDATE SET
                    mc_group_id = EXCLUDED.mc_group_id,
                    session_time = EXCLUDED.session_time,
                    session_time_out = EXCLUDED.session_time_out,
                    dl_frequency = EXCLUDED.dl_frequency,
                    dr = EXCLUDED.dr,
                    state_provisioned = EXCLUDED.state_provisioned,
                    retry_after = EXCLUDED.retry_after,
                    retry_count = EXCLUDED.retry_count,
                    retry_interval = EXCLUDED.retry_interval,
                    updated_at = now()",
                CLASS_C_COLUMNS
            ),
            &[
                &session.dev_eui.as_bytes().as_slice(),
                &session.multicast_group_id,
                &i16::from(session.mc_group_id),
                &session.session_time,
                &i16::from(session.session_time_out),
                &i64::from(session.dl_frequency),
                &i16::from(session.dr),
                &session.retry.state_provisioned,
                &session.retry.retry_after,
                &retry_count_param(&session.retry),
                &duration_secs(session.retry.retry_interval),
            ],
        )
        .await
        .map_err(repo_err)?;

        debug!("remote class-c session stored");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn claim_pending_remote_multicast_setups(
        &self,
        limit: i64,
        max_retry_count: u32,
    ) -> DomainResult<Vec<RemoteMulticastSetup>> {
        let conn = self.get_connection().await?;
        let max_retry_count = i32::try_from(max_retry_count).unwrap_or(i32::MAX);

        let rows = conn
            .query(
                &format!(
                    "UPDATE remote_multicast_setup SET
                        retry_count = retry_count + 1,
                        retry_after = now() + retry_interval * interval '1 second',
                        updated_at = now()
                     WHERE (dev_eui, multicast_group_id) IN (
                         SELECT dev_eui, multicast_group_id
                         FROM remote_multicast_setup
                         WHERE state_provisioned = false
                           AND retry_count < $1
                           AND retry_after <= now()
                         LIMIT $2
                         FOR UPDATE SKIP LOCKED
                     )
                     RETURNING {}",
                    SETUP_COLUMNS
                ),
                &[&max_retry_count, &limit],
            )
            .await
            .map_err(repo_err)?;

        rows.iter().map(setup_from_row).collect()
    }

    #[instrument(skip(self))]
    async fn claim_pending_remote_fragmentation_sessions(
        &self,
        limit: i64,
        max_retry_count: u32,
    ) -> DomainResult<Vec<RemoteFragmentationSession>> {
        let conn = self.get_connection().await?;
        let max_retry_count = i32::try_from(max_retry_count).unwrap_or(i32::MAX);

        let rows = conn
            .query(
                &format!(
                    "UPDATE remote_fragmentation_session SET
                        retry_count = retry_count + 1,
                        retry_after = now() + retry_interval * interval '1 second',
                        updated_at = now()
                     WHERE (dev_eui, frag_index) IN (
                         SELECT fs.dev_eui, fs.frag_index
                         FROM remote_fragmentation_session fs
                         WHERE fs.state_provisioned = false
                           AND fs.retry_count < $1
                           AND fs.retry_after <= now()
                           AND (
                               array_length(fs.mc_group_ids, 1) IS NULL
                               OR EXISTS (
                                   SELECT 1 FROM remote_multicast_setup ms
                                   WHERE ms.dev_eui = fs.dev_eui
                                     AND ms.state_provisioned = true
                                     AND ms.mc_group_id = ANY(fs.mc_group_ids)
                               )
                           )
                         LIMIT $2
                         FOR UPDATE OF fs SKIP LOCKED
                     )
                     RETURNING {}",
                    FRAG_SESSION_COLUMNS
                ),
                &[&max_retry_count, &limit],
            )
            .await
            .map_err(repo_err)?;

        rows.iter().map(frag_session_from_row).collect()
    }

    #[instrument(skip(self))]
    async fn claim_pending_remote_multicast_class_c_sessions(
        &self,
        limit: i64,
        max_retry_count: u32,
    ) -> DomainResult<Vec<RemoteMulticastClassCSession>> {
        let conn = self.get_connection().await?;
        let max_retry_count = i32::try_from(max_retry_count).unwrap_or(i32::MAX);

        let rows = conn
            .query(
                &format!(
                    "UPDATE remote_multicast_class_c_session SET
                        retry_count = retry_count + 1,
                        retry_after = now() + retry_interval * interval '1 second',
                        updated_at = now()
                     WHERE (dev_eui, multicast_group_id) IN (
                         SELECT sess.dev_eui, sess.multicast_group_id
                         FROM remote_multicast_class_c_session sess
                         INNER JOIN remote_multicast_setup ms
                            ON ms.dev_eui = sess.dev_eui
                           AND ms.multicast_group_id = sess.multicast_group_id
                           AND ms.mc_group_id = sess.mc_group_id
                         WHERE ms.state_provisioned = true
                           AND ms.state = 'SETUP'
                           AND sess.state_provisioned = false
                           AND sess.retry_count < $1
                           AND sess.retry_after <= now()
                         LIMIT $2
                         FOR UPDATE OF sess SKIP LOCKED
                     )
                     RETURNING {}",
                    CLASS_C_COLUMNS
                ),
                &[&max_retry_count, &limit],
            )
            .await
            .map_err(repo_err)?;

        rows.iter().map(class_c_session_from_row).collect()
    }

    #[instrument(skip(self), fields(dev_eui = %dev_eui))]
    async fn mark_remote_multicast_setup_provisioned(
        &self,
        dev_eui: Eui64,
        mc_group_id: u8,
    ) -> DomainResult<Option<RemoteMulticastSetup>> {
        let conn = self.get_connection().await?;

        let row = conn
            .query_opt(
                &format!(
                    "UPDATE remote_multicast_setup SET state_provisioned = true, updated_at = now()
                     WHERE dev_eui = $1 AND multicast_group_id = (
                         SELECT multicast_group_id FROM remote_multicast_setup
                         WHERE dev_eui = $1 AND mc_group_id = $2
                         ORDER BY created_at DESC
                         LIMIT 1
                     )
                     RETURNING {}",
                    SETUP_COLUMNS
                ),
                &[&dev_eui.as_bytes().as_slice(), &i16::from(mc_group_id)],
            )
            .await
            .map_err(repo_err)?;

        row.as_ref().map(setup_from_row).transpose()
    }

    #[instrument(skip(self), fields(dev_eui = %dev_eui))]
    async fn mark_remote_fragmentation_session_provisioned(
        &self,
        dev_eui: Eui64,
        frag_index: u8,
    ) -> DomainResult<Option<RemoteFragmentationSession>> {
        let conn = self.get_connection().await?;

        let row = conn
            .query_opt(
                &format!(
                    "UPDATE remote_fragmentation_session SET state_provisioned = true, updated_at = now()
                     WHERE dev_eui = $1 AND frag_index = $2
                     RETURNING {}",
                    FRAG_SESSION_COLUMNS
                ),
                &[&dev_eui.as_bytes().as_slice(), &i16::from(frag_index)],
            )
            .await
            .map_err(repo_err)?;

        row.as_ref().map(frag_session_from_row).transpose()
    }

    #[instrument(skip(self), fields(dev_eui = %dev_eui))]
    async fn mark_remote_multicast_class_c_session_provisioned(
        &self,
        dev_eui: Eui64,
        mc_group_id: u8,
    ) -> DomainResult<Option<RemoteMulticastClassCSession>> {
        let conn = self.get_connection().await?;

        let row = conn
            .query_opt(
                &format!(
                    "UPDATE remote_multicast_class_c_session SET state_provisioned = true, updated_at = now()
                     WHERE dev_eui = $1 AND multicast_group_id = (
                         SELECT multicast_group_id FROM remote_multicast_class_c_session
                         WHERE dev_eui = $1 AND mc_group_id = $2
                         ORDER BY created_at DESC
                         LIMIT 1
                     )
                     RETURNING {}",
                    CLASS_C_COLUMNS
                ),
                &[&dev_eui.as_bytes().as_slice(), &i16::from(mc_group_id)],
            )
            .await
            .map_err(repo_err)?;

        row.as_ref().map(class_c_session_from_row).transpose()
    }

    #[instrument(skip(self), fields(multicast_group_id = %multicast_group_id))]
    async fn get_dev_euis_with_multicast_setup(
        &self,
        multicast_group_id: Uuid,
    ) -> DomainResult<Vec<Eui64>> {
        let conn = self.get_connection().await?;

        let rows = conn
            .query(
                "SELECT dev_eui FROM remote_multicast_setup
                 WHERE multicast_group_id = $1 AND state = 'SETUP' AND state_provisioned = true",
                &[&multicast_group_id],
            )
            .await
            .map_err(repo_err)?;

        rows.iter()
            .map(|row| {
                let dev_eui: Vec<u8> = row.get(0);
                Eui64::from_slice(&dev_eui).map_err(repo_err)
            })
            .collect()
    }

    #[instrument(skip(self), fields(multicast_group_id = %multicast_group_id))]
    async fn get_dev_euis_with_fragmentation_session(
        &self,
        multicast_group_id: Uuid,
        frag_index: u8,
    ) -> DomainResult<Vec<Eui64>> {
        let conn = self.get_connection().await?;

        let rows = conn
            .query(
                "SELECT DISTINCT rfs.dev_eui
                 FROM remote_fragmentation_session rfs
                 INNER JOIN remote_multicast_setup rms
                    ON rms.dev_eui = rfs.dev_eui
                   AND rms.mc_group_id = ANY(rfs.mc_group_ids)
                 WHERE rms.multicast_group_id = $1
                   AND rms.state_provisioned = true
                   AND rfs.frag_index = $2
                   AND rfs.state = 'SETUP'
                   AND rfs.state_provisioned = true",
                &[&multicast_group_id, &i16::from(frag_index)],
            )
            .await
            .map_err(repo_err)?;

        rows.iter()
            .map(|row| {
                let dev_eui: Vec<u8> = row.get(0);
                Eui64::from_slice(&dev_eui).map_err(repo_err)
            })
            .collect()
    }
}
