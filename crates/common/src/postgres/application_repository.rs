use async_trait::async_trait;
use lorawan::Eui64;
use tokio_postgres::Row;
use tracing::instrument;
use uuid::Uuid;

use crate::domain::{
    Application, ApplicationRepository, DeviceProfile, DomainError, DomainResult, NetworkServer,
    NetworkServerRepository,
};
use crate::postgres::conversions::{repo_err, to_codec};
use crate::postgres::PostgresClient;

fn application_from_row(row: &Row) -> DomainResult<Application> {
    Ok(Application {
        id: row.get(0),
        name: row.get(1),
        organization_id: row.get(2),
        service_profile_id: row.get(3),
        codec: to_codec(row.get(4), row.get(5), row.get(6))?,
    })
}

fn device_profile_from_row(row: &Row) -> DomainResult<DeviceProfile> {
    Ok(DeviceProfile {
        id: row.get(0),
        name: row.get(1),
        organization_id: row.get(2),
        network_server_id: row.get(3),
        codec: to_codec(row.get(4), row.get(5), row.get(6))?,
    })
}

fn network_server_from_row(row: &Row) -> NetworkServer {
    NetworkServer {
        id: row.get(0),
        name: row.get(1),
        server: row.get(2),
    }
}

/// Read access to applications, device profiles and network servers.
#[derive(Clone)]
pub struct PostgresApplicationRepository {
    client: PostgresClient,
}

impl PostgresApplicationRepository {
    pub fn new(client: PostgresClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ApplicationRepository for PostgresApplicationRepository {
    #[instrument(skip(self), fields(application_id = id))]
    async fn get_application(&self, id: i64) -> DomainResult<Option<Application>> {
        let conn = self
            .client
            .get_connection()
            .await
            .map_err(DomainError::RepositoryError)?;

        let row = conn
            .query_opt(
                "SELECT id, name, organization_id, service_profile_id, payload_codec,
                        payload_encoder_script, payload_decoder_script
                 FROM application
                 WHERE id = $1",
                &[&id],
            )
            .await
            .map_err(repo_err)?;

        row.as_ref().map(application_from_row).transpose()
    }

    #[instrument(skip(self), fields(device_profile_id = %id))]
    async fn get_device_profile(&self, id: Uuid) -> DomainResult<Option<DeviceProfile>> {
        let conn = self
            .client
            .get_connection()
            .await
            .map_err(DomainError::RepositoryError)?;

        let row = conn
            .query_opt(
                "SELECT id, name, organization_id, network_server_id, payload_codec,
                        payload_encoder_script, payload_decoder_script
                 FROM device_profile
                 WHERE id = $1",
                &[&id],
            )
            .await
            .map_err(repo_err)?;

        row.as_ref().map(device_profile_from_row).transpose()
    }
}

#[async_trait]
impl NetworkServerRepository for PostgresApplicationRepository {
    #[instrument(skip(self), fields(dev_eui = %dev_eui))]
    async fn get_network_server_for_dev_eui(
        &self,
        dev_eui: Eui64,
    ) -> DomainResult<Option<NetworkServer>> {
        let conn = self
            .client
            .get_connection()
            .await
            .map_err(DomainError::RepositoryError)?;

        let row = conn
            .query_opt(
                "SELECT ns.id, ns.name, ns.server
                 FROM network_server ns
                 INNER JOIN service_profile sp ON sp.network_server_id = ns.id
                 INNER JOIN application a ON a.service_profile_id = sp.id
                 INNER JOIN device d ON d.application_id = a.id
                 WHERE d.dev_eui = $1",
                &[&dev_eui.as_bytes().as_slice()],
            )
            .await
            .map_err(repo_err)?;

        Ok(row.as_ref().map(network_server_from_row))
    }

    #[instrument(skip(self), fields(service_profile_id = %service_profile_id))]
    async fn get_network_server_for_service_profile(
        &self,
        service_profile_id: Uuid,
    ) -> DomainResult<Option<NetworkServer>> {
        let conn = self
            .client
            .get_connection()
            .await
            .map_err(DomainError::RepositoryError)?;

        let row = conn
            .query_opt(
                "SELECT ns.id, ns.name, ns.server
                 FROM network_server ns
                 INNER JOIN service_profile sp ON sp.network_server_id = ns.id
                 WHERE sp.id = $1",
                &[&service_profile_id],
            )
            .await
            .map_err(repo_err)?;

        Ok(row.as_ref().map(network_server_from_row))
    }
}
