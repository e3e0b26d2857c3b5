use async_trait::async_trait;
use tracing::{debug, instrument};

use crate::auth::{AccessValidator, Operation, Resource};
use crate::domain::{DomainError, DomainResult};
use crate::postgres::conversions::repo_err;
use crate::postgres::PostgresClient;

/// Grants access to active global admins and to members of the organization
/// that owns the resource.
#[derive(Clone)]
pub struct PostgresAccessValidator {
    client: PostgresClient,
}

impl PostgresAccessValidator {
    pub fn new(client: PostgresClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AccessValidator for PostgresAccessValidator {
    #[instrument(skip(self))]
    async fn validate(
        &self,
        user_id: i64,
        operation: Operation,
        resource: Resource,
    ) -> DomainResult<bool> {
        let conn = self
            .client
            .get_connection()
            .await
            .map_err(DomainError::RepositoryError)?;

        let org_rows = match resource {
            Resource::Device(dev_eui) => {
                conn.query(
                    "SELECT a.organization_id
                     FROM device d
                     INNER JOIN application a ON a.id = d.application_id
                     WHERE d.dev_eui = $1",
                    &[&dev_eui.as_bytes().as_slice()],
                )
                .await
            }
            Resource::MulticastGroup(id) => {
                conn.query(
                    "SELECT sp.organization_id
                     FROM multicast_group mg
                     INNER JOIN service_profile sp ON sp.id = mg.service_profile_id
                     WHERE mg.id = $1",
                    &[&id],
                )
                .await
            }
            Resource::FuotaDeployment(id) => {
                conn.query(
                    "SELECT DISTINCT a.organization_id
                     FROM fuota_deployment_device fdd
                     INNER JOIN device d ON d.dev_eui = fdd.dev_eui
                     INNER JOIN application a ON a.id = d.application_id
                     WHERE fdd.fuota_deployment_id = $1",
                    &[&id],
                )
                .await
            }
            Resource::Application(id) => {
                conn.query(
                    "SELECT organization_id FROM application WHERE id = $1",
                    &[&id],
                )
                .await
            }
            Resource::Global => Ok(Vec::new()),
        }
        .map_err(repo_err)?;

        let organization_ids: Vec<i64> = org_rows.iter().map(|r| r.get(0)).collect();

        let row = conn
            .query_one(
                "SELECT EXISTS (
                     SELECT 1 FROM \"user\" u
                     WHERE u.id = $1
                       AND u.is_active = true
                       AND (
                           u.is_admin = true
                           OR EXISTS (
                               SELECT 1 FROM organization_user ou
                               WHERE ou.user_id = u.id
                                 AND ou.organization_id = ANY($2)
                           )
                       )
                 )",
                &[&user_id, &organization_ids],
            )
            .await
            .map_err(repo_err)?;

        let allowed: bool = row.get(0);
        debug!(?operation, allowed, "access validated");
        Ok(allowed)
    }
}
