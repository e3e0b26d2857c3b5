use anyhow::Result;
use deadpool_postgres::{Config, ManagerConfig, Pool, RecyclingMethod, Runtime};
use tokio_postgres::NoTls;
use tracing::debug;

use crate::postgres::PostgresConfig;

/// Pooled PostgreSQL client shared by every repository.
#[derive(Clone)]
pub struct PostgresClient {
    pool: Pool,
}

impl PostgresClient {
    /// Creates a new pool. Connections are opened lazily.
    pub fn new(
        host: &str,
        port: u16,
        database: &str,
        username: &str,
        password: &str,
        max_pool_size: usize,
    ) -> Result<Self> {
        let mut cfg = Config::new();
        cfg.host = Some(host.to_string());
        cfg.port = Some(port);
        cfg.dbname = Some(database.to_string());
        cfg.user = Some(username.to_string());
        cfg.password = Some(password.to_string());
        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        let pool = cfg.create_pool(Some(Runtime::Tokio1), NoTls)?;
        pool.resize(max_pool_size);

        Ok(Self { pool })
    }

    pub fn from_config(config: &PostgresConfig) -> Result<Self> {
        Self::new(
            &config.host,
            config.port,
            &config.database,
            &config.username,
            &config.password,
            config.max_pool_size,
        )
    }

    pub async fn ping(&self) -> Result<()> {
        let client = self.pool.get().await?;
        client.execute("SELECT 1", &[]).await?;
        debug!("postgreSQL connection successful");
        Ok(())
    }

    pub async fn get_connection(&self) -> Result<deadpool_postgres::Client> {
        Ok(self.pool.get().await?)
    }
}
