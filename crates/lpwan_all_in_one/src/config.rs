use std::time::Duration;

use common::grpc::{CorsConfig, GrpcLoggingConfig, GrpcServerConfig, GrpcTracingConfig};
use common::postgres::PostgresConfig;
use common::telemetry::TelemetryConfig;
use config::{Config, ConfigError, Environment};
use fuota_worker::{FuotaConfig, SyncConfig};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServiceConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    // PostgreSQL configuration
    #[serde(default = "default_postgres_host")]
    pub postgres_host: String,

    #[serde(default = "default_postgres_port")]
    pub postgres_port: u16,

    #[serde(default = "default_postgres_database")]
    pub postgres_database: String,

    #[serde(default = "default_postgres_username")]
    pub postgres_username: String,

    #[serde(default = "default_postgres_password")]
    pub postgres_password: String,

    #[serde(default = "default_postgres_max_pool_size")]
    pub postgres_max_pool_size: usize,

    /// Path to PostgreSQL migrations directory
    #[serde(default = "default_postgres_migrations_dir")]
    pub postgres_migrations_dir: String,

    #[serde(default = "default_postgres_goose_binary_path")]
    pub postgres_goose_binary_path: String,

    // gRPC configuration
    #[serde(default = "default_grpc_host")]
    pub grpc_host: String,

    #[serde(default = "default_grpc_port")]
    pub grpc_port: u16,

    /// Enable gRPC-Web support
    #[serde(default = "default_grpc_web_enabled")]
    pub grpc_web_enabled: bool,

    /// CORS allowed origins (comma-separated list, "*" for all origins)
    #[serde(default = "default_grpc_cors_allowed_origins")]
    pub grpc_cors_allowed_origins: String,

    /// gRPC paths to ignore in logging and tracing (comma-separated)
    #[serde(default = "default_grpc_ignored_paths")]
    pub grpc_ignored_paths: String,

    // JWT configuration
    #[serde(default = "default_jwt_secret")]
    pub jwt_secret: String,

    #[serde(default = "default_jwt_expiration_hours")]
    pub jwt_expiration_hours: u64,

    // Network server client
    #[serde(default = "default_network_server_connect_timeout_secs")]
    pub network_server_connect_timeout_secs: u64,

    // FUOTA worker configuration
    #[serde(default = "default_fuota_interval_ms")]
    pub fuota_interval_ms: u64,

    #[serde(default = "default_fuota_batch_size")]
    pub fuota_batch_size: i64,

    /// Seconds a claimed deployment stays hidden from other workers
    #[serde(default = "default_fuota_step_lease_secs")]
    pub fuota_step_lease_secs: u64,

    /// McGroupID used on the devices (0..=3)
    #[serde(default)]
    pub fuota_mc_group_id: u8,

    /// FragIndex used on the devices (0..=3)
    #[serde(default)]
    pub fuota_frag_index: u8,

    #[serde(default = "default_fuota_retries")]
    pub fuota_remote_multicast_setup_retries: u32,

    #[serde(default = "default_fuota_retries")]
    pub fuota_remote_fragmentation_session_retries: u32,

    // Remote setup sync loops
    #[serde(default = "default_sync_interval_ms")]
    pub sync_interval_ms: u64,

    #[serde(default = "default_sync_batch_size")]
    pub sync_batch_size: i64,

    #[serde(default = "default_sync_retries")]
    pub sync_retries: u32,

    // OpenTelemetry configuration
    #[serde(default = "default_otel_endpoint")]
    pub otel_endpoint: String,

    #[serde(default = "default_otel_enabled")]
    pub otel_enabled: bool,

    #[serde(default = "default_otel_service_name")]
    pub otel_service_name: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

// PostgreSQL defaults
fn default_postgres_host() -> String {
    "localhost".to_string()
}

fn default_postgres_port() -> u16 {
    5432
}

fn default_postgres_database() -> String {
    "lpwan".to_string()
}

fn default_postgres_username() -> String {
    "lpwan".to_string()
}

fn default_postgres_password() -> String {
    "lpwan".to_string()
}

fn default_postgres_max_pool_size() -> usize {
    10
}

fn default_postgres_migrations_dir() -> String {
    "/home/lpwan/migrations/postgres".to_string()
}

fn default_postgres_goose_binary_path() -> String {
    "goose".to_string()
}

// gRPC defaults
fn default_grpc_host() -> String {
    "0.0.0.0".to_string()
}

fn default_grpc_port() -> u16 {
    50051
}

fn default_grpc_web_enabled() -> bool {
    true
}

fn default_grpc_cors_allowed_origins() -> String {
    "*".to_string()
}

fn default_grpc_ignored_paths() -> String {
    "/grpc.reflection.".to_string()
}

// JWT defaults
fn default_jwt_secret() -> String {
    "change-me-in-production".to_string()
}

fn default_jwt_expiration_hours() -> u64 {
    24
}

fn default_network_server_connect_timeout_secs() -> u64 {
    5
}

// FUOTA defaults
fn default_fuota_interval_ms() -> u64 {
    1000
}

fn default_fuota_batch_size() -> i64 {
    10
}

fn default_fuota_step_lease_secs() -> u64 {
    300
}

fn default_fuota_retries() -> u32 {
    3
}

fn default_sync_interval_ms() -> u64 {
    1000
}

fn default_sync_batch_size() -> i64 {
    100
}

fn default_sync_retries() -> u32 {
    3
}

// OpenTelemetry defaults
fn default_otel_endpoint() -> String {
    "http://localhost:4317".to_string()
}

fn default_otel_enabled() -> bool {
    false
}

fn default_otel_service_name() -> String {
    "lpwan-all-in-one".to_string()
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(Environment::with_prefix("LPWAN"))
            .build()?
            .try_deserialize()
    }

    pub fn telemetry_config(&self) -> TelemetryConfig {
        TelemetryConfig {
            service_name: self.otel_service_name.clone(),
            otel_endpoint: self.otel_endpoint.clone(),
            otel_enabled: self.otel_enabled,
            log_level: self.log_level.clone(),
        }
    }

    pub fn postgres_config(&self) -> PostgresConfig {
        PostgresConfig {
            host: self.postgres_host.clone(),
            port: self.postgres_port,
            database: self.postgres_database.clone(),
            username: self.postgres_username.clone(),
            password: self.postgres_password.clone(),
            max_pool_size: self.postgres_max_pool_size,
            migrations_dir: self.postgres_migrations_dir.clone(),
            goose_binary_path: self.postgres_goose_binary_path.clone(),
        }
    }

    pub fn grpc_server_config(&self) -> GrpcServerConfig {
        let ignored_paths: Vec<String> = self
            .grpc_ignored_paths
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        GrpcServerConfig {
            host: self.grpc_host.clone(),
            port: self.grpc_port,
            logging_config: GrpcLoggingConfig::new(ignored_paths.clone()),
            tracing_config: GrpcTracingConfig::new(ignored_paths),
            enable_grpc_web: self.grpc_web_enabled,
            cors_config: self
                .grpc_web_enabled
                .then(|| CorsConfig::from_comma_separated(&self.grpc_cors_allowed_origins)),
        }
    }

    pub fn fuota_config(&self) -> FuotaConfig {
        FuotaConfig {
            poll_interval: Duration::from_millis(self.fuota_interval_ms),
            batch_size: self.fuota_batch_size,
            step_lease: Duration::from_secs(self.fuota_step_lease_secs),
            mc_group_id: self.fuota_mc_group_id,
            frag_index: self.fuota_frag_index,
            remote_multicast_setup_retries: self.fuota_remote_multicast_setup_retries,
            remote_fragmentation_session_retries: self.fuota_remote_fragmentation_session_retries,
        }
    }

    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            interval: Duration::from_millis(self.sync_interval_ms),
            batch_size: self.sync_batch_size,
            retries: self.sync_retries,
        }
    }

    pub fn network_server_connect_timeout(&self) -> Duration {
        Duration::from_secs(self.network_server_connect_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Tests touching LPWAN_* variables run one at a time.
    static TEST_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn test_default_config() {
        let _lock = TEST_LOCK.lock().unwrap();
        // SAFETY: env access is serialized by TEST_LOCK
        unsafe {
            std::env::remove_var("LPWAN_LOG_LEVEL");
            std::env::remove_var("LPWAN_FUOTA_FRAG_INDEX");
        }

        let config = ServiceConfig::from_env().unwrap();
        assert_eq!(config.log_level, "info");
        assert_eq!(config.grpc_port, 50051);

        let fuota = config.fuota_config();
        assert_eq!(fuota.frag_index, 0);
        assert_eq!(fuota.remote_multicast_setup_retries, 3);
        assert_eq!(fuota.poll_interval, Duration::from_secs(1));
    }

    #[test]
    fn test_custom_config() {
        let _lock = TEST_LOCK.lock().unwrap();
        // SAFETY: env access is serialized by TEST_LOCK
        unsafe {
            std::env::set_var("LPWAN_LOG_LEVEL", "debug");
            std::env::set_var("LPWAN_FUOTA_FRAG_INDEX", "2");
        }

        let config = ServiceConfig::from_env().unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.fuota_config().frag_index, 2);

        // SAFETY: env access is serialized by TEST_LOCK
        unsafe {
            std::env::remove_var("LPWAN_LOG_LEVEL");
            std::env::remove_var("LPWAN_FUOTA_FRAG_INDEX");
        }
    }

    #[test]
    fn test_grpc_server_config_without_grpc_web() {
        let _lock = TEST_LOCK.lock().unwrap();
        let mut config = ServiceConfig::from_env().unwrap();
        config.grpc_web_enabled = false;
        config.grpc_ignored_paths = "/grpc.reflection., /grpc.health.".to_string();

        let grpc = config.grpc_server_config();
        assert!(!grpc.enable_grpc_web);
        assert!(grpc.cors_config.is_none());
    }
}
