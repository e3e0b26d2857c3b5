//! Shared gRPC server: logging and tracing layers, reflection, and optional
//! gRPC-Web with CORS for browser clients.
//!
//! ```ignore
//! use common::grpc::{run_grpc_server, GrpcServerConfig};
//! use tonic::service::Routes;
//!
//! let routes = Routes::builder()
//!     .add_service(DeviceQueueServiceServer::new(handler))
//!     .routes();
//!
//! run_grpc_server(
//!     GrpcServerConfig::default(),
//!     routes,
//!     &[lpwan_proto::api::v1::FILE_DESCRIPTOR_SET],
//!     cancellation_token,
//! )
//! .await?;
//! ```

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use http::{header::HeaderName, Method};
use tokio_util::sync::CancellationToken;
use tonic::service::Routes;
use tonic::transport::Server;
use tonic_web::GrpcWebLayer;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{debug, error, info};

use super::{GrpcLoggingConfig, GrpcLoggingLayer, GrpcTracingConfig, GrpcTracingLayer};

const DEFAULT_CORS_MAX_AGE_SECS: u64 = 3600;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorsConfig {
    /// `["*"]` allows any origin.
    pub allowed_origins: Vec<String>,
    pub max_age_secs: u64,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["*".to_string()],
            max_age_secs: DEFAULT_CORS_MAX_AGE_SECS,
        }
    }
}

impl CorsConfig {
    /// Parses a comma-separated origin list. An empty list allows any origin.
    pub fn from_comma_separated(origins: &str) -> Self {
        let allowed_origins: Vec<String> = origins
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        if allowed_origins.is_empty() {
            return Self::default();
        }
        Self {
            allowed_origins,
            max_age_secs: DEFAULT_CORS_MAX_AGE_SECS,
        }
    }

    fn allows_any(&self) -> bool {
        self.allowed_origins.iter().any(|o| o == "*")
    }
}

#[derive(Debug, Clone)]
pub struct GrpcServerConfig {
    pub host: String,
    pub port: u16,
    pub logging_config: GrpcLoggingConfig,
    pub tracing_config: GrpcTracingConfig,
    /// Accept gRPC-Web over HTTP/1.1.
    pub enable_grpc_web: bool,
    /// Only used with gRPC-Web.
    pub cors_config: Option<CorsConfig>,
}

impl Default for GrpcServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 50051,
            logging_config: GrpcLoggingConfig::default(),
            tracing_config: GrpcTracingConfig::default(),
            enable_grpc_web: false,
            cors_config: None,
        }
    }
}

impl GrpcServerConfig {
    pub fn with_grpc_web(mut self, cors_config: CorsConfig) -> Self {
        self.enable_grpc_web = true;
        self.cors_config = Some(cors_config);
        self
    }

    pub fn socket_addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid gRPC listen address {}:{}", self.host, self.port))
    }
}

fn build_cors_layer(config: &CorsConfig) -> CorsLayer {
    let allow_origin = if config.allows_any() {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(
            config
                .allowed_origins
                .iter()
                .filter_map(|origin| origin.parse().ok()),
        )
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::POST, Method::OPTIONS])
        .allow_headers([
            HeaderName::from_static("content-type"),
            HeaderName::from_static("x-grpc-web"),
            HeaderName::from_static("x-user-agent"),
            HeaderName::from_static("grpc-timeout"),
            HeaderName::from_static("authorization"),
        ])
        .expose_headers([
            HeaderName::from_static("grpc-status"),
            HeaderName::from_static("grpc-message"),
            HeaderName::from_static("grpc-status-details-bin"),
        ])
        .max_age(Duration::from_secs(config.max_age_secs))
}

fn build_reflection_service(
    descriptors: &[&'static [u8]],
) -> anyhow::Result<
    tonic_reflection::server::ServerReflectionServer<
        impl tonic_reflection::server::ServerReflection,
    >,
> {
    let builder = descriptors.iter().fold(
        tonic_reflection::server::Builder::configure()
            .register_encoded_file_descriptor_set(protoc_wkt::google::protobuf::FILE_DESCRIPTOR_SET),
        |builder, descriptor| builder.register_encoded_file_descriptor_set(descriptor),
    );

    builder
        .build_v1()
        .context("failed to build gRPC reflection service")
}

async fn serve_until_done(
    addr: SocketAddr,
    serve: impl Future<Output = Result<(), tonic::transport::Error>>,
) -> anyhow::Result<()> {
    match serve.await {
        Ok(()) => {
            info!(address = %addr, "gRPC server stopped");
            Ok(())
        }
        Err(e) => {
            error!(address = %addr, error = %e, "gRPC server failed");
            Err(e.into())
        }
    }
}

/// Serves `routes` until the token is cancelled.
///
/// Logging and tracing layers are always applied. CORS and gRPC-Web are
/// added when `enable_grpc_web` is set.
pub async fn run_grpc_server(
    config: GrpcServerConfig,
    routes: Routes,
    reflection_descriptors: &[&'static [u8]],
    cancellation_token: CancellationToken,
) -> anyhow::Result<()> {
    let addr = config.socket_addr()?;
    let reflection_service = build_reflection_service(reflection_descriptors)?;
    let logging_layer = GrpcLoggingLayer::new(config.logging_config.clone());
    let tracing_layer = GrpcTracingLayer::new(config.tracing_config.clone());

    info!(address = %addr, grpc_web = config.enable_grpc_web, "starting gRPC server");

    let shutdown = async move {
        cancellation_token.cancelled().await;
        debug!("gRPC server shutdown signal received");
    };

    // add_routes must precede add_service; the latter turns the builder into a Router.
    if config.enable_grpc_web {
        let cors_layer = build_cors_layer(&config.cors_config.unwrap_or_default());

        let router = Server::builder()
            .accept_http1(true)
            .layer(tracing_layer)
            .layer(logging_layer)
            .layer(cors_layer)
            .layer(GrpcWebLayer::new())
            .add_routes(routes)
            .add_service(reflection_service);

        serve_until_done(addr, router.serve_with_shutdown(addr, shutdown)).await
    } else {
        let router = Server::builder()
            .layer(tracing_layer)
            .layer(logging_layer)
            .add_routes(routes)
            .add_service(reflection_service);

        serve_until_done(addr, router.serve_with_shutdown(addr, shutdown)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cors_from_comma_separated() {
        let config = CorsConfig::from_comma_separated(" https://a.example , https://b.example,");
        assert_eq!(
            config.allowed_origins,
            vec!["https://a.example", "https://b.example"]
        );
        assert!(!config.allows_any());
    }

    #[test]
    fn test_cors_empty_allows_any() {
        let config = CorsConfig::from_comma_separated(" , ");
        assert_eq!(config, CorsConfig::default());
        assert!(config.allows_any());
    }

    #[test]
    fn test_socket_addr() {
        let config = GrpcServerConfig {
            host: "127.0.0.1".to_string(),
            port: 8080,
            ..Default::default()
        };
        assert_eq!(config.socket_addr().unwrap().port(), 8080);

        let config = GrpcServerConfig {
            host: "not a host".to_string(),
            ..Default::default()
        };
        assert!(config.socket_addr().is_err());
    }

    #[test]
    fn test_with_grpc_web() {
        let config = GrpcServerConfig::default().with_grpc_web(CorsConfig::default());
        assert!(config.enable_grpc_web);
        assert!(config.cors_config.is_some());
    }

    #[test]
    fn test_reflection_service_builds() {
        assert!(build_reflection_service(&[lpwan_proto::api::v1::FILE_DESCRIPTOR_SET]).is_ok());
    }
}
