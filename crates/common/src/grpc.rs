mod error;
mod logging;
mod otel_tracing;
mod server;

pub use error::*;
pub use logging::*;
pub use otel_tracing::*;
pub use server::*;

/// Path prefixes skipped by the logging and tracing layers by default.
pub(crate) fn default_ignored_paths() -> Vec<String> {
    vec![
        "/grpc.reflection.".to_string(),
        "/grpc.health.".to_string(),
    ]
}

pub(crate) fn path_is_ignored(ignored_paths: &[String], path: &str) -> bool {
    ignored_paths.iter().any(|prefix| path.starts_with(prefix))
}
