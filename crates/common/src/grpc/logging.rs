use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use tonic::Code;
use tower::{Layer, Service};
use tracing::{error, info, warn, Instrument, Span};

use super::{default_ignored_paths, path_is_ignored};

/// Configuration for gRPC access logging
#[derive(Clone, Debug)]
pub struct GrpcLoggingConfig {
    /// Path prefixes that are never logged
    pub ignored_paths: Vec<String>,
}

impl Default for GrpcLoggingConfig {
    fn default() -> Self {
        Self {
            ignored_paths: default_ignored_paths(),
        }
    }
}

impl GrpcLoggingConfig {
    pub fn new(ignored_paths: Vec<String>) -> Self {
        Self { ignored_paths }
    }
}

/// Tower layer writing one access log line per gRPC call
#[derive(Clone)]
pub struct GrpcLoggingLayer {
    config: GrpcLoggingConfig,
}

impl GrpcLoggingLayer {
    pub fn new(config: GrpcLoggingConfig) -> Self {
        Self { config }
    }
}

impl<S> Layer<S> for GrpcLoggingLayer {
    type Service = GrpcLoggingService<S>;

    fn layer(&self, service: S) -> Self::Service {
        GrpcLoggingService {
            inner: service,
            config: self.config.clone(),
        }
    }
}

#[derive(Clone)]
pub struct GrpcLoggingService<S> {
    inner: S,
    config: GrpcLoggingConfig,
}

/// Severity an access log line is written at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AccessLevel {
    Info,
    Warn,
    Error,
}

/// Client-side mistakes are warnings; server faults are errors.
fn access_level(code: Code) -> AccessLevel {
    match code {
        Code::Ok => AccessLevel::Info,
        Code::Internal | Code::Unknown | Code::DataLoss | Code::Unavailable | Code::Unimplemented => {
            AccessLevel::Error
        }
        _ => AccessLevel::Warn,
    }
}

/// The grpc-status header is absent on successful unary responses.
fn grpc_code<B>(response: &http::Response<B>) -> Code {
    response
        .headers()
        .get("grpc-status")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<i32>().ok())
        .map(Code::from_i32)
        .unwrap_or(Code::Ok)
}

impl<S, ReqBody, ResBody> Service<http::Request<ReqBody>> for GrpcLoggingService<S>
where
    S: Service<http::Request<ReqBody>, Response = http::Response<ResBody>>,
    S::Error: std::fmt::Display,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: http::Request<ReqBody>) -> Self::Future {
        let path = req.uri().path().to_string();
        let ignored = path_is_ignored(&self.config.ignored_paths, &path);
        let start = Instant::now();
        let future = self.inner.call(req);
        let span = Span::current();

        Box::pin(
            async move {
                let result = future.await;
                if ignored {
                    return result;
                }

                let duration_ms = start.elapsed().as_millis() as u64;
                match &result {
                    Ok(response) => {
                        let code = grpc_code(response);
                        match access_level(code) {
                            AccessLevel::Info => {
                                info!(path = %path, grpc_code = ?code, duration_ms, "gRPC call")
                            }
                            AccessLevel::Warn => {
                                warn!(path = %path, grpc_code = ?code, duration_ms, "gRPC call")
                            }
                            AccessLevel::Error => {
                                error!(path = %path, grpc_code = ?code, duration_ms, "gRPC call")
                            }
                        }
                    }
                    Err(e) => {
                        error!(path = %path, duration_ms, error = %e, "gRPC transport error");
                    }
                }

                result
            }
            .instrument(span),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_level() {
        assert_eq!(access_level(Code::Ok), AccessLevel::Info);
        assert_eq!(access_level(Code::NotFound), AccessLevel::Warn);
        assert_eq!(access_level(Code::FailedPrecondition), AccessLevel::Warn);
        assert_eq!(access_level(Code::Internal), AccessLevel::Error);
    }

    #[test]
    fn test_grpc_code_from_headers() {
        let ok = http::Response::builder().body(()).unwrap();
        assert_eq!(grpc_code(&ok), Code::Ok);

        let not_found = http::Response::builder()
            .header("grpc-status", "5")
            .body(())
            .unwrap();
        assert_eq!(grpc_code(&not_found), Code::NotFound);
    }

    #[test]
    fn test_default_config_ignores_reflection() {
        let config = GrpcLoggingConfig::default();
        assert!(path_is_ignored(
            &config.ignored_paths,
            "/grpc.reflection.v1.ServerReflection/ServerReflectionInfo"
        ));
        assert!(!path_is_ignored(
            &config.ignored_paths,
            "/lpwan.api.v1.DeviceQueueService/Enqueue"
        ));
    }
}
