use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use http::{Request, Response};
use opentelemetry::{global, propagation::Extractor, trace::TraceContextExt as _};
use tonic::{Code, Status};
use tower::{Layer, Service};
use tracing::{field, info_span, Instrument, Span};
use tracing_opentelemetry::OpenTelemetrySpanExt;

use super::{default_ignored_paths, path_is_ignored};

/// Configuration for the gRPC server span layer
#[derive(Clone, Debug)]
pub struct GrpcTracingConfig {
    /// Path prefixes that get no server span
    pub ignored_paths: Vec<String>,
}

impl Default for GrpcTracingConfig {
    fn default() -> Self {
        Self {
            ignored_paths: default_ignored_paths(),
        }
    }
}

impl GrpcTracingConfig {
    pub fn new(ignored_paths: Vec<String>) -> Self {
        Self { ignored_paths }
    }
}

/// Tower layer opening an OpenTelemetry server span per gRPC call,
/// continuing any W3C trace context found in the request metadata.
#[derive(Clone)]
pub struct GrpcTracingLayer {
    config: GrpcTracingConfig,
}

impl GrpcTracingLayer {
    pub fn new(config: GrpcTracingConfig) -> Self {
        Self { config }
    }
}

impl<S> Layer<S> for GrpcTracingLayer {
    type Service = GrpcTracingService<S>;

    fn layer(&self, service: S) -> Self::Service {
        GrpcTracingService {
            inner: service,
            config: self.config.clone(),
        }
    }
}

#[derive(Clone)]
pub struct GrpcTracingService<S> {
    inner: S,
    config: GrpcTracingConfig,
}

struct HeaderExtractor<'a>(&'a http::HeaderMap);

impl Extractor for HeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| v.to_str().ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(|k| k.as_str()).collect()
    }
}

/// Splits "/lpwan.api.v1.DeviceQueueService/Enqueue" into
/// ("DeviceQueueService", "Enqueue").
fn split_grpc_path(path: &str) -> (&str, &str) {
    let trimmed = path.trim_start_matches('/');
    match trimmed.split_once('/') {
        Some((service, method)) => (service.rsplit('.').next().unwrap_or(service), method),
        None => (trimmed, trimmed),
    }
}

fn response_code<B>(response: &Response<B>) -> i32 {
    response
        .headers()
        .get("grpc-status")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<i32>().ok())
        .unwrap_or(Code::Ok as i32)
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for GrpcTracingService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Error: std::fmt::Display,
    S::Future: Send + 'static,
    ReqBody: Send + 'static,
    ResBody: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let path = req.uri().path().to_string();
        if path_is_ignored(&self.config.ignored_paths, &path) {
            return Box::pin(self.inner.call(req));
        }

        let parent_context = global::get_text_map_propagator(|propagator| {
            propagator.extract(&HeaderExtractor(req.headers()))
        });

        let (service_name, method_name) = split_grpc_path(&path);
        let span = info_span!(
            target: "grpc",
            "grpc_request",
            otel.name = %method_name,
            otel.kind = "server",
            otel.status_code = field::Empty,
            rpc.system = "grpc",
            rpc.service = %service_name,
            rpc.method = %method_name,
            rpc.grpc.status_code = field::Empty,
            trace_id = field::Empty,
        );
        span.set_parent(parent_context);

        let mut inner = self.inner.clone();

        Box::pin(
            async move {
                let current = Span::current();
                let span_context = current.context().span().span_context().clone();
                if span_context.is_valid() {
                    current.record("trace_id", span_context.trace_id().to_string());
                }

                let result = inner.call(req).await;

                let code = match &result {
                    Ok(response) => response_code(response),
                    Err(_) => Code::Unknown as i32,
                };
                current.record("rpc.grpc.status_code", code);
                if code != Code::Ok as i32 {
                    current.record("otel.status_code", "ERROR");
                }

                result
            }
            .instrument(span),
        )
    }
}

/// Record the status of a handler result on the current span.
pub fn record_grpc_status<T>(result: &Result<tonic::Response<T>, Status>) {
    let code = match result {
        Ok(_) => Code::Ok as i32,
        Err(status) => status.code() as i32,
    };
    Span::current().record("rpc.grpc.status_code", code);
}
