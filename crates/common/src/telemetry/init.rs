use anyhow::Result;
use opentelemetry::{trace::TracerProvider, KeyValue};
use opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge;
use opentelemetry_otlp::{LogExporter, WithExportConfig};
use opentelemetry_sdk::{
    logs::{BatchLogProcessor, LoggerProvider},
    propagation::TraceContextPropagator,
    runtime,
    trace::{RandomIdGenerator, Sampler, TracerProvider as SdkTracerProvider},
    Resource,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use super::{TelemetryConfig, TelemetryProviders};

/// Installs the global tracing subscriber.
///
/// Logs are always written to stdout as JSON. With `otel_enabled`, spans and
/// log events are also exported over OTLP/gRPC and W3C trace context becomes
/// the global propagator.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<Option<TelemetryProviders>> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    if !config.otel_enabled {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(json_fmt_layer())
            .init();
        return Ok(None);
    }

    opentelemetry::global::set_text_map_propagator(TraceContextPropagator::new());

    let resource = Resource::new(vec![
        KeyValue::new(
            opentelemetry_semantic_conventions::resource::SERVICE_NAME,
            config.service_name.clone(),
        ),
        KeyValue::new(
            opentelemetry_semantic_conventions::resource::SERVICE_VERSION,
            env!("CARGO_PKG_VERSION"),
        ),
    ]);

    let trace_exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&config.otel_endpoint)
        .build()?;

    let tracer_provider = SdkTracerProvider::builder()
        .with_batch_exporter(trace_exporter, runtime::Tokio)
        .with_sampler(Sampler::AlwaysOn)
        .with_id_generator(RandomIdGenerator::default())
        .with_resource(resource.clone())
        .build();

    let log_exporter = LogExporter::builder()
        .with_tonic()
        .with_endpoint(&config.otel_endpoint)
        .build()?;

    let logger_provider = LoggerProvider::builder()
        .with_log_processor(BatchLogProcessor::builder(log_exporter, runtime::Tokio).build())
        .with_resource(resource)
        .build();

    let tracer = tracer_provider.tracer("lpwan");
    let otel_trace_layer = tracing_opentelemetry::layer().with_tracer(tracer);
    let otel_log_layer = OpenTelemetryTracingBridge::new(&logger_provider);

    // The span layer must run before the log bridge so events see the OTel context.
    tracing_subscriber::registry()
        .with(env_filter)
        .with(otel_trace_layer)
        .with(otel_log_layer)
        .with(json_fmt_layer())
        .init();

    Ok(Some(TelemetryProviders {
        tracer_provider,
        logger_provider,
    }))
}

fn json_fmt_layer<S>() -> impl tracing_subscriber::Layer<S>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    tracing_subscriber::fmt::layer()
        .json()
        .with_span_list(true)
        .with_current_span(true)
}

/// Flushes and shuts down the exporters.
pub fn shutdown_telemetry(providers: Option<TelemetryProviders>) {
    let Some(providers) = providers else {
        return;
    };
    if let Err(e) = providers.tracer_provider.shutdown() {
        eprintln!("Error shutting down tracer provider: {:?}", e);
    }
    if let Err(e) = providers.logger_provider.shutdown() {
        eprintln!("Error shutting down logger provider: {:?}", e);
    }
}
