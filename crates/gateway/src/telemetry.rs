//! Tracing/logging bootstrap. JSON structured logs always go to stdout;
//! when `observability.otlp_endpoint` is configured, every span is also
//! forwarded to an OTLP/gRPC collector (Jaeger, Tempo, etc.) alongside it.

use opentelemetry::trace::TracerProvider as _;
use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::{Sampler, SdkTracerProvider};
use opentelemetry_sdk::Resource;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry};

use sa_domain::config::ObservabilityConfig;

/// Holds the OTel tracer provider alive for the process lifetime; dropping
/// it flushes any batched spans, so this must be kept in `main`'s scope
/// until shutdown.
pub struct TelemetryGuard {
    provider: Option<SdkTracerProvider>,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(provider) = &self.provider {
            if let Err(e) = provider.shutdown() {
                eprintln!("otel tracer provider shutdown failed: {e}");
            }
        }
    }
}

pub fn init(config: &ObservabilityConfig) -> TelemetryGuard {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("serialagent=info,tower_http=info"));
    let fmt_layer = tracing_subscriber::fmt::layer().json();

    let Some(endpoint) = &config.otlp_endpoint else {
        Registry::default().with(env_filter).with(fmt_layer).init();
        return TelemetryGuard { provider: None };
    };

    let exporter = match opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint.clone())
        .build()
    {
        Ok(exporter) => exporter,
        Err(e) => {
            Registry::default().with(env_filter).with(fmt_layer).init();
            tracing::warn!(error = %e, endpoint = %endpoint, "failed to build OTLP exporter, continuing with JSON logs only");
            return TelemetryGuard { provider: None };
        }
    };

    let resource = Resource::builder()
        .with_attribute(KeyValue::new("service.name", config.service_name.clone()))
        .build();

    let provider = SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_sampler(Sampler::TraceIdRatioBased(config.sample_rate))
        .with_resource(resource)
        .build();

    opentelemetry::global::set_tracer_provider(provider.clone());
    let tracer = provider.tracer("serialagent");
    let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);

    Registry::default()
        .with(env_filter)
        .with(fmt_layer)
        .with(otel_layer)
        .init();

    tracing::info!(endpoint = %endpoint, "OTLP trace export enabled");
    TelemetryGuard {
        provider: Some(provider),
    }
}
