use std::sync::OnceLock;

use anyhow::Context as _;
use http::HeaderMap;
use opentelemetry::Context;
use opentelemetry::propagation::Extractor;
use tracing_opentelemetry::OpenTelemetrySpanExt as _;

static PROPAGATOR_INSTALLED: OnceLock<()> = OnceLock::new();

#[derive(Debug, Clone)]
pub struct TracingInitOptions<'a> {
    pub service_name: &'a str,
    pub service_version: &'a str,
    pub default_env_filter: &'a str,
}

fn ensure_propagator_installed() {
    PROPAGATOR_INSTALLED.get_or_init(|| {
        opentelemetry::global::set_text_map_propagator(
            opentelemetry_sdk::propagation::TraceContextPropagator::new(),
        );
    });
}

fn is_truthy(v: &str) -> bool {
    matches!(
        v.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn otel_enabled() -> bool {
    // Standard OTel env var or the ipgeo-specific switch.
    non_empty_env("OTEL_EXPORTER_OTLP_ENDPOINT").is_some()
        || non_empty_env("IPGEO_OTEL").is_some_and(|v| is_truthy(&v))
}

fn join_otlp_endpoint(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    format!("{base}{path}")
}

fn otlp_traces_endpoint() -> String {
    if let Some(v) = non_empty_env("OTEL_EXPORTER_OTLP_TRACES_ENDPOINT") {
        return v;
    }
    // Local collector default, only reached when IPGEO_OTEL is set without an endpoint.
    let base = non_empty_env("OTEL_EXPORTER_OTLP_ENDPOINT")
        .unwrap_or_else(|| "http://127.0.0.1:4318".to_string());
    join_otlp_endpoint(&base, "/v1/traces")
}

/// Install the global subscriber.
///
/// Logs are JSON lines on stderr: stdout belongs to the stdio transport.
pub fn init_tracing(opts: TracingInitOptions<'_>) -> anyhow::Result<()> {
    ensure_propagator_installed();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| opts.default_env_filter.into());

    if otel_enabled() {
        use opentelemetry::KeyValue;
        use opentelemetry::trace::TracerProvider as _;
        use opentelemetry_otlp::{Protocol, WithExportConfig as _};
        use opentelemetry_sdk::trace::{Sampler, SdkTracerProvider};
        use tracing_subscriber::layer::SubscriberExt as _;
        use tracing_subscriber::util::SubscriberInitExt as _;

        let resource = opentelemetry_sdk::Resource::builder()
            .with_service_name(opts.service_name.to_string())
            .with_attributes([KeyValue::new(
                opentelemetry_semantic_conventions::resource::SERVICE_VERSION,
                opts.service_version.to_string(),
            )])
            .build();

        let span_exporter = opentelemetry_otlp::SpanExporter::builder()
            .with_http()
            .with_endpoint(otlp_traces_endpoint())
            .with_protocol(Protocol::HttpBinary)
            .build()
            .context("build otlp span exporter")?;

        let tracer_provider = SdkTracerProvider::builder()
            .with_batch_exporter(span_exporter)
            .with_sampler(Sampler::ParentBased(Box::new(Sampler::AlwaysOn)))
            .with_resource(resource)
            .build();
        let tracer = tracer_provider.tracer(opts.service_name.to_string());
        opentelemetry::global::set_tracer_provider(tracer_provider);

        let fmt_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr);
        let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .with(otel_layer)
            .try_init()
            .context("install tracing subscriber")?;
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .json()
            .try_init()
            .map_err(|e| anyhow::anyhow!(e))
            .context("install tracing subscriber")?;
    }
    Ok(())
}

/// W3C trace context carried by an inbound HTTP request, if any.
pub fn extract_trace_context(headers: &HeaderMap) -> Context {
    ensure_propagator_installed();
    opentelemetry::global::get_text_map_propagator(|prop| {
        prop.extract(&HeaderExtractor { headers })
    })
}

/// Parent `span` on the caller's trace when the request carries one.
pub fn link_remote_parent(span: &tracing::Span, headers: &HeaderMap) {
    let cx = extract_trace_context(headers);
    let _ = span.set_parent(cx);
}

struct HeaderExtractor<'a> {
    headers: &'a HeaderMap,
}

impl Extractor for HeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.headers.get(key).and_then(|v| v.to_str().ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.headers.keys().map(|k| k.as_str()).collect()
    }
}
