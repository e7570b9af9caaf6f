use anyhow::{anyhow, Result};
use once_cell::sync::OnceCell;
use opentelemetry::propagation::TextMapCompositePropagator;
use opentelemetry::{global, trace::TracerProvider as _, KeyValue};
use opentelemetry_otlp::{Compression, WithExportConfig, WithTonicConfig};
use opentelemetry_sdk::{
    propagation::{BaggagePropagator, TraceContextPropagator},
    trace::{SdkTracerProvider, Tracer},
    Resource,
};
use std::{env::var, time::Duration};
use tonic::{
    metadata::{MetadataKey, MetadataMap, MetadataValue},
    transport::ClientTlsConfig,
};
use tracing::{debug, Level};
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};

const ENDPOINT_ENV: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";
const HEADERS_ENV: &str = "OTEL_EXPORTER_OTLP_HEADERS";
const EXPORT_TIMEOUT: Duration = Duration::from_secs(3);

static TRACER_PROVIDER: OnceCell<SdkTracerProvider> = OnceCell::new();

/// Where spans go when tracing export is enabled.
#[derive(Debug, PartialEq, Eq)]
struct OtlpSettings {
    endpoint: String,
    headers: Vec<(String, String)>,
}

impl OtlpSettings {
    /// `None` unless an endpoint is configured.
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Option<Self> {
        let endpoint = lookup(ENDPOINT_ENV).filter(|ep| !ep.trim().is_empty())?;
        let endpoint = endpoint.trim().trim_end_matches('/');
        let endpoint = if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            endpoint.to_string()
        } else {
            format!("https://{endpoint}")
        };

        // "k1=v1,k2=v2"; pairs without '=' are ignored
        let headers = lookup(HEADERS_ENV)
            .map(|raw| {
                raw.split(',')
                    .filter_map(|pair| {
                        let (key, value) = pair.split_once('=')?;
                        let key = key.trim().to_ascii_lowercase();
                        (!key.is_empty()).then(|| (key, value.trim().to_string()))
                    })
                    .collect()
            })
            .unwrap_or_default();

        Some(Self { endpoint, headers })
    }

    fn tls_domain(&self) -> Option<&str> {
        self.endpoint
            .strip_prefix("https://")
            .and_then(|rest| rest.split('/').next())
            .and_then(|authority| authority.split(':').next())
    }

    fn metadata(&self) -> Result<MetadataMap> {
        let mut meta = MetadataMap::with_capacity(self.headers.len());
        for (key, value) in &self.headers {
            let name = MetadataKey::from_bytes(key.as_bytes())
                .map_err(|e| anyhow!("invalid OTLP header name {key}: {e}"))?;
            let value: MetadataValue<_> = value
                .parse()
                .map_err(|e| anyhow!("invalid OTLP header value for {key}: {e}"))?;
            meta.insert(name, value);
        }
        Ok(meta)
    }
}

fn init_tracer(settings: &OtlpSettings) -> Result<Tracer> {
    let mut builder = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&settings.endpoint)
        .with_compression(Compression::Gzip)
        .with_timeout(EXPORT_TIMEOUT);

    if let Some(domain) = settings.tls_domain() {
        builder = builder.with_tls_config(
            ClientTlsConfig::new()
                .domain_name(domain.to_string())
                .with_native_roots(),
        );
    }

    if !settings.headers.is_empty() {
        builder = builder.with_metadata(settings.metadata()?);
    }

    let provider = SdkTracerProvider::builder()
        .with_batch_exporter(builder.build()?)
        .with_resource(
            Resource::builder_empty()
                .with_attributes(vec![
                    KeyValue::new("service.name", env!("CARGO_PKG_NAME")),
                    KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
                ])
                .build(),
        )
        .build();

    let _ = TRACER_PROVIDER.set(provider.clone());

    global::set_tracer_provider(provider.clone());
    global::set_text_map_propagator(TextMapCompositePropagator::new(vec![
        Box::new(TraceContextPropagator::new()),
        Box::new(BaggagePropagator::new()),
    ]));

    debug!(endpoint = %settings.endpoint, "OTLP span export enabled");
    Ok(provider.tracer(env!("CARGO_PKG_NAME")))
}

/// Initialize logging, plus the OTLP exporter when
/// `OTEL_EXPORTER_OTLP_ENDPOINT` is set.
///
/// # Errors
/// Returns an error if tracer or subscriber initialization fails.
pub fn init(verbosity_level: Option<Level>) -> Result<()> {
    let verbosity_level = verbosity_level.unwrap_or(Level::ERROR);

    let fmt_layer = fmt::layer()
        .with_file(false)
        .with_line_number(false)
        .with_thread_ids(false)
        .with_target(false)
        .pretty();

    let filter = EnvFilter::builder()
        .with_default_directive(verbosity_level.into())
        .from_env_lossy()
        .add_directive("hyper=error".parse()?)
        .add_directive("tokio=error".parse()?)
        .add_directive("sqlx=warn".parse()?)
        .add_directive("opentelemetry_sdk=warn".parse()?);

    if let Some(settings) = OtlpSettings::from_lookup(|name| var(name).ok()) {
        let otel_layer = tracing_opentelemetry::layer().with_tracer(init_tracer(&settings)?);
        let subscriber = Registry::default()
            .with(fmt_layer)
            .with(otel_layer)
            .with(filter);
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = Registry::default().with(fmt_layer).with(filter);
        tracing::subscriber::set_global_default(subscriber)?;
    }

    Ok(())
}

/// Flush and stop the tracer provider, if one was installed.
pub fn shutdown_tracer() {
    if let Some(tp) = TRACER_PROVIDER.get() {
        debug!("shutting down tracer provider");
        let _ = tp.shutdown();
    }
}
