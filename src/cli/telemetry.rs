use anyhow::{anyhow, Result};
use opentelemetry::{trace::TracerProvider as _, KeyValue};
use opentelemetry_otlp::{WithExportConfig, WithTonicConfig};
use opentelemetry_sdk::{
    runtime,
    trace::{Tracer, TracerProvider},
    Resource,
};
use std::{env::var, sync::OnceLock, time::Duration};
use tonic::{
    metadata::{Ascii, MetadataKey, MetadataMap, MetadataValue},
    transport::ClientTlsConfig,
};
use tracing::{debug, Level};
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};
use ulid::Ulid;

static TRACER_PROVIDER: OnceLock<TracerProvider> = OnceLock::new();

/// OTLP/gRPC span exporter settings taken from the standard OTEL variables.
#[derive(Debug, PartialEq, Eq)]
struct Exporter {
    endpoint: String,
    headers: Vec<(String, String)>,
}

impl Exporter {
    /// `None` unless `OTEL_EXPORTER_OTLP_ENDPOINT` is set.
    fn from_env() -> Option<Self> {
        let endpoint = var("OTEL_EXPORTER_OTLP_ENDPOINT").ok()?;
        let headers = var("OTEL_EXPORTER_OTLP_HEADERS").unwrap_or_default();
        Some(Self::new(&endpoint, &headers))
    }

    /// Endpoints without a scheme are taken as `https`. `headers` is the
    /// `key=value,key=value` form; malformed pairs are skipped.
    fn new(endpoint: &str, headers: &str) -> Self {
        let endpoint = if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            endpoint.to_string()
        } else {
            format!("https://{}", endpoint.trim_end_matches('/'))
        };
        let headers = headers
            .split(',')
            .filter_map(|pair| {
                let (key, value) = pair.split_once('=')?;
                Some((key.trim().to_ascii_lowercase(), value.trim().to_string()))
            })
            .collect();
        Self { endpoint, headers }
    }

    fn tls_domain(&self) -> Option<&str> {
        let authority = self.endpoint.strip_prefix("https://")?.split('/').next()?;
        authority.split(':').next()
    }

    fn metadata(&self) -> Result<MetadataMap> {
        let mut metadata = MetadataMap::with_capacity(self.headers.len());
        for (key, value) in &self.headers {
            let name = MetadataKey::<Ascii>::from_bytes(key.as_bytes())
                .map_err(|e| anyhow!("invalid OTLP header name {key}: {e}"))?;
            let value: MetadataValue<Ascii> = value
                .parse()
                .map_err(|e| anyhow!("invalid OTLP header value for {key}: {e}"))?;
            metadata.insert(name, value);
        }
        Ok(metadata)
    }

    /// Builds the batch exporter and keeps its provider for [`shutdown_tracer`].
    fn install(&self) -> Result<Tracer> {
        let mut builder = opentelemetry_otlp::SpanExporter::builder()
            .with_tonic()
            .with_endpoint(&self.endpoint)
            .with_timeout(Duration::from_secs(3))
            .with_metadata(self.metadata()?);
        if let Some(domain) = self.tls_domain() {
            builder = builder.with_tls_config(
                ClientTlsConfig::new()
                    .domain_name(domain.to_string())
                    .with_native_roots(),
            );
        }

        let provider = TracerProvider::builder()
            .with_batch_exporter(builder.build()?, runtime::Tokio)
            .with_resource(Resource::new(vec![
                KeyValue::new("service.name", env!("CARGO_PKG_NAME")),
                KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
                KeyValue::new("service.instance.id", Ulid::new().to_string()),
            ]))
            .build();
        let tracer = provider.tracer(env!("CARGO_PKG_NAME"));
        let _ = TRACER_PROVIDER.set(provider);
        debug!(endpoint = %self.endpoint, "OTLP exporter installed");
        Ok(tracer)
    }
}

/// Initialize logging and, when `OTEL_EXPORTER_OTLP_ENDPOINT` is set, the
/// OTLP trace exporter.
///
/// # Errors
///
/// Returns an error if tracer or subscriber initialization fails
pub fn init(verbosity_level: Option<Level>) -> Result<()> {
    let verbosity_level = verbosity_level.unwrap_or(Level::ERROR);

    let fmt_layer = fmt::layer()
        .with_file(false)
        .with_line_number(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_target(false);

    // RUST_LOG overrides the verbosity flag
    let filter = EnvFilter::builder()
        .with_default_directive(verbosity_level.into())
        .from_env_lossy()
        .add_directive("hyper=error".parse()?)
        .add_directive("tokio=error".parse()?)
        .add_directive("sqlx=warn".parse()?)
        .add_directive("opentelemetry_sdk=warn".parse()?);

    let otel_layer = Exporter::from_env()
        .map(|exporter| exporter.install())
        .transpose()?
        .map(|tracer| tracing_opentelemetry::layer().with_tracer(tracer));

    let subscriber = Registry::default()
        .with(fmt_layer)
        .with(otel_layer)
        .with(filter);
    tracing::subscriber::set_global_default(subscriber)?;

    Ok(())
}

/// Flush and shut down the tracer provider (noop if not initialized)
pub fn shutdown_tracer() {
    if let Some(provider) = TRACER_PROVIDER.get() {
        debug!("shutting down tracer provider");
        let _ = provider.shutdown();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_scheme_defaults_to_https() {
        assert_eq!(
            Exporter::new("http://localhost:4317", "").endpoint,
            "http://localhost:4317"
        );
        assert_eq!(
            Exporter::new("collector.example.com:4317/", "").endpoint,
            "https://collector.example.com:4317"
        );
    }

    #[test]
    fn tls_only_for_https() {
        let exporter = Exporter::new("https://collector.example.com:4317/v1/traces", "");
        assert_eq!(exporter.tls_domain(), Some("collector.example.com"));
        assert_eq!(Exporter::new("http://localhost:4317", "").tls_domain(), None);
    }

    #[test]
    fn headers_skip_malformed_pairs() {
        let exporter = Exporter::new("localhost:4317", "Authorization = Bearer t0ken ,broken,x-team=qa");
        assert_eq!(
            exporter.headers,
            vec![
                ("authorization".to_string(), "Bearer t0ken".to_string()),
                ("x-team".to_string(), "qa".to_string()),
            ]
        );
        assert_eq!(exporter.metadata().unwrap().len(), 2);
        assert!(Exporter::new("localhost:4317", "").headers.is_empty());
    }

    #[test]
    fn invalid_header_name_is_an_error() {
        let exporter = Exporter::new("localhost:4317", "bad key=value");
        assert!(exporter.metadata().is_err());
    }

    #[test]
    fn shutdown_without_provider() {
        shutdown_tracer();
    }
}
