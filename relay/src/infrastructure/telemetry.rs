//! Logging, tracing and metrics setup.

use std::net::{AddrParseError, SocketAddr};
use std::path::PathBuf;

use metrics_exporter_prometheus::PrometheusBuilder;
use opentelemetry::KeyValue;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::trace::{Sampler, SdkTracerProvider};
use opentelemetry_semantic_conventions::resource::SERVICE_VERSION;
use thiserror::Error;
use tracing::warn;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::ParseError;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

use crate::infrastructure::config::TelemetrySettings;

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("invalid log filter: {0}")]
    Filter(#[from] ParseError),
    #[error("failed to install subscriber: {0}")]
    Subscriber(#[from] TryInitError),
    #[error("failed to build span exporter: {0}")]
    Exporter(String),
    #[error("failed to install metrics exporter: {0}")]
    Metrics(String),
    #[error("invalid metrics address {addr}: {source}")]
    MetricsAddress {
        addr: String,
        source: AddrParseError,
    },
}

pub struct TelemetryBuilder {
    service_name: String,
    version: String,
    log_level: String,
    json: bool,
    log_dir: Option<PathBuf>,
    otlp_endpoint: Option<String>,
    sampling_ratio: f64,
    metrics_addr: Option<SocketAddr>,
}

impl TelemetryBuilder {
    pub fn new(service_name: &str, version: &str) -> Self {
        Self {
            service_name: service_name.to_string(),
            version: version.to_string(),
            log_level: "info".to_string(),
            json: false,
            log_dir: None,
            otlp_endpoint: None,
            sampling_ratio: 1.0,
            metrics_addr: None,
        }
    }

    /// Applies every telemetry setting from configuration.
    pub fn from_settings(
        service_name: &str,
        version: &str,
        settings: &TelemetrySettings,
    ) -> Result<Self, TelemetryError> {
        let mut builder = Self::new(service_name, version)
            .with_log_level(&settings.log_level)
            .with_json(settings.json_logs)
            .with_sampling_ratio(settings.sampling_ratio);

        if let Some(dir) = &settings.log_dir {
            builder = builder.with_log_dir(dir);
        }
        if let Some(endpoint) = &settings.otlp_endpoint {
            builder = builder.with_tracing(endpoint);
        }
        if let Some(addr) = &settings.metrics_addr {
            let parsed = addr
                .parse()
                .map_err(|source| TelemetryError::MetricsAddress {
                    addr: addr.clone(),
                    source,
                })?;
            builder = builder.with_metrics(parsed);
        }
        Ok(builder)
    }

    /// Used when `RUST_LOG` is not set.
    pub fn with_log_level(mut self, level: &str) -> Self {
        self.log_level = level.to_string();
        self
    }

    pub fn with_json(mut self, json: bool) -> Self {
        self.json = json;
        self
    }

    /// Also writes JSON logs to a daily rolling file in `dir`.
    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(dir.into());
        self
    }

    pub fn with_sampling_ratio(mut self, ratio: f64) -> Self {
        self.sampling_ratio = ratio.clamp(0.0, 1.0);
        self
    }

    /// Exports spans over OTLP/gRPC to `endpoint`.
    pub fn with_tracing(mut self, endpoint: &str) -> Self {
        self.otlp_endpoint = Some(endpoint.to_string());
        self
    }

    /// Serves Prometheus metrics on `addr`.
    pub fn with_metrics(mut self, addr: SocketAddr) -> Self {
        self.metrics_addr = Some(addr);
        self
    }

    /// Installs the global subscriber (and metrics recorder, if configured).
    /// Must be called from within a Tokio runtime.
    pub fn init(self) -> Result<TelemetryGuard, TelemetryError> {
        let filter = match EnvFilter::try_from_default_env() {
            Ok(filter) => filter,
            Err(_) => EnvFilter::try_new(&self.log_level)?,
        };

        let mut layers: Vec<BoxedLayer> = Vec::new();
        layers.push(if self.json {
            fmt::layer().json().boxed()
        } else {
            fmt::layer().boxed()
        });

        let mut file_guard = None;
        if let Some(dir) = &self.log_dir {
            let appender =
                tracing_appender::rolling::daily(dir, format!("{}.log", self.service_name));
            let (writer, guard) = tracing_appender::non_blocking(appender);
            layers.push(
                fmt::layer()
                    .json()
                    .with_ansi(false)
                    .with_writer(writer)
                    .boxed(),
            );
            file_guard = Some(guard);
        }

        let mut tracer_provider = None;
        if let Some(endpoint) = &self.otlp_endpoint {
            let provider = self.build_tracer_provider(endpoint)?;
            let tracer = provider.tracer(self.service_name.clone());
            layers.push(tracing_opentelemetry::layer().with_tracer(tracer).boxed());
            opentelemetry::global::set_tracer_provider(provider.clone());
            tracer_provider = Some(provider);
        }

        if let Some(addr) = self.metrics_addr {
            PrometheusBuilder::new()
                .with_http_listener(addr)
                .install()
                .map_err(|e| TelemetryError::Metrics(e.to_string()))?;
        }

        tracing_subscriber::registry()
            .with(layers)
            .with(filter)
            .try_init()?;

        Ok(TelemetryGuard {
            _file_guard: file_guard,
            tracer_provider,
        })
    }

    fn build_tracer_provider(&self, endpoint: &str) -> Result<SdkTracerProvider, TelemetryError> {
        let exporter = opentelemetry_otlp::SpanExporter::builder()
            .with_tonic()
            .with_endpoint(endpoint)
            .build()
            .map_err(|e| TelemetryError::Exporter(e.to_string()))?;

        let resource = Resource::builder()
            .with_service_name(self.service_name.clone())
            .with_attribute(KeyValue::new(SERVICE_VERSION, self.version.clone()))
            .build();

        Ok(SdkTracerProvider::builder()
            .with_batch_exporter(exporter)
            .with_sampler(Sampler::ParentBased(Box::new(Sampler::TraceIdRatioBased(
                self.sampling_ratio,
            ))))
            .with_resource(resource)
            .build())
    }
}

/// Keeps background log writers and span exporters alive. Dropping it
/// flushes pending output.
pub struct TelemetryGuard {
    _file_guard: Option<WorkerGuard>,
    tracer_provider: Option<SdkTracerProvider>,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.tracer_provider.take() {
            if let Err(e) = provider.shutdown() {
                warn!(error = %e, "Tracer provider shutdown failed");
            }
        }
    }
}
