//! Tracing setup for processes embedding the signer: a compact stdout layer, optionally paired
//! with an OpenTelemetry span exporter.
use std::env;

use opentelemetry::{trace::TracerProvider, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{trace::SdkTracerProvider, Resource};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Environment variable holding the OTLP collector endpoint.
pub const OTLP_URL_ENVVAR: &str = "BIFROST_OTLP_URL";

/// Environment variable holding a label that distinguishes several signers in one deployment.
pub const SVC_LABEL_ENVVAR: &str = "BIFROST_SVC_LABEL";

/// Name of the tracer spans are exported under.
const TRACER_NAME: &str = "bifrost-signer";

/// How the logging subsystem is set up.
#[derive(Debug, Clone)]
pub struct LoggerConfig {
    /// Identifies this process in log lines and exported spans.
    whoami: String,

    /// OTLP collector spans are exported to, if any.
    otel_url: Option<String>,
}

impl LoggerConfig {
    /// Creates a config that logs to stdout only.
    pub const fn new(whoami: String) -> Self {
        Self {
            whoami,
            otel_url: None,
        }
    }

    /// Creates a stdout-only config named after `base` and the service label, if set.
    pub fn with_base_name(base: &str) -> Self {
        let label = env::var(SVC_LABEL_ENVVAR).ok();
        Self::new(whoami_string(base, label.as_deref()))
    }

    /// Like [`Self::with_base_name`], also exporting spans when [`OTLP_URL_ENVVAR`] is set.
    pub fn from_env(base: &str) -> Self {
        let mut config = Self::with_base_name(base);
        config.otel_url = env::var(OTLP_URL_ENVVAR).ok();
        config
    }

    /// Exports spans to the collector at `url`.
    pub fn set_otlp_url(&mut self, url: String) {
        self.otel_url = Some(url);
    }

    /// The name this process logs under.
    pub fn whoami(&self) -> &str {
        &self.whoami
    }
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self::from_env("(bifrost-signer)")
    }
}

/// Installs the global subscriber described by `config`.
///
/// Filtering follows `RUST_LOG`. `LOG_FILE=1` and `LOG_LINE_NUM=1` annotate events with their
/// source location. If the span exporter cannot be built, logging continues on stdout only.
pub fn init(config: LoggerConfig) {
    let with_file = env_flag("LOG_FILE");
    let with_line = env_flag("LOG_LINE_NUM");

    let stdout_layer = tracing_subscriber::fmt::layer()
        .compact()
        .event_format(
            tracing_subscriber::fmt::format()
                .with_file(with_file)
                .with_line_number(with_line),
        )
        .with_filter(EnvFilter::from_default_env());

    let Some(otel_url) = config.otel_url.as_deref() else {
        tracing_subscriber::registry().with(stdout_layer).init();
        info!(whoami = %config.whoami, "logging started");
        return;
    };

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(otel_url)
        .build();

    let exporter = match exporter {
        Ok(exporter) => exporter,
        Err(err) => {
            tracing_subscriber::registry().with(stdout_layer).init();
            warn!(whoami = %config.whoami, %otel_url, %err, "span exporter unavailable, logging to stdout only");
            return;
        }
    };

    let provider = SdkTracerProvider::builder()
        .with_resource(
            Resource::builder()
                .with_attribute(KeyValue::new("service.name", config.whoami.clone()))
                .build(),
        )
        .with_batch_exporter(exporter)
        .build();
    let otel_layer = tracing_opentelemetry::layer().with_tracer(provider.tracer(TRACER_NAME));

    tracing_subscriber::registry()
        .with(stdout_layer)
        .with(otel_layer)
        .init();
    info!(whoami = %config.whoami, %otel_url, "logging started");
}

fn env_flag(name: &str) -> bool {
    env::var(name).is_ok_and(|v| v == "1")
}

fn whoami_string(base: &str, label: Option<&str>) -> String {
    match label {
        Some(label) => format!("{base}%{label}"),
        None => base.to_owned(),
    }
}
