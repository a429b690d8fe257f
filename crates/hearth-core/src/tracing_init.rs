//! Shared tracing/logging initialization.
//!
//! Sets up `tracing_subscriber` with an env-filter and optional JSON output.
//! With the `metrics` feature an OTLP layer can be attached as well.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialise the global tracing subscriber.
///
/// * `default_filter` -- default `RUST_LOG` value when the env-var is not set
///   (e.g. `"hearth_relay=info"`).
/// * `log_json` -- when `true`, emit structured JSON log lines instead of the
///   human-readable format.
pub fn init_tracing(default_filter: &str, log_json: bool) {
    let env_filter = env_filter(default_filter);
    if log_json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

fn env_filter(default_filter: &str) -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.into()),
    )
}

/// Handle returned by [`init_tracing_with_metrics`].
///
/// Holds the OTLP pipeline when one was started; empty otherwise.
#[derive(Default)]
pub struct TelemetryGuard {
    #[cfg(feature = "metrics")]
    metrics: Option<crate::metrics::OtlpPipeline>,
}

impl TelemetryGuard {
    /// Flush and stop the OTLP pipeline, if any.
    pub fn shutdown(self) {
        #[cfg(feature = "metrics")]
        if let Some(guard) = self.metrics {
            if let Err(e) = guard.shutdown() {
                tracing::warn!(error = %e, "OpenTelemetry shutdown failed");
            }
        }
    }
}

/// Like [`init_tracing`], additionally exporting spans and metrics to
/// `metrics_endpoint` when the `metrics` feature is compiled in.
///
/// Falls back to plain logging if the exporter cannot be built.
#[cfg_attr(not(feature = "metrics"), allow(unused_variables))]
pub fn init_tracing_with_metrics(
    default_filter: &str,
    log_json: bool,
    metrics_endpoint: Option<&str>,
) -> TelemetryGuard {
    #[cfg(feature = "metrics")]
    if let Some(endpoint) = metrics_endpoint {
        match crate::metrics::OtlpPipeline::start(endpoint) {
            Ok(guard) => {
                use opentelemetry::trace::TracerProvider as _;
                let tracer = guard.tracer_provider().tracer("hearth");
                let otel = tracing_opentelemetry::layer().with_tracer(tracer);
                let registry = tracing_subscriber::registry()
                    .with(env_filter(default_filter))
                    .with(otel);
                if log_json {
                    registry
                        .with(tracing_subscriber::fmt::layer().json())
                        .init();
                } else {
                    registry.with(tracing_subscriber::fmt::layer()).init();
                }
                tracing::info!(endpoint, "OpenTelemetry export enabled");
                return TelemetryGuard {
                    metrics: Some(guard),
                };
            }
            Err(e) => {
                init_tracing(default_filter, log_json);
                tracing::warn!(error = %e, "OpenTelemetry disabled");
                return TelemetryGuard::default();
            }
        }
    }

    init_tracing(default_filter, log_json);
    TelemetryGuard::default()
}
