//! OTLP export of spans and relay counters.
//!
//! Compiled only with the `metrics` Cargo feature.

use opentelemetry::KeyValue;
use opentelemetry::global;
use opentelemetry::metrics::Counter;
use opentelemetry_otlp::{MetricExporter, SpanExporter, WithExportConfig};
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::trace::SdkTracerProvider;

#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("failed to build OTLP exporter: {0}")]
    ExporterBuild(#[from] opentelemetry_otlp::ExporterBuildError),

    #[error("OpenTelemetry SDK error: {0}")]
    Sdk(#[from] opentelemetry_sdk::error::OTelSdkError),
}

/// Installed trace and meter providers.
///
/// Dropping this does not flush; call [`OtlpPipeline::shutdown`] on exit.
pub struct OtlpPipeline {
    tracer_provider: SdkTracerProvider,
    meter_provider: SdkMeterProvider,
}

impl OtlpPipeline {
    /// Build gRPC exporters for `endpoint` and install both providers globally.
    pub fn start(endpoint: &str) -> Result<Self, MetricsError> {
        let spans = SpanExporter::builder()
            .with_tonic()
            .with_endpoint(endpoint)
            .build()?;
        let metrics = MetricExporter::builder()
            .with_tonic()
            .with_endpoint(endpoint)
            .build()?;

        let tracer_provider = SdkTracerProvider::builder()
            .with_batch_exporter(spans)
            .build();
        let meter_provider = SdkMeterProvider::builder()
            .with_periodic_exporter(metrics)
            .build();
        global::set_tracer_provider(tracer_provider.clone());
        global::set_meter_provider(meter_provider.clone());

        Ok(Self {
            tracer_provider,
            meter_provider,
        })
    }

    pub const fn tracer_provider(&self) -> &SdkTracerProvider {
        &self.tracer_provider
    }

    pub fn shutdown(self) -> Result<(), MetricsError> {
        self.tracer_provider.shutdown()?;
        self.meter_provider.shutdown()?;
        Ok(())
    }
}

/// Relay counters on the global meter. A no-op until a pipeline is started.
#[derive(Clone)]
pub struct RelayMetrics {
    relays: Counter<u64>,
    relay_failures: Counter<u64>,
    viewers: Counter<u64>,
}

impl RelayMetrics {
    pub fn new() -> Self {
        let meter = global::meter("hearth_relay");
        Self {
            relays: meter
                .u64_counter("hearth.relay.sessions")
                .with_description("Hub relays that reached the relaying phase")
                .build(),
            relay_failures: meter
                .u64_counter("hearth.relay.failures")
                .with_description("Hub relays closed with an application close code")
                .build(),
            viewers: meter
                .u64_counter("hearth.livestream.subscriptions")
                .with_description("Accepted livestream subscriptions")
                .build(),
        }
    }

    pub fn relay_started(&self) {
        self.relays.add(1, &[]);
    }

    pub fn relay_failed(&self, close_code: u16) {
        self.relay_failures
            .add(1, &[KeyValue::new("close_code", i64::from(close_code))]);
    }

    pub fn viewer_joined(&self, camera_id: &str) {
        self.viewers
            .add(1, &[KeyValue::new("camera_id", camera_id.to_string())]);
    }
}

impl Default for RelayMetrics {
    fn default() -> Self {
        Self::new()
    }
}
