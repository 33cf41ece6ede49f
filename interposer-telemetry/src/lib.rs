// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Interposer telemetry (metrics + tracing + logging).

use opentelemetry::trace::TracerProvider;
use opentelemetry::{
    metrics::{Counter, Histogram, Meter, MeterProvider},
    KeyValue,
};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Dispatch metrics registry.
pub struct Metrics {
    pub events_published: Counter<u64>,
    pub handlers_invoked: Counter<u64>,
    pub handler_failures: Counter<u64>,
    pub sessions_aborted: Counter<u64>,
    pub chains_short_circuited: Counter<u64>,
    pub dispatch_latency_ms: Histogram<f64>,
}

impl Metrics {
    pub fn new(meter: &Meter) -> Self {
        Self {
            events_published: meter
                .u64_counter("interposer.events.published")
                .with_description("Lifecycle events published to the bus")
                .init(),
            handlers_invoked: meter
                .u64_counter("interposer.handlers.invoked")
                .with_description("Plugin handlers invoked")
                .init(),
            handler_failures: meter
                .u64_counter("interposer.handlers.failed")
                .with_description("Plugin handlers that failed, timed out or panicked")
                .init(),
            sessions_aborted: meter
                .u64_counter("interposer.sessions.aborted")
                .with_description("Sessions aborted during dispatch")
                .init(),
            chains_short_circuited: meter
                .u64_counter("interposer.chains.short_circuited")
                .with_description("Handler chains stopped early by a plugin")
                .init(),
            dispatch_latency_ms: meter
                .f64_histogram("interposer.dispatch.latency_ms")
                .with_description("Time to run one event's handler chain")
                .init(),
        }
    }

    /// Metrics bound to a private, non-exporting meter provider.
    pub fn detached(service_name: &str) -> Self {
        let provider = SdkMeterProvider::default();
        Self::new(&provider.meter(service_name.to_string()))
    }

    pub fn record_publish(&self, event: &'static str, outcome: &'static str, latency_ms: f64) {
        let attrs = [
            KeyValue::new("event", event),
            KeyValue::new("outcome", outcome),
        ];
        self.events_published.add(1, &attrs);
        self.dispatch_latency_ms.record(latency_ms, &attrs);

        match outcome {
            "aborted" => self.sessions_aborted.add(1, &attrs[..1]),
            "short_circuited" => self.chains_short_circuited.add(1, &attrs[..1]),
            _ => {}
        }
    }

    pub fn record_handler(&self, plugin: &str, event: &'static str) {
        self.handlers_invoked.add(
            1,
            &[
                KeyValue::new("plugin", plugin.to_string()),
                KeyValue::new("event", event),
            ],
        );
    }

    pub fn record_failure(&self, plugin: &str, event: &'static str, kind: &'static str) {
        self.handler_failures.add(
            1,
            &[
                KeyValue::new("plugin", plugin.to_string()),
                KeyValue::new("event", event),
                KeyValue::new("kind", kind),
            ],
        );
    }
}

/// Install a plain fmt subscriber.
///
/// `RUST_LOG` takes precedence over `default_filter`.
pub fn init_logging(default_filter: &str) -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;
    Ok(())
}

/// Initialize telemetry (tracing + metrics).
pub fn init_telemetry(service_name: &str, otlp_endpoint: Option<&str>) -> anyhow::Result<Metrics> {
    let tracer_provider = if let Some(endpoint) = otlp_endpoint {
        opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(opentelemetry_otlp::new_exporter().tonic().with_endpoint(endpoint))
            .with_trace_config(
                opentelemetry_sdk::trace::Config::default().with_resource(
                    opentelemetry_sdk::Resource::new(vec![KeyValue::new(
                        "service.name",
                        service_name.to_string(),
                    )]),
                ),
            )
            .install_batch(opentelemetry_sdk::runtime::Tokio)?
    } else {
        opentelemetry_sdk::trace::TracerProvider::builder().build()
    };

    let tracer = tracer_provider.tracer(service_name.to_string());

    let meter_provider = if let Some(endpoint) = otlp_endpoint {
        opentelemetry_otlp::new_pipeline()
            .metrics(opentelemetry_sdk::runtime::Tokio)
            .with_exporter(opentelemetry_otlp::new_exporter().tonic().with_endpoint(endpoint))
            .build()?
    } else {
        SdkMeterProvider::default()
    };

    let meter = meter_provider.meter(service_name.to_string());
    let metrics = Metrics::new(&meter);

    let fmt_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(fmt_layer)
        .with(otel_layer)
        .try_init()?;

    Ok(metrics)
}
