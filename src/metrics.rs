//! Resolver metrics
//!
//! Handles are registered against the global recorder when [`Metrics::new`]
//! runs. The binary installs a Prometheus recorder when a metrics port is
//! configured; otherwise recording is a no-op unless the embedding
//! application installs its own recorder first.

use crate::ResolveError;
use metrics::{register_counter, register_gauge, register_histogram, Counter, Gauge, Histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::info;

/// Installs the global Prometheus recorder with a `/metrics` listener on
/// `port`. Must run inside the tokio runtime and before [`Metrics::new`].
pub fn install_prometheus_exporter(port: u16) -> Result<SocketAddr, ResolveError> {
    let address = SocketAddr::from(([0, 0, 0, 0], port));

    PrometheusBuilder::new()
        .with_http_listener(address)
        .install()
        .map_err(|e| {
            ResolveError::ConfigurationError(format!(
                "Failed to start metrics exporter on {address}: {e}"
            ))
        })?;

    info!("Serving Prometheus metrics on http://{}/metrics", address);
    Ok(address)
}

pub struct Metrics {
    pub links_resolved: Counter,
    pub links_failed: Counter,
    pub link_duration: Histogram,
    pub media_items: Counter,
    pub links_in_flight: Gauge,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            links_resolved: register_counter!("links_resolved"),
            links_failed: register_counter!("links_failed"),
            link_duration: register_histogram!("link_duration_seconds"),
            media_items: register_counter!("media_items"),
            links_in_flight: register_gauge!("links_in_flight"),
        }
    }

    pub fn link_started(&self) {
        self.links_in_flight.increment(1.0);
    }

    pub fn record_link(&self, duration: Duration, media_count: usize) {
        self.links_in_flight.decrement(1.0);
        self.links_resolved.increment(1);
        self.media_items.increment(media_count as u64);
        self.link_duration.record(duration.as_secs_f64());
    }

    pub fn record_failure(&self, duration: Duration, error: &ResolveError) {
        self.links_in_flight.decrement(1.0);
        self.links_failed.increment(1);
        register_counter!("links_failed_by_kind", "kind" => error.kind()).increment(1);
        self.link_duration.record(duration.as_secs_f64());
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
