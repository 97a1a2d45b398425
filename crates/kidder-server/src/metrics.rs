//! Metrics collection and export for Kidder.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use kidder_core::hub::metric_names as hub_names;
use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "kidder_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "kidder_connections_active";
    pub const UPLOADS_TOTAL: &str = "kidder_uploads_total";
    pub const UPLOADS_BYTES: &str = "kidder_uploads_bytes";
    pub const ERRORS_TOTAL: &str = "kidder_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of active connections"
    );
    metrics::describe_counter!(names::UPLOADS_TOTAL, "Total number of stored uploads");
    metrics::describe_counter!(names::UPLOADS_BYTES, "Total bytes of stored uploads");
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");
    metrics::describe_counter!(
        hub_names::MESSAGES_ACCEPTED,
        "Messages persisted and queued for broadcast"
    );
    metrics::describe_counter!(
        hub_names::STORAGE_ERRORS,
        "Messages dropped because storage failed"
    );
    metrics::describe_counter!(
        hub_names::DELIVERY_FAILURES,
        "Participants dropped because a broadcast write failed"
    );
    metrics::describe_histogram!(
        hub_names::FANOUT_SECONDS,
        "Time to deliver one broadcast to all participants"
    );

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a new connection.
pub fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record a disconnection.
pub fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record a stored upload.
pub fn record_upload(bytes: usize) {
    counter!(names::UPLOADS_TOTAL).increment(1);
    counter!(names::UPLOADS_BYTES).increment(bytes as u64);
}

/// Record an error.
pub fn record_error(error_type: &str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type.to_string()).increment(1);
}

/// Metrics guard that records disconnection on drop.
pub struct ConnectionMetricsGuard;

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new() -> Self {
        record_connection();
        Self
    }
}

impl Default for ConnectionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        record_disconnection();
    }
}
