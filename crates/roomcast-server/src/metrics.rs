//! Metrics collection and export for roomcast.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use roomcast_core::{CloseReason, DispatchOutcome};
use std::net::SocketAddr;
use std::time::Duration;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "roomcast_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "roomcast_connections_active";
    pub const DISCONNECTS_TOTAL: &str = "roomcast_disconnects_total";
    pub const EVENTS_TOTAL: &str = "roomcast_events_total";
    pub const EVENTS_DROPPED_TOTAL: &str = "roomcast_events_dropped_total";
    pub const DELIVERIES_TOTAL: &str = "roomcast_deliveries_total";
    pub const ROOMS_ACTIVE: &str = "roomcast_rooms_active";
    pub const DISPATCH_LATENCY_SECONDS: &str = "roomcast_dispatch_latency_seconds";
    pub const ERRORS_TOTAL: &str = "roomcast_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of subscriber connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of subscriber connections"
    );
    metrics::describe_counter!(
        names::DISCONNECTS_TOTAL,
        "Subscriber disconnections by reason"
    );
    metrics::describe_counter!(names::EVENTS_TOTAL, "Events dispatched by kind");
    metrics::describe_counter!(
        names::EVENTS_DROPPED_TOTAL,
        "Events dropped because the dispatch queue was full or closed"
    );
    metrics::describe_counter!(
        names::DELIVERIES_TOTAL,
        "Per-subscriber deliveries by outcome"
    );
    metrics::describe_gauge!(names::ROOMS_ACTIVE, "Rooms with at least one subscriber");
    metrics::describe_histogram!(
        names::DISPATCH_LATENCY_SECONDS,
        "Time from event creation to completed fan-out in seconds"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

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

/// Record a new subscriber connection.
pub fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record a subscriber disconnection.
pub fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record why a subscribed connection ended.
pub fn record_close_reason(reason: CloseReason) {
    let reason = match reason {
        CloseReason::ClientClosed => "client_closed",
        CloseReason::TransportError => "transport_error",
        CloseReason::Cancelled => "cancelled",
        CloseReason::Shutdown => "shutdown",
    };
    counter!(names::DISCONNECTS_TOTAL, "reason" => reason).increment(1);
}

/// Record the outcome of one dispatched event.
pub fn record_dispatch(kind: &'static str, outcome: &DispatchOutcome, latency: Duration) {
    counter!(names::EVENTS_TOTAL, "kind" => kind).increment(1);
    counter!(names::DELIVERIES_TOTAL, "outcome" => "delivered").increment(outcome.delivered as u64);
    counter!(names::DELIVERIES_TOTAL, "outcome" => "failed").increment(outcome.failed as u64);
    counter!(names::DELIVERIES_TOTAL, "outcome" => "skipped").increment(outcome.skipped as u64);
    histogram!(names::DISPATCH_LATENCY_SECONDS).record(latency.as_secs_f64());
}

/// Record an event the producer could not queue.
pub fn record_dropped_event(kind: &'static str) {
    counter!(names::EVENTS_DROPPED_TOTAL, "kind" => kind).increment(1);
}

/// Update active room count.
pub fn set_active_rooms(count: usize) {
    gauge!(names::ROOMS_ACTIVE).set(count as f64);
}

/// Record an error.
pub fn record_error(error_type: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type).increment(1);
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
