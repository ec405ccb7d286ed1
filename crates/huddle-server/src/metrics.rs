//! Metrics collection and export for Huddle.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use huddle_core::{Delivery, RouterStats};
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "huddle_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "huddle_connections_active";
    pub const USERS_NAMED: &str = "huddle_users_named";
    pub const EVENTS_INBOUND: &str = "huddle_events_inbound_total";
    pub const DELIVERIES_TOTAL: &str = "huddle_deliveries_total";
    pub const DELIVERY_FAILURES: &str = "huddle_delivery_failures_total";
    pub const EVENTS_DROPPED: &str = "huddle_events_dropped_total";
    pub const DISPATCH_SECONDS: &str = "huddle_dispatch_seconds";
    pub const ERRORS_TOTAL: &str = "huddle_errors_total";
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
    metrics::describe_gauge!(names::USERS_NAMED, "Current number of joined users");
    metrics::describe_counter!(names::EVENTS_INBOUND, "Inbound client events by name");
    metrics::describe_counter!(
        names::DELIVERIES_TOTAL,
        "Events queued to recipients by name"
    );
    metrics::describe_counter!(
        names::DELIVERY_FAILURES,
        "Fan-out deliveries skipped because the recipient was gone"
    );
    metrics::describe_counter!(
        names::EVENTS_DROPPED,
        "Inbound events dropped without broadcast, by reason"
    );
    metrics::describe_histogram!(
        names::DISPATCH_SECONDS,
        "Inbound event dispatch latency in seconds"
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
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

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

/// Record an inbound event.
pub fn record_inbound(event: &'static str) {
    counter!(names::EVENTS_INBOUND, "event" => event).increment(1);
}

/// Record the outcome of a fan-out.
pub fn record_delivery(event: &'static str, delivery: Delivery) {
    counter!(names::DELIVERIES_TOTAL, "event" => event).increment(delivery.delivered as u64);
    if delivery.failed > 0 {
        counter!(names::DELIVERY_FAILURES).increment(delivery.failed as u64);
    }
}

/// Record a dropped inbound event.
pub fn record_dropped(reason: &'static str) {
    counter!(names::EVENTS_DROPPED, "reason" => reason).increment(1);
}

/// Record dispatch latency.
pub fn record_latency(seconds: f64) {
    histogram!(names::DISPATCH_SECONDS).record(seconds);
}

/// Update the joined-user gauge.
pub fn set_router_stats(stats: RouterStats) {
    gauge!(names::USERS_NAMED).set(stats.named as f64);
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
