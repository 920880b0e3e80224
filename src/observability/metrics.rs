//! Metrics collection and exposition.
//!
//! # Metrics
//! - `mux_connections_total` (counter): classified connections by listener (`closed` when dropped)
//! - `mux_classification_duration_seconds` (histogram): accept-to-dispatch latency
//! - `mux_pending_classifications` (gauge): connections still being classified
//! - `rpc_requests_total` (counter): gRPC calls by method and status code
//! - `rpc_request_duration_seconds` (histogram): gRPC handler latency
//!
//! Recording is a no-op until [`init_metrics`] installs the Prometheus exporter.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use std::net::SocketAddr;
use std::time::Instant;

/// Install the Prometheus exporter with its own HTTP listener.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

pub fn record_classification(listener: &str, started: Instant) {
    counter!("mux_connections_total", "listener" => listener.to_string()).increment(1);
    histogram!("mux_classification_duration_seconds", "listener" => listener.to_string())
        .record(started.elapsed().as_secs_f64());
}

pub fn set_pending_classifications(count: u64) {
    gauge!("mux_pending_classifications").set(count as f64);
}

pub fn record_rpc(method: &'static str, code: tonic::Code, started: Instant) {
    counter!("rpc_requests_total", "method" => method, "code" => format!("{code:?}")).increment(1);
    histogram!("rpc_request_duration_seconds", "method" => method)
        .record(started.elapsed().as_secs_f64());
}
