//! Metrics instrumentation for run observability.

use std::time::Instant;

/// Record one oracle round trip.
pub fn record_oracle_latency(duration_ms: f64) {
    metrics::histogram!("oracle_request_latency", duration_ms);
}

/// Record tool execution latency.
pub fn record_tool_latency(duration_ms: f64) {
    metrics::histogram!("tool_execution_latency", duration_ms);
}

/// Record total run duration.
pub fn record_run_duration(duration_ms: f64) {
    metrics::histogram!("run_duration", duration_ms);
}

pub fn increment_moves() {
    metrics::counter!("moves_total", 1);
}

pub fn increment_rejections() {
    metrics::counter!("rejections_total", 1);
}

pub fn increment_deferrals() {
    metrics::counter!("deferrals_total", 1);
}

pub fn increment_permanent_skips() {
    metrics::counter!("permanent_skips_total", 1);
}

/// RAII timer for automatic metric recording.
pub struct MetricTimer {
    start: Instant,
    metric_name: &'static str,
}

impl MetricTimer {
    pub fn new(metric_name: &'static str) -> Self {
        Self {
            start: Instant::now(),
            metric_name,
        }
    }
}

impl Drop for MetricTimer {
    fn drop(&mut self) {
        let duration_ms = self.start.elapsed().as_secs_f64() * 1000.0;
        match self.metric_name {
            "oracle_request_latency" => record_oracle_latency(duration_ms),
            "tool_execution_latency" => record_tool_latency(duration_ms),
            "run_duration" => record_run_duration(duration_ms),
            _ => {}
        }
    }
}

/// Installs a Prometheus recorder listening on `addr`.
#[cfg(feature = "prometheus")]
pub fn install_prometheus(addr: std::net::SocketAddr) -> Result<(), String> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| e.to_string())
}
