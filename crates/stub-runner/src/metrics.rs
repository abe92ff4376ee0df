//! Prometheus metrics for the stub runner.
//!
//! Tracks stub server starts, the number of running servers and the requests
//! they serve.
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_int_gauge, CounterVec, Encoder, IntGauge, TextEncoder,
};

lazy_static! {
    /// Stub servers currently running
    pub static ref STUB_SERVERS_RUNNING: IntGauge = register_int_gauge!(
        "stub_runner_servers_running",
        "Number of stub servers currently running"
    )
    .unwrap();

    /// Start attempts by outcome
    pub static ref STUB_START_ATTEMPTS_TOTAL: CounterVec = register_counter_vec!(
        "stub_runner_start_attempts_total",
        "Total number of stub server start attempts",
        &["result"]  // result: started|bind_error|start_error
    )
    .unwrap();

    /// Requests served by stub servers
    pub static ref STUB_REQUESTS_TOTAL: CounterVec = register_counter_vec!(
        "stub_runner_requests_total",
        "Total number of requests received by stub servers",
        &["stub", "matched"]
    )
    .unwrap();
}

pub fn record_start_attempt(result: &str) {
    STUB_START_ATTEMPTS_TOTAL.with_label_values(&[result]).inc();
}

pub fn record_server_started() {
    STUB_SERVERS_RUNNING.inc();
}

pub fn record_server_stopped() {
    STUB_SERVERS_RUNNING.dec();
}

pub fn record_stub_request(stub: &str, matched: bool) {
    let matched = if matched { "true" } else { "false" };
    STUB_REQUESTS_TOTAL.with_label_values(&[stub, matched]).inc();
}

/// Render every registered metric in the Prometheus text format.
pub fn gather_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gather_includes_recorded_metrics() {
        record_start_attempt("started");
        record_stub_request("metrics-test-stub", true);

        let output = gather_metrics().unwrap();
        assert!(output.contains("stub_runner_start_attempts_total"));
        assert!(output.contains("metrics-test-stub"));
    }
}
