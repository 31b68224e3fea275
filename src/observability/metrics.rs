use metrics::{counter, gauge, histogram, describe_counter, describe_gauge, describe_histogram, Unit};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Instant;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Global metrics instance.
pub static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Prometheus-facing metrics for the coordinator and its backends.
#[derive(Debug, Clone)]
pub struct Metrics {
    initialized: bool,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self { initialized: true }
    }

    pub fn record_execution(&self, outcome: &str) {
        counter!("idempotency_executions_total", "outcome" => outcome.to_string()).increment(1);
    }

    pub fn record_cache_lookup(&self, hit: bool) {
        counter!("idempotency_cache_lookups_total", "hit" => hit.to_string()).increment(1);
    }

    pub fn record_lock_acquisition(&self, acquired: bool, duration_ms: f64) {
        counter!("idempotency_lock_acquisitions_total", "acquired" => acquired.to_string()).increment(1);
        histogram!("idempotency_lock_wait_duration_ms").record(duration_ms);
    }

    pub fn record_handler_latency(&self, duration_ms: f64, success: bool) {
        histogram!("idempotency_handler_duration_ms", "success" => success.to_string()).record(duration_ms);
    }

    pub fn record_best_effort_failure(&self, step: &str) {
        counter!("idempotency_best_effort_failures_total", "step" => step.to_string()).increment(1);
    }

    pub fn record_purged_records(&self, count: u64) {
        counter!("idempotency_records_purged_total").increment(count);
    }

    pub fn set_in_progress_records(&self, count: i64) {
        gauge!("idempotency_in_progress_records").set(count as f64);
    }

    pub fn record_db_query(&self, query_type: &str, duration_ms: f64, success: bool) {
        counter!("db_queries_total", "type" => query_type.to_string(), "success" => success.to_string()).increment(1);
        histogram!("db_query_duration_ms", "type" => query_type.to_string()).record(duration_ms);
    }

    pub fn record_redis_operation(&self, operation: &str, duration_ms: f64, success: bool) {
        counter!("redis_operations_total", "operation" => operation.to_string(), "success" => success.to_string()).increment(1);
        histogram!("redis_operation_duration_ms", "operation" => operation.to_string()).record(duration_ms);
    }
}

/// Timer for measuring operation latency.
pub struct LatencyTimer {
    start: Instant,
}

impl LatencyTimer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }
}

impl Default for LatencyTimer {
    fn default() -> Self {
        Self::new()
    }
}

/// Installs the Prometheus recorder once and returns its handle.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = METRICS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    describe_metrics();
    METRICS.get_or_init(Metrics::new);

    Ok(METRICS_HANDLE.get_or_init(|| handle).clone())
}

/// Describes all metrics for Prometheus.
fn describe_metrics() {
    describe_counter!("idempotency_executions_total", Unit::Count, "Coordinator calls by outcome");
    describe_counter!("idempotency_cache_lookups_total", Unit::Count, "Response cache lookups");
    describe_counter!("idempotency_lock_acquisitions_total", Unit::Count, "Per-key lock acquisition attempts");
    describe_histogram!("idempotency_lock_wait_duration_ms", Unit::Milliseconds, "Time spent waiting for the per-key lock");
    describe_histogram!("idempotency_handler_duration_ms", Unit::Milliseconds, "Handler execution latency in milliseconds");
    describe_counter!("idempotency_best_effort_failures_total", Unit::Count, "Logged failures of post-handler writes");
    describe_counter!("idempotency_records_purged_total", Unit::Count, "Resolved records removed by retention");
    describe_gauge!("idempotency_in_progress_records", Unit::Count, "Records currently marked in progress");

    describe_counter!("db_queries_total", Unit::Count, "Total database queries");
    describe_histogram!("db_query_duration_ms", Unit::Milliseconds, "Database query latency in milliseconds");

    describe_counter!("redis_operations_total", Unit::Count, "Total Redis operations");
    describe_histogram!("redis_operation_duration_ms", Unit::Milliseconds, "Redis operation latency in milliseconds");
}

/// Returns the global metrics instance.
pub fn get_metrics() -> &'static Metrics {
    METRICS.get_or_init(Metrics::new)
}
