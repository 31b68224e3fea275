pub mod health;
pub mod logging;
pub mod metrics;

pub use health::{
    check_cache, check_lock, check_store, AggregatedHealth, DependencyHealth, HealthChecker, HealthStatus,
    HealthThresholds,
};
pub use logging::{init_logging, mask_request_id, mask_sensitive, LogConfig, LogFormat};
pub use metrics::{get_metrics, init_metrics, LatencyTimer, Metrics, METRICS};
