use std::time::Duration;

/// Time a scenario's in-flight iterations are given to finish once it ends or is cancelled.
pub const DEFAULT_GRACEFUL_STOP: Duration = Duration::from_secs(30);

/// Time retired VUs are given to finish their iteration during a ramp-down.
pub const DEFAULT_GRACEFUL_RAMP_DOWN: Duration = Duration::from_secs(30);

/// How often thresholds are checked while a run is live.
pub const DEFAULT_THRESHOLD_INTERVAL: Duration = Duration::from_secs(2);

/// Longest duration, offset, or scenario end a configuration may declare.
pub const MAX_DURATION: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// How often a ramping executor recomputes its target VU count.
pub const RAMP_TICK: Duration = Duration::from_millis(100);

/// Workload used by scenarios that do not name one.
pub const DEFAULT_EXEC: &str = "default";

/// Names of the metrics every run registers.
pub mod builtin {
    pub const HTTP_REQS: &str = "http_reqs";
    pub const HTTP_REQ_DURATION: &str = "http_req_duration";
    pub const HTTP_REQ_FAILED: &str = "http_req_failed";
    pub const CHECKS: &str = "checks";
    pub const ITERATIONS: &str = "iterations";
    pub const ITERATION_DURATION: &str = "iteration_duration";
    pub const INTERRUPTED_ITERATIONS: &str = "interrupted_iterations";
}
