//! Telemetry metric name constants.
//!
//! Centralised metric names for Watchpost operations. Consumers install
//! their own `metrics` recorder (e.g. prometheus, statsd); without a
//! recorder installed, all metric calls are no-ops.
//!
//! # Metric naming conventions
//!
//! All metrics are prefixed with `watchpost_`. Counters end in `_total`,
//! histograms use meaningful units (e.g. `_seconds`).
//!
//! # Common labels
//!
//! - `check` — check name
//! - `environment` — environment name
//! - `decision` — scheduling decision: "schedule" | "skip" | "dont_schedule"
//! - `outcome` — "ok" | "error"

/// Total scheduling decisions evaluated.
///
/// Labels: `check`, `environment`, `decision`.
pub const SCHEDULING_DECISIONS_TOTAL: &str = "watchpost_scheduling_decisions_total";

/// Total check executions submitted to the executor.
///
/// Labels: `check`, `environment`.
pub const CHECK_SUBMISSIONS_TOTAL: &str = "watchpost_check_submissions_total";

/// Check execution duration in seconds.
///
/// Labels: `check`, `environment`.
pub const CHECK_DURATION_SECONDS: &str = "watchpost_check_duration_seconds";

/// Total check executions that ended in an error.
///
/// Labels: `check`, `environment`, `outcome`.
pub const CHECK_ERRORS_TOTAL: &str = "watchpost_check_errors_total";

/// Total cache hits.
///
/// Labels: `check`.
pub const CACHE_HITS_TOTAL: &str = "watchpost_cache_hits_total";

/// Total cache misses.
///
/// Labels: `check`.
pub const CACHE_MISSES_TOTAL: &str = "watchpost_cache_misses_total";

/// Total datasource resolution failures.
///
/// Labels: `check`, `environment`.
pub const DATASOURCE_UNAVAILABLE_TOTAL: &str = "watchpost_datasource_unavailable_total";
