use crate::threshold::{MetricKind, ThresholdExpr};
use serde::Serialize;
use serde_with::{serde_as, DisplayFromStr, DurationSecondsWithFrac};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Outcome of a whole test run.
#[serde_as]
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    pub duration: Duration,
    pub scenarios: Vec<ScenarioReport>,
    pub metrics: BTreeMap<String, MetricSummary>,
    pub thresholds: Vec<ThresholdOutcome>,
    pub verdict: Verdict,
    /// The run was stopped before every scenario completed on its own.
    pub interrupted: bool,
}

impl Report {
    pub fn passed(&self) -> bool {
        matches!(self.verdict, Verdict::Pass)
    }

    pub fn breached(&self) -> impl Iterator<Item = &ThresholdOutcome> {
        self.thresholds
            .iter()
            .filter(|t| t.status == ThresholdStatus::Breached)
    }

    pub fn scenario(&self, name: &str) -> Option<&ScenarioReport> {
        self.scenarios.iter().find(|s| s.name == name)
    }

    pub fn metric(&self, name: &str) -> Option<&MetricSummary> {
        self.metrics.get(name)
    }
}

/// Timing and load figures for one scenario. Times are relative to test start.
#[serde_as]
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    pub name: String,
    pub executor: &'static str,
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    pub start_offset: Duration,
    #[serde_as(as = "Option<DurationSecondsWithFrac<f64>>")]
    pub started_at: Option<Duration>,
    #[serde_as(as = "Option<DurationSecondsWithFrac<f64>>")]
    pub finished_at: Option<Duration>,
    pub iterations: u64,
    pub interrupted_iterations: u64,
    pub peak_vus: u64,
    /// Never launched because the run was cancelled first.
    pub skipped: bool,
    /// The scenario's task died before it could report. Fails the run.
    pub failed: bool,
}

/// Point-in-time summary of one metric series.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetricSummary {
    Rate {
        passes: u64,
        fails: u64,
        rate: f64,
    },
    Trend {
        count: u64,
        avg: Option<f64>,
        min: Option<f64>,
        med: Option<f64>,
        max: Option<f64>,
        p90: Option<f64>,
        p95: Option<f64>,
        p99: Option<f64>,
    },
    Counter {
        count: u64,
    },
}

impl MetricSummary {
    pub fn kind(&self) -> MetricKind {
        match self {
            MetricSummary::Rate { .. } => MetricKind::Rate,
            MetricSummary::Trend { .. } => MetricKind::Trend,
            MetricSummary::Counter { .. } => MetricKind::Counter,
        }
    }

    /// Number of observations the summary was built from.
    pub fn observations(&self) -> u64 {
        match self {
            MetricSummary::Rate { passes, fails, .. } => passes + fails,
            MetricSummary::Trend { count, .. } | MetricSummary::Counter { count } => *count,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ThresholdStatus {
    Passed,
    Breached,
    /// The metric had no observations, so the predicate could not be judged.
    Inconclusive,
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThresholdOutcome {
    pub metric: String,
    #[serde_as(as = "DisplayFromStr")]
    pub expr: ThresholdExpr,
    pub status: ThresholdStatus,
    /// Value at the first breach, or the latest value if never breached.
    pub observed: Option<f64>,
    #[serde_as(as = "Option<DurationSecondsWithFrac<f64>>")]
    pub breached_at: Option<Duration>,
    pub abort_on_fail: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", content = "breached", rename_all = "lowercase")]
pub enum Verdict {
    Pass,
    /// Carries the breached thresholds. Empty when the run failed only because a scenario
    /// did.
    Fail(Vec<ThresholdOutcome>),
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "run {} after {}{}",
            if self.passed() { "PASSED" } else { "FAILED" },
            humantime::format_duration(round_ms(self.duration)),
            if self.interrupted { " (interrupted)" } else { "" },
        )?;

        for s in &self.scenarios {
            if s.failed {
                writeln!(f, "  {} [{}]: FAILED", s.name, s.executor)?;
            } else if s.skipped {
                writeln!(f, "  {} [{}]: skipped", s.name, s.executor)?;
            } else {
                writeln!(
                    f,
                    "  {} [{}]: {} iterations ({} interrupted), peak {} VUs",
                    s.name, s.executor, s.iterations, s.interrupted_iterations, s.peak_vus
                )?;
            }
        }

        for (name, summary) in &self.metrics {
            match summary {
                MetricSummary::Rate {
                    passes,
                    fails,
                    rate,
                } => writeln!(f, "  {name}: {:.2}% ({passes} / {fails})", rate * 100.)?,
                MetricSummary::Trend {
                    count,
                    avg,
                    med,
                    p90,
                    p99,
                    ..
                } => writeln!(
                    f,
                    "  {name}: n={count} avg={} med={} p90={} p99={}",
                    opt(*avg),
                    opt(*med),
                    opt(*p90),
                    opt(*p99)
                )?,
                MetricSummary::Counter { count } => writeln!(f, "  {name}: {count}")?,
            }
        }

        for t in &self.thresholds {
            let mark = match t.status {
                ThresholdStatus::Passed => "ok",
                ThresholdStatus::Breached => "BREACHED",
                ThresholdStatus::Inconclusive => "no data",
            };
            writeln!(f, "  {} {}: {mark} (observed {})", t.metric, t.expr, opt(t.observed))?;
        }

        Ok(())
    }
}

fn opt(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{v:.2}"))
}

fn round_ms(d: Duration) -> Duration {
    Duration::from_millis(d.as_millis() as u64)
}
