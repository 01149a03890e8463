//! Judges metric series against their declared thresholds.
use crate::clock::Clock;
use crate::series::{Metrics, Series, Snapshot};
use parking_lot::Mutex;
use stampede_core::{ConfigError, ThresholdConfig, ThresholdOutcome, ThresholdStatus, Verdict};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
#[allow(unused)]
use tracing::{debug, error, info, trace, warn};

struct Entry {
    metric: String,
    config: ThresholdConfig,
    series: Series,
    breach: Mutex<Option<Breach>>,
}

#[derive(Debug, Clone, Copy)]
struct Breach {
    observed: f64,
    at: Duration,
}

/// Evaluates thresholds against a run's metrics, continuously or once at the end.
///
/// A breach is sticky: once a threshold fails it stays failed with the value and
/// run-relative time of the first failing evaluation. A series with no observations yet is
/// inconclusive, which never fails a run.
pub struct ThresholdEvaluator {
    entries: Vec<Entry>,
    clock: Arc<dyn Clock>,
    origin: Instant,
}

impl ThresholdEvaluator {
    /// Every metric named in `thresholds` must already be registered in `metrics`, and each
    /// predicate's aggregator must apply to that metric's kind.
    pub fn new(
        thresholds: &BTreeMap<String, Vec<ThresholdConfig>>,
        metrics: &Metrics,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        let mut entries = vec![];
        for (metric, configs) in thresholds {
            let series = metrics.get(metric).ok_or_else(|| ConfigError::UnknownMetric {
                field: format!("thresholds.{metric}"),
                metric: metric.clone(),
            })?;

            for (idx, config) in configs.iter().enumerate() {
                if !config.expr.aggregator.applies_to(series.kind()) {
                    return Err(ConfigError::AggregatorMismatch {
                        field: format!("thresholds.{metric}[{idx}]"),
                        aggregator: config.expr.aggregator.to_string(),
                        kind: series.kind().as_str(),
                    });
                }

                entries.push(Entry {
                    metric: metric.clone(),
                    config: *config,
                    series: series.clone(),
                    breach: Mutex::new(None),
                });
            }
        }

        let origin = clock.now();
        Ok(Self {
            entries,
            clock,
            origin,
        })
    }

    /// Breach times are reported relative to `origin`.
    pub fn with_origin(mut self, origin: Instant) -> Self {
        self.origin = origin;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Check every threshold now and return the ones breached so far.
    pub fn evaluate(&self) -> Vec<ThresholdOutcome> {
        self.outcomes()
            .into_iter()
            .filter(|o| o.status == ThresholdStatus::Breached)
            .collect()
    }

    /// Check every threshold now and return all of them.
    ///
    /// Each metric is read once per call, however many thresholds it carries.
    pub fn outcomes(&self) -> Vec<ThresholdOutcome> {
        let mut snapshots = BTreeMap::new();
        self.entries
            .iter()
            .map(|entry| self.check(entry, &mut snapshots))
            .collect()
    }

    /// Whether a breached threshold asks for the run to be aborted.
    pub fn should_abort(&self) -> bool {
        self.entries
            .iter()
            .any(|e| e.config.abort_on_fail && e.breach.lock().is_some())
    }

    pub fn final_verdict(&self) -> Verdict {
        verdict(&self.outcomes())
    }

    fn check<'a>(
        &self,
        entry: &'a Entry,
        snapshots: &mut BTreeMap<&'a str, Snapshot>,
    ) -> ThresholdOutcome {
        let expr = entry.config.expr;
        let outcome = |status, observed, breached_at| ThresholdOutcome {
            metric: entry.metric.clone(),
            expr,
            status,
            observed,
            breached_at,
            abort_on_fail: entry.config.abort_on_fail,
        };

        let mut breach = entry.breach.lock();
        if let Some(b) = *breach {
            return outcome(ThresholdStatus::Breached, Some(b.observed), Some(b.at));
        }

        let snapshot = snapshots
            .entry(entry.metric.as_str())
            .or_insert_with(|| entry.series.snapshot());
        match snapshot.aggregate(expr.aggregator) {
            None => outcome(ThresholdStatus::Inconclusive, None, None),
            Some(observed) if expr.holds(observed) => {
                outcome(ThresholdStatus::Passed, Some(observed), None)
            }
            Some(observed) => {
                let at = self.clock.now().saturating_duration_since(self.origin);
                warn!(
                    "Threshold `{}` on `{}` breached at +{}: observed {observed}",
                    expr,
                    entry.metric,
                    humantime::format_duration(Duration::from_millis(at.as_millis() as u64)),
                );
                *breach = Some(Breach { observed, at });
                outcome(ThresholdStatus::Breached, Some(observed), Some(at))
            }
        }
    }
}

/// `Fail` with every breached outcome, or `Pass` when there are none.
pub(crate) fn verdict(outcomes: &[ThresholdOutcome]) -> Verdict {
    let breached: Vec<_> = outcomes
        .iter()
        .filter(|o| o.status == ThresholdStatus::Breached)
        .cloned()
        .collect();

    if breached.is_empty() {
        Verdict::Pass
    } else {
        Verdict::Fail(breached)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TokioClock;
    use stampede_core::TestConfig;

    fn evaluator(metrics: &Metrics, config: TestConfig) -> Result<ThresholdEvaluator, ConfigError> {
        ThresholdEvaluator::new(&config.thresholds, metrics, Arc::new(TokioClock))
    }

    fn errors(pass: u64, fail: u64) -> (Metrics, ThresholdEvaluator) {
        let metrics = Metrics::new();
        let rate = metrics.rate("errors").unwrap();
        for _ in 0..pass {
            rate.add(true);
        }
        for _ in 0..fail {
            rate.add(false);
        }
        let config = TestConfig::new().threshold("errors", "rate<0.1").unwrap();
        let eval = evaluator(&metrics, config).unwrap();
        (metrics, eval)
    }

    #[test]
    fn rate_threshold() {
        let (_, eval) = errors(15, 85);
        assert_eq!(eval.evaluate().len(), 1);
        assert!(matches!(eval.final_verdict(), Verdict::Fail(b) if b[0].observed == Some(0.15)));

        let (_, eval) = errors(5, 95);
        assert!(eval.evaluate().is_empty());
        assert_eq!(eval.final_verdict(), Verdict::Pass);
    }

    #[test]
    fn empty_series_is_inconclusive() {
        let (_, eval) = errors(0, 0);
        let outcomes = eval.outcomes();
        assert_eq!(outcomes[0].status, ThresholdStatus::Inconclusive);
        assert_eq!(outcomes[0].observed, None);
        assert_eq!(eval.final_verdict(), Verdict::Pass);
    }

    #[test]
    fn breach_is_sticky() {
        let (metrics, eval) = errors(1, 0);
        let breached = eval.evaluate();
        assert_eq!(breached[0].observed, Some(1.));

        let rate = metrics.rate("errors").unwrap();
        for _ in 0..1_000 {
            rate.add(false);
        }
        let breached = eval.evaluate();
        assert_eq!(breached.len(), 1);
        assert_eq!(breached[0].observed, Some(1.));
    }

    #[tokio::test(start_paused = true)]
    async fn breach_time_is_run_relative() {
        let (_, eval) = errors(1, 0);
        tokio::time::sleep(Duration::from_secs(7)).await;
        let breached = eval.evaluate();
        let at = breached[0].breached_at.unwrap().as_secs_f64();
        assert!((at - 7.).abs() < 0.01, "{at}");
    }

    #[test]
    fn trend_thresholds() {
        let metrics = Metrics::new();
        let latency = metrics.trend("http_req_duration").unwrap();
        for v in 1..=100 {
            latency.add(v as f64);
        }
        let config = TestConfig::new()
            .threshold("http_req_duration", "p(99)<100")
            .unwrap()
            .threshold("http_req_duration", "p(99)<99")
            .unwrap()
            .threshold("http_req_duration", "avg<=50.5")
            .unwrap();
        let eval = evaluator(&metrics, config).unwrap();

        let statuses: Vec<_> = eval.outcomes().into_iter().map(|o| o.status).collect();
        assert_eq!(
            statuses,
            [
                ThresholdStatus::Passed,
                ThresholdStatus::Breached,
                ThresholdStatus::Passed
            ]
        );
    }

    #[test]
    fn trend_is_sorted_once_per_pass() {
        let metrics = Metrics::new();
        let latency = metrics.trend("http_req_duration").unwrap();
        for v in 1..=100 {
            latency.add(v as f64);
        }
        let config = TestConfig::new()
            .threshold("http_req_duration", "p(95)<200")
            .unwrap()
            .threshold("http_req_duration", "p(99)<200")
            .unwrap()
            .threshold("http_req_duration", "avg<200")
            .unwrap();
        let eval = evaluator(&metrics, config).unwrap();

        assert!(eval.evaluate().is_empty());
        assert_eq!(latency.sorts(), 1);

        assert_eq!(eval.outcomes().len(), 3);
        assert_eq!(latency.sorts(), 2);
    }

    #[test]
    fn abort_on_fail() {
        let metrics = Metrics::new();
        let checks = metrics.rate("checks").unwrap();
        let config = TestConfig::from_json(
            r#"{
                "scenarios": { "s": { "executor": "constant-vus", "duration": "1s" } },
                "thresholds": { "checks": [{ "threshold": "rate>0.9", "abortOnFail": true }] }
            }"#,
        )
        .unwrap();
        let eval = evaluator(&metrics, config).unwrap();

        checks.add(true);
        eval.evaluate();
        assert!(!eval.should_abort());

        checks.add(false);
        let breached = eval.evaluate();
        assert!(breached[0].abort_on_fail);
        assert!(eval.should_abort());
    }

    #[test]
    fn unknown_metric() {
        let config = TestConfig::new().threshold("missing", "rate<0.1").unwrap();
        let err = evaluator(&Metrics::new(), config).err().unwrap();
        assert_eq!(err.field(), Some("thresholds.missing"));
    }

    #[test]
    fn aggregator_mismatch() {
        let metrics = Metrics::new();
        metrics.rate("errors").unwrap();
        let config = TestConfig::new()
            .threshold("errors", "rate<0.1")
            .unwrap()
            .threshold("errors", "p(95)<200")
            .unwrap();
        let err = evaluator(&metrics, config).err().unwrap();
        assert_eq!(err.field(), Some("thresholds.errors[1]"));
        assert!(matches!(err, ConfigError::AggregatorMismatch { kind: "rate", .. }));
    }
}
