//! Metric series and the per-run registry that owns them.
mod counter;
mod rate;
mod trend;

pub use counter::Counter;
pub use rate::{Rate, RateCounts};
pub use trend::Trend;

use parking_lot::RwLock;
use stampede_core::{builtin, Aggregator, MetricKind, MetricSummary};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MetricError {
    #[error("metric `{name}` is already registered as a {existing}, not a {requested}")]
    KindMismatch {
        name: String,
        existing: MetricKind,
        requested: MetricKind,
    },
}

/// A registered series of any kind.
#[derive(Debug, Clone)]
pub enum Series {
    Rate(Rate),
    Trend(Trend),
    Counter(Counter),
}

impl Series {
    pub fn kind(&self) -> MetricKind {
        match self {
            Series::Rate(_) => MetricKind::Rate,
            Series::Trend(_) => MetricKind::Trend,
            Series::Counter(_) => MetricKind::Counter,
        }
    }

    /// Current value of `aggregator`, or `None` while the series has no observations.
    pub fn aggregate(&self, aggregator: Aggregator) -> Option<f64> {
        self.snapshot().aggregate(aggregator)
    }

    pub fn summary(&self) -> MetricSummary {
        self.snapshot().summary()
    }

    /// Read the series once. Trends are copied and sorted here, so any number of aggregates
    /// can then be taken from the same snapshot.
    pub fn snapshot(&self) -> Snapshot {
        match self {
            Series::Rate(rate) => Snapshot::Rate(rate.counts()),
            Series::Trend(trend) => Snapshot::Trend(trend.sorted()),
            Series::Counter(counter) => Snapshot::Counter(counter.count()),
        }
    }
}

/// A consistent point-in-time read of one series.
#[derive(Debug, Clone, PartialEq)]
pub enum Snapshot {
    Rate(RateCounts),
    /// Every observation, ascending.
    Trend(Vec<f64>),
    Counter(u64),
}

impl Snapshot {
    /// Value of `aggregator`, or `None` without observations or when it does not apply.
    pub fn aggregate(&self, aggregator: Aggregator) -> Option<f64> {
        match (self, aggregator) {
            (Snapshot::Rate(counts), Aggregator::Rate) => {
                (counts.total > 0).then(|| counts.rate())
            }
            (Snapshot::Counter(count), Aggregator::Count) => (*count > 0).then_some(*count as f64),
            (Snapshot::Trend(sorted), aggregator) => match aggregator {
                Aggregator::Avg => mean(sorted),
                Aggregator::Min => sorted.first().copied(),
                Aggregator::Max => sorted.last().copied(),
                Aggregator::Med => trend::nearest_rank(sorted, 50.),
                Aggregator::Percentile(p) => trend::nearest_rank(sorted, p),
                Aggregator::Rate | Aggregator::Count => None,
            },
            _ => None,
        }
    }

    pub fn summary(&self) -> MetricSummary {
        match self {
            Snapshot::Rate(counts) => MetricSummary::Rate {
                passes: counts.passes,
                fails: counts.fails(),
                rate: counts.rate(),
            },
            Snapshot::Trend(sorted) => MetricSummary::Trend {
                count: sorted.len() as u64,
                avg: mean(sorted),
                min: sorted.first().copied(),
                med: trend::nearest_rank(sorted, 50.),
                max: sorted.last().copied(),
                p90: trend::nearest_rank(sorted, 90.),
                p95: trend::nearest_rank(sorted, 95.),
                p99: trend::nearest_rank(sorted, 99.),
            },
            Snapshot::Counter(count) => MetricSummary::Counter { count: *count },
        }
    }
}

fn mean(samples: &[f64]) -> Option<f64> {
    (!samples.is_empty()).then(|| statistical::mean(samples))
}

/// Registry of every metric series in a run, keyed by name.
///
/// Handles are cheap to clone and share their underlying series, so a workload can grab a
/// handle once and record into it from any number of VUs.
#[derive(Debug, Clone, Default)]
pub struct Metrics {
    series: Arc<RwLock<BTreeMap<String, Series>>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the rate named `name`.
    pub fn rate(&self, name: &str) -> Result<Rate, MetricError> {
        match self.get_or_insert(name, MetricKind::Rate, || Series::Rate(Rate::new(name)))? {
            Series::Rate(rate) => Ok(rate),
            other => Err(mismatch(name, &other, MetricKind::Rate)),
        }
    }

    /// Get or create the trend named `name`.
    pub fn trend(&self, name: &str) -> Result<Trend, MetricError> {
        match self.get_or_insert(name, MetricKind::Trend, || Series::Trend(Trend::new(name)))? {
            Series::Trend(trend) => Ok(trend),
            other => Err(mismatch(name, &other, MetricKind::Trend)),
        }
    }

    /// Get or create the counter named `name`.
    pub fn counter(&self, name: &str) -> Result<Counter, MetricError> {
        match self.get_or_insert(name, MetricKind::Counter, || {
            Series::Counter(Counter::new(name))
        })? {
            Series::Counter(counter) => Ok(counter),
            other => Err(mismatch(name, &other, MetricKind::Counter)),
        }
    }

    pub fn get(&self, name: &str) -> Option<Series> {
        self.series.read().get(name).cloned()
    }

    pub fn kind(&self, name: &str) -> Option<MetricKind> {
        self.series.read().get(name).map(Series::kind)
    }

    pub fn names(&self) -> Vec<String> {
        self.series.read().keys().cloned().collect()
    }

    pub fn summaries(&self) -> BTreeMap<String, MetricSummary> {
        // Clone the handles first so no summary work happens under the registry lock.
        let series: Vec<(String, Series)> = self
            .series
            .read()
            .iter()
            .map(|(name, series)| (name.clone(), series.clone()))
            .collect();

        series
            .into_iter()
            .map(|(name, series)| (name, series.summary()))
            .collect()
    }

    fn get_or_insert(
        &self,
        name: &str,
        kind: MetricKind,
        create: impl FnOnce() -> Series,
    ) -> Result<Series, MetricError> {
        if let Some(existing) = self.series.read().get(name) {
            return check_kind(name, existing, kind);
        }

        let mut series = self.series.write();
        let existing = series.entry(name.to_string()).or_insert_with(create);
        check_kind(name, existing, kind)
    }
}

fn check_kind(name: &str, existing: &Series, kind: MetricKind) -> Result<Series, MetricError> {
    if existing.kind() == kind {
        Ok(existing.clone())
    } else {
        Err(mismatch(name, existing, kind))
    }
}

fn mismatch(name: &str, existing: &Series, requested: MetricKind) -> MetricError {
    MetricError::KindMismatch {
        name: name.to_string(),
        existing: existing.kind(),
        requested,
    }
}

/// Handles to the series every run records into.
#[derive(Debug, Clone)]
pub(crate) struct Builtins {
    pub http_reqs: Counter,
    pub http_req_duration: Trend,
    pub http_req_failed: Rate,
    pub checks: Rate,
    pub iterations: Counter,
    pub iteration_duration: Trend,
    pub interrupted_iterations: Counter,
}

impl Builtins {
    pub fn register(metrics: &Metrics) -> Result<Self, MetricError> {
        Ok(Self {
            http_reqs: metrics.counter(builtin::HTTP_REQS)?,
            http_req_duration: metrics.trend(builtin::HTTP_REQ_DURATION)?,
            http_req_failed: metrics.rate(builtin::HTTP_REQ_FAILED)?,
            checks: metrics.rate(builtin::CHECKS)?,
            iterations: metrics.counter(builtin::ITERATIONS)?,
            iteration_duration: metrics.trend(builtin::ITERATION_DURATION)?,
            interrupted_iterations: metrics.counter(builtin::INTERRUPTED_ITERATIONS)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_share_series() {
        let metrics = Metrics::new();
        let a = metrics.rate("errors").unwrap();
        let b = metrics.rate("errors").unwrap();
        a.add(true);
        b.add(false);
        assert_eq!(a.rate(), 0.5);
        assert_eq!(metrics.kind("errors"), Some(MetricKind::Rate));
    }

    #[test]
    fn kind_mismatch() {
        let metrics = Metrics::new();
        metrics.trend("latency").unwrap();
        let err = metrics.rate("latency").unwrap_err();
        assert_eq!(
            err,
            MetricError::KindMismatch {
                name: "latency".to_string(),
                existing: MetricKind::Trend,
                requested: MetricKind::Rate,
            }
        );
    }

    #[test]
    fn aggregates() {
        let metrics = Metrics::new();
        let trend = metrics.trend("t").unwrap();
        for v in 1..=100 {
            trend.add(v as f64);
        }
        let series = metrics.get("t").unwrap();
        assert_eq!(series.aggregate(Aggregator::Percentile(99.)), Some(99.));
        assert_eq!(series.aggregate(Aggregator::Med), Some(50.));
        assert_eq!(series.aggregate(Aggregator::Min), Some(1.));
        assert_eq!(series.aggregate(Aggregator::Max), Some(100.));
        assert_eq!(series.aggregate(Aggregator::Avg), Some(50.5));
        assert_eq!(series.aggregate(Aggregator::Rate), None);

        let counter = metrics.counter("c").unwrap();
        let series = metrics.get("c").unwrap();
        assert_eq!(series.aggregate(Aggregator::Count), None);
        counter.add(3);
        assert_eq!(series.aggregate(Aggregator::Count), Some(3.));
    }

    #[test]
    fn empty_rate_is_inconclusive() {
        let metrics = Metrics::new();
        metrics.rate("errors").unwrap();
        let series = metrics.get("errors").unwrap();
        assert_eq!(series.aggregate(Aggregator::Rate), None);
        assert_eq!(
            series.summary(),
            MetricSummary::Rate {
                passes: 0,
                fails: 0,
                rate: 0.
            }
        );
    }

    #[test]
    fn builtins_register_once() {
        let metrics = Metrics::new();
        Builtins::register(&metrics).unwrap();
        Builtins::register(&metrics).unwrap();
        assert_eq!(metrics.names().len(), 7);
    }

    #[test]
    fn builtins_conflict() {
        let metrics = Metrics::new();
        metrics.trend(builtin::CHECKS).unwrap();
        assert!(Builtins::register(&metrics).is_err());
    }
}
