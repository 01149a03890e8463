use metrics_util::AtomicBucket;
use std::sync::Arc;
use tracing::warn;

/// Distribution of numeric observations.
///
/// Appends are lock-free. Percentiles use the nearest-rank method: the value at rank
/// `ceil(p / 100 * n)` of the sorted samples, so `p(99)` over `1..=100` is `99` and `p(50)` is
/// `50`.
#[derive(Clone)]
pub struct Trend {
    inner: Arc<TrendInner>,
}

struct TrendInner {
    name: String,
    samples: AtomicBucket<f64>,
    #[cfg(test)]
    sorts: std::sync::atomic::AtomicUsize,
}

impl Trend {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            inner: Arc::new(TrendInner {
                name: name.to_string(),
                samples: AtomicBucket::new(),
                #[cfg(test)]
                sorts: Default::default(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Non-finite values are dropped.
    pub fn add(&self, value: f64) {
        if !value.is_finite() {
            warn!("Dropping non-finite observation {value} for {}", self.inner.name);
            return;
        }

        self.inner.samples.push(value);

        #[cfg(feature = "metrics")]
        metrics::histogram!(self.inner.name.clone()).record(value);
    }

    pub fn count(&self) -> usize {
        self.inner.samples.data().len()
    }

    pub fn percentile(&self, p: f64) -> Option<f64> {
        nearest_rank(&self.sorted(), p)
    }

    /// Sorted copy of every observation recorded so far.
    pub fn sorted(&self) -> Vec<f64> {
        #[cfg(test)]
        self.inner
            .sorts
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);

        let mut samples = self.inner.samples.data();
        samples.sort_by(f64::total_cmp);
        samples
    }
}

#[cfg(test)]
impl Trend {
    pub(crate) fn sorts(&self) -> usize {
        self.inner.sorts.load(std::sync::atomic::Ordering::Relaxed)
    }
}

impl std::fmt::Debug for Trend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Trend")
            .field("name", &self.inner.name)
            .field("count", &self.count())
            .finish()
    }
}

/// `sorted` must be in ascending order.
pub(crate) fn nearest_rank(sorted: &[f64], p: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }

    let n = sorted.len();
    // Multiply before dividing so integral percentiles land on exact ranks.
    let rank = (p * n as f64 / 100.).ceil() as usize;
    Some(sorted[rank.clamp(1, n) - 1])
}
