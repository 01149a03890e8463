use parking_lot::Mutex;
use std::sync::Arc;

/// Fraction of `true` observations.
///
/// Both counts live behind one lock so a reader never sees a pass without its total.
/// An empty series reports a rate of `0.0`.
#[derive(Debug, Clone)]
pub struct Rate {
    inner: Arc<RateInner>,
}

#[derive(Debug)]
struct RateInner {
    name: String,
    counts: Mutex<RateCounts>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RateCounts {
    pub passes: u64,
    pub total: u64,
}

impl RateCounts {
    pub fn fails(&self) -> u64 {
        self.total - self.passes
    }

    pub fn rate(&self) -> f64 {
        if self.total == 0 {
            0.
        } else {
            self.passes as f64 / self.total as f64
        }
    }
}

impl Rate {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            inner: Arc::new(RateInner {
                name: name.to_string(),
                counts: Mutex::new(RateCounts::default()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn add(&self, value: bool) {
        {
            let mut counts = self.inner.counts.lock();
            counts.total += 1;
            if value {
                counts.passes += 1;
            }
        }

        #[cfg(feature = "metrics")]
        metrics::counter!(
            self.inner.name.clone(),
            "value" => if value { "true" } else { "false" }
        )
        .increment(1);
    }

    /// Consistent snapshot of both counts.
    pub fn counts(&self) -> RateCounts {
        *self.inner.counts.lock()
    }

    pub fn rate(&self) -> f64 {
        self.counts().rate()
    }
}
