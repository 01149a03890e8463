use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Monotonic sum.
#[derive(Debug, Clone)]
pub struct Counter {
    inner: Arc<CounterInner>,
}

#[derive(Debug)]
struct CounterInner {
    name: String,
    count: AtomicU64,
}

impl Counter {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            inner: Arc::new(CounterInner {
                name: name.to_string(),
                count: AtomicU64::new(0),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn add(&self, n: u64) {
        self.inner.count.fetch_add(n, Ordering::Relaxed);

        #[cfg(feature = "metrics")]
        metrics::counter!(self.inner.name.clone()).increment(n);
    }

    pub fn count(&self) -> u64 {
        self.inner.count.load(Ordering::Relaxed)
    }
}
