//! What a VU runs once per iteration.
use crate::pool::SharedPool;
use crate::series::{Builtins, MetricError, Metrics};
use crate::transport::{Response, Transport, TransportError};
use async_trait::async_trait;
use rand::Rng;
use stampede_core::ConfigError;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
#[allow(unused_imports)]
use tracing::{debug, error, info, trace, warn};

/// One unit of work a VU executes per iteration.
///
/// Implementations are shared by every VU of every scenario that names them and must be safe
/// to run concurrently. Failures are recorded through the [`StepContext`], never returned.
#[async_trait]
pub trait Workload: Send + Sync + 'static {
    /// Run one iteration. Returns the think time to wait before the next iteration, or `None`
    /// to use the scenario's configured think time.
    async fn run(&self, ctx: &StepContext) -> Option<Duration>;
}

#[async_trait]
impl<W: Workload + ?Sized> Workload for Arc<W> {
    async fn run(&self, ctx: &StepContext) -> Option<Duration> {
        (**self).run(ctx).await
    }
}

/// Adapts an async closure into a [`Workload`].
///
/// # Example
/// ```
/// use stampede::prelude::*;
/// use std::time::Duration;
///
/// let ping = workload_fn(|ctx: StepContext| async move {
///     let res = ctx.get("http://localhost:3001/health").await;
///     ctx.check("health is 200", matches!(res, Ok(r) if r.status == 200));
///     Some(Duration::from_secs(1))
/// });
/// # let _ = ping;
/// ```
pub fn workload_fn<F, Fut>(func: F) -> FnWorkload<F>
where
    F: Fn(StepContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Option<Duration>> + Send + 'static,
{
    FnWorkload(func)
}

pub struct FnWorkload<F>(F);

#[async_trait]
impl<F, Fut> Workload for FnWorkload<F>
where
    F: Fn(StepContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Option<Duration>> + Send + 'static,
{
    async fn run(&self, ctx: &StepContext) -> Option<Duration> {
        (self.0)(ctx.clone()).await
    }
}

/// A probability table of workloads. Every iteration draws independently.
///
/// Weights are normalized, so `0.3`/`0.7` and `3`/`7` describe the same mix.
#[derive(Clone, Default)]
pub struct WorkloadMix {
    entries: Vec<(f64, Arc<dyn Workload>)>,
    total: f64,
}

impl WorkloadMix {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, weight: f64, workload: impl Workload) -> Result<Self, ConfigError> {
        if !weight.is_finite() || weight <= 0. {
            return Err(ConfigError::Invalid {
                field: format!("mix[{}].weight", self.entries.len()),
                reason: format!("{weight} must be positive and finite"),
            });
        }

        self.total += weight;
        self.entries.push((weight, Arc::new(workload)));
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Normalized probability of the entry at `idx`.
    pub fn probability(&self, idx: usize) -> Option<f64> {
        self.entries.get(idx).map(|(w, _)| w / self.total)
    }

    /// Index of the entry selected by `draw`, a uniform sample from `[0, 1)`.
    pub fn pick(&self, draw: f64) -> Option<usize> {
        let target = draw.clamp(0., 1.) * self.total;
        let mut acc = 0.;
        for (idx, (weight, _)) in self.entries.iter().enumerate() {
            acc += weight;
            if target < acc {
                return Some(idx);
            }
        }
        // Rounding can leave `target` a hair above the last boundary.
        self.entries.len().checked_sub(1)
    }
}

#[async_trait]
impl Workload for WorkloadMix {
    async fn run(&self, ctx: &StepContext) -> Option<Duration> {
        let draw: f64 = rand::thread_rng().gen();
        match self.pick(draw) {
            Some(idx) => self.entries[idx].1.run(ctx).await,
            None => {
                warn!("Empty workload mix; nothing to run.");
                None
            }
        }
    }
}

/// Everything a workload may touch during one iteration.
#[derive(Clone)]
pub struct StepContext {
    scenario: Arc<str>,
    vu_id: u64,
    iteration: u64,
    transport: Arc<dyn Transport>,
    pool: SharedPool,
    metrics: Metrics,
    builtins: Arc<Builtins>,
}

impl StepContext {
    /// A context outside any scheduled VU, e.g. for exercising a workload directly.
    pub fn new(
        transport: Arc<dyn Transport>,
        pool: SharedPool,
        metrics: Metrics,
    ) -> Result<Self, MetricError> {
        let builtins = Arc::new(Builtins::register(&metrics)?);
        Ok(Self::with_builtins("", 0, transport, pool, metrics, builtins))
    }

    pub(crate) fn with_builtins(
        scenario: &str,
        vu_id: u64,
        transport: Arc<dyn Transport>,
        pool: SharedPool,
        metrics: Metrics,
        builtins: Arc<Builtins>,
    ) -> Self {
        Self {
            scenario: Arc::from(scenario),
            vu_id,
            iteration: 0,
            transport,
            pool,
            metrics,
            builtins,
        }
    }

    pub(crate) fn set_iteration(&mut self, iteration: u64) {
        self.iteration = iteration;
    }

    pub(crate) fn builtins(&self) -> &Builtins {
        &self.builtins
    }

    pub fn scenario(&self) -> &str {
        &self.scenario
    }

    /// Unique within the scenario.
    pub fn vu_id(&self) -> u64 {
        self.vu_id
    }

    /// Zero-based iteration number of this VU.
    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    pub fn pool(&self) -> &SharedPool {
        &self.pool
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// The raw transport, bypassing the built-in request metrics.
    pub fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    /// Record `ok` into the `checks` rate and return it.
    pub fn check(&self, name: &str, ok: bool) -> bool {
        self.builtins.checks.add(ok);
        if !ok {
            trace!(scenario = %self.scenario, vu = self.vu_id, "Check failed: {name}");
        }
        ok
    }

    /// `GET` through the transport, recorded into the `http_req_*` metrics.
    pub async fn get(&self, url: &str) -> Result<Response, TransportError> {
        let start = Instant::now();
        let res = self.transport.get(url).await;
        self.record_request(start.elapsed(), &res);
        res
    }

    /// `POST` through the transport, recorded into the `http_req_*` metrics.
    pub async fn post(
        &self,
        url: &str,
        body: String,
        headers: &[(&str, &str)],
    ) -> Result<Response, TransportError> {
        let start = Instant::now();
        let res = self.transport.post(url, body, headers).await;
        self.record_request(start.elapsed(), &res);
        res
    }

    fn record_request(&self, elapsed: Duration, res: &Result<Response, TransportError>) {
        let failed = match res {
            Ok(res) => res.is_failure(),
            Err(err) => {
                debug!(scenario = %self.scenario, vu = self.vu_id, "Request failed: {err}");
                true
            }
        };

        self.builtins.http_reqs.add(1);
        self.builtins
            .http_req_duration
            .add(elapsed.as_secs_f64() * 1e3);
        self.builtins.http_req_failed.add(failed);
    }
}
