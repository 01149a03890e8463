use crate::clock::{Clock, TokioClock};
use crate::error::RunError;
use crate::executor::{Executor, Progress, ScenarioStats, Shared};
use crate::pool::SharedPool;
use crate::scheduler::Scheduler;
use crate::series::{Builtins, Metrics};
use crate::threshold::{verdict, ThresholdEvaluator};
use crate::transport::{Transport, Unconfigured};
use crate::workload::Workload;
use pin_project::pin_project;
use stampede_core::{ConfigError, Report, TestConfig, Verdict};
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
#[allow(unused)]
use tracing::{debug, error, info, instrument, trace, warn};

/// A configured test run. Awaiting it runs every scenario to completion and returns the
/// [`Report`].
///
/// # Example
/// ```no_run
/// use stampede::prelude::*;
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), RunError> {
/// let config = TestConfig::new()
///     .scenario("smoke", ScenarioConfig::constant(10, Duration::from_secs(30)))
///     .threshold("http_req_failed", "rate<0.01")?;
///
/// let report = TestRun::new(config)
///     .workload("default", workload_fn(|ctx: StepContext| async move {
///         let res = ctx.get("http://localhost:3001/").await;
///         ctx.check("status is 200", matches!(res, Ok(r) if r.status == 200));
///         None
///     }))
///     .await?;
///
/// assert!(report.passed());
/// # Ok(())
/// # }
/// ```
#[pin_project]
pub struct TestRun {
    config: TestConfig,
    transport: Arc<dyn Transport>,
    workloads: BTreeMap<String, Arc<dyn Workload>>,
    pool: SharedPool,
    metrics: Metrics,
    clock: Arc<dyn Clock>,
    cancel: CancellationToken,
    progress: Progress,
    runner_fut: Option<Pin<Box<dyn Future<Output = Result<Report, RunError>> + Send>>>,
}

impl TestRun {
    pub fn new(config: TestConfig) -> Self {
        let stats = config
            .scenarios
            .keys()
            .map(|name| (name.clone(), Arc::new(ScenarioStats::default())))
            .collect();

        Self {
            config,
            transport: Arc::new(Unconfigured),
            workloads: BTreeMap::new(),
            pool: SharedPool::new(),
            metrics: Metrics::new(),
            clock: Arc::new(TokioClock),
            cancel: CancellationToken::new(),
            progress: Progress::new(stats),
            runner_fut: None,
        }
    }

    pub fn transport(mut self, transport: impl Transport) -> Self {
        self.transport = Arc::new(transport);
        self
    }

    /// Register the workload scenarios refer to as `name` in their `exec`.
    pub fn workload(mut self, name: &str, workload: impl Workload) -> Self {
        self.workloads.insert(name.to_string(), Arc::new(workload));
        self
    }

    /// Use an existing pool, e.g. one pre-seeded with identifiers.
    pub fn pool(mut self, pool: SharedPool) -> Self {
        self.pool = pool;
        self
    }

    pub fn clock(mut self, clock: impl Clock) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// The run's metric registry. Custom metrics used in thresholds must be registered
    /// here before the run starts.
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn shared_pool(&self) -> &SharedPool {
        &self.pool
    }

    pub fn progress(&self) -> Progress {
        self.progress.clone()
    }

    /// Cancelling the token stops the run gracefully: pending scenarios are skipped and
    /// in-flight iterations get their scenario's graceful stop to finish.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn run(self) -> Result<Report, RunError> {
        self.await
    }

    /// Like [`TestRun::run`], but Ctrl-C cancels the run instead of killing the process.
    pub async fn run_until_ctrl_c(self) -> Result<Report, RunError> {
        let cancel = self.cancel.clone();
        let signal = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Ctrl-C received; stopping run.");
                cancel.cancel();
            }
        });

        let res = self.await;
        signal.abort();
        res
    }
}

impl Future for TestRun {
    type Output = Result<Report, RunError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let runner = this.runner_fut.get_or_insert_with(|| {
            let runner = Runner {
                config: this.config.clone(),
                transport: this.transport.clone(),
                workloads: this.workloads.clone(),
                pool: this.pool.clone(),
                metrics: this.metrics.clone(),
                clock: this.clock.clone(),
                cancel: this.cancel.clone(),
                progress: this.progress.clone(),
            };
            Box::pin(runner.run())
        });

        runner.as_mut().poll(cx)
    }
}

struct Runner {
    config: TestConfig,
    transport: Arc<dyn Transport>,
    workloads: BTreeMap<String, Arc<dyn Workload>>,
    pool: SharedPool,
    metrics: Metrics,
    clock: Arc<dyn Clock>,
    cancel: CancellationToken,
    progress: Progress,
}

impl Runner {
    #[instrument(name = "test_run", skip_all)]
    async fn run(self) -> Result<Report, RunError> {
        self.config.validate()?;
        let executors = self.executors()?;

        let builtins = Arc::new(Builtins::register(&self.metrics)?);
        let test_start = self.clock.now();
        let evaluator = Arc::new(
            ThresholdEvaluator::new(&self.config.thresholds, &self.metrics, self.clock.clone())?
                .with_origin(test_start),
        );

        info!(
            "Starting {} scenarios over {}",
            executors.len(),
            humantime::format_duration(self.config.total_duration())
        );

        let watcher_done = self.cancel.child_token();
        let watcher = (!evaluator.is_empty()).then(|| {
            tokio::spawn(watch_thresholds(
                evaluator.clone(),
                self.config.threshold_interval,
                self.clock.clone(),
                self.cancel.clone(),
                watcher_done.clone(),
            ))
        });

        let shared = Shared {
            transport: self.transport.clone(),
            pool: self.pool.clone(),
            metrics: self.metrics.clone(),
            builtins,
            clock: self.clock.clone(),
        };
        let scenarios = Scheduler::new(executors, shared)
            .run(self.cancel.clone())
            .await;
        let interrupted = self.cancel.is_cancelled();

        watcher_done.cancel();
        if let Some(watcher) = watcher {
            if let Err(err) = watcher.await {
                error!("Threshold watcher failed: {err}");
            }
        }

        let thresholds = evaluator.outcomes();
        let mut verdict = verdict(&thresholds);
        if verdict == Verdict::Pass && scenarios.iter().any(|s| s.failed) {
            verdict = Verdict::Fail(vec![]);
        }

        let report = Report {
            duration: self.clock.now() - test_start,
            scenarios,
            metrics: self.metrics.summaries(),
            verdict,
            thresholds,
            interrupted,
        };

        info!("{report}");
        Ok(report)
    }

    fn executors(&self) -> Result<Vec<Executor>, ConfigError> {
        self.config
            .scenarios
            .iter()
            .map(|(name, config)| {
                let workload = self.workloads.get(&config.exec).cloned().ok_or_else(|| {
                    ConfigError::UnknownWorkload {
                        field: format!("scenarios.{name}.exec"),
                        exec: config.exec.clone(),
                    }
                })?;

                Ok(Executor {
                    name: name.clone(),
                    config: config.clone(),
                    workload,
                    stats: self.progress.stats(name).unwrap_or_default(),
                })
            })
            .collect()
    }
}

async fn watch_thresholds(
    evaluator: Arc<ThresholdEvaluator>,
    interval: Duration,
    clock: Arc<dyn Clock>,
    stop: CancellationToken,
    done: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = done.cancelled() => break,
            _ = clock.sleep(interval) => {}
        }

        let breached = evaluator.evaluate();
        trace!("{} thresholds breached", breached.len());
        if evaluator.should_abort() {
            warn!("A threshold marked abortOnFail was breached; stopping the run.");
            stop.cancel();
            break;
        }
    }
}
