//! Drives the VUs of one scenario through its concurrency profile.
use crate::clock::Clock;
use crate::pool::SharedPool;
use crate::series::{Builtins, Metrics};
use crate::transport::Transport;
use crate::workload::Workload;
use stampede_core::{ExecutorConfig, ScenarioConfig, ScenarioReport, RAMP_TICK};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
#[allow(unused)]
use tracing::{debug, error, info, instrument, trace, warn};

mod plan;
mod vu;

use plan::Plan;
use vu::VuSet;

/// Handles every VU of a run shares.
#[derive(Clone)]
pub(crate) struct Shared {
    pub transport: Arc<dyn Transport>,
    pub pool: SharedPool,
    pub metrics: Metrics,
    pub builtins: Arc<Builtins>,
    pub clock: Arc<dyn Clock>,
}

/// Live counters of one scenario.
#[derive(Debug, Default)]
pub(crate) struct ScenarioStats {
    iterations: AtomicU64,
    interrupted: AtomicU64,
    active: AtomicU64,
    peak: AtomicU64,
}

impl ScenarioStats {
    pub fn add_iteration(&self) {
        self.iterations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_interrupted(&self) {
        self.interrupted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_active(&self, _scenario: &str, vus: u64) {
        self.active.store(vus, Ordering::Relaxed);
        self.peak.fetch_max(vus, Ordering::Relaxed);

        #[cfg(feature = "metrics")]
        metrics::gauge!("active_vus", "scenario" => _scenario.to_string()).set(vus as f64);
    }

    pub fn active(&self) -> u64 {
        self.active.load(Ordering::Relaxed)
    }

    pub fn iterations(&self) -> u64 {
        self.iterations.load(Ordering::Relaxed)
    }

    pub fn interrupted(&self) -> u64 {
        self.interrupted.load(Ordering::Relaxed)
    }

    pub fn peak(&self) -> u64 {
        self.peak.load(Ordering::Relaxed)
    }
}

/// Live view of a running test, per scenario.
#[derive(Debug, Clone, Default)]
pub struct Progress {
    scenarios: Arc<BTreeMap<String, Arc<ScenarioStats>>>,
}

impl Progress {
    pub(crate) fn new(scenarios: BTreeMap<String, Arc<ScenarioStats>>) -> Self {
        Self {
            scenarios: Arc::new(scenarios),
        }
    }

    pub(crate) fn stats(&self, scenario: &str) -> Option<Arc<ScenarioStats>> {
        self.scenarios.get(scenario).cloned()
    }

    /// VUs currently iterating in `scenario`. Retired VUs finishing their last iteration are
    /// not counted.
    pub fn active_vus(&self, scenario: &str) -> Option<u64> {
        self.scenarios.get(scenario).map(|s| s.active())
    }

    /// Iterations `scenario` has completed so far.
    pub fn iterations(&self, scenario: &str) -> Option<u64> {
        self.scenarios.get(scenario).map(|s| s.iterations())
    }

    pub fn total_active_vus(&self) -> u64 {
        self.scenarios.values().map(|s| s.active()).sum()
    }
}

/// One scenario, ready to be launched.
pub(crate) struct Executor {
    pub name: String,
    pub config: ScenarioConfig,
    pub workload: Arc<dyn Workload>,
    pub stats: Arc<ScenarioStats>,
}

impl Executor {
    /// Run the profile to completion or until `stop` is cancelled, then drain the VUs.
    #[instrument(name = "scenario", skip_all, fields(name = %self.name))]
    pub async fn run(
        self,
        shared: Shared,
        test_start: Instant,
        stop: CancellationToken,
    ) -> ScenarioReport {
        let clock = shared.clock.clone();
        let plan = Plan::new(&self.config.executor);
        let retire_grace = match &self.config.executor {
            ExecutorConfig::Ramping {
                graceful_ramp_down,
                ..
            } => *graceful_ramp_down,
            ExecutorConfig::Constant { .. } => self.config.graceful_stop,
        };

        let start = clock.now();
        let deadline = start + plan.duration();
        info!(
            "Starting {} for {}",
            self.config.executor.name(),
            humantime::format_duration(plan.duration())
        );

        let mut vus = VuSet::new(
            &self.name,
            self.workload.clone(),
            self.config.think_time,
            deadline,
            shared,
            self.stats.clone(),
            stop.child_token(),
        );

        let mut tick: u32 = 0;
        loop {
            let now = clock.now();
            if now >= deadline {
                break;
            }

            let target = plan.target_at(now - start);
            trace!("Tick {tick}: target {target} VUs");
            vus.scale_to(target, retire_grace);
            vus.reap();

            tick += 1;
            let next = (start + RAMP_TICK * tick).min(deadline);
            tokio::select! {
                _ = clock.sleep_until(next) => {}
                _ = stop.cancelled() => {
                    info!("Cancelled with {} active VUs", vus.active());
                    break;
                }
            }
        }

        vus.drain(self.config.graceful_stop).await;
        let finished = clock.now();

        info!(
            "Finished after {} iterations ({} interrupted)",
            self.stats.iterations(),
            self.stats.interrupted()
        );

        ScenarioReport {
            name: self.name,
            executor: self.config.executor.name(),
            start_offset: self.config.start_time,
            started_at: Some(start - test_start),
            finished_at: Some(finished - test_start),
            iterations: self.stats.iterations(),
            interrupted_iterations: self.stats.interrupted(),
            peak_vus: self.stats.peak(),
            skipped: false,
            failed: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TokioClock;
    use crate::transport::Unconfigured;
    use crate::workload::{workload_fn, StepContext};
    use stampede_core::Stage;
    use std::time::Duration;

    fn shared() -> Shared {
        let metrics = Metrics::new();
        Shared {
            transport: Arc::new(Unconfigured),
            pool: SharedPool::new(),
            builtins: Arc::new(Builtins::register(&metrics).unwrap()),
            metrics,
            clock: Arc::new(TokioClock),
        }
    }

    fn executor(config: ScenarioConfig, workload: impl Workload) -> (Executor, Arc<ScenarioStats>) {
        let stats = Arc::new(ScenarioStats::default());
        let executor = Executor {
            name: "test".to_string(),
            config,
            workload: Arc::new(workload),
            stats: stats.clone(),
        };
        (executor, stats)
    }

    fn idle(think: Duration) -> impl Workload {
        workload_fn(move |_ctx: StepContext| async move { Some(think) })
    }

    /// Sleeps for `busy` inside the iteration, then asks for no think time.
    fn busy(busy: Duration) -> impl Workload {
        workload_fn(move |_ctx: StepContext| async move {
            tokio::time::sleep(busy).await;
            Some(Duration::ZERO)
        })
    }

    fn secs(s: f64) -> Duration {
        Duration::from_secs_f64(s)
    }

    fn assert_near(actual: Option<Duration>, expected: f64) {
        let actual = actual.unwrap().as_secs_f64();
        assert!((actual - expected).abs() < 0.01, "{actual} != {expected}");
    }

    #[tokio::test(start_paused = true)]
    #[ntest::timeout(1000)]
    async fn constant_holds_vus() {
        let (exec, stats) = executor(ScenarioConfig::constant(5, secs(10.)), idle(secs(0.5)));
        let start = Instant::now();
        let handle = tokio::spawn(exec.run(shared(), start, CancellationToken::new()));

        for t in [0.05, 1., 4.2, 9.9] {
            tokio::time::sleep_until(start + secs(t)).await;
            assert_eq!(stats.active(), 5, "at {t}s");
        }

        let report = handle.await.unwrap();
        assert_eq!(stats.active(), 0);
        assert_eq!(report.peak_vus, 5);
        assert_eq!(report.iterations, 100);
        assert_eq!(report.interrupted_iterations, 0);
        assert_near(report.finished_at, 10.);
    }

    #[tokio::test(start_paused = true)]
    #[ntest::timeout(1000)]
    async fn ramping_follows_stages() {
        let config = ScenarioConfig::ramping(
            0,
            [
                Stage::new(secs(10.), 10),
                Stage::new(secs(10.), 10),
                Stage::new(secs(10.), 0),
            ],
        );
        let (exec, stats) = executor(config, idle(secs(0.2)));
        let start = Instant::now();
        let handle = tokio::spawn(exec.run(shared(), start, CancellationToken::new()));

        for (t, expected) in [(5.05, 5), (10.05, 10), (15.05, 10), (25.05, 5), (29.95, 0)] {
            tokio::time::sleep_until(start + secs(t)).await;
            assert_eq!(stats.active(), expected, "at {t}s");
        }

        let report = handle.await.unwrap();
        assert_eq!(report.peak_vus, 10);
        assert_eq!(report.interrupted_iterations, 0);
    }

    #[tokio::test(start_paused = true)]
    #[ntest::timeout(1000)]
    async fn retired_vus_finish_their_iteration() {
        let config = ScenarioConfig::ramping(
            4,
            [
                Stage::new(secs(1.), 4),
                Stage::new(Duration::ZERO, 0),
                Stage::new(secs(10.), 0),
            ],
        );
        let (exec, stats) = executor(config, busy(secs(3.)));
        let start = Instant::now();
        let handle = tokio::spawn(exec.run(shared(), start, CancellationToken::new()));

        tokio::time::sleep_until(start + secs(1.05)).await;
        assert_eq!(stats.active(), 0);
        assert_eq!(stats.iterations(), 0);

        tokio::time::sleep_until(start + secs(3.05)).await;
        assert_eq!(stats.iterations(), 4);

        let report = handle.await.unwrap();
        assert_eq!(report.iterations, 4);
        assert_eq!(report.peak_vus, 4);
        assert_eq!(report.interrupted_iterations, 0);
    }

    #[tracing_test::traced_test]
    #[tokio::test(start_paused = true)]
    #[ntest::timeout(1000)]
    async fn ramp_down_grace_aborts_slow_vus() {
        let config = ScenarioConfig::ramping(
            3,
            [
                Stage::new(secs(1.), 3),
                Stage::new(Duration::ZERO, 1),
                Stage::new(secs(10.), 1),
            ],
        )
        .graceful_ramp_down(secs(1.))
        .graceful_stop(secs(2.));
        let (exec, stats) = executor(config, busy(secs(60.)));
        let start = Instant::now();
        let handle = tokio::spawn(exec.run(shared(), start, CancellationToken::new()));

        tokio::time::sleep_until(start + secs(2.5)).await;
        assert_eq!(stats.active(), 1);
        assert_eq!(stats.interrupted(), 2);

        // The survivor is aborted once graceful stop runs out after the profile ends.
        let report = handle.await.unwrap();
        assert_eq!(report.iterations, 0);
        assert_eq!(report.interrupted_iterations, 3);
        assert_near(report.finished_at, 13.);
        assert!(logs_contain("outlived its ramp-down grace period"));
    }

    #[tracing_test::traced_test]
    #[tokio::test(start_paused = true)]
    #[ntest::timeout(1000)]
    async fn retirees_keep_their_grace_after_the_profile_ends() {
        let config = ScenarioConfig::ramping(
            3,
            [
                Stage::new(secs(1.), 3),
                Stage::new(Duration::ZERO, 1),
                Stage::new(secs(0.5), 1),
            ],
        )
        .graceful_ramp_down(secs(1.))
        .graceful_stop(secs(30.));
        let (exec, stats) = executor(config, busy(secs(60.)));
        let start = Instant::now();
        let handle = tokio::spawn(exec.run(shared(), start, CancellationToken::new()));

        // Retired at 1s, so aborted at 2s even though the drain started at 1.5s.
        tokio::time::sleep_until(start + secs(2.5)).await;
        assert_eq!(stats.interrupted(), 2);
        assert!(logs_contain("outlived its ramp-down grace period"));

        let report = handle.await.unwrap();
        assert_eq!(report.interrupted_iterations, 3);
        assert_near(report.finished_at, 31.5);
    }

    #[tracing_test::traced_test]
    #[tokio::test(start_paused = true)]
    #[ntest::timeout(1000)]
    async fn graceful_stop_bounds_the_last_iteration() {
        let config = ScenarioConfig::constant(2, secs(1.)).graceful_stop(secs(2.));
        let (exec, _stats) = executor(config, busy(secs(10.)));
        let start = Instant::now();
        let report = exec.run(shared(), start, CancellationToken::new()).await;

        assert_eq!(report.iterations, 0);
        assert_eq!(report.interrupted_iterations, 2);
        assert_near(report.finished_at, 3.);
        assert!(logs_contain("aborting 2 VUs"));
    }

    #[tokio::test(start_paused = true)]
    #[ntest::timeout(1000)]
    async fn cancellation_lets_in_flight_iterations_finish() {
        let (exec, stats) = executor(ScenarioConfig::constant(3, secs(60.)), busy(secs(1.)));
        let stop = CancellationToken::new();
        let start = Instant::now();
        let handle = tokio::spawn(exec.run(shared(), start, stop.clone()));

        tokio::time::sleep_until(start + secs(2.5)).await;
        assert_eq!(stats.iterations(), 6);
        stop.cancel();

        let report = handle.await.unwrap();
        assert_eq!(report.iterations, 9);
        assert_eq!(report.interrupted_iterations, 0);
        assert_near(report.finished_at, 3.);
    }

    #[tokio::test(start_paused = true)]
    #[ntest::timeout(1000)]
    async fn cancellation_stops_ramping() {
        let config = ScenarioConfig::ramping(0, [Stage::new(secs(20.), 20)]);
        let (exec, stats) = executor(config, busy(secs(1.)));
        let stop = CancellationToken::new();
        let start = Instant::now();
        let handle = tokio::spawn(exec.run(shared(), start, stop.clone()));

        tokio::time::sleep_until(start + secs(5.05)).await;
        assert_eq!(stats.active(), 5);
        stop.cancel();

        let report = handle.await.unwrap();
        assert_eq!(stats.active(), 0);
        assert_eq!(report.peak_vus, 5);
        assert_eq!(report.interrupted_iterations, 0);
        assert!(report.finished_at.unwrap() <= secs(6.05));
    }
}
