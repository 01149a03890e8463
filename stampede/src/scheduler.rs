//! Launches every scenario at its offset from test start.
use crate::executor::{Executor, Shared};
use stampede_core::ScenarioReport;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
#[allow(unused)]
use tracing::{debug, error, info, trace, warn};

pub(crate) struct Scheduler {
    executors: Vec<Executor>,
    shared: Shared,
}

impl Scheduler {
    pub fn new(executors: Vec<Executor>, shared: Shared) -> Self {
        Self { executors, shared }
    }

    /// Completes once every launched scenario has completed. Scenarios whose offset has not
    /// arrived when `stop` is cancelled are never launched and come back marked `skipped`.
    ///
    /// Reports are ordered by start offset, then name.
    pub async fn run(self, stop: CancellationToken) -> Vec<ScenarioReport> {
        let clock = self.shared.clock.clone();
        let test_start = clock.now();
        let declared: Vec<_> = self
            .executors
            .iter()
            .map(|e| (placeholder(e), e.stats.clone()))
            .collect();

        let mut tasks = JoinSet::new();
        for executor in self.executors {
            let clock = clock.clone();
            let shared = self.shared.clone();
            let stop = stop.clone();
            let start_at = test_start + executor.config.start_time;

            debug!(
                "Scheduling `{}` at +{}",
                executor.name,
                humantime::format_duration(executor.config.start_time)
            );

            tasks.spawn(async move {
                tokio::select! {
                    biased;
                    _ = stop.cancelled() => {
                        info!("Run cancelled before `{}` started; skipping.", executor.name);
                        skipped(&executor)
                    }
                    _ = clock.sleep_until(start_at) => {
                        executor.run(shared, test_start, stop).await
                    }
                }
            });
        }

        let mut reports = Vec::with_capacity(tasks.len());
        while let Some(res) = tasks.join_next().await {
            match res {
                Ok(report) => reports.push(report),
                Err(err) => error!("Scenario task failed: {err}"),
            }
        }

        // A scenario without a report lost its task.
        for (report, stats) in declared {
            if !reports.iter().any(|r| r.name == report.name) {
                warn!("Scenario `{}` did not report; marking it failed.", report.name);
                stats.set_active(&report.name, 0);
                reports.push(ScenarioReport {
                    iterations: stats.iterations(),
                    interrupted_iterations: stats.interrupted(),
                    peak_vus: stats.peak(),
                    failed: true,
                    ..report
                });
            }
        }

        reports.sort_by(|a, b| {
            a.start_offset
                .cmp(&b.start_offset)
                .then_with(|| a.name.cmp(&b.name))
        });
        reports
    }
}

fn skipped(executor: &Executor) -> ScenarioReport {
    ScenarioReport {
        skipped: true,
        ..placeholder(executor)
    }
}

/// Report of a scenario that never ran.
fn placeholder(executor: &Executor) -> ScenarioReport {
    ScenarioReport {
        name: executor.name.clone(),
        executor: executor.config.executor.name(),
        start_offset: executor.config.start_time,
        started_at: None,
        finished_at: None,
        iterations: 0,
        interrupted_iterations: 0,
        peak_vus: 0,
        skipped: false,
        failed: false,
    }
}
