use super::{ScenarioStats, Shared};
use crate::transaction::TRANSACTION_HOOK;
use crate::workload::{StepContext, Workload};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{AbortHandle, JoinError, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
#[allow(unused)]
use tracing::{debug, error, info, trace, warn};

struct ActiveVu {
    id: u64,
    retire: CancellationToken,
    handle: AbortHandle,
}

struct RetiredVu {
    id: u64,
    handle: AbortHandle,
    abort_at: Instant,
}

/// The VUs of one scenario.
///
/// Active VUs are kept in spawn order so scaling down retires the newest first. Retired VUs
/// finish their in-flight iteration unless it outlives the retirement grace period.
pub(super) struct VuSet {
    scenario: Arc<str>,
    workload: Arc<dyn Workload>,
    think_time: Option<Duration>,
    deadline: Instant,
    shared: Shared,
    stats: Arc<ScenarioStats>,
    stop: CancellationToken,
    tasks: JoinSet<()>,
    active: Vec<ActiveVu>,
    retired: Vec<RetiredVu>,
    next_id: u64,
}

impl VuSet {
    pub fn new(
        scenario: &str,
        workload: Arc<dyn Workload>,
        think_time: Option<Duration>,
        deadline: Instant,
        shared: Shared,
        stats: Arc<ScenarioStats>,
        stop: CancellationToken,
    ) -> Self {
        Self {
            scenario: Arc::from(scenario),
            workload,
            think_time,
            deadline,
            shared,
            stats,
            stop,
            tasks: JoinSet::new(),
            active: vec![],
            retired: vec![],
            next_id: 0,
        }
    }

    pub fn active(&self) -> u64 {
        self.active.len() as u64
    }

    /// Spawn or retire VUs until `target` are active.
    pub fn scale_to(&mut self, target: u64, retire_grace: Duration) {
        // VUs that died on their own (e.g. a panicking workload) are replaced.
        self.active.retain(|vu| !vu.handle.is_finished());

        let current = self.active();
        if current < target {
            debug!("Spawning {} VUs ({current} -> {target})", target - current);
            for _ in current..target {
                self.spawn();
            }
        } else if current > target {
            debug!("Retiring {} VUs ({current} -> {target})", current - target);
            let abort_at = self.shared.clock.now() + retire_grace;
            for vu in self.active.drain(target as usize..).rev() {
                vu.retire.cancel();
                self.retired.push(RetiredVu {
                    id: vu.id,
                    handle: vu.handle,
                    abort_at,
                });
            }
        }

        self.stats.set_active(&self.scenario, self.active());
    }

    /// Abort overdue retirees and collect finished VU tasks.
    pub fn reap(&mut self) {
        let now = self.shared.clock.now();
        self.retired.retain(|vu| {
            if vu.handle.is_finished() {
                return false;
            }
            if now >= vu.abort_at {
                warn!("VU {} outlived its ramp-down grace period; aborting.", vu.id);
                vu.handle.abort();
                return false;
            }
            true
        });

        while let Some(res) = self.tasks.try_join_next() {
            self.record_exit(res);
        }
    }

    /// Stop every VU, wait up to `grace` for in-flight iterations, then abort the rest.
    ///
    /// VUs already retired keep their earlier ramp-down deadline.
    pub async fn drain(mut self, grace: Duration) {
        for vu in &self.active {
            vu.retire.cancel();
        }
        self.active.clear();
        self.stats.set_active(&self.scenario, 0);

        let abort_at = self.shared.clock.now() + grace;
        loop {
            let retiree_due = self
                .retired
                .iter()
                .map(|vu| vu.abort_at)
                .filter(|at| *at < abort_at)
                .min();

            tokio::select! {
                res = self.tasks.join_next() => match res {
                    Some(res) => self.record_exit(res),
                    None => break,
                },
                _ = self.shared.clock.sleep_until(retiree_due.unwrap_or(abort_at)),
                    if retiree_due.is_some() => self.reap(),
                _ = self.shared.clock.sleep_until(abort_at) => {
                    warn!(
                        "Graceful stop of {} elapsed; aborting {} VUs.",
                        humantime::format_duration(grace),
                        self.tasks.len()
                    );
                    self.tasks.abort_all();
                    while let Some(res) = self.tasks.join_next().await {
                        self.record_exit(res);
                    }
                    break;
                }
            }
        }
    }

    fn spawn(&mut self) {
        let id = self.next_id;
        self.next_id += 1;

        let retire = self.stop.child_token();
        let ctx = StepContext::with_builtins(
            &self.scenario,
            id,
            self.shared.transport.clone(),
            self.shared.pool.clone(),
            self.shared.metrics.clone(),
            self.shared.builtins.clone(),
        );
        let vu = Vu {
            ctx,
            workload: self.workload.clone(),
            think_time: self.think_time,
            deadline: self.deadline,
            retire: retire.clone(),
            shared: self.shared.clone(),
            stats: self.stats.clone(),
        };

        let handle = self.tasks.spawn(
            TRANSACTION_HOOK.scope(self.shared.metrics.clone(), vu.run()),
        );
        trace!("Spawned VU {id}");
        self.active.push(ActiveVu { id, retire, handle });
    }

    fn record_exit(&self, res: Result<(), JoinError>) {
        match res {
            Ok(()) => {}
            Err(err) if err.is_cancelled() => {
                self.stats.add_interrupted();
                self.shared.builtins.interrupted_iterations.add(1);
            }
            Err(err) => {
                error!("VU task failed: {err}");
            }
        }
    }
}

struct Vu {
    ctx: StepContext,
    workload: Arc<dyn Workload>,
    think_time: Option<Duration>,
    deadline: Instant,
    retire: CancellationToken,
    shared: Shared,
    stats: Arc<ScenarioStats>,
}

impl Vu {
    async fn run(mut self) {
        let clock = self.shared.clock.clone();
        let mut iteration = 0;
        loop {
            if self.retire.is_cancelled() || clock.now() >= self.deadline {
                break;
            }

            self.ctx.set_iteration(iteration);
            let start = clock.now();
            let think = self
                .workload
                .run(&self.ctx)
                .await
                .or(self.think_time)
                .unwrap_or_default();
            let elapsed = clock.now() - start;

            iteration += 1;
            self.stats.add_iteration();
            self.shared.builtins.iterations.add(1);
            self.shared
                .builtins
                .iteration_duration
                .add(elapsed.as_secs_f64() * 1e3);

            if think.is_zero() {
                tokio::task::yield_now().await;
                continue;
            }

            let wake = (clock.now() + think).min(self.deadline);
            tokio::select! {
                _ = clock.sleep_until(wake) => {}
                _ = self.retire.cancelled() => break,
            }
        }
        trace!("VU {} done after {iteration} iterations", self.ctx.vu_id());
    }
}
