use stampede_core::{ExecutorConfig, Stage};
use std::time::Duration;

/// Target VU count as a function of time since scenario start.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Plan {
    Constant { vus: u64, duration: Duration },
    Ramping { start_vus: u64, stages: Vec<Stage> },
}

impl Plan {
    pub fn new(config: &ExecutorConfig) -> Self {
        match config {
            ExecutorConfig::Constant { vus, duration } => Plan::Constant {
                vus: *vus,
                duration: *duration,
            },
            ExecutorConfig::Ramping {
                start_vus, stages, ..
            } => Plan::Ramping {
                start_vus: *start_vus,
                stages: stages.clone(),
            },
        }
    }

    pub fn duration(&self) -> Duration {
        match self {
            Plan::Constant { duration, .. } => *duration,
            Plan::Ramping { stages, .. } => stages.iter().map(|s| s.duration).sum(),
        }
    }

    /// Stage boundaries land exactly on the stage target; in between the count is linearly
    /// interpolated and rounded. Zero-length stages jump straight to their target.
    pub fn target_at(&self, elapsed: Duration) -> u64 {
        match self {
            Plan::Constant { vus, .. } => *vus,
            Plan::Ramping { start_vus, stages } => {
                let mut from = *start_vus;
                let mut stage_start = Duration::ZERO;
                for stage in stages {
                    let stage_end = stage_start + stage.duration;
                    if elapsed < stage_end {
                        let progress = (elapsed - stage_start).as_secs_f64()
                            / stage.duration.as_secs_f64();
                        return lerp(from, stage.target, progress);
                    }
                    from = stage.target;
                    stage_start = stage_end;
                }
                from
            }
        }
    }
}

fn lerp(from: u64, to: u64, progress: f64) -> u64 {
    let value = from as f64 + (to as f64 - from as f64) * progress;
    value.round().max(0.) as u64
}
