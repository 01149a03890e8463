use crate::constants::{
    DEFAULT_EXEC, DEFAULT_GRACEFUL_RAMP_DOWN, DEFAULT_GRACEFUL_STOP, DEFAULT_THRESHOLD_INTERVAL,
    MAX_DURATION,
};
use crate::error::ConfigError;
use crate::threshold::ThresholdExpr;
use serde::Deserialize;
use serde_with::{serde_as, OneOrMany};
use std::collections::BTreeMap;
use std::time::Duration;

mod raw;

/// Reject durations past [`MAX_DURATION`], which no run can schedule.
fn bounded(field: &str, duration: Duration) -> Result<Duration, ConfigError> {
    if duration > MAX_DURATION {
        Err(ConfigError::InvalidDuration {
            field: field.to_string(),
            reason: format!(
                "{} exceeds the limit of {}",
                humantime::format_duration(duration),
                humantime::format_duration(MAX_DURATION)
            ),
        })
    } else {
        Ok(duration)
    }
}

/// One ramp segment: over `duration`, move the active VU count linearly to `target`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stage {
    pub duration: Duration,
    pub target: u64,
}

impl Stage {
    pub fn new(duration: Duration, target: u64) -> Self {
        Self { duration, target }
    }
}

/// Concurrency profile of a scenario.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutorConfig {
    /// A fixed number of VUs for the whole duration.
    Constant { vus: u64, duration: Duration },
    /// VU count interpolated across ordered stages, starting at `start_vus`.
    Ramping {
        start_vus: u64,
        stages: Vec<Stage>,
        graceful_ramp_down: Duration,
    },
}

impl ExecutorConfig {
    pub fn name(&self) -> &'static str {
        match self {
            ExecutorConfig::Constant { .. } => "constant-vus",
            ExecutorConfig::Ramping { .. } => "ramping-vus",
        }
    }

    /// Time from scenario start until the profile ends.
    pub fn total_duration(&self) -> Duration {
        match self {
            ExecutorConfig::Constant { duration, .. } => *duration,
            ExecutorConfig::Ramping { stages, .. } => stages
                .iter()
                .fold(Duration::ZERO, |total, s| total.saturating_add(s.duration)),
        }
    }

    /// Largest VU count the profile ever asks for.
    pub fn max_vus(&self) -> u64 {
        match self {
            ExecutorConfig::Constant { vus, .. } => *vus,
            ExecutorConfig::Ramping {
                start_vus, stages, ..
            } => stages.iter().map(|s| s.target).fold(*start_vus, u64::max),
        }
    }
}

/// A named scenario's declaration. The name is the key it is stored under in [`TestConfig`].
#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioConfig {
    pub executor: ExecutorConfig,
    /// Offset from test start at which the scenario begins.
    pub start_time: Duration,
    /// Name of the workload each VU iterates.
    pub exec: String,
    /// Pause between iterations when the workload does not declare one.
    pub think_time: Option<Duration>,
    pub graceful_stop: Duration,
}

impl ScenarioConfig {
    fn with_executor(executor: ExecutorConfig) -> Self {
        Self {
            executor,
            start_time: Duration::ZERO,
            exec: DEFAULT_EXEC.to_string(),
            think_time: None,
            graceful_stop: DEFAULT_GRACEFUL_STOP,
        }
    }

    /// `vus` VUs iterate for `duration`.
    pub fn constant(vus: u64, duration: Duration) -> Self {
        Self::with_executor(ExecutorConfig::Constant { vus, duration })
    }

    /// Starts with `start_vus` VUs and follows `stages` in order.
    pub fn ramping(start_vus: u64, stages: impl IntoIterator<Item = Stage>) -> Self {
        Self::with_executor(ExecutorConfig::Ramping {
            start_vus,
            stages: stages.into_iter().collect(),
            graceful_ramp_down: DEFAULT_GRACEFUL_RAMP_DOWN,
        })
    }

    pub fn start_time(mut self, offset: Duration) -> Self {
        self.start_time = offset;
        self
    }

    pub fn exec(mut self, workload: &str) -> Self {
        self.exec = workload.to_string();
        self
    }

    pub fn think_time(mut self, think_time: Duration) -> Self {
        self.think_time = Some(think_time);
        self
    }

    pub fn graceful_stop(mut self, graceful_stop: Duration) -> Self {
        self.graceful_stop = graceful_stop;
        self
    }

    /// No-op for constant scenarios.
    pub fn graceful_ramp_down(mut self, grace: Duration) -> Self {
        if let ExecutorConfig::Ramping {
            graceful_ramp_down, ..
        } = &mut self.executor
        {
            *graceful_ramp_down = grace;
        }
        self
    }

    /// Offset from test start at which the profile ends.
    pub fn end_offset(&self) -> Duration {
        self.start_time.saturating_add(self.executor.total_duration())
    }

    fn validate(&self, name: &str) -> Result<(), ConfigError> {
        let field = |f: &str| format!("scenarios.{name}.{f}");

        if name.trim().is_empty() {
            return Err(ConfigError::invalid("scenarios", "scenario names must not be empty"));
        }

        match &self.executor {
            ExecutorConfig::Constant { vus, duration } => {
                if *vus == 0 {
                    return Err(ConfigError::invalid(field("vus"), "must be at least 1"));
                }
                bounded(&field("duration"), *duration)?;
            }
            ExecutorConfig::Ramping {
                stages,
                graceful_ramp_down,
                ..
            } => {
                if stages.is_empty() {
                    return Err(ConfigError::EmptyStages {
                        field: field("stages"),
                    });
                }
                for (idx, stage) in stages.iter().enumerate() {
                    bounded(&field(&format!("stages[{idx}].duration")), stage.duration)?;
                }
                bounded(&field("gracefulRampDown"), *graceful_ramp_down)?;
            }
        }

        bounded(&field("startTime"), self.start_time)?;
        bounded(&field("gracefulStop"), self.graceful_stop)?;
        if let Some(think_time) = self.think_time {
            bounded(&field("thinkTime"), think_time)?;
        }
        if self.end_offset() > MAX_DURATION {
            return Err(ConfigError::InvalidDuration {
                field: format!("scenarios.{name}"),
                reason: format!(
                    "ends more than {} after test start",
                    humantime::format_duration(MAX_DURATION)
                ),
            });
        }

        if self.exec.trim().is_empty() {
            return Err(ConfigError::invalid(field("exec"), "must not be empty"));
        }

        Ok(())
    }
}

/// A threshold declaration on one metric.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdConfig {
    pub expr: ThresholdExpr,
    /// Cancel the whole run as soon as this threshold is breached.
    pub abort_on_fail: bool,
}

impl From<ThresholdExpr> for ThresholdConfig {
    fn from(expr: ThresholdExpr) -> Self {
        Self {
            expr,
            abort_on_fail: false,
        }
    }
}

/// The complete declarative input of a test run.
#[derive(Debug, Clone, PartialEq)]
pub struct TestConfig {
    pub scenarios: BTreeMap<String, ScenarioConfig>,
    /// Metric name to the thresholds declared on it.
    pub thresholds: BTreeMap<String, Vec<ThresholdConfig>>,
    pub threshold_interval: Duration,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl TestConfig {
    pub fn new() -> Self {
        Self {
            scenarios: BTreeMap::new(),
            thresholds: BTreeMap::new(),
            threshold_interval: DEFAULT_THRESHOLD_INTERVAL,
        }
    }

    pub fn scenario(mut self, name: &str, scenario: ScenarioConfig) -> Self {
        self.scenarios.insert(name.to_string(), scenario);
        self
    }

    /// Declare a threshold from its predicate string, e.g. `p(99)<1000`.
    pub fn threshold(self, metric: &str, expr: &str) -> Result<Self, ConfigError> {
        let index = self.thresholds.get(metric).map_or(0, Vec::len);
        let expr = raw::parse_threshold(&format!("thresholds.{metric}[{index}]"), expr)?;
        Ok(self.threshold_with(metric, expr.into()))
    }

    pub fn threshold_with(mut self, metric: &str, threshold: ThresholdConfig) -> Self {
        self.thresholds
            .entry(metric.to_string())
            .or_default()
            .push(threshold);
        self
    }

    pub fn threshold_interval(mut self, interval: Duration) -> Self {
        self.threshold_interval = interval;
        self
    }

    /// Parse and validate a k6-style JSON options document.
    ///
    /// ```
    /// use stampede_core::TestConfig;
    ///
    /// let config = TestConfig::from_json(r#"{
    ///     "scenarios": {
    ///         "constant_load": { "executor": "constant-vus", "vus": 10, "duration": "1m" }
    ///     },
    ///     "thresholds": { "errors": ["rate<0.1"] }
    /// }"#).unwrap();
    /// assert_eq!(config.scenarios.len(), 1);
    /// ```
    pub fn from_json(document: &str) -> Result<Self, ConfigError> {
        let raw: RawTestConfig = serde_json::from_str(document)?;
        let config = raw.into_config()?;
        config.validate()?;
        Ok(config)
    }

    /// Check every invariant that does not depend on registered metrics or workloads.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scenarios.is_empty() {
            return Err(ConfigError::invalid(
                "scenarios",
                "at least one scenario is required",
            ));
        }

        for (name, scenario) in &self.scenarios {
            scenario.validate(name)?;
        }

        if self.threshold_interval.is_zero() {
            return Err(ConfigError::InvalidDuration {
                field: "thresholdInterval".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        bounded("thresholdInterval", self.threshold_interval)?;

        Ok(())
    }

    /// Offset from test start at which the last scenario's profile ends.
    pub fn total_duration(&self) -> Duration {
        self.scenarios
            .values()
            .map(ScenarioConfig::end_offset)
            .max()
            .unwrap_or_default()
    }
}

#[serde_as]
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RawTestConfig {
    #[serde(default)]
    scenarios: BTreeMap<String, raw::RawScenario>,
    #[serde_as(as = "BTreeMap<_, OneOrMany<_>>")]
    #[serde(default)]
    thresholds: BTreeMap<String, Vec<raw::RawThreshold>>,
    threshold_interval: Option<raw::RawDuration>,
}

impl RawTestConfig {
    fn into_config(self) -> Result<TestConfig, ConfigError> {
        let mut config = TestConfig::new();

        if let Some(interval) = &self.threshold_interval {
            config.threshold_interval = interval.to_duration("thresholdInterval")?;
        }

        for (name, scenario) in self.scenarios {
            let scenario = scenario.into_config(&name)?;
            config.scenarios.insert(name, scenario);
        }

        for (metric, thresholds) in self.thresholds {
            for (idx, threshold) in thresholds.into_iter().enumerate() {
                let field = format!("thresholds.{metric}[{idx}]");
                config = config.threshold_with(&metric, threshold.into_config(&field)?);
            }
        }

        Ok(config)
    }
}
