//! Deserialized shape of the options document. Converted into the validated types with the
//! offending field path attached to every error.
use super::{bounded, ExecutorConfig, ScenarioConfig, Stage, ThresholdConfig};
use crate::constants::{DEFAULT_EXEC, DEFAULT_GRACEFUL_RAMP_DOWN, DEFAULT_GRACEFUL_STOP};
use crate::error::ConfigError;
use crate::threshold::ThresholdExpr;
use serde::Deserialize;
use std::time::Duration;

/// Either plain seconds (`30`, `0.5`) or a humantime string (`"30s"`, `"1m 30s"`).
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(super) enum RawDuration {
    Seconds(f64),
    Text(String),
}

impl RawDuration {
    pub(super) fn to_duration(&self, field: &str) -> Result<Duration, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidDuration {
            field: field.to_string(),
            reason,
        };

        let duration = match self {
            RawDuration::Seconds(secs) if !secs.is_finite() => {
                return Err(invalid(format!("{secs} is not finite")))
            }
            RawDuration::Seconds(secs) if *secs < 0. => {
                return Err(invalid(format!("{secs} is negative")))
            }
            RawDuration::Seconds(secs) => {
                Duration::try_from_secs_f64(*secs).map_err(|e| invalid(format!("{secs}: {e}")))?
            }
            RawDuration::Text(text) => {
                let text = text.trim();
                if text.starts_with('-') {
                    return Err(invalid(format!("`{text}` is negative")));
                }
                humantime::parse_duration(text).map_err(|e| invalid(format!("`{text}`: {e}")))?
            }
        };

        bounded(field, duration)
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(super) enum RawThreshold {
    Expr(String),
    Detailed {
        threshold: String,
        #[serde(default, rename = "abortOnFail")]
        abort_on_fail: bool,
    },
}

impl RawThreshold {
    pub(super) fn into_config(self, field: &str) -> Result<ThresholdConfig, ConfigError> {
        match self {
            RawThreshold::Expr(expr) => Ok(parse_threshold(field, &expr)?.into()),
            RawThreshold::Detailed {
                threshold,
                abort_on_fail,
            } => Ok(ThresholdConfig {
                expr: parse_threshold(field, &threshold)?,
                abort_on_fail,
            }),
        }
    }
}

pub(super) fn parse_threshold(field: &str, expr: &str) -> Result<ThresholdExpr, ConfigError> {
    expr.parse()
        .map_err(|e: crate::threshold::ParseThresholdError| ConfigError::InvalidThreshold {
            field: field.to_string(),
            expr: expr.to_string(),
            reason: e.to_string(),
        })
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(super) struct RawStage {
    duration: RawDuration,
    target: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(super) struct RawScenario {
    executor: String,
    vus: Option<i64>,
    duration: Option<RawDuration>,
    #[serde(rename = "startVUs")]
    start_vus: Option<i64>,
    stages: Option<Vec<RawStage>>,
    start_time: Option<RawDuration>,
    exec: Option<String>,
    think_time: Option<RawDuration>,
    graceful_stop: Option<RawDuration>,
    graceful_ramp_down: Option<RawDuration>,
}

impl RawScenario {
    pub(super) fn into_config(self, name: &str) -> Result<ScenarioConfig, ConfigError> {
        let field = |f: &str| format!("scenarios.{name}.{f}");
        let optional = |raw: &Option<RawDuration>, f: &str| {
            raw.as_ref().map(|d| d.to_duration(&field(f))).transpose()
        };

        let executor = match self.executor.as_str() {
            "constant-vus" => {
                reject(self.stages.is_some(), field("stages"), "constant-vus")?;
                reject(self.start_vus.is_some(), field("startVUs"), "constant-vus")?;
                reject(
                    self.graceful_ramp_down.is_some(),
                    field("gracefulRampDown"),
                    "constant-vus",
                )?;

                let vus = count(self.vus.unwrap_or(1), field("vus"))?;
                let duration = optional(&self.duration, "duration")?.ok_or_else(|| {
                    ConfigError::invalid(field("duration"), "required for constant-vus")
                })?;
                ExecutorConfig::Constant { vus, duration }
            }
            "ramping-vus" => {
                reject(self.vus.is_some(), field("vus"), "ramping-vus")?;
                reject(self.duration.is_some(), field("duration"), "ramping-vus")?;

                let start_vus = count(self.start_vus.unwrap_or(1), field("startVUs"))?;
                let stages = self
                    .stages
                    .unwrap_or_default()
                    .iter()
                    .enumerate()
                    .map(|(idx, stage)| {
                        let field = field(&format!("stages[{idx}]"));
                        Ok(Stage {
                            duration: stage.duration.to_duration(&format!("{field}.duration"))?,
                            target: count(stage.target, format!("{field}.target"))?,
                        })
                    })
                    .collect::<Result<Vec<_>, ConfigError>>()?;
                if stages.is_empty() {
                    return Err(ConfigError::EmptyStages {
                        field: field("stages"),
                    });
                }

                ExecutorConfig::Ramping {
                    start_vus,
                    stages,
                    graceful_ramp_down: optional(&self.graceful_ramp_down, "gracefulRampDown")?
                        .unwrap_or(DEFAULT_GRACEFUL_RAMP_DOWN),
                }
            }
            other => {
                return Err(ConfigError::invalid(
                    field("executor"),
                    format!("unknown executor `{other}`, expected constant-vus or ramping-vus"),
                ))
            }
        };

        Ok(ScenarioConfig {
            executor,
            start_time: optional(&self.start_time, "startTime")?.unwrap_or_default(),
            exec: self.exec.unwrap_or_else(|| DEFAULT_EXEC.to_string()),
            think_time: optional(&self.think_time, "thinkTime")?,
            graceful_stop: optional(&self.graceful_stop, "gracefulStop")?
                .unwrap_or(DEFAULT_GRACEFUL_STOP),
        })
    }
}

fn count(value: i64, field: String) -> Result<u64, ConfigError> {
    u64::try_from(value).map_err(|_| ConfigError::invalid(field, "must not be negative"))
}

fn reject(present: bool, field: String, executor: &str) -> Result<(), ConfigError> {
    if present {
        Err(ConfigError::invalid(
            field,
            format!("not supported by {executor}"),
        ))
    } else {
        Ok(())
    }
}
