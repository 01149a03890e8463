//! A URL shortener load test: 30% of iterations create a short URL, 70% resolve one created
//! earlier by any VU.
use async_trait::async_trait;
use rand::distributions::{Alphanumeric, DistString};
use serde::Deserialize;
use stampede::prelude::*;
use stampede::ConfigError;
use std::time::Duration;
#[allow(unused)]
use tracing::{debug, error, info, trace, warn};

/// Custom rate the profile's thresholds are declared on. `true` marks a failed request.
pub const ERRORS: &str = "errors";

/// The three-phase profile: steady load, then a ramp, then a spike.
pub const PROFILE: &str = r#"{
    "scenarios": {
        "constant_load": {
            "executor": "constant-vus",
            "vus": 10,
            "duration": "1m"
        },
        "ramping_load": {
            "executor": "ramping-vus",
            "startVUs": 0,
            "stages": [
                { "duration": "30s", "target": 20 },
                { "duration": "1m", "target": 20 },
                { "duration": "30s", "target": 0 }
            ],
            "startTime": "1m"
        },
        "spike_test": {
            "executor": "ramping-vus",
            "startVUs": 0,
            "stages": [
                { "duration": "10s", "target": 50 },
                { "duration": "20s", "target": 50 },
                { "duration": "10s", "target": 0 }
            ],
            "startTime": "3m"
        }
    },
    "thresholds": {
        "http_req_duration": ["p(99)<1000"],
        "errors": ["rate<0.1"]
    }
}"#;

pub fn profile() -> Result<TestConfig, ConfigError> {
    TestConfig::from_json(PROFILE)
}

/// Compress every offset and duration of `config` by `factor`, e.g. `60.` turns minutes
/// into seconds.
pub fn compress(mut config: TestConfig, factor: f64) -> TestConfig {
    let shrink = |d: Duration| d.div_f64(factor);
    for scenario in config.scenarios.values_mut() {
        scenario.start_time = shrink(scenario.start_time);
        match &mut scenario.executor {
            stampede::ExecutorConfig::Constant { duration, .. } => *duration = shrink(*duration),
            stampede::ExecutorConfig::Ramping { stages, .. } => {
                for stage in stages {
                    stage.duration = shrink(stage.duration);
                }
            }
        }
    }
    config
}

#[derive(Debug, Deserialize)]
struct Created {
    short_code: String,
}

/// `POST /api/urls` with a random long URL, remembering the short code on success.
pub struct CreateUrl {
    base_url: String,
    think_time: Duration,
}

impl CreateUrl {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            think_time: Duration::from_secs(1),
        }
    }

    pub fn think_time(mut self, think_time: Duration) -> Self {
        self.think_time = think_time;
        self
    }

    async fn create(&self, ctx: &StepContext) {
        let long_url = format!(
            "https://example.com/{}",
            Alphanumeric.sample_string(&mut rand::thread_rng(), 10)
        );
        let body = serde_json::json!({ "long_url": long_url, "months_valid": 1 }).to_string();

        let res = ctx
            .post(
                &format!("{}/api/urls", self.base_url),
                body,
                &[("Content-Type", "application/json")],
            )
            .await;

        let ok = ctx.check(
            "URL creation successful",
            matches!(&res, Ok(r) if r.status == 200),
        );
        record_error(ctx, !ok);

        if let (true, Ok(res)) = (ok, &res) {
            match serde_json::from_str::<Created>(&res.body) {
                Ok(created) => {
                    ctx.pool().insert(created.short_code);
                }
                Err(err) => warn!("Unexpected creation response: {err}"),
            }
        }
    }
}

#[async_trait]
impl Workload for CreateUrl {
    async fn run(&self, ctx: &StepContext) -> Option<Duration> {
        self.create(ctx).await;
        Some(self.think_time)
    }
}

/// `GET /{short_code}` for a code drawn from the shared pool. Falls back to creating one
/// while the pool is empty.
pub struct AccessUrl {
    create: CreateUrl,
    think_time: Duration,
}

impl AccessUrl {
    pub fn new(base_url: &str) -> Self {
        Self {
            create: CreateUrl::new(base_url),
            think_time: Duration::from_millis(500),
        }
    }

    pub fn think_time(mut self, create: Duration, access: Duration) -> Self {
        self.create = self.create.think_time(create);
        self.think_time = access;
        self
    }
}

#[async_trait]
impl Workload for AccessUrl {
    async fn run(&self, ctx: &StepContext) -> Option<Duration> {
        let Some(short_code) = ctx.pool().sample() else {
            return self.create.run(ctx).await;
        };

        let res = ctx
            .get(&format!("{}/{short_code}", self.create.base_url))
            .await;
        let ok = ctx.check("Redirect successful", matches!(&res, Ok(r) if r.status == 200));
        record_error(ctx, !ok);

        Some(self.think_time)
    }
}

fn record_error(ctx: &StepContext, failed: bool) {
    match ctx.metrics().rate(ERRORS) {
        Ok(errors) => errors.add(failed),
        Err(err) => error!("{err}"),
    }
}

/// The 30/70 create/access mix against `base_url`.
pub fn url_mix(base_url: &str) -> Result<WorkloadMix, ConfigError> {
    WorkloadMix::new()
        .with(0.3, CreateUrl::new(base_url))?
        .with(0.7, AccessUrl::new(base_url))
}

/// A ready-to-await run of `config` against `base_url`, with the `errors` rate registered.
pub fn test_run(
    config: TestConfig,
    base_url: &str,
    transport: impl Transport,
) -> Result<TestRun, RunError> {
    let run = TestRun::new(config)
        .transport(transport)
        .workload("default", url_mix(base_url)?);
    run.metrics().rate(ERRORS)?;
    Ok(run)
}
