mod utils;
#[allow(unused)]
use utils::*;

#[cfg(feature = "integration")]
mod tests {
    use super::*;

    use mock_service::MockConfig;
    use stampede::prelude::*;
    use stampede::{MetricSummary, ThresholdStatus};
    use std::num::NonZeroU32;
    use std::time::Duration;

    fn secs(s: f64) -> Duration {
        Duration::from_secs_f64(s)
    }

    #[tokio::test]
    #[ntest::timeout(30_000)]
    async fn compressed_profile_passes() {
        let base_url = spawn_mock(MockConfig::default()).await;
        let config = stampede_demos::compress(stampede_demos::profile().unwrap(), 20.);

        let run = stampede_demos::test_run(config, &base_url, HttpTransport::new().unwrap())
            .unwrap();
        let pool = run.shared_pool().clone();
        let report = run.await.unwrap();

        assert!(report.passed(), "{report}");
        assert!(!pool.is_empty());
        assert!(report.scenarios.iter().all(|s| !s.skipped && s.iterations > 0));

        let Some(MetricSummary::Counter { count }) = report.metric("http_reqs") else {
            panic!("http_reqs missing");
        };
        assert!(*count > 0);
        assert!(report
            .thresholds
            .iter()
            .all(|t| t.status == ThresholdStatus::Passed));
    }

    #[tokio::test]
    #[ntest::timeout(30_000)]
    async fn rate_limited_service_breaches_error_threshold() {
        let base_url = spawn_mock(MockConfig {
            max_tps: NonZeroU32::new(5),
            ..Default::default()
        })
        .await;

        let config = TestConfig::new()
            .scenario(
                "hammer",
                ScenarioConfig::constant(20, secs(2.)).think_time(secs(0.05)),
            )
            .threshold("errors", "rate<0.1")
            .unwrap()
            .threshold("http_req_failed", "rate<0.1")
            .unwrap();

        let report = stampede_demos::test_run(config, &base_url, HttpTransport::new().unwrap())
            .unwrap()
            .await
            .unwrap();

        assert!(!report.passed());
        let breached: Vec<_> = report.breached().map(|t| t.metric.as_str()).collect();
        assert_eq!(breached, ["errors", "http_req_failed"]);
    }

    #[tokio::test]
    #[ntest::timeout(30_000)]
    async fn latency_threshold() {
        let base_url = spawn_mock(MockConfig {
            latency: Duration::from_millis(50),
            jitter: Duration::from_millis(5),
            ..Default::default()
        })
        .await;

        let config = TestConfig::new()
            .scenario(
                "slow",
                ScenarioConfig::constant(4, secs(1.5)).exec("resolve"),
            )
            .threshold("http_req_duration", "p(50)>=30")
            .unwrap()
            .threshold("http_req_duration", "p(99)<10")
            .unwrap();

        let url = format!("{base_url}/missing");
        let resolve = workload_fn(move |ctx: StepContext| {
            let url = url.clone();
            async move {
                let _ = ctx.get(&url).await;
                Some(Duration::from_millis(100))
            }
        });

        let report = TestRun::new(config)
            .transport(HttpTransport::new().unwrap())
            .workload("resolve", resolve)
            .await
            .unwrap();

        let statuses: Vec<_> = report.thresholds.iter().map(|t| t.status).collect();
        assert_eq!(statuses, [ThresholdStatus::Passed, ThresholdStatus::Breached]);
    }

    #[transaction]
    async fn lookup(ctx: &StepContext, url: &str) -> Result<u16, TransportError> {
        let res = ctx.get(url).await?;
        if res.is_success() {
            Ok(res.status)
        } else {
            Err(TransportError::Other(format!("status {}", res.status)))
        }
    }

    #[tokio::test]
    #[ntest::timeout(30_000)]
    async fn transaction_macro_records_metrics() {
        let base_url = spawn_mock(MockConfig::default()).await;
        let config = TestConfig::new().scenario(
            "lookups",
            ScenarioConfig::constant(2, secs(1.)).think_time(secs(0.2)),
        );

        let url = format!("{base_url}/not-created");
        let workload = workload_fn(move |ctx: StepContext| {
            let url = url.clone();
            async move {
                let _ = lookup(&ctx, &url).await;
                None
            }
        });

        let report = TestRun::new(config)
            .transport(HttpTransport::new().unwrap())
            .workload("default", workload)
            .await
            .unwrap();

        let Some(MetricSummary::Rate { passes, fails, .. }) = report.metric("lookup_failed") else {
            panic!("lookup_failed missing: {report}");
        };
        assert!(*passes > 0);
        assert_eq!(*fails, 0);
        assert!(report.metric("lookup_duration").is_some());
    }

    #[tokio::test]
    #[ntest::timeout(30_000)]
    async fn cancel_mid_run() {
        let base_url = spawn_mock(MockConfig::default()).await;
        let config = stampede_demos::profile().unwrap();

        let run = stampede_demos::test_run(config, &base_url, HttpTransport::new().unwrap())
            .unwrap();
        let cancel = run.cancel_token();
        let handle = tokio::spawn(run.run());

        tokio::time::sleep(Duration::from_secs(2)).await;
        cancel.cancel();

        let report = handle.await.unwrap().unwrap();
        assert!(report.interrupted);
        assert!(report.scenario("spike_test").unwrap().skipped);
        assert!(report.duration < Duration::from_secs(5));
    }
}
