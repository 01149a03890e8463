use crate::series::Metrics;
use std::future::Future;
use tokio::time::Instant;

/// Transaction hook used by the `#[transaction]` macro. Not intended to be used manually.
///
/// Inside a VU the call is timed into the `<name>_duration` trend (ms) and its outcome
/// recorded into the `<name>_failed` rate. Outside a run the future is simply awaited.
pub async fn transaction_hook<T, R, E>(name: &'static str, func: T) -> T::Output
where
    T: Future<Output = Result<R, E>>,
{
    let Ok(metrics) = TRANSACTION_HOOK.try_with(|m| m.clone()) else {
        tracing::trace!("No hook available for transaction `{name}`.");
        return func.await;
    };

    let start = Instant::now();
    let res = func.await;
    let elapsed = start.elapsed();

    let duration = metrics.trend(&format!("{name}_duration"));
    let failed = metrics.rate(&format!("{name}_failed"));
    match (duration, failed) {
        (Ok(duration), Ok(failed)) => {
            duration.add(elapsed.as_secs_f64() * 1e3);
            failed.add(res.is_err());
        }
        (Err(err), _) | (_, Err(err)) => {
            tracing::warn!("Transaction `{name}` not recorded: {err}");
        }
    }

    res
}

tokio::task_local! {
    pub(crate) static TRANSACTION_HOOK: Metrics;
}

#[cfg(test)]
mod tests {
    use super::*;
    use stampede_core::MetricSummary;

    async fn flaky(fail: bool) -> Result<(), ()> {
        transaction_hook("flaky", async move {
            if fail {
                Err(())
            } else {
                Ok(())
            }
        })
        .await
    }

    #[tokio::test]
    async fn records_inside_scope() {
        let metrics = Metrics::new();
        TRANSACTION_HOOK
            .scope(metrics.clone(), async {
                assert!(flaky(false).await.is_ok());
                assert!(flaky(true).await.is_err());
                assert!(flaky(true).await.is_err());
            })
            .await;

        let summaries = metrics.summaries();
        assert_eq!(
            summaries["flaky_failed"],
            MetricSummary::Rate {
                passes: 2,
                fails: 1,
                rate: 2. / 3.
            }
        );
        assert_eq!(summaries["flaky_duration"].observations(), 3);
    }

    #[tokio::test]
    async fn passes_through_outside_scope() {
        assert!(flaky(true).await.is_err());
    }
}
