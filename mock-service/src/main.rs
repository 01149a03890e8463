use metrics_exporter_prometheus::PrometheusBuilder;
use mock_service::MockConfig;
use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::time::Duration;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// `mock-service [addr] [max_tps] [latency_ms]`
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mut args = std::env::args().skip(1);
    let addr: SocketAddr = args.next().as_deref().unwrap_or("0.0.0.0:3001").parse()?;
    let max_tps = args.next().map(|s| s.parse::<u32>()).transpose()?;
    let latency_ms = args.next().map(|s| s.parse::<u64>()).transpose()?.unwrap_or(0);

    PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], 9001))
        .install()?;

    let config = MockConfig {
        max_tps: max_tps.and_then(NonZeroU32::new),
        latency: Duration::from_millis(latency_ms),
        jitter: Duration::from_millis(latency_ms / 4),
    };

    tracing::info!("Mock URL shortener listening on {addr}");
    mock_service::run(addr, config).await
}
