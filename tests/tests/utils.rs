use metrics_exporter_prometheus::PrometheusBuilder;
use mock_service::MockConfig;
use std::net::SocketAddr;
use std::sync::OnceLock;
use tracing::{error, Level};
use tracing_subscriber::FmtSubscriber;

#[allow(unused)]
pub fn init() {
    static ONCE_LOCK: OnceLock<()> = OnceLock::new();

    ONCE_LOCK.get_or_init(|| {
        let default_panic = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            default_panic(info);
            error!("Panic occurred: {info:?}");
        }));

        let _ = FmtSubscriber::builder()
            .with_max_level(Level::DEBUG)
            .with_env_filter("stampede=debug,mock_service=info")
            .try_init();

        if let Err(err) = PrometheusBuilder::new().install_recorder() {
            error!("No metrics recorder installed: {err}");
        }
    });
}

/// Start a mock URL shortener on an ephemeral port and return its base URL.
#[allow(unused)]
pub async fn spawn_mock(config: MockConfig) -> String {
    init();
    let addr: SocketAddr = mock_service::spawn(config)
        .await
        .expect("mock service failed to start");
    format!("http://{addr}")
}
