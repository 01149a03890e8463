//! Drives the three-phase URL shortener profile against a running service.
//!
//! ```text
//! cargo run -p mock-service &
//! cargo run -p stampede-demos --example url_shortener -- --base-url http://localhost:3001
//! ```
use clap::Parser;
use stampede::transport::HttpTransport;
use stampede::TestConfig;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Service under test.
    #[arg(long, default_value = "http://localhost:3001")]
    base_url: String,

    /// JSON options document to run instead of the built-in profile.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Divide every offset and duration by this factor.
    #[arg(long, default_value_t = 1.)]
    compress: f64,

    /// Per-request timeout in seconds.
    #[arg(long, default_value_t = 60)]
    timeout: u64,

    /// Print the report as JSON instead of text.
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("stampede=info")),
        )
        .init();

    let args = Args::parse();
    anyhow::ensure!(args.compress > 0., "--compress must be positive");

    let config = match &args.config {
        Some(path) => TestConfig::from_json(&std::fs::read_to_string(path)?)?,
        None => stampede_demos::profile()?,
    };
    let config = stampede_demos::compress(config, args.compress);

    let transport = HttpTransport::with_timeout(Duration::from_secs(args.timeout))?;
    let report = stampede_demos::test_run(config, &args.base_url, transport)?
        .run_until_ctrl_c()
        .await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{report}");
    }

    if !report.passed() {
        std::process::exit(1);
    }
    Ok(())
}
