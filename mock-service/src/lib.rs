//! In-memory URL shortener used as a load test target.
use axum::{
    debug_handler,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
#[allow(unused)]
use metrics::{counter, gauge, histogram};
use rand::distributions::{Alphanumeric, DistString};
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tower_http::trace::TraceLayer;
use tracing::debug;

const SHORT_CODE_LEN: usize = 8;
const MONTH: Duration = Duration::from_secs(30 * 24 * 60 * 60);

#[derive(Debug, Clone, Default)]
pub struct MockConfig {
    /// Requests over this rate are answered with 503.
    pub max_tps: Option<NonZeroU32>,
    /// Mean simulated handling latency.
    pub latency: Duration,
    /// Standard deviation of the simulated latency.
    pub jitter: Duration,
}

#[derive(Debug, Deserialize)]
pub struct CreateUrl {
    pub long_url: String,
    pub months_valid: Option<u32>,
    pub custom_short_code: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UrlResponse {
    pub short_code: String,
    pub long_url: String,
}

struct StoredUrl {
    long_url: String,
    expires_at: Instant,
}

struct AppState {
    urls: RwLock<HashMap<String, StoredUrl>>,
    limiter: Option<DefaultDirectRateLimiter>,
    config: MockConfig,
}

pub fn router(config: MockConfig) -> Router {
    let state = Arc::new(AppState {
        urls: RwLock::new(HashMap::new()),
        limiter: config
            .max_tps
            .map(|tps| RateLimiter::direct(Quota::per_second(tps))),
        config,
    });

    Router::new()
        .route("/api/urls", post(create_short_url))
        .route("/:short_code", get(resolve_short_url))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve on `addr` until the process exits.
pub async fn run(addr: SocketAddr, config: MockConfig) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, router(config)).await?;
    Ok(())
}

/// Serve on an ephemeral local port in the background and return its address.
pub async fn spawn(config: MockConfig) -> anyhow::Result<SocketAddr> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, router(config)).await {
            tracing::error!("Mock service stopped: {err}");
        }
    });
    Ok(addr)
}

#[debug_handler]
async fn create_short_url(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateUrl>,
) -> Result<Json<UrlResponse>, StatusCode> {
    counter!("mock_service.requests", "route" => "create").increment(1);
    admit(&state).await?;

    if !payload.long_url.starts_with("http://") && !payload.long_url.starts_with("https://") {
        return Err(StatusCode::BAD_REQUEST);
    }
    let months = payload.months_valid.unwrap_or(1);
    if months == 0 {
        return Err(StatusCode::BAD_REQUEST);
    }

    let short_code = payload
        .custom_short_code
        .unwrap_or_else(|| Alphanumeric.sample_string(&mut rand::thread_rng(), SHORT_CODE_LEN));

    let mut urls = state.urls.write().await;
    if urls.contains_key(&short_code) {
        return Err(StatusCode::CONFLICT);
    }
    urls.insert(
        short_code.clone(),
        StoredUrl {
            long_url: payload.long_url.clone(),
            expires_at: Instant::now() + MONTH * months,
        },
    );
    gauge!("mock_service.urls").set(urls.len() as f64);
    debug!("Created {short_code}");

    Ok(Json(UrlResponse {
        short_code,
        long_url: payload.long_url,
    }))
}

#[debug_handler]
async fn resolve_short_url(
    State(state): State<Arc<AppState>>,
    Path(short_code): Path<String>,
) -> Result<Json<UrlResponse>, StatusCode> {
    counter!("mock_service.requests", "route" => "resolve").increment(1);
    admit(&state).await?;

    let urls = state.urls.read().await;
    match urls.get(&short_code) {
        Some(url) if url.expires_at > Instant::now() => Ok(Json(UrlResponse {
            short_code,
            long_url: url.long_url.clone(),
        })),
        _ => Err(StatusCode::NOT_FOUND),
    }
}

/// Apply the rate limit and the simulated latency.
async fn admit(state: &AppState) -> Result<(), StatusCode> {
    if let Some(limiter) = &state.limiter {
        if limiter.check().is_err() {
            counter!("mock_service.rejected").increment(1);
            return Err(StatusCode::SERVICE_UNAVAILABLE);
        }
    }

    let delay = simulated_latency(&state.config);
    if !delay.is_zero() {
        histogram!("mock_service.latency_ms").record(delay.as_secs_f64() * 1e3);
        tokio::time::sleep(delay).await;
    }
    Ok(())
}

fn simulated_latency(config: &MockConfig) -> Duration {
    if config.latency.is_zero() {
        return Duration::ZERO;
    }

    let mean = config.latency.as_secs_f64();
    match Normal::new(mean, config.jitter.as_secs_f64()) {
        Ok(normal) => Duration::from_secs_f64(normal.sample(&mut rand::thread_rng()).max(0.)),
        Err(_) => config.latency,
    }
}
