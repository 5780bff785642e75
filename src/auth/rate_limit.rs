use std::{collections::HashMap, net::SocketAddr, time::Duration};

use axum::{
    extract::{ConnectInfo, Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::{config::LoginRateLimitConfig, error::AppError, state::AppState};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitResult {
    pub allowed: bool,
    pub remaining: u32,
}

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

/// Fixed-window attempt counter keyed by caller.
pub struct LoginRateLimiter {
    max_attempts: u32,
    window: Duration,
    trust_proxy: bool,
    windows: Mutex<HashMap<String, Window>>,
}

impl LoginRateLimiter {
    pub fn from_config(cfg: &LoginRateLimitConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts,
            window: Duration::from_millis(cfg.window_ms),
            trust_proxy: cfg.trust_proxy,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn trusts_proxy(&self) -> bool {
        self.trust_proxy
    }

    pub fn check_and_increment(&self, key: &str) -> RateLimitResult {
        self.check_and_increment_at(key, Instant::now())
    }

    fn check_and_increment_at(&self, key: &str, now: Instant) -> RateLimitResult {
        let mut windows = self.windows.lock();
        // stale windows are dropped lazily to bound the map
        windows.retain(|_, w| now.duration_since(w.started) < self.window);

        let w = windows.entry(key.to_string()).or_insert(Window {
            started: now,
            count: 0,
        });
        if w.count >= self.max_attempts {
            return RateLimitResult {
                allowed: false,
                remaining: 0,
            };
        }
        w.count += 1;
        RateLimitResult {
            allowed: true,
            remaining: self.max_attempts - w.count,
        }
    }
}

/// Peer address of the caller. The first `x-forwarded-for` hop is used
/// instead only when `trust_proxy` is set, since clients control that header.
pub fn client_key(headers: &HeaderMap, peer: Option<SocketAddr>, trust_proxy: bool) -> String {
    let forwarded = trust_proxy
        .then(|| {
            headers
                .get("x-forwarded-for")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.split(',').next())
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        })
        .flatten();
    forwarded
        .or_else(|| peer.map(|p| p.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

pub async fn limit_login(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);
    let key = client_key(req.headers(), peer, state.login_limiter.trusts_proxy());

    let result = state.login_limiter.check_and_increment(&key);
    if !result.allowed {
        warn!(client = %key, "login rate limit exceeded");
        return Err(AppError::RateLimited);
    }
    debug!(client = %key, remaining = result.remaining, "login attempt counted");
    Ok(next.run(req).await)
}
