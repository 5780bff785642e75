use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use axum::{
    extract::{Request, State},
    http::Method,
    middleware::Next,
    response::Response,
    Json,
};
use parking_lot::Mutex;
use rand::{rngs::OsRng, RngCore};
use serde::Serialize;
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::{error::AppError, state::AppState};

pub const CSRF_HEADER: &str = "x-csrf-token";

/// Single-use anti-forgery token service. Kept behind a trait so an external
/// cache can replace the in-process map without touching callers.
#[async_trait]
pub trait AntiForgeryStore: Send + Sync {
    async fn issue(&self) -> String;
    /// Check-and-remove in one step. `true` at most once per issued token.
    async fn consume(&self, token: &str) -> bool;
    /// Drop tokens past the retention window; returns how many were removed.
    async fn purge_expired(&self) -> usize;
}

pub struct MemoryTokenStore {
    tokens: Mutex<HashMap<String, OffsetDateTime>>,
    ttl: time::Duration,
}

impl MemoryTokenStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            tokens: Mutex::new(HashMap::new()),
            ttl: time::Duration::seconds(ttl.as_secs() as i64),
        }
    }

    fn issue_at(&self, now: OffsetDateTime) -> String {
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        let token = hex::encode(bytes);
        self.tokens.lock().insert(token.clone(), now);
        token
    }

    fn consume_at(&self, token: &str, now: OffsetDateTime) -> bool {
        match self.tokens.lock().remove(token) {
            Some(issued_at) => now - issued_at <= self.ttl,
            None => false,
        }
    }

    fn purge_at(&self, now: OffsetDateTime) -> usize {
        let mut tokens = self.tokens.lock();
        let before = tokens.len();
        tokens.retain(|_, issued_at| now - *issued_at <= self.ttl);
        before - tokens.len()
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.tokens.lock().len()
    }
}

#[async_trait]
impl AntiForgeryStore for MemoryTokenStore {
    async fn issue(&self) -> String {
        self.issue_at(OffsetDateTime::now_utc())
    }

    async fn consume(&self, token: &str) -> bool {
        self.consume_at(token, OffsetDateTime::now_utc())
    }

    async fn purge_expired(&self) -> usize {
        self.purge_at(OffsetDateTime::now_utc())
    }
}

/// Periodically purge abandoned tokens.
pub fn spawn_sweeper(store: Arc<dyn AntiForgeryStore>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
        loop {
            ticker.tick().await;
            let purged = store.purge_expired().await;
            if purged > 0 {
                info!(purged, "expired anti-forgery tokens purged");
            }
        }
    })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CsrfTokenResponse {
    pub csrf_token: String,
}

pub async fn issue_token(State(state): State<AppState>) -> Json<CsrfTokenResponse> {
    let csrf_token = state.csrf.issue().await;
    debug!("anti-forgery token issued");
    Json(CsrfTokenResponse { csrf_token })
}

fn is_safe(method: &Method) -> bool {
    matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS)
}

/// Rejects state-mutating requests that lack a live token in `x-csrf-token`.
pub async fn require_anti_forgery(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    if is_safe(req.method()) {
        return Ok(next.run(req).await);
    }

    let token = req
        .headers()
        .get(CSRF_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    let Some(token) = token else {
        warn!(method = %req.method(), uri = %req.uri(), "anti-forgery token missing");
        return Err(AppError::InvalidAntiForgeryToken);
    };
    if !state.csrf.consume(&token).await {
        warn!(method = %req.method(), uri = %req.uri(), "anti-forgery token rejected");
        return Err(AppError::InvalidAntiForgeryToken);
    }

    Ok(next.run(req).await)
}
