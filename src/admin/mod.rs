use axum::{routing::get, Router};

use crate::state::AppState;

pub mod handlers;

/// Nested under `/admin`.
pub fn router() -> Router<AppState> {
    Router::new().route("/dashboard", get(handlers::dashboard))
}
