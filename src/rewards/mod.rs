use axum::{routing::post, Router};

use crate::state::AppState;

mod dto;
pub mod handlers;
pub mod services;

pub use services::RewardEngine;

pub fn router() -> Router<AppState> {
    Router::new().route("/checkout", post(handlers::checkout))
}
