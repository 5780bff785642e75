use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use crate::state::AppState;

mod claims;
pub mod csrf;
mod dto;
pub mod extractors;
pub mod handlers;
pub mod jwt;
pub mod password;
pub mod rate_limit;
pub(crate) mod services;

pub use dto::PublicUser;
pub use extractors::{AdminUser, AuthUser};

/// `/csrf-token`, `/register`, `/login`, `/profile`; nested under `/api`.
pub fn router(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/csrf-token", get(csrf::issue_token))
        .route("/register", post(handlers::register))
        .route(
            "/login",
            post(handlers::login).layer(middleware::from_fn_with_state(
                state.clone(),
                rate_limit::limit_login,
            )),
        )
        .route("/profile", get(handlers::profile))
}
