use async_trait::async_trait;
use axum::{extract::FromRequestParts, http::request::Parts};
use tracing::warn;

use crate::{error::AppError, state::AppState, users::Role};

/// Authenticated identity, built from the current user record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub email: String,
    pub role: Role,
}

/// Resolve a principal from a raw `Authorization` header value.
///
/// The role comes from the store, not from the token, so a role change
/// applies before old tokens expire.
pub async fn authenticate(state: &AppState, header: Option<&str>) -> Result<Principal, AppError> {
    let token = header
        .and_then(|h| h.strip_prefix("Bearer ").or_else(|| h.strip_prefix("bearer ")))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(AppError::Unauthenticated)?;

    let claims = state.keys.verify(token).map_err(|_| {
        warn!("invalid or expired token");
        AppError::Unauthenticated
    })?;

    let user = state
        .users
        .find_by_email(&claims.sub)
        .await?
        .ok_or_else(|| {
            warn!(email = %claims.sub, "token subject no longer exists");
            AppError::Unauthenticated
        })?;

    Ok(Principal {
        email: user.email,
        role: user.role,
    })
}

pub fn authorize(principal: &Principal, allowed: &[Role]) -> Result<(), AppError> {
    if allowed.contains(&principal.role) {
        Ok(())
    } else {
        warn!(email = %principal.email, role = %principal.role, "role not permitted");
        Err(AppError::Forbidden)
    }
}

/// Any authenticated user.
pub struct AuthUser(pub Principal);

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok());
        authenticate(state, header).await.map(AuthUser)
    }
}

/// Authenticated user holding `ROLE_ADMIN`.
pub struct AdminUser(pub Principal);

#[async_trait]
impl FromRequestParts<AppState> for AdminUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let AuthUser(principal) = AuthUser::from_request_parts(parts, state).await?;
        authorize(&principal, &[Role::Admin])?;
        Ok(AdminUser(principal))
    }
}
