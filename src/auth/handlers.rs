use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, HeaderValue},
    response::{IntoResponse, Redirect},
    Json,
};
use anyhow::Context;
use tracing::{info, instrument, warn};

use crate::{
    auth::{
        dto::{LoginRequest, LoginResponse, ProfileResponse, PublicUser, RegisterRequest, RegisterResponse},
        extractors::AuthUser,
        services::{
            check_password_strength, extract_cookie, is_valid_email, normalize_email,
            REFERRAL_COOKIE,
        },
    },
    error::AppError,
    extract::ApiJson,
    state::AppState,
    users::{referral, NewUser, Role},
};

const REFERRAL_COOKIE_MAX_AGE_SECS: u64 = 30 * 24 * 60 * 60;

/// Resolve the referral cookie to a code that exists right now; anything
/// else is silently dropped.
async fn referral_from_cookie(state: &AppState, headers: &HeaderMap) -> Result<Option<String>, AppError> {
    let Some(code) = extract_cookie(headers, REFERRAL_COOKIE) else {
        return Ok(None);
    };
    let code = code.trim().to_uppercase();
    if !referral::is_well_formed(&code) {
        warn!(code = %code, "malformed referral cookie ignored");
        return Ok(None);
    }
    match state.users.find_by_referral_code(&code).await? {
        Some(_) => Ok(Some(code)),
        None => {
            warn!(code = %code, "unknown referral code ignored");
            Ok(None)
        }
    }
}

#[instrument(skip(state, headers, payload))]
pub async fn register(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiJson(mut payload): ApiJson<RegisterRequest>,
) -> Result<Json<RegisterResponse>, AppError> {
    payload.email = normalize_email(&payload.email);

    if !is_valid_email(&payload.email) {
        warn!(email = %payload.email, "invalid email");
        return Err(AppError::Validation("Invalid email".into()));
    }
    if let Err(e) = check_password_strength(&payload.password) {
        warn!(email = %payload.email, "weak password");
        return Err(e);
    }

    if state.users.find_by_email(&payload.email).await?.is_some() {
        warn!(email = %payload.email, "email already registered");
        return Err(AppError::Conflict("Email already registered".into()));
    }

    let referred_by = referral_from_cookie(&state, &headers).await?;

    let hasher = state.hasher.clone();
    let password = std::mem::take(&mut payload.password);
    let password_hash = tokio::task::spawn_blocking(move || hasher.hash(&password))
        .await
        .context("join password hashing task")??;

    // create() re-checks the email under the write lock
    let user = state
        .users
        .create(NewUser {
            email: payload.email,
            password_hash,
            role: Role::Customer,
            referred_by,
        })
        .await?;

    info!(email = %user.email, referred_by = ?user.referred_by, "user registered");
    Ok(Json(RegisterResponse {
        success: true,
        message: "Registration successful, please log in".into(),
    }))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    ApiJson(mut payload): ApiJson<LoginRequest>,
) -> Result<Json<LoginResponse>, AppError> {
    payload.email = normalize_email(&payload.email);

    if !is_valid_email(&payload.email) {
        warn!(email = %payload.email, "invalid email");
        return Err(AppError::Validation("Invalid email".into()));
    }
    if payload.password.is_empty() {
        return Err(AppError::Validation("Password must not be empty".into()));
    }

    let Some(user) = state.users.find_by_email(&payload.email).await? else {
        warn!(email = %payload.email, "login unknown email");
        return Err(AppError::InvalidCredentials);
    };

    let hasher = state.hasher.clone();
    let password = std::mem::take(&mut payload.password);
    let stored = user.password_hash.clone();
    let ok = tokio::task::spawn_blocking(move || hasher.verify(&password, &stored))
        .await
        .context("join password verification task")?;

    if !ok {
        warn!(email = %payload.email, "login invalid password");
        return Err(AppError::InvalidCredentials);
    }

    let token = state.keys.issue(&user.email, user.role)?;

    info!(email = %user.email, role = %user.role, "user logged in");
    Ok(Json(LoginResponse {
        success: true,
        message: "Login successful".into(),
        token,
        user: PublicUser::from_user(&user),
    }))
}

#[instrument(skip(state))]
pub async fn profile(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
) -> Result<Json<ProfileResponse>, AppError> {
    let user = state
        .users
        .find_by_email(&principal.email)
        .await?
        .ok_or(AppError::NotFound)?;

    Ok(Json(ProfileResponse {
        success: true,
        user: PublicUser::from_user(&user).with_referrer(&user),
    }))
}

/// Referral link: remember the code in a cookie and send the visitor home.
#[instrument]
pub async fn referral_link(Path(code): Path<String>) -> Result<impl IntoResponse, AppError> {
    let code = code.trim().to_uppercase();
    if !referral::is_well_formed(&code) {
        return Err(AppError::Validation("Invalid referral code".into()));
    }
    let cookie = format!(
        "{REFERRAL_COOKIE}={code}; HttpOnly; SameSite=Lax; Path=/; Max-Age={REFERRAL_COOKIE_MAX_AGE_SECS}"
    );
    let cookie = HeaderValue::from_str(&cookie).context("build referral cookie")?;
    Ok(([(header::SET_COOKIE, cookie)], Redirect::to("/")))
}
