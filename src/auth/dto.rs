use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::users::{Role, User};

/// Request body for user registration.
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
}

/// Request body for login.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub success: bool,
    pub message: String,
    pub token: String,
    pub user: PublicUser,
}

#[derive(Debug, Serialize)]
pub struct ProfileResponse {
    pub success: bool,
    pub user: PublicUser,
}

/// Public part of the user returned to the client. Never holds the hash.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    pub email: String,
    pub role: Role,
    #[serde(with = "time::serde::rfc3339")]
    pub joined_at: OffsetDateTime,
    pub referral_code: String,
    pub reward_balance: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referred_by: Option<String>,
}

impl PublicUser {
    pub fn from_user(user: &User) -> Self {
        Self {
            email: user.email.clone(),
            role: user.role,
            joined_at: user.created_at,
            referral_code: user.referral_code.clone(),
            reward_balance: user.reward_balance,
            referred_by: None,
        }
    }

    pub fn with_referrer(mut self, user: &User) -> Self {
        self.referred_by = user.referred_by.clone();
        self
    }
}
