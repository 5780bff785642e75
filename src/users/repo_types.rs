use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Role {
    #[default]
    #[serde(rename = "ROLE_CUSTOMER")]
    Customer,
    #[serde(rename = "ROLE_ADMIN")]
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Customer => "ROLE_CUSTOMER",
            Role::Admin => "ROLE_ADMIN",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// User record as persisted in the document store.
///
/// Carries the password hash, so handlers must map it to a public DTO
/// before returning anything.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub email: String,
    pub password_hash: String,
    #[serde(default)]
    pub role: Role,
    pub referral_code: String,
    #[serde(default)]
    pub referred_by: Option<String>,
    #[serde(default)]
    pub reward_balance: f64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Input to `UserStore::create`. Email is expected to be normalized already.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub referred_by: Option<String>,
}

/// Partial update applied by `UserStore::update`; `None` leaves a field as is.
///
/// Identity, referral fields and the reward balance cannot be patched.
#[derive(Debug, Clone, Default)]
pub struct UserPatch {
    pub role: Option<Role>,
}

impl UserPatch {
    pub(crate) fn apply(self, user: &mut User) {
        if let Some(role) = self.role {
            user.role = role;
        }
    }
}
