use std::sync::Arc;

use time::OffsetDateTime;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::storage::DocumentStore;
use crate::users::{
    referral::generate_referral_code,
    repo_types::{NewUser, User, UserPatch},
};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("email already registered")]
    DuplicateEmail,
    #[error("user not found")]
    NotFound,
    #[error(transparent)]
    Persistence(#[from] anyhow::Error),
}

/// Credential store and referral ledger over a whole-set document store.
///
/// Mutations hold `write_lock` across the full read-modify-write cycle, so
/// concurrent writers never clobber each other. Reads go straight to the
/// document store.
pub struct UserStore {
    docs: Arc<dyn DocumentStore<User>>,
    write_lock: Mutex<()>,
}

impl UserStore {
    pub fn new(docs: Arc<dyn DocumentStore<User>>) -> Self {
        Self {
            docs,
            write_lock: Mutex::new(()),
        }
    }

    pub async fn list(&self) -> Result<Vec<User>, StoreError> {
        Ok(self.docs.get_all().await?)
    }

    pub async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let users = self.docs.get_all().await?;
        Ok(users.into_iter().find(|u| u.email == email))
    }

    pub async fn find_by_referral_code(&self, code: &str) -> Result<Option<User>, StoreError> {
        let users = self.docs.get_all().await?;
        Ok(users.into_iter().find(|u| u.referral_code == code))
    }

    /// Create a user with a freshly allocated, unique referral code.
    pub async fn create(&self, new: NewUser) -> Result<User, StoreError> {
        self.create_with_codes(new, generate_referral_code).await
    }

    pub(crate) async fn create_with_codes<F>(
        &self,
        new: NewUser,
        mut next_code: F,
    ) -> Result<User, StoreError>
    where
        F: FnMut() -> String,
    {
        let _guard = self.write_lock.lock().await;
        let mut users = self.docs.get_all().await?;

        if users.iter().any(|u| u.email == new.email) {
            return Err(StoreError::DuplicateEmail);
        }

        let mut referral_code = next_code();
        while users.iter().any(|u| u.referral_code == referral_code) {
            debug!(code = %referral_code, "referral code collision, retrying");
            referral_code = next_code();
        }

        let user = User {
            email: new.email,
            password_hash: new.password_hash,
            role: new.role,
            referral_code,
            referred_by: new.referred_by,
            reward_balance: 0.0,
            created_at: OffsetDateTime::now_utc(),
        };
        users.push(user.clone());
        self.docs.put_all(&users).await?;
        Ok(user)
    }

    /// Merge `patch` into the user identified by `email`. `Ok(None)` when no
    /// such user exists.
    pub async fn update(&self, email: &str, patch: UserPatch) -> Result<Option<User>, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut users = self.docs.get_all().await?;
        let Some(user) = users.iter_mut().find(|u| u.email == email) else {
            return Ok(None);
        };
        patch.apply(user);
        let updated = user.clone();
        self.docs.put_all(&users).await?;
        Ok(Some(updated))
    }

    /// Add `bonus` to the balance of the user owning `referral_code`.
    ///
    /// The only path that changes `reward_balance`; the balance never
    /// decreases. `Ok(None)` when the code no longer resolves.
    pub async fn credit_reward(
        &self,
        referral_code: &str,
        bonus: f64,
    ) -> Result<Option<User>, StoreError> {
        if !bonus.is_finite() || bonus < 0.0 {
            return Err(StoreError::Persistence(anyhow::anyhow!(
                "refusing non-additive reward credit {bonus}"
            )));
        }
        let _guard = self.write_lock.lock().await;
        let mut users = self.docs.get_all().await?;
        let Some(user) = users.iter_mut().find(|u| u.referral_code == referral_code) else {
            return Ok(None);
        };
        user.reward_balance += bonus;
        let updated = user.clone();
        self.docs.put_all(&users).await?;
        info!(email = %updated.email, bonus, balance = updated.reward_balance, "reward credited");
        Ok(Some(updated))
    }
}
