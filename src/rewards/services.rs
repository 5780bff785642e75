use std::sync::Arc;

use tracing::debug;

use crate::users::{StoreError, UserStore};

/// Credits a buyer's referrer with a fixed share of each purchase.
///
/// Not idempotent: every call credits again. Callers own de-duplication.
#[derive(Clone)]
pub struct RewardEngine {
    users: Arc<UserStore>,
    rate: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RewardCredit {
    pub referrer_email: String,
    pub bonus: f64,
}

impl RewardEngine {
    pub fn new(users: Arc<UserStore>, rate: f64) -> Self {
        Self { users, rate }
    }

    /// `Ok(None)` is the normal no-referral path.
    pub async fn on_purchase(
        &self,
        buyer_email: &str,
        amount: f64,
    ) -> Result<Option<RewardCredit>, StoreError> {
        let buyer = self
            .users
            .find_by_email(buyer_email)
            .await?
            .ok_or(StoreError::NotFound)?;

        let Some(code) = buyer.referred_by.as_deref() else {
            debug!(buyer = %buyer_email, "no referrer, nothing to credit");
            return Ok(None);
        };

        let bonus = amount * self.rate;
        match self.users.credit_reward(code, bonus).await? {
            Some(referrer) => {
                debug!(buyer = %buyer_email, referrer = %referrer.email, amount, bonus, "referral reward computed");
                Ok(Some(RewardCredit {
                    referrer_email: referrer.email,
                    bonus,
                }))
            }
            None => {
                debug!(buyer = %buyer_email, code, "referrer no longer exists");
                Ok(None)
            }
        }
    }
}
