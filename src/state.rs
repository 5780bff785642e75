use std::{sync::Arc, time::Duration};

use tracing::{info, warn};

use crate::auth::{
    csrf::{AntiForgeryStore, MemoryTokenStore},
    jwt::JwtKeys,
    password::PasswordHashing,
    rate_limit::LoginRateLimiter,
};
use crate::config::AppConfig;
use crate::rewards::RewardEngine;
use crate::storage::{DocumentStore, JsonFileStore};
use crate::users::{Role, User, UserPatch, UserStore};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub users: Arc<UserStore>,
    pub keys: Arc<JwtKeys>,
    pub hasher: PasswordHashing,
    pub csrf: Arc<dyn AntiForgeryStore>,
    pub login_limiter: Arc<LoginRateLimiter>,
    pub rewards: RewardEngine,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = AppConfig::from_env()?;
        let docs = Arc::new(JsonFileStore::new(config.data_path.clone())) as Arc<dyn DocumentStore<User>>;

        // fail fast on an unreadable data file instead of at first request
        let existing = docs.get_all().await?;
        info!(path = %config.data_path.display(), users = existing.len(), "user store loaded");

        let state = Self::from_parts(Arc::new(config), docs)?;
        state.bootstrap_admin().await?;
        Ok(state)
    }

    pub fn from_parts(
        config: Arc<AppConfig>,
        docs: Arc<dyn DocumentStore<User>>,
    ) -> anyhow::Result<Self> {
        let users = Arc::new(UserStore::new(docs));
        let csrf = Arc::new(MemoryTokenStore::new(Duration::from_secs(
            config.anti_forgery.ttl_secs,
        ))) as Arc<dyn AntiForgeryStore>;

        Ok(Self {
            keys: Arc::new(JwtKeys::from_config(&config.jwt)),
            hasher: PasswordHashing::from_config(&config.password)?,
            csrf,
            login_limiter: Arc::new(LoginRateLimiter::from_config(&config.login_rate_limit)),
            rewards: RewardEngine::new(users.clone(), config.reward_rate),
            users,
            config,
        })
    }

    /// Promote `BOOTSTRAP_ADMIN_EMAIL` to admin, if that user exists.
    pub async fn bootstrap_admin(&self) -> anyhow::Result<()> {
        let Some(email) = self.config.bootstrap_admin_email.as_deref() else {
            return Ok(());
        };
        let patch = UserPatch {
            role: Some(Role::Admin),
        };
        match self.users.update(email, patch).await? {
            Some(user) => info!(email = %user.email, "bootstrap admin promoted"),
            None => warn!(email = %email, "bootstrap admin email not registered; skipping"),
        }
        Ok(())
    }

    #[cfg(test)]
    pub fn fake() -> Self {
        Self::fake_with(|_| {})
    }

    #[cfg(test)]
    pub fn fake_with(tweak: impl FnOnce(&mut AppConfig)) -> Self {
        use crate::config::{AntiForgeryConfig, JwtConfig, LoginRateLimitConfig, PasswordConfig};
        use crate::storage::MemoryStore;

        let mut config = AppConfig {
            data_path: "unused.json".into(),
            jwt: JwtConfig {
                secret: "test".into(),
                issuer: "test-issuer".into(),
                audience: "test-aud".into(),
                ttl_minutes: 60 * 24,
            },
            password: PasswordConfig {
                memory_kib: 1024,
                iterations: 1,
                parallelism: 1,
            },
            anti_forgery: AntiForgeryConfig {
                enabled: true,
                ttl_secs: 3600,
                sweep_interval_secs: 1800,
            },
            login_rate_limit: LoginRateLimitConfig {
                max_attempts: 5,
                window_ms: 15 * 60 * 1000,
                trust_proxy: false,
            },
            reward_rate: 0.02,
            bootstrap_admin_email: None,
        };
        tweak(&mut config);

        let docs = Arc::new(MemoryStore::<User>::new()) as Arc<dyn DocumentStore<User>>;
        Self::from_parts(Arc::new(config), docs).expect("fake state")
    }
}
