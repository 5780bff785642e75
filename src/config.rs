use std::path::PathBuf;
use std::str::FromStr;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
}

/// Argon2id cost parameters. Applied to new hashes only; verification reads
/// the parameters embedded in the stored hash.
#[derive(Debug, Clone, Deserialize)]
pub struct PasswordConfig {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AntiForgeryConfig {
    pub enabled: bool,
    pub ttl_secs: u64,
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginRateLimitConfig {
    pub max_attempts: u32,
    pub window_ms: u64,
    /// Key callers on the first `x-forwarded-for` hop instead of the peer
    /// address. Only safe behind a proxy that overwrites the header.
    pub trust_proxy: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub data_path: PathBuf,
    pub jwt: JwtConfig,
    pub password: PasswordConfig,
    pub anti_forgery: AntiForgeryConfig,
    pub login_rate_limit: LoginRateLimitConfig,
    pub reward_rate: f64,
    pub bootstrap_admin_email: Option<String>,
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let jwt = JwtConfig {
            secret: std::env::var("JWT_SECRET")?,
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "refshop".into()),
            audience: std::env::var("JWT_AUDIENCE").unwrap_or_else(|_| "refshop-users".into()),
            ttl_minutes: env_or("JWT_TTL_MINUTES", 60 * 24),
        };
        let password = PasswordConfig {
            memory_kib: env_or("ARGON2_MEMORY_KIB", 19 * 1024),
            iterations: env_or("ARGON2_ITERATIONS", 2),
            parallelism: env_or("ARGON2_PARALLELISM", 1),
        };
        let anti_forgery = AntiForgeryConfig {
            enabled: env_or("CSRF_ENABLED", true),
            ttl_secs: env_or("CSRF_TTL_SECS", 60 * 60),
            sweep_interval_secs: env_or("CSRF_SWEEP_SECS", 30 * 60),
        };
        let login_rate_limit = LoginRateLimitConfig {
            max_attempts: env_or("RATE_LIMIT_MAX_ATTEMPTS", 5),
            window_ms: env_or("RATE_LIMIT_WINDOW_MS", 15 * 60 * 1000),
            trust_proxy: env_or("TRUST_PROXY", false),
        };

        let config = Self {
            data_path: std::env::var("DATA_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("data/users.json")),
            jwt,
            password,
            anti_forgery,
            login_rate_limit,
            reward_rate: env_or("REWARD_RATE", 0.02),
            bootstrap_admin_email: std::env::var("BOOTSTRAP_ADMIN_EMAIL")
                .ok()
                .map(|v| v.trim().to_lowercase())
                .filter(|v| !v.is_empty()),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(!self.jwt.secret.is_empty(), "JWT_SECRET must not be empty");
        anyhow::ensure!(self.jwt.ttl_minutes > 0, "JWT_TTL_MINUTES must be positive");
        anyhow::ensure!(
            self.reward_rate.is_finite() && (0.0..=1.0).contains(&self.reward_rate),
            "REWARD_RATE must be within [0, 1], got {}",
            self.reward_rate
        );
        anyhow::ensure!(
            self.anti_forgery.ttl_secs > 0 && self.anti_forgery.sweep_interval_secs > 0,
            "CSRF_TTL_SECS and CSRF_SWEEP_SECS must be positive"
        );
        anyhow::ensure!(
            self.login_rate_limit.max_attempts > 0 && self.login_rate_limit.window_ms > 0,
            "login rate limit must allow at least one attempt per non-empty window"
        );
        Ok(())
    }
}
