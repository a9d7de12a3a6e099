//! Runtime configuration
//!
//! Values come from the process environment, after loading a `.env` file when
//! one is present.

use std::time::Duration;

use kyc_dsl_core::DEFAULT_OWNERSHIP_TOLERANCE;

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub connection_timeout: Duration,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgresql://localhost:5432/kyc_dsl".to_string()),
            max_connections: std::env::var("DATABASE_POOL_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),
            connection_timeout: Duration::from_secs(30),
        }
    }
}

impl DatabaseConfig {
    /// Connection URL with any password replaced, for logging
    pub fn masked_url(&self) -> String {
        mask_database_url(&self.database_url)
    }
}

#[derive(Debug, Clone)]
pub struct KycConfig {
    pub database: DatabaseConfig,
    /// Allowed gap between ownership totals and 100
    pub ownership_tolerance: f64,
    /// Upper bound on a remote amendment call
    pub remote_timeout: Duration,
    /// Attempts at saving a version before a conflict is surfaced
    pub store_max_retries: u32,
    /// Recorded as the actor of every validation
    pub validator_actor: String,
}

impl Default for KycConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            ownership_tolerance: DEFAULT_OWNERSHIP_TOLERANCE,
            remote_timeout: Duration::from_millis(30_000),
            store_max_retries: 3,
            validator_actor: "kyc-dsl".to_string(),
        }
    }
}

impl KycConfig {
    /// Load `.env` (if present) and read the environment
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let defaults = Self::default();
        Self {
            database: DatabaseConfig::default(),
            ownership_tolerance: env_parse("KYC_OWNERSHIP_TOLERANCE")
                .unwrap_or(defaults.ownership_tolerance),
            remote_timeout: env_parse("KYC_REMOTE_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.remote_timeout),
            store_max_retries: env_parse::<u32>("KYC_STORE_MAX_RETRIES")
                .filter(|n| *n > 0)
                .unwrap_or(defaults.store_max_retries),
            validator_actor: std::env::var("KYC_VALIDATOR_ACTOR")
                .ok()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .unwrap_or(defaults.validator_actor),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

/// Mask sensitive information in database URL for logging
pub fn mask_database_url(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(parsed) if parsed.password().is_some() => {
            let mut masked = parsed.clone();
            let _ = masked.set_password(Some("***"));
            masked.to_string()
        }
        Ok(parsed) => parsed.to_string(),
        Err(_) => "<invalid database url>".to_string(),
    }
}
