use std::env::var;
use std::time::Duration;

use dotenvy::dotenv;

use crate::requests::RequestPolicy;

/// Application configuration with environment variable overrides
#[derive(Debug, Clone)]
pub struct Config {
    /// Database file path
    /// Env: DATABASE_PATH (default: "azure.db")
    pub database_path: String,

    /// How long a record stays cached after its owner leaves
    /// Env: CACHE_GRACE_PERIOD_SECS (default: 1800)
    pub cache_grace_period: Duration,

    /// Interval between player cache sweeps
    /// Env: PLAYER_SWEEP_INTERVAL_SECS (default: 60)
    pub player_sweep_interval: Duration,

    /// Lifespan of an interaction request (e.g. a teleport request)
    /// Env: REQUEST_LIFESPAN_SECS (default: 30)
    pub request_lifespan: Duration,

    /// Interval between request table sweeps
    /// Env: REQUEST_SWEEP_INTERVAL_SECS (default: 15)
    /// Shorter than the player sweep since requests live for seconds, not minutes
    pub request_sweep_interval: Duration,

    /// Interval between flushes of modified records to the database
    /// Env: AUTOSAVE_INTERVAL_SECS (default: 300)
    pub autosave_interval: Duration,

    /// What to do when a player issues a request while one is still pending
    /// Env: REQUEST_POLICY (default: "reject", or "replace")
    pub request_policy: RequestPolicy,
}

impl Config {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        let _ = dotenv(); //for debugging mostly
        let defaults = Self::default();
        Self {
            database_path: env_or_default_string("DATABASE_PATH", &defaults.database_path),
            cache_grace_period: env_secs_or_default(
                "CACHE_GRACE_PERIOD_SECS",
                defaults.cache_grace_period,
            ),
            player_sweep_interval: env_secs_or_default(
                "PLAYER_SWEEP_INTERVAL_SECS",
                defaults.player_sweep_interval,
            ),
            request_lifespan: env_secs_or_default("REQUEST_LIFESPAN_SECS", defaults.request_lifespan),
            request_sweep_interval: env_secs_or_default(
                "REQUEST_SWEEP_INTERVAL_SECS",
                defaults.request_sweep_interval,
            ),
            autosave_interval: env_secs_or_default("AUTOSAVE_INTERVAL_SECS", defaults.autosave_interval),
            request_policy: env_or_default("REQUEST_POLICY", defaults.request_policy),
        }
    }
}

impl Default for Config {
    /// Create configuration with all default values
    fn default() -> Self {
        Self {
            database_path: "azure.db".to_string(),
            cache_grace_period: Duration::from_secs(30 * 60),
            player_sweep_interval: Duration::from_secs(60),
            request_lifespan: Duration::from_secs(30),
            request_sweep_interval: Duration::from_secs(15),
            autosave_interval: Duration::from_secs(5 * 60),
            request_policy: RequestPolicy::Reject,
        }
    }
}

/// Parse environment variable or return default value
fn env_or_default<T: std::str::FromStr>(key: &str, default: T) -> T {
    var(key)
        .ok()
        .and_then(|val| val.parse().ok())
        .unwrap_or(default)
}

/// Parse a whole number of seconds from an environment variable; zero is rejected
fn env_secs_or_default(key: &str, default: Duration) -> Duration {
    match env_or_default(key, 0u64) {
        0 => default,
        secs => Duration::from_secs(secs),
    }
}

/// Parse environment variable string or return default value
fn env_or_default_string(key: &str, default: &str) -> String {
    var(key).unwrap_or_else(|_| default.to_string())
}
