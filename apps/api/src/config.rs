use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};

use crate::quota::{FeatureLimitTable, QuotaPolicy, StoreFailurePolicy};

/// Where usage counters live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres { database_url: String },
    Redis { redis_url: String },
    /// Single-process only. Local development and tests.
    Memory,
}

/// Application configuration loaded from environment variables.
/// Fails at startup if required variables are missing or malformed.
#[derive(Debug, Clone)]
pub struct Config {
    pub backend: StoreBackend,
    pub limits: FeatureLimitTable,
    pub policy: QuotaPolicy,
    pub port: u16,
    pub rust_log: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let require = |key: &str| {
            var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
        };

        let backend = match var("QUOTA_BACKEND").as_deref().unwrap_or("postgres") {
            "postgres" => StoreBackend::Postgres {
                database_url: require("DATABASE_URL")?,
            },
            "redis" => StoreBackend::Redis {
                redis_url: require("REDIS_URL")?,
            },
            "memory" => StoreBackend::Memory,
            other => {
                return Err(anyhow!(
                    "QUOTA_BACKEND must be one of postgres, redis, memory (got '{other}')"
                ))
            }
        };

        let limits = FeatureLimitTable::defaults()
            .with_overrides(&var("QUOTA_LIMITS").unwrap_or_default())
            .context("QUOTA_LIMITS is invalid")?;

        let defaults = QuotaPolicy::default();
        let policy = QuotaPolicy {
            on_store_failure: match var("QUOTA_STORE_FAILURE_POLICY") {
                Some(raw) => StoreFailurePolicy::from_str(&raw)
                    .context("QUOTA_STORE_FAILURE_POLICY is invalid")?,
                None => defaults.on_store_failure,
            },
            store_timeout: match var("QUOTA_STORE_TIMEOUT_MS") {
                Some(raw) => parse_store_timeout(&raw)?,
                None => defaults.store_timeout,
            },
            conflict_retries: match var("QUOTA_CONFLICT_RETRIES") {
                Some(raw) => raw
                    .parse::<u32>()
                    .context("QUOTA_CONFLICT_RETRIES must be a non-negative integer")?,
                None => defaults.conflict_retries,
            },
        };

        Ok(Config {
            backend,
            limits,
            policy,
            port: var("PORT")
                .unwrap_or_else(|| "8080".to_string())
                .parse::<u16>()
                .context("PORT must be a valid port number")?,
            rust_log: var("RUST_LOG").unwrap_or_else(|| "info".to_string()),
        })
    }
}

/// A zero deadline would time out every store call and hand every decision
/// to the failure policy, so it is refused outright.
fn parse_store_timeout(raw: &str) -> Result<Duration> {
    let millis = raw
        .trim()
        .parse::<u64>()
        .context("QUOTA_STORE_TIMEOUT_MS must be a number of milliseconds")?;
    if millis == 0 {
        bail!("QUOTA_STORE_TIMEOUT_MS must be greater than zero");
    }
    Ok(Duration::from_millis(millis))
}
