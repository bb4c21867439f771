//! Durable per-(user, feature, period) counters.
//!
//! Every backend implements `try_increment` as ONE storage-side atomic
//! operation. Reading the count and writing `count + 1` in two round trips
//! lets concurrent requests overshoot the cap and is not acceptable here.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::quota::features::Feature;
use crate::quota::period::Period;

pub mod memory;
pub mod postgres;
pub mod redis;

pub use self::memory::MemoryQuotaStore;
pub use self::postgres::PgQuotaStore;
pub use self::redis::RedisQuotaStore;

/// Consumption of one feature by one user within one period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UsageRecord {
    pub user_id: Uuid,
    pub feature: Feature,
    pub period: Period,
    pub usage_count: u32,
    pub last_used_at: DateTime<Utc>,
}

/// Result of a conditional increment. `LimitReached` is a normal outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncrementOutcome {
    Admitted { new_count: u32 },
    LimitReached,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("quota store unavailable: {0}")]
    Unavailable(String),

    #[error("quota store timed out")]
    Timeout,

    /// Serialization failure or deadlock; safe to retry.
    #[error("quota store conflict: {0}")]
    Conflict(String),
}

#[async_trait]
pub trait QuotaStore: Send + Sync {
    /// Backend name for logs and the health endpoint.
    fn backend(&self) -> &'static str;

    async fn read(
        &self,
        user_id: Uuid,
        feature: Feature,
        period: Period,
    ) -> Result<Option<UsageRecord>, StoreError>;

    /// Atomically: create the record at 1 if absent, increment if below
    /// `cap`, otherwise leave it untouched and report `LimitReached`.
    async fn try_increment(
        &self,
        user_id: Uuid,
        feature: Feature,
        period: Period,
        cap: u32,
    ) -> Result<IncrementOutcome, StoreError>;
}
