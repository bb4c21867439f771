use std::collections::HashMap;

use ::redis::aio::ConnectionManager;
use ::redis::{AsyncCommands, RedisError, Script};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use super::{IncrementOutcome, QuotaStore, StoreError, UsageRecord};
use crate::quota::features::Feature;
use crate::quota::period::Period;

/// Check-and-increment executed atomically by the Redis server.
/// Returns the post-increment count, or -1 when the cap is already reached.
const TRY_INCREMENT_LUA: &str = r#"
local count = tonumber(redis.call('HGET', KEYS[1], 'usage_count') or '0')
local cap = tonumber(ARGV[1])
if count >= cap then
    return -1
end
count = redis.call('HINCRBY', KEYS[1], 'usage_count', 1)
redis.call('HSET', KEYS[1], 'last_used_at', ARGV[2])
return count
"#;

/// Redis-backed counters, one hash per (user, feature, period).
#[derive(Clone)]
pub struct RedisQuotaStore {
    conn: ConnectionManager,
    script: Script,
}

impl RedisQuotaStore {
    pub async fn connect(client: ::redis::Client) -> Result<Self, StoreError> {
        let conn = ConnectionManager::new(client).await.map_err(map_redis_error)?;
        info!("Redis quota store connected");
        Ok(Self {
            conn,
            script: Script::new(TRY_INCREMENT_LUA),
        })
    }
}

fn usage_key(user_id: Uuid, feature: Feature, period: Period) -> String {
    format!("quota:{}:{}:{}", user_id, feature.as_str(), period.key())
}

#[async_trait]
impl QuotaStore for RedisQuotaStore {
    fn backend(&self) -> &'static str {
        "redis"
    }

    async fn read(
        &self,
        user_id: Uuid,
        feature: Feature,
        period: Period,
    ) -> Result<Option<UsageRecord>, StoreError> {
        let mut conn = self.conn.clone();
        let fields: HashMap<String, String> = conn
            .hgetall(usage_key(user_id, feature, period))
            .await
            .map_err(map_redis_error)?;

        record_from_fields(user_id, feature, period, &fields)
    }

    async fn try_increment(
        &self,
        user_id: Uuid,
        feature: Feature,
        period: Period,
        cap: u32,
    ) -> Result<IncrementOutcome, StoreError> {
        let key = usage_key(user_id, feature, period);
        let mut conn = self.conn.clone();

        let result: i64 = self
            .script
            .key(&key)
            .arg(cap)
            .arg(Utc::now().to_rfc3339())
            .invoke_async(&mut conn)
            .await
            .map_err(map_redis_error)?;

        debug!(%key, result, "quota script");

        script_outcome(result)
    }
}

/// Builds a record from `HGETALL` output. An empty hash means no record;
/// a hash with missing or unparseable fields is treated as a store fault.
fn record_from_fields(
    user_id: Uuid,
    feature: Feature,
    period: Period,
    fields: &HashMap<String, String>,
) -> Result<Option<UsageRecord>, StoreError> {
    if fields.is_empty() {
        return Ok(None);
    }

    let usage_count = fields
        .get("usage_count")
        .and_then(|v| v.parse::<u32>().ok())
        .ok_or_else(|| corrupt(user_id, feature, period, "usage_count"))?;
    let last_used_at = fields
        .get("last_used_at")
        .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| corrupt(user_id, feature, period, "last_used_at"))?;

    Ok(Some(UsageRecord {
        user_id,
        feature,
        period,
        usage_count,
        last_used_at,
    }))
}

fn corrupt(user_id: Uuid, feature: Feature, period: Period, field: &str) -> StoreError {
    StoreError::Unavailable(format!(
        "missing or invalid {field} in {}",
        usage_key(user_id, feature, period)
    ))
}

/// Interprets the script's return value: -1 is the at-cap sentinel, a
/// positive value is the post-increment count.
fn script_outcome(result: i64) -> Result<IncrementOutcome, StoreError> {
    match result {
        -1 => Ok(IncrementOutcome::LimitReached),
        n if n >= 1 => u32::try_from(n)
            .map(|new_count| IncrementOutcome::Admitted { new_count })
            .map_err(|_| StoreError::Unavailable(format!("quota script returned {n}"))),
        n => Err(StoreError::Unavailable(format!("quota script returned {n}"))),
    }
}

fn map_redis_error(err: RedisError) -> StoreError {
    if err.is_timeout() {
        StoreError::Timeout
    } else {
        StoreError::Unavailable(err.to_string())
    }
}
