use async_trait::async_trait;
use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

use super::{IncrementOutcome, QuotaStore, StoreError, UsageRecord};
use crate::models::usage::FeatureUsageRow;
use crate::quota::features::Feature;
use crate::quota::period::Period;

/// Postgres-backed counters in the `feature_usage` table.
#[derive(Clone)]
pub struct PgQuotaStore {
    pool: PgPool,
}

impl PgQuotaStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl QuotaStore for PgQuotaStore {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    async fn read(
        &self,
        user_id: Uuid,
        feature: Feature,
        period: Period,
    ) -> Result<Option<UsageRecord>, StoreError> {
        let row = sqlx::query_as::<_, FeatureUsageRow>(
            "SELECT * FROM feature_usage WHERE user_id = $1 AND feature = $2 AND period = $3",
        )
        .bind(user_id)
        .bind(feature.as_str())
        .bind(period.date())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        row.map(|row| {
            Ok(UsageRecord {
                user_id: row.user_id,
                feature,
                period,
                usage_count: stored_count(row.usage_count)?,
                last_used_at: row.last_used_at,
            })
        })
        .transpose()
    }

    async fn try_increment(
        &self,
        user_id: Uuid,
        feature: Feature,
        period: Period,
        cap: u32,
    ) -> Result<IncrementOutcome, StoreError> {
        // Insert-or-conditional-update in one statement. The row lock taken
        // by ON CONFLICT serializes concurrent callers on the same key, and
        // the WHERE clause skips the update (returning no row) at the cap.
        let new_count: Option<i32> = sqlx::query_scalar(
            r#"
            INSERT INTO feature_usage (user_id, feature, period, usage_count, last_used_at)
            VALUES ($1, $2, $3, 1, now())
            ON CONFLICT (user_id, feature, period) DO UPDATE
                SET usage_count = feature_usage.usage_count + 1,
                    last_used_at = now()
                WHERE feature_usage.usage_count < $4
            RETURNING usage_count
            "#,
        )
        .bind(user_id)
        .bind(feature.as_str())
        .bind(period.date())
        .bind(i64::from(cap))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        debug!(%user_id, %feature, %period, ?new_count, "feature_usage upsert");

        match new_count {
            Some(n) if n >= 1 => Ok(IncrementOutcome::Admitted {
                new_count: stored_count(n)?,
            }),
            Some(n) => Err(StoreError::Unavailable(format!(
                "feature_usage returned post-increment count {n}"
            ))),
            None => Ok(IncrementOutcome::LimitReached),
        }
    }
}

/// Rejects counts the table constraint should have made impossible.
fn stored_count(n: i32) -> Result<u32, StoreError> {
    u32::try_from(n)
        .map_err(|_| StoreError::Unavailable(format!("feature_usage holds invalid count {n}")))
}

/// serialization_failure and deadlock_detected are retryable.
const RETRYABLE_SQLSTATES: [&str; 2] = ["40001", "40P01"];

fn map_sqlx_error(err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::PoolTimedOut => StoreError::Timeout,
        sqlx::Error::Database(db)
            if db
                .code()
                .is_some_and(|code| RETRYABLE_SQLSTATES.contains(&&*code)) =>
        {
            StoreError::Conflict(db.to_string())
        }
        other => StoreError::Unavailable(other.to_string()),
    }
}
