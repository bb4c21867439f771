use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Row of `feature_usage`: one counter per (user, feature, UTC day).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct FeatureUsageRow {
    pub user_id: Uuid,
    pub feature: String,
    pub period: NaiveDate,
    pub usage_count: i32,
    pub last_used_at: DateTime<Utc>,
}
