//! Single-process store for tests and `QUOTA_BACKEND=memory` local runs.
//! Not shared between instances; use Postgres or Redis when scaled out.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use super::{IncrementOutcome, QuotaStore, StoreError, UsageRecord};
use crate::quota::features::Feature;
use crate::quota::period::Period;

type Key = (Uuid, Feature, Period);

#[derive(Debug, Default)]
pub struct MemoryQuotaStore {
    records: Mutex<HashMap<Key, UsageRecord>>,
}

impl MemoryQuotaStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QuotaStore for MemoryQuotaStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn read(
        &self,
        user_id: Uuid,
        feature: Feature,
        period: Period,
    ) -> Result<Option<UsageRecord>, StoreError> {
        let records = self
            .records
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store poisoned".to_string()))?;
        Ok(records.get(&(user_id, feature, period)).cloned())
    }

    async fn try_increment(
        &self,
        user_id: Uuid,
        feature: Feature,
        period: Period,
        cap: u32,
    ) -> Result<IncrementOutcome, StoreError> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store poisoned".to_string()))?;

        let now = Utc::now();
        match records.get_mut(&(user_id, feature, period)) {
            Some(record) if record.usage_count >= cap => Ok(IncrementOutcome::LimitReached),
            Some(record) => {
                record.usage_count += 1;
                record.last_used_at = now;
                Ok(IncrementOutcome::Admitted {
                    new_count: record.usage_count,
                })
            }
            None if cap == 0 => Ok(IncrementOutcome::LimitReached),
            None => {
                records.insert(
                    (user_id, feature, period),
                    UsageRecord {
                        user_id,
                        feature,
                        period,
                        usage_count: 1,
                        last_used_at: now,
                    },
                );
                Ok(IncrementOutcome::Admitted { new_count: 1 })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn period() -> Period {
        NaiveDate::from_ymd_opt(2024, 5, 1).unwrap().into()
    }

    #[tokio::test]
    async fn test_first_increment_creates_record() {
        let store = MemoryQuotaStore::new();
        let user = Uuid::new_v4();

        assert_eq!(store.read(user, Feature::AtsScoring, period()).await, Ok(None));
        let outcome = store
            .try_increment(user, Feature::AtsScoring, period(), 3)
            .await
            .unwrap();
        assert_eq!(outcome, IncrementOutcome::Admitted { new_count: 1 });

        let record = store
            .read(user, Feature::AtsScoring, period())
            .await
            .unwrap()
            .expect("record created");
        assert_eq!(record.usage_count, 1);
        assert_eq!(record.feature, Feature::AtsScoring);
    }

    #[tokio::test]
    async fn test_at_cap_does_not_mutate() {
        let store = MemoryQuotaStore::new();
        let user = Uuid::new_v4();
        for expected in 1..=2 {
            assert_eq!(
                store
                    .try_increment(user, Feature::CoverLetter, period(), 2)
                    .await
                    .unwrap(),
                IncrementOutcome::Admitted { new_count: expected }
            );
        }
        let before = store
            .read(user, Feature::CoverLetter, period())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(
            store
                .try_increment(user, Feature::CoverLetter, period(), 2)
                .await
                .unwrap(),
            IncrementOutcome::LimitReached
        );
        let after = store
            .read(user, Feature::CoverLetter, period())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let store = MemoryQuotaStore::new();
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
        store
            .try_increment(alice, Feature::CoverLetter, period(), 1)
            .await
            .unwrap();

        let bob_outcome = store
            .try_increment(bob, Feature::CoverLetter, period(), 1)
            .await
            .unwrap();
        let other_feature = store
            .try_increment(alice, Feature::KeywordAnalysis, period(), 1)
            .await
            .unwrap();
        assert_eq!(bob_outcome, IncrementOutcome::Admitted { new_count: 1 });
        assert_eq!(other_feature, IncrementOutcome::Admitted { new_count: 1 });
    }
}
