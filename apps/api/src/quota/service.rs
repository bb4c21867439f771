//! Admission decisions for AI features.
//!
//! `check_and_consume` is the only gate callers need: it resolves the cap,
//! performs one atomic conditional increment in the store and always
//! returns a `Decision`. Infrastructure faults never reach the caller; they
//! are resolved by the configured `StoreFailurePolicy` and audited.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::quota::audit::{AuditEvent, AuditKind, AuditSink};
use crate::quota::features::{Feature, FeatureLimitTable, LimitConfigError};
use crate::quota::period::{Period, PeriodClock};
use crate::quota::store::{IncrementOutcome, QuotaStore, StoreError};

/// What to do when the store cannot produce a verified count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreFailurePolicy {
    /// Allow with `remaining: 1`. Excess AI calls cost money but are not a
    /// security problem, so this is the default.
    FailOpen,
    /// Deny with `remaining: 0`.
    FailClosed,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown store failure policy '{0}', expected fail_open or fail_closed")]
pub struct UnknownPolicy(pub String);

impl FromStr for StoreFailurePolicy {
    type Err = UnknownPolicy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fail_open" | "open" => Ok(StoreFailurePolicy::FailOpen),
            "fail_closed" | "closed" => Ok(StoreFailurePolicy::FailClosed),
            _ => Err(UnknownPolicy(s.to_string())),
        }
    }
}

impl fmt::Display for StoreFailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StoreFailurePolicy::FailOpen => "fail_open",
            StoreFailurePolicy::FailClosed => "fail_closed",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaPolicy {
    pub on_store_failure: StoreFailurePolicy,
    /// Upper bound on every store round trip.
    pub store_timeout: Duration,
    /// Extra attempts after a `StoreError::Conflict`.
    pub conflict_retries: u32,
}

impl Default for QuotaPolicy {
    fn default() -> Self {
        Self {
            on_store_failure: StoreFailurePolicy::FailOpen,
            store_timeout: Duration::from_millis(500),
            conflict_retries: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionOutcome {
    /// Counted against today's quota.
    Admitted,
    LimitReached,
    /// Unknown feature or missing cap. Always denied.
    NotConfigured,
    /// Store fault; the policy decided without a verified count.
    Unverified,
}

/// Admission decision handed back to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Decision {
    pub allowed: bool,
    pub remaining: u32,
    pub outcome: DecisionOutcome,
    /// `None` when the feature could not be resolved.
    pub period: Option<Period>,
}

impl Decision {
    fn denied(outcome: DecisionOutcome, period: Option<Period>) -> Self {
        Self {
            allowed: false,
            remaining: 0,
            outcome,
            period,
        }
    }

    /// When a denied caller may try again.
    pub fn resets_at(&self) -> Option<DateTime<Utc>> {
        self.period.and_then(|p| p.next_boundary())
    }
}

/// Today's usage of one feature, for the informational endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeatureUsage {
    pub feature: Feature,
    pub daily_limit: u32,
    pub used: u32,
    pub remaining: u32,
    pub period: Period,
    pub resets_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Error)]
pub enum QuotaError {
    #[error(transparent)]
    Config(#[from] LimitConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct QuotaService {
    limits: Arc<FeatureLimitTable>,
    store: Arc<dyn QuotaStore>,
    clock: Arc<dyn PeriodClock>,
    audit: Arc<dyn AuditSink>,
    policy: QuotaPolicy,
}

impl QuotaService {
    pub fn new(
        limits: Arc<FeatureLimitTable>,
        store: Arc<dyn QuotaStore>,
        clock: Arc<dyn PeriodClock>,
        audit: Arc<dyn AuditSink>,
        policy: QuotaPolicy,
    ) -> Self {
        Self {
            limits,
            store,
            clock,
            audit,
            policy,
        }
    }

    pub fn limits(&self) -> &FeatureLimitTable {
        &self.limits
    }

    pub fn backend(&self) -> &'static str {
        self.store.backend()
    }

    pub fn policy(&self) -> QuotaPolicy {
        self.policy
    }

    /// Decides whether `user_id` may invoke `feature_id` now and, if so,
    /// consumes one unit of today's quota.
    pub async fn check_and_consume(&self, user_id: Uuid, feature_id: &str) -> Decision {
        let (feature, cap) = match self.limits.resolve(feature_id) {
            Ok(resolved) => resolved,
            Err(err) => {
                self.record_unresolved(user_id, feature_id, &err);
                return Decision::denied(DecisionOutcome::NotConfigured, None);
            }
        };

        let period = self.clock.current_period();

        match self.try_increment(user_id, feature, period, cap).await {
            Ok(IncrementOutcome::Admitted { new_count }) => Decision {
                allowed: true,
                remaining: cap.saturating_sub(new_count),
                outcome: DecisionOutcome::Admitted,
                period: Some(period),
            },
            Ok(IncrementOutcome::LimitReached) => {
                debug!(%user_id, %feature, %period, cap, "daily limit reached");
                Decision::denied(DecisionOutcome::LimitReached, Some(period))
            }
            Err(err) => self.decide_without_count(user_id, feature, period, err),
        }
    }

    /// Current usage of one feature. Store errors propagate here since no
    /// admission depends on the answer.
    pub async fn usage(&self, user_id: Uuid, feature: Feature) -> Result<FeatureUsage, QuotaError> {
        let cap = self.limits.limit_for(feature)?;
        let period = self.clock.current_period();

        let record = tokio::time::timeout(
            self.policy.store_timeout,
            self.store.read(user_id, feature, period),
        )
        .await
        .map_err(|_| StoreError::Timeout)??;

        let used = record.map(|r| r.usage_count).unwrap_or(0);
        Ok(FeatureUsage {
            feature,
            daily_limit: cap,
            used,
            remaining: cap.saturating_sub(used),
            period,
            resets_at: period.next_boundary(),
        })
    }

    /// Usage for every configured feature.
    pub async fn usage_report(&self, user_id: Uuid) -> Result<Vec<FeatureUsage>, QuotaError> {
        let mut report = Vec::new();
        for (feature, _) in self.limits.entries() {
            report.push(self.usage(user_id, feature).await?);
        }
        Ok(report)
    }

    async fn try_increment(
        &self,
        user_id: Uuid,
        feature: Feature,
        period: Period,
        cap: u32,
    ) -> Result<IncrementOutcome, StoreError> {
        let mut attempt = 0;
        loop {
            let result = tokio::time::timeout(
                self.policy.store_timeout,
                self.store.try_increment(user_id, feature, period, cap),
            )
            .await
            .unwrap_or(Err(StoreError::Timeout));

            match result {
                Err(StoreError::Conflict(reason)) if attempt < self.policy.conflict_retries => {
                    attempt += 1;
                    debug!(%user_id, %feature, attempt, %reason, "retrying quota increment after conflict");
                }
                Err(StoreError::Conflict(reason)) => {
                    return Err(StoreError::Unavailable(format!(
                        "gave up after {} conflicting attempts: {reason}",
                        attempt + 1
                    )));
                }
                other => return other,
            }
        }
    }

    fn record_unresolved(&self, user_id: Uuid, feature_id: &str, err: &LimitConfigError) {
        let (kind, detail) = match err {
            // The raw identifier comes straight from the request; keep it out
            // of the message and cap its length in the event.
            LimitConfigError::UnknownFeature(_) => (
                AuditKind::UnknownFeature,
                "identifier names no supported feature".to_string(),
            ),
            other => (AuditKind::ConfigurationError, other.to_string()),
        };

        self.audit.record(AuditEvent {
            kind,
            user_id,
            feature_id: audited_identifier(feature_id),
            period: None,
            detail,
            at: Utc::now(),
        });
    }

    fn decide_without_count(
        &self,
        user_id: Uuid,
        feature: Feature,
        period: Period,
        err: StoreError,
    ) -> Decision {
        let (kind, decision) = match self.policy.on_store_failure {
            StoreFailurePolicy::FailOpen => (
                AuditKind::UnverifiedAdmission,
                Decision {
                    allowed: true,
                    remaining: 1,
                    outcome: DecisionOutcome::Unverified,
                    period: Some(period),
                },
            ),
            StoreFailurePolicy::FailClosed => (
                AuditKind::UnverifiedDenial,
                Decision::denied(DecisionOutcome::Unverified, Some(period)),
            ),
        };

        self.audit.record(AuditEvent {
            kind,
            user_id,
            feature_id: feature.as_str().to_string(),
            period: Some(period),
            detail: err.to_string(),
            at: Utc::now(),
        });
        decision
    }
}

/// Longest caller-supplied identifier copied into an audit event.
const MAX_AUDITED_IDENTIFIER: usize = 64;

fn audited_identifier(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_control())
        .take(MAX_AUDITED_IDENTIFIER)
        .collect()
}
