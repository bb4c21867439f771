//! Audit trail for quota decisions that were not backed by a verified count.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, warn};
use uuid::Uuid;

use crate::quota::period::Period;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    /// Supported feature with no cap in this deployment; the request was denied.
    ConfigurationError,
    /// Identifier that names no feature at all, usually bad client input.
    /// Denied, and logged below the configuration-error level.
    UnknownFeature,
    /// Store fault under the fail-open policy; the request was allowed.
    UnverifiedAdmission,
    /// Store fault under the fail-closed policy; the request was denied.
    UnverifiedDenial,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub kind: AuditKind,
    pub user_id: Uuid,
    pub feature_id: String,
    pub period: Option<Period>,
    pub detail: String,
    pub at: DateTime<Utc>,
}

pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

/// Writes audit events to the tracing subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: AuditEvent) {
        let period = event.period.map(|p| p.key()).unwrap_or_default();
        match event.kind {
            AuditKind::ConfigurationError => error!(
                audit = true,
                kind = ?event.kind,
                user_id = %event.user_id,
                feature = %event.feature_id,
                period = %period,
                "quota configuration error, request denied: {}",
                event.detail
            ),
            AuditKind::UnknownFeature => warn!(
                audit = true,
                kind = ?event.kind,
                user_id = %event.user_id,
                feature = %event.feature_id,
                "unknown quota feature requested, request denied: {}",
                event.detail
            ),
            AuditKind::UnverifiedAdmission | AuditKind::UnverifiedDenial => warn!(
                audit = true,
                kind = ?event.kind,
                user_id = %event.user_id,
                feature = %event.feature_id,
                period = %period,
                "quota decided without a verified count: {}",
                event.detail
            ),
        }
    }
}
