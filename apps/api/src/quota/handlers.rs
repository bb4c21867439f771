//! Axum route handlers for the Quota API.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::AppError;
use crate::quota::features::Feature;
use crate::quota::period::Period;
use crate::quota::service::{Decision, DecisionOutcome, FeatureUsage, QuotaService};
use crate::state::AppState;

// ────────────────────────────────────────────────────────────────────────────
// Request / Response types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct UserIdQuery {
    pub user_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct FeatureLimitResponse {
    pub feature: Feature,
    pub daily_limit: u32,
}

#[derive(Debug, Serialize)]
pub struct ConsumeResponse {
    pub allowed: bool,
    pub remaining: u32,
    pub outcome: DecisionOutcome,
    pub period: Option<Period>,
    pub resets_at: Option<DateTime<Utc>>,
}

impl From<Decision> for ConsumeResponse {
    fn from(decision: Decision) -> Self {
        Self {
            allowed: decision.allowed,
            remaining: decision.remaining,
            outcome: decision.outcome,
            period: decision.period,
            resets_at: decision.resets_at(),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Gate for AI handlers
// ────────────────────────────────────────────────────────────────────────────

/// Consumes one unit of `feature_id` for `user_id`, or fails with
/// `AppError::QuotaExceeded` (HTTP 429) so the handler can bail with `?`
/// before making the model call.
pub async fn enforce_quota(
    quota: &QuotaService,
    user_id: Uuid,
    feature_id: &str,
) -> Result<Decision, AppError> {
    if user_id.is_nil() {
        return Err(AppError::Validation("user_id cannot be nil".to_string()));
    }

    let decision = quota.check_and_consume(user_id, feature_id).await;
    if decision.allowed {
        Ok(decision)
    } else {
        Err(AppError::QuotaExceeded {
            feature: feature_id.to_string(),
            resets_at: decision.resets_at(),
        })
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Handlers
// ────────────────────────────────────────────────────────────────────────────

/// GET /api/v1/quota/features
pub async fn handle_list_features(State(state): State<AppState>) -> Json<Vec<FeatureLimitResponse>> {
    Json(
        state
            .quota
            .limits()
            .entries()
            .map(|(feature, daily_limit)| FeatureLimitResponse {
                feature,
                daily_limit,
            })
            .collect(),
    )
}

/// GET /api/v1/quota/usage
pub async fn handle_usage_report(
    State(state): State<AppState>,
    Query(params): Query<UserIdQuery>,
) -> Result<Json<Vec<FeatureUsage>>, AppError> {
    Ok(Json(state.quota.usage_report(params.user_id).await?))
}

/// GET /api/v1/quota/usage/:feature
pub async fn handle_feature_usage(
    State(state): State<AppState>,
    Path(feature_id): Path<String>,
    Query(params): Query<UserIdQuery>,
) -> Result<Json<FeatureUsage>, AppError> {
    let feature: Feature = feature_id
        .parse()
        .map_err(|_| AppError::NotFound(format!("Unknown feature '{feature_id}'")))?;
    Ok(Json(state.quota.usage(params.user_id, feature).await?))
}

/// POST /api/v1/quota/:feature/consume
///
/// Used by services that call the model themselves and only need the
/// admission decision from this one.
pub async fn handle_consume(
    State(state): State<AppState>,
    Path(feature_id): Path<String>,
    Query(params): Query<UserIdQuery>,
) -> Result<Json<ConsumeResponse>, AppError> {
    let decision = enforce_quota(&state.quota, params.user_id, &feature_id).await?;
    Ok(Json(decision.into()))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::Value;
    use tower::ServiceExt;

    use crate::quota::audit::TracingAuditSink;
    use crate::quota::features::FeatureLimitTable;
    use crate::quota::period::SystemClock;
    use crate::quota::service::QuotaPolicy;
    use crate::quota::store::MemoryQuotaStore;
    use crate::routes::build_router;

    use super::*;

    fn test_state() -> AppState {
        let limits = FeatureLimitTable::from_entries([(Feature::CoverLetter, 2)]).unwrap();
        AppState {
            quota: Arc::new(QuotaService::new(
                Arc::new(limits),
                Arc::new(MemoryQuotaStore::new()),
                Arc::new(SystemClock),
                Arc::new(TracingAuditSink),
                QuotaPolicy::default(),
            )),
        }
    }

    async fn send(app: axum::Router, method: &str, uri: &str) -> (StatusCode, Value) {
        let response = app
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    #[tokio::test]
    async fn test_consume_until_429() {
        let state = test_state();
        let user = Uuid::new_v4();
        let uri = format!("/api/v1/quota/cover_letter/consume?user_id={user}");

        let (status, body) = send(build_router(state.clone()), "POST", &uri).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["allowed"], true);
        assert_eq!(body["remaining"], 1);
        assert_eq!(body["outcome"], "admitted");

        let (status, body) = send(build_router(state.clone()), "POST", &uri).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["remaining"], 0);

        let (status, body) = send(build_router(state), "POST", &uri).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body["error"]["code"], "QUOTA_EXCEEDED");
    }

    #[tokio::test]
    async fn test_consume_unknown_feature_is_denied() {
        let uri = format!("/api/v1/quota/astrology/consume?user_id={}", Uuid::new_v4());
        let (status, body) = send(build_router(test_state()), "POST", &uri).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body["error"]["code"], "QUOTA_EXCEEDED");
    }

    #[tokio::test]
    async fn test_consume_rejects_nil_user() {
        let uri = format!("/api/v1/quota/cover_letter/consume?user_id={}", Uuid::nil());
        let (status, body) = send(build_router(test_state()), "POST", &uri).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_usage_reflects_consumption() {
        let state = test_state();
        let user = Uuid::new_v4();
        enforce_quota(&state.quota, user, "cover_letter").await.unwrap();

        let uri = format!("/api/v1/quota/usage/cover_letter?user_id={user}");
        let (status, body) = send(build_router(state.clone()), "GET", &uri).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["used"], 1);
        assert_eq!(body["remaining"], 1);
        assert_eq!(body["daily_limit"], 2);

        let uri = format!("/api/v1/quota/usage?user_id={user}");
        let (status, body) = send(build_router(state), "GET", &uri).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().map(Vec::len), Some(1));
    }

    #[tokio::test]
    async fn test_usage_unknown_feature_is_404() {
        let uri = format!("/api/v1/quota/usage/astrology?user_id={}", Uuid::new_v4());
        let (status, _) = send(build_router(test_state()), "GET", &uri).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        // Valid identifier, but absent from this deployment's table.
        let uri = format!("/api/v1/quota/usage/ats_scoring?user_id={}", Uuid::new_v4());
        let (status, _) = send(build_router(test_state()), "GET", &uri).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_list_features_and_health() {
        let (status, body) = send(build_router(test_state()), "GET", "/api/v1/quota/features").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["feature"], "cover_letter");
        assert_eq!(body[0]["daily_limit"], 2);

        let (status, body) = send(build_router(test_state()), "GET", "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["store_backend"], "memory");
        assert_eq!(body["store_failure_policy"], "fail_open");
    }
}
