pub mod health;

use axum::{
    routing::{get, post},
    Router,
};

use crate::quota::handlers;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Quota API
        .route("/api/v1/quota/features", get(handlers::handle_list_features))
        .route("/api/v1/quota/usage", get(handlers::handle_usage_report))
        .route(
            "/api/v1/quota/usage/:feature",
            get(handlers::handle_feature_usage),
        )
        .route(
            "/api/v1/quota/:feature/consume",
            post(handlers::handle_consume),
        )
        .with_state(state)
}
