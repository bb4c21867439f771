use std::sync::Arc;

use crate::quota::QuotaService;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub quota: Arc<QuotaService>,
}
