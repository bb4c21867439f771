// Daily AI feature quotas.
// Every AI-backed handler gates its work on `QuotaService::check_and_consume`
// (or `handlers::enforce_quota`) before calling out to the model.

pub mod audit;
pub mod features;
pub mod handlers;
pub mod period;
pub mod service;
pub mod store;

pub use self::features::{Feature, FeatureLimitTable};
pub use self::service::{QuotaPolicy, QuotaService, StoreFailurePolicy};
