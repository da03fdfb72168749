//! JSON HTTP API over the OTP engine, ledger and reconciler.

mod handlers;
mod middleware;
mod types;

pub use handlers::*;
pub use middleware::{logging_middleware, rate_limit_middleware, ApiKeyAuth, RateLimitState};
pub use types::*;

use crate::identity::IdentityService;
use crate::ledger::Ledger;
use crate::otp::OtpEngine;
use crate::reconciler::Reconciler;
use crate::store::Store;
use axum::{
    middleware as axum_middleware,
    routing::{get, patch, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub identity: Arc<IdentityService>,
    pub ledger: Arc<Ledger>,
    pub engine: Arc<OtpEngine>,
    pub reconciler: Arc<Reconciler>,
}

/// Create the API router with the default rate limit.
pub fn create_router(state: AppState) -> Router {
    create_router_with_rate_limit(state, RateLimitState::new(120))
}

/// Create the API router with custom rate limiting.
pub fn create_router_with_rate_limit(state: AppState, rate_limit: RateLimitState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        // Accounts
        .route("/v1/users", post(handlers::register_user))
        .route("/v1/users/:id", patch(handlers::update_profile))
        .route(
            "/v1/users/:id/registration-otp",
            post(handlers::issue_registration_otp),
        )
        .route("/v1/users/:id/verify", post(handlers::verify_registration))
        .route("/v1/users/:id/balance", get(handlers::get_balance))
        .route("/v1/users/:id/transactions", get(handlers::list_transactions))
        .route("/v1/users/:id/otp-logs", get(handlers::list_otp_logs))
        .route("/v1/users/:id/api-keys", get(handlers::list_api_keys))
        .route("/v1/api-keys", post(handlers::create_api_key))
        .route("/v1/api-keys/:id/revoke", post(handlers::revoke_api_key))
        // OTP traffic (API key)
        .route("/v1/otp/send", post(handlers::send_otp))
        .route("/v1/otp/verify", post(handlers::verify_otp))
        // Billing
        .route("/v1/packages", get(handlers::list_packages))
        .route("/v1/coverage", get(handlers::list_coverage))
        .route("/v1/topups", post(handlers::initiate_top_up))
        .route(
            "/v1/payments/callback/:gateway",
            get(handlers::payment_callback),
        )
        .route(
            "/v1/payments/webhook/:gateway",
            post(handlers::payment_webhook),
        )
        .route("/v1/refunds/:id/approve", post(handlers::approve_refund))
        .route("/v1/refunds/:id/reject", post(handlers::reject_refund))
        .layer(axum_middleware::from_fn_with_state(
            rate_limit,
            rate_limit_middleware,
        ))
        .layer(axum_middleware::from_fn(logging_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
