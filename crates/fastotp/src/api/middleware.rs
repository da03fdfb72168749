//! Request budget, access logging and `fotk_` bearer key extraction.

use super::AppState;
use crate::error::ServiceError;
use crate::types::ApiKey;
use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
};
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::{num::NonZeroU32, sync::Arc, time::Instant};
use tracing::{debug, warn};

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

const FALLBACK_PER_MINUTE: NonZeroU32 = match NonZeroU32::new(60) {
    Some(n) => n,
    None => unreachable!(),
};

/// Request budget shared by every route, refilled continuously.
#[derive(Clone)]
pub struct RateLimitState {
    limiter: Arc<DirectLimiter>,
}

impl RateLimitState {
    /// Allow `requests_per_minute` across all callers; zero means 60.
    pub fn new(requests_per_minute: u32) -> Self {
        let quota = Quota::per_minute(NonZeroU32::new(requests_per_minute).unwrap_or(FALLBACK_PER_MINUTE));
        Self {
            limiter: Arc::new(RateLimiter::direct(quota)),
        }
    }

    /// Large enough that tests never hit it.
    pub fn permissive() -> Self {
        Self::new(10_000)
    }

    fn try_acquire(&self) -> bool {
        self.limiter.check().is_ok()
    }
}

pub async fn rate_limit_middleware(
    State(budget): State<RateLimitState>,
    request: Request,
    next: Next,
) -> Result<Response, ServiceError> {
    if !budget.try_acquire() {
        warn!(path = %request.uri().path(), "Request budget exhausted");
        return Err(ServiceError::RateLimited);
    }
    Ok(next.run(request).await)
}

/// Log method, path, status and latency of every request.
///
/// Query strings are never logged: payment callbacks carry references there.
pub async fn logging_middleware(request: Request, next: Next) -> Response {
    let started = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_owned();

    let response = next.run(request).await;

    let status = response.status();
    let elapsed_ms = started.elapsed().as_millis() as u64;
    if status.is_server_error() {
        warn!(%method, %path, status = status.as_u16(), elapsed_ms, "Request errored");
    } else if status.is_client_error() {
        debug!(%method, %path, status = status.as_u16(), elapsed_ms, "Request rejected");
    } else {
        debug!(%method, %path, status = status.as_u16(), elapsed_ms, "Request served");
    }
    response
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// An authenticated API key, taken from `Authorization: Bearer fotk_...`.
pub struct ApiKeyAuth(pub ApiKey);

#[async_trait]
impl FromRequestParts<AppState> for ApiKeyAuth {
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let raw = bearer_token(&parts.headers).ok_or(ServiceError::Unauthorized)?;
        let key = state.identity.authenticate_api_key(raw).await?;
        debug!(key_id = %key.id, user_id = %key.user_id, "API key authenticated");
        Ok(ApiKeyAuth(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_budget_exhaustion() {
        let budget = RateLimitState::new(1);
        assert!(budget.try_acquire());
        assert!(!budget.try_acquire());

        // Clones share one budget
        let budget = RateLimitState::new(2);
        let other = budget.clone();
        assert!(budget.try_acquire());
        assert!(other.try_acquire());
        assert!(!budget.try_acquire());
    }

    #[test]
    fn test_zero_falls_back() {
        let budget = RateLimitState::new(0);
        assert!((0..60).all(|_| budget.try_acquire()));
        assert!(!budget.try_acquire());
    }

    #[test]
    fn test_bearer_token() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer fotk_live_abc"));
        assert_eq!(bearer_token(&headers), Some("fotk_live_abc"));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic Zm9vOmJhcg=="));
        assert_eq!(bearer_token(&headers), None);
    }
}
