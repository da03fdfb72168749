//! HTTP request handlers.

use super::middleware::ApiKeyAuth;
use super::types::*;
use super::AppState;
use crate::coverage::{CoverageEntry, COVERAGE};
use crate::error::ServiceError;
use crate::otp::{IssueRequest, OtpIssuedView, Verification, VerifyFailure, VerifyTarget};
use crate::reconciler::{ReconcileOutcome, TopUpCheckout};
use crate::types::{
    CreditBalance, CreditPackage, GatewayKind, NewUser, OtpPurpose, ProfileUpdate, Transaction,
    User,
};
use crate::validation::{normalize_email, normalize_phone_number};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

/// Transactions returned by the history endpoint.
const TRANSACTION_HISTORY_LIMIT: usize = 20;

/// OTP logs returned by the history endpoint.
const OTP_HISTORY_LIMIT: usize = 50;

/// Health check endpoint.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let counts = state.store.read(|d| d.stats()).await;

    Json(HealthResponse {
        status: "ok".to_string(),
        persistent: state.store.is_persistent(),
        gateways: state.reconciler.gateways().kinds(),
        counts,
    })
}

/// Register a user and grant trial credits.
pub async fn register_user(
    State(state): State<AppState>,
    Json(request): Json<NewUser>,
) -> Result<(StatusCode, Json<User>), ServiceError> {
    let user = state.identity.register_user(request).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

/// Update profile fields; avatar initials follow the new name.
pub async fn update_profile(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Json(request): Json<ProfileUpdate>,
) -> Result<Json<User>, ServiceError> {
    Ok(Json(state.identity.update_profile(user_id, request).await?))
}

/// Send a registration code to the user's WhatsApp number.
pub async fn issue_registration_otp(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<OtpIssuedView>, ServiceError> {
    let user = state.identity.user(user_id).await?;
    if user.is_verified {
        return Err(ServiceError::Conflict(format!("user {} is already verified", user_id)));
    }
    Ok(Json(state.engine.issue_registration(user_id).await?))
}

/// Check a registration code.
pub async fn verify_registration(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Json(request): Json<VerifyCodeRequest>,
) -> Result<Json<VerificationView>, ServiceError> {
    state.identity.user(user_id).await?;
    let verification = state
        .engine
        .verify(VerifyTarget::Registration(user_id), &request.code)
        .await?;
    if verification.is_ok() {
        info!(%user_id, "User verified");
    }
    Ok(Json(verification.into()))
}

/// Current balance, created on first access.
pub async fn get_balance(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<CreditBalance>, ServiceError> {
    Ok(Json(state.ledger.balance(user_id).await?))
}

/// Recent transactions, newest first.
pub async fn list_transactions(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<Vec<Transaction>>, ServiceError> {
    state.identity.user(user_id).await?;
    Ok(Json(
        state
            .ledger
            .transactions(user_id, TRANSACTION_HISTORY_LIMIT)
            .await,
    ))
}

/// Recent OTP logs, newest first, with masked identifiers.
pub async fn list_otp_logs(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<Vec<OtpLogView>>, ServiceError> {
    state.identity.user(user_id).await?;
    let logs = state.engine.logs_for_user(user_id, OTP_HISTORY_LIMIT).await;
    Ok(Json(logs.into_iter().map(OtpLogView::from).collect()))
}

/// Create an API key. The raw key is in this response only.
pub async fn create_api_key(
    State(state): State<AppState>,
    Json(request): Json<CreateApiKeyRequest>,
) -> Result<(StatusCode, Json<ApiKeyView>), ServiceError> {
    let issued = state
        .identity
        .create_api_key(request.user_id, &request.name, request.environment)
        .await?;

    let mut view = ApiKeyView::from(issued.key);
    view.key = Some(issued.raw);
    Ok((StatusCode::CREATED, Json(view)))
}

/// A user's keys, newest first. Raw keys are never included.
pub async fn list_api_keys(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<Vec<ApiKeyView>>, ServiceError> {
    state.identity.user(user_id).await?;
    let keys = state.identity.api_keys_for(user_id).await;
    Ok(Json(keys.into_iter().map(ApiKeyView::from).collect()))
}

pub async fn revoke_api_key(
    State(state): State<AppState>,
    Path(key_id): Path<Uuid>,
) -> Result<Json<ApiKeyView>, ServiceError> {
    Ok(Json(state.identity.revoke_api_key(key_id).await?.into()))
}

/// Issue a transactional OTP for the key's owner.
pub async fn send_otp(
    State(state): State<AppState>,
    ApiKeyAuth(key): ApiKeyAuth,
    Json(request): Json<SendOtpRequest>,
) -> Result<Json<SendOtpResponse>, ServiceError> {
    let issued = state
        .engine
        .issue(IssueRequest {
            user_id: key.user_id,
            api_key_id: Some(key.id),
            identifier: request.identifier,
            channel: request.channel,
            purpose: OtpPurpose::Transactional,
            length: request.length,
            ttl: request.ttl_seconds.map(Duration::from_secs),
        })
        .await?;
    Ok(Json(issued))
}

/// Verify a code against one of the key owner's OTPs.
pub async fn verify_otp(
    State(state): State<AppState>,
    ApiKeyAuth(key): ApiKeyAuth,
    Json(request): Json<VerifyOtpRequest>,
) -> Result<Json<VerificationView>, ServiceError> {
    let owner = key.user_id;
    let log_id = match (request.otp_log_id, request.identifier.as_deref()) {
        (Some(id), _) => {
            state
                .store
                .read(|d| d.otp_log(id).filter(|l| l.user_id == owner).map(|l| l.id))
                .await
        }
        (None, Some(identifier)) => {
            let identifier = if identifier.contains('@') {
                normalize_email(identifier)
            } else {
                normalize_phone_number(identifier)
            }
            .map_err(ServiceError::Validation)?;
            state
                .store
                .read(|d| d.latest_user_otp_log_for(owner, &identifier).map(|l| l.id))
                .await
        }
        (None, None) => {
            return Err(ServiceError::Validation(
                "otp_log_id or identifier is required".into(),
            ))
        }
    };

    let verification = match log_id {
        Some(id) => state.engine.verify(VerifyTarget::LogId(id), &request.code).await?,
        None => Verification::Rejected(VerifyFailure::NotFound),
    };
    Ok(Json(verification.into()))
}

/// Active credit packages.
pub async fn list_packages(State(state): State<AppState>) -> Json<Vec<CreditPackage>> {
    let packages = state
        .store
        .read(|d| d.packages().iter().filter(|p| p.is_active).cloned().collect())
        .await;
    Json(packages)
}

/// Served countries and per-OTP cost.
pub async fn list_coverage() -> Json<Vec<CoverageEntry>> {
    Json(COVERAGE.iter().map(CoverageEntry::from).collect())
}

/// Start a top-up and return the checkout URL.
pub async fn initiate_top_up(
    State(state): State<AppState>,
    Json(request): Json<TopUpRequest>,
) -> Result<(StatusCode, Json<TopUpCheckout>), ServiceError> {
    let gateway: GatewayKind = request.gateway.parse().map_err(ServiceError::Validation)?;
    let checkout = state
        .reconciler
        .initiate_top_up(request.user_id, request.package_id, gateway)
        .await?;
    Ok((StatusCode::CREATED, Json(checkout)))
}

/// Customer redirect back from the gateway's checkout page.
pub async fn payment_callback(
    State(state): State<AppState>,
    Path(gateway): Path<String>,
    Query(query): Query<CallbackQuery>,
) -> Result<Json<ReconcileOutcome>, ServiceError> {
    let reference = query
        .reference()
        .ok_or_else(|| ServiceError::Validation("missing payment reference".into()))?;
    reconcile(&state, &gateway, &reference).await
}

/// Server-to-server notification from the gateway.
pub async fn payment_webhook(
    State(state): State<AppState>,
    Path(gateway): Path<String>,
    Json(body): Json<WebhookBody>,
) -> Result<Json<ReconcileOutcome>, ServiceError> {
    let reference = body
        .reference()
        .ok_or_else(|| ServiceError::Validation("missing payment reference".into()))?;
    reconcile(&state, &gateway, &reference).await
}

async fn reconcile(
    state: &AppState,
    gateway: &str,
    reference: &str,
) -> Result<Json<ReconcileOutcome>, ServiceError> {
    let gateway: GatewayKind = gateway.parse().map_err(ServiceError::Validation)?;
    Ok(Json(state.reconciler.reconcile(gateway, reference).await?))
}

pub async fn approve_refund(
    State(state): State<AppState>,
    Path(transaction_id): Path<Uuid>,
) -> Result<Json<CreditBalance>, ServiceError> {
    Ok(Json(state.ledger.approve_refund(transaction_id).await?))
}

pub async fn reject_refund(
    State(state): State<AppState>,
    Path(transaction_id): Path<Uuid>,
) -> Result<Json<Transaction>, ServiceError> {
    Ok(Json(state.ledger.reject_refund(transaction_id).await?))
}
