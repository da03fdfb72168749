//! OTP engine: issuance, dispatch, verification and expiry.
//!
//! Codes are hashed before they touch the store. The balance debit and the
//! creation of the pending log happen in one critical section; dispatch runs
//! afterwards with no lock held and its result drives the log state.

pub mod hash;

use crate::clock::Clock;
use crate::config::Config;
use crate::coverage;
use crate::delivery::{DeliveryGateway, DeliveryOutcome, DeliveryRequest, DeliveryStatus};
use crate::error::{GatewayError, ServiceError, StoreError};
use crate::store::{Store, StoreData};
use crate::types::{to_credits, Channel, OtpLog, OtpPurpose, OtpStatus, UserId};
use crate::validation::{mask_identifier, normalize_email, normalize_identifier, normalize_phone_number};
use chrono::{DateTime, Utc};
use hash::{generate_code, hash_otp, verify_otp, MAX_LENGTH, MIN_LENGTH};
use rust_decimal::Decimal;
use secrecy::SecretString;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Sent logs polled for delivery status per sweep.
const STATUS_POLL_BATCH: usize = 100;

/// Longest validity window a caller may request.
pub const MAX_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Engine settings, taken from [`Config`] once at startup.
#[derive(Debug, Clone)]
pub struct OtpSettings {
    pub secret: SecretString,
    pub default_length: u8,
    pub default_ttl: Duration,
    /// Return plaintext codes to callers. Development only.
    pub expose_code: bool,
    pub dispatch_timeout: Duration,
    pub default_cost: Decimal,
}

impl OtpSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            secret: config.otp.secret.clone(),
            default_length: config.otp.default_length,
            default_ttl: config.otp.default_ttl,
            expose_code: config.otp.expose_code,
            dispatch_timeout: config.otp.dispatch_timeout,
            default_cost: config.ledger.default_cost_per_otp,
        }
    }
}

/// Input to [`OtpEngine::issue`].
#[derive(Debug, Clone)]
pub struct IssueRequest {
    pub user_id: UserId,
    pub api_key_id: Option<Uuid>,
    pub identifier: String,
    pub channel: Channel,
    pub purpose: OtpPurpose,
    pub length: Option<u8>,
    pub ttl: Option<Duration>,
}

/// What a caller learns about an issued OTP.
#[derive(Debug, Clone, Serialize)]
pub struct OtpIssuedView {
    pub otp_log_id: Uuid,
    /// Masked destination.
    pub identifier: String,
    pub channel: Channel,
    pub status: OtpStatus,
    pub expires_at: DateTime<Utc>,
    pub cost_credits: Decimal,
    /// Plaintext code, present only when code exposure is enabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

/// Which log a submitted code is checked against.
#[derive(Debug, Clone)]
pub enum VerifyTarget {
    LogId(Uuid),
    /// Most recent log for a phone number or email.
    Identifier(String),
    /// Most recent registration log for a user.
    Registration(UserId),
}

/// Why a verification did not succeed. Each is terminal for the code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifyFailure {
    Expired,
    Invalid,
    AlreadyVerified,
    NotFound,
}

/// Result of a verification attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    Verified {
        otp_log_id: Uuid,
        verified_at: DateTime<Utc>,
    },
    Rejected(VerifyFailure),
}

impl Verification {
    pub fn is_ok(&self) -> bool {
        matches!(self, Verification::Verified { .. })
    }

    pub fn failure(&self) -> Option<VerifyFailure> {
        match self {
            Verification::Rejected(reason) => Some(*reason),
            Verification::Verified { .. } => None,
        }
    }
}

/// Counts from one delivery status poll.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryRefresh {
    pub delivered: usize,
    pub failed: usize,
}

enum Decision {
    Reject(VerifyFailure),
    Expire,
    Accept,
}

/// Decide what a verification attempt does to a log, without mutating it.
fn evaluate(log: &OtpLog, now: DateTime<Utc>, secret: &SecretString, code: &str) -> Decision {
    match log.status {
        OtpStatus::Verified => return Decision::Reject(VerifyFailure::AlreadyVerified),
        OtpStatus::Expired => return Decision::Reject(VerifyFailure::Expired),
        OtpStatus::Pending | OtpStatus::Failed => return Decision::Reject(VerifyFailure::NotFound),
        OtpStatus::Sent | OtpStatus::Delivered => {}
    }

    if log.is_expired_at(now) {
        return Decision::Expire;
    }

    if verify_otp(secret, &log.identifier, code, &log.otp_hash) {
        Decision::Accept
    } else {
        Decision::Reject(VerifyFailure::Invalid)
    }
}

fn find_log<'a>(data: &'a StoreData, target: &VerifyTarget) -> Option<&'a OtpLog> {
    match target {
        VerifyTarget::LogId(id) => data.otp_log(*id),
        VerifyTarget::Identifier(identifier) => data.latest_otp_log_for(identifier),
        VerifyTarget::Registration(user_id) => data.latest_registration_log(*user_id),
    }
}

/// Fail a log after an unsuccessful dispatch, opening a refund if it was charged.
fn fail_log(data: &mut StoreData, log_id: Uuid, reason: &str, now: DateTime<Utc>) -> Option<Uuid> {
    let log = data.otp_log_mut(log_id)?;
    if !log.status.can_transition_to(OtpStatus::Failed) {
        return None;
    }
    log.status = OtpStatus::Failed;
    log.error = Some(reason.to_string());

    let (user_id, cost) = (log.user_id, log.cost_credits);
    if cost > Decimal::ZERO {
        Some(data.record_refund(user_id, cost, log_id, reason, now))
    } else {
        None
    }
}

pub struct OtpEngine {
    store: Arc<Store>,
    delivery: Arc<dyn DeliveryGateway>,
    clock: Arc<dyn Clock>,
    settings: OtpSettings,
}

impl OtpEngine {
    pub fn new(
        store: Arc<Store>,
        delivery: Arc<dyn DeliveryGateway>,
        clock: Arc<dyn Clock>,
        settings: OtpSettings,
    ) -> Self {
        Self {
            store,
            delivery,
            clock,
            settings,
        }
    }

    /// Generate, record, charge and dispatch an OTP.
    ///
    /// A transport failure or timeout fails the log (refunding through the
    /// refund path if charged) and returns `ServiceError::Gateway`. A
    /// definitive provider rejection returns the view with status `failed`.
    pub async fn issue(&self, request: IssueRequest) -> Result<OtpIssuedView, ServiceError> {
        let length = request.length.unwrap_or(self.settings.default_length);
        if !(MIN_LENGTH..=MAX_LENGTH).contains(&length) {
            return Err(ServiceError::Validation(format!(
                "OTP length must be between {} and {}",
                MIN_LENGTH, MAX_LENGTH
            )));
        }

        let ttl = request.ttl.unwrap_or(self.settings.default_ttl);
        if ttl.is_zero() || ttl > MAX_TTL {
            return Err(ServiceError::Validation(format!(
                "OTP ttl must be between 1 and {} seconds",
                MAX_TTL.as_secs()
            )));
        }
        let ttl_chrono = chrono::Duration::from_std(ttl)
            .map_err(|_| ServiceError::Validation("OTP ttl out of range".into()))?;

        let identifier =
            normalize_identifier(request.channel, &request.identifier).map_err(ServiceError::Validation)?;

        let country = if request.channel.is_phone() {
            coverage::lookup(&identifier)
        } else {
            None
        };
        let cost = match request.purpose {
            OtpPurpose::Registration => Decimal::ZERO,
            OtpPurpose::Transactional => {
                to_credits(country.map(|c| c.cost()).unwrap_or(self.settings.default_cost))
            }
        };

        let code = generate_code(length);
        let otp_hash = hash_otp(&self.settings.secret, &identifier, &code)
            .ok_or_else(|| ServiceError::Internal("failed to hash OTP".into()))?;

        let now = self.clock.now();
        let expires_at = now
            .checked_add_signed(ttl_chrono)
            .ok_or_else(|| ServiceError::Validation("OTP ttl out of range".into()))?;
        let log = OtpLog {
            id: Uuid::new_v4(),
            user_id: request.user_id,
            api_key_id: request.api_key_id,
            identifier: identifier.clone(),
            channel: request.channel,
            purpose: request.purpose,
            country_code: country.map(|c| c.code.to_string()),
            country_name: country.map(|c| c.name.to_string()),
            otp_hash,
            status: OtpStatus::Pending,
            provider_ref: None,
            latency_ms: None,
            cost_credits: cost,
            error: None,
            created_at: now,
            sent_at: None,
            verified_at: None,
            expires_at,
        };
        let log_id = log.id;
        let user_id = request.user_id;

        self.store
            .transact(|d| {
                if d.user(user_id).is_none() {
                    return Err(ServiceError::NotFound(format!("user {}", user_id)));
                }
                if cost > Decimal::ZERO {
                    d.apply_debit(user_id, cost, Some(log_id), now)?;
                }
                d.insert_otp_log(log);
                Ok(())
            })
            .await?;

        debug!(
            %log_id,
            identifier = %mask_identifier(&identifier),
            channel = %request.channel,
            %cost,
            "OTP recorded, dispatching"
        );

        let delivery_request = DeliveryRequest {
            identifier: identifier.clone(),
            channel: request.channel,
            code: code.clone(),
            ttl,
        };
        let dispatch = match tokio::time::timeout(
            self.settings.dispatch_timeout,
            self.delivery.send(&delivery_request),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(GatewayError::timeout(self.delivery.name())),
        };

        let mut view = OtpIssuedView {
            otp_log_id: log_id,
            identifier: mask_identifier(&identifier),
            channel: request.channel,
            status: OtpStatus::Pending,
            expires_at,
            cost_credits: cost,
            code: self.settings.expose_code.then_some(code),
        };

        match dispatch {
            Ok(DeliveryOutcome::Accepted {
                provider_ref,
                latency_ms,
            }) => {
                let sent_at = self.clock.now();
                view.status = self
                    .store
                    .transact(|d| {
                        let Some(log) = d.otp_log_mut(log_id) else {
                            return Ok::<_, StoreError>(OtpStatus::Failed);
                        };
                        if log.status.can_transition_to(OtpStatus::Sent) {
                            log.status = OtpStatus::Sent;
                            log.sent_at = Some(sent_at);
                            log.provider_ref = Some(provider_ref);
                            log.latency_ms = Some(latency_ms);
                        }
                        Ok(log.status)
                    })
                    .await?;
                info!(%log_id, latency_ms, status = %view.status, "OTP sent");
                Ok(view)
            }
            Ok(DeliveryOutcome::Rejected { reason, latency_ms }) => {
                let now = self.clock.now();
                let refund = self
                    .store
                    .transact(|d| {
                        if let Some(log) = d.otp_log_mut(log_id) {
                            log.latency_ms = Some(latency_ms);
                        }
                        Ok::<_, StoreError>(fail_log(d, log_id, &reason, now))
                    })
                    .await?;
                warn!(%log_id, %reason, refund = ?refund, "OTP rejected by provider");
                view.status = OtpStatus::Failed;
                Ok(view)
            }
            Err(e) => {
                let now = self.clock.now();
                let reason = e.to_string();
                let refund = self
                    .store
                    .transact(|d| Ok::<_, StoreError>(fail_log(d, log_id, &reason, now)))
                    .await?;
                warn!(%log_id, error = %e, refund = ?refund, "OTP dispatch failed");
                Err(ServiceError::Gateway(e))
            }
        }
    }

    /// Issue the free registration OTP for a user over WhatsApp.
    pub async fn issue_registration(&self, user_id: UserId) -> Result<OtpIssuedView, ServiceError> {
        let whatsapp = self
            .store
            .read(|d| d.user(user_id).map(|u| u.whatsapp_number.clone()))
            .await
            .ok_or_else(|| ServiceError::NotFound(format!("user {}", user_id)))?;

        self.issue(IssueRequest {
            user_id,
            api_key_id: None,
            identifier: whatsapp,
            channel: Channel::Whatsapp,
            purpose: OtpPurpose::Registration,
            length: None,
            ttl: None,
        })
        .await
    }

    /// Check a submitted code.
    ///
    /// The state transition (to `verified` or `expired`) is re-validated under
    /// the store's write lock, so two racing attempts cannot both succeed.
    pub async fn verify(&self, target: VerifyTarget, code: &str) -> Result<Verification, ServiceError> {
        let target = match target {
            VerifyTarget::Identifier(raw) => {
                let normalized = if raw.contains('@') {
                    normalize_email(&raw)
                } else {
                    normalize_phone_number(&raw)
                };
                VerifyTarget::Identifier(normalized.map_err(ServiceError::Validation)?)
            }
            other => other,
        };
        let code = code.trim();
        let secret = &self.settings.secret;
        let now = self.clock.now();

        // Rejections that change nothing are answered without taking the write lock
        let log_id = self
            .store
            .read(|d| match find_log(d, &target) {
                None => Err(VerifyFailure::NotFound),
                Some(log) => match evaluate(log, now, secret, code) {
                    Decision::Reject(reason) => Err(reason),
                    Decision::Expire | Decision::Accept => Ok(log.id),
                },
            })
            .await;
        let log_id = match log_id {
            Ok(id) => id,
            Err(reason) => {
                debug!(?reason, "OTP verification rejected");
                return Ok(Verification::Rejected(reason));
            }
        };

        let verification = self
            .store
            .transact(|d| {
                let Some(log) = d.otp_log(log_id) else {
                    return Ok::<_, StoreError>(Verification::Rejected(VerifyFailure::NotFound));
                };
                let decision = evaluate(log, now, secret, code);
                let (purpose, user_id) = (log.purpose, log.user_id);

                let Some(log) = d.otp_log_mut(log_id) else {
                    return Ok(Verification::Rejected(VerifyFailure::NotFound));
                };
                match decision {
                    Decision::Reject(reason) => Ok(Verification::Rejected(reason)),
                    Decision::Expire => {
                        log.status = OtpStatus::Expired;
                        Ok(Verification::Rejected(VerifyFailure::Expired))
                    }
                    Decision::Accept => {
                        log.status = OtpStatus::Verified;
                        log.verified_at = Some(now);
                        if purpose == OtpPurpose::Registration {
                            if let Some(user) = d.user_mut(user_id) {
                                user.is_verified = true;
                                user.is_active = true;
                            }
                        }
                        Ok(Verification::Verified {
                            otp_log_id: log_id,
                            verified_at: now,
                        })
                    }
                }
            })
            .await?;

        match &verification {
            Verification::Verified { otp_log_id, .. } => info!(%otp_log_id, "OTP verified"),
            Verification::Rejected(reason) => debug!(%log_id, ?reason, "OTP verification rejected"),
        }
        Ok(verification)
    }

    /// Expire every non-terminal log past its validity window.
    pub async fn expire_stale(&self) -> Result<usize, StoreError> {
        let now = self.clock.now();
        let stale = self
            .store
            .read(|d| {
                d.otp_logs()
                    .filter(|l| !l.status.is_terminal() && l.is_expired_at(now))
                    .count()
            })
            .await;
        if stale == 0 {
            return Ok(0);
        }

        let expired = self
            .store
            .transact(|d| {
                let mut expired = 0;
                for log in d.otp_logs_mut() {
                    if !log.status.is_terminal() && log.is_expired_at(now) {
                        log.status = OtpStatus::Expired;
                        expired += 1;
                    }
                }
                Ok::<_, StoreError>(expired)
            })
            .await?;

        if expired > 0 {
            info!(expired, "Expired stale OTPs");
        }
        Ok(expired)
    }

    /// Poll the delivery provider for `sent` logs and advance them.
    pub async fn refresh_delivery_status(&self) -> Result<DeliveryRefresh, StoreError> {
        let now = self.clock.now();
        let candidates: Vec<(Uuid, String)> = self
            .store
            .read(|d| {
                d.otp_logs()
                    .filter(|l| l.status == OtpStatus::Sent && !l.is_expired_at(now))
                    .filter_map(|l| l.provider_ref.clone().map(|r| (l.id, r)))
                    .take(STATUS_POLL_BATCH)
                    .collect()
            })
            .await;

        let mut refresh = DeliveryRefresh::default();
        for (log_id, provider_ref) in candidates {
            let status = match tokio::time::timeout(
                self.settings.dispatch_timeout,
                self.delivery.status(&provider_ref),
            )
            .await
            {
                Ok(Ok(status)) => status,
                Ok(Err(e)) => {
                    warn!(%log_id, error = %e, "Delivery status poll failed");
                    continue;
                }
                Err(_) => {
                    warn!(%log_id, "Delivery status poll timed out");
                    continue;
                }
            };

            let now = self.clock.now();
            match status {
                DeliveryStatus::Delivered => {
                    let advanced = self
                        .store
                        .transact(|d| {
                            let Some(log) = d.otp_log_mut(log_id) else {
                                return Ok::<_, StoreError>(false);
                            };
                            if !log.status.can_transition_to(OtpStatus::Delivered) {
                                return Ok(false);
                            }
                            log.status = OtpStatus::Delivered;
                            Ok(true)
                        })
                        .await?;
                    if advanced {
                        refresh.delivered += 1;
                    }
                }
                DeliveryStatus::Failed { reason } => {
                    let refund = self
                        .store
                        .transact(|d| Ok::<_, StoreError>(fail_log(d, log_id, &reason, now)))
                        .await?;
                    warn!(%log_id, %reason, refund = ?refund, "Provider reported delivery failure");
                    refresh.failed += 1;
                }
                DeliveryStatus::Queued | DeliveryStatus::Sent | DeliveryStatus::Unknown => {}
            }
        }

        Ok(refresh)
    }

    /// Most recent logs for a user, newest first.
    pub async fn logs_for_user(&self, user_id: UserId, limit: usize) -> Vec<OtpLog> {
        self.store.read(|d| d.otp_logs_for(user_id, limit)).await
    }
}
