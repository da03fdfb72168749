//! FastOTP core: OTP issuance and verification billed against a prepaid
//! credit ledger.
//!
//! # Architecture
//!
//! ```text
//! API key → IssueOtp → debit ledger → dispatch via DeliveryGateway → log sent/failed
//! VerifyOtp → constant-time hash check → verified (terminal)
//! InitiateTopUp → pending transaction → PaymentGateway checkout
//! Gateway callback → verify charge → credit exactly once
//! ```
//!
//! # Modules
//!
//! - [`otp`] - code generation, hashing, issue and verify
//! - [`ledger`] - atomic debits, idempotent credits, refunds
//! - [`reconciler`] - top-up initiation and payment confirmation
//! - [`delivery`], [`payments`] - gateway ports and their adapters
//! - [`store`] - in-memory state with encrypted snapshot persistence
//! - [`api`] - JSON HTTP API

pub mod api;
pub mod clock;
pub mod config;
pub mod coverage;
pub mod delivery;
pub mod error;
pub mod identity;
pub mod ledger;
pub mod otp;
pub mod payments;
pub mod reconciler;
pub mod store;
pub mod sweeper;
pub mod types;
pub mod validation;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use error::{GatewayError, LedgerError, ServiceError, StoreError};
pub use identity::IdentityService;
pub use ledger::Ledger;
pub use otp::{OtpEngine, OtpSettings, Verification, VerifyFailure, VerifyTarget};
pub use reconciler::{ReconcileOutcome, Reconciler};
pub use store::Store;
pub use sweeper::{spawn_sweeper, SweepReport, Sweeper};

use api::AppState;
use delivery::DeliveryGateway;
use payments::Gateways;
use std::sync::Arc;

/// Wire every service over one store.
pub fn build_state(
    config: &Config,
    store: Arc<Store>,
    delivery: Arc<dyn DeliveryGateway>,
    gateways: Gateways,
    clock: Arc<dyn Clock>,
) -> AppState {
    let identity = Arc::new(IdentityService::new(
        store.clone(),
        clock.clone(),
        config.ledger.trial_credits,
    ));
    let ledger = Arc::new(Ledger::new(store.clone(), clock.clone()));
    let engine = Arc::new(OtpEngine::new(
        store.clone(),
        delivery,
        clock.clone(),
        OtpSettings::from_config(config),
    ));
    let reconciler = Arc::new(Reconciler::new(
        store.clone(),
        gateways,
        clock,
        config.payments.clone(),
    ));

    AppState {
        store,
        identity,
        ledger,
        engine,
        reconciler,
    }
}
