//! Top-up initiation and gateway reconciliation.
//!
//! A top-up is a pending `topup` transaction carrying a snapshot of the
//! package price and credits. It is completed exactly once, by
//! [`Reconciler::reconcile`], after the processor confirms the charge.

use crate::clock::Clock;
use crate::config::PaymentsConfig;
use crate::error::{GatewayError, LedgerError, ServiceError, StoreError};
use crate::payments::{ChargeRequest, ChargeVerification, Gateways};
use crate::store::{Store, StoreData};
use crate::types::{GatewayKind, Transaction, TransactionStatus, TransactionType, UserId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Where to send the customer to pay.
#[derive(Debug, Clone, Serialize)]
pub struct TopUpCheckout {
    pub transaction_id: Uuid,
    pub checkout_url: String,
    pub reference: String,
    pub credits: Decimal,
    pub amount: Decimal,
    pub currency: String,
}

/// Result of matching a processor confirmation to a local transaction.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReconcileOutcome {
    Credited {
        transaction_id: Uuid,
        user_id: UserId,
        credits: Decimal,
        balance: Decimal,
    },
    /// Duplicate confirmation. The balance was not touched.
    AlreadyCredited { transaction_id: Uuid },
    /// The processor confirmed a reference we have no pending record of.
    NotFound,
    Failed { transaction_id: Uuid, reason: String },
    StillPending,
    /// Verified amount or currency differs from the snapshot. Not credited.
    AmountMismatch {
        transaction_id: Uuid,
        expected: Decimal,
        expected_currency: String,
        actual: Decimal,
        actual_currency: String,
    },
    /// The transaction was already failed locally; needs manual review.
    Closed {
        transaction_id: Uuid,
        status: TransactionStatus,
    },
}

pub struct Reconciler {
    store: Arc<Store>,
    gateways: Gateways,
    clock: Arc<dyn Clock>,
    config: PaymentsConfig,
}

/// Run a gateway call under the configured deadline.
async fn with_deadline<T>(
    deadline: Duration,
    gateway: GatewayKind,
    call: impl Future<Output = Result<T, GatewayError>>,
) -> Result<T, GatewayError> {
    match tokio::time::timeout(deadline, call).await {
        Ok(result) => result,
        Err(_) => Err(GatewayError::timeout(gateway.to_string())),
    }
}

/// The transaction a processor reference points at, if it belongs to `gateway`.
fn find_by_ref<'a>(
    d: &'a StoreData,
    gateway: GatewayKind,
    reference: &str,
) -> Option<&'a Transaction> {
    d.transaction_by_ref(reference)
        .filter(|t| t.gateway == Some(gateway) && t.transaction_type == TransactionType::Topup)
}

impl Reconciler {
    pub fn new(
        store: Arc<Store>,
        gateways: Gateways,
        clock: Arc<dyn Clock>,
        config: PaymentsConfig,
    ) -> Self {
        Self {
            store,
            gateways,
            clock,
            config,
        }
    }

    pub fn gateways(&self) -> &Gateways {
        &self.gateways
    }

    /// Open a charge for a package and return the checkout URL.
    #[instrument(skip(self))]
    pub async fn initiate_top_up(
        &self,
        user_id: UserId,
        package_id: u32,
        gateway_kind: GatewayKind,
    ) -> Result<TopUpCheckout, ServiceError> {
        let gateway = self.gateways.get(gateway_kind)?;
        let now = self.clock.now();

        let (transaction, email) = self
            .store
            .transact(|d| {
                let email = d
                    .user(user_id)
                    .map(|u| u.email.clone())
                    .ok_or_else(|| ServiceError::NotFound(format!("user {}", user_id)))?;
                let package = d
                    .package(package_id)
                    .filter(|p| p.is_active)
                    .ok_or_else(|| ServiceError::NotFound(format!("package {}", package_id)))?;

                let mut transaction = Transaction::pending(
                    user_id,
                    TransactionType::Topup,
                    Decimal::from(package.credits),
                    format!("{} package", package.name),
                    now,
                );
                transaction.amount_usd = package.price_usd;
                transaction.gateway = Some(gateway_kind);
                transaction.package_id = Some(package.id);
                transaction.metadata = serde_json::json!({
                    "package_id": package.id,
                    "package_name": package.name,
                });

                d.insert_transaction(transaction.clone())
                    .map_err(|t| ServiceError::Conflict(format!("transaction {}", t.id)))?;
                Ok::<_, ServiceError>((transaction, email))
            })
            .await?;

        let request = ChargeRequest {
            reference: transaction.id.to_string(),
            amount_usd: transaction.amount_usd,
            customer_email: email,
            description: transaction.description.clone(),
            callback_url: self.config.callback_url(&gateway_kind.to_string()),
            metadata: serde_json::json!({
                "transaction_id": transaction.id,
                "package_id": package_id,
            }),
        };

        let initiation = match with_deadline(
            self.config.gateway_timeout,
            gateway_kind,
            gateway.initiate_charge(&request),
        )
        .await
        {
            Ok(initiation) => initiation,
            Err(e) => {
                warn!(transaction_id = %transaction.id, error = %e, "Charge initiation failed");
                self.fail(transaction.id, &e.to_string()).await?;
                return Err(ServiceError::Gateway(e));
            }
        };

        let assigned = self
            .store
            .transact(|d| {
                if !d.assign_gateway_ref(transaction.id, &initiation.reference) {
                    d.fail_transaction(transaction.id, "duplicate gateway reference", now)?;
                    return Ok(false);
                }
                if let Some(t) = d.transaction_mut(transaction.id) {
                    t.charge_amount = Some(initiation.amount);
                    t.charge_currency = Some(initiation.currency.clone());
                }
                Ok::<_, LedgerError>(true)
            })
            .await?;
        if !assigned {
            error!(reference = %initiation.reference, "Gateway returned a reference already in use");
            return Err(ServiceError::Conflict(format!(
                "gateway reference already in use: {}",
                initiation.reference
            )));
        }

        info!(
            transaction_id = %transaction.id,
            gateway = %gateway_kind,
            reference = %initiation.reference,
            amount = %initiation.amount,
            currency = %initiation.currency,
            "Top-up initiated"
        );

        Ok(TopUpCheckout {
            transaction_id: transaction.id,
            checkout_url: initiation.checkout_url,
            reference: initiation.reference,
            credits: transaction.credits,
            amount: initiation.amount,
            currency: initiation.currency,
        })
    }

    async fn fail(&self, transaction_id: Uuid, reason: &str) -> Result<(), ServiceError> {
        let now = self.clock.now();
        match self
            .store
            .transact(|d| d.fail_transaction(transaction_id, reason, now))
            .await
        {
            Ok(_) | Err(LedgerError::TransactionClosed { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Verify a reference with its processor and apply the result exactly once.
    ///
    /// Gateway transport failures are returned as `ServiceError::Gateway` and
    /// leave the transaction untouched for a later retry.
    #[instrument(skip(self))]
    pub async fn reconcile(
        &self,
        gateway_kind: GatewayKind,
        reference: &str,
    ) -> Result<ReconcileOutcome, ServiceError> {
        let completed = self
            .store
            .read(|d| {
                find_by_ref(d, gateway_kind, reference)
                    .filter(|t| t.status == TransactionStatus::Completed)
                    .map(|t| t.id)
            })
            .await;
        if let Some(transaction_id) = completed {
            info!(%transaction_id, %reference, "Duplicate confirmation, already credited");
            return Ok(ReconcileOutcome::AlreadyCredited { transaction_id });
        }

        let gateway = self.gateways.get(gateway_kind)?;
        let verification = with_deadline(
            self.config.gateway_timeout,
            gateway_kind,
            gateway.verify_charge(reference),
        )
        .await?;

        let now = self.clock.now();
        let outcome = match verification {
            ChargeVerification::Pending => ReconcileOutcome::StillPending,
            ChargeVerification::Failed { reason } => {
                self.store
                    .transact(|d| apply_failure(d, gateway_kind, reference, &reason, now))
                    .await?
            }
            ChargeVerification::Success {
                amount, currency, ..
            } => {
                self.store
                    .transact(|d| apply_success(d, gateway_kind, reference, amount, &currency, now))
                    .await?
            }
        };

        match &outcome {
            ReconcileOutcome::Credited {
                transaction_id,
                credits,
                balance,
                ..
            } => info!(%transaction_id, %credits, %balance, "Top-up credited"),
            ReconcileOutcome::AlreadyCredited { transaction_id } => {
                info!(%transaction_id, "Transaction already credited, ignoring")
            }
            ReconcileOutcome::NotFound => {
                warn!(gateway = %gateway_kind, %reference, "Confirmation for unknown reference")
            }
            ReconcileOutcome::Failed {
                transaction_id,
                reason,
            } => info!(%transaction_id, %reason, "Top-up failed"),
            ReconcileOutcome::StillPending => info!(%reference, "Charge still pending"),
            ReconcileOutcome::AmountMismatch {
                transaction_id,
                expected,
                expected_currency,
                actual,
                actual_currency,
            } => error!(
                %transaction_id,
                expected = %format!("{} {}", expected, expected_currency),
                actual = %format!("{} {}", actual, actual_currency),
                "Verified amount does not match the charge"
            ),
            ReconcileOutcome::Closed {
                transaction_id,
                status,
            } => error!(%transaction_id, %status, "Confirmation for a closed transaction, needs review"),
        }

        Ok(outcome)
    }

    /// Fail pending top-ups older than `older_than`. Refunds are exempt.
    pub async fn fail_stale_pending(&self, older_than: Duration) -> Result<usize, StoreError> {
        let now = self.clock.now();
        let cutoff = match chrono::Duration::from_std(older_than) {
            Ok(age) => now - age,
            Err(_) => return Ok(0),
        };
        let is_stale = |t: &Transaction| {
            t.status == TransactionStatus::Pending
                && t.transaction_type != TransactionType::Refund
                && t.created_at < cutoff
        };

        let stale = self
            .store
            .read(|d| d.transactions().filter(|t| is_stale(t)).count())
            .await;
        if stale == 0 {
            return Ok(0);
        }

        let failed = self
            .store
            .transact(|d| {
                let ids: Vec<Uuid> = d
                    .transactions()
                    .filter(|t| is_stale(t))
                    .map(|t| t.id)
                    .collect();
                for id in &ids {
                    // Pending was checked under this same lock
                    let _ = d.fail_transaction(*id, "payment not confirmed in time", now);
                }
                Ok::<_, StoreError>(ids.len())
            })
            .await?;

        info!(failed, "Failed stale pending transactions");
        Ok(failed)
    }
}

fn apply_failure(
    d: &mut StoreData,
    gateway: GatewayKind,
    reference: &str,
    reason: &str,
    now: DateTime<Utc>,
) -> Result<ReconcileOutcome, LedgerError> {
    let Some(transaction) = find_by_ref(d, gateway, reference) else {
        return Ok(ReconcileOutcome::NotFound);
    };
    let (transaction_id, status) = (transaction.id, transaction.status);

    Ok(match status {
        TransactionStatus::Pending => {
            d.fail_transaction(transaction_id, reason, now)?;
            ReconcileOutcome::Failed {
                transaction_id,
                reason: reason.to_string(),
            }
        }
        TransactionStatus::Failed => ReconcileOutcome::Failed {
            transaction_id,
            reason: reason.to_string(),
        },
        status @ TransactionStatus::Completed => ReconcileOutcome::Closed {
            transaction_id,
            status,
        },
    })
}

fn apply_success(
    d: &mut StoreData,
    gateway: GatewayKind,
    reference: &str,
    amount: Decimal,
    currency: &str,
    now: DateTime<Utc>,
) -> Result<ReconcileOutcome, LedgerError> {
    let Some(transaction) = find_by_ref(d, gateway, reference) else {
        return Ok(ReconcileOutcome::NotFound);
    };
    let (transaction_id, status) = (transaction.id, transaction.status);

    match status {
        TransactionStatus::Completed => {
            return Ok(ReconcileOutcome::AlreadyCredited { transaction_id })
        }
        status @ TransactionStatus::Failed => {
            return Ok(ReconcileOutcome::Closed {
                transaction_id,
                status,
            })
        }
        TransactionStatus::Pending => {}
    }

    let expected = transaction.charge_amount.unwrap_or(transaction.amount_usd);
    let expected_currency = transaction
        .charge_currency
        .clone()
        .unwrap_or_else(|| "USD".to_string());
    if amount.round_dp(2) != expected.round_dp(2) || !currency.eq_ignore_ascii_case(&expected_currency) {
        d.fail_transaction(transaction_id, "verified amount mismatch", now)?;
        return Ok(ReconcileOutcome::AmountMismatch {
            transaction_id,
            expected,
            expected_currency,
            actual: amount,
            actual_currency: currency.to_string(),
        });
    }

    let (user_id, credits) = (transaction.user_id, transaction.credits);
    let balance = d.apply_credit(user_id, credits, transaction_id, now)?;
    if let Some(t) = d.transaction_mut(transaction_id) {
        if let serde_json::Value::Object(map) = &mut t.metadata {
            map.insert("verified_amount".into(), amount.to_string().into());
        }
    }

    Ok(ReconcileOutcome::Credited {
        transaction_id,
        user_id,
        credits,
        balance: balance.balance,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::payments::{ChargeInitiation, DummyGateway, PaymentGateway};
    use crate::types::User;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Paystack stand-in whose verification result is set by the test.
    struct ScriptedGateway {
        verification: Mutex<Result<ChargeVerification, GatewayError>>,
        initiate: Mutex<Result<ChargeInitiation, GatewayError>>,
        verifies: AtomicUsize,
    }

    impl ScriptedGateway {
        fn new() -> Self {
            Self {
                verification: Mutex::new(Ok(ChargeVerification::Pending)),
                initiate: Mutex::new(Ok(ChargeInitiation {
                    checkout_url: "https://checkout.example/abc".into(),
                    reference: "ps_ref_1".into(),
                    amount: dec!(8000.00),
                    currency: "NGN".into(),
                })),
                verifies: AtomicUsize::new(0),
            }
        }

        fn verify_with(&self, verification: Result<ChargeVerification, GatewayError>) {
            *self.verification.lock().unwrap() = verification;
        }
    }

    #[async_trait]
    impl PaymentGateway for ScriptedGateway {
        fn kind(&self) -> GatewayKind {
            GatewayKind::Paystack
        }

        async fn initiate_charge(&self, _request: &ChargeRequest) -> Result<ChargeInitiation, GatewayError> {
            self.initiate.lock().unwrap().clone()
        }

        async fn verify_charge(&self, _reference: &str) -> Result<ChargeVerification, GatewayError> {
            self.verifies.fetch_add(1, Ordering::SeqCst);
            self.verification.lock().unwrap().clone()
        }
    }

    struct Harness {
        store: Arc<Store>,
        clock: Arc<ManualClock>,
        gateway: Arc<ScriptedGateway>,
        reconciler: Reconciler,
        user_id: UserId,
    }

    fn harness() -> Harness {
        let now = Utc::now();
        let mut data = StoreData::new();
        let user_id = Uuid::new_v4();
        data.users.insert(
            user_id,
            User {
                id: user_id,
                email: "ada@example.com".into(),
                whatsapp_number: "+2348031234567".into(),
                phone_number: None,
                first_name: "Ada".into(),
                last_name: "Obi".into(),
                company_name: None,
                is_verified: true,
                is_active: true,
                avatar_initials: "AO".into(),
                created_at: now,
            },
        );

        let store = Arc::new(Store::with_data(data));
        let clock = Arc::new(ManualClock::new(now));
        let gateway = Arc::new(ScriptedGateway::new());
        let mut gateways = Gateways::new();
        gateways.insert(gateway.clone());
        gateways.insert(Arc::new(DummyGateway::new("USD")));
        let config = PaymentsConfig {
            gateway_timeout: Duration::from_millis(200),
            ..Default::default()
        };
        let reconciler = Reconciler::new(store.clone(), gateways, clock.clone(), config);

        Harness {
            store,
            clock,
            gateway,
            reconciler,
            user_id,
        }
    }

    async fn balance(h: &Harness) -> Decimal {
        h.store
            .read(|d| d.balance(h.user_id).map(|b| b.balance))
            .await
            .unwrap_or(Decimal::ZERO)
    }

    #[tokio::test]
    async fn test_initiate_top_up_snapshots_price() {
        let h = harness();
        let checkout = h
            .reconciler
            .initiate_top_up(h.user_id, 1, GatewayKind::Paystack)
            .await
            .unwrap();

        assert_eq!(checkout.checkout_url, "https://checkout.example/abc");
        assert_eq!(checkout.reference, "ps_ref_1");
        assert_eq!(checkout.credits, dec!(500));

        let t = h
            .store
            .read(|d| d.transaction(checkout.transaction_id).cloned())
            .await
            .unwrap();
        assert_eq!(t.status, TransactionStatus::Pending);
        assert_eq!(t.amount_usd, dec!(5.00));
        assert_eq!(t.credits, dec!(500));
        assert_eq!(t.package_id, Some(1));
        assert_eq!(t.gateway_ref.as_deref(), Some("ps_ref_1"));
        assert_eq!(t.charge_amount, Some(dec!(8000.00)));
        assert_eq!(t.charge_currency.as_deref(), Some("NGN"));
    }

    #[tokio::test]
    async fn test_initiate_unknown_package_or_gateway() {
        let h = harness();
        assert!(matches!(
            h.reconciler.initiate_top_up(h.user_id, 99, GatewayKind::Paystack).await,
            Err(ServiceError::NotFound(_))
        ));
        assert!(matches!(
            h.reconciler.initiate_top_up(h.user_id, 1, GatewayKind::Flutterwave).await,
            Err(ServiceError::Validation(_))
        ));
        assert_eq!(h.store.read(|d| d.transactions().count()).await, 0);
    }

    #[tokio::test]
    async fn test_initiate_failure_marks_failed() {
        let h = harness();
        *h.gateway.initiate.lock().unwrap() =
            Err(GatewayError::transport("paystack", "connection reset"));

        let result = h
            .reconciler
            .initiate_top_up(h.user_id, 2, GatewayKind::Paystack)
            .await;
        assert!(matches!(result, Err(ServiceError::Gateway(_))));

        let statuses: Vec<_> = h
            .store
            .read(|d| d.transactions().map(|t| t.status).collect())
            .await;
        assert_eq!(statuses, vec![TransactionStatus::Failed]);
    }

    #[tokio::test]
    async fn test_duplicate_callback_credits_once() {
        let h = harness();
        let checkout = h
            .reconciler
            .initiate_top_up(h.user_id, 1, GatewayKind::Paystack)
            .await
            .unwrap();
        h.gateway.verify_with(Ok(ChargeVerification::Success {
            amount: dec!(8000.00),
            currency: "NGN".into(),
            metadata: serde_json::Value::Null,
        }));

        let first = h
            .reconciler
            .reconcile(GatewayKind::Paystack, "ps_ref_1")
            .await
            .unwrap();
        assert_eq!(
            first,
            ReconcileOutcome::Credited {
                transaction_id: checkout.transaction_id,
                user_id: h.user_id,
                credits: dec!(500),
                balance: dec!(500),
            }
        );

        let second = h
            .reconciler
            .reconcile(GatewayKind::Paystack, "ps_ref_1")
            .await
            .unwrap();
        assert_eq!(
            second,
            ReconcileOutcome::AlreadyCredited {
                transaction_id: checkout.transaction_id
            }
        );
        assert_eq!(balance(&h).await, dec!(500));

        let totals = h
            .store
            .read(|d| d.balance(h.user_id).cloned())
            .await
            .unwrap();
        assert_eq!(totals.total_topped_up, dec!(500));
        // Second callback takes the fast path
        assert_eq!(h.gateway.verifies.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_callbacks_credit_once() {
        let h = Arc::new(harness());
        h.reconciler
            .initiate_top_up(h.user_id, 1, GatewayKind::Paystack)
            .await
            .unwrap();
        h.gateway.verify_with(Ok(ChargeVerification::Success {
            amount: dec!(8000.00),
            currency: "NGN".into(),
            metadata: serde_json::Value::Null,
        }));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let h = h.clone();
            handles.push(tokio::spawn(async move {
                h.reconciler
                    .reconcile(GatewayKind::Paystack, "ps_ref_1")
                    .await
                    .unwrap()
            }));
        }
        let mut credited = 0;
        for handle in handles {
            if matches!(handle.await.unwrap(), ReconcileOutcome::Credited { .. }) {
                credited += 1;
            }
        }
        assert_eq!(credited, 1);
        assert_eq!(balance(&h).await, dec!(500));
    }

    #[tokio::test]
    async fn test_amount_mismatch_does_not_credit() {
        let h = harness();
        let checkout = h
            .reconciler
            .initiate_top_up(h.user_id, 1, GatewayKind::Paystack)
            .await
            .unwrap();
        h.gateway.verify_with(Ok(ChargeVerification::Success {
            amount: dec!(100.00),
            currency: "NGN".into(),
            metadata: serde_json::Value::Null,
        }));

        let outcome = h
            .reconciler
            .reconcile(GatewayKind::Paystack, "ps_ref_1")
            .await
            .unwrap();
        assert!(matches!(outcome, ReconcileOutcome::AmountMismatch { .. }));
        assert_eq!(balance(&h).await, Decimal::ZERO);

        let status = h
            .store
            .read(|d| d.transaction(checkout.transaction_id).map(|t| t.status))
            .await;
        assert_eq!(status, Some(TransactionStatus::Failed));
    }

    #[tokio::test]
    async fn test_gateway_failure_marks_failed() {
        let h = harness();
        let checkout = h
            .reconciler
            .initiate_top_up(h.user_id, 1, GatewayKind::Paystack)
            .await
            .unwrap();
        h.gateway.verify_with(Ok(ChargeVerification::Failed {
            reason: "Declined".into(),
        }));

        let outcome = h
            .reconciler
            .reconcile(GatewayKind::Paystack, "ps_ref_1")
            .await
            .unwrap();
        assert_eq!(
            outcome,
            ReconcileOutcome::Failed {
                transaction_id: checkout.transaction_id,
                reason: "Declined".into()
            }
        );

        // A late success on a failed transaction is never credited
        h.gateway.verify_with(Ok(ChargeVerification::Success {
            amount: dec!(8000.00),
            currency: "NGN".into(),
            metadata: serde_json::Value::Null,
        }));
        let late = h
            .reconciler
            .reconcile(GatewayKind::Paystack, "ps_ref_1")
            .await
            .unwrap();
        assert!(matches!(late, ReconcileOutcome::Closed { .. }));
        assert_eq!(balance(&h).await, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_unknown_reference_and_transport_error() {
        let h = harness();
        h.gateway.verify_with(Ok(ChargeVerification::Success {
            amount: dec!(5),
            currency: "USD".into(),
            metadata: serde_json::Value::Null,
        }));
        assert_eq!(
            h.reconciler
                .reconcile(GatewayKind::Paystack, "nobody")
                .await
                .unwrap(),
            ReconcileOutcome::NotFound
        );

        h.gateway
            .verify_with(Err(GatewayError::transport("paystack", "connection reset")));
        assert!(matches!(
            h.reconciler.reconcile(GatewayKind::Paystack, "nobody").await,
            Err(ServiceError::Gateway(_))
        ));
    }

    #[tokio::test]
    async fn test_pending_then_stale() {
        let h = harness();
        let checkout = h
            .reconciler
            .initiate_top_up(h.user_id, 1, GatewayKind::Paystack)
            .await
            .unwrap();
        assert_eq!(
            h.reconciler
                .reconcile(GatewayKind::Paystack, "ps_ref_1")
                .await
                .unwrap(),
            ReconcileOutcome::StillPending
        );

        let ttl = Duration::from_secs(24 * 3600);
        assert_eq!(h.reconciler.fail_stale_pending(ttl).await.unwrap(), 0);

        h.clock.advance(chrono::Duration::hours(25));
        assert_eq!(h.reconciler.fail_stale_pending(ttl).await.unwrap(), 1);
        let status = h
            .store
            .read(|d| d.transaction(checkout.transaction_id).map(|t| t.status))
            .await;
        assert_eq!(status, Some(TransactionStatus::Failed));
    }

    #[tokio::test]
    async fn test_stale_sweep_skips_refunds() {
        let h = harness();
        let now = h.clock.now();
        h.store
            .transact(|d| {
                d.record_refund(h.user_id, dec!(0.0045), Uuid::new_v4(), "timeout", now);
                Ok::<_, StoreError>(())
            })
            .await
            .unwrap();

        h.clock.advance(chrono::Duration::days(30));
        assert_eq!(
            h.reconciler
                .fail_stale_pending(Duration::from_secs(3600))
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_dummy_round_trip() {
        let h = harness();
        let checkout = h
            .reconciler
            .initiate_top_up(h.user_id, 2, GatewayKind::Dummy)
            .await
            .unwrap();
        assert!(checkout
            .checkout_url
            .ends_with(&format!("/v1/payments/callback/dummy?reference={}", checkout.reference)));

        let outcome = h
            .reconciler
            .reconcile(GatewayKind::Dummy, &checkout.reference)
            .await
            .unwrap();
        assert!(matches!(outcome, ReconcileOutcome::Credited { .. }));
        assert_eq!(balance(&h).await, dec!(5000));
    }
}
