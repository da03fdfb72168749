//! Credit ledger.
//!
//! Balances change only through [`StoreData::apply_debit`] and
//! [`StoreData::apply_credit`], each of which runs inside a single
//! [`Store::transact`] critical section.

use crate::clock::Clock;
use crate::error::LedgerError;
use crate::store::{Store, StoreData};
use crate::types::{
    to_credits, CreditBalance, GatewayKind, Transaction, TransactionStatus, TransactionType,
    UserId,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

impl StoreData {
    /// Balance for a user, created on first access.
    pub(crate) fn balance_mut(
        &mut self,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<&mut CreditBalance, LedgerError> {
        if !self.users.contains_key(&user_id) {
            return Err(LedgerError::UserNotFound(user_id));
        }
        Ok(self
            .balances
            .entry(user_id)
            .or_insert_with(|| CreditBalance::new(user_id, now)))
    }

    /// Current balance without creating one.
    pub fn balance(&self, user_id: UserId) -> Option<&CreditBalance> {
        self.balances.get(&user_id)
    }

    /// Debit `amount` and record a completed consumption transaction.
    ///
    /// Leaves state untouched on any error.
    pub(crate) fn apply_debit(
        &mut self,
        user_id: UserId,
        amount: Decimal,
        otp_log_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<CreditBalance, LedgerError> {
        let amount = to_credits(amount);
        if amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount(amount));
        }

        let balance = self.balance_mut(user_id, now)?;
        if !balance.has_credits(amount) {
            return Err(LedgerError::InsufficientBalance {
                required: amount,
                available: balance.balance,
            });
        }

        balance.balance = to_credits(balance.balance - amount);
        balance.total_consumed = to_credits(balance.total_consumed + amount);
        balance.updated_at = now;
        let snapshot = balance.clone();

        if let Some(log) = otp_log_id.and_then(|id| self.otp_log_mut(id)) {
            log.cost_credits = amount;
        }

        let mut consumption = Transaction::pending(
            user_id,
            TransactionType::Consumption,
            amount,
            "OTP delivery",
            now,
        );
        consumption.status = TransactionStatus::Completed;
        consumption.completed_at = Some(now);
        if let Some(id) = otp_log_id {
            consumption.metadata = serde_json::json!({ "otp_log_id": id });
        }
        // Consumption rows carry no gateway reference, so this cannot collide
        let _ = self.insert_transaction(consumption);

        Ok(snapshot)
    }

    /// Apply a pending top-up or refund to the balance and complete it.
    ///
    /// Idempotent on `transaction_id`: a completed transaction yields
    /// `AlreadyCredited` and the balance is not touched again.
    pub(crate) fn apply_credit(
        &mut self,
        user_id: UserId,
        amount: Decimal,
        transaction_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<CreditBalance, LedgerError> {
        let amount = to_credits(amount);
        let transaction = self
            .transaction(transaction_id)
            .ok_or(LedgerError::TransactionNotFound(transaction_id))?;

        if transaction.user_id != user_id {
            return Err(LedgerError::OwnershipMismatch {
                transaction_id,
                user_id,
            });
        }
        match transaction.status {
            TransactionStatus::Completed => {
                return Err(LedgerError::AlreadyCredited(transaction_id));
            }
            TransactionStatus::Failed => {
                return Err(LedgerError::TransactionClosed {
                    id: transaction_id,
                    status: transaction.status,
                });
            }
            TransactionStatus::Pending => {}
        }
        let transaction_type = transaction.transaction_type;
        if transaction_type == TransactionType::Consumption {
            return Err(LedgerError::NotCreditable(transaction_id));
        }
        if amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount(amount));
        }

        let balance = self.balance_mut(user_id, now)?;
        balance.balance = to_credits(balance.balance + amount);
        if transaction_type == TransactionType::Topup {
            balance.total_topped_up = to_credits(balance.total_topped_up + amount);
        }
        balance.updated_at = now;
        let snapshot = balance.clone();

        if let Some(transaction) = self.transaction_mut(transaction_id) {
            transaction.status = TransactionStatus::Completed;
            transaction.completed_at = Some(now);
        }

        Ok(snapshot)
    }

    /// Mark a pending transaction failed. Terminal transactions are closed.
    pub(crate) fn fail_transaction(
        &mut self,
        transaction_id: Uuid,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Transaction, LedgerError> {
        let transaction = self
            .transaction_mut(transaction_id)
            .ok_or(LedgerError::TransactionNotFound(transaction_id))?;

        if transaction.status.is_terminal() {
            return Err(LedgerError::TransactionClosed {
                id: transaction_id,
                status: transaction.status,
            });
        }

        transaction.status = TransactionStatus::Failed;
        transaction.completed_at = Some(now);
        if let serde_json::Value::Object(map) = &mut transaction.metadata {
            map.insert("failure_reason".into(), reason.into());
        } else {
            transaction.metadata = serde_json::json!({ "failure_reason": reason });
        }
        Ok(transaction.clone())
    }

    /// Record a pending refund for credits charged to an undelivered OTP.
    pub(crate) fn record_refund(
        &mut self,
        user_id: UserId,
        credits: Decimal,
        otp_log_id: Uuid,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Uuid {
        let mut refund = Transaction::pending(
            user_id,
            TransactionType::Refund,
            credits,
            "Refund for undelivered OTP",
            now,
        );
        refund.metadata = serde_json::json!({ "otp_log_id": otp_log_id, "reason": reason });
        let id = refund.id;
        let _ = self.insert_transaction(refund);
        id
    }

    /// Create and immediately complete a trial top-up.
    pub(crate) fn grant_trial(
        &mut self,
        user_id: UserId,
        credits: Decimal,
        now: DateTime<Utc>,
    ) -> Result<Option<CreditBalance>, LedgerError> {
        self.balance_mut(user_id, now)?;
        if credits <= Decimal::ZERO {
            return Ok(None);
        }

        let mut trial =
            Transaction::pending(user_id, TransactionType::Topup, credits, "Trial credits", now);
        trial.gateway = Some(GatewayKind::Trial);
        let id = trial.id;
        let _ = self.insert_transaction(trial);
        self.apply_credit(user_id, credits, id, now).map(Some)
    }
}

/// Async facade over the ledger operations.
pub struct Ledger {
    store: Arc<Store>,
    clock: Arc<dyn Clock>,
}

impl Ledger {
    pub fn new(store: Arc<Store>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Balance for a user, created lazily.
    pub async fn balance(&self, user_id: UserId) -> Result<CreditBalance, LedgerError> {
        // Avoid a write (and a snapshot) when the row already exists
        if let Some(balance) = self.store.read(|d| d.balance(user_id).cloned()).await {
            return Ok(balance);
        }

        let now = self.clock.now();
        self.store
            .transact(|d| d.balance_mut(user_id, now).map(|b| b.clone()))
            .await
    }

    /// Atomically debit a balance. Fails with `InsufficientBalance` when the
    /// balance is below `amount`, leaving state unchanged.
    pub async fn debit(
        &self,
        user_id: UserId,
        amount: Decimal,
        otp_log_id: Option<Uuid>,
    ) -> Result<CreditBalance, LedgerError> {
        let now = self.clock.now();
        let balance = self
            .store
            .transact(|d| d.apply_debit(user_id, amount, otp_log_id, now))
            .await?;
        debug!(%user_id, %amount, balance = %balance.balance, "Debited credits");
        Ok(balance)
    }

    /// Credit a pending top-up or refund exactly once.
    pub async fn credit(
        &self,
        user_id: UserId,
        amount: Decimal,
        transaction_id: Uuid,
    ) -> Result<CreditBalance, LedgerError> {
        let now = self.clock.now();
        let result = self
            .store
            .transact(|d| d.apply_credit(user_id, amount, transaction_id, now))
            .await;

        match &result {
            Ok(balance) => {
                info!(%user_id, %transaction_id, %amount, balance = %balance.balance, "Credited");
            }
            Err(LedgerError::AlreadyCredited(_)) => {
                info!(%transaction_id, "Transaction already credited, ignoring");
            }
            Err(_) => {}
        }
        result
    }

    /// Approve a pending refund, returning credits to the balance.
    pub async fn approve_refund(&self, transaction_id: Uuid) -> Result<CreditBalance, LedgerError> {
        let now = self.clock.now();
        let balance = self
            .store
            .transact(|d| {
                let refund = d
                    .transaction(transaction_id)
                    .ok_or(LedgerError::TransactionNotFound(transaction_id))?;
                if refund.transaction_type != TransactionType::Refund {
                    return Err(LedgerError::NotCreditable(transaction_id));
                }
                if refund.status.is_terminal() {
                    return Err(LedgerError::TransactionClosed {
                        id: transaction_id,
                        status: refund.status,
                    });
                }
                let (user_id, credits) = (refund.user_id, refund.credits);
                d.apply_credit(user_id, credits, transaction_id, now)
            })
            .await?;
        info!(%transaction_id, balance = %balance.balance, "Refund approved");
        Ok(balance)
    }

    /// Reject a pending refund.
    pub async fn reject_refund(&self, transaction_id: Uuid) -> Result<Transaction, LedgerError> {
        let now = self.clock.now();
        let transaction = self
            .store
            .transact(|d| {
                let refund = d
                    .transaction(transaction_id)
                    .ok_or(LedgerError::TransactionNotFound(transaction_id))?;
                if refund.transaction_type != TransactionType::Refund {
                    return Err(LedgerError::NotCreditable(transaction_id));
                }
                d.fail_transaction(transaction_id, "refund rejected", now)
            })
            .await?;
        info!(%transaction_id, "Refund rejected");
        Ok(transaction)
    }

    /// Most recent transactions, newest first.
    pub async fn transactions(&self, user_id: UserId, limit: usize) -> Vec<Transaction> {
        self.store
            .read(|d| d.transactions_for(user_id, limit))
            .await
    }
}
