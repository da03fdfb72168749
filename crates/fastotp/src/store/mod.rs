//! In-memory state with encrypted snapshot persistence.
//!
//! Every state change runs as one synchronous closure under the write lock,
//! so balance checks, debits, credits and OTP transitions are serialized.
//! Network calls never happen while the lock is held.

mod snapshot;

pub use snapshot::SnapshotFile;

use crate::error::StoreError;
use crate::types::{ApiKey, CreditPackage, OtpLog, OtpPurpose, Transaction, User, UserId};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::{Mutex, RwLock};
use tracing::{error, info};
use uuid::Uuid;

/// All persisted rows.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreData {
    /// Bumped on every committed mutation.
    #[serde(default)]
    pub generation: u64,
    #[serde(default)]
    pub(crate) users: HashMap<UserId, User>,
    #[serde(default)]
    pub(crate) balances: HashMap<UserId, crate::types::CreditBalance>,
    #[serde(default)]
    pub(crate) packages: Vec<CreditPackage>,
    /// Append-only, in creation order.
    #[serde(default)]
    transactions: Vec<Transaction>,
    /// Append-only, in creation order.
    #[serde(default)]
    otp_logs: Vec<OtpLog>,
    #[serde(default)]
    pub(crate) api_keys: HashMap<Uuid, ApiKey>,

    #[serde(skip)]
    transaction_index: HashMap<Uuid, usize>,
    #[serde(skip)]
    gateway_ref_index: HashMap<String, usize>,
    #[serde(skip)]
    otp_log_index: HashMap<Uuid, usize>,
}

impl StoreData {
    /// Fresh state with the default package catalog.
    pub fn new() -> Self {
        Self {
            packages: CreditPackage::default_catalog(),
            ..Default::default()
        }
    }

    /// Rebuild lookup indexes after deserialization.
    pub(crate) fn reindex(&mut self) {
        self.transaction_index = self
            .transactions
            .iter()
            .enumerate()
            .map(|(i, t)| (t.id, i))
            .collect();
        self.gateway_ref_index = self
            .transactions
            .iter()
            .enumerate()
            .filter_map(|(i, t)| t.gateway_ref.clone().map(|r| (r, i)))
            .collect();
        self.otp_log_index = self
            .otp_logs
            .iter()
            .enumerate()
            .map(|(i, l)| (l.id, i))
            .collect();
    }

    pub fn user(&self, id: UserId) -> Option<&User> {
        self.users.get(&id)
    }

    pub(crate) fn user_mut(&mut self, id: UserId) -> Option<&mut User> {
        self.users.get_mut(&id)
    }

    pub fn packages(&self) -> &[CreditPackage] {
        &self.packages
    }

    pub fn package(&self, id: u32) -> Option<&CreditPackage> {
        self.packages.iter().find(|p| p.id == id)
    }

    pub fn transaction(&self, id: Uuid) -> Option<&Transaction> {
        self.transaction_index
            .get(&id)
            .map(|&i| &self.transactions[i])
    }

    pub(crate) fn transaction_mut(&mut self, id: Uuid) -> Option<&mut Transaction> {
        match self.transaction_index.get(&id) {
            Some(&i) => self.transactions.get_mut(i),
            None => None,
        }
    }

    pub fn transaction_by_ref(&self, gateway_ref: &str) -> Option<&Transaction> {
        self.gateway_ref_index
            .get(gateway_ref)
            .map(|&i| &self.transactions[i])
    }

    /// Append a transaction. Fails if its gateway reference is already taken.
    pub(crate) fn insert_transaction(&mut self, transaction: Transaction) -> Result<(), Transaction> {
        if let Some(r) = &transaction.gateway_ref {
            if self.gateway_ref_index.contains_key(r) {
                return Err(transaction);
            }
        }

        let index = self.transactions.len();
        self.transaction_index.insert(transaction.id, index);
        if let Some(r) = &transaction.gateway_ref {
            self.gateway_ref_index.insert(r.clone(), index);
        }
        self.transactions.push(transaction);
        Ok(())
    }

    /// Attach a gateway reference. Returns false if another transaction owns it.
    pub(crate) fn assign_gateway_ref(&mut self, id: Uuid, gateway_ref: &str) -> bool {
        let Some(&index) = self.transaction_index.get(&id) else {
            return false;
        };
        match self.gateway_ref_index.get(gateway_ref) {
            Some(&owner) if owner != index => return false,
            _ => {}
        }

        if let Some(old) = self.transactions[index].gateway_ref.take() {
            self.gateway_ref_index.remove(&old);
        }
        self.transactions[index].gateway_ref = Some(gateway_ref.to_string());
        self.gateway_ref_index.insert(gateway_ref.to_string(), index);
        true
    }

    /// Newest first.
    pub fn transactions_for(&self, user_id: UserId, limit: usize) -> Vec<Transaction> {
        self.transactions
            .iter()
            .rev()
            .filter(|t| t.user_id == user_id)
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn transactions(&self) -> impl Iterator<Item = &Transaction> {
        self.transactions.iter()
    }

    pub(crate) fn transactions_mut(&mut self) -> impl Iterator<Item = &mut Transaction> {
        self.transactions.iter_mut()
    }

    pub fn otp_log(&self, id: Uuid) -> Option<&OtpLog> {
        self.otp_log_index.get(&id).map(|&i| &self.otp_logs[i])
    }

    pub(crate) fn otp_log_mut(&mut self, id: Uuid) -> Option<&mut OtpLog> {
        match self.otp_log_index.get(&id) {
            Some(&i) => self.otp_logs.get_mut(i),
            None => None,
        }
    }

    pub(crate) fn insert_otp_log(&mut self, log: OtpLog) {
        self.otp_log_index.insert(log.id, self.otp_logs.len());
        self.otp_logs.push(log);
    }

    /// Most recent dispatched log for an identifier, across all users.
    pub fn latest_otp_log_for(&self, identifier: &str) -> Option<&OtpLog> {
        self.latest_dispatched(|l| l.identifier == identifier)
    }

    /// Most recent dispatched log for an identifier, owned by `user_id`.
    pub fn latest_user_otp_log_for(&self, user_id: UserId, identifier: &str) -> Option<&OtpLog> {
        self.latest_dispatched(|l| l.user_id == user_id && l.identifier == identifier)
    }

    /// Most recent dispatched registration log for a user.
    pub fn latest_registration_log(&self, user_id: UserId) -> Option<&OtpLog> {
        self.latest_dispatched(|l| l.user_id == user_id && l.purpose == OtpPurpose::Registration)
    }

    fn latest_dispatched(&self, matches: impl Fn(&OtpLog) -> bool) -> Option<&OtpLog> {
        self.otp_logs
            .iter()
            .rev()
            .find(|l| l.status.is_lookup_candidate() && matches(l))
    }

    /// Newest first.
    pub fn otp_logs_for(&self, user_id: UserId, limit: usize) -> Vec<OtpLog> {
        self.otp_logs
            .iter()
            .rev()
            .filter(|l| l.user_id == user_id)
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn otp_logs(&self) -> impl Iterator<Item = &OtpLog> {
        self.otp_logs.iter()
    }

    pub(crate) fn otp_logs_mut(&mut self) -> impl Iterator<Item = &mut OtpLog> {
        self.otp_logs.iter_mut()
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            users: self.users.len(),
            transactions: self.transactions.len(),
            otp_logs: self.otp_logs.len(),
            api_keys: self.api_keys.len(),
        }
    }
}

/// Row counts for health reporting.
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub users: usize,
    pub transactions: usize,
    pub otp_logs: usize,
    pub api_keys: usize,
}

/// Shared state handle.
pub struct Store {
    data: RwLock<StoreData>,
    snapshot: Option<SnapshotFile>,
    /// Generation of the last snapshot written to disk.
    persisted: Mutex<u64>,
}

impl Store {
    /// Open an encrypted store at `path`, loading an existing snapshot.
    pub async fn open(path: PathBuf, secret: &SecretString) -> Result<Self, StoreError> {
        let snapshot = SnapshotFile::new(path, secret);
        let data = match snapshot.read().await? {
            Some(data) => {
                let stats = data.stats();
                info!(
                    users = stats.users,
                    transactions = stats.transactions,
                    otp_logs = stats.otp_logs,
                    "Loaded snapshot from {:?}",
                    snapshot.path()
                );
                data
            }
            None => StoreData::new(),
        };

        Ok(Self {
            persisted: Mutex::new(data.generation),
            data: RwLock::new(data),
            snapshot: Some(snapshot),
        })
    }

    /// In-memory only store.
    pub fn memory() -> Self {
        Self::with_data(StoreData::new())
    }

    /// In-memory store seeded with `data`.
    pub fn with_data(mut data: StoreData) -> Self {
        data.reindex();
        Self {
            persisted: Mutex::new(data.generation),
            data: RwLock::new(data),
            snapshot: None,
        }
    }

    pub fn is_persistent(&self) -> bool {
        self.snapshot.is_some()
    }

    /// Run a read-only closure against the current state.
    pub async fn read<R>(&self, f: impl FnOnce(&StoreData) -> R) -> R {
        let data = self.data.read().await;
        f(&data)
    }

    /// Run a mutation atomically and persist the result.
    ///
    /// If `f` returns `Err` it must have left the state unchanged; nothing is
    /// persisted in that case.
    pub async fn transact<T, E>(&self, f: impl FnOnce(&mut StoreData) -> Result<T, E>) -> Result<T, E>
    where
        E: From<StoreError>,
    {
        let (value, pending) = {
            let mut data = self.data.write().await;
            let value = f(&mut data)?;
            data.generation += 1;

            let pending = match self.snapshot {
                Some(_) => Some((
                    data.generation,
                    serde_json::to_vec(&*data).map_err(StoreError::from)?,
                )),
                None => None,
            };
            (value, pending)
        };

        if let (Some(snapshot), Some((generation, bytes))) = (&self.snapshot, pending) {
            let mut persisted = self.persisted.lock().await;
            // A newer snapshot may already have been written by a racing writer
            if generation > *persisted {
                if let Err(e) = snapshot.write(&bytes).await {
                    error!(generation, "Failed to persist snapshot: {}", e);
                    return Err(e.into());
                }
                *persisted = generation;
            }
        }

        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{TransactionType, User};
    use chrono::Utc;
    use rust_decimal::Decimal;
    use tempfile::TempDir;

    fn user() -> User {
        User {
            id: Uuid::new_v4(),
            email: "ada@example.com".into(),
            whatsapp_number: "+2348031234567".into(),
            phone_number: None,
            first_name: "Ada".into(),
            last_name: "Obi".into(),
            company_name: None,
            is_verified: false,
            is_active: false,
            avatar_initials: "AO".into(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_gateway_ref_unique() {
        let mut data = StoreData::new();
        let user_id = Uuid::new_v4();
        let now = Utc::now();

        let mut a = Transaction::pending(user_id, TransactionType::Topup, Decimal::ONE, "a", now);
        a.gateway_ref = Some("ref-1".into());
        let mut b = Transaction::pending(user_id, TransactionType::Topup, Decimal::ONE, "b", now);
        b.gateway_ref = Some("ref-1".into());
        let c = Transaction::pending(user_id, TransactionType::Topup, Decimal::ONE, "c", now);
        let c_id = c.id;

        assert!(data.insert_transaction(a).is_ok());
        assert!(data.insert_transaction(b).is_err());
        assert!(data.insert_transaction(c).is_ok());
        assert!(!data.assign_gateway_ref(c_id, "ref-1"));
        assert!(data.assign_gateway_ref(c_id, "ref-2"));
        assert_eq!(data.transaction_by_ref("ref-2").map(|t| t.id), Some(c_id));
    }

    #[tokio::test]
    async fn test_failed_transact_is_not_committed() {
        let store = Store::memory();
        let before = store.read(|d| d.generation).await;

        let result: Result<(), StoreError> = store
            .transact(|_| Err(StoreError::Encryption("nope".into())))
            .await;
        assert!(result.is_err());
        assert_eq!(store.read(|d| d.generation).await, before);
    }

    #[tokio::test]
    async fn test_persistence_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("fastotp.enc");
        let secret = SecretString::new("test-secret".into());
        let u = user();
        let id = u.id;

        {
            let store = Store::open(path.clone(), &secret).await.unwrap();
            assert!(store.is_persistent());
            store
                .transact(|d| {
                    d.users.insert(u.id, u);
                    Ok::<_, StoreError>(())
                })
                .await
                .unwrap();
        }

        let reopened = Store::open(path, &secret).await.unwrap();
        let email = reopened
            .read(|d| d.user(id).map(|u| u.email.clone()))
            .await;
        assert_eq!(email.as_deref(), Some("ada@example.com"));
        assert_eq!(reopened.read(|d| d.generation).await, 1);
    }
}
