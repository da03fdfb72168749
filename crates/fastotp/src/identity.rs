//! Users and API keys.

use crate::clock::Clock;
use crate::error::ServiceError;
use crate::store::Store;
use crate::types::{
    avatar_initials, ApiKey, ApiKeyStatus, KeyEnvironment, NewUser, ProfileUpdate, User, UserId,
};
use crate::validation::{hash_secret, normalize_email, normalize_phone_number};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::RngCore;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Raw API key prefix.
const KEY_PREFIX: &str = "fotk";

/// Characters of the raw key shown back to the user.
const DISPLAY_PREFIX_LEN: usize = 12;

/// A freshly created key. `raw` is shown once and never stored.
#[derive(Debug, Clone)]
pub struct IssuedApiKey {
    pub key: ApiKey,
    pub raw: String,
}

pub struct IdentityService {
    store: Arc<Store>,
    clock: Arc<dyn Clock>,
    trial_credits: Decimal,
}

impl IdentityService {
    pub fn new(store: Arc<Store>, clock: Arc<dyn Clock>, trial_credits: Decimal) -> Self {
        Self {
            store,
            clock,
            trial_credits,
        }
    }

    /// Create an inactive, unverified user and grant the trial credits.
    pub async fn register_user(&self, new_user: NewUser) -> Result<User, ServiceError> {
        let email = normalize_email(&new_user.email).map_err(ServiceError::Validation)?;
        let whatsapp_number =
            normalize_phone_number(&new_user.whatsapp_number).map_err(ServiceError::Validation)?;
        let phone_number = new_user
            .phone_number
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .map(normalize_phone_number)
            .transpose()
            .map_err(ServiceError::Validation)?;

        let first_name = new_user.first_name.trim().to_string();
        let last_name = new_user.last_name.trim().to_string();
        let now = self.clock.now();
        let user = User {
            id: Uuid::new_v4(),
            avatar_initials: avatar_initials(&first_name, &last_name, &email),
            email,
            whatsapp_number,
            phone_number,
            first_name,
            last_name,
            company_name: new_user.company_name.filter(|c| !c.trim().is_empty()),
            is_verified: false,
            is_active: false,
            created_at: now,
        };
        let trial_credits = self.trial_credits;

        let user = self
            .store
            .transact(|d| {
                if d.users.values().any(|u| u.email == user.email) {
                    return Err(ServiceError::Conflict(format!(
                        "email already registered: {}",
                        user.email
                    )));
                }
                d.users.insert(user.id, user.clone());
                d.grant_trial(user.id, trial_credits, now)?;
                Ok(user)
            })
            .await?;

        info!(user_id = %user.id, %trial_credits, "Registered user");
        Ok(user)
    }

    /// Apply a profile change and re-derive the avatar initials.
    pub async fn update_profile(
        &self,
        user_id: UserId,
        update: ProfileUpdate,
    ) -> Result<User, ServiceError> {
        let phone_number = match update.phone_number.as_deref().map(str::trim) {
            None => None,
            Some("") => Some(None),
            Some(raw) => Some(Some(
                normalize_phone_number(raw).map_err(ServiceError::Validation)?,
            )),
        };
        let company_name = update
            .company_name
            .map(|c| Some(c.trim().to_string()).filter(|c| !c.is_empty()));

        let user = self
            .store
            .transact(|d| {
                let user = d
                    .user_mut(user_id)
                    .ok_or_else(|| ServiceError::NotFound(format!("user {}", user_id)))?;
                if let Some(first_name) = &update.first_name {
                    user.first_name = first_name.trim().to_string();
                }
                if let Some(last_name) = &update.last_name {
                    user.last_name = last_name.trim().to_string();
                }
                if let Some(company_name) = company_name {
                    user.company_name = company_name;
                }
                if let Some(phone_number) = phone_number {
                    user.phone_number = phone_number;
                }
                user.avatar_initials = avatar_initials(&user.first_name, &user.last_name, &user.email);
                Ok::<_, ServiceError>(user.clone())
            })
            .await?;

        info!(%user_id, "Updated profile");
        Ok(user)
    }

    pub async fn user(&self, user_id: UserId) -> Result<User, ServiceError> {
        self.store
            .read(|d| d.user(user_id).cloned())
            .await
            .ok_or_else(|| ServiceError::NotFound(format!("user {}", user_id)))
    }

    /// Create an API key for an active user. The raw key is returned once.
    pub async fn create_api_key(
        &self,
        user_id: UserId,
        name: &str,
        environment: KeyEnvironment,
    ) -> Result<IssuedApiKey, ServiceError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ServiceError::Validation("API key name must not be empty".into()));
        }

        let mut token = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut token);
        let raw = format!(
            "{}_{}_{}",
            KEY_PREFIX,
            environment,
            URL_SAFE_NO_PAD.encode(token)
        );

        let key = ApiKey {
            id: Uuid::new_v4(),
            user_id,
            name: name.to_string(),
            prefix: format!("{}...", &raw[..DISPLAY_PREFIX_LEN]),
            key_hash: hash_secret(&raw),
            environment,
            status: ApiKeyStatus::Active,
            last_used_at: None,
            total_requests: 0,
            created_at: self.clock.now(),
        };

        let key = self
            .store
            .transact(|d| {
                match d.user(user_id) {
                    None => return Err(ServiceError::NotFound(format!("user {}", user_id))),
                    Some(u) if !u.is_active => {
                        return Err(ServiceError::Validation(
                            "account must be verified before creating API keys".into(),
                        ))
                    }
                    Some(_) => {}
                }
                d.api_keys.insert(key.id, key.clone());
                Ok(key)
            })
            .await?;

        info!(%user_id, key_id = %key.id, prefix = %key.prefix, "Created API key");
        Ok(IssuedApiKey { key, raw })
    }

    /// Revoke a key. Revoking an already revoked key returns it unchanged.
    pub async fn revoke_api_key(&self, key_id: Uuid) -> Result<ApiKey, ServiceError> {
        let current = self
            .store
            .read(|d| d.api_keys.get(&key_id).cloned())
            .await
            .ok_or_else(|| ServiceError::NotFound(format!("API key {}", key_id)))?;
        if current.status == ApiKeyStatus::Revoked {
            return Ok(current);
        }

        let key = self
            .store
            .transact(|d| {
                let key = d
                    .api_keys
                    .get_mut(&key_id)
                    .ok_or_else(|| ServiceError::NotFound(format!("API key {}", key_id)))?;
                key.status = ApiKeyStatus::Revoked;
                Ok::<_, ServiceError>(key.clone())
            })
            .await?;

        info!(%key_id, "Revoked API key");
        Ok(key)
    }

    /// Resolve an active key from its raw value and record the request.
    pub async fn authenticate_api_key(&self, raw: &str) -> Result<ApiKey, ServiceError> {
        let key_hash = hash_secret(raw.trim());
        let now = self.clock.now();

        self.store
            .transact(|d| {
                let user_active = |user_id: UserId| d.user(user_id).is_some_and(|u| u.is_active);
                let key_id = d
                    .api_keys
                    .values()
                    .find(|k| k.key_hash == key_hash)
                    .filter(|k| k.status == ApiKeyStatus::Active && user_active(k.user_id))
                    .map(|k| k.id)
                    .ok_or(ServiceError::Unauthorized)?;

                let key = d.api_keys.get_mut(&key_id).ok_or(ServiceError::Unauthorized)?;
                key.total_requests += 1;
                key.last_used_at = Some(now);
                Ok(key.clone())
            })
            .await
    }

    /// Keys for a user, newest first.
    pub async fn api_keys_for(&self, user_id: UserId) -> Vec<ApiKey> {
        let mut keys: Vec<ApiKey> = self
            .store
            .read(|d| {
                d.api_keys
                    .values()
                    .filter(|k| k.user_id == user_id)
                    .cloned()
                    .collect()
            })
            .await;
        keys.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        keys
    }
}
