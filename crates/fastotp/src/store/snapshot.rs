//! Encrypted snapshot file for [`StoreData`].

use super::StoreData;
use crate::error::StoreError;
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

/// Domain separator mixed into the snapshot key.
const KEY_DERIVATION_PATH: &str = "fastotp/store";

/// Nonce size for AES-GCM (96 bits = 12 bytes).
const NONCE_SIZE: usize = 12;

/// AES-256-GCM encrypted snapshot on disk.
///
/// File format: `[12 bytes nonce][ciphertext with auth tag]`.
pub struct SnapshotFile {
    path: PathBuf,
    key: [u8; 32],
}

impl SnapshotFile {
    pub fn new(path: PathBuf, secret: &SecretString) -> Self {
        Self {
            path,
            key: derive_key(secret),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Encrypt and write a serialized snapshot, atomically via temp file + rename.
    pub async fn write(&self, plaintext: &[u8]) -> Result<(), StoreError> {
        let data = encrypt(plaintext, &self.key)?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let temp_path = self.path.with_extension("tmp");
        fs::write(&temp_path, &data).await?;
        fs::rename(&temp_path, &self.path).await?;

        debug!("Saved encrypted snapshot ({} bytes) to {:?}", data.len(), self.path);
        Ok(())
    }

    /// Load the snapshot. Returns `None` if no file exists yet.
    pub async fn read(&self) -> Result<Option<StoreData>, StoreError> {
        if !fs::try_exists(&self.path).await? {
            info!("Snapshot not found at {:?}, starting fresh", self.path);
            return Ok(None);
        }

        let data = fs::read(&self.path).await?;
        if data.len() < NONCE_SIZE {
            warn!("Snapshot file too short, starting fresh");
            return Ok(None);
        }

        let plaintext = decrypt(&data, &self.key).map_err(|_| {
            StoreError::Encryption(
                "Failed to decrypt snapshot. Was the OTP secret rotated?".to_string(),
            )
        })?;

        let mut store: StoreData = serde_json::from_slice(&plaintext)?;
        store.reindex();
        Ok(Some(store))
    }
}

/// Derive the 32-byte snapshot key: `SHA256(secret || KEY_DERIVATION_PATH)`.
fn derive_key(secret: &SecretString) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(secret.expose_secret().as_bytes());
    hasher.update(KEY_DERIVATION_PATH.as_bytes());

    let mut key = [0u8; 32];
    key.copy_from_slice(&hasher.finalize());
    key
}

fn encrypt(plaintext: &[u8], key: &[u8; 32]) -> Result<Vec<u8>, StoreError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher.encrypt(nonce, plaintext)?;

    let mut data = nonce_bytes.to_vec();
    data.extend(ciphertext);
    Ok(data)
}

fn decrypt(data: &[u8], key: &[u8; 32]) -> Result<Vec<u8>, StoreError> {
    if data.len() < NONCE_SIZE {
        return Err(StoreError::Encryption("Data too short".into()));
    }

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let nonce = Nonce::from_slice(&data[..NONCE_SIZE]);
    Ok(cipher.decrypt(nonce, &data[NONCE_SIZE..])?)
}
