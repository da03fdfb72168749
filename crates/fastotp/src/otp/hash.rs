//! Code generation and hashing.

use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::Rng;
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Accepted code lengths.
pub const MIN_LENGTH: u8 = 4;
pub const MAX_LENGTH: u8 = 8;

/// Uniformly random numeric code of `length` digits.
pub fn generate_code(length: u8) -> String {
    let mut rng = OsRng;
    (0..length)
        .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
        .collect()
}

fn mac(secret: &SecretString, identifier: &str, code: &str) -> Option<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(secret.expose_secret().as_bytes()).ok()?;
    mac.update(identifier.as_bytes());
    mac.update(b":");
    mac.update(code.as_bytes());
    Some(mac)
}

/// `HMAC-SHA256(secret, "{identifier}:{code}")`, hex encoded.
pub fn hash_otp(secret: &SecretString, identifier: &str, code: &str) -> Option<String> {
    let mac = mac(secret, identifier, code)?;
    Some(hex::encode(mac.finalize().into_bytes()))
}

/// Constant-time check of a submitted code against a stored hash.
pub fn verify_otp(secret: &SecretString, identifier: &str, code: &str, stored_hash: &str) -> bool {
    let Ok(expected) = hex::decode(stored_hash) else {
        return false;
    };
    mac(secret, identifier, code).is_some_and(|mac| mac.verify_slice(&expected).is_ok())
}
