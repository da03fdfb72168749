//! Identifier normalisation and masking.

use crate::types::Channel;
use sha2::{Digest, Sha256};

/// Characters tolerated between digits of a phone number.
const PHONE_SEPARATORS: &[char] = &[' ', '-', '.', '(', ')'];

/// Shortest and longest E.164 number, in digits.
const PHONE_DIGITS: std::ops::RangeInclusive<usize> = 8..=15;

/// SHA-256 of an API key, hex encoded. Only this is stored.
pub fn hash_secret(secret: &str) -> String {
    hex::encode(Sha256::digest(secret.as_bytes()))
}

/// Normalize a phone number to E.164 (`+` followed by digits).
///
/// Accepts a `+` or `00` international prefix, or bare digits that already
/// start with a country code. Trunk-prefixed local numbers (`0803...`) are
/// rejected because the country cannot be inferred.
pub fn normalize_phone_number(number: &str) -> Result<String, String> {
    let number = number.trim();
    let (international, rest) = match number.strip_prefix('+') {
        Some(rest) => (true, rest),
        None => match number.strip_prefix("00") {
            Some(rest) => (true, rest),
            None => (false, number),
        },
    };

    let mut digits = String::with_capacity(rest.len());
    for c in rest.chars() {
        match c {
            '0'..='9' => digits.push(c),
            c if PHONE_SEPARATORS.contains(&c) => {}
            other => return Err(format!("Invalid character in phone number: {:?}", other)),
        }
    }

    if !PHONE_DIGITS.contains(&digits.len()) {
        return Err(format!(
            "Phone number must have {} to {} digits",
            PHONE_DIGITS.start(),
            PHONE_DIGITS.end()
        ));
    }
    if digits.starts_with('0') || (!international && digits.len() < 10) {
        return Err("Phone number must include country code".into());
    }

    Ok(format!("+{}", digits))
}

/// Lowercase and sanity-check an email address.
pub fn normalize_email(email: &str) -> Result<String, String> {
    let email = email.trim().to_lowercase();
    if email.is_empty() {
        return Err("Email must not be empty".into());
    }

    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(email),
        _ => Err(format!("Invalid email address: {}", email)),
    }
}

/// Normalize an OTP destination for its channel.
pub fn normalize_identifier(channel: Channel, identifier: &str) -> Result<String, String> {
    if identifier.trim().is_empty() {
        return Err("Identifier must not be empty".into());
    }

    if channel.is_phone() {
        normalize_phone_number(identifier)
    } else {
        normalize_email(identifier)
    }
}

/// Mask an identifier for logs, keeping the last four characters of a phone
/// number or the first character and domain of an email.
pub fn mask_identifier(identifier: &str) -> String {
    if let Some((local, domain)) = identifier.split_once('@') {
        let first: String = local.chars().take(1).collect();
        return format!("{}***@{}", first, domain);
    }

    let len = identifier.chars().count();
    if len <= 4 {
        return "*".repeat(len);
    }

    let visible: String = identifier.chars().skip(len - 4).collect();
    if identifier.starts_with('+') {
        format!("+{}{}", "*".repeat(len - 5), visible)
    } else {
        format!("{}{}", "*".repeat(len - 4), visible)
    }
}
