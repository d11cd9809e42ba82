//! Argon2 password hashing for locally held credentials.

use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use password_hash::{PasswordHash, SaltString};

#[derive(Debug, thiserror::Error)]
pub enum SecurityError {
    #[error("random source unavailable: {0}")]
    Random(String),
    #[error("password hashing failed: {0}")]
    Hash(String),
}

/// Hash with a fresh 16-byte salt, returning a PHC string.
pub fn hash_password(password: &str) -> Result<String, SecurityError> {
    let mut salt_bytes = [0u8; 16];
    getrandom::getrandom(&mut salt_bytes).map_err(|e| SecurityError::Random(e.to_string()))?;
    let salt = SaltString::encode_b64(&salt_bytes).map_err(|e| SecurityError::Hash(e.to_string()))?;
    let argon2 = Argon2::default();
    let phc = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| SecurityError::Hash(e.to_string()))?
        .to_string();
    Ok(phc)
}

/// False for a mismatch and for anything that is not a PHC string.
pub fn verify_password(hash: &str, password: &str) -> bool {
    if let Ok(parsed) = PasswordHash::new(hash) {
        let argon2 = Argon2::default();
        argon2.verify_password(password.as_bytes(), &parsed).is_ok()
    } else {
        false
    }
}
