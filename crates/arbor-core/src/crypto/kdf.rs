//! Password-to-secret derivation using scrypt.
//!
//! scrypt is memory-hard, so brute-forcing a stolen verification hash is
//! expensive, while a single legitimate derivation stays interactively fast
//! (tens to low hundreds of milliseconds on current hardware).

use rand::rngs::OsRng;
use rand::RngCore;
use scrypt::Params;
use unicode_normalization::UnicodeNormalization;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{ArborError, Result};

/// scrypt cost parameters. N = 2^14 = 16384, r = 8, p = 1.
///
/// These are fixed: stored hashes and wrapped keys were produced under them,
/// so changing them would invalidate every existing credential record.
const SCRYPT_LOG_N: u8 = 14;
const SCRYPT_R: u32 = 8;
const SCRYPT_P: u32 = 1;

/// Length of a derived secret in bytes (256 bits).
pub const SECRET_LEN: usize = 32;

/// Length of a generated salt in bytes.
pub const SALT_LEN: usize = 32;

/// Minimum salt length accepted by [`derive_secret`].
const MIN_SALT_LEN: usize = 16;

/// A secret derived from a password.
///
/// Depending on the salt used this is either the verification secret or the
/// data-key-wrapping secret. The bytes are zeroized on drop.
#[derive(Clone, ZeroizeOnDrop)]
pub struct DerivedSecret {
    bytes: [u8; SECRET_LEN],
}

impl DerivedSecret {
    pub(crate) fn from_bytes(bytes: [u8; SECRET_LEN]) -> Self {
        Self { bytes }
    }

    /// Raw secret bytes. Use only for immediate comparison or cipher keying;
    /// never store or log this value.
    pub fn as_bytes(&self) -> &[u8; SECRET_LEN] {
        &self.bytes
    }
}

impl std::fmt::Debug for DerivedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedSecret")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Derive a secret from a password and a salt.
///
/// The password is NFKC-normalized before being encoded to bytes. Every call
/// site must go through this function: a caller that skipped normalization
/// would silently fail to verify against previously stored hashes.
///
/// Deterministic: same password and salt always produce the same secret.
/// A wrong password is not an error here; it simply derives a value that
/// will not match. Mismatch policy belongs to the credential lifecycle.
pub fn derive_secret(password: &str, salt: &[u8]) -> Result<DerivedSecret> {
    if password.is_empty() {
        return Err(ArborError::InvalidInput(
            "Password cannot be empty".to_string(),
        ));
    }

    if salt.len() < MIN_SALT_LEN {
        return Err(ArborError::InvalidInput(format!(
            "Salt must be at least {} bytes",
            MIN_SALT_LEN
        )));
    }

    let params = Params::new(SCRYPT_LOG_N, SCRYPT_R, SCRYPT_P, SECRET_LEN)
        .map_err(|e| ArborError::Crypto(format!("Invalid scrypt params: {}", e)))?;

    let mut normalized: String = password.nfkc().collect();

    let mut secret = [0u8; SECRET_LEN];
    let outcome = scrypt::scrypt(normalized.as_bytes(), salt, &params, &mut secret);
    normalized.zeroize();
    outcome.map_err(|e| ArborError::Crypto(format!("Key derivation failed: {}", e)))?;

    Ok(DerivedSecret::from_bytes(secret))
}

/// Generate a random salt for a new derivation slot.
///
/// Each credential slot gets its own salt, generated once at setup and never
/// rotated: rotating a salt would make existing wrapped material
/// underivable without the original password.
pub fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    salt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derivation_deterministic() {
        let salt = b"unique-salt-1234567890123456";

        let a = derive_secret("correct horse", salt).unwrap();
        let b = derive_secret("correct horse", salt).unwrap();

        assert_eq!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn test_distinct_salts_give_independent_secrets() {
        // Verification and wrapping secrets come from the same password with
        // different salts; they must never coincide.
        let verification_salt = generate_salt();
        let wrapping_salt = generate_salt();

        let verification = derive_secret("alpaca", &verification_salt).unwrap();
        let wrapping = derive_secret("alpaca", &wrapping_salt).unwrap();

        assert_ne!(verification.as_bytes(), wrapping.as_bytes());
    }

    #[test]
    fn test_different_password_different_secret() {
        let salt = b"fixed-salt-0123456789012345";

        let a = derive_secret("alpaca", salt).unwrap();
        let b = derive_secret("alpaca1", salt).unwrap();

        assert_ne!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn test_nfkc_normalization_applied() {
        let salt = b"fixed-salt-0123456789012345";

        // U+212B ANGSTROM SIGN normalizes to U+00C5 under NFKC.
        let composed = derive_secret("caf\u{00c5}", salt).unwrap();
        let compat = derive_secret("caf\u{212b}", salt).unwrap();

        assert_eq!(composed.as_bytes(), compat.as_bytes());
    }

    #[test]
    fn test_empty_password_rejected() {
        let salt = b"fixed-salt-0123456789012345";
        assert!(derive_secret("", salt).is_err());
    }

    #[test]
    fn test_short_salt_rejected() {
        assert!(derive_secret("alpaca", b"short").is_err());
    }

    #[test]
    fn test_secret_debug_redacts() {
        let salt = b"fixed-salt-0123456789012345";
        let secret = derive_secret("alpaca", salt).unwrap();

        let debug_output = format!("{:?}", secret);
        assert!(debug_output.contains("REDACTED"));
        assert!(!debug_output.contains(&hex::encode(&secret.as_bytes()[..4])));
    }
}
