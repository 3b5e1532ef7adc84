//! Data key envelope: wrap/unwrap the 32-byte data key under a wrapping
//! secret.
//!
//! The wrapped form is `AES-256-CTR(secret, digest || data_key)` where
//! `digest` is the first four bytes of `SHA-256(data_key)`. The digest is how
//! a wrong wrapping secret is detected: decrypting with the wrong key yields
//! a payload whose recomputed digest will not match the claimed one.
//!
//! The CTR counter starts at a fixed value. That is safe here *only because*
//! the plaintext (the data key) never changes and every re-wrap happens under
//! a freshly derived, different secret (different password, different
//! keystream). This is not a general-purpose nonce pattern; do not reuse it
//! for anything re-encrypted under the same key more than once.

use aes::Aes256;
use ctr::cipher::{KeyIvInit, StreamCipher};
use ctr::Ctr128BE;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::crypto::kdf::DerivedSecret;
use crate::error::{ArborError, Result};

/// Length of the data key in bytes.
pub const DATA_KEY_LEN: usize = 32;

/// Leading bytes of SHA-256(data_key) embedded in the envelope.
const DIGEST_LEN: usize = 4;

/// Fixed initial counter block, big-endian value 5.
const INITIAL_COUNTER: u128 = 5;

type Aes256Ctr = Ctr128BE<Aes256>;

fn keystream(secret: &DerivedSecret) -> Aes256Ctr {
    let iv: [u8; 16] = INITIAL_COUNTER.to_be_bytes();
    Aes256Ctr::new(secret.as_bytes().into(), &iv.into())
}

fn payload_digest(data_key: &[u8]) -> [u8; DIGEST_LEN] {
    let hash = Sha256::digest(data_key);
    let mut digest = [0u8; DIGEST_LEN];
    digest.copy_from_slice(&hash[..DIGEST_LEN]);
    digest
}

/// Generate a fresh random data key.
///
/// Called exactly once per installation, at setup. The key is the root of
/// trust for client-side content encryption and only ever leaves this
/// process wrapped.
pub fn generate_data_key() -> Zeroizing<[u8; DATA_KEY_LEN]> {
    let mut key = Zeroizing::new([0u8; DATA_KEY_LEN]);
    OsRng.fill_bytes(&mut *key);
    key
}

/// Wrap a data key under a wrapping secret.
///
/// Returns the 36-byte raw ciphertext; the credential store base64-encodes
/// it for the option table.
pub fn wrap_data_key(data_key: &[u8; DATA_KEY_LEN], secret: &DerivedSecret) -> Vec<u8> {
    let digest = payload_digest(data_key);

    let mut buf = Vec::with_capacity(DIGEST_LEN + DATA_KEY_LEN);
    buf.extend_from_slice(&digest);
    buf.extend_from_slice(data_key);

    keystream(secret).apply_keystream(&mut buf);
    buf
}

/// Unwrap a data key, verifying the embedded digest.
///
/// Returns [`ArborError::Integrity`] if the ciphertext has the wrong length
/// or the digest does not match — i.e. the ciphertext was tampered with or
/// the secret is wrong.
pub fn unwrap_data_key(
    ciphertext: &[u8],
    secret: &DerivedSecret,
) -> Result<Zeroizing<[u8; DATA_KEY_LEN]>> {
    if ciphertext.len() != DIGEST_LEN + DATA_KEY_LEN {
        return Err(ArborError::Integrity);
    }

    let mut buf = Zeroizing::new(ciphertext.to_vec());
    keystream(secret).apply_keystream(&mut buf);

    let (claimed, payload) = buf.split_at(DIGEST_LEN);
    let computed = payload_digest(payload);

    if !bool::from(claimed.ct_eq(&computed)) {
        return Err(ArborError::Integrity);
    }

    let mut data_key = Zeroizing::new([0u8; DATA_KEY_LEN]);
    data_key.copy_from_slice(payload);
    Ok(data_key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::kdf::{derive_secret, generate_salt};

    fn test_secret(password: &str) -> DerivedSecret {
        let salt = b"envelope-test-salt-0123456789";
        derive_secret(password, salt).unwrap()
    }

    #[test]
    fn test_wrap_unwrap_round_trip() {
        let secret = test_secret("alpaca");
        let data_key = generate_data_key();

        let wrapped = wrap_data_key(&data_key, &secret);
        assert_eq!(wrapped.len(), DIGEST_LEN + DATA_KEY_LEN);

        let unwrapped = unwrap_data_key(&wrapped, &secret).unwrap();
        assert_eq!(*unwrapped, *data_key);
    }

    #[test]
    fn test_wrong_secret_fails_integrity() {
        let data_key = generate_data_key();
        let wrapped = wrap_data_key(&data_key, &test_secret("alpaca"));

        let result = unwrap_data_key(&wrapped, &test_secret("not-alpaca"));
        assert!(matches!(result, Err(ArborError::Integrity)));
    }

    #[test]
    fn test_tampered_ciphertext_fails_integrity() {
        let secret = test_secret("alpaca");
        let data_key = generate_data_key();
        let wrapped = wrap_data_key(&data_key, &secret);

        // Corrupt each byte in turn; every corruption must be caught.
        for i in 0..wrapped.len() {
            let mut corrupted = wrapped.clone();
            corrupted[i] ^= 0x01;
            let result = unwrap_data_key(&corrupted, &secret);
            assert!(
                matches!(result, Err(ArborError::Integrity)),
                "corruption at byte {} went undetected",
                i
            );
        }
    }

    #[test]
    fn test_truncated_ciphertext_rejected() {
        let secret = test_secret("alpaca");
        let data_key = generate_data_key();
        let wrapped = wrap_data_key(&data_key, &secret);

        assert!(unwrap_data_key(&wrapped[..20], &secret).is_err());
        assert!(unwrap_data_key(&[], &secret).is_err());
    }

    #[test]
    fn test_rewrap_under_new_secret_preserves_key() {
        let data_key = generate_data_key();

        let old_secret = derive_secret("alpaca", &generate_salt()).unwrap();
        let new_secret = derive_secret("newpass", &generate_salt()).unwrap();

        let old_wrapped = wrap_data_key(&data_key, &old_secret);
        let recovered = unwrap_data_key(&old_wrapped, &old_secret).unwrap();
        let new_wrapped = wrap_data_key(&recovered, &new_secret);

        assert_eq!(*unwrap_data_key(&new_wrapped, &new_secret).unwrap(), *data_key);
        assert_ne!(old_wrapped, new_wrapped);
    }
}
