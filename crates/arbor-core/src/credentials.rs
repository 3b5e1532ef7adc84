//! Credential lifecycle: setup, login verification, password change.
//!
//! Composes the key derivation and envelope layers over the credential
//! record. One password yields two secrets via two persisted salts: the
//! verification secret (compared at login, stored as the verification hash)
//! and the wrapping secret (used only to wrap the data key, never stored).
//!
//! Installation state is `UNINITIALIZED` until [`CredentialLifecycle::setup`]
//! runs, exactly once; every other operation requires the credential record
//! to exist.
//!
//! Password change rotates only the wrapping of the data key, never the key
//! itself, so note content — encrypted or plain — is untouched. The new
//! verification hash and the new wrapped key are committed in one
//! transaction together with their audit entry; there is no observable state
//! where the two disagree about which password they belong to.

use serde::Serialize;
use subtle::ConstantTimeEq;
use tracing::{error, info, warn};
use zeroize::Zeroizing;

use crate::audit::{self, AuditCategory};
use crate::crypto::envelope::{generate_data_key, unwrap_data_key, wrap_data_key, DATA_KEY_LEN};
use crate::crypto::kdf::{derive_secret, generate_salt, DerivedSecret};
use crate::error::{ArborError, Result};
use crate::store::options::CredentialRecord;
use crate::store::SqliteStore;

/// Structured outcome of a password change.
///
/// Serializes to `{"success": bool, "message"?: string}`; an HTTP layer can
/// return it verbatim in the response body.
#[derive(Debug, Clone, Serialize)]
pub struct ChangePasswordOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ChangePasswordOutcome {
    fn succeeded() -> Self {
        Self {
            success: true,
            message: None,
        }
    }

    fn rejected(message: &str) -> Self {
        Self {
            success: false,
            message: Some(message.to_string()),
        }
    }
}

/// Credential operations over a store handle.
pub struct CredentialLifecycle<'a> {
    store: &'a SqliteStore,
}

impl<'a> CredentialLifecycle<'a> {
    pub(crate) fn new(store: &'a SqliteStore) -> Self {
        Self { store }
    }

    /// Whether setup has already run.
    pub fn is_initialized(&self) -> Result<bool> {
        let conn = self.store.lock_conn()?;
        CredentialRecord::exists(&conn)
    }

    /// The stored username, if any.
    pub fn username(&self) -> Result<Option<String>> {
        let conn = self.store.lock_conn()?;
        Ok(CredentialRecord::load(&conn)?.map(|r| r.username))
    }

    /// First-run setup: create the credential record.
    ///
    /// Generates both salts and the data key, derives the verification hash
    /// and the initial wrapping secret, wraps the key, and persists all five
    /// slots in one commit. Refuses to run twice.
    pub fn setup(&self, username: &str, password: &str) -> Result<()> {
        if username.is_empty() {
            return Err(ArborError::InvalidInput(
                "Username cannot be empty".to_string(),
            ));
        }

        let mut conn = self.store.lock_conn()?;
        let tx = conn.transaction()?;

        if CredentialRecord::exists(&tx)? {
            return Err(ArborError::AlreadyInitialized);
        }

        let verification_salt = generate_salt();
        let derived_key_salt = generate_salt();

        let verification_secret = derive_secret(password, &verification_salt)?;
        let wrapping_secret = derive_secret(password, &derived_key_salt)?;

        let data_key = generate_data_key();
        let encrypted_data_key = wrap_data_key(&data_key, &wrapping_secret);

        let record = CredentialRecord {
            username: username.to_string(),
            verification_salt: verification_salt.to_vec(),
            derived_key_salt: derived_key_salt.to_vec(),
            verification_hash: verification_secret.as_bytes().to_vec(),
            encrypted_data_key,
        };
        record.insert(&tx)?;

        tx.commit()?;
        info!(username, "credential record created");
        Ok(())
    }

    /// Check a login attempt.
    ///
    /// Returns `false` unless the username matches the stored one *and* the
    /// password derives to the stored verification hash. The hash comparison
    /// is fixed-time over the full length, and derivation runs even when the
    /// username already mismatched, so the two failure modes are
    /// indistinguishable to the caller and on the clock.
    pub fn verify_login(&self, username: &str, password: &str) -> Result<bool> {
        let record = {
            let conn = self.store.lock_conn()?;
            CredentialRecord::load(&conn)?.ok_or(ArborError::NotInitialized)?
        };

        let username_matches = record.username == username;
        let hash_matches = match derive_secret(password, &record.verification_salt) {
            Ok(secret) => verification_matches(&secret, &record.verification_hash),
            // Empty password cannot have been set up; treat as plain mismatch.
            Err(ArborError::InvalidInput(_)) => false,
            Err(e) => return Err(e),
        };

        let ok = username_matches & hash_matches;
        if !ok {
            warn!("login verification failed");
        }
        Ok(ok)
    }

    /// Change the password, atomically rotating the data key's wrapping.
    ///
    /// A wrong current password is a structured rejection with no effect at
    /// all: no partial writes, no audit entry. On success the verification
    /// hash, the re-wrapped data key, and one `CHANGE_PASSWORD` audit entry
    /// commit as a single transaction.
    pub fn change_password(
        &self,
        actor_id: Option<&str>,
        current_password: &str,
        new_password: &str,
    ) -> Result<ChangePasswordOutcome> {
        if new_password.is_empty() {
            return Err(ArborError::InvalidInput(
                "New password cannot be empty".to_string(),
            ));
        }

        let mut conn = self.store.lock_conn()?;
        // Dropped without commit on every early return, rolling back.
        let tx = conn.transaction()?;

        let record = CredentialRecord::load(&tx)?.ok_or(ArborError::NotInitialized)?;

        let current_verification = match derive_secret(current_password, &record.verification_salt)
        {
            Ok(secret) => secret,
            Err(ArborError::InvalidInput(_)) => {
                return Ok(ChangePasswordOutcome::rejected("current password mismatch"));
            }
            Err(e) => return Err(e),
        };
        if !verification_matches(&current_verification, &record.verification_hash) {
            warn!("password change rejected: current password mismatch");
            return Ok(ChangePasswordOutcome::rejected("current password mismatch"));
        }

        // The wrapping secret comes from the same, just-verified password, so
        // an integrity failure here is corruption or a defect, not user error.
        let current_wrapping = derive_secret(current_password, &record.derived_key_salt)?;
        let data_key = unwrap_data_key(&record.encrypted_data_key, &current_wrapping)
            .inspect_err(|_| {
                error!("data key envelope failed integrity check under a verified password");
            })?;

        let new_verification = derive_secret(new_password, &record.verification_salt)?;
        let new_wrapping = derive_secret(new_password, &record.derived_key_salt)?;
        let new_encrypted_data_key = wrap_data_key(&data_key, &new_wrapping);

        CredentialRecord::update_password_binding(
            &tx,
            new_verification.as_bytes(),
            &new_encrypted_data_key,
        )?;
        audit::append(
            &tx,
            AuditCategory::ChangePassword,
            actor_id,
            None,
            None,
            None,
            None,
        )?;

        tx.commit()?;
        info!("password changed");
        Ok(ChangePasswordOutcome::succeeded())
    }

    /// Recover the data key with the current password.
    ///
    /// Callers should verify the password first; an unverified wrong
    /// password surfaces as [`ArborError::Integrity`].
    pub fn data_key(&self, password: &str) -> Result<Zeroizing<[u8; DATA_KEY_LEN]>> {
        let record = {
            let conn = self.store.lock_conn()?;
            CredentialRecord::load(&conn)?.ok_or(ArborError::NotInitialized)?
        };

        let wrapping = derive_secret(password, &record.derived_key_salt)?;
        unwrap_data_key(&record.encrypted_data_key, &wrapping)
    }
}

/// Fixed-time comparison of a derived secret against the stored hash.
///
/// No early exit on a matched prefix; `subtle` reduces a length mismatch to
/// a constant-time `false`.
fn verification_matches(secret: &DerivedSecret, stored_hash: &[u8]) -> bool {
    bool::from(secret.as_bytes().ct_eq(stored_hash))
}
