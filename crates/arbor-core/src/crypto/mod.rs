//! Cryptographic operations for Arbor.
//!
//! Two concerns live here:
//! - **kdf**: scrypt-based password-to-secret derivation. One password feeds
//!   two independent derivations (distinct persisted salts): a *verification
//!   secret* compared at login, and a *wrapping secret* that never leaves the
//!   envelope layer.
//! - **envelope**: wrapping the 32-byte data key under a wrapping secret with
//!   an embedded integrity digest, so a wrong password is detected without
//!   the data key ever being stored unwrapped.
//!
//! ## Security Model
//!
//! - The data key is generated once at setup and never rotates; only its
//!   wrapping changes on password change.
//! - Neither derived secret is persisted; only the verification secret's
//!   value is stored (as the verification hash) and it reveals nothing usable
//!   to decrypt the data key.
//! - Key material is zeroized from memory on drop.
//!
//! We do NOT defend against a compromised host or an attacker who can read
//! process memory while a password is being handled.

pub mod envelope;
pub mod kdf;

pub use envelope::{generate_data_key, unwrap_data_key, wrap_data_key, DATA_KEY_LEN};
pub use kdf::{derive_secret, generate_salt, DerivedSecret, SALT_LEN, SECRET_LEN};
