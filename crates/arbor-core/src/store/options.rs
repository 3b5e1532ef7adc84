//! The option table: generic named settings plus the credential slots.
//!
//! The credential slots are modeled as an explicit typed record
//! ([`CredentialRecord`]) with a narrow read/write contract instead of an
//! arbitrary key/value bag. Binary values are base64-encoded strings in the
//! table. Only this module knows the slot names; the settings API refuses
//! them so no other component can clobber credentials through the generic
//! path.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};

use crate::audit::{self, AuditCategory};
use crate::error::{ArborError, Result};
use crate::store::SqliteStore;

const USERNAME: &str = "username";
const PASSWORD_VERIFICATION_SALT: &str = "password_verification_salt";
const PASSWORD_DERIVED_KEY_SALT: &str = "password_derived_key_salt";
const PASSWORD_VERIFICATION_HASH: &str = "password_verification_hash";
const ENCRYPTED_DATA_KEY: &str = "encrypted_data_key";

/// Option names reserved for the credential record.
const CREDENTIAL_SLOTS: [&str; 5] = [
    USERNAME,
    PASSWORD_VERIFICATION_SALT,
    PASSWORD_DERIVED_KEY_SALT,
    PASSWORD_VERIFICATION_HASH,
    ENCRYPTED_DATA_KEY,
];

pub(crate) fn get_option(conn: &Connection, name: &str) -> Result<Option<String>> {
    let value = conn
        .query_row(
            "SELECT value FROM options WHERE name = ?",
            [name],
            |row| row.get(0),
        )
        .optional()?;
    Ok(value)
}

pub(crate) fn set_option(conn: &Connection, name: &str, value: &str) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO options (name, value, date_modified)
        VALUES (?1, ?2, ?3)
        ON CONFLICT(name) DO UPDATE SET value = ?2, date_modified = ?3
        "#,
        (name, value, Utc::now().to_rfc3339()),
    )?;
    Ok(())
}

fn get_binary_option(conn: &Connection, name: &str) -> Result<Option<Vec<u8>>> {
    match get_option(conn, name)? {
        Some(encoded) => {
            let bytes = BASE64.decode(&encoded).map_err(|e| {
                ArborError::Storage(format!("Option '{}' is not valid base64: {}", name, e))
            })?;
            Ok(Some(bytes))
        }
        None => Ok(None),
    }
}

fn set_binary_option(conn: &Connection, name: &str, value: &[u8]) -> Result<()> {
    set_option(conn, name, &BASE64.encode(value))
}

/// The singleton credential record, one per installation.
///
/// The two salts are generated once at setup and never rotated. The
/// verification hash and the wrapped data key are replaced wholesale, and
/// only together, on password change.
pub struct CredentialRecord {
    pub username: String,
    pub verification_salt: Vec<u8>,
    pub derived_key_salt: Vec<u8>,
    pub verification_hash: Vec<u8>,
    pub encrypted_data_key: Vec<u8>,
}

impl CredentialRecord {
    /// Load the credential record, if setup has run.
    ///
    /// A record with some but not all slots present is treated as
    /// corruption, not as "uninitialized".
    pub(crate) fn load(conn: &Connection) -> Result<Option<Self>> {
        let username = get_option(conn, USERNAME)?;
        let verification_salt = get_binary_option(conn, PASSWORD_VERIFICATION_SALT)?;
        let derived_key_salt = get_binary_option(conn, PASSWORD_DERIVED_KEY_SALT)?;
        let verification_hash = get_binary_option(conn, PASSWORD_VERIFICATION_HASH)?;
        let encrypted_data_key = get_binary_option(conn, ENCRYPTED_DATA_KEY)?;

        match (
            username,
            verification_salt,
            derived_key_salt,
            verification_hash,
            encrypted_data_key,
        ) {
            (Some(username), Some(vs), Some(dks), Some(vh), Some(edk)) => Ok(Some(Self {
                username,
                verification_salt: vs,
                derived_key_salt: dks,
                verification_hash: vh,
                encrypted_data_key: edk,
            })),
            (None, None, None, None, None) => Ok(None),
            _ => Err(ArborError::Storage(
                "Credential record is incomplete".to_string(),
            )),
        }
    }

    pub(crate) fn exists(conn: &Connection) -> Result<bool> {
        Ok(get_option(conn, USERNAME)?.is_some())
    }

    /// Persist a freshly created record. Setup-time only.
    pub(crate) fn insert(&self, conn: &Connection) -> Result<()> {
        set_option(conn, USERNAME, &self.username)?;
        set_binary_option(conn, PASSWORD_VERIFICATION_SALT, &self.verification_salt)?;
        set_binary_option(conn, PASSWORD_DERIVED_KEY_SALT, &self.derived_key_salt)?;
        set_binary_option(conn, PASSWORD_VERIFICATION_HASH, &self.verification_hash)?;
        set_binary_option(conn, ENCRYPTED_DATA_KEY, &self.encrypted_data_key)?;
        Ok(())
    }

    /// Replace the password-bound slots together.
    ///
    /// Called only inside the password-change transaction, so the hash and
    /// the wrapped key can never be observed disagreeing about which
    /// password they correspond to.
    pub(crate) fn update_password_binding(
        conn: &Connection,
        verification_hash: &[u8],
        encrypted_data_key: &[u8],
    ) -> Result<()> {
        set_binary_option(conn, PASSWORD_VERIFICATION_HASH, verification_hash)?;
        set_binary_option(conn, ENCRYPTED_DATA_KEY, encrypted_data_key)?;
        Ok(())
    }
}

impl SqliteStore {
    /// Read a general setting by name.
    pub fn get_setting(&self, name: &str) -> Result<Option<String>> {
        let conn = self.lock_conn()?;
        get_option(&conn, name)
    }

    /// Write a general setting, with a `Settings` audit entry recording the
    /// before/after values, in one transaction.
    ///
    /// The credential slot names are rejected here; they are written only by
    /// the credential lifecycle.
    pub fn set_setting(&self, actor: Option<&str>, name: &str, value: &str) -> Result<()> {
        if CREDENTIAL_SLOTS.contains(&name) {
            return Err(ArborError::InvalidInput(format!(
                "Option '{}' is a credential slot and cannot be set directly",
                name
            )));
        }

        let mut conn = self.lock_conn()?;
        let tx = conn.transaction()?;

        let previous = get_option(&tx, name)?;
        set_option(&tx, name, value)?;
        audit::append(
            &tx,
            AuditCategory::Settings,
            actor,
            Some(name),
            previous.as_deref(),
            Some(value),
            None,
        )?;

        tx.commit()?;
        Ok(())
    }
}
