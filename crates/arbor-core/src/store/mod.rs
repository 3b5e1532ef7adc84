//! SQLite storage for Arbor.
//!
//! One store handle owns one connection behind a mutex; every logical
//! operation (login check, password change, note mutation) locks the
//! connection, runs all of its reads, writes, and audit appends inside a
//! single rusqlite transaction, and commits or rolls back as a unit. A
//! `Transaction` that is dropped without `commit()` rolls back, which covers
//! every early-return and error path.
//!
//! The store is deliberately dumb: schema bootstrap and raw access only.
//! Typed access to the credential slots lives in [`options`], policy in the
//! credential lifecycle and note-tree modules.

pub mod options;

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::Connection;

use crate::audit::AuditLog;
use crate::credentials::CredentialLifecycle;
use crate::error::{ArborError, Result};
use crate::notes::NoteTree;

/// Handle to the Arbor SQLite database.
///
/// Constructed once and passed explicitly to the components that need it;
/// there is no process-global connection. Tests get isolation with
/// [`SqliteStore::in_memory`].
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// Open a fresh in-memory database.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Lock the database connection, returning an error if the mutex is
    /// poisoned.
    pub(crate) fn lock_conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| ArborError::Storage("SQLite connection poisoned".to_string()))
    }

    /// Credential lifecycle operations over this store.
    pub fn credentials(&self) -> CredentialLifecycle<'_> {
        CredentialLifecycle::new(self)
    }

    /// Audit log operations over this store.
    pub fn audit(&self) -> AuditLog<'_> {
        AuditLog::new(self)
    }

    /// Note tree operations over this store.
    pub fn notes(&self) -> NoteTree<'_> {
        NoteTree::new(self)
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS options (
                name TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                date_modified TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS notes (
                note_id TEXT PRIMARY KEY,
                parent_id TEXT,
                title TEXT NOT NULL,
                content TEXT NOT NULL,
                encrypted INTEGER NOT NULL DEFAULT 0,
                position INTEGER NOT NULL,
                is_deleted INTEGER NOT NULL DEFAULT 0,
                date_created TEXT NOT NULL,
                date_modified TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_notes_parent
            ON notes (parent_id, position)
            WHERE is_deleted = 0;

            -- Append-only; rows are only ever removed by the audit
            -- de-duplication window.
            CREATE TABLE IF NOT EXISTS audit_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                category TEXT NOT NULL,
                actor_id TEXT,
                entity_id TEXT,
                change_from TEXT,
                change_to TEXT,
                comment TEXT,
                timestamp TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_audit_triple
            ON audit_log (category, actor_id, entity_id, timestamp);
            "#,
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_schema_bootstraps() {
        let store = SqliteStore::in_memory().unwrap();
        let conn = store.lock_conn().unwrap();

        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN ('options', 'notes', 'audit_log')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 3);
    }

    #[test]
    fn test_open_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("arbor.db");

        {
            let _store = SqliteStore::open(&path).unwrap();
        }
        // Re-opening an existing database must not fail on schema creation.
        let _store = SqliteStore::open(&path).unwrap();
    }
}
