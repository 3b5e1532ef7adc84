//! Append-only audit log of security- and content-relevant mutations.
//!
//! Every entry is keyed by category, actor (a client identifier supplied by
//! the caller, if any), and affected entity. Entries are immutable once
//! written, with one exception: the de-duplication rule for noisy categories,
//! where the caller deletes same-triple entries from the trailing window
//! before appending, collapsing rapid repeated edits into "last edit per
//! window per field per client".
//!
//! Audit writes always run inside the same transaction as the mutation they
//! describe — an entry is never durable for a rolled-back mutation, and a
//! committed mutation never lacks its entry.

use chrono::{DateTime, Duration, Utc};
use rusqlite::Connection;
use serde::Serialize;

use crate::error::{ArborError, Result};
use crate::store::SqliteStore;

/// De-duplication window for repeated edits, in seconds.
pub const DEDUP_WINDOW_SECS: i64 = 600;

/// What kind of mutation an audit entry records.
///
/// Each category declares which of `change_from`/`change_to` it populates:
/// `ToggleEncryption` carries the boolean before/after, `ChangeParent` the
/// new parent, `Settings` the old and new values; creation and deletion
/// carry neither.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditCategory {
    ChangePassword,
    UpdateTitle,
    UpdateContent,
    ToggleEncryption,
    CreateNote,
    DeleteNote,
    ChangeParent,
    ChangePosition,
    Settings,
}

impl AuditCategory {
    /// Stable string code stored in the database.
    pub fn code(&self) -> &'static str {
        match self {
            Self::ChangePassword => "CHANGE_PASSWORD",
            Self::UpdateTitle => "UPDATE_TITLE",
            Self::UpdateContent => "UPDATE_CONTENT",
            Self::ToggleEncryption => "TOGGLE_ENCRYPTION",
            Self::CreateNote => "CREATE_NOTE",
            Self::DeleteNote => "DELETE_NOTE",
            Self::ChangeParent => "CHANGE_PARENT",
            Self::ChangePosition => "CHANGE_POSITION",
            Self::Settings => "SETTINGS",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "CHANGE_PASSWORD" => Some(Self::ChangePassword),
            "UPDATE_TITLE" => Some(Self::UpdateTitle),
            "UPDATE_CONTENT" => Some(Self::UpdateContent),
            "TOGGLE_ENCRYPTION" => Some(Self::ToggleEncryption),
            "CREATE_NOTE" => Some(Self::CreateNote),
            "DELETE_NOTE" => Some(Self::DeleteNote),
            "CHANGE_PARENT" => Some(Self::ChangeParent),
            "CHANGE_POSITION" => Some(Self::ChangePosition),
            "SETTINGS" => Some(Self::Settings),
            _ => None,
        }
    }
}

/// One immutable audit record.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub id: i64,
    pub category: AuditCategory,
    pub actor_id: Option<String>,
    pub entity_id: Option<String>,
    pub change_from: Option<String>,
    pub change_to: Option<String>,
    pub comment: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Append one entry inside the caller's transaction.
#[allow(clippy::too_many_arguments)]
pub(crate) fn append(
    conn: &Connection,
    category: AuditCategory,
    actor_id: Option<&str>,
    entity_id: Option<&str>,
    change_from: Option<&str>,
    change_to: Option<&str>,
    comment: Option<&str>,
) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO audit_log
            (category, actor_id, entity_id, change_from, change_to, comment, timestamp)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        "#,
        (
            category.code(),
            actor_id,
            entity_id,
            change_from,
            change_to,
            comment,
            Utc::now().to_rfc3339(),
        ),
    )?;
    Ok(())
}

/// Delete entries matching the (category, actor, entity) triple within the
/// trailing window, inside the caller's transaction.
///
/// Timestamps are RFC 3339 UTC strings, which order lexicographically, so
/// the cutoff comparison can stay in SQL.
pub(crate) fn delete_recent(
    conn: &Connection,
    category: AuditCategory,
    actor_id: Option<&str>,
    entity_id: Option<&str>,
    window_secs: i64,
) -> Result<()> {
    let cutoff = (Utc::now() - Duration::seconds(window_secs)).to_rfc3339();
    conn.execute(
        r#"
        DELETE FROM audit_log
        WHERE category = ?1
          AND actor_id IS ?2
          AND entity_id IS ?3
          AND timestamp >= ?4
        "#,
        (category.code(), actor_id, entity_id, cutoff),
    )?;
    Ok(())
}

/// Audit log operations over a store handle.
///
/// In-crate mutation paths (notes, credentials, settings) call [`append`]
/// and [`delete_recent`] directly inside their own transactions; this type
/// serves external callers and read access.
pub struct AuditLog<'a> {
    store: &'a SqliteStore,
}

impl<'a> AuditLog<'a> {
    pub(crate) fn new(store: &'a SqliteStore) -> Self {
        Self { store }
    }

    /// Append a standalone entry in its own transaction.
    #[allow(clippy::too_many_arguments)]
    pub fn append(
        &self,
        category: AuditCategory,
        actor_id: Option<&str>,
        entity_id: Option<&str>,
        change_from: Option<&str>,
        change_to: Option<&str>,
        comment: Option<&str>,
    ) -> Result<()> {
        let mut conn = self.store.lock_conn()?;
        let tx = conn.transaction()?;
        append(&tx, category, actor_id, entity_id, change_from, change_to, comment)?;
        tx.commit()?;
        Ok(())
    }

    /// Collapse-then-append for a noisy category, in one transaction.
    pub fn append_deduplicated(
        &self,
        category: AuditCategory,
        actor_id: Option<&str>,
        entity_id: Option<&str>,
    ) -> Result<()> {
        let mut conn = self.store.lock_conn()?;
        let tx = conn.transaction()?;
        delete_recent(&tx, category, actor_id, entity_id, DEDUP_WINDOW_SECS)?;
        append(&tx, category, actor_id, entity_id, None, None, None)?;
        tx.commit()?;
        Ok(())
    }

    /// Newest-first listing.
    pub fn list(&self, limit: usize) -> Result<Vec<AuditEntry>> {
        let conn = self.store.lock_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, category, actor_id, entity_id, change_from, change_to, comment, timestamp
            FROM audit_log
            ORDER BY id DESC
            LIMIT ?
            "#,
        )?;

        let rows = stmt.query_map([limit as i64], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, Option<String>>(6)?,
                row.get::<_, String>(7)?,
            ))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (id, code, actor_id, entity_id, change_from, change_to, comment, ts) = row?;
            let category = AuditCategory::from_code(&code).ok_or_else(|| {
                ArborError::Storage(format!("Unknown audit category '{}'", code))
            })?;
            let timestamp = DateTime::parse_from_rfc3339(&ts)
                .map_err(|e| ArborError::Storage(format!("Invalid audit timestamp: {}", e)))?
                .with_timezone(&Utc);
            entries.push(AuditEntry {
                id,
                category,
                actor_id,
                entity_id,
                change_from,
                change_to,
                comment,
                timestamp,
            });
        }
        Ok(entries)
    }

    /// Count entries matching a (category, actor, entity) triple. Test and
    /// consistency-check helper.
    pub fn count(
        &self,
        category: AuditCategory,
        actor_id: Option<&str>,
        entity_id: Option<&str>,
    ) -> Result<i64> {
        let conn = self.store.lock_conn()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM audit_log WHERE category = ?1 AND actor_id IS ?2 AND entity_id IS ?3",
            (category.code(), actor_id, entity_id),
            |row| row.get(0),
        )?;
        Ok(count)
    }
}
