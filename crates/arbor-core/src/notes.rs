//! Note tree operations.
//!
//! Notes live in a single tree (`parent_id`, sibling `position`), soft
//! deleted rather than erased. Every mutation runs in one transaction
//! bracketing the row changes and their audit entries: title/content edits
//! go through the de-duplication window, an encryption-flag toggle records
//! its before/after values, moves record re-parenting and repositioning.
//!
//! When a note is marked encrypted, its title and content are opaque
//! ciphertext produced by the client; the server stores them untouched.

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use uuid::Uuid;

use crate::audit::{self, AuditCategory, DEDUP_WINDOW_SECS};
use crate::error::{ArborError, Result};
use crate::store::SqliteStore;

/// One note row.
#[derive(Debug, Clone, Serialize)]
pub struct Note {
    pub note_id: String,
    pub parent_id: Option<String>,
    pub title: String,
    pub content: String,
    pub encrypted: bool,
    pub position: i64,
    pub date_created: String,
    pub date_modified: String,
}

/// Field updates for [`NoteTree::update_note`]. `None` leaves a field as is.
#[derive(Debug, Default, Clone)]
pub struct NoteUpdate {
    pub title: Option<String>,
    pub content: Option<String>,
    pub encrypted: Option<bool>,
}

/// Note tree operations over a store handle.
pub struct NoteTree<'a> {
    store: &'a SqliteStore,
}

impl<'a> NoteTree<'a> {
    pub(crate) fn new(store: &'a SqliteStore) -> Self {
        Self { store }
    }

    /// Create a note at the end of the parent's child list.
    pub fn create_note(
        &self,
        actor_id: Option<&str>,
        parent_id: Option<&str>,
        title: &str,
        content: &str,
    ) -> Result<String> {
        let mut conn = self.store.lock_conn()?;
        let tx = conn.transaction()?;

        if let Some(parent) = parent_id {
            if load_note(&tx, parent)?.is_none() {
                return Err(ArborError::NoteNotFound(parent.to_string()));
            }
        }

        let note_id = Uuid::new_v4().to_string();
        let position = next_position(&tx, parent_id)?;
        let now = Utc::now().to_rfc3339();

        tx.execute(
            r#"
            INSERT INTO notes
                (note_id, parent_id, title, content, encrypted, position,
                 is_deleted, date_created, date_modified)
            VALUES (?1, ?2, ?3, ?4, 0, ?5, 0, ?6, ?6)
            "#,
            (&note_id, parent_id, title, content, position, &now),
        )?;

        audit::append(
            &tx,
            AuditCategory::CreateNote,
            actor_id,
            Some(&note_id),
            None,
            None,
            None,
        )?;

        tx.commit()?;
        Ok(note_id)
    }

    /// Apply field updates, auditing each changed field.
    ///
    /// Repeated title/content edits from the same actor collapse into one
    /// audit entry per ten-minute window; encryption toggles are always
    /// recorded, with before/after values.
    pub fn update_note(
        &self,
        actor_id: Option<&str>,
        note_id: &str,
        update: &NoteUpdate,
    ) -> Result<()> {
        let mut conn = self.store.lock_conn()?;
        let tx = conn.transaction()?;

        let existing =
            load_note(&tx, note_id)?.ok_or_else(|| ArborError::NoteNotFound(note_id.to_string()))?;

        let title = update.title.as_deref().unwrap_or(&existing.title);
        let content = update.content.as_deref().unwrap_or(&existing.content);
        let encrypted = update.encrypted.unwrap_or(existing.encrypted);

        tx.execute(
            r#"
            UPDATE notes
            SET title = ?1, content = ?2, encrypted = ?3, date_modified = ?4
            WHERE note_id = ?5
            "#,
            (
                title,
                content,
                encrypted as i64,
                Utc::now().to_rfc3339(),
                note_id,
            ),
        )?;

        if title != existing.title {
            audit::delete_recent(
                &tx,
                AuditCategory::UpdateTitle,
                actor_id,
                Some(note_id),
                DEDUP_WINDOW_SECS,
            )?;
            audit::append(
                &tx,
                AuditCategory::UpdateTitle,
                actor_id,
                Some(note_id),
                None,
                None,
                None,
            )?;
        }

        if content != existing.content {
            audit::delete_recent(
                &tx,
                AuditCategory::UpdateContent,
                actor_id,
                Some(note_id),
                DEDUP_WINDOW_SECS,
            )?;
            audit::append(
                &tx,
                AuditCategory::UpdateContent,
                actor_id,
                Some(note_id),
                None,
                None,
                None,
            )?;
        }

        if encrypted != existing.encrypted {
            audit::append(
                &tx,
                AuditCategory::ToggleEncryption,
                actor_id,
                Some(note_id),
                Some(&existing.encrypted.to_string()),
                Some(&encrypted.to_string()),
                None,
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    /// Soft-delete a note and its whole subtree, one audit entry per note.
    pub fn delete_note(&self, actor_id: Option<&str>, note_id: &str) -> Result<()> {
        let mut conn = self.store.lock_conn()?;
        let tx = conn.transaction()?;

        if load_note(&tx, note_id)?.is_none() {
            return Err(ArborError::NoteNotFound(note_id.to_string()));
        }

        let mut pending = vec![note_id.to_string()];
        while let Some(id) = pending.pop() {
            let mut stmt =
                tx.prepare("SELECT note_id FROM notes WHERE parent_id = ? AND is_deleted = 0")?;
            let children = stmt
                .query_map([&id], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            pending.extend(children);

            tx.execute(
                "UPDATE notes SET is_deleted = 1, date_modified = ? WHERE note_id = ?",
                (Utc::now().to_rfc3339(), &id),
            )?;
            audit::append(
                &tx,
                AuditCategory::DeleteNote,
                actor_id,
                Some(&id),
                None,
                None,
                None,
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    /// Re-parent a note to the end of the new parent's child list.
    pub fn move_to(
        &self,
        actor_id: Option<&str>,
        note_id: &str,
        new_parent: Option<&str>,
    ) -> Result<()> {
        let mut conn = self.store.lock_conn()?;
        let tx = conn.transaction()?;

        if load_note(&tx, note_id)?.is_none() {
            return Err(ArborError::NoteNotFound(note_id.to_string()));
        }
        if let Some(parent) = new_parent {
            if load_note(&tx, parent)?.is_none() {
                return Err(ArborError::NoteNotFound(parent.to_string()));
            }
        }
        validate_parent(&tx, note_id, new_parent)?;

        let position = next_position(&tx, new_parent)?;
        tx.execute(
            "UPDATE notes SET parent_id = ?, position = ?, date_modified = ? WHERE note_id = ?",
            (new_parent, position, Utc::now().to_rfc3339(), note_id),
        )?;

        audit::append(
            &tx,
            AuditCategory::ChangeParent,
            actor_id,
            Some(note_id),
            None,
            new_parent,
            None,
        )?;

        tx.commit()?;
        Ok(())
    }

    /// Place a note directly before a sibling.
    pub fn move_before(&self, actor_id: Option<&str>, note_id: &str, sibling_id: &str) -> Result<()> {
        self.reposition(actor_id, note_id, sibling_id, false)
    }

    /// Place a note directly after a sibling.
    pub fn move_after(&self, actor_id: Option<&str>, note_id: &str, sibling_id: &str) -> Result<()> {
        self.reposition(actor_id, note_id, sibling_id, true)
    }

    fn reposition(
        &self,
        actor_id: Option<&str>,
        note_id: &str,
        sibling_id: &str,
        after: bool,
    ) -> Result<()> {
        let mut conn = self.store.lock_conn()?;
        let tx = conn.transaction()?;

        if load_note(&tx, note_id)?.is_none() {
            return Err(ArborError::NoteNotFound(note_id.to_string()));
        }
        let sibling = load_note(&tx, sibling_id)?
            .ok_or_else(|| ArborError::NoteNotFound(sibling_id.to_string()))?;
        validate_parent(&tx, note_id, sibling.parent_id.as_deref())?;

        // Shift the tail of the sibling's parent to open a slot, then drop
        // the note in. date_modified of shifted rows stays put so unrelated
        // edits win conflict resolution.
        if after {
            tx.execute(
                "UPDATE notes SET position = position + 1 WHERE parent_id IS ? AND position > ? AND is_deleted = 0",
                (sibling.parent_id.as_deref(), sibling.position),
            )?;
        } else {
            tx.execute(
                "UPDATE notes SET position = position + 1 WHERE parent_id IS ? AND position >= ? AND is_deleted = 0",
                (sibling.parent_id.as_deref(), sibling.position),
            )?;
        }

        let new_position = if after {
            sibling.position + 1
        } else {
            sibling.position
        };
        tx.execute(
            "UPDATE notes SET parent_id = ?, position = ? WHERE note_id = ?",
            (sibling.parent_id.as_deref(), new_position, note_id),
        )?;

        // Position shuffles are audited against the parent, not the note.
        audit::append(
            &tx,
            AuditCategory::ChangePosition,
            actor_id,
            sibling.parent_id.as_deref(),
            None,
            None,
            None,
        )?;

        tx.commit()?;
        Ok(())
    }

    /// Fetch a live note by ID.
    pub fn get_note(&self, note_id: &str) -> Result<Option<Note>> {
        let conn = self.store.lock_conn()?;
        load_note(&conn, note_id)
    }

    /// Live children of a parent (or roots), in position order.
    pub fn list_children(&self, parent_id: Option<&str>) -> Result<Vec<Note>> {
        let conn = self.store.lock_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT note_id, parent_id, title, content, encrypted, position,
                   date_created, date_modified
            FROM notes
            WHERE parent_id IS ? AND is_deleted = 0
            ORDER BY position
            "#,
        )?;
        let rows = stmt.query_map([parent_id], note_from_row)?;
        let mut notes = Vec::new();
        for row in rows {
            notes.push(row?);
        }
        Ok(notes)
    }
}

fn note_from_row(row: &rusqlite::Row<'_>) -> std::result::Result<Note, rusqlite::Error> {
    Ok(Note {
        note_id: row.get(0)?,
        parent_id: row.get(1)?,
        title: row.get(2)?,
        content: row.get(3)?,
        encrypted: row.get::<_, i64>(4)? != 0,
        position: row.get(5)?,
        date_created: row.get(6)?,
        date_modified: row.get(7)?,
    })
}

fn load_note(conn: &Connection, note_id: &str) -> Result<Option<Note>> {
    let note = conn
        .query_row(
            r#"
            SELECT note_id, parent_id, title, content, encrypted, position,
                   date_created, date_modified
            FROM notes
            WHERE note_id = ? AND is_deleted = 0
            "#,
            [note_id],
            note_from_row,
        )
        .optional()?;
    Ok(note)
}

/// Reject a target parent that is the note itself or lies in its subtree.
///
/// A move that violates this would create a parent cycle, detaching the
/// subtree from the root set and making it unreachable. Walks up the
/// ancestor chain from the target parent; the chain is acyclic before the
/// move, so the walk terminates.
fn validate_parent(conn: &Connection, note_id: &str, new_parent: Option<&str>) -> Result<()> {
    let mut current = new_parent.map(str::to_string);
    while let Some(id) = current {
        if id == note_id {
            return Err(ArborError::InvalidInput(
                "Cannot move a note into its own subtree".to_string(),
            ));
        }
        current = conn
            .query_row(
                "SELECT parent_id FROM notes WHERE note_id = ?",
                [&id],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?
            .flatten();
    }
    Ok(())
}

fn next_position(conn: &Connection, parent_id: Option<&str>) -> Result<i64> {
    let max: Option<i64> = conn.query_row(
        "SELECT MAX(position) FROM notes WHERE parent_id IS ? AND is_deleted = 0",
        [parent_id],
        |row| row.get(0),
    )?;
    Ok(max.map_or(0, |m| m + 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_appends_positions() {
        let store = SqliteStore::in_memory().unwrap();
        let notes = store.notes();

        let a = notes.create_note(None, None, "a", "").unwrap();
        let b = notes.create_note(None, None, "b", "").unwrap();
        let c = notes.create_note(None, Some(&a), "c", "").unwrap();

        let roots = notes.list_children(None).unwrap();
        assert_eq!(
            roots.iter().map(|n| n.note_id.as_str()).collect::<Vec<_>>(),
            vec![a.as_str(), b.as_str()]
        );
        assert_eq!(roots[0].position, 0);
        assert_eq!(roots[1].position, 1);

        let children = notes.list_children(Some(&a)).unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].note_id, c);
        assert_eq!(children[0].position, 0);
    }

    #[test]
    fn test_create_under_missing_parent_fails() {
        let store = SqliteStore::in_memory().unwrap();
        let result = store.notes().create_note(None, Some("nope"), "a", "");
        assert!(matches!(result, Err(ArborError::NoteNotFound(_))));
    }

    #[test]
    fn test_update_audits_changed_fields_only() {
        let store = SqliteStore::in_memory().unwrap();
        let notes = store.notes();
        let id = notes.create_note(Some("c1"), None, "title", "body").unwrap();

        let update = NoteUpdate {
            title: Some("new title".to_string()),
            ..Default::default()
        };
        notes.update_note(Some("c1"), &id, &update).unwrap();

        let audit = store.audit();
        assert_eq!(
            audit
                .count(AuditCategory::UpdateTitle, Some("c1"), Some(&id))
                .unwrap(),
            1
        );
        assert_eq!(
            audit
                .count(AuditCategory::UpdateContent, Some("c1"), Some(&id))
                .unwrap(),
            0
        );

        let note = notes.get_note(&id).unwrap().unwrap();
        assert_eq!(note.title, "new title");
        assert_eq!(note.content, "body");
    }

    #[test]
    fn test_rapid_edits_collapse() {
        let store = SqliteStore::in_memory().unwrap();
        let notes = store.notes();
        let id = notes.create_note(Some("c1"), None, "t0", "").unwrap();

        for i in 1..=5 {
            let update = NoteUpdate {
                title: Some(format!("t{}", i)),
                ..Default::default()
            };
            notes.update_note(Some("c1"), &id, &update).unwrap();
        }

        assert_eq!(
            store
                .audit()
                .count(AuditCategory::UpdateTitle, Some("c1"), Some(&id))
                .unwrap(),
            1
        );
    }

    #[test]
    fn test_encryption_toggle_records_before_after() {
        let store = SqliteStore::in_memory().unwrap();
        let notes = store.notes();
        let id = notes.create_note(None, None, "t", "c").unwrap();

        let update = NoteUpdate {
            encrypted: Some(true),
            ..Default::default()
        };
        notes.update_note(Some("c1"), &id, &update).unwrap();

        let entries = store.audit().list(10).unwrap();
        let toggle = entries
            .iter()
            .find(|e| e.category == AuditCategory::ToggleEncryption)
            .unwrap();
        assert_eq!(toggle.change_from.as_deref(), Some("false"));
        assert_eq!(toggle.change_to.as_deref(), Some("true"));
        assert!(notes.get_note(&id).unwrap().unwrap().encrypted);
    }

    #[test]
    fn test_delete_is_recursive_and_soft() {
        let store = SqliteStore::in_memory().unwrap();
        let notes = store.notes();

        let root = notes.create_note(None, None, "root", "").unwrap();
        let child = notes.create_note(None, Some(&root), "child", "").unwrap();
        let grandchild = notes.create_note(None, Some(&child), "gc", "").unwrap();

        notes.delete_note(Some("c1"), &root).unwrap();

        assert!(notes.get_note(&root).unwrap().is_none());
        assert!(notes.get_note(&child).unwrap().is_none());
        assert!(notes.get_note(&grandchild).unwrap().is_none());

        // Rows still exist, soft-deleted.
        let conn = store.lock_conn().unwrap();
        let remaining: i64 = conn
            .query_row("SELECT COUNT(*) FROM notes WHERE is_deleted = 1", [], |r| {
                r.get(0)
            })
            .unwrap();
        assert_eq!(remaining, 3);
        drop(conn);

        assert_eq!(
            store
                .audit()
                .count(AuditCategory::DeleteNote, Some("c1"), Some(&grandchild))
                .unwrap(),
            1
        );
    }

    #[test]
    fn test_move_to_reparents_at_end() {
        let store = SqliteStore::in_memory().unwrap();
        let notes = store.notes();

        let a = notes.create_note(None, None, "a", "").unwrap();
        let b = notes.create_note(None, None, "b", "").unwrap();
        let c = notes.create_note(None, Some(&a), "c", "").unwrap();

        notes.move_to(Some("c1"), &b, Some(&a)).unwrap();

        let children = notes.list_children(Some(&a)).unwrap();
        assert_eq!(
            children.iter().map(|n| n.note_id.as_str()).collect::<Vec<_>>(),
            vec![c.as_str(), b.as_str()]
        );

        let entries = store.audit().list(10).unwrap();
        let moved = entries
            .iter()
            .find(|e| e.category == AuditCategory::ChangeParent)
            .unwrap();
        assert_eq!(moved.entity_id.as_deref(), Some(b.as_str()));
        assert_eq!(moved.change_to.as_deref(), Some(a.as_str()));
    }

    #[test]
    fn test_move_into_own_subtree_rejected() {
        let store = SqliteStore::in_memory().unwrap();
        let notes = store.notes();

        let a = notes.create_note(None, None, "a", "").unwrap();
        let b = notes.create_note(None, Some(&a), "b", "").unwrap();
        let c = notes.create_note(None, Some(&b), "c", "").unwrap();

        // Under itself, under a child, under a grandchild: all would create
        // a parent cycle and orphan the subtree from the root set.
        for target in [a.as_str(), b.as_str(), c.as_str()] {
            let result = notes.move_to(None, &a, Some(target));
            assert!(matches!(result, Err(ArborError::InvalidInput(_))));
        }

        // The tree is intact and still reachable from the root.
        let roots = notes.list_children(None).unwrap();
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].note_id, a);
        assert_eq!(notes.get_note(&a).unwrap().unwrap().parent_id, None);
        assert!(store.audit().list(10).unwrap().is_empty());
    }

    #[test]
    fn test_reposition_next_to_own_descendant_rejected() {
        let store = SqliteStore::in_memory().unwrap();
        let notes = store.notes();

        let a = notes.create_note(None, None, "a", "").unwrap();
        let b = notes.create_note(None, Some(&a), "b", "").unwrap();
        let c = notes.create_note(None, Some(&b), "c", "").unwrap();

        // Placing `a` beside one of its descendants re-parents it into its
        // own subtree; both directions must refuse.
        assert!(matches!(
            notes.move_before(None, &a, &b),
            Err(ArborError::InvalidInput(_))
        ));
        assert!(matches!(
            notes.move_after(None, &a, &c),
            Err(ArborError::InvalidInput(_))
        ));

        assert_eq!(notes.list_children(None).unwrap().len(), 1);
        assert_eq!(notes.list_children(Some(&a)).unwrap().len(), 1);
    }

    #[test]
    fn test_move_before_and_after_shift_siblings() {
        let store = SqliteStore::in_memory().unwrap();
        let notes = store.notes();

        let a = notes.create_note(None, None, "a", "").unwrap();
        let b = notes.create_note(None, None, "b", "").unwrap();
        let c = notes.create_note(None, None, "c", "").unwrap();

        notes.move_before(None, &c, &a).unwrap();
        let order = |notes: &NoteTree<'_>| {
            notes
                .list_children(None)
                .unwrap()
                .iter()
                .map(|n| n.title.clone())
                .collect::<Vec<_>>()
        };
        assert_eq!(order(&notes), vec!["c", "a", "b"]);

        notes.move_after(None, &c, &b).unwrap();
        assert_eq!(order(&notes), vec!["a", "b", "c"]);

        assert_eq!(
            store
                .audit()
                .count(AuditCategory::ChangePosition, None, None)
                .unwrap(),
            2
        );
    }
}
