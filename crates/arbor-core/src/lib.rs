//! # Arbor Core
//!
//! Core library for Arbor — a personal note-taking service storing notes in
//! a tree, with password-derived envelope encryption for the data key that
//! protects client-side note content.
//!
//! ## Architecture
//!
//! - **crypto**: scrypt key derivation and the data key envelope
//! - **credentials**: setup, login verification, atomic password change
//! - **audit**: append-only audit log with a de-duplication window
//! - **notes**: note tree CRUD, moves, repositioning
//! - **store**: SQLite store handle, option table, credential record
//!
//! The store handle is explicit everywhere; tests run against
//! [`store::SqliteStore::in_memory`].

pub mod audit;
pub mod credentials;
pub mod crypto;
pub mod error;
pub mod notes;
pub mod store;

pub use audit::{AuditCategory, AuditEntry, AuditLog};
pub use credentials::{ChangePasswordOutcome, CredentialLifecycle};
pub use error::{ArborError, Result};
pub use notes::{Note, NoteTree, NoteUpdate};
pub use store::SqliteStore;

/// Core version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
