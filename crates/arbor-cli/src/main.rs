//! Arbor CLI - a tree-structured personal note service with
//! password-derived envelope encryption.
//!
//! This binary is the reference caller of the core contracts: setup, login
//! verification, password change, note mutations, and audit inspection. A
//! deployment would put an HTTP layer in front of the same calls.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use dialoguer::Password;

use arbor_core::{NoteUpdate, SqliteStore, VERSION};

/// Arbor - personal notes in a tree, with envelope-encrypted credentials
#[derive(Parser)]
#[command(name = "arbor")]
#[command(author, version = VERSION, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to the Arbor database
    #[arg(short, long, global = true, env = "ARBOR_DB", default_value = "arbor.db")]
    db: PathBuf,

    /// Client identifier recorded in audit entries
    #[arg(long, global = true, env = "ARBOR_ACTOR")]
    actor: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// First-run setup: create the credential record
    Init {
        /// Username for the installation
        #[arg(value_name = "USERNAME")]
        username: String,
    },

    /// Check a username/password pair
    Login {
        #[arg(value_name = "USERNAME")]
        username: String,
    },

    /// Change the password (rotates the data key wrapping only)
    Passwd {
        /// Output the outcome as JSON
        #[arg(long)]
        json: bool,
    },

    /// Note operations
    #[command(subcommand)]
    Note(NoteCommands),

    /// List audit log entries, newest first
    Audit {
        #[arg(long, default_value_t = 50)]
        limit: usize,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Read or write a named setting
    #[command(subcommand)]
    Settings(SettingsCommands),
}

#[derive(Subcommand)]
enum NoteCommands {
    /// Create a note
    Add {
        #[arg(long)]
        parent: Option<String>,

        #[arg(long)]
        title: String,

        #[arg(long, default_value = "")]
        content: String,
    },

    /// Update a note's fields
    Edit {
        #[arg(value_name = "NOTE_ID")]
        id: String,

        #[arg(long)]
        title: Option<String>,

        #[arg(long)]
        content: Option<String>,

        /// Set the client-side encryption flag
        #[arg(long)]
        encrypted: Option<bool>,
    },

    /// Delete a note and its subtree
    Rm {
        #[arg(value_name = "NOTE_ID")]
        id: String,
    },

    /// Move a note under a new parent (or to the root)
    Mv {
        #[arg(value_name = "NOTE_ID")]
        id: String,

        #[arg(long)]
        parent: Option<String>,
    },

    /// Place a note directly before a sibling
    Before {
        #[arg(value_name = "NOTE_ID")]
        id: String,

        #[arg(value_name = "SIBLING_ID")]
        sibling: String,
    },

    /// Place a note directly after a sibling
    After {
        #[arg(value_name = "NOTE_ID")]
        id: String,

        #[arg(value_name = "SIBLING_ID")]
        sibling: String,
    },

    /// List children of a parent (or the roots)
    Ls {
        #[arg(long)]
        parent: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show a single note
    Show {
        #[arg(value_name = "NOTE_ID")]
        id: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum SettingsCommands {
    Get {
        #[arg(value_name = "NAME")]
        name: String,
    },
    Set {
        #[arg(value_name = "NAME")]
        name: String,

        #[arg(value_name = "VALUE")]
        value: String,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    match run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    let store = SqliteStore::open(&cli.db)
        .with_context(|| format!("Failed to open database at {}", cli.db.display()))?;
    let actor = cli.actor.as_deref();

    match cli.command {
        Commands::Init { username } => {
            if store.credentials().is_initialized()? {
                bail!("This database is already initialized");
            }
            let password = Password::new()
                .with_prompt("Choose a password")
                .with_confirmation("Confirm password", "Passwords do not match")
                .interact()?;
            store.credentials().setup(&username, &password)?;
            println!("Initialized Arbor database for '{}'", username);
            Ok(ExitCode::SUCCESS)
        }

        Commands::Login { username } => {
            let password = Password::new().with_prompt("Password").interact()?;
            if store.credentials().verify_login(&username, &password)? {
                println!("Login OK");
                Ok(ExitCode::SUCCESS)
            } else {
                // Deliberately the same message for unknown user and wrong
                // password.
                println!("Login failed");
                Ok(ExitCode::FAILURE)
            }
        }

        Commands::Passwd { json } => {
            let current = Password::new().with_prompt("Current password").interact()?;
            let new = Password::new()
                .with_prompt("New password")
                .with_confirmation("Confirm new password", "Passwords do not match")
                .interact()?;

            let outcome = store.credentials().change_password(actor, &current, &new)?;
            if json {
                println!("{}", serde_json::to_string(&outcome)?);
            } else if outcome.success {
                println!("Password changed");
            } else {
                println!(
                    "Password change failed: {}",
                    outcome.message.as_deref().unwrap_or("unknown reason")
                );
            }
            Ok(if outcome.success {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }

        Commands::Note(command) => run_note_command(&store, actor, command),

        Commands::Audit { limit, json } => {
            let entries = store.audit().list(limit)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else {
                for entry in entries {
                    println!(
                        "{}  {:<18} actor={} entity={}{}",
                        entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                        entry.category.code(),
                        entry.actor_id.as_deref().unwrap_or("-"),
                        entry.entity_id.as_deref().unwrap_or("-"),
                        match (&entry.change_from, &entry.change_to) {
                            (None, None) => String::new(),
                            (from, to) => format!(
                                " {} -> {}",
                                from.as_deref().unwrap_or("-"),
                                to.as_deref().unwrap_or("-")
                            ),
                        }
                    );
                }
            }
            Ok(ExitCode::SUCCESS)
        }

        Commands::Settings(SettingsCommands::Get { name }) => {
            match store.get_setting(&name)? {
                Some(value) => println!("{}", value),
                None => bail!("Setting '{}' is not set", name),
            }
            Ok(ExitCode::SUCCESS)
        }

        Commands::Settings(SettingsCommands::Set { name, value }) => {
            store.set_setting(actor, &name, &value)?;
            println!("Set {} = {}", name, value);
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn run_note_command(
    store: &SqliteStore,
    actor: Option<&str>,
    command: NoteCommands,
) -> anyhow::Result<ExitCode> {
    let notes = store.notes();

    match command {
        NoteCommands::Add {
            parent,
            title,
            content,
        } => {
            let id = notes.create_note(actor, parent.as_deref(), &title, &content)?;
            println!("{}", id);
        }

        NoteCommands::Edit {
            id,
            title,
            content,
            encrypted,
        } => {
            if title.is_none() && content.is_none() && encrypted.is_none() {
                bail!("Nothing to update; pass --title, --content, or --encrypted");
            }
            let update = NoteUpdate {
                title,
                content,
                encrypted,
            };
            notes.update_note(actor, &id, &update)?;
        }

        NoteCommands::Rm { id } => {
            notes.delete_note(actor, &id)?;
        }

        NoteCommands::Mv { id, parent } => {
            notes.move_to(actor, &id, parent.as_deref())?;
        }

        NoteCommands::Before { id, sibling } => {
            notes.move_before(actor, &id, &sibling)?;
        }

        NoteCommands::After { id, sibling } => {
            notes.move_after(actor, &id, &sibling)?;
        }

        NoteCommands::Ls { parent, json } => {
            let children = notes.list_children(parent.as_deref())?;
            if json {
                println!("{}", serde_json::to_string_pretty(&children)?);
            } else {
                for note in children {
                    println!(
                        "{}  [{}] {}{}",
                        note.note_id,
                        note.position,
                        note.title,
                        if note.encrypted { " (encrypted)" } else { "" }
                    );
                }
            }
        }

        NoteCommands::Show { id, json } => match notes.get_note(&id)? {
            Some(note) => {
                if json {
                    println!("{}", serde_json::to_string_pretty(&note)?);
                } else {
                    println!("{}", note.title);
                    if !note.content.is_empty() {
                        println!("\n{}", note.content);
                    }
                }
            }
            None => bail!("Note not found: {}", id),
        },
    }

    Ok(ExitCode::SUCCESS)
}
