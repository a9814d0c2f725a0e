//! Party Directory
//!
//! SQLite table of callable parties and their display names.

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Result as SqliteResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::session::PartyId;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug)]
pub enum RosterError {
    #[error("Roster database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Failed to create roster directory: {0}")]
    DirectoryCreation(#[from] std::io::Error),

    #[error("Party not found: {0}")]
    PartyNotFound(String),

    #[error("Party id must not be empty")]
    EmptyId,

    #[error("Invalid join link origin '{origin}': {reason}")]
    InvalidOrigin { origin: String, reason: String },
}

// ============================================================================
// PARTY
// ============================================================================

/// A callable party as listed on the dashboard
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Party {
    pub id: PartyId,
    pub display_name: String,
    pub created_at: String,
    pub updated_at: String,
}

// ============================================================================
// DIRECTORY
// ============================================================================

pub struct PartyDirectory {
    conn: Mutex<Connection>,
}

impl PartyDirectory {
    /// Opens or creates the directory in the platform data dir
    pub fn open() -> Result<Self, RosterError> {
        Self::open_at(Self::default_path()?)
    }

    pub fn open_at(path: impl AsRef<Path>) -> Result<Self, RosterError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        tracing::info!("Opening party directory at {:?}", path);
        Self::with_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, RosterError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, RosterError> {
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS parties (
                id TEXT PRIMARY KEY,
                display_name TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
            "#,
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_parties_display_name ON parties(display_name)",
            [],
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn default_path() -> Result<PathBuf, RosterError> {
        let proj_dirs =
            directories::ProjectDirs::from("com", "teleconsult", "teleconsult").ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "Could not determine app data directory",
                )
            })?;

        let mut path = proj_dirs.data_dir().to_path_buf();
        path.push("roster.db");
        Ok(path)
    }

    fn row_to_party(row: &rusqlite::Row<'_>) -> SqliteResult<Party> {
        Ok(Party {
            id: row.get(0)?,
            display_name: row.get(1)?,
            created_at: row.get(2)?,
            updated_at: row.get(3)?,
        })
    }

    /// Adds a party, or renames it if the id exists
    pub fn add_party(&self, id: &str, display_name: &str) -> Result<Party, RosterError> {
        let id = id.trim();
        if id.is_empty() {
            return Err(RosterError::EmptyId);
        }
        let conn = self.conn.lock();
        conn.execute(
            r#"
            INSERT INTO parties (id, display_name) VALUES (?1, ?2)
            ON CONFLICT(id) DO UPDATE SET
                display_name = excluded.display_name,
                updated_at = datetime('now')
            "#,
            params![id, display_name],
        )?;
        tracing::debug!("Stored party {} ({})", id, display_name);

        conn.query_row(
            "SELECT id, display_name, created_at, updated_at FROM parties WHERE id = ?1",
            params![id],
            Self::row_to_party,
        )
        .map_err(RosterError::from)
    }

    pub fn get_party(&self, id: &str) -> Result<Party, RosterError> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, display_name, created_at, updated_at FROM parties WHERE id = ?1",
            params![id],
            Self::row_to_party,
        )
        .optional()?
        .ok_or_else(|| RosterError::PartyNotFound(id.to_string()))
    }

    /// Returns `false` if no such party existed
    pub fn remove_party(&self, id: &str) -> Result<bool, RosterError> {
        let conn = self.conn.lock();
        let removed = conn.execute("DELETE FROM parties WHERE id = ?1", params![id])?;
        Ok(removed > 0)
    }

    /// All parties, ordered by display name
    pub fn list_parties(&self) -> Result<Vec<Party>, RosterError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            r#"
            SELECT id, display_name, created_at, updated_at
            FROM parties
            ORDER BY display_name COLLATE NOCASE ASC, id ASC
            "#,
        )?;
        let parties = stmt
            .query_map([], Self::row_to_party)?
            .collect::<SqliteResult<Vec<Party>>>()?;
        Ok(parties)
    }

    /// Display name for `id`, or the id itself when unknown
    pub fn resolve_name(&self, id: &str) -> String {
        match self.get_party(id) {
            Ok(party) => party.display_name,
            Err(RosterError::PartyNotFound(_)) => id.to_string(),
            Err(e) => {
                tracing::warn!("Name lookup for {} failed: {}", id, e);
                id.to_string()
            }
        }
    }
}

impl std::fmt::Debug for PartyDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartyDirectory").finish_non_exhaustive()
    }
}

// ============================================================================
// TESTS
// ============================================================================
