//! Preference Store
//!
//! SQLite key/value table holding the two call preferences.

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

const KEY_MUTED: &str = "muted";
const KEY_CAMERA_DISABLED: &str = "camera_disabled";

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug)]
pub enum PreferenceError {
    #[error("Preference database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Failed to create preference directory: {0}")]
    DirectoryCreation(#[from] std::io::Error),
}

// ============================================================================
// PREFERENCES
// ============================================================================

/// Process-wide mute/camera preference
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preferences {
    pub muted: bool,
    pub camera_disabled: bool,
}

/// Somewhere the preferences survive a restart
pub trait PreferenceStore: Send + Sync {
    fn load(&self) -> Result<Preferences, PreferenceError>;

    fn save(&self, preferences: &Preferences) -> Result<(), PreferenceError>;
}

// ============================================================================
// SQLITE STORE
// ============================================================================

pub struct SqlitePreferenceStore {
    conn: Mutex<Connection>,
}

impl SqlitePreferenceStore {
    /// Opens or creates the store in the platform data directory
    pub fn open() -> Result<Self, PreferenceError> {
        Self::open_at(Self::default_path()?)
    }

    pub fn open_at(path: impl AsRef<Path>) -> Result<Self, PreferenceError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        tracing::info!("Opening preference store at {:?}", path);
        Self::with_connection(Connection::open(path)?)
    }

    /// Store that lives only as long as the process
    pub fn open_in_memory() -> Result<Self, PreferenceError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, PreferenceError> {
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS preferences (
                key TEXT PRIMARY KEY,
                value INTEGER NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
            "#,
            [],
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn default_path() -> Result<PathBuf, PreferenceError> {
        let proj_dirs =
            directories::ProjectDirs::from("com", "teleconsult", "teleconsult").ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "Could not determine app data directory",
                )
            })?;

        let mut path = proj_dirs.data_dir().to_path_buf();
        path.push("preferences.db");
        Ok(path)
    }

    fn read_flag(conn: &Connection, key: &str) -> Result<bool, PreferenceError> {
        let value: Option<i64> = conn
            .query_row(
                "SELECT value FROM preferences WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value.unwrap_or(0) != 0)
    }

    fn write_flag(conn: &Connection, key: &str, value: bool) -> Result<(), PreferenceError> {
        conn.execute(
            r#"
            INSERT INTO preferences (key, value) VALUES (?1, ?2)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = datetime('now')
            "#,
            params![key, value as i32],
        )?;
        Ok(())
    }
}

impl PreferenceStore for SqlitePreferenceStore {
    fn load(&self) -> Result<Preferences, PreferenceError> {
        let conn = self.conn.lock();
        Ok(Preferences {
            muted: Self::read_flag(&conn, KEY_MUTED)?,
            camera_disabled: Self::read_flag(&conn, KEY_CAMERA_DISABLED)?,
        })
    }

    fn save(&self, preferences: &Preferences) -> Result<(), PreferenceError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        Self::write_flag(&tx, KEY_MUTED, preferences.muted)?;
        Self::write_flag(&tx, KEY_CAMERA_DISABLED, preferences.camera_disabled)?;
        tx.commit()?;
        tracing::debug!("Saved preferences: {:?}", preferences);
        Ok(())
    }
}

impl std::fmt::Debug for SqlitePreferenceStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlitePreferenceStore").finish_non_exhaustive()
    }
}

// ============================================================================
// MEMORY STORE
// ============================================================================

/// Non-persistent store (kiosk sessions, tests)
#[derive(Debug, Default)]
pub struct MemoryPreferenceStore {
    current: Mutex<Preferences>,
}

impl MemoryPreferenceStore {
    pub fn new(initial: Preferences) -> Self {
        Self {
            current: Mutex::new(initial),
        }
    }
}

impl PreferenceStore for MemoryPreferenceStore {
    fn load(&self) -> Result<Preferences, PreferenceError> {
        Ok(*self.current.lock())
    }

    fn save(&self, preferences: &Preferences) -> Result<(), PreferenceError> {
        *self.current.lock() = *preferences;
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================
