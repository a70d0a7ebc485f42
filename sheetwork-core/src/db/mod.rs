//! SQLite database layer for Sheetwork.
//!
//! Provides persistent storage for:
//! - Settings (update preferences, last check date)
//! - Update history (outcome of each finished update session)

mod migrations;

use rusqlite::{params, Connection};
use std::path::PathBuf;

/// Database connection wrapper.
///
/// Provides a high-level API for interacting with the SQLite database.
/// Automatically handles connection setup, migrations, and file permissions.
pub struct Database {
    conn: Connection,
}

/// How an update session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    UpToDate,
    /// Package unpacked and install script launched.
    Staged,
    Failed,
    Cancelled,
}

impl UpdateOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UpToDate => "up_to_date",
            Self::Staged => "staged",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    fn from_db(value: &str) -> Option<Self> {
        match value {
            "up_to_date" => Some(Self::UpToDate),
            "staged" => Some(Self::Staged),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

/// A row of the update history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateRecord {
    pub id: i64,
    /// Release version the session dealt with, if known.
    pub version: Option<String>,
    pub outcome: UpdateOutcome,
    /// Stage a failure is attributed to.
    pub stage: Option<String>,
    pub message: Option<String>,
    /// Unix timestamp.
    pub finished_at: i64,
}

impl Database {
    /// Open the database at the default location.
    ///
    /// Default path: `~/.local/share/sheetwork/sheetwork.db`
    pub fn open() -> anyhow::Result<Self> {
        let path = Self::default_path()?;
        Self::open_at(path)
    }

    /// Open the database at a specific path.
    ///
    /// Creates parent directories if they don't exist.
    /// Sets file permissions to 0600 on Unix.
    pub fn open_at(path: PathBuf) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(&path)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Err(e) = std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))
            {
                tracing::warn!(path = %path.display(), error = %e, "Failed to set database file permissions");
            }
        }

        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        Ok(Self { conn })
    }

    /// Get the default database path.
    ///
    /// Returns `~/.local/share/sheetwork/sheetwork.db` (or platform equivalent).
    pub fn default_path() -> anyhow::Result<PathBuf> {
        let data_dir = dirs::data_dir()
            .or_else(|| dirs::home_dir().map(|h| h.join(".local/share")))
            .ok_or_else(|| anyhow::anyhow!("Could not determine data directory"))?;

        Ok(data_dir.join("sheetwork").join("sheetwork.db"))
    }

    /// Run database migrations.
    ///
    /// Safe to call multiple times - migrations are tracked and only run once.
    pub fn migrate(&self) -> anyhow::Result<()> {
        migrations::run_migrations(&self.conn)?;
        Ok(())
    }

    // =========================================================================
    // Settings Storage
    // =========================================================================

    /// Save a setting to the database (upsert).
    pub fn set_setting(&self, key: &str, value: &str) -> Result<(), rusqlite::Error> {
        self.conn.execute(
            "INSERT INTO settings (key, value, updated_at) VALUES (?, ?, unixepoch())
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            [key, value],
        )?;
        Ok(())
    }

    /// Get a setting from the database.
    ///
    /// Returns `None` if the setting doesn't exist.
    pub fn get_setting(&self, key: &str) -> Result<Option<String>, rusqlite::Error> {
        let mut stmt = self
            .conn
            .prepare("SELECT value FROM settings WHERE key = ?")?;
        let result = stmt.query_row([key], |row| row.get(0));
        match result {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Delete a setting from the database.
    pub fn delete_setting(&self, key: &str) -> Result<(), rusqlite::Error> {
        self.conn
            .execute("DELETE FROM settings WHERE key = ?", [key])?;
        Ok(())
    }

    // =========================================================================
    // Update History
    // =========================================================================

    /// Append the outcome of a finished update session. Returns the row id.
    pub fn record_update_outcome(
        &self,
        version: Option<&str>,
        outcome: UpdateOutcome,
        stage: Option<&str>,
        message: Option<&str>,
    ) -> Result<i64, rusqlite::Error> {
        self.conn.execute(
            "INSERT INTO update_history (version, outcome, stage, message, finished_at)
             VALUES (?, ?, ?, ?, unixepoch())",
            params![version, outcome.as_str(), stage, message],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Most recent update sessions, newest first.
    pub fn recent_update_outcomes(&self, limit: usize) -> Result<Vec<UpdateRecord>, rusqlite::Error> {
        let mut stmt = self.conn.prepare(
            "SELECT id, version, outcome, stage, message, finished_at
             FROM update_history ORDER BY finished_at DESC, id DESC LIMIT ?",
        )?;
        let rows = stmt.query_map([limit as i64], |row| {
            let outcome: String = row.get(2)?;
            let outcome = UpdateOutcome::from_db(&outcome).ok_or_else(|| {
                rusqlite::Error::FromSqlConversionFailure(
                    2,
                    rusqlite::types::Type::Text,
                    format!("unknown update outcome: {}", outcome).into(),
                )
            })?;
            Ok(UpdateRecord {
                id: row.get(0)?,
                version: row.get(1)?,
                outcome,
                stage: row.get(3)?,
                message: row.get(4)?,
                finished_at: row.get(5)?,
            })
        })?;
        rows.collect()
    }
}

// =============================================================================
// Tests
// =============================================================================
