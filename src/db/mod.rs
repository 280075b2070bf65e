pub mod models;
pub mod queries;

use rusqlite::Connection;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration failed: {0}")]
    Migration(String),
    #[error("Corrupt row in catalog_entries: {0}")]
    Row(String),
}

pub type Result<T> = std::result::Result<T, DbError>;

const SCHEMA_VERSION: i32 = 1;

/// SQLite mirror of the catalog. Rebuilt wholesale at the end of each run.
pub struct Database {
    pub conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Open an existing database without creating or migrating it.
    pub fn open_existing(path: &Path) -> Result<Self> {
        let conn = Connection::open_with_flags(path, rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE)?;
        Ok(Self { conn })
    }

    fn init(&self) -> Result<()> {
        self.conn.pragma_update(None, "journal_mode", "WAL")?;
        self.conn.pragma_update(None, "synchronous", "NORMAL")?;
        self.migrate()?;
        Ok(())
    }

    fn migrate(&self) -> Result<()> {
        let version: i32 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap_or(0);

        if version > SCHEMA_VERSION {
            return Err(DbError::Migration(format!(
                "database schema v{version} is newer than supported v{SCHEMA_VERSION}"
            )));
        }
        if version < 1 {
            self.migrate_v1()?;
        }

        self.conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        Ok(())
    }

    /// V1: catalog_entries
    fn migrate_v1(&self) -> Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS catalog_entries (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                storage_path    TEXT NOT NULL UNIQUE,
                source_path     TEXT NOT NULL,
                identity        TEXT NOT NULL,
                category        TEXT NOT NULL,
                style           TEXT NOT NULL,
                tempo           REAL NOT NULL,
                time_signature  TEXT NOT NULL,
                musical_key     TEXT NOT NULL,
                track_count     INTEGER NOT NULL,
                note_count      INTEGER NOT NULL,
                duration_secs   REAL NOT NULL,
                has_drums       INTEGER NOT NULL,
                content_hash    TEXT NOT NULL,
                integrated_at   TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_entries_identity ON catalog_entries(identity);
            CREATE INDEX IF NOT EXISTS idx_entries_category ON catalog_entries(category);
            CREATE INDEX IF NOT EXISTS idx_entries_tempo ON catalog_entries(tempo);
            ",
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrates_fresh_database() {
        let db = Database::open_in_memory().unwrap();
        let version: i32 = db
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);
        assert!(db.has_catalog_table().unwrap());
    }

    #[test]
    fn reopen_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.db");
        drop(Database::open(&path).unwrap());
        let db = Database::open(&path).unwrap();
        assert!(db.has_catalog_table().unwrap());
    }

    #[test]
    fn newer_schema_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.db");
        {
            let conn = Connection::open(&path).unwrap();
            conn.pragma_update(None, "user_version", SCHEMA_VERSION + 1).unwrap();
        }
        assert!(matches!(Database::open(&path), Err(DbError::Migration(_))));
    }

    #[test]
    fn open_existing_does_not_create() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Database::open_existing(&dir.path().join("missing.db")).is_err());
    }
}
