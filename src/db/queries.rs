use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

use super::models::{CatalogEntry, SuggestQuery};
use super::{Database, DbError, Result};
use crate::scanner::identity::PatternIdentity;

const ENTRY_COLUMNS: &str = "identity, category, style, tempo, time_signature, musical_key,
    track_count, note_count, duration_secs, has_drums, content_hash,
    source_path, storage_path, integrated_at";

fn row_to_entry(row: &Row<'_>) -> rusqlite::Result<std::result::Result<CatalogEntry, DbError>> {
    let category: String = row.get(1)?;
    let style: String = row.get(2)?;
    let integrated_at: String = row.get(13)?;
    let track_count: i64 = row.get(6)?;
    let note_count: i64 = row.get(7)?;

    let decoded = (|| -> std::result::Result<CatalogEntry, DbError> {
        Ok(CatalogEntry {
            identity: PatternIdentity::from_stored(row.get::<_, String>(0)?),
            category: category.parse().map_err(|e| DbError::Row(format!("{e}")))?,
            style: style.parse().map_err(|e| DbError::Row(format!("{e}")))?,
            tempo: row.get(3)?,
            time_signature: row.get(4)?,
            key: row.get(5)?,
            track_count: usize::try_from(track_count).unwrap_or(0),
            note_count: usize::try_from(note_count).unwrap_or(0),
            duration_secs: row.get(8)?,
            has_drums: row.get(9)?,
            content_hash: row.get(10)?,
            source_path: PathBuf::from(row.get::<_, String>(11)?),
            storage_path: PathBuf::from(row.get::<_, String>(12)?),
            integrated_at: DateTime::parse_from_rfc3339(&integrated_at)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| DbError::Row(format!("integrated_at '{integrated_at}': {e}")))?,
        })
    })();
    Ok(decoded)
}

fn path_text(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

impl Database {
    /// Replace every catalog row with `entries`, in one transaction.
    pub fn replace_catalog<'a>(
        &self,
        entries: impl IntoIterator<Item = &'a CatalogEntry>,
    ) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute("DELETE FROM catalog_entries", [])?;

        let mut count = 0;
        {
            let mut stmt = tx.prepare(&format!(
                "INSERT INTO catalog_entries ({ENTRY_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)"
            ))?;
            for e in entries {
                stmt.execute(params![
                    e.identity.as_str(),
                    e.category.as_str(),
                    e.style.as_str(),
                    e.tempo,
                    e.time_signature,
                    e.key,
                    e.track_count as i64,
                    e.note_count as i64,
                    e.duration_secs,
                    e.has_drums,
                    e.content_hash,
                    path_text(&e.source_path),
                    path_text(&e.storage_path),
                    e.integrated_at.to_rfc3339(),
                ])?;
                count += 1;
            }
        }

        tx.commit()?;
        Ok(count)
    }

    /// All entries ordered by storage path.
    pub fn load_catalog(&self) -> Result<Vec<CatalogEntry>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ENTRY_COLUMNS} FROM catalog_entries ORDER BY storage_path"
        ))?;
        let rows = stmt.query_map([], row_to_entry)?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row??);
        }
        Ok(entries)
    }

    /// Entries matching the query, ordered by tempo then path.
    pub fn suggest(&self, query: &SuggestQuery) -> Result<Vec<CatalogEntry>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ENTRY_COLUMNS} FROM catalog_entries
             WHERE (?1 IS NULL OR category = ?1)
               AND (?2 IS NULL OR style = ?2)
               AND (?3 IS NULL OR tempo >= ?3)
               AND (?4 IS NULL OR tempo <= ?4)
             ORDER BY tempo, storage_path
             LIMIT ?5"
        ))?;
        let limit = query.limit.map_or(-1, |n| n as i64);
        let rows = stmt.query_map(
            params![
                query.category.map(|c| c.as_str()),
                query.style.map(|s| s.as_str()),
                query.tempo_min,
                query.tempo_max,
                limit,
            ],
            row_to_entry,
        )?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row??);
        }
        Ok(entries)
    }

    pub fn identities(&self) -> Result<BTreeSet<PatternIdentity>> {
        let mut stmt = self.conn.prepare("SELECT DISTINCT identity FROM catalog_entries")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids.into_iter().map(PatternIdentity::from_stored).collect())
    }

    /// Point an entry at its renamed file. Returns false if no row matched.
    pub fn update_storage_path(&self, old: &Path, new: &Path) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE catalog_entries SET storage_path = ?2 WHERE storage_path = ?1",
            params![path_text(old), path_text(new)],
        )?;
        Ok(changed > 0)
    }

    pub fn remove_storage_path(&self, path: &Path) -> Result<bool> {
        let changed = self.conn.execute(
            "DELETE FROM catalog_entries WHERE storage_path = ?1",
            params![path_text(path)],
        )?;
        Ok(changed > 0)
    }

    pub fn has_catalog_table(&self) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'catalog_entries'",
            [],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn entry_count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM catalog_entries", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }
}
