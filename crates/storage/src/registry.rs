//! Watched-folder registry and ignore patterns.

use rusqlite::params;

use crate::{Database, StorageResult};

impl Database {
    /// Registers a folder for watching. Idempotent.
    pub fn add_watched_folder(&self, path: &str) -> StorageResult<()> {
        let conn = self.lock();
        let mut stmt =
            conn.prepare_cached("INSERT OR IGNORE INTO watched_folders (path) VALUES (?1)")?;
        stmt.execute(params![path])?;
        Ok(())
    }

    /// All registered folders.
    pub fn watched_folders(&self) -> StorageResult<Vec<String>> {
        let conn = self.lock();
        let mut stmt =
            conn.prepare_cached("SELECT path FROM watched_folders ORDER BY added_at, id")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    /// Unregisters a folder. Returns `true` if it was registered.
    pub fn remove_watched_folder(&self, path: &str) -> StorageResult<bool> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached("DELETE FROM watched_folders WHERE path = ?1")?;
        Ok(stmt.execute(params![path])? > 0)
    }

    /// Adds an ignore glob. Idempotent.
    pub fn add_ignore_pattern(&self, pattern: &str) -> StorageResult<()> {
        let conn = self.lock();
        let mut stmt =
            conn.prepare_cached("INSERT OR IGNORE INTO ignore_patterns (pattern) VALUES (?1)")?;
        stmt.execute(params![pattern])?;
        Ok(())
    }

    /// All ignore globs.
    pub fn ignore_patterns(&self) -> StorageResult<Vec<String>> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached("SELECT pattern FROM ignore_patterns ORDER BY id")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    /// Removes an ignore glob. Returns `true` if it existed.
    pub fn remove_ignore_pattern(&self, pattern: &str) -> StorageResult<bool> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached("DELETE FROM ignore_patterns WHERE pattern = ?1")?;
        Ok(stmt.execute(params![pattern])? > 0)
    }
}
