//! File metadata table.

use rusqlite::{params, OptionalExtension};

use crate::{Database, FileMetadata, StorageResult};

impl Database {
    /// Inserts or updates the metadata row for a path.
    ///
    /// The stored `version` column is managed by a trigger that bumps it
    /// whenever the hash changes; the caller-supplied version is only
    /// used for brand-new rows.
    pub fn upsert_file(&self, file: &FileMetadata) -> StorageResult<()> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(
            "INSERT INTO files (path, hash, modified_time, size, vector_clock, synced, version)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(path) DO UPDATE SET
                 hash = excluded.hash,
                 modified_time = excluded.modified_time,
                 size = excluded.size,
                 vector_clock = excluded.vector_clock,
                 synced = excluded.synced",
        )?;
        stmt.execute(params![
            file.path,
            file.content_hash,
            file.modified_time_ms as i64,
            file.size as i64,
            file.vector_clock,
            file.synced,
            i64::from(file.version.max(1)),
        ])?;
        Ok(())
    }

    /// Looks up a file by canonical path.
    pub fn file_by_path(&self, path: &str) -> StorageResult<Option<FileMetadata>> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT path, hash, modified_time, size, vector_clock, synced, version
             FROM files WHERE path = ?1",
        )?;
        Ok(stmt
            .query_row(params![path], |row| {
                Ok(FileMetadata {
                    path: row.get(0)?,
                    content_hash: row.get(1)?,
                    modified_time_ms: row.get::<_, i64>(2)? as u64,
                    size: row.get::<_, i64>(3)? as u64,
                    vector_clock: row.get(4)?,
                    synced: row.get(5)?,
                    version: row.get::<_, i64>(6)? as u32,
                })
            })
            .optional()?)
    }

    /// Marks a path's sync state.
    pub fn mark_file_synced(&self, path: &str, synced: bool) -> StorageResult<bool> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached("UPDATE files SET synced = ?2 WHERE path = ?1")?;
        Ok(stmt.execute(params![path, synced])? > 0)
    }

    /// All paths whose contents have not been acknowledged everywhere.
    pub fn unsynced_files(&self) -> StorageResult<Vec<String>> {
        let conn = self.lock();
        let mut stmt =
            conn.prepare_cached("SELECT path FROM files WHERE synced = 0 ORDER BY path")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    /// Removes the metadata row for a path. Returns `true` if it existed.
    pub fn remove_file(&self, path: &str) -> StorageResult<bool> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached("DELETE FROM files WHERE path = ?1")?;
        Ok(stmt.execute(params![path])? > 0)
    }
}
