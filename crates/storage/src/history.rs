//! Per-file content history and ancestry.
//!
//! Every accepted content change appends a row linking the new hash to
//! the hash it was derived from. Conflict detection walks these links to
//! find the closest ancestor two divergent hashes share.

use std::collections::HashSet;

use rusqlite::{params, OptionalExtension, Row};

use crate::{Database, FileVersionRow, StorageResult};

/// Upper bound on ancestry walks; history chains are short in practice
/// and the cap keeps malformed (cyclic) data from looping forever.
const MAX_ANCESTRY_DEPTH: usize = 256;

fn version_from_row(row: &Row<'_>) -> rusqlite::Result<FileVersionRow> {
    Ok(FileVersionRow {
        id: row.get(0)?,
        file_path: row.get(1)?,
        hash: row.get(2)?,
        parent_hash: row.get(3)?,
        peer_id: row.get(4)?,
        timestamp_ms: row.get::<_, i64>(5)? as u64,
        change_type: row.get(6)?,
    })
}

impl Database {
    /// Appends a content-history row.
    pub fn record_file_version(
        &self,
        file_path: &str,
        hash: &str,
        parent_hash: &str,
        peer_id: &str,
        timestamp_ms: u64,
        change_type: &str,
    ) -> StorageResult<i64> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(
            "INSERT INTO file_versions (file_path, hash, parent_hash, peer_id, timestamp, change_type)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )?;
        stmt.execute(params![
            file_path,
            hash,
            parent_hash,
            peer_id,
            timestamp_ms as i64,
            change_type,
        ])?;
        Ok(conn.last_insert_rowid())
    }

    /// History of a path, newest first.
    pub fn file_history(&self, file_path: &str) -> StorageResult<Vec<FileVersionRow>> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT id, file_path, hash, parent_hash, peer_id, timestamp, change_type
             FROM file_versions WHERE file_path = ?1 ORDER BY timestamp DESC, id DESC",
        )?;
        let rows = stmt.query_map(params![file_path], version_from_row)?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    /// Parent hash of a recorded content hash, if any.
    fn parent_of(&self, hash: &str) -> StorageResult<Option<String>> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT parent_hash FROM file_versions
             WHERE hash = ?1 AND parent_hash <> ''
             ORDER BY timestamp DESC, id DESC LIMIT 1",
        )?;
        Ok(stmt
            .query_row(params![hash], |row| row.get(0))
            .optional()?)
    }

    /// Finds the closest common ancestor of two content hashes by
    /// walking parent links from both sides.
    ///
    /// The local chain is collected first; the remote chain is then
    /// walked until it hits a hash the local side has seen. Returns
    /// `None` when the histories never meet.
    pub fn find_common_ancestor(
        &self,
        local_hash: &str,
        remote_hash: &str,
    ) -> StorageResult<Option<String>> {
        if local_hash == remote_hash {
            return Ok(Some(local_hash.to_owned()));
        }

        let mut local_chain = HashSet::new();
        let mut cursor = Some(local_hash.to_owned());
        let mut depth = 0;
        while let Some(hash) = cursor {
            if !local_chain.insert(hash.clone()) || depth >= MAX_ANCESTRY_DEPTH {
                break;
            }
            depth += 1;
            cursor = self.parent_of(&hash)?;
        }

        let mut cursor = Some(remote_hash.to_owned());
        let mut seen = HashSet::new();
        let mut depth = 0;
        while let Some(hash) = cursor {
            if local_chain.contains(&hash) {
                return Ok(Some(hash));
            }
            if !seen.insert(hash.clone()) || depth >= MAX_ANCESTRY_DEPTH {
                break;
            }
            depth += 1;
            cursor = self.parent_of(&hash)?;
        }
        Ok(None)
    }
}
