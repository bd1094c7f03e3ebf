//! Conflict records.

use rusqlite::{params, OptionalExtension, Row};

use crate::{ConflictRecord, ConflictStatus, ConflictType, Database, StorageResult};

const CONFLICT_COLUMNS: &str = "id, file_path, local_hash, remote_hash, base_hash, \
     local_version, remote_version, base_version, conflict_type, status, \
     local_device, remote_device, local_mtime, remote_mtime";

fn conflict_from_row(row: &Row<'_>) -> rusqlite::Result<(ConflictRecord, i64, i64)> {
    let type_raw: i64 = row.get(8)?;
    let status_raw: i64 = row.get(9)?;
    Ok((
        ConflictRecord {
            id: row.get(0)?,
            file_path: row.get(1)?,
            local_hash: row.get(2)?,
            remote_hash: row.get(3)?,
            base_hash: row.get(4)?,
            local_version: row.get::<_, i64>(5)? as u64,
            remote_version: row.get::<_, i64>(6)? as u64,
            base_version: row.get::<_, i64>(7)? as u64,
            conflict_type: ConflictType::Content,
            status: ConflictStatus::Pending,
            local_device: row.get(10)?,
            remote_device: row.get(11)?,
            local_mtime_ms: row.get::<_, i64>(12)? as u64,
            remote_mtime_ms: row.get::<_, i64>(13)? as u64,
        },
        type_raw,
        status_raw,
    ))
}

fn finish(parts: (ConflictRecord, i64, i64)) -> StorageResult<ConflictRecord> {
    let (mut record, type_raw, status_raw) = parts;
    record.conflict_type = ConflictType::from_db(type_raw)?;
    record.status = ConflictStatus::from_db(status_raw)?;
    Ok(record)
}

impl Database {
    /// Persists a new conflict record.
    pub fn insert_conflict(&self, conflict: &ConflictRecord) -> StorageResult<()> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(
            "INSERT INTO conflicts (id, file_path, local_hash, remote_hash, base_hash,
                 local_version, remote_version, base_version, conflict_type, status,
                 local_device, remote_device, local_mtime, remote_mtime)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        )?;
        stmt.execute(params![
            conflict.id,
            conflict.file_path,
            conflict.local_hash,
            conflict.remote_hash,
            conflict.base_hash,
            conflict.local_version as i64,
            conflict.remote_version as i64,
            conflict.base_version as i64,
            conflict.conflict_type.to_db(),
            conflict.status.to_db(),
            conflict.local_device,
            conflict.remote_device,
            conflict.local_mtime_ms as i64,
            conflict.remote_mtime_ms as i64,
        ])?;
        Ok(())
    }

    /// Looks up a conflict by id.
    pub fn conflict_by_id(&self, id: &str) -> StorageResult<Option<ConflictRecord>> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {CONFLICT_COLUMNS} FROM conflicts WHERE id = ?1"
        ))?;
        stmt.query_row(params![id], conflict_from_row)
            .optional()?
            .map(finish)
            .transpose()
    }

    /// All conflicts awaiting resolution.
    pub fn pending_conflicts(&self) -> StorageResult<Vec<ConflictRecord>> {
        self.conflicts_with_status(ConflictStatus::Pending)
    }

    /// All conflicts in a given state.
    pub fn conflicts_with_status(
        &self,
        status: ConflictStatus,
    ) -> StorageResult<Vec<ConflictRecord>> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {CONFLICT_COLUMNS} FROM conflicts WHERE status = ?1 ORDER BY created_at"
        ))?;
        let rows = stmt.query_map(params![status.to_db()], conflict_from_row)?;
        rows.map(|parts| finish(parts?)).collect()
    }

    /// Transitions a conflict's lifecycle state.
    pub fn update_conflict_status(&self, id: &str, status: ConflictStatus) -> StorageResult<bool> {
        let conn = self.lock();
        let mut stmt =
            conn.prepare_cached("UPDATE conflicts SET status = ?2 WHERE id = ?1")?;
        Ok(stmt.execute(params![id, status.to_db()])? > 0)
    }
}
