//! Offline sync queue and access log.
//!
//! Changes that cannot be delivered immediately (peers offline, sync
//! paused) queue here and drain when connectivity returns.

use rusqlite::{params, OptionalExtension, Row};

use crate::{Database, StorageResult, SyncOperation, SyncQueueItem, SyncQueueStatus};

fn item_from_row(row: &Row<'_>) -> rusqlite::Result<(SyncQueueItem, i64, i64)> {
    let op_raw: i64 = row.get(2)?;
    let status_raw: i64 = row.get(6)?;
    Ok((
        SyncQueueItem {
            id: row.get(0)?,
            file_path: row.get(1)?,
            operation: SyncOperation::Modify,
            peer_id: row.get(3)?,
            enqueued_at_ms: row.get::<_, i64>(4)? as u64,
            attempts: row.get::<_, i64>(5)? as u32,
            status: SyncQueueStatus::Pending,
        },
        op_raw,
        status_raw,
    ))
}

fn finish(parts: (SyncQueueItem, i64, i64)) -> StorageResult<SyncQueueItem> {
    let (mut item, op_raw, status_raw) = parts;
    item.operation = SyncOperation::from_db(op_raw)?;
    item.status = SyncQueueStatus::from_db(status_raw)?;
    Ok(item)
}

const ITEM_COLUMNS: &str = "id, file_path, op_type_id, peer_id, enqueued_at, attempts, status_id";

impl Database {
    /// Appends an operation to the queue.
    pub fn enqueue_operation(
        &self,
        file_path: &str,
        operation: SyncOperation,
        peer_id: &str,
        enqueued_at_ms: u64,
    ) -> StorageResult<i64> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(
            "INSERT INTO operations (file_path, op_type_id, status_id, peer_id, enqueued_at)
             VALUES (?1, ?2, 1, ?3, ?4)",
        )?;
        stmt.execute(params![
            file_path,
            operation.to_db(),
            peer_id,
            enqueued_at_ms as i64,
        ])?;
        Ok(conn.last_insert_rowid())
    }

    /// Claims the oldest pending operation.
    ///
    /// The row moves to `in_progress` with its attempt counter bumped in
    /// the same transaction, so two workers can never claim one item.
    pub fn dequeue_operation(&self) -> StorageResult<Option<SyncQueueItem>> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;

        let found = tx
            .query_row(
                &format!(
                    "SELECT {ITEM_COLUMNS} FROM operations
                     WHERE status_id = 1 ORDER BY enqueued_at ASC, id ASC LIMIT 1"
                ),
                [],
                item_from_row,
            )
            .optional()?;

        let Some(parts) = found else {
            return Ok(None);
        };
        let mut item = finish(parts)?;

        tx.execute(
            "UPDATE operations SET status_id = 2, attempts = attempts + 1 WHERE id = ?1",
            params![item.id],
        )?;
        tx.commit()?;

        item.status = SyncQueueStatus::InProgress;
        item.attempts += 1;
        Ok(Some(item))
    }

    /// Records the outcome of a claimed operation.
    pub fn mark_operation(&self, id: i64, status: SyncQueueStatus) -> StorageResult<bool> {
        let conn = self.lock();
        let mut stmt =
            conn.prepare_cached("UPDATE operations SET status_id = ?2 WHERE id = ?1")?;
        Ok(stmt.execute(params![id, status.to_db()])? > 0)
    }

    /// Number of operations still waiting.
    pub fn pending_operation_count(&self) -> StorageResult<u64> {
        let conn = self.lock();
        let mut stmt =
            conn.prepare_cached("SELECT COUNT(*) FROM operations WHERE status_id = 1")?;
        Ok(stmt.query_row([], |row| row.get::<_, i64>(0))? as u64)
    }

    /// Appends an access-log row.
    pub fn log_access(
        &self,
        file_path: &str,
        action: &str,
        peer_id: &str,
        logged_at_ms: u64,
    ) -> StorageResult<()> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(
            "INSERT INTO access_log (file_path, action, peer_id, logged_at)
             VALUES (?1, ?2, ?3, ?4)",
        )?;
        stmt.execute(params![file_path, action, peer_id, logged_at_ms as i64])?;
        Ok(())
    }

    /// Recent access-log rows for a path, newest first.
    pub fn access_log(&self, file_path: &str, limit: usize) -> StorageResult<Vec<(String, String, u64)>> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT action, peer_id, logged_at FROM access_log
             WHERE file_path = ?1 ORDER BY logged_at DESC, id DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![file_path, limit as i64], |row| {
            Ok((
                row.get(0)?,
                row.get(1)?,
                row.get::<_, i64>(2)? as u64,
            ))
        })?;
        Ok(rows.collect::<Result<_, _>>()?)
    }
}
