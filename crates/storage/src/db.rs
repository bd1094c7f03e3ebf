use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::Connection;

use crate::migrations::{builtin_migrations, Migration};
use crate::{StorageError, StorageResult};

/// How long a statement waits on a locked database before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Persistence facade over a single SQLite connection.
///
/// The connection sits behind a mutex: SQLite is the single writer and
/// every public method locks for the duration of its statements.
/// Statements are prepared through the connection's cache, so repeated
/// calls reuse compiled SQL.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Opens (creating if needed) the database at `path` and applies the
    /// built-in migrations.
    pub fn open(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|err| StorageError::Migration {
                    version: 0,
                    reason: format!("cannot create database directory: {err}"),
                })?;
            }
        }
        Self::from_connection(Connection::open(path)?)
    }

    /// In-memory database, used by tests.
    pub fn open_in_memory() -> StorageResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> StorageResult<Self> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        // WAL keeps readers unblocked during writes; NORMAL sync is safe
        // with WAL and avoids an fsync per transaction. journal_mode
        // reports the resulting mode, so it goes through query_row.
        let _mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        conn.execute_batch("PRAGMA synchronous = NORMAL; PRAGMA temp_store = MEMORY;")?;

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate(&builtin_migrations())?;
        Ok(db)
    }

    /// Applies every migration newer than the recorded schema version.
    ///
    /// Each migration runs inside its own transaction together with the
    /// `schema_version` bookkeeping row; failure rolls the pair back.
    pub fn migrate(&self, migrations: &[Migration]) -> StorageResult<()> {
        let mut conn = self.lock();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                description TEXT NOT NULL DEFAULT ''
            )",
        )?;

        let current: i64 = conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )?;

        for migration in migrations {
            if migration.version <= current {
                continue;
            }
            let tx = conn.transaction()?;
            tx.execute_batch(migration.up)
                .map_err(|err| StorageError::Migration {
                    version: migration.version,
                    reason: err.to_string(),
                })?;
            tx.execute(
                "INSERT INTO schema_version (version, description) VALUES (?1, ?2)",
                rusqlite::params![migration.version, migration.description],
            )?;
            tx.commit()?;
            tracing::info!(
                version = migration.version,
                description = migration.description,
                "applied schema migration"
            );
        }
        Ok(())
    }

    /// Current schema version.
    pub fn schema_version(&self) -> StorageResult<i64> {
        let conn = self.lock();
        Ok(conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )?)
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("database mutex poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_applies_builtin_migrations() {
        let db = Database::open_in_memory().expect("open");
        assert_eq!(db.schema_version().expect("version"), 3);
    }

    #[test]
    fn migrate_is_idempotent() {
        let db = Database::open_in_memory().expect("open");
        db.migrate(&builtin_migrations()).expect("re-run");
        assert_eq!(db.schema_version().expect("version"), 3);
    }

    #[test]
    fn failed_migration_rolls_back_version_row() {
        let db = Database::open_in_memory().expect("open");
        let bad = Migration {
            version: 99,
            description: "broken",
            up: "THIS IS NOT SQL;",
            down: "",
        };
        assert!(db.migrate(&[bad]).is_err());
        assert_eq!(db.schema_version().expect("version"), 3);
    }

    #[test]
    fn open_creates_parent_directories() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let nested = tmp.path().join("state/deep/sentinel.db");
        let db = Database::open(&nested).expect("open");
        assert_eq!(db.schema_version().expect("version"), 3);
        assert!(nested.exists());
    }
}
