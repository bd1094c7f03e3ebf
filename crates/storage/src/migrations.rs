//! Forward-only numbered migrations.
//!
//! Applied versions are tracked in `schema_version`; each migration
//! carries both directions but only `up` runs automatically.

/// One schema migration.
#[derive(Clone, Debug)]
pub struct Migration {
    /// Monotonic migration number.
    pub version: i64,
    /// Human-readable summary stored alongside the version.
    pub description: &'static str,
    /// SQL applied when upgrading.
    pub up: &'static str,
    /// SQL that reverts the migration.
    pub down: &'static str,
}

/// The built-in schema, in application order.
#[must_use]
pub fn builtin_migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            description: "core tables: lookup types, files, peers, operations",
            up: r"
CREATE TABLE IF NOT EXISTS op_types (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE
);
INSERT OR IGNORE INTO op_types (id, name) VALUES
    (1, 'create'), (2, 'modify'), (3, 'delete'), (4, 'rename');

CREATE TABLE IF NOT EXISTS status_types (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE
);
INSERT OR IGNORE INTO status_types (id, name) VALUES
    (1, 'pending'), (2, 'in_progress'), (3, 'done'), (4, 'failed'),
    (5, 'connecting'), (6, 'active'), (7, 'offline');

CREATE TABLE IF NOT EXISTS files (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    path TEXT NOT NULL UNIQUE,
    hash TEXT NOT NULL DEFAULT '',
    modified_time INTEGER NOT NULL DEFAULT 0,
    size INTEGER NOT NULL DEFAULT 0,
    vector_clock TEXT NOT NULL DEFAULT '',
    synced INTEGER NOT NULL DEFAULT 0,
    version INTEGER NOT NULL DEFAULT 1
);
CREATE INDEX IF NOT EXISTS idx_files_path ON files(path);
CREATE INDEX IF NOT EXISTS idx_files_hash ON files(hash);

CREATE TABLE IF NOT EXISTS peers (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    peer_id TEXT NOT NULL UNIQUE,
    ip TEXT NOT NULL,
    port INTEGER NOT NULL,
    last_seen INTEGER NOT NULL DEFAULT 0,
    status_id INTEGER NOT NULL DEFAULT 7 REFERENCES status_types(id),
    latency_ms INTEGER NOT NULL DEFAULT -1,
    UNIQUE (ip, port)
);
CREATE INDEX IF NOT EXISTS idx_peers_status ON peers(status_id);

CREATE TABLE IF NOT EXISTS operations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    file_path TEXT NOT NULL,
    op_type_id INTEGER NOT NULL REFERENCES op_types(id),
    status_id INTEGER NOT NULL DEFAULT 1 REFERENCES status_types(id),
    peer_id TEXT NOT NULL DEFAULT '',
    attempts INTEGER NOT NULL DEFAULT 0,
    enqueued_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_operations_path_status ON operations(file_path, status_id);

CREATE TRIGGER IF NOT EXISTS files_version_bump
AFTER UPDATE OF hash ON files
WHEN old.hash <> new.hash
BEGIN
    UPDATE files SET version = old.version + 1 WHERE id = new.id;
END;
",
            down: r"
DROP TRIGGER IF EXISTS files_version_bump;
DROP TABLE IF EXISTS operations;
DROP TABLE IF EXISTS peers;
DROP TABLE IF EXISTS files;
DROP TABLE IF EXISTS status_types;
DROP TABLE IF EXISTS op_types;
",
        },
        Migration {
            version: 2,
            description: "content history and conflict records",
            up: r"
CREATE TABLE IF NOT EXISTS file_versions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    file_path TEXT NOT NULL,
    hash TEXT NOT NULL,
    parent_hash TEXT NOT NULL DEFAULT '',
    peer_id TEXT NOT NULL DEFAULT '',
    timestamp INTEGER NOT NULL,
    change_type TEXT NOT NULL DEFAULT 'modify'
);
CREATE INDEX IF NOT EXISTS idx_file_versions_path ON file_versions(file_path);
CREATE INDEX IF NOT EXISTS idx_file_versions_hash ON file_versions(hash);

CREATE TABLE IF NOT EXISTS conflicts (
    id TEXT PRIMARY KEY,
    file_path TEXT NOT NULL,
    local_hash TEXT NOT NULL DEFAULT '',
    remote_hash TEXT NOT NULL DEFAULT '',
    base_hash TEXT NOT NULL DEFAULT '',
    local_version INTEGER NOT NULL DEFAULT 0,
    remote_version INTEGER NOT NULL DEFAULT 0,
    base_version INTEGER NOT NULL DEFAULT 0,
    conflict_type INTEGER NOT NULL,
    status INTEGER NOT NULL DEFAULT 0,
    local_device TEXT NOT NULL DEFAULT '',
    remote_device TEXT NOT NULL DEFAULT '',
    local_mtime INTEGER NOT NULL DEFAULT 0,
    remote_mtime INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
);
CREATE INDEX IF NOT EXISTS idx_conflicts_status ON conflicts(status);
CREATE INDEX IF NOT EXISTS idx_conflicts_path ON conflicts(file_path);
",
            down: r"
DROP TABLE IF EXISTS conflicts;
DROP TABLE IF EXISTS file_versions;
",
        },
        Migration {
            version: 3,
            description: "watch registry, ignore patterns, access log",
            up: r"
CREATE TABLE IF NOT EXISTS watched_folders (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    path TEXT NOT NULL UNIQUE,
    added_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
);

CREATE TABLE IF NOT EXISTS ignore_patterns (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    pattern TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS access_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    file_path TEXT NOT NULL,
    action TEXT NOT NULL,
    peer_id TEXT NOT NULL DEFAULT '',
    logged_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_access_log_path ON access_log(file_path);
",
            down: r"
DROP TABLE IF EXISTS access_log;
DROP TABLE IF EXISTS ignore_patterns;
DROP TABLE IF EXISTS watched_folders;
",
        },
    ]
}
