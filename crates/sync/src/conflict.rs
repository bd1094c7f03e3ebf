//! Conflict detection and resolution.
//!
//! After a hash scan both sides exchange file listings. Paths present on
//! both sides with divergent hashes become CONTENT conflicts (with the
//! common ancestor located through the hash-linked history); paths one
//! side deleted while the other modified become DELETION conflicts.
//! Resolution routes through the merge resolver or applies a side
//! wholesale.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use merge::MergeStrategy;
use storage::{ConflictRecord, ConflictStatus, ConflictType, Database};
use versioning::{ChangeType, VersionStore};

use crate::{SyncError, SyncResult};

/// One entry of a hash-scan file listing.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SyncFileEntry {
    /// Path relative to the watch root.
    pub path: String,
    /// Hex content hash; empty for deleted entries.
    pub hash: String,
    /// Size in bytes.
    pub size: u64,
    /// Modification time, milliseconds since the Unix epoch.
    pub modified_ms: u64,
    /// Owning device id.
    pub device: String,
    /// The entry records a deletion.
    pub deleted: bool,
}

type DetectedCallback = Box<dyn Fn(&ConflictRecord) + Send + Sync>;
type ResolvedCallback = Box<dyn Fn(&str, bool) + Send + Sync>;

/// Detects, persists, and resolves conflicts.
pub struct ConflictCoordinator {
    db: Arc<Database>,
    versions: Arc<VersionStore>,
    watch_dir: PathBuf,
    local_device: String,
    detected_callback: Mutex<Option<DetectedCallback>>,
    resolved_callback: Mutex<Option<ResolvedCallback>>,
    counter: AtomicU64,
}

impl ConflictCoordinator {
    /// Creates a coordinator over the shared stores.
    #[must_use]
    pub fn new(
        db: Arc<Database>,
        versions: Arc<VersionStore>,
        watch_dir: &Path,
        local_device: &str,
    ) -> Self {
        Self {
            db,
            versions,
            watch_dir: watch_dir.to_owned(),
            local_device: local_device.to_owned(),
            detected_callback: Mutex::new(None),
            resolved_callback: Mutex::new(None),
            counter: AtomicU64::new(1),
        }
    }

    /// Fires whenever a new conflict is persisted.
    pub fn set_detected_callback<F>(&self, callback: F)
    where
        F: Fn(&ConflictRecord) + Send + Sync + 'static,
    {
        *self
            .detected_callback
            .lock()
            .expect("detected callback poisoned") = Some(Box::new(callback));
    }

    /// Fires whenever a resolution attempt finishes.
    pub fn set_resolved_callback<F>(&self, callback: F)
    where
        F: Fn(&str, bool) + Send + Sync + 'static,
    {
        *self
            .resolved_callback
            .lock()
            .expect("resolved callback poisoned") = Some(Box::new(callback));
    }

    /// Compares the two listings of a sync session and persists a
    /// PENDING conflict for every divergence.
    pub fn detect_conflicts(
        &self,
        remote_device: &str,
        local_files: &[SyncFileEntry],
        remote_files: &[SyncFileEntry],
    ) -> SyncResult<Vec<ConflictRecord>> {
        let mut detected = Vec::new();

        for local in local_files.iter().filter(|entry| !entry.deleted) {
            match remote_files.iter().find(|remote| remote.path == local.path) {
                Some(remote) if remote.deleted => {
                    detected.push(self.persist(
                        local,
                        remote,
                        remote_device,
                        ConflictType::Deletion,
                        String::new(),
                    )?);
                }
                Some(remote) if remote.hash != local.hash => {
                    let base_hash = self
                        .db
                        .find_common_ancestor(&local.hash, &remote.hash)?
                        .unwrap_or_default();
                    detected.push(self.persist(
                        local,
                        remote,
                        remote_device,
                        ConflictType::Content,
                        base_hash,
                    )?);
                }
                Some(remote)
                    if remote.modified_ms != local.modified_ms || remote.size != local.size =>
                {
                    detected.push(self.persist(
                        local,
                        remote,
                        remote_device,
                        ConflictType::Metadata,
                        local.hash.clone(),
                    )?);
                }
                Some(_) => {}
                None => {
                    // Absent on the remote: only a conflict if the remote
                    // actually deleted it (as opposed to never having it).
                    if self.was_deleted_by(&local.path, remote_device)? {
                        let tombstone = SyncFileEntry {
                            path: local.path.clone(),
                            hash: String::new(),
                            size: 0,
                            modified_ms: 0,
                            device: remote_device.to_owned(),
                            deleted: true,
                        };
                        detected.push(self.persist(
                            local,
                            &tombstone,
                            remote_device,
                            ConflictType::Deletion,
                            String::new(),
                        )?);
                    }
                }
            }
        }

        // Remote modified what this side deleted.
        for remote in remote_files.iter().filter(|entry| !entry.deleted) {
            let locally_known = local_files.iter().any(|local| local.path == remote.path);
            if !locally_known && self.was_deleted_by(&remote.path, &self.local_device)? {
                let tombstone = SyncFileEntry {
                    path: remote.path.clone(),
                    hash: String::new(),
                    size: 0,
                    modified_ms: 0,
                    device: self.local_device.clone(),
                    deleted: true,
                };
                detected.push(self.persist(
                    &tombstone,
                    remote,
                    remote_device,
                    ConflictType::Deletion,
                    String::new(),
                )?);
            }
        }

        Ok(detected)
    }

    /// Resolves a conflict with the given strategy.
    ///
    /// Returns `true` when the conflict reached RESOLVED; `AutoMerge`
    /// that leaves residual conflict markers keeps the record PENDING
    /// and returns `false`.
    pub fn resolve(
        &self,
        conflict_id: &str,
        strategy: MergeStrategy,
        manual_content: Option<&[u8]>,
    ) -> SyncResult<bool> {
        let conflict = self
            .db
            .conflict_by_id(conflict_id)?
            .ok_or_else(|| SyncError::NotFound(format!("conflict {conflict_id}")))?;
        let local_path = PathBuf::from(&conflict.file_path);

        let resolved = match strategy {
            MergeStrategy::LocalWins => {
                // Local content stays; just close the record.
                true
            }
            MergeStrategy::RemoteWins => {
                let remote = self.content_by_hash(&local_path, &conflict.remote_hash)?;
                self.apply_content(&local_path, &remote)?;
                true
            }
            MergeStrategy::Manual => {
                let content = manual_content.ok_or_else(|| {
                    SyncError::NotFound("manual resolution content".to_owned())
                })?;
                self.apply_content(&local_path, content)?;
                true
            }
            MergeStrategy::AutoMerge | MergeStrategy::TimestampWins | MergeStrategy::SizeWins => {
                self.merge_and_apply(&conflict, &local_path, strategy)?
            }
        };

        if resolved {
            self.db
                .update_conflict_status(conflict_id, ConflictStatus::Resolved)?;
            tracing::info!(conflict_id, ?strategy, "conflict resolved");
        } else {
            tracing::warn!(conflict_id, "auto-merge left residual conflicts");
        }
        if let Some(callback) = self
            .resolved_callback
            .lock()
            .expect("resolved callback poisoned")
            .as_ref()
        {
            callback(conflict_id, resolved);
        }
        Ok(resolved)
    }

    /// Marks a conflict IGNORED without touching the file.
    pub fn ignore(&self, conflict_id: &str) -> SyncResult<bool> {
        Ok(self
            .db
            .update_conflict_status(conflict_id, ConflictStatus::Ignored)?)
    }

    /// All conflicts awaiting resolution.
    pub fn pending(&self) -> SyncResult<Vec<ConflictRecord>> {
        Ok(self.db.pending_conflicts()?)
    }

    fn merge_and_apply(
        &self,
        conflict: &ConflictRecord,
        local_path: &Path,
        strategy: MergeStrategy,
    ) -> SyncResult<bool> {
        let local = std::fs::read(local_path)?;
        let remote = self.content_by_hash(local_path, &conflict.remote_hash)?;
        let base = if conflict.base_hash.is_empty() {
            Vec::new()
        } else {
            self.content_by_hash(local_path, &conflict.base_hash)
                .unwrap_or_default()
        };

        if is_binary(&local) || is_binary(&remote) {
            let result = merge::merge_binary(
                &base,
                &local,
                &remote,
                strategy,
                merge::SideMetadata {
                    local_mtime_ms: conflict.local_mtime_ms,
                    remote_mtime_ms: conflict.remote_mtime_ms,
                },
            );
            if result.success {
                self.apply_content(local_path, &result.merged_content)?;
            }
            return Ok(result.success);
        }

        let result = merge::merge(
            &String::from_utf8_lossy(&base),
            &String::from_utf8_lossy(&local),
            &String::from_utf8_lossy(&remote),
            strategy,
        );
        if result.success {
            self.apply_content(local_path, result.merged_content.as_bytes())?;
        }
        Ok(result.success)
    }

    /// Writes resolved content, snapshotting the pre-resolution state.
    fn apply_content(&self, local_path: &Path, content: &[u8]) -> SyncResult<()> {
        if local_path.exists() {
            self.versions.create_version(
                local_path,
                ChangeType::Conflict,
                "",
                "pre-resolution snapshot",
            )?;
        }
        std::fs::write(local_path, content)?;
        Ok(())
    }

    /// Finds stored content for a hash in the version store.
    fn content_by_hash(&self, local_path: &Path, hash: &str) -> SyncResult<Vec<u8>> {
        let version = self
            .versions
            .versions(local_path)?
            .into_iter()
            .find(|version| version.content_hash == hash)
            .ok_or_else(|| SyncError::NotFound(format!("content for hash {hash}")))?;
        Ok(std::fs::read(&version.blob_path)?)
    }

    /// Whether the given device recorded a deletion of `path` in the
    /// content history.
    fn was_deleted_by(&self, relative_path: &str, device: &str) -> SyncResult<bool> {
        let absolute = self.watch_dir.join(relative_path).display().to_string();
        let history = self.db.file_history(&absolute)?;
        Ok(history
            .first()
            .is_some_and(|latest| latest.change_type == "delete" && latest.peer_id == device))
    }

    fn persist(
        &self,
        local: &SyncFileEntry,
        remote: &SyncFileEntry,
        remote_device: &str,
        conflict_type: ConflictType,
        base_hash: String,
    ) -> SyncResult<ConflictRecord> {
        let absolute = self.watch_dir.join(&local.path).display().to_string();
        let record = ConflictRecord {
            id: format!(
                "cf-{}-{}",
                self.local_device,
                self.counter.fetch_add(1, Ordering::SeqCst)
            ),
            file_path: absolute,
            local_hash: local.hash.clone(),
            remote_hash: remote.hash.clone(),
            base_hash,
            local_version: 0,
            remote_version: 0,
            base_version: 0,
            conflict_type,
            status: ConflictStatus::Pending,
            local_device: self.local_device.clone(),
            remote_device: remote_device.to_owned(),
            local_mtime_ms: local.modified_ms,
            remote_mtime_ms: remote.modified_ms,
        };
        self.db.insert_conflict(&record)?;
        tracing::warn!(
            id = %record.id,
            path = %record.file_path,
            ?conflict_type,
            "conflict detected"
        );
        if let Some(callback) = self
            .detected_callback
            .lock()
            .expect("detected callback poisoned")
            .as_ref()
        {
            callback(&record);
        }
        Ok(record)
    }
}

/// Heuristic binary check: NUL byte in the first 8 KiB.
fn is_binary(content: &[u8]) -> bool {
    content.iter().take(8192).any(|&byte| byte == 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn setup(tmp: &Path) -> ConflictCoordinator {
        let db = Arc::new(Database::open_in_memory().expect("open db"));
        let versions = Arc::new(
            VersionStore::new(tmp, versioning::VersioningConfig::default()).expect("store"),
        );
        ConflictCoordinator::new(db, versions, tmp, "local-dev")
    }

    fn entry(path: &str, hash: &str, device: &str) -> SyncFileEntry {
        SyncFileEntry {
            path: path.to_owned(),
            hash: hash.to_owned(),
            size: 10,
            modified_ms: 1000,
            device: device.to_owned(),
            deleted: false,
        }
    }

    #[test]
    fn divergent_hashes_yield_content_conflict_with_ancestor() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let coordinator = setup(tmp.path());
        let absolute = tmp.path().join("f.txt").display().to_string();

        // Shared history: h1 -> {h2 local, h3 remote}.
        coordinator.db.record_file_version(&absolute, "h1", "", "", 1000, "create").expect("h1");
        coordinator.db.record_file_version(&absolute, "h2", "h1", "", 2000, "modify").expect("h2");
        coordinator
            .db
            .record_file_version(&absolute, "h3", "h1", "peer-b", 2100, "remote")
            .expect("h3");

        let hits = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&hits);
        coordinator.set_detected_callback(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        let detected = coordinator
            .detect_conflicts(
                "peer-b",
                &[entry("f.txt", "h2", "local-dev")],
                &[entry("f.txt", "h3", "peer-b")],
            )
            .expect("detect");

        assert_eq!(detected.len(), 1);
        assert_eq!(detected[0].conflict_type, ConflictType::Content);
        assert_eq!(detected[0].base_hash, "h1");
        assert_eq!(detected[0].status, ConflictStatus::Pending);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(coordinator.pending().expect("pending").len(), 1);
    }

    #[test]
    fn remote_deletion_of_modified_file_is_a_deletion_conflict() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let coordinator = setup(tmp.path());
        let absolute = tmp.path().join("f").display().to_string();

        // The remote recorded a deletion of f in the sync state.
        coordinator
            .db
            .record_file_version(&absolute, "", "h1", "peer-b", 2000, "delete")
            .expect("tombstone");

        let detected = coordinator
            .detect_conflicts("peer-b", &[entry("f", "h1", "local-dev")], &[])
            .expect("detect");

        assert_eq!(detected.len(), 1);
        assert_eq!(detected[0].conflict_type, ConflictType::Deletion);
        assert_eq!(detected[0].status, ConflictStatus::Pending);
    }

    #[test]
    fn absent_without_tombstone_is_not_a_conflict() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let coordinator = setup(tmp.path());

        let detected = coordinator
            .detect_conflicts("peer-b", &[entry("f", "h1", "local-dev")], &[])
            .expect("detect");
        assert!(detected.is_empty());
    }

    #[test]
    fn identical_entries_produce_nothing() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let coordinator = setup(tmp.path());
        let detected = coordinator
            .detect_conflicts(
                "peer-b",
                &[entry("f", "h1", "local-dev")],
                &[entry("f", "h1", "peer-b")],
            )
            .expect("detect");
        assert!(detected.is_empty());
    }

    #[test]
    fn auto_merge_resolves_disjoint_text_edits() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let coordinator = setup(tmp.path());
        let file = tmp.path().join("doc.txt");

        // Base and remote snapshots must exist in the version store.
        let base = b"A\nB\nC\n";
        let remote = b"A\nB\nC2\n";
        let base_hash = checksums::strong::digest_hex(base);
        let remote_hash = checksums::strong::digest_hex(remote);
        coordinator
            .versions
            .create_version_from_data(&file, base, &base_hash, 1000, "", ChangeType::Create)
            .expect("base snapshot");
        coordinator
            .versions
            .create_version_from_data(&file, remote, &remote_hash, 2000, "peer-b", ChangeType::Remote)
            .expect("remote snapshot");

        // The working copy holds the local edit.
        std::fs::write(&file, b"A\nB2\nC\n").expect("write local");

        let local_hash = checksums::strong::digest_hex(b"A\nB2\nC\n");
        coordinator.db.record_file_version(
            &file.display().to_string(),
            &base_hash,
            "",
            "",
            1000,
            "create",
        ).expect("base row");
        coordinator.db.record_file_version(
            &file.display().to_string(),
            &local_hash,
            &base_hash,
            "",
            2000,
            "modify",
        ).expect("local row");
        coordinator.db.record_file_version(
            &file.display().to_string(),
            &remote_hash,
            &base_hash,
            "peer-b",
            2100,
            "remote",
        ).expect("remote row");

        let detected = coordinator
            .detect_conflicts(
                "peer-b",
                &[entry("doc.txt", &local_hash, "local-dev")],
                &[entry("doc.txt", &remote_hash, "peer-b")],
            )
            .expect("detect");
        assert_eq!(detected.len(), 1);
        assert_eq!(detected[0].base_hash, base_hash);

        let resolved = coordinator
            .resolve(&detected[0].id, MergeStrategy::AutoMerge, None)
            .expect("resolve");
        assert!(resolved);
        assert_eq!(std::fs::read(&file).expect("read"), b"A\nB2\nC2\n");
        assert!(coordinator.pending().expect("pending").is_empty());
    }

    #[test]
    fn hard_conflict_stays_pending_under_auto_merge() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let coordinator = setup(tmp.path());
        let file = tmp.path().join("doc.txt");

        let base = b"A\nB\nC\n";
        let remote = b"A\nY\nC\n";
        let base_hash = checksums::strong::digest_hex(base);
        let remote_hash = checksums::strong::digest_hex(remote);
        coordinator
            .versions
            .create_version_from_data(&file, base, &base_hash, 1000, "", ChangeType::Create)
            .expect("base snapshot");
        coordinator
            .versions
            .create_version_from_data(&file, remote, &remote_hash, 2000, "peer-b", ChangeType::Remote)
            .expect("remote snapshot");
        std::fs::write(&file, b"A\nX\nC\n").expect("write local");

        let record = ConflictRecord {
            id: "cf-test-1".to_owned(),
            file_path: file.display().to_string(),
            local_hash: checksums::strong::digest_hex(b"A\nX\nC\n"),
            remote_hash,
            base_hash,
            local_version: 0,
            remote_version: 0,
            base_version: 0,
            conflict_type: ConflictType::Content,
            status: ConflictStatus::Pending,
            local_device: "local-dev".to_owned(),
            remote_device: "peer-b".to_owned(),
            local_mtime_ms: 0,
            remote_mtime_ms: 0,
        };
        coordinator.db.insert_conflict(&record).expect("insert");

        let resolved = coordinator
            .resolve("cf-test-1", MergeStrategy::AutoMerge, None)
            .expect("resolve");
        assert!(!resolved);
        assert_eq!(coordinator.pending().expect("pending").len(), 1);
        // The local file is untouched by the failed merge.
        assert_eq!(std::fs::read(&file).expect("read"), b"A\nX\nC\n");
    }

    #[test]
    fn remote_wins_overwrites_local_content() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let coordinator = setup(tmp.path());
        let file = tmp.path().join("doc.txt");

        let remote = b"remote content";
        let remote_hash = checksums::strong::digest_hex(remote);
        coordinator
            .versions
            .create_version_from_data(&file, remote, &remote_hash, 2000, "peer-b", ChangeType::Remote)
            .expect("remote snapshot");
        std::fs::write(&file, b"local content").expect("write local");

        let record = ConflictRecord {
            id: "cf-test-2".to_owned(),
            file_path: file.display().to_string(),
            local_hash: checksums::strong::digest_hex(b"local content"),
            remote_hash,
            base_hash: String::new(),
            local_version: 0,
            remote_version: 0,
            base_version: 0,
            conflict_type: ConflictType::Content,
            status: ConflictStatus::Pending,
            local_device: "local-dev".to_owned(),
            remote_device: "peer-b".to_owned(),
            local_mtime_ms: 0,
            remote_mtime_ms: 0,
        };
        coordinator.db.insert_conflict(&record).expect("insert");

        assert!(coordinator
            .resolve("cf-test-2", MergeStrategy::RemoteWins, None)
            .expect("resolve"));
        assert_eq!(std::fs::read(&file).expect("read"), b"remote content");
    }

    #[test]
    fn manual_resolution_applies_supplied_bytes() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let coordinator = setup(tmp.path());
        let file = tmp.path().join("doc.txt");
        std::fs::write(&file, b"local").expect("write local");

        let record = ConflictRecord {
            id: "cf-test-3".to_owned(),
            file_path: file.display().to_string(),
            local_hash: String::new(),
            remote_hash: String::new(),
            base_hash: String::new(),
            local_version: 0,
            remote_version: 0,
            base_version: 0,
            conflict_type: ConflictType::Content,
            status: ConflictStatus::Pending,
            local_device: "local-dev".to_owned(),
            remote_device: "peer-b".to_owned(),
            local_mtime_ms: 0,
            remote_mtime_ms: 0,
        };
        coordinator.db.insert_conflict(&record).expect("insert");

        assert!(coordinator
            .resolve("cf-test-3", MergeStrategy::Manual, Some(b"hand merged"))
            .expect("resolve"));
        assert_eq!(std::fs::read(&file).expect("read"), b"hand merged");
        assert!(coordinator
            .resolve("cf-missing", MergeStrategy::Manual, Some(b"x"))
            .is_err());
    }

    #[test]
    fn ignore_closes_without_touching_the_file() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let coordinator = setup(tmp.path());
        let file = tmp.path().join("doc.txt");
        std::fs::write(&file, b"untouched").expect("write local");

        let record = ConflictRecord {
            id: "cf-test-4".to_owned(),
            file_path: file.display().to_string(),
            local_hash: String::new(),
            remote_hash: String::new(),
            base_hash: String::new(),
            local_version: 0,
            remote_version: 0,
            base_version: 0,
            conflict_type: ConflictType::Deletion,
            status: ConflictStatus::Pending,
            local_device: "local-dev".to_owned(),
            remote_device: "peer-b".to_owned(),
            local_mtime_ms: 0,
            remote_mtime_ms: 0,
        };
        coordinator.db.insert_conflict(&record).expect("insert");

        assert!(coordinator.ignore("cf-test-4").expect("ignore"));
        assert!(coordinator.pending().expect("pending").is_empty());
        assert_eq!(std::fs::read(&file).expect("read"), b"untouched");
    }
}
