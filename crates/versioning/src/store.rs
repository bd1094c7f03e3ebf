use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::glob::glob_match;
use crate::{VersionError, VersionResult};

const MANIFEST_NAME: &str = "manifest.json";

/// Why a version was recorded.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    /// File appeared for the first time.
    Create,
    /// Local modification.
    Modify,
    /// Snapshot taken while resolving a conflict.
    Conflict,
    /// Remote content recorded before it was applied locally.
    Remote,
    /// Safety copy taken before a restore overwrote the file.
    Backup,
}

impl ChangeType {
    /// Stable lowercase name used in manifests and the database.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Modify => "modify",
            Self::Conflict => "conflict",
            Self::Remote => "remote",
            Self::Backup => "backup",
        }
    }
}

impl std::fmt::Display for ChangeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recorded version of a watched file.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub struct FileVersion {
    /// Collision-free id: `millis * 10_000 + random`.
    pub version_id: u64,
    /// Original file path.
    pub file_path: String,
    /// On-disk blob holding this version's contents.
    pub blob_path: PathBuf,
    /// Hex SHA-256 of the contents.
    pub content_hash: String,
    /// Peer that produced the version; empty for local changes.
    #[serde(default)]
    pub peer_id: String,
    /// Capture time, milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
    /// Content size in bytes.
    pub size: u64,
    /// Why the version was recorded.
    pub change_type: ChangeType,
    /// Free-form annotation.
    #[serde(default)]
    pub comment: String,
}

/// Versioning limits and exclusions.
#[derive(Clone, Debug)]
pub struct VersioningConfig {
    /// Keep at most this many versions per file.
    pub max_versions_per_file: usize,
    /// Global byte budget across all version blobs.
    pub max_total_bytes: u64,
    /// Master switch; a disabled store records nothing.
    pub enabled: bool,
    /// Subdirectory of the watch root that holds the blobs.
    pub version_dir: String,
    /// File-name globs never versioned.
    pub exclude_patterns: Vec<String>,
}

impl Default for VersioningConfig {
    fn default() -> Self {
        Self {
            max_versions_per_file: 10,
            max_total_bytes: 500 * 1024 * 1024,
            enabled: true,
            version_dir: ".sentinel_versions".to_owned(),
            exclude_patterns: vec![
                "*.tmp".to_owned(),
                "*.swp".to_owned(),
                "*.lock".to_owned(),
                ".DS_Store".to_owned(),
                "Thumbs.db".to_owned(),
            ],
        }
    }
}

/// Content-addressed version store rooted inside the watch directory.
pub struct VersionStore {
    root: PathBuf,
    config: VersioningConfig,
    // Guards manifest read-modify-write cycles; blob writes are fresh
    // files and never overlap.
    manifest_lock: Mutex<()>,
}

impl VersionStore {
    /// Opens (and creates if missing) the store under `watch_dir`.
    pub fn new(watch_dir: &Path, config: VersioningConfig) -> VersionResult<Self> {
        let root = watch_dir.join(&config.version_dir);
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            config,
            manifest_lock: Mutex::new(()),
        })
    }

    /// Current configuration.
    #[must_use]
    pub fn config(&self) -> &VersioningConfig {
        &self.config
    }

    /// Returns `true` for paths that must never be versioned: anything
    /// matching an exclusion glob and anything inside the store itself.
    #[must_use]
    pub fn is_excluded(&self, path: &Path) -> bool {
        if path.starts_with(&self.root) {
            return true;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return true;
        };
        self.config
            .exclude_patterns
            .iter()
            .any(|pattern| glob_match(pattern, name))
    }

    /// Records the current contents of `path` as a new version.
    ///
    /// Returns `Ok(None)` when versioning is disabled, the path is
    /// excluded, or an identical content hash is already recorded for it.
    /// After insertion the file is pruned back to the per-file limit.
    pub fn create_version(
        &self,
        path: &Path,
        change_type: ChangeType,
        peer_id: &str,
        comment: &str,
    ) -> VersionResult<Option<FileVersion>> {
        if !self.config.enabled || self.is_excluded(path) {
            return Ok(None);
        }
        let contents = fs::read(path)?;
        let hash = checksums::strong::digest_hex(&contents);
        self.insert(path, &contents, &hash, now_ms(), peer_id, change_type, comment)
    }

    /// Records supplied bytes as a version of `path` without touching the
    /// file itself (used for remote content before it is applied).
    pub fn create_version_from_data(
        &self,
        path: &Path,
        contents: &[u8],
        hash: &str,
        timestamp_ms: u64,
        peer_id: &str,
        change_type: ChangeType,
    ) -> VersionResult<Option<FileVersion>> {
        if !self.config.enabled || self.is_excluded(path) {
            return Ok(None);
        }
        self.insert(path, contents, hash, timestamp_ms, peer_id, change_type, "")
    }

    /// All versions of `path`, newest first.
    pub fn versions(&self, path: &Path) -> VersionResult<Vec<FileVersion>> {
        let _guard = self.manifest_lock.lock().expect("manifest lock poisoned");
        let mut versions = self.load_manifest(&self.dir_for(path))?;
        versions.sort_by(|a, b| b.timestamp_ms.cmp(&a.timestamp_ms));
        Ok(versions)
    }

    /// Looks up one version by id.
    pub fn version(&self, path: &Path, version_id: u64) -> VersionResult<FileVersion> {
        self.versions(path)?
            .into_iter()
            .find(|v| v.version_id == version_id)
            .ok_or_else(|| VersionError::NotFound {
                path: path.display().to_string(),
                version_id,
            })
    }

    /// Most recent version of `path`, if any.
    pub fn latest_version(&self, path: &Path) -> VersionResult<Option<FileVersion>> {
        Ok(self.versions(path)?.into_iter().next())
    }

    /// Reads the stored contents of a version.
    pub fn read_version_content(&self, path: &Path, version_id: u64) -> VersionResult<Vec<u8>> {
        let version = self.version(path, version_id)?;
        Ok(fs::read(&version.blob_path)?)
    }

    /// Restores a version over the live file.
    ///
    /// With `backup_current` set, the current contents are first recorded
    /// as a [`ChangeType::Backup`] version.
    pub fn restore_version(
        &self,
        path: &Path,
        version_id: u64,
        backup_current: bool,
    ) -> VersionResult<()> {
        let contents = self.read_version_content(path, version_id)?;
        if backup_current && path.exists() {
            self.create_version(path, ChangeType::Backup, "", "pre-restore backup")?;
        }
        fs::write(path, contents)?;
        tracing::info!(path = %path.display(), version_id, "restored version");
        Ok(())
    }

    /// Deletes one version and its blob. Returns `true` if it existed.
    pub fn delete_version(&self, path: &Path, version_id: u64) -> VersionResult<bool> {
        let _guard = self.manifest_lock.lock().expect("manifest lock poisoned");
        let dir = self.dir_for(path);
        let mut versions = self.load_manifest(&dir)?;
        let before = versions.len();
        versions.retain(|version| {
            if version.version_id == version_id {
                let _ = fs::remove_file(&version.blob_path);
                false
            } else {
                true
            }
        });
        let removed = versions.len() < before;
        if removed {
            self.save_manifest(&dir, &versions)?;
        }
        Ok(removed)
    }

    /// Deletes every version of `path`. Returns how many were removed.
    pub fn delete_all_versions(&self, path: &Path) -> VersionResult<usize> {
        let _guard = self.manifest_lock.lock().expect("manifest lock poisoned");
        let dir = self.dir_for(path);
        let versions = self.load_manifest(&dir)?;
        let count = versions.len();
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
        }
        Ok(count)
    }

    /// Prunes versions.
    ///
    /// With a path, that file is pruned to the per-file count limit.
    /// Without one, versions are deleted globally oldest-first until the
    /// total blob bytes fit the configured budget.
    pub fn prune_versions(&self, path: Option<&Path>) -> VersionResult<usize> {
        let _guard = self.manifest_lock.lock().expect("manifest lock poisoned");
        match path {
            Some(path) => self.prune_file(&self.dir_for(path)),
            None => self.prune_global(),
        }
    }

    /// Total bytes currently held by version blobs.
    pub fn total_bytes(&self) -> VersionResult<u64> {
        let _guard = self.manifest_lock.lock().expect("manifest lock poisoned");
        let mut total = 0u64;
        for dir in self.file_dirs()? {
            total += self.load_manifest(&dir)?.iter().map(|v| v.size).sum::<u64>();
        }
        Ok(total)
    }

    fn insert(
        &self,
        path: &Path,
        contents: &[u8],
        hash: &str,
        timestamp_ms: u64,
        peer_id: &str,
        change_type: ChangeType,
        comment: &str,
    ) -> VersionResult<Option<FileVersion>> {
        let _guard = self.manifest_lock.lock().expect("manifest lock poisoned");

        let dir = self.dir_for(path);
        fs::create_dir_all(&dir)?;
        let mut versions = self.load_manifest(&dir)?;

        if versions.iter().any(|version| version.content_hash == hash) {
            tracing::debug!(path = %path.display(), "identical content already versioned");
            return Ok(None);
        }

        let blob_path = dir.join(blob_name(path, timestamp_ms, hash));
        fs::write(&blob_path, contents)?;

        let version = FileVersion {
            version_id: generate_version_id(timestamp_ms),
            file_path: path.display().to_string(),
            blob_path,
            content_hash: hash.to_owned(),
            peer_id: peer_id.to_owned(),
            timestamp_ms,
            size: contents.len() as u64,
            change_type,
            comment: comment.to_owned(),
        };
        versions.push(version.clone());

        // Enforce the per-file cap, oldest first.
        versions.sort_by_key(|v| v.timestamp_ms);
        while versions.len() > self.config.max_versions_per_file {
            let oldest = versions.remove(0);
            let _ = fs::remove_file(&oldest.blob_path);
            tracing::debug!(version_id = oldest.version_id, "pruned oldest version");
        }

        self.save_manifest(&dir, &versions)?;
        tracing::info!(
            path = %path.display(),
            version_id = version.version_id,
            change_type = %change_type,
            "recorded file version"
        );
        Ok(Some(version))
    }

    fn prune_file(&self, dir: &Path) -> VersionResult<usize> {
        let mut versions = self.load_manifest(dir)?;
        versions.sort_by_key(|v| v.timestamp_ms);
        let mut pruned = 0usize;
        while versions.len() > self.config.max_versions_per_file {
            let oldest = versions.remove(0);
            let _ = fs::remove_file(&oldest.blob_path);
            pruned += 1;
        }
        if pruned > 0 {
            self.save_manifest(dir, &versions)?;
        }
        Ok(pruned)
    }

    fn prune_global(&self) -> VersionResult<usize> {
        // Gather every version with its owning dir, oldest first.
        let mut all: Vec<(PathBuf, FileVersion)> = Vec::new();
        for dir in self.file_dirs()? {
            for version in self.load_manifest(&dir)? {
                all.push((dir.clone(), version));
            }
        }
        let mut total: u64 = all.iter().map(|(_, v)| v.size).sum();
        if total <= self.config.max_total_bytes {
            return Ok(0);
        }

        all.sort_by_key(|(_, v)| v.timestamp_ms);
        let mut doomed: Vec<(PathBuf, u64)> = Vec::new();
        for (dir, version) in &all {
            if total <= self.config.max_total_bytes {
                break;
            }
            total -= version.size;
            let _ = fs::remove_file(&version.blob_path);
            doomed.push((dir.clone(), version.version_id));
        }

        // Rewrite each touched manifest once.
        let pruned = doomed.len();
        let mut dirs: Vec<PathBuf> = doomed.iter().map(|(dir, _)| dir.clone()).collect();
        dirs.sort();
        dirs.dedup();
        for dir in dirs {
            let keep: Vec<FileVersion> = self
                .load_manifest(&dir)?
                .into_iter()
                .filter(|v| !doomed.iter().any(|(_, id)| *id == v.version_id))
                .collect();
            self.save_manifest(&dir, &keep)?;
        }
        tracing::info!(pruned, "global version prune");
        Ok(pruned)
    }

    fn dir_for(&self, path: &Path) -> PathBuf {
        let hash = checksums::strong::digest_hex(path.display().to_string().as_bytes());
        self.root.join(format!("file_{}", &hash[..16]))
    }

    fn file_dirs(&self) -> VersionResult<Vec<PathBuf>> {
        let mut dirs = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                dirs.push(entry.path());
            }
        }
        Ok(dirs)
    }

    /// Loads a manifest, dropping rows whose blob is gone.
    fn load_manifest(&self, dir: &Path) -> VersionResult<Vec<FileVersion>> {
        let manifest = dir.join(MANIFEST_NAME);
        if !manifest.exists() {
            return Ok(Vec::new());
        }
        let raw = fs::read_to_string(&manifest)?;
        let versions: Vec<FileVersion> = serde_json::from_str(&raw)?;
        Ok(versions
            .into_iter()
            .filter(|version| {
                let present = version.blob_path.exists();
                if !present {
                    tracing::warn!(
                        version_id = version.version_id,
                        "manifest row without blob, dropped"
                    );
                }
                present
            })
            .collect())
    }

    fn save_manifest(&self, dir: &Path, versions: &[FileVersion]) -> VersionResult<()> {
        fs::create_dir_all(dir)?;
        let raw = serde_json::to_string_pretty(versions)?;
        fs::write(dir.join(MANIFEST_NAME), raw)?;
        Ok(())
    }
}

/// `millis * 10_000 + random` keeps ids unique under rapid successive
/// writes without any coordination.
fn generate_version_id(timestamp_ms: u64) -> u64 {
    timestamp_ms * 10_000 + rand::thread_rng().gen_range(0..10_000)
}

fn blob_name(path: &Path, timestamp_ms: u64, hash: &str) -> String {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map_or(String::new(), |e| format!(".{e}"));
    format!("v_{timestamp_ms}_{}{ext}", &hash[..8.min(hash.len())])
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_millis() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_in(dir: &Path, config: VersioningConfig) -> VersionStore {
        VersionStore::new(dir, config).expect("create store")
    }

    fn write_file(dir: &Path, name: &str, contents: &[u8]) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, contents).expect("write fixture");
        path
    }

    #[test]
    fn create_and_list_versions_newest_first() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let store = store_in(tmp.path(), VersioningConfig::default());
        let file = write_file(tmp.path(), "doc.txt", b"one");

        store
            .create_version_from_data(&file, b"one", "hash-1", 1000, "", ChangeType::Create)
            .expect("v1");
        store
            .create_version_from_data(&file, b"two", "hash-2", 2000, "peer-9", ChangeType::Remote)
            .expect("v2");

        let versions = store.versions(&file).expect("list");
        assert_eq!(versions.len(), 2);
        assert_eq!(versions[0].content_hash, "hash-2");
        assert_eq!(versions[0].peer_id, "peer-9");
        assert_eq!(versions[1].content_hash, "hash-1");
    }

    #[test]
    fn identical_content_is_recorded_once() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let store = store_in(tmp.path(), VersioningConfig::default());
        let file = write_file(tmp.path(), "doc.txt", b"same");

        let first = store
            .create_version(&file, ChangeType::Modify, "", "")
            .expect("first");
        let second = store
            .create_version(&file, ChangeType::Modify, "", "")
            .expect("second");

        assert!(first.is_some());
        assert!(second.is_none());
        assert_eq!(store.versions(&file).expect("list").len(), 1);
    }

    #[test]
    fn per_file_cap_prunes_oldest() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let config = VersioningConfig {
            max_versions_per_file: 3,
            ..VersioningConfig::default()
        };
        let store = store_in(tmp.path(), config);
        let file = write_file(tmp.path(), "doc.txt", b"x");

        for i in 0..7u64 {
            store
                .create_version_from_data(
                    &file,
                    format!("content {i}").as_bytes(),
                    &format!("hash-{i}"),
                    1000 + i,
                    "",
                    ChangeType::Modify,
                )
                .expect("insert");
        }

        let versions = store.versions(&file).expect("list");
        assert_eq!(versions.len(), 3);
        assert_eq!(versions[0].content_hash, "hash-6");
        assert_eq!(versions[2].content_hash, "hash-4");
        // Pruned blobs are gone from disk too.
        for version in &versions {
            assert!(version.blob_path.exists());
        }
    }

    #[test]
    fn global_prune_respects_byte_budget() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let config = VersioningConfig {
            max_total_bytes: 250,
            ..VersioningConfig::default()
        };
        let store = store_in(tmp.path(), config);

        for (name, ts) in [("a.txt", 1000u64), ("b.txt", 2000), ("c.txt", 3000)] {
            let file = write_file(tmp.path(), name, b"x");
            store
                .create_version_from_data(
                    &file,
                    &vec![b'v'; 100],
                    &format!("hash-{name}"),
                    ts,
                    "",
                    ChangeType::Modify,
                )
                .expect("insert");
        }
        assert_eq!(store.total_bytes().expect("total"), 300);

        let pruned = store.prune_versions(None).expect("prune");
        assert_eq!(pruned, 1);
        assert!(store.total_bytes().expect("total") <= 250);

        // Oldest version went first.
        let oldest = write_file(tmp.path(), "a.txt", b"x");
        assert!(store.versions(&oldest).expect("list").is_empty());
    }

    #[test]
    fn restore_with_backup_snapshots_current_contents() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let store = store_in(tmp.path(), VersioningConfig::default());
        let file = write_file(tmp.path(), "doc.txt", b"original");

        let version = store
            .create_version(&file, ChangeType::Create, "", "")
            .expect("version")
            .expect("recorded");

        fs::write(&file, b"edited").expect("edit file");
        store
            .restore_version(&file, version.version_id, true)
            .expect("restore");

        assert_eq!(fs::read(&file).expect("read"), b"original");
        let versions = store.versions(&file).expect("list");
        assert!(versions
            .iter()
            .any(|v| v.change_type == ChangeType::Backup));
    }

    #[test]
    fn excluded_paths_are_never_versioned() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let store = store_in(tmp.path(), VersioningConfig::default());

        let temp_file = write_file(tmp.path(), "scratch.tmp", b"junk");
        assert!(store.is_excluded(&temp_file));
        assert!(store
            .create_version(&temp_file, ChangeType::Modify, "", "")
            .expect("call succeeds")
            .is_none());

        // The store's own tree is off limits.
        let inside = tmp.path().join(".sentinel_versions/file_x/v_1.txt");
        assert!(store.is_excluded(&inside));
    }

    #[test]
    fn stale_manifest_rows_are_dropped_on_load() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let store = store_in(tmp.path(), VersioningConfig::default());
        let file = write_file(tmp.path(), "doc.txt", b"keep");

        let version = store
            .create_version(&file, ChangeType::Create, "", "")
            .expect("version")
            .expect("recorded");
        fs::remove_file(&version.blob_path).expect("delete blob behind the store's back");

        assert!(store.versions(&file).expect("list").is_empty());
    }

    #[test]
    fn missing_version_lookup_is_not_found() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let store = store_in(tmp.path(), VersioningConfig::default());
        let file = write_file(tmp.path(), "doc.txt", b"x");
        assert!(matches!(
            store.version(&file, 12345),
            Err(VersionError::NotFound { .. })
        ));
    }

    #[test]
    fn version_ids_embed_timestamp_and_stay_unique() {
        let first = generate_version_id(1_700_000_000_000);
        let second = generate_version_id(1_700_000_000_000);
        assert_eq!(first / 10_000, 1_700_000_000_000);
        // Ids share the millisecond but (almost certainly) differ.
        assert_eq!(second / 10_000, 1_700_000_000_000);
    }
}
