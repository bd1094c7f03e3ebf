//! Three-way merge resolver.
//!
//! Text merges walk base, local, and remote line-by-line, guided by the
//! longest common subsequence between base and each side. Divergent
//! blocks go through a small auto-resolve pass before falling back to
//! `<<<<<<< LOCAL` conflict markers. Binary contents skip the line diff
//! entirely and resolve by strategy.

#![deny(unsafe_code)]

mod three_way;

pub use three_way::ConflictRegion;

/// How a merge should resolve divergent changes.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum MergeStrategy {
    /// Keep the local side unconditionally.
    LocalWins,
    /// Keep the remote side unconditionally.
    RemoteWins,
    /// Line-level three-way merge with auto-resolution.
    #[default]
    AutoMerge,
    /// Merge without auto-resolution; conflicts are left for a human.
    Manual,
    /// Prefer the side with the newer modification time.
    TimestampWins,
    /// Prefer the larger side.
    SizeWins,
}

/// Outcome of a merge attempt.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MergeResult {
    /// `true` when no unresolved conflicts remain.
    pub success: bool,
    /// Merged content, possibly containing conflict markers.
    pub merged_content: String,
    /// Unresolved conflict regions.
    pub conflicts: Vec<ConflictRegion>,
    /// Divergent blocks resolved automatically.
    pub auto_resolved: usize,
    /// Failure description when the merge could not run at all.
    pub error: Option<String>,
}

/// Modification times callers supply for metadata-driven strategies.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct SideMetadata {
    /// Local file mtime, milliseconds since the Unix epoch.
    pub local_mtime_ms: u64,
    /// Remote file mtime, milliseconds since the Unix epoch.
    pub remote_mtime_ms: u64,
}

/// Merges text content three ways.
///
/// `LocalWins`/`RemoteWins` short-circuit; every other strategy runs the
/// line-level merge (`Manual` with auto-resolution disabled). Success
/// requires zero residual conflicts.
#[must_use]
pub fn merge(base: &str, local: &str, remote: &str, strategy: MergeStrategy) -> MergeResult {
    match strategy {
        MergeStrategy::LocalWins => resolved(local.to_owned()),
        MergeStrategy::RemoteWins => resolved(remote.to_owned()),
        MergeStrategy::Manual => three_way::merge_lines(base, local, remote, false),
        MergeStrategy::AutoMerge | MergeStrategy::TimestampWins | MergeStrategy::SizeWins => {
            three_way::merge_lines(base, local, remote, true)
        }
    }
}

/// Merges binary content.
///
/// No line diff: identical sides are trivial, a side equal to base yields
/// the other, and true divergence falls back to the strategy. `AutoMerge`
/// and `Manual` cannot resolve divergent binaries and report a conflict.
#[must_use]
pub fn merge_binary(
    base: &[u8],
    local: &[u8],
    remote: &[u8],
    strategy: MergeStrategy,
    metadata: SideMetadata,
) -> BinaryMergeResult {
    if local == remote {
        return BinaryMergeResult::clean(local.to_vec());
    }
    if local == base {
        return BinaryMergeResult::clean(remote.to_vec());
    }
    if remote == base {
        return BinaryMergeResult::clean(local.to_vec());
    }

    match strategy {
        MergeStrategy::LocalWins => BinaryMergeResult::clean(local.to_vec()),
        MergeStrategy::RemoteWins => BinaryMergeResult::clean(remote.to_vec()),
        MergeStrategy::SizeWins => {
            let winner = if local.len() >= remote.len() { local } else { remote };
            BinaryMergeResult::clean(winner.to_vec())
        }
        MergeStrategy::TimestampWins => {
            let winner = if metadata.local_mtime_ms >= metadata.remote_mtime_ms {
                local
            } else {
                remote
            };
            BinaryMergeResult::clean(winner.to_vec())
        }
        MergeStrategy::AutoMerge | MergeStrategy::Manual => BinaryMergeResult {
            success: false,
            merged_content: Vec::new(),
            error: Some("binary conflict requires manual resolution".to_owned()),
        },
    }
}

/// Outcome of a binary merge attempt.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct BinaryMergeResult {
    /// `true` when a winner was determined.
    pub success: bool,
    /// Winning content.
    pub merged_content: Vec<u8>,
    /// Failure description for unresolvable conflicts.
    pub error: Option<String>,
}

impl BinaryMergeResult {
    fn clean(merged_content: Vec<u8>) -> Self {
        Self {
            success: true,
            merged_content,
            error: None,
        }
    }
}

fn resolved(merged_content: String) -> MergeResult {
    MergeResult {
        success: true,
        merged_content,
        conflicts: Vec::new(),
        auto_resolved: 1,
        error: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_wins_short_circuits() {
        let result = merge("b", "l", "r", MergeStrategy::LocalWins);
        assert!(result.success);
        assert_eq!(result.merged_content, "l");
    }

    #[test]
    fn remote_wins_short_circuits() {
        let result = merge("b", "l", "r", MergeStrategy::RemoteWins);
        assert_eq!(result.merged_content, "r");
    }

    #[test]
    fn binary_identical_sides_are_trivial() {
        let result = merge_binary(
            b"base",
            b"same",
            b"same",
            MergeStrategy::AutoMerge,
            SideMetadata::default(),
        );
        assert!(result.success);
        assert_eq!(result.merged_content, b"same");
    }

    #[test]
    fn binary_unchanged_local_takes_remote() {
        let result = merge_binary(
            b"base",
            b"base",
            b"new remote",
            MergeStrategy::AutoMerge,
            SideMetadata::default(),
        );
        assert!(result.success);
        assert_eq!(result.merged_content, b"new remote");
    }

    #[test]
    fn binary_size_wins_picks_larger() {
        let result = merge_binary(
            b"base",
            b"looooooooonger",
            b"short",
            MergeStrategy::SizeWins,
            SideMetadata::default(),
        );
        assert_eq!(result.merged_content, b"looooooooonger");
    }

    #[test]
    fn binary_timestamp_wins_uses_caller_mtimes() {
        let metadata = SideMetadata {
            local_mtime_ms: 100,
            remote_mtime_ms: 200,
        };
        let result = merge_binary(
            b"base",
            b"local",
            b"remote",
            MergeStrategy::TimestampWins,
            metadata,
        );
        assert_eq!(result.merged_content, b"remote");
    }

    #[test]
    fn binary_divergence_without_strategy_is_a_conflict() {
        let result = merge_binary(
            b"base",
            b"local",
            b"remote",
            MergeStrategy::AutoMerge,
            SideMetadata::default(),
        );
        assert!(!result.success);
        assert!(result.error.is_some());
    }
}
