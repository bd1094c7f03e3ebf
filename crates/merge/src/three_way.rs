//! Line-level three-way merge.
//!
//! Each side is diffed against base using a longest-common-subsequence
//! alignment over line hashes; the changed regions (hunks) of both sides
//! are then replayed over base. Non-overlapping hunks apply cleanly;
//! overlapping hunks form a divergence cluster that is auto-resolved or
//! emitted as a conflict block.

use crate::MergeResult;

const MARKER_LOCAL: &str = "<<<<<<< LOCAL";
const MARKER_SEPARATOR: &str = "=======";
const MARKER_REMOTE: &str = ">>>>>>> REMOTE";

/// Similarity threshold above which divergent blocks auto-resolve to the
/// longer side.
const SIMILARITY_THRESHOLD: f64 = 0.9;

/// A divergence the resolver could not reconcile.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ConflictRegion {
    /// Line index in the merged output where the conflict block starts.
    pub start_line: usize,
    /// Local side of the divergence.
    pub local_content: String,
    /// Remote side of the divergence.
    pub remote_content: String,
    /// Base content the sides diverged from.
    pub base_content: String,
}

/// One contiguous change of a side relative to base.
///
/// `base_start..base_end` lines were replaced by `side_start..side_end`;
/// either range may be empty (pure insertion or deletion).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
struct Hunk {
    base_start: usize,
    base_end: usize,
    side_start: usize,
    side_end: usize,
}

impl Hunk {
    const fn base_len(&self) -> usize {
        self.base_end - self.base_start
    }

    const fn side_len(&self) -> usize {
        self.side_end - self.side_start
    }
}

pub(crate) fn merge_lines(
    base: &str,
    local: &str,
    remote: &str,
    auto_resolve: bool,
) -> MergeResult {
    let base_lines: Vec<&str> = base.split('\n').collect();
    let local_lines: Vec<&str> = local.split('\n').collect();
    let remote_lines: Vec<&str> = remote.split('\n').collect();

    let base_hashes = line_hashes(&base_lines);
    let local_hashes = line_hashes(&local_lines);
    let remote_hashes = line_hashes(&remote_lines);

    let local_hunks = hunks(
        &lcs_pairs(&base_hashes, &local_hashes),
        base_lines.len(),
        local_lines.len(),
    );
    let remote_hunks = hunks(
        &lcs_pairs(&base_hashes, &remote_hashes),
        base_lines.len(),
        remote_lines.len(),
    );

    let mut merged: Vec<&str> = Vec::new();
    let mut conflicts = Vec::new();
    let mut auto_resolved = 0usize;

    let mut cursor = 0usize;
    let mut li = 0usize;
    let mut ri = 0usize;
    // Alignment offsets: side position minus base position, accumulated
    // over consumed hunks.
    let mut l_off = 0isize;
    let mut r_off = 0isize;

    loop {
        let next_local = local_hunks.get(li);
        let next_remote = remote_hunks.get(ri);

        let start = match (next_local, next_remote) {
            (None, None) => {
                merged.extend(&base_lines[cursor..]);
                break;
            }
            (Some(h), None) => h.base_start,
            (None, Some(h)) => h.base_start,
            (Some(lh), Some(rh)) => lh.base_start.min(rh.base_start),
        };

        merged.extend(&base_lines[cursor..start]);

        // Collect the cluster of hunks whose base ranges touch this one.
        let mut end = start;
        let mut local_selected: Vec<Hunk> = Vec::new();
        let mut remote_selected: Vec<Hunk> = Vec::new();
        loop {
            let first = local_selected.is_empty() && remote_selected.is_empty();
            if let Some(hunk) = local_hunks.get(li) {
                if joins_cluster(hunk, start, end, first) {
                    end = end.max(hunk.base_end);
                    local_selected.push(*hunk);
                    li += 1;
                    continue;
                }
            }
            if let Some(hunk) = remote_hunks.get(ri) {
                let first = local_selected.is_empty() && remote_selected.is_empty();
                if joins_cluster(hunk, start, end, first) {
                    end = end.max(hunk.base_end);
                    remote_selected.push(*hunk);
                    ri += 1;
                    continue;
                }
            }
            break;
        }

        let local_delta: isize = local_selected
            .iter()
            .map(|h| h.side_len() as isize - h.base_len() as isize)
            .sum();
        let remote_delta: isize = remote_selected
            .iter()
            .map(|h| h.side_len() as isize - h.base_len() as isize)
            .sum();

        let ls = (start as isize + l_off) as usize;
        let le = (end as isize + l_off + local_delta) as usize;
        let rs = (start as isize + r_off) as usize;
        let re = (end as isize + r_off + remote_delta) as usize;

        let base_region = &base_hashes[start..end];
        let local_region = &local_hashes[ls..le];
        let remote_region = &remote_hashes[rs..re];

        if local_region == remote_region {
            merged.extend(&local_lines[ls..le]);
        } else if local_region == base_region {
            merged.extend(&remote_lines[rs..re]);
        } else if remote_region == base_region {
            merged.extend(&local_lines[ls..le]);
        } else {
            let local_block = local_lines[ls..le].join("\n");
            let remote_block = remote_lines[rs..re].join("\n");

            if auto_resolve {
                if let Some(winner) = resolve_divergence(&local_block, &remote_block) {
                    let lines: Vec<&str> = if winner == Winner::Local {
                        local_lines[ls..le].to_vec()
                    } else {
                        remote_lines[rs..re].to_vec()
                    };
                    merged.extend(lines);
                    auto_resolved += 1;
                    l_off += local_delta;
                    r_off += remote_delta;
                    cursor = end;
                    continue;
                }
            }

            conflicts.push(ConflictRegion {
                start_line: merged.len(),
                local_content: local_block,
                remote_content: remote_block,
                base_content: base_lines[start..end].join("\n"),
            });
            merged.push(MARKER_LOCAL);
            merged.extend(&local_lines[ls..le]);
            merged.push(MARKER_SEPARATOR);
            merged.extend(&remote_lines[rs..re]);
            merged.push(MARKER_REMOTE);
        }

        l_off += local_delta;
        r_off += remote_delta;
        cursor = end;
    }

    let success = conflicts.is_empty();
    if !success {
        tracing::debug!(conflicts = conflicts.len(), "three-way merge left conflicts");
    }

    MergeResult {
        success,
        merged_content: merged.join("\n"),
        conflicts,
        auto_resolved,
        error: None,
    }
}

fn joins_cluster(hunk: &Hunk, start: usize, end: usize, first: bool) -> bool {
    if first {
        return hunk.base_start == start;
    }
    // Strictly-inside hunks always join; an empty hunk at the cluster's
    // opening edge joins too (same-point insertions must collide).
    hunk.base_start < end || (hunk.base_start == start && end == start)
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Winner {
    Local,
    Remote,
}

/// Auto-resolution for divergent blocks: near-identical blocks pick the
/// longer side, a one-sided block picks the non-empty side, and two
/// whitespace-only blocks pick local.
fn resolve_divergence(local: &str, remote: &str) -> Option<Winner> {
    if similarity(local, remote) >= SIMILARITY_THRESHOLD {
        return Some(if local.len() >= remote.len() {
            Winner::Local
        } else {
            Winner::Remote
        });
    }
    if local.is_empty() {
        return Some(Winner::Remote);
    }
    if remote.is_empty() {
        return Some(Winner::Local);
    }
    if is_whitespace_only(local) && is_whitespace_only(remote) {
        return Some(Winner::Local);
    }
    None
}

/// Position-wise matching characters over the longer length.
fn similarity(a: &str, b: &str) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let matching = a
        .bytes()
        .zip(b.bytes())
        .filter(|(left, right)| left == right)
        .count();
    matching as f64 / a.len().max(b.len()) as f64
}

fn is_whitespace_only(block: &str) -> bool {
    block.chars().all(char::is_whitespace)
}

fn line_hashes(lines: &[&str]) -> Vec<u64> {
    lines
        .iter()
        .map(|line| {
            line.bytes()
                .fold(0u64, |hash, byte| hash.wrapping_mul(31).wrapping_add(u64::from(byte)))
        })
        .collect()
}

/// Aligned `(base_index, side_index)` pairs of a longest common
/// subsequence, computed with the classic O(m·n) DP table.
fn lcs_pairs(base: &[u64], side: &[u64]) -> Vec<(usize, usize)> {
    let m = base.len();
    let n = side.len();
    let mut table = vec![0u32; (m + 1) * (n + 1)];
    let idx = |i: usize, j: usize| i * (n + 1) + j;

    for i in 1..=m {
        for j in 1..=n {
            table[idx(i, j)] = if base[i - 1] == side[j - 1] {
                table[idx(i - 1, j - 1)] + 1
            } else {
                table[idx(i - 1, j)].max(table[idx(i, j - 1)])
            };
        }
    }

    let mut pairs = Vec::with_capacity(table[idx(m, n)] as usize);
    let (mut i, mut j) = (m, n);
    while i > 0 && j > 0 {
        if base[i - 1] == side[j - 1] {
            pairs.push((i - 1, j - 1));
            i -= 1;
            j -= 1;
        } else if table[idx(i - 1, j)] >= table[idx(i, j - 1)] {
            i -= 1;
        } else {
            j -= 1;
        }
    }
    pairs.reverse();
    pairs
}

/// Converts an LCS alignment into the list of changed regions.
fn hunks(pairs: &[(usize, usize)], base_len: usize, side_len: usize) -> Vec<Hunk> {
    let mut out = Vec::new();
    let mut prev_base = 0usize;
    let mut prev_side = 0usize;

    for &(base_idx, side_idx) in pairs {
        if base_idx > prev_base || side_idx > prev_side {
            out.push(Hunk {
                base_start: prev_base,
                base_end: base_idx,
                side_start: prev_side,
                side_end: side_idx,
            });
        }
        prev_base = base_idx + 1;
        prev_side = side_idx + 1;
    }

    if base_len > prev_base || side_len > prev_side {
        out.push(Hunk {
            base_start: prev_base,
            base_end: base_len,
            side_start: prev_side,
            side_end: side_len,
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{merge, MergeStrategy};

    #[test]
    fn clean_merge_combines_disjoint_edits() {
        let result = merge("A\nB\nC\n", "A\nB2\nC\n", "A\nB\nC2\n", MergeStrategy::AutoMerge);
        assert!(result.success, "expected clean merge: {result:?}");
        assert_eq!(result.merged_content, "A\nB2\nC2\n");
        assert!(result.conflicts.is_empty());
    }

    #[test]
    fn same_line_divergence_is_a_conflict() {
        let result = merge("A\nB\nC\n", "A\nX\nC\n", "A\nY\nC\n", MergeStrategy::AutoMerge);
        assert!(!result.success);
        assert_eq!(result.conflicts.len(), 1);
        assert_eq!(result.conflicts[0].local_content, "X");
        assert_eq!(result.conflicts[0].remote_content, "Y");
        assert_eq!(
            result.merged_content,
            "A\n<<<<<<< LOCAL\nX\n=======\nY\n>>>>>>> REMOTE\nC\n"
        );
    }

    #[test]
    fn identical_inputs_merge_to_themselves() {
        let content = "one\ntwo\nthree\n";
        let result = merge(content, content, content, MergeStrategy::AutoMerge);
        assert!(result.success);
        assert_eq!(result.merged_content, content);
    }

    #[test]
    fn one_sided_change_applies_without_conflict() {
        let result = merge("A\nB\n", "A\nB\n", "A\nB改\n", MergeStrategy::AutoMerge);
        assert!(result.success);
        assert_eq!(result.merged_content, "A\nB改\n");
    }

    #[test]
    fn both_sides_same_change_applies_once() {
        let result = merge("A\nB\n", "A\nNEW\n", "A\nNEW\n", MergeStrategy::AutoMerge);
        assert!(result.success);
        assert_eq!(result.merged_content, "A\nNEW\n");
    }

    #[test]
    fn local_insertion_is_kept() {
        let result = merge("A\nB\n", "A\nA2\nB\n", "A\nB\n", MergeStrategy::AutoMerge);
        assert!(result.success);
        assert_eq!(result.merged_content, "A\nA2\nB\n");
    }

    #[test]
    fn remote_deletion_is_kept() {
        let result = merge("A\nB\nC\n", "A\nB\nC\n", "A\nC\n", MergeStrategy::AutoMerge);
        assert!(result.success);
        assert_eq!(result.merged_content, "A\nC\n");
    }

    #[test]
    fn near_identical_divergence_auto_resolves_to_longer() {
        // Blocks share a long prefix; similarity stays above 0.9.
        let base = "A\nprefix\nB\n";
        let local = "A\nprefixprefixprefixprefix-local\nB\n";
        let remote = "A\nprefixprefixprefixprefix-loc\nB\n";
        let result = merge(base, local, remote, MergeStrategy::AutoMerge);
        assert!(result.success, "expected auto-resolution: {result:?}");
        assert_eq!(result.auto_resolved, 1);
        assert!(result.merged_content.contains("prefixprefixprefixprefix-local"));
    }

    #[test]
    fn empty_side_auto_resolves_to_other() {
        // Local deleted the block, remote rewrote it; remote wins.
        let result = merge("A\nB\nC\n", "A\nC\n", "A\nREWRITE\nC\n", MergeStrategy::AutoMerge);
        assert!(result.success, "expected auto-resolution: {result:?}");
        assert_eq!(result.merged_content, "A\nREWRITE\nC\n");
    }

    #[test]
    fn manual_strategy_never_auto_resolves() {
        let result = merge("A\nB\nC\n", "A\nC\n", "A\nREWRITE\nC\n", MergeStrategy::Manual);
        assert!(!result.success);
        assert_eq!(result.conflicts.len(), 1);
    }

    #[test]
    fn whitespace_only_divergence_picks_local() {
        let result = merge("A\nB\nC\n", "A\n  \nC\n", "A\n\t\nC\n", MergeStrategy::AutoMerge);
        assert!(result.success);
        assert_eq!(result.merged_content, "A\n  \nC\n");
    }

    #[test]
    fn empty_inputs_merge_cleanly() {
        let result = merge("", "", "", MergeStrategy::AutoMerge);
        assert!(result.success);
        assert_eq!(result.merged_content, "");
    }

    #[test]
    fn lcs_pairs_align_expected_lines() {
        let base = line_hashes(&["A", "B", "C"]);
        let side = line_hashes(&["A", "X", "C"]);
        assert_eq!(lcs_pairs(&base, &side), vec![(0, 0), (2, 2)]);
    }

    #[test]
    fn hunks_describe_replacements_insertions_and_deletions() {
        // Replacement of B by X.
        let pairs = vec![(0, 0), (2, 2)];
        assert_eq!(
            hunks(&pairs, 3, 3),
            vec![Hunk {
                base_start: 1,
                base_end: 2,
                side_start: 1,
                side_end: 2
            }]
        );

        // Pure insertion after A.
        let pairs = vec![(0, 0), (1, 2)];
        assert_eq!(
            hunks(&pairs, 2, 3),
            vec![Hunk {
                base_start: 1,
                base_end: 1,
                side_start: 1,
                side_end: 2
            }]
        );
    }
}
