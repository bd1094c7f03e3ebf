//! Minimal glob matching for exclusion patterns.
//!
//! Supports `*` (any run of characters) and `?` (any single character),
//! which covers the shipped exclusion defaults (`*.tmp`, `*.swp`, ...).

/// Matches `name` against `pattern`.
#[must_use]
pub fn glob_match(pattern: &str, name: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let name: Vec<char> = name.chars().collect();
    matches_at(&pattern, &name)
}

fn matches_at(pattern: &[char], name: &[char]) -> bool {
    match pattern.first() {
        None => name.is_empty(),
        Some('*') => {
            // Greedy with backtracking: try every possible span.
            (0..=name.len()).any(|skip| matches_at(&pattern[1..], &name[skip..]))
        }
        Some('?') => !name.is_empty() && matches_at(&pattern[1..], &name[1..]),
        Some(&literal) => {
            name.first() == Some(&literal) && matches_at(&pattern[1..], &name[1..])
        }
    }
}
