//! Bounded title similarity for container reconciliation.
//!
//! Titles are normalized (lowercase, alphanumerics and spaces only, collapsed
//! whitespace, leading article dropped) and compared with a weighted mix of
//! Jaro-Winkler and normalized Levenshtein. Scores lie in `[0.0, 1.0]`.

use strsim::{jaro_winkler, normalized_levenshtein};

/// Normalize a title for comparison.
#[must_use]
pub fn normalize_title(title: &str) -> String {
    let cleaned: String = title
        .chars()
        .map(|c| {
            if c.is_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                ' '
            }
        })
        .collect::<String>()
        .to_lowercase();
    let collapsed = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");

    for prefix in ["the ", "a ", "an "] {
        if let Some(rest) = collapsed.strip_prefix(prefix) {
            return rest.to_string();
        }
    }
    collapsed
}

/// Similarity of two titles after normalization.
///
/// Returns `0.0` when either title normalizes to nothing.
#[must_use]
pub fn title_similarity(a: &str, b: &str) -> f64 {
    let a = normalize_title(a);
    let b = normalize_title(b);
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a == b {
        return 1.0;
    }
    jaro_winkler(&a, &b) * 0.6 + normalized_levenshtein(&a, &b) * 0.4
}

/// Whether two optional container titles agree at `threshold`.
///
/// A missing title carries no evidence against the match, so only two
/// present titles can veto it.
#[must_use]
pub fn titles_agree(a: Option<&str>, b: Option<&str>, threshold: f64) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => title_similarity(a, b) >= threshold,
        _ => true,
    }
}
