//! Custom assertions for integration tests

use std::path::Path;

use semfora_search::{EnhancedMatches, Match};

/// Assert that some match in `matches` points at `file` (relative to `root`)
pub fn assert_has_file(matches: &[Match], root: &Path, file: &str) {
    let expected = root.join(file);
    assert!(
        matches.iter().any(|m| m.file == expected),
        "Expected a match in {} but got:\n{}",
        expected.display(),
        describe(matches)
    );
}

/// Assert that no match in `result` points at `file` (relative to `root`)
pub fn assert_no_file(result: &EnhancedMatches, root: &Path, file: &str) {
    let unexpected = root.join(file);
    assert!(
        !result.files.contains(&unexpected),
        "Expected no match in {} but got files {:?}",
        unexpected.display(),
        result.files
    );
}

/// Assert that two results carry the same buckets and confidence
pub fn assert_same_result(a: &EnhancedMatches, b: &EnhancedMatches) {
    assert_eq!(a.exact, b.exact, "exact buckets differ");
    assert_eq!(a.fuzzy, b.fuzzy, "fuzzy buckets differ");
    assert_eq!(a.conceptual, b.conceptual, "conceptual buckets differ");
    assert_eq!(a.confidence, b.confidence, "confidence differs");
}

/// One line per match, for failure messages
pub fn describe(matches: &[Match]) -> String {
    matches
        .iter()
        .map(|m| format!("  {}:{}:{} {}", m.file.display(), m.line, m.column, m.text))
        .collect::<Vec<_>>()
        .join("\n")
}
