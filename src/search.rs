//! Path classification for search results
//!
//! Used to drop matches in test files when a query excludes tests, and to
//! label matches with their language in CLI output.

use std::path::Path;

use crate::schema::Match;

/// Map a file path to its programming language based on extension
///
/// Returns `None` for unknown extensions.
pub fn lang_from_extension(path: &Path) -> Option<&'static str> {
    let ext = path.extension().and_then(|e| e.to_str())?;

    let lang = match ext.to_lowercase().as_str() {
        "rs" => "rust",
        "py" | "pyi" | "pyw" => "python",
        "js" | "mjs" | "cjs" | "jsx" => "javascript",
        "ts" | "mts" | "cts" | "tsx" => "typescript",
        "go" => "go",
        "java" => "java",
        "kt" | "kts" => "kotlin",
        "c" | "h" => "c",
        "cpp" | "cc" | "cxx" | "hpp" | "hh" | "hxx" => "cpp",
        "cs" => "csharp",
        "rb" => "ruby",
        "php" => "php",
        "swift" => "swift",
        "scala" | "sc" => "scala",
        "sh" | "bash" | "zsh" => "shell",
        "sql" => "sql",
        "html" | "htm" => "html",
        "css" | "scss" | "sass" => "css",
        "json" => "json",
        "yaml" | "yml" => "yaml",
        "toml" => "toml",
        "md" | "markdown" => "markdown",
        "vue" => "vue",
        "svelte" => "svelte",
        _ => return None,
    };

    Some(lang)
}

/// Check if a file path appears to be a test file
///
/// Detects common test file patterns across multiple languages:
/// - Any file under `tests/`, `test/`, `__tests__/` or `spec/`
/// - Rust: `*_test.rs`, `test_*.rs`
/// - TypeScript/JavaScript: `*.test.ts`, `*.spec.ts`
/// - Python: `test_*.py`, `*_test.py`, `conftest.py`
/// - Go: `*_test.go`
/// - Java/Kotlin: `*Test.java`, `*Tests.kt`
///
/// # Example
///
/// ```
/// use std::path::Path;
/// use semfora_search::search::is_test_file;
///
/// assert!(is_test_file(Path::new("src/lib_test.rs")));
/// assert!(is_test_file(Path::new("tests/integration.rs")));
/// assert!(!is_test_file(Path::new("src/lib.rs")));
/// ```
pub fn is_test_file(path: &Path) -> bool {
    let normalized = path.to_string_lossy().to_lowercase().replace('\\', "/");
    let original_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    let file_name = original_name.to_lowercase();

    let in_test_dir = ["tests/", "test/", "__tests__/", "spec/"]
        .iter()
        .any(|dir| normalized.starts_with(dir) || normalized.contains(&format!("/{}", dir)));
    if in_test_dir {
        return true;
    }

    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
        return false;
    };

    match ext.to_lowercase().as_str() {
        "rs" => file_name.ends_with("_test.rs") || file_name.starts_with("test_"),
        "ts" | "tsx" | "js" | "jsx" | "mts" | "mjs" => {
            file_name.contains(".test.")
                || file_name.contains(".spec.")
                || file_name.starts_with("test_")
                || file_name.starts_with("test.")
        }
        "py" => {
            file_name.starts_with("test_")
                || file_name.ends_with("_test.py")
                || file_name == "conftest.py"
        }
        "go" => file_name.ends_with("_test.go"),
        // Java conventions are case sensitive
        "java" | "kt" | "kts" => {
            let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("");
            stem.ends_with("Test") || stem.ends_with("Tests") || file_name.starts_with("test_")
        }
        "c" | "cpp" | "cc" | "cxx" => {
            let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("");
            file_name.starts_with("test_") || stem.ends_with("_test")
        }
        _ => false,
    }
}

/// Drop matches located in test files
pub fn without_tests(matches: Vec<Match>) -> Vec<Match> {
    matches.into_iter().filter(|m| !is_test_file(&m.file)).collect()
}

// ============================================================================
// Tests
// ============================================================================
