//! TestRepo builder for integration testing
//!
//! Creates throwaway source trees, optionally under git, and builds search
//! configurations pointed at them.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use semfora_search::{SearchConfig, SearchQuery};
use tempfile::TempDir;

/// Builder for creating test repository structures
pub struct TestRepo {
    dir: TempDir,
}

impl TestRepo {
    /// Create a new empty test repository
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("Failed to create temp dir"),
        }
    }

    /// Get the path to the test repository root
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Absolute path of a file in the repository
    pub fn file(&self, relative_path: &str) -> PathBuf {
        self.dir.path().join(relative_path)
    }

    /// Add a source file with the given content
    pub fn add_file(&self, relative_path: &str, content: &str) -> &Self {
        let full_path = self.dir.path().join(relative_path);
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).expect("Failed to create parent dirs");
        }
        fs::write(&full_path, content).expect("Failed to write file");
        self
    }

    /// Rewrite a file after a pause long enough for its mtime to move past
    /// anything cached before the call
    pub fn rewrite_file(&self, relative_path: &str, content: &str) -> &Self {
        std::thread::sleep(Duration::from_millis(100));
        self.add_file(relative_path, content)
    }

    /// Add a TypeScript function
    pub fn add_ts_function(&self, relative_path: &str, name: &str, body: &str) -> &Self {
        self.add_file(
            relative_path,
            &format!("export function {}() {{\n  {}\n}}\n", name, body),
        )
    }

    /// Add a Rust function
    pub fn add_rs_function(&self, relative_path: &str, name: &str, body: &str) -> &Self {
        self.add_file(
            relative_path,
            &format!("pub fn {}() {{\n    {}\n}}\n", name, body),
        )
    }

    /// Create a small TypeScript service with callers and a test
    pub fn with_user_service(&self) -> &Self {
        self.add_ts_function("src/users.ts", "getUser", "return db.find('user');")
            .add_file(
                "src/handler.ts",
                "import { getUser } from './users';\n\nexport const handle = () => getUser();\n",
            )
            .add_ts_function("src/admin.ts", "getUserById", "return getUser();")
            .add_file(
                "tests/users.test.ts",
                "import { getUser } from '../src/users';\n\ntest('getUser', () => getUser());\n",
            )
    }

    /// Initialize as a git repository
    pub fn init_git(&self) -> &Self {
        self.git(&["init"]);
        self.git(&["config", "user.email", "test@test.com"]);
        self.git(&["config", "user.name", "Test User"]);
        self
    }

    /// Create a git commit with all files
    pub fn commit(&self, message: &str) -> &Self {
        self.git(&["add", "-A"]);
        self.git(&["commit", "--allow-empty", "-m", message]);
        self
    }

    fn git(&self, args: &[&str]) {
        Command::new("git")
            .current_dir(self.path())
            .args(args)
            .output()
            .expect("Failed to run git");
    }

    /// Default configuration without git awareness or background sweeps
    pub fn config(&self) -> SearchConfig {
        let mut config = SearchConfig::default();
        config.cache.git_aware = false;
        config.cache.maintenance_interval_ms = 0;
        config
    }

    /// Query rooted at this repository
    pub fn query(&self, identifier: &str) -> SearchQuery {
        SearchQuery::new(identifier, self.path())
    }
}

impl Default for TestRepo {
    fn default() -> Self {
        Self::new()
    }
}
