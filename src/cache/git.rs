//! Repository HEAD watching
//!
//! A checkout, merge or rebase can rewrite any number of files at once, so
//! instead of trusting per-file invalidation the cache is cleared entirely
//! once HEAD has settled.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{RecommendedWatcher, RecursiveMode};
use notify_debouncer_mini::{new_debouncer, DebounceEventResult, Debouncer};

use crate::error::{Result, SearchError};

/// Locate the HEAD file of the repository containing `start`.
///
/// Walks parent directories looking for `.git`. A `.git` file (worktrees,
/// submodules) is followed through its `gitdir:` line.
pub fn find_git_head(start: &Path) -> Option<PathBuf> {
    let start = start.canonicalize().unwrap_or_else(|_| start.to_path_buf());

    for dir in start.ancestors() {
        let dot_git = dir.join(".git");
        if dot_git.is_dir() {
            let head = dot_git.join("HEAD");
            return head.is_file().then_some(head);
        }
        if dot_git.is_file() {
            let content = fs::read_to_string(&dot_git).ok()?;
            let gitdir = content
                .lines()
                .find_map(|line| line.strip_prefix("gitdir:"))
                .map(str::trim)?;
            let gitdir = if Path::new(gitdir).is_absolute() {
                PathBuf::from(gitdir)
            } else {
                dir.join(gitdir)
            };
            let head = gitdir.join("HEAD");
            return head.is_file().then_some(head);
        }
    }

    None
}

/// Debounced watch on a repository HEAD file
pub struct GitHeadWatcher {
    head: PathBuf,
    _debouncer: Debouncer<RecommendedWatcher>,
}

impl std::fmt::Debug for GitHeadWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHeadWatcher")
            .field("head", &self.head)
            .finish()
    }
}

impl GitHeadWatcher {
    /// Watch `head`; `on_change` runs once changes have been quiet for `settle`
    pub fn start<F>(head: &Path, settle: Duration, on_change: F) -> Result<Self>
    where
        F: Fn() + Send + 'static,
    {
        let git_dir = head
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| SearchError::Watch {
                message: format!("{} has no parent directory", head.display()),
            })?;

        let target = head.to_path_buf();
        let mut debouncer = new_debouncer(settle, move |result: DebounceEventResult| match result {
            Ok(events) => {
                if events.iter().any(|event| event.path == target) {
                    tracing::info!("[GIT] HEAD changed, clearing search cache");
                    on_change();
                }
            }
            Err(e) => tracing::warn!("[GIT] HEAD watch error: {:?}", e),
        })
        .map_err(|e| SearchError::Watch {
            message: e.to_string(),
        })?;

        // HEAD is replaced through HEAD.lock + rename, so watch the git dir
        debouncer
            .watcher()
            .watch(&git_dir, RecursiveMode::NonRecursive)
            .map_err(|e| SearchError::Watch {
                message: e.to_string(),
            })?;

        Ok(Self {
            head: head.to_path_buf(),
            _debouncer: debouncer,
        })
    }

    pub fn head(&self) -> &Path {
        &self.head
    }
}
