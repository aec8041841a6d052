//! Bounded pool of external search processes
//!
//! At most `max_processes` children run at once. Callers beyond the bound
//! suspend in FIFO order (tokio's semaphore is fair) until a slot frees.
//! A slot is held by the returned [`PooledProcess`] and released when it is
//! dropped, which the engine does right after the child exits or is killed.
//!
//! `destroy()` closes the semaphore, so queued callers fail with
//! [`SearchError::PoolClosed`], and cancels the pool's shutdown token, which
//! every active process observes while being read or waited on.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::config::PoolConfig;
use crate::error::{Result, SearchError};

/// Snapshot of pool activity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub max_processes: usize,
    pub active: usize,
    pub queued: usize,
    pub spawned: u64,
    pub failed: u64,
}

struct PoolInner {
    binary: PathBuf,
    leading_args: Vec<String>,
    max_processes: usize,
    slots: Arc<Semaphore>,
    shutdown: CancellationToken,
    active: AtomicUsize,
    queued: AtomicUsize,
    spawned: AtomicU64,
    failed: AtomicU64,
}

/// Bounded-concurrency launcher for the external search binary
#[derive(Clone)]
pub struct ProcessPool {
    inner: Arc<PoolInner>,
}

impl std::fmt::Debug for ProcessPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessPool")
            .field("binary", &self.inner.binary)
            .field("stats", &self.stats())
            .finish()
    }
}

impl ProcessPool {
    /// Create a pool for the configured binary.
    ///
    /// Fails with [`SearchError::BinaryUnavailable`] when the binary cannot
    /// be located or is not executable; callers should treat that as fatal.
    pub fn new(config: &PoolConfig) -> Result<Self> {
        let binary = which::which(&config.binary).map_err(|e| SearchError::BinaryUnavailable {
            binary: config.binary.display().to_string(),
            message: e.to_string(),
        })?;

        if config.max_processes == 0 {
            return Err(SearchError::Config {
                message: "pool.max_processes must be at least 1".to_string(),
            });
        }

        tracing::debug!(
            "Process pool for {} with {} slots",
            binary.display(),
            config.max_processes
        );

        Ok(Self {
            inner: Arc::new(PoolInner {
                binary,
                leading_args: config.leading_args.clone(),
                max_processes: config.max_processes,
                slots: Arc::new(Semaphore::new(config.max_processes)),
                shutdown: CancellationToken::new(),
                active: AtomicUsize::new(0),
                queued: AtomicUsize::new(0),
                spawned: AtomicU64::new(0),
                failed: AtomicU64::new(0),
            }),
        })
    }

    /// Resolved path of the configured search binary
    pub fn binary(&self) -> &Path {
        &self.inner.binary
    }

    /// Arguments always placed before the search arguments
    pub fn leading_args(&self) -> &[String] {
        &self.inner.leading_args
    }

    /// Run `binary args...` once a slot is free.
    ///
    /// Suspends while the pool is at capacity. Spawn failures (binary
    /// missing, not executable) are returned as errors and free the slot.
    pub async fn execute(&self, binary: &Path, args: &[String]) -> Result<PooledProcess> {
        let permit = self.acquire().await?;

        let mut cmd = Command::new(binary);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                self.inner.failed.fetch_add(1, Ordering::Relaxed);
                let binary = binary.display().to_string();
                return Err(match e.kind() {
                    std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                        SearchError::BinaryUnavailable {
                            binary,
                            message: e.to_string(),
                        }
                    }
                    _ => SearchError::Spawn {
                        binary,
                        message: e.to_string(),
                    },
                });
            }
        };

        self.inner.spawned.fetch_add(1, Ordering::Relaxed);
        self.inner.active.fetch_add(1, Ordering::SeqCst);

        Ok(PooledProcess {
            child,
            shutdown: self.inner.shutdown.child_token(),
            _permit: permit,
            pool: Arc::clone(&self.inner),
        })
    }

    /// Run the configured binary with the leading arguments prepended
    pub async fn execute_search(&self, args: &[String]) -> Result<PooledProcess> {
        let mut full_args = self.inner.leading_args.clone();
        full_args.extend_from_slice(args);
        let binary = self.inner.binary.clone();
        self.execute(&binary, &full_args).await
    }

    async fn acquire(&self) -> Result<OwnedSemaphorePermit> {
        if self.inner.shutdown.is_cancelled() {
            return Err(SearchError::PoolClosed);
        }

        let _queued = QueueGuard::new(&self.inner.queued);
        let slots = Arc::clone(&self.inner.slots);

        tokio::select! {
            permit = slots.acquire_owned() => permit.map_err(|_| SearchError::PoolClosed),
            _ = self.inner.shutdown.cancelled() => Err(SearchError::PoolClosed),
        }
    }

    /// Terminate all active processes and reject every queued caller.
    /// Intended for shutdown only; the pool is unusable afterwards.
    pub fn destroy(&self) {
        tracing::debug!("Destroying process pool ({} active)", self.active());
        self.inner.slots.close();
        self.inner.shutdown.cancel();
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Number of running processes
    pub fn active(&self) -> usize {
        self.inner.active.load(Ordering::SeqCst)
    }

    /// Number of callers waiting for a slot
    pub fn queued(&self) -> usize {
        self.inner.queued.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            max_processes: self.inner.max_processes,
            active: self.active(),
            queued: self.queued(),
            spawned: self.inner.spawned.load(Ordering::Relaxed),
            failed: self.inner.failed.load(Ordering::Relaxed),
        }
    }
}

struct QueueGuard<'a>(&'a AtomicUsize);

impl<'a> QueueGuard<'a> {
    fn new(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for QueueGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A running child holding one pool slot
pub struct PooledProcess {
    child: Child,
    shutdown: CancellationToken,
    _permit: OwnedSemaphorePermit,
    pool: Arc<PoolInner>,
}

impl PooledProcess {
    /// OS process id, if the child has not been reaped yet
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.child.stderr.take()
    }

    /// Token cancelled when the owning pool is destroyed
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Forcibly terminate the child and reap it
    pub async fn kill(&mut self) {
        if let Err(e) = self.child.kill().await {
            tracing::debug!("kill of search process failed: {}", e);
        }
    }

    /// Wait for exit; killed and reported as [`SearchError::PoolClosed`]
    /// if the pool is destroyed first.
    pub async fn wait(&mut self) -> Result<ExitStatus> {
        tokio::select! {
            status = self.child.wait() => Ok(status?),
            _ = self.shutdown.cancelled() => {
                self.kill().await;
                Err(SearchError::PoolClosed)
            }
        }
    }
}

impl Drop for PooledProcess {
    fn drop(&mut self) {
        self.pool.active.fetch_sub(1, Ordering::SeqCst);
    }
}

// ============================================================================
// Tests
// ============================================================================
