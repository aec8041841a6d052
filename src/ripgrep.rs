//! Streaming search over the external `rg` binary
//!
//! Every search runs one `rg` child from the [`ProcessPool`] and one tokio
//! task that reads its output line by line. Parsed matches are pushed into
//! a channel as soon as they are read, so consumers see results while the
//! search is still running.
//!
//! # Termination
//!
//! A stream ends exactly once, with one [`StreamOutcome`]:
//!
//! - **Completed**: `rg` exited and its diagnostics were benign
//! - **LimitReached**: `max_results` matches were emitted; the child is killed
//! - **Cancelled**: [`SearchHandle::cancel`] was called (not an error)
//! - **TimedOut**: the timeout fired; the child is killed and the stream
//!   yields [`SearchError::Timeout`]
//! - **Failed**: unexpected diagnostics or an I/O failure; the stream
//!   yields the error
//!
//! Completed searches with at least one match are written to the
//! [`SmartCache`] with the matched files as dependencies. Cache hits are
//! replayed through the same channel.
//!
//! # Example
//!
//! ```ignore
//! use semfora_search::ripgrep::SearchOptions;
//! use futures_util::StreamExt;
//!
//! let options = SearchOptions::new(r"\bAsyncEnhancedGrep\b", "./src").with_limit(100);
//! let mut stream = engine.search_stream(&options).await?;
//! while let Some(m) = stream.next().await {
//!     let m = m?;
//!     println!("{}:{}:{}", m.file.display(), m.line, m.column);
//! }
//! ```

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use futures_util::{Stream, StreamExt};
use regex::{Regex, RegexBuilder};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::cache::{SetOptions, SmartCache};
use crate::config::EngineConfig;
use crate::error::{Result, SearchError};
use crate::process_pool::{PooledProcess, ProcessPool};
use crate::schema::Match;

/// Diagnostics that mean "nothing to search here" rather than failure
const BENIGN_DIAGNOSTICS: &[&str] = &[
    "No such file or directory",
    "Permission denied",
    "Not a directory",
    "No files were searched",
];

// ============================================================================
// Options
// ============================================================================

/// Options for one search invocation
#[derive(Debug, Clone, PartialEq)]
pub struct SearchOptions {
    /// Regex handed to `rg`
    pub pattern: String,
    /// File or directory to search
    pub path: PathBuf,
    pub case_insensitive: bool,
    /// `rg --type` filters (e.g. "rust", "ts")
    pub file_types: Vec<String>,
    /// Stop after this many matches (engine default when unset)
    pub max_results: Option<usize>,
    /// Kill the search after this long (engine default when unset)
    pub timeout: Option<Duration>,
    /// Search hidden files (engine default when unset)
    pub include_hidden: Option<bool>,
    /// Replaces the engine's excluded directories when set
    pub exclude_dirs: Option<Vec<String>>,
    pub max_depth: Option<usize>,
    /// Consult and fill the result cache
    pub use_cache: bool,
}

impl SearchOptions {
    pub fn new(pattern: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            pattern: pattern.into(),
            path: path.into(),
            case_insensitive: false,
            file_types: Vec::new(),
            max_results: None,
            timeout: None,
            include_hidden: None,
            exclude_dirs: None,
            max_depth: None,
            use_cache: true,
        }
    }

    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = pattern.into();
        self
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = path.into();
        self
    }

    pub fn case_insensitive(mut self, enabled: bool) -> Self {
        self.case_insensitive = enabled;
        self
    }

    pub fn with_file_types(mut self, types: Vec<String>) -> Self {
        self.file_types = types;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.max_results = Some(limit);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_hidden(mut self, hidden: bool) -> Self {
        self.include_hidden = Some(hidden);
        self
    }

    pub fn with_excludes(mut self, dirs: Vec<String>) -> Self {
        self.exclude_dirs = Some(dirs);
        self
    }

    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = Some(depth);
        self
    }

    pub fn without_cache(mut self) -> Self {
        self.use_cache = false;
        self
    }

    /// Cache key: pattern, path, case sensitivity and file types
    pub fn cache_key(&self) -> String {
        let mut types = self.file_types.clone();
        types.sort();
        types.dedup();
        format!(
            "rg:{}\u{0}{}\u{0}{}\u{0}{}",
            self.pattern,
            self.path.display(),
            if self.case_insensitive { "i" } else { "s" },
            types.join(",")
        )
    }
}

// ============================================================================
// Stream types
// ============================================================================

/// How a search stream ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamOutcome {
    Completed,
    LimitReached,
    Cancelled,
    TimedOut,
    Failed,
}

impl StreamOutcome {
    /// Whether the full result set was seen
    pub fn is_complete(&self) -> bool {
        matches!(self, StreamOutcome::Completed)
    }
}

/// Records the terminal outcome; only the first call has any effect
#[derive(Clone)]
struct OutcomeSlot(Arc<watch::Sender<Option<StreamOutcome>>>);

impl OutcomeSlot {
    fn new() -> (Self, watch::Receiver<Option<StreamOutcome>>) {
        let (tx, rx) = watch::channel(None);
        (Self(Arc::new(tx)), rx)
    }

    fn finish(&self, outcome: StreamOutcome) -> bool {
        self.0.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(outcome);
                true
            } else {
                false
            }
        })
    }
}

/// Cloneable control handle for a running search
#[derive(Debug, Clone)]
pub struct SearchHandle {
    cancel: CancellationToken,
    outcome: watch::Receiver<Option<StreamOutcome>>,
}

impl SearchHandle {
    /// Stop the search and kill its process.
    ///
    /// Safe to call any number of times, including after completion; the
    /// outcome is never reported twice.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Terminal outcome, once the search has ended
    pub fn outcome(&self) -> Option<StreamOutcome> {
        *self.outcome.borrow()
    }

    /// Wait for the terminal outcome
    pub async fn finished(&self) -> StreamOutcome {
        let mut rx = self.outcome.clone();
        let outcome = match rx.wait_for(Option::is_some).await {
            Ok(value) => *value,
            Err(_) => None,
        };
        outcome.unwrap_or(StreamOutcome::Failed)
    }
}

/// Live sequence of matches from one search. Finite and not restartable.
pub struct SearchStream {
    rx: mpsc::UnboundedReceiver<Result<Match>>,
    handle: SearchHandle,
    from_cache: bool,
}

impl std::fmt::Debug for SearchStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchStream")
            .field("from_cache", &self.from_cache)
            .field("outcome", &self.handle.outcome())
            .finish()
    }
}

impl SearchStream {
    pub fn handle(&self) -> SearchHandle {
        self.handle.clone()
    }

    /// Shorthand for `handle().cancel()`
    pub fn cancel(&self) {
        self.handle.cancel();
    }

    /// Whether this stream replays a cached result
    pub fn from_cache(&self) -> bool {
        self.from_cache
    }

    pub fn outcome(&self) -> Option<StreamOutcome> {
        self.handle.outcome()
    }
}

impl Stream for SearchStream {
    type Item = Result<Match>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        // Nothing is delivered after cancel, even if already buffered
        if self.handle.is_cancelled() {
            self.rx.close();
            return Poll::Ready(None);
        }
        self.rx.poll_recv(cx)
    }
}

// ============================================================================
// Output parsing
// ============================================================================

/// Parse one `path:line[:column]:text` output line.
///
/// The third field is a column only when it parses as an integer. The
/// column reported by `rg` is 1-based and is converted to a 0-based byte
/// offset; without one it is located with `matcher`. `matcher` also
/// determines the match length, falling back to the rest of the line.
pub fn parse_line(line: &str, matcher: Option<&Regex>) -> Option<Match> {
    let line = line.trim_end_matches(['\n', '\r']);
    let mut parts = line.splitn(3, ':');
    let path = parts.next().filter(|p| !p.is_empty())?;
    let line_number: u64 = parts.next()?.parse().ok()?;
    let rest = parts.next().unwrap_or("");

    let (column, text) = match rest.split_once(':') {
        Some((col, text)) => match col.parse::<u64>() {
            Ok(col) => (Some(col.saturating_sub(1)), text),
            Err(_) => (None, rest),
        },
        None => (None, rest),
    };

    let located = matcher.and_then(|re| locate(re, text, column.map(|c| c as usize)));
    let (column, length) = match (column, located) {
        (Some(col), Some((_, len))) => (col, len),
        (None, Some((start, len))) => (start as u64, len),
        (Some(col), None) => (col, text.len().saturating_sub(col as usize)),
        (None, None) => (0, text.len()),
    };

    Some(Match::new(
        PathBuf::from(path),
        line_number,
        column,
        text.to_string(),
        length,
    ))
}

fn locate(re: &Regex, text: &str, column: Option<usize>) -> Option<(usize, usize)> {
    let start = column.unwrap_or(0);
    if start > text.len() || !text.is_char_boundary(start) {
        return None;
    }
    re.find_at(text, start)
        .filter(|m| column.map_or(true, |col| m.start() == col))
        .map(|m| (m.start(), m.len()))
}

/// Diagnostics left after dropping benign lines; empty means no error
fn unexpected_diagnostics(stderr: &str) -> String {
    stderr
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| !BENIGN_DIAGNOSTICS.iter().any(|benign| line.contains(benign)))
        .collect::<Vec<_>>()
        .join("\n")
}

// ============================================================================
// Engine
// ============================================================================

/// Streaming search engine over the process pool and result cache
pub struct StreamingSearchEngine {
    pool: ProcessPool,
    cache: Arc<SmartCache<Vec<Match>>>,
    config: EngineConfig,
}

impl std::fmt::Debug for StreamingSearchEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingSearchEngine")
            .field("pool", &self.pool)
            .field("config", &self.config)
            .finish()
    }
}

/// Everything the reader task needs, detached from the engine
struct ReadContext {
    pattern: String,
    matcher: Option<Regex>,
    max_results: usize,
    timeout: Duration,
    cache: Option<(Arc<SmartCache<Vec<Match>>>, String)>,
}

impl StreamingSearchEngine {
    pub fn new(pool: ProcessPool, cache: Arc<SmartCache<Vec<Match>>>, config: EngineConfig) -> Self {
        Self {
            pool,
            cache,
            config,
        }
    }

    pub fn pool(&self) -> &ProcessPool {
        &self.pool
    }

    pub fn cache(&self) -> &Arc<SmartCache<Vec<Match>>> {
        &self.cache
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Arguments for `rg`, without the pool's leading arguments
    pub fn build_args(&self, options: &SearchOptions) -> Vec<String> {
        let mut args = vec![
            options.pattern.clone(),
            "--no-heading".to_string(),
            "--line-number".to_string(),
            "--column".to_string(),
            "--no-ignore-parent".to_string(),
        ];

        let excludes = options
            .exclude_dirs
            .as_ref()
            .unwrap_or(&self.config.exclude_dirs);
        for dir in excludes {
            args.push("--glob".to_string());
            args.push(format!("!{}/**", dir));
        }

        args.push("--max-depth".to_string());
        args.push(options.max_depth.unwrap_or(self.config.max_depth).to_string());

        for file_type in &options.file_types {
            args.push("--type".to_string());
            args.push(file_type.clone());
        }
        if options.case_insensitive {
            args.push("-i".to_string());
        }
        if options.include_hidden.unwrap_or(self.config.include_hidden) {
            args.push("--hidden".to_string());
        }

        // Keep paths starting with '-' from being read as flags
        args.push("--".to_string());
        args.push(options.path.display().to_string());
        args
    }

    /// Start a search and return its live match stream.
    ///
    /// Fails up front on an invalid pattern, a destroyed pool or a spawn
    /// failure; everything later arrives through the stream.
    pub async fn search_stream(&self, options: &SearchOptions) -> Result<SearchStream> {
        let matcher = RegexBuilder::new(&options.pattern)
            .case_insensitive(options.case_insensitive)
            .build()
            .map_err(|e| SearchError::InvalidPattern {
                message: e.to_string(),
            })?;

        let max_results = options
            .max_results
            .unwrap_or(self.config.default_max_results)
            .max(1);
        let key = options.cache_key();

        if options.use_cache {
            if let Some(cached) = self.cache.get(&key) {
                tracing::debug!("[SEARCH] cache hit for {:?} ({} matches)", options.pattern, cached.len());
                return Ok(self.replay(cached, max_results));
            }
        }

        let args = self.build_args(options);
        tracing::debug!("[SEARCH] rg {}", args.join(" "));
        let process = self.pool.execute_search(&args).await?;

        let (tx, rx) = mpsc::unbounded_channel();
        let (slot, outcome_rx) = OutcomeSlot::new();
        let cancel = CancellationToken::new();

        let context = ReadContext {
            pattern: options.pattern.clone(),
            matcher: Some(matcher),
            max_results,
            timeout: options.timeout.unwrap_or_else(|| self.config.default_timeout()),
            cache: options
                .use_cache
                .then(|| (Arc::clone(&self.cache), key)),
        };

        tokio::spawn(read_output(process, tx, cancel.clone(), slot, context));

        Ok(SearchStream {
            rx,
            handle: SearchHandle {
                cancel,
                outcome: outcome_rx,
            },
            from_cache: false,
        })
    }

    fn replay(&self, cached: Vec<Match>, max_results: usize) -> SearchStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let (slot, outcome_rx) = OutcomeSlot::new();
        let cancel = CancellationToken::new();
        let yield_between = self.config.replay_yield;

        let token = cancel.clone();
        tokio::spawn(async move {
            let truncated = cached.len() > max_results;
            for m in cached.into_iter().take(max_results) {
                if token.is_cancelled() || tx.send(Ok(m)).is_err() {
                    slot.finish(StreamOutcome::Cancelled);
                    return;
                }
                if yield_between {
                    tokio::task::yield_now().await;
                }
            }
            slot.finish(if truncated {
                StreamOutcome::LimitReached
            } else {
                StreamOutcome::Completed
            });
        });

        SearchStream {
            rx,
            handle: SearchHandle {
                cancel,
                outcome: outcome_rx,
            },
            from_cache: true,
        }
    }

    /// Run a search to completion and collect its matches
    pub async fn search(&self, options: &SearchOptions) -> Result<Vec<Match>> {
        let mut stream = self.search_stream(options).await?;
        let mut matches = Vec::new();
        while let Some(item) = stream.next().await {
            matches.push(item?);
        }
        Ok(matches)
    }

    /// Search every pattern in every path concurrently.
    ///
    /// Failed pairs are logged and map to an empty list.
    pub async fn search_parallel(
        &self,
        patterns: &[String],
        paths: &[PathBuf],
        options: &SearchOptions,
    ) -> HashMap<(String, PathBuf), Vec<Match>> {
        let searches = patterns
            .iter()
            .flat_map(|pattern| paths.iter().map(move |path| (pattern, path)))
            .map(|(pattern, path)| async move {
                let pair_options = options
                    .clone()
                    .with_pattern(pattern.clone())
                    .with_path(path.clone());
                let matches = match self.search(&pair_options).await {
                    Ok(matches) => matches,
                    Err(e) => {
                        tracing::warn!("[SEARCH] {:?} in {:?} failed: {}", pattern, path, e);
                        Vec::new()
                    }
                };
                ((pattern.clone(), path.clone()), matches)
            });

        join_all(searches).await.into_iter().collect()
    }
}

async fn read_output(
    mut process: PooledProcess,
    tx: mpsc::UnboundedSender<Result<Match>>,
    cancel: CancellationToken,
    slot: OutcomeSlot,
    context: ReadContext,
) {
    let started = Instant::now();
    let shutdown = process.shutdown_token().clone();

    let Some(stdout) = process.take_stdout() else {
        let _ = tx.send(Err(SearchError::Search {
            message: "search process has no stdout".to_string(),
        }));
        slot.finish(StreamOutcome::Failed);
        return;
    };
    let stderr_task = process.take_stderr().map(|mut stderr| {
        tokio::spawn(async move {
            let mut text = String::new();
            let _ = stderr.read_to_string(&mut text).await;
            text
        })
    });

    let mut reader = BufReader::new(stdout);
    let mut buf = Vec::new();
    let mut collected: Vec<Match> = Vec::new();
    let mut emitted = 0usize;

    let deadline = tokio::time::sleep(context.timeout);
    tokio::pin!(deadline);

    let outcome = loop {
        buf.clear();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                process.kill().await;
                break StreamOutcome::Cancelled;
            }
            _ = shutdown.cancelled() => {
                process.kill().await;
                let _ = tx.send(Err(SearchError::PoolClosed));
                break StreamOutcome::Failed;
            }
            _ = &mut deadline => {
                process.kill().await;
                let _ = tx.send(Err(SearchError::Timeout {
                    pattern: context.pattern.clone(),
                    elapsed_ms: started.elapsed().as_millis() as u64,
                }));
                break StreamOutcome::TimedOut;
            }
            read = reader.read_until(b'\n', &mut buf) => match read {
                Ok(0) => break StreamOutcome::Completed,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf);
                    let Some(m) = parse_line(&line, context.matcher.as_ref()) else {
                        continue;
                    };
                    if context.cache.is_some() {
                        collected.push(m.clone());
                    }
                    if tx.send(Ok(m)).is_err() {
                        // Receiver dropped: nobody is listening any more
                        process.kill().await;
                        break StreamOutcome::Cancelled;
                    }
                    emitted += 1;
                    if emitted >= context.max_results {
                        process.kill().await;
                        break StreamOutcome::LimitReached;
                    }
                }
                Err(e) => {
                    process.kill().await;
                    let _ = tx.send(Err(SearchError::Io(e)));
                    break StreamOutcome::Failed;
                }
            }
        }
    };

    if outcome != StreamOutcome::Completed {
        tracing::debug!("[SEARCH] {:?} ended: {:?}", context.pattern, outcome);
        drop(process);
        slot.finish(outcome);
        return;
    }

    if let Err(e) = process.wait().await {
        let _ = tx.send(Err(e));
        slot.finish(StreamOutcome::Failed);
        return;
    }
    // Free the slot before the remaining bookkeeping
    drop(process);

    let stderr = match stderr_task {
        Some(task) => task.await.unwrap_or_default(),
        None => String::new(),
    };
    let unexpected = unexpected_diagnostics(&stderr);
    if !unexpected.is_empty() {
        tracing::warn!("[SEARCH] {:?} failed: {}", context.pattern, unexpected);
        let _ = tx.send(Err(SearchError::Search {
            message: unexpected,
        }));
        slot.finish(StreamOutcome::Failed);
        return;
    }

    // A cancel that raced natural completion wins: nothing is cached
    if cancel.is_cancelled() {
        slot.finish(StreamOutcome::Cancelled);
        return;
    }

    if let Some((cache, key)) = context.cache {
        if !collected.is_empty() {
            let files: BTreeSet<PathBuf> = collected.iter().map(|m| m.file.clone()).collect();
            cache.set(
                &key,
                collected,
                SetOptions::new().with_dependencies(files.into_iter().collect()),
            );
        }
    }

    tracing::debug!(
        "[SEARCH] {:?}: {} matches in {:?}",
        context.pattern,
        emitted,
        started.elapsed()
    );
    slot.finish(StreamOutcome::Completed);
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_line_with_column() {
        let re = Regex::new(r"\bFoo\b").unwrap();
        let m = parse_line("src/lib.rs:12:5:pub Foo bar\n", Some(&re)).unwrap();
        assert_eq!(m.file, PathBuf::from("src/lib.rs"));
        assert_eq!(m.line, 12);
        assert_eq!(m.column, 4);
        assert_eq!(m.length, 3);
        assert_eq!(m.text, "pub Foo bar");
        assert_eq!(m.confidence, 1.0);
    }

    #[test]
    fn test_parse_line_without_column() {
        let re = Regex::new("needle").unwrap();
        let m = parse_line("a.txt:3:hay needle: more", Some(&re)).unwrap();
        assert_eq!(m.line, 3);
        assert_eq!(m.column, 4);
        assert_eq!(m.length, 6);
        assert_eq!(m.text, "hay needle: more");
    }

    #[test]
    fn test_parse_line_text_with_colons() {
        let m = parse_line("a.rs:7:1:let x: Foo = y::z;", None).unwrap();
        assert_eq!(m.column, 0);
        assert_eq!(m.text, "let x: Foo = y::z;");
        assert_eq!(m.length, m.text.len());
    }

    #[test]
    fn test_parse_line_rejects_garbage() {
        assert!(parse_line("", None).is_none());
        assert!(parse_line("no colons here", None).is_none());
        assert!(parse_line("file:notanumber:text", None).is_none());
    }

    #[test]
    fn test_parse_line_non_char_boundary() {
        let re = Regex::new("x").unwrap();
        // Column 2 falls inside the two-byte 'é'
        let m = parse_line("f:1:2:éx", Some(&re)).unwrap();
        assert_eq!(m.column, 1);
        assert_eq!(m.length, "éx".len() - 1);
    }

    #[test]
    fn test_benign_diagnostics() {
        assert!(unexpected_diagnostics("").is_empty());
        assert!(unexpected_diagnostics("rg: missing: No such file or directory (os error 2)\n").is_empty());
        assert!(unexpected_diagnostics("rg: /root: Permission denied (os error 13)").is_empty());
        assert!(unexpected_diagnostics("No files were searched, which means ripgrep probably applied a filter you didn't expect.").is_empty());
        assert_eq!(
            unexpected_diagnostics("rg: x: Permission denied\nrg: regex parse error"),
            "rg: regex parse error"
        );
    }

    #[test]
    fn test_cache_key_normalizes_types() {
        let a = SearchOptions::new("Foo", "/repo").with_file_types(vec!["ts".into(), "rust".into()]);
        let b = SearchOptions::new("Foo", "/repo").with_file_types(vec!["rust".into(), "ts".into(), "ts".into()]);
        assert_eq!(a.cache_key(), b.cache_key());
        assert_ne!(a.cache_key(), a.clone().case_insensitive(true).cache_key());
        // Limits do not change what a complete result looks like
        assert_eq!(a.cache_key(), a.clone().with_limit(3).cache_key());
    }

    #[test]
    fn test_outcome_slot_sets_once() {
        let (slot, rx) = OutcomeSlot::new();
        assert!(slot.finish(StreamOutcome::Completed));
        assert!(!slot.finish(StreamOutcome::Cancelled));
        assert_eq!(*rx.borrow(), Some(StreamOutcome::Completed));
    }

    #[cfg(unix)]
    mod process {
        use super::*;
        use crate::config::{CacheConfig, PoolConfig};
        use std::fs;
        use tempfile::TempDir;

        fn fake_engine(dir: &TempDir, body: &str) -> StreamingSearchEngine {
            let script = dir.path().join("fake-rg.sh");
            fs::write(&script, format!("#!/bin/sh\n{}\n", body)).unwrap();
            let pool = ProcessPool::new(&PoolConfig {
                binary: PathBuf::from("sh"),
                leading_args: vec![script.display().to_string()],
                max_processes: 2,
            })
            .unwrap();
            let cache = Arc::new(
                SmartCache::new(CacheConfig {
                    zones: Vec::new(),
                    ..Default::default()
                })
                .unwrap(),
            );
            StreamingSearchEngine::new(pool, cache, EngineConfig::default())
        }

        #[test]
        fn test_build_args() {
            let dir = TempDir::new().unwrap();
            let engine = fake_engine(&dir, "exit 0");
            let options = SearchOptions::new("Foo", "/repo")
                .with_file_types(vec!["rust".into(), "ts".into()])
                .case_insensitive(true)
                .with_hidden(true)
                .with_excludes(vec!["target".into()]);

            let args = engine.build_args(&options);
            assert_eq!(
                args,
                vec![
                    "Foo", "--no-heading", "--line-number", "--column", "--no-ignore-parent",
                    "--glob", "!target/**", "--max-depth", "10", "--type", "rust", "--type", "ts",
                    "-i", "--hidden", "--", "/repo",
                ]
            );
        }

        #[tokio::test]
        async fn test_search_parses_output() {
            let dir = TempDir::new().unwrap();
            let engine = fake_engine(
                &dir,
                "echo 'src/a.rs:1:4:fn Foo() {}'\necho 'src/b.rs:9:1:Foo::new()'",
            );
            let options = SearchOptions::new("Foo", dir.path()).without_cache();
            let matches = engine.search(&options).await.unwrap();

            assert_eq!(matches.len(), 2);
            assert_eq!(matches[0].file, PathBuf::from("src/a.rs"));
            assert_eq!(matches[0].column, 3);
            assert_eq!(matches[0].length, 3);
            assert_eq!(matches[1].line, 9);
            assert_eq!(engine.pool().active(), 0);
        }

        #[tokio::test]
        async fn test_limit_kills_process() {
            let dir = TempDir::new().unwrap();
            let engine = fake_engine(
                &dir,
                "i=1\nwhile true; do echo \"f.rs:$i:1:Foo\"; i=$((i+1)); sleep 0.01; done",
            );
            let options = SearchOptions::new("Foo", dir.path()).with_limit(3);

            let mut stream = engine.search_stream(&options).await.unwrap();
            let mut count = 0;
            while let Some(item) = stream.next().await {
                item.unwrap();
                count += 1;
            }
            assert_eq!(count, 3);
            assert_eq!(stream.handle().finished().await, StreamOutcome::LimitReached);
            assert_eq!(engine.pool().active(), 0);
            // Partial results are never cached
            assert!(engine.cache().is_empty());
        }

        #[tokio::test]
        async fn test_timeout_is_error() {
            let dir = TempDir::new().unwrap();
            let engine = fake_engine(&dir, "sleep 5");
            let options = SearchOptions::new("Foo", dir.path()).with_timeout(Duration::from_millis(100));

            let started = Instant::now();
            let err = engine.search(&options).await.unwrap_err();
            assert!(matches!(err, SearchError::Timeout { .. }));
            assert!(started.elapsed() < Duration::from_secs(3));
        }

        #[tokio::test]
        async fn test_cancel_is_idempotent() {
            let dir = TempDir::new().unwrap();
            let engine = fake_engine(&dir, "echo 'f.rs:1:1:Foo'\nsleep 5\necho 'f.rs:2:1:Foo'");
            let options = SearchOptions::new("Foo", dir.path());

            let mut stream = engine.search_stream(&options).await.unwrap();
            let first = stream.next().await.unwrap().unwrap();
            assert_eq!(first.line, 1);

            let handle = stream.handle();
            handle.cancel();
            handle.cancel();
            assert!(stream.next().await.is_none());
            assert_eq!(handle.finished().await, StreamOutcome::Cancelled);
            handle.cancel();
            assert_eq!(handle.outcome(), Some(StreamOutcome::Cancelled));
        }

        #[tokio::test]
        async fn test_cancel_after_completion_keeps_outcome() {
            let dir = TempDir::new().unwrap();
            let engine = fake_engine(&dir, "echo 'f.rs:1:1:Foo'");
            let options = SearchOptions::new("Foo", dir.path()).without_cache();

            let mut stream = engine.search_stream(&options).await.unwrap();
            while stream.next().await.is_some() {}
            let handle = stream.handle();
            assert_eq!(handle.finished().await, StreamOutcome::Completed);
            handle.cancel();
            handle.cancel();
            assert_eq!(handle.outcome(), Some(StreamOutcome::Completed));
        }

        #[tokio::test]
        async fn test_benign_diagnostics_are_empty() {
            let dir = TempDir::new().unwrap();
            let engine = fake_engine(
                &dir,
                "echo 'rg: nowhere: No such file or directory (os error 2)' >&2\nexit 2",
            );
            let options = SearchOptions::new("Foo", dir.path().join("nowhere"));
            assert!(engine.search(&options).await.unwrap().is_empty());
        }

        #[tokio::test]
        async fn test_unexpected_diagnostics_are_errors() {
            let dir = TempDir::new().unwrap();
            let engine = fake_engine(&dir, "echo 'rg: something broke' >&2\nexit 2");
            let options = SearchOptions::new("Foo", dir.path());
            let err = engine.search(&options).await.unwrap_err();
            assert!(matches!(err, SearchError::Search { .. }));
        }

        #[tokio::test]
        async fn test_invalid_pattern_rejected_before_spawn() {
            let dir = TempDir::new().unwrap();
            let engine = fake_engine(&dir, "exit 0");
            let err = engine
                .search(&SearchOptions::new("Foo(", dir.path()))
                .await
                .unwrap_err();
            assert!(matches!(err, SearchError::InvalidPattern { .. }));
            assert_eq!(engine.pool().stats().spawned, 0);
        }

        #[tokio::test]
        async fn test_completed_results_are_cached_and_replayed() {
            let dir = TempDir::new().unwrap();
            let file = dir.path().join("a.rs");
            fs::write(&file, "fn Foo() {}\n").unwrap();
            let engine = fake_engine(&dir, &format!("echo '{}:1:4:fn Foo() {{}}'", file.display()));
            let options = SearchOptions::new("Foo", dir.path());

            let first = engine.search(&options).await.unwrap();
            assert_eq!(first.len(), 1);

            let mut stream = engine.search_stream(&options).await.unwrap();
            assert!(stream.from_cache());
            let mut replayed = Vec::new();
            while let Some(item) = stream.next().await {
                replayed.push(item.unwrap());
            }
            assert_eq!(replayed, first);
            assert_eq!(engine.pool().stats().spawned, 1);
            assert_eq!(engine.cache().stats().hits, 1);

            // Rewriting the matched file drops the cached result
            tokio::time::sleep(Duration::from_millis(100)).await;
            fs::write(&file, "fn Bar() {}\n").unwrap();
            let stream = engine.search_stream(&options).await.unwrap();
            assert!(!stream.from_cache());
        }

        #[tokio::test]
        async fn test_search_parallel() {
            let dir = TempDir::new().unwrap();
            let engine = fake_engine(&dir, "echo \"hit.rs:1:1:$1\"");
            let patterns = vec!["Alpha".to_string(), "Beta".to_string()];
            let paths = vec![dir.path().join("one"), dir.path().join("two")];

            let results = engine
                .search_parallel(&patterns, &paths, &SearchOptions::new("", ".").without_cache())
                .await;

            assert_eq!(results.len(), 4);
            let alpha = &results[&("Alpha".to_string(), paths[0].clone())];
            assert_eq!(alpha.len(), 1);
            assert_eq!(alpha[0].text, "Alpha");
        }

        #[tokio::test]
        async fn test_search_parallel_failures_are_empty() {
            let dir = TempDir::new().unwrap();
            let engine = fake_engine(&dir, "echo 'rg: exploded' >&2\nexit 2");
            let patterns = vec!["Alpha".to_string()];
            let paths = vec![dir.path().to_path_buf()];
            let results = engine
                .search_parallel(&patterns, &paths, &SearchOptions::new("", "."))
                .await;
            assert!(results[&("Alpha".to_string(), paths[0].clone())].is_empty());
        }
    }
}
