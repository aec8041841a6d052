//! Multi-strategy identifier search
//!
//! [`SearchOrchestrator::process`] answers "where is this symbol":
//!
//! 1. result cache: a hit is returned immediately
//! 2. negative filter: queries recently confirmed empty return immediately
//! 3. fast cascade: exact, prefix, suffix, case-insensitive; stops at the
//!    first strategy with matches
//! 4. full strategy set: only when every cascade strategy errored
//! 5. dedup per bucket, aggregate confidence, cache / filter updates
//!
//! A query never fails: strategy errors are logged and the caller always
//! receives a well-formed (possibly empty) [`EnhancedMatches`]. Errors that
//! no later strategy can recover from (closed pool, missing binary) end the
//! query at once and skip the full set.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

use crate::cache::{CacheStats, SetOptions, SmartCache, TracingObserver};
use crate::config::{CacheConfig, OrchestratorConfig, SearchConfig};
use crate::error::Result;
use crate::negative::NegativeFilter;
use crate::process_pool::{PoolStats, ProcessPool};
use crate::ripgrep::{SearchOptions, StreamingSearchEngine};
use crate::schema::{EnhancedMatches, Match, SearchQuery, SearchStrategy};
use crate::search::without_tests;
use crate::strategy::{fast_cascade, full_set};

/// `tools_used` tag of results answered by the negative filter
pub const NEGATIVE_FILTER_TOOL: &str = "negative_filter";
/// `tools_used` tag of results answered by the result cache
pub const RESULT_CACHE_TOOL: &str = "result_cache";

/// Snapshot of orchestrator activity
#[derive(Debug, Clone, Default, Serialize)]
pub struct OrchestratorStats {
    pub queries: u64,
    pub cache_hits: u64,
    pub filter_hits: u64,
    /// Queries whose whole fast cascade errored
    pub cascade_failures: u64,
    /// Queries abandoned on a non-transient error
    pub fatal_failures: u64,
    pub negative_entries: usize,
    pub pool: PoolStats,
    pub search_cache: CacheStats,
    pub result_cache: CacheStats,
}

#[derive(Debug, Default)]
struct QueryCounters {
    queries: u64,
    cache_hits: u64,
    filter_hits: u64,
    cascade_failures: u64,
    fatal_failures: u64,
}

/// How a sequence of strategies went
#[derive(Debug, Default, Clone, Copy)]
struct PassReport {
    attempted: usize,
    errors: usize,
    /// Stopped on an error that would fail every later strategy too
    fatal: bool,
}

impl PassReport {
    /// Every attempted strategy errored (as opposed to coming back empty)
    fn all_failed(&self) -> bool {
        self.attempted > 0 && self.errors == self.attempted
    }
}

/// Per-identifier query counts, bounded by evicting the rarest identifier
#[derive(Debug)]
struct QueryFrequency {
    counts: HashMap<String, u64>,
    capacity: usize,
}

impl QueryFrequency {
    fn new(capacity: usize) -> Self {
        Self {
            counts: HashMap::new(),
            capacity,
        }
    }

    fn record(&mut self, identifier: &str) {
        if let Some(count) = self.counts.get_mut(identifier) {
            *count += 1;
            return;
        }
        if self.capacity == 0 {
            return;
        }
        if self.counts.len() >= self.capacity {
            let rarest = self
                .counts
                .iter()
                .min_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
                .map(|(id, _)| id.clone());
            if let Some(rarest) = rarest {
                self.counts.remove(&rarest);
            }
        }
        self.counts.insert(identifier.to_string(), 1);
    }

    fn get(&self, identifier: &str) -> u64 {
        self.counts.get(identifier).copied().unwrap_or(0)
    }

    fn top(&self, n: usize) -> Vec<(String, u64)> {
        let mut counts: Vec<(String, u64)> = self
            .counts
            .iter()
            .map(|(id, count)| (id.clone(), *count))
            .collect();
        counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        counts.truncate(n);
        counts
    }

    fn len(&self) -> usize {
        self.counts.len()
    }
}

/// Composes the process pool, streaming engine, caches and negative filter
pub struct SearchOrchestrator {
    config: OrchestratorConfig,
    engine: StreamingSearchEngine,
    results: SmartCache<EnhancedMatches>,
    negative: Mutex<NegativeFilter>,
    frequency: Mutex<QueryFrequency>,
    counters: Mutex<QueryCounters>,
}

impl std::fmt::Debug for SearchOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchOrchestrator")
            .field("config", &self.config)
            .field("engine", &self.engine)
            .finish()
    }
}

impl SearchOrchestrator {
    /// Build the full stack from configuration.
    ///
    /// Fails when the search binary is unavailable or the cache zones are
    /// invalid; both are fatal at startup.
    pub fn new(config: &SearchConfig) -> Result<Self> {
        let pool = ProcessPool::new(&config.pool)?;
        let search_cache = Arc::new(SmartCache::new(config.cache.clone())?);
        let engine = StreamingSearchEngine::new(pool, search_cache, config.engine.clone());
        let orchestrator = Self::with_engine(engine, config.orchestrator.clone(), &config.cache)?;

        if config.cache.git_aware {
            match std::env::current_dir() {
                Ok(root) => {
                    orchestrator.watch_repository(&root);
                }
                Err(e) => tracing::warn!("[ORCHESTRATOR] git watch skipped: {}", e),
            }
        }

        Ok(orchestrator)
    }

    /// Build on top of an existing engine
    pub fn with_engine(
        engine: StreamingSearchEngine,
        config: OrchestratorConfig,
        cache: &CacheConfig,
    ) -> Result<Self> {
        let results = SmartCache::new(CacheConfig {
            max_size: config.result_cache_size,
            default_ttl_ms: config.result_cache_ttl_ms,
            ..cache.clone()
        })?;

        if cache.enable_metrics {
            results.add_observer(Arc::new(TracingObserver));
            engine.cache().add_observer(Arc::new(TracingObserver));
        }

        let negative = NegativeFilter::new(
            config.negative_capacity,
            Duration::from_millis(config.negative_ttl_ms),
        );

        let frequency = QueryFrequency::new(config.frequency_capacity);

        Ok(Self {
            config,
            engine,
            results,
            negative: Mutex::new(negative),
            frequency: Mutex::new(frequency),
            counters: Mutex::new(QueryCounters::default()),
        })
    }

    pub fn engine(&self) -> &StreamingSearchEngine {
        &self.engine
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Clear both cache layers whenever the HEAD of the repository
    /// containing `root` moves. Returns whether a repository was found.
    pub fn watch_repository(&self, root: &Path) -> bool {
        let watched = [
            self.engine.cache().watch_git_head(root),
            self.results.watch_git_head(root),
        ];
        let mut found = false;
        for outcome in watched {
            match outcome {
                Ok(true) => found = true,
                Ok(false) => {}
                Err(e) => tracing::warn!("[ORCHESTRATOR] git watch failed: {}", e),
            }
        }
        found
    }

    /// Locate an identifier. Never fails; errors degrade to fewer matches.
    pub async fn process(&self, query: &SearchQuery) -> EnhancedMatches {
        let started = Instant::now();
        self.counters.lock().queries += 1;
        self.frequency.lock().record(&query.identifier);

        if query.identifier.trim().is_empty() {
            let mut empty = EnhancedMatches::new();
            empty.search_time = started.elapsed();
            return empty;
        }

        let key = query_key(query);

        if let Some(mut cached) = self.results.get(&key) {
            self.counters.lock().cache_hits += 1;
            cached.record_tool(RESULT_CACHE_TOOL);
            cached.search_time = started.elapsed();
            tracing::debug!("[ORCHESTRATOR] {} answered from cache", query.identifier);
            return cached;
        }

        if self.config.negative_filter && self.negative.lock().contains(&key, Instant::now()) {
            self.counters.lock().filter_hits += 1;
            let mut empty = EnhancedMatches::new();
            empty.record_tool(NEGATIVE_FILTER_TOOL);
            empty.search_time = started.elapsed();
            tracing::debug!("[ORCHESTRATOR] {} known absent", query.identifier);
            return empty;
        }

        let mut result = EnhancedMatches::new();
        let cascade = self.run_cascade(query, &mut result).await;

        let complete = if cascade.fatal {
            self.counters.lock().fatal_failures += 1;
            tracing::warn!(
                "[ORCHESTRATOR] search for {} abandoned after a non-transient error",
                query.identifier
            );
            false
        } else if cascade.all_failed() {
            self.counters.lock().cascade_failures += 1;
            tracing::warn!(
                "[ORCHESTRATOR] fast cascade failed for {}, running full strategy set",
                query.identifier
            );
            let full = self.run_full_set(query, &mut result).await;
            if full.fatal {
                self.counters.lock().fatal_failures += 1;
            }
            full.errors == 0
        } else {
            cascade.errors == 0
        };

        result.dedup();
        result.compute_confidence();
        result.search_time = started.elapsed();

        if !result.is_empty() {
            self.results.set(
                &key,
                result.clone(),
                SetOptions::new().with_dependencies(result.dependency_paths()),
            );
            self.negative.lock().remove(&key);
        } else if self.config.negative_filter && complete {
            self.negative.lock().record(&key, Instant::now());
        }

        tracing::debug!(
            "[ORCHESTRATOR] {}: {} exact, {} fuzzy, {} conceptual in {:?}",
            query.identifier,
            result.exact.len(),
            result.fuzzy.len(),
            result.conceptual.len(),
            result.search_time
        );
        result
    }

    async fn run_strategy(&self, query: &SearchQuery, strategy: &SearchStrategy) -> Result<Vec<Match>> {
        let options = SearchOptions::new(strategy.pattern.clone(), query.search_path.clone())
            .case_insensitive(strategy.case_insensitive || !query.case_sensitive)
            .with_file_types(query.file_types.clone())
            .with_limit(strategy.max_results)
            .with_timeout(strategy.timeout);

        let matches = self.engine.search(&options).await?;
        let matches = if query.include_tests {
            matches
        } else {
            without_tests(matches)
        };

        Ok(matches
            .iter()
            .map(|m| m.weighted(strategy.confidence, strategy.bucket.source()))
            .collect())
    }

    async fn run_cascade(&self, query: &SearchQuery, result: &mut EnhancedMatches) -> PassReport {
        let mut report = PassReport::default();

        for strategy in fast_cascade(&query.identifier, &self.config) {
            report.attempted += 1;
            match self.run_strategy(query, &strategy).await {
                Ok(matches) if !matches.is_empty() => {
                    tracing::debug!(
                        "[ORCHESTRATOR] {} matched {} via {}",
                        query.identifier,
                        matches.len(),
                        strategy.name
                    );
                    result.record_tool(&strategy.name);
                    for m in matches {
                        result.push(strategy.bucket, m);
                    }
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    report.errors += 1;
                    tracing::warn!("[ORCHESTRATOR] strategy {} failed: {}", strategy.name, e);
                    if !e.is_transient() {
                        report.fatal = true;
                        break;
                    }
                }
            }
        }

        report
    }

    async fn run_full_set(&self, query: &SearchQuery, result: &mut EnhancedMatches) -> PassReport {
        let mut report = PassReport::default();

        for strategy in full_set(&query.identifier, &self.config) {
            if result.exact.len() >= self.config.early_stop_exact {
                break;
            }
            report.attempted += 1;
            match self.run_strategy(query, &strategy).await {
                Ok(matches) => {
                    if !matches.is_empty() {
                        result.record_tool(&strategy.name);
                    }
                    for m in matches {
                        result.push(strategy.bucket, m);
                    }
                }
                Err(e) => {
                    report.errors += 1;
                    tracing::warn!("[ORCHESTRATOR] strategy {} failed: {}", strategy.name, e);
                    if !e.is_transient() {
                        report.fatal = true;
                        break;
                    }
                }
            }
        }

        report
    }

    /// How often an identifier has been queried
    pub fn query_frequency(&self, identifier: &str) -> u64 {
        self.frequency.lock().get(identifier)
    }

    /// Most frequently queried identifiers, most frequent first
    pub fn top_queries(&self, n: usize) -> Vec<(String, u64)> {
        self.frequency.lock().top(n)
    }

    /// Number of distinct identifiers currently counted
    pub fn tracked_identifiers(&self) -> usize {
        self.frequency.lock().len()
    }

    pub fn stats(&self) -> OrchestratorStats {
        let (queries, cache_hits, filter_hits, cascade_failures, fatal_failures) = {
            let counters = self.counters.lock();
            (
                counters.queries,
                counters.cache_hits,
                counters.filter_hits,
                counters.cascade_failures,
                counters.fatal_failures,
            )
        };
        OrchestratorStats {
            queries,
            cache_hits,
            filter_hits,
            cascade_failures,
            fatal_failures,
            negative_entries: self.negative.lock().len(),
            pool: self.engine.pool().stats(),
            search_cache: self.engine.cache().stats(),
            result_cache: self.results.stats(),
        }
    }

    /// Both caches healthy and the pool still usable
    pub fn is_healthy(&self) -> bool {
        !self.engine.pool().is_destroyed()
            && self.engine.cache().is_healthy()
            && self.results.is_healthy()
    }

    /// Forget every cached result and negative entry
    pub fn clear_caches(&self) {
        self.results.clear();
        self.engine.cache().clear();
        self.negative.lock().clear();
    }

    /// Kill running searches and release caches and watchers
    pub fn shutdown(&self) {
        self.engine.pool().destroy();
        self.results.dispose();
        self.engine.cache().dispose();
    }
}

/// Result-cache and negative-filter key for a query
fn query_key(query: &SearchQuery) -> String {
    let mut types = query.file_types.clone();
    types.sort();
    types.dedup();
    format!(
        "q:{}\u{0}{}\u{0}{}\u{0}{}\u{0}{}",
        query.identifier,
        query.search_path.display(),
        types.join(","),
        query.case_sensitive,
        query.include_tests
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_key_normalizes_types() {
        let a = SearchQuery::new("Foo", "/repo").with_file_types(vec!["ts".into(), "rust".into()]);
        let b = SearchQuery::new("Foo", "/repo").with_file_types(vec!["rust".into(), "ts".into()]);
        assert_eq!(query_key(&a), query_key(&b));
        assert_ne!(query_key(&a), query_key(&a.clone().with_tests(false)));
        assert_ne!(query_key(&a), query_key(&SearchQuery::new("Foo", "/other")));
    }

    #[test]
    fn test_pass_report() {
        assert!(!PassReport::default().all_failed());
        let report = |attempted, errors| PassReport {
            attempted,
            errors,
            fatal: false,
        };
        assert!(report(4, 4).all_failed());
        assert!(!report(4, 3).all_failed());
    }

    #[test]
    fn test_frequency_evicts_rarest() {
        let mut frequency = QueryFrequency::new(2);
        frequency.record("hot");
        frequency.record("hot");
        frequency.record("cold");
        frequency.record("new");

        assert_eq!(frequency.len(), 2);
        assert_eq!(frequency.get("hot"), 2);
        assert_eq!(frequency.get("cold"), 0);
        assert_eq!(frequency.get("new"), 1);

        frequency.record("another");
        assert_eq!(frequency.get("hot"), 2);
        assert_eq!(frequency.get("another"), 1);
        assert_eq!(frequency.get("new"), 0);
    }

    #[test]
    fn test_frequency_tie_evicts_larger_key() {
        let mut frequency = QueryFrequency::new(2);
        frequency.record("alpha");
        frequency.record("beta");
        frequency.record("gamma");
        assert_eq!(frequency.get("alpha"), 1);
        assert_eq!(frequency.get("beta"), 0);
        assert_eq!(frequency.get("gamma"), 1);
    }

    #[test]
    fn test_frequency_disabled() {
        let mut frequency = QueryFrequency::new(0);
        frequency.record("anything");
        assert_eq!(frequency.len(), 0);
        assert!(frequency.top(5).is_empty());
    }

    #[cfg(unix)]
    mod process {
        use super::*;
        use crate::config::{EngineConfig, PoolConfig};
        use std::fs;
        use std::path::PathBuf;
        use tempfile::TempDir;

        struct Fixture {
            dir: TempDir,
            orchestrator: SearchOrchestrator,
        }

        impl Fixture {
            fn path(&self, rel: &str) -> PathBuf {
                self.dir.path().join(rel)
            }

            fn query(&self, identifier: &str) -> SearchQuery {
                SearchQuery::new(identifier, self.dir.path())
            }

            fn spawned(&self) -> u64 {
                self.orchestrator.engine().pool().stats().spawned
            }
        }

        fn source_tree() -> TempDir {
            let dir = TempDir::new().unwrap();
            for file in ["src/a.rs", "src/b.rs", "src/z.rs", "tests/t.rs"] {
                let path = dir.path().join(file);
                fs::create_dir_all(path.parent().unwrap()).unwrap();
                fs::write(&path, "Zed\n").unwrap();
            }
            dir
        }

        /// Fake `rg` answering per pattern. `{root}` in `cases` expands to
        /// the fixture directory.
        fn fixture(cases: &str, config: OrchestratorConfig) -> Fixture {
            let dir = source_tree();
            let root = dir.path().display().to_string();
            let script = dir.path().join("fake-rg.sh");
            let body = format!("#!/bin/sh\ncase \"$1\" in\n{}\nesac\n", cases.replace("{root}", &root));
            fs::write(&script, body).unwrap();

            let pool = ProcessPool::new(&PoolConfig {
                binary: PathBuf::from("sh"),
                leading_args: vec![script.display().to_string()],
                max_processes: 4,
            })
            .unwrap();
            with_pool(dir, pool, config)
        }

        fn with_pool(dir: TempDir, pool: ProcessPool, config: OrchestratorConfig) -> Fixture {
            let cache_config = CacheConfig {
                zones: Vec::new(),
                ..Default::default()
            };
            let engine = StreamingSearchEngine::new(
                pool,
                Arc::new(SmartCache::new(cache_config.clone()).unwrap()),
                EngineConfig::default(),
            );
            let orchestrator = SearchOrchestrator::with_engine(engine, config, &cache_config).unwrap();
            Fixture { dir, orchestrator }
        }

        const CASES: &str = r#"
  '\bFoo\b') echo "{root}/src/a.rs:3:9:let x = Foo;" ;;
  '\bFoo\w+') echo "{root}/src/a.rs:4:1:FooBar" ;;
  '\bBar\w+') echo "{root}/src/b.rs:2:1:BarBaz()" ;;
  '\bQux\b') echo "{root}/tests/t.rs:1:1:Qux" ; echo "{root}/src/b.rs:7:1:Qux" ;;
  '\bZed\b') grep -q Zed "{root}/src/z.rs" && echo "{root}/src/z.rs:1:1:Zed" ;;
  *Broken*) echo 'rg: internal failure' >&2 ; exit 2 ;;
  *UserName*) echo 'rg: internal failure' >&2 ; exit 2 ;;
  'user.*name') echo "{root}/src/a.rs:5:4:fn user_lookup_name() {}" ;;
  '\b(?:'*user_name*) echo "{root}/src/b.rs:9:5:let user_name = 1;" ; echo "{root}/src/z.rs:2:1:USER_NAME" ;;
  '\bFlaky\b') if [ -e "{root}/.flaky" ]; then echo "{root}/src/a.rs:1:1:Flaky"; else : > "{root}/.flaky"; echo 'rg: busy' >&2; exit 2; fi ;;
  *Flaky*) echo 'rg: busy' >&2 ; exit 2 ;;
"#;

        #[tokio::test]
        async fn test_exact_match_stops_cascade() {
            let fx = fixture(CASES, OrchestratorConfig::default());
            let result = fx.orchestrator.process(&fx.query("Foo")).await;

            assert_eq!(result.exact.len(), 1);
            assert!(result.fuzzy.is_empty(), "prefix must not run after an exact hit");
            let m = &result.exact[0];
            assert_eq!(m.file, fx.path("src/a.rs"));
            assert_eq!((m.line, m.column, m.length), (3, 8, 3));
            assert_eq!(m.confidence, 1.0);
            assert_eq!(result.confidence, 1.0);
            assert_eq!(result.tools_used, vec!["exact".to_string()]);
            assert_eq!(fx.spawned(), 1);
        }

        #[tokio::test]
        async fn test_repeat_query_is_cached() {
            let fx = fixture(CASES, OrchestratorConfig::default());
            let first = fx.orchestrator.process(&fx.query("Foo")).await;
            let second = fx.orchestrator.process(&fx.query("Foo")).await;

            assert_eq!(first.exact, second.exact);
            assert_eq!(first.confidence, second.confidence);
            assert!(second.used_tool(RESULT_CACHE_TOOL));
            assert_eq!(fx.spawned(), 1);
            assert_eq!(fx.orchestrator.stats().cache_hits, 1);
        }

        #[tokio::test]
        async fn test_prefix_match_is_fuzzy() {
            let fx = fixture(CASES, OrchestratorConfig::default());
            let result = fx.orchestrator.process(&fx.query("Bar")).await;

            assert!(result.exact.is_empty());
            assert_eq!(result.fuzzy.len(), 1);
            assert_eq!(result.fuzzy[0].confidence, 0.95);
            assert!((result.confidence - 0.8).abs() < 1e-9);
            assert_eq!(result.tools_used, vec!["prefix".to_string()]);
        }

        #[tokio::test]
        async fn test_absent_identifier_uses_negative_filter() {
            let fx = fixture(CASES, OrchestratorConfig::default());

            let first = fx.orchestrator.process(&fx.query("Nowhere")).await;
            assert!(first.is_empty());
            assert!(!first.used_tool(NEGATIVE_FILTER_TOOL));
            assert_eq!(fx.spawned(), 4);

            let second = fx.orchestrator.process(&fx.query("Nowhere")).await;
            assert!(second.is_empty());
            assert!(second.used_tool(NEGATIVE_FILTER_TOOL));
            assert!(second.search_time < first.search_time);
            assert_eq!(fx.spawned(), 4);
            assert_eq!(fx.orchestrator.stats().filter_hits, 1);
        }

        #[tokio::test]
        async fn test_negative_filter_disabled() {
            let config = OrchestratorConfig {
                negative_filter: false,
                ..Default::default()
            };
            let fx = fixture(CASES, config);
            fx.orchestrator.process(&fx.query("Nowhere")).await;
            let second = fx.orchestrator.process(&fx.query("Nowhere")).await;
            assert!(!second.used_tool(NEGATIVE_FILTER_TOOL));
            assert_eq!(fx.orchestrator.stats().negative_entries, 0);
        }

        #[tokio::test]
        async fn test_cascade_failure_runs_full_set() {
            let fx = fixture(CASES, OrchestratorConfig::default());
            let result = fx.orchestrator.process(&fx.query("Broken")).await;

            assert!(result.is_empty());
            assert_eq!(result.confidence, 0.0);
            let stats = fx.orchestrator.stats();
            assert_eq!(stats.cascade_failures, 1);
            // Failed searches are not proof of absence
            assert_eq!(stats.negative_entries, 0);
            // Four cascade strategies plus the four base strategies of the full set
            assert_eq!(fx.spawned(), 8);
        }

        #[tokio::test]
        async fn test_full_set_fills_fuzzy_and_conceptual() {
            let fx = fixture(CASES, OrchestratorConfig::default());
            let result = fx.orchestrator.process(&fx.query("UserName")).await;

            assert!(result.exact.is_empty());
            assert_eq!(result.fuzzy.len(), 1);
            assert_eq!(result.fuzzy[0].file, fx.path("src/a.rs"));
            assert_eq!(result.fuzzy[0].confidence, 0.85);
            assert_eq!(result.conceptual.len(), 2);
            assert!(result.conceptual.iter().all(|m| m.confidence == 0.7));
            // One fuzzy match at 0.8 and two conceptual matches at 0.6
            assert!((result.confidence - 2.0 / 3.0).abs() < 1e-9);
            assert_eq!(
                result.tools_used,
                vec!["token_fuzzy".to_string(), "semantic".to_string()]
            );

            let stats = fx.orchestrator.stats();
            assert_eq!(stats.cascade_failures, 1);
            assert_eq!(stats.fatal_failures, 0);
            // Four failed cascade strategies, then all six of the full set
            assert_eq!(fx.spawned(), 10);

            let again = fx.orchestrator.process(&fx.query("UserName")).await;
            assert!(again.used_tool(RESULT_CACHE_TOOL));
            assert_eq!(again.conceptual, result.conceptual);
        }

        #[tokio::test]
        async fn test_full_set_without_semantic_variants() {
            let config = OrchestratorConfig {
                semantic_variants: false,
                ..Default::default()
            };
            let fx = fixture(CASES, config);
            let result = fx.orchestrator.process(&fx.query("UserName")).await;

            assert_eq!(result.fuzzy.len(), 1);
            assert!(result.conceptual.is_empty());
            assert_eq!(result.confidence, 0.8);
            assert_eq!(fx.spawned(), 9);
        }

        #[tokio::test]
        async fn test_full_set_stops_at_enough_exact_matches() {
            let config = OrchestratorConfig {
                early_stop_exact: 1,
                ..Default::default()
            };
            let fx = fixture(CASES, config);
            let result = fx.orchestrator.process(&fx.query("Flaky")).await;

            assert_eq!(result.exact.len(), 1);
            assert_eq!(result.exact[0].confidence, 1.0);
            assert_eq!(result.confidence, 1.0);
            assert_eq!(result.tools_used, vec!["exact".to_string()]);
            // Four failed cascade strategies, then only the exact retry
            assert_eq!(fx.spawned(), 5);
        }

        #[tokio::test]
        async fn test_full_set_continues_below_early_stop() {
            let fx = fixture(CASES, OrchestratorConfig::default());
            let result = fx.orchestrator.process(&fx.query("Flaky")).await;

            assert_eq!(result.exact.len(), 1);
            // The remaining base strategies still run; a single-word
            // identifier has no token or semantic strategy
            assert_eq!(fx.spawned(), 8);
        }

        #[tokio::test]
        async fn test_missing_binary_skips_full_set() {
            use std::os::unix::fs::PermissionsExt;

            let dir = source_tree();
            let binary = dir.path().join("rg-gone");
            fs::write(&binary, "#!/bin/sh\nexit 0\n").unwrap();
            fs::set_permissions(&binary, fs::Permissions::from_mode(0o755)).unwrap();
            let pool = ProcessPool::new(&PoolConfig {
                binary: binary.clone(),
                leading_args: Vec::new(),
                max_processes: 2,
            })
            .unwrap();
            fs::remove_file(&binary).unwrap();
            let fx = with_pool(dir, pool, OrchestratorConfig::default());

            let result = fx.orchestrator.process(&fx.query("Foo")).await;

            assert!(result.is_empty());
            let stats = fx.orchestrator.stats();
            assert_eq!(stats.fatal_failures, 1);
            assert_eq!(stats.cascade_failures, 0);
            assert_eq!(stats.negative_entries, 0);
            // Only the first strategy tried to spawn
            assert_eq!(stats.pool.failed, 1);
        }

        #[tokio::test]
        async fn test_frequency_table_is_bounded() {
            let config = OrchestratorConfig {
                frequency_capacity: 2,
                ..Default::default()
            };
            let fx = fixture(CASES, config);
            for _ in 0..2 {
                fx.orchestrator.process(&fx.query("Foo")).await;
            }
            for id in ["Nowhere", "Elsewhere", "Bar"] {
                fx.orchestrator.process(&fx.query(id)).await;
            }

            assert_eq!(fx.orchestrator.tracked_identifiers(), 2);
            assert_eq!(fx.orchestrator.query_frequency("Foo"), 2);
            assert_eq!(fx.orchestrator.query_frequency("Bar"), 1);
            assert_eq!(fx.orchestrator.stats().queries, 5);
        }

        #[tokio::test]
        async fn test_test_files_excluded_on_request() {
            let fx = fixture(CASES, OrchestratorConfig::default());

            let all = fx.orchestrator.process(&fx.query("Qux")).await;
            assert_eq!(all.exact.len(), 2);

            let no_tests = fx
                .orchestrator
                .process(&fx.query("Qux").with_tests(false))
                .await;
            assert_eq!(no_tests.exact.len(), 1);
            assert_eq!(no_tests.exact[0].file, fx.path("src/b.rs"));
        }

        #[tokio::test]
        async fn test_rewritten_file_invalidates_results() {
            let fx = fixture(CASES, OrchestratorConfig::default());
            let first = fx.orchestrator.process(&fx.query("Zed")).await;
            assert_eq!(first.exact.len(), 1);

            tokio::time::sleep(Duration::from_millis(100)).await;
            fs::write(fx.path("src/z.rs"), "renamed\n").unwrap();

            let second = fx.orchestrator.process(&fx.query("Zed")).await;
            assert!(second.is_empty());
            assert!(!second.used_tool(RESULT_CACHE_TOOL));
        }

        #[tokio::test]
        async fn test_empty_identifier() {
            let fx = fixture(CASES, OrchestratorConfig::default());
            let result = fx.orchestrator.process(&fx.query("  ")).await;
            assert!(result.is_empty());
            assert_eq!(fx.spawned(), 0);
        }

        #[tokio::test]
        async fn test_query_frequency() {
            let fx = fixture(CASES, OrchestratorConfig::default());
            for _ in 0..3 {
                fx.orchestrator.process(&fx.query("Foo")).await;
            }
            fx.orchestrator.process(&fx.query("Bar")).await;

            assert_eq!(fx.orchestrator.query_frequency("Foo"), 3);
            assert_eq!(fx.orchestrator.query_frequency("Missing"), 0);
            assert_eq!(
                fx.orchestrator.top_queries(1),
                vec![("Foo".to_string(), 3)]
            );
            assert_eq!(fx.orchestrator.stats().queries, 4);
        }

        #[tokio::test]
        async fn test_shutdown() {
            let fx = fixture(CASES, OrchestratorConfig::default());
            assert!(fx.orchestrator.is_healthy());
            fx.orchestrator.shutdown();
            assert!(!fx.orchestrator.is_healthy());
            // Still answers, just without results
            let result = fx.orchestrator.process(&fx.query("Foo")).await;
            assert!(result.is_empty());

            // A closed pool fails every strategy alike, so nothing else runs
            let stats = fx.orchestrator.stats();
            assert_eq!(stats.fatal_failures, 1);
            assert_eq!(stats.cascade_failures, 0);
            assert_eq!(stats.pool.spawned, 0);
        }
    }
}
