//! Configuration file support for semfora-search
//!
//! Loads configuration from `.semfora-search.toml` in the current directory
//! or `~/.config/semfora-search/config.toml`. Every section is optional and
//! falls back to the defaults below.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Result, SearchError};

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub pool: PoolConfig,
    pub engine: EngineConfig,
    pub cache: CacheConfig,
    pub orchestrator: OrchestratorConfig,
}

impl SearchConfig {
    /// Load configuration from files
    ///
    /// Precedence (highest to lowest):
    /// 1. .semfora-search.toml in current directory
    /// 2. ~/.config/semfora-search/config.toml
    pub fn load() -> Self {
        if let Some(config) = Self::load_optional(Path::new(".semfora-search.toml")) {
            return config;
        }

        if let Some(home) = dirs::home_dir() {
            let path = home
                .join(".config")
                .join("semfora-search")
                .join("config.toml");
            if let Some(config) = Self::load_optional(&path) {
                return config;
            }
        }

        Self::default()
    }

    /// Load from an explicit path, failing on unreadable or invalid files
    pub fn from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content).map_err(|e| SearchError::Config {
            message: format!("{}: {}", path.display(), e),
        })
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| SearchError::Config {
            message: e.to_string(),
        })
    }

    fn load_optional(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }
        match Self::from_path(path) {
            Ok(config) => Some(config),
            Err(e) => {
                tracing::warn!("Ignoring config {}: {}", path.display(), e);
                None
            }
        }
    }
}

// ============================================================================
// Process pool
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// External search binary (name on PATH or absolute path)
    pub binary: PathBuf,
    /// Arguments placed before the generated search arguments
    /// (e.g. a wrapper script for the binary)
    pub leading_args: Vec<String>,
    /// Maximum concurrently running searches
    pub max_processes: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("rg"),
            leading_args: Vec::new(),
            max_processes: 4,
        }
    }
}

// ============================================================================
// Streaming engine
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Timeout applied when a search does not set its own
    pub default_timeout_ms: u64,
    /// Result cap applied when a search does not set its own
    pub default_max_results: usize,
    /// `--max-depth` passed to the search tool
    pub max_depth: usize,
    /// Directories excluded with `--glob !<dir>/**`
    pub exclude_dirs: Vec<String>,
    /// Search hidden files by default
    pub include_hidden: bool,
    /// Yield to the scheduler between replayed cached matches
    pub replay_yield: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 5_000,
            default_max_results: 1_000,
            max_depth: 10,
            exclude_dirs: [
                "node_modules",
                ".git",
                "dist",
                "build",
                "target",
                "coverage",
                ".next",
                "__pycache__",
                ".venv",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            include_hidden: false,
            replay_yield: true,
        }
    }
}

impl EngineConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }
}

// ============================================================================
// Smart cache
// ============================================================================

/// A named cache policy for a class of paths
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ZoneConfig {
    pub name: String,
    /// Glob patterns, matched against the full path
    pub patterns: Vec<String>,
    pub ttl_ms: u64,
    /// Stat the attached file on every `get`
    pub check_mtime: bool,
    /// Attach a file-system watcher on `set`
    pub watch: bool,
    pub description: String,
}

impl Default for ZoneConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            patterns: Vec::new(),
            ttl_ms: 60_000,
            check_mtime: true,
            watch: false,
            description: String::new(),
        }
    }
}

impl ZoneConfig {
    fn preset(
        name: &str,
        patterns: &[&str],
        ttl_ms: u64,
        check_mtime: bool,
        watch: bool,
        description: &str,
    ) -> Self {
        Self {
            name: name.to_string(),
            patterns: patterns.iter().map(|p| p.to_string()).collect(),
            ttl_ms,
            check_mtime,
            watch,
            description: description.to_string(),
        }
    }
}

/// Tiered default policy: stable directories live long and are never
/// watched, source is short-lived and watched, the rest sits in between.
pub fn default_zones() -> Vec<ZoneConfig> {
    vec![
        ZoneConfig::preset(
            "dependencies",
            &[
                "**/node_modules/**",
                "**/vendor/**",
                "**/target/**",
                "**/dist/**",
                "**/build/**",
                "**/.git/**",
            ],
            3_600_000,
            false,
            false,
            "Build output and third-party code",
        ),
        ZoneConfig::preset(
            "tests",
            &[
                "**/tests/**",
                "**/test/**",
                "**/__tests__/**",
                "**/spec/**",
                "**/*.test.*",
                "**/*.spec.*",
            ],
            120_000,
            true,
            true,
            "Test sources",
        ),
        ZoneConfig::preset(
            "source",
            &[
                "**/src/**",
                "**/lib/**",
                "**/app/**",
                "**/packages/**",
                "**/crates/**",
            ],
            30_000,
            true,
            true,
            "Actively edited source code",
        ),
        ZoneConfig::preset(
            "config",
            &[
                "**/*.toml",
                "**/*.json",
                "**/*.yaml",
                "**/*.yml",
                "**/*.lock",
            ],
            300_000,
            true,
            false,
            "Project configuration",
        ),
        ZoneConfig::preset(
            "docs",
            &["**/docs/**", "**/*.md"],
            600_000,
            true,
            false,
            "Documentation",
        ),
    ]
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of entries
    pub max_size: usize,
    /// Maximum estimated bytes across entries
    pub max_memory: usize,
    /// TTL for paths no zone claims
    pub default_ttl_ms: u64,
    /// Zone policies, first match wins
    pub zones: Vec<ZoneConfig>,
    /// Clear everything when the repository HEAD moves
    pub git_aware: bool,
    pub watcher_debounce_ms: u64,
    pub max_watchers: usize,
    /// Notify observers of cache events
    pub enable_metrics: bool,
    /// Interval of the TTL / idle watcher sweep (0 disables the sweep)
    pub maintenance_interval_ms: u64,
    /// Watchers without referencing entries are closed after this long
    pub watcher_idle_ms: u64,
    /// Delay before a HEAD change clears the cache
    pub git_settle_ms: u64,
    /// Hit-rate floor for the health predicate
    pub min_hit_rate: f64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: 10_000,
            max_memory: 100 * 1024 * 1024,
            default_ttl_ms: 60_000,
            zones: default_zones(),
            git_aware: false,
            watcher_debounce_ms: 100,
            max_watchers: 500,
            enable_metrics: true,
            maintenance_interval_ms: 60_000,
            watcher_idle_ms: 300_000,
            git_settle_ms: 500,
            min_hit_rate: 0.1,
        }
    }
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_millis(self.default_ttl_ms)
    }

    pub fn watcher_debounce(&self) -> Duration {
        Duration::from_millis(self.watcher_debounce_ms)
    }
}

// ============================================================================
// Orchestrator
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Short-circuit identifiers recently confirmed absent
    pub negative_filter: bool,
    pub negative_capacity: usize,
    pub negative_ttl_ms: u64,
    /// Entries in the aggregated result cache
    pub result_cache_size: usize,
    pub result_cache_ttl_ms: u64,
    /// Timeout of each fast-cascade strategy
    pub cascade_timeout_ms: u64,
    /// Timeout of each strategy in the full fallback set
    pub full_timeout_ms: u64,
    pub max_results_per_strategy: usize,
    /// Stop the full strategy set once this many exact matches exist
    pub early_stop_exact: usize,
    /// Add the naming-convention / synonym strategy to the full set
    pub semantic_variants: bool,
    /// Distinct identifiers kept in the query-frequency table (0 disables it)
    pub frequency_capacity: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            negative_filter: true,
            negative_capacity: 10_000,
            negative_ttl_ms: 300_000,
            result_cache_size: 1_000,
            result_cache_ttl_ms: 300_000,
            cascade_timeout_ms: 800,
            full_timeout_ms: 3_000,
            max_results_per_strategy: 100,
            early_stop_exact: 20,
            semantic_variants: true,
            frequency_capacity: 10_000,
        }
    }
}

impl OrchestratorConfig {
    pub fn cascade_timeout(&self) -> Duration {
        Duration::from_millis(self.cascade_timeout_ms)
    }

    pub fn full_timeout(&self) -> Duration {
        Duration::from_millis(self.full_timeout_ms)
    }
}
