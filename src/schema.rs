//! Data model shared by the engine, cache and orchestrator
//!
//! All types here are plain values: a [`Match`] is produced once from a line
//! of search-tool output and never mutated, an [`EnhancedMatches`] is filled
//! during a query and frozen when it is returned or cached.

use std::collections::{BTreeSet, HashSet};
use std::path::PathBuf;
use std::time::Duration;

use serde::{Serialize, Serializer};

/// Bucket weight used when averaging exact matches
pub const EXACT_WEIGHT: f64 = 1.0;
/// Bucket weight used when averaging fuzzy matches
pub const FUZZY_WEIGHT: f64 = 0.8;
/// Bucket weight used when averaging conceptual matches
pub const CONCEPTUAL_WEIGHT: f64 = 0.6;

// ============================================================================
// Query
// ============================================================================

/// An identifier lookup request, immutable once built
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct SearchQuery {
    /// Identifier to locate
    pub identifier: String,
    /// Root directory (or file) to search
    pub search_path: PathBuf,
    /// Search-tool file types (e.g. "rust", "ts"); empty means all
    pub file_types: Vec<String>,
    /// Whether the exact strategies are case sensitive
    pub case_sensitive: bool,
    /// Whether matches inside test files are kept
    pub include_tests: bool,
}

impl SearchQuery {
    /// Create a case-sensitive query that includes test files
    pub fn new(identifier: impl Into<String>, search_path: impl Into<PathBuf>) -> Self {
        Self {
            identifier: identifier.into(),
            search_path: search_path.into(),
            file_types: Vec::new(),
            case_sensitive: true,
            include_tests: true,
        }
    }

    /// Restrict the search to the given file types
    pub fn with_file_types(mut self, types: Vec<String>) -> Self {
        self.file_types = types;
        self
    }

    /// Toggle case sensitivity
    pub fn with_case_sensitive(mut self, case_sensitive: bool) -> Self {
        self.case_sensitive = case_sensitive;
        self
    }

    /// Toggle inclusion of test files
    pub fn with_tests(mut self, include_tests: bool) -> Self {
        self.include_tests = include_tests;
        self
    }
}

// ============================================================================
// Match
// ============================================================================

/// Where a match came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchSource {
    Exact,
    Fuzzy,
    Conceptual,
    FileSearch,
}

impl MatchSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchSource::Exact => "exact",
            MatchSource::Fuzzy => "fuzzy",
            MatchSource::Conceptual => "conceptual",
            MatchSource::FileSearch => "file_search",
        }
    }
}

/// A single located occurrence
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Match {
    /// File containing the match, as reported by the search tool
    pub file: PathBuf,
    /// Line number (1-indexed)
    pub line: u64,
    /// Column (0-indexed byte offset)
    pub column: u64,
    /// Full text of the matching line
    pub text: String,
    /// Length in bytes of the matched span
    pub length: usize,
    /// Trust in this match, 0.0 - 1.0
    pub confidence: f64,
    /// Provenance tag
    pub source: MatchSource,
}

impl Match {
    /// Create an exact match with full confidence
    pub fn new(file: PathBuf, line: u64, column: u64, text: String, length: usize) -> Self {
        Self {
            file,
            line,
            column,
            text,
            length,
            confidence: 1.0,
            source: MatchSource::Exact,
        }
    }

    /// Copy of this match re-weighted for a strategy
    pub fn weighted(&self, confidence: f64, source: MatchSource) -> Self {
        Self {
            confidence: confidence.clamp(0.0, 1.0),
            source,
            ..self.clone()
        }
    }

    /// Identity used for deduplication
    pub fn location_key(&self) -> (PathBuf, u64, u64) {
        (self.file.clone(), self.line, self.column)
    }
}

// ============================================================================
// Strategy
// ============================================================================

/// Result bucket a strategy feeds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Bucket {
    Exact,
    Fuzzy,
    Conceptual,
}

impl Bucket {
    /// Weight of this bucket in the aggregate confidence
    pub fn weight(&self) -> f64 {
        match self {
            Bucket::Exact => EXACT_WEIGHT,
            Bucket::Fuzzy => FUZZY_WEIGHT,
            Bucket::Conceptual => CONCEPTUAL_WEIGHT,
        }
    }

    pub fn source(&self) -> MatchSource {
        match self {
            Bucket::Exact => MatchSource::Exact,
            Bucket::Fuzzy => MatchSource::Fuzzy,
            Bucket::Conceptual => MatchSource::Conceptual,
        }
    }
}

/// One regex pass of a strategy cascade. Generated per query, never stored.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchStrategy {
    /// Name reported in `tools_used`
    pub name: String,
    /// Regex handed to the search tool
    pub pattern: String,
    /// Per-strategy timeout
    pub timeout: Duration,
    /// Stop after this many matches
    pub max_results: usize,
    /// Confidence assigned to every match of this strategy
    pub confidence: f64,
    /// Bucket the matches are filed under
    pub bucket: Bucket,
    /// Run the pattern case-insensitively
    pub case_insensitive: bool,
}

// ============================================================================
// EnhancedMatches
// ============================================================================

/// Categorized result of one orchestrated query
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EnhancedMatches {
    pub exact: Vec<Match>,
    pub fuzzy: Vec<Match>,
    pub conceptual: Vec<Match>,
    /// Distinct files touched by any bucket
    pub files: BTreeSet<PathBuf>,
    #[serde(rename = "search_time_ms", serialize_with = "serialize_millis")]
    pub search_time: Duration,
    /// Strategies and tools that contributed (e.g. "exact", "negative_filter")
    pub tools_used: Vec<String>,
    /// Count-weighted average bucket confidence, 0 when empty
    pub confidence: f64,
}

fn serialize_millis<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(value.as_secs_f64() * 1000.0)
}

impl EnhancedMatches {
    /// Empty result
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of matches across buckets
    pub fn total(&self) -> usize {
        self.exact.len() + self.fuzzy.len() + self.conceptual.len()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    /// Matches in a bucket
    pub fn bucket(&self, bucket: Bucket) -> &[Match] {
        match bucket {
            Bucket::Exact => &self.exact,
            Bucket::Fuzzy => &self.fuzzy,
            Bucket::Conceptual => &self.conceptual,
        }
    }

    /// File a match under a bucket and remember its file
    pub fn push(&mut self, bucket: Bucket, m: Match) {
        self.files.insert(m.file.clone());
        match bucket {
            Bucket::Exact => self.exact.push(m),
            Bucket::Fuzzy => self.fuzzy.push(m),
            Bucket::Conceptual => self.conceptual.push(m),
        }
    }

    /// Record a contributing tool once
    pub fn record_tool(&mut self, name: &str) {
        if !self.tools_used.iter().any(|t| t == name) {
            self.tools_used.push(name.to_string());
        }
    }

    pub fn used_tool(&self, name: &str) -> bool {
        self.tools_used.iter().any(|t| t == name)
    }

    /// Drop repeated (file, line, column) entries within each bucket,
    /// keeping the first occurrence.
    pub fn dedup(&mut self) {
        for bucket in [&mut self.exact, &mut self.fuzzy, &mut self.conceptual] {
            let mut seen = HashSet::new();
            bucket.retain(|m| seen.insert(m.location_key()));
        }
    }

    /// Recompute `confidence` as the count-weighted bucket average
    pub fn compute_confidence(&mut self) {
        let total = self.total();
        if total == 0 {
            self.confidence = 0.0;
            return;
        }
        let weighted = self.exact.len() as f64 * EXACT_WEIGHT
            + self.fuzzy.len() as f64 * FUZZY_WEIGHT
            + self.conceptual.len() as f64 * CONCEPTUAL_WEIGHT;
        self.confidence = weighted / total as f64;
    }

    /// Files referenced by the matches, for cache dependency tracking
    pub fn dependency_paths(&self) -> Vec<PathBuf> {
        self.files.iter().cloned().collect()
    }
}

// ============================================================================
// Tests
// ============================================================================
