//! Strategy construction for the orchestrator
//!
//! Strategies are plain values built per query. The fast cascade is tried
//! in order and stops at the first strategy with matches; the full set runs
//! only when every cascade strategy failed outright.
//!
//! | Strategy           | Pattern                     | Confidence | Bucket     |
//! |--------------------|-----------------------------|------------|------------|
//! | `exact`            | `\bID\b`                    | 1.0        | exact      |
//! | `prefix`           | `\bID\w+`                   | 0.95       | fuzzy      |
//! | `suffix`           | `\w+ID\b`                   | 0.93       | fuzzy      |
//! | `case_insensitive` | `\b(?:ID\w*\|\w*ID)\b` + `-i` | 0.9      | fuzzy      |
//! | `token_fuzzy`      | `tok1.*tok2...` + `-i`      | 0.85       | fuzzy      |
//! | `semantic`         | `\b(?:v1\|v2...)\b`          | 0.7        | conceptual |

use std::time::Duration;

use crate::config::OrchestratorConfig;
use crate::schema::{Bucket, SearchStrategy};
use crate::tokens::{semantic_variants, tokenize};

pub const EXACT_CONFIDENCE: f64 = 1.0;
pub const PREFIX_CONFIDENCE: f64 = 0.95;
pub const SUFFIX_CONFIDENCE: f64 = 0.93;
pub const CASE_INSENSITIVE_CONFIDENCE: f64 = 0.9;
pub const TOKEN_FUZZY_CONFIDENCE: f64 = 0.85;
pub const SEMANTIC_CONFIDENCE: f64 = 0.7;

fn strategy(
    name: &str,
    pattern: String,
    confidence: f64,
    bucket: Bucket,
    case_insensitive: bool,
    timeout: Duration,
    max_results: usize,
) -> SearchStrategy {
    SearchStrategy {
        name: name.to_string(),
        pattern,
        timeout,
        max_results,
        confidence,
        bucket,
        case_insensitive,
    }
}

/// Builds strategies for one identifier
#[derive(Debug, Clone)]
pub struct StrategyBuilder {
    identifier: String,
    escaped: String,
    max_results: usize,
}

impl StrategyBuilder {
    pub fn new(identifier: &str, config: &OrchestratorConfig) -> Self {
        Self {
            identifier: identifier.to_string(),
            escaped: regex::escape(identifier),
            max_results: config.max_results_per_strategy,
        }
    }

    /// Word boundaries are only asserted next to word characters, so
    /// identifiers such as `operator()` still match
    pub fn exact(&self, timeout: Duration) -> SearchStrategy {
        let is_word = |c: char| c.is_alphanumeric() || c == '_';
        let lead = if self.identifier.starts_with(is_word) { r"\b" } else { "" };
        let trail = if self.identifier.ends_with(is_word) { r"\b" } else { "" };
        strategy(
            "exact",
            format!("{}{}{}", lead, self.escaped, trail),
            EXACT_CONFIDENCE,
            Bucket::Exact,
            false,
            timeout,
            self.max_results,
        )
    }

    pub fn prefix(&self, timeout: Duration) -> SearchStrategy {
        strategy(
            "prefix",
            format!(r"\b{}\w+", self.escaped),
            PREFIX_CONFIDENCE,
            Bucket::Fuzzy,
            false,
            timeout,
            self.max_results,
        )
    }

    pub fn suffix(&self, timeout: Duration) -> SearchStrategy {
        strategy(
            "suffix",
            format!(r"\w+{}\b", self.escaped),
            SUFFIX_CONFIDENCE,
            Bucket::Fuzzy,
            false,
            timeout,
            self.max_results,
        )
    }

    pub fn case_insensitive(&self, timeout: Duration) -> SearchStrategy {
        strategy(
            "case_insensitive",
            format!(r"\b(?:{0}\w*|\w*{0})\b", self.escaped),
            CASE_INSENSITIVE_CONFIDENCE,
            Bucket::Fuzzy,
            true,
            timeout,
            self.max_results,
        )
    }

    /// Tokens joined by wildcards; `None` for single-token identifiers,
    /// which the case-insensitive strategy already covers
    pub fn token_fuzzy(&self, timeout: Duration) -> Option<SearchStrategy> {
        let tokens = tokenize(&self.identifier);
        if tokens.len() < 2 {
            return None;
        }
        let pattern = tokens
            .iter()
            .map(|t| regex::escape(t))
            .collect::<Vec<_>>()
            .join(".*");
        Some(strategy(
            "token_fuzzy",
            pattern,
            TOKEN_FUZZY_CONFIDENCE,
            Bucket::Fuzzy,
            true,
            timeout,
            self.max_results,
        ))
    }

    /// One alternation over all semantic variants; `None` when there are none
    pub fn semantic(&self, timeout: Duration) -> Option<SearchStrategy> {
        let variants = semantic_variants(&self.identifier);
        if variants.is_empty() {
            return None;
        }
        let alternation = variants
            .iter()
            .map(|v| regex::escape(v))
            .collect::<Vec<_>>()
            .join("|");
        Some(strategy(
            "semantic",
            format!(r"\b(?:{})\b", alternation),
            SEMANTIC_CONFIDENCE,
            Bucket::Conceptual,
            false,
            timeout,
            self.max_results,
        ))
    }
}

/// Fast cascade in priority order: exact, prefix, suffix, then the
/// case-insensitive fallback
pub fn fast_cascade(identifier: &str, config: &OrchestratorConfig) -> Vec<SearchStrategy> {
    let builder = StrategyBuilder::new(identifier, config);
    let timeout = config.cascade_timeout();
    vec![
        builder.exact(timeout),
        builder.prefix(timeout),
        builder.suffix(timeout),
        builder.case_insensitive(timeout),
    ]
}

/// Full strategy set used after a failed cascade
pub fn full_set(identifier: &str, config: &OrchestratorConfig) -> Vec<SearchStrategy> {
    let builder = StrategyBuilder::new(identifier, config);
    let timeout = config.full_timeout();
    let mut strategies = vec![
        builder.exact(timeout),
        builder.prefix(timeout),
        builder.suffix(timeout),
        builder.case_insensitive(timeout),
    ];
    strategies.extend(builder.token_fuzzy(timeout));
    if config.semantic_variants {
        strategies.extend(builder.semantic(timeout));
    }
    strategies
}
