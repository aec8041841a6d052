//! CLI argument definitions using clap with subcommand architecture
//!
//! `find` runs the orchestrated strategy cascade, `grep` streams a raw
//! search and `tokens` shows how an identifier is split and varied.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

use crate::ripgrep::SearchOptions;
use crate::schema::SearchQuery;

/// Fast identifier search for code intelligence
#[derive(Parser, Debug)]
#[command(name = "semfora-search")]
#[command(about = "Locate identifiers in a source tree with cached, cascading rg searches")]
#[command(version)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Output format (applies to all commands)
    #[arg(short, long, default_value = "text", value_enum, global = true)]
    pub format: OutputFormat,

    /// Show verbose output (debug logging on stderr)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file (defaults to the user config directory)
    #[arg(long, value_name = "FILE", env = "SEMFORA_SEARCH_CONFIG", global = true)]
    pub config: Option<PathBuf>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Find an identifier using the strategy cascade
    #[command(visible_alias = "f")]
    Find(FindArgs),

    /// Stream raw matches for a regex pattern
    #[command(visible_alias = "g")]
    Grep(GrepArgs),

    /// Show tokenization, naming convention and semantic variants
    #[command(visible_alias = "t")]
    Tokens(TokensArgs),
}

// ============================================
// Find Subcommand
// ============================================

/// Arguments for the find command
#[derive(Args, Debug)]
pub struct FindArgs {
    /// Identifier to locate
    #[arg(value_name = "IDENTIFIER")]
    pub identifier: String,

    /// Directory to search
    #[arg(value_name = "PATH", default_value = ".")]
    pub path: PathBuf,

    /// Restrict to an rg file type (can be repeated)
    #[arg(short = 't', long = "type", value_name = "TYPE")]
    pub file_types: Vec<String>,

    /// Match case-insensitively in every strategy
    #[arg(short, long)]
    pub ignore_case: bool,

    /// Drop matches in test files
    #[arg(long)]
    pub no_tests: bool,

    /// Print orchestrator statistics after the results
    #[arg(long)]
    pub stats: bool,
}

impl FindArgs {
    pub fn to_query(&self) -> SearchQuery {
        SearchQuery::new(self.identifier.clone(), self.path.clone())
            .with_file_types(self.file_types.clone())
            .with_case_sensitive(!self.ignore_case)
            .with_tests(!self.no_tests)
    }
}

// ============================================
// Grep Subcommand
// ============================================

/// Arguments for the grep command
#[derive(Args, Debug)]
pub struct GrepArgs {
    /// Regex pattern
    #[arg(value_name = "PATTERN")]
    pub pattern: String,

    /// Directory to search
    #[arg(value_name = "PATH", default_value = ".")]
    pub path: PathBuf,

    /// Restrict to an rg file type (can be repeated)
    #[arg(short = 't', long = "type", value_name = "TYPE")]
    pub file_types: Vec<String>,

    /// Case-insensitive match
    #[arg(short, long)]
    pub ignore_case: bool,

    /// Stop after this many matches
    #[arg(short = 'm', long = "max-count", value_name = "N")]
    pub limit: Option<usize>,

    /// Search timeout in milliseconds
    #[arg(long, value_name = "MS")]
    pub timeout_ms: Option<u64>,

    /// Search hidden files and directories
    #[arg(long)]
    pub hidden: bool,

    /// Bypass the result cache
    #[arg(long)]
    pub no_cache: bool,
}

impl GrepArgs {
    pub fn to_options(&self) -> SearchOptions {
        let mut options = SearchOptions::new(self.pattern.clone(), self.path.clone())
            .case_insensitive(self.ignore_case)
            .with_file_types(self.file_types.clone());
        if let Some(limit) = self.limit {
            options = options.with_limit(limit);
        }
        if let Some(ms) = self.timeout_ms {
            options = options.with_timeout(Duration::from_millis(ms));
        }
        if self.hidden {
            options = options.with_hidden(true);
        }
        if self.no_cache {
            options = options.without_cache();
        }
        options
    }
}

// ============================================
// Tokens Subcommand
// ============================================

/// Arguments for the tokens command
#[derive(Args, Debug)]
pub struct TokensArgs {
    /// Identifier to analyze
    #[arg(value_name = "IDENTIFIER")]
    pub identifier: String,
}

/// Output format
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable text (default)
    #[default]
    #[value(alias = "pretty")]
    Text,
    /// JSON for machine parsing
    Json,
}

impl Cli {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
