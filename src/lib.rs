//! Semfora Search: fast identifier search for code intelligence
//!
//! This library locates identifiers in a source tree by driving an external
//! `rg` binary through a bounded process pool, caching results with
//! file-aware invalidation and escalating through a cascade of search
//! strategies with increasing fuzziness.
//!
//! # Components
//!
//! - [`process_pool`]: bounded, FIFO-fair concurrency for search processes
//! - [`cache`]: zone-aware result cache invalidated by mtime, TTL, file
//!   watchers and git HEAD changes
//! - [`ripgrep`]: streaming search engine with cancellation and timeouts
//! - [`orchestrator`]: strategy cascade, negative filter and result cache
//!
//! # Example
//!
//! ```ignore
//! use semfora_search::{SearchConfig, SearchOrchestrator, SearchQuery};
//!
//! let orchestrator = SearchOrchestrator::new(&SearchConfig::load())?;
//! let result = orchestrator.process(&SearchQuery::new("handleRequest", ".")).await;
//! for m in &result.exact {
//!     println!("{}:{}:{}", m.file.display(), m.line, m.column);
//! }
//! ```

pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod negative;
pub mod orchestrator;
pub mod process_pool;
pub mod ripgrep;
pub mod schema;
pub mod search;
pub mod strategy;
pub mod tokens;

// Re-export commonly used types
pub use cache::{CacheStats, SetOptions, SmartCache};
pub use cli::{Cli, Commands, OutputFormat};
pub use config::{CacheConfig, EngineConfig, OrchestratorConfig, PoolConfig, SearchConfig, ZoneConfig};
pub use error::{Result, SearchError};
pub use orchestrator::{OrchestratorStats, SearchOrchestrator};
pub use process_pool::{PoolStats, ProcessPool};
pub use ripgrep::{SearchOptions, SearchStream, StreamOutcome, StreamingSearchEngine};
pub use schema::{Bucket, EnhancedMatches, Match, MatchSource, SearchQuery, SearchStrategy};
pub use tokens::{IdentifierAnalysis, NamingConvention};
