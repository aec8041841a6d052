//! Semfora Search CLI entry point

use std::io::Write;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use futures_util::StreamExt;
use tracing_subscriber::EnvFilter;

use semfora_search::cli::{FindArgs, GrepArgs, TokensArgs};
use semfora_search::search::lang_from_extension;
use semfora_search::{
    Bucket, Cli, Commands, EnhancedMatches, IdentifierAnalysis, Match, OrchestratorStats,
    OutputFormat, ProcessPool, SearchConfig, SearchError, SearchOrchestrator, SmartCache,
    StreamOutcome, StreamingSearchEngine,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse_args();
    init_tracing(cli.verbose);

    match run(&cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            e.downcast_ref::<SearchError>()
                .map(SearchError::exit_code)
                .unwrap_or(ExitCode::FAILURE)
        }
    }
}

/// Logs go to stderr so stdout stays parseable
fn init_tracing(verbose: bool) {
    let directive = if verbose {
        "semfora_search=debug"
    } else {
        "semfora_search=info"
    };
    let mut filter = EnvFilter::from_default_env();
    if let Ok(directive) = directive.parse() {
        filter = filter.add_directive(directive);
    }
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

async fn run(cli: &Cli) -> anyhow::Result<()> {
    match &cli.command {
        Commands::Find(args) => run_find(cli, args).await,
        Commands::Grep(args) => run_grep(cli, args).await,
        Commands::Tokens(args) => run_tokens(cli, args),
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<SearchConfig> {
    match &cli.config {
        Some(path) => Ok(SearchConfig::from_path(path)?),
        None => Ok(SearchConfig::load()),
    }
}

// ============================================
// find
// ============================================

async fn run_find(cli: &Cli, args: &FindArgs) -> anyhow::Result<()> {
    let config = load_config(cli)?;
    let orchestrator = SearchOrchestrator::new(&config).context("failed to start search")?;

    let result = orchestrator.process(&args.to_query()).await;
    let stats = args.stats.then(|| orchestrator.stats());
    orchestrator.shutdown();

    match cli.format {
        OutputFormat::Json => {
            let mut value = serde_json::to_value(&result)?;
            if let Some(stats) = stats {
                value["stats"] = serde_json::to_value(stats)?;
            }
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        OutputFormat::Text => {
            print!("{}", format_find(&args.identifier, &result));
            if let Some(stats) = stats {
                print!("{}", format_stats(&stats));
            }
        }
    }
    Ok(())
}

fn format_find(identifier: &str, result: &EnhancedMatches) -> String {
    let millis = result.search_time.as_secs_f64() * 1000.0;
    if result.is_empty() {
        return format!("No matches for {} ({:.1}ms)\n", identifier, millis);
    }

    let mut out = format!(
        "{} matches for {} in {} files (confidence {:.2}, {:.1}ms, via {})\n",
        result.total(),
        identifier,
        result.files.len(),
        result.confidence,
        millis,
        result.tools_used.join(", ")
    );

    for bucket in [Bucket::Exact, Bucket::Fuzzy, Bucket::Conceptual] {
        let matches = result.bucket(bucket);
        if matches.is_empty() {
            continue;
        }
        out.push_str(&format!("\n{} ({}):\n", bucket.source().as_str(), matches.len()));
        for m in matches {
            out.push_str(&format!(
                "  {}:{}:{} [{}] {}\n",
                m.file.display(),
                m.line,
                m.column + 1,
                lang_from_extension(&m.file).unwrap_or("?"),
                m.text.trim()
            ));
        }
    }
    out
}

fn format_stats(stats: &OrchestratorStats) -> String {
    format!(
        "\nqueries: {}  cache hits: {}  filter hits: {}  cascade failures: {}  fatal: {}\n\
         pool: {} spawned, {} failed\n\
         search cache: {} entries, hit rate {:.2}\n\
         result cache: {} entries, hit rate {:.2}\n",
        stats.queries,
        stats.cache_hits,
        stats.filter_hits,
        stats.cascade_failures,
        stats.fatal_failures,
        stats.pool.spawned,
        stats.pool.failed,
        stats.search_cache.entries,
        stats.search_cache.hit_rate,
        stats.result_cache.entries,
        stats.result_cache.hit_rate,
    )
}

// ============================================
// grep
// ============================================

async fn run_grep(cli: &Cli, args: &GrepArgs) -> anyhow::Result<()> {
    let config = load_config(cli)?;
    let pool = ProcessPool::new(&config.pool).context("failed to start search")?;
    let cache = Arc::new(SmartCache::new(config.cache.clone())?);
    let engine = StreamingSearchEngine::new(pool, cache, config.engine.clone());

    let mut stream = engine.search_stream(&args.to_options()).await?;
    let handle = stream.handle();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            handle.cancel();
        }
    });

    let mut printed = 0usize;
    let mut failure = None;
    while let Some(item) = stream.next().await {
        match item {
            Ok(m) => {
                print_match(cli.format, &m)?;
                printed += 1;
            }
            Err(e) => {
                failure = Some(e);
                break;
            }
        }
    }
    interrupt.abort();

    let outcome = stream.outcome();
    tracing::debug!(
        "[SEARCH] {} matches, outcome {:?}, cached {}",
        printed,
        outcome,
        stream.from_cache()
    );
    engine.pool().destroy();
    engine.cache().dispose();

    if let Some(e) = failure {
        return Err(e.into());
    }
    if outcome == Some(StreamOutcome::LimitReached) {
        eprintln!("(stopped after {} matches)", printed);
    }
    Ok(())
}

fn print_match(format: OutputFormat, m: &Match) -> anyhow::Result<()> {
    let mut stdout = std::io::stdout();
    match format {
        OutputFormat::Json => writeln!(stdout, "{}", serde_json::to_string(m)?)?,
        OutputFormat::Text => writeln!(
            stdout,
            "{}:{}:{}:{}",
            m.file.display(),
            m.line,
            m.column + 1,
            m.text
        )?,
    }
    Ok(())
}

// ============================================
// tokens
// ============================================

fn run_tokens(cli: &Cli, args: &TokensArgs) -> anyhow::Result<()> {
    let analysis = IdentifierAnalysis::new(&args.identifier);
    match cli.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&analysis)?),
        OutputFormat::Text => {
            println!("identifier: {}", analysis.identifier);
            println!("convention: {}", analysis.convention);
            println!("words:      {}", analysis.words.join(", "));
            println!("tokens:     {}", analysis.tokens.join(", "));
            if analysis.variants.is_empty() {
                println!("variants:   (none)");
            } else {
                println!("variants:");
                for variant in &analysis.variants {
                    println!("  {}", variant);
                }
            }
        }
    }
    Ok(())
}
