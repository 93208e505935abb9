use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use recall_core::config::RecallConfig;
use recall_hybrid::engine::{FactOutcome, Stats};
use recall_hybrid::{RecallEngine, RecallResponse, RecallStatus, ReindexReport};

/// Search every memory backend at once, or maintain the local chunk index.
#[derive(Parser)]
#[command(name = "recall")]
#[command(version)]
struct Cli {
    /// Free-text query (default action)
    query: Vec<String>,

    /// Reindex changed source documents
    #[arg(long)]
    index: bool,

    /// With --index: rewrite every document regardless of fingerprint
    #[arg(long, requires = "index")]
    force: bool,

    /// Store a fact in every fact store
    #[arg(long, value_name = "TEXT")]
    add: Option<String>,

    /// Show index and backend statistics
    #[arg(long)]
    stats: bool,

    /// Maximum number of merged results
    #[arg(short = 'n', long)]
    limit: Option<usize>,

    /// Print raw JSON instead of formatted text
    #[arg(long)]
    json: bool,

    /// No progress bar
    #[arg(short, long)]
    quiet: bool,

    /// Log progress to stderr
    #[arg(short, long)]
    verbose: bool,

    /// Extra configuration file merged over config.toml
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "info" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let query = cli.query.join(" ");
    if !cli.index && !cli.stats && cli.add.is_none() && query.trim().is_empty() {
        bail!("nothing to do: give a query, --index, --add or --stats (see --help)");
    }

    let config = RecallConfig::load(cli.config.as_deref())?;
    let mut engine = RecallEngine::from_config(&config)?;
    debug!(backends = engine.backends().len(), "engine ready");

    if cli.index {
        if !cli.quiet && !cli.json {
            if let Some(indexer) = engine.indexer_mut() {
                indexer.set_progress(progress_bar()?);
            }
        }
        let report = engine.reindex(cli.force).await?;
        if cli.json {
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            print_report(&report);
        }
    }

    if let Some(text) = &cli.add {
        let outcomes = engine.add_fact(text).await?;
        if cli.json {
            println!("{}", serde_json::to_string_pretty(&outcomes)?);
        } else {
            print_outcomes(&outcomes);
        }
    }

    if cli.stats {
        let stats = engine.stats().await?;
        if cli.json {
            println!("{}", serde_json::to_string_pretty(&stats)?);
        } else {
            print_stats(&stats);
        }
    }

    if !query.trim().is_empty() {
        let limit = cli.limit.unwrap_or(config.search.default_limit);
        let response = engine.recall(&query, limit).await?;
        if cli.json {
            println!("{}", serde_json::to_string_pretty(&response)?);
        } else {
            print_response(&response);
        }
    }
    Ok(())
}

fn progress_bar() -> Result<ProgressBar> {
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} files {msg}")?
            .progress_chars("#>-"),
    );
    Ok(pb)
}

fn print_report(report: &ReindexReport) {
    println!(
        "Indexed {} files ({} chunks), {} unchanged, {} removed",
        report.files_processed, report.chunks_written, report.files_skipped, report.files_removed
    );
    for failure in &report.failures {
        println!("  retry pending: {} ({})", failure.path, failure.error);
    }
    for failure in &report.mirror_failures {
        println!("  mirror copy failed: {} ({})", failure.path, failure.error);
    }
}

fn print_outcomes(outcomes: &[FactOutcome]) {
    for o in outcomes {
        match (&o.fact_id, &o.error) {
            (Some(id), _) => println!("{}: stored ({})", o.backend, id),
            (None, Some(e)) => println!("{}: not stored ({})", o.backend, e),
            (None, None) => println!("{}: not stored", o.backend),
        }
    }
}

fn print_stats(stats: &Stats) {
    println!("Indexed chunks: {}", stats.indexed_chunks);
    match stats.last_full_index {
        Some(at) => println!("Last full index: {}", at.to_rfc3339()),
        None => println!("Last full index: never"),
    }
    println!("Sources:");
    for s in &stats.sources {
        let note = if s.pending { " (retry pending)" } else { "" };
        println!("  {:>5}  {}{}", s.chunks, s.path, note);
    }
    println!("Backends:");
    for b in &stats.backends {
        let items = b.items.map_or_else(|| "-".to_string(), |n| n.to_string());
        let state = match &b.status.last_error {
            None => "up".to_string(),
            Some(e) => format!("down ({})", e),
        };
        println!("  {:<10} items {:>6}  {}", b.status.name, items, state);
    }
}

fn print_response(response: &RecallResponse) {
    for reply in response.backends.iter().filter(|r| !r.status.reachable) {
        if let Some(e) = &reply.status.last_error {
            eprintln!("note: {}", e);
        }
    }
    match response.status {
        RecallStatus::NoBackendsAvailable => {
            println!("No backends available for \"{}\"", response.query);
            return;
        }
        RecallStatus::NoResults => {
            println!("No results for \"{}\"", response.query);
            return;
        }
        RecallStatus::Results => {}
    }
    for (i, ranked) in response.results.iter().enumerate() {
        let r = &ranked.result;
        let mut title = format!("{}. [{} {:.3}]", i + 1, r.backend, r.score);
        if let Some(headers) = r.headers() {
            title.push(' ');
            title.push_str(headers);
        }
        if let Some(path) = r.source_path() {
            title.push_str(&format!(" ({})", path));
        }
        println!("{}", title);
        for line in r.text.trim().lines() {
            println!("   {}", line);
        }
        let others: Vec<&str> = ranked.surfaced_by.iter().map(String::as_str).filter(|b| *b != r.backend).collect();
        if !others.is_empty() {
            println!("   also from: {}", others.join(", "));
        }
        println!();
    }
}
