//! # vocab_ingest
//!
//! Pulls articles from the news sources listed in a YAML configuration file,
//! stores them in SQLite together with every word they contain, and rebuilds
//! corpus-wide word statistics.
//!
//! ## Usage
//!
//! ```sh
//! vocab_ingest -c ./sources.yaml -j ./json
//! ```
//!
//! ## Flow
//!
//! 1. Load configuration and apply command-line overrides
//! 2. Open (and migrate) the database
//! 3. Build one adapter per source and a shared HTTP transport
//! 4. Run the orchestrator over all sources concurrently
//! 5. Write the JSON report and statistics when an output dir is set

use clap::Parser;
use std::error::Error;
use tracing::{debug, error, info, instrument, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};
use vocab_ingest::outputs::json;
use vocab_ingest::utils::ensure_writable_dir;
use vocab_ingest::{
    ArticleStore, Config, Fetcher, FrequencyEngine, Orchestrator, ReqwestTransport, WordExtractor,
    build_sources,
};

mod cli;

use cli::Cli;

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!(version = env!("CARGO_PKG_VERSION"), "vocab_ingest starting up");

    let args = Cli::parse();
    debug!(?args, "Parsed CLI arguments");

    // ---- Configuration ----
    let mut config = Config::load(&args.config)?;
    if let Some(database) = &args.database {
        config.database_path = database.clone();
    }
    if args.json_output_dir.is_some() {
        config.json_output_dir = args.json_output_dir.clone();
    }
    if args.no_stats {
        config.pipeline.rebuild_stats = false;
    }

    // Early check: fail before fetching anything if reports cannot be written
    if let Some(dir) = &config.json_output_dir {
        if let Err(e) = ensure_writable_dir(dir).await {
            error!(
                path = %dir,
                error = %e,
                "JSON output directory is not writable (fix perms or choose a different path)"
            );
            return Err(e);
        }
    }

    // ---- Wiring ----
    let store = ArticleStore::open(&config.database_path)?;
    let sources = build_sources(&config.sources, &args.sources)?;
    if sources.is_empty() {
        warn!("No sources configured; only statistics will be refreshed");
    }

    let transport = ReqwestTransport::new(&config.fetcher)?;
    let fetcher = Fetcher::new(transport, config.fetcher.clone(), config.breaker.clone());
    let orchestrator = Orchestrator::new(
        fetcher,
        store.clone(),
        WordExtractor::new(&config.extractor),
        FrequencyEngine::new(&config.frequency),
        config.pipeline.clone(),
    );

    // ---- Run ----
    let report = orchestrator.run(&sources).await;

    for source in &report.sources {
        info!(
            source = %source.source,
            attempted = source.attempted,
            processed = source.processed,
            duplicates = source.duplicates,
            errors = source.error_count(),
            success_rate = source.success_rate,
            degraded = source.degraded,
            "Source summary"
        );
    }

    // ---- Outputs ----
    if let Some(dir) = &config.json_output_dir {
        if let Err(e) = json::write_report(&report, dir).await {
            error!(error = %e, "Failed to write JSON report");
        }
        if report.word_stats.is_some() {
            match store.word_stats() {
                Ok(stats) => {
                    if let Err(e) = json::write_word_stats(&stats, dir).await {
                        error!(error = %e, "Failed to write word statistics");
                    }
                }
                Err(e) => error!(error = %e, "Failed to read word statistics"),
            }
        }
    }

    let elapsed = start_time.elapsed();
    info!(
        ?elapsed,
        secs = elapsed.as_secs(),
        millis = elapsed.subsec_millis(),
        attempted = report.attempted_count(),
        processed = report.processed_count(),
        degraded = ?report.degraded_sources(),
        "Execution complete"
    );

    Ok(())
}
