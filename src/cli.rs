//! Command-line interface.
//!
//! Every option can also come from the environment; command-line values
//! override the configuration file.

use clap::Parser;

/// Ingest articles from configured news sources and update vocabulary statistics.
///
/// # Examples
///
/// ```sh
/// # Run every source in the config file
/// vocab_ingest -c ./sources.yaml
///
/// # Only two sources, reports under ./json, no statistics rebuild
/// vocab_ingest -c ./sources.yaml -s cnn -s npr -j ./json --no-stats
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Path to the YAML configuration file
    #[arg(short, long, env = "VOCAB_INGEST_CONFIG", default_value = "vocab_ingest.yaml")]
    pub config: String,

    /// SQLite database path (overrides `database_path`)
    #[arg(short, long, env = "VOCAB_INGEST_DATABASE")]
    pub database: Option<String>,

    /// Output directory for JSON reports (overrides `json_output_dir`)
    #[arg(short, long, env = "VOCAB_INGEST_JSON_DIR")]
    pub json_output_dir: Option<String>,

    /// Only run these source ids (repeatable)
    #[arg(short, long = "source")]
    pub sources: Vec<String>,

    /// Skip the word statistics rebuild at the end of the run
    #[arg(long)]
    pub no_stats: bool,
}
