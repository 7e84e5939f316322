//! JSON run reports and word statistics.

use crate::models::WordStat;
use crate::orchestrator::Report;
use std::error::Error;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{error, info, instrument};

/// Write a run [`Report`] to `{json_output_dir}/{date}/report_{HHMMSS}_{millis}.json`,
/// dated by the run's UTC start time.
///
/// Existing reports are never overwritten: a run starting in the same
/// millisecond as an earlier one gets a `_1`, `_2`, ... suffix.
///
/// # Returns
///
/// The path written.
#[instrument(level = "info", skip_all, fields(json_output_dir = %json_output_dir))]
pub async fn write_report(report: &Report, json_output_dir: &str) -> Result<PathBuf, Box<dyn Error>> {
    let json = serde_json::to_string_pretty(report)?;

    let day_dir = Path::new(json_output_dir).join(report.started_at.format("%Y-%m-%d").to_string());
    info!(dir = %day_dir.display(), "Ensuring report directory exists");
    if let Err(e) = fs::create_dir_all(&day_dir).await {
        error!(dir = %day_dir.display(), error = %e, "Failed to create report dir");
        return Err(e.into());
    }

    let stem = format!("report_{}", report.started_at.format("%H%M%S_%3f"));
    let (path, mut file) = create_unused(&day_dir, &stem).await?;
    file.write_all(json.as_bytes()).await?;
    file.flush().await?;
    info!(path = %path.display(), sources = report.sources.len(), "Wrote run report");
    Ok(path)
}

/// Create `{dir}/{stem}.json`, or the first free `{stem}_{n}.json`.
async fn create_unused(dir: &Path, stem: &str) -> std::io::Result<(PathBuf, File)> {
    let mut n = 0u32;
    loop {
        let name = if n == 0 {
            format!("{stem}.json")
        } else {
            format!("{stem}_{n}.json")
        };
        let path = dir.join(name);
        match OpenOptions::new().write(true).create_new(true).open(&path).await {
            Ok(file) => return Ok((path, file)),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => n += 1,
            Err(e) => return Err(e),
        }
    }
}

/// Write the current statistics to `{json_output_dir}/word_stats.json`,
/// replacing any previous file.
#[instrument(level = "info", skip_all, fields(json_output_dir = %json_output_dir))]
pub async fn write_word_stats(stats: &[WordStat], json_output_dir: &str) -> Result<PathBuf, Box<dyn Error>> {
    let json = serde_json::to_string_pretty(stats)?;
    fs::create_dir_all(json_output_dir).await?;

    let path = Path::new(json_output_dir).join("word_stats.json");
    fs::write(&path, json).await?;
    info!(path = %path.display(), words = stats.len(), "Wrote word statistics");
    Ok(path)
}
