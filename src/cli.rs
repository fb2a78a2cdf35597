use std::path::PathBuf;

use clap::Parser;

/// Scrape per-episode download links for every series in the catalog, resuming from the
/// state left by previous runs.
#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    /// Directory holding the catalog, state files and per-series output.
    #[arg(long, default_value = "data/cimanow/ar-series")]
    pub data_dir: PathBuf,

    /// Catalog JSON (default: `<data-dir>/ar-series.json`).
    #[arg(long)]
    pub catalog: Option<PathBuf>,

    /// Episode pages fetched concurrently within one series.
    #[arg(long, default_value_t = 10)]
    pub batch_size: usize,

    /// Maximum concurrent HTTP requests across the whole run.
    #[arg(long, default_value_t = 50)]
    pub max_connections: usize,

    /// Attempts per page before an episode is recorded as failed.
    #[arg(long, default_value_t = 3)]
    pub attempts: u32,

    /// Fixed delay between attempts.
    #[arg(long, default_value_t = 500)]
    pub backoff_ms: u64,

    /// Per-request timeout.
    #[arg(long, default_value_t = 30)]
    pub timeout_secs: u64,

    /// Skip series already recorded as completed instead of checking them for new episodes.
    #[arg(long)]
    pub skip_completed: bool,

    /// Also append log lines to this file.
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}
