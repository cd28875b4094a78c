//! CLI argument definitions.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `screen` | Run the full staged screen over a universe |
//! | `snapshot` | Fetch snapshots for the given symbols |
//! | `bars` | Fetch a bar series for one symbol |
//!
//! # Examples
//!
//! ```bash
//! # Screen a universe file, keep the top 10
//! marketsieve screen --universe-file universe.txt --limit 10
//!
//! # Snapshots for two symbols as a table
//! marketsieve snapshot HK.00700 HK.00005 --format table
//!
//! # 60 daily bars for one symbol
//! marketsieve bars HK.00700 --count 60 --pretty
//! ```

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Staged market screener over a rate-limited quote gateway.
#[derive(Debug, Parser)]
#[command(name = "marketsieve", author, version, about)]
pub struct Cli {
    /// Output format for results.
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Json)]
    pub format: OutputFormat,

    /// Pretty-print JSON output.
    #[arg(long, global = true, default_value_t = false)]
    pub pretty: bool,

    /// Base URL of the quote gateway.
    #[arg(long, global = true, default_value = "http://127.0.0.1:11111")]
    pub gateway_url: String,

    /// Use the offline no-op transport instead of the real gateway.
    #[arg(long, global = true, default_value_t = false)]
    pub mock: bool,

    /// Per-request timeout in milliseconds.
    #[arg(long, global = true, default_value_t = 3_000)]
    pub timeout_ms: u64,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the full staged screen and print the ranked shortlist.
    Screen(ScreenArgs),
    /// Fetch snapshots for the given symbols.
    Snapshot(SnapshotArgs),
    /// Fetch a bar series for one symbol.
    Bars(BarsArgs),
}

#[derive(Debug, Args)]
pub struct ScreenArgs {
    /// Symbols to screen; omit to read them from --universe-file.
    pub symbols: Vec<String>,

    /// File with one symbol per line ('#' starts a comment).
    #[arg(long)]
    pub universe_file: Option<std::path::PathBuf>,

    #[command(flatten)]
    pub fetch: FetchArgs,

    /// Minimum last price.
    #[arg(long, default_value_t = 0.1)]
    pub min_price: f64,

    /// Minimum day volume.
    #[arg(long, default_value_t = 2_000_000)]
    pub min_volume: u64,

    /// Minimum market cap.
    #[arg(long, default_value_t = 2e8)]
    pub min_market_cap: f64,

    /// Maximum absolute day change rate (0.15 = ±15 %).
    #[arg(long, default_value_t = 0.15)]
    pub max_change_rate: f64,

    /// Minimum bars a series must carry.
    #[arg(long, default_value_t = 30)]
    pub min_bars: usize,

    /// SMA window for the momentum predicate; 0 disables it.
    #[arg(long, default_value_t = 20)]
    pub momentum_window: usize,

    /// Ceiling on return volatility; unset disables the predicate.
    #[arg(long)]
    pub max_volatility: Option<f64>,

    /// Shortlist length.
    #[arg(long, default_value_t = 10)]
    pub limit: usize,
}

#[derive(Debug, Args)]
pub struct SnapshotArgs {
    /// Symbols to fetch.
    #[arg(required = true)]
    pub symbols: Vec<String>,

    #[command(flatten)]
    pub fetch: FetchArgs,
}

#[derive(Debug, Args)]
pub struct BarsArgs {
    /// Symbol to fetch.
    pub symbol: String,

    /// Number of trailing bars.
    #[arg(long, default_value_t = 60)]
    pub count: usize,

    #[command(flatten)]
    pub fetch: FetchArgs,
}

/// Limiter, pool and cache knobs shared by every command.
#[derive(Debug, Args)]
pub struct FetchArgs {
    /// Call budget per sliding window.
    #[arg(long, default_value_t = 58)]
    pub max_calls: u32,

    /// Sliding window length in seconds.
    #[arg(long, default_value_t = 30.0)]
    pub window_secs: f64,

    /// Worker pool ceiling.
    #[arg(long, default_value_t = 10)]
    pub workers: usize,

    /// Symbols per upstream snapshot call.
    #[arg(long, default_value_t = 50)]
    pub batch_size: usize,

    /// Snapshot cache TTL in seconds.
    #[arg(long, default_value_t = 300)]
    pub snapshot_ttl_secs: u64,

    /// Series cache TTL in seconds.
    #[arg(long, default_value_t = 900)]
    pub series_ttl_secs: u64,

    /// Retry budget for transient upstream failures.
    #[arg(long, default_value_t = 3)]
    pub max_retries: u32,

    /// Bars per series fetch.
    #[arg(long, default_value_t = 60)]
    pub bar_count: usize,

    /// Universe truncation bound.
    #[arg(long, default_value_t = 5_000)]
    pub universe_cap: usize,
}

impl FetchArgs {
    pub fn to_config(&self) -> marketsieve_core::FetchConfig {
        marketsieve_core::FetchConfig {
            max_calls_per_window: self.max_calls,
            // Negative or NaN input collapses to zero and fails validation.
            window: std::time::Duration::try_from_secs_f64(self.window_secs)
                .unwrap_or(std::time::Duration::ZERO),
            worker_count: self.workers,
            batch_size: self.batch_size,
            snapshot_ttl: std::time::Duration::from_secs(self.snapshot_ttl_secs),
            series_ttl: std::time::Duration::from_secs(self.series_ttl_secs),
            max_retries: self.max_retries,
            bar_count: self.bar_count,
            universe_cap: self.universe_cap,
        }
    }
}
