//! Command-line arguments for the feed client.
//!
//! This module defines the CLI interface using `clap`. See `main` for end-to-end usage.
use clap::Parser;

/// Parsed command-line arguments.
#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Push server address as `host:port`.
    #[clap(long, default_value = "127.0.0.1:4000")]
    pub server_addr: String,

    /// Access token presented when the channel opens.
    #[clap(long)]
    pub token: String,

    /// Path to a text file with symbols to watch.
    /// Symbols may be separated by commas, spaces, or new lines.
    #[clap(long)]
    pub path: String,

    /// Optional JSON config file overriding the defaults.
    #[clap(long)]
    pub config: Option<String>,

    /// Overrides the number of series points kept per quote.
    #[clap(long)]
    pub series_capacity: Option<usize>,

    /// Print every merged quote as a JSON line instead of a log line.
    #[clap(long)]
    pub json: bool,
}
