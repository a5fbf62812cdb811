//! Feed Client: a TCP client that opens one authenticated push channel, subscribes to
//! every symbol of a watchlist file, and prints merged quotes as they arrive. It keeps
//! the channel alive with heartbeats and reconnects with backoff when it drops.
//!
//! Usage example (CLI):
//! ```bash
//! feed_client --server-addr 192.168.0.10:4000 --token $TOKEN --path ./watchlist.txt
//! ```
//!
//! The watchlist file should contain symbols separated by commas, spaces, or new lines.
//! See `feed_common::symbols` for details.
#![warn(missing_docs)]
mod args;

use crate::args::Args;
use clap::Parser;
use feed_client::{Credential, FeedConfig, ListenerId, Session, SubscriptionHandle, TcpConnector};
use feed_common::net::{FEED_PORT, addr};
use feed_common::symbols::SymbolParser;
use feed_common::{FeedError, Result, Symbol};
use log::{error, info, warn};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

fn main() -> Result<()> {
    init_logger();
    let args = Args::parse();
    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = shutdown.clone();
        ctrlc::set_handler(move || {
            info!("Ctrl+C received. Shutting down client...");
            shutdown.store(true, Ordering::SeqCst);
        })
        .map_err(|e| FeedError::Format(format!("Error setting Ctrl+C handler: {}", e)))?;
    }

    let mut config = match &args.config {
        Some(path) => FeedConfig::from_json_file(&normalize_path(path))?,
        None => FeedConfig::default(),
    };
    if let Some(capacity) = args.series_capacity {
        config.series_capacity = capacity;
    }

    let server_addr = args.server_addr.trim().replace('"', "");
    let server_addr = if server_addr.contains(':') {
        server_addr
    } else {
        warn!("--server-addr has no port, using FEED_PORT ({})", FEED_PORT);
        addr(&server_addr, FEED_PORT)
    };

    let file_path = normalize_path(&args.path);
    if !is_file_exist(&file_path) {
        error!("Watchlist file not found: {}", file_path.display());
        return Err(FeedError::ParseSymbolsFile(format!(
            "no such file: {}",
            file_path.display()
        )));
    }
    let symbols = Symbol::parse_from_file(BufReader::new(File::open(&file_path)?))?;
    info!("Symbols: {:?}", symbols);

    let connector = TcpConnector::new(server_addr, config.connect_timeout());
    let mut session = Session::start(&config, connector, Credential::new(args.token.trim()))?;
    session.on_state_change(|state| info!("STATUS: {}", state));

    let registry = session.registry();
    let mut handles: Vec<SubscriptionHandle> = Vec::with_capacity(symbols.len());
    for symbol in symbols {
        let json = args.json;
        let handle = registry.subscribe(symbol, ListenerId::from("cli"), move |_, quote| {
            if json {
                match serde_json::to_string(quote) {
                    Ok(line) => println!("{}", line),
                    Err(e) => warn!("Cannot encode quote {}: {}", quote.symbol, e),
                }
            } else {
                info!(
                    "QUOTE: {} Price={:.2} Change={:+.2} ({:+.2}%) Trend={}",
                    quote.symbol,
                    quote.current_price,
                    quote.price_change(),
                    quote.percentage_change(),
                    quote.trend()
                );
            }
        })?;
        handles.push(handle);
    }

    info!("Client is running. Press Ctrl+C to exit.");
    session.run_until(&shutdown);

    info!("Client stopping...");
    drop(handles);
    session.shutdown()
}

fn init_logger() {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();
}

/// Normalize a CLI-provided path string by trimming whitespace and matching quotes.
///
/// This allows passing Windows paths in quotes without breaking parsing.
fn normalize_path(raw: &str) -> PathBuf {
    let trimmed = raw.trim();
    let no_quotes = trimmed
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(trimmed);
    PathBuf::from(no_quotes)
}

/// Returns `true` if the provided path exists and is a regular file.
fn is_file_exist(path: &Path) -> bool {
    path.exists() && path.is_file()
}
