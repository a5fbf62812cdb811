//! Error types shared between the feed client library and its binary.
//!
//! The `FeedError` enum unifies I/O, serialization, channel communication,
//! connection, and order validation failures, so every crate in the workspace
//! propagates a single error type.
use std::io;

use thiserror::Error;

/// Unified error type shared across the workspace.
#[derive(Error, Debug)]
pub enum FeedError {
    /// I/O error originating from the standard library or sockets/files.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Generic formatting/validation error with a human-readable message.
    #[error("Format error: {0}")]
    Format(String),

    /// Failure while encoding/decoding JSON via serde_json.
    #[error("JSON serialization/deserialization error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    /// Channel send failed (e.g., receiver dropped); contains a short context string.
    #[error("Channel send failed: {0}")]
    ChannelSend(String),

    /// Error while parsing a watchlist file into `Symbol` values.
    #[error("Parse symbols file error: {0}")]
    ParseSymbolsFile(String),

    /// Text that is not a valid ticker symbol.
    #[error("Invalid symbol: {0:?}")]
    InvalidSymbol(String),

    /// The push channel is unreachable or dropped.
    #[error("Connection error: {0}")]
    Connection(String),

    /// An inbound quote update failed validation at the merge boundary.
    #[error("Invalid quote update: {0}")]
    InvalidUpdate(String),

    /// The same listener is already subscribed to the symbol.
    #[error("Listener {listener} is already subscribed to {symbol}")]
    DuplicateSubscription {
        /// Symbol of the existing subscription.
        symbol: String,
        /// Listener identity of the existing subscription.
        listener: String,
    },

    /// Requested order quantity is zero or above the allowed maximum.
    #[error("Invalid quantity {quantity}: {reason}")]
    InvalidQuantity {
        /// Quantity as entered.
        quantity: u64,
        /// Why it was refused.
        reason: String,
    },

    /// No holding of the symbol covers the requested sell quantity.
    #[error("Insufficient holding of {symbol}: requested {requested}, available {available}")]
    InsufficientHolding {
        /// Symbol being sold.
        symbol: String,
        /// Quantity requested.
        requested: u64,
        /// Quantity of the selected lot (0 when none exists).
        available: u64,
    },

    /// The backend refused an order; the message is meant for the user.
    #[error("Order rejected: {0}")]
    OrderRejected(String),

    /// A REST collaborator call failed.
    #[error("Backend error: {0}")]
    Backend(String),

    /// Invalid configuration value.
    #[error("Config error: {0}")]
    Config(String),
}
