//!
//! Common types and utilities shared by the live quote feed client.
//!
//! This crate aggregates:
//! - `error`: unified error type `FeedError` used across the workspace.
//! - `result`: handy `Result<T, FeedError>` alias.
//! - `symbols`: ticker symbols and watchlist parsing helpers.
//! - `message`: control frames sent to, and push frames received from, the feed server.
//! - `net`: networking constants and small helpers.
#![warn(missing_docs)]
pub mod error;
pub mod message;
pub mod net;
pub mod result;
pub mod symbols;

pub use error::FeedError;
pub use message::{ControlMessage, PushMessage, QuoteUpdate, SeriesPoint};
pub use result::Result;
pub use symbols::Symbol;
