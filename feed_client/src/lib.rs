//! Live quote subscription core.
//!
//! This crate aggregates:
//! - `config`: client configuration with JSON overrides.
//! - `connection`: the single push channel, its heartbeat and its reconnect loop.
//! - `registry`: reference-counted per-symbol subscriptions and quote fan-out.
//! - `model`: merged `Quote` state, the merge policy, and portfolio holdings.
//! - `order`: order entry against a `TradingBackend`.
//! - `session`: the event loop tying the registry to the connection.
#![warn(missing_docs)]
pub mod config;
pub mod connection;
pub mod model;
pub mod order;
pub mod registry;
pub mod session;

pub use config::FeedConfig;
pub use connection::tcp::TcpConnector;
pub use connection::{ConnectionEvent, Connector, Credential};
pub use model::quote::{Quote, QuoteMergePolicy, Trend};
pub use registry::{DispatchOutcome, ListenerId, SubscriptionHandle, SubscriptionRegistry};
pub use session::{ConnectionState, Session};
