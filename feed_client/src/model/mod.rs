//! Data model types rendered by the UI and consumed by order entry.
//!
//! This module groups the client-side state types:
//! - `quote`: merged `Quote` state and the `QuoteMergePolicy` that builds it.
//! - `holding`: owned stock lots fetched from the backend.
pub mod holding;
pub mod quote;
