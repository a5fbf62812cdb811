//! Wire frames exchanged with the push-update server.
//!
//! Both directions use newline-delimited JSON. The client sends `ControlMessage`
//! frames (authentication, subscribe/unsubscribe by symbol, keep-alive ping) and
//! receives `PushMessage` frames (quote updates and ping replies).
use serde::{Deserialize, Serialize};

use crate::error::FeedError;
use crate::symbols::Symbol;

/// Frame sent from the client to the push server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum ControlMessage {
    /// Authenticates (or re-authenticates) the channel with an access token.
    Authenticate {
        /// Socket access token.
        token: String,
    },
    /// Starts the per-symbol price stream.
    SubscribeToStocks {
        /// Symbol to stream.
        symbol: Symbol,
    },
    /// Stops the per-symbol price stream.
    UnsubscribeFromStocks {
        /// Symbol to stop.
        symbol: Symbol,
    },
    /// Keep-alive.
    Ping,
}

impl ControlMessage {
    /// Encodes the frame as a single JSON line, newline included.
    pub fn to_line(&self) -> Result<Vec<u8>, FeedError> {
        let mut bytes = serde_json::to_vec(self)?;
        bytes.push(b'\n');
        Ok(bytes)
    }
}

/// Frame received from the push server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum PushMessage {
    /// Price update for one symbol.
    Quote(QuoteUpdate),
    /// Reply to `ControlMessage::Ping`.
    Pong,
}

impl PushMessage {
    /// Decodes a single JSON frame (trailing whitespace is ignored).
    pub fn from_line(line: &[u8]) -> Result<Self, FeedError> {
        Ok(serde_json::from_slice(line)?)
    }
}

/// One OHLC point of the trailing price series used for sparklines.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    /// Point time, seconds since the UNIX epoch.
    pub time: i64,
    /// Opening price.
    pub open: f64,
    /// Highest price.
    pub high: f64,
    /// Lowest price.
    pub low: f64,
    /// Closing price.
    pub close: f64,
}

impl SeriesPoint {
    fn is_finite(&self) -> bool {
        [self.open, self.high, self.low, self.close]
            .iter()
            .all(|v| v.is_finite())
    }
}

/// Full or partial quote pushed for a symbol.
///
/// Prices are always present; identity fields and series data are optional and only
/// overwrite the merged quote when present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteUpdate {
    /// Symbol the update belongs to.
    pub symbol: Symbol,
    /// Latest traded price.
    pub current_price: f64,
    /// Previous session close, the baseline for change computation.
    pub last_day_traded_price: f64,
    /// Backend stock identifier.
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub stock_id: Option<String>,
    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company_name: Option<String>,
    /// Logo URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,
    /// New point to append to the trailing series.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub series_point: Option<SeriesPoint>,
    /// Full replacement of the trailing series.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub series: Option<Vec<SeriesPoint>>,
}

impl QuoteUpdate {
    /// Creates a price-only update.
    pub fn new(symbol: Symbol, current_price: f64, last_day_traded_price: f64) -> Self {
        Self {
            symbol,
            current_price,
            last_day_traded_price,
            stock_id: None,
            company_name: None,
            icon_url: None,
            series_point: None,
            series: None,
        }
    }

    /// Checks prices and series values before the update is merged.
    pub fn validate(&self) -> Result<(), FeedError> {
        for (name, value) in [
            ("currentPrice", self.current_price),
            ("lastDayTradedPrice", self.last_day_traded_price),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(FeedError::InvalidUpdate(format!(
                    "{} {} for {} must be a non-negative number",
                    name, value, self.symbol
                )));
            }
        }
        let points = self.series_point.iter().chain(self.series.iter().flatten());
        for point in points {
            if !point.is_finite() {
                return Err(FeedError::InvalidUpdate(format!(
                    "series point at {} for {} has a non-finite value",
                    point.time, self.symbol
                )));
            }
        }
        Ok(())
    }
}
