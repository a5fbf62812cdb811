//! Merged quote state and the policy that folds pushed updates into it.
//!
//! A `Quote` is what UI rows render: the latest prices of a symbol, its identity
//! fields, and a bounded trailing OHLC series. Updates are merged strictly in arrival
//! order; embedded series times never cause an update to be rejected as stale.
//! Change values are derived on read so they can never disagree with the prices.
use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use feed_common::{QuoteUpdate, SeriesPoint, Symbol};
use serde::Serialize;
use strum_macros::Display;

/// Direction of the day's move, used to pick profit/loss colouring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum Trend {
    /// Price above the previous close.
    Profit,
    /// Price below the previous close.
    Loss,
    /// Unchanged, or no usable baseline.
    Neutral,
}

/// Current merged price-and-history state of a symbol.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    /// Symbol this quote belongs to.
    pub symbol: Symbol,
    /// Backend stock identifier, once the feed has sent one.
    pub stock_id: Option<String>,
    /// Display name.
    pub company_name: Option<String>,
    /// Logo URL.
    pub icon_url: Option<String>,
    /// Latest traded price.
    pub current_price: f64,
    /// Previous session close.
    pub last_day_traded_price: f64,
    /// Trailing OHLC series, strictly increasing in time, oldest first.
    pub recent_series: VecDeque<SeriesPoint>,
    /// Arrival time of the last merged update.
    pub updated_at: DateTime<Utc>,
    /// Set while the push channel is down; cleared by the next merge.
    pub stale: bool,
}

impl Quote {
    /// `current_price - last_day_traded_price`.
    pub fn price_change(&self) -> f64 {
        self.current_price - self.last_day_traded_price
    }

    /// Absolute change relative to the previous close, in percent.
    ///
    /// Returns `0.0` when the previous close is zero.
    pub fn percentage_change(&self) -> f64 {
        if self.last_day_traded_price == 0.0 {
            return 0.0;
        }
        (self.price_change() / self.last_day_traded_price).abs() * 100.0
    }

    /// Direction of the day's move.
    pub fn trend(&self) -> Trend {
        let change = self.price_change();
        if self.last_day_traded_price == 0.0 || change == 0.0 {
            Trend::Neutral
        } else if change > 0.0 {
            Trend::Profit
        } else {
            Trend::Loss
        }
    }
}

/// Merges pushed updates into the last known quote.
#[derive(Debug, Clone, Copy)]
pub struct QuoteMergePolicy {
    series_capacity: usize,
}

impl QuoteMergePolicy {
    /// Creates a policy keeping at most `series_capacity` series points (minimum 1).
    pub fn new(series_capacity: usize) -> Self {
        Self {
            series_capacity: series_capacity.max(1),
        }
    }

    /// Maximum length of the trailing series.
    pub fn series_capacity(&self) -> usize {
        self.series_capacity
    }

    /// Folds `incoming` into `previous` (last write wins).
    ///
    /// The caller is expected to have run `QuoteUpdate::validate` first.
    pub fn merge(&self, previous: Option<Quote>, incoming: &QuoteUpdate) -> Quote {
        let mut quote = previous.unwrap_or_else(|| Quote {
            symbol: incoming.symbol.clone(),
            stock_id: None,
            company_name: None,
            icon_url: None,
            current_price: incoming.current_price,
            last_day_traded_price: incoming.last_day_traded_price,
            recent_series: VecDeque::with_capacity(self.series_capacity),
            updated_at: Utc::now(),
            stale: false,
        });

        quote.current_price = incoming.current_price;
        quote.last_day_traded_price = incoming.last_day_traded_price;
        if let Some(id) = &incoming.stock_id {
            quote.stock_id = Some(id.clone());
        }
        if let Some(name) = &incoming.company_name {
            quote.company_name = Some(name.clone());
        }
        if let Some(url) = &incoming.icon_url {
            quote.icon_url = Some(url.clone());
        }

        if let Some(series) = &incoming.series {
            quote.recent_series = self.replacement_series(series);
        }
        if let Some(point) = incoming.series_point {
            self.append_point(&mut quote.recent_series, point);
        }

        quote.updated_at = Utc::now();
        quote.stale = false;
        quote
    }

    fn replacement_series(&self, series: &[SeriesPoint]) -> VecDeque<SeriesPoint> {
        let mut points = series.to_vec();
        points.sort_by_key(|p| p.time);
        let mut deduped: VecDeque<SeriesPoint> = VecDeque::with_capacity(points.len());
        for point in points {
            match deduped.back_mut() {
                Some(last) if last.time == point.time => *last = point,
                _ => deduped.push_back(point),
            }
        }
        while deduped.len() > self.series_capacity {
            deduped.pop_front();
        }
        deduped
    }

    fn append_point(&self, series: &mut VecDeque<SeriesPoint>, point: SeriesPoint) {
        match series.back_mut() {
            Some(last) if point.time == last.time => *last = point,
            Some(last) if point.time < last.time => {
                log::debug!(
                    "Dropping out-of-order series point {} (last {})",
                    point.time,
                    last.time
                );
            }
            _ => series.push_back(point),
        }
        while series.len() > self.series_capacity {
            series.pop_front();
        }
    }
}
