//! Owned stock lots as returned by `GET /stocks/holding`.
//!
//! Each lot embeds a snapshot of its stock. The snapshot price is only a fallback: row
//! values use the live merged quote as soon as one exists.
use feed_common::Symbol;
use serde::{Deserialize, Serialize};

use crate::model::quote::Quote;

/// Stock snapshot embedded in a holding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HoldingStock {
    /// Backend stock identifier.
    #[serde(rename = "_id")]
    pub id: String,
    /// Symbol of the stock.
    pub symbol: Symbol,
    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company_name: Option<String>,
    /// Price when the holdings were fetched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_price: Option<f64>,
}

/// One lot of a stock owned by the user at a recorded cost basis.
///
/// Lots of the same symbol are independent and never merged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Holding {
    /// Backend holding identifier.
    #[serde(rename = "_id")]
    pub id: String,
    /// Stock held.
    pub stock: HoldingStock,
    /// Units held.
    pub quantity: u64,
    /// Cost basis per unit.
    pub buy_price: f64,
}

impl Holding {
    /// Symbol held.
    pub fn symbol(&self) -> &Symbol {
        &self.stock.symbol
    }

    /// Amount paid for the lot.
    pub fn invested(&self) -> f64 {
        self.buy_price * self.quantity as f64
    }

    /// Live price if a quote is available, else the fetched snapshot, else the cost basis.
    pub fn market_price(&self, live: Option<&Quote>) -> f64 {
        live.map(|quote| quote.current_price)
            .or(self.stock.current_price)
            .unwrap_or(self.buy_price)
    }

    /// Market value of the lot.
    pub fn current_value(&self, live: Option<&Quote>) -> f64 {
        self.market_price(live) * self.quantity as f64
    }

    /// Unrealized profit (positive) or loss (negative).
    pub fn profit_loss(&self, live: Option<&Quote>) -> f64 {
        self.current_value(live) - self.invested()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::quote::QuoteMergePolicy;
    use feed_common::QuoteUpdate;

    const LOT: &str = r#"{
        "_id": "h1",
        "stock": {
            "_id": "s1",
            "symbol": "TSLA",
            "companyName": "Tesla",
            "iconUrl": "https://cdn.example/tsla.png",
            "currentPrice": 190.0,
            "lastDayTradedPrice": 185.0
        },
        "quantity": 4,
        "buyPrice": 200.0
    }"#;

    #[test]
    fn parses_lot_with_nested_stock() {
        let holding: Holding = serde_json::from_str(LOT).unwrap();
        assert_eq!(holding.id, "h1");
        assert_eq!(holding.symbol().as_str(), "TSLA");
        assert_eq!(holding.stock.id, "s1");
        assert_eq!(holding.stock.company_name.as_deref(), Some("Tesla"));
        assert_eq!(holding.stock.current_price, Some(190.0));
    }

    #[test]
    fn lot_values_follow_the_live_price() {
        let holding: Holding = serde_json::from_str(LOT).unwrap();
        let quote = QuoteMergePolicy::new(10)
            .merge(None, &QuoteUpdate::new("TSLA".parse().unwrap(), 180.0, 190.0));

        assert_eq!(holding.invested(), 800.0);
        assert_eq!(holding.current_value(Some(&quote)), 720.0);
        assert_eq!(holding.profit_loss(Some(&quote)), -80.0);
    }

    #[test]
    fn snapshot_price_is_used_until_first_push() {
        let mut holding: Holding = serde_json::from_str(LOT).unwrap();
        assert_eq!(holding.current_value(None), 760.0);
        assert_eq!(holding.profit_loss(None), -40.0);

        holding.stock.current_price = None;
        assert_eq!(holding.profit_loss(None), 0.0);
    }
}
