//! Buy/sell order entry driven by the live merged quote.
//!
//! Validation is local and happens before any network call: quantities must be
//! positive and within the configured maximum, and a sell must be covered by the first
//! holding of the symbol in list order. The unit price is snapshotted from the quote at
//! the moment the draft is prepared; the backend decides the real execution price.
//! Holdings are never adjusted locally; they are re-fetched after every submission.
use feed_common::{FeedError, QuoteUpdate, Result, Symbol};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use crate::model::holding::Holding;
use crate::model::quote::Quote;
use crate::registry::{DispatchOutcome, SubscriptionRegistry};

/// Order direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum OrderSide {
    /// Buy shares.
    Buy,
    /// Sell shares from a holding.
    Sell,
}

/// `quantity * quote.current_price`.
pub fn compute_order_total(quote: &Quote, quantity: u64) -> f64 {
    quantity as f64 * quote.current_price
}

/// Validated, unsubmitted order.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderDraft {
    /// Direction.
    pub side: OrderSide,
    /// Symbol traded.
    pub symbol: Symbol,
    /// Units requested.
    pub requested_quantity: u64,
    /// Price per unit when the draft was prepared.
    pub unit_price: f64,
    /// `compute_order_total` at preparation time.
    pub amount: f64,
    /// Backend stock id (buy) or holding id (sell).
    pub target_id: String,
    /// Display name echoed back in the confirmation.
    pub company_name: Option<String>,
}

impl OrderDraft {
    /// Informational order amount.
    pub fn total(&self) -> f64 {
        self.amount
    }

    /// Request body for the backend.
    pub fn to_request(&self) -> OrderRequest {
        match self.side {
            OrderSide::Buy => OrderRequest::Buy(BuyOrderRequest {
                stock_id: self.target_id.clone(),
                quantity: self.requested_quantity,
                amount: self.amount,
                company_name: self.company_name.clone(),
            }),
            OrderSide::Sell => OrderRequest::Sell(SellOrderRequest {
                holding_id: self.target_id.clone(),
                quantity: self.requested_quantity,
                amount: self.amount,
                company_name: self.company_name.clone(),
            }),
        }
    }
}

/// Body of `POST /stocks/buy`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuyOrderRequest {
    /// Backend stock id.
    pub stock_id: String,
    /// Units to buy.
    pub quantity: u64,
    /// Client-side amount.
    pub amount: f64,
    /// Display name of the stock.
    #[serde(
        rename = "companyName",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub company_name: Option<String>,
}

/// Body of `POST /stocks/sell`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SellOrderRequest {
    /// Holding sold from.
    #[serde(rename = "holdingId")]
    pub holding_id: String,
    /// Units to sell.
    pub quantity: u64,
    /// Client-side amount.
    pub amount: f64,
    /// Display name of the stock.
    #[serde(
        rename = "companyName",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub company_name: Option<String>,
}

/// Order submission sent to the backend.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum OrderRequest {
    /// Buy order.
    Buy(BuyOrderRequest),
    /// Sell order.
    Sell(SellOrderRequest),
}

impl OrderRequest {
    /// REST path the request is posted to.
    pub fn path(&self) -> &'static str {
        match self {
            OrderRequest::Buy(_) => "/stocks/buy",
            OrderRequest::Sell(_) => "/stocks/sell",
        }
    }
}

/// Backend reply to an order submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderReceipt {
    /// Whether the order was executed.
    pub success: bool,
    /// User-facing message.
    #[serde(default)]
    pub message: String,
}

/// REST collaborator used by order entry.
pub trait TradingBackend {
    /// `GET /stocks`: snapshot of every listed stock.
    fn fetch_stocks(&self) -> Result<Vec<QuoteUpdate>>;
    /// `GET /stocks/holding`: the user's lots in display order.
    fn fetch_holdings(&self) -> Result<Vec<Holding>>;
    /// `POST /stocks/buy` or `POST /stocks/sell`.
    fn submit_order(&self, request: &OrderRequest) -> Result<OrderReceipt>;
}

/// Order entry state: the backend plus the last fetched holdings.
pub struct OrderDesk<B: TradingBackend> {
    backend: B,
    holdings: Vec<Holding>,
    max_quantity: u64,
}

impl<B: TradingBackend> OrderDesk<B> {
    /// Creates a desk accepting at most `max_quantity` units per order.
    pub fn new(backend: B, max_quantity: u64) -> Self {
        Self {
            backend,
            holdings: Vec::new(),
            max_quantity,
        }
    }

    /// Holdings from the last successful fetch.
    pub fn holdings(&self) -> &[Holding] {
        &self.holdings
    }

    /// The underlying backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Replaces the cached holdings with a fresh fetch.
    pub fn refresh_holdings(&mut self) -> Result<&[Holding]> {
        let mut holdings = self.backend.fetch_holdings()?;
        holdings.retain(|h| h.quantity > 0);
        self.holdings = holdings;
        Ok(&self.holdings)
    }

    /// Renders the `GET /stocks` snapshot for subscribed symbols still waiting for
    /// their first push. Returns how many symbols were primed.
    pub fn prime_quotes(&self, registry: &SubscriptionRegistry) -> Result<usize> {
        let snapshot = self.backend.fetch_stocks()?;
        let primed = snapshot
            .iter()
            .filter(|stock| matches!(registry.prime(stock), DispatchOutcome::Delivered(_)))
            .count();
        info!("Primed {} of {} stock(s) from snapshot", primed, snapshot.len());
        Ok(primed)
    }

    /// Validates an order against the live quote and snapshots its price.
    pub fn prepare(&self, side: OrderSide, quote: &Quote, quantity: u64) -> Result<OrderDraft> {
        self.check_quantity(quantity)?;
        let target_id = match side {
            OrderSide::Buy => quote
                .stock_id
                .clone()
                .unwrap_or_else(|| quote.symbol.to_string()),
            OrderSide::Sell => self.sell_lot(&quote.symbol, quantity)?.id.clone(),
        };
        Ok(OrderDraft {
            side,
            symbol: quote.symbol.clone(),
            requested_quantity: quantity,
            unit_price: quote.current_price,
            amount: compute_order_total(quote, quantity),
            target_id,
            company_name: quote.company_name.clone(),
        })
    }

    /// Sends the draft and re-fetches holdings whatever the outcome.
    pub fn submit(&mut self, draft: OrderDraft) -> Result<OrderReceipt> {
        let request = draft.to_request();
        info!(
            "Submitting {} {} x{} at {:.2} to {}",
            draft.side,
            draft.symbol,
            draft.requested_quantity,
            draft.unit_price,
            request.path()
        );
        let result = self.backend.submit_order(&request);

        if let Err(e) = self.refresh_holdings() {
            warn!("Holdings refresh after order failed: {}", e);
        }

        let receipt = result?;
        if !receipt.success {
            return Err(FeedError::OrderRejected(receipt.message));
        }
        Ok(receipt)
    }

    fn check_quantity(&self, quantity: u64) -> Result<()> {
        if quantity == 0 {
            return Err(FeedError::InvalidQuantity {
                quantity,
                reason: "quantity should be more than 0".into(),
            });
        }
        if quantity > self.max_quantity {
            return Err(FeedError::InvalidQuantity {
                quantity,
                reason: format!("at most {} per order", self.max_quantity),
            });
        }
        Ok(())
    }

    // first lot in list order; no FIFO-by-purchase-date selection
    fn sell_lot(&self, symbol: &Symbol, quantity: u64) -> Result<&Holding> {
        let lot = self.holdings.iter().find(|h| h.symbol() == symbol);
        match lot {
            Some(holding) if holding.quantity >= quantity => Ok(holding),
            other => Err(FeedError::InsufficientHolding {
                symbol: symbol.to_string(),
                requested: quantity,
                available: other.map(|h| h.quantity).unwrap_or(0),
            }),
        }
    }
}
