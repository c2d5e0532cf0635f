use std::collections::HashSet;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use market_core::{Bar, Quote};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Unified exchange types (venue-agnostic)
// ---------------------------------------------------------------------------

/// Candle timeframe supported by the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Timeframe {
    OneMinute,
    ThirtyMinutes,
}

impl Timeframe {
    pub fn minutes(&self) -> u32 {
        match self {
            Timeframe::OneMinute => 1,
            Timeframe::ThirtyMinutes => 30,
        }
    }
}

/// Spot balances relevant to a KRW-quoted account.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Balance {
    /// Free KRW available for new orders.
    pub free_krw: f64,
    /// Free base-asset quantity per symbol.
    pub assets: std::collections::HashMap<String, f64>,
}

impl Balance {
    pub fn free_asset(&self, symbol: &str) -> f64 {
        self.assets.get(symbol).copied().unwrap_or(0.0)
    }
}

/// One tradable market on the venue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Market {
    /// Base asset code, e.g. "BTC".
    pub symbol: String,
    /// Quote currency, e.g. "KRW".
    pub quote: String,
    pub active: bool,
}

/// Result of a market order, as reported by the venue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderFill {
    pub order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub filled_qty: f64,
    pub avg_price: Option<f64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

// ---------------------------------------------------------------------------
// Exchange trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait ExchangeClient: Send + Sync {
    /// Fetch up to `limit` most recent candles, oldest first.
    async fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Bar>>;

    /// Latest quote for one symbol.
    async fn fetch_ticker(&self, symbol: &str) -> Result<Quote>;

    /// Account balances.
    async fn fetch_balance(&self) -> Result<Balance>;

    /// All markets on the venue (filter by quote currency at the call site).
    async fn fetch_markets(&self) -> Result<Vec<Market>>;

    /// Symbols under an exchange caution/warning designation. Implementations
    /// degrade to an empty set on failure rather than erroring, so a flaky
    /// warning endpoint never blocks a scan.
    async fn fetch_warning_list(&self) -> HashSet<String>;

    /// Market buy spending `cost` KRW for roughly `amount` units.
    async fn create_market_buy(&self, symbol: &str, amount: f64, cost: f64) -> Result<OrderFill>;

    /// Market sell of `qty` units.
    async fn create_market_sell(&self, symbol: &str, qty: f64) -> Result<OrderFill>;

    /// Venue name for logging.
    fn exchange_name(&self) -> &str;
}
