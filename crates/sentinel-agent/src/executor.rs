use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use chrono::{DateTime, Utc};
use exchange_trait::ExchangeClient;
use market_core::EntryKind;

use crate::inventory::InventoryStore;

/// Exchange minimum order value.
const MIN_ORDER_KRW: f64 = 1_000.0;
/// Never commit more than this share of free KRW to one order.
const FREE_KRW_CAP: f64 = 0.9;

pub struct OrderExecutor {
    exchange: Arc<dyn ExchangeClient>,
    inventory: Arc<InventoryStore>,
}

pub struct BuyOutcome {
    pub spent_krw: f64,
    pub quantity: f64,
    pub price: f64,
}

impl OrderExecutor {
    pub fn new(exchange: Arc<dyn ExchangeClient>, inventory: Arc<InventoryStore>) -> Self {
        Self {
            exchange,
            inventory,
        }
    }

    /// Market buy for about `cost` KRW. Errors leave holdings untouched.
    pub async fn market_buy(
        &self,
        symbol: &str,
        cost: f64,
        grade: &str,
        entry: EntryKind,
        now: DateTime<Utc>,
    ) -> Result<BuyOutcome> {
        let balance = self.exchange.fetch_balance().await?;
        let cost = cost.min(balance.free_krw * FREE_KRW_CAP);
        if cost < MIN_ORDER_KRW {
            bail!(
                "insufficient KRW for {symbol}: {:.0} free, order floor {MIN_ORDER_KRW}",
                balance.free_krw
            );
        }

        let quote = self.exchange.fetch_ticker(symbol).await?;
        let price = quote
            .resolve_last_price()
            .ok_or_else(|| anyhow!("unusable ticker for {symbol}"))?;

        // venue accepts at most 4 decimal places of quantity
        let quantity = (cost / price * 10_000.0).floor() / 10_000.0;
        if quantity <= 0.0 {
            bail!("order too small for {symbol} at {price:.2}");
        }

        let fill = self.exchange.create_market_buy(symbol, quantity, cost).await?;
        let filled_price = fill.avg_price.unwrap_or(price);
        let filled_qty = if fill.filled_qty > 0.0 {
            fill.filled_qty
        } else {
            quantity
        };

        self.inventory
            .record_buy(symbol, filled_price, filled_qty, grade, entry, now)
            .await?;
        tracing::info!(
            symbol,
            grade,
            cost,
            quantity = filled_qty,
            price = filled_price,
            "buy filled"
        );
        Ok(BuyOutcome {
            spent_krw: cost,
            quantity: filled_qty,
            price: filled_price,
        })
    }

    /// Market sell, clamped to the free balance. Zero free balance is a
    /// logged no-op, not an error.
    pub async fn market_sell(&self, symbol: &str, qty: f64) -> Result<f64> {
        let balance = self.exchange.fetch_balance().await?;
        let free = balance.free_asset(symbol);
        let qty = qty.min(free);
        if qty <= 0.0 {
            tracing::warn!(symbol, "no free balance to sell, skipping");
            return Ok(0.0);
        }

        self.exchange.create_market_sell(symbol, qty).await?;
        self.inventory.record_sell(symbol, qty).await?;
        tracing::info!(symbol, qty, "sell placed");
        Ok(qty)
    }

    /// Sell the entire recorded position.
    pub async fn market_sell_all(&self, symbol: &str) -> Result<f64> {
        let qty = self
            .inventory
            .get(symbol)
            .await
            .map(|h| h.quantity)
            .unwrap_or(0.0);
        if qty <= 0.0 {
            tracing::warn!(symbol, "no recorded position to sell");
            return Ok(0.0);
        }
        self.market_sell(symbol, qty).await
    }
}
