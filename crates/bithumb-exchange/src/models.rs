use serde::Deserialize;

/// One candle from `/v1/candles/minutes/{unit}`. The API returns newest
/// first; the client reverses into chronological order.
#[derive(Debug, Clone, Deserialize)]
pub struct CandleResponse {
    pub candle_date_time_utc: String,
    pub opening_price: f64,
    pub high_price: f64,
    pub low_price: f64,
    pub trade_price: f64,
    pub candle_acc_trade_volume: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TickerResponse {
    pub trade_price: Option<f64>,
    pub prev_closing_price: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MarketInfo {
    /// e.g. "KRW-BTC"
    pub market: String,
    pub market_event: Option<MarketEvent>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MarketEvent {
    #[serde(default)]
    pub warning: bool,
}

/// One currency line from `/v1/accounts`. Amounts arrive as strings.
#[derive(Debug, Clone, Deserialize)]
pub struct AccountResponse {
    pub currency: String,
    pub balance: String,
    #[serde(default)]
    pub locked: String,
}

impl AccountResponse {
    pub fn free(&self) -> f64 {
        self.balance.parse().unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrderResponse {
    pub uuid: String,
    pub side: String,
    pub market: String,
    pub created_at: String,
    pub volume: Option<String>,
    pub executed_volume: Option<String>,
}
