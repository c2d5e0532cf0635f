use std::collections::{HashMap, HashSet};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, NaiveDateTime, Utc};
use exchange_trait::{Balance, ExchangeClient, Market, OrderFill, OrderSide, Timeframe};
use hmac::{Hmac, Mac};
use market_core::{Bar, Quote};
use reqwest::Client;
use sha2::{Digest, Sha256, Sha512};
use uuid::Uuid;

use crate::models::*;

type HmacSha256 = Hmac<Sha256>;

const DEFAULT_BASE_URL: &str = "https://api.bithumb.com";

pub struct BithumbClient {
    client: Client,
    base_url: String,
    api_key: String,
    secret_key: String,
}

impl BithumbClient {
    pub fn new(api_key: String, secret_key: String) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(15)).build()?;
        Ok(Self {
            client,
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key,
            secret_key,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn market_code(symbol: &str) -> String {
        format!("KRW-{symbol}")
    }

    /// Compact JWT bearer token. `query` is the urlencoded parameter string
    /// for endpoints that take parameters; its SHA512 goes into the claims.
    fn bearer_token(&self, query: Option<&str>) -> Result<String> {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);

        let mut claims = serde_json::json!({
            "access_key": self.api_key,
            "nonce": Uuid::new_v4().to_string(),
            "timestamp": Utc::now().timestamp_millis(),
        });
        if let Some(query) = query {
            claims["query_hash"] = hex::encode(Sha512::digest(query.as_bytes())).into();
            claims["query_hash_alg"] = "SHA512".into();
        }
        let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims)?);

        let signing_input = format!("{header}.{payload}");
        let mut mac = HmacSha256::new_from_slice(self.secret_key.as_bytes())
            .map_err(|e| anyhow!("invalid secret key: {e}"))?;
        mac.update(signing_input.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

        Ok(format!("Bearer {signing_input}.{signature}"))
    }

    async fn get_public<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("Bithumb API error {status}: {body}"));
        }
        Ok(response.json::<T>().await?)
    }
}

fn parse_candle_time(raw: &str) -> Result<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")?;
    Ok(naive.and_utc())
}

#[async_trait]
impl ExchangeClient for BithumbClient {
    async fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Bar>> {
        let path = format!(
            "/v1/candles/minutes/{}?market={}&count={}",
            timeframe.minutes(),
            Self::market_code(symbol),
            limit.min(200)
        );
        let candles: Vec<CandleResponse> = self.get_public(&path).await?;

        let mut bars = Vec::with_capacity(candles.len());
        // API order is newest first
        for candle in candles.into_iter().rev() {
            bars.push(Bar {
                timestamp: parse_candle_time(&candle.candle_date_time_utc)?,
                open: candle.opening_price,
                high: candle.high_price,
                low: candle.low_price,
                close: candle.trade_price,
                volume: candle.candle_acc_trade_volume,
            });
        }
        Ok(bars)
    }

    async fn fetch_ticker(&self, symbol: &str) -> Result<Quote> {
        let path = format!("/v1/ticker?markets={}", Self::market_code(symbol));
        let tickers: Vec<TickerResponse> = self.get_public(&path).await?;
        let ticker = tickers
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("empty ticker response for {symbol}"))?;
        Ok(Quote {
            last: ticker.trade_price,
            close: ticker.prev_closing_price,
        })
    }

    async fn fetch_balance(&self) -> Result<Balance> {
        let url = format!("{}/v1/accounts", self.base_url);
        let token = self.bearer_token(None)?;
        let response = self
            .client
            .get(&url)
            .header("Authorization", token)
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("Bithumb balance error {status}: {body}"));
        }
        let accounts: Vec<AccountResponse> = response.json().await?;

        let mut balance = Balance::default();
        for account in accounts {
            if account.currency == "KRW" {
                balance.free_krw = account.free();
            } else {
                balance.assets.insert(account.currency.clone(), account.free());
            }
        }
        Ok(balance)
    }

    async fn fetch_markets(&self) -> Result<Vec<Market>> {
        let markets: Vec<MarketInfo> = self.get_public("/v1/market/all?isDetails=true").await?;
        Ok(markets
            .into_iter()
            .filter_map(|m| {
                let (quote, symbol) = m.market.split_once('-')?;
                Some(Market {
                    symbol: symbol.to_string(),
                    quote: quote.to_string(),
                    active: true,
                })
            })
            .collect())
    }

    async fn fetch_warning_list(&self) -> HashSet<String> {
        let markets: Result<Vec<MarketInfo>> =
            self.get_public("/v1/market/all?isDetails=true").await;
        match markets {
            Ok(markets) => markets
                .into_iter()
                .filter(|m| m.market_event.as_ref().map(|e| e.warning).unwrap_or(false))
                .filter_map(|m| {
                    m.market
                        .split_once('-')
                        .map(|(_, symbol)| symbol.to_string())
                })
                .collect(),
            Err(e) => {
                tracing::warn!("warning list unavailable, continuing without: {e:#}");
                HashSet::new()
            }
        }
    }

    async fn create_market_buy(&self, symbol: &str, _amount: f64, cost: f64) -> Result<OrderFill> {
        let market = Self::market_code(symbol);
        let cost = format!("{cost:.0}");
        let params: Vec<(&str, &str)> = vec![
            ("market", market.as_str()),
            ("side", "bid"),
            ("price", cost.as_str()),
            ("ord_type", "price"),
        ];
        self.submit_order(symbol, OrderSide::Buy, &params).await
    }

    async fn create_market_sell(&self, symbol: &str, qty: f64) -> Result<OrderFill> {
        let market = Self::market_code(symbol);
        let volume = format!("{qty}");
        let params: Vec<(&str, &str)> = vec![
            ("market", market.as_str()),
            ("side", "ask"),
            ("volume", volume.as_str()),
            ("ord_type", "market"),
        ];
        self.submit_order(symbol, OrderSide::Sell, &params).await
    }

    fn exchange_name(&self) -> &str {
        "bithumb"
    }
}

impl BithumbClient {
    async fn submit_order(
        &self,
        symbol: &str,
        side: OrderSide,
        params: &[(&str, &str)],
    ) -> Result<OrderFill> {
        let query: String = params
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");
        let token = self.bearer_token(Some(&query))?;
        let body: HashMap<&str, &str> = params.iter().copied().collect();

        tracing::info!(symbol, ?side, "submitting market order");
        let url = format!("{}/v1/orders", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("Authorization", token)
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("Bithumb order failed {status}: {body}"));
        }
        let order: OrderResponse = response.json().await?;
        tracing::info!(order_id = %order.uuid, "order accepted");

        let filled_qty = order
            .executed_volume
            .as_deref()
            .or(order.volume.as_deref())
            .and_then(|v| v.parse().ok())
            .unwrap_or(0.0);
        let created_at = DateTime::parse_from_rfc3339(&order.created_at)
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());

        Ok(OrderFill {
            order_id: order.uuid,
            symbol: symbol.to_string(),
            side,
            filled_qty,
            avg_price: None,
            created_at,
        })
    }
}
