use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use market_core::EntryKind;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

/// One held position, keyed by base-asset symbol in the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Holding {
    pub avg_price: f64,
    pub quantity: f64,
    pub grade: String,
    #[serde(default)]
    pub entry: EntryKind,
    pub buy_time: DateTime<Utc>,
}

impl Holding {
    /// Profit in percent against a live price. A missing average price means
    /// the entry was recorded before fills resolved; report flat rather than
    /// a fictitious -100%.
    pub fn profit_pct(&self, price: f64) -> f64 {
        if self.avg_price <= 0.0 {
            return 0.0;
        }
        (price - self.avg_price) / self.avg_price * 100.0
    }

    pub fn bars_held(&self, now: DateTime<Utc>, bar_minutes: i64) -> u32 {
        let held = now.signed_duration_since(self.buy_time).num_minutes();
        (held / bar_minutes).max(0) as u32
    }
}

/// JSON-file holdings store. Mutation goes through typed methods and the
/// file is rewritten after every change.
pub struct InventoryStore {
    path: PathBuf,
    holdings: Mutex<HashMap<String, Holding>>,
}

impl InventoryStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let holdings = if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?
        } else {
            HashMap::new()
        };
        Ok(Self {
            path,
            holdings: Mutex::new(holdings),
        })
    }

    pub async fn symbols(&self) -> Vec<String> {
        self.holdings.lock().await.keys().cloned().collect()
    }

    pub async fn get(&self, symbol: &str) -> Option<Holding> {
        self.holdings.lock().await.get(symbol).cloned()
    }

    pub async fn contains(&self, symbol: &str) -> bool {
        self.holdings.lock().await.contains_key(symbol)
    }

    pub async fn len(&self) -> usize {
        self.holdings.lock().await.len()
    }

    /// Record a fill, merging into an existing position at the
    /// quantity-weighted average price.
    pub async fn record_buy(
        &self,
        symbol: &str,
        price: f64,
        quantity: f64,
        grade: &str,
        entry: EntryKind,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut holdings = self.holdings.lock().await;
        match holdings.get_mut(symbol) {
            Some(holding) => {
                let total_qty = holding.quantity + quantity;
                if total_qty > 0.0 {
                    holding.avg_price =
                        (holding.avg_price * holding.quantity + price * quantity) / total_qty;
                }
                holding.quantity = total_qty;
                holding.grade = grade.to_string();
            }
            None => {
                holdings.insert(
                    symbol.to_string(),
                    Holding {
                        avg_price: price,
                        quantity,
                        grade: grade.to_string(),
                        entry,
                        buy_time: now,
                    },
                );
            }
        }
        Self::persist(&self.path, &holdings)
    }

    /// Reduce a position; removes it entirely when the remainder is dust.
    pub async fn record_sell(&self, symbol: &str, quantity: f64) -> Result<()> {
        let mut holdings = self.holdings.lock().await;
        if let Some(holding) = holdings.get_mut(symbol) {
            holding.quantity -= quantity;
            if holding.quantity <= 1e-8 {
                holdings.remove(symbol);
            }
        }
        Self::persist(&self.path, &holdings)
    }

    fn persist(path: &PathBuf, holdings: &HashMap<String, Holding>) -> Result<()> {
        let raw = serde_json::to_string_pretty(holdings)?;
        std::fs::write(path, raw).with_context(|| format!("writing {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn buy_merges_at_weighted_average() {
        let dir = tempfile::tempdir().unwrap();
        let store = InventoryStore::open(dir.path().join("inv.json")).unwrap();

        store
            .record_buy("BTC", 100.0, 1.0, "S", EntryKind::Standard, now())
            .await
            .unwrap();
        store
            .record_buy("BTC", 200.0, 1.0, "S", EntryKind::Standard, now())
            .await
            .unwrap();

        let holding = store.get("BTC").await.unwrap();
        assert!((holding.avg_price - 150.0).abs() < 1e-9);
        assert!((holding.quantity - 2.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn sell_to_dust_removes_position() {
        let dir = tempfile::tempdir().unwrap();
        let store = InventoryStore::open(dir.path().join("inv.json")).unwrap();

        store
            .record_buy("ETH", 50.0, 2.0, "A", EntryKind::Standard, now())
            .await
            .unwrap();
        store.record_sell("ETH", 1.0).await.unwrap();
        assert!(store.contains("ETH").await);
        store.record_sell("ETH", 1.0).await.unwrap();
        assert!(!store.contains("ETH").await);
    }

    #[tokio::test]
    async fn reloads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("inv.json");
        {
            let store = InventoryStore::open(&path).unwrap();
            store
                .record_buy("XRP", 500.0, 10.0, "A+", EntryKind::Reversal, now())
                .await
                .unwrap();
        }
        let store = InventoryStore::open(&path).unwrap();
        let holding = store.get("XRP").await.unwrap();
        assert_eq!(holding.quantity, 10.0);
        assert_eq!(holding.entry, EntryKind::Reversal);
    }

    #[test]
    fn zero_avg_price_reports_flat_profit() {
        let holding = Holding {
            avg_price: 0.0,
            quantity: 1.0,
            grade: "B".to_string(),
            entry: EntryKind::Standard,
            buy_time: now(),
        };
        assert_eq!(holding.profit_pct(123.0), 0.0);
    }

    #[test]
    fn bars_held_floors_by_timeframe() {
        let holding = Holding {
            avg_price: 100.0,
            quantity: 1.0,
            grade: "S".to_string(),
            entry: EntryKind::Standard,
            buy_time: now(),
        };
        let later = now() + chrono::Duration::minutes(95);
        assert_eq!(holding.bars_held(later, 30), 3);
        assert_eq!(holding.bars_held(now(), 30), 0);
    }
}
