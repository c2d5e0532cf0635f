use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use market_core::{BuyVerdict, SignalMetrics};
use serde::Serialize;

/// One analytics row for a symbol that produced a notable verdict the agent
/// did not act on. Append-only; reviewed offline for threshold tuning.
#[derive(Debug, Serialize)]
pub struct MissedRecord {
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub accepted: bool,
    pub grade: String,
    pub reason: String,
    pub price: f64,
    pub rsi: f64,
    pub vol_ratio: f64,
    pub disparity_40_pct: f64,
    pub slope_rate: f64,
    pub bars_since_gold: i64,
}

impl MissedRecord {
    pub fn from_verdict(symbol: &str, verdict: &BuyVerdict, now: DateTime<Utc>) -> Self {
        let metrics: &SignalMetrics = verdict.metrics();
        Self {
            timestamp: now,
            symbol: symbol.to_string(),
            accepted: verdict.is_buy(),
            grade: verdict
                .grade()
                .map(|g| g.label().to_string())
                .unwrap_or_default(),
            reason: verdict.reason().to_string(),
            price: metrics.current_price,
            rsi: metrics.rsi,
            vol_ratio: metrics.vol_ratio,
            disparity_40_pct: metrics.disparity_40_pct,
            slope_rate: metrics.slope_rate,
            bars_since_gold: metrics.bars_since_gold,
        }
    }
}

pub struct MissedLog {
    path: PathBuf,
}

impl MissedLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn append(&self, record: &MissedRecord) -> Result<()> {
        let exists = self.path.exists();
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("opening {}", self.path.display()))?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(!exists)
            .from_writer(file);
        writer.serialize(record)?;
        writer.flush()?;
        Ok(())
    }
}
