use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;

/// S-class buy candidate under timed tracking.
#[derive(Debug, Clone)]
pub struct PendingEscalation {
    pub start_time: DateTime<Utc>,
    /// Highest re-check mark already fired (0, 10 or 20).
    pub last_check_mark: i64,
    pub reason: String,
    pub planned_cost: f64,
}

/// What the tracker wants done with a symbol right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscalationDue {
    /// Re-evaluate the signal at the 10- or 20-minute mark.
    Recheck { mark_minutes: i64 },
    /// 30 minutes up: re-evaluate once more and execute or drop.
    ForceExecute,
}

/// Buy-side escalation tracking, at most one record per symbol. `now` is
/// always passed in; each re-check mark fires exactly once.
#[derive(Default)]
pub struct EscalationBook {
    records: Mutex<HashMap<String, PendingEscalation>>,
}

impl EscalationBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking; no-op when the symbol is already tracked.
    pub async fn track(
        &self,
        symbol: &str,
        reason: &str,
        planned_cost: f64,
        now: DateTime<Utc>,
    ) -> bool {
        let mut records = self.records.lock().await;
        if records.contains_key(symbol) {
            return false;
        }
        records.insert(
            symbol.to_string(),
            PendingEscalation {
                start_time: now,
                last_check_mark: 0,
                reason: reason.to_string(),
                planned_cost,
            },
        );
        true
    }

    pub async fn untrack(&self, symbol: &str) -> Option<PendingEscalation> {
        self.records.lock().await.remove(symbol)
    }

    pub async fn get(&self, symbol: &str) -> Option<PendingEscalation> {
        self.records.lock().await.get(symbol).cloned()
    }

    pub async fn tracked_symbols(&self) -> Vec<String> {
        self.records.lock().await.keys().cloned().collect()
    }

    /// What is due for this symbol at `now`, if anything. Nothing is
    /// committed here: a returned recheck mark stays armed until the caller
    /// confirms it with [`EscalationBook::confirm_recheck`] after the
    /// re-classification actually ran, so a collaborator failure leaves the
    /// mark due again next cycle. ForceExecute likewise leaves the record for
    /// the caller to untrack after acting.
    pub async fn due(&self, symbol: &str, now: DateTime<Utc>) -> Option<EscalationDue> {
        let records = self.records.lock().await;
        let record = records.get(symbol)?;
        let elapsed = now - record.start_time;

        if elapsed >= Duration::minutes(30) {
            return Some(EscalationDue::ForceExecute);
        }
        for mark in [20i64, 10] {
            if elapsed >= Duration::minutes(mark) && record.last_check_mark < mark {
                return Some(EscalationDue::Recheck { mark_minutes: mark });
            }
        }
        None
    }

    /// Consume a recheck mark once the re-evaluation for it succeeded.
    pub async fn confirm_recheck(&self, symbol: &str, mark_minutes: i64) {
        if let Some(record) = self.records.lock().await.get_mut(symbol) {
            if record.last_check_mark < mark_minutes {
                record.last_check_mark = mark_minutes;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn rechecks_fire_once_each() {
        let book = EscalationBook::new();
        book.track("BTC", "tight-base breakout", 100_000.0, t0()).await;

        assert_eq!(book.due("BTC", t0() + Duration::minutes(5)).await, None);
        assert_eq!(
            book.due("BTC", t0() + Duration::minutes(11)).await,
            Some(EscalationDue::Recheck { mark_minutes: 10 })
        );
        book.confirm_recheck("BTC", 10).await;
        // confirmed mark does not fire twice
        assert_eq!(book.due("BTC", t0() + Duration::minutes(12)).await, None);
        assert_eq!(
            book.due("BTC", t0() + Duration::minutes(21)).await,
            Some(EscalationDue::Recheck { mark_minutes: 20 })
        );
        book.confirm_recheck("BTC", 20).await;
        assert_eq!(book.due("BTC", t0() + Duration::minutes(22)).await, None);
        assert_eq!(
            book.due("BTC", t0() + Duration::minutes(30)).await,
            Some(EscalationDue::ForceExecute)
        );
    }

    #[tokio::test]
    async fn unconfirmed_recheck_stays_due() {
        let book = EscalationBook::new();
        book.track("BTC", "tight-base breakout", 100_000.0, t0()).await;

        assert_eq!(
            book.due("BTC", t0() + Duration::minutes(11)).await,
            Some(EscalationDue::Recheck { mark_minutes: 10 })
        );
        // candle fetch failed, nothing was confirmed: the mark must re-fire
        assert_eq!(
            book.due("BTC", t0() + Duration::minutes(12)).await,
            Some(EscalationDue::Recheck { mark_minutes: 10 })
        );
        book.confirm_recheck("BTC", 10).await;
        assert_eq!(book.due("BTC", t0() + Duration::minutes(13)).await, None);
    }

    #[tokio::test]
    async fn late_first_poll_skips_to_twenty() {
        let book = EscalationBook::new();
        book.track("ETH", "base inflection", 50_000.0, t0()).await;
        assert_eq!(
            book.due("ETH", t0() + Duration::minutes(25)).await,
            Some(EscalationDue::Recheck { mark_minutes: 20 })
        );
    }

    #[tokio::test]
    async fn track_is_idempotent() {
        let book = EscalationBook::new();
        assert!(book.track("BTC", "first", 100_000.0, t0()).await);
        assert!(!book.track("BTC", "second", 200_000.0, t0()).await);
        let record = book.get("BTC").await.unwrap();
        assert_eq!(record.reason, "first");
    }

    #[tokio::test]
    async fn untrack_removes() {
        let book = EscalationBook::new();
        book.track("BTC", "r", 1_000.0, t0()).await;
        assert!(book.untrack("BTC").await.is_some());
        assert_eq!(book.due("BTC", t0() + Duration::minutes(31)).await, None);
    }
}
