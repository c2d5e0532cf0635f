use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use market_core::SellTrigger;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalStatus {
    /// Operator notified; countdown running toward auto-escalation.
    Notified,
    /// Operator pressed defer; countdown restarted.
    Waiting,
}

#[derive(Debug, Clone)]
pub struct PendingApproval {
    pub status: ApprovalStatus,
    pub trigger: SellTrigger,
    pub reason: String,
    pub start_time: DateTime<Utc>,
    pub wait_limit: Duration,
    pub entry_profit_pct: f64,
}

impl PendingApproval {
    pub fn deadline(&self) -> DateTime<Utc> {
        self.start_time + self.wait_limit
    }

    pub fn remaining_minutes(&self, now: DateTime<Utc>) -> i64 {
        (self.deadline() - now).num_minutes()
    }
}

/// Outcome of one poll of a live approval.
#[derive(Debug, Clone, PartialEq)]
pub enum ApprovalPoll {
    /// Record removed: profit recovered past entry + 0.5 pp, or the signal
    /// cleared on re-evaluation.
    Cancelled { reason: String },
    /// Wait limit elapsed; caller decides whether the mode permits execution.
    Escalate,
    Pending { remaining_minutes: i64 },
}

/// Sell-side approval records, at most one per symbol. Every operation takes
/// `now` explicitly so the state machine is testable without a clock.
#[derive(Default)]
pub struct ApprovalBook {
    records: Mutex<HashMap<String, PendingApproval>>,
}

impl ApprovalBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open an approval window. A live record for the symbol makes this a
    /// no-op, so a signal re-firing each cycle does not reset the clock.
    pub async fn open(
        &self,
        symbol: &str,
        trigger: SellTrigger,
        reason: &str,
        entry_profit_pct: f64,
        now: DateTime<Utc>,
    ) -> bool {
        let mut records = self.records.lock().await;
        if records.contains_key(symbol) {
            return false;
        }
        records.insert(
            symbol.to_string(),
            PendingApproval {
                status: ApprovalStatus::Notified,
                trigger,
                reason: reason.to_string(),
                start_time: now,
                wait_limit: Duration::minutes(trigger.wait_limit_minutes()),
                entry_profit_pct,
            },
        );
        true
    }

    /// Operator defer: restart the countdown in Waiting status.
    pub async fn start_countdown(&self, symbol: &str, now: DateTime<Utc>) -> bool {
        let mut records = self.records.lock().await;
        match records.get_mut(symbol) {
            Some(record) => {
                record.status = ApprovalStatus::Waiting;
                record.start_time = now;
                true
            }
            None => false,
        }
    }

    pub async fn cancel(&self, symbol: &str) -> Option<PendingApproval> {
        self.records.lock().await.remove(symbol)
    }

    pub async fn get(&self, symbol: &str) -> Option<PendingApproval> {
        self.records.lock().await.get(symbol).cloned()
    }

    pub async fn remove_after_execution(&self, symbol: &str) {
        self.records.lock().await.remove(symbol);
    }

    /// Advance the record against current market state. Cancellation returns
    /// the record removed; escalation leaves the record in place so a caller
    /// that cannot execute (attended mode) can keep advising the operator.
    pub async fn poll(
        &self,
        symbol: &str,
        profit_pct: f64,
        signal_active: bool,
        now: DateTime<Utc>,
    ) -> Option<ApprovalPoll> {
        let mut records = self.records.lock().await;
        let record = records.get(symbol)?;

        if profit_pct > record.entry_profit_pct + 0.5 {
            let reason = format!(
                "profit recovered to {profit_pct:.1}% (was {:.1}%)",
                record.entry_profit_pct
            );
            records.remove(symbol);
            return Some(ApprovalPoll::Cancelled { reason });
        }
        if !signal_active {
            records.remove(symbol);
            return Some(ApprovalPoll::Cancelled {
                reason: "sell signal cleared".to_string(),
            });
        }
        if now >= record.deadline() {
            return Some(ApprovalPoll::Escalate);
        }
        Some(ApprovalPoll::Pending {
            remaining_minutes: record.remaining_minutes(now),
        })
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
    async fn one_live_record_per_symbol() {
        let book = ApprovalBook::new();
        assert!(
            book.open("BTC", SellTrigger::SupportBreak, "support", -1.0, t0())
                .await
        );
        // re-firing signal does not reset the clock
        assert!(
            !book
                .open("BTC", SellTrigger::SupportBreak, "support", -1.0, t0() + Duration::minutes(5))
                .await
        );
        let record = book.get("BTC").await.unwrap();
        assert_eq!(record.start_time, t0());

        // cancel clears, then a fresh record can open
        assert!(book.cancel("BTC").await.is_some());
        assert!(
            book.open("BTC", SellTrigger::TerminalBreak, "90ma", -2.0, t0())
                .await
        );
    }

    #[tokio::test]
    async fn blow_off_top_waits_ten_minutes() {
        let book = ApprovalBook::new();
        book.open("BTC", SellTrigger::BlowOffTop, "spike", 4.0, t0())
            .await;
        let poll = book.poll("BTC", 4.0, true, t0() + Duration::minutes(9)).await;
        assert!(matches!(poll, Some(ApprovalPoll::Pending { .. })));
        let poll = book.poll("BTC", 4.0, true, t0() + Duration::minutes(10)).await;
        assert_eq!(poll, Some(ApprovalPoll::Escalate));
    }

    #[tokio::test]
    async fn never_escalates_before_wait_limit() {
        let book = ApprovalBook::new();
        book.open("BTC", SellTrigger::SupportBreak, "support", -1.0, t0())
            .await;
        for minute in [0i64, 5, 15, 29] {
            let poll = book
                .poll("BTC", -1.0, true, t0() + Duration::minutes(minute))
                .await;
            assert!(
                matches!(poll, Some(ApprovalPoll::Pending { .. })),
                "escalated at minute {minute}"
            );
        }
        let poll = book.poll("BTC", -1.0, true, t0() + Duration::minutes(30)).await;
        assert_eq!(poll, Some(ApprovalPoll::Escalate));
    }

    #[tokio::test]
    async fn defer_restarts_the_countdown() {
        let book = ApprovalBook::new();
        book.open("BTC", SellTrigger::SupportBreak, "support", -1.0, t0())
            .await;
        assert!(book.start_countdown("BTC", t0() + Duration::minutes(25)).await);

        // 30 minutes from the defer, not from the original notification
        let poll = book.poll("BTC", -1.0, true, t0() + Duration::minutes(54)).await;
        assert!(matches!(poll, Some(ApprovalPoll::Pending { .. })));
        let poll = book.poll("BTC", -1.0, true, t0() + Duration::minutes(55)).await;
        assert_eq!(poll, Some(ApprovalPoll::Escalate));
    }

    #[tokio::test]
    async fn profit_recovery_cancels_between_cycles() {
        let book = ApprovalBook::new();
        book.open("BTC", SellTrigger::SupportBreak, "support", 0.0, t0())
            .await;

        // cycle 1: -1%, still pending
        let poll = book.poll("BTC", -1.0, true, t0() + Duration::minutes(3)).await;
        assert!(matches!(poll, Some(ApprovalPoll::Pending { .. })));

        // cycle 2: recovered to +0.6%, past entry 0.0 + 0.5 pp
        let poll = book.poll("BTC", 0.6, true, t0() + Duration::minutes(6)).await;
        assert!(matches!(poll, Some(ApprovalPoll::Cancelled { .. })));
        assert!(book.get("BTC").await.is_none());
    }

    #[tokio::test]
    async fn signal_clearing_cancels() {
        let book = ApprovalBook::new();
        book.open("BTC", SellTrigger::SupportBreak, "support", -1.0, t0())
            .await;
        let poll = book.poll("BTC", -1.0, false, t0() + Duration::minutes(3)).await;
        assert!(matches!(poll, Some(ApprovalPoll::Cancelled { .. })));
        assert!(book.get("BTC").await.is_none());
    }

    #[tokio::test]
    async fn poll_unknown_symbol_is_none() {
        let book = ApprovalBook::new();
        assert_eq!(book.poll("ETH", 0.0, true, t0()).await, None);
    }
}
