use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use market_core::{AutomationMode, BuyVerdict, Control, EntryKind, Grade, OperatorAction};
use signal_engine::{evaluate_buy, BuyContext};
use exchange_trait::Timeframe;
use tokio::sync::watch;

use crate::escalations::EscalationDue;
use crate::metrics::CycleMetrics;
use crate::missed_log::MissedRecord;
use crate::state::AgentDeps;

const COARSE_BARS: usize = 200;
const FINE_BARS: usize = 30;
/// Coarse volume ratio above which the 1-minute tape is worth pulling.
const FINE_CHECK_VOL_RATIO: f64 = 2.0;

/// Periodic market-wide entry scan. Walks every active KRW market that is not
/// already held, classifies it, and routes the verdict by the symbol's
/// effective automation mode.
pub struct BuyScanner {
    deps: Arc<AgentDeps>,
    metrics: CycleMetrics,
    last_notified: HashMap<String, DateTime<Utc>>,
}

impl BuyScanner {
    pub fn new(deps: Arc<AgentDeps>) -> Self {
        Self {
            deps,
            metrics: CycleMetrics::default(),
            last_notified: HashMap::new(),
        }
    }

    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let period = std::time::Duration::from_secs(self.deps.config.buy_scan_interval_secs);
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let started = CycleMetrics::start_timer();
                    if let Err(err) = self.cycle(Utc::now()).await {
                        tracing::error!(error = %format!("{err:#}"), "buy scan cycle failed");
                        // backoff must still yield to shutdown
                        tokio::select! {
                            _ = tokio::time::sleep(std::time::Duration::from_secs(60)) => {}
                            _ = shutdown.changed() => {
                                if *shutdown.borrow() {
                                    tracing::info!("buy scanner stopping");
                                    return;
                                }
                            }
                        }
                    }
                    self.metrics.finish_cycle(started);
                    self.metrics.log("buy-scan");
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::info!("buy scanner stopping");
                        return;
                    }
                }
            }
        }
    }

    /// One full scan pass. Per-symbol failures are logged and skipped so a
    /// single flaky market never aborts the cycle.
    pub async fn cycle(&mut self, now: DateTime<Utc>) -> Result<()> {
        let held: HashSet<String> = self.deps.inventory.symbols().await.into_iter().collect();
        let warnings = self.deps.exchange.fetch_warning_list().await;
        let markets = self.deps.exchange.fetch_markets().await?;

        for market in markets {
            if market.quote != "KRW" || !market.active || held.contains(&market.symbol) {
                continue;
            }
            self.metrics.symbols_scanned += 1;
            if let Err(err) = self.scan_symbol(&market.symbol, &warnings, now).await {
                self.metrics.symbols_failed += 1;
                tracing::warn!(symbol = %market.symbol, error = %format!("{err:#}"), "symbol scan failed");
            }
        }

        self.drive_escalations(now).await;
        Ok(())
    }

    async fn scan_symbol(
        &mut self,
        symbol: &str,
        warnings: &HashSet<String>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let bars = self
            .deps
            .exchange
            .fetch_candles(symbol, Timeframe::ThirtyMinutes, COARSE_BARS)
            .await?;

        let halted = warnings.contains(symbol);
        let mut verdict = evaluate_buy(&bars, BuyContext { halted, ..Default::default() });

        // A rejected symbol with unusual volume gets a second look on the
        // 1-minute tape, which can surface a supply breakout the 30-minute
        // bars are too coarse to show.
        if !verdict.is_buy() && verdict.metrics().max_vol_ratio >= FINE_CHECK_VOL_RATIO {
            let fine = self
                .deps
                .exchange
                .fetch_candles(symbol, Timeframe::OneMinute, FINE_BARS)
                .await?;
            verdict = evaluate_buy(
                &bars,
                BuyContext {
                    halted,
                    fine_bars: Some(&fine),
                },
            );
        }

        if verdict.is_buy() || verdict.grade().is_some() {
            if let Err(err) = self
                .deps
                .missed
                .append(&MissedRecord::from_verdict(symbol, &verdict, now))
            {
                tracing::warn!(error = %format!("{err:#}"), "missed log append failed");
            }
        }

        if verdict.is_buy() {
            self.metrics.signals_emitted += 1;
            self.route_buy(symbol, &verdict, now).await;
        }
        Ok(())
    }

    /// Route a buy verdict by grade and effective mode. Only the top grade
    /// buys instantly; an S entry in unattended mode goes through the
    /// escalation book so the signal must survive a confirmation window.
    async fn route_buy(&mut self, symbol: &str, verdict: &BuyVerdict, now: DateTime<Utc>) {
        let grade = match verdict.grade() {
            Some(grade) => grade,
            None => return,
        };
        let mode = self.deps.modes.effective(symbol, now).await;
        let cost = self.deps.config.unit_cost_krw;

        if mode == AutomationMode::Keep {
            tracing::info!(symbol, grade = grade.label(), "entry signal suppressed by keep mode");
            return;
        }

        let unattended = mode == AutomationMode::Auto && grade.is_unattended_eligible();
        if unattended && grade == Grade::SPlus {
            match self
                .deps
                .executor
                .market_buy(symbol, cost, grade.label(), EntryKind::Standard, now)
                .await
            {
                Ok(outcome) => {
                    self.metrics.orders_placed += 1;
                    self.notify(&format!(
                        "🟢 Bought {symbol} [{}] {:.4} @ {:.2} KRW ({:.0} KRW)\n{}",
                        grade.label(),
                        outcome.quantity,
                        outcome.price,
                        outcome.spent_krw,
                        verdict.reason()
                    ))
                    .await;
                }
                Err(err) => {
                    tracing::warn!(symbol, error = %format!("{err:#}"), "auto buy failed");
                }
            }
            return;
        }

        if unattended {
            if self
                .deps
                .escalations
                .track(symbol, verdict.reason(), cost, now)
                .await
            {
                self.notify(&format!(
                    "⏳ {symbol} [{}] queued for confirmation: {}\nBuys in 30 min unless the signal fades.",
                    grade.label(),
                    verdict.reason()
                ))
                .await;
            }
            return;
        }

        self.advise_entry(symbol, grade, verdict.reason(), now).await;
    }

    /// Attended advisory with action buttons, debounced per symbol.
    async fn advise_entry(&mut self, symbol: &str, grade: Grade, reason: &str, now: DateTime<Utc>) {
        let debounce = Duration::seconds(self.deps.config.notify_debounce_secs);
        if let Some(last) = self.last_notified.get(symbol) {
            if now - *last < debounce {
                return;
            }
        }
        self.last_notified.insert(symbol.to_string(), now);

        let text = format!(
            "📈 Entry signal {symbol} [{}]\n{reason}\nUnit size {:.0} KRW",
            grade.label(),
            self.deps.config.unit_cost_krw
        );
        let controls = vec![
            vec![
                Control::new("Buy", OperatorAction::BuyNow(symbol.to_string())),
                Control::new("Buy 2x", OperatorAction::BuyFull(symbol.to_string())),
            ],
            vec![
                Control::new("Auto from now", OperatorAction::SetBuyAuto(symbol.to_string())),
                Control::new("Watch only", OperatorAction::SetBuyWatch(symbol.to_string())),
            ],
        ];
        if let Err(err) = self.deps.messenger.send_with_controls(&text, &controls).await {
            tracing::warn!(symbol, error = %err, "entry advisory failed");
        }
    }

    /// Advance every pending escalation: confirmation rechecks at the 10 and
    /// 20 minute marks, forced execution at 30. Both re-classify from fresh
    /// candles, so a faded signal cancels instead of buying.
    async fn drive_escalations(&mut self, now: DateTime<Utc>) {
        for symbol in self.deps.escalations.tracked_symbols().await {
            if self.deps.inventory.contains(&symbol).await {
                self.deps.escalations.untrack(&symbol).await;
                continue;
            }
            let due = match self.deps.escalations.due(&symbol, now).await {
                Some(due) => due,
                None => continue,
            };
            let still_valid = match self.reconfirm(&symbol).await {
                Ok(valid) => valid,
                Err(err) => {
                    tracing::warn!(symbol = %symbol, error = %format!("{err:#}"), "escalation recheck failed");
                    continue;
                }
            };

            match due {
                EscalationDue::Recheck { mark_minutes } => {
                    self.deps.escalations.confirm_recheck(&symbol, mark_minutes).await;
                    if still_valid {
                        self.notify(&format!(
                            "⏳ {symbol} still valid at the {mark_minutes} min check"
                        ))
                        .await;
                    } else {
                        self.deps.escalations.untrack(&symbol).await;
                        self.notify(&format!(
                            "❌ {symbol} signal faded at the {mark_minutes} min check, buy cancelled"
                        ))
                        .await;
                    }
                }
                EscalationDue::ForceExecute => {
                    let record = self.deps.escalations.untrack(&symbol).await;
                    if !still_valid {
                        self.notify(&format!("❌ {symbol} signal faded before timeout, buy cancelled"))
                            .await;
                        continue;
                    }
                    let cost = record
                        .map(|r| r.planned_cost)
                        .unwrap_or(self.deps.config.unit_cost_krw);
                    match self
                        .deps
                        .executor
                        .market_buy(&symbol, cost, Grade::S.label(), EntryKind::Standard, now)
                        .await
                    {
                        Ok(outcome) => {
                            self.metrics.orders_placed += 1;
                            self.notify(&format!(
                                "🟢 Bought {symbol} [S] after confirmation window: {:.4} @ {:.2} KRW",
                                outcome.quantity, outcome.price
                            ))
                            .await;
                        }
                        Err(err) => {
                            tracing::warn!(symbol = %symbol, error = %format!("{err:#}"), "escalated buy failed");
                        }
                    }
                }
            }
        }
    }

    /// Re-classify a tracked symbol from fresh candles.
    async fn reconfirm(&self, symbol: &str) -> Result<bool> {
        let bars = self
            .deps
            .exchange
            .fetch_candles(symbol, Timeframe::ThirtyMinutes, COARSE_BARS)
            .await?;
        let warnings = self.deps.exchange.fetch_warning_list().await;
        let verdict = evaluate_buy(
            &bars,
            BuyContext {
                halted: warnings.contains(symbol),
                ..Default::default()
            },
        );
        Ok(verdict
            .grade()
            .map(|g| verdict.is_buy() && g.is_unattended_eligible())
            .unwrap_or(false))
    }

    async fn notify(&self, text: &str) {
        if let Err(err) = self.deps.messenger.send(text).await {
            tracing::warn!(error = %err, "notification failed");
        }
    }
}
