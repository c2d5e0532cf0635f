use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Duration, Utc};
use exchange_trait::Timeframe;
use market_core::{AutomationMode, Control, OperatorAction, SellTrigger, SellVerdict};
use signal_engine::report::{report_tier, ApprovalView};
use signal_engine::{evaluate_sell, indicators, SellContext};
use tokio::sync::watch;

use crate::approvals::ApprovalPoll;
use crate::inventory::Holding;
use crate::metrics::CycleMetrics;
use crate::state::AgentDeps;

const MONITOR_BARS: usize = 100;
const BAR_MINUTES: i64 = 30;
/// Full exit regardless of signal state.
const TAKE_PROFIT_PCT: f64 = 13.0;
/// Full exit once the price has also slipped under the 40-bar average.
const TRAILING_PROFIT_PCT: f64 = 8.0;

/// Periodic watch over held positions. Classifies each one, runs the sell
/// approval state machine, and renders the hourly portfolio report.
pub struct SellMonitor {
    deps: Arc<AgentDeps>,
    metrics: CycleMetrics,
    /// Highest whole-percent profit already announced per symbol.
    milestones: HashMap<String, i64>,
    overheat_latch: HashSet<String>,
    last_report: Option<DateTime<Utc>>,
}

impl SellMonitor {
    pub fn new(deps: Arc<AgentDeps>) -> Self {
        Self {
            deps,
            metrics: CycleMetrics::default(),
            milestones: HashMap::new(),
            overheat_latch: HashSet::new(),
            last_report: None,
        }
    }

    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let period = std::time::Duration::from_secs(self.deps.config.sell_monitor_interval_secs);
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let started = CycleMetrics::start_timer();
                    if let Err(err) = self.cycle(Utc::now()).await {
                        tracing::error!(error = %format!("{err:#}"), "sell monitor cycle failed");
                        // backoff must still yield to shutdown
                        tokio::select! {
                            _ = tokio::time::sleep(period) => {}
                            _ = shutdown.changed() => {
                                if *shutdown.borrow() {
                                    tracing::info!("sell monitor stopping");
                                    return;
                                }
                            }
                        }
                    }
                    self.metrics.finish_cycle(started);
                    self.metrics.log("sell-monitor");
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::info!("sell monitor stopping");
                        return;
                    }
                }
            }
        }
    }

    /// One pass over every held position. Per-symbol failures are skipped so
    /// one dead ticker never blinds the rest of the portfolio.
    pub async fn cycle(&mut self, now: DateTime<Utc>) -> Result<()> {
        let symbols = self.deps.inventory.symbols().await;
        self.milestones.retain(|s, _| symbols.contains(s));
        self.overheat_latch.retain(|s| symbols.contains(s));

        let mut lines = Vec::with_capacity(symbols.len());
        for symbol in symbols {
            self.metrics.symbols_scanned += 1;
            match self.monitor_symbol(&symbol, now).await {
                Ok(Some(line)) => lines.push(line),
                Ok(None) => {}
                Err(err) => {
                    self.metrics.symbols_failed += 1;
                    tracing::warn!(symbol = %symbol, error = %format!("{err:#}"), "position check failed");
                }
            }
        }

        self.maybe_send_report(&lines, now).await;
        Ok(())
    }

    async fn monitor_symbol(&mut self, symbol: &str, now: DateTime<Utc>) -> Result<Option<String>> {
        let holding = match self.deps.inventory.get(symbol).await {
            Some(holding) => holding,
            None => return Ok(None),
        };
        let price = self
            .deps
            .exchange
            .fetch_ticker(symbol)
            .await?
            .resolve_last_price()
            .ok_or_else(|| anyhow!("unusable ticker for {symbol}"))?;
        let bars = self
            .deps
            .exchange
            .fetch_candles(symbol, Timeframe::ThirtyMinutes, MONITOR_BARS)
            .await?;

        let profit = holding.profit_pct(price);
        self.announce_milestone(symbol, profit).await;

        let closes = indicators::closes(&bars);
        let ma40 = indicators::moving_average(&closes, 40)
            .last()
            .copied()
            .unwrap_or(f64::NAN);

        if profit >= TAKE_PROFIT_PCT {
            return self
                .exit_position(symbol, &format!("take profit at {profit:+.1}%"))
                .await
                .map(Some);
        }
        if profit >= TRAILING_PROFIT_PCT && ma40.is_finite() && price < ma40 {
            return self
                .exit_position(
                    symbol,
                    &format!("trailing exit at {profit:+.1}%, price under 40-bar average"),
                )
                .await
                .map(Some);
        }

        let mode = self.deps.modes.effective(symbol, now).await;
        let verdict = evaluate_sell(
            &bars,
            SellContext {
                entry_price: holding.avg_price,
                bars_held: holding.bars_held(now, BAR_MINUTES),
                mode,
                entry: holding.entry,
            },
        );
        self.announce_overheat(symbol, verdict.overheated()).await;

        let sell_signal = match &verdict {
            SellVerdict::Sell { trigger, reason, .. } => {
                self.metrics.signals_emitted += 1;
                let executed = self
                    .advance_approval(symbol, &holding, *trigger, reason, profit, mode, now)
                    .await?;
                if executed {
                    return Ok(Some(format!("🔴 {symbol} sold: {reason}")));
                }
                true
            }
            SellVerdict::Hold { .. } => {
                if let Some(ApprovalPoll::Cancelled { reason }) =
                    self.deps.approvals.poll(symbol, profit, false, now).await
                {
                    self.notify(&format!("✅ {symbol} sell cancelled: {reason}")).await;
                }
                false
            }
        };

        let approval = match self.deps.approvals.get(symbol).await {
            Some(record) => ApprovalView::Waiting {
                remaining_minutes: record.remaining_minutes(now),
            },
            None => ApprovalView::None,
        };
        let tier = report_tier(profit, sell_signal, price, ma40, approval);
        Ok(Some(format!(
            "{} {symbol} {profit:+.1}% @ {price:.0} KRW ({:.4})",
            tier.marker(),
            holding.quantity
        )))
    }

    /// Drive the approval record for an active sell signal. Returns true when
    /// the position was sold this cycle.
    #[allow(clippy::too_many_arguments)]
    async fn advance_approval(
        &mut self,
        symbol: &str,
        holding: &Holding,
        trigger: SellTrigger,
        reason: &str,
        profit: f64,
        mode: AutomationMode,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let unattended = mode == AutomationMode::Auto;

        if trigger.is_top_priority() && unattended {
            self.exit_position(symbol, reason).await?;
            return Ok(true);
        }

        if self.deps.approvals.open(symbol, trigger, reason, profit, now).await {
            self.advise_exit(symbol, holding, trigger, reason, profit).await;
        }

        match self.deps.approvals.poll(symbol, profit, true, now).await {
            Some(ApprovalPoll::Cancelled { reason }) => {
                self.notify(&format!("✅ {symbol} sell cancelled: {reason}")).await;
                Ok(false)
            }
            Some(ApprovalPoll::Escalate) => {
                if unattended {
                    self.exit_position(
                        symbol,
                        &format!("{reason} (no response within {} min)", trigger.wait_limit_minutes()),
                    )
                    .await?;
                    Ok(true)
                } else {
                    self.notify(&format!(
                        "🚨 {symbol} sell window expired, still waiting on you: {reason}"
                    ))
                    .await;
                    Ok(false)
                }
            }
            _ => Ok(false),
        }
    }

    /// Sell everything and retire the approval record.
    async fn exit_position(&mut self, symbol: &str, reason: &str) -> Result<String> {
        let sold = self.deps.executor.market_sell_all(symbol).await?;
        self.metrics.orders_placed += 1;
        self.deps.approvals.remove_after_execution(symbol).await;
        let text = format!("🔴 Sold {symbol} ({sold:.4}): {reason}");
        self.notify(&text).await;
        Ok(text)
    }

    async fn advise_exit(
        &self,
        symbol: &str,
        holding: &Holding,
        trigger: SellTrigger,
        reason: &str,
        profit: f64,
    ) {
        let text = format!(
            "🔴 Sell signal {symbol} {profit:+.1}% (qty {:.4})\n{reason}\nAuto-sells in {} min without a response.",
            holding.quantity,
            trigger.wait_limit_minutes()
        );
        let controls = vec![
            vec![
                Control::new("Sell all", OperatorAction::SellNow(symbol.to_string())),
                Control::new("Sell half", OperatorAction::SellHalf(symbol.to_string())),
            ],
            vec![
                Control::new("Wait longer", OperatorAction::DeferSell(symbol.to_string())),
                Control::new("Keep", OperatorAction::KeepPosition(symbol.to_string())),
            ],
            vec![
                Control::new("Watch only", OperatorAction::SetSellWatch(symbol.to_string())),
                Control::new("Mute 1h", OperatorAction::Mute(symbol.to_string())),
            ],
        ];
        if let Err(err) = self.deps.messenger.send_with_controls(&text, &controls).await {
            tracing::warn!(symbol, error = %err, "sell advisory failed");
        }
    }

    /// One announcement per whole percentage point of new profit.
    async fn announce_milestone(&mut self, symbol: &str, profit: f64) {
        if profit < 1.0 {
            return;
        }
        let step = profit.floor() as i64;
        let last = self.milestones.get(symbol).copied().unwrap_or(0);
        if step > last {
            self.milestones.insert(symbol.to_string(), step);
            self.notify(&format!("📈 {symbol} reached {profit:+.1}%")).await;
        }
    }

    /// Latched so a position riding RSI ≥ 80 alerts once, not every cycle.
    async fn announce_overheat(&mut self, symbol: &str, overheated: bool) {
        if overheated && self.overheat_latch.insert(symbol.to_string()) {
            self.notify(&format!("🟠 {symbol} is overheated (RSI ≥ 80), watch for a top"))
                .await;
        } else if !overheated {
            self.overheat_latch.remove(symbol);
        }
    }

    async fn maybe_send_report(&mut self, lines: &[String], now: DateTime<Utc>) {
        if lines.is_empty() {
            return;
        }
        let due = match self.last_report {
            Some(last) => now - last >= Duration::hours(1),
            None => true,
        };
        if !due {
            return;
        }
        self.last_report = Some(now);
        let text = format!("📋 Portfolio\n{}", lines.join("\n"));
        self.notify(&text).await;
    }

    async fn notify(&self, text: &str) {
        if let Err(err) = self.deps.messenger.send(text).await {
            tracing::warn!(error = %err, "notification failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use exchange_trait::{Balance, ExchangeClient, Market, OrderFill, OrderSide};
    use market_core::{Bar, EngineResult, EntryKind, Messenger, Quote};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex;

    use crate::approvals::ApprovalBook;
    use crate::automation::ModeBook;
    use crate::config::AgentConfig;
    use crate::escalations::EscalationBook;
    use crate::executor::OrderExecutor;
    use crate::inventory::InventoryStore;
    use crate::missed_log::MissedLog;

    struct MockExchange {
        bars: Vec<Bar>,
        last_price: Mutex<f64>,
        sells: AtomicUsize,
    }

    impl MockExchange {
        fn new(bars: Vec<Bar>, last_price: f64) -> Self {
            Self {
                bars,
                last_price: Mutex::new(last_price),
                sells: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ExchangeClient for MockExchange {
        async fn fetch_candles(
            &self,
            _symbol: &str,
            _timeframe: Timeframe,
            _limit: usize,
        ) -> Result<Vec<Bar>> {
            Ok(self.bars.clone())
        }

        async fn fetch_ticker(&self, _symbol: &str) -> Result<Quote> {
            Ok(Quote {
                last: Some(*self.last_price.lock().await),
                close: None,
            })
        }

        async fn fetch_balance(&self) -> Result<Balance> {
            let mut balance = Balance::default();
            balance.assets.insert("BTC".to_string(), 10.0);
            Ok(balance)
        }

        async fn fetch_markets(&self) -> Result<Vec<Market>> {
            Ok(vec![])
        }

        async fn fetch_warning_list(&self) -> std::collections::HashSet<String> {
            std::collections::HashSet::new()
        }

        async fn create_market_buy(
            &self,
            _symbol: &str,
            _amount: f64,
            _cost: f64,
        ) -> Result<OrderFill> {
            Err(anyhow!("not used"))
        }

        async fn create_market_sell(&self, symbol: &str, qty: f64) -> Result<OrderFill> {
            self.sells.fetch_add(1, Ordering::SeqCst);
            Ok(OrderFill {
                order_id: "1".to_string(),
                symbol: symbol.to_string(),
                side: OrderSide::Sell,
                filled_qty: qty,
                avg_price: Some(*self.last_price.lock().await),
                created_at: Utc::now(),
            })
        }

        fn exchange_name(&self) -> &str {
            "mock"
        }
    }

    struct MockMessenger {
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Messenger for MockMessenger {
        async fn send(&self, text: &str) -> EngineResult<()> {
            self.sent.lock().await.push(text.to_string());
            Ok(())
        }

        async fn send_with_controls(
            &self,
            text: &str,
            _controls: &[Vec<Control>],
        ) -> EngineResult<()> {
            self.sent.lock().await.push(text.to_string());
            Ok(())
        }
    }

    fn bars_from_closes(closes: &[f64]) -> Vec<Bar> {
        let start = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        let mut prev = closes[0];
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| {
                let open = prev;
                prev = close;
                Bar {
                    timestamp: start + Duration::minutes(30 * i as i64),
                    open,
                    high: open.max(close),
                    low: open.min(close),
                    close,
                    volume: 1.0,
                }
            })
            .collect()
    }

    /// 170 bars sliding from 130 to 96, then a 30-bar bounce to 99. The last
    /// close sits under the 90-bar average, tripping a terminal break.
    fn breakdown_closes() -> Vec<f64> {
        let mut closes = vec![130.0];
        for _ in 0..170 {
            closes.push(closes.last().copied().unwrap_or(0.0) - 0.2);
        }
        for _ in 0..30 {
            closes.push(closes.last().copied().unwrap_or(0.0) + 0.1);
        }
        closes
    }

    fn test_config() -> AgentConfig {
        AgentConfig {
            bithumb_api_key: "k".to_string(),
            bithumb_secret_key: "s".to_string(),
            telegram_bot_token: String::new(),
            telegram_chat_id: String::new(),
            buy_scan_interval_secs: 600,
            sell_monitor_interval_secs: 180,
            unit_cost_krw: 100_000.0,
            default_mode: AutomationMode::Watch,
            night_auto_enabled: false,
            notify_debounce_secs: 3600,
            inventory_path: "inventory.json".to_string(),
            missed_log_path: "missed.csv".to_string(),
        }
    }

    async fn monitor_with(
        mode: AutomationMode,
        entry_price: f64,
        last_price: f64,
        now: DateTime<Utc>,
    ) -> (SellMonitor, Arc<MockExchange>, Arc<MockMessenger>) {
        let dir = tempfile::tempdir().unwrap();
        let exchange = Arc::new(MockExchange::new(bars_from_closes(&breakdown_closes()), last_price));
        let messenger = Arc::new(MockMessenger {
            sent: Mutex::new(Vec::new()),
        });
        let inventory = Arc::new(InventoryStore::open(dir.path().join("inv.json")).unwrap());
        inventory
            .record_buy(
                "BTC",
                entry_price,
                10.0,
                "A",
                EntryKind::Standard,
                now - Duration::minutes(30 * 50),
            )
            .await
            .unwrap();

        let deps = Arc::new(AgentDeps {
            config: test_config(),
            exchange: exchange.clone(),
            messenger: messenger.clone(),
            executor: OrderExecutor::new(exchange.clone(), inventory.clone()),
            inventory,
            approvals: ApprovalBook::new(),
            escalations: EscalationBook::new(),
            modes: ModeBook::new(mode, false),
            missed: MissedLog::new(dir.path().join("missed.csv")),
        });
        std::mem::forget(dir);
        (SellMonitor::new(deps), exchange, messenger)
    }

    #[tokio::test]
    async fn watch_mode_advises_once_and_never_sells() {
        let now = Utc.with_ymd_and_hms(2025, 6, 10, 0, 0, 0).unwrap();
        let (mut monitor, exchange, messenger) =
            monitor_with(AutomationMode::Watch, 100.0, 99.0, now).await;

        monitor.cycle(now).await.unwrap();
        monitor.cycle(now + Duration::minutes(3)).await.unwrap();

        let advisories = messenger
            .sent
            .lock()
            .await
            .iter()
            .filter(|m| m.contains("Sell signal"))
            .count();
        assert_eq!(advisories, 1, "re-firing signal must not re-advise");
        assert_eq!(exchange.sells.load(Ordering::SeqCst), 0);
        assert!(monitor.deps.approvals.get("BTC").await.is_some());
    }

    #[tokio::test]
    async fn auto_mode_executes_once_after_timeout() {
        let now = Utc.with_ymd_and_hms(2025, 6, 10, 0, 0, 0).unwrap();
        let (mut monitor, exchange, _messenger) =
            monitor_with(AutomationMode::Auto, 100.0, 99.0, now).await;

        monitor.cycle(now).await.unwrap();
        assert_eq!(exchange.sells.load(Ordering::SeqCst), 0, "window must run first");

        monitor.cycle(now + Duration::minutes(31)).await.unwrap();
        assert_eq!(exchange.sells.load(Ordering::SeqCst), 1);
        assert!(monitor.deps.inventory.get("BTC").await.is_none());
        assert!(monitor.deps.approvals.get("BTC").await.is_none());

        // Position is gone, nothing left to execute.
        monitor.cycle(now + Duration::minutes(35)).await.unwrap();
        assert_eq!(exchange.sells.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn profit_recovery_cancels_pending_approval() {
        let now = Utc.with_ymd_and_hms(2025, 6, 10, 0, 0, 0).unwrap();
        let (mut monitor, exchange, messenger) =
            monitor_with(AutomationMode::Auto, 100.0, 99.0, now).await;

        monitor.cycle(now).await.unwrap();
        assert!(monitor.deps.approvals.get("BTC").await.is_some());

        *exchange.last_price.lock().await = 101.0;
        monitor.cycle(now + Duration::minutes(10)).await.unwrap();

        assert!(monitor.deps.approvals.get("BTC").await.is_none());
        assert_eq!(exchange.sells.load(Ordering::SeqCst), 0);
        assert!(messenger
            .sent
            .lock()
            .await
            .iter()
            .any(|m| m.contains("cancelled")));
    }

    #[tokio::test]
    async fn take_profit_ladder_exits_without_approval() {
        let now = Utc.with_ymd_and_hms(2025, 6, 10, 0, 0, 0).unwrap();
        let (mut monitor, exchange, _messenger) =
            monitor_with(AutomationMode::Watch, 80.0, 99.0, now).await;

        monitor.cycle(now).await.unwrap();

        assert_eq!(exchange.sells.load(Ordering::SeqCst), 1);
        assert!(monitor.deps.approvals.get("BTC").await.is_none());
        assert!(monitor.deps.inventory.get("BTC").await.is_none());
    }
}
