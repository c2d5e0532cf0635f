use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use market_core::{AutomationMode, EntryKind, OperatorAction};
use tokio::sync::{mpsc, watch};

use crate::state::AgentDeps;

/// Consume operator actions decoded from messenger callbacks and apply them
/// to the books and the order executor.
pub async fn run_operator(
    deps: Arc<AgentDeps>,
    mut actions: mpsc::Receiver<OperatorAction>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            action = actions.recv() => {
                let action = match action {
                    Some(action) => action,
                    None => return,
                };
                if let Err(err) = handle_action(&deps, action, Utc::now()).await {
                    tracing::warn!(error = %format!("{err:#}"), "operator action failed");
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    tracing::info!("operator handler stopping");
                    return;
                }
            }
        }
    }
}

pub async fn handle_action(
    deps: &AgentDeps,
    action: OperatorAction,
    now: DateTime<Utc>,
) -> Result<()> {
    match action {
        OperatorAction::BuyNow(symbol) => {
            operator_buy(deps, &symbol, deps.config.unit_cost_krw, now).await
        }
        OperatorAction::BuyFull(symbol) => {
            operator_buy(deps, &symbol, deps.config.unit_cost_krw * 2.0, now).await
        }
        OperatorAction::SetBuyAuto(symbol) => {
            deps.modes.set(&symbol, AutomationMode::Auto).await;
            notify(deps, &format!("🤖 {symbol} switched to auto")).await;
            Ok(())
        }
        OperatorAction::SetBuyWatch(symbol) => {
            deps.modes.set(&symbol, AutomationMode::Watch).await;
            deps.escalations.untrack(&symbol).await;
            notify(deps, &format!("👀 {symbol} watch only, pending buy dropped")).await;
            Ok(())
        }
        OperatorAction::SellNow(symbol) => {
            let sold = deps.executor.market_sell_all(&symbol).await?;
            deps.approvals.remove_after_execution(&symbol).await;
            notify(deps, &format!("🔴 Sold {symbol} ({sold:.4}) on your confirmation")).await;
            Ok(())
        }
        OperatorAction::SellHalf(symbol) => {
            let qty = deps
                .inventory
                .get(&symbol)
                .await
                .map(|h| h.quantity / 2.0)
                .unwrap_or(0.0);
            let sold = deps.executor.market_sell(&symbol, qty).await?;
            deps.approvals.remove_after_execution(&symbol).await;
            notify(deps, &format!("🔴 Sold half of {symbol} ({sold:.4})")).await;
            Ok(())
        }
        OperatorAction::DeferSell(symbol) => {
            if deps.approvals.start_countdown(&symbol, now).await {
                notify(deps, &format!("⏳ {symbol} sell deferred, countdown restarted")).await;
            }
            Ok(())
        }
        OperatorAction::KeepPosition(symbol) => {
            deps.approvals.cancel(&symbol).await;
            deps.modes.set(&symbol, AutomationMode::Keep).await;
            notify(deps, &format!("🛡 Keeping {symbol}, sell signals suppressed")).await;
            Ok(())
        }
        OperatorAction::SetSellWatch(symbol) => {
            deps.approvals.cancel(&symbol).await;
            deps.modes.set(&symbol, AutomationMode::Watch).await;
            notify(deps, &format!("👀 {symbol} watch only, no unattended sells")).await;
            Ok(())
        }
        OperatorAction::Mute(symbol) => {
            if deps.approvals.start_countdown(&symbol, now).await {
                notify(deps, &format!("🔇 {symbol} muted for the rest of the window")).await;
            }
            Ok(())
        }
    }
}

async fn operator_buy(deps: &AgentDeps, symbol: &str, cost: f64, now: DateTime<Utc>) -> Result<()> {
    let outcome = deps
        .executor
        .market_buy(symbol, cost, "manual", EntryKind::Standard, now)
        .await?;
    deps.escalations.untrack(symbol).await;
    notify(
        deps,
        &format!(
            "🟢 Bought {symbol} {:.4} @ {:.2} KRW on your confirmation",
            outcome.quantity, outcome.price
        ),
    )
    .await;
    Ok(())
}

async fn notify(deps: &AgentDeps, text: &str) {
    if let Err(err) = deps.messenger.send(text).await {
        tracing::warn!(error = %err, "notification failed");
    }
}
