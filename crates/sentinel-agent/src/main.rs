use std::sync::Arc;

use anyhow::Result;
use bithumb_exchange::BithumbClient;
use exchange_trait::ExchangeClient;
use telegram_operator::TelegramMessenger;
use tokio::signal::unix::SignalKind;
use tokio::sync::{mpsc, watch};

mod approvals;
mod automation;
mod buy_scanner;
mod config;
mod escalations;
mod executor;
mod inventory;
mod metrics;
mod missed_log;
mod operator;
mod sell_monitor;
mod state;

use approvals::ApprovalBook;
use automation::ModeBook;
use buy_scanner::BuyScanner;
use config::AgentConfig;
use escalations::EscalationBook;
use executor::OrderExecutor;
use inventory::InventoryStore;
use missed_log::MissedLog;
use sell_monitor::SellMonitor;
use state::AgentDeps;

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Load .env, init tracing
    dotenvy::dotenv().ok();

    let json_logging = std::env::var("RUST_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .init();
    }

    // Panic hook: log panic info before crashing
    std::panic::set_hook(Box::new(|info| {
        eprintln!("PANIC: {info}");
        tracing::error!("PANIC: {info}");
    }));

    tracing::info!("Starting Sentinel KRW market agent");

    // 2. Load configuration
    let config = AgentConfig::from_env()?;
    tracing::info!("Configuration loaded and validated");
    tracing::info!("  Buy scan interval: {}s", config.buy_scan_interval_secs);
    tracing::info!("  Sell monitor interval: {}s", config.sell_monitor_interval_secs);
    tracing::info!("  Unit order size: {:.0} KRW", config.unit_cost_krw);
    tracing::info!("  Default mode: {:?}", config.default_mode);
    tracing::info!("  Night auto window: {}", config.night_auto_enabled);

    // 3. Exchange client
    let exchange = Arc::new(BithumbClient::new(
        config.bithumb_api_key.clone(),
        config.bithumb_secret_key.clone(),
    )?);

    // 4. Startup connectivity check (fatal): the agent is useless without
    // account access, better to die here than half-run.
    let balance = exchange
        .fetch_balance()
        .await
        .map_err(|e| anyhow::anyhow!("Bithumb connectivity check failed: {e}"))?;
    tracing::info!(
        "Startup check: Bithumb OK ({:.0} KRW free, {} assets)",
        balance.free_krw,
        balance.assets.len()
    );

    // 5. Messenger and local state
    let messenger = Arc::new(TelegramMessenger::new(
        config.telegram_bot_token.clone(),
        config.telegram_chat_id.clone(),
    ));
    let inventory = Arc::new(InventoryStore::open(&config.inventory_path)?);
    tracing::info!("Inventory loaded: {} positions", inventory.len().await);

    let deps = Arc::new(AgentDeps {
        exchange: exchange.clone(),
        messenger: messenger.clone(),
        executor: OrderExecutor::new(exchange.clone(), inventory.clone()),
        inventory,
        approvals: ApprovalBook::new(),
        escalations: EscalationBook::new(),
        modes: ModeBook::new(config.default_mode, config.night_auto_enabled),
        missed: MissedLog::new(&config.missed_log_path),
        config,
    });

    // 6. Startup notification (best effort)
    deps.messenger
        .send(&format!(
            "🚀 Agent started\n{:.0} KRW free | {} positions\nBuy scan {}s | Sell monitor {}s",
            balance.free_krw,
            deps.inventory.len().await,
            deps.config.buy_scan_interval_secs,
            deps.config.sell_monitor_interval_secs
        ))
        .await
        .ok();

    // 7. Shutdown channel shared by every loop
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // 8. Operator channel: telegram callbacks in, book/executor effects out
    let (action_tx, action_rx) = mpsc::channel(64);
    let update_loop = tokio::spawn(telegram_operator::run_update_loop(
        deps.config.telegram_bot_token.clone(),
        action_tx,
        shutdown_rx.clone(),
    ));
    let operator_loop = tokio::spawn(operator::run_operator(
        deps.clone(),
        action_rx,
        shutdown_rx.clone(),
    ));

    // 9. The two scheduler loops
    let scanner_loop = tokio::spawn(BuyScanner::new(deps.clone()).run(shutdown_rx.clone()));
    let monitor_loop = tokio::spawn(SellMonitor::new(deps.clone()).run(shutdown_rx.clone()));

    tracing::info!(
        "Agent is now running. Scanning every {}s. Press Ctrl+C to stop.",
        deps.config.buy_scan_interval_secs
    );

    // 10. Graceful shutdown on SIGINT or SIGTERM
    let mut sigterm = tokio::signal::unix::signal(SignalKind::terminate())?;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received SIGINT");
        }
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM");
        }
    }

    shutdown_tx.send(true).ok();
    let _ = tokio::join!(scanner_loop, monitor_loop, operator_loop, update_loop);

    deps.messenger.send("🛑 Agent stopped").await.ok();
    tracing::info!("Shutdown complete");
    Ok(())
}
