use anyhow::{bail, Context, Result};
use market_core::AutomationMode;
use std::env;

#[derive(Debug, Clone)]
pub struct AgentConfig {
    // Exchange credentials
    pub bithumb_api_key: String,
    pub bithumb_secret_key: String,

    // Operator channel
    pub telegram_bot_token: String,
    pub telegram_chat_id: String,

    // Loop cadence
    pub buy_scan_interval_secs: u64,
    pub sell_monitor_interval_secs: u64,

    // Sizing
    pub unit_cost_krw: f64,

    // Automation
    pub default_mode: AutomationMode,
    pub night_auto_enabled: bool,

    // Notification debounce per symbol
    pub notify_debounce_secs: i64,

    // Persistence
    pub inventory_path: String,
    pub missed_log_path: String,
}

impl AgentConfig {
    pub fn from_env() -> Result<Self> {
        let default_mode = match env::var("DEFAULT_AUTOMATION")
            .unwrap_or_else(|_| "watch".to_string())
            .to_ascii_lowercase()
            .as_str()
        {
            "auto" => AutomationMode::Auto,
            "watch" => AutomationMode::Watch,
            "keep" => AutomationMode::Keep,
            other => bail!("DEFAULT_AUTOMATION must be auto|watch|keep, got {other}"),
        };

        let config = Self {
            bithumb_api_key: env::var("BITHUMB_API_KEY").context("BITHUMB_API_KEY not set")?,
            bithumb_secret_key: env::var("BITHUMB_SECRET_KEY")
                .context("BITHUMB_SECRET_KEY not set")?,

            telegram_bot_token: env::var("TELEGRAM_BOT_TOKEN").unwrap_or_default(),
            telegram_chat_id: env::var("TELEGRAM_CHAT_ID").unwrap_or_default(),

            buy_scan_interval_secs: env::var("BUY_SCAN_INTERVAL")
                .unwrap_or_else(|_| "600".to_string())
                .parse()?,
            sell_monitor_interval_secs: env::var("SELL_MONITOR_INTERVAL")
                .unwrap_or_else(|_| "180".to_string())
                .parse()?,

            unit_cost_krw: env::var("UNIT_COST_KRW")
                .unwrap_or_else(|_| "100000".to_string())
                .parse()?,

            default_mode,
            night_auto_enabled: env::var("NIGHT_AUTO")
                .unwrap_or_else(|_| "true".to_string())
                .parse()?,

            notify_debounce_secs: env::var("NOTIFY_DEBOUNCE_SECS")
                .unwrap_or_else(|_| "3600".to_string())
                .parse()?,

            inventory_path: env::var("INVENTORY_PATH")
                .unwrap_or_else(|_| "inventory.json".to_string()),
            missed_log_path: env::var("MISSED_LOG_PATH")
                .unwrap_or_else(|_| "missed_opportunities.csv".to_string()),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.unit_cost_krw < 1_000.0 {
            bail!(
                "UNIT_COST_KRW must be at least 1000 (exchange minimum), got {}",
                self.unit_cost_krw
            );
        }
        if self.buy_scan_interval_secs == 0 || self.sell_monitor_interval_secs == 0 {
            bail!("loop intervals must be nonzero");
        }
        if !self.telegram_bot_token.is_empty() && self.telegram_chat_id.is_empty() {
            bail!("TELEGRAM_CHAT_ID required when TELEGRAM_BOT_TOKEN is set");
        }
        Ok(())
    }
}
