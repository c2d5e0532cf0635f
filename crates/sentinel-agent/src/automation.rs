use std::collections::HashMap;

use chrono::{DateTime, Timelike, Utc};
use chrono_tz::Asia::Seoul;
use market_core::AutomationMode;
use tokio::sync::Mutex;

/// Per-symbol automation overrides layered over a global default. During the
/// configured KST sleep window the effective mode is forced to Auto so
/// signals are not left hanging on an operator who is asleep.
pub struct ModeBook {
    default_mode: AutomationMode,
    night_auto: bool,
    overrides: Mutex<HashMap<String, AutomationMode>>,
}

impl ModeBook {
    pub fn new(default_mode: AutomationMode, night_auto: bool) -> Self {
        Self {
            default_mode,
            night_auto,
            overrides: Mutex::new(HashMap::new()),
        }
    }

    pub async fn set(&self, symbol: &str, mode: AutomationMode) {
        self.overrides
            .lock()
            .await
            .insert(symbol.to_string(), mode);
    }

    pub async fn clear(&self, symbol: &str) {
        self.overrides.lock().await.remove(symbol);
    }

    /// Configured mode before the sleep-window override.
    pub async fn configured(&self, symbol: &str) -> AutomationMode {
        self.overrides
            .lock()
            .await
            .get(symbol)
            .copied()
            .unwrap_or(self.default_mode)
    }

    /// Mode actually in force at `now`.
    pub async fn effective(&self, symbol: &str, now: DateTime<Utc>) -> AutomationMode {
        if self.night_auto && is_korean_night(now) {
            return AutomationMode::Auto;
        }
        self.configured(symbol).await
    }
}

/// KST 23:30-07:30.
pub fn is_korean_night(now: DateTime<Utc>) -> bool {
    let kst = now.with_timezone(&Seoul);
    let minute_of_day = kst.hour() * 60 + kst.minute();
    minute_of_day >= 23 * 60 + 30 || minute_of_day < 7 * 60 + 30
}
