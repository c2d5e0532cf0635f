use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// OHLCV bar data for one timeframe slot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Ticker quote. Exchanges do not reliably populate `last`, so price
/// resolution walks an ordered fallback chain instead of indexing fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Quote {
    pub last: Option<f64>,
    pub close: Option<f64>,
}

impl Quote {
    /// last → close → unusable. Each field is checked on its own, so a zero
    /// or non-finite `last` falls through to `close`.
    pub fn resolve_last_price(&self) -> Option<f64> {
        let usable = |p: &f64| p.is_finite() && *p > 0.0;
        self.last.filter(usable).or(self.close.filter(usable))
    }
}

/// Buy-signal strength tier.
/// Only the S tier (S and S+) is eligible for unattended execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Grade {
    F,
    B,
    A,
    APlus,
    S,
    SPlus,
}

impl Grade {
    pub fn is_unattended_eligible(&self) -> bool {
        matches!(self, Grade::S | Grade::SPlus)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Grade::SPlus => "S+",
            Grade::S => "S",
            Grade::APlus => "A+",
            Grade::A => "A",
            Grade::B => "B",
            Grade::F => "F",
        }
    }

    pub fn from_label(s: &str) -> Option<Self> {
        match s {
            "S+" => Some(Grade::SPlus),
            "S" => Some(Grade::S),
            "A+" => Some(Grade::APlus),
            "A" => Some(Grade::A),
            "B" => Some(Grade::B),
            "F" => Some(Grade::F),
            _ => None,
        }
    }
}

impl std::fmt::Display for Grade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Fixed-shape indicator snapshot attached to every buy verdict, accepted or
/// rejected, so downstream analytics never see partial data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalMetrics {
    pub current_price: f64,
    pub rsi: f64,
    pub ma40: f64,
    pub ma185: f64,
    /// One-bar slope of the 185-bar MA, in percent.
    pub slope_rate: f64,
    /// |price − MA40| / MA40, in percent.
    pub disparity_40_pct: f64,
    /// (price − MA185) / MA185, in percent (signed).
    pub disparity_185_pct: f64,
    /// |MA40 − MA185| / MA185 (40/185 convergence tightness).
    pub disparity_gold: f64,
    /// Bars since the last 40-over-185 golden cross; -1 if none in the window.
    pub bars_since_gold: i64,
    /// Current volume over the 20-bar baseline mean.
    pub vol_ratio: f64,
    pub has_volume_surge: bool,
    pub max_vol_ratio: f64,
}

impl Default for SignalMetrics {
    fn default() -> Self {
        Self {
            current_price: 0.0,
            rsi: 50.0,
            ma40: 0.0,
            ma185: 0.0,
            slope_rate: 0.0,
            disparity_40_pct: 0.0,
            disparity_185_pct: 0.0,
            disparity_gold: 0.0,
            bars_since_gold: -1,
            vol_ratio: 0.0,
            has_volume_surge: false,
            max_vol_ratio: 0.0,
        }
    }
}

/// Descriptive chart-shape tags computed independently of the verdict.
/// Analytics only, never a decision input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PatternTag {
    /// price > MA5 > MA20 > MA185, fully stacked uptrend
    AlignedStack,
    /// 5/20 golden cross below the long-term MA
    ShortReversal,
    /// RSI ≤ 25 with the last candle recovering
    BottomBounce,
    /// RSI ≤ 25, no recovery yet
    BottomNear,
}

impl PatternTag {
    pub fn label(&self) -> &'static str {
        match self {
            PatternTag::AlignedStack => "aligned-stack",
            PatternTag::ShortReversal => "short-reversal",
            PatternTag::BottomBounce => "bottom-bounce",
            PatternTag::BottomNear => "bottom-near",
        }
    }
}

/// Outcome of one buy-side classification pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BuyVerdict {
    Buy {
        grade: Grade,
        reason: String,
        metrics: SignalMetrics,
        tags: Vec<PatternTag>,
    },
    Pass {
        reason: String,
        /// Populated when the rejection carries a tier of its own
        /// (restricted symbols are graded F).
        grade: Option<Grade>,
        metrics: SignalMetrics,
        tags: Vec<PatternTag>,
    },
}

impl BuyVerdict {
    pub fn is_buy(&self) -> bool {
        matches!(self, BuyVerdict::Buy { .. })
    }

    pub fn grade(&self) -> Option<Grade> {
        match self {
            BuyVerdict::Buy { grade, .. } => Some(*grade),
            BuyVerdict::Pass { grade, .. } => *grade,
        }
    }

    pub fn reason(&self) -> &str {
        match self {
            BuyVerdict::Buy { reason, .. } | BuyVerdict::Pass { reason, .. } => reason,
        }
    }

    pub fn metrics(&self) -> &SignalMetrics {
        match self {
            BuyVerdict::Buy { metrics, .. } | BuyVerdict::Pass { metrics, .. } => metrics,
        }
    }

    pub fn tags(&self) -> &[PatternTag] {
        match self {
            BuyVerdict::Buy { tags, .. } | BuyVerdict::Pass { tags, .. } => tags,
        }
    }
}

/// Why a sell signal fired. The trigger decides the approval window and
/// whether the signal bypasses operator gating entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SellTrigger {
    /// Intrabar spike followed by distribution candles near the peak.
    BlowOffTop,
    /// Reversal-entry hard stop at −3%.
    AbsoluteStop,
    /// Price lost the dynamic 40-bar support line.
    SupportBreak,
    /// Price below the 90-bar MA.
    TerminalBreak,
    /// Giving back gains past the protection thresholds.
    ProtectGains,
}

impl SellTrigger {
    /// Operator override window before auto-escalation.
    pub fn wait_limit_minutes(&self) -> i64 {
        match self {
            SellTrigger::BlowOffTop => 10,
            _ => 30,
        }
    }

    /// Top-priority triggers execute without waiting and ignore Keep mode.
    pub fn is_top_priority(&self) -> bool {
        matches!(self, SellTrigger::BlowOffTop | SellTrigger::AbsoluteStop)
    }

    pub fn label(&self) -> &'static str {
        match self {
            SellTrigger::BlowOffTop => "blow-off top",
            SellTrigger::AbsoluteStop => "absolute stop",
            SellTrigger::SupportBreak => "support break",
            SellTrigger::TerminalBreak => "terminal trendline breach",
            SellTrigger::ProtectGains => "protect gains",
        }
    }
}

/// Outcome of one sell-side classification pass. `overheated` is the RSI ≥ 80
/// observation; the classifier reports it, the monitor owns the latch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SellVerdict {
    Sell {
        trigger: SellTrigger,
        reason: String,
        overheated: bool,
    },
    Hold {
        reason: String,
        overheated: bool,
    },
}

impl SellVerdict {
    pub fn is_sell(&self) -> bool {
        matches!(self, SellVerdict::Sell { .. })
    }

    pub fn trigger(&self) -> Option<SellTrigger> {
        match self {
            SellVerdict::Sell { trigger, .. } => Some(*trigger),
            SellVerdict::Hold { .. } => None,
        }
    }

    pub fn reason(&self) -> &str {
        match self {
            SellVerdict::Sell { reason, .. } | SellVerdict::Hold { reason, .. } => reason,
        }
    }

    pub fn overheated(&self) -> bool {
        match self {
            SellVerdict::Sell { overheated, .. } | SellVerdict::Hold { overheated, .. } => {
                *overheated
            }
        }
    }
}

/// Per-symbol automation override, layered over a global default.
/// The sleep window forces the effective mode to Auto.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AutomationMode {
    /// Unattended execution allowed.
    Auto,
    /// Notify only; orders need explicit operator confirmation.
    Watch,
    /// Suppress non-priority sell signals entirely.
    Keep,
}

impl AutomationMode {
    pub fn is_unattended(&self) -> bool {
        matches!(self, AutomationMode::Auto)
    }

    pub fn label(&self) -> &'static str {
        match self {
            AutomationMode::Auto => "AUTO",
            AutomationMode::Watch => "WATCH",
            AutomationMode::Keep => "KEEP",
        }
    }
}

/// How a held position was entered. Reversal entries (the source's "type 3")
/// run a stricter sell regime: hard −3% stop, no terminal-break exit, and a
/// 6-bar grace on the support line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EntryKind {
    #[default]
    Standard,
    Reversal,
}

impl EntryKind {
    pub fn is_reversal(&self) -> bool {
        matches!(self, EntryKind::Reversal)
    }
}
