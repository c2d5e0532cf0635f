use market_core::{AutomationMode, Bar, EntryKind, SellTrigger, SellVerdict};

use crate::indicators::{closes, moving_average, rsi};

/// Bars a reversal entry ignores the dynamic support line after buying.
const REVERSAL_SUPPORT_GRACE_BARS: u32 = 6;

/// Reversal-entry hard stop, percent.
const REVERSAL_STOP_PCT: f64 = -3.0;

/// Position-side context for one classification pass.
#[derive(Debug, Clone, Copy)]
pub struct SellContext {
    pub entry_price: f64,
    pub bars_held: u32,
    pub mode: AutomationMode,
    pub entry: EntryKind,
}

/// Classify a held position against its bar series. Priority order is fixed;
/// the first matching rule decides. Pure function of its inputs.
pub fn evaluate_sell(bars: &[Bar], ctx: SellContext) -> SellVerdict {
    if bars.len() < 90 || ctx.entry_price <= 0.0 {
        return SellVerdict::Hold {
            reason: "insufficient data".to_string(),
            overheated: false,
        };
    }

    let close = closes(bars);
    let last = close.len() - 1;
    let price = close[last];
    let profit_pct = (price - ctx.entry_price) / ctx.entry_price * 100.0;

    let ma40 = moving_average(&close, 40);
    let ma90 = moving_average(&close, 90);
    let ma185 = moving_average(&close, 185);
    let rsi_series = rsi(&close, 14);
    let rsi_now = rsi_series[last];
    let overheated = rsi_now >= 80.0;

    if let Some(reason) = blow_off_top(bars) {
        return SellVerdict::Sell {
            trigger: SellTrigger::BlowOffTop,
            reason,
            overheated,
        };
    }

    if ctx.entry.is_reversal() && profit_pct <= REVERSAL_STOP_PCT {
        return SellVerdict::Sell {
            trigger: SellTrigger::AbsoluteStop,
            reason: format!("reversal stop hit ({profit_pct:.1}%)"),
            overheated,
        };
    }

    let support = dynamic_support(&ma40);
    let support_grace_active =
        ctx.entry.is_reversal() && ctx.bars_held < REVERSAL_SUPPORT_GRACE_BARS;
    if let Some(support) = support {
        if !support_grace_active && price < support {
            // A small break is tolerated while the position is neither deep
            // in loss nor comfortably in profit.
            let in_grace_band =
                profit_pct > -2.0 && profit_pct < 5.0 && price >= support * 0.98;
            if !in_grace_band {
                return SellVerdict::Sell {
                    trigger: SellTrigger::SupportBreak,
                    reason: format!(
                        "support {support:.2} broken at {price:.2} ({profit_pct:.1}%)"
                    ),
                    overheated,
                };
            }
        }
    }

    let ma40_now = ma40[last];
    let ma185_now = ma185[last];
    if ma185_now.is_finite()
        && price > ma40_now
        && ma40_now > ma185_now
        && profit_pct >= 10.0
    {
        return SellVerdict::Hold {
            reason: format!("rally intact (+{profit_pct:.1}%), letting it run"),
            overheated,
        };
    }

    if ctx.mode == AutomationMode::Keep {
        return SellVerdict::Hold {
            reason: "keep mode, non-priority signals suppressed".to_string(),
            overheated,
        };
    }

    if !ctx.entry.is_reversal() {
        let ma90_now = ma90[last];
        if ma90_now.is_finite() && price < ma90_now {
            return SellVerdict::Sell {
                trigger: SellTrigger::TerminalBreak,
                reason: format!("below 90MA {ma90_now:.2} ({profit_pct:.1}%)"),
                overheated,
            };
        }
    }

    let high_20 = bars[bars.len() - 20..]
        .iter()
        .map(|b| b.high)
        .fold(f64::MIN, f64::max);
    if profit_pct >= 1.0 && high_20 > 0.0 && price < high_20 * 0.97 {
        return SellVerdict::Sell {
            trigger: SellTrigger::ProtectGains,
            reason: format!("fading off 20-bar high (+{profit_pct:.1}%)"),
            overheated,
        };
    }
    if let Some(support) = support {
        if profit_pct >= 3.0 && price < support * 1.01 {
            return SellVerdict::Sell {
                trigger: SellTrigger::ProtectGains,
                reason: format!("drifting into support (+{profit_pct:.1}%)"),
                overheated,
            };
        }
    }

    SellVerdict::Hold {
        reason: format!("no exit condition ({profit_pct:.1}%)"),
        overheated,
    }
}

/// Dynamic support: the 40MA value at the flattest point of the last 20 bars,
/// where flat means the smallest one-bar MA delta.
pub fn dynamic_support(ma40: &[f64]) -> Option<f64> {
    if ma40.len() < 21 {
        return None;
    }
    let mut best: Option<(f64, f64)> = None;
    for i in ma40.len() - 20..ma40.len() {
        let (prev, cur) = (ma40[i - 1], ma40[i]);
        if !prev.is_finite() || !cur.is_finite() {
            continue;
        }
        let slope = (cur - prev).abs();
        match best {
            Some((flattest, _)) if slope >= flattest => {}
            _ => best = Some((slope, cur)),
        }
    }
    best.map(|(_, level)| level)
}

/// Blow-off top: the live bar shows a ≥5% intrabar spike and the trailing
/// window shows distribution right after a volume peak.
fn blow_off_top(bars: &[Bar]) -> Option<String> {
    let last = &bars[bars.len() - 1];
    if last.open <= 0.0 {
        return None;
    }
    let intrabar_gain = (last.close - last.open) / last.open * 100.0;
    if intrabar_gain < 5.0 {
        return None;
    }
    if !two_bearish_after_volume_peak(bars) {
        return None;
    }
    Some(format!("blow-off top (+{intrabar_gain:.1}% intrabar)"))
}

/// Look for a volume-peak bullish candle in the [-30, -3) window followed by
/// at least two bearish candles still carrying meaningful volume, with price
/// holding near the peak's high.
pub fn two_bearish_after_volume_peak(bars: &[Bar]) -> bool {
    if bars.len() < 33 {
        return false;
    }
    let len = bars.len();
    let window = &bars[len - 30..len - 3];

    let mut peak_idx = None;
    let mut peak_vol = 0.0;
    for (i, bar) in window.iter().enumerate() {
        if bar.close > bar.open && bar.volume > peak_vol {
            peak_vol = bar.volume;
            peak_idx = Some(len - 30 + i);
        }
    }
    let peak_idx = match peak_idx {
        Some(i) => i,
        None => return false,
    };
    if peak_vol <= 0.0 || peak_idx + 3 >= len {
        return false;
    }

    let followers = &bars[peak_idx + 1..peak_idx + 4];
    let bearish_with_volume = followers
        .iter()
        .filter(|b| b.close < b.open && b.volume >= peak_vol * 0.1)
        .count();
    if bearish_with_volume < 2 {
        return false;
    }

    let peak_high = bars[peak_idx].high;
    peak_high > 0.0 && bars[len - 1].close >= peak_high * 0.9
}
