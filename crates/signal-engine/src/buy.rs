use market_core::{Bar, BuyVerdict, Grade, PatternTag, SignalMetrics};

use crate::indicators::{
    bars_since_golden_cross, closes, krw_tick_size, moving_average, rsi, volume_ratio,
};

/// Minimum primary-timeframe history before any rule runs.
pub const MIN_BARS: usize = 185;

/// Tradable KRW price band. Sub-10 KRW listings have unusable tick
/// granularity; 10,000+ listings need too much capital per tick.
pub const MIN_PRICE_KRW: f64 = 10.0;
pub const MAX_PRICE_KRW: f64 = 10_000.0;

/// Per-symbol context that is not derivable from the bar series itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuyContext<'a> {
    /// Symbol is on the exchange caution/warning list.
    pub halted: bool,
    /// Optional 1-minute bars for the momentum-breakout rule.
    pub fine_bars: Option<&'a [Bar]>,
}

/// Classify one symbol's primary-timeframe (30m) series.
///
/// Pure function of its inputs: rules are evaluated in a fixed order, first
/// match wins, and every verdict carries a fully-populated metrics snapshot.
pub fn evaluate_buy(bars: &[Bar], ctx: BuyContext<'_>) -> BuyVerdict {
    if bars.len() < MIN_BARS {
        return BuyVerdict::Pass {
            reason: format!("insufficient data ({} of {MIN_BARS} bars)", bars.len()),
            grade: None,
            metrics: SignalMetrics::default(),
            tags: Vec::new(),
        };
    }

    let close = closes(bars);
    let price = close[close.len() - 1];

    let ma5 = moving_average(&close, 5);
    let ma20 = moving_average(&close, 20);
    let ma40 = moving_average(&close, 40);
    let ma90 = moving_average(&close, 90);
    let ma185 = moving_average(&close, 185);
    let rsi_series = rsi(&close, 14);

    let last = close.len() - 1;
    let rsi_now = rsi_series[last];
    let ma40_now = ma40[last];
    let ma185_now = ma185[last];
    let ma185_prev = ma185[last - 1];

    // One-bar slope of the long MA, in percent.
    let slope_rate = if ma185_prev > 0.0 {
        (ma185_now - ma185_prev) / ma185_prev * 100.0
    } else {
        0.0
    };
    // Same delta normalized by tick size, so crash detection works at any
    // price magnitude.
    let diff_185_ticks = (ma185_now - ma185_prev) / krw_tick_size(price);

    let disparity_40 = if ma40_now > 0.0 {
        (price - ma40_now).abs() / ma40_now
    } else {
        0.0
    };
    let disparity_185_pct = if ma185_now > 0.0 {
        (price - ma185_now) / ma185_now * 100.0
    } else {
        0.0
    };
    let disparity_gold = if ma185_now > 0.0 {
        (ma40_now - ma185_now).abs() / ma185_now
    } else {
        0.0
    };

    let bars_since_gold = bars_since_golden_cross(&ma40, &ma185, 96);
    let vol_ratio = volume_ratio(bars, 20);
    let (has_volume_surge, max_vol_ratio) = recent_volume_surge(bars, 20, 3);

    // The long MA already being lower than 96 bars ago means the downtrend is
    // old news; a steep current slope then reads as bottoming, not breakdown.
    let was_descending = ma185[last - 9] <= ma185[last - 95];

    let metrics = SignalMetrics {
        current_price: price,
        rsi: rsi_now,
        ma40: ma40_now,
        ma185: ma185_now,
        slope_rate,
        disparity_40_pct: disparity_40 * 100.0,
        disparity_185_pct,
        disparity_gold,
        bars_since_gold,
        vol_ratio,
        has_volume_surge,
        max_vol_ratio,
    };
    let tags = pattern_tags(bars, &ma5, &ma20, &ma185, rsi_now);

    let pass = |reason: String, grade: Option<Grade>| BuyVerdict::Pass {
        reason,
        grade,
        metrics: metrics.clone(),
        tags: tags.clone(),
    };
    let buy = |grade: Grade, reason: String| BuyVerdict::Buy {
        grade,
        reason,
        metrics: metrics.clone(),
        tags: tags.clone(),
    };

    if !(MIN_PRICE_KRW..MAX_PRICE_KRW).contains(&price) {
        return pass(
            format!("price {price:.2} KRW outside {MIN_PRICE_KRW}..{MAX_PRICE_KRW} band"),
            None,
        );
    }

    if ctx.halted {
        return pass("on exchange caution list".to_string(), Some(Grade::F));
    }

    if let Some(fine) = ctx.fine_bars {
        if let Some(reason) = fine_momentum_breakout(bars, fine) {
            return buy(Grade::S, reason);
        }
    }

    if let Some(reason) = coarse_momentum_breakout(bars, &close, rsi_now) {
        return buy(Grade::SPlus, reason);
    }

    // Counter-trend entries are allowed before the trend filter: a fresh steep
    // drop into deep oversold is the setup, not the disqualifier.
    if slope_rate < -0.06 && !was_descending {
        let deeply_oversold = rsi_now <= 20.0 || disparity_185_pct <= -10.0;
        if deeply_oversold && price > ma40_now {
            return buy(
                Grade::A,
                format!("counter-trend oversold (RSI {rsi_now:.1}, {disparity_185_pct:.1}% vs 185MA)"),
            );
        }
    }

    let realigned =
        ma40[last - 1] <= ma90[last - 1] && ma40_now > ma90[last] && price > ma40_now;
    if realigned {
        return buy(Grade::A, "40/90 realignment cross".to_string());
    }

    if slope_rate < -0.06 && !was_descending {
        return pass(format!("trend unfavorable (slope {slope_rate:.3}%/bar)"), None);
    }

    if diff_185_ticks < -1.2 {
        return pass(
            format!("long MA crashing ({diff_185_ticks:.2} ticks/bar)"),
            None,
        );
    }

    if bars_since_gold < 0 {
        return pass("no 40/185 crossover in window".to_string(), None);
    }
    if bars_since_gold < 4 {
        return pass(
            format!("too soon after crossover ({bars_since_gold} bars)"),
            None,
        );
    }

    if rsi_now > 65.0 {
        return pass(format!("overheated (RSI {rsi_now:.1})"), None);
    }

    if price > ma40_now && disparity_40 <= 0.07 {
        let bar = &bars[last];
        let bullish = bar.close > bar.open;
        if !bullish && !has_volume_surge {
            return pass("insufficient volume confirmation".to_string(), None);
        }
        if slope_rate >= -0.01 && disparity_gold <= 0.005 {
            let high_50 = bars[bars.len() - 50..]
                .iter()
                .map(|b| b.high)
                .fold(f64::MIN, f64::max);
            if high_50 > 0.0 && price >= high_50 * 0.9 {
                // Near the recent ceiling the same setup is continuation,
                // not a fresh base.
                return buy(Grade::A, "trend continuation near 50-bar high".to_string());
            }
            return buy(Grade::SPlus, "tight-base breakout".to_string());
        }
        if slope_rate >= -0.01 {
            return buy(Grade::APlus, "uptrend resumption".to_string());
        }
        return buy(Grade::A, "recovering above 40MA".to_string());
    }

    if price <= ma40_now && disparity_40 <= 0.025 && diff_185_ticks.abs() < 1.0 {
        if is_falling_knife(bars) {
            return pass("falling knife near 40MA".to_string(), None);
        }
        let reason = if disparity_gold <= 0.015 && slope_rate >= -0.01 {
            "base inflection"
        } else {
            "energy compression"
        };
        return buy(Grade::S, reason.to_string());
    }

    let ma20_now = ma20[last];
    if ma20_now > 0.0 && (price - ma20_now).abs() / ma20_now <= 0.03 && vol_ratio < 0.9 {
        return buy(Grade::B, "pullback to 20MA support".to_string());
    }

    pass(
        format!(
            "no setup (price {} 40MA, disparity {:.1}%)",
            if price > ma40_now { "above" } else { "below" },
            disparity_40 * 100.0
        ),
        None,
    )
}

/// 1-minute supply breakout: 3x volume spike, 3% rise over 3 bars, RSI not
/// yet hot, and still near the session low. The low guard reads the primary
/// series, not the short fine tape, so a pump well off the day's bottom is
/// never chased.
fn fine_momentum_breakout(bars: &[Bar], fine: &[Bar]) -> Option<String> {
    if fine.len() < 25 {
        return None;
    }
    let last = fine.len() - 1;
    let baseline: f64 =
        fine[last - 20..last].iter().map(|b| b.volume).sum::<f64>() / 20.0;
    if baseline <= 0.0 || fine[last].volume < baseline * 3.0 {
        return None;
    }

    let base_price = fine[last - 3].close;
    if base_price <= 0.0 {
        return None;
    }
    let rise = (fine[last].close - base_price) / base_price;
    if rise < 0.03 {
        return None;
    }

    let fine_close = closes(fine);
    let fine_rsi = rsi(&fine_close, 14);
    let rsi_now = fine_rsi[last];
    if !rsi_now.is_nan() && rsi_now >= 70.0 {
        return None;
    }

    let price = bars.last().map(|b| b.close)?;
    let session_low = bars.iter().map(|b| b.low).fold(f64::MAX, f64::min);
    if session_low <= 0.0 || price >= session_low * 1.07 {
        return None;
    }

    Some(format!(
        "supply breakout ({:.1}x volume, +{:.1}% in 3m)",
        fine[last].volume / baseline,
        rise * 100.0
    ))
}

/// Primary-timeframe breakout against a short 5-bar volume baseline.
fn coarse_momentum_breakout(bars: &[Bar], close: &[f64], rsi_now: f64) -> Option<String> {
    let last = bars.len() - 1;
    if last < 5 {
        return None;
    }
    let baseline: f64 = bars[last - 5..last].iter().map(|b| b.volume).sum::<f64>() / 5.0;
    if baseline <= 0.0 || bars[last].volume < baseline * 3.0 {
        return None;
    }
    let base_price = close[last - 3];
    if base_price <= 0.0 {
        return None;
    }
    let rise = (close[last] - base_price) / base_price;
    if rise < 0.03 {
        return None;
    }
    if rsi_now >= 70.0 {
        return None;
    }
    Some(format!(
        "volume breakout ({:.1}x, +{:.1}% in 3 bars)",
        bars[last].volume / baseline,
        rise * 100.0
    ))
}

/// Any of the last `span` bars carrying at least a 10% volume bump over the
/// trailing `baseline` mean, plus the largest ratio seen.
fn recent_volume_surge(bars: &[Bar], baseline: usize, span: usize) -> (bool, f64) {
    let mut max_ratio = 0.0_f64;
    if bars.len() < baseline + span {
        return (false, 0.0);
    }
    for offset in 0..span {
        let i = bars.len() - 1 - offset;
        let window = &bars[i - baseline..i];
        let mean = window.iter().map(|b| b.volume).sum::<f64>() / baseline as f64;
        if mean > 0.0 {
            max_ratio = max_ratio.max(bars[i].volume / mean);
        }
    }
    (max_ratio >= 1.1, max_ratio)
}

/// A sharp down candle, or a majority-bearish last three bars, disqualifies a
/// near-40MA entry.
fn is_falling_knife(bars: &[Bar]) -> bool {
    let last = bars.len() - 1;
    let bar = &bars[last];
    if bar.open > 0.0 && (bar.open - bar.close) / bar.open >= 0.02 {
        return true;
    }
    let bearish = bars[last - 2..=last]
        .iter()
        .filter(|b| b.close < b.open)
        .count();
    bearish >= 2
}

fn pattern_tags(
    bars: &[Bar],
    ma5: &[f64],
    ma20: &[f64],
    ma185: &[f64],
    rsi_now: f64,
) -> Vec<PatternTag> {
    let last = bars.len() - 1;
    let price = bars[last].close;
    let mut tags = Vec::new();

    if price > ma5[last] && ma5[last] > ma20[last] && ma20[last] > ma185[last] {
        tags.push(PatternTag::AlignedStack);
    }

    let short_cross = ma5[last - 1] <= ma20[last - 1] && ma5[last] > ma20[last];
    if short_cross && price < ma185[last] {
        tags.push(PatternTag::ShortReversal);
    }

    if rsi_now <= 25.0 {
        if bars[last].close > bars[last].open {
            tags.push(PatternTag::BottomBounce);
        } else {
            tags.push(PatternTag::BottomNear);
        }
    }

    tags
}
