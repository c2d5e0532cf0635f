use market_core::Bar;

/// Simple moving average aligned with the input series. Index `i` holds the
/// average of the `period` values ending at `i`; indices before the first
/// full window are NaN.
pub fn moving_average(data: &[f64], period: usize) -> Vec<f64> {
    let mut result = vec![f64::NAN; data.len()];
    if period == 0 || data.len() < period {
        return result;
    }

    let mut sum: f64 = data[..period].iter().sum();
    result[period - 1] = sum / period as f64;
    for i in period..data.len() {
        sum += data[i] - data[i - period];
        result[i] = sum / period as f64;
    }
    result
}

/// Wilder RSI aligned with the input series (EMA smoothing, alpha = 1/period).
/// Indices before the first full window are NaN. A zero average loss pins the
/// value at 100.
pub fn rsi(data: &[f64], period: usize) -> Vec<f64> {
    let mut result = vec![f64::NAN; data.len()];
    if period == 0 || data.len() < period + 1 {
        return result;
    }

    let mut avg_gain = 0.0;
    let mut avg_loss = 0.0;
    for i in 1..=period {
        let change = data[i] - data[i - 1];
        if change > 0.0 {
            avg_gain += change;
        } else {
            avg_loss += -change;
        }
    }
    avg_gain /= period as f64;
    avg_loss /= period as f64;
    result[period] = rsi_value(avg_gain, avg_loss);

    let alpha = 1.0 / period as f64;
    for i in period + 1..data.len() {
        let change = data[i] - data[i - 1];
        let (gain, loss) = if change > 0.0 {
            (change, 0.0)
        } else {
            (0.0, -change)
        };
        avg_gain = avg_gain * (1.0 - alpha) + gain * alpha;
        avg_loss = avg_loss * (1.0 - alpha) + loss * alpha;
        result[i] = rsi_value(avg_gain, avg_loss);
    }
    result
}

fn rsi_value(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        return 100.0;
    }
    100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
}

/// Latest-bar volume over the mean of the `baseline` bars before it.
/// Returns 0.0 when the baseline is empty or has no volume.
pub fn volume_ratio(bars: &[Bar], baseline: usize) -> f64 {
    if bars.len() < baseline + 1 || baseline == 0 {
        return 0.0;
    }
    let current = bars[bars.len() - 1].volume;
    let window = &bars[bars.len() - 1 - baseline..bars.len() - 1];
    let mean = window.iter().map(|b| b.volume).sum::<f64>() / baseline as f64;
    if mean <= 0.0 {
        return 0.0;
    }
    current / mean
}

/// Largest single-bar volume ratio over the last `lookback` bars, each one
/// measured against its own `baseline`-bar mean.
pub fn max_volume_ratio(bars: &[Bar], baseline: usize, lookback: usize) -> f64 {
    if bars.len() < baseline + 1 {
        return 0.0;
    }
    let start = bars.len().saturating_sub(lookback).max(baseline);
    let mut best = 0.0_f64;
    for i in start..bars.len() {
        let window = &bars[i - baseline..i];
        let mean = window.iter().map(|b| b.volume).sum::<f64>() / baseline as f64;
        if mean > 0.0 {
            best = best.max(bars[i].volume / mean);
        }
    }
    best
}

/// Korean won tick-size ladder. Used to normalize MA convergence so the same
/// threshold works across price magnitudes.
pub fn krw_tick_size(price: f64) -> f64 {
    if price >= 1_000_000.0 {
        1_000.0
    } else if price >= 500_000.0 {
        500.0
    } else if price >= 100_000.0 {
        100.0
    } else if price >= 50_000.0 {
        50.0
    } else if price >= 10_000.0 {
        10.0
    } else if price >= 5_000.0 {
        5.0
    } else if price >= 1_000.0 {
        1.0
    } else if price >= 100.0 {
        0.1
    } else if price >= 10.0 {
        0.01
    } else if price >= 1.0 {
        0.001
    } else {
        0.0001
    }
}

/// Bars elapsed since the most recent upward 40-over-185 cross within
/// `lookback` bars of the end. Returns -1 when no cross is found.
pub fn bars_since_golden_cross(ma_fast: &[f64], ma_slow: &[f64], lookback: usize) -> i64 {
    let len = ma_fast.len().min(ma_slow.len());
    if len < 2 {
        return -1;
    }
    let start = len.saturating_sub(lookback).max(1);
    let mut last_cross: Option<usize> = None;
    for i in start..len {
        let prev_below = ma_fast[i - 1] <= ma_slow[i - 1];
        let now_above = ma_fast[i] > ma_slow[i];
        if prev_below
            && now_above
            && ma_fast[i].is_finite()
            && ma_slow[i].is_finite()
            && ma_fast[i - 1].is_finite()
            && ma_slow[i - 1].is_finite()
        {
            last_cross = Some(i);
        }
    }
    match last_cross {
        Some(i) => (len - 1 - i) as i64,
        None => -1,
    }
}

pub fn closes(bars: &[Bar]) -> Vec<f64> {
    bars.iter().map(|b| b.close).collect()
}
