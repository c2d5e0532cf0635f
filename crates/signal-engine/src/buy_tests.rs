use chrono::{Duration, TimeZone, Utc};
use market_core::{Bar, BuyVerdict, Grade};

use crate::buy::{evaluate_buy, BuyContext};

fn bars_from_closes(closes: &[f64], volumes: &[f64]) -> Vec<Bar> {
    let start = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
    let mut bars = Vec::with_capacity(closes.len());
    let mut prev = closes[0];
    for (i, &close) in closes.iter().enumerate() {
        let open = if i == 0 { close } else { prev };
        bars.push(Bar {
            timestamp: start + Duration::minutes(30 * i as i64),
            open,
            high: open.max(close),
            low: open.min(close),
            close,
            volume: volumes[i],
        });
        prev = close;
    }
    bars
}

/// Gentle decline for `decline_bars`, then a sawtooth recovery (+0.3 / -0.21
/// alternating). The 40-bar MA crosses the 185-bar MA a controlled number of
/// bars before the end.
fn decline_then_sawtooth(decline_bars: usize) -> Vec<Bar> {
    let mut closes = Vec::with_capacity(200);
    let mut p = 120.0;
    for i in 0..200 {
        if i < decline_bars {
            p -= 0.1;
        } else if (i - decline_bars) % 2 == 0 {
            p += 0.3;
        } else {
            p -= 0.21;
        }
        closes.push(p);
    }
    bars_from_closes(&closes, &vec![1.0; 200])
}

#[test]
fn short_series_rejects_without_panic() {
    let bars = decline_then_sawtooth(103);
    for len in [0usize, 1, 50, 184] {
        let verdict = evaluate_buy(&bars[..len], BuyContext::default());
        match verdict {
            BuyVerdict::Pass { reason, grade, .. } => {
                assert!(reason.contains("insufficient data"), "got {reason}");
                assert_eq!(grade, None);
            }
            BuyVerdict::Buy { .. } => panic!("short series must not buy"),
        }
    }
}

#[test]
fn price_band_rejects_cheap_and_expensive() {
    let cheap = bars_from_closes(&[5.0; 200], &vec![1.0; 200]);
    let verdict = evaluate_buy(&cheap, BuyContext::default());
    assert!(!verdict.is_buy());
    assert!(verdict.reason().contains("band"));

    let pricey = bars_from_closes(&[50_000.0; 200], &vec![1.0; 200]);
    let verdict = evaluate_buy(&pricey, BuyContext::default());
    assert!(!verdict.is_buy());
    assert!(verdict.reason().contains("band"));
}

#[test]
fn halted_symbol_gets_grade_f() {
    let bars = decline_then_sawtooth(103);
    let verdict = evaluate_buy(
        &bars,
        BuyContext {
            halted: true,
            fine_bars: None,
        },
    );
    match verdict {
        BuyVerdict::Pass { grade, .. } => assert_eq!(grade, Some(Grade::F)),
        BuyVerdict::Buy { .. } => panic!("halted symbol must not buy"),
    }
}

#[test]
fn crossover_four_bars_ago_accepts() {
    let bars = decline_then_sawtooth(103);
    let verdict = evaluate_buy(&bars, BuyContext::default());
    assert_eq!(verdict.metrics().bars_since_gold, 4);
    assert!(verdict.is_buy(), "got pass: {}", verdict.reason());
}

#[test]
fn crossover_three_bars_ago_is_too_soon() {
    let bars = decline_then_sawtooth(104);
    let verdict = evaluate_buy(&bars, BuyContext::default());
    assert_eq!(verdict.metrics().bars_since_gold, 3);
    assert!(!verdict.is_buy());
    assert!(
        verdict.reason().contains("too soon"),
        "got: {}",
        verdict.reason()
    );
}

#[test]
fn monotone_uptrend_rejects_overheated() {
    // decline then a straight 60-bar climb; RSI saturates near 100
    let mut closes = Vec::with_capacity(200);
    let mut p = 120.0;
    for i in 0..200 {
        if i < 140 {
            p -= 0.1;
        } else {
            p += 0.2;
        }
        closes.push(p);
    }
    let bars = bars_from_closes(&closes, &vec![1.0; 200]);
    let verdict = evaluate_buy(&bars, BuyContext::default());
    assert!(!verdict.is_buy());
    assert!(
        verdict.reason().contains("overheated"),
        "got: {}",
        verdict.reason()
    );
    assert_eq!(verdict.grade(), None);
    assert!(verdict.metrics().rsi > 65.0);
}

#[test]
fn volume_breakout_grades_s_plus() {
    // sawtooth base keeps RSI moderate, then a 3-bar push on 4x volume
    let mut closes = Vec::with_capacity(200);
    let mut p = 100.0;
    for i in 0..200 {
        p += if i % 2 == 0 { 1.5 } else { -1.5 };
        closes.push(p);
    }
    closes[197] = closes[196] * 1.011;
    closes[198] = closes[197] * 1.011;
    closes[199] = closes[198] * 1.011;
    let mut volumes = vec![1.0; 200];
    volumes[199] = 4.0;
    let bars = bars_from_closes(&closes, &volumes);

    let verdict = evaluate_buy(&bars, BuyContext::default());
    match verdict {
        BuyVerdict::Buy { grade, reason, .. } => {
            assert_eq!(grade, Grade::SPlus);
            assert!(reason.contains("breakout"), "got: {reason}");
        }
        BuyVerdict::Pass { reason, .. } => panic!("expected breakout buy, got: {reason}"),
    }
}

#[test]
fn fine_supply_breakout_grades_s() {
    // main series alone would pass on crossover age
    let bars = decline_then_sawtooth(104);

    let mut closes = Vec::with_capacity(30);
    let mut p = 100.0;
    for i in 0..30 {
        p += if i % 2 == 0 { 1.0 } else { -1.0 };
        closes.push(p);
    }
    closes[27] = closes[26] * 1.011;
    closes[28] = closes[27] * 1.011;
    closes[29] = closes[28] * 1.011;
    let mut volumes = vec![1.0; 30];
    volumes[29] = 4.0;
    let fine = bars_from_closes(&closes, &volumes);

    let verdict = evaluate_buy(
        &bars,
        BuyContext {
            halted: false,
            fine_bars: Some(&fine),
        },
    );
    match verdict {
        BuyVerdict::Buy { grade, reason, .. } => {
            assert_eq!(grade, Grade::S);
            assert!(reason.contains("supply breakout"), "got: {reason}");
        }
        BuyVerdict::Pass { reason, .. } => panic!("expected supply breakout, got: {reason}"),
    }
}

#[test]
fn supply_breakout_rejected_far_above_day_low() {
    // identical setup, but the primary series carries a deep intraday low so
    // the current price sits well more than 7% above it
    let mut bars = decline_then_sawtooth(104);
    bars[150].low = 90.0;

    let mut closes = Vec::with_capacity(30);
    let mut p = 100.0;
    for i in 0..30 {
        p += if i % 2 == 0 { 1.0 } else { -1.0 };
        closes.push(p);
    }
    closes[27] = closes[26] * 1.011;
    closes[28] = closes[27] * 1.011;
    closes[29] = closes[28] * 1.011;
    let mut volumes = vec![1.0; 30];
    volumes[29] = 4.0;
    let fine = bars_from_closes(&closes, &volumes);

    let verdict = evaluate_buy(
        &bars,
        BuyContext {
            halted: false,
            fine_bars: Some(&fine),
        },
    );
    assert!(!verdict.is_buy(), "got: {}", verdict.reason());
}

#[test]
fn verdict_is_deterministic() {
    let bars = decline_then_sawtooth(103);
    let a = evaluate_buy(&bars, BuyContext::default());
    let b = evaluate_buy(&bars, BuyContext::default());
    assert_eq!(a.is_buy(), b.is_buy());
    assert_eq!(a.grade(), b.grade());
    assert_eq!(a.reason(), b.reason());
    assert_eq!(a.metrics().rsi, b.metrics().rsi);
    assert_eq!(a.metrics().bars_since_gold, b.metrics().bars_since_gold);
}

#[test]
fn metrics_populated_on_rejection() {
    let bars = decline_then_sawtooth(104);
    let verdict = evaluate_buy(&bars, BuyContext::default());
    let m = verdict.metrics();
    assert!(m.current_price > 0.0);
    assert!(m.ma40 > 0.0);
    assert!(m.ma185 > 0.0);
    assert!(m.rsi.is_finite());
}
