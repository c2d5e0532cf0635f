/// Approval status as seen by the report, decoupled from the agent's state
/// machine types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalView {
    None,
    /// Countdown running with this many whole minutes remaining.
    Waiting { remaining_minutes: i64 },
}

/// Display tier for one portfolio line. Presentation only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportTier {
    /// Approval countdown nearly expired (≤ 5 minutes).
    DeferredUrgent { remaining_minutes: i64 },
    Deferred { remaining_minutes: i64 },
    SellSignal,
    BelowTrend,
    Healthy,
}

impl ReportTier {
    pub fn marker(&self) -> &'static str {
        match self {
            ReportTier::DeferredUrgent { .. } => "🚨",
            ReportTier::Deferred { .. } => "⏳",
            ReportTier::SellSignal => "🔴",
            ReportTier::BelowTrend => "🟡",
            ReportTier::Healthy => "🟢",
        }
    }
}

/// Map one position's state to a display tier. An active approval countdown
/// outranks everything; then a live sell signal; then trend health.
pub fn report_tier(
    _profit_pct: f64,
    sell_signal: bool,
    price: f64,
    ma40: f64,
    approval: ApprovalView,
) -> ReportTier {
    if let ApprovalView::Waiting { remaining_minutes } = approval {
        if remaining_minutes <= 5 {
            return ReportTier::DeferredUrgent { remaining_minutes };
        }
        return ReportTier::Deferred { remaining_minutes };
    }
    if sell_signal {
        return ReportTier::SellSignal;
    }
    if ma40.is_finite() && ma40 > 0.0 && price < ma40 {
        return ReportTier::BelowTrend;
    }
    ReportTier::Healthy
}
