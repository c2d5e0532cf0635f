use std::time::Instant;

/// Per-loop counters, logged at the end of every cycle.
#[derive(Debug, Default)]
pub struct CycleMetrics {
    pub cycles_run: u64,
    pub symbols_scanned: u64,
    pub signals_emitted: u64,
    pub orders_placed: u64,
    pub symbols_failed: u64,
    pub last_cycle_ms: u128,
}

impl CycleMetrics {
    pub fn start_timer() -> Instant {
        Instant::now()
    }

    pub fn finish_cycle(&mut self, started: Instant) {
        self.cycles_run += 1;
        self.last_cycle_ms = started.elapsed().as_millis();
    }

    pub fn log(&self, loop_name: &str) {
        tracing::info!(
            "{loop_name} cycle #{} done in {:.1}s: {} scanned, {} signals, {} orders, {} failed",
            self.cycles_run,
            self.last_cycle_ms as f64 / 1000.0,
            self.symbols_scanned,
            self.signals_emitted,
            self.orders_placed,
            self.symbols_failed,
        );
    }
}
