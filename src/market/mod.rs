// =============================================================================
// Market state — process-wide quote store and the tick event type
// =============================================================================

pub mod candles;
pub mod handler;
pub mod indicators;
pub mod regime;
pub mod seqlock;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use chrono::{DateTime, Datelike, Timelike, Utc};

use crate::types::Symbol;
use seqlock::{Quote, QuoteCell};

/// A symbol with no fresh tick for this long is not tradable.
const STALE_TICK_NS: u64 = 500_000_000;

/// One validated top-of-book observation, as flowed through the decision
/// pipeline.
#[derive(Debug, Clone, Copy)]
pub struct MarketSnapshot {
    pub symbol: Symbol,
    pub bid: f64,
    pub ask: f64,
    pub mid: f64,
    pub spread: f64,
    /// Order-flow imbalance in [-1, 1]; positive means buy pressure.
    pub ofi: f64,
    pub timestamp_ns: u64,
}

/// Many-readers / single-writer-per-symbol quote store. The QUOTE session is
/// the only writer; engines and the governor read lock-free. Reads across
/// symbols are not cross-coherent — per-symbol reads are.
pub struct MarketState {
    cells: [QuoteCell; Symbol::COUNT],
    live: [AtomicBool; Symbol::COUNT],
    last_tick_ns: [AtomicU64; Symbol::COUNT],
}

impl MarketState {
    pub fn new() -> Self {
        Self {
            cells: [QuoteCell::new(), QuoteCell::new()],
            live: [AtomicBool::new(false), AtomicBool::new(false)],
            last_tick_ns: [AtomicU64::new(0), AtomicU64::new(0)],
        }
    }

    pub fn update(&self, symbol: Symbol, bid: f64, ask: f64, timestamp_ns: u64) {
        let i = symbol.index();
        self.cells[i].write(bid, ask, timestamp_ns);
        self.last_tick_ns[i].store(timestamp_ns, Ordering::Release);
    }

    pub fn quote(&self, symbol: Symbol) -> Option<Quote> {
        self.cells[symbol.index()].read()
    }

    pub fn mid(&self, symbol: Symbol) -> Option<f64> {
        self.quote(symbol).map(|q| q.mid())
    }

    /// Mark a symbol live once the validity filter has passed two consecutive
    /// good ticks.
    pub fn set_live(&self, symbol: Symbol, live: bool) {
        self.live[symbol.index()].store(live, Ordering::Release);
    }

    /// Live and not stale: a symbol only trades on a fresh, validated feed.
    pub fn is_tradable(&self, symbol: Symbol, now_ns: u64) -> bool {
        let i = symbol.index();
        if !self.live[i].load(Ordering::Acquire) {
            return false;
        }
        let last = self.last_tick_ns[i].load(Ordering::Acquire);
        now_ns.saturating_sub(last) <= STALE_TICK_NS
    }
}

impl Default for MarketState {
    fn default() -> Self {
        Self::new()
    }
}

/// Simple UTC calendar gate: spot metals trade from Sunday 22:00 UTC to
/// Friday 22:00 UTC.
pub fn metals_market_open(now: DateTime<Utc>) -> bool {
    match now.weekday() {
        chrono::Weekday::Sat => false,
        chrono::Weekday::Fri => now.hour() < 22,
        chrono::Weekday::Sun => now.hour() >= 22,
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn tradable_requires_live_and_fresh() {
        let ms = MarketState::new();
        ms.update(Symbol::Xau, 1999.0, 2000.0, 1_000_000_000);
        assert!(!ms.is_tradable(Symbol::Xau, 1_000_000_001), "not live yet");

        ms.set_live(Symbol::Xau, true);
        assert!(ms.is_tradable(Symbol::Xau, 1_200_000_000));
        // > 500 ms without a tick: stale
        assert!(!ms.is_tradable(Symbol::Xau, 1_600_000_001));
    }

    #[test]
    fn per_symbol_isolation() {
        let ms = MarketState::new();
        ms.update(Symbol::Xau, 1999.0, 2000.0, 5);
        assert!(ms.quote(Symbol::Xau).is_some());
        assert!(ms.quote(Symbol::Xag).is_none());
    }

    #[test]
    fn weekend_gate() {
        let open = |y, m, d, h| {
            metals_market_open(Utc.with_ymd_and_hms(y, m, d, h, 30, 0).unwrap())
        };
        assert!(open(2026, 3, 4, 12)); // Wednesday
        assert!(open(2026, 3, 6, 21)); // Friday before the close
        assert!(!open(2026, 3, 6, 22)); // Friday after the close
        assert!(!open(2026, 3, 7, 12)); // Saturday
        assert!(!open(2026, 3, 8, 21)); // Sunday before the open
        assert!(open(2026, 3, 8, 22)); // Sunday after the open
    }
}
