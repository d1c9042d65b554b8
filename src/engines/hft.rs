// =============================================================================
// HFT engine — sweep + micro-pullback fade with a tight-spread filter
// =============================================================================
//
// Looks for an abrupt directional run over a short tick window (a "sweep"),
// waits for the first counter-move (the micro-pullback), and fades the run.
// Only fires when the spread is tight enough for passive entry to make sense.
//
// Once in a position the engine manages a fast scalp exit: a few bps of
// target or stop, or a hard timeout.
// =============================================================================

use std::collections::VecDeque;

use tracing::debug;

use crate::market::MarketSnapshot;
use crate::types::{EngineKind, Side, Symbol};

use super::{Intent, SignalEngine};

/// Ticks examined for the sweep window.
const SWEEP_WINDOW: usize = 20;

#[derive(Debug, Clone, Copy)]
struct HftThresholds {
    /// Minimum sweep magnitude in price units.
    min_sweep: f64,
    /// Minimum pullback from the sweep extreme, price units.
    min_pullback: f64,
    /// Maximum spread for entry, price units.
    max_spread: f64,
    /// Scalp target / stop / timeout.
    target_bps: f64,
    stop_bps: f64,
    max_hold_ns: u64,
    base_quantity: f64,
}

fn thresholds(symbol: Symbol) -> HftThresholds {
    match symbol {
        Symbol::Xau => HftThresholds {
            min_sweep: 1.2,
            min_pullback: 0.3,
            max_spread: 0.5,
            target_bps: 3.0,
            stop_bps: 2.0,
            max_hold_ns: 60_000_000_000,
            base_quantity: 1.0,
        },
        Symbol::Xag => HftThresholds {
            min_sweep: 0.8,
            min_pullback: 0.2,
            max_spread: 0.3,
            target_bps: 4.0,
            stop_bps: 3.0,
            max_hold_ns: 60_000_000_000,
            base_quantity: 1.0,
        },
    }
}

#[derive(Default)]
struct SymbolState {
    mids: VecDeque<f64>,
    position_side: Option<Side>,
    entry_price: f64,
    entry_ts_ns: u64,
}

pub struct HftEngine {
    states: [SymbolState; Symbol::COUNT],
    pending: Option<Intent>,
}

impl HftEngine {
    pub fn new() -> Self {
        Self {
            states: [SymbolState::default(), SymbolState::default()],
            pending: None,
        }
    }

    fn evaluate_entry(state: &SymbolState, snap: &MarketSnapshot, th: &HftThresholds) -> Option<Intent> {
        if state.mids.len() < SWEEP_WINDOW {
            return None;
        }
        if snap.spread > th.max_spread {
            return None;
        }

        let newest = *state.mids.back()?;
        let oldest = *state.mids.front()?;
        let high = state.mids.iter().cloned().fold(f64::MIN, f64::max);
        let low = state.mids.iter().cloned().fold(f64::MAX, f64::min);

        // Up-sweep: run from the window open to the high, now pulling back.
        let up_sweep = high - oldest;
        let up_pullback = high - newest;
        if up_sweep >= th.min_sweep && up_pullback >= th.min_pullback {
            let confidence = sweep_confidence(up_sweep, up_pullback, th);
            return Some(Intent {
                symbol: snap.symbol,
                side: Side::Sell,
                quantity: th.base_quantity,
                confidence,
                is_exit: false,
            });
        }

        // Down-sweep, mirrored.
        let down_sweep = oldest - low;
        let down_pullback = newest - low;
        if down_sweep >= th.min_sweep && down_pullback >= th.min_pullback {
            let confidence = sweep_confidence(down_sweep, down_pullback, th);
            return Some(Intent {
                symbol: snap.symbol,
                side: Side::Buy,
                quantity: th.base_quantity,
                confidence,
                is_exit: false,
            });
        }

        None
    }

    fn evaluate_exit(state: &SymbolState, snap: &MarketSnapshot, th: &HftThresholds) -> bool {
        let Some(side) = state.position_side else {
            return false;
        };
        if state.entry_price <= 0.0 {
            return false;
        }
        let pnl_bps = side.sign() * (snap.mid - state.entry_price) / state.entry_price * 10_000.0;
        if pnl_bps >= th.target_bps || pnl_bps <= -th.stop_bps {
            return true;
        }
        snap.timestamp_ns.saturating_sub(state.entry_ts_ns) > th.max_hold_ns
    }
}

/// Conviction scales with how far past its floor each component is, capped
/// at 1.
fn sweep_confidence(sweep: f64, pullback: f64, th: &HftThresholds) -> f64 {
    let s = sweep / (2.0 * th.min_sweep);
    let p = pullback / (2.0 * th.min_pullback);
    (0.5 + 0.5 * (s.min(1.0) * 0.6 + p.min(1.0) * 0.4)).min(1.0)
}

impl SignalEngine for HftEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Hft
    }

    fn on_tick(&mut self, snap: &MarketSnapshot) {
        let th = thresholds(snap.symbol);
        let state = &mut self.states[snap.symbol.index()];

        state.mids.push_back(snap.mid);
        if state.mids.len() > SWEEP_WINDOW {
            state.mids.pop_front();
        }

        if state.position_side.is_some() {
            if Self::evaluate_exit(state, snap, &th) {
                let side = state.position_side.take().unwrap_or(Side::Buy);
                debug!(symbol = %snap.symbol, "hft scalp exit");
                self.pending = Some(Intent {
                    symbol: snap.symbol,
                    side,
                    quantity: 0.0,
                    confidence: 1.0,
                    is_exit: true,
                });
            }
            return;
        }

        if let Some(intent) = Self::evaluate_entry(state, snap, &th) {
            debug!(
                symbol = %snap.symbol,
                side = %intent.side,
                confidence = intent.confidence,
                "hft sweep-fade entry"
            );
            state.position_side = Some(intent.side);
            state.entry_price = snap.mid;
            state.entry_ts_ns = snap.timestamp_ns;
            state.mids.clear();
            self.pending = Some(intent);
        }
    }

    fn poll_intent(&mut self) -> Option<Intent> {
        self.pending.take()
    }

    fn on_position_closed(&mut self, symbol: Symbol, _ts_ns: u64) {
        let state = &mut self.states[symbol.index()];
        state.position_side = None;
        state.entry_price = 0.0;
    }
}

impl Default for HftEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(mid: f64, spread: f64, ts_ns: u64) -> MarketSnapshot {
        MarketSnapshot {
            symbol: Symbol::Xau,
            bid: mid - spread / 2.0,
            ask: mid + spread / 2.0,
            mid,
            spread,
            ofi: 0.0,
            timestamp_ns: ts_ns,
        }
    }

    fn feed(engine: &mut HftEngine, mids: &[f64], spread: f64) -> Option<Intent> {
        let mut out = None;
        for (i, &m) in mids.iter().enumerate() {
            engine.on_tick(&snap(m, spread, i as u64 * 1_000_000));
            if let Some(intent) = engine.poll_intent() {
                out = Some(intent);
            }
        }
        out
    }

    /// Flat window, sharp run up, then a pullback.
    fn up_sweep_series() -> Vec<f64> {
        let mut v = vec![2000.0; 14];
        v.extend_from_slice(&[2000.4, 2000.8, 2001.2, 2001.5, 2001.1, 2001.0]);
        v
    }

    #[test]
    fn fades_an_up_sweep_with_sell() {
        let mut e = HftEngine::new();
        let intent = feed(&mut e, &up_sweep_series(), 0.3).expect("entry expected");
        assert_eq!(intent.side, Side::Sell);
        assert!(!intent.is_exit);
        assert!(intent.confidence >= 0.5 && intent.confidence <= 1.0);
    }

    #[test]
    fn fades_a_down_sweep_with_buy() {
        let mut e = HftEngine::new();
        let mids: Vec<f64> = up_sweep_series().iter().map(|m| 4000.0 - m).collect();
        let intent = feed(&mut e, &mids, 0.3).expect("entry expected");
        assert_eq!(intent.side, Side::Buy);
    }

    #[test]
    fn wide_spread_blocks_entry() {
        let mut e = HftEngine::new();
        assert!(feed(&mut e, &up_sweep_series(), 0.8).is_none());
    }

    #[test]
    fn small_sweep_is_ignored() {
        let mut e = HftEngine::new();
        let mut mids = vec![2000.0; 14];
        mids.extend_from_slice(&[2000.2, 2000.4, 2000.5, 2000.4, 2000.3, 2000.2]);
        assert!(feed(&mut e, &mids, 0.3).is_none());
    }

    #[test]
    fn no_pullback_no_entry() {
        let mut e = HftEngine::new();
        let mut mids = vec![2000.0; 14];
        // sweeps up and keeps going — never pulls back
        mids.extend_from_slice(&[2000.5, 2001.0, 2001.5, 2002.0, 2002.5, 2003.0]);
        assert!(feed(&mut e, &mids, 0.3).is_none());
    }

    #[test]
    fn scalp_stop_produces_exit_intent() {
        let mut e = HftEngine::new();
        feed(&mut e, &up_sweep_series(), 0.3).expect("entry");
        // short from ~2001: price rising through the stop hurts
        e.on_tick(&snap(2002.0, 0.3, 999_000_000));
        let exit = e.poll_intent().expect("exit expected");
        assert!(exit.is_exit);
        assert_eq!(exit.side, Side::Sell);
    }

    #[test]
    fn timeout_flattens_the_scalp() {
        let mut e = HftEngine::new();
        feed(&mut e, &up_sweep_series(), 0.3).expect("entry");
        // price pinned at entry, clock run past max hold
        e.on_tick(&snap(2001.0, 0.3, 120_000_000_000));
        assert!(e.poll_intent().expect("exit expected").is_exit);
    }

    #[test]
    fn position_closed_resets_for_reentry() {
        let mut e = HftEngine::new();
        feed(&mut e, &up_sweep_series(), 0.3).expect("entry");
        e.on_position_closed(Symbol::Xau, 0);
        // a new sweep can trigger again
        assert!(feed(&mut e, &up_sweep_series(), 0.3).is_some());
    }
}
