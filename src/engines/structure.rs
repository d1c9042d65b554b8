// =============================================================================
// Structure engine — trend-following state machine per symbol
// =============================================================================
//
// FLAT -> ENTERED -> HOLD -> TRAIL -> COOLDOWN -> FLAT
//
// Entry requires both a trend score and OFI persistence above per-symbol
// thresholds. Size grows with conviction up to a per-symbol multiplier cap.
// Exits: fixed stop, trailing retrace beyond half the trail trigger, or the
// max-hold clock once trailing; ENTERED/HOLD are bounded by the stop alone.
// Every exit is followed by a 60 s cooldown.
// =============================================================================

use tracing::{debug, info};

use crate::market::indicators::{EmaPair, OfiWindow};
use crate::market::MarketSnapshot;
use crate::types::{EngineKind, Side, Symbol};

use super::{Intent, SignalEngine};

const COOLDOWN_NS: u64 = 60_000_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StructureState {
    Flat,
    Setup,
    Entered,
    Hold,
    Trail,
    Cooldown,
}

#[derive(Debug, Clone, Copy)]
struct StructureParams {
    trend_entry_threshold: f64,
    ofi_entry_threshold: f64,
    stop_bps: f64,
    trail_trigger_bps: f64,
    max_hold_ns: u64,
    max_size_multiplier: f64,
    base_quantity: f64,
}

fn params(symbol: Symbol) -> StructureParams {
    match symbol {
        Symbol::Xau => StructureParams {
            trend_entry_threshold: 0.65,
            ofi_entry_threshold: 0.60,
            stop_bps: 5.0,
            trail_trigger_bps: 6.0,
            max_hold_ns: 45 * 60 * 1_000_000_000,
            max_size_multiplier: 3.0,
            base_quantity: 1.0,
        },
        Symbol::Xag => StructureParams {
            trend_entry_threshold: 0.70,
            ofi_entry_threshold: 0.65,
            stop_bps: 7.0,
            trail_trigger_bps: 8.0,
            max_hold_ns: 30 * 60 * 1_000_000_000,
            max_size_multiplier: 2.0,
            base_quantity: 1.0,
        },
    }
}

struct SymbolMachine {
    state: StructureState,
    emas: EmaPair,
    ofi: OfiWindow,
    position_side: Side,
    entry_price: f64,
    entry_ts_ns: u64,
    cooldown_start_ns: u64,
    trailing_extreme: f64,
}

impl SymbolMachine {
    fn new() -> Self {
        Self {
            state: StructureState::Flat,
            emas: EmaPair::new(),
            ofi: OfiWindow::new(),
            position_side: Side::Buy,
            entry_price: 0.0,
            entry_ts_ns: 0,
            cooldown_start_ns: 0,
            trailing_extreme: 0.0,
        }
    }

    fn unrealized_bps(&self, mid: f64) -> f64 {
        if self.entry_price <= 0.0 {
            return 0.0;
        }
        self.position_side.sign() * (mid - self.entry_price) / self.entry_price * 10_000.0
    }
}

pub struct StructureEngine {
    machines: [SymbolMachine; Symbol::COUNT],
    pending: Option<Intent>,
}

impl StructureEngine {
    pub fn new() -> Self {
        Self {
            machines: [SymbolMachine::new(), SymbolMachine::new()],
            pending: None,
        }
    }

    #[cfg(test)]
    pub fn state(&self, symbol: Symbol) -> StructureState {
        self.machines[symbol.index()].state
    }

    fn attempt_entry(&mut self, snap: &MarketSnapshot) {
        let p = params(snap.symbol);
        let m = &mut self.machines[snap.symbol.index()];

        let trend_score = m.emas.trend_score();
        let Some(direction) = m.emas.trend_direction() else {
            m.state = StructureState::Flat;
            return;
        };
        let ofi_persistence = m.ofi.persistence(direction);

        // SETUP is the half-armed state: trend in place, flow not yet aligned.
        if trend_score >= p.trend_entry_threshold && ofi_persistence < p.ofi_entry_threshold {
            m.state = StructureState::Setup;
            return;
        }
        if trend_score < p.trend_entry_threshold || ofi_persistence < p.ofi_entry_threshold {
            m.state = StructureState::Flat;
            return;
        }

        let size_multiplier =
            (1.0 + 1.5 * trend_score + 1.0 * ofi_persistence).min(p.max_size_multiplier);
        let quantity = p.base_quantity * size_multiplier;
        let confidence = (trend_score + ofi_persistence) / 2.0;

        info!(
            symbol = %snap.symbol,
            side = %direction,
            trend = trend_score,
            ofi = ofi_persistence,
            quantity,
            "structure entry signal"
        );

        m.position_side = direction;
        m.entry_price = snap.mid;
        m.entry_ts_ns = snap.timestamp_ns;
        m.trailing_extreme = snap.mid;
        m.state = StructureState::Entered;

        self.pending = Some(Intent {
            symbol: snap.symbol,
            side: direction,
            quantity,
            confidence,
            is_exit: false,
        });
    }

    fn manage_position(&mut self, snap: &MarketSnapshot) {
        let p = params(snap.symbol);
        let idx = snap.symbol.index();
        let profit_bps = self.machines[idx].unrealized_bps(snap.mid);
        let state = self.machines[idx].state;

        match state {
            StructureState::Entered => {
                if profit_bps < -p.stop_bps {
                    self.emit_exit(snap, "stop");
                } else if profit_bps > p.trail_trigger_bps {
                    self.machines[idx].state = StructureState::Hold;
                }
            }
            StructureState::Hold => {
                if profit_bps < -p.stop_bps {
                    self.emit_exit(snap, "stop");
                } else if profit_bps > p.trail_trigger_bps {
                    self.machines[idx].trailing_extreme = snap.mid;
                    self.machines[idx].state = StructureState::Trail;
                }
            }
            StructureState::Trail => {
                let m = &mut self.machines[idx];
                match m.position_side {
                    Side::Buy => m.trailing_extreme = m.trailing_extreme.max(snap.mid),
                    Side::Sell => m.trailing_extreme = m.trailing_extreme.min(snap.mid),
                }
                let retrace_bps = match m.position_side {
                    Side::Buy => (m.trailing_extreme - snap.mid) / m.entry_price * 10_000.0,
                    Side::Sell => (snap.mid - m.trailing_extreme) / m.entry_price * 10_000.0,
                };
                let held_ns = snap.timestamp_ns.saturating_sub(m.entry_ts_ns);
                if retrace_bps > p.trail_trigger_bps / 2.0 {
                    self.emit_exit(snap, "trail retrace");
                } else if held_ns > p.max_hold_ns {
                    self.emit_exit(snap, "max hold");
                }
            }
            _ => {}
        }
    }

    fn emit_exit(&mut self, snap: &MarketSnapshot, reason: &str) {
        let m = &mut self.machines[snap.symbol.index()];
        debug!(symbol = %snap.symbol, reason, "structure exit");
        self.pending = Some(Intent {
            symbol: snap.symbol,
            side: m.position_side,
            quantity: 0.0,
            confidence: 1.0,
            is_exit: true,
        });
        m.state = StructureState::Cooldown;
        m.cooldown_start_ns = snap.timestamp_ns;
        m.entry_price = 0.0;
    }
}

impl SignalEngine for StructureEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Structure
    }

    fn on_tick(&mut self, snap: &MarketSnapshot) {
        {
            let m = &mut self.machines[snap.symbol.index()];
            m.emas.update(snap.mid);
            m.ofi.push(snap.ofi);
            if !m.emas.is_warm() {
                return;
            }
        }

        match self.machines[snap.symbol.index()].state {
            StructureState::Flat | StructureState::Setup => self.attempt_entry(snap),
            StructureState::Entered | StructureState::Hold | StructureState::Trail => {
                self.manage_position(snap)
            }
            StructureState::Cooldown => {
                let m = &mut self.machines[snap.symbol.index()];
                if snap.timestamp_ns.saturating_sub(m.cooldown_start_ns) > COOLDOWN_NS {
                    m.state = StructureState::Flat;
                }
            }
        }
    }

    fn poll_intent(&mut self) -> Option<Intent> {
        self.pending.take()
    }

    fn on_position_closed(&mut self, symbol: Symbol, ts_ns: u64) {
        let m = &mut self.machines[symbol.index()];
        if !matches!(m.state, StructureState::Cooldown) {
            // closed externally (risk flatten, bust): same cooldown discipline
            m.state = StructureState::Cooldown;
            m.cooldown_start_ns = ts_ns;
            m.entry_price = 0.0;
        }
    }
}

impl Default for StructureEngine {
    fn default() -> Self {
        Self::new()
    }
}
