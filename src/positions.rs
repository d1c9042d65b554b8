// =============================================================================
// Position book — at most one live position per symbol, bust-reversible
// =============================================================================
//
// Mutated only by confirmed fills (and their busts). Realized PnL is computed
// at close against the volume-weighted entry; per-fill PnL attribution is the
// post-trade collaborator's concern.
// =============================================================================

use serde::Serialize;
use tracing::{info, warn};

use crate::types::{Side, Symbol};

#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct PositionState {
    pub symbol: Symbol,
    pub side: Side,
    pub quantity: f64,
    pub entry_price: f64,
    pub entry_ts_ns: u64,
}

/// Effect of one applied fill.
#[derive(Debug, Clone, Copy, Default)]
pub struct PositionDelta {
    /// Realized PnL released by this fill (close or reduction).
    pub realized_pnl: f64,
    /// The symbol's position is now flat.
    pub closed: bool,
    /// The fill opened a brand-new position.
    pub opened: bool,
}

pub struct PositionBook {
    positions: [Option<PositionState>; Symbol::COUNT],
    daily_pnl: f64,
    /// Recovered state awaiting broker confirmation; entries stay blocked
    /// while set.
    pending_reconciliation: bool,
}

impl PositionBook {
    pub fn new() -> Self {
        Self {
            positions: [None; Symbol::COUNT],
            daily_pnl: 0.0,
            pending_reconciliation: false,
        }
    }

    // -------------------------------------------------------------------------
    // Fill application
    // -------------------------------------------------------------------------

    /// Apply one confirmed fill. Same-side fills extend the position at a
    /// volume-weighted entry; opposite-side fills reduce, close, or flip it.
    pub fn apply_fill(
        &mut self,
        symbol: Symbol,
        side: Side,
        quantity: f64,
        price: f64,
        ts_ns: u64,
    ) -> PositionDelta {
        if quantity <= 0.0 || price <= 0.0 {
            warn!(symbol = %symbol, quantity, price, "degenerate fill ignored");
            return PositionDelta::default();
        }

        let slot = &mut self.positions[symbol.index()];
        match slot {
            None => {
                *slot = Some(PositionState {
                    symbol,
                    side,
                    quantity,
                    entry_price: price,
                    entry_ts_ns: ts_ns,
                });
                PositionDelta { opened: true, ..Default::default() }
            }
            Some(pos) if pos.side == side => {
                // extend: volume-weighted entry
                let total = pos.quantity + quantity;
                pos.entry_price = (pos.entry_price * pos.quantity + price * quantity) / total;
                pos.quantity = total;
                PositionDelta::default()
            }
            Some(pos) => {
                let closing_qty = quantity.min(pos.quantity);
                let pnl = pos.side.sign() * (price - pos.entry_price) * closing_qty;
                self.daily_pnl += pnl;

                if quantity < pos.quantity {
                    pos.quantity -= quantity;
                    PositionDelta { realized_pnl: pnl, ..Default::default() }
                } else if (quantity - pos.quantity).abs() < 1e-9 {
                    info!(symbol = %symbol, pnl, "position closed");
                    *slot = None;
                    PositionDelta { realized_pnl: pnl, closed: true, ..Default::default() }
                } else {
                    // over-close flips the position
                    let remainder = quantity - pos.quantity;
                    *slot = Some(PositionState {
                        symbol,
                        side,
                        quantity: remainder,
                        entry_price: price,
                        entry_ts_ns: ts_ns,
                    });
                    PositionDelta {
                        realized_pnl: pnl,
                        closed: true,
                        opened: true,
                    }
                }
            }
        }
    }

    /// Reverse a previously applied fill (trade bust): negate the signed
    /// position delta and the PnL it realized.
    pub fn reverse_fill(
        &mut self,
        symbol: Symbol,
        side: Side,
        quantity: f64,
        price: f64,
        realized_pnl: f64,
        ts_ns: u64,
    ) -> PositionDelta {
        self.daily_pnl -= realized_pnl;
        // applying the opposite-side fill undoes the position delta
        let mut delta = self.apply_fill(symbol, side.opposite(), quantity, price, ts_ns);
        // the synthetic reversal fill must not double-count PnL
        self.daily_pnl -= delta.realized_pnl;
        delta.realized_pnl = -realized_pnl;
        delta
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    pub fn position(&self, symbol: Symbol) -> Option<PositionState> {
        self.positions[symbol.index()]
    }

    pub fn open_positions(&self) -> Vec<PositionState> {
        self.positions.iter().flatten().copied().collect()
    }

    pub fn daily_pnl(&self) -> f64 {
        self.daily_pnl
    }

    pub fn unrealized_pnl(&self, mid_of: impl Fn(Symbol) -> Option<f64>) -> f64 {
        self.positions
            .iter()
            .flatten()
            .filter_map(|p| {
                let mid = mid_of(p.symbol)?;
                Some(p.side.sign() * (mid - p.entry_price) * p.quantity)
            })
            .sum()
    }

    pub fn reset_daily_pnl(&mut self) {
        self.daily_pnl = 0.0;
    }

    // -------------------------------------------------------------------------
    // Recovery
    // -------------------------------------------------------------------------

    /// Seed the book from a recovered snapshot; the state is held
    /// pending-reconciliation until the broker session confirms it.
    pub fn restore(&mut self, positions: Vec<PositionState>, daily_pnl: f64) {
        for p in positions {
            self.positions[p.symbol.index()] = Some(p);
        }
        self.daily_pnl = daily_pnl;
        self.pending_reconciliation = true;
    }

    pub fn confirm_reconciliation(&mut self) {
        if self.pending_reconciliation {
            info!("recovered position state confirmed by broker session");
            self.pending_reconciliation = false;
        }
    }

    pub fn is_pending_reconciliation(&self) -> bool {
        self.pending_reconciliation
    }
}

impl Default for PositionBook {
    fn default() -> Self {
        Self::new()
    }
}
