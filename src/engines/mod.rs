// =============================================================================
// Signal engines — polymorphic producers of trade intents
// =============================================================================

pub mod hft;
pub mod structure;

use crate::market::MarketSnapshot;
use crate::types::{EngineKind, Side, Symbol};

/// A trade intent emitted by an engine. Quantity on an exit intent is
/// advisory; the allocator closes the live position's remaining quantity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Intent {
    pub symbol: Symbol,
    pub side: Side,
    pub quantity: f64,
    /// Engine conviction in [0, 1].
    pub confidence: f64,
    pub is_exit: bool,
}

/// The seam between alpha and the rest of the system. The pipeline holds
/// engines as `Box<dyn SignalEngine>`; it has no opinion on what they compute.
pub trait SignalEngine: Send {
    fn kind(&self) -> EngineKind;

    /// Consume one validated tick.
    fn on_tick(&mut self, snapshot: &MarketSnapshot);

    /// Take the pending intent, if the last tick produced one. Intents are
    /// drained each cycle; an unconsumed intent does not persist.
    fn poll_intent(&mut self) -> Option<Intent>;

    /// Notify the engine that its position in `symbol` was closed (fill,
    /// cancel of remainder, or bust back to flat).
    fn on_position_closed(&mut self, symbol: Symbol, ts_ns: u64);
}
