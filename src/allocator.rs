// =============================================================================
// Capital allocator — engine-vs-engine arbitration and exposure accounting
// =============================================================================
//
// Priority rules, in order:
//   1. Any exit intent wins and closes the live position.
//   2. Structure dominates a simultaneous HFT entry when its confidence
//      clears the minimum and is at least the HFT confidence.
//   3. Capital shares scale with structure conviction (structure grows, HFT
//      shrinks), both clamped.
//   4. Per-symbol exposure caps apply after the share scaling.
//   5. A strong structure signal blocks an opposing HFT entry outright.
//
// Exposure invariant: hft_exposure + structure_exposure == global_exposure
// within $1 — audited every five minutes; a violation latches the corruption
// flag and alerts the operator.
// =============================================================================

use tracing::{error, info, warn};

use crate::engines::Intent;
use crate::types::{EngineKind, Side, Symbol};

/// The allocator's output: a sized, attributed order request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AllocatedIntent {
    pub symbol: Symbol,
    pub side: Side,
    pub quantity: f64,
    pub is_exit: bool,
    pub source_engine: EngineKind,
    pub confidence: f64,
}

/// Live position as the allocator tracks it.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllocatorPosition {
    pub active: bool,
    pub side: Option<Side>,
    pub quantity: f64,
    pub entry_price: f64,
    pub source_engine: Option<EngineKind>,
}

#[derive(Debug, Clone)]
pub struct AllocationConfig {
    /// Absolute exposure ceilings, in dollars.
    pub max_xau_exposure: f64,
    pub max_xag_exposure: f64,
    pub structure_min_confidence: f64,
    pub structure_capital_base: f64,
    pub structure_capital_boost: f64,
    pub hft_capital_base: f64,
    pub hft_capital_penalty: f64,
}

impl Default for AllocationConfig {
    fn default() -> Self {
        Self {
            max_xau_exposure: 10_000.0,
            max_xag_exposure: 6_000.0,
            structure_min_confidence: 0.6,
            structure_capital_base: 0.4,
            structure_capital_boost: 0.5,
            hft_capital_base: 0.8,
            hft_capital_penalty: 0.5,
        }
    }
}

/// Exposure mismatch tolerance, in dollars.
const AUDIT_TOLERANCE: f64 = 1.0;

pub struct CapitalAllocator {
    config: AllocationConfig,
    positions: [AllocatorPosition; Symbol::COUNT],
    engine_exposure: [f64; 2],
    global_exposure: f64,
    corruption_detected: bool,
}

impl CapitalAllocator {
    pub fn new(config: AllocationConfig) -> Self {
        Self {
            config,
            positions: [AllocatorPosition::default(); Symbol::COUNT],
            engine_exposure: [0.0; 2],
            global_exposure: 0.0,
            corruption_detected: false,
        }
    }

    // -------------------------------------------------------------------------
    // Arbitration
    // -------------------------------------------------------------------------

    pub fn allocate(
        &mut self,
        hft: Option<Intent>,
        structure: Option<Intent>,
        mid_price: f64,
    ) -> Option<AllocatedIntent> {
        // Priority 1: exits first, structure's before HFT's.
        if let Some(i) = structure.filter(|i| i.is_exit) {
            return self.build_exit(i);
        }
        if let Some(i) = hft.filter(|i| i.is_exit) {
            return self.build_exit(i);
        }

        let dominant = self.decide_dominant(hft.as_ref(), structure.as_ref());
        match dominant {
            EngineKind::Structure => {
                let s = structure?;
                self.process_structure(s, mid_price)
            }
            EngineKind::Hft => {
                let h = hft?;
                self.process_hft(h, structure.as_ref(), mid_price)
            }
        }
    }

    fn decide_dominant(&self, hft: Option<&Intent>, structure: Option<&Intent>) -> EngineKind {
        let Some(s) = structure else {
            return EngineKind::Hft;
        };
        if hft.is_none() {
            return EngineKind::Structure;
        }
        let h = hft.unwrap_or(s);
        if s.confidence >= self.config.structure_min_confidence && s.confidence >= h.confidence {
            EngineKind::Structure
        } else {
            EngineKind::Hft
        }
    }

    fn build_exit(&mut self, intent: Intent) -> Option<AllocatedIntent> {
        let pos = self.positions[intent.symbol.index()];
        // An exit against no recorded position (or no recorded side) is a
        // no-op rather than a guess at direction.
        let side = pos.side.filter(|_| pos.active)?;
        Some(AllocatedIntent {
            symbol: intent.symbol,
            side,
            quantity: pos.quantity,
            is_exit: true,
            source_engine: pos.source_engine.unwrap_or(EngineKind::Structure),
            confidence: 1.0,
        })
    }

    fn process_structure(&mut self, intent: Intent, mid: f64) -> Option<AllocatedIntent> {
        let share = self.structure_capital_share(intent.confidence);
        self.cap_and_build(intent, EngineKind::Structure, share, mid)
    }

    fn process_hft(
        &mut self,
        intent: Intent,
        structure: Option<&Intent>,
        mid: f64,
    ) -> Option<AllocatedIntent> {
        // Rule 5: strong opposing structure blocks HFT.
        if let Some(s) = structure {
            if s.side != intent.side
                && s.confidence >= self.config.structure_min_confidence
            {
                info!(symbol = %intent.symbol, "hft entry blocked by opposing structure signal");
                return None;
            }
        }
        let structure_conf = structure.map_or(0.0, |s| s.confidence);
        let share = self.hft_capital_share(structure_conf);
        self.cap_and_build(intent, EngineKind::Hft, share, mid)
    }

    fn cap_and_build(
        &mut self,
        intent: Intent,
        engine: EngineKind,
        share: f64,
        mid: f64,
    ) -> Option<AllocatedIntent> {
        if mid <= 0.0 {
            return None;
        }
        // One position per symbol in the core.
        if self.positions[intent.symbol.index()].active {
            return None;
        }

        let max_exposure = self.max_exposure(intent.symbol) * share;
        let max_quantity = max_exposure / mid;
        let quantity = intent.quantity.min(max_quantity);
        if quantity <= 0.0 {
            return None;
        }

        Some(AllocatedIntent {
            symbol: intent.symbol,
            side: intent.side,
            quantity,
            is_exit: false,
            source_engine: engine,
            confidence: intent.confidence,
        })
    }

    fn structure_capital_share(&self, confidence: f64) -> f64 {
        let c = &self.config;
        (c.structure_capital_base + confidence * c.structure_capital_boost)
            .clamp(c.structure_capital_base, c.structure_capital_base + c.structure_capital_boost)
    }

    fn hft_capital_share(&self, structure_confidence: f64) -> f64 {
        let c = &self.config;
        (c.hft_capital_base - structure_confidence * c.hft_capital_penalty)
            .clamp(0.2, c.hft_capital_base)
    }

    fn max_exposure(&self, symbol: Symbol) -> f64 {
        match symbol {
            Symbol::Xau => self.config.max_xau_exposure,
            Symbol::Xag => self.config.max_xag_exposure,
        }
    }

    // -------------------------------------------------------------------------
    // Exposure accounting — driven exclusively by confirmed fills
    // -------------------------------------------------------------------------

    pub fn on_position_opened(
        &mut self,
        symbol: Symbol,
        side: Side,
        quantity: f64,
        price: f64,
        engine: EngineKind,
    ) {
        let notional = quantity * price;
        self.positions[symbol.index()] = AllocatorPosition {
            active: true,
            side: Some(side),
            quantity,
            entry_price: price,
            source_engine: Some(engine),
        };
        self.engine_exposure[engine.index()] += notional;
        self.global_exposure += notional;
    }

    pub fn on_position_closed(&mut self, symbol: Symbol) {
        let pos = &mut self.positions[symbol.index()];
        if !pos.active {
            return;
        }
        let notional = pos.quantity * pos.entry_price;
        if let Some(engine) = pos.source_engine {
            self.engine_exposure[engine.index()] =
                (self.engine_exposure[engine.index()] - notional).max(0.0);
        }
        self.global_exposure = (self.global_exposure - notional).max(0.0);
        *pos = AllocatorPosition::default();
    }

    pub fn position(&self, symbol: Symbol) -> AllocatorPosition {
        self.positions[symbol.index()]
    }

    pub fn engine_exposure(&self, engine: EngineKind) -> f64 {
        self.engine_exposure[engine.index()]
    }

    pub fn global_exposure(&self) -> f64 {
        self.global_exposure
    }

    // -------------------------------------------------------------------------
    // Audit
    // -------------------------------------------------------------------------

    /// Verify the exposure invariant. Called by the auditor task every five
    /// minutes and cheap enough to call after any mutation in tests.
    pub fn audit(&mut self) -> bool {
        let engine_sum: f64 = self.engine_exposure.iter().sum();
        let diff = (engine_sum - self.global_exposure).abs();

        if diff > AUDIT_TOLERANCE {
            self.corruption_detected = true;
            error!(
                engine_sum,
                global = self.global_exposure,
                diff,
                "ALLOCATOR AUDIT FAILURE — exposure mismatch"
            );
            return false;
        }
        if self.global_exposure < -0.01 || self.engine_exposure.iter().any(|&e| e < -0.01) {
            self.corruption_detected = true;
            error!("ALLOCATOR AUDIT FAILURE — negative exposure");
            return false;
        }
        true
    }

    pub fn corruption_detected(&self) -> bool {
        self.corruption_detected
    }

    /// Test hook: force an inconsistent exposure pair.
    #[cfg(test)]
    fn corrupt_for_test(&mut self) {
        self.global_exposure += 50.0;
    }
}

/// Auditor entry point used by the periodic task: audit, and warn on a
/// previously latched corruption so the operator alert repeats.
pub fn run_audit(allocator: &mut CapitalAllocator) {
    if !allocator.audit() || allocator.corruption_detected() {
        warn!("allocator corruption flag is latched — operating degraded");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(symbol: Symbol, side: Side, qty: f64, confidence: f64) -> Intent {
        Intent { symbol, side, quantity: qty, confidence, is_exit: false }
    }

    fn exit_intent(symbol: Symbol) -> Intent {
        Intent { symbol, side: Side::Buy, quantity: 0.0, confidence: 1.0, is_exit: true }
    }

    fn allocator() -> CapitalAllocator {
        CapitalAllocator::new(AllocationConfig::default())
    }

    #[test]
    fn exit_intent_wins_over_entries() {
        let mut a = allocator();
        a.on_position_opened(Symbol::Xau, Side::Sell, 2.0, 2000.0, EngineKind::Structure);

        let out = a
            .allocate(
                Some(entry(Symbol::Xau, Side::Buy, 1.0, 0.9)),
                Some(exit_intent(Symbol::Xau)),
                2000.0,
            )
            .unwrap();
        assert!(out.is_exit);
        assert_eq!(out.side, Side::Sell, "closes the recorded side");
        assert_eq!(out.quantity, 2.0, "closes the full remaining quantity");
    }

    #[test]
    fn exit_without_position_is_noop() {
        let mut a = allocator();
        assert!(a.allocate(None, Some(exit_intent(Symbol::Xau)), 2000.0).is_none());
    }

    #[test]
    fn structure_dominates_when_confident() {
        let mut a = allocator();
        let out = a
            .allocate(
                Some(entry(Symbol::Xau, Side::Buy, 1.0, 0.7)),
                Some(entry(Symbol::Xau, Side::Buy, 2.0, 0.8)),
                2000.0,
            )
            .unwrap();
        assert_eq!(out.source_engine, EngineKind::Structure);
    }

    #[test]
    fn hft_wins_when_structure_is_weak() {
        let mut a = allocator();
        let out = a
            .allocate(
                Some(entry(Symbol::Xau, Side::Buy, 1.0, 0.9)),
                Some(entry(Symbol::Xau, Side::Buy, 2.0, 0.5)),
                2000.0,
            )
            .unwrap();
        assert_eq!(out.source_engine, EngineKind::Hft);
    }

    #[test]
    fn strong_opposing_structure_blocks_hft() {
        let mut a = allocator();
        // structure signal is confident but loses dominance to HFT's higher
        // confidence — it must still block the opposing entry
        let out = a.allocate(
            Some(entry(Symbol::Xau, Side::Buy, 1.0, 0.95)),
            Some(entry(Symbol::Xau, Side::Sell, 2.0, 0.7)),
            2000.0,
        );
        assert!(out.is_none());
    }

    #[test]
    fn structure_share_clamped_to_base_plus_boost() {
        let a = allocator();
        assert!((a.structure_capital_share(0.0) - 0.4).abs() < 1e-12);
        assert!((a.structure_capital_share(1.0) - 0.9).abs() < 1e-12);
        assert!((a.structure_capital_share(5.0) - 0.9).abs() < 1e-12);
    }

    #[test]
    fn hft_share_floor_is_point_two() {
        let a = allocator();
        assert!((a.hft_capital_share(0.0) - 0.8).abs() < 1e-12);
        assert!((a.hft_capital_share(2.0) - 0.2).abs() < 1e-12);
    }

    #[test]
    fn per_symbol_cap_limits_quantity() {
        let mut a = allocator();
        // cap 10_000 * share(conf 1.0 → 0.9) = 9_000 → 4.5 units at 2000
        let out = a
            .allocate(None, Some(entry(Symbol::Xau, Side::Buy, 100.0, 1.0)), 2000.0)
            .unwrap();
        assert!((out.quantity - 4.5).abs() < 1e-9);
    }

    #[test]
    fn one_position_per_symbol() {
        let mut a = allocator();
        a.on_position_opened(Symbol::Xau, Side::Buy, 1.0, 2000.0, EngineKind::Hft);
        assert!(a
            .allocate(Some(entry(Symbol::Xau, Side::Buy, 1.0, 0.9)), None, 2000.0)
            .is_none());
        // the other symbol is unaffected
        assert!(a
            .allocate(Some(entry(Symbol::Xag, Side::Buy, 1.0, 0.9)), None, 25.0)
            .is_some());
    }

    #[test]
    fn exposure_invariant_holds_through_lifecycle() {
        let mut a = allocator();
        a.on_position_opened(Symbol::Xau, Side::Buy, 2.0, 2000.0, EngineKind::Structure);
        assert!(a.audit());
        a.on_position_opened(Symbol::Xag, Side::Sell, 10.0, 25.0, EngineKind::Hft);
        assert!(a.audit());
        assert!(
            (a.engine_exposure(EngineKind::Hft) + a.engine_exposure(EngineKind::Structure)
                - a.global_exposure())
            .abs()
                < 1.0
        );

        a.on_position_closed(Symbol::Xau);
        assert!(a.audit());
        a.on_position_closed(Symbol::Xag);
        assert!(a.audit());
        assert_eq!(a.global_exposure(), 0.0);
    }

    #[test]
    fn audit_latches_corruption() {
        let mut a = allocator();
        a.on_position_opened(Symbol::Xau, Side::Buy, 1.0, 2000.0, EngineKind::Hft);
        a.corrupt_for_test();
        assert!(!a.audit());
        assert!(a.corruption_detected());
        // flag stays latched even if exposures later reconcile
        a.on_position_closed(Symbol::Xau);
        assert!(a.corruption_detected());
    }
}
