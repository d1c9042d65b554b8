// =============================================================================
// Adaptive parameters — bounded, independently-readable tuning cells
// =============================================================================
//
// Each parameter is a lock-free atomic cell with a hard floor and ceiling the
// optimizer cannot breach, whatever its update history. Hot paths read single
// parameters; cross-field atomicity is deliberately not provided (the
// optimizer writes at 30-second intervals).
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, info};

use crate::types::EngineKind;

/// f64 stored as bits in an AtomicU64.
struct AtomicF64 {
    bits: AtomicU64,
}

impl AtomicF64 {
    fn new(value: f64) -> Self {
        Self {
            bits: AtomicU64::new(value.to_bits()),
        }
    }

    fn load(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Acquire))
    }

    fn store(&self, value: f64) {
        self.bits.store(value.to_bits(), Ordering::Release);
    }
}

// Hard bounds. These are safety rails, not tuning knobs.
pub const MIN_HFT_THRESHOLD: f64 = 0.3;
pub const MAX_HFT_THRESHOLD: f64 = 0.9;
pub const MIN_STRUCT_THRESHOLD: f64 = 0.4;
pub const MAX_STRUCT_THRESHOLD: f64 = 0.95;
pub const MIN_SPREAD_LIMIT: f64 = 0.2;
pub const MAX_SPREAD_LIMIT: f64 = 1.2;
pub const MIN_VOL_LIMIT: f64 = 2.0;
pub const MAX_VOL_LIMIT: f64 = 15.0;

pub struct AdaptiveParams {
    hft_signal_threshold: AtomicF64,
    structure_conf_threshold: AtomicF64,
    spread_limit: AtomicF64,
    vol_limit: AtomicF64,
    capital_bias: AtomicF64,
}

impl AdaptiveParams {
    pub fn new() -> Self {
        Self {
            hft_signal_threshold: AtomicF64::new(0.6),
            structure_conf_threshold: AtomicF64::new(0.7),
            spread_limit: AtomicF64::new(0.5),
            vol_limit: AtomicF64::new(5.0),
            capital_bias: AtomicF64::new(1.0),
        }
    }

    pub fn hft_signal_threshold(&self) -> f64 {
        self.hft_signal_threshold.load()
    }

    pub fn structure_conf_threshold(&self) -> f64 {
        self.structure_conf_threshold.load()
    }

    pub fn spread_limit(&self) -> f64 {
        self.spread_limit.load()
    }

    pub fn vol_limit(&self) -> f64 {
        self.vol_limit.load()
    }

    /// HFT-vs-structure capital tilt: 1.2 favours HFT, 0.8 structure.
    pub fn capital_bias(&self) -> f64 {
        self.capital_bias.load()
    }

    pub fn threshold_for(&self, engine: EngineKind) -> f64 {
        match engine {
            EngineKind::Hft => self.hft_signal_threshold(),
            EngineKind::Structure => self.structure_conf_threshold(),
        }
    }

    // Setters clamp unconditionally.

    pub fn set_hft_signal_threshold(&self, value: f64) {
        self.hft_signal_threshold
            .store(value.clamp(MIN_HFT_THRESHOLD, MAX_HFT_THRESHOLD));
    }

    pub fn set_structure_conf_threshold(&self, value: f64) {
        self.structure_conf_threshold
            .store(value.clamp(MIN_STRUCT_THRESHOLD, MAX_STRUCT_THRESHOLD));
    }

    pub fn set_spread_limit(&self, value: f64) {
        self.spread_limit
            .store(value.clamp(MIN_SPREAD_LIMIT, MAX_SPREAD_LIMIT));
    }

    pub fn set_vol_limit(&self, value: f64) {
        self.vol_limit.store(value.clamp(MIN_VOL_LIMIT, MAX_VOL_LIMIT));
    }

    pub fn set_capital_bias(&self, value: f64) {
        self.capital_bias.store(value.clamp(0.8, 1.2));
    }
}

impl Default for AdaptiveParams {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Optimizer pass
// ---------------------------------------------------------------------------

/// Inputs for one optimization pass: per-engine composite scores and the
/// execution quality EMA.
#[derive(Debug, Clone, Copy)]
pub struct OptimizerInputs {
    pub hft_sharpe: f64,
    pub structure_sharpe: f64,
    pub execution_quality: f64,
}

/// One 30-second optimization step. Pure parameter arithmetic, so the
/// periodic task stays a thin loop and the rules are testable with a clock
/// in hand.
pub fn optimize_step(params: &AdaptiveParams, inputs: OptimizerInputs) {
    let OptimizerInputs {
        hft_sharpe,
        structure_sharpe,
        execution_quality,
    } = inputs;

    // Engine threshold tuning: reward good Sharpe with a lower bar.
    if hft_sharpe > 0.7 {
        params.set_hft_signal_threshold(params.hft_signal_threshold() - 0.05);
    } else if hft_sharpe < 0.4 {
        params.set_hft_signal_threshold(params.hft_signal_threshold() + 0.05);
    }

    if structure_sharpe > 0.7 {
        params.set_structure_conf_threshold(params.structure_conf_threshold() - 0.05);
    } else if structure_sharpe < 0.4 {
        params.set_structure_conf_threshold(params.structure_conf_threshold() + 0.05);
    }

    // Both engines cold: tighten the market filters multiplicatively.
    if hft_sharpe < 0.3 && structure_sharpe < 0.3 {
        params.set_spread_limit(params.spread_limit() * 0.95);
        params.set_vol_limit(params.vol_limit() * 0.9);
    }

    // Capital bias toward the clearly stronger engine.
    if hft_sharpe > structure_sharpe + 0.2 {
        params.set_capital_bias(1.2);
    } else if structure_sharpe > hft_sharpe + 0.2 {
        params.set_capital_bias(0.8);
    } else {
        params.set_capital_bias(1.0);
    }

    // Execution-quality throttle: poor fills tighten both entries.
    if execution_quality < 0.6 {
        params.set_hft_signal_threshold(params.hft_signal_threshold() + 0.05);
        params.set_structure_conf_threshold(params.structure_conf_threshold() + 0.05);
        info!(execution_quality, "execution quality low — tightening entry thresholds");
    }

    debug!(
        hft_threshold = params.hft_signal_threshold(),
        structure_threshold = params.structure_conf_threshold(),
        spread_limit = params.spread_limit(),
        vol_limit = params.vol_limit(),
        capital_bias = params.capital_bias(),
        "optimizer pass complete"
    );
}
