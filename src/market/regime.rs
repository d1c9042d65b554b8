// =============================================================================
// Regime classifier — compression / breakout / trend / mean-revert
// =============================================================================
//
// Classification order matters: compression and breakout are structural and
// take precedence over simple trend alignment.
// =============================================================================

use serde::Serialize;

use super::candles::TimeframeAggregator;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RegimeKind {
    TrendUp,
    TrendDown,
    Compression,
    Breakout,
    MeanRevert,
}

impl std::fmt::Display for RegimeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RegimeKind::TrendUp => "TREND_UP",
            RegimeKind::TrendDown => "TREND_DOWN",
            RegimeKind::Compression => "COMPRESSION",
            RegimeKind::Breakout => "BREAKOUT",
            RegimeKind::MeanRevert => "MEAN_REVERT",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct Regime {
    pub kind: RegimeKind,
    /// Classifier confidence in [0, 1].
    pub confidence: f64,
}

impl Default for Regime {
    fn default() -> Self {
        Self {
            kind: RegimeKind::Compression,
            confidence: 0.0,
        }
    }
}

/// Classifies the current regime from the 1-minute and 5-minute candle
/// streams of one symbol.
pub struct RegimeClassifier {
    one_min: TimeframeAggregator,
    five_min: TimeframeAggregator,
}

impl RegimeClassifier {
    pub fn new() -> Self {
        Self {
            one_min: TimeframeAggregator::one_minute(),
            five_min: TimeframeAggregator::five_minute(),
        }
    }

    pub fn update(&mut self, mid: f64, ts_ns: u64) {
        self.one_min.update(mid, ts_ns);
        self.five_min.update(mid, ts_ns);
    }

    /// 1-minute ATR relative to the 5-minute ATR, the volatility input for
    /// the risk governor (≈1 is normal, >2 is a burst).
    pub fn volatility_score(&self) -> f64 {
        match (self.one_min.atr(14), self.five_min.atr(14)) {
            (Some(a1), Some(a5)) if a5 > 0.0 => (a1 / a5) * 5.0,
            _ => 0.0,
        }
    }

    pub fn classify(&self) -> Regime {
        let (Some(c1), Some(c5)) = (self.one_min.latest(), self.five_min.latest()) else {
            return Regime::default();
        };
        if !self.one_min.is_ready() || !self.five_min.is_ready() {
            return Regime::default();
        }

        let atr1 = self.one_min.atr(14).unwrap_or(0.0);
        let atr5 = self.five_min.atr(14).unwrap_or(0.0);

        if atr5 > 0.0 && atr1 < atr5 * 0.3 {
            return Regime { kind: RegimeKind::Compression, confidence: 0.7 };
        }

        if let Some(high5) = self.five_min.highest_high(14) {
            if c1.close > high5 {
                return Regime { kind: RegimeKind::Breakout, confidence: 0.9 };
            }
        }

        if c1.close > c1.open && c1.close > c5.close {
            return Regime { kind: RegimeKind::TrendUp, confidence: 0.6 };
        }
        if c1.close < c1.open && c1.close < c5.close {
            return Regime { kind: RegimeKind::TrendDown, confidence: 0.6 };
        }

        Regime { kind: RegimeKind::MeanRevert, confidence: 0.5 }
    }
}

impl Default for RegimeClassifier {
    fn default() -> Self {
        Self::new()
    }
}
