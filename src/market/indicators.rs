// =============================================================================
// Streaming indicators — EMA pair, trend score, OFI persistence
// =============================================================================

use std::collections::VecDeque;

use crate::types::Side;

/// OFI samples considered for persistence.
const OFI_WINDOW: usize = 120;

// ---------------------------------------------------------------------------
// EMA pair
// ---------------------------------------------------------------------------

/// Fast (span 8) and slow (span 21) EMAs over the mid stream, updated per
/// tick. Seeded with the first observation rather than an SMA warm-up —
/// at tick frequency the seed bias decays within a second.
pub struct EmaPair {
    fast: f64,
    slow: f64,
    alpha_fast: f64,
    alpha_slow: f64,
    samples: u64,
}

impl EmaPair {
    pub fn new() -> Self {
        Self::with_spans(8.0, 21.0)
    }

    pub fn with_spans(fast_span: f64, slow_span: f64) -> Self {
        Self {
            fast: 0.0,
            slow: 0.0,
            alpha_fast: 2.0 / (fast_span + 1.0),
            alpha_slow: 2.0 / (slow_span + 1.0),
            samples: 0,
        }
    }

    pub fn update(&mut self, price: f64) {
        if !price.is_finite() {
            return;
        }
        if self.samples == 0 {
            self.fast = price;
            self.slow = price;
        } else {
            self.fast = self.alpha_fast * price + (1.0 - self.alpha_fast) * self.fast;
            self.slow = self.alpha_slow * price + (1.0 - self.alpha_slow) * self.slow;
        }
        self.samples += 1;
    }

    pub fn is_warm(&self) -> bool {
        self.samples >= 10
    }

    pub fn fast(&self) -> f64 {
        self.fast
    }

    pub fn slow(&self) -> f64 {
        self.slow
    }

    /// Normalised slope magnitude in [0, 1].
    pub fn trend_score(&self) -> f64 {
        if !self.is_warm() || self.slow == 0.0 {
            return 0.0;
        }
        ((self.fast - self.slow).abs() * 1000.0).min(1.0)
    }

    /// `None` when the EMAs are flat on each other.
    pub fn trend_direction(&self) -> Option<Side> {
        if !self.is_warm() {
            return None;
        }
        if self.fast > self.slow {
            Some(Side::Buy)
        } else if self.fast < self.slow {
            Some(Side::Sell)
        } else {
            None
        }
    }
}

impl Default for EmaPair {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// OFI persistence
// ---------------------------------------------------------------------------

/// Sliding window of signed order-flow-imbalance samples. Persistence is the
/// share of samples whose sign agrees with the given trend direction.
pub struct OfiWindow {
    samples: VecDeque<f64>,
}

impl OfiWindow {
    pub fn new() -> Self {
        Self {
            samples: VecDeque::with_capacity(OFI_WINDOW),
        }
    }

    pub fn push(&mut self, ofi: f64) {
        self.samples.push_back(ofi);
        if self.samples.len() > OFI_WINDOW {
            self.samples.pop_front();
        }
    }

    pub fn persistence(&self, direction: Side) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let aligned = self
            .samples
            .iter()
            .filter(|&&v| match direction {
                Side::Buy => v > 0.0,
                Side::Sell => v < 0.0,
            })
            .count();
        aligned as f64 / self.samples.len() as f64
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

impl Default for OfiWindow {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ema_pair_seeds_and_converges() {
        let mut e = EmaPair::new();
        for _ in 0..50 {
            e.update(100.0);
        }
        assert!((e.fast() - 100.0).abs() < 1e-9);
        assert!((e.slow() - 100.0).abs() < 1e-9);
        assert_eq!(e.trend_direction(), None);
        assert_eq!(e.trend_score(), 0.0);
    }

    #[test]
    fn rising_prices_give_bullish_direction() {
        let mut e = EmaPair::new();
        for i in 0..100 {
            e.update(100.0 + i as f64 * 0.1);
        }
        assert_eq!(e.trend_direction(), Some(Side::Buy));
        assert!(e.trend_score() > 0.0);
    }

    #[test]
    fn falling_prices_give_bearish_direction() {
        let mut e = EmaPair::new();
        for i in 0..100 {
            e.update(100.0 - i as f64 * 0.1);
        }
        assert_eq!(e.trend_direction(), Some(Side::Sell));
    }

    #[test]
    fn trend_score_clamped_to_one() {
        let mut e = EmaPair::new();
        for i in 0..100 {
            e.update(1000.0 + i as f64 * 10.0);
        }
        assert_eq!(e.trend_score(), 1.0);
    }

    #[test]
    fn cold_ema_reports_nothing() {
        let mut e = EmaPair::new();
        e.update(100.0);
        assert!(!e.is_warm());
        assert_eq!(e.trend_direction(), None);
    }

    #[test]
    fn nan_input_is_ignored() {
        let mut e = EmaPair::new();
        for _ in 0..20 {
            e.update(100.0);
        }
        e.update(f64::NAN);
        assert!((e.fast() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn ofi_persistence_counts_aligned_share() {
        let mut w = OfiWindow::new();
        for _ in 0..6 {
            w.push(0.5);
        }
        for _ in 0..4 {
            w.push(-0.5);
        }
        assert!((w.persistence(Side::Buy) - 0.6).abs() < 1e-9);
        assert!((w.persistence(Side::Sell) - 0.4).abs() < 1e-9);
    }

    #[test]
    fn ofi_window_bounded() {
        let mut w = OfiWindow::new();
        for _ in 0..(OFI_WINDOW + 50) {
            w.push(1.0);
        }
        assert_eq!(w.len(), OFI_WINDOW);
    }

    #[test]
    fn empty_ofi_window_scores_zero() {
        let w = OfiWindow::new();
        assert_eq!(w.persistence(Side::Buy), 0.0);
    }
}
