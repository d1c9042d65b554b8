// =============================================================================
// Statistical monitor — rolling Sharpe over realized trade PnLs
// =============================================================================

use std::collections::VecDeque;

const WINDOW_SIZE: usize = 100;
const MIN_SAMPLES: usize = 20;
const MIN_STDDEV: f64 = 1e-3;
const SHARPE_COLLAPSE: f64 = -1.5;

pub struct StatisticalMonitor {
    pnl_history: VecDeque<f64>,
}

impl StatisticalMonitor {
    pub fn new() -> Self {
        Self {
            pnl_history: VecDeque::with_capacity(WINDOW_SIZE),
        }
    }

    pub fn record_pnl(&mut self, pnl: f64) {
        self.pnl_history.push_back(pnl);
        if self.pnl_history.len() > WINDOW_SIZE {
            self.pnl_history.pop_front();
        }
    }

    /// Rolling Sharpe = mean / stddev. Undefined (0.0) below 20 samples or
    /// when the distribution is degenerate.
    pub fn rolling_sharpe(&self) -> f64 {
        let n = self.pnl_history.len();
        if n < MIN_SAMPLES {
            return 0.0;
        }
        let mean: f64 = self.pnl_history.iter().sum::<f64>() / n as f64;
        let variance: f64 = self
            .pnl_history
            .iter()
            .map(|p| (p - mean) * (p - mean))
            .sum::<f64>()
            / n as f64;
        let stddev = variance.sqrt();
        if stddev < MIN_STDDEV {
            return 0.0;
        }
        mean / stddev
    }

    /// Peak-to-trough drawdown of the cumulative PnL path in the window.
    pub fn max_drawdown(&self) -> f64 {
        let mut cumulative = 0.0;
        let mut peak = 0.0f64;
        let mut max_dd = 0.0f64;
        for &pnl in &self.pnl_history {
            cumulative += pnl;
            peak = peak.max(cumulative);
            max_dd = max_dd.max(peak - cumulative);
        }
        max_dd
    }

    pub fn is_degraded(&self) -> bool {
        self.rolling_sharpe() < SHARPE_COLLAPSE
    }

    /// Allocator sizing recommendation: halve when the Sharpe collapses.
    pub fn recommended_size_multiplier(&self) -> f64 {
        if self.is_degraded() {
            0.5
        } else {
            1.0
        }
    }
}

impl Default for StatisticalMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sharpe_undefined_below_twenty_samples() {
        let mut m = StatisticalMonitor::new();
        for _ in 0..19 {
            m.record_pnl(-100.0);
        }
        assert_eq!(m.rolling_sharpe(), 0.0);
        assert!(!m.is_degraded());
    }

    #[test]
    fn sharpe_undefined_for_degenerate_distribution() {
        let mut m = StatisticalMonitor::new();
        for _ in 0..50 {
            m.record_pnl(5.0); // zero variance
        }
        assert_eq!(m.rolling_sharpe(), 0.0);
    }

    #[test]
    fn collapse_recommends_half_size() {
        let mut m = StatisticalMonitor::new();
        // heavy losses with slight variance: strongly negative Sharpe
        for i in 0..40 {
            m.record_pnl(-10.0 - (i % 3) as f64);
        }
        assert!(m.rolling_sharpe() < SHARPE_COLLAPSE);
        assert!(m.is_degraded());
        assert_eq!(m.recommended_size_multiplier(), 0.5);
    }

    #[test]
    fn healthy_pnl_keeps_full_size() {
        let mut m = StatisticalMonitor::new();
        for i in 0..40 {
            m.record_pnl(if i % 3 == 0 { -2.0 } else { 5.0 });
        }
        assert!(m.rolling_sharpe() > 0.0);
        assert_eq!(m.recommended_size_multiplier(), 1.0);
    }

    #[test]
    fn window_is_bounded() {
        let mut m = StatisticalMonitor::new();
        for _ in 0..(WINDOW_SIZE + 40) {
            m.record_pnl(1.0);
        }
        assert_eq!(m.pnl_history.len(), WINDOW_SIZE);
    }

    #[test]
    fn max_drawdown_tracks_cumulative_path() {
        let mut m = StatisticalMonitor::new();
        for &p in &[10.0, 10.0, -5.0, -8.0, 4.0] {
            m.record_pnl(p);
        }
        assert!((m.max_drawdown() - 13.0).abs() < 1e-9);
    }
}
