// =============================================================================
// Loss-cluster monitor — cooldown after a run of consecutive losses
// =============================================================================

use tracing::warn;

/// Consecutive losses that trip the cooldown.
const LOSS_THRESHOLD: u32 = 5;
const COOLDOWN_NS: u64 = 60_000_000_000;

pub struct LossClusterMonitor {
    consecutive_losses: u32,
    cooldown_active: bool,
    cooldown_start_ns: u64,
}

impl LossClusterMonitor {
    pub fn new() -> Self {
        Self {
            consecutive_losses: 0,
            cooldown_active: false,
            cooldown_start_ns: 0,
        }
    }

    /// Record a completed trade. A win resets the counter; the fifth straight
    /// loss latches a 60-second cooldown.
    pub fn record_trade(&mut self, win: bool, now_ns: u64) {
        if win {
            self.consecutive_losses = 0;
            return;
        }
        self.consecutive_losses += 1;
        if self.consecutive_losses >= LOSS_THRESHOLD && !self.cooldown_active {
            self.cooldown_active = true;
            self.cooldown_start_ns = now_ns;
            warn!(
                losses = self.consecutive_losses,
                "loss cluster detected — entering 60s cooldown"
            );
        }
    }

    pub fn is_cooldown_active(&self, now_ns: u64) -> bool {
        if !self.cooldown_active {
            return false;
        }
        now_ns.saturating_sub(self.cooldown_start_ns) < COOLDOWN_NS
    }

    pub fn consecutive_losses(&self) -> u32 {
        self.consecutive_losses
    }

    pub fn reset(&mut self) {
        self.cooldown_active = false;
        self.consecutive_losses = 0;
    }
}

impl Default for LossClusterMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEC: u64 = 1_000_000_000;

    #[test]
    fn five_losses_latch_cooldown() {
        let mut m = LossClusterMonitor::new();
        for _ in 0..4 {
            m.record_trade(false, 0);
        }
        assert!(!m.is_cooldown_active(0));
        m.record_trade(false, 0);
        assert!(m.is_cooldown_active(0));
        // still blocked at t = 30 s, clear at t = 61 s
        assert!(m.is_cooldown_active(30 * SEC));
        assert!(!m.is_cooldown_active(61 * SEC));
    }

    #[test]
    fn win_resets_counter() {
        let mut m = LossClusterMonitor::new();
        for _ in 0..4 {
            m.record_trade(false, 0);
        }
        m.record_trade(true, 0);
        assert_eq!(m.consecutive_losses(), 0);
        m.record_trade(false, 0);
        assert!(!m.is_cooldown_active(0));
    }

    #[test]
    fn manual_reset_clears_everything() {
        let mut m = LossClusterMonitor::new();
        for _ in 0..5 {
            m.record_trade(false, 0);
        }
        m.reset();
        assert!(!m.is_cooldown_active(0));
        assert_eq!(m.consecutive_losses(), 0);
    }
}
