// =============================================================================
// Capital anomaly guard — hard floor against allocator runaway
// =============================================================================

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::error;

/// Exposure beyond this fraction of the configured cap is an anomaly.
const HARD_LIMIT_FACTOR: f64 = 1.05;

pub struct CapitalAnomalyGuard {
    absolute_hard_limit: f64,
    emergency_active: AtomicBool,
}

impl CapitalAnomalyGuard {
    pub fn new(global_cap: f64) -> Self {
        Self {
            absolute_hard_limit: global_cap * HARD_LIMIT_FACTOR,
            emergency_active: AtomicBool::new(false),
        }
    }

    /// Check observed exposure against the hard limit. The shutdown hook
    /// fires exactly once; the anomaly bit latches for the process lifetime.
    pub fn check_and_enforce(&self, current_exposure: f64, emergency_shutdown: impl FnOnce()) {
        if current_exposure <= self.absolute_hard_limit {
            return;
        }
        if self
            .emergency_active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            error!(
                exposure = current_exposure,
                hard_limit = self.absolute_hard_limit,
                "CAPITAL ANOMALY DETECTED — emergency shutdown triggered"
            );
            emergency_shutdown();
        }
    }

    pub fn is_emergency_active(&self) -> bool {
        self.emergency_active.load(Ordering::SeqCst)
    }
}
