// =============================================================================
// Risk governor — hard stops and adaptive size scaling
// =============================================================================
//
// Hard stops (any one blocks new entries; exits always pass):
//   - daily drawdown at or beyond the limit
//   - consecutive-loss ceiling
//   - volatility kill switch
//   - a prior hard-kill still inside its cooldown
//   - loss-cluster cooldown (delegated to LossClusterMonitor)
//   - the metals market calendar gate
//
// Entries that pass are rescaled:
//   scale = clamp(drawdown_scale * volatility_scale * loss_scale,
//                 floor, ceiling)
// and dropped if the scaled quantity reaches zero.
// =============================================================================

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::allocator::AllocatedIntent;
use crate::market::metals_market_open;

use super::loss_cluster::LossClusterMonitor;
use super::statistical::StatisticalMonitor;

#[derive(Debug, Clone)]
pub struct RiskGovernorConfig {
    /// Daily loss, in dollars, that halts new entries.
    pub daily_drawdown_limit: f64,
    pub max_consecutive_losses: u32,
    pub volatility_kill_threshold: f64,
    pub min_risk_scale_floor: f64,
    pub max_risk_scale_ceiling: f64,
    /// Hard-kill latch duration.
    pub halt_cooldown_ns: u64,
}

impl Default for RiskGovernorConfig {
    fn default() -> Self {
        Self {
            daily_drawdown_limit: 500.0,
            max_consecutive_losses: 4,
            volatility_kill_threshold: 2.0,
            min_risk_scale_floor: 0.2,
            max_risk_scale_ceiling: 1.0,
            halt_cooldown_ns: 60_000_000_000,
        }
    }
}

/// Authoritative inputs for the governor's decisions.
#[derive(Debug, Clone, Copy, Default)]
pub struct RiskMetrics {
    pub equity: f64,
    pub daily_pnl: f64,
    pub unrealized_pnl: f64,
    pub consecutive_losses: u32,
    /// Normalised 0–3+; see the regime classifier.
    pub volatility_score: f64,
    pub session_start_ns: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskVerdict {
    Passed,
    Halted,
    VolatilityLocked,
    LossCluster,
    MarketClosed,
    ScaledToZero,
}

pub struct RiskGovernor {
    config: RiskGovernorConfig,
    metrics: RiskMetrics,
    trading_halted: bool,
    halt_ts_ns: u64,
    volatility_locked: bool,
    loss_cluster: LossClusterMonitor,
    statistical: StatisticalMonitor,
}

impl RiskGovernor {
    pub fn new(config: RiskGovernorConfig) -> Self {
        Self {
            config,
            metrics: RiskMetrics::default(),
            trading_halted: false,
            halt_ts_ns: 0,
            volatility_locked: false,
            loss_cluster: LossClusterMonitor::new(),
            statistical: StatisticalMonitor::new(),
        }
    }

    pub fn update_metrics(&mut self, metrics: RiskMetrics) {
        self.metrics = metrics;
        self.volatility_locked =
            self.metrics.volatility_score > self.config.volatility_kill_threshold;
    }

    /// Feed a realized trade result into every loss-tracking component.
    pub fn record_trade_result(&mut self, pnl: f64, now_ns: u64) {
        self.loss_cluster.record_trade(pnl >= 0.0, now_ns);
        self.statistical.record_pnl(pnl);
    }

    /// Gate one allocated intent. Exits always pass untouched.
    pub fn filter(
        &mut self,
        intent: AllocatedIntent,
        now_ns: u64,
        now_utc: DateTime<Utc>,
    ) -> (Option<AllocatedIntent>, RiskVerdict) {
        if intent.is_exit {
            return (Some(intent), RiskVerdict::Passed);
        }

        // hard-kill latch with cooldown self-clear
        if self.trading_halted {
            if now_ns.saturating_sub(self.halt_ts_ns) < self.config.halt_cooldown_ns {
                return (None, RiskVerdict::Halted);
            }
            info!("risk halt cooldown elapsed — entries re-enabled");
            self.trading_halted = false;
        }

        if !metals_market_open(now_utc) {
            return (None, RiskVerdict::MarketClosed);
        }

        if self.volatility_locked {
            return (None, RiskVerdict::VolatilityLocked);
        }

        if self.metrics.daily_pnl <= -self.config.daily_drawdown_limit {
            warn!(
                daily_pnl = self.metrics.daily_pnl,
                limit = self.config.daily_drawdown_limit,
                "daily drawdown limit breached — halting entries"
            );
            self.trading_halted = true;
            self.halt_ts_ns = now_ns;
            return (None, RiskVerdict::Halted);
        }

        if self.metrics.consecutive_losses >= self.config.max_consecutive_losses {
            return (None, RiskVerdict::Halted);
        }

        if self.loss_cluster.is_cooldown_active(now_ns) {
            return (None, RiskVerdict::LossCluster);
        }

        let scale = self.risk_scale_factor() * self.statistical.recommended_size_multiplier();
        let mut adjusted = intent;
        adjusted.quantity *= scale;
        if adjusted.quantity <= 0.0 {
            return (None, RiskVerdict::ScaledToZero);
        }
        (Some(adjusted), RiskVerdict::Passed)
    }

    /// drawdown_scale · volatility_scale · loss_scale, clamped.
    pub fn risk_scale_factor(&self) -> f64 {
        let drawdown_scale = if self.config.daily_drawdown_limit > 0.0 {
            1.0 - (self.metrics.daily_pnl.abs() / self.config.daily_drawdown_limit).clamp(0.0, 1.0)
        } else {
            1.0
        };

        let volatility_scale = 1.0 / self.metrics.volatility_score.max(1.0);

        let loss_scale = 1.0 - (self.metrics.consecutive_losses as f64 * 0.15).min(0.6);

        (drawdown_scale * volatility_scale * loss_scale)
            .clamp(self.config.min_risk_scale_floor, self.config.max_risk_scale_ceiling)
    }

    pub fn is_trading_halted(&self) -> bool {
        self.trading_halted
    }

    pub fn is_volatility_locked(&self) -> bool {
        self.volatility_locked
    }

    pub fn loss_cluster(&self) -> &LossClusterMonitor {
        &self.loss_cluster
    }

    pub fn statistical(&self) -> &StatisticalMonitor {
        &self.statistical
    }

    pub fn metrics(&self) -> &RiskMetrics {
        &self.metrics
    }

    /// New UTC trading day: clear the halt latches. Loss history carries over
    /// deliberately.
    pub fn reset_daily(&mut self) {
        self.trading_halted = false;
        self.volatility_locked = false;
    }
}
