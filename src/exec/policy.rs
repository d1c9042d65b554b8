// =============================================================================
// Execution policy governor — POST_ONLY / TAKE_ONLY / DISABLED
// =============================================================================
//
// Inputs arrive from latency attribution (RTT, queue wait), the order
// tracker (reject rate), market state (spread, volatility) and the session
// layer (exchange instability). Every input re-evaluates the mode:
//
//   unstable OR (latency_bad AND rejects_bad)  -> DISABLED (hard kill)
//   latency_bad OR market_bad                  -> TAKE_ONLY, downscaled
//   otherwise                                  -> POST_ONLY, upscaled
//
// The hard kill self-clears after its cooldown.
// =============================================================================

use std::collections::VecDeque;

use serde::Serialize;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExecMode {
    Disabled,
    PostOnly,
    TakeOnly,
}

impl std::fmt::Display for ExecMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExecMode::Disabled => "DISABLED",
            ExecMode::PostOnly => "POST_ONLY",
            ExecMode::TakeOnly => "TAKE_ONLY",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct ExecPolicyConfig {
    pub max_rtt_ns: u64,
    pub max_queue_wait_ns: u64,
    pub max_reject_rate: f64,
    pub max_spread_bps: f64,
    pub vol_burst_threshold: f64,
    pub size_downscale: f64,
    pub size_upscale: f64,
    pub hard_kill_cooldown_ns: u64,
}

impl Default for ExecPolicyConfig {
    fn default() -> Self {
        Self {
            max_rtt_ns: 5_000_000,
            max_queue_wait_ns: 10_000_000,
            max_reject_rate: 0.15,
            max_spread_bps: 6.0,
            vol_burst_threshold: 3.0,
            size_downscale: 0.5,
            size_upscale: 1.0,
            hard_kill_cooldown_ns: 60_000_000_000,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ExecPolicyState {
    pub mode: ExecMode,
    pub trading_enabled: bool,
    pub hard_kill: bool,
    pub size_multiplier: f64,
    pub last_update_ns: u64,
}

impl Default for ExecPolicyState {
    fn default() -> Self {
        Self {
            mode: ExecMode::PostOnly,
            trading_enabled: true,
            hard_kill: false,
            size_multiplier: 1.0,
            last_update_ns: 0,
        }
    }
}

pub struct ExecPolicyGovernor {
    config: ExecPolicyConfig,
    state: ExecPolicyState,
    last_hard_kill_ns: u64,

    rtt_ns: u64,
    queue_ns: u64,
    reject_rate: f64,
    spread_bps: f64,
    volatility: f64,
    exchange_unstable: bool,
}

impl ExecPolicyGovernor {
    pub fn new(config: ExecPolicyConfig) -> Self {
        Self {
            config,
            state: ExecPolicyState::default(),
            last_hard_kill_ns: 0,
            rtt_ns: 0,
            queue_ns: 0,
            reject_rate: 0.0,
            spread_bps: 0.0,
            volatility: 0.0,
            exchange_unstable: false,
        }
    }

    pub fn on_latency(&mut self, now_ns: u64, rtt_ns: u64, queue_wait_ns: u64) {
        self.rtt_ns = rtt_ns;
        self.queue_ns = queue_wait_ns;
        self.evaluate(now_ns);
    }

    pub fn on_reject_rate(&mut self, now_ns: u64, reject_rate: f64) {
        self.reject_rate = reject_rate;
        self.evaluate(now_ns);
    }

    pub fn on_market_state(&mut self, now_ns: u64, spread_bps: f64, volatility_score: f64) {
        self.spread_bps = spread_bps;
        self.volatility = volatility_score;
        self.evaluate(now_ns);
    }

    pub fn on_exchange_instability(&mut self, now_ns: u64, unstable: bool) {
        self.exchange_unstable = unstable;
        self.evaluate(now_ns);
    }

    fn evaluate(&mut self, now_ns: u64) {
        if self.state.hard_kill {
            if now_ns.saturating_sub(self.last_hard_kill_ns) > self.config.hard_kill_cooldown_ns {
                self.state.hard_kill = false;
                self.state.trading_enabled = true;
            } else {
                return; // frozen until the cooldown elapses
            }
        }

        let latency_bad =
            self.rtt_ns > self.config.max_rtt_ns || self.queue_ns > self.config.max_queue_wait_ns;
        let market_bad = self.spread_bps > self.config.max_spread_bps
            || self.volatility > self.config.vol_burst_threshold;
        let rejects_bad = self.reject_rate > self.config.max_reject_rate;

        if self.exchange_unstable || (latency_bad && rejects_bad) {
            warn!(
                unstable = self.exchange_unstable,
                latency_bad, rejects_bad, "execution hard kill"
            );
            self.state.hard_kill = true;
            self.state.trading_enabled = false;
            self.state.mode = ExecMode::Disabled;
            self.state.size_multiplier = 0.0;
            self.last_hard_kill_ns = now_ns;
        } else if latency_bad || market_bad {
            self.state.trading_enabled = true;
            self.state.mode = ExecMode::TakeOnly;
            self.state.size_multiplier = self.config.size_downscale;
        } else {
            self.state.trading_enabled = true;
            self.state.mode = ExecMode::PostOnly;
            self.state.size_multiplier = self.config.size_upscale;
        }

        self.state.last_update_ns = now_ns;
    }

    pub fn state(&self) -> ExecPolicyState {
        self.state
    }
}

// ---------------------------------------------------------------------------
// Reject-rate window
// ---------------------------------------------------------------------------

/// Rolling window of order outcomes feeding the governor's reject-rate input.
pub struct RejectRateTracker {
    outcomes: VecDeque<bool>, // true = rejected
    capacity: usize,
}

impl RejectRateTracker {
    pub fn new(capacity: usize) -> Self {
        Self {
            outcomes: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn record(&mut self, rejected: bool) {
        self.outcomes.push_back(rejected);
        if self.outcomes.len() > self.capacity {
            self.outcomes.pop_front();
        }
    }

    pub fn rate(&self) -> f64 {
        if self.outcomes.is_empty() {
            return 0.0;
        }
        let rejected = self.outcomes.iter().filter(|&&r| r).count();
        rejected as f64 / self.outcomes.len() as f64
    }
}

impl Default for RejectRateTracker {
    fn default() -> Self {
        Self::new(50)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEC: u64 = 1_000_000_000;

    fn governor() -> ExecPolicyGovernor {
        ExecPolicyGovernor::new(ExecPolicyConfig::default())
    }

    #[test]
    fn clean_inputs_give_post_only_upscale() {
        let mut g = governor();
        g.on_latency(1, 1_000_000, 2_000_000);
        let s = g.state();
        assert_eq!(s.mode, ExecMode::PostOnly);
        assert_eq!(s.size_multiplier, 1.0);
        assert!(s.trading_enabled);
    }

    #[test]
    fn bad_latency_downgrades_to_take_only() {
        let mut g = governor();
        g.on_latency(1, 10_000_000, 2_000_000);
        let s = g.state();
        assert_eq!(s.mode, ExecMode::TakeOnly);
        assert_eq!(s.size_multiplier, 0.5);
    }

    #[test]
    fn wide_spread_downgrades_to_take_only() {
        let mut g = governor();
        g.on_market_state(1, 8.0, 1.0);
        assert_eq!(g.state().mode, ExecMode::TakeOnly);
    }

    #[test]
    fn vol_burst_downgrades_to_take_only() {
        let mut g = governor();
        g.on_market_state(1, 2.0, 4.0);
        assert_eq!(g.state().mode, ExecMode::TakeOnly);
    }

    #[test]
    fn latency_plus_rejects_is_a_hard_kill() {
        let mut g = governor();
        g.on_latency(1, 10_000_000, 2_000_000);
        g.on_reject_rate(2, 0.5);
        let s = g.state();
        assert_eq!(s.mode, ExecMode::Disabled);
        assert!(s.hard_kill);
        assert!(!s.trading_enabled);
        assert_eq!(s.size_multiplier, 0.0);
    }

    #[test]
    fn hard_kill_cooldown_scenario() {
        // unstable at t=0, cleared at t=5s with a 60s cooldown:
        // DISABLED through t=60s, POST_ONLY at t>=60s on clean inputs.
        let mut g = governor();
        g.on_exchange_instability(0, true);
        assert_eq!(g.state().mode, ExecMode::Disabled);

        g.on_exchange_instability(5 * SEC, false);
        assert_eq!(g.state().mode, ExecMode::Disabled, "still inside cooldown");

        g.on_latency(30 * SEC, 1_000_000, 1_000_000);
        assert_eq!(g.state().mode, ExecMode::Disabled, "still inside cooldown");

        g.on_latency(61 * SEC, 1_000_000, 1_000_000);
        let s = g.state();
        assert_eq!(s.mode, ExecMode::PostOnly);
        assert!(!s.hard_kill);
        assert!(s.trading_enabled);
    }

    #[test]
    fn reject_rate_window_rolls() {
        let mut t = RejectRateTracker::new(4);
        for r in [true, true, false, false] {
            t.record(r);
        }
        assert!((t.rate() - 0.5).abs() < 1e-12);
        // two more accepts push the old rejects out
        t.record(false);
        t.record(false);
        assert!((t.rate() - 0.25).abs() < 1e-12);
    }

    #[test]
    fn empty_reject_window_rates_zero() {
        assert_eq!(RejectRateTracker::default().rate(), 0.0);
    }
}
