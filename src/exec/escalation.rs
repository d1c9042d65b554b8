// =============================================================================
// Taker escalation engine — per-causal-id passive-to-aggressive decisions
// =============================================================================
//
// A resting POST_ONLY order that is not filling has three futures: keep
// waiting, cross the spread, or walk away. The decision is made at most once
// per causal id, in this order:
//
//   confidence below floor                      -> ABORT_TRADE
//   inside the confirmation window              -> STAY_POST_ONLY
//   queue slow, link fast, volatility present   -> ESCALATE_TO_TAKER
//   total wait exhausted                        -> ABORT_TRADE
//   otherwise                                   -> STAY_POST_ONLY
// =============================================================================

use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscalationAction {
    StayPostOnly,
    EscalateToTaker,
    AbortTrade,
}

#[derive(Debug, Clone, Copy)]
pub struct EscalationDecision {
    pub causal_id: u64,
    pub action: EscalationAction,
    pub decision_ts_ns: u64,
    pub confidence: f64,
}

#[derive(Debug, Clone)]
pub struct EscalationConfig {
    /// Minimum age of the signal before escalation is considered.
    pub min_confirm_ns: u64,
    pub max_queue_wait_ns: u64,
    /// Give up entirely past this signal age.
    pub max_total_wait_ns: u64,
    pub min_signal_confidence: f64,
    pub min_volatility: f64,
    pub max_rtt_ns: u64,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            min_confirm_ns: 2_000_000,
            max_queue_wait_ns: 6_000_000,
            max_total_wait_ns: 12_000_000,
            min_signal_confidence: 0.65,
            min_volatility: 1.1,
            max_rtt_ns: 5_000_000,
        }
    }
}

struct Track {
    signal_ts_ns: u64,
    confidence: f64,
    decided: bool,
}

pub struct TakerEscalationEngine {
    config: EscalationConfig,
    tracks: HashMap<u64, Track>,
}

impl TakerEscalationEngine {
    pub fn new(config: EscalationConfig) -> Self {
        Self {
            config,
            tracks: HashMap::new(),
        }
    }

    pub fn on_signal(&mut self, causal_id: u64, signal_ts_ns: u64, confidence: f64) {
        self.tracks.insert(
            causal_id,
            Track {
                signal_ts_ns,
                confidence,
                decided: false,
            },
        );
    }

    /// Evaluate one execution-state update. `None` for unknown or
    /// already-decided causal ids — each id is decided exactly once.
    pub fn on_execution_state(
        &mut self,
        causal_id: u64,
        now_ns: u64,
        queue_wait_ns: u64,
        rtt_ns: u64,
        volatility: f64,
    ) -> Option<EscalationDecision> {
        let track = self.tracks.get_mut(&causal_id)?;
        if track.decided {
            return None;
        }

        let since_signal = now_ns.saturating_sub(track.signal_ts_ns);
        let c = &self.config;

        let action = if track.confidence < c.min_signal_confidence {
            EscalationAction::AbortTrade
        } else if since_signal < c.min_confirm_ns {
            EscalationAction::StayPostOnly
        } else if queue_wait_ns > c.max_queue_wait_ns
            && rtt_ns < c.max_rtt_ns
            && volatility >= c.min_volatility
        {
            EscalationAction::EscalateToTaker
        } else if since_signal > c.max_total_wait_ns {
            EscalationAction::AbortTrade
        } else {
            EscalationAction::StayPostOnly
        };

        track.decided = true;

        Some(EscalationDecision {
            causal_id,
            action,
            decision_ts_ns: now_ns,
            confidence: track.confidence,
        })
    }

    /// Forget a completed causal id.
    pub fn retire(&mut self, causal_id: u64) {
        self.tracks.remove(&causal_id);
    }

    pub fn tracked(&self) -> usize {
        self.tracks.len()
    }
}

impl Default for TakerEscalationEngine {
    fn default() -> Self {
        Self::new(EscalationConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MS: u64 = 1_000_000;

    fn engine() -> TakerEscalationEngine {
        TakerEscalationEngine::default()
    }

    #[test]
    fn low_confidence_aborts() {
        let mut e = engine();
        e.on_signal(1, 0, 0.3);
        let d = e.on_execution_state(1, 5 * MS, 0, 0, 2.0).unwrap();
        assert_eq!(d.action, EscalationAction::AbortTrade);
    }

    #[test]
    fn stays_inside_confirmation_window() {
        let mut e = engine();
        e.on_signal(1, 0, 0.9);
        let d = e.on_execution_state(1, 1 * MS, 99 * MS, 0, 5.0).unwrap();
        assert_eq!(d.action, EscalationAction::StayPostOnly);
    }

    #[test]
    fn escalates_when_queue_slow_link_fast_vol_present() {
        let mut e = engine();
        e.on_signal(1, 0, 0.9);
        let d = e
            .on_execution_state(1, 5 * MS, 7 * MS, 1 * MS, 1.5)
            .unwrap();
        assert_eq!(d.action, EscalationAction::EscalateToTaker);
    }

    #[test]
    fn slow_link_prevents_escalation() {
        let mut e = engine();
        e.on_signal(1, 0, 0.9);
        // queue is slow but the RTT is too: crossing now would chase
        let d = e
            .on_execution_state(1, 5 * MS, 7 * MS, 9 * MS, 1.5)
            .unwrap();
        assert_eq!(d.action, EscalationAction::StayPostOnly);
    }

    #[test]
    fn total_wait_exhaustion_aborts() {
        let mut e = engine();
        e.on_signal(1, 0, 0.9);
        let d = e.on_execution_state(1, 13 * MS, 0, 0, 0.0).unwrap();
        assert_eq!(d.action, EscalationAction::AbortTrade);
    }

    #[test]
    fn each_causal_id_decided_exactly_once() {
        let mut e = engine();
        e.on_signal(1, 0, 0.9);
        let first = e.on_execution_state(1, 5 * MS, 7 * MS, 1 * MS, 1.5).unwrap();
        assert_eq!(first.action, EscalationAction::EscalateToTaker);
        assert!(e.on_execution_state(1, 6 * MS, 7 * MS, 1 * MS, 1.5).is_none());
        assert!(e.on_execution_state(1, 20 * MS, 0, 0, 0.0).is_none());
    }

    #[test]
    fn resignalling_rearms_the_decision() {
        let mut e = engine();
        e.on_signal(1, 0, 0.9);
        let d1 = e.on_execution_state(1, 3 * MS, 1 * MS, 1 * MS, 1.5).unwrap();
        assert_eq!(d1.action, EscalationAction::StayPostOnly);
        // a fresh signal on the same id resets the track
        e.on_signal(1, 4 * MS, 0.9);
        let d2 = e.on_execution_state(1, 9 * MS, 7 * MS, 1 * MS, 1.5).unwrap();
        assert_eq!(d2.action, EscalationAction::EscalateToTaker);
    }

    #[test]
    fn unknown_causal_id_ignored() {
        let mut e = engine();
        assert!(e.on_execution_state(42, 0, 0, 0, 0.0).is_none());
    }

    #[test]
    fn retire_drops_tracking() {
        let mut e = engine();
        e.on_signal(1, 0, 0.9);
        e.retire(1);
        assert_eq!(e.tracked(), 0);
        assert!(e.on_execution_state(1, 5 * MS, 0, 0, 0.0).is_none());
    }
}
