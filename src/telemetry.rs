// =============================================================================
// Telemetry — per-engine performance tracking and the coherent desk snapshot
// =============================================================================
//
// The snapshot is published whole under a single mutex and read by cloning
// the whole struct. No per-field atomics: a dashboard must never see the PnL
// of one instant next to the exposure of another.
// =============================================================================

use parking_lot::Mutex;
use serde::Serialize;

use crate::types::EngineKind;

const EMA_ALPHA: f64 = 0.1;

// ---------------------------------------------------------------------------
// Per-engine performance
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct EngineMetrics {
    pub trades: u64,
    pub wins: u64,
    pub pnl: f64,
    pub win_rate: f64,
    /// EMA of decision-to-fill latency, milliseconds.
    pub avg_latency_ms: f64,
    /// EMA of absolute slippage, bps.
    pub avg_slippage_bps: f64,
}

/// Tracks both engines' realized performance; feeds the allocator weight and
/// the optimizer's composite scores.
pub struct PerformanceTracker {
    metrics: Mutex<[EngineMetrics; 2]>,
}

impl PerformanceTracker {
    pub fn new() -> Self {
        Self {
            metrics: Mutex::new([EngineMetrics::default(); 2]),
        }
    }

    pub fn record_fill(&self, engine: EngineKind, pnl: f64, latency_ms: f64, slippage_bps: f64) {
        let mut metrics = self.metrics.lock();
        let m = &mut metrics[engine.index()];
        m.trades += 1;
        m.pnl += pnl;
        if pnl > 0.0 {
            m.wins += 1;
        }
        m.avg_latency_ms = m.avg_latency_ms * (1.0 - EMA_ALPHA) + latency_ms * EMA_ALPHA;
        m.avg_slippage_bps = m.avg_slippage_bps * (1.0 - EMA_ALPHA) + slippage_bps.abs() * EMA_ALPHA;
        m.win_rate = if m.trades > 0 {
            m.wins as f64 / m.trades as f64
        } else {
            0.0
        };
    }

    pub fn metrics(&self, engine: EngineKind) -> EngineMetrics {
        self.metrics.lock()[engine.index()]
    }

    /// Composite score in [0, 1]: PnL, hit rate, latency, slippage.
    pub fn compute_score(&self, engine: EngineKind) -> f64 {
        let m = self.metrics(engine);
        let pnl_score = (m.pnl / 1000.0).tanh();
        let win_score = m.win_rate;
        let latency_score = 1.0 - (m.avg_latency_ms / 100.0).min(1.0);
        let slip_score = 1.0 - (m.avg_slippage_bps / 10.0).min(1.0);
        (pnl_score * 0.4 + win_score * 0.2 + latency_score * 0.2 + slip_score * 0.2)
            .clamp(0.0, 1.0)
    }

    /// Relative allocation weight; 0.5 each before any evidence.
    pub fn allocation_weight(&self, engine: EngineKind) -> f64 {
        let hft = self.compute_score(EngineKind::Hft);
        let structure = self.compute_score(EngineKind::Structure);
        let total = hft + structure;
        if total == 0.0 {
            return 0.5;
        }
        match engine {
            EngineKind::Hft => hft / total,
            EngineKind::Structure => structure / total,
        }
    }
}

impl Default for PerformanceTracker {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Desk snapshot
// ---------------------------------------------------------------------------

/// The coherent telemetry cut consumed by the external dashboard process.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DeskSnapshot {
    pub global_exposure: f64,
    pub hft_exposure: f64,
    pub structure_exposure: f64,
    pub daily_pnl: f64,
    pub unrealized_pnl: f64,
    pub latency_ema_ms: f64,
    pub slippage_ema_bps: f64,
    pub hft_score: f64,
    pub structure_score: f64,
    pub hft_threshold: f64,
    pub structure_threshold: f64,
    pub spread_limit: f64,
    pub vol_limit: f64,
    pub lockdown_mode: bool,
    pub total_trades: u64,
    pub timestamp_ns: u64,
}

/// Single-mutex snapshot publisher: writers replace the whole struct, readers
/// clone the whole struct.
pub struct SnapshotPublisher {
    snapshot: Mutex<DeskSnapshot>,
}

impl SnapshotPublisher {
    pub fn new() -> Self {
        Self {
            snapshot: Mutex::new(DeskSnapshot::default()),
        }
    }

    pub fn update(&self, snapshot: DeskSnapshot) {
        *self.snapshot.lock() = snapshot;
    }

    pub fn read(&self) -> DeskSnapshot {
        self.snapshot.lock().clone()
    }
}

impl Default for SnapshotPublisher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fills_update_metrics_and_win_rate() {
        let t = PerformanceTracker::new();
        t.record_fill(EngineKind::Hft, 10.0, 5.0, 1.0);
        t.record_fill(EngineKind::Hft, -4.0, 5.0, 1.0);
        t.record_fill(EngineKind::Hft, 6.0, 5.0, 1.0);

        let m = t.metrics(EngineKind::Hft);
        assert_eq!(m.trades, 3);
        assert_eq!(m.wins, 2);
        assert!((m.pnl - 12.0).abs() < 1e-9);
        assert!((m.win_rate - 2.0 / 3.0).abs() < 1e-9);
        // the other engine is untouched
        assert_eq!(t.metrics(EngineKind::Structure).trades, 0);
    }

    #[test]
    fn score_rewards_profit_and_clean_execution() {
        let t = PerformanceTracker::new();
        for _ in 0..10 {
            t.record_fill(EngineKind::Structure, 100.0, 5.0, 0.5);
        }
        for _ in 0..10 {
            t.record_fill(EngineKind::Hft, -100.0, 80.0, 8.0);
        }
        assert!(t.compute_score(EngineKind::Structure) > t.compute_score(EngineKind::Hft));
    }

    #[test]
    fn allocation_weights_sum_to_one() {
        let t = PerformanceTracker::new();
        t.record_fill(EngineKind::Hft, 50.0, 5.0, 1.0);
        t.record_fill(EngineKind::Structure, 10.0, 10.0, 2.0);
        let sum = t.allocation_weight(EngineKind::Hft) + t.allocation_weight(EngineKind::Structure);
        assert!((sum - 1.0).abs() < 1e-9);
    }

    #[test]
    fn empty_tracker_splits_evenly() {
        let t = PerformanceTracker::new();
        assert_eq!(t.allocation_weight(EngineKind::Hft), 0.5);
    }

    #[test]
    fn snapshot_read_is_a_coherent_clone() {
        let p = SnapshotPublisher::new();
        p.update(DeskSnapshot {
            global_exposure: 5000.0,
            hft_exposure: 2000.0,
            structure_exposure: 3000.0,
            daily_pnl: 42.0,
            total_trades: 7,
            timestamp_ns: 99,
            ..Default::default()
        });

        let snap = p.read();
        assert_eq!(snap.global_exposure, 5000.0);
        assert_eq!(snap.hft_exposure + snap.structure_exposure, snap.global_exposure);
        assert_eq!(snap.total_trades, 7);

        // a later update does not mutate the clone already taken
        p.update(DeskSnapshot::default());
        assert_eq!(snap.daily_pnl, 42.0);
    }

    #[test]
    fn concurrent_snapshot_readers_see_whole_updates() {
        use std::sync::Arc;
        let p = Arc::new(SnapshotPublisher::new());

        // writer keeps the invariant hft + structure == global
        let writer = {
            let p = p.clone();
            std::thread::spawn(move || {
                for i in 0..20_000u64 {
                    let x = i as f64;
                    p.update(DeskSnapshot {
                        global_exposure: 2.0 * x,
                        hft_exposure: x,
                        structure_exposure: x,
                        ..Default::default()
                    });
                }
            })
        };
        let reader = {
            let p = p.clone();
            std::thread::spawn(move || {
                for _ in 0..20_000 {
                    let s = p.read();
                    assert_eq!(
                        s.hft_exposure + s.structure_exposure,
                        s.global_exposure,
                        "cross-field drift observed"
                    );
                }
            })
        };
        writer.join().unwrap();
        reader.join().unwrap();
    }
}
