// =============================================================================
// Central engine state — Chimera Metals desk
// =============================================================================
//
// The single source of truth wiring every subsystem together. Long-lived
// components are owned here; tasks hold `Arc<EngineState>` and borrow what
// they need. Mutexes are per-component so the hot paths never contend on a
// global lock.
// =============================================================================

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Result;
use parking_lot::Mutex;

use crate::adaptive::AdaptiveParams;
use crate::allocator::{AllocationConfig, CapitalAllocator};
use crate::audit::AuditLog;
use crate::config::EngineConfig;
use crate::exec::escalation::EscalationConfig;
use crate::exec::policy::ExecPolicyConfig;
use crate::exec::{ExecPolicyGovernor, OrderTracker, RejectRateTracker, TakerEscalationEngine};
use crate::journal::JournalWriter;
use crate::latency::LatencyTracker;
use crate::market::MarketState;
use crate::persist::PositionPersistence;
use crate::positions::PositionBook;
use crate::risk::{CapitalAnomalyGuard, RiskGovernor, RiskGovernorConfig};
use crate::telemetry::{DeskSnapshot, PerformanceTracker, SnapshotPublisher};
use crate::types::{now_ns, EngineKind};

pub const JOURNAL_FILE: &str = "chimera_journal.bin";
pub const SNAPSHOT_JSON_FILE: &str = "telemetry_snapshot.json";

pub struct EngineState {
    // ── Configuration ───────────────────────────────────────────────────
    pub config: EngineConfig,
    pub data_dir: PathBuf,

    // ── Lifecycle ───────────────────────────────────────────────────────
    /// Cooperative shutdown flag; every loop checks it between messages.
    running: AtomicBool,
    causal_seq: AtomicU64,
    pub trade_count: AtomicU64,
    pub hft_disabled: Arc<AtomicBool>,
    pub structure_disabled: Arc<AtomicBool>,
    /// Set when the strategy loop itself dies (uncaught panic). Not an
    /// engine flag: with the loop gone neither engine is ticking, and the
    /// snapshot must say lockdown rather than healthy.
    pub strategy_disabled: Arc<AtomicBool>,
    pub exchange_unstable: AtomicBool,

    // ── Market data ─────────────────────────────────────────────────────
    pub market: MarketState,

    // ── Decision pipeline ───────────────────────────────────────────────
    pub adaptive: AdaptiveParams,
    pub allocator: Mutex<CapitalAllocator>,
    pub governor: Mutex<RiskGovernor>,
    pub policy: Mutex<ExecPolicyGovernor>,
    pub escalation: Mutex<TakerEscalationEngine>,
    pub reject_rate: Mutex<RejectRateTracker>,
    pub anomaly: CapitalAnomalyGuard,

    // ── Execution & positions ───────────────────────────────────────────
    pub orders: Mutex<OrderTracker>,
    pub positions: Mutex<PositionBook>,

    // ── Telemetry & persistence ─────────────────────────────────────────
    pub latency: LatencyTracker,
    pub performance: PerformanceTracker,
    pub snapshot: SnapshotPublisher,
    pub journal: Mutex<JournalWriter>,
    pub audit: AuditLog,
    pub persistence: PositionPersistence,
}

impl EngineState {
    pub fn new(config: EngineConfig, data_dir: impl AsRef<Path>) -> Result<Self> {
        let data_dir = data_dir.as_ref().to_path_buf();
        let allocation = AllocationConfig::default();
        let global_cap = allocation.max_xau_exposure + allocation.max_xag_exposure;

        Ok(Self {
            config,
            running: AtomicBool::new(true),
            causal_seq: AtomicU64::new(1),
            trade_count: AtomicU64::new(0),
            hft_disabled: Arc::new(AtomicBool::new(false)),
            structure_disabled: Arc::new(AtomicBool::new(false)),
            strategy_disabled: Arc::new(AtomicBool::new(false)),
            exchange_unstable: AtomicBool::new(false),

            market: MarketState::new(),

            adaptive: AdaptiveParams::new(),
            allocator: Mutex::new(CapitalAllocator::new(allocation)),
            governor: Mutex::new(RiskGovernor::new(RiskGovernorConfig::default())),
            policy: Mutex::new(ExecPolicyGovernor::new(ExecPolicyConfig::default())),
            escalation: Mutex::new(TakerEscalationEngine::new(EscalationConfig::default())),
            reject_rate: Mutex::new(RejectRateTracker::default()),
            anomaly: CapitalAnomalyGuard::new(global_cap),

            orders: Mutex::new(OrderTracker::new()),
            positions: Mutex::new(PositionBook::new()),

            latency: LatencyTracker::new(),
            performance: PerformanceTracker::new(),
            snapshot: SnapshotPublisher::new(),
            journal: Mutex::new(JournalWriter::create(data_dir.join(JOURNAL_FILE))?),
            audit: AuditLog::open(&data_dir)?,
            persistence: PositionPersistence::new(&data_dir),

            data_dir,
        })
    }

    // ── Lifecycle ───────────────────────────────────────────────────────

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn shutdown(&self) {
        self.running.store(false, Ordering::Release);
    }

    /// The monotonic id binding an intent to every artifact it causes.
    pub fn next_causal_id(&self) -> u64 {
        self.causal_seq.fetch_add(1, Ordering::Relaxed)
    }

    pub fn engine_disabled(&self, engine: EngineKind) -> bool {
        match engine {
            EngineKind::Hft => self.hft_disabled.load(Ordering::Acquire),
            EngineKind::Structure => self.structure_disabled.load(Ordering::Acquire),
        }
    }

    /// Permanently sideline a failed engine; the process keeps trading on
    /// the survivor.
    pub fn disable_engine(&self, engine: EngineKind) {
        match engine {
            EngineKind::Hft => self.hft_disabled.store(true, Ordering::Release),
            EngineKind::Structure => self.structure_disabled.store(true, Ordering::Release),
        }
    }

    // ── Persistence helper ──────────────────────────────────────────────

    /// Rewrite the position snapshot from the current book. Called after
    /// every confirmed fill, before dependent PnL updates are treated as
    /// durable.
    pub fn persist_positions(&self) -> Result<()> {
        let (positions, daily_pnl) = {
            let book = self.positions.lock();
            (book.open_positions(), book.daily_pnl())
        };
        self.persistence.save(&positions, daily_pnl)
    }

    // ── Telemetry projection ────────────────────────────────────────────

    /// Assemble and publish the coherent desk snapshot (the read-only view
    /// the external dashboard consumes).
    pub fn publish_snapshot(&self) {
        let (global_exposure, hft_exposure, structure_exposure, lockdown) = {
            let alloc = self.allocator.lock();
            (
                alloc.global_exposure(),
                alloc.engine_exposure(EngineKind::Hft),
                alloc.engine_exposure(EngineKind::Structure),
                alloc.corruption_detected(),
            )
        };
        let (daily_pnl, unrealized) = {
            let book = self.positions.lock();
            let upnl = book.unrealized_pnl(|s| self.market.mid(s));
            (book.daily_pnl(), upnl)
        };
        let halted = self.governor.lock().is_trading_halted();

        self.snapshot.update(DeskSnapshot {
            global_exposure,
            hft_exposure,
            structure_exposure,
            daily_pnl,
            unrealized_pnl: unrealized,
            latency_ema_ms: self.latency.latency_ema_ns() / 1e6,
            slippage_ema_bps: self.latency.slippage_ema_bps(),
            hft_score: self.performance.compute_score(EngineKind::Hft),
            structure_score: self.performance.compute_score(EngineKind::Structure),
            hft_threshold: self.adaptive.hft_signal_threshold(),
            structure_threshold: self.adaptive.structure_conf_threshold(),
            spread_limit: self.adaptive.spread_limit(),
            vol_limit: self.adaptive.vol_limit(),
            lockdown_mode: lockdown
                || halted
                || self.anomaly.is_emergency_active()
                || self.strategy_disabled.load(Ordering::Acquire),
            total_trades: self.trade_count.load(Ordering::Relaxed),
            timestamp_ns: now_ns(),
        });
    }

    /// Mirror the current snapshot to `telemetry_snapshot.json` for the
    /// external dashboard process. Failures are swallowed: the dashboard is
    /// a consumer, never a dependency of the trading path.
    pub fn write_snapshot_file(&self) {
        let snap = self.snapshot.read();
        if let Ok(json) = serde_json::to_string_pretty(&snap) {
            let _ = std::fs::write(self.data_dir.join(SNAPSHOT_JSON_FILE), json);
        }
    }
}
