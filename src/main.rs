// =============================================================================
// Chimera Metals Engine — Main Entry Point
// =============================================================================
//
// Startup order matters: singleton check, config, crash recovery, then the
// session and housekeeping tasks. Exit codes: 0 clean shutdown; 1 config
// failure, singleton violation, or operator-aborted corrupt snapshot.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod adaptive;
mod allocator;
mod app_state;
mod audit;
mod config;
mod engines;
mod exec;
mod fix;
mod journal;
mod latency;
mod market;
mod persist;
mod positions;
mod risk;
mod strategy;
mod supervise;
mod telemetry;
mod types;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::adaptive::{optimize_step, OptimizerInputs};
use crate::app_state::EngineState;
use crate::config::EngineConfig;
use crate::fix::session::{SessionKind, SessionState};
use crate::persist::{prompt_for_corrupt_snapshot, PositionPersistence, RecoveryDecision};
use crate::supervise::{supervised, InstanceLock};
use crate::types::{now_ns, EngineKind};

const SINGLETON_NAME: &str = "chimera_metals_engine";
/// Reconnect backoff: 1 s doubling to a 30 s ceiling.
const BACKOFF_INITIAL_SECS: u64 = 1;
const BACKOFF_CEILING_SECS: u64 = 30;
/// Repeated fast disconnects mark the exchange unstable for the policy.
const UNSTABLE_DISCONNECT_WINDOW: Duration = Duration::from_secs(60);
const UNSTABLE_DISCONNECT_COUNT: usize = 3;

/// Per-session reconnect bookkeeping: exponential backoff plus the
/// fast-disconnect instability latch.
struct ReconnectPolicy {
    backoff_secs: u64,
    recent_disconnects: Vec<Instant>,
}

impl ReconnectPolicy {
    fn new() -> Self {
        Self {
            backoff_secs: BACKOFF_INITIAL_SECS,
            recent_disconnects: Vec::new(),
        }
    }

    /// Record one disconnect; returns (delay for this reconnect, unstable?).
    fn on_disconnect(&mut self, session_uptime: Duration, clean: bool) -> (Duration, bool) {
        if clean || session_uptime >= Duration::from_secs(BACKOFF_CEILING_SECS) {
            self.backoff_secs = BACKOFF_INITIAL_SECS;
        }
        let delay = Duration::from_secs(self.backoff_secs);
        self.backoff_secs = (self.backoff_secs * 2).min(BACKOFF_CEILING_SECS);

        let now = Instant::now();
        self.recent_disconnects.push(now);
        self.recent_disconnects
            .retain(|t| now.duration_since(*t) < UNSTABLE_DISCONNECT_WINDOW);
        (delay, self.recent_disconnects.len() >= UNSTABLE_DISCONNECT_COUNT)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        Chimera Metals Engine — Starting Up              ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    // ── 1. Single-instance check ─────────────────────────────────────────
    let Some(_instance_lock) = InstanceLock::acquire(SINGLETON_NAME) else {
        error!("another instance is already running — refusing to start");
        return ExitCode::from(1);
    };

    // ── 2. Config ────────────────────────────────────────────────────────
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.ini".to_string());
    let config = match EngineConfig::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            error!(path = %config_path, error = %e, "config load failed");
            return ExitCode::from(1);
        }
    };
    info!(
        dashboard_port = config.dashboard.port,
        "dashboard served by the external telemetry process"
    );

    // ── 3. Crash recovery — position snapshot ────────────────────────────
    let data_dir = std::path::PathBuf::from(".");
    let persistence = PositionPersistence::new(&data_dir);
    let recovered = match persistence.load() {
        Ok(snapshot) => snapshot,
        Err(e) => {
            // fail closed: the operator decides between flat and abort
            let mut stdin = std::io::BufReader::new(std::io::stdin());
            match prompt_for_corrupt_snapshot(&e, &mut stdin) {
                RecoveryDecision::ContinueFlat => {
                    warn!("operator chose to continue with zero position");
                    let _ = persistence.clear();
                    None
                }
                RecoveryDecision::Abort => {
                    error!("operator aborted on corrupt position snapshot");
                    return ExitCode::from(1);
                }
            }
        }
    };

    // ── 4. Shared state ──────────────────────────────────────────────────
    let state = match EngineState::new(config, &data_dir) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            error!(error = %e, "engine state initialisation failed");
            return ExitCode::from(1);
        }
    };
    if let Some(snapshot) = recovered {
        info!(
            positions = snapshot.positions.len(),
            daily_pnl = snapshot.daily_pnl,
            "recovered position snapshot — held pending broker reconciliation"
        );
        state
            .positions
            .lock()
            .restore(snapshot.positions, snapshot.daily_pnl);
    }

    // ── 5. Channels ──────────────────────────────────────────────────────
    let (md_tx, md_rx) = mpsc::channel(1024);
    let (exec_tx, exec_rx) = mpsc::channel(256);
    let (order_tx, order_rx) = mpsc::channel(64);

    // ── 6. QUOTE session task (reconnect loop with backoff) ──────────────
    let quote_state = state.clone();
    let quote_task = tokio::spawn(async move {
        let mut session = SessionState::new(SessionKind::Quote, false, now_ns());
        session.load_checkpoint(&quote_state.data_dir);
        let mut reconnect = ReconnectPolicy::new();

        while quote_state.is_running() {
            let started = Instant::now();
            let result =
                fix::client::run_quote_session(quote_state.clone(), &mut session, &md_tx).await;
            if !quote_state.is_running() {
                break;
            }
            let clean = match result {
                Ok(()) => {
                    info!("QUOTE session ended cleanly — reconnecting");
                    true
                }
                Err(e) => {
                    error!(error = %e, "QUOTE session failed — reconnecting");
                    false
                }
            };
            let _ = session.save_checkpoint(&quote_state.data_dir);
            session.reset_on_reconnect(now_ns());

            let (delay, unstable) = reconnect.on_disconnect(started.elapsed(), clean);
            mark_instability(&quote_state, "QUOTE", unstable);
            tokio::time::sleep(delay).await;
        }
        let _ = session.save_checkpoint(&quote_state.data_dir);
        info!("QUOTE session task stopped");
    });

    // ── 7. TRADE session task ────────────────────────────────────────────
    let trade_state = state.clone();
    let trade_task = tokio::spawn(async move {
        let mut session = SessionState::new(SessionKind::Trade, true, now_ns());
        session.load_checkpoint(&trade_state.data_dir);
        let mut reconnect = ReconnectPolicy::new();
        let mut order_rx = order_rx;

        while trade_state.is_running() {
            let started = Instant::now();
            let result = fix::client::run_trade_session(
                trade_state.clone(),
                &mut session,
                &exec_tx,
                &mut order_rx,
            )
            .await;
            if !trade_state.is_running() {
                break;
            }
            let clean = match result {
                Ok(()) => {
                    info!("TRADE session ended cleanly — reconnecting");
                    true
                }
                Err(e) => {
                    error!(error = %e, "TRADE session failed — reconnecting");
                    false
                }
            };
            let _ = session.save_checkpoint(&trade_state.data_dir);
            session.reset_on_reconnect(now_ns());

            let (delay, unstable) = reconnect.on_disconnect(started.elapsed(), clean);
            mark_instability(&trade_state, "TRADE", unstable);
            tokio::time::sleep(delay).await;
        }
        let _ = session.save_checkpoint(&trade_state.data_dir);
        info!("TRADE session task stopped");
    });

    // ── 8. Strategy loop (panic-isolated) ────────────────────────────────
    let strat_state = state.clone();
    let strat_disabled = state.strategy_disabled.clone();
    let strategy_task = tokio::spawn(async move {
        let inner = strat_state.clone();
        supervised("strategy", strat_disabled, async move {
            strategy::run_strategy(inner, md_rx, exec_rx, order_tx).await;
        })
        .await;
    });

    // ── 9. Adaptive optimizer (every 30 s) ───────────────────────────────
    let opt_state = state.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(30));
        interval.tick().await; // the immediate first tick is a no-op
        while opt_state.is_running() {
            interval.tick().await;
            optimize_step(
                &opt_state.adaptive,
                OptimizerInputs {
                    hft_sharpe: opt_state.performance.compute_score(EngineKind::Hft),
                    structure_sharpe: opt_state.performance.compute_score(EngineKind::Structure),
                    execution_quality: opt_state.latency.quality_ema(),
                },
            );
        }
    });

    // ── 10. Allocator auditor (every 5 minutes) ──────────────────────────
    let audit_state = state.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(300));
        interval.tick().await;
        while audit_state.is_running() {
            interval.tick().await;
            allocator::run_audit(&mut audit_state.allocator.lock());
        }
    });

    info!("all subsystems running — press Ctrl+C to stop");

    // ── 11. Graceful shutdown ────────────────────────────────────────────
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            warn!("shutdown signal received — stopping gracefully");
        }
        _ = wait_until_stopped(state.clone()) => {
            warn!("engine stopped internally (emergency shutdown or fatal error)");
        }
    }
    state.shutdown();

    let _ = tokio::time::timeout(Duration::from_secs(5), async {
        let _ = quote_task.await;
        let _ = trade_task.await;
        let _ = strategy_task.await;
    })
    .await;

    if let Err(e) = state.persist_positions() {
        error!(error = %e, "final position snapshot failed");
    }
    info!("Chimera Metals Engine shut down complete");
    ExitCode::SUCCESS
}

/// Poll the running flag so an internal emergency shutdown unblocks main.
async fn wait_until_stopped(state: Arc<EngineState>) {
    while state.is_running() {
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
}

fn mark_instability(state: &EngineState, session: &str, unstable: bool) {
    state
        .exchange_unstable
        .store(unstable, std::sync::atomic::Ordering::Release);
    if unstable {
        warn!(session, "repeated disconnects — exchange marked unstable");
        state.policy.lock().on_exchange_instability(now_ns(), true);
    } else {
        state.policy.lock().on_exchange_instability(now_ns(), false);
    }
}
