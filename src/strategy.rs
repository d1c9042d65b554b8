// =============================================================================
// Strategy loop — tick to order, execution report to state
// =============================================================================
//
// The single consumer of both session channels, which is what makes the
// pipeline ordering guarantees hold: within a session, application effects
// land in validated sequence order; a causal id moves strictly through
// signal -> sizing -> submit -> ack -> fill.
//
// Per tick: engines -> adaptive gates -> allocator -> risk governor ->
// execution policy -> emitter. Per execution event: order tracker ->
// positions -> persistence -> allocator/risk/telemetry. A 1-second timer
// drives the watchdog beat, escalation sweep, reject-rate refresh and the
// daily rollover.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::allocator::AllocatedIntent;
use crate::app_state::EngineState;
use crate::audit::AuditEvent;
use crate::engines::hft::HftEngine;
use crate::engines::structure::StructureEngine;
use crate::engines::{Intent, SignalEngine};
use crate::exec::emitter::{OrderEmitter, OutboundOrder};
use crate::exec::escalation::EscalationAction;
use crate::exec::orders::ExecKind;
use crate::exec::ExecMode;
use crate::fix::client::ExecEvent;
use crate::fix::session::FillRecord;
use crate::journal::{EventKind, ExecutionEvent, IntentEvent, RiskEvent, TickEvent};
use crate::market::regime::RegimeClassifier;
use crate::market::MarketSnapshot;
use crate::risk::governor::RiskMetrics;
use crate::supervise::Watchdog;
use crate::types::{now_ns, EngineKind, Side, Symbol};

/// Nominal desk capital for equity reporting.
const STARTING_CAPITAL: f64 = 100_000.0;
/// Per-fill realized-PnL records retained for bust reversal.
const MAX_FILL_PNL_RECORDS: usize = 10_000;

pub struct StrategyLoop {
    state: Arc<EngineState>,
    emitter: OrderEmitter,
    engines: Vec<Box<dyn SignalEngine>>,
    regimes: [RegimeClassifier; Symbol::COUNT],
    vol_scores: [f64; Symbol::COUNT],
    /// exec-id -> realized PnL, so a bust can negate exactly what the fill
    /// booked.
    fill_pnl: HashMap<String, f64>,
    session_start_ns: u64,
    current_date: String,
}

impl StrategyLoop {
    pub fn new(state: Arc<EngineState>, order_tx: mpsc::Sender<OutboundOrder>) -> Self {
        Self {
            state,
            emitter: OrderEmitter::new(order_tx),
            engines: vec![
                Box::new(HftEngine::new()),
                Box::new(StructureEngine::new()),
            ],
            regimes: [RegimeClassifier::new(), RegimeClassifier::new()],
            vol_scores: [0.0; Symbol::COUNT],
            fill_pnl: HashMap::new(),
            session_start_ns: now_ns(),
            current_date: Utc::now().format("%Y-%m-%d").to_string(),
        }
    }

    // -------------------------------------------------------------------------
    // Tick path
    // -------------------------------------------------------------------------

    pub fn on_market_snapshot(&mut self, snap: MarketSnapshot) {
        let now = now_ns();

        self.journal_tick(&snap);

        let idx = snap.symbol.index();
        self.regimes[idx].update(snap.mid, snap.timestamp_ns);
        self.vol_scores[idx] = self.regimes[idx].volatility_score();

        let spread_bps = if snap.mid > 0.0 {
            snap.spread / snap.mid * 10_000.0
        } else {
            0.0
        };
        let vol = self.max_vol_score();
        self.state
            .policy
            .lock()
            .on_market_state(now, spread_bps, vol);
        self.refresh_risk_metrics(vol);

        // Engines see every validated tick, disabled ones are skipped. Each
        // engine runs under its own panic isolation: a blown engine is
        // sidelined, the survivor keeps trading.
        let mut hft_intent = None;
        let mut structure_intent = None;
        for engine in &mut self.engines {
            let kind = engine.kind();
            if self.state.engine_disabled(kind) {
                continue;
            }
            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                engine.on_tick(&snap);
                engine.poll_intent()
            }));
            let intent = match outcome {
                Ok(intent) => intent,
                Err(_) => {
                    error!(engine = %kind, "ENGINE FAILURE — disabling engine");
                    self.state.disable_engine(kind);
                    continue;
                }
            };
            match kind {
                EngineKind::Hft => hft_intent = intent,
                EngineKind::Structure => structure_intent = intent,
            }
        }

        let hft_intent = self.gate_entry(hft_intent, &snap, EngineKind::Hft);
        let structure_intent = self.gate_entry(structure_intent, &snap, EngineKind::Structure);
        if hft_intent.is_none() && structure_intent.is_none() {
            return;
        }

        let allocated = self
            .state
            .allocator
            .lock()
            .allocate(hft_intent, structure_intent, snap.mid);
        let Some(mut allocated) = allocated else {
            return;
        };

        // Optimizer capital bias tilts sizing between the engines.
        let bias = self.state.adaptive.capital_bias();
        allocated.quantity *= match allocated.source_engine {
            EngineKind::Hft => bias,
            EngineKind::Structure => 2.0 - bias,
        };

        let (approved, verdict) = self
            .state
            .governor
            .lock()
            .filter(allocated, now, Utc::now());
        let Some(mut approved) = approved else {
            debug!(symbol = %allocated.symbol, ?verdict, "intent blocked by risk governor");
            return;
        };

        // Execution policy: entries obey the mode, exits always leave the
        // desk aggressively (asymmetric exit).
        let policy = self.state.policy.lock().state();
        let post_only;
        if approved.is_exit {
            post_only = false;
        } else {
            if policy.mode == ExecMode::Disabled {
                debug!(symbol = %approved.symbol, "entry suppressed — execution disabled");
                return;
            }
            approved.quantity *= policy.size_multiplier;
            if approved.quantity <= 0.0 {
                return;
            }
            post_only = policy.mode == ExecMode::PostOnly;
        }

        self.submit(&approved, &snap, post_only, now);
    }

    fn gate_entry(
        &self,
        intent: Option<Intent>,
        snap: &MarketSnapshot,
        engine: EngineKind,
    ) -> Option<Intent> {
        let intent = intent?;
        if intent.is_exit {
            return Some(intent); // exits are never gated
        }
        let adaptive = &self.state.adaptive;
        if !self.state.market.is_tradable(intent.symbol, snap.timestamp_ns) {
            return None;
        }
        if intent.confidence < adaptive.threshold_for(engine) {
            debug!(engine = %engine, confidence = intent.confidence, "intent below adaptive threshold");
            return None;
        }
        if snap.spread > adaptive.spread_limit() {
            return None;
        }
        if self.max_vol_score() > adaptive.vol_limit() {
            return None;
        }
        Some(intent)
    }

    fn submit(
        &mut self,
        intent: &AllocatedIntent,
        snap: &MarketSnapshot,
        post_only: bool,
        now: u64,
    ) {
        let causal_id = self.state.next_causal_id();
        let Some(cl_ord_id) = self.emitter.submit(intent, causal_id, snap.bid, snap.ask, post_only)
        else {
            return;
        };

        let submit_price = if post_only {
            match intent.side {
                Side::Buy => snap.bid,
                Side::Sell => snap.ask,
            }
        } else {
            snap.mid
        };

        self.state.orders.lock().register(
            &cl_ord_id,
            causal_id,
            intent.symbol,
            intent.side,
            intent.quantity,
            post_only.then_some(submit_price),
            post_only,
            intent.source_engine,
            now,
        );
        self.state.latency.on_submit(
            causal_id,
            intent.symbol,
            snap.timestamp_ns,
            now,
            submit_price,
            intent.quantity,
        );
        self.state
            .escalation
            .lock()
            .on_signal(causal_id, now, intent.confidence);

        self.journal_intent(intent, causal_id);
        let mut audit = AuditEvent::new(now, if intent.is_exit { "EXIT_ORDER" } else { "ORDER" });
        audit.symbol = intent.symbol.fix_name().to_string();
        audit.regime = self.regimes[intent.symbol.index()].classify().kind.to_string();
        audit.engine = intent.source_engine.to_string();
        audit.side = intent.side.to_string();
        audit.size = intent.quantity;
        audit.price = submit_price;
        audit.spread = snap.spread;
        audit.confidence = intent.confidence;
        self.state.audit.log(&audit);
    }

    // -------------------------------------------------------------------------
    // Execution path
    // -------------------------------------------------------------------------

    pub fn on_exec_event(&mut self, event: ExecEvent) {
        match event {
            ExecEvent::SessionUp => {
                self.state.positions.lock().confirm_reconciliation();
            }
            ExecEvent::Report(report) => {
                let update = self.state.orders.lock().apply_report(&report);
                let Some(update) = update else {
                    return;
                };
                match update.kind {
                    ExecKind::Ack => {
                        self.state.latency.on_ack(update.causal_id, now_ns());
                    }
                    ExecKind::PartialFill | ExecKind::Fill => {
                        self.apply_fill(&report.exec_id, &update);
                    }
                    ExecKind::Canceled => {
                        let now = now_ns();
                        self.state.latency.on_cancel(update.causal_id, now);
                        self.state.escalation.lock().retire(update.causal_id);
                        self.notify_engine_closed(update.source_engine, update.symbol, now);
                    }
                    ExecKind::Rejected => self.apply_reject(&update),
                    ExecKind::TradeBust | ExecKind::Other => {}
                }
            }
            ExecEvent::Bust { ref_exec_id, fill, report } => {
                self.apply_bust(&ref_exec_id, fill, &report);
            }
        }
    }

    fn apply_fill(&mut self, exec_id: &str, update: &crate::exec::OrderUpdate) {
        let now = now_ns();

        let delta = self.state.positions.lock().apply_fill(
            update.symbol,
            update.side,
            update.fill_qty,
            update.fill_price,
            now,
        );

        // Snapshot before any dependent PnL update is considered durable.
        if let Err(e) = self.state.persist_positions() {
            warn!(error = %e, "position snapshot write failed");
        }

        self.remember_fill_pnl(exec_id, delta.realized_pnl);

        {
            let mut allocator = self.state.allocator.lock();
            if delta.closed {
                allocator.on_position_closed(update.symbol);
            }
            if delta.opened {
                allocator.on_position_opened(
                    update.symbol,
                    update.side,
                    update.fill_qty,
                    update.fill_price,
                    update.source_engine,
                );
            }
            let exposure = allocator.global_exposure();
            drop(allocator);
            let state = self.state.clone();
            self.state
                .anomaly
                .check_and_enforce(exposure, move || state.shutdown());
        }

        self.state.reject_rate.lock().record(false);

        let mut latency_ms = 0.0;
        let mut slippage_bps = 0.0;
        if update.terminal {
            if let Some(rec) =
                self.state
                    .latency
                    .on_fill(update.causal_id, now, update.fill_price, update.fill_qty)
            {
                latency_ms = rec.decision_to_fill_ns() as f64 / 1e6;
                slippage_bps = rec.slippage_bps();
            }
            self.state.escalation.lock().retire(update.causal_id);
        }

        if delta.closed {
            self.state
                .governor
                .lock()
                .record_trade_result(delta.realized_pnl, now);
            self.state.performance.record_fill(
                update.source_engine,
                delta.realized_pnl,
                latency_ms,
                slippage_bps,
            );
            self.state
                .trade_count
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            self.notify_engine_closed(update.source_engine, update.symbol, now);
            info!(
                symbol = %update.symbol,
                engine = %update.source_engine,
                pnl = delta.realized_pnl,
                "position closed"
            );
        }

        self.journal_execution(update, now);
        let mut audit = AuditEvent::new(now, "FILL");
        audit.symbol = update.symbol.fix_name().to_string();
        audit.engine = update.source_engine.to_string();
        audit.side = update.side.to_string();
        audit.size = update.fill_qty;
        audit.price = update.fill_price;
        audit.latency_ms = latency_ms;
        self.state.audit.log(&audit);
        self.journal_risk(now);
    }

    fn apply_reject(&mut self, update: &crate::exec::OrderUpdate) {
        let now = now_ns();
        self.state.latency.on_reject(update.causal_id, now);
        self.state.escalation.lock().retire(update.causal_id);

        let rate = {
            let mut tracker = self.state.reject_rate.lock();
            tracker.record(true);
            tracker.rate()
        };
        self.state.policy.lock().on_reject_rate(now, rate);
        self.notify_engine_closed(update.source_engine, update.symbol, now);

        let mut audit = AuditEvent::new(now, "REJECT");
        audit.symbol = update.symbol.fix_name().to_string();
        audit.engine = update.source_engine.to_string();
        audit.side = update.side.to_string();
        self.state.audit.log(&audit);
    }

    fn apply_bust(&mut self, ref_exec_id: &str, fill: FillRecord, report: &crate::exec::ExecReport) {
        let now = now_ns();
        let symbol = report.symbol.or_else(|| {
            self.state
                .orders
                .lock()
                .get(&report.cl_ord_id)
                .map(|o| o.symbol)
        });
        let Some(symbol) = symbol else {
            warn!(ref_exec_id, "trade bust without a resolvable symbol — ignored");
            return;
        };

        let booked_pnl = self.fill_pnl.remove(ref_exec_id).unwrap_or(0.0);
        warn!(
            ref_exec_id,
            symbol = %symbol,
            quantity = fill.quantity,
            reversed_pnl = -booked_pnl,
            "trade bust — reversing fill"
        );

        let delta = self.state.positions.lock().reverse_fill(
            symbol,
            fill.side,
            fill.quantity,
            fill.price,
            booked_pnl,
            now,
        );
        if let Err(e) = self.state.persist_positions() {
            warn!(error = %e, "position snapshot write failed after bust");
        }

        {
            let mut allocator = self.state.allocator.lock();
            if delta.closed {
                allocator.on_position_closed(symbol);
            }
            if delta.opened {
                let engine = self
                    .state
                    .orders
                    .lock()
                    .get(&report.cl_ord_id)
                    .map(|o| o.source_engine)
                    .unwrap_or(EngineKind::Structure);
                allocator.on_position_opened(
                    symbol,
                    fill.side.opposite(),
                    fill.quantity,
                    fill.price,
                    engine,
                );
            }
        }
        if !report.cl_ord_id.is_empty() {
            self.state.orders.lock().mark_busted(&report.cl_ord_id);
        }

        let mut audit = AuditEvent::new(now, "BUST");
        audit.symbol = symbol.fix_name().to_string();
        audit.side = fill.side.to_string();
        audit.size = fill.quantity;
        audit.price = fill.price;
        self.state.audit.log(&audit);
        self.journal_risk(now);
    }

    fn notify_engine_closed(&mut self, engine: EngineKind, symbol: Symbol, ts_ns: u64) {
        for e in &mut self.engines {
            if e.kind() == engine {
                e.on_position_closed(symbol, ts_ns);
            }
        }
    }

    // -------------------------------------------------------------------------
    // Timer path
    // -------------------------------------------------------------------------

    pub fn on_timer(&mut self) {
        let now = now_ns();
        let vol = self.max_vol_score();
        self.refresh_risk_metrics(vol);

        // reject-rate refresh keeps the policy current between reports
        let rate = self.state.reject_rate.lock().rate();
        self.state.policy.lock().on_reject_rate(now, rate);

        self.escalation_sweep(now, vol);
        self.maybe_roll_daily();
    }

    /// Advisory escalation pass over the in-flight orders: decisions are
    /// logged and audited; TAKE_ONLY mode governs how the next order goes out.
    fn escalation_sweep(&mut self, now: u64, vol: f64) {
        for causal_id in self.state.latency.inflight_ids() {
            let Some((rtt, queue)) = self.state.latency.inflight_timing(causal_id) else {
                continue;
            };
            let decision = self
                .state
                .escalation
                .lock()
                .on_execution_state(causal_id, now, queue, rtt, vol);
            let Some(decision) = decision else { continue };
            match decision.action {
                EscalationAction::EscalateToTaker => {
                    info!(causal_id, "escalation: cross the spread on next touch");
                    let mut audit = AuditEvent::new(now, "ESCALATE");
                    audit.confidence = decision.confidence;
                    self.state.audit.log(&audit);
                }
                EscalationAction::AbortTrade => {
                    info!(causal_id, "escalation: abort — signal stale");
                }
                EscalationAction::StayPostOnly => {}
            }
        }
    }

    fn refresh_risk_metrics(&mut self, vol: f64) {
        let (daily_pnl, unrealized) = {
            let book = self.state.positions.lock();
            let upnl = book.unrealized_pnl(|s| self.state.market.mid(s));
            (book.daily_pnl(), upnl)
        };
        let mut governor = self.state.governor.lock();
        let consecutive_losses = governor.loss_cluster().consecutive_losses();
        governor.update_metrics(RiskMetrics {
            equity: STARTING_CAPITAL + daily_pnl,
            daily_pnl,
            unrealized_pnl: unrealized,
            consecutive_losses,
            volatility_score: vol,
            session_start_ns: self.session_start_ns,
        });
    }

    fn maybe_roll_daily(&mut self) {
        let today = Utc::now().format("%Y-%m-%d").to_string();
        if today == self.current_date {
            return;
        }
        info!(old = %self.current_date, new = %today, "UTC date rolled — resetting daily risk state");
        self.current_date = today;
        self.state.governor.lock().reset_daily();
        self.state.positions.lock().reset_daily_pnl();
        if let Err(e) = self.state.persist_positions() {
            warn!(error = %e, "position snapshot write failed at daily roll");
        }
    }

    fn max_vol_score(&self) -> f64 {
        self.vol_scores.iter().cloned().fold(0.0, f64::max)
    }

    fn remember_fill_pnl(&mut self, exec_id: &str, pnl: f64) {
        if self.fill_pnl.len() >= MAX_FILL_PNL_RECORDS {
            self.fill_pnl.clear(); // busts reference recent fills only
        }
        self.fill_pnl.insert(exec_id.to_string(), pnl);
    }

    // -------------------------------------------------------------------------
    // Journal helpers
    // -------------------------------------------------------------------------

    fn journal_tick(&self, snap: &MarketSnapshot) {
        let payload = TickEvent {
            symbol: snap.symbol,
            bid: snap.bid,
            ask: snap.ask,
            ofi: snap.ofi,
        }
        .encode();
        if let Err(e) = self
            .state
            .journal
            .lock()
            .append(EventKind::Tick, snap.timestamp_ns, &payload)
        {
            warn!(error = %e, "journal tick append failed");
        }
    }

    fn journal_intent(&self, intent: &AllocatedIntent, causal_id: u64) {
        let payload = IntentEvent {
            symbol: intent.symbol,
            side: intent.side,
            engine: intent.source_engine,
            quantity: intent.quantity,
            confidence: intent.confidence,
            causal_id,
        }
        .encode();
        if let Err(e) = self
            .state
            .journal
            .lock()
            .append(EventKind::Intent, now_ns(), &payload)
        {
            warn!(error = %e, "journal intent append failed");
        }
    }

    fn journal_execution(&self, update: &crate::exec::OrderUpdate, now: u64) {
        let payload = ExecutionEvent {
            symbol: update.symbol,
            side: update.side,
            quantity: update.fill_qty,
            price: update.fill_price,
            causal_id: update.causal_id,
        }
        .encode();
        if let Err(e) = self
            .state
            .journal
            .lock()
            .append(EventKind::Execution, now, &payload)
        {
            warn!(error = %e, "journal execution append failed");
        }
    }

    fn journal_risk(&self, now: u64) {
        let (daily_pnl, halted, losses) = {
            let governor = self.state.governor.lock();
            (
                governor.metrics().daily_pnl,
                governor.is_trading_halted(),
                governor.loss_cluster().consecutive_losses(),
            )
        };
        let payload = RiskEvent {
            daily_pnl,
            consecutive_losses: losses,
            volatility_score: self.max_vol_score(),
            halted,
        }
        .encode();
        if let Err(e) = self
            .state
            .journal
            .lock()
            .append(EventKind::Risk, now, &payload)
        {
            warn!(error = %e, "journal risk append failed");
        }
    }
}

/// Pump both session channels and the housekeeping timer until shutdown.
pub async fn run_strategy(
    state: Arc<EngineState>,
    mut md_rx: mpsc::Receiver<MarketSnapshot>,
    mut exec_rx: mpsc::Receiver<ExecEvent>,
    order_tx: mpsc::Sender<OutboundOrder>,
) {
    let watchdog = Watchdog::new(&state.data_dir);
    let mut strategy = StrategyLoop::new(state.clone(), order_tx);
    let mut timer = tokio::time::interval(Duration::from_secs(1));

    info!("strategy loop running");
    loop {
        if !state.is_running() {
            break;
        }
        tokio::select! {
            snapshot = md_rx.recv() => match snapshot {
                Some(snap) => strategy.on_market_snapshot(snap),
                None => break,
            },
            event = exec_rx.recv() => match event {
                Some(ev) => strategy.on_exec_event(ev),
                None => break,
            },
            _ = timer.tick() => {
                strategy.on_timer();
                watchdog.beat();
                state.publish_snapshot();
                state.write_snapshot_file();
            }
        }
    }
    info!("strategy loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::exec::orders::ExecReport;
    use crate::types::Side;

    fn test_setup() -> (StrategyLoop, mpsc::Receiver<OutboundOrder>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let state = Arc::new(EngineState::new(EngineConfig::default(), dir.path()).unwrap());
        let (order_tx, order_rx) = mpsc::channel(16);
        (StrategyLoop::new(state, order_tx), order_rx, dir)
    }

    fn snap(symbol: Symbol, mid: f64, ofi: f64, ts_ns: u64) -> MarketSnapshot {
        MarketSnapshot {
            symbol,
            bid: mid - 0.1,
            ask: mid + 0.1,
            mid,
            spread: 0.2,
            ofi,
            timestamp_ns: ts_ns,
        }
    }

    fn fill_report(exec_id: &str, cl_ord_id: &str, side: char, qty: f64, px: f64) -> ExecEvent {
        let raw = format!(
            "35=8\x0117={exec_id}\x0111={cl_ord_id}\x01150=F\x0155=XAUUSD\x0154={side}\x0132={qty}\x0131={px}\x01"
        );
        ExecEvent::Report(
            ExecReport::parse(&crate::fix::message::FixMessage::parse(raw.as_bytes())).unwrap(),
        )
    }

    #[test]
    fn ticks_flow_without_orders_when_flat_signals() {
        let (mut s, mut order_rx, _dir) = test_setup();
        // flat prices produce no intents and no orders
        for i in 0..50u64 {
            s.on_market_snapshot(snap(Symbol::Xau, 2000.0, 0.0, i * 1_000_000_000));
        }
        assert!(order_rx.try_recv().is_err());
    }

    #[test]
    fn fill_lifecycle_updates_positions_risk_and_persistence() {
        let (mut s, _order_rx, dir) = test_setup();

        // register the order the fills will reference
        s.state.orders.lock().register(
            "CHM-1",
            1,
            Symbol::Xau,
            Side::Buy,
            1.0,
            Some(2000.0),
            true,
            EngineKind::Structure,
            1,
        );
        s.state.latency.on_submit(1, Symbol::Xau, 0, 1, 2000.0, 1.0);

        s.on_exec_event(fill_report("X1", "CHM-1", '1', 1.0, 2000.0));
        assert!(s.state.positions.lock().position(Symbol::Xau).is_some());
        assert!(dir.path().join(crate::persist::SNAPSHOT_FILE).exists());
        assert_eq!(
            s.state.allocator.lock().global_exposure(),
            2000.0,
            "open fill must register exposure"
        );

        // closing sell at a profit
        s.state.orders.lock().register(
            "CHM-2",
            2,
            Symbol::Xau,
            Side::Sell,
            1.0,
            None,
            false,
            EngineKind::Structure,
            2,
        );
        s.state.latency.on_submit(2, Symbol::Xau, 0, 2, 2005.0, 1.0);
        s.on_exec_event(fill_report("X2", "CHM-2", '2', 1.0, 2005.0));

        assert!(s.state.positions.lock().position(Symbol::Xau).is_none());
        assert!((s.state.positions.lock().daily_pnl() - 5.0).abs() < 1e-9);
        assert_eq!(s.state.allocator.lock().global_exposure(), 0.0);
        assert_eq!(
            s.state.trade_count.load(std::sync::atomic::Ordering::Relaxed),
            1
        );
        assert_eq!(
            s.state.performance.metrics(EngineKind::Structure).trades,
            1
        );
    }

    #[test]
    fn bust_scenario_reverses_position_and_pnl() {
        // Submit ExecID=X100 (BUY 1.0 @ 2000) closing a short with +5 pnl;
        // bust with RefExecID=X100 restores the prior state.
        let (mut s, _order_rx, _dir) = test_setup();

        // the short being closed
        s.state
            .positions
            .lock()
            .apply_fill(Symbol::Xau, Side::Sell, 1.0, 2005.0, 1);
        s.state.orders.lock().register(
            "CHM-1",
            1,
            Symbol::Xau,
            Side::Buy,
            1.0,
            None,
            false,
            EngineKind::Structure,
            1,
        );
        s.state.latency.on_submit(1, Symbol::Xau, 0, 1, 2000.0, 1.0);
        s.on_exec_event(fill_report("X100", "CHM-1", '1', 1.0, 2000.0));
        assert!((s.state.positions.lock().daily_pnl() - 5.0).abs() < 1e-9);
        assert!(s.state.positions.lock().position(Symbol::Xau).is_none());

        // bust arrives with the recorded fill details
        let bust_report = ExecReport::parse(&crate::fix::message::FixMessage::parse(
            b"35=8\x0117=B1\x0119=X100\x0111=CHM-1\x01150=H\x0155=XAUUSD\x01",
        ))
        .unwrap();
        s.on_exec_event(ExecEvent::Bust {
            ref_exec_id: "X100".into(),
            fill: FillRecord { quantity: 1.0, price: 2000.0, side: Side::Buy },
            report: bust_report,
        });

        let pos = s.state.positions.lock().position(Symbol::Xau).unwrap();
        assert_eq!(pos.side, Side::Sell);
        assert_eq!(pos.quantity, 1.0);
        assert!(s.state.positions.lock().daily_pnl().abs() < 1e-9);
    }

    #[test]
    fn reject_feeds_policy_reject_rate() {
        let (mut s, _order_rx, _dir) = test_setup();
        s.state.orders.lock().register(
            "CHM-1",
            1,
            Symbol::Xau,
            Side::Buy,
            1.0,
            Some(2000.0),
            true,
            EngineKind::Hft,
            1,
        );
        s.state.latency.on_submit(1, Symbol::Xau, 0, 1, 2000.0, 1.0);

        let raw = b"35=8\x0117=R1\x0111=CHM-1\x01150=8\x0155=XAUUSD\x0154=1\x0158=insufficient margin\x01";
        let report = ExecReport::parse(&crate::fix::message::FixMessage::parse(raw)).unwrap();
        s.on_exec_event(ExecEvent::Report(report));

        assert_eq!(s.state.orders.lock().rejected_count(), 1);
        assert!(s.state.reject_rate.lock().rate() > 0.0);
        assert_eq!(s.state.latency.inflight_count(), 0, "reject retires the record");
    }

    #[test]
    fn capital_anomaly_triggers_shutdown_once() {
        let (mut s, _order_rx, _dir) = test_setup();
        // drive exposure past 105% of the configured cap (16k * 1.05)
        s.state.orders.lock().register(
            "CHM-1",
            1,
            Symbol::Xau,
            Side::Buy,
            9.0,
            None,
            false,
            EngineKind::Structure,
            1,
        );
        s.state.latency.on_submit(1, Symbol::Xau, 0, 1, 2000.0, 9.0);
        s.on_exec_event(fill_report("X1", "CHM-1", '1', 9.0, 2000.0));

        assert!(s.state.anomaly.is_emergency_active());
        assert!(!s.state.is_running(), "emergency hook shuts the engine down");
    }
}
