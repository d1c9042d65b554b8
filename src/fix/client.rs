// =============================================================================
// FIX session run-loops — QUOTE and TRADE
// =============================================================================
//
// One async task per session. Each `run_*` call owns one connection attempt:
// connect, log on, pump messages until a fatal condition, then return so the
// caller can apply backoff and reconnect. Session state (sequences, dedup,
// fill history) lives outside these calls and survives reconnects.
//
// Message flow after an accepted QUOTE logon: SecurityListRequest, then the
// MarketDataRequest immediately after — the subscription must not block on
// the SecurityList response.
// =============================================================================

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::app_state::EngineState;
use crate::exec::emitter::OutboundOrder;
use crate::exec::orders::{ExecKind, ExecReport};
use crate::market::handler::MarketDataHandler;
use crate::market::MarketSnapshot;
use crate::types::now_ns;

use super::message::{
    build_heartbeat, build_logon, build_logout, build_market_data_request, build_new_order_single,
    build_resend_request, build_security_list_request, tags, FixMessage, SessionIdentity,
};
use super::session::{FillRecord, SessionState};
use super::transport::{FixTransport, TransportError};

/// Read poll granularity; housekeeping (heartbeats, timeouts, outbound
/// orders) runs between reads at this cadence.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Execution-side events forwarded to the strategy loop, already
/// de-duplicated and bust-resolved against the session fill history.
#[derive(Debug, Clone)]
pub enum ExecEvent {
    /// A fresh (non-duplicate) execution report.
    Report(ExecReport),
    /// A trade bust whose referenced fill was found and removed.
    Bust {
        ref_exec_id: String,
        fill: FillRecord,
        report: ExecReport,
    },
    /// The TRADE session logged on; recovered positions can reconcile.
    SessionUp,
}

pub struct SessionRuntime {
    identity: SessionIdentity,
    transport: FixTransport,
    framer: super::framer::InboundFramer,
    last_outbound: Instant,
    heartbeat_interval: u32,
}

impl SessionRuntime {
    async fn send(&mut self, frame: Vec<u8>) -> Result<()> {
        self.transport
            .write_all(&frame)
            .await
            .context("outbound write failed")?;
        self.last_outbound = Instant::now();
        Ok(())
    }

    /// Emit an own-side heartbeat after `heartbeat_interval` of outbound
    /// silence.
    async fn maybe_heartbeat(&mut self, session: &mut SessionState) -> Result<()> {
        if self.last_outbound.elapsed().as_secs() >= u64::from(self.heartbeat_interval) {
            let hb = build_heartbeat(&self.identity, session.next_outbound_seq(), None);
            self.send(hb).await?;
        }
        Ok(())
    }
}

async fn connect_and_logon(
    state: &EngineState,
    session: &mut SessionState,
    port: u16,
) -> Result<SessionRuntime> {
    let fix = &state.config.fix;
    let identity = SessionIdentity {
        sender_comp_id: fix.sender_comp_id.clone(),
        target_comp_id: fix.target_comp_id.clone(),
        sub_id: session.kind().sub_id().to_string(),
    };

    let transport = FixTransport::connect(&fix.host, port).await?;
    let mut runtime = SessionRuntime {
        identity,
        transport,
        framer: super::framer::InboundFramer::new(),
        last_outbound: Instant::now(),
        heartbeat_interval: fix.heartbeat_interval,
    };

    let logon = build_logon(
        &runtime.identity,
        session.next_outbound_seq(),
        fix.heartbeat_interval,
        fix.reset_seq_num,
        &fix.username,
        &fix.password,
    );
    runtime.send(logon).await?;
    info!(session = %session.kind(), port, "logon sent");
    Ok(runtime)
}

/// Shared per-frame admission: liveness stamp, SendingTime validation,
/// ResetSeqNumFlag handling, and the sequence state machine. Returns the
/// parsed message when its application payload should be processed.
async fn admit_frame(
    runtime: &mut SessionRuntime,
    session: &mut SessionState,
    frame: &[u8],
) -> Result<Option<FixMessage>> {
    let msg = FixMessage::parse(frame);
    let now = now_ns();
    session.note_inbound(now);

    // SendingTime regression is fatal and must not advance the sequence.
    runtime
        .framer
        .validate_sending_time(&msg)
        .context("SendingTime validation failed")?;

    // An accepted Logon bearing 141=Y resets both sides to 1 before its own
    // sequence number is judged.
    if msg.msg_type() == Some("A") && msg.get(tags::RESET_SEQ_NUM_FLAG) == Some("Y") {
        session.reset_sequences_on_logon(now);
    }

    let Some(seq) = msg.seq_num() else {
        warn!(session = %session.kind(), "message without MsgSeqNum — skipped");
        return Ok(None);
    };

    let decision = session.on_inbound_seq(seq, now);
    if let Some((begin, end)) = decision.resend {
        let req = build_resend_request(&runtime.identity, session.next_outbound_seq(), begin, end);
        runtime.send(req).await?;
    }
    if !decision.process {
        return Ok(None);
    }
    Ok(Some(msg))
}

// ---------------------------------------------------------------------------
// QUOTE session
// ---------------------------------------------------------------------------

pub async fn run_quote_session(
    state: Arc<EngineState>,
    session: &mut SessionState,
    md_tx: &mpsc::Sender<MarketSnapshot>,
) -> Result<()> {
    let mut runtime = connect_and_logon(&state, session, state.config.fix.port).await?;
    let mut handler = MarketDataHandler::new();
    let mut buf = [0u8; 8192];

    while state.is_running() {
        if session.heartbeat_timed_out(now_ns(), runtime.heartbeat_interval) {
            bail!("QUOTE heartbeat timeout — no inbound traffic");
        }
        runtime.maybe_heartbeat(session).await?;

        let n = match tokio::time::timeout(POLL_INTERVAL, runtime.transport.read(&mut buf)).await {
            Err(_) => continue,
            Ok(Err(TransportError::Closed)) => bail!("QUOTE connection closed by peer"),
            Ok(Err(e)) => return Err(e).context("QUOTE read failed"),
            Ok(Ok(n)) => n,
        };

        runtime.framer.push_bytes(&buf[..n]);
        let frames = runtime
            .framer
            .next_frames()
            .context("QUOTE framing failure")?;

        for frame in frames {
            let Some(msg) = admit_frame(&mut runtime, session, &frame).await? else {
                continue;
            };
            match msg.msg_type() {
                Some("A") => {
                    info!("QUOTE logon accepted");
                    let list =
                        build_security_list_request(&runtime.identity, session.next_outbound_seq());
                    runtime.send(list).await?;
                    // subscribe immediately; the SecurityList reply is informational
                    let md =
                        build_market_data_request(&runtime.identity, session.next_outbound_seq());
                    runtime.send(md).await?;
                }
                Some("y") => debug!("security list received"),
                Some("W") | Some("X") => {
                    if let Some(snapshot) = handler.on_market_data(&msg, &state.market, now_ns()) {
                        if md_tx.send(snapshot).await.is_err() {
                            bail!("strategy loop gone — shutting down QUOTE session");
                        }
                    }
                }
                Some("1") => {
                    let test_req_id = msg.get(tags::TEST_REQ_ID).map(str::to_string);
                    let hb = build_heartbeat(
                        &runtime.identity,
                        session.next_outbound_seq(),
                        test_req_id.as_deref(),
                    );
                    runtime.send(hb).await?;
                }
                Some("0") => {} // liveness already noted
                Some("3") => warn!(text = ?msg.get(tags::TEXT), "QUOTE session-level reject"),
                Some("5") => {
                    info!("QUOTE logout received — acknowledging");
                    let out = build_logout(&runtime.identity, session.next_outbound_seq());
                    runtime.send(out).await.ok();
                    session.save_checkpoint(&state.data_dir).ok();
                    return Ok(());
                }
                other => debug!(msg_type = ?other, "unhandled QUOTE message"),
            }
        }
    }

    // cooperative shutdown: polite logout, checkpoint, close
    let out = build_logout(&runtime.identity, session.next_outbound_seq());
    runtime.send(out).await.ok();
    session.save_checkpoint(&state.data_dir).ok();
    runtime.transport.shutdown().await;
    Ok(())
}

// ---------------------------------------------------------------------------
// TRADE session
// ---------------------------------------------------------------------------

pub async fn run_trade_session(
    state: Arc<EngineState>,
    session: &mut SessionState,
    exec_tx: &mpsc::Sender<ExecEvent>,
    order_rx: &mut mpsc::Receiver<OutboundOrder>,
) -> Result<()> {
    let mut runtime = connect_and_logon(&state, session, state.config.fix.trade_port).await?;
    let mut buf = [0u8; 8192];

    while state.is_running() {
        if session.heartbeat_timed_out(now_ns(), runtime.heartbeat_interval) {
            bail!("TRADE heartbeat timeout — no inbound traffic");
        }
        runtime.maybe_heartbeat(session).await?;

        // drain pending outbound orders before the next read
        while let Ok(order) = order_rx.try_recv() {
            let frame = build_new_order_single(
                &runtime.identity,
                session.next_outbound_seq(),
                &order.spec,
            );
            session.register_order(&order.spec.cl_ord_id);
            runtime.send(frame).await?;
        }

        let n = match tokio::time::timeout(POLL_INTERVAL, runtime.transport.read(&mut buf)).await {
            Err(_) => continue,
            Ok(Err(TransportError::Closed)) => bail!("TRADE connection closed by peer"),
            Ok(Err(e)) => return Err(e).context("TRADE read failed"),
            Ok(Ok(n)) => n,
        };

        runtime.framer.push_bytes(&buf[..n]);
        let frames = runtime
            .framer
            .next_frames()
            .context("TRADE framing failure")?;

        for frame in frames {
            let Some(msg) = admit_frame(&mut runtime, session, &frame).await? else {
                continue;
            };
            match msg.msg_type() {
                Some("A") => {
                    info!("TRADE logon accepted");
                    let _ = exec_tx.send(ExecEvent::SessionUp).await;
                }
                Some("8") => {
                    if let Some(event) = triage_execution_report(session, &msg) {
                        if exec_tx.send(event).await.is_err() {
                            bail!("strategy loop gone — shutting down TRADE session");
                        }
                    }
                }
                Some("1") => {
                    let test_req_id = msg.get(tags::TEST_REQ_ID).map(str::to_string);
                    let hb = build_heartbeat(
                        &runtime.identity,
                        session.next_outbound_seq(),
                        test_req_id.as_deref(),
                    );
                    runtime.send(hb).await?;
                }
                Some("0") => {}
                Some("3") => {
                    warn!(text = ?msg.get(tags::TEXT), "TRADE session-level reject");
                    state.reject_rate.lock().record(true);
                }
                Some("5") => {
                    info!("TRADE logout received — acknowledging");
                    let out = build_logout(&runtime.identity, session.next_outbound_seq());
                    runtime.send(out).await.ok();
                    session.save_checkpoint(&state.data_dir).ok();
                    return Ok(());
                }
                other => debug!(msg_type = ?other, "unhandled TRADE message"),
            }
        }
    }

    let out = build_logout(&runtime.identity, session.next_outbound_seq());
    runtime.send(out).await.ok();
    session.save_checkpoint(&state.data_dir).ok();
    runtime.transport.shutdown().await;
    Ok(())
}

/// Session-layer triage for a 35=8: parse, de-duplicate by ExecID, maintain
/// the fill history, and resolve trade busts against it. Everything that
/// survives is forwarded for application.
fn triage_execution_report(session: &mut SessionState, msg: &FixMessage) -> Option<ExecEvent> {
    let report = match ExecReport::parse(msg) {
        Some(r) => r,
        None => {
            warn!("execution report without ExecID — skipped");
            return None;
        }
    };

    if report.kind == ExecKind::TradeBust {
        let Some(ref_exec_id) = report.ref_exec_id.clone() else {
            warn!(exec_id = %report.exec_id, "trade bust without RefExecID — ignored");
            return None;
        };
        return match session.take_fill(&ref_exec_id) {
            Some(fill) => Some(ExecEvent::Bust { ref_exec_id, fill, report }),
            None => {
                // never synthesize a reversal for a fill we never recorded
                warn!(ref_exec_id = %ref_exec_id, "trade bust references unknown ExecID — ignored");
                None
            }
        };
    }

    // PossDup replays, resends and retransmits all fall to the same dedup set.
    if !session.register_exec(&report.exec_id) {
        debug!(exec_id = %report.exec_id, poss_dup = report.poss_dup, "duplicate execution dropped");
        return None;
    }

    if matches!(report.kind, ExecKind::PartialFill | ExecKind::Fill) {
        if let (Some(qty), Some(price), Some(side)) =
            (report.last_qty, report.last_px, report.side)
        {
            session.record_fill(
                &report.exec_id,
                FillRecord { quantity: qty, price, side },
            );
        }
    }

    Some(ExecEvent::Report(report))
}
