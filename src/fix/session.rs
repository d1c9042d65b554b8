// =============================================================================
// FIX session state — sequences, gap recovery, dedup, heartbeat supervision
// =============================================================================
//
// One `SessionState` per FIX session (QUOTE / TRADE), owned by that session's
// task. Holds everything that must survive message-to-message: sequence
// counters, gap-recovery progress, the resend throttle, the ExecID dedup set
// and the fill history that trade busts reverse against.
//
// The sequence handler is unified across both sessions. The invariant that
// matters most: forward messages are never dropped. Brokers reuse sequence
// numbers after admin resets, and a session that queues or discards forward
// traffic while waiting on a ResendRequest starves itself.
// =============================================================================

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::types::Side;

/// Minimum spacing between ResendRequests, preventing a gap storm.
const RESEND_THROTTLE_NS: u64 = 5_000_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    Quote,
    Trade,
}

impl SessionKind {
    pub fn sub_id(self) -> &'static str {
        match self {
            SessionKind::Quote => "QUOTE",
            SessionKind::Trade => "TRADE",
        }
    }

    /// Sequence checkpoint file for this session.
    pub fn seq_file(self) -> &'static str {
        match self {
            SessionKind::Quote => "quote_seq.dat",
            SessionKind::Trade => "trade_seq.dat",
        }
    }
}

impl std::fmt::Display for SessionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.sub_id())
    }
}

/// A recorded fill, indexed by ExecID so a bust can reverse it.
#[derive(Debug, Clone, Copy)]
pub struct FillRecord {
    pub quantity: f64,
    pub price: f64,
    pub side: Side,
}

/// What the sequence handler decided for one inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeqDecision {
    /// Process the application payload of this message.
    pub process: bool,
    /// Emit `ResendRequest(begin, end)` before continuing.
    pub resend: Option<(u32, u32)>,
}

pub struct SessionState {
    kind: SessionKind,
    gap_recovery_enabled: bool,

    next_outbound_seq: u32,
    expected_inbound_seq: u32,

    gap_recovery_active: bool,
    gap_recovery_target: u32,
    last_resend_request_ns: u64,

    last_inbound_ns: u64,

    seen_exec_ids: HashSet<String>,
    known_orders: HashSet<String>,
    fill_history: HashMap<String, FillRecord>,

    duplicate_drops: u64,
}

impl SessionState {
    pub fn new(kind: SessionKind, gap_recovery_enabled: bool, now_ns: u64) -> Self {
        Self {
            kind,
            gap_recovery_enabled,
            next_outbound_seq: 1,
            expected_inbound_seq: 1,
            gap_recovery_active: false,
            gap_recovery_target: 0,
            last_resend_request_ns: 0,
            last_inbound_ns: now_ns,
            seen_exec_ids: HashSet::new(),
            known_orders: HashSet::new(),
            fill_history: HashMap::new(),
            duplicate_drops: 0,
        }
    }

    pub fn kind(&self) -> SessionKind {
        self.kind
    }

    // -------------------------------------------------------------------------
    // Outbound sequencing
    // -------------------------------------------------------------------------

    pub fn next_outbound_seq(&mut self) -> u32 {
        let seq = self.next_outbound_seq;
        self.next_outbound_seq += 1;
        seq
    }

    pub fn expected_inbound_seq(&self) -> u32 {
        self.expected_inbound_seq
    }

    // -------------------------------------------------------------------------
    // Inbound sequence state machine (unified QUOTE / TRADE)
    // -------------------------------------------------------------------------

    /// Apply the sequence rules to inbound sequence `r`.
    ///
    /// - `r == expected`: process, advance.
    /// - `r < expected`: duplicate, drop without advancing.
    /// - `r > expected` at `expected == 1`: post-reset forward tolerance —
    ///   the broker kept counting across an admin reset; adopt its numbering.
    /// - `r > expected` otherwise: genuine gap. Request the missing range if
    ///   recovery is enabled, not already running, and the throttle allows —
    ///   but process the forward message either way.
    pub fn on_inbound_seq(&mut self, r: u32, now_ns: u64) -> SeqDecision {
        let e = self.expected_inbound_seq;

        if r == e {
            self.expected_inbound_seq = e + 1;
            self.check_gap_recovery_complete(r);
            return SeqDecision { process: true, resend: None };
        }

        if r < e {
            self.duplicate_drops += 1;
            return SeqDecision { process: false, resend: None };
        }

        // r > e from here on.
        if e == 1 {
            info!(session = %self.kind, received = r, "post-reset forward gap tolerated");
            self.expected_inbound_seq = r + 1;
            return SeqDecision { process: true, resend: None };
        }

        let mut resend = None;
        if self.gap_recovery_enabled {
            if !self.gap_recovery_active && self.can_send_resend_request(now_ns) {
                warn!(
                    session = %self.kind,
                    expected = e,
                    received = r,
                    "sequence gap — requesting resend"
                );
                self.gap_recovery_active = true;
                self.gap_recovery_target = r - 1;
                resend = Some((e, r - 1));
            }
        } else {
            info!(session = %self.kind, expected = e, received = r, "forward gap tolerated");
        }

        // Forward messages are processed regardless of recovery state.
        self.expected_inbound_seq = r + 1;
        self.check_gap_recovery_complete(r);
        SeqDecision { process: true, resend }
    }

    fn check_gap_recovery_complete(&mut self, r: u32) {
        if self.gap_recovery_active && r >= self.gap_recovery_target {
            info!(session = %self.kind, through = r, "gap recovery complete");
            self.gap_recovery_active = false;
            self.gap_recovery_target = 0;
        }
    }

    fn can_send_resend_request(&mut self, now_ns: u64) -> bool {
        if now_ns.saturating_sub(self.last_resend_request_ns) >= RESEND_THROTTLE_NS {
            self.last_resend_request_ns = now_ns;
            true
        } else {
            false
        }
    }

    pub fn gap_recovery_active(&self) -> bool {
        self.gap_recovery_active
    }

    pub fn duplicate_drops(&self) -> u64 {
        self.duplicate_drops
    }

    // -------------------------------------------------------------------------
    // Heartbeat supervision
    // -------------------------------------------------------------------------

    /// Refresh the inbound-liveness timestamp. Called for every framed
    /// message; this is the authoritative heartbeat signal.
    pub fn note_inbound(&mut self, now_ns: u64) {
        self.last_inbound_ns = now_ns;
    }

    /// Stale when nothing has been framed within twice the heartbeat interval.
    pub fn heartbeat_timed_out(&self, now_ns: u64, heartbeat_interval_secs: u32) -> bool {
        let silence = now_ns.saturating_sub(self.last_inbound_ns);
        silence > u64::from(heartbeat_interval_secs) * 2 * 1_000_000_000
    }

    // -------------------------------------------------------------------------
    // Resets
    // -------------------------------------------------------------------------

    /// Full reset on reconnect: gap state, dedup sets, throttle and the
    /// heartbeat timer. Leaving the heartbeat timer primed from the previous
    /// connection would trip an immediate timeout on the new one.
    pub fn reset_on_reconnect(&mut self, now_ns: u64) {
        self.gap_recovery_active = false;
        self.gap_recovery_target = 0;
        self.last_resend_request_ns = 0;
        self.seen_exec_ids.clear();
        self.known_orders.clear();
        self.fill_history.clear();
        self.last_inbound_ns = now_ns;
    }

    /// Complete state reset for an accepted Logon with ResetSeqNumFlag=Y.
    /// A partial reset (sequences only) leaves a latent heartbeat timeout and
    /// a stale resend throttle.
    pub fn reset_sequences_on_logon(&mut self, now_ns: u64) {
        info!(session = %self.kind, "ResetSeqNumFlag=Y accepted — full sequence reset");
        self.next_outbound_seq = 1;
        self.expected_inbound_seq = 1;
        self.gap_recovery_active = false;
        self.gap_recovery_target = 0;
        self.last_resend_request_ns = 0;
        self.last_inbound_ns = now_ns;
    }

    // -------------------------------------------------------------------------
    // Execution dedup & fill history (TRADE session)
    // -------------------------------------------------------------------------

    /// Register an ExecID; returns `false` for duplicates (PossDup replays,
    /// resends, broker retransmits) which must produce no downstream effect.
    pub fn register_exec(&mut self, exec_id: &str) -> bool {
        if self.seen_exec_ids.contains(exec_id) {
            self.duplicate_drops += 1;
            return false;
        }
        self.seen_exec_ids.insert(exec_id.to_string());
        true
    }

    pub fn register_order(&mut self, cl_ord_id: &str) {
        self.known_orders.insert(cl_ord_id.to_string());
    }

    pub fn is_known_order(&self, cl_ord_id: &str) -> bool {
        self.known_orders.contains(cl_ord_id)
    }

    pub fn record_fill(&mut self, exec_id: &str, fill: FillRecord) {
        self.fill_history.insert(exec_id.to_string(), fill);
    }

    /// Remove a fill for a trade bust. Also forgets the ExecID so the history
    /// cannot grow a ghost entry if the broker replays the busted report.
    pub fn take_fill(&mut self, exec_id: &str) -> Option<FillRecord> {
        self.seen_exec_ids.remove(exec_id);
        self.fill_history.remove(exec_id)
    }

    // -------------------------------------------------------------------------
    // Sequence checkpoints
    // -------------------------------------------------------------------------

    /// Persist `(next_outbound, expected_inbound)` as two little-endian u32s.
    pub fn save_checkpoint(&self, dir: impl AsRef<Path>) -> std::io::Result<()> {
        let path = self.checkpoint_path(dir);
        let mut bytes = Vec::with_capacity(8);
        bytes.extend_from_slice(&self.next_outbound_seq.to_le_bytes());
        bytes.extend_from_slice(&self.expected_inbound_seq.to_le_bytes());
        std::fs::write(path, bytes)
    }

    /// Restore a checkpoint if one exists. An accepted Logon with 141=Y
    /// supersedes whatever is loaded here.
    pub fn load_checkpoint(&mut self, dir: impl AsRef<Path>) -> bool {
        let path = self.checkpoint_path(dir);
        let Ok(bytes) = std::fs::read(&path) else {
            return false;
        };
        if bytes.len() != 8 {
            warn!(session = %self.kind, path = %path.display(), "invalid sequence checkpoint — ignoring");
            return false;
        }
        self.next_outbound_seq = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        self.expected_inbound_seq = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        info!(
            session = %self.kind,
            outbound = self.next_outbound_seq,
            expected = self.expected_inbound_seq,
            "sequence checkpoint restored"
        );
        true
    }

    fn checkpoint_path(&self, dir: impl AsRef<Path>) -> PathBuf {
        dir.as_ref().join(self.kind.seq_file())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> SessionState {
        SessionState::new(SessionKind::Trade, true, 0)
    }

    const SEC: u64 = 1_000_000_000;

    #[test]
    fn in_order_messages_advance() {
        let mut s = session();
        for seq in 1..=5 {
            let d = s.on_inbound_seq(seq, 0);
            assert!(d.process);
            assert!(d.resend.is_none());
        }
        assert_eq!(s.expected_inbound_seq(), 6);
    }

    #[test]
    fn duplicates_dropped_without_advancing() {
        let mut s = session();
        s.on_inbound_seq(1, 0);
        s.on_inbound_seq(2, 0);
        let d = s.on_inbound_seq(1, 0);
        assert!(!d.process);
        assert_eq!(s.expected_inbound_seq(), 3);
        assert_eq!(s.duplicate_drops(), 1);
    }

    #[test]
    fn post_reset_forward_gap_tolerated() {
        // expected = 1, receive seq = 5: accept, expected -> 6, no resend.
        let mut s = session();
        let d = s.on_inbound_seq(5, 0);
        assert!(d.process);
        assert!(d.resend.is_none());
        assert_eq!(s.expected_inbound_seq(), 6);
    }

    #[test]
    fn genuine_gap_requests_resend_and_still_processes() {
        let mut s = session();
        for seq in 1..=9 {
            s.on_inbound_seq(seq, 0);
        }
        // expected = 10, receive 15
        let d = s.on_inbound_seq(15, 10 * SEC);
        assert!(d.process, "forward message must never be dropped");
        assert_eq!(d.resend, Some((10, 14)));
        assert_eq!(s.expected_inbound_seq(), 16);
    }

    #[test]
    fn resend_throttle_suppresses_second_request() {
        let mut s = session();
        for seq in 1..=9 {
            s.on_inbound_seq(seq, 0);
        }
        let d1 = s.on_inbound_seq(15, 10 * SEC);
        assert!(d1.resend.is_some());
        // gap recovery cleared by r >= target, next gap 2 s later: throttled
        let d2 = s.on_inbound_seq(20, 12 * SEC);
        assert!(d2.process);
        assert!(d2.resend.is_none(), "second request inside 5 s must be throttled");
        assert_eq!(s.expected_inbound_seq(), 21);
    }

    #[test]
    fn gap_recovery_clears_on_reaching_target() {
        let mut s = session();
        for seq in 1..=4 {
            s.on_inbound_seq(seq, 0);
        }
        let d = s.on_inbound_seq(8, 10 * SEC);
        assert_eq!(d.resend, Some((5, 7)));
        // target is 7 and r = 8 >= 7, so recovery completes immediately
        assert!(!s.gap_recovery_active());
    }

    #[test]
    fn gap_recovery_disabled_tolerates_forward() {
        let mut s = SessionState::new(SessionKind::Quote, false, 0);
        for seq in 1..=4 {
            s.on_inbound_seq(seq, 0);
        }
        let d = s.on_inbound_seq(9, 10 * SEC);
        assert!(d.process);
        assert!(d.resend.is_none());
        assert_eq!(s.expected_inbound_seq(), 10);
    }

    #[test]
    fn expected_seq_nondecreasing_until_logon_reset() {
        let mut s = session();
        let mut prev = s.expected_inbound_seq();
        for &seq in &[1, 2, 5, 3, 9, 9, 10, 2, 11] {
            s.on_inbound_seq(seq, 0);
            let e = s.expected_inbound_seq();
            assert!(e >= prev, "expected seq regressed: {prev} -> {e}");
            prev = e;
        }
        s.reset_sequences_on_logon(0);
        assert_eq!(s.expected_inbound_seq(), 1);
    }

    #[test]
    fn logon_reset_clears_gap_state_and_heartbeat() {
        let mut s = session();
        for seq in 1..=4 {
            s.on_inbound_seq(seq, 0);
        }
        s.on_inbound_seq(100, 10 * SEC);
        s.note_inbound(10 * SEC);

        s.reset_sequences_on_logon(100 * SEC);
        assert_eq!(s.expected_inbound_seq(), 1);
        assert!(!s.gap_recovery_active());
        // heartbeat timer re-armed at reset time, not stale from before
        assert!(!s.heartbeat_timed_out(101 * SEC, 30));
        // and the resend throttle restarts: a gap right after reset at e>1
        s.on_inbound_seq(1, 100 * SEC);
        s.on_inbound_seq(2, 100 * SEC);
        let d = s.on_inbound_seq(10, 101 * SEC);
        assert!(d.resend.is_some(), "throttle must be clear after logon reset");
    }

    #[test]
    fn heartbeat_timeout_is_double_interval() {
        let mut s = session();
        s.note_inbound(0);
        assert!(!s.heartbeat_timed_out(59 * SEC, 30));
        assert!(s.heartbeat_timed_out(61 * SEC, 30));
    }

    #[test]
    fn exec_dedup_registers_once() {
        let mut s = session();
        assert!(s.register_exec("X100"));
        assert!(!s.register_exec("X100"));
        assert!(!s.register_exec("X100"));
        assert_eq!(s.duplicate_drops(), 2);
    }

    #[test]
    fn fill_history_supports_bust_then_forgets() {
        let mut s = session();
        s.register_exec("X100");
        s.record_fill("X100", FillRecord { quantity: 1.0, price: 2000.0, side: Side::Buy });

        let fill = s.take_fill("X100").unwrap();
        assert_eq!(fill.quantity, 1.0);
        assert!(s.take_fill("X100").is_none(), "bust must remove the fill");
        // busted ExecID is no longer "seen": a replay re-registers cleanly
        assert!(s.register_exec("X100"));
    }

    #[test]
    fn reconnect_reset_clears_session_state() {
        let mut s = session();
        s.on_inbound_seq(1, 0);
        s.register_exec("X1");
        s.record_fill("X1", FillRecord { quantity: 1.0, price: 1.0, side: Side::Sell });
        s.on_inbound_seq(50, 10 * SEC);

        s.reset_on_reconnect(20 * SEC);
        assert!(!s.gap_recovery_active());
        assert!(s.register_exec("X1"), "dedup set must clear on reconnect");
        assert!(!s.heartbeat_timed_out(21 * SEC, 30));
        // sequences are NOT reset here; that is the checkpoint/logon's job
        assert_eq!(s.expected_inbound_seq(), 51);
    }

    #[test]
    fn checkpoint_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = session();
        for seq in 1..=7 {
            s.on_inbound_seq(seq, 0);
        }
        let _ = s.next_outbound_seq();
        let _ = s.next_outbound_seq();
        s.save_checkpoint(dir.path()).unwrap();

        let mut restored = SessionState::new(SessionKind::Trade, true, 0);
        assert!(restored.load_checkpoint(dir.path()));
        assert_eq!(restored.expected_inbound_seq(), 8);
        assert_eq!(restored.next_outbound_seq(), 3);
    }

    #[test]
    fn truncated_checkpoint_ignored() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(SessionKind::Trade.seq_file()), [1, 2, 3]).unwrap();
        let mut s = session();
        assert!(!s.load_checkpoint(dir.path()));
        assert_eq!(s.expected_inbound_seq(), 1);
    }
}
