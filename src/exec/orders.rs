// =============================================================================
// Order tracker — execution-report application with a strict state graph
// =============================================================================
//
// Order state transitions are driven exclusively by execution reports and
// enforced against the allowed graph:
//
//   NEW -> ACKED -> (PARTIAL)* -> FILLED | CANCELED | REJECTED | BUSTED
//
// Anything else is a broker protocol violation: logged, not applied.
// ExecID de-duplication happens in the session layer before reports reach
// this tracker.
// =============================================================================

use std::collections::HashMap;

use tracing::{info, warn};

use crate::fix::message::{tags, FixMessage};
use crate::types::{EngineKind, Side, Symbol};

// ---------------------------------------------------------------------------
// Parsed execution report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecKind {
    Ack,
    PartialFill,
    Fill,
    Canceled,
    Rejected,
    TradeBust,
    Other,
}

#[derive(Debug, Clone)]
pub struct ExecReport {
    pub exec_id: String,
    pub cl_ord_id: String,
    pub kind: ExecKind,
    pub symbol: Option<Symbol>,
    pub side: Option<Side>,
    pub last_qty: Option<f64>,
    pub last_px: Option<f64>,
    pub ref_exec_id: Option<String>,
    pub poss_dup: bool,
    pub text: Option<String>,
}

impl ExecReport {
    /// Parse a 35=8 message. Returns `None` when the report lacks the
    /// identifiers every downstream consumer needs.
    pub fn parse(msg: &FixMessage) -> Option<ExecReport> {
        let exec_id = msg.get(tags::EXEC_ID)?.to_string();
        let cl_ord_id = msg.get(tags::CL_ORD_ID).unwrap_or_default().to_string();

        let kind = match msg.get(tags::EXEC_TYPE) {
            Some("0") => ExecKind::Ack,
            Some("1") => ExecKind::PartialFill,
            Some("2") | Some("F") => ExecKind::Fill,
            Some("4") => ExecKind::Canceled,
            Some("8") => ExecKind::Rejected,
            Some("H") => ExecKind::TradeBust,
            _ => {
                // fall back to OrdStatus for brokers that omit 150
                match msg.get(tags::ORD_STATUS) {
                    Some("0") => ExecKind::Ack,
                    Some("1") => ExecKind::PartialFill,
                    Some("2") => ExecKind::Fill,
                    Some("4") => ExecKind::Canceled,
                    Some("8") => ExecKind::Rejected,
                    _ => ExecKind::Other,
                }
            }
        };

        Some(ExecReport {
            exec_id,
            cl_ord_id,
            kind,
            symbol: msg.get(tags::SYMBOL).and_then(Symbol::from_fix),
            side: msg
                .get(tags::SIDE)
                .and_then(|s| s.chars().next())
                .and_then(Side::from_fix),
            last_qty: msg.get_f64(tags::LAST_QTY),
            last_px: msg.get_f64(tags::LAST_PX),
            ref_exec_id: msg.get(tags::REF_EXEC_ID).map(str::to_string),
            poss_dup: msg.poss_dup(),
            text: msg.get(tags::TEXT).map(str::to_string),
        })
    }
}

// ---------------------------------------------------------------------------
// Order records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderState {
    New,
    Acked,
    Partial,
    Filled,
    Canceled,
    Rejected,
    Busted,
}

impl OrderState {
    fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderState::Filled | OrderState::Canceled | OrderState::Rejected | OrderState::Busted
        )
    }

    /// The allowed transition graph.
    fn can_transition_to(self, next: OrderState) -> bool {
        use OrderState::*;
        match (self, next) {
            (New, Acked) | (New, Rejected) => true,
            // fast brokers fill without a separate ack
            (New, Partial) | (New, Filled) | (New, Canceled) => true,
            (Acked, Partial) | (Acked, Filled) | (Acked, Canceled) | (Acked, Rejected) => true,
            (Partial, Partial) | (Partial, Filled) | (Partial, Canceled) => true,
            // a bust reverses an already-filled order
            (Filled, Busted) | (Partial, Busted) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrderRecord {
    pub cl_ord_id: String,
    pub causal_id: u64,
    pub symbol: Symbol,
    pub side: Side,
    pub quantity: f64,
    pub limit_price: Option<f64>,
    pub post_only: bool,
    pub source_engine: EngineKind,
    pub send_ts_ns: u64,
    pub state: OrderState,
    pub filled_qty: f64,
    pub avg_fill_price: f64,
}

/// What one applied report means for the rest of the pipeline.
#[derive(Debug, Clone)]
pub struct OrderUpdate {
    pub causal_id: u64,
    pub cl_ord_id: String,
    pub symbol: Symbol,
    pub side: Side,
    pub source_engine: EngineKind,
    pub kind: ExecKind,
    pub fill_qty: f64,
    pub fill_price: f64,
    /// The order reached a terminal state with this report.
    pub terminal: bool,
}

pub struct OrderTracker {
    orders: HashMap<String, OrderRecord>,
    rejected_count: u64,
    protocol_violations: u64,
}

impl OrderTracker {
    pub fn new() -> Self {
        Self {
            orders: HashMap::new(),
            rejected_count: 0,
            protocol_violations: 0,
        }
    }

    /// Register a just-sent order in state NEW.
    #[allow(clippy::too_many_arguments)]
    pub fn register(
        &mut self,
        cl_ord_id: &str,
        causal_id: u64,
        symbol: Symbol,
        side: Side,
        quantity: f64,
        limit_price: Option<f64>,
        post_only: bool,
        source_engine: EngineKind,
        send_ts_ns: u64,
    ) {
        self.orders.insert(
            cl_ord_id.to_string(),
            OrderRecord {
                cl_ord_id: cl_ord_id.to_string(),
                causal_id,
                symbol,
                side,
                quantity,
                limit_price,
                post_only,
                source_engine,
                send_ts_ns,
                state: OrderState::New,
                filled_qty: 0.0,
                avg_fill_price: 0.0,
            },
        );
    }

    /// Apply a de-duplicated execution report.
    pub fn apply_report(&mut self, report: &ExecReport) -> Option<OrderUpdate> {
        let next_state = match report.kind {
            ExecKind::Ack => OrderState::Acked,
            ExecKind::PartialFill => OrderState::Partial,
            ExecKind::Fill => OrderState::Filled,
            ExecKind::Canceled => OrderState::Canceled,
            ExecKind::Rejected => OrderState::Rejected,
            ExecKind::TradeBust | ExecKind::Other => return None, // handled elsewhere
        };

        let order = match self.orders.get_mut(&report.cl_ord_id) {
            Some(o) => o,
            None => {
                warn!(cl_ord_id = %report.cl_ord_id, "execution report for unknown order — skipped");
                return None;
            }
        };

        if !order.state.can_transition_to(next_state) {
            self.protocol_violations += 1;
            warn!(
                cl_ord_id = %order.cl_ord_id,
                from = ?order.state,
                to = ?next_state,
                "illegal order state transition — report ignored"
            );
            return None;
        }

        let mut fill_qty = 0.0;
        let mut fill_price = 0.0;
        if matches!(report.kind, ExecKind::PartialFill | ExecKind::Fill) {
            let (Some(qty), Some(px)) = (report.last_qty, report.last_px) else {
                warn!(
                    cl_ord_id = %order.cl_ord_id,
                    "fill report without quantity/price — skipped"
                );
                return None;
            };
            fill_qty = qty;
            fill_price = px;
            let prev = order.filled_qty;
            order.filled_qty += qty;
            order.avg_fill_price = if order.filled_qty > 0.0 {
                (order.avg_fill_price * prev + px * qty) / order.filled_qty
            } else {
                px
            };
        }

        if report.kind == ExecKind::Rejected {
            self.rejected_count += 1;
            info!(
                cl_ord_id = %order.cl_ord_id,
                reason = report.text.as_deref().unwrap_or("unspecified"),
                "order rejected by broker"
            );
        }

        order.state = next_state;
        let update = OrderUpdate {
            causal_id: order.causal_id,
            cl_ord_id: order.cl_ord_id.clone(),
            symbol: order.symbol,
            side: order.side,
            source_engine: order.source_engine,
            kind: report.kind,
            fill_qty,
            fill_price,
            terminal: next_state.is_terminal(),
        };

        if next_state.is_terminal() {
            // retain terminal orders for the bust path; prune opportunistically
            self.prune_terminal(10_000);
        }

        Some(update)
    }

    /// Mark the order behind a busted fill. The position/PnL reversal is the
    /// caller's job (it owns the recorded fill details).
    pub fn mark_busted(&mut self, cl_ord_id: &str) {
        if let Some(order) = self.orders.get_mut(cl_ord_id) {
            if order.state.can_transition_to(OrderState::Busted) {
                order.state = OrderState::Busted;
            }
        }
    }

    pub fn get(&self, cl_ord_id: &str) -> Option<&OrderRecord> {
        self.orders.get(cl_ord_id)
    }

    pub fn open_orders(&self) -> impl Iterator<Item = &OrderRecord> {
        self.orders.values().filter(|o| !o.state.is_terminal())
    }

    pub fn rejected_count(&self) -> u64 {
        self.rejected_count
    }

    pub fn protocol_violations(&self) -> u64 {
        self.protocol_violations
    }

    fn prune_terminal(&mut self, keep: usize) {
        if self.orders.len() <= keep {
            return;
        }
        let mut terminal: Vec<(String, u64)> = self
            .orders
            .iter()
            .filter(|(_, o)| o.state.is_terminal())
            .map(|(id, o)| (id.clone(), o.send_ts_ns))
            .collect();
        terminal.sort_by_key(|(_, ts)| *ts);
        let excess = self.orders.len() - keep;
        for (id, _) in terminal.into_iter().take(excess) {
            self.orders.remove(&id);
        }
    }
}

impl Default for OrderTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(exec_id: &str, cl_ord_id: &str, exec_type: &str, qty: Option<f64>, px: Option<f64>) -> ExecReport {
        let mut raw = format!("35=8\x0117={exec_id}\x0111={cl_ord_id}\x01150={exec_type}\x0155=XAUUSD\x0154=1\x01");
        if let Some(q) = qty {
            raw.push_str(&format!("32={q}\x01"));
        }
        if let Some(p) = px {
            raw.push_str(&format!("31={p}\x01"));
        }
        ExecReport::parse(&FixMessage::parse(raw.as_bytes())).unwrap()
    }

    fn tracker_with_order(cl_ord_id: &str) -> OrderTracker {
        let mut t = OrderTracker::new();
        t.register(
            cl_ord_id,
            7,
            Symbol::Xau,
            Side::Buy,
            2.0,
            Some(2000.0),
            true,
            EngineKind::Structure,
            100,
        );
        t
    }

    #[test]
    fn parse_extracts_core_fields() {
        let r = report("X1", "CHM-1", "F", Some(1.5), Some(2001.0));
        assert_eq!(r.exec_id, "X1");
        assert_eq!(r.cl_ord_id, "CHM-1");
        assert_eq!(r.kind, ExecKind::Fill);
        assert_eq!(r.symbol, Some(Symbol::Xau));
        assert_eq!(r.side, Some(Side::Buy));
        assert_eq!(r.last_qty, Some(1.5));
    }

    #[test]
    fn parse_requires_exec_id() {
        let msg = FixMessage::parse(b"35=8\x0111=CHM-1\x01150=0\x01");
        assert!(ExecReport::parse(&msg).is_none());
    }

    #[test]
    fn normal_lifecycle_new_ack_partial_fill() {
        let mut t = tracker_with_order("CHM-1");

        let u = t.apply_report(&report("X1", "CHM-1", "0", None, None)).unwrap();
        assert_eq!(u.kind, ExecKind::Ack);
        assert!(!u.terminal);

        let u = t
            .apply_report(&report("X2", "CHM-1", "1", Some(1.0), Some(2000.5)))
            .unwrap();
        assert_eq!(u.kind, ExecKind::PartialFill);
        assert_eq!(u.fill_qty, 1.0);
        assert!(!u.terminal);

        let u = t
            .apply_report(&report("X3", "CHM-1", "F", Some(1.0), Some(2001.5)))
            .unwrap();
        assert!(u.terminal);

        let order = t.get("CHM-1").unwrap();
        assert_eq!(order.state, OrderState::Filled);
        assert_eq!(order.filled_qty, 2.0);
        assert!((order.avg_fill_price - 2001.0).abs() < 1e-9);
    }

    #[test]
    fn fill_after_terminal_state_is_a_violation() {
        let mut t = tracker_with_order("CHM-1");
        t.apply_report(&report("X1", "CHM-1", "4", None, None)).unwrap(); // canceled
        assert!(t
            .apply_report(&report("X2", "CHM-1", "F", Some(1.0), Some(2000.0)))
            .is_none());
        assert_eq!(t.protocol_violations(), 1);
        assert_eq!(t.get("CHM-1").unwrap().state, OrderState::Canceled);
    }

    #[test]
    fn ack_after_fill_is_a_violation() {
        let mut t = tracker_with_order("CHM-1");
        t.apply_report(&report("X1", "CHM-1", "F", Some(2.0), Some(2000.0)))
            .unwrap();
        assert!(t.apply_report(&report("X2", "CHM-1", "0", None, None)).is_none());
    }

    #[test]
    fn fill_without_quantity_is_skipped() {
        let mut t = tracker_with_order("CHM-1");
        assert!(t
            .apply_report(&report("X1", "CHM-1", "1", None, Some(2000.0)))
            .is_none());
        // order state untouched — the message was skipped, not applied
        assert_eq!(t.get("CHM-1").unwrap().state, OrderState::New);
    }

    #[test]
    fn reject_counts_toward_reject_rate() {
        let mut t = tracker_with_order("CHM-1");
        let u = t.apply_report(&report("X1", "CHM-1", "8", None, None)).unwrap();
        assert!(u.terminal);
        assert_eq!(t.rejected_count(), 1);
        assert_eq!(t.get("CHM-1").unwrap().state, OrderState::Rejected);
    }

    #[test]
    fn unknown_order_is_skipped() {
        let mut t = OrderTracker::new();
        assert!(t.apply_report(&report("X1", "GHOST", "0", None, None)).is_none());
    }

    #[test]
    fn bust_marks_filled_order() {
        let mut t = tracker_with_order("CHM-1");
        t.apply_report(&report("X1", "CHM-1", "F", Some(2.0), Some(2000.0)))
            .unwrap();
        t.mark_busted("CHM-1");
        assert_eq!(t.get("CHM-1").unwrap().state, OrderState::Busted);
    }

    #[test]
    fn open_orders_excludes_terminal() {
        let mut t = tracker_with_order("CHM-1");
        t.register(
            "CHM-2",
            8,
            Symbol::Xag,
            Side::Sell,
            1.0,
            None,
            false,
            EngineKind::Hft,
            200,
        );
        t.apply_report(&report("X1", "CHM-1", "F", Some(2.0), Some(2000.0)))
            .unwrap();
        let open: Vec<_> = t.open_orders().map(|o| o.cl_ord_id.clone()).collect();
        assert_eq!(open, vec!["CHM-2".to_string()]);
    }
}
