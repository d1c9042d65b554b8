// =============================================================================
// Order emitter — monotonic client order ids, NewOrderSingle dispatch
// =============================================================================
//
// The emitter turns an approved, sized intent into a concrete order request
// for the TRADE session task (which owns the socket and the outbound
// sequence). Entries rest passively at the touch under POST_ONLY; exits and
// TAKE_ONLY traffic cross as market orders.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::allocator::AllocatedIntent;
use crate::fix::message::NewOrderSingle;
use crate::types::Side;

/// An order request handed to the TRADE session task.
#[derive(Debug, Clone)]
pub struct OutboundOrder {
    pub causal_id: u64,
    pub spec: NewOrderSingle,
}

pub struct OrderEmitter {
    next_id: AtomicU64,
    tx: mpsc::Sender<OutboundOrder>,
}

impl OrderEmitter {
    pub fn new(tx: mpsc::Sender<OutboundOrder>) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            tx,
        }
    }

    pub fn next_cl_ord_id(&self) -> String {
        let n = self.next_id.fetch_add(1, Ordering::Relaxed);
        format!("CHM-{n}")
    }

    /// Build and dispatch the order. Returns the assigned ClOrdID, or `None`
    /// when the TRADE session queue is gone (shutdown).
    pub fn submit(
        &self,
        intent: &AllocatedIntent,
        causal_id: u64,
        bid: f64,
        ask: f64,
        post_only: bool,
    ) -> Option<String> {
        let cl_ord_id = self.next_cl_ord_id();

        // passive entries rest at the touch; aggressive traffic goes market
        let limit_price = if post_only {
            Some(match intent.side {
                Side::Buy => bid,
                Side::Sell => ask,
            })
        } else {
            None
        };

        let order = OutboundOrder {
            causal_id,
            spec: NewOrderSingle {
                cl_ord_id: cl_ord_id.clone(),
                symbol: intent.symbol,
                side: intent.side,
                quantity: intent.quantity,
                limit_price,
                post_only,
            },
        };

        info!(
            cl_ord_id = %cl_ord_id,
            causal_id,
            symbol = %intent.symbol,
            side = %intent.side,
            quantity = intent.quantity,
            post_only,
            is_exit = intent.is_exit,
            "order emitted"
        );

        if self.tx.try_send(order).is_err() {
            warn!(cl_ord_id = %cl_ord_id, "TRADE session queue unavailable — order dropped");
            return None;
        }
        Some(cl_ord_id)
    }
}
