// =============================================================================
// Latency attribution — per-causal-id lifecycle timing and slippage
// =============================================================================
//
// A record is created on submit, stamped by ack/fill/cancel/reject, published
// on the terminal event, and retired. Derived figures:
//
//   decision_to_send = send - decision
//   rtt              = ack - send
//   queue_wait       = fill - ack
//   decision_to_fill = fill - decision
//   slippage_bps     = (fill_px - submit_px) / submit_px * 1e4
//
// Aggregate EMAs (alpha = 0.1) feed the execution policy governor and the
// adaptive optimizer.
// =============================================================================

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::types::Symbol;

const EMA_ALPHA: f64 = 0.1;

#[derive(Debug, Clone, Copy)]
pub struct LatencyRecord {
    pub causal_id: u64,
    pub symbol: Symbol,
    pub decision_ts_ns: u64,
    pub send_ts_ns: u64,
    pub ack_ts_ns: u64,
    pub fill_ts_ns: u64,
    pub cancel_ts_ns: u64,
    pub submit_price: f64,
    pub submit_qty: f64,
    pub fill_price: f64,
    pub fill_qty: f64,
    pub rejected: bool,
}

impl LatencyRecord {
    pub fn decision_to_send_ns(&self) -> u64 {
        self.send_ts_ns.saturating_sub(self.decision_ts_ns)
    }

    /// Send-to-ack round trip.
    pub fn rtt_ns(&self) -> u64 {
        self.ack_ts_ns.saturating_sub(self.send_ts_ns)
    }

    pub fn queue_wait_ns(&self) -> u64 {
        if self.ack_ts_ns == 0 {
            return 0;
        }
        self.fill_ts_ns.saturating_sub(self.ack_ts_ns)
    }

    pub fn decision_to_fill_ns(&self) -> u64 {
        self.fill_ts_ns.saturating_sub(self.decision_ts_ns)
    }

    pub fn slippage_bps(&self) -> f64 {
        if self.submit_price <= 0.0 || self.fill_price <= 0.0 {
            return 0.0;
        }
        (self.fill_price - self.submit_price) / self.submit_price * 10_000.0
    }
}

struct Aggregates {
    latency_ema_ns: f64,
    slippage_ema_bps: f64,
    quality_ema: f64,
    published: u64,
}

struct Inner {
    inflight: HashMap<u64, LatencyRecord>,
    aggregates: Aggregates,
}

/// Shared latency tracker; every operation is O(1) under its own lock.
pub struct LatencyTracker {
    inner: Mutex<Inner>,
}

impl LatencyTracker {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                inflight: HashMap::new(),
                aggregates: Aggregates {
                    latency_ema_ns: 0.0,
                    slippage_ema_bps: 0.0,
                    quality_ema: 1.0,
                    published: 0,
                },
            }),
        }
    }

    pub fn on_submit(
        &self,
        causal_id: u64,
        symbol: Symbol,
        decision_ts_ns: u64,
        send_ts_ns: u64,
        price: f64,
        qty: f64,
    ) {
        let mut inner = self.inner.lock();
        inner.inflight.insert(
            causal_id,
            LatencyRecord {
                causal_id,
                symbol,
                decision_ts_ns,
                send_ts_ns,
                ack_ts_ns: 0,
                fill_ts_ns: 0,
                cancel_ts_ns: 0,
                submit_price: price,
                submit_qty: qty,
                fill_price: 0.0,
                fill_qty: 0.0,
                rejected: false,
            },
        );
    }

    pub fn on_ack(&self, causal_id: u64, ack_ts_ns: u64) {
        let mut inner = self.inner.lock();
        if let Some(rec) = inner.inflight.get_mut(&causal_id) {
            rec.ack_ts_ns = ack_ts_ns;
        }
    }

    /// Terminal fill: stamps, publishes and retires the record.
    pub fn on_fill(
        &self,
        causal_id: u64,
        fill_ts_ns: u64,
        fill_price: f64,
        fill_qty: f64,
    ) -> Option<LatencyRecord> {
        let mut inner = self.inner.lock();
        let mut rec = inner.inflight.remove(&causal_id)?;
        rec.fill_ts_ns = fill_ts_ns;
        rec.fill_price = fill_price;
        rec.fill_qty = fill_qty;
        Self::publish(&mut inner.aggregates, &rec);
        Some(rec)
    }

    pub fn on_cancel(&self, causal_id: u64, cancel_ts_ns: u64) -> Option<LatencyRecord> {
        let mut inner = self.inner.lock();
        let mut rec = inner.inflight.remove(&causal_id)?;
        rec.cancel_ts_ns = cancel_ts_ns;
        Self::publish(&mut inner.aggregates, &rec);
        Some(rec)
    }

    pub fn on_reject(&self, causal_id: u64, reject_ts_ns: u64) -> Option<LatencyRecord> {
        let mut inner = self.inner.lock();
        let mut rec = inner.inflight.remove(&causal_id)?;
        rec.rejected = true;
        rec.cancel_ts_ns = reject_ts_ns;
        Self::publish(&mut inner.aggregates, &rec);
        Some(rec)
    }

    fn publish(agg: &mut Aggregates, rec: &LatencyRecord) {
        agg.published += 1;
        if rec.fill_ts_ns > 0 {
            let total = rec.decision_to_fill_ns() as f64;
            agg.latency_ema_ns = ema(agg.latency_ema_ns, total, agg.published);
            agg.slippage_ema_bps =
                ema(agg.slippage_ema_bps, rec.slippage_bps().abs(), agg.published);
            agg.quality_ema = ema(agg.quality_ema, quality_score(rec), agg.published);
        } else if rec.rejected {
            agg.quality_ema = ema(agg.quality_ema, 0.0, agg.published);
        }
    }

    pub fn latency_ema_ns(&self) -> f64 {
        self.inner.lock().aggregates.latency_ema_ns
    }

    pub fn slippage_ema_bps(&self) -> f64 {
        self.inner.lock().aggregates.slippage_ema_bps
    }

    /// Execution quality in [0, 1]; drops with slippage and latency.
    pub fn quality_ema(&self) -> f64 {
        self.inner.lock().aggregates.quality_ema
    }

    pub fn inflight_count(&self) -> usize {
        self.inner.lock().inflight.len()
    }

    /// Latest RTT / queue-wait view for an in-flight order.
    pub fn inflight_timing(&self, causal_id: u64) -> Option<(u64, u64)> {
        let inner = self.inner.lock();
        let rec = inner.inflight.get(&causal_id)?;
        Some((rec.rtt_ns(), rec.queue_wait_ns()))
    }

    pub fn inflight_ids(&self) -> Vec<u64> {
        self.inner.lock().inflight.keys().copied().collect()
    }
}

fn ema(current: f64, value: f64, published: u64) -> f64 {
    if published <= 1 {
        value
    } else {
        EMA_ALPHA * value + (1.0 - EMA_ALPHA) * current
    }
}

fn quality_score(rec: &LatencyRecord) -> f64 {
    let slip_factor = (rec.slippage_bps().abs() / 5.0).min(1.0);
    let latency_factor = (rec.decision_to_fill_ns() as f64 / 50_000_000.0).min(1.0);
    (1.0 - slip_factor * 0.5 - latency_factor * 0.3).clamp(0.0, 1.0)
}

impl Default for LatencyTracker {
    fn default() -> Self {
        Self::new()
    }
}
