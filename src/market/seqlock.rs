// =============================================================================
// Per-symbol seqlock quote cell — lock-free coherent (bid, ask, ts) reads
// =============================================================================
//
// Writer protocol: bump the version to odd, store the payload, bump to even.
// Reader protocol: spin until the version is even and unchanged across the
// payload read. Readers never block the single writer (the QUOTE session).
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};

/// A coherent top-of-book triple.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quote {
    pub bid: f64,
    pub ask: f64,
    pub timestamp_ns: u64,
}

impl Quote {
    pub fn mid(&self) -> f64 {
        (self.bid + self.ask) * 0.5
    }

    pub fn spread(&self) -> f64 {
        self.ask - self.bid
    }
}

#[derive(Default)]
pub struct QuoteCell {
    version: AtomicU64,
    bid_bits: AtomicU64,
    ask_bits: AtomicU64,
    timestamp_ns: AtomicU64,
}

impl QuoteCell {
    pub fn new() -> Self {
        Self::default()
    }

    /// Single-writer store. Callers must guarantee exactly one writer per
    /// cell; the odd/even version protocol does not arbitrate writers.
    pub fn write(&self, bid: f64, ask: f64, timestamp_ns: u64) {
        let v = self.version.load(Ordering::Relaxed);
        self.version.store(v.wrapping_add(1), Ordering::Release); // odd: write in progress
        self.bid_bits.store(bid.to_bits(), Ordering::Release);
        self.ask_bits.store(ask.to_bits(), Ordering::Release);
        self.timestamp_ns.store(timestamp_ns, Ordering::Release);
        self.version.store(v.wrapping_add(2), Ordering::Release); // even: stable
    }

    /// Lock-free coherent read. Returns `None` before the first write.
    pub fn read(&self) -> Option<Quote> {
        loop {
            let v1 = self.version.load(Ordering::Acquire);
            if v1 == 0 {
                return None;
            }
            if v1 & 1 == 1 {
                std::hint::spin_loop();
                continue;
            }
            let bid = f64::from_bits(self.bid_bits.load(Ordering::Acquire));
            let ask = f64::from_bits(self.ask_bits.load(Ordering::Acquire));
            let timestamp_ns = self.timestamp_ns.load(Ordering::Acquire);
            let v2 = self.version.load(Ordering::Acquire);
            if v1 == v2 {
                return Some(Quote { bid, ask, timestamp_ns });
            }
            // torn read — retry
        }
    }
}
