// =============================================================================
// Market-data handler — 35=W / 35=X parsing, tick validation, OFI
// =============================================================================
//
// Parses MarketDataSnapshot and MarketDataIncrementalRefresh messages into
// validated `MarketSnapshot`s and publishes them to the seqlock store.
//
// Validation layers, in order:
//   1. structural  — bid > 0, ask > 0, ask > bid
//   2. warm-up     — two consecutive valid ticks before the symbol goes live
//   3. jump guard  — an absolute last-price jump beyond the per-symbol
//                    threshold invalidates the tick without advancing state
// =============================================================================

use tracing::{debug, warn};

use crate::fix::message::{tags, FixMessage};
use crate::types::Symbol;

use super::{MarketSnapshot, MarketState};

/// Hard jump protection, in price units.
fn max_jump(symbol: Symbol) -> f64 {
    match symbol {
        Symbol::Xau => 20.0,
        Symbol::Xag => 1.0,
    }
}

#[derive(Default, Clone, Copy)]
struct SymbolFilter {
    consecutive_valid: u32,
    last_mid: f64,
    last_bid_size: f64,
    last_ask_size: f64,
}

/// Per-symbol validation state plus OFI bookkeeping. Owned by the QUOTE
/// session task; never shared.
pub struct MarketDataHandler {
    filters: [SymbolFilter; Symbol::COUNT],
    rejected_ticks: u64,
}

/// One price level pulled from a 269/270(/271) repeating group.
struct MdEntry {
    entry_type: char,
    price: f64,
    size: Option<f64>,
}

impl MarketDataHandler {
    pub fn new() -> Self {
        Self {
            filters: [SymbolFilter::default(); Symbol::COUNT],
            rejected_ticks: 0,
        }
    }

    /// Handle a market-data message. Returns the validated snapshot when the
    /// tick passes every filter, `None` otherwise (the store is untouched in
    /// that case).
    pub fn on_market_data(
        &mut self,
        msg: &FixMessage,
        market: &MarketState,
        now_ns: u64,
    ) -> Option<MarketSnapshot> {
        let symbol = msg
            .get(tags::SYMBOL)
            .and_then(Symbol::from_fix)
            .or_else(|| {
                debug!("market data without a recognised tag 55 — skipped");
                None
            })?;

        let entries = parse_md_entries(msg);
        let mut bid = None;
        let mut ask = None;
        let mut bid_size = 0.0;
        let mut ask_size = 0.0;
        for e in &entries {
            match e.entry_type {
                '0' => {
                    bid = Some(e.price);
                    bid_size = e.size.unwrap_or(0.0);
                }
                '1' => {
                    ask = Some(e.price);
                    ask_size = e.size.unwrap_or(0.0);
                }
                _ => {}
            }
        }

        // Incremental refreshes may update one side; fall back to the stored
        // quote for the other.
        let stored = market.quote(symbol);
        let bid = bid.or(stored.map(|q| q.bid))?;
        let ask = ask.or(stored.map(|q| q.ask))?;

        let filter = &mut self.filters[symbol.index()];

        // structural validity
        if bid <= 0.0 || ask <= 0.0 || ask <= bid {
            filter.consecutive_valid = 0;
            market.set_live(symbol, false);
            self.rejected_ticks += 1;
            return None;
        }

        let mid = (bid + ask) * 0.5;

        // jump guard: invalidate without advancing state
        if filter.last_mid > 0.0 && (mid - filter.last_mid).abs() > max_jump(symbol) {
            warn!(
                symbol = %symbol,
                mid,
                last = filter.last_mid,
                "tick rejected by jump guard"
            );
            self.rejected_ticks += 1;
            return None;
        }

        filter.consecutive_valid += 1;
        filter.last_mid = mid;
        if filter.consecutive_valid >= 2 {
            market.set_live(symbol, true);
        }

        // OFI: normalised top-of-book size imbalance when sizes are quoted.
        let ofi = if bid_size + ask_size > 0.0 {
            (bid_size - ask_size) / (bid_size + ask_size)
        } else {
            0.0
        };
        filter.last_bid_size = bid_size;
        filter.last_ask_size = ask_size;

        market.update(symbol, bid, ask, now_ns);

        if filter.consecutive_valid < 2 {
            return None; // warm-up: stored but not yet emitted downstream
        }

        Some(MarketSnapshot {
            symbol,
            bid,
            ask,
            mid,
            spread: ask - bid,
            ofi,
            timestamp_ns: now_ns,
        })
    }

    pub fn rejected_ticks(&self) -> u64 {
        self.rejected_ticks
    }
}

impl Default for MarketDataHandler {
    fn default() -> Self {
        Self::new()
    }
}

/// Walk the repeating group in wire order: each 269 opens an entry, the
/// following 270/271 belong to it.
fn parse_md_entries(msg: &FixMessage) -> Vec<MdEntry> {
    let mut entries: Vec<MdEntry> = Vec::with_capacity(2);
    for (tag, value) in msg.fields() {
        match *tag {
            tags::MD_ENTRY_TYPE => {
                if let Some(c) = value.chars().next() {
                    entries.push(MdEntry { entry_type: c, price: 0.0, size: None });
                }
            }
            tags::MD_ENTRY_PX => {
                if let (Some(e), Ok(px)) = (entries.last_mut(), value.parse()) {
                    e.price = px;
                }
            }
            tags::MD_ENTRY_SIZE => {
                if let (Some(e), Ok(sz)) = (entries.last_mut(), value.parse()) {
                    e.size = Some(sz);
                }
            }
            _ => {}
        }
    }
    entries.retain(|e| e.price > 0.0 || e.entry_type != '0' && e.entry_type != '1');
    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    fn md_msg(symbol: &str, bid: f64, ask: f64) -> FixMessage {
        let raw = format!(
            "35=W\x0155={symbol}\x01269=0\x01270={bid}\x01271=10\x01269=1\x01270={ask}\x01271=8\x01"
        );
        FixMessage::parse(raw.as_bytes())
    }

    #[test]
    fn snapshot_parses_bid_and_ask() {
        let mut h = MarketDataHandler::new();
        let market = MarketState::new();
        // first valid tick: stored, not yet emitted (warm-up)
        assert!(h.on_market_data(&md_msg("XAUUSD", 1999.0, 2000.0), &market, 1).is_none());
        assert!(!market.is_tradable(Symbol::Xau, 1));

        // second valid tick: live + emitted
        let snap = h
            .on_market_data(&md_msg("XAUUSD", 1999.2, 2000.2), &market, 2)
            .unwrap();
        assert_eq!(snap.symbol, Symbol::Xau);
        assert!((snap.mid - 1999.7).abs() < 1e-9);
        assert!((snap.spread - 1.0).abs() < 1e-9);
        assert!(snap.ofi > 0.0, "more bid size than ask size");
        assert!(market.is_tradable(Symbol::Xau, 2));
    }

    #[test]
    fn crossed_book_resets_validity() {
        let mut h = MarketDataHandler::new();
        let market = MarketState::new();
        h.on_market_data(&md_msg("XAUUSD", 1999.0, 2000.0), &market, 1);
        // crossed: ask <= bid
        assert!(h.on_market_data(&md_msg("XAUUSD", 2000.0, 1999.0), &market, 2).is_none());
        assert!(!market.is_tradable(Symbol::Xau, 2));
        // needs two fresh valid ticks again
        assert!(h.on_market_data(&md_msg("XAUUSD", 1999.0, 2000.0), &market, 3).is_none());
        assert!(h.on_market_data(&md_msg("XAUUSD", 1999.1, 2000.1), &market, 4).is_some());
    }

    #[test]
    fn jump_guard_rejects_without_advancing() {
        let mut h = MarketDataHandler::new();
        let market = MarketState::new();
        h.on_market_data(&md_msg("XAUUSD", 1999.0, 2000.0), &market, 1);
        h.on_market_data(&md_msg("XAUUSD", 1999.0, 2000.0), &market, 2);

        let before = market.quote(Symbol::Xau).unwrap();
        // +50 dollars mid jump on XAU: rejected
        assert!(h.on_market_data(&md_msg("XAUUSD", 2049.0, 2050.0), &market, 3).is_none());
        assert_eq!(market.quote(Symbol::Xau).unwrap(), before);
        assert_eq!(h.rejected_ticks(), 1);

        // a sane tick afterwards still flows
        assert!(h.on_market_data(&md_msg("XAUUSD", 1999.5, 2000.5), &market, 4).is_some());
    }

    #[test]
    fn unknown_symbol_skipped() {
        let mut h = MarketDataHandler::new();
        let market = MarketState::new();
        assert!(h.on_market_data(&md_msg("EURUSD", 1.0, 1.1), &market, 1).is_none());
    }

    #[test]
    fn incremental_refresh_single_side_uses_stored_other_side() {
        let mut h = MarketDataHandler::new();
        let market = MarketState::new();
        h.on_market_data(&md_msg("XAGUSD", 24.00, 24.05), &market, 1);
        h.on_market_data(&md_msg("XAGUSD", 24.00, 24.05), &market, 2);

        let raw = "35=X\x0155=XAGUSD\x01269=0\x01270=24.02\x01271=5\x01";
        let snap = h
            .on_market_data(&FixMessage::parse(raw.as_bytes()), &market, 3)
            .unwrap();
        assert!((snap.bid - 24.02).abs() < 1e-9);
        assert!((snap.ask - 24.05).abs() < 1e-9);
    }
}
