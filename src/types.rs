// =============================================================================
// Core shared types — symbols, sides, engines, clocks
// =============================================================================

use std::sync::OnceLock;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Symbols
// ---------------------------------------------------------------------------

/// Tradable instruments. The engine is a two-metal desk; everything that is
/// per-symbol is indexed by `Symbol::index()` into fixed-size arrays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Symbol {
    Xau,
    Xag,
}

impl Symbol {
    pub const ALL: [Symbol; 2] = [Symbol::Xau, Symbol::Xag];
    pub const COUNT: usize = 2;

    /// FIX tag 55 value as quoted by the broker.
    pub fn fix_name(self) -> &'static str {
        match self {
            Symbol::Xau => "XAUUSD",
            Symbol::Xag => "XAGUSD",
        }
    }

    pub fn short_name(self) -> &'static str {
        match self {
            Symbol::Xau => "XAU",
            Symbol::Xag => "XAG",
        }
    }

    pub fn index(self) -> usize {
        match self {
            Symbol::Xau => 0,
            Symbol::Xag => 1,
        }
    }

    /// Parse a tag-55 value. Accepts both the bare and the USD-suffixed form.
    pub fn from_fix(s: &str) -> Option<Symbol> {
        match s {
            "XAU" | "XAUUSD" => Some(Symbol::Xau),
            "XAG" | "XAGUSD" => Some(Symbol::Xag),
            _ => None,
        }
    }
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.short_name())
    }
}

// ---------------------------------------------------------------------------
// Sides
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// FIX tag 54 value.
    pub fn fix_code(self) -> char {
        match self {
            Side::Buy => '1',
            Side::Sell => '2',
        }
    }

    pub fn from_fix(c: char) -> Option<Side> {
        match c {
            '1' => Some(Side::Buy),
            '2' => Some(Side::Sell),
            _ => None,
        }
    }

    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    /// Signed direction: +1 for buy, -1 for sell.
    pub fn sign(self) -> f64 {
        match self {
            Side::Buy => 1.0,
            Side::Sell => -1.0,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => f.write_str("BUY"),
            Side::Sell => f.write_str("SELL"),
        }
    }
}

// ---------------------------------------------------------------------------
// Engines
// ---------------------------------------------------------------------------

/// The two alpha producers arbitrated by the capital allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EngineKind {
    Hft,
    Structure,
}

impl EngineKind {
    pub const ALL: [EngineKind; 2] = [EngineKind::Hft, EngineKind::Structure];

    pub fn index(self) -> usize {
        match self {
            EngineKind::Hft => 0,
            EngineKind::Structure => 1,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            EngineKind::Hft => "HFT",
            EngineKind::Structure => "STRUCTURE",
        }
    }
}

impl std::fmt::Display for EngineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// Clocks
// ---------------------------------------------------------------------------

/// Wall-clock time in nanoseconds since the Unix epoch.
pub fn now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64
}

static MONOTONIC_EPOCH: OnceLock<Instant> = OnceLock::new();

/// Milliseconds on a monotonic clock anchored at first use. Written to the
/// watchdog heartbeat file; an external supervisor only compares deltas, so
/// the anchor point is irrelevant.
pub fn monotonic_ms() -> u64 {
    MONOTONIC_EPOCH
        .get_or_init(Instant::now)
        .elapsed()
        .as_millis() as u64
}
