// =============================================================================
// Candle aggregation — fixed-interval OHLC windows with ATR
// =============================================================================

use std::collections::VecDeque;

/// Closed candles retained per timeframe.
const MAX_CLOSED: usize = 300;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candle {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub start_ns: u64,
}

impl Candle {
    /// Bar range — the ATR contribution of a single candle.
    pub fn range(&self) -> f64 {
        self.high - self.low
    }
}

/// Buckets a mid-price stream into fixed-width candles.
pub struct TimeframeAggregator {
    bucket_ns: u64,
    current: Option<Candle>,
    closed: VecDeque<Candle>,
}

impl TimeframeAggregator {
    pub fn new(bucket_secs: u64) -> Self {
        Self {
            bucket_ns: bucket_secs * 1_000_000_000,
            current: None,
            closed: VecDeque::with_capacity(MAX_CLOSED),
        }
    }

    pub fn one_minute() -> Self {
        Self::new(60)
    }

    pub fn five_minute() -> Self {
        Self::new(300)
    }

    /// Fold one price into the stream; closes the working candle when the
    /// bucket boundary passes.
    pub fn update(&mut self, price: f64, ts_ns: u64) {
        let bucket_start = ts_ns - (ts_ns % self.bucket_ns);

        match &mut self.current {
            Some(c) if c.start_ns == bucket_start => {
                c.high = c.high.max(price);
                c.low = c.low.min(price);
                c.close = price;
            }
            Some(c) => {
                self.closed.push_back(*c);
                if self.closed.len() > MAX_CLOSED {
                    self.closed.pop_front();
                }
                self.current = Some(Candle {
                    open: price,
                    high: price,
                    low: price,
                    close: price,
                    start_ns: bucket_start,
                });
            }
            None => {
                self.current = Some(Candle {
                    open: price,
                    high: price,
                    low: price,
                    close: price,
                    start_ns: bucket_start,
                });
            }
        }
    }

    /// The most recent completed candle, falling back to the working one so
    /// early consumers see something during the first bucket.
    pub fn latest(&self) -> Option<Candle> {
        self.closed.back().copied().or(self.current)
    }

    pub fn is_ready(&self) -> bool {
        !self.closed.is_empty()
    }

    /// Average bar range over the last `n` closed candles.
    pub fn atr(&self, n: usize) -> Option<f64> {
        if self.closed.is_empty() || n == 0 {
            return None;
        }
        let take = n.min(self.closed.len());
        let sum: f64 = self.closed.iter().rev().take(take).map(Candle::range).sum();
        Some(sum / take as f64)
    }

    /// Highest high over the last `n` closed candles (breakout reference).
    pub fn highest_high(&self, n: usize) -> Option<f64> {
        if self.closed.is_empty() || n == 0 {
            return None;
        }
        self.closed
            .iter()
            .rev()
            .take(n)
            .map(|c| c.high)
            .fold(None, |acc, h| Some(acc.map_or(h, |a: f64| a.max(h))))
    }

    pub fn lowest_low(&self, n: usize) -> Option<f64> {
        if self.closed.is_empty() || n == 0 {
            return None;
        }
        self.closed
            .iter()
            .rev()
            .take(n)
            .map(|c| c.low)
            .fold(None, |acc, l| Some(acc.map_or(l, |a: f64| a.min(l))))
    }
}
