// =============================================================================
// Binary journal — append-only event stream with replay
// =============================================================================
//
// On-disk layout, little-endian, 16-byte header per event:
//
//   EventHeader { timestamp_ns: u64, kind: u16, payload_size: u16,
//                 sequence: u32 }
//   followed by `payload_size` bytes of kind-indexed POD payload.
//
// Sequence numbers are monotonic from 0. Replay dispatches each
// (header, payload) pair to a handler; events with an unrecognised kind are
// seek-skipped and logged once per kind.
// =============================================================================

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use thiserror::Error;
use tracing::warn;

use crate::types::{EngineKind, Side, Symbol};

pub const HEADER_SIZE: usize = 16;

#[derive(Debug, Error)]
pub enum JournalError {
    #[error("journal I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("payload of {0} bytes exceeds the u16 size field")]
    PayloadTooLarge(usize),
    #[error("truncated event at sequence {0}")]
    Truncated(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventHeader {
    pub timestamp_ns: u64,
    pub kind: u16,
    pub payload_size: u16,
    pub sequence: u32,
}

impl EventHeader {
    fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..8].copy_from_slice(&self.timestamp_ns.to_le_bytes());
        buf[8..10].copy_from_slice(&self.kind.to_le_bytes());
        buf[10..12].copy_from_slice(&self.payload_size.to_le_bytes());
        buf[12..16].copy_from_slice(&self.sequence.to_le_bytes());
        buf
    }

    fn decode(buf: &[u8; HEADER_SIZE]) -> EventHeader {
        EventHeader {
            timestamp_ns: u64::from_le_bytes(buf[0..8].try_into().unwrap_or_default()),
            kind: u16::from_le_bytes(buf[8..10].try_into().unwrap_or_default()),
            payload_size: u16::from_le_bytes(buf[10..12].try_into().unwrap_or_default()),
            sequence: u32::from_le_bytes(buf[12..16].try_into().unwrap_or_default()),
        }
    }
}

/// Event kinds. The numeric values are the on-disk schema; renumbering breaks
/// replay of existing journals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum EventKind {
    Tick = 1,
    Execution = 2,
    Intent = 3,
    Risk = 4,
}

impl EventKind {
    pub fn from_u16(v: u16) -> Option<EventKind> {
        match v {
            1 => Some(EventKind::Tick),
            2 => Some(EventKind::Execution),
            3 => Some(EventKind::Intent),
            4 => Some(EventKind::Risk),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickEvent {
    pub symbol: Symbol,
    pub bid: f64,
    pub ask: f64,
    pub ofi: f64,
}

impl TickEvent {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(25);
        buf.push(self.symbol.index() as u8);
        buf.extend_from_slice(&self.bid.to_le_bytes());
        buf.extend_from_slice(&self.ask.to_le_bytes());
        buf.extend_from_slice(&self.ofi.to_le_bytes());
        buf
    }

    pub fn decode(buf: &[u8]) -> Option<TickEvent> {
        if buf.len() < 25 {
            return None;
        }
        Some(TickEvent {
            symbol: symbol_from_u8(buf[0])?,
            bid: f64_at(buf, 1)?,
            ask: f64_at(buf, 9)?,
            ofi: f64_at(buf, 17)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExecutionEvent {
    pub symbol: Symbol,
    pub side: Side,
    pub quantity: f64,
    pub price: f64,
    pub causal_id: u64,
}

impl ExecutionEvent {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(26);
        buf.push(self.symbol.index() as u8);
        buf.push(match self.side {
            Side::Buy => 0,
            Side::Sell => 1,
        });
        buf.extend_from_slice(&self.quantity.to_le_bytes());
        buf.extend_from_slice(&self.price.to_le_bytes());
        buf.extend_from_slice(&self.causal_id.to_le_bytes());
        buf
    }

    pub fn decode(buf: &[u8]) -> Option<ExecutionEvent> {
        if buf.len() < 26 {
            return None;
        }
        Some(ExecutionEvent {
            symbol: symbol_from_u8(buf[0])?,
            side: match buf[1] {
                0 => Side::Buy,
                1 => Side::Sell,
                _ => return None,
            },
            quantity: f64_at(buf, 2)?,
            price: f64_at(buf, 10)?,
            causal_id: u64::from_le_bytes(buf.get(18..26)?.try_into().ok()?),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntentEvent {
    pub symbol: Symbol,
    pub side: Side,
    pub engine: EngineKind,
    pub quantity: f64,
    pub confidence: f64,
    pub causal_id: u64,
}

impl IntentEvent {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(27);
        buf.push(self.symbol.index() as u8);
        buf.push(match self.side {
            Side::Buy => 0,
            Side::Sell => 1,
        });
        buf.push(self.engine.index() as u8);
        buf.extend_from_slice(&self.quantity.to_le_bytes());
        buf.extend_from_slice(&self.confidence.to_le_bytes());
        buf.extend_from_slice(&self.causal_id.to_le_bytes());
        buf
    }

    pub fn decode(buf: &[u8]) -> Option<IntentEvent> {
        if buf.len() < 27 {
            return None;
        }
        Some(IntentEvent {
            symbol: symbol_from_u8(buf[0])?,
            side: match buf[1] {
                0 => Side::Buy,
                1 => Side::Sell,
                _ => return None,
            },
            engine: match buf[2] {
                0 => EngineKind::Hft,
                1 => EngineKind::Structure,
                _ => return None,
            },
            quantity: f64_at(buf, 3)?,
            confidence: f64_at(buf, 11)?,
            causal_id: u64::from_le_bytes(buf.get(19..27)?.try_into().ok()?),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiskEvent {
    pub daily_pnl: f64,
    pub consecutive_losses: u32,
    pub volatility_score: f64,
    pub halted: bool,
}

impl RiskEvent {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(21);
        buf.extend_from_slice(&self.daily_pnl.to_le_bytes());
        buf.extend_from_slice(&self.consecutive_losses.to_le_bytes());
        buf.extend_from_slice(&self.volatility_score.to_le_bytes());
        buf.push(self.halted as u8);
        buf
    }

    pub fn decode(buf: &[u8]) -> Option<RiskEvent> {
        if buf.len() < 21 {
            return None;
        }
        Some(RiskEvent {
            daily_pnl: f64_at(buf, 0)?,
            consecutive_losses: u32::from_le_bytes(buf.get(8..12)?.try_into().ok()?),
            volatility_score: f64_at(buf, 12)?,
            halted: buf[20] != 0,
        })
    }
}

fn f64_at(buf: &[u8], offset: usize) -> Option<f64> {
    Some(f64::from_le_bytes(
        buf.get(offset..offset + 8)?.try_into().ok()?,
    ))
}

fn symbol_from_u8(v: u8) -> Option<Symbol> {
    match v {
        0 => Some(Symbol::Xau),
        1 => Some(Symbol::Xag),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

pub struct JournalWriter {
    out: BufWriter<File>,
    sequence: u32,
}

impl JournalWriter {
    pub fn create(path: impl AsRef<Path>) -> Result<Self, JournalError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        Ok(Self {
            out: BufWriter::new(file),
            sequence: 0,
        })
    }

    pub fn append(
        &mut self,
        kind: EventKind,
        timestamp_ns: u64,
        payload: &[u8],
    ) -> Result<u32, JournalError> {
        if payload.len() > u16::MAX as usize {
            return Err(JournalError::PayloadTooLarge(payload.len()));
        }
        let header = EventHeader {
            timestamp_ns,
            kind: kind as u16,
            payload_size: payload.len() as u16,
            sequence: self.sequence,
        };
        self.out.write_all(&header.encode())?;
        self.out.write_all(payload)?;
        self.out.flush()?;
        let seq = self.sequence;
        self.sequence += 1;
        Ok(seq)
    }

    pub fn sequence(&self) -> u32 {
        self.sequence
    }
}

// ---------------------------------------------------------------------------
// Replay
// ---------------------------------------------------------------------------

/// Stream a journal file through `handler`. Unknown event kinds are skipped
/// (and logged once per kind); a mid-event truncation is an error.
pub fn replay(
    path: impl AsRef<Path>,
    mut handler: impl FnMut(EventHeader, &[u8]),
) -> Result<u64, JournalError> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    let mut unknown_kinds: HashSet<u16> = HashSet::new();
    let mut dispatched = 0u64;

    loop {
        let mut header_buf = [0u8; HEADER_SIZE];
        match reader.read_exact(&mut header_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        }
        let header = EventHeader::decode(&header_buf);

        let mut payload = vec![0u8; header.payload_size as usize];
        reader
            .read_exact(&mut payload)
            .map_err(|_| JournalError::Truncated(header.sequence))?;

        if EventKind::from_u16(header.kind).is_none() {
            if unknown_kinds.insert(header.kind) {
                warn!(kind = header.kind, "unknown journal event kind — skipping");
            }
            continue;
        }

        handler(header, &payload);
        dispatched += 1;
    }

    Ok(dispatched)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tick(i: u64) -> TickEvent {
        TickEvent {
            symbol: Symbol::Xau,
            bid: 1999.0 + i as f64,
            ask: 2000.0 + i as f64,
            ofi: 0.25,
        }
    }

    #[test]
    fn header_round_trip() {
        let h = EventHeader {
            timestamp_ns: 123_456_789,
            kind: 2,
            payload_size: 26,
            sequence: 41,
        };
        assert_eq!(EventHeader::decode(&h.encode()), h);
    }

    #[test]
    fn payload_round_trips() {
        let t = tick(0);
        assert_eq!(TickEvent::decode(&t.encode()), Some(t));

        let e = ExecutionEvent {
            symbol: Symbol::Xag,
            side: Side::Sell,
            quantity: 2.5,
            price: 24.75,
            causal_id: 99,
        };
        assert_eq!(ExecutionEvent::decode(&e.encode()), Some(e));

        let i = IntentEvent {
            symbol: Symbol::Xau,
            side: Side::Buy,
            engine: EngineKind::Structure,
            quantity: 1.5,
            confidence: 0.8,
            causal_id: 7,
        };
        assert_eq!(IntentEvent::decode(&i.encode()), Some(i));

        let r = RiskEvent {
            daily_pnl: -120.5,
            consecutive_losses: 3,
            volatility_score: 1.4,
            halted: true,
        };
        assert_eq!(RiskEvent::decode(&r.encode()), Some(r));
    }

    #[test]
    fn write_then_replay_identical_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chimera_journal.bin");

        let mut written: Vec<(EventHeader, Vec<u8>)> = Vec::new();
        {
            let mut w = JournalWriter::create(&path).unwrap();
            for i in 0..10u64 {
                let payload = tick(i).encode();
                let seq = w.append(EventKind::Tick, 1000 + i, &payload).unwrap();
                written.push((
                    EventHeader {
                        timestamp_ns: 1000 + i,
                        kind: EventKind::Tick as u16,
                        payload_size: payload.len() as u16,
                        sequence: seq,
                    },
                    payload,
                ));
            }
        }

        let mut replayed: Vec<(EventHeader, Vec<u8>)> = Vec::new();
        let n = replay(&path, |h, p| replayed.push((h, p.to_vec()))).unwrap();
        assert_eq!(n, 10);
        assert_eq!(replayed, written);
        // monotonic sequence from 0
        for (i, (h, _)) in replayed.iter().enumerate() {
            assert_eq!(h.sequence, i as u32);
        }
    }

    #[test]
    fn mixed_kinds_dispatch_by_kind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("j.bin");
        {
            let mut w = JournalWriter::create(&path).unwrap();
            w.append(EventKind::Tick, 1, &tick(0).encode()).unwrap();
            w.append(
                EventKind::Risk,
                2,
                &RiskEvent {
                    daily_pnl: 0.0,
                    consecutive_losses: 0,
                    volatility_score: 1.0,
                    halted: false,
                }
                .encode(),
            )
            .unwrap();
        }
        let mut kinds = Vec::new();
        replay(&path, |h, _| kinds.push(h.kind)).unwrap();
        assert_eq!(kinds, vec![EventKind::Tick as u16, EventKind::Risk as u16]);
    }

    #[test]
    fn unknown_kind_skipped_known_still_delivered() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("j.bin");
        {
            // hand-write an event with kind 999 followed by a real tick
            let mut file = File::create(&path).unwrap();
            let bogus = EventHeader {
                timestamp_ns: 1,
                kind: 999,
                payload_size: 4,
                sequence: 0,
            };
            file.write_all(&bogus.encode()).unwrap();
            file.write_all(&[1, 2, 3, 4]).unwrap();

            let payload = tick(0).encode();
            let good = EventHeader {
                timestamp_ns: 2,
                kind: EventKind::Tick as u16,
                payload_size: payload.len() as u16,
                sequence: 1,
            };
            file.write_all(&good.encode()).unwrap();
            file.write_all(&payload).unwrap();
        }
        let mut seen = Vec::new();
        let n = replay(&path, |h, _| seen.push(h.sequence)).unwrap();
        assert_eq!(n, 1);
        assert_eq!(seen, vec![1]);
    }

    #[test]
    fn truncated_event_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("j.bin");
        {
            let mut file = File::create(&path).unwrap();
            let header = EventHeader {
                timestamp_ns: 1,
                kind: EventKind::Tick as u16,
                payload_size: 25,
                sequence: 0,
            };
            file.write_all(&header.encode()).unwrap();
            file.write_all(&[0u8; 5]).unwrap(); // payload cut short
        }
        assert!(matches!(
            replay(&path, |_, _| {}),
            Err(JournalError::Truncated(0))
        ));
    }
}
