// =============================================================================
// Audit journal — CSV per-event compliance trail
// =============================================================================
//
// One row per externally-significant event, flushed immediately:
//
//   timestamp_ns,event_type,symbol,regime,engine,side,size,price,spread,
//   confidence,latency_ms
// =============================================================================

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use parking_lot::Mutex;

pub const AUDIT_FILE: &str = "chimera_audit.log";

#[derive(Debug, Clone)]
pub struct AuditEvent {
    pub timestamp_ns: u64,
    pub event_type: String,
    pub symbol: String,
    pub regime: String,
    pub engine: String,
    pub side: String,
    pub size: f64,
    pub price: f64,
    pub spread: f64,
    pub confidence: f64,
    pub latency_ms: f64,
}

impl AuditEvent {
    pub fn new(timestamp_ns: u64, event_type: &str) -> Self {
        Self {
            timestamp_ns,
            event_type: event_type.to_string(),
            symbol: String::new(),
            regime: String::new(),
            engine: String::new(),
            side: String::new(),
            size: 0.0,
            price: 0.0,
            spread: 0.0,
            confidence: 0.0,
            latency_ms: 0.0,
        }
    }
}

pub struct AuditLog {
    file: Mutex<File>,
}

impl AuditLog {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let path = dir.as_ref().join(AUDIT_FILE);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("failed to open audit log {}", path.display()))?;
        Ok(Self { file: Mutex::new(file) })
    }

    pub fn log(&self, e: &AuditEvent) {
        let row = format!(
            "{},{},{},{},{},{},{},{},{},{},{}\n",
            e.timestamp_ns,
            e.event_type,
            e.symbol,
            e.regime,
            e.engine,
            e.side,
            e.size,
            e.price,
            e.spread,
            e.confidence,
            e.latency_ms
        );
        let mut file = self.file.lock();
        // an audit write failure must not take the trading path down
        let _ = file.write_all(row.as_bytes());
        let _ = file.flush();
    }
}
