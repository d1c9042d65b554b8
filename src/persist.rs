// =============================================================================
// Position persistence — crash-safe snapshot with fail-closed recovery
// =============================================================================
//
// `position_snapshot.dat` is newline-separated text, five lines per position:
//
//   symbol
//   direction   (1 long, -1 short)
//   size
//   avg_price
//   daily_pnl
//
// Writes are whole-file rewrites through a tmp + rename pair, so a crash
// mid-write leaves the previous snapshot intact. The snapshot is rewritten
// after every confirmed fill, before any dependent PnL update is considered
// durable.
//
// On startup a corrupt snapshot fails closed: the operator chooses between
// continuing flat and aborting.
// =============================================================================

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use tracing::{info, warn};

use crate::positions::PositionState;
use crate::types::{now_ns, Side, Symbol};

pub const SNAPSHOT_FILE: &str = "position_snapshot.dat";

#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotData {
    pub positions: Vec<PositionState>,
    pub daily_pnl: f64,
}

pub struct PositionPersistence {
    path: PathBuf,
}

impl PositionPersistence {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join(SNAPSHOT_FILE),
        }
    }

    /// Atomically rewrite the snapshot.
    pub fn save(&self, positions: &[PositionState], daily_pnl: f64) -> Result<()> {
        let mut body = String::new();
        for p in positions {
            let direction = match p.side {
                Side::Buy => 1,
                Side::Sell => -1,
            };
            body.push_str(&format!(
                "{}\n{}\n{}\n{}\n{}\n",
                p.symbol.fix_name(),
                direction,
                p.quantity,
                p.entry_price,
                daily_pnl
            ));
        }
        if positions.is_empty() {
            // flat book: record the PnL line alone so recovery keeps the day's tally
            body.push_str(&format!("FLAT\n0\n0\n0\n{daily_pnl}\n"));
        }

        let tmp = self.path.with_extension("tmp");
        {
            let mut file = std::fs::File::create(&tmp)
                .with_context(|| format!("failed to create {}", tmp.display()))?;
            file.write_all(body.as_bytes())?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("failed to replace {}", self.path.display()))?;
        Ok(())
    }

    /// One-shot startup load. `Ok(None)` when no snapshot exists (first run);
    /// `Err` when the file exists but cannot be trusted.
    pub fn load(&self) -> Result<Option<SnapshotData>> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).context("failed to read position snapshot"),
        };

        let lines: Vec<&str> = raw.lines().collect();
        if lines.is_empty() || lines.len() % 5 != 0 {
            bail!("position snapshot is corrupt: {} lines", lines.len());
        }

        let mut positions = Vec::new();
        let mut daily_pnl = 0.0;
        for chunk in lines.chunks(5) {
            let symbol_name = chunk[0].trim();
            let direction: i32 = chunk[1].trim().parse().context("bad direction")?;
            let quantity: f64 = chunk[2].trim().parse().context("bad size")?;
            let entry_price: f64 = chunk[3].trim().parse().context("bad avg_price")?;
            daily_pnl = chunk[4].trim().parse().context("bad daily_pnl")?;

            if symbol_name == "FLAT" {
                continue;
            }
            let Some(symbol) = Symbol::from_fix(symbol_name) else {
                bail!("position snapshot names unknown symbol {symbol_name:?}");
            };
            let side = match direction {
                1 => Side::Buy,
                -1 => Side::Sell,
                other => bail!("position snapshot has invalid direction {other}"),
            };
            if quantity < 0.0 || entry_price <= 0.0 {
                bail!("position snapshot has degenerate size/price");
            }
            positions.push(PositionState {
                symbol,
                side,
                quantity,
                entry_price,
                entry_ts_ns: now_ns(),
            });
        }

        info!(
            positions = positions.len(),
            daily_pnl, "position snapshot loaded"
        );
        Ok(Some(SnapshotData { positions, daily_pnl }))
    }

    pub fn clear(&self) -> Result<()> {
        self.save(&[], 0.0)
    }
}

/// Operator decision for a corrupt snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryDecision {
    ContinueFlat,
    Abort,
}

/// Fail-closed prompt: `C` continues with zero position, `Q` aborts. Any
/// other input re-prompts.
pub fn prompt_for_corrupt_snapshot(
    error: &anyhow::Error,
    input: &mut impl std::io::BufRead,
) -> RecoveryDecision {
    warn!(error = %error, "position snapshot is corrupt — operator decision required");
    eprintln!("Position snapshot is corrupt: {error:#}");
    eprintln!("  [C] continue with ZERO position   [Q] abort");

    let mut line = String::new();
    loop {
        line.clear();
        if input.read_line(&mut line).is_err() || line.is_empty() {
            return RecoveryDecision::Abort; // EOF on stdin: fail closed
        }
        match line.trim() {
            "C" | "c" => return RecoveryDecision::ContinueFlat,
            "Q" | "q" => return RecoveryDecision::Abort,
            _ => eprintln!("  enter C or Q"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn xau_position() -> PositionState {
        PositionState {
            symbol: Symbol::Xau,
            side: Side::Buy,
            quantity: 1.5,
            entry_price: 2001.25,
            entry_ts_ns: 0,
        }
    }

    #[test]
    fn save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let p = PositionPersistence::new(dir.path());
        p.save(&[xau_position()], -42.5).unwrap();

        let loaded = p.load().unwrap().unwrap();
        assert_eq!(loaded.positions.len(), 1);
        let pos = &loaded.positions[0];
        assert_eq!(pos.symbol, Symbol::Xau);
        assert_eq!(pos.side, Side::Buy);
        assert!((pos.quantity - 1.5).abs() < 1e-12);
        assert!((pos.entry_price - 2001.25).abs() < 1e-12);
        assert!((loaded.daily_pnl + 42.5).abs() < 1e-12);
    }

    #[test]
    fn flat_book_round_trip_keeps_pnl() {
        let dir = tempfile::tempdir().unwrap();
        let p = PositionPersistence::new(dir.path());
        p.save(&[], 17.0).unwrap();
        let loaded = p.load().unwrap().unwrap();
        assert!(loaded.positions.is_empty());
        assert!((loaded.daily_pnl - 17.0).abs() < 1e-12);
    }

    #[test]
    fn missing_file_is_first_run() {
        let dir = tempfile::tempdir().unwrap();
        let p = PositionPersistence::new(dir.path());
        assert!(p.load().unwrap().is_none());
    }

    #[test]
    fn truncated_file_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(SNAPSHOT_FILE), "XAUUSD\n1\n1.5\n").unwrap();
        assert!(PositionPersistence::new(dir.path()).load().is_err());
    }

    #[test]
    fn garbage_numbers_are_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(SNAPSHOT_FILE),
            "XAUUSD\n1\nbanana\n2000\n0\n",
        )
        .unwrap();
        assert!(PositionPersistence::new(dir.path()).load().is_err());
    }

    #[test]
    fn invalid_direction_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(SNAPSHOT_FILE), "XAUUSD\n7\n1.0\n2000\n0\n").unwrap();
        assert!(PositionPersistence::new(dir.path()).load().is_err());
    }

    #[test]
    fn save_overwrites_previous_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let p = PositionPersistence::new(dir.path());
        p.save(&[xau_position()], 1.0).unwrap();
        p.save(&[], 2.0).unwrap();
        let loaded = p.load().unwrap().unwrap();
        assert!(loaded.positions.is_empty());
        assert!((loaded.daily_pnl - 2.0).abs() < 1e-12);
    }

    #[test]
    fn prompt_continue_and_abort() {
        let err = anyhow::anyhow!("broken");
        let mut input = std::io::Cursor::new(b"x\nC\n".to_vec());
        assert_eq!(
            prompt_for_corrupt_snapshot(&err, &mut input),
            RecoveryDecision::ContinueFlat
        );

        let mut input = std::io::Cursor::new(b"q\n".to_vec());
        assert_eq!(
            prompt_for_corrupt_snapshot(&err, &mut input),
            RecoveryDecision::Abort
        );

        // EOF fails closed
        let mut input = std::io::Cursor::new(Vec::new());
        assert_eq!(
            prompt_for_corrupt_snapshot(&err, &mut input),
            RecoveryDecision::Abort
        );
    }
}
