// =============================================================================
// Supervision — single-instance lock, watchdog heartbeat, panic isolation
// =============================================================================

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::future::FutureExt;
use tracing::{error, info};

use crate::types::monotonic_ms;

// ---------------------------------------------------------------------------
// Single-instance lock
// ---------------------------------------------------------------------------

/// An exclusive advisory lock on `/tmp/<name>.lock`. Held for the process
/// lifetime; the kernel releases it on any exit, so a crashed instance never
/// wedges the next start.
pub struct InstanceLock {
    _file: File,
    path: PathBuf,
}

impl InstanceLock {
    pub fn acquire(name: &str) -> Option<InstanceLock> {
        let path = PathBuf::from(format!("/tmp/{name}.lock"));
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)
            .ok()?;

        // SAFETY: fd belongs to `file`, which outlives the call.
        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if rc != 0 {
            return None;
        }

        info!(path = %path.display(), "single-instance lock acquired");
        Some(InstanceLock { _file: file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

// ---------------------------------------------------------------------------
// Watchdog heartbeat
// ---------------------------------------------------------------------------

pub const WATCHDOG_FILE: &str = "watchdog_heartbeat.txt";

/// Writes the current monotonic time once per main-loop iteration. An
/// external supervisor treats a timestamp more than 5 s stale as a dead
/// process.
pub struct Watchdog {
    path: PathBuf,
}

impl Watchdog {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join(WATCHDOG_FILE),
        }
    }

    pub fn beat(&self) {
        let ms = monotonic_ms();
        if let Ok(mut file) = File::create(&self.path) {
            let _ = writeln!(file, "{ms}");
            let _ = file.flush();
        }
    }

    pub fn last_beat_ms(&self) -> Option<u64> {
        std::fs::read_to_string(&self.path)
            .ok()?
            .trim()
            .parse()
            .ok()
    }
}

// ---------------------------------------------------------------------------
// Panic-isolating task wrapper
// ---------------------------------------------------------------------------

/// Run a task body so an uncaught panic disables the owning engine instead
/// of crashing the process.
pub async fn supervised<F>(name: &str, disabled_flag: Arc<AtomicBool>, body: F)
where
    F: std::future::Future<Output = ()>,
{
    match std::panic::AssertUnwindSafe(body).catch_unwind().await {
        Ok(()) => {}
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!(thread = name, panic = %message, "THREAD FAILURE — engine disabled");
            disabled_flag.store(true, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_lock_on_same_name_fails() {
        let name = format!("chimera-test-{}", std::process::id());
        let first = InstanceLock::acquire(&name).expect("first lock");
        assert!(first.path().exists());
        assert!(InstanceLock::acquire(&name).is_none(), "second lock must fail");
        drop(first);
        // released on drop: a fresh acquire succeeds
        assert!(InstanceLock::acquire(&name).is_some());
        let _ = std::fs::remove_file(format!("/tmp/{name}.lock"));
    }

    #[test]
    fn watchdog_writes_parseable_monotonic_ms() {
        let dir = tempfile::tempdir().unwrap();
        let w = Watchdog::new(dir.path());
        w.beat();
        let first = w.last_beat_ms().expect("beat written");
        w.beat();
        let second = w.last_beat_ms().unwrap();
        assert!(second >= first);
    }

    #[tokio::test]
    async fn supervised_swallows_panic_and_sets_flag() {
        let flag = Arc::new(AtomicBool::new(false));
        supervised("test-engine", flag.clone(), async {
            panic!("engine blew up");
        })
        .await;
        assert!(flag.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn supervised_clean_exit_leaves_flag_clear() {
        let flag = Arc::new(AtomicBool::new(false));
        supervised("test-engine", flag.clone(), async {}).await;
        assert!(!flag.load(Ordering::SeqCst));
    }
}
