use std::sync::atomic::{AtomicU8, Ordering};

use super::result::RunStatus;
use super::types::{ImportError, SourceKind};

const IDLE: u8 = 0;
const RUNNING: u8 = 1;

/// Single-flight guard: at most one in-flight run per import kind.
///
/// The idle->running transition is a single compare-and-swap, so two
/// concurrent triggers can never both observe idle and both start. Losers are
/// rejected immediately, not queued.
pub struct RunGuard {
    slots: [AtomicU8; 2],
}

impl RunGuard {
    pub fn new() -> Self {
        Self {
            slots: [AtomicU8::new(IDLE), AtomicU8::new(IDLE)],
        }
    }

    /// Attempts to claim the run slot for `kind` in one atomic step.
    pub fn try_acquire(&self, kind: SourceKind) -> Result<RunPermit<'_>, ImportError> {
        let slot = &self.slots[kind.slot()];
        slot.compare_exchange(IDLE, RUNNING, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| ImportError::AlreadyRunning(kind.as_str()))?;
        Ok(RunPermit { slot })
    }

    pub fn status(&self, kind: SourceKind) -> RunStatus {
        if self.slots[kind.slot()].load(Ordering::Acquire) == RUNNING {
            RunStatus::Running
        } else {
            RunStatus::Idle
        }
    }
}

impl Default for RunGuard {
    fn default() -> Self {
        Self::new()
    }
}

/// Releases the claimed slot on drop, on every exit path.
pub struct RunPermit<'a> {
    slot: &'a AtomicU8,
}

impl Drop for RunPermit<'_> {
    fn drop(&mut self) {
        self.slot.store(IDLE, Ordering::Release);
    }
}
