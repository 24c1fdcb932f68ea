//! Single-flight guard for full and incremental runs, plus the scheduler handle.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio_cron_scheduler::JobScheduler;
use uuid::Uuid;

#[derive(Debug, Default)]
struct GuardState {
    running: bool,
    active_run: Option<Uuid>,
}

/// Owns the "is a guarded run in progress" state for one process.
///
/// The flag is claimed with [`try_begin`](Self::try_begin) before the run
/// record exists, so two concurrent callers can never both pass.
#[derive(Default)]
pub struct SyncCoordinator {
    state: Mutex<GuardState>,
    pub(crate) scheduler: tokio::sync::Mutex<Option<JobScheduler>>,
}

impl SyncCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, GuardState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim the guard. Returns `false` when a run already holds it.
    pub fn try_begin(&self) -> bool {
        let mut state = self.state();
        if state.running {
            return false;
        }
        state.running = true;
        state.active_run = None;
        true
    }

    pub fn set_active(&self, run_id: Uuid) {
        self.state().active_run = Some(run_id);
    }

    /// Give the guard back after a claim whose run never got created.
    pub fn abort(&self) {
        let mut state = self.state();
        if state.active_run.is_none() {
            state.running = false;
        }
    }

    /// Release the guard if `run_id` still owns it.
    pub fn finish(&self, run_id: Uuid) -> bool {
        let mut state = self.state();
        if state.active_run == Some(run_id) {
            state.running = false;
            state.active_run = None;
            true
        } else {
            false
        }
    }

    /// Release the guard held by the active run and return that run.
    ///
    /// A claim whose run record is still being written is left alone.
    pub fn take_active(&self) -> Option<Uuid> {
        let mut state = self.state();
        let run_id = state.active_run.take()?;
        state.running = false;
        Some(run_id)
    }

    pub fn is_running(&self) -> bool {
        self.state().running
    }

    pub fn active_run(&self) -> Option<Uuid> {
        self.state().active_run
    }

    pub fn is_active(&self, run_id: Uuid) -> bool {
        self.state().active_run == Some(run_id)
    }
}
