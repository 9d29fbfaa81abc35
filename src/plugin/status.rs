//! Operational status shared between the plugin and its workers.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Coarse operational state, polled by whatever probe layer the embedder
/// runs. HTTP endpoints themselves are out of scope here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OperationalState {
    /// Constructed but not yet running
    Init = 0,
    /// Running with a reachable backend
    Ok = 1,
    /// Running but degraded (backend unreachable, resync failing)
    Error = 2,
    /// Closed
    Stopped = 3,
}

impl OperationalState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => OperationalState::Ok,
            2 => OperationalState::Error,
            3 => OperationalState::Stopped,
            _ => OperationalState::Init,
        }
    }
}

/// Lock-free status flag. The plugin writes lifecycle transitions, the
/// subscription workers flip Ok↔Error around backend outages, probes read.
#[derive(Debug)]
pub struct StatusFlag {
    state: AtomicU8,
    /// Unix seconds of the last state change
    last_change: AtomicU64,
}

impl Default for StatusFlag {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusFlag {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(OperationalState::Init as u8),
            last_change: AtomicU64::new(now_unix_secs()),
        }
    }

    pub fn set(&self, state: OperationalState) {
        let previous = self.state.swap(state as u8, Ordering::SeqCst);
        if previous != state as u8 {
            self.last_change.store(now_unix_secs(), Ordering::SeqCst);
        }
    }

    pub fn get(&self) -> OperationalState {
        OperationalState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// True only while running with a reachable backend.
    pub fn healthy(&self) -> bool {
        self.get() == OperationalState::Ok
    }

    /// Unix seconds of the most recent state transition.
    pub fn last_change(&self) -> u64 {
        self.last_change.load(Ordering::SeqCst)
    }

    /// Flip Ok -> Error; a no-op in any other state so a worker cannot
    /// resurrect a stopped plugin into Error.
    pub fn mark_backend_down(&self) {
        if self
            .state
            .compare_exchange(
                OperationalState::Ok as u8,
                OperationalState::Error as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
        {
            self.last_change.store(now_unix_secs(), Ordering::SeqCst);
        }
    }

    /// Flip Error -> Ok once the backend is reachable again.
    pub fn mark_backend_up(&self) {
        if self
            .state
            .compare_exchange(
                OperationalState::Error as u8,
                OperationalState::Ok as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
        {
            self.last_change.store(now_unix_secs(), Ordering::SeqCst);
        }
    }
}

fn now_unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
