//! State shared by every trigger handler and run

use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, MutexGuard};
use tracing::debug;

use crate::types::DeviceId;

/// Lines collected during a run for the aggregated notification
#[derive(Debug, Default)]
pub struct MessageLog {
    lines: Mutex<Vec<String>>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, line: impl Into<String>) {
        self.lines.lock().push(line.into());
    }

    pub fn is_empty(&self) -> bool {
        self.lines.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.lines.lock().len()
    }

    /// Take every line, leaving the log empty
    pub fn drain(&self) -> Vec<String> {
        std::mem::take(&mut *self.lines.lock())
    }
}

/// Count of plug/unplug resolutions in flight
#[derive(Debug, Default)]
pub struct StaleWaits {
    pending: AtomicUsize,
}

impl StaleWaits {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Mark a stale window open until the guard drops
    pub fn enter(&self) -> StaleGuard<'_> {
        let pending = self.pending.fetch_add(1, Ordering::SeqCst) + 1;
        debug!("Stale wait entered ({} pending)", pending);
        StaleGuard { waits: self }
    }
}

/// Closes one stale window on drop, including on error or cancellation
#[derive(Debug)]
pub struct StaleGuard<'a> {
    waits: &'a StaleWaits,
}

impl Drop for StaleGuard<'_> {
    fn drop(&mut self) {
        let previous = self.waits.pending.fetch_sub(1, Ordering::SeqCst);
        debug!("Stale wait left ({} pending)", previous - 1);
    }
}

/// Shared context of one arbiter
#[derive(Debug)]
pub struct RunContext {
    pub budget_amps: i32,
    pub devices: Vec<DeviceId>,
    pub messages: MessageLog,
    pub stale_waits: StaleWaits,
    run_lock: AsyncMutex<()>,
}

impl RunContext {
    pub fn new(budget_amps: i32, devices: Vec<DeviceId>) -> Self {
        Self {
            budget_amps,
            devices,
            messages: MessageLog::new(),
            stale_waits: StaleWaits::new(),
            run_lock: AsyncMutex::new(()),
        }
    }

    /// Zero-wait probe of the run lock
    pub fn try_begin_run(&self) -> Option<MutexGuard<'_, ()>> {
        self.run_lock.try_lock().ok()
    }
}
