//! One-shot timers used by the supervisor to delay restarts.
//!
//! Contract: a task that was scheduled successfully runs exactly once, unless
//! it is cancelled first. Shutting the scheduler down runs every outstanding
//! task right away instead of dropping it; dropping the scheduler counts as
//! shutting it down. Scheduling on a scheduler that was
//! shut down, or outside of a tokio runtime, fails immediately.

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU8, Ordering},
    },
    time::Duration,
};

use tokio::{runtime::Handle, select, sync::watch};

use crate::errors::SchedulerError;

pub type Task = Box<dyn FnOnce() + Send + 'static>;

pub trait Scheduler: Send + Sync + 'static {
    fn schedule_once(&self, delay: Duration, task: Task) -> Result<Cancellable, SchedulerError>;

    /// Run outstanding tasks now and refuse new ones.
    fn shutdown(&self);
}

/// Handle to a scheduled task.
#[derive(Debug, Clone)]
pub struct Cancellable {
    state: Arc<AtomicU8>,
}

#[derive(Debug)]
pub struct TokioScheduler {
    shutdown_tx: watch::Sender<bool>,
    is_shut_down: AtomicBool,
}

const PENDING: u8 = 0;
const RAN: u8 = 1;
const CANCELLED: u8 = 2;

// Implementations

impl Cancellable {
    fn new() -> Self {
        Self {
            state: Arc::new(AtomicU8::new(PENDING)),
        }
    }

    /// Prevent the task from running. `false` if it already ran or was
    /// cancelled before.
    pub fn cancel(&self) -> bool {
        self.state
            .compare_exchange(PENDING, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.load(Ordering::Acquire) == CANCELLED
    }

    fn try_run(&self) -> bool {
        self.state
            .compare_exchange(PENDING, RAN, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl TokioScheduler {
    pub fn new() -> Self {
        Self {
            shutdown_tx: watch::Sender::new(false),
            is_shut_down: AtomicBool::new(false),
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.is_shut_down.load(Ordering::Acquire)
    }
}

impl Default for TokioScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for TokioScheduler {
    fn schedule_once(&self, delay: Duration, task: Task) -> Result<Cancellable, SchedulerError> {
        if self.is_shut_down() {
            return Err(SchedulerError::ShutDown);
        }

        let handle = Handle::try_current().map_err(|_| SchedulerError::NoRuntime)?;

        let cancellable = Cancellable::new();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        handle.spawn({
            let cancellable = cancellable.clone();

            async move {
                select! {
                    _ = tokio::time::sleep(delay) => {},
                    _ = shutdown_rx.wait_for(|is_shut_down| *is_shut_down) => {},
                }

                if cancellable.try_run() {
                    task();
                }
            }
        });

        Ok(cancellable)
    }

    fn shutdown(&self) {
        self.is_shut_down.store(true, Ordering::Release);
        self.shutdown_tx.send_replace(true);
    }
}

impl fmt::Debug for dyn Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Scheduler")
    }
}
