use std::time::Duration;

use tokio::sync::watch;

/// Observable lifecycle status of a persistent actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Recovering,
    Running,
    /// An append is in flight; new commands are being stashed.
    Persisting,
    /// Failed and waiting to be restarted.
    BackingOff { attempt: u32, delay: Duration },
    Stopped,
}

pub type StatusTx = watch::Sender<Status>;
pub type StatusRx = watch::Receiver<Status>;

/// Publishes status changes of one actor to every watcher.
#[derive(Debug)]
pub(crate) struct Monitor {
    tx: StatusTx,
}

// Implementations

impl Status {
    pub fn is_stopped(&self) -> bool {
        matches!(self, Status::Stopped)
    }

    pub fn is_running(&self) -> bool {
        matches!(self, Status::Running | Status::Persisting)
    }
}

impl Monitor {
    pub(crate) fn new() -> (Self, StatusRx) {
        let (tx, rx) = watch::channel(Status::Recovering);
        (Self { tx }, rx)
    }

    pub(crate) fn report(&self, status: Status) {
        self.tx.send_if_modified(|current| {
            if *current == status {
                return false;
            }
            *current = status;
            true
        });
    }
}
