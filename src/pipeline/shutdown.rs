//! Cooperative shutdown between the signal handler and the supervisor thread.
//!
//! Nothing is ever sent on the channel: triggering drops the sender, which
//! every receiver observes as a disconnect. Dropping the trigger therefore
//! also requests shutdown.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::time::Duration;

/// Owned by whoever may stop the supervisor.
#[derive(Debug)]
pub struct ShutdownTrigger {
    _tx: Sender<()>,
}

impl ShutdownTrigger {
    /// Request shutdown. Consumes the trigger.
    pub fn trigger(self) {}
}

/// Observed by the supervisor. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: Receiver<()>,
}

impl ShutdownSignal {
    pub fn is_triggered(&self) -> bool {
        matches!(self.rx.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// Sleep for `timeout` unless shutdown is requested first.
    ///
    /// Returns true if shutdown was requested.
    pub fn wait(&self, timeout: Duration) -> bool {
        matches!(
            self.rx.recv_timeout(timeout),
            Err(RecvTimeoutError::Disconnected)
        )
    }
}

pub fn shutdown_channel() -> (ShutdownTrigger, ShutdownSignal) {
    let (tx, rx) = crossbeam_channel::bounded(0);
    (ShutdownTrigger { _tx: tx }, ShutdownSignal { rx })
}
