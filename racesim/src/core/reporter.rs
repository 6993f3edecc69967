use crate::core::racer::ProgressEvent;
use flume::{Receiver, Sender};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("progress reporter closed")]
pub struct ReporterClosed;

/// ProgressReporter is the sink a racer pushes its events into. Every racer gets its own
/// channel, such that the coordinator sees each racer's events in emission order.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    tx: Sender<ProgressEvent>,
}

impl ProgressReporter {
    pub fn new(tx: Sender<ProgressEvent>) -> ProgressReporter {
        ProgressReporter { tx }
    }

    /// channel creates a reporter together with the receiving end for the coordinator.
    pub fn channel() -> (ProgressReporter, Receiver<ProgressEvent>) {
        let (tx, rx) = flume::unbounded();
        (ProgressReporter::new(tx), rx)
    }

    /// is_closed tells whether the receiving end is gone.
    pub fn is_closed(&self) -> bool {
        self.tx.is_disconnected()
    }

    pub fn report(&self, event: ProgressEvent) -> Result<(), ReporterClosed> {
        self.tx.send(event).map_err(|_| ReporterClosed)
    }
}
