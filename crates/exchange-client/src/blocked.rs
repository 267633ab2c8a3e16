//! One-shot wakeup signals for callers waiting on exchange progress

use tokio::sync::oneshot;

/// Set of parked caller signals, each completed exactly once.
///
/// A signal is handed out when a caller asks whether it must wait; the next
/// wakeup (page arrival, close, or failure) drains the set and completes
/// every outstanding signal. Receivers dropped by their owner are tolerated.
#[derive(Default)]
pub(crate) struct BlockedCallers {
    waiting: Vec<oneshot::Sender<()>>,
}

impl BlockedCallers {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Hand out a signal completed by the next `notify_all`
    pub(crate) fn register(&mut self) -> oneshot::Receiver<()> {
        let (sender, receiver) = oneshot::channel();
        self.waiting.push(sender);
        receiver
    }

    /// A signal that is already complete; no wait required
    pub(crate) fn ready() -> oneshot::Receiver<()> {
        let (sender, receiver) = oneshot::channel();
        let _ = sender.send(());
        receiver
    }

    /// Complete and drop every outstanding signal
    pub(crate) fn notify_all(&mut self) {
        for caller in self.waiting.drain(..) {
            let _ = caller.send(());
        }
    }

    #[cfg(test)]
    pub(crate) fn waiting_count(&self) -> usize {
        self.waiting.len()
    }
}
