//! Unbounded ingress queue decoupling upstream push callbacks from the
//! dispatcher.
//!
//! Callbacks append under a short-lived lock and issue a non-blocking
//! wakeup; the dispatcher awaits the wakeup and drains the queue until
//! empty. At least one wakeup is issued per append; coalesced wakeups are
//! tolerated because the consumer always drains to empty.

use std::collections::VecDeque;
use std::sync::Mutex;

use tokio::sync::Notify;

pub(crate) struct EventQueue<T> {
    entries: Mutex<VecDeque<T>>,
    wakeup: Notify,
}

impl<T> EventQueue<T> {
    pub(crate) fn new() -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            wakeup: Notify::new(),
        }
    }

    /// Append an entry and wake the consumer. Never blocks, so it is safe to
    /// call from upstream callbacks.
    pub(crate) fn push(&self, entry: T) {
        self.entries
            .lock()
            .expect("event queue lock")
            .push_back(entry);
        self.wakeup.notify_one();
    }

    /// Pop the head entry, if any.
    pub(crate) fn try_pop(&self) -> Option<T> {
        self.entries.lock().expect("event queue lock").pop_front()
    }

    /// Resolve once a wakeup has been issued. A wakeup issued before this is
    /// awaited is not lost; it completes the next call immediately.
    pub(crate) async fn notified(&self) {
        self.wakeup.notified().await;
    }
}
