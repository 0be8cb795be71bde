//! Completion notification abstraction.
//!
//! A `Notifier` wakes the service threads waiting for events when the
//! transport queues a new completion.
//!
//! **Contract:**
//! - `notify()` is called after the event is visible to `poll_event()`.
//! - `notify()` may briefly take the consumer's lock but never blocks on
//!   anything else.
//! - Multiple calls before a consumer wakes are coalesced.

pub trait Notifier: Send + Sync {
    /// Signal that a completion is available.
    fn notify(&self);
}

/// Notifier that does nothing, for sources polled without waiting.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn notify(&self) {}
}
