//! Per-service request counters.

use ptlsvc_core::error::Malformed;

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct ServiceStats {
    received: AtomicU64,
    handled: AtomicU64,
    handler_errors: AtomicU64,
    too_short: AtomicU64,
    bad_magic: AtomicU64,
    bad_version: AtomicU64,
    rearmed: AtomicU64,
}

/// Point-in-time copy of [`ServiceStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Events claimed by a worker.
    pub received: u64,
    /// Requests the handler accepted.
    pub handled: u64,
    /// Requests the handler failed (or panicked on).
    pub handler_errors: u64,
    pub too_short: u64,
    pub bad_magic: u64,
    pub bad_version: u64,
    /// Buffers handed back to the transport after a delivery.
    pub rearmed: u64,
}

impl StatsSnapshot {
    /// All validation rejections.
    pub fn malformed(&self) -> u64 {
        self.too_short + self.bad_magic + self.bad_version
    }
}

impl ServiceStats {
    #[inline]
    pub(crate) fn on_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn on_handled(&self) {
        self.handled.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn on_handler_error(&self) {
        self.handler_errors.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn on_rearmed(&self) {
        self.rearmed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn on_malformed(&self, kind: &Malformed) {
        let counter = match kind {
            Malformed::TooShort { .. } => &self.too_short,
            Malformed::BadMagic { .. } => &self.bad_magic,
            Malformed::BadVersion { .. } => &self.bad_version,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            handled: self.handled.load(Ordering::Relaxed),
            handler_errors: self.handler_errors.load(Ordering::Relaxed),
            too_short: self.too_short.load(Ordering::Relaxed),
            bad_magic: self.bad_magic.load(Ordering::Relaxed),
            bad_version: self.bad_version.load(Ordering::Relaxed),
            rearmed: self.rearmed.load(Ordering::Relaxed),
        }
    }
}
