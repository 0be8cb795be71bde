//! Network transport abstraction.
//!
//! A `Transport` registers receive buffers on portals and reports each
//! completed receive through an event source.
//!
//! # Implementors
//!
//! - `LoopbackTransport` (default): in-process delivery, used by tests and
//!   the echo demo. Supports fault injection.
//!
//! **Contract:**
//! - `arm_buffer()` takes the buffer by value. The transport holds it until
//!   exactly one of: a completion event returns it, or `unarm_buffer()`
//!   returns it.
//! - One completion per armed buffer, never more.
//! - `poll_event()` never blocks. An empty source is `Ok(None)`.
//! - After queuing an event the transport calls the source's notifier.
//! - A buffer stops being reported by `is_armed()` as soon as its
//!   completion is produced.

use std::sync::Arc;

use crate::error::Result;
use crate::event::{ArmHandle, BufferId, Event, EventSourceId, PeerAddr, Portal};
use crate::notifier::Notifier;

pub trait Transport: Send + Sync {
    /// Resolve a node uuid to a transport peer.
    ///
    /// Fails with `AddressResolutionFailed`.
    fn resolve_peer(&self, uuid: &str) -> Result<PeerAddr>;

    /// Open an event source on `peer` admitting `capacity` outstanding
    /// completions. `notifier` is called after each completion is queued.
    fn open_event_source(
        &self,
        peer: &PeerAddr,
        capacity: usize,
        notifier: Arc<dyn Notifier>,
    ) -> Result<EventSourceId>;

    /// Release an event source. Completions still queued are discarded.
    fn close_event_source(&self, source: EventSourceId) -> Result<()>;

    /// Register `buf` to receive one message on `portal`, reporting the
    /// completion on `source` tagged with `id`.
    fn arm_buffer(
        &self,
        source: EventSourceId,
        portal: Portal,
        id: BufferId,
        buf: Box<[u8]>,
    ) -> Result<ArmHandle>;

    /// Unregister an armed buffer and hand it back.
    fn unarm_buffer(&self, handle: ArmHandle) -> Result<Box<[u8]>>;

    /// Fetch the next completion, if any (non-blocking).
    fn poll_event(&self, source: EventSourceId) -> Result<Option<Event>>;

    /// Whether `handle` can still receive. False once a completion has
    /// consumed it, whether or not that completion was polled yet.
    fn is_armed(&self, handle: ArmHandle) -> bool;
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn resolve_peer(&self, uuid: &str) -> Result<PeerAddr> {
        (**self).resolve_peer(uuid)
    }

    fn open_event_source(
        &self,
        peer: &PeerAddr,
        capacity: usize,
        notifier: Arc<dyn Notifier>,
    ) -> Result<EventSourceId> {
        (**self).open_event_source(peer, capacity, notifier)
    }

    fn close_event_source(&self, source: EventSourceId) -> Result<()> {
        (**self).close_event_source(source)
    }

    fn arm_buffer(
        &self,
        source: EventSourceId,
        portal: Portal,
        id: BufferId,
        buf: Box<[u8]>,
    ) -> Result<ArmHandle> {
        (**self).arm_buffer(source, portal, id, buf)
    }

    fn unarm_buffer(&self, handle: ArmHandle) -> Result<Box<[u8]>> {
        (**self).unarm_buffer(handle)
    }

    fn poll_event(&self, source: EventSourceId) -> Result<Option<Event>> {
        (**self).poll_event(source)
    }

    fn is_armed(&self, handle: ArmHandle) -> bool {
        (**self).is_armed(handle)
    }
}
