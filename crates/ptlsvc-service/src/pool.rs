//! Request buffer pool.
//!
//! A fixed array of [`BufferDesc`], each behind its own lock. The service
//! lock is never held while a descriptor changes state: the transport
//! delivers one completion per armed buffer and only the worker that
//! claimed it touches that descriptor, so the per-descriptor lock is
//! uncontended and only makes the hand-off visible across threads.

use ptlsvc_core::buffer::{BufferDesc, BufferState};
use ptlsvc_core::error::{Fault, Result, SvcError};
use ptlsvc_core::event::{BufferId, EventSourceId, Portal};
use ptlsvc_core::transport::Transport;

use parking_lot::Mutex;

pub(crate) struct BufferPool {
    descs: Box<[Mutex<BufferDesc>]>,
    buf_size: usize,
}

impl BufferPool {
    /// Allocate `count` unarmed buffers of `size` bytes.
    pub(crate) fn allocate(count: usize, size: usize) -> Result<Self> {
        let mut descs = Vec::new();
        descs
            .try_reserve_exact(count)
            .map_err(|_| SvcError::ResourceExhausted("buffer descriptors"))?;
        for i in 0..count {
            descs.push(Mutex::new(BufferDesc::allocate(BufferId(i as u32), size)?));
        }
        Ok(Self {
            descs: descs.into_boxed_slice(),
            buf_size: size,
        })
    }

    pub(crate) fn len(&self) -> usize {
        self.descs.len()
    }

    pub(crate) fn buf_size(&self) -> usize {
        self.buf_size
    }

    fn desc(&self, id: BufferId) -> std::result::Result<&Mutex<BufferDesc>, Fault> {
        self.descs
            .get(id.index())
            .ok_or(Fault::UnknownBuffer { id })
    }

    /// Arm every descriptor. Stops at the first failure.
    pub(crate) fn arm_all<T: Transport + ?Sized>(
        &self,
        transport: &T,
        source: EventSourceId,
        portal: Portal,
    ) -> Result<()> {
        for desc in self.descs.iter() {
            let mut d = desc.lock();
            let id = d.id();
            d.arm(|buf| transport.arm_buffer(source, portal, id, buf))?;
        }
        Ok(())
    }

    /// Armed → Delivering for the descriptor an event names.
    pub(crate) fn deliver(&self, id: BufferId) -> std::result::Result<(), Fault> {
        self.desc(id)?.lock().deliver()
    }

    /// Delivering → Armed, handing `buf` back to the transport.
    pub(crate) fn rearm<T: Transport + ?Sized>(
        &self,
        transport: &T,
        source: EventSourceId,
        portal: Portal,
        id: BufferId,
        buf: Box<[u8]>,
    ) -> std::result::Result<(), Fault> {
        self.desc(id)?
            .lock()
            .rearm(buf, |buf| transport.arm_buffer(source, portal, id, buf))
    }

    /// Delivering → Retired; the receive slot is given up.
    pub(crate) fn retire_delivered(
        &self,
        id: BufferId,
        buf: Box<[u8]>,
    ) -> std::result::Result<(), Fault> {
        self.desc(id)?.lock().retire_delivered(buf)
    }

    /// Retire every descriptor, unarming those still armed.
    ///
    /// Unarm failures are logged and do not stop the sweep. Returns the
    /// first one.
    pub(crate) fn retire_all<T: Transport + ?Sized>(&self, transport: &T) -> Option<SvcError> {
        let mut first = None;
        for desc in self.descs.iter() {
            let mut d = desc.lock();
            let id = d.id();
            if let Err(e) = d.retire(|h| transport.unarm_buffer(h)) {
                tracing::error!(buffer = %id, error = %e, "unarm failed");
                first.get_or_insert(e);
            }
        }
        first
    }

    /// State of a descriptor as seen from outside the worker threads.
    ///
    /// A descriptor whose registration the transport has already consumed
    /// reads as `Delivering` even before a worker claims the completion.
    pub(crate) fn state<T: Transport + ?Sized>(
        &self,
        transport: &T,
        id: BufferId,
    ) -> Option<BufferState> {
        self.descs
            .get(id.index())
            .map(|d| observed(&d.lock(), transport))
    }

    pub(crate) fn count<T: Transport + ?Sized>(&self, transport: &T, state: BufferState) -> usize {
        self.descs
            .iter()
            .filter(|d| observed(&d.lock(), transport) == state)
            .count()
    }
}

fn observed<T: Transport + ?Sized>(desc: &BufferDesc, transport: &T) -> BufferState {
    match desc.arm_handle() {
        Some(h) if !transport.is_armed(h) => BufferState::Delivering,
        _ => desc.state(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ptlsvc_core::notifier::NoopNotifier;
    use ptlsvc_module::LoopbackTransport;
    use std::sync::Arc;

    fn setup(count: usize) -> (LoopbackTransport, EventSourceId, BufferPool) {
        let t = LoopbackTransport::new();
        let peer = t.register_peer("self", 1);
        let src = t
            .open_event_source(&peer, count, Arc::new(NoopNotifier))
            .unwrap();
        let pool = BufferPool::allocate(count, 256).unwrap();
        (t, src, pool)
    }

    #[test]
    fn test_arm_all() {
        let (t, src, pool) = setup(4);
        assert_eq!(pool.count(&t, BufferState::Unarmed), 4);
        pool.arm_all(&t, src, Portal(4)).unwrap();
        assert_eq!(pool.count(&t, BufferState::Armed), 4);
        assert_eq!(t.armed_on(Portal(4)), 4);
        assert_eq!(pool.len(), 4);
        assert_eq!(pool.buf_size(), 256);
    }

    #[test]
    fn test_partial_arm_then_retire() {
        let (t, src, pool) = setup(4);
        t.fail_arm_after(2);
        assert!(pool.arm_all(&t, src, Portal(4)).is_err());
        assert_eq!(pool.count(&t, BufferState::Armed), 2);
        assert_eq!(pool.state(&t, BufferId(2)), Some(BufferState::Retired));
        assert_eq!(pool.state(&t, BufferId(3)), Some(BufferState::Unarmed));

        assert!(pool.retire_all(&t).is_none());
        assert_eq!(pool.count(&t, BufferState::Retired), 4);
        assert_eq!(t.armed_count(), 0);
    }

    #[test]
    fn test_deliver_rearm_cycle() {
        let (t, src, pool) = setup(2);
        pool.arm_all(&t, src, Portal(4)).unwrap();
        t.send(Portal(4), 2, 9, b"payload").unwrap();
        // Queued but not yet claimed.
        assert_eq!(pool.count(&t, BufferState::Delivering), 1);
        assert_eq!(pool.count(&t, BufferState::Armed), 1);

        let ev = t.poll_event(src).unwrap().unwrap();
        pool.deliver(ev.buffer_id).unwrap();
        assert_eq!(pool.count(&t, BufferState::Delivering), 1);
        assert_eq!(pool.count(&t, BufferState::Armed), 1);

        pool.rearm(&t, src, Portal(4), ev.buffer_id, ev.buffer).unwrap();
        assert_eq!(pool.count(&t, BufferState::Armed), 2);
        assert_eq!(t.armed_on(Portal(4)), 2);
    }

    #[test]
    fn test_unknown_buffer() {
        let (t, _src, pool) = setup(1);
        assert_eq!(
            pool.deliver(BufferId(9)),
            Err(Fault::UnknownBuffer { id: BufferId(9) })
        );
        assert_eq!(pool.state(&t, BufferId(9)), None);
    }
}
