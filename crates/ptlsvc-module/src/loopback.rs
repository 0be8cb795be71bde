//! `LoopbackTransport` — default `Transport` implementation.
//!
//! Messages are "sent" by the caller of [`LoopbackTransport::send`] and land
//! in the first buffer armed on the target portal (arming order). Each
//! event source is a bounded lock-free queue sized to the capacity asked
//! for at open time.
//!
//! Fault injection:
//! - `fail_arm_after(n)`: the next `n` arms succeed, then every arm fails.
//! - `fail_next_poll(errno)`: the next poll returns a transport error.
//! - `fail_open(true)`: opening an event source fails.
//! - `zero_next_sequence()`: the next completion carries sequence 0.
//! - `misroute_next(id)`: the next completion names descriptor `id`
//!   instead of the one that received the data.

use ptlsvc_core::error::{Result, SvcError};
use ptlsvc_core::event::{ArmHandle, BufferId, Event, EventSourceId, PeerAddr, Portal};
use ptlsvc_core::notifier::Notifier;
use ptlsvc_core::transport::Transport;

use crossbeam_queue::ArrayQueue;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

struct Source {
    queue: ArrayQueue<Event>,
    notifier: Arc<dyn Notifier>,
}

struct ArmedBuf {
    source: EventSourceId,
    portal: Portal,
    id: BufferId,
    buf: Box<[u8]>,
}

#[derive(Default)]
struct LoopState {
    peers: HashMap<String, PeerAddr>,
    sources: HashMap<EventSourceId, Arc<Source>>,
    armed: HashMap<ArmHandle, ArmedBuf>,
    /// Per-portal match list, in arming order.
    match_list: HashMap<Portal, VecDeque<ArmHandle>>,
    next_seq: u64,
    zero_next_seq: bool,
    misroute_next: Option<BufferId>,
}

pub struct LoopbackTransport {
    state: Mutex<LoopState>,
    next_handle: AtomicU64,
    /// Arms left before injected failure; `usize::MAX` = never fail.
    arms_left: AtomicUsize,
    /// Errno for the next poll; 0 = no failure.
    poll_fault: AtomicI32,
    open_fault: AtomicBool,
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LoopState::default()),
            next_handle: AtomicU64::new(1),
            arms_left: AtomicUsize::new(usize::MAX),
            poll_fault: AtomicI32::new(0),
            open_fault: AtomicBool::new(false),
        }
    }

    /// Make `uuid` resolvable as node `nid`.
    pub fn register_peer(&self, uuid: &str, nid: u64) -> PeerAddr {
        let peer = PeerAddr { nid, ni: 0 };
        self.state.lock().peers.insert(uuid.to_string(), peer);
        peer
    }

    /// Deliver `msg` from `initiator` to `portal` with match bits `xid`.
    pub fn send(&self, portal: Portal, initiator: u64, xid: u64, msg: &[u8]) -> Result<()> {
        self.send_at(portal, initiator, xid, 0, msg)
    }

    /// Like [`send`](Self::send), placing the data at `offset` in the buffer.
    ///
    /// Data beyond the end of the buffer is truncated.
    pub fn send_at(
        &self,
        portal: Portal,
        initiator: u64,
        xid: u64,
        offset: usize,
        msg: &[u8],
    ) -> Result<()> {
        let source = {
            let mut st = self.state.lock();
            let handle = st
                .match_list
                .get_mut(&portal)
                .and_then(|list| list.pop_front())
                .ok_or(SvcError::Transport {
                    op: "send",
                    code: libc::ENOSPC,
                })?;
            let mut armed = st.armed.remove(&handle).ok_or(SvcError::Transport {
                op: "send",
                code: libc::ENOENT,
            })?;
            let source = st
                .sources
                .get(&armed.source)
                .cloned()
                .ok_or(SvcError::Transport {
                    op: "send",
                    code: libc::EBADF,
                })?;

            let start = offset.min(armed.buf.len());
            let n = msg.len().min(armed.buf.len() - start);
            armed.buf[start..start + n].copy_from_slice(&msg[..n]);

            st.next_seq += 1;
            let sequence = if std::mem::take(&mut st.zero_next_seq) {
                0
            } else {
                st.next_seq
            };
            let event = Event {
                buffer_id: st.misroute_next.take().unwrap_or(armed.id),
                buffer: armed.buf,
                length: n,
                offset,
                initiator,
                sequence,
                match_bits: xid,
            };
            if source.queue.push(event).is_err() {
                tracing::error!(portal = portal.0, xid, "loopback: event source overflow, message lost");
                return Err(SvcError::Transport {
                    op: "send",
                    code: libc::EOVERFLOW,
                });
            }
            tracing::trace!(portal = armed.portal.0, xid, len = n, "loopback: delivered");
            source
        };

        source.notifier.notify();
        Ok(())
    }

    // ── Fault injection ──────────────────────────────────────────────

    /// Let `n` more arms succeed, then fail every arm with `ENOSPC`.
    pub fn fail_arm_after(&self, n: usize) {
        self.arms_left.store(n, Ordering::SeqCst);
    }

    /// Stop failing arms.
    pub fn clear_arm_fault(&self) {
        self.arms_left.store(usize::MAX, Ordering::SeqCst);
    }

    /// Fail the next poll on any source with `errno`.
    pub fn fail_next_poll(&self, errno: i32) {
        self.poll_fault.store(errno, Ordering::SeqCst);
    }

    /// Make `open_event_source` fail.
    pub fn fail_open(&self, fail: bool) {
        self.open_fault.store(fail, Ordering::SeqCst);
    }

    /// Report the next completion with a zero sequence number.
    pub fn zero_next_sequence(&self) {
        self.state.lock().zero_next_seq = true;
    }

    /// Tag the next completion with `id` whatever buffer it landed in.
    pub fn misroute_next(&self, id: BufferId) {
        self.state.lock().misroute_next = Some(id);
    }

    // ── Diagnostics ──────────────────────────────────────────────────

    /// Buffers currently armed, across all portals.
    pub fn armed_count(&self) -> usize {
        self.state.lock().armed.len()
    }

    /// Buffers currently armed on `portal`.
    pub fn armed_on(&self, portal: Portal) -> usize {
        self.state
            .lock()
            .match_list
            .get(&portal)
            .map_or(0, |list| list.len())
    }

    /// Completions queued and not yet polled.
    pub fn queued_events(&self, source: EventSourceId) -> usize {
        self.state
            .lock()
            .sources
            .get(&source)
            .map_or(0, |s| s.queue.len())
    }

    /// Number of open event sources.
    pub fn open_sources(&self) -> usize {
        self.state.lock().sources.len()
    }

    fn take_arm_permit(&self) -> bool {
        self.arms_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| match n {
                usize::MAX => Some(n),
                0 => None,
                n => Some(n - 1),
            })
            .is_ok()
    }
}

impl Transport for LoopbackTransport {
    fn resolve_peer(&self, uuid: &str) -> Result<PeerAddr> {
        self.state
            .lock()
            .peers
            .get(uuid)
            .copied()
            .ok_or_else(|| SvcError::AddressResolutionFailed {
                uuid: uuid.to_string(),
            })
    }

    fn open_event_source(
        &self,
        _peer: &PeerAddr,
        capacity: usize,
        notifier: Arc<dyn Notifier>,
    ) -> Result<EventSourceId> {
        if self.open_fault.load(Ordering::SeqCst) {
            return Err(SvcError::Transport {
                op: "open",
                code: libc::ENOMEM,
            });
        }
        if capacity == 0 {
            return Err(SvcError::Transport {
                op: "open",
                code: libc::EINVAL,
            });
        }
        let id = EventSourceId(self.next_handle.fetch_add(1, Ordering::Relaxed));
        let source = Arc::new(Source {
            queue: ArrayQueue::new(capacity),
            notifier,
        });
        self.state.lock().sources.insert(id, source);
        Ok(id)
    }

    fn close_event_source(&self, source: EventSourceId) -> Result<()> {
        match self.state.lock().sources.remove(&source) {
            Some(_) => Ok(()),
            None => Err(SvcError::Transport {
                op: "close",
                code: libc::EBADF,
            }),
        }
    }

    fn arm_buffer(
        &self,
        source: EventSourceId,
        portal: Portal,
        id: BufferId,
        buf: Box<[u8]>,
    ) -> Result<ArmHandle> {
        if !self.take_arm_permit() {
            return Err(SvcError::Transport {
                op: "arm",
                code: libc::ENOSPC,
            });
        }
        let mut st = self.state.lock();
        if !st.sources.contains_key(&source) {
            return Err(SvcError::Transport {
                op: "arm",
                code: libc::EBADF,
            });
        }
        let handle = ArmHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        st.armed.insert(
            handle,
            ArmedBuf {
                source,
                portal,
                id,
                buf,
            },
        );
        st.match_list.entry(portal).or_default().push_back(handle);
        Ok(handle)
    }

    fn unarm_buffer(&self, handle: ArmHandle) -> Result<Box<[u8]>> {
        let mut st = self.state.lock();
        let armed = st.armed.remove(&handle).ok_or(SvcError::Transport {
            op: "unarm",
            code: libc::ENOENT,
        })?;
        if let Some(list) = st.match_list.get_mut(&armed.portal) {
            list.retain(|h| *h != handle);
        }
        Ok(armed.buf)
    }

    fn poll_event(&self, source: EventSourceId) -> Result<Option<Event>> {
        let code = self.poll_fault.swap(0, Ordering::SeqCst);
        if code != 0 {
            return Err(SvcError::Transport { op: "poll", code });
        }
        let source = self
            .state
            .lock()
            .sources
            .get(&source)
            .cloned()
            .ok_or(SvcError::Transport {
                op: "poll",
                code: libc::EBADF,
            })?;
        Ok(source.queue.pop())
    }

    fn is_armed(&self, handle: ArmHandle) -> bool {
        self.state.lock().armed.contains_key(&handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ptlsvc_core::notifier::NoopNotifier;
    use std::sync::atomic::AtomicUsize;

    struct Counting(AtomicUsize);

    impl Notifier for Counting {
        fn notify(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn open(t: &LoopbackTransport, cap: usize) -> EventSourceId {
        let peer = t.register_peer("self", 1);
        t.open_event_source(&peer, cap, Arc::new(NoopNotifier)).unwrap()
    }

    fn buf(n: usize) -> Box<[u8]> {
        vec![0u8; n].into_boxed_slice()
    }

    #[test]
    fn test_resolve_peer() {
        let t = LoopbackTransport::new();
        t.register_peer("mds1", 0x42);
        assert_eq!(t.resolve_peer("mds1").unwrap().nid, 0x42);
        assert!(matches!(
            t.resolve_peer("nope"),
            Err(SvcError::AddressResolutionFailed { .. })
        ));
    }

    #[test]
    fn test_send_delivers_in_arming_order() {
        let t = LoopbackTransport::new();
        let src = open(&t, 4);
        t.arm_buffer(src, Portal(4), BufferId(0), buf(16)).unwrap();
        t.arm_buffer(src, Portal(4), BufferId(1), buf(16)).unwrap();
        assert_eq!(t.armed_on(Portal(4)), 2);

        t.send(Portal(4), 9, 100, b"hello").unwrap();
        t.send(Portal(4), 9, 101, b"world!").unwrap();
        assert_eq!(t.armed_count(), 0);
        assert_eq!(t.queued_events(src), 2);

        let e0 = t.poll_event(src).unwrap().unwrap();
        assert_eq!(e0.buffer_id, BufferId(0));
        assert_eq!(e0.match_bits, 100);
        assert_eq!(e0.data(), Some(&b"hello"[..]));
        let e1 = t.poll_event(src).unwrap().unwrap();
        assert_eq!(e1.buffer_id, BufferId(1));
        assert_eq!(e1.length, 6);
        assert!(e1.sequence > e0.sequence && e0.sequence != 0);
        assert!(t.poll_event(src).unwrap().is_none());
    }

    #[test]
    fn test_send_without_buffer() {
        let t = LoopbackTransport::new();
        let src = open(&t, 1);
        t.arm_buffer(src, Portal(4), BufferId(0), buf(16)).unwrap();
        let err = t.send(Portal(5), 1, 1, b"x").unwrap_err();
        assert!(matches!(err, SvcError::Transport { op: "send", code } if code == libc::ENOSPC));
    }

    #[test]
    fn test_send_truncates() {
        let t = LoopbackTransport::new();
        let src = open(&t, 1);
        t.arm_buffer(src, Portal(1), BufferId(0), buf(8)).unwrap();
        t.send(Portal(1), 1, 1, &[1u8; 20]).unwrap();
        let e = t.poll_event(src).unwrap().unwrap();
        assert_eq!(e.length, 8);
        assert_eq!(e.buffer.len(), 8);
    }

    #[test]
    fn test_notifier_called_per_send() {
        let t = LoopbackTransport::new();
        let peer = t.register_peer("self", 1);
        let n = Arc::new(Counting(AtomicUsize::new(0)));
        let src = t.open_event_source(&peer, 2, n.clone()).unwrap();
        t.arm_buffer(src, Portal(1), BufferId(0), buf(8)).unwrap();
        t.arm_buffer(src, Portal(1), BufferId(1), buf(8)).unwrap();
        t.send(Portal(1), 1, 1, b"a").unwrap();
        t.send(Portal(1), 1, 2, b"b").unwrap();
        assert_eq!(n.0.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_completion_consumes_registration() {
        let t = LoopbackTransport::new();
        let src = open(&t, 2);
        let h0 = t.arm_buffer(src, Portal(1), BufferId(0), buf(8)).unwrap();
        let h1 = t.arm_buffer(src, Portal(1), BufferId(1), buf(8)).unwrap();
        t.send(Portal(1), 1, 1, b"a").unwrap();
        // Not polled yet, but no longer able to receive.
        assert!(!t.is_armed(h0));
        assert!(t.is_armed(h1));
    }

    #[test]
    fn test_event_tampering() {
        let t = LoopbackTransport::new();
        let src = open(&t, 3);
        for i in 0..3 {
            t.arm_buffer(src, Portal(1), BufferId(i), buf(8)).unwrap();
        }
        t.zero_next_sequence();
        t.send(Portal(1), 1, 1, b"a").unwrap();
        t.misroute_next(BufferId(42));
        t.send(Portal(1), 1, 2, b"b").unwrap();
        t.send(Portal(1), 1, 3, b"c").unwrap();

        let e = t.poll_event(src).unwrap().unwrap();
        assert_eq!((e.buffer_id, e.sequence), (BufferId(0), 0));
        let e = t.poll_event(src).unwrap().unwrap();
        assert_eq!(e.buffer_id, BufferId(42));
        assert_ne!(e.sequence, 0);
        // Both switches are one-shot.
        let e = t.poll_event(src).unwrap().unwrap();
        assert_eq!(e.buffer_id, BufferId(2));
        assert_ne!(e.sequence, 0);
    }

    #[test]
    fn test_unarm_returns_buffer() {
        let t = LoopbackTransport::new();
        let src = open(&t, 1);
        let h = t.arm_buffer(src, Portal(1), BufferId(0), buf(32)).unwrap();
        let b = t.unarm_buffer(h).unwrap();
        assert_eq!(b.len(), 32);
        assert_eq!(t.armed_on(Portal(1)), 0);
        assert!(t.unarm_buffer(h).is_err());
    }

    #[test]
    fn test_arm_fault_injection() {
        let t = LoopbackTransport::new();
        let src = open(&t, 4);
        t.fail_arm_after(1);
        assert!(t.arm_buffer(src, Portal(1), BufferId(0), buf(8)).is_ok());
        assert!(t.arm_buffer(src, Portal(1), BufferId(1), buf(8)).is_err());
        t.clear_arm_fault();
        assert!(t.arm_buffer(src, Portal(1), BufferId(2), buf(8)).is_ok());
    }

    #[test]
    fn test_poll_fault_injection() {
        let t = LoopbackTransport::new();
        let src = open(&t, 1);
        t.fail_next_poll(libc::EIO);
        assert!(matches!(
            t.poll_event(src),
            Err(SvcError::Transport { op: "poll", code }) if code == libc::EIO
        ));
        assert!(t.poll_event(src).unwrap().is_none());
    }

    #[test]
    fn test_open_and_close() {
        let t = LoopbackTransport::new();
        let peer = t.register_peer("self", 1);
        assert!(t.open_event_source(&peer, 0, Arc::new(NoopNotifier)).is_err());
        t.fail_open(true);
        assert!(t.open_event_source(&peer, 1, Arc::new(NoopNotifier)).is_err());
        t.fail_open(false);
        let src = t.open_event_source(&peer, 1, Arc::new(NoopNotifier)).unwrap();
        assert_eq!(t.open_sources(), 1);
        t.close_event_source(src).unwrap();
        assert!(t.close_event_source(src).is_err());
        assert!(t.poll_event(src).is_err());
    }
}
