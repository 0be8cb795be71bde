//! `Service` — construction, teardown and introspection.
//!
//! ```text
//!  Service
//!  ├── config          immutable after construction
//!  ├── pool            buffer_count descriptors of buffer_size bytes
//!  ├── source          one event source, capacity = buffer_count
//!  └── wq ─ lock ─ SvcState { threads, fault }
//!        └ cond        "event queued or stop requested"
//! ```

use ptlsvc_core::buffer::BufferState;
use ptlsvc_core::error::{Fault, Result, SvcError};
use ptlsvc_core::event::{BufferId, EventSourceId, PeerAddr};
use ptlsvc_core::export::ExportResolver;
use ptlsvc_core::notifier::Notifier;
use ptlsvc_core::request::RequestHandler;
use ptlsvc_core::transport::Transport;

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;

use crate::config::ServiceConfig;
use crate::pool::BufferPool;
use crate::stats::{ServiceStats, StatsSnapshot};
use crate::thread::{SvcThreadId, ThreadEntry, ThreadState};

/// State guarded by the service lock.
pub(crate) struct SvcState {
    pub(crate) threads: Vec<ThreadEntry>,
    pub(crate) fault: Option<Fault>,
    pub(crate) next_thread_id: u32,
}

impl SvcState {
    pub(crate) fn thread(&self, id: u32) -> Option<&ThreadEntry> {
        self.threads.iter().find(|t| t.id == id)
    }

    pub(crate) fn thread_mut(&mut self, id: u32) -> Option<&mut ThreadEntry> {
        self.threads.iter_mut().find(|t| t.id == id)
    }
}

/// The service lock and its event condition.
///
/// Registered with the transport as the event source's notifier. Taking
/// the lock before waking closes the window between a worker finding the
/// source empty and starting to wait.
pub(crate) struct WaitQueue {
    pub(crate) lock: Mutex<SvcState>,
    pub(crate) cond: Condvar,
}

impl Notifier for WaitQueue {
    fn notify(&self) {
        let _guard = self.lock.lock();
        self.cond.notify_all();
    }
}

/// Everything worker threads share with the owning `Service`.
pub(crate) struct Shared<T: Transport + 'static> {
    pub(crate) config: ServiceConfig,
    pub(crate) transport: Arc<T>,
    pub(crate) resolver: Arc<dyn ExportResolver>,
    pub(crate) handler: Box<dyn RequestHandler>,
    pub(crate) wq: Arc<WaitQueue>,
    pub(crate) pool: BufferPool,
    pub(crate) source: EventSourceId,
    pub(crate) self_peer: PeerAddr,
    pub(crate) stats: ServiceStats,
}

impl<T: Transport + 'static> Shared<T> {
    /// Record a fatal fault and wake every worker so they stop.
    ///
    /// Called with the service lock held. The first fault wins.
    pub(crate) fn raise_fault(&self, st: &mut SvcState, fault: Fault) {
        tracing::error!(service = %self.config.name, %fault, "service fault");
        if st.fault.is_none() {
            st.fault = Some(fault);
        }
        self.wq.cond.notify_all();
        if self.config.abort_on_fault {
            tracing::error!(service = %self.config.name, "aborting on fault");
            std::process::abort();
        }
    }
}

/// A request service: receive buffers, an event source, and a pool of
/// worker threads dispatching to one handler.
pub struct Service<T: Transport + 'static> {
    pub(crate) shared: Arc<Shared<T>>,
    torn_down: bool,
}

impl<T: Transport + 'static> Service<T> {
    /// Build a service and arm all of its buffers.
    ///
    /// No thread is started; see [`start_thread`](Self::start_thread).
    /// On failure everything acquired so far is released.
    pub fn new<R, H>(
        config: ServiceConfig,
        transport: Arc<T>,
        resolver: Arc<R>,
        handler: H,
    ) -> Result<Self>
    where
        R: ExportResolver + 'static,
        H: RequestHandler + 'static,
    {
        config.validate()?;

        let pool = BufferPool::allocate(config.buffer_count, config.buffer_size)?;

        let self_peer = transport.resolve_peer(&config.local_uuid).map_err(|e| {
            tracing::error!(uuid = %config.local_uuid, "cannot get peer for uuid");
            e
        })?;

        let wq = Arc::new(WaitQueue {
            lock: Mutex::new(SvcState {
                threads: Vec::new(),
                fault: None,
                next_thread_id: 0,
            }),
            cond: Condvar::new(),
        });

        // Exactly one event per queued buffer.
        let notifier: Arc<dyn Notifier> = wq.clone();
        let source = transport
            .open_event_source(&self_peer, config.buffer_count, notifier)
            .map_err(|e| {
                tracing::error!(error = %e, "event source allocation failed");
                e
            })?;

        if let Err(e) = pool.arm_all(&*transport, source, config.request_portal) {
            tracing::error!(service = %config.name, error = %e, "arming request buffers failed");
            if let Some(unarm) = pool.retire_all(&*transport) {
                tracing::error!(service = %config.name, error = %unarm, "unwinding armed buffers failed");
            }
            if let Err(e) = transport.close_event_source(source) {
                tracing::error!(error = %e, "event source release failed");
            }
            return Err(e);
        }

        tracing::info!(
            service = %config.name,
            portal = config.request_portal.0,
            buffers = config.buffer_count,
            buffer_size = config.buffer_size,
            "starting service listening on portal"
        );

        Ok(Self {
            shared: Arc::new(Shared {
                config,
                transport,
                resolver: resolver as Arc<dyn ExportResolver>,
                handler: Box::new(handler),
                wq,
                pool,
                source,
                self_peer,
                stats: ServiceStats::default(),
            }),
            torn_down: false,
        })
    }

    /// Stop using the service and release its transport resources.
    ///
    /// Worker threads should already be stopped; any still registered are
    /// stopped first. Completions still queued are discarded and reported
    /// as [`SvcError::Busy`]. Otherwise the first unarm or event source
    /// error is returned. Cleanup always runs to the end.
    pub fn teardown(mut self) -> Result<()> {
        self.torn_down = true;
        self.release()
    }

    fn release(&self) -> Result<()> {
        let shared = &self.shared;
        let name = &shared.config.name;

        if self.thread_count() > 0 {
            tracing::warn!(service = %name, threads = self.thread_count(), "teardown with threads running; stopping them");
            self.stop_all_threads();
        }

        let mut first_err: Option<SvcError> = None;

        let mut pending = 0usize;
        loop {
            match shared.transport.poll_event(shared.source) {
                Ok(Some(event)) => {
                    pending += 1;
                    let id = event.buffer_id;
                    let retired = shared
                        .pool
                        .deliver(id)
                        .and_then(|()| shared.pool.retire_delivered(id, event.buffer));
                    if let Err(fault) = retired {
                        tracing::error!(service = %name, %fault, "discarding queued event");
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::error!(service = %name, error = %e, "draining event source failed");
                    first_err.get_or_insert(e);
                    break;
                }
            }
        }

        if let Some(e) = shared.pool.retire_all(&*shared.transport) {
            first_err.get_or_insert(e);
        }

        if let Err(e) = shared.transport.close_event_source(shared.source) {
            tracing::error!(service = %name, error = %e, "event source release failed");
            first_err.get_or_insert(e);
        }

        if pending > 0 {
            tracing::error!(service = %name, pending, "request list not empty");
            return Err(SvcError::Busy { pending });
        }

        tracing::debug!(service = %name, "service unregistered");
        first_err.map_or(Ok(()), Err)
    }

    // ── Introspection ────────────────────────────────────────────────

    pub fn name(&self) -> &str {
        &self.shared.config.name
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.shared.config
    }

    /// Transport peer the local uuid resolved to.
    pub fn self_peer(&self) -> PeerAddr {
        self.shared.self_peer
    }

    pub fn event_source(&self) -> EventSourceId {
        self.shared.source
    }

    /// Registered worker threads, whatever their state.
    pub fn thread_count(&self) -> usize {
        self.shared.wq.lock.lock().threads.len()
    }

    pub fn thread_ids(&self) -> Vec<SvcThreadId> {
        self.shared
            .wq
            .lock
            .lock()
            .threads
            .iter()
            .map(|t| SvcThreadId(t.id))
            .collect()
    }

    pub fn thread_state(&self, id: SvcThreadId) -> Option<ThreadState> {
        self.shared.wq.lock.lock().thread(id.0).map(|t| t.state)
    }

    /// The fault that stopped the service, if any.
    pub fn fault(&self) -> Option<Fault> {
        self.shared.wq.lock.lock().fault.clone()
    }

    pub fn buffer_count(&self) -> usize {
        self.shared.pool.len()
    }

    pub fn buffer_size(&self) -> usize {
        self.shared.pool.buf_size()
    }

    /// Descriptors currently able to receive. Buffers whose completion is
    /// queued but unclaimed count as delivering.
    pub fn armed_count(&self) -> usize {
        self.shared.pool.count(&*self.shared.transport, BufferState::Armed)
    }

    pub fn buffers_in(&self, state: BufferState) -> usize {
        self.shared.pool.count(&*self.shared.transport, state)
    }

    pub fn buffer_state(&self, id: BufferId) -> Option<BufferState> {
        self.shared.pool.state(&*self.shared.transport, id)
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }
}

impl<T: Transport + 'static> Drop for Service<T> {
    fn drop(&mut self) {
        if self.torn_down {
            return;
        }
        if let Err(e) = self.release() {
            tracing::warn!(service = %self.shared.config.name, error = %e, "implicit teardown");
        }
    }
}
