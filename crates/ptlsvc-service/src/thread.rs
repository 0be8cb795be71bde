//! Service worker threads.
//!
//! ```text
//!  Initializing ──▶ Running ──(stop requested / fault)──▶ Stopped
//!                      │  ▲                                  ▲
//!                      ▼  │                                  │
//!                   poll ⇄ dispatch          Stopping ───────┘
//! ```
//!
//! Every state change happens under the service lock. Each worker waits on
//! the shared event condition; starters and stoppers wait on the worker's
//! own control condition.

use ptlsvc_core::error::{Fault, Result, SvcError};
use ptlsvc_core::event::Event;
use ptlsvc_core::transport::Transport;

use parking_lot::{Condvar, MutexGuard};
use std::fmt;
use std::sync::Arc;
use std::thread;

use crate::dispatch;
use crate::service::{Service, Shared, SvcState};

/// Identifier of a worker thread within one service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SvcThreadId(pub u32);

impl fmt::Display for SvcThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    /// Registered, not yet looping.
    Initializing,
    /// Polling for and dispatching events.
    Running,
    /// Asked to stop; will exit at its next poll.
    Stopping,
    /// Exited its loop.
    Stopped,
}

/// Per-thread record in the service's thread collection.
pub(crate) struct ThreadEntry {
    pub(crate) id: u32,
    pub(crate) name: String,
    pub(crate) state: ThreadState,
    /// Set while this thread owns a claimed event.
    pub(crate) claimed: bool,
    /// Signalled on Running and on Stopped.
    pub(crate) ctl: Arc<Condvar>,
    pub(crate) handle: Option<thread::JoinHandle<()>>,
}

/// Outcome of one successful poll.
pub(crate) enum Claim {
    Event(Event),
    Stop,
    Fault(Fault),
}

/// One non-blocking check for work. Caller holds the service lock.
///
/// Returns `None` when there is nothing to do and the caller should wait.
pub(crate) fn poll_one<T: Transport + 'static>(
    shared: &Shared<T>,
    st: &mut SvcState,
    id: u32,
) -> Option<Claim> {
    let faulted = st.fault.is_some();
    let entry = match st.thread_mut(id) {
        Some(entry) => entry,
        None => return Some(Claim::Stop),
    };
    if entry.state == ThreadState::Stopping || faulted {
        return Some(Claim::Stop);
    }
    debug_assert!(!entry.claimed, "thread {} polled with an event claimed", id);

    match shared.transport.poll_event(shared.source) {
        Ok(Some(event)) => {
            entry.claimed = true;
            Some(Claim::Event(event))
        }
        Ok(None) => None,
        Err(e) => Some(Claim::Fault(Fault::CompletionChannel { code: e.errno() })),
    }
}

fn set_state(st: &mut SvcState, id: u32, state: ThreadState) {
    if let Some(entry) = st.thread_mut(id) {
        entry.state = state;
        entry.ctl.notify_all();
    }
}

/// Worker thread body.
pub(crate) fn worker_main<T: Transport + 'static>(shared: Arc<Shared<T>>, id: u32) {
    let wq = Arc::clone(&shared.wq);
    let mut st = wq.lock.lock();

    if st.thread(id).map(|t| t.state) == Some(ThreadState::Initializing) {
        set_state(&mut st, id, ThreadState::Running);
    }
    tracing::debug!(service = %shared.config.name, thread = id, "service thread running");

    loop {
        let claim = loop {
            match poll_one(&shared, &mut st, id) {
                Some(claim) => break claim,
                None => wq.cond.wait(&mut st),
            }
        };

        match claim {
            Claim::Event(event) => {
                let result = MutexGuard::unlocked(&mut st, || dispatch::handle_event(&shared, event));
                if let Some(entry) = st.thread_mut(id) {
                    entry.claimed = false;
                }
                if let Err(fault) = result {
                    shared.raise_fault(&mut st, fault);
                    break;
                }
            }
            Claim::Stop => break,
            Claim::Fault(fault) => {
                shared.raise_fault(&mut st, fault);
                break;
            }
        }
    }

    set_state(&mut st, id, ThreadState::Stopped);
    tracing::debug!(service = %shared.config.name, thread = id, "service thread exiting");
}

impl<T: Transport + 'static> Service<T> {
    /// Launch one worker thread and wait until it is running.
    pub fn start_thread(&self, name: &str) -> Result<SvcThreadId> {
        // The OS thread name cannot carry a NUL; spawning would panic with
        // the entry already registered.
        if name.contains('\0') {
            return Err(SvcError::Config(format!("thread name {:?} contains NUL", name)));
        }
        let wq = &self.shared.wq;
        let ctl = Arc::new(Condvar::new());

        let id = {
            let mut st = wq.lock.lock();
            let id = st.next_thread_id;
            st.next_thread_id = st.next_thread_id.wrapping_add(1);
            st.threads.push(ThreadEntry {
                id,
                name: name.to_string(),
                state: ThreadState::Initializing,
                claimed: false,
                ctl: Arc::clone(&ctl),
                handle: None,
            });
            id
        };

        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || worker_main(shared, id));

        let mut st = wq.lock.lock();
        match spawned {
            Ok(handle) => {
                if let Some(entry) = st.thread_mut(id) {
                    entry.handle = Some(handle);
                }
                while st.thread(id).map(|t| t.state) == Some(ThreadState::Initializing) {
                    ctl.wait(&mut st);
                }
                tracing::debug!(service = %self.shared.config.name, thread = id, name, "started service thread");
                Ok(SvcThreadId(id))
            }
            Err(e) => {
                st.threads.retain(|t| t.id != id);
                tracing::error!(service = %self.shared.config.name, name, error = %e, "cannot start thread");
                Err(SvcError::ResourceExhausted("service thread"))
            }
        }
    }

    /// Ask one worker to stop, wait until it has, and unregister it.
    ///
    /// Cooperative: a worker busy in the handler finishes that request
    /// first.
    pub fn stop_thread(&self, id: SvcThreadId) -> Result<()> {
        let wq = &self.shared.wq;
        let handle = {
            let mut st = wq.lock.lock();
            let entry = st.thread_mut(id.0).ok_or(SvcError::NoSuchThread(id.0))?;
            if entry.state != ThreadState::Stopped {
                entry.state = ThreadState::Stopping;
            }
            let ctl = Arc::clone(&entry.ctl);

            // The thread may be blocked in the event wait, or another
            // worker may need to see the change.
            wq.cond.notify_all();

            while st
                .thread(id.0)
                .is_some_and(|t| t.state != ThreadState::Stopped)
            {
                ctl.wait(&mut st);
            }

            let pos = st.threads.iter().position(|t| t.id == id.0);
            pos.and_then(|pos| st.threads.remove(pos).handle)
        };

        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::error!(service = %self.shared.config.name, thread = %id, "service thread panicked");
            }
        }
        tracing::debug!(service = %self.shared.config.name, thread = %id, "stopped service thread");
        Ok(())
    }

    /// Stop and unregister every worker, one at a time.
    ///
    /// Must not race with `start_thread` on the same service.
    pub fn stop_all_threads(&self) {
        loop {
            let next = self.shared.wq.lock.lock().threads.first().map(|t| t.id);
            let Some(id) = next else { break };
            if let Err(e) = self.stop_thread(SvcThreadId(id)) {
                tracing::warn!(service = %self.shared.config.name, thread = id, error = %e, "stop failed");
            }
        }
    }

    /// Name a worker was started with.
    pub fn thread_name(&self, id: SvcThreadId) -> Option<String> {
        self.shared.wq.lock.lock().thread(id.0).map(|t| t.name.clone())
    }
}
