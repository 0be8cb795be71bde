//! # ptlsvc-service — The request service engine
//!
//! A service owns a fixed pool of receive buffers armed on one request
//! portal, a single event source the transport posts completions to, and
//! any number of worker threads. Each worker runs this loop:
//!
//! ```text
//! lock
//! loop {
//!     1. Stop requested or service faulted?      → exit
//!     2. Poll the event source (non-blocking)
//!          nothing    → wait on the service condition, goto 1
//!          error      → record fault, exit
//!          event      → claim it
//!     3. unlock
//!          Armed → Delivering
//!          validate header (length, type, magic, version)
//!          resolve export, call the handler
//!          Delivering → Armed (re-arm on the transport)
//!        lock
//! }
//! Stopped, signal whoever waits on this thread
//! ```
//!
//! The service is generic over [`Transport`](ptlsvc_core::transport::Transport).
//! The resolver and handler are boxed trait objects fixed at construction.

pub mod config;
pub mod service;
pub mod stats;
pub mod thread;

mod dispatch;
mod pool;

pub use config::ServiceConfig;
pub use service::Service;
pub use stats::{ServiceStats, StatsSnapshot};
pub use thread::{SvcThreadId, ThreadState};
