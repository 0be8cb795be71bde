//! # ptlsvc-core — Types and trait boundaries for portal RPC services
//!
//! This crate defines everything a request service shares with the
//! outside world: the wire header it validates, the events a transport
//! delivers, the state machine of a receive buffer, and the traits for
//! the collaborators a service consumes.
//!
//! | Trait             | Role                                          | Default impl      |
//! |-------------------|-----------------------------------------------|-------------------|
//! | `Transport`       | arm/unarm buffers, deliver completion events  | `LoopbackTransport` |
//! | `Notifier`        | wake the service when an event is queued      | service wait queue |
//! | `ExportResolver`  | map a message handle to a client export       | `HandleTable`     |
//! | `RequestHandler`  | process one validated request                 | user supplied     |
//!
//! The engine itself lives in `ptlsvc-service`; default implementations
//! live in `ptlsvc-module`.

pub mod wire;
pub mod event;
pub mod buffer;
pub mod transport;
pub mod notifier;
pub mod export;
pub mod request;
pub mod env;
pub mod error;

pub use error::{Fault, Malformed, Rejected, Result, SvcError};
