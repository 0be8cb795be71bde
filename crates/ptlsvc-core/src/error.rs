//! Service error types.
//!
//! `SvcError` is the single error returned across the crate boundary.
//! Per-request validation failures are `Malformed`; conditions that mean
//! the completion path can no longer be trusted are `Fatal(Fault)`.

use thiserror::Error;

use crate::buffer::BufferState;
use crate::event::BufferId;

/// Error type returned by request handlers.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Recoverable per-message validation failures.
///
/// The message is dropped and its buffer re-armed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Malformed {
    /// Shorter than the fixed message header.
    #[error("incomplete request ({len} bytes)")]
    TooShort { len: usize },
    /// Header magic is not the protocol constant.
    #[error("wrong message magic {magic:#x}")]
    BadMagic { magic: u32 },
    /// Header version is not the protocol constant.
    #[error("wrong message version {version:#x}")]
    BadVersion { version: u32 },
}

/// Non-recoverable conditions.
///
/// A fault stops the worker that observed it and, through the service,
/// every other worker. The embedding application decides whether to
/// escalate further.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Fault {
    /// A non-request message arrived on a request portal.
    #[error("wrong packet type received (type={msg_type})")]
    WrongMessageType { msg_type: u32 },
    /// The completion channel returned something other than an event or empty.
    #[error("completion channel failed: errno {code}")]
    CompletionChannel { code: i32 },
    /// An event did not start at the beginning of its buffer.
    #[error("event delivered at offset {offset}, expected 0")]
    NonZeroOffset { offset: usize },
    /// An event carrying data had a zero sequence number.
    #[error("event with zero sequence number")]
    ZeroSequence,
    /// Illegal buffer descriptor transition.
    #[error("buffer {id}: cannot {op} while {state:?}")]
    BufferState {
        id: BufferId,
        state: BufferState,
        op: &'static str,
    },
    /// An event named a descriptor the service does not own.
    #[error("event for unknown buffer {id}")]
    UnknownBuffer { id: BufferId },
    /// A delivered buffer could not be handed back to the transport.
    #[error("buffer {id}: re-arm failed: errno {code}")]
    Rearm { id: BufferId, code: i32 },
}

/// Why a received message was not dispatched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejected {
    /// Drop the message and re-arm its buffer.
    #[error(transparent)]
    Malformed(#[from] Malformed),
    /// Stop the service.
    #[error(transparent)]
    Fatal(#[from] Fault),
}

impl Rejected {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }
}

#[derive(Debug, Error)]
pub enum SvcError {
    /// Allocation or thread launch failed.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(&'static str),
    /// The local identity has no transport peer.
    #[error("cannot get peer for uuid '{uuid}'")]
    AddressResolutionFailed { uuid: String },
    /// A transport operation failed.
    #[error("transport {op} failed: errno {code}")]
    Transport { op: &'static str, code: i32 },
    /// Per-message validation failure.
    #[error("malformed request: {0}")]
    Malformed(#[from] Malformed),
    /// Unprocessed requests were still queued at teardown.
    #[error("{pending} unprocessed request(s) at teardown")]
    Busy { pending: usize },
    /// Rejected service configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
    /// Thread id not registered with the service.
    #[error("no such service thread {0}")]
    NoSuchThread(u32),
    /// The request handler reported an error.
    #[error("request handler failed: {0}")]
    Handler(#[source] HandlerError),
    /// Non-recoverable fault.
    #[error("fatal: {0}")]
    Fatal(#[from] Fault),
}

impl SvcError {
    /// Whether this error must stop the service rather than one request.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }

    /// Negative errno equivalent, for callers that speak errno.
    pub fn errno(&self) -> i32 {
        let e = match self {
            Self::ResourceExhausted(_) => libc::ENOMEM,
            Self::AddressResolutionFailed { .. } => libc::ENOENT,
            Self::Transport { code, .. } => code.abs(),
            Self::Malformed(_) | Self::Config(_) => libc::EINVAL,
            Self::Busy { .. } => libc::EBUSY,
            Self::NoSuchThread(_) => libc::ESRCH,
            Self::Handler(_) | Self::Fatal(_) => libc::EIO,
        };
        -e
    }
}

impl From<Rejected> for SvcError {
    fn from(r: Rejected) -> Self {
        match r {
            Rejected::Malformed(m) => Self::Malformed(m),
            Rejected::Fatal(f) => Self::Fatal(f),
        }
    }
}

pub type Result<T> = std::result::Result<T, SvcError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(SvcError::from(Fault::ZeroSequence).is_fatal());
        assert!(!SvcError::from(Malformed::TooShort { len: 8 }).is_fatal());
        assert!(!SvcError::Busy { pending: 1 }.is_fatal());
    }

    #[test]
    fn test_errno_mapping() {
        assert_eq!(SvcError::ResourceExhausted("buffer").errno(), -libc::ENOMEM);
        assert_eq!(SvcError::Busy { pending: 2 }.errno(), -libc::EBUSY);
        assert_eq!(
            SvcError::from(Malformed::BadMagic { magic: 1 }).errno(),
            -libc::EINVAL
        );
        let t = SvcError::Transport { op: "arm", code: libc::ENOSPC };
        assert_eq!(t.errno(), -libc::ENOSPC);
    }

    #[test]
    fn test_rejection_converts() {
        let r = Rejected::from(Fault::ZeroSequence);
        assert!(r.is_fatal());
        assert!(SvcError::from(r).is_fatal());
        let r = Rejected::from(Malformed::BadVersion { version: 3 });
        assert!(!r.is_fatal());
        assert!(matches!(
            SvcError::from(r),
            SvcError::Malformed(Malformed::BadVersion { version: 3 })
        ));
    }

    #[test]
    fn test_display() {
        let e = SvcError::from(Malformed::TooShort { len: 8 });
        assert_eq!(e.to_string(), "malformed request: incomplete request (8 bytes)");
        let f = SvcError::from(Fault::WrongMessageType { msg_type: 4713 });
        assert_eq!(f.to_string(), "fatal: wrong packet type received (type=4713)");
    }
}
