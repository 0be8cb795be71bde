//! Service configuration

use ptlsvc_core::env::{env_get, env_get_bool};
use ptlsvc_core::error::{Result, SvcError};
use ptlsvc_core::event::Portal;

pub const DEFAULT_BUFFER_SIZE: usize = 4096;
pub const DEFAULT_BUFFER_COUNT: usize = 64;
pub const DEFAULT_REQUEST_PORTAL: u32 = 4;
pub const DEFAULT_REPLY_PORTAL: u32 = 5;
pub const DEFAULT_LOCAL_UUID: &str = "self";

/// Construction parameters of a [`Service`](crate::Service).
///
/// Buffer size and count are fixed for the life of the service.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Service name, used for logging and worker thread names.
    pub name: String,
    /// Bytes per receive buffer; the largest request accepted.
    pub buffer_size: usize,
    /// Number of receive buffers, and so of outstanding completions.
    pub buffer_count: usize,
    /// Portal requests arrive on.
    pub request_portal: Portal,
    /// Portal replies are sent to.
    pub reply_portal: Portal,
    /// Uuid of the local node, resolved to a transport peer at construction.
    pub local_uuid: String,
    /// Abort the process on a fatal fault instead of stopping the service.
    pub abort_on_fault: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "ptlrpc".to_string(),
            buffer_size: DEFAULT_BUFFER_SIZE,
            buffer_count: DEFAULT_BUFFER_COUNT,
            request_portal: Portal(DEFAULT_REQUEST_PORTAL),
            reply_portal: Portal(DEFAULT_REPLY_PORTAL),
            local_uuid: DEFAULT_LOCAL_UUID.to_string(),
            abort_on_fault: false,
        }
    }
}

impl ServiceConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Defaults overridden from the environment:
    ///
    /// | Variable                | Field            |
    /// |-------------------------|------------------|
    /// | `PTLSVC_BUFSIZE`        | `buffer_size`    |
    /// | `PTLSVC_NBUFS`          | `buffer_count`   |
    /// | `PTLSVC_REQ_PORTAL`     | `request_portal` |
    /// | `PTLSVC_REP_PORTAL`     | `reply_portal`   |
    /// | `PTLSVC_UUID`           | `local_uuid`     |
    /// | `PTLSVC_ABORT_ON_FAULT` | `abort_on_fault` |
    pub fn from_env(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            buffer_size: env_get("PTLSVC_BUFSIZE", DEFAULT_BUFFER_SIZE),
            buffer_count: env_get("PTLSVC_NBUFS", DEFAULT_BUFFER_COUNT),
            request_portal: Portal(env_get("PTLSVC_REQ_PORTAL", DEFAULT_REQUEST_PORTAL)),
            reply_portal: Portal(env_get("PTLSVC_REP_PORTAL", DEFAULT_REPLY_PORTAL)),
            local_uuid: env_get("PTLSVC_UUID", DEFAULT_LOCAL_UUID.to_string()),
            abort_on_fault: env_get_bool("PTLSVC_ABORT_ON_FAULT", false),
        }
    }

    pub fn buffer_size(mut self, n: usize) -> Self {
        self.buffer_size = n;
        self
    }

    pub fn buffer_count(mut self, n: usize) -> Self {
        self.buffer_count = n;
        self
    }

    pub fn request_portal(mut self, portal: u32) -> Self {
        self.request_portal = Portal(portal);
        self
    }

    pub fn reply_portal(mut self, portal: u32) -> Self {
        self.reply_portal = Portal(portal);
        self
    }

    pub fn local_uuid(mut self, uuid: impl Into<String>) -> Self {
        self.local_uuid = uuid.into();
        self
    }

    pub fn abort_on_fault(mut self, abort: bool) -> Self {
        self.abort_on_fault = abort;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(SvcError::Config("service name is empty".into()));
        }
        if self.buffer_count == 0 {
            return Err(SvcError::Config("buffer_count must be > 0".into()));
        }
        if self.buffer_size == 0 {
            return Err(SvcError::Config("buffer_size must be > 0".into()));
        }
        if u32::try_from(self.buffer_count).is_err() {
            return Err(SvcError::Config(format!(
                "buffer_count {} too large",
                self.buffer_count
            )));
        }
        Ok(())
    }
}
