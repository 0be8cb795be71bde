//! Client export resolution.
//!
//! Every request embeds a [`ConnHandle`]. An `ExportResolver` maps it to the
//! server-side export of an established client session, if there is one.
//! A request holds a reference to the export's connection for as long as
//! it is being processed; dropping the request releases it.

use std::sync::Arc;

use crate::event::PeerAddr;
use crate::wire::ConnHandle;

/// Established transport-level connection to a client.
#[derive(Debug)]
pub struct Connection {
    pub peer: PeerAddr,
    pub remote_uuid: String,
}

/// Server-side handle for one client session.
#[derive(Debug)]
pub struct Export {
    pub handle: ConnHandle,
    pub connection: Arc<Connection>,
}

/// Maps message handles to exports.
///
/// Not finding an export is not an error: the request is dispatched with
/// no export attached.
pub trait ExportResolver: Send + Sync {
    fn resolve(&self, handle: &ConnHandle) -> Option<Arc<Export>>;
}

/// Resolver for services without sessions.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullResolver;

impl ExportResolver for NullResolver {
    fn resolve(&self, _handle: &ConnHandle) -> Option<Arc<Export>> {
        None
    }
}

impl<R: ExportResolver + ?Sized> ExportResolver for Arc<R> {
    fn resolve(&self, handle: &ConnHandle) -> Option<Arc<Export>> {
        (**self).resolve(handle)
    }
}
