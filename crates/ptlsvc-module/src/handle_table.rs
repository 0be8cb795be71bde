//! `HandleTable` — default `ExportResolver` implementation.
//!
//! Exports are keyed by the handle's `addr`. A lookup only succeeds if the
//! `cookie` matches too, so a client holding a handle from a previous
//! session resolves to nothing rather than to whoever reused the slot.

use ptlsvc_core::event::PeerAddr;
use ptlsvc_core::export::{Connection, Export, ExportResolver};
use ptlsvc_core::wire::ConnHandle;

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

pub struct HandleTable {
    exports: RwLock<HashMap<u64, Arc<Export>>>,
    next_addr: AtomicU64,
    seed: u64,
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}

impl HandleTable {
    pub fn new() -> Self {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0x5EED);
        Self {
            exports: RwLock::new(HashMap::new()),
            next_addr: AtomicU64::new(1),
            seed,
        }
    }

    /// Register a session for `remote_uuid` at `peer` and return its handle.
    pub fn connect(&self, remote_uuid: &str, peer: PeerAddr) -> ConnHandle {
        let addr = self.next_addr.fetch_add(1, Ordering::Relaxed);
        let handle = ConnHandle {
            addr,
            cookie: mix(addr ^ self.seed) | 1,
        };
        let export = Arc::new(Export {
            handle,
            connection: Arc::new(Connection {
                peer,
                remote_uuid: remote_uuid.to_string(),
            }),
        });
        self.exports.write().insert(addr, export);
        tracing::debug!(addr, remote = remote_uuid, "export connected");
        handle
    }

    /// Remove the session behind `handle`. Requests already holding the
    /// export keep it alive until they finish.
    pub fn disconnect(&self, handle: &ConnHandle) -> Option<Arc<Export>> {
        let mut exports = self.exports.write();
        match exports.get(&handle.addr) {
            Some(e) if e.handle.cookie == handle.cookie => exports.remove(&handle.addr),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.exports.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ExportResolver for HandleTable {
    fn resolve(&self, handle: &ConnHandle) -> Option<Arc<Export>> {
        if handle.is_none() {
            return None;
        }
        self.exports
            .read()
            .get(&handle.addr)
            .filter(|e| e.handle.cookie == handle.cookie)
            .cloned()
    }
}

/// splitmix64 finalizer.
fn mix(mut z: u64) -> u64 {
    z = z.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PEER: PeerAddr = PeerAddr { nid: 7, ni: 0 };

    #[test]
    fn test_connect_resolve() {
        let t = HandleTable::new();
        let h = t.connect("client-a", PEER);
        let e = t.resolve(&h).unwrap();
        assert_eq!(e.handle, h);
        assert_eq!(e.connection.remote_uuid, "client-a");
        assert_eq!(e.connection.peer, PEER);
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn test_stale_cookie() {
        let t = HandleTable::new();
        let h = t.connect("client-a", PEER);
        let stale = ConnHandle {
            addr: h.addr,
            cookie: h.cookie ^ 0xFF,
        };
        assert!(t.resolve(&stale).is_none());
        assert!(t.disconnect(&stale).is_none());
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn test_none_handle() {
        let t = HandleTable::new();
        t.connect("client-a", PEER);
        assert!(t.resolve(&ConnHandle::NONE).is_none());
    }

    #[test]
    fn test_disconnect_keeps_held_refs() {
        let t = HandleTable::new();
        let h = t.connect("client-a", PEER);
        let held = t.resolve(&h).unwrap();
        assert!(t.disconnect(&h).is_some());
        assert!(t.resolve(&h).is_none());
        assert!(t.is_empty());
        assert_eq!(held.connection.remote_uuid, "client-a");
    }
}
