//! Handle and event types.
//!
//! These are the *lingua franca* between a service and its transport.

use std::fmt;

/// Index of a buffer descriptor in a service's pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct BufferId(pub u32);

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl BufferId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Addressable endpoint on the transport where messages are delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Portal(pub u32);

/// Resolved transport address of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerAddr {
    /// Network id of the node.
    pub nid: u64,
    /// Network interface the peer is reached through.
    pub ni: u32,
}

/// Opaque handle to an event source opened on a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct EventSourceId(pub u64);

/// Opaque handle to one armed (registered) buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct ArmHandle(pub u64);

/// One completed receive.
///
/// The event carries the buffer itself: arming hands a buffer to the
/// transport and the completion hands it back. Whoever holds the event
/// owns the buffer contents until the buffer is armed again.
#[derive(Debug)]
pub struct Event {
    /// Descriptor the data landed in.
    pub buffer_id: BufferId,
    /// The descriptor's buffer, returned by the transport.
    pub buffer: Box<[u8]>,
    /// Bytes received.
    pub length: usize,
    /// Where in the buffer the data starts.
    pub offset: usize,
    /// Sender network id.
    pub initiator: u64,
    /// Nonzero for any event that carries data.
    pub sequence: u64,
    /// Match bits of the put; the request's exchange identifier.
    pub match_bits: u64,
}

impl Event {
    /// The received bytes, or `None` if offset/length overrun the buffer.
    pub fn data(&self) -> Option<&[u8]> {
        let end = self.offset.checked_add(self.length)?;
        self.buffer.get(self.offset..end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(offset: usize, length: usize) -> Event {
        Event {
            buffer_id: BufferId(0),
            buffer: vec![7u8; 16].into_boxed_slice(),
            length,
            offset,
            initiator: 1,
            sequence: 1,
            match_bits: 5,
        }
    }

    #[test]
    fn test_data_window() {
        assert_eq!(event(0, 16).data().map(|d| d.len()), Some(16));
        assert_eq!(event(4, 8).data().map(|d| d.len()), Some(8));
        assert!(event(4, 16).data().is_none());
        assert!(event(usize::MAX, 2).data().is_none());
    }

    #[test]
    fn test_buffer_id_display() {
        assert_eq!(BufferId(3).to_string(), "#3");
        assert_eq!(BufferId(3).index(), 3);
    }
}
