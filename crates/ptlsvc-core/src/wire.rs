//! Request message header.
//!
//! Fixed layout, every integer little-endian:
//!
//! ```text
//!  0  u64  handle.addr        32  u64  last_xid
//!  8  u64  handle.cookie      40  u64  last_committed
//! 16  u32  magic              48  u64  transno
//! 20  u32  type               56  u32  status
//! 24  u32  version            60  u32  bufcount
//! 28  u32  opc                64  (body)
//! ```
//!
//! The exchange identifier (xid) is not in the header. It travels as the
//! completion event's match bits.

/// Protocol magic.
pub const MSG_MAGIC: u32 = 0x0BD0_0BD0;
/// Protocol version.
pub const MSG_VERSION: u32 = 0x0000_0002;
/// Size of the fixed header; the shortest acceptable message.
pub const MSG_HEADER_SIZE: usize = 64;

const OFF_ADDR: usize = 0;
const OFF_COOKIE: usize = 8;
const OFF_MAGIC: usize = 16;
const OFF_TYPE: usize = 20;
const OFF_VERSION: usize = 24;
const OFF_OPC: usize = 28;
const OFF_LAST_XID: usize = 32;
const OFF_LAST_COMMITTED: usize = 40;
const OFF_TRANSNO: usize = 48;
const OFF_STATUS: usize = 56;
const OFF_BUFCOUNT: usize = 60;

/// Message type tags.
pub mod msg_type {
    pub const REQUEST: u32 = 4711;
    pub const ERR: u32 = 4712;
    pub const REPLY: u32 = 4713;
}

/// Connection handle embedded at the start of every message.
///
/// `addr` names the export, `cookie` guards against reuse of a stale addr.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ConnHandle {
    pub addr: u64,
    pub cookie: u64,
}

impl ConnHandle {
    pub const NONE: Self = Self { addr: 0, cookie: 0 };

    #[inline]
    pub fn is_none(&self) -> bool {
        self.addr == 0 && self.cookie == 0
    }
}

/// Decoded message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MsgHeader {
    pub handle: ConnHandle,
    pub magic: u32,
    pub msg_type: u32,
    pub version: u32,
    pub opc: u32,
    pub last_xid: u64,
    pub last_committed: u64,
    pub transno: u64,
    pub status: u32,
    pub bufcount: u32,
}

impl MsgHeader {
    /// A well-formed request header for `opc` on `handle`.
    pub fn request(opc: u32, handle: ConnHandle) -> Self {
        Self {
            handle,
            magic: MSG_MAGIC,
            msg_type: msg_type::REQUEST,
            version: MSG_VERSION,
            opc,
            last_xid: 0,
            last_committed: 0,
            transno: 0,
            status: 0,
            bufcount: 0,
        }
    }

    /// Decode the header from the front of `buf`.
    ///
    /// Returns `None` if `buf` is shorter than [`MSG_HEADER_SIZE`]. No field
    /// is checked; validation is the service's job and has a fixed order.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < MSG_HEADER_SIZE {
            return None;
        }
        Some(Self {
            handle: ConnHandle {
                addr: read_u64(buf, OFF_ADDR),
                cookie: read_u64(buf, OFF_COOKIE),
            },
            magic: read_u32(buf, OFF_MAGIC),
            msg_type: read_u32(buf, OFF_TYPE),
            version: read_u32(buf, OFF_VERSION),
            opc: read_u32(buf, OFF_OPC),
            last_xid: read_u64(buf, OFF_LAST_XID),
            last_committed: read_u64(buf, OFF_LAST_COMMITTED),
            transno: read_u64(buf, OFF_TRANSNO),
            status: read_u32(buf, OFF_STATUS),
            bufcount: read_u32(buf, OFF_BUFCOUNT),
        })
    }

    /// Encode into the front of `buf`. Returns false if `buf` is too short.
    pub fn encode_into(&self, buf: &mut [u8]) -> bool {
        if buf.len() < MSG_HEADER_SIZE {
            return false;
        }
        write_u64(buf, OFF_ADDR, self.handle.addr);
        write_u64(buf, OFF_COOKIE, self.handle.cookie);
        write_u32(buf, OFF_MAGIC, self.magic);
        write_u32(buf, OFF_TYPE, self.msg_type);
        write_u32(buf, OFF_VERSION, self.version);
        write_u32(buf, OFF_OPC, self.opc);
        write_u64(buf, OFF_LAST_XID, self.last_xid);
        write_u64(buf, OFF_LAST_COMMITTED, self.last_committed);
        write_u64(buf, OFF_TRANSNO, self.transno);
        write_u32(buf, OFF_STATUS, self.status);
        write_u32(buf, OFF_BUFCOUNT, self.bufcount);
        true
    }

    /// Encode into a fresh message of `total_len` bytes (zero-filled body).
    pub fn to_message(&self, total_len: usize) -> Vec<u8> {
        let mut msg = vec![0u8; total_len.max(MSG_HEADER_SIZE)];
        self.encode_into(&mut msg);
        msg.truncate(total_len);
        msg
    }
}

#[inline]
fn read_u32(buf: &[u8], off: usize) -> u32 {
    let mut b = [0u8; 4];
    b.copy_from_slice(&buf[off..off + 4]);
    u32::from_le_bytes(b)
}

#[inline]
fn read_u64(buf: &[u8], off: usize) -> u64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&buf[off..off + 8]);
    u64::from_le_bytes(b)
}

#[inline]
fn write_u32(buf: &mut [u8], off: usize, v: u32) {
    buf[off..off + 4].copy_from_slice(&v.to_le_bytes());
}

#[inline]
fn write_u64(buf: &mut [u8], off: usize, v: u64) {
    buf[off..off + 8].copy_from_slice(&v.to_le_bytes());
}
