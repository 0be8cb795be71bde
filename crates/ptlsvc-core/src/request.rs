//! Inbound request view and the handler contract.

use std::sync::Arc;

use crate::error::{Fault, HandlerError, Malformed, Rejected};
use crate::event::{PeerAddr, Portal};
use crate::export::{Connection, Export};
use crate::wire::{msg_type, MsgHeader, MSG_HEADER_SIZE, MSG_MAGIC, MSG_VERSION};

/// Check a received message, in order, stopping at the first failure:
///
/// 1. at least [`MSG_HEADER_SIZE`] bytes, else `Malformed::TooShort`
/// 2. type is `REQUEST`, else `Fault::WrongMessageType` (fatal)
/// 3. magic matches, else `Malformed::BadMagic`
/// 4. version matches, else `Malformed::BadVersion`
pub fn validate(msg: &[u8]) -> Result<MsgHeader, Rejected> {
    let hdr = match MsgHeader::decode(msg) {
        Some(hdr) => hdr,
        None => return Err(Malformed::TooShort { len: msg.len() }.into()),
    };
    if hdr.msg_type != msg_type::REQUEST {
        return Err(Fault::WrongMessageType {
            msg_type: hdr.msg_type,
        }
        .into());
    }
    if hdr.magic != MSG_MAGIC {
        return Err(Malformed::BadMagic { magic: hdr.magic }.into());
    }
    if hdr.version != MSG_VERSION {
        return Err(Malformed::BadVersion {
            version: hdr.version,
        }
        .into());
    }
    Ok(hdr)
}

/// One validated inbound message.
///
/// Borrows the receive buffer it arrived in, so it cannot outlive the
/// dispatch that created it; the buffer is re-armed only after the request
/// is dropped. Dropping the request also releases its connection reference.
#[derive(Debug)]
pub struct Request<'a> {
    xid: u64,
    peer: PeerAddr,
    portal: Portal,
    reply_portal: Portal,
    header: MsgHeader,
    msg: &'a [u8],
    export: Option<Arc<Export>>,
    connection: Option<Arc<Connection>>,
}

impl<'a> Request<'a> {
    /// Build a request over an already validated message.
    ///
    /// Takes a reference on the export's connection if an export is given.
    pub fn new(
        xid: u64,
        peer: PeerAddr,
        portals: (Portal, Portal),
        header: MsgHeader,
        msg: &'a [u8],
        export: Option<Arc<Export>>,
    ) -> Self {
        let connection = export.as_ref().map(|e| Arc::clone(&e.connection));
        Self {
            xid,
            peer,
            portal: portals.0,
            reply_portal: portals.1,
            header,
            msg,
            export,
            connection,
        }
    }

    /// Exchange identifier; a reply must carry it back.
    #[inline]
    pub fn xid(&self) -> u64 {
        self.xid
    }

    /// Sender, as seen by this service.
    #[inline]
    pub fn peer(&self) -> PeerAddr {
        self.peer
    }

    /// Portal the request arrived on.
    #[inline]
    pub fn portal(&self) -> Portal {
        self.portal
    }

    /// Portal replies should be sent to.
    #[inline]
    pub fn reply_portal(&self) -> Portal {
        self.reply_portal
    }

    #[inline]
    pub fn header(&self) -> &MsgHeader {
        &self.header
    }

    #[inline]
    pub fn opc(&self) -> u32 {
        self.header.opc
    }

    /// The whole message, header included.
    #[inline]
    pub fn msg(&self) -> &'a [u8] {
        self.msg
    }

    /// Declared message length.
    #[inline]
    pub fn len(&self) -> usize {
        self.msg.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.msg.is_empty()
    }

    /// Bytes after the fixed header.
    pub fn body(&self) -> &'a [u8] {
        &self.msg[MSG_HEADER_SIZE.min(self.msg.len())..]
    }

    pub fn export(&self) -> Option<&Arc<Export>> {
        self.export.as_ref()
    }

    pub fn connection(&self) -> Option<&Arc<Connection>> {
        self.connection.as_ref()
    }
}

/// Processes validated requests.
///
/// Called synchronously on the worker thread that claimed the event. Must
/// not keep references into the request past its return.
pub trait RequestHandler: Send + Sync {
    fn handle(&self, req: &Request<'_>) -> std::result::Result<(), HandlerError>;
}

impl<F> RequestHandler for F
where
    F: Fn(&Request<'_>) -> std::result::Result<(), HandlerError> + Send + Sync,
{
    fn handle(&self, req: &Request<'_>) -> std::result::Result<(), HandlerError> {
        self(req)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::ConnHandle;

    fn well_formed(len: usize) -> Vec<u8> {
        MsgHeader::request(1, ConnHandle::NONE).to_message(len)
    }

    #[test]
    fn test_length_boundary() {
        assert!(validate(&well_formed(MSG_HEADER_SIZE)).is_ok());
        let err = validate(&well_formed(MSG_HEADER_SIZE - 1)).unwrap_err();
        assert!(matches!(
            err,
            Rejected::Malformed(Malformed::TooShort { len }) if len == MSG_HEADER_SIZE - 1
        ));
    }

    #[test]
    fn test_wrong_type_is_fatal() {
        let mut hdr = MsgHeader::request(1, ConnHandle::NONE);
        hdr.msg_type = msg_type::REPLY;
        // Type is checked before magic.
        hdr.magic = 0;
        let err = validate(&hdr.to_message(128)).unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(
            err,
            Rejected::Fatal(Fault::WrongMessageType { msg_type: msg_type::REPLY })
        ));
    }

    #[test]
    fn test_bad_magic_before_version() {
        let mut hdr = MsgHeader::request(1, ConnHandle::NONE);
        hdr.magic = 0xDEAD;
        hdr.version = 9;
        let err = validate(&hdr.to_message(64)).unwrap_err();
        assert!(matches!(
            err,
            Rejected::Malformed(Malformed::BadMagic { magic: 0xDEAD })
        ));
    }

    #[test]
    fn test_bad_version() {
        let mut hdr = MsgHeader::request(1, ConnHandle::NONE);
        hdr.version = 1;
        let err = validate(&hdr.to_message(64)).unwrap_err();
        assert!(matches!(
            err,
            Rejected::Malformed(Malformed::BadVersion { version: 1 })
        ));
    }

    #[test]
    fn test_request_takes_connection_ref() {
        let conn = Arc::new(Connection {
            peer: PeerAddr { nid: 3, ni: 0 },
            remote_uuid: "client".into(),
        });
        let export = Arc::new(Export {
            handle: ConnHandle { addr: 1, cookie: 2 },
            connection: Arc::clone(&conn),
        });
        let msg = well_formed(96);
        let hdr = validate(&msg).unwrap();
        {
            let req = Request::new(
                77,
                PeerAddr { nid: 3, ni: 0 },
                (Portal(4), Portal(5)),
                hdr,
                &msg,
                Some(export),
            );
            assert_eq!(Arc::strong_count(&conn), 3);
            assert_eq!(req.xid(), 77);
            assert_eq!(req.len(), 96);
            assert_eq!(req.body().len(), 32);
            assert_eq!(req.reply_portal(), Portal(5));
            assert_eq!(req.connection().map(|c| c.remote_uuid.as_str()), Some("client"));
        }
        assert_eq!(Arc::strong_count(&conn), 1);
    }

    #[test]
    fn test_closure_handler() {
        let handler = |req: &Request<'_>| -> std::result::Result<(), HandlerError> {
            if req.opc() == 0 {
                return Err("opc 0 unsupported".into());
            }
            Ok(())
        };
        let msg = well_formed(64);
        let hdr = validate(&msg).unwrap();
        let req = Request::new(1, PeerAddr { nid: 0, ni: 0 }, (Portal(1), Portal(2)), hdr, &msg, None);
        assert!(handler.handle(&req).is_ok());
        assert!(req.connection().is_none());
    }
}
