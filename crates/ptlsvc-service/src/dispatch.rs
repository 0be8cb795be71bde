//! Processing of one claimed completion.
//!
//! Runs without the service lock. The worker owns the event's buffer until
//! it is re-armed (or retired on a fatal fault).

use ptlsvc_core::error::{Fault, Rejected};
use ptlsvc_core::event::{Event, PeerAddr};
use ptlsvc_core::request::{self, Request};
use ptlsvc_core::transport::Transport;

use std::panic::{self, AssertUnwindSafe};

use crate::service::Shared;

/// Validate, dispatch and re-arm. A returned fault must stop the service.
pub(crate) fn handle_event<T: Transport + 'static>(
    shared: &Shared<T>,
    event: Event,
) -> Result<(), Fault> {
    let Event {
        buffer_id,
        buffer,
        length,
        offset,
        initiator,
        sequence,
        match_bits: xid,
    } = event;

    shared.stats.on_received();
    shared.pool.deliver(buffer_id)?;

    if sequence == 0 {
        retire(shared, buffer_id, buffer);
        return Err(Fault::ZeroSequence);
    }
    if offset != 0 {
        retire(shared, buffer_id, buffer);
        return Err(Fault::NonZeroOffset { offset });
    }

    let config = &shared.config;
    let outcome = {
        let msg = &buffer[..length.min(buffer.len())];
        match request::validate(msg) {
            Ok(header) => {
                let export = shared.resolver.resolve(&header.handle);
                let peer = PeerAddr {
                    nid: initiator,
                    ni: shared.self_peer.ni,
                };
                let req = Request::new(
                    xid,
                    peer,
                    (config.request_portal, config.reply_portal),
                    header,
                    msg,
                    export,
                );
                tracing::debug!(
                    service = %config.name,
                    xid,
                    opc = req.opc(),
                    len = req.len(),
                    nid = initiator,
                    "got req"
                );
                run_handler(shared, &req);
                Ok(())
            }
            Err(Rejected::Fatal(fault)) => Err(fault),
            Err(Rejected::Malformed(kind)) => {
                tracing::warn!(
                    service = %config.name,
                    portal = config.request_portal.0,
                    nid = initiator,
                    xid,
                    error = %kind,
                    "dropping malformed request"
                );
                shared.stats.on_malformed(&kind);
                Ok(())
            }
        }
    };

    if let Err(fault) = outcome {
        retire(shared, buffer_id, buffer);
        return Err(fault);
    }

    shared.pool.rearm(
        &*shared.transport,
        shared.source,
        config.request_portal,
        buffer_id,
        buffer,
    )?;
    shared.stats.on_rearmed();
    Ok(())
}

/// Call the handler, counting its outcome. A panic counts as a failure.
fn run_handler<T: Transport + 'static>(shared: &Shared<T>, req: &Request<'_>) {
    let name = &shared.config.name;
    match panic::catch_unwind(AssertUnwindSafe(|| shared.handler.handle(req))) {
        Ok(Ok(())) => shared.stats.on_handled(),
        Ok(Err(e)) => {
            tracing::warn!(service = %name, xid = req.xid(), opc = req.opc(), error = %e, "handler failed");
            shared.stats.on_handler_error();
        }
        Err(_) => {
            tracing::error!(service = %name, xid = req.xid(), opc = req.opc(), "handler panicked");
            shared.stats.on_handler_error();
        }
    }
}

fn retire<T: Transport + 'static>(
    shared: &Shared<T>,
    id: ptlsvc_core::event::BufferId,
    buffer: Box<[u8]>,
) {
    if let Err(fault) = shared.pool.retire_delivered(id, buffer) {
        tracing::error!(service = %shared.config.name, buffer = %id, %fault, "cannot retire buffer");
    }
}
