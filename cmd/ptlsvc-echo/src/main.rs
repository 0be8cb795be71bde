//! ptlsvc Echo Service
//!
//! Runs one service over the loopback transport, fires requests at it
//! from a simulated client and reports what the service saw.
//!
//! Usage:
//!     cargo build --release -p ptlsvc-echo
//!     ./target/release/ptlsvc-echo [threads] [requests]
//!
//! Logging follows `RUST_LOG` (default `info`). Buffer geometry and
//! portals come from the `PTLSVC_*` environment variables.

use ptlsvc_core::error::HandlerError;
use ptlsvc_core::request::Request;
use ptlsvc_core::wire::MsgHeader;
use ptlsvc_module::{HandleTable, LoopbackTransport};
use ptlsvc_service::{Service, ServiceConfig};

use std::process::ExitCode;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing_subscriber::EnvFilter;

const CLIENT_UUID: &str = "echo-client";
const CLIENT_NID: u64 = 0x2;
const SERVER_NID: u64 = 0x1;
const OPC_ECHO: u32 = 1;
const BODY: &[u8] = b"ping from the loopback client";

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = std::env::args().collect();
    let threads: usize = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(2);
    let requests: u64 = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(10_000);

    match run(threads, requests) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "ptlsvc-echo failed");
            ExitCode::FAILURE
        }
    }
}

fn run(threads: usize, requests: u64) -> Result<(), Box<dyn std::error::Error>> {
    let config = ServiceConfig::from_env("echo");
    let transport = Arc::new(LoopbackTransport::new());
    transport.register_peer(&config.local_uuid, SERVER_NID);
    let client = transport.register_peer(CLIENT_UUID, CLIENT_NID);

    let exports = Arc::new(HandleTable::new());
    let handle = exports.connect(CLIENT_UUID, client);

    let echoed = Arc::new(AtomicU64::new(0));
    let handler = {
        let echoed = Arc::clone(&echoed);
        move |req: &Request<'_>| -> Result<(), HandlerError> {
            if req.opc() != OPC_ECHO {
                return Err(format!("unsupported opcode {}", req.opc()).into());
            }
            if req.export().is_none() {
                return Err("request without a session".into());
            }
            tracing::trace!(xid = req.xid(), body = ?String::from_utf8_lossy(req.body()), "echo");
            echoed.fetch_add(req.body().len() as u64, Ordering::Relaxed);
            Ok(())
        }
    };

    let portal = config.request_portal;
    let svc = Service::new(config, Arc::clone(&transport), exports, handler)?;
    for i in 0..threads {
        svc.start_thread(&format!("echo_{:02}", i))?;
    }

    let mut msg = MsgHeader::request(OPC_ECHO, handle).to_message(ptlsvc_core::wire::MSG_HEADER_SIZE);
    msg.extend_from_slice(BODY);

    let start = Instant::now();
    for xid in 1..=requests {
        // Every buffer is busy until a worker re-arms one.
        while transport.send(portal, CLIENT_NID, xid, &msg).is_err() {
            if svc.fault().is_some() {
                break;
            }
            std::thread::yield_now();
        }
    }

    let deadline = Instant::now() + Duration::from_secs(10);
    while svc.stats().rearmed < requests && svc.fault().is_none() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(1));
    }
    let elapsed = start.elapsed();

    let stats = svc.stats();
    tracing::info!(
        threads,
        received = stats.received,
        handled = stats.handled,
        handler_errors = stats.handler_errors,
        malformed = stats.malformed(),
        echoed_bytes = echoed.load(Ordering::Relaxed),
        elapsed_ms = elapsed.as_millis() as u64,
        req_per_sec = (stats.handled as f64 / elapsed.as_secs_f64().max(1e-9)) as u64,
        "echo run complete"
    );
    if let Some(fault) = svc.fault() {
        tracing::error!(%fault, "service faulted");
    }

    svc.stop_all_threads();
    svc.teardown()?;
    Ok(())
}
