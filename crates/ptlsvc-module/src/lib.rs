//! # ptlsvc-module — Default implementations
//!
//! | Trait            | Default Impl        |
//! |------------------|---------------------|
//! | Transport        | LoopbackTransport   |
//! | ExportResolver   | HandleTable         |
//!
//! `LoopbackTransport` delivers in-process. It carries fault injection
//! switches so every failure path of a service can be driven from tests.

pub mod loopback;
pub mod handle_table;

pub use handle_table::HandleTable;
pub use loopback::LoopbackTransport;
