
// External data representation, the encoding under the RPC calls below
pub mod xdr;

// Remote procedure call over TCP, just enough of it to reach a VXI-11 server
pub mod rpc;

// VXI-11 core channel: SCPI to LAN instruments and VISA gateways
pub mod vxi11;

// Resource strings and the `Transport` every link implements
pub mod instrument;

// Stand-in 4480A for dry runs and tests
pub mod sim;

// Instrument drivers
pub mod devices;

pub mod error;
pub mod metrics;
pub mod sample;
pub mod sinks;
pub mod session;
pub mod config;
pub mod app;

pub use crate::error::{Error, Result};
