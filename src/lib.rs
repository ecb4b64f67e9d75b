//! # perf-protocol
//!
//! Round-trip performance measurement over an already-open byte stream.
//!
//! One peer (the initiator) sends requests carrying a configured number of
//! upload bytes; the other (the responder) answers each with a configured
//! number of download bytes. Requests and replies are paired by a 4-byte
//! correlation id, and every request resolves to its round-trip time, a
//! timeout, or a closed-connection error.
//!
//! ## Quick Start
//! ```no_run
//! use perf_protocol::config::ProtocolConfig;
//! use perf_protocol::protocol::PerfProtocol;
//!
//! # async fn run() -> perf_protocol::error::Result<()> {
//! let (client, server) = tokio::io::duplex(64 * 1024);
//! let perf = PerfProtocol::new(ProtocolConfig::new(1024, 4096))?;
//!
//! let (_responder, server_task) = perf.start_responder(server);
//! let (activation, client_task) = perf.start_initiator(client);
//! let initiator = activation.await?;
//!
//! let rtt = initiator.measure().await?;
//! println!("round trip: {rtt:?}");
//!
//! initiator.close();
//! client_task.join().await?;
//! server_task.join().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//! - [`core`]: frame codec, correlation ids, payload construction
//! - [`protocol`]: initiator/responder state machines and role binding
//! - [`transport`]: writer task attaching the codec to a stream
//! - [`config`]: sizes, timeout and logging settings
//! - [`utils`]: clock, deadline scheduler, metrics, logging setup
//! - [`error`]: [`ProtocolError`](error::ProtocolError)

#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod transport;
pub mod utils;

pub use config::{PerfConfig, ProtocolConfig, PROTOCOL_ID};
pub use error::{ProtocolError, Result};
pub use protocol::{InitiatorHandle, Measurement, PerfController, PerfProtocol, ResponderHandle, Role};
