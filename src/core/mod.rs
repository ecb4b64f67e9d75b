//! # Core Protocol Components
//!
//! Low-level framing, correlation ids and payload construction.
//!
//! This module provides the foundation for the perf protocol: turning a byte
//! stream into length-delimited frames and building the request/reply
//! payloads that travel inside them.
//!
//! ## Components
//! - **Codec**: Tokio codec for framing over byte streams
//! - **Correlation**: 4-byte ids pairing a request with its reply
//! - **Payload**: Random filler payloads carrying a correlation prefix
//!
//! ## Wire Format
//! ```text
//! [Length(4, big-endian)] [Correlation(4)] [Filler(N)]
//! ```
//!
//! No frame ceiling is enforced unless one is configured; the transport
//! underneath may impose its own.

pub mod codec;
pub mod correlation;
pub mod payload;
