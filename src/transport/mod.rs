//! # Transport Glue
//!
//! Attaches the frame codec to a caller-supplied byte stream. Establishing
//! the stream, multiplexing and protocol negotiation happen elsewhere; this
//! layer only needs `AsyncRead + AsyncWrite`.

pub mod writer;

pub use writer::{spawn_writer, WriterHandle};
