//! Length-delimited frame codec.
//!
//! Each frame is a 4-byte big-endian length followed by that many payload
//! bytes. The decoder never consumes a length prefix speculatively: when the
//! payload is incomplete the buffer is left untouched and the prefix is read
//! again once more data arrives.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

use crate::error::{ProtocolError, Result};

/// Size of the length prefix in bytes
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Most the decoder reserves ahead of payload bytes that have not arrived
pub const MAX_RESERVE_AHEAD: usize = 64 * 1024;

/// Frame codec used in both directions of a perf stream
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameCodec {
    max_frame_size: Option<usize>,
}

impl FrameCodec {
    /// Codec without a frame ceiling
    pub fn new() -> Self {
        Self::default()
    }

    /// Codec that rejects payloads larger than `max` bytes
    pub fn with_max_frame_size(max: usize) -> Self {
        Self {
            max_frame_size: Some(max),
        }
    }

    /// Codec honouring an optional ceiling
    pub fn with_limit(max: Option<usize>) -> Self {
        Self {
            max_frame_size: max,
        }
    }

    #[inline]
    fn check_size(&self, len: usize) -> Result<()> {
        match self.max_frame_size {
            Some(max) if len > max => Err(ProtocolError::OversizedFrame(len)),
            _ => Ok(()),
        }
    }
}

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if src.len() < LENGTH_PREFIX_SIZE {
            return Ok(None);
        }

        // Peek only; the prefix stays in the buffer until the payload is complete
        let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
        prefix.copy_from_slice(&src[..LENGTH_PREFIX_SIZE]);
        let len = u32::from_be_bytes(prefix) as usize;
        self.check_size(len)?;

        let total = LENGTH_PREFIX_SIZE + len;
        if src.len() < total {
            // The prefix is untrusted; grow with the data, not with its claim
            src.reserve((total - src.len()).min(MAX_RESERVE_AHEAD));
            return Ok(None);
        }

        src.advance(LENGTH_PREFIX_SIZE);
        let payload = src.split_to(len).freeze();
        trace!(len, "Decoded frame");
        Ok(Some(payload))
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, payload: Bytes, dst: &mut BytesMut) -> Result<()> {
        self.check_size(payload.len())?;
        let len = u32::try_from(payload.len())
            .map_err(|_| ProtocolError::OversizedFrame(payload.len()))?;

        dst.reserve(LENGTH_PREFIX_SIZE + payload.len());
        dst.put_u32(len);
        dst.put_slice(&payload);
        Ok(())
    }
}
