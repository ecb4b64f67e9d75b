//! Request and reply payload construction.
//!
//! Filler content is random; only its length is part of the contract.

use bytes::{Bytes, BytesMut};
use rand::{Rng, RngCore};

use crate::core::correlation::{copy_prefix, CorrelationId, CORRELATION_SIZE};
use crate::error::Result;

/// Total payload length for `filler` bytes of filler
#[inline]
pub fn total_len(filler: usize) -> usize {
    CORRELATION_SIZE + filler
}

/// Random request payload of `upload_size` filler bytes plus the correlation prefix.
///
/// The id is whatever the random prefix happens to be.
pub fn request(upload_size: usize) -> BytesMut {
    random_bytes(total_len(upload_size))
}

/// Reply payload of `download_size` filler bytes echoing `request`'s prefix
pub fn reply(request: &[u8], download_size: usize) -> Result<Bytes> {
    let mut out = random_bytes(total_len(download_size));
    copy_prefix(request, &mut out)?;
    Ok(out.freeze())
}

/// A fresh random correlation id
pub fn random_id() -> CorrelationId {
    CorrelationId::new(rand::rng().random())
}

fn random_bytes(len: usize) -> BytesMut {
    let mut buf = BytesMut::zeroed(len);
    rand::rng().fill_bytes(&mut buf);
    buf
}
