//! Dedicated writer task for outbound frames.
//!
//! Callers queue payloads on an unbounded channel and return immediately;
//! the task owns the write half and encodes frames in queue order.
//!
//! ```text
//! measure() ─┐
//! measure() ─┼─► mpsc::UnboundedSender<Bytes> ─► Writer Task ─► FramedWrite
//! measure() ─┘
//! ```
//!
//! A write failure cancels the binding's shutdown token so the reader side
//! runs close handling. On shutdown the task stops taking frames and shuts
//! the write half down, which the peer observes as end of stream.

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::codec::FramedWrite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::core::codec::FrameCodec;
use crate::error::Result;

/// Join handle of a running writer task
pub type WriterHandle = JoinHandle<Result<()>>;

/// Spawn the writer task for `io`.
///
/// Returns the queue sender and the task handle. The task ends when
/// `shutdown` is cancelled or every sender is dropped.
pub fn spawn_writer<W>(
    io: W,
    codec: FrameCodec,
    shutdown: CancellationToken,
) -> (mpsc::UnboundedSender<Bytes>, WriterHandle)
where
    W: AsyncWrite + Send + Unpin + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel::<Bytes>();
    let task = tokio::spawn(run_writer(io, codec, rx, shutdown));
    (tx, task)
}

async fn run_writer<W>(
    io: W,
    codec: FrameCodec,
    rx: mpsc::UnboundedReceiver<Bytes>,
    shutdown: CancellationToken,
) -> Result<()>
where
    W: AsyncWrite + Send + Unpin + 'static,
{
    let mut sink = FramedWrite::new(io, codec);
    let mut frames = UnboundedReceiverStream::new(rx);

    let outcome: Result<()> = loop {
        tokio::select! {
            _ = shutdown.cancelled() => break Ok(()),
            next = frames.next() => match next {
                Some(frame) => {
                    if let Err(e) = sink.send(frame).await {
                        warn!(error = %e, "Perf frame write failed");
                        shutdown.cancel();
                        break Err(e);
                    }
                }
                None => break Ok(()),
            },
        }
    };

    if let Err(e) = sink.close().await {
        debug!(error = %e, "Closing perf write half failed");
    }
    debug!("Perf writer stopped");
    outcome
}
