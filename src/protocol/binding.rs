//! Role binding: attaching a perf state machine to an open stream.
//!
//! [`PerfProtocol`] takes a stream the caller has already opened and
//! negotiated, puts a [`FrameCodec`] on both directions and runs the state
//! machine for the requested role on a driver task. The driver handles
//! inbound frames and the close notification sequentially.
//!
//! ## Usage
//! ```ignore
//! let perf = PerfProtocol::new(ProtocolConfig::new(1024, 1024))?;
//!
//! let (activation, task) = perf.start_initiator(stream);
//! let initiator = activation.await?;
//! let rtt = initiator.measure().await?;
//! initiator.close();
//! task.join().await?;
//! ```

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::codec::{Framed, FramedRead};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::{ProtocolConfig, PROTOCOL_ID};
use crate::core::codec::FrameCodec;
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::initiator::{Initiator, Measurement};
use crate::protocol::responder::Responder;
use crate::transport::spawn_writer;
use crate::utils::metrics::PerfMetrics;
use crate::utils::scheduler::{SchedulerFactory, TokioScheduler};
use crate::utils::time::{Clock, SystemClock};

/// Which side of the perf exchange a stream plays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Responder,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Initiator => f.write_str("initiator"),
            Role::Responder => f.write_str("responder"),
        }
    }
}

/// Shutdown request and completion signal shared by a driver and its handles
#[derive(Debug, Clone, Default)]
struct Lifecycle {
    shutdown: CancellationToken,
    done: CancellationToken,
}

/// Binds perf state machines to streams
#[derive(Clone)]
pub struct PerfProtocol {
    config: ProtocolConfig,
    clock: Arc<dyn Clock>,
    scheduler_factory: SchedulerFactory,
}

impl PerfProtocol {
    /// Binder for `config`; rejects sizes a frame cannot carry and a zero
    /// timeout with [`ProtocolError::ConfigError`].
    pub fn new(config: ProtocolConfig) -> Result<Self> {
        let errors = config.validate();
        if !errors.is_empty() {
            return Err(ProtocolError::ConfigError(format!(
                "Invalid perf configuration: {}",
                errors.join("; ")
            )));
        }

        Ok(Self {
            config,
            clock: Arc::new(SystemClock),
            scheduler_factory: TokioScheduler::factory(),
        })
    }

    /// Use `clock` for every initiator bound from now on
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Build each initiator's deadline scheduler with `factory`
    pub fn with_scheduler_factory(mut self, factory: SchedulerFactory) -> Self {
        self.scheduler_factory = factory;
        self
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    /// Name a negotiation layer selects this protocol by
    pub fn protocol_id(&self) -> &'static str {
        PROTOCOL_ID
    }

    fn codec(&self) -> FrameCodec {
        FrameCodec::with_limit(self.config.max_frame_size)
    }

    /// Attach an initiator to `stream`.
    ///
    /// The returned [`Activation`] resolves to the handle once the initiator
    /// is bound; `measure()` is only reachable through that handle.
    ///
    /// # Panics
    /// Panics when called outside a Tokio runtime.
    pub fn start_initiator<S>(&self, stream: S) -> (Activation, StreamTask)
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (activated_tx, activated_rx) = oneshot::channel();
        let lifecycle = Lifecycle::default();
        let task = tokio::spawn(drive_initiator(
            stream,
            self.config.clone(),
            self.codec(),
            self.scheduler_factory.clone(),
            self.clock.clone(),
            lifecycle,
            activated_tx,
        ));

        (
            Activation { rx: activated_rx },
            StreamTask { role: Role::Initiator, task },
        )
    }

    /// Attach a responder to `stream`; the handle is usable immediately.
    ///
    /// # Panics
    /// Panics when called outside a Tokio runtime.
    pub fn start_responder<S>(&self, stream: S) -> (ResponderHandle, StreamTask)
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let lifecycle = Lifecycle::default();
        let responder = Responder::new(self.config.download_size, Arc::new(PerfMetrics::new()));
        let handle = ResponderHandle {
            metrics: responder.metrics().clone(),
            lifecycle: lifecycle.clone(),
        };
        let task = tokio::spawn(drive_responder(stream, responder, self.codec(), lifecycle));

        (handle, StreamTask { role: Role::Responder, task })
    }

    /// Attach the state machine for `role`, waiting for activation if needed
    pub async fn bind<S>(&self, stream: S, role: Role) -> Result<(PerfController, StreamTask)>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        match role {
            Role::Initiator => {
                let (activation, task) = self.start_initiator(stream);
                let handle = activation.await?;
                Ok((PerfController::Initiator(handle), task))
            }
            Role::Responder => {
                let (handle, task) = self.start_responder(stream);
                Ok((PerfController::Responder(handle), task))
            }
        }
    }
}

impl fmt::Debug for PerfProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PerfProtocol")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[instrument(skip_all, fields(role = %Role::Initiator))]
async fn drive_initiator<S>(
    stream: S,
    config: ProtocolConfig,
    codec: FrameCodec,
    scheduler_factory: SchedulerFactory,
    clock: Arc<dyn Clock>,
    lifecycle: Lifecycle,
    activated: oneshot::Sender<InitiatorHandle>,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let (read_half, write_half) = tokio::io::split(stream);
    let (outbound, writer) = spawn_writer(write_half, codec, lifecycle.shutdown.clone());

    let initiator = Arc::new(Initiator::new(
        config,
        outbound,
        scheduler_factory(),
        clock,
        Arc::new(PerfMetrics::new()),
    ));
    let handle = InitiatorHandle {
        initiator: initiator.clone(),
        lifecycle: lifecycle.clone(),
    };
    if activated.send(handle).is_err() {
        debug!("Activation dropped before the initiator was bound");
    }
    debug!("Perf initiator active");

    let mut frames = FramedRead::new(read_half, codec);
    let outcome: Result<()> = loop {
        tokio::select! {
            _ = lifecycle.shutdown.cancelled() => break Ok(()),
            next = frames.next() => match next {
                Some(Ok(reply)) => match initiator.on_frame(&reply) {
                    Ok(_) => {}
                    Err(e) if e.is_fatal_to_stream() => {
                        warn!(error = %e, "Closing perf stream on bad peer");
                        break Err(e);
                    }
                    Err(e) => warn!(error = %e, "Dropping malformed perf reply"),
                },
                Some(Err(e)) => break Err(e),
                None => break Ok(()),
            },
        }
    };

    initiator.on_close();
    lifecycle.shutdown.cancel();
    let written = writer.await.unwrap_or_else(|e| {
        Err(ProtocolError::Custom(format!("Perf writer task failed: {e}")))
    });

    initiator.metrics().log_summary();
    lifecycle.done.cancel();
    outcome.and(written)
}

#[instrument(skip_all, fields(role = %Role::Responder))]
async fn drive_responder<S>(
    stream: S,
    responder: Responder,
    codec: FrameCodec,
    lifecycle: Lifecycle,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let mut framed = Framed::new(stream, codec);
    debug!(download_size = responder.download_size(), "Perf responder active");

    let outcome: Result<()> = loop {
        tokio::select! {
            _ = lifecycle.shutdown.cancelled() => break Ok(()),
            next = framed.next() => match next {
                Some(Ok(request)) => match responder.reply(&request) {
                    Ok(reply) => {
                        let len = reply.len();
                        if let Err(e) = framed.send(reply).await {
                            break Err(e);
                        }
                        responder.metrics().reply_sent(len);
                    }
                    Err(e) => warn!(error = %e, "Dropping malformed perf request"),
                },
                Some(Err(e)) => break Err(e),
                None => break Ok(()),
            },
        }
    };

    if let Err(e) = framed.close().await {
        debug!(error = %e, "Closing perf responder stream failed");
    }
    info!("Perf responder closed");
    responder.metrics().log_summary();
    lifecycle.shutdown.cancel();
    lifecycle.done.cancel();
    outcome
}

/// Resolves to the [`InitiatorHandle`] once the initiator is bound
#[must_use = "the initiator handle is only reachable through its activation"]
#[derive(Debug)]
pub struct Activation {
    rx: oneshot::Receiver<InitiatorHandle>,
}

impl Future for Activation {
    type Output = Result<InitiatorHandle>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|res| res.map_err(|_| ProtocolError::ConnectionClosed))
    }
}

/// Driver task of one bound stream
#[derive(Debug)]
pub struct StreamTask {
    role: Role,
    task: JoinHandle<Result<()>>,
}

impl StreamTask {
    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the stream to end.
    ///
    /// `Ok(())` after end of stream or a local close; otherwise the error
    /// that tore the stream down.
    pub async fn join(self) -> Result<()> {
        let role = self.role;
        self.task
            .await
            .map_err(|e| ProtocolError::Custom(format!("Perf {role} task failed: {e}")))?
    }
}

/// Initiator capability: issue perf requests on a bound stream
#[derive(Clone)]
pub struct InitiatorHandle {
    initiator: Arc<Initiator>,
    lifecycle: Lifecycle,
}

impl InitiatorHandle {
    /// Send one perf request; see [`Initiator::measure`]
    pub fn measure(&self) -> Measurement {
        self.initiator.measure()
    }

    /// Close the stream locally; pending requests fail with `ConnectionClosed`
    pub fn close(&self) {
        self.lifecycle.shutdown.cancel();
    }

    /// Wait until close handling has finished
    pub async fn closed(&self) {
        self.lifecycle.done.cancelled().await;
    }

    pub fn is_closed(&self) -> bool {
        self.initiator.is_closed()
    }

    pub fn pending_count(&self) -> usize {
        self.initiator.pending_count()
    }

    pub fn config(&self) -> &ProtocolConfig {
        self.initiator.config()
    }

    pub fn metrics(&self) -> &Arc<PerfMetrics> {
        self.initiator.metrics()
    }
}

impl fmt::Debug for InitiatorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InitiatorHandle")
            .field("pending", &self.pending_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Responder capability: passive, can only be observed or closed
#[derive(Debug, Clone)]
pub struct ResponderHandle {
    metrics: Arc<PerfMetrics>,
    lifecycle: Lifecycle,
}

impl ResponderHandle {
    pub fn close(&self) {
        self.lifecycle.shutdown.cancel();
    }

    pub async fn closed(&self) {
        self.lifecycle.done.cancelled().await;
    }

    pub fn is_closed(&self) -> bool {
        self.lifecycle.done.is_cancelled()
    }

    pub fn metrics(&self) -> &Arc<PerfMetrics> {
        &self.metrics
    }
}

/// Either role's handle, for callers that pick the role at runtime
#[derive(Debug, Clone)]
pub enum PerfController {
    Initiator(InitiatorHandle),
    Responder(ResponderHandle),
}

impl PerfController {
    pub fn role(&self) -> Role {
        match self {
            PerfController::Initiator(_) => Role::Initiator,
            PerfController::Responder(_) => Role::Responder,
        }
    }

    /// Send one perf request; responders fail with `UnsupportedOperation`
    pub fn measure(&self) -> Measurement {
        match self {
            PerfController::Initiator(handle) => handle.measure(),
            PerfController::Responder(_) => Measurement::failed(
                ProtocolError::UnsupportedOperation(constants::ERR_RESPONDER_MEASURE.to_string()),
            ),
        }
    }

    pub fn as_initiator(&self) -> Option<&InitiatorHandle> {
        match self {
            PerfController::Initiator(handle) => Some(handle),
            PerfController::Responder(_) => None,
        }
    }

    pub fn close(&self) {
        match self {
            PerfController::Initiator(handle) => handle.close(),
            PerfController::Responder(handle) => handle.close(),
        }
    }

    pub async fn closed(&self) {
        match self {
            PerfController::Initiator(handle) => handle.closed().await,
            PerfController::Responder(handle) => handle.closed().await,
        }
    }

    pub fn metrics(&self) -> &Arc<PerfMetrics> {
        match self {
            PerfController::Initiator(handle) => handle.metrics(),
            PerfController::Responder(handle) => handle.metrics(),
        }
    }
}
