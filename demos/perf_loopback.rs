//! Loopback perf run over an in-memory stream.
//!
//! Binds a responder and an initiator to the two ends of a duplex pipe,
//! issues a few requests and prints one JSON summary line.
//!
//! ```text
//! PERF_UPLOAD_BYTES=1048576 PERF_DOWNLOAD_BYTES=1048576 cargo run --example perf_loopback
//! ```

use std::time::Instant;

use perf_protocol::utils::logging::init_logging;
use perf_protocol::{PerfConfig, PerfProtocol, ProtocolError, Role};
use tracing::info;

const ROUNDS: usize = 4;

#[tokio::main]
async fn main() -> Result<(), ProtocolError> {
    let config = PerfConfig::from_env()?;
    config.validate_strict()?;
    init_logging(&config.logging)?;

    let perf = PerfProtocol::new(config.protocol.clone())?;
    info!(protocol = perf.protocol_id(), "Starting loopback perf run");

    let (client, server) = tokio::io::duplex(256 * 1024);
    let (responder, responder_task) = perf.bind(server, Role::Responder).await?;
    let (initiator, initiator_task) = perf.bind(client, Role::Initiator).await?;

    let start = Instant::now();
    for round in 0..ROUNDS {
        let rtt = initiator.measure().await?;
        info!(round, rtt_ms = rtt.as_secs_f64() * 1000.0, "Round trip");
    }
    let elapsed = start.elapsed();

    initiator.close();
    initiator_task.join().await?;
    responder_task.join().await?;
    responder.closed().await;

    let snapshot = initiator.metrics().snapshot();
    let summary = serde_json::json!({
        "type": "final",
        "timeSeconds": elapsed.as_secs_f64(),
        "uploadBytes": config.protocol.upload_size * ROUNDS,
        "downloadBytes": config.protocol.download_size * ROUNDS,
        "replies": snapshot.replies_received,
    });
    println!("{summary}");

    Ok(())
}
