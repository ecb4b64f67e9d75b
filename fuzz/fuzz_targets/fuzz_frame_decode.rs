#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use perf_protocol::core::codec::FrameCodec;
use perf_protocol::core::correlation::CorrelationId;
use perf_protocol::core::payload;
use tokio_util::codec::Decoder;

fuzz_target!(|data: &[u8]| {
    // Arbitrary bytes must decode into frames or wait for more, never panic
    let mut codec = FrameCodec::with_max_frame_size(1024 * 1024);
    let mut buf = BytesMut::from(data);
    while let Ok(Some(frame)) = codec.decode(&mut buf) {
        // Whatever a peer sends, building a reply must not panic either
        if CorrelationId::from_payload(&frame).is_ok() {
            let _ = payload::reply(&frame, 16);
        }
    }
});
