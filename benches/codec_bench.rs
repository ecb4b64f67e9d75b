use bytes::{Bytes, BytesMut};
use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use perf_protocol::core::codec::FrameCodec;
use tokio_util::codec::{Decoder, Encoder};

#[allow(clippy::unwrap_used)]
fn bench_frame_encode_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_encode_decode");
    let payload_sizes = [64usize, 512, 4096, 65536, 1024 * 1024];

    for &size in &payload_sizes {
        let payload = Bytes::from(vec![0u8; size]);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_function(format!("encode_{size}b"), |b| {
            b.iter_batched(
                || payload.clone(),
                |payload| {
                    let mut buf = BytesMut::with_capacity(size + 4);
                    FrameCodec::new().encode(payload, &mut buf).unwrap();
                },
                BatchSize::SmallInput,
            )
        });

        let mut wire = BytesMut::new();
        FrameCodec::new().encode(payload.clone(), &mut wire).unwrap();
        group.bench_function(format!("decode_{size}b"), |b| {
            b.iter_batched(
                || wire.clone(),
                |mut buf| {
                    let frame = FrameCodec::new().decode(&mut buf).unwrap();
                    assert!(frame.is_some());
                },
                BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

#[allow(clippy::unwrap_used)]
fn bench_fragmented_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("fragmented_decode");
    let size = 65536usize;
    let mut wire = BytesMut::new();
    FrameCodec::new()
        .encode(Bytes::from(vec![0u8; size]), &mut wire)
        .unwrap();
    group.throughput(Throughput::Bytes(size as u64));

    for chunk in [16usize, 1024, 8192] {
        group.bench_function(format!("chunks_of_{chunk}b"), |b| {
            b.iter(|| {
                let mut codec = FrameCodec::new();
                let mut buf = BytesMut::new();
                let mut frames = 0;
                for piece in wire.chunks(chunk) {
                    buf.extend_from_slice(piece);
                    while codec.decode(&mut buf).unwrap().is_some() {
                        frames += 1;
                    }
                }
                assert_eq!(frames, 1);
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_frame_encode_decode, bench_fragmented_decode);
criterion_main!(benches);
