use bytes::BytesMut;
use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use peerlink::core::codec::{FrameCodec, WireMode};
use peerlink::protocol::message::Message;
use serde_json::json;
use tokio_util::codec::Encoder;

#[allow(clippy::unwrap_used)]
fn bench_frame_encode_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_encode_decode");
    let payload_sizes = [64usize, 512, 4096, 65536, 1024 * 1024];

    for mode in [WireMode::Delimited, WireMode::LengthPrefixed] {
        for &size in &payload_sizes {
            let text = "a".repeat(size);
            group.throughput(Throughput::Bytes(size as u64));

            group.bench_function(format!("{mode:?}_encode_{size}b"), |b| {
                b.iter_batched(
                    || Message::text(text.clone()),
                    |msg| {
                        let mut buf = BytesMut::with_capacity(size + 8);
                        let mut codec = FrameCodec::with_mode(mode);
                        codec.encode(msg, &mut buf).unwrap();
                    },
                    BatchSize::SmallInput,
                )
            });

            let mut frame = BytesMut::new();
            FrameCodec::with_mode(mode)
                .encode(Message::text(text.clone()), &mut frame)
                .unwrap();
            group.bench_function(format!("{mode:?}_decode_{size}b"), |b| {
                b.iter_batched(
                    || frame.clone(),
                    |mut buf| {
                        let mut codec = FrameCodec::with_mode(mode);
                        let msgs = codec.decode_all(&mut buf).unwrap();
                        assert_eq!(msgs.len(), 1);
                    },
                    BatchSize::SmallInput,
                )
            });
        }
    }

    group.finish();
}

#[allow(clippy::unwrap_used)]
fn bench_burst_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("burst_decode");

    let mut burst = BytesMut::new();
    let mut codec = FrameCodec::new();
    for i in 0..256 {
        codec
            .encode(Message::Json(json!({"type": "tick", "seq": i})), &mut burst)
            .unwrap();
    }
    group.throughput(Throughput::Bytes(burst.len() as u64));

    group.bench_function("delimited_json_x256", |b| {
        b.iter_batched(
            || burst.clone(),
            |mut buf| {
                let msgs = FrameCodec::new().decode_all(&mut buf).unwrap();
                assert_eq!(msgs.len(), 256);
            },
            BatchSize::SmallInput,
        )
    });

    group.finish();
}

criterion_group!(benches, bench_frame_encode_decode, bench_burst_decode);
criterion_main!(benches);
