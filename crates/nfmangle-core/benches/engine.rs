use criterion::{black_box, criterion_group, criterion_main, Criterion};
use nfmangle_core::packet::PacketBuilder;
use nfmangle_core::{Engine, RawPacket};

fn packet(payload: &[u8]) -> RawPacket {
    let data = PacketBuilder::tcp_v4()
        .src_ip([10, 0, 0, 1])
        .dst_ip([10, 0, 0, 2])
        .src_port(9999)
        .dst_port(443)
        .payload(payload)
        .build();
    RawPacket::new(1, data)
}

/// Full-MTU packet without a match: decode and scan only
fn bench_passthrough(c: &mut Criterion) {
    let engine = Engine::default();
    let raw = packet(&[b'x'; 1460]);

    c.bench_function("passthrough_1460", |b| {
        b.iter(|| black_box(engine.process(black_box(&raw))));
    });
}

/// Full-MTU packet with one match: rewrite, splice and checksum
fn bench_rewrite(c: &mut Criterion) {
    let engine = Engine::default();
    let mut payload = vec![b'x'; 1448];
    payload[700..712].copy_from_slice(b"magic string");
    let raw = packet(&payload);

    c.bench_function("rewrite_1460", |b| {
        b.iter(|| black_box(engine.process(black_box(&raw))));
    });
}

/// Decoder alone on a small packet
fn bench_decode(c: &mut Criterion) {
    let raw = packet(b"GET / HTTP/1.1\r\n\r\n");

    c.bench_function("decode_small", |b| {
        b.iter(|| black_box(raw.decode().is_ok()));
    });
}

criterion_group!(benches, bench_passthrough, bench_rewrite, bench_decode);
criterion_main!(benches);
