//! Performance benchmarks for CallBridge Gateway
//!
//! Run with: cargo bench
//! Or for specific benchmarks: cargo bench -- <filter>

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use std::time::Duration;

use callbridge_gateway::core::call::{InboundEvent, OutboundEvent, UtteranceBuffer};
use callbridge_gateway::core::codec::{AudioFormat, FrameCodec};
use callbridge_gateway::core::llm::{SentenceBoundaryDetector, split_sentences};

fn tone(samples: usize) -> Vec<u8> {
    (0..samples)
        .flat_map(|i| {
            let s = ((i as f32 * 0.3).sin() * 12_000.0) as i16;
            s.to_le_bytes()
        })
        .collect()
}

/// Wire frames pass through the codec on every inbound and outbound hop.
fn bench_frame_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_codec");
    group.measurement_time(Duration::from_secs(5));

    // 20 ms of 8 kHz mu-law, the usual telephony frame
    let mulaw_frame: Vec<u8> = vec![0x7f; 160];
    let decode = FrameCodec::new(AudioFormat::mulaw(8000), AudioFormat::linear16(8000)).unwrap();
    group.throughput(Throughput::Bytes(mulaw_frame.len() as u64));
    group.bench_function("mulaw_to_linear16_20ms", |b| {
        b.iter(|| decode.transform(black_box(&mulaw_frame)).unwrap());
    });

    // Synthesized speech down to the wire
    for &(from, to) in &[(24000u32, 8000u32), (16000, 8000), (8000, 16000)] {
        let one_second = tone(from as usize);
        let codec = FrameCodec::new(AudioFormat::linear16(from), AudioFormat::linear16(to)).unwrap();
        group.throughput(Throughput::Bytes(one_second.len() as u64));
        group.bench_with_input(
            BenchmarkId::new("resample_1s", format!("{from}->{to}")),
            &one_second,
            |b, audio| b.iter(|| codec.transform(black_box(audio)).unwrap()),
        );
    }

    let one_second = tone(24000);
    let to_wire = FrameCodec::new(AudioFormat::linear16(24000), AudioFormat::mulaw(8000)).unwrap();
    group.throughput(Throughput::Bytes(one_second.len() as u64));
    group.bench_function("linear16_24k_to_mulaw_8k_1s", |b| {
        b.iter(|| to_wire.transform(black_box(&one_second)).unwrap());
    });

    group.finish();
}

fn bench_sentence_detection(c: &mut Criterion) {
    let mut group = c.benchmark_group("sentence_detection");

    let reply = "Sure, I can help with that. Your order shipped on Monday. \
                 It should arrive by Thursday! Is there anything else I can do? "
        .repeat(4);
    let fragments: Vec<String> = reply
        .as_bytes()
        .chunks(7)
        .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
        .collect();

    group.throughput(Throughput::Bytes(reply.len() as u64));
    group.bench_function("streamed_fragments", |b| {
        b.iter(|| {
            let mut detector = SentenceBoundaryDetector::new();
            let mut count = 0;
            for fragment in &fragments {
                count += detector.push(black_box(fragment)).len();
            }
            count + detector.finish().map_or(0, |_| 1)
        });
    });

    group.bench_function("split_complete_reply", |b| {
        b.iter(|| split_sentences(black_box(&reply)));
    });

    group.finish();
}

fn bench_media_messages(c: &mut Criterion) {
    let mut group = c.benchmark_group("media_messages");

    let payload = BASE64.encode(vec![0x7fu8; 160]);
    let inbound = format!(
        r#"{{"event":"media","sequenceNumber":"42","streamSid":"MZ1","media":{{"track":"inbound","chunk":"41","timestamp":"820","payload":"{payload}"}}}}"#
    );
    group.throughput(Throughput::Bytes(inbound.len() as u64));
    group.bench_function("parse_inbound_media", |b| {
        b.iter(|| InboundEvent::parse(black_box(&inbound)).unwrap());
    });

    let frame = vec![0x7fu8; 800];
    group.bench_function("serialize_outbound_media", |b| {
        b.iter(|| {
            OutboundEvent::media("MZ1", black_box(&frame))
                .to_json()
                .unwrap()
        });
    });

    group.finish();
}

fn bench_utterance_buffer(c: &mut Criterion) {
    let voiced = tone(160);
    let silent = vec![0u8; 320];

    c.bench_function("utterance_ingest_1s", |b| {
        b.iter(|| {
            let mut buffer = UtteranceBuffer::new(Duration::from_millis(1000), 0.01, 1 << 20);
            for i in 0..50 {
                let frame = if i % 5 == 4 { &silent } else { &voiced };
                black_box(buffer.ingest(frame));
            }
            buffer.flush()
        });
    });
}

criterion_group!(
    benches,
    bench_frame_codec,
    bench_sentence_detection,
    bench_media_messages,
    bench_utterance_buffer,
);

criterion_main!(benches);
