//! Benchmarks for live stream demuxing
//!
//! Measures NAL extraction throughput over an in-memory recorder stream.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::io::Cursor;
use vidbridge_media::h264::NalUnit;
use vidbridge_media::mp4::writer::{live_stream_head, push_nal, sample_recording};
use vidbridge_media::{extract_parameter_sets, FrameAssembler, FrameTiming, LiveDemuxer, ParameterSets};

fn params() -> ParameterSets {
    ParameterSets::new(vec![0x67, 0x42, 0x00, 0x1E, 0xAB], vec![0x68, 0xCE, 0x38, 0x80]).unwrap()
}

fn build_stream(frames: usize, frame_len: usize) -> Vec<u8> {
    let mut stream = live_stream_head();
    for i in 0..frames {
        let mut nal = vec![0xAAu8; frame_len];
        nal[0] = if i % 30 == 0 { 0x65 } else { 0x41 };
        push_nal(&mut stream, &nal);
    }
    stream
}

fn bench_live_demux(c: &mut Criterion) {
    let mut group = c.benchmark_group("live_demux");

    for frame_len in [512usize, 4096, 32_768] {
        let stream = build_stream(300, frame_len);
        group.throughput(Throughput::Bytes(stream.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(frame_len), &stream, |b, stream| {
            b.iter(|| {
                let assembler = FrameAssembler::new(params(), FrameTiming::new(30));
                let mut demuxer =
                    LiveDemuxer::new(Cursor::new(stream.as_slice()), assembler, Vec::<NalUnit>::new());
                let _ = black_box(demuxer.run());
                black_box(demuxer.stats())
            })
        });
    }

    group.finish();
}

fn bench_extract(c: &mut Criterion) {
    let file = sample_recording(1280, 720, &params(), &[&[0x65; 2048]]);
    c.bench_function("extract_parameter_sets", |b| {
        b.iter(|| extract_parameter_sets(&mut Cursor::new(black_box(file.as_slice()))))
    });
}

criterion_group!(benches, bench_live_demux, bench_extract);
criterion_main!(benches);
