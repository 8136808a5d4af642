use concierge::audio::mixer::Mixer;
use concierge::audio::pcm::{decode_chunk, encode_frame, resample};
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::hint::black_box;

/// One second of a 440 Hz tone at `rate`.
fn tone(rate: u32) -> Vec<f32> {
    (0..rate)
        .map(|i| (2.0 * std::f32::consts::PI * 440.0 * i as f32 / rate as f32).sin() * 0.5)
        .collect()
}

fn criterion_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("pcm");

    for frame_size in [1024usize, 4096] {
        let frame: Vec<f32> = tone(16000).into_iter().take(frame_size).collect();
        group.bench_with_input(
            BenchmarkId::new("encode_frame", frame_size),
            &frame,
            |b, frame| b.iter(|| encode_frame(black_box(frame), 16000)),
        );
    }

    let chunk = encode_frame(&tone(24000), 24000);
    group.bench_function("decode_chunk_1s", |b| {
        b.iter(|| decode_chunk(black_box(&chunk.data)))
    });

    let capture = tone(16000);
    group.bench_function("resample_16k_to_24k_1s", |b| {
        b.iter(|| resample(black_box(&capture), 16000, 24000))
    });

    group.finish();

    c.bench_function("mixer_render_three_sources", |b| {
        let reply = tone(24000);
        let mut out = vec![0.0f32; 512];
        b.iter_batched(
            || {
                let mut mixer = Mixer::new(24000);
                mixer.add(reply.clone(), 0.0);
                mixer.add(reply.clone(), 1.0);
                mixer.add(reply.clone(), 2.0);
                mixer
            },
            |mut mixer| {
                for _ in 0..10 {
                    black_box(mixer.render(&mut out));
                }
            },
            criterion::BatchSize::SmallInput,
        )
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
