//! Mixer benchmarks
//!
//! Measures the per-buffer cost of the output bus.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use nativeaudio_core::{ClipPolicy, Mixer, Source, SourceId};

fn asset(id: u64, channels: usize) -> Box<Source> {
    let pcm: Vec<f32> = (0..48000 * channels)
        .map(|i| (i as f32 * 0.01).sin() * 0.5)
        .collect();
    let (source, handle) = Source::asset(SourceId(id), pcm.into(), channels);
    handle.set_playing(true);
    handle.enable_stereo_position(true);
    handle.set_stereo_position(250);
    Box::new(source)
}

fn benchmark_pull_mixed(c: &mut Criterion) {
    let mut group = c.benchmark_group("mixer");

    for buffer_size in [64, 128, 256, 512, 1024].iter() {
        for sources in [1usize, 3, 8] {
            let mut mixer = Mixer::new(8, 1024, ClipPolicy::HardClamp);
            for id in 0..sources {
                let _ = mixer.insert(asset(id as u64, 1 + id % 2));
            }
            let mut bus = vec![0.0f32; *buffer_size * 2];

            group.throughput(Throughput::Elements(*buffer_size as u64));
            group.bench_function(format!("{}_sources_{}_frames", sources, buffer_size), |b| {
                b.iter(|| {
                    black_box(mixer.pull_mixed(black_box(&mut bus)));
                })
            });
        }
    }

    group.finish();
}

fn benchmark_soft_knee(c: &mut Criterion) {
    let mut mixer = Mixer::new(8, 1024, ClipPolicy::SoftKnee { threshold_db: -6.0 });
    for id in 0..4 {
        let _ = mixer.insert(asset(id, 2));
    }
    let mut bus = vec![0.0f32; 512];

    c.bench_function("soft_knee_4_sources_256_frames", |b| {
        b.iter(|| {
            black_box(mixer.pull_mixed(black_box(&mut bus)));
        })
    });
}

criterion_group!(benches, benchmark_pull_mixed, benchmark_soft_knee);
criterion_main!(benches);
