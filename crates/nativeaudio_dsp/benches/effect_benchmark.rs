//! Performance benchmarks for the DSP module
//!
//! Run with: cargo bench -p nativeaudio_dsp

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use nativeaudio_dsp::{
    AudioProcessor, ClipPolicy, Clipper, EffectStage, ProcessContext, Reverb, ReverbSettings,
    DEFAULT_CROSSFADE_MS,
};

fn benchmark_effect_stage(c: &mut Criterion) {
    let mut group = c.benchmark_group("effect_stage");

    // Common buffer sizes in audio applications
    let buffer_sizes = [64, 128, 256, 512, 1024];

    for size in buffer_sizes {
        let sample_count = size * 2;
        let ctx = ProcessContext::new(48000.0, 2, size);

        group.throughput(Throughput::Elements(size as u64));

        group.bench_function(format!("reverb_on_{}_frames", size), |b| {
            let mut stage =
                EffectStage::new(48000.0, ReverbSettings::default(), DEFAULT_CROSSFADE_MS)
                    .unwrap();
            stage.set_enabled(true);
            let mut buffer: Vec<f32> = (0..sample_count)
                .map(|i| (i as f32 * 0.001).sin())
                .collect();

            b.iter(|| {
                stage.process(black_box(&mut buffer), &ctx);
            });
        });

        group.bench_function(format!("bypass_{}_frames", size), |b| {
            let mut stage =
                EffectStage::new(48000.0, ReverbSettings::default(), DEFAULT_CROSSFADE_MS)
                    .unwrap();
            let mut buffer: Vec<f32> = (0..sample_count)
                .map(|i| (i as f32 * 0.001).sin())
                .collect();

            b.iter(|| {
                stage.process(black_box(&mut buffer), &ctx);
            });
        });
    }

    group.finish();
}

fn benchmark_reverb_frame(c: &mut Criterion) {
    c.bench_function("reverb_process_single_frame", |b| {
        let mut reverb = Reverb::new(48000.0, ReverbSettings::default()).unwrap();

        b.iter(|| {
            black_box(reverb.process_frame(black_box(0.5), black_box(-0.5)));
        });
    });
}

fn benchmark_clipper(c: &mut Criterion) {
    let mut group = c.benchmark_group("clipper");

    for (label, policy) in [
        ("hard", ClipPolicy::HardClamp),
        ("soft", ClipPolicy::SoftKnee { threshold_db: -3.0 }),
    ] {
        group.bench_function(format!("{}_512_frames", label), |b| {
            let clipper = Clipper::new(policy);
            let mut buffer: Vec<f32> = (0..1024).map(|i| (i as f32 * 0.01).sin() * 1.5).collect();

            b.iter(|| {
                black_box(clipper.process(black_box(&mut buffer)));
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    benchmark_effect_stage,
    benchmark_reverb_frame,
    benchmark_clipper
);

criterion_main!(benches);
