use std::hint::black_box;

use criterion::{
    Criterion,
    Throughput,
    criterion_group,
    criterion_main,
};
use wefax::{
    modem::{
        fax::{
            Controls,
            FaxDecoder,
        },
        fm::{
            FaxModulator,
            PllDemodulator,
        },
    },
    scan::Scanner,
    source::{
        SignalGenerator,
        SineWave,
        WefaxSignal,
    },
};

pub fn bench_demodulator(c: &mut Criterion) {
    let sample_rate = 8000.0;
    let num_samples = 10 * 8000;

    let mut modulator = FaxModulator::new(sample_rate, 1900.0, 400.0);
    let mut video = SineWave::new(300.0, sample_rate);
    let samples: Vec<f64> = (0..num_samples)
        .map(|_| 16_384.0 * modulator.scan(video.next()))
        .collect();

    let mut group = c.benchmark_group("demodulator");
    group.throughput(Throughput::Elements(num_samples as u64));

    group.bench_function("pll", |b| {
        b.iter(|| {
            let mut demodulator = PllDemodulator::new(sample_rate, 1900.0, 400.0, 650.0);
            for &sample in &samples {
                black_box(demodulator.scan(black_box(sample)));
            }
        })
    });

    let mut signal = WefaxSignal::new(sample_rate, 120);
    let decoder_input: Vec<i16> = (0..num_samples).map(|_| signal.next() as i16).collect();

    group.bench_function("full pipeline", |b| {
        b.iter(|| {
            let mut decoder =
                FaxDecoder::with_image_width(Vec::<Vec<u8>>::new(), 8000, 1810, Controls::new())
                    .unwrap();
            decoder.enable(true);
            decoder.process(&decoder_input);
            black_box(decoder.samples_consumed())
        })
    });

    group.finish();
}

criterion_group!(benches, bench_demodulator);
criterion_main!(benches);
