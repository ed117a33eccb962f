//! Benchmarks for motrack-core animation curves.
//!
//! Run with: cargo bench -p motrack-core

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use motrack_core::{CubicBezier, EasingCurve, KeyframeTrack};

fn bench_curve_evaluation(c: &mut Criterion) {
    let mut track = KeyframeTrack::new("weight");
    for i in 0..200 {
        let easing = if i % 2 == 0 {
            EasingCurve::Linear
        } else {
            EasingCurve::Bezier(CubicBezier::EASE_IN_OUT)
        };
        track.set(i as f64 * 5.0, (i % 7) as f64 / 7.0, easing);
    }

    c.bench_function("keyframe_evaluate_linear_segment", |bencher| {
        bencher.iter(|| track.evaluate(black_box(402.5)));
    });

    c.bench_function("keyframe_evaluate_bezier_segment", |bencher| {
        bencher.iter(|| track.evaluate(black_box(407.5)));
    });
}

fn bench_bezier_solve(c: &mut Criterion) {
    let bezier = CubicBezier::EASE;
    c.bench_function("cubic_bezier_evaluate", |bencher| {
        bencher.iter(|| bezier.evaluate(black_box(0.37)));
    });
}

criterion_group!(benches, bench_curve_evaluation, bench_bezier_solve);
criterion_main!(benches);
