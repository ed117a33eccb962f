//! Benchmarks for marker lookup and patch alignment.
//!
//! Run with: cargo bench -p motrack-tracking

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use glam::DVec2;
use motrack_core::{FrameBuffer, Vec2};
use motrack_tracking::backend::{RegionTrackOptions, RegionTrackRequest};
use motrack_tracking::image::GrayImage;
use motrack_tracking::track::TrackChannels;
use motrack_tracking::{LucasKanadeAligner, Marker, MotionModel, PatchAligner, Track, TrackDirection};

fn bench_marker_lookup(c: &mut Criterion) {
    let mut track = Track::new("bench");
    for frame in (0..5000).step_by(2) {
        let pos = Vec2::new(0.5 + frame as f32 * 1e-5, 0.5);
        track.insert_marker(Marker::new(frame, pos, Vec2::splat(0.01), Vec2::splat(0.04)));
    }

    c.bench_function("marker_lookup_sequential", |bencher| {
        let mut frame = 0;
        bencher.iter(|| {
            frame = (frame + 1) % 5000;
            black_box(track.marker(black_box(frame)));
        });
    });

    c.bench_function("marker_lookup_random", |bencher| {
        let frames = [4111, 17, 2500, 999, 3876, 1];
        let mut i = 0;
        bencher.iter(|| {
            i = (i + 1) % frames.len();
            black_box(track.marker(black_box(frames[i])));
        });
    });
}

fn bench_region_alignment(c: &mut Criterion) {
    let frame = FrameBuffer::checkerboard(160, 120, 5);
    let image = GrayImage::from_frame(&frame, &TrackChannels::default());
    let center = DVec2::new(80.0, 60.0);
    let half = 10.0;
    let coords = [
        center + DVec2::new(-half, -half),
        center + DVec2::new(half, -half),
        center + DVec2::new(half, half),
        center + DVec2::new(-half, half),
        center,
    ];

    for model in [MotionModel::Translation, MotionModel::Affine] {
        let options = RegionTrackOptions {
            direction: TrackDirection::Forward,
            motion_model: model,
            use_brute: true,
            use_normalization: false,
            minimum_correlation: 0.75,
            num_iterations: 50,
            sigma: 0.9,
        };
        c.bench_function(&format!("align_{:?}", model).to_lowercase(), |bencher| {
            bencher.iter(|| {
                let request = RegionTrackRequest {
                    reference: &image,
                    destination: &image,
                    mask: None,
                    reference_coords: &coords,
                    guess_coords: &coords,
                    options: &options,
                };
                black_box(LucasKanadeAligner.track_region(&request))
            });
        });
    }
}

criterion_group!(benches, bench_marker_lookup, bench_region_alignment);
criterion_main!(benches);
