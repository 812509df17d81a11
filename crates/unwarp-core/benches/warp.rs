use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use nalgebra::Point2;

use unwarp_core::synthetic::{render_checkerboard_homography, CheckerboardSpec};
use unwarp_core::{warp_perspective, BorderMode, Homography, PerspectiveTransform};

fn bench_warp_perspective(c: &mut Criterion) {
    let mut group = c.benchmark_group("warp_perspective");
    let image_sizes = vec![(320, 240), (640, 480), (1280, 960)];

    for (width, height) in image_sizes {
        let id = format!("{}x{}", width, height);
        let board = CheckerboardSpec::new(8, 6, width as f64 / 12.0);
        let shift = Homography::from_array([
            [1.0, 0.0, width as f64 / 6.0],
            [0.0, 1.0, height as f64 / 6.0],
            [0.0, 0.0, 1.0],
        ]);
        let image = render_checkerboard_homography(width, height, &board, &shift, 1);

        let (w, h) = (width as f32, height as f32);
        let src = [
            Point2::new(0.1 * w, 0.15 * h),
            Point2::new(0.85 * w, 0.1 * h),
            Point2::new(0.05 * w, 0.9 * h),
            Point2::new(0.95 * w, 0.85 * h),
        ];
        let dst = [
            Point2::new(0.0, 0.0),
            Point2::new(w - 1.0, 0.0),
            Point2::new(0.0, h - 1.0),
            Point2::new(w - 1.0, h - 1.0),
        ];
        let Ok(transform) = PerspectiveTransform::from_points(&src, &dst) else {
            continue;
        };

        group.bench_with_input(BenchmarkId::new("bilinear", &id), &image, |b, img| {
            b.iter(|| {
                warp_perspective(
                    black_box(&img.view()),
                    &transform,
                    width,
                    height,
                    BorderMode::default(),
                )
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_warp_perspective);
criterion_main!(benches);
