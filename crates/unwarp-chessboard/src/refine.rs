//! Sub-pixel refinement by gradient orthogonality.
//!
//! Around an ideal corner `c`, every image gradient `g(q)` is orthogonal to
//! `q - c` (it is either zero in flat areas or normal to an edge passing
//! through `c`). Minimizing `sum w(q) (g(q)ᵀ (q - c))²` over a window gives the
//! linear system `(sum w g gᵀ) c = sum w g gᵀ q`, iterated with the window
//! re-centred on the new estimate.

use crate::params::RefineParams;
use nalgebra::{Matrix2, Point2, Vector2};
use unwarp_core::{sample_bilinear, BorderMode, ImageView};

/// Window half-size for a corner whose closest grid neighbor is `spacing` pixels away.
pub fn half_window_for_spacing(spacing: f32, params: &RefineParams) -> usize {
    let hw = (spacing * 0.3).round() as usize;
    hw.clamp(2, params.max_half_window.max(2))
}

/// Refine one corner on a single-channel image.
///
/// Returns the start point unchanged when the system is ill-conditioned or
/// when the estimate wanders out of the window.
pub fn refine_corner(
    gray: &ImageView<'_>,
    start: Point2<f32>,
    half_window: usize,
    params: &RefineParams,
) -> Point2<f32> {
    let hw = half_window as i32;
    let sigma2 = (half_window as f32).powi(2);
    let border = BorderMode::Replicate;
    let mut c = start;

    for _ in 0..params.max_iters.max(1) {
        let mut a = Matrix2::<f32>::zeros();
        let mut b = Vector2::<f32>::zeros();

        for dy in -hw..=hw {
            for dx in -hw..=hw {
                let qx = c.x + dx as f32;
                let qy = c.y + dy as f32;
                let gx = 0.5
                    * (sample_bilinear(gray, qx + 1.0, qy, 0, border)
                        - sample_bilinear(gray, qx - 1.0, qy, 0, border));
                let gy = 0.5
                    * (sample_bilinear(gray, qx, qy + 1.0, 0, border)
                        - sample_bilinear(gray, qx, qy - 1.0, 0, border));

                let w = (-((dx * dx + dy * dy) as f32) / sigma2).exp();
                let gxx = w * gx * gx;
                let gxy = w * gx * gy;
                let gyy = w * gy * gy;

                a[(0, 0)] += gxx;
                a[(0, 1)] += gxy;
                a[(1, 0)] += gxy;
                a[(1, 1)] += gyy;
                b[0] += gxx * qx + gxy * qy;
                b[1] += gxy * qx + gyy * qy;
            }
        }

        let det = a.determinant();
        let trace = a.trace();
        if !(det.is_finite() && trace > 0.0 && det > 1e-6 * trace * trace) {
            return start;
        }
        let Some(inv) = a.try_inverse() else {
            return start;
        };
        let next = inv * b;
        let next = Point2::new(next[0], next[1]);
        let step = (next - c).norm();
        c = next;
        if step < params.epsilon {
            break;
        }
    }

    if !(c.x.is_finite() && c.y.is_finite()) || (c - start).norm() > half_window as f32 {
        return start;
    }
    c
}

#[cfg(test)]
mod tests {
    use super::*;
    use unwarp_core::synthetic::{render_checkerboard, CheckerboardSpec};

    #[test]
    fn converges_to_an_antialiased_junction() {
        // Inner corner (0, 0) placed at (20.3, 19.6).
        let board = CheckerboardSpec::new(2, 2, 12.0);
        let img = render_checkerboard(40, 40, &board, 8, |u, v| {
            Some(Point2::new(u - 20.3, v - 19.6))
        });

        let params = RefineParams::default();
        let refined = refine_corner(&img.view(), Point2::new(21.0, 19.0), 4, &params);
        assert!((refined.x - 20.3).abs() < 0.1, "{refined:?}");
        assert!((refined.y - 19.6).abs() < 0.1, "{refined:?}");
    }

    #[test]
    fn flat_patch_keeps_start() {
        let img = unwarp_core::Image::filled(20, 20, 1, 90);
        let p = Point2::new(10.2, 9.7);
        assert_eq!(refine_corner(&img.view(), p, 3, &RefineParams::default()), p);
    }

    #[test]
    fn window_follows_spacing() {
        let params = RefineParams::default();
        assert_eq!(half_window_for_spacing(8.0, &params), 2);
        assert_eq!(half_window_for_spacing(13.0, &params), 4);
        assert_eq!(half_window_for_spacing(80.0, &params), 5);
    }
}
