//! Anti-aliased checkerboard rendering for tests, benches and demos.
//!
//! The board plane uses the first inner corner as origin, `+x` along a row
//! of inner corners and `+y` down the columns, in the same units as
//! `square_size`. An `nx x ny` inner-corner board has `(nx + 1) x (ny + 1)`
//! squares; the square touching inner corner `(0, 0)` from the top-left is
//! dark. Everything outside the board reads as `light`.

use crate::{Homography, Image};
use nalgebra::Point2;

/// Printed chessboard geometry and its two gray levels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CheckerboardSpec {
    /// Inner corners per row.
    pub nx: usize,
    /// Inner corners per column.
    pub ny: usize,
    pub square_size: f64,
    pub dark: u8,
    pub light: u8,
}

impl CheckerboardSpec {
    pub fn new(nx: usize, ny: usize, square_size: f64) -> Self {
        Self {
            nx,
            ny,
            square_size,
            dark: 20,
            light: 235,
        }
    }

    /// Gray level of board-plane point `(x, y)`.
    pub fn intensity_at(&self, x: f64, y: f64) -> u8 {
        let s = self.square_size;
        let sx = (x / s).floor() + 1.0;
        let sy = (y / s).floor() + 1.0;
        if !(sx >= 0.0 && sy >= 0.0 && sx <= self.nx as f64 && sy <= self.ny as f64) {
            return self.light;
        }
        if (sx as i64 + sy as i64) % 2 == 0 {
            self.dark
        } else {
            self.light
        }
    }

    /// Board-plane position of inner corner `(row, col)`.
    #[inline]
    pub fn inner_corner(&self, row: usize, col: usize) -> Point2<f64> {
        Point2::new(col as f64 * self.square_size, row as f64 * self.square_size)
    }

    /// All inner corners, row-major.
    pub fn inner_corners(&self) -> Vec<Point2<f64>> {
        (0..self.ny)
            .flat_map(|r| (0..self.nx).map(move |c| self.inner_corner(r, c)))
            .collect()
    }

    /// Outer board corners (top-left and bottom-right), including the border squares.
    pub fn extent(&self) -> (Point2<f64>, Point2<f64>) {
        let s = self.square_size;
        (
            Point2::new(-s, -s),
            Point2::new(self.nx as f64 * s, self.ny as f64 * s),
        )
    }
}

/// Render a single-channel `width x height` image of `board`.
///
/// `pixel_to_board` maps an image position (pixel centers at integer
/// coordinates) onto the board plane; `None` means the ray misses the plane
/// and the sample reads `light`. Each pixel averages `supersample²` samples.
pub fn render_checkerboard<F>(
    width: usize,
    height: usize,
    board: &CheckerboardSpec,
    supersample: usize,
    pixel_to_board: F,
) -> Image
where
    F: Fn(f64, f64) -> Option<Point2<f64>>,
{
    let ss = supersample.max(1);
    let inv = 1.0 / ss as f64;
    let norm = (ss * ss) as f64;
    let mut data = Vec::with_capacity(width * height);

    for y in 0..height {
        for x in 0..width {
            let mut acc = 0.0_f64;
            for sy in 0..ss {
                for sx in 0..ss {
                    let u = x as f64 + (sx as f64 + 0.5) * inv - 0.5;
                    let v = y as f64 + (sy as f64 + 0.5) * inv - 0.5;
                    let value = match pixel_to_board(u, v) {
                        Some(p) if p.x.is_finite() && p.y.is_finite() => {
                            board.intensity_at(p.x, p.y)
                        }
                        _ => board.light,
                    };
                    acc += value as f64;
                }
            }
            data.push((acc / norm).round().clamp(0.0, 255.0) as u8);
        }
    }

    Image {
        width,
        height,
        channels: 1,
        data,
    }
}

/// Render `board` as seen through the plane homography `board_to_image`.
///
/// A non-invertible homography renders an empty (all `light`) canvas.
pub fn render_checkerboard_homography(
    width: usize,
    height: usize,
    board: &CheckerboardSpec,
    board_to_image: &Homography,
    supersample: usize,
) -> Image {
    let Some(image_to_board) = board_to_image.inverse() else {
        return Image::filled(width, height, 1, board.light);
    };
    render_checkerboard(width, height, board, supersample, |u, v| {
        let h = &image_to_board.h;
        let w = h[(2, 0)] * u + h[(2, 1)] * v + h[(2, 2)];
        if w.abs() < 1e-12 {
            return None;
        }
        Some(Point2::new(
            (h[(0, 0)] * u + h[(0, 1)] * v + h[(0, 2)]) / w,
            (h[(1, 0)] * u + h[(1, 1)] * v + h[(1, 2)]) / w,
        ))
    })
}
