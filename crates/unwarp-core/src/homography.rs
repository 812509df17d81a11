use crate::{sample_bilinear_u8, BorderMode, Image, ImageView};
use nalgebra::{DMatrix, Matrix3, Point2, SMatrix, SVector, Vector3};
use serde::{Deserialize, Serialize};
use std::fmt;

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Which side of a correspondence a point list belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PointRole {
    Source,
    Destination,
}

impl fmt::Display for PointRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PointRole::Source => f.write_str("source"),
            PointRole::Destination => f.write_str("destination"),
        }
    }
}

/// Degenerate correspondence geometry. No transform is produced.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum GeometryError {
    #[error("{role} points {indices:?} are collinear")]
    Collinear { role: PointRole, indices: [usize; 3] },
    #[error("{role} points {indices:?} coincide")]
    Coincident { role: PointRole, indices: [usize; 2] },
    #[error("{role} points contain non-finite coordinates")]
    NonFinite { role: PointRole },
    #[error("perspective system is singular")]
    Singular,
}

/// Plane projective transform, `p' ~ H * p` in homogeneous coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Homography {
    pub h: Matrix3<f64>,
}

impl Homography {
    pub fn new(h: Matrix3<f64>) -> Self {
        Self { h }
    }

    pub fn identity() -> Self {
        Self::new(Matrix3::identity())
    }

    pub fn from_array(rows: [[f64; 3]; 3]) -> Self {
        Self::new(Matrix3::from_fn(|r, c| rows[r][c]))
    }

    pub fn to_array(&self) -> [[f64; 3]; 3] {
        let h = &self.h;
        [
            [h[(0, 0)], h[(0, 1)], h[(0, 2)]],
            [h[(1, 0)], h[(1, 1)], h[(1, 2)]],
            [h[(2, 0)], h[(2, 1)], h[(2, 2)]],
        ]
    }

    #[inline]
    pub fn apply(&self, p: Point2<f32>) -> Point2<f32> {
        let q = self.apply_f64(Point2::new(p.x as f64, p.y as f64));
        Point2::new(q.x as f32, q.y as f32)
    }

    #[inline]
    pub fn apply_f64(&self, p: Point2<f64>) -> Point2<f64> {
        let v = self.h * Vector3::new(p.x, p.y, 1.0);
        Point2::new(v[0] / v[2], v[1] / v[2])
    }

    /// Inverse, scaled so that `h[2][2] == 1` when possible.
    pub fn inverse(&self) -> Option<Self> {
        let inv = self.h.try_inverse()?;
        Some(Self::new(normalize_homography(inv).unwrap_or(inv)))
    }

    /// `self ∘ first`: maps through `first`, then through `self`.
    pub fn compose(&self, first: &Homography) -> Self {
        let h = self.h * first.h;
        Self::new(normalize_homography(h).unwrap_or(h))
    }

    /// Scale so that `h[2][2] == 1`; `None` if that entry vanishes.
    pub fn normalized(&self) -> Option<Self> {
        normalize_homography(self.h).map(Self::new)
    }
}

fn hartley_normalization(cx: f64, cy: f64, mean_dist: f64) -> Matrix3<f64> {
    let s = if mean_dist > 1e-12 {
        (2.0_f64).sqrt() / mean_dist
    } else {
        1.0
    };

    Matrix3::<f64>::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0)
}

// Translate to centroid, scale so that the mean distance is sqrt(2).
fn normalize_points(pts: &[Point2<f64>]) -> (Vec<Point2<f64>>, Matrix3<f64>) {
    let n = pts.len().max(1) as f64;
    let (sx, sy) = pts.iter().fold((0.0, 0.0), |(sx, sy), p| (sx + p.x, sy + p.y));
    let (cx, cy) = (sx / n, sy / n);
    let mean_dist = pts
        .iter()
        .map(|p| ((p.x - cx).powi(2) + (p.y - cy).powi(2)).sqrt())
        .sum::<f64>()
        / n;

    let t = hartley_normalization(cx, cy, mean_dist);
    let out = pts
        .iter()
        .map(|p| {
            let v = t * Vector3::new(p.x, p.y, 1.0);
            Point2::new(v[0], v[1])
        })
        .collect();
    (out, t)
}

fn normalize_homography(h: Matrix3<f64>) -> Option<Matrix3<f64>> {
    let s = h[(2, 2)];
    if s.abs() < 1e-12 || !s.is_finite() {
        return None;
    }
    Some(h / s)
}

fn denormalize_homography(
    hn: Matrix3<f64>,
    t_src: Matrix3<f64>,
    t_dst: Matrix3<f64>,
) -> Option<Matrix3<f64>> {
    let t_dst_inv = t_dst.try_inverse()?;
    Some(t_dst_inv * hn * t_src)
}

/// Normalized DLT estimate of `H` with `dst ~ H * src` from `N >= 4` correspondences.
///
/// Exactly four correspondences are solved exactly (see [`homography_from_4pt`]);
/// more are solved in the algebraic least-squares sense.
pub fn estimate_homography(src: &[Point2<f64>], dst: &[Point2<f64>]) -> Option<Homography> {
    if src.len() != dst.len() || src.len() < 4 {
        return None;
    }
    if src
        .iter()
        .chain(dst.iter())
        .any(|p| !p.x.is_finite() || !p.y.is_finite())
    {
        return None;
    }
    if src.len() == 4 {
        let s: &[Point2<f64>; 4] = src.try_into().ok()?;
        let d: &[Point2<f64>; 4] = dst.try_into().ok()?;
        return solve_4pt(s, d);
    }

    let (s, ts) = normalize_points(src);
    let (d, td) = normalize_points(dst);

    let n = src.len();
    let mut a = DMatrix::<f64>::zeros(2 * n, 9);
    for k in 0..n {
        let (x, y) = (s[k].x, s[k].y);
        let (u, v) = (d[k].x, d[k].y);

        // [ -x -y -1   0  0  0   u*x u*y u ]
        a[(2 * k, 0)] = -x;
        a[(2 * k, 1)] = -y;
        a[(2 * k, 2)] = -1.0;
        a[(2 * k, 6)] = u * x;
        a[(2 * k, 7)] = u * y;
        a[(2 * k, 8)] = u;

        // [ 0  0  0  -x -y -1   v*x v*y v ]
        a[(2 * k + 1, 3)] = -x;
        a[(2 * k + 1, 4)] = -y;
        a[(2 * k + 1, 5)] = -1.0;
        a[(2 * k + 1, 6)] = v * x;
        a[(2 * k + 1, 7)] = v * y;
        a[(2 * k + 1, 8)] = v;
    }

    // Ah = 0: h is the right singular vector of the smallest singular value.
    let svd = a.svd(false, true);
    let vt = svd.v_t?;
    let (best, _) = svd
        .singular_values
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))?;
    let h = vt.row(best);
    let hn = Matrix3::<f64>::from_row_slice(&[h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], h[8]]);

    let h_den = denormalize_homography(hn, ts, td)?;
    Some(Homography::new(normalize_homography(h_den)?))
}

/// Exact `H` with `dst ~ H * src` from four correspondences (order must match).
pub fn homography_from_4pt(src: &[Point2<f32>; 4], dst: &[Point2<f32>; 4]) -> Option<Homography> {
    let s = src.map(|p| Point2::new(p.x as f64, p.y as f64));
    let d = dst.map(|p| Point2::new(p.x as f64, p.y as f64));
    solve_4pt(&s, &d)
}

fn solve_4pt(src: &[Point2<f64>; 4], dst: &[Point2<f64>; 4]) -> Option<Homography> {
    // Unknowns: [h11 h12 h13 h21 h22 h23 h31 h32], with h33 = 1
    // h11 x + h12 y + h13 - u h31 x - u h32 y = u
    // h21 x + h22 y + h23 - v h31 x - v h32 y = v
    let (src_n, t_src) = normalize_points(src);
    let (dst_n, t_dst) = normalize_points(dst);

    let mut a = SMatrix::<f64, 8, 8>::zeros();
    let mut b = SVector::<f64, 8>::zeros();

    for k in 0..4 {
        let (x, y) = (src_n[k].x, src_n[k].y);
        let (u, v) = (dst_n[k].x, dst_n[k].y);

        let r0 = 2 * k;
        a[(r0, 0)] = x;
        a[(r0, 1)] = y;
        a[(r0, 2)] = 1.0;
        a[(r0, 6)] = -u * x;
        a[(r0, 7)] = -u * y;
        b[r0] = u;

        let r1 = 2 * k + 1;
        a[(r1, 3)] = x;
        a[(r1, 4)] = y;
        a[(r1, 5)] = 1.0;
        a[(r1, 6)] = -v * x;
        a[(r1, 7)] = -v * y;
        b[r1] = v;
    }

    let x = a.lu().solve(&b)?;
    if x.iter().any(|v| !v.is_finite()) {
        return None;
    }

    let hn = Matrix3::<f64>::new(
        x[0], x[1], x[2], //
        x[3], x[4], x[5], //
        x[6], x[7], 1.0,
    );

    let h_den = denormalize_homography(hn, t_src, t_dst)?;
    Some(Homography::new(normalize_homography(h_den)?))
}

// Relative tolerance on |sin| / area checks; coordinates are pixels.
const DEGENERACY_EPS: f64 = 1e-6;

fn check_quad(pts: &[Point2<f32>; 4], role: PointRole) -> Result<(), GeometryError> {
    if pts.iter().any(|p| !p.x.is_finite() || !p.y.is_finite()) {
        return Err(GeometryError::NonFinite { role });
    }
    let p = pts.map(|p| Point2::new(p.x as f64, p.y as f64));

    let mut scale = 0.0_f64;
    for i in 0..4 {
        for j in (i + 1)..4 {
            scale = scale.max((p[j] - p[i]).norm());
        }
    }
    for i in 0..4 {
        for j in (i + 1)..4 {
            if (p[j] - p[i]).norm() <= DEGENERACY_EPS * scale.max(f64::MIN_POSITIVE) {
                return Err(GeometryError::Coincident {
                    role,
                    indices: [i, j],
                });
            }
        }
    }

    const TRIPLES: [[usize; 3]; 4] = [[0, 1, 2], [0, 1, 3], [0, 2, 3], [1, 2, 3]];
    for [i, j, k] in TRIPLES {
        let ab = p[j] - p[i];
        let ac = p[k] - p[i];
        let area = (ab.x * ac.y - ab.y * ac.x).abs();
        if area <= DEGENERACY_EPS * scale * scale {
            return Err(GeometryError::Collinear {
                role,
                indices: [i, j, k],
            });
        }
    }
    Ok(())
}

/// Source-to-destination projective mapping determined by exactly four correspondences.
///
/// Both directions are kept: [`warp_perspective`] needs the destination-to-source
/// mapping for every output pixel.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PerspectiveTransform {
    forward: Homography,
    inverse: Homography,
}

impl PerspectiveTransform {
    /// Solve the 8-DoF mapping `src[k] -> dst[k]` exactly.
    ///
    /// Any three collinear (or two coincident) points on either side make the
    /// system singular and are rejected before solving.
    pub fn from_points(
        src: &[Point2<f32>; 4],
        dst: &[Point2<f32>; 4],
    ) -> Result<Self, GeometryError> {
        check_quad(src, PointRole::Source)?;
        check_quad(dst, PointRole::Destination)?;
        let forward = homography_from_4pt(src, dst).ok_or(GeometryError::Singular)?;
        Self::from_homography(forward)
    }

    /// Wrap an existing source-to-destination homography.
    pub fn from_homography(forward: Homography) -> Result<Self, GeometryError> {
        if forward.h.iter().any(|v| !v.is_finite()) {
            return Err(GeometryError::Singular);
        }
        let inverse = forward.inverse().ok_or(GeometryError::Singular)?;
        Ok(Self { forward, inverse })
    }

    #[inline]
    pub fn forward(&self) -> &Homography {
        &self.forward
    }

    #[inline]
    pub fn backward(&self) -> &Homography {
        &self.inverse
    }

    /// Forward 3x3 matrix (source -> destination).
    #[inline]
    pub fn matrix(&self) -> Matrix3<f64> {
        self.forward.h
    }

    #[inline]
    pub fn apply(&self, p: Point2<f32>) -> Point2<f32> {
        self.forward.apply(p)
    }

    #[inline]
    pub fn apply_inverse(&self, p: Point2<f32>) -> Point2<f32> {
        self.inverse.apply(p)
    }

    /// Destination-to-source transform.
    pub fn inverse(&self) -> Self {
        Self {
            forward: self.inverse,
            inverse: self.forward,
        }
    }

    /// Transform that applies `self`, then `next`.
    pub fn then(&self, next: &PerspectiveTransform) -> Self {
        Self {
            forward: next.forward.compose(&self.forward),
            inverse: self.inverse.compose(&next.inverse),
        }
    }
}

/// Resample `src` into an `out_w x out_h` canvas through `transform`.
///
/// Every destination pixel `(x, y)` is mapped back with the inverse transform
/// and sampled bilinearly (pixel centers at integer coordinates). Taps outside
/// the source are resolved by `border`; `BorderMode::Constant(0)` gives the
/// usual black fill. The output has the channel count of `src`.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "debug", skip(src, transform), fields(src_w = src.width, src_h = src.height))
)]
pub fn warp_perspective(
    src: &ImageView<'_>,
    transform: &PerspectiveTransform,
    out_w: usize,
    out_h: usize,
    border: BorderMode,
) -> Image {
    let channels = src.channels;
    let mut out = vec![0u8; out_w * out_h * channels];
    let back = transform.backward();

    for y in 0..out_h {
        for x in 0..out_w {
            let p = back.apply(Point2::new(x as f32, y as f32));
            let base = (y * out_w + x) * channels;
            for c in 0..channels {
                out[base + c] = sample_bilinear_u8(src, p.x, p.y, c, border);
            }
        }
    }

    Image {
        width: out_w,
        height: out_h,
        channels,
        data: out,
    }
}
