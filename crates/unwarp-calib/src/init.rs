//! Closed-form initial guesses for the nonlinear solve.

use crate::camera::Intrinsics;
use nalgebra::{DMatrix, Isometry3, Matrix3, Rotation3, SVector, Translation3, UnitQuaternion, Vector3};

/// Build the 6-vector `v_ij(H)` of Zhang's method (0-based column indices).
fn v_ij(h: &Matrix3<f64>, i: usize, j: usize) -> SVector<f64, 6> {
    let hi = h.column(i);
    let hj = h.column(j);

    SVector::<f64, 6>::from_row_slice(&[
        hi[0] * hj[0],
        hi[0] * hj[1] + hi[1] * hj[0],
        hi[1] * hj[1],
        hi[2] * hj[0] + hi[0] * hj[2],
        hi[2] * hj[1] + hi[1] * hj[2],
        hi[2] * hj[2],
    ])
}

/// Zhang's closed-form intrinsics from `>= 3` plane homographies (no distortion).
///
/// Returns `None` for degenerate configurations (too few views, parallel
/// boards, or a solution that is not a valid camera).
pub fn zhang_intrinsics(homographies: &[Matrix3<f64>]) -> Option<Intrinsics> {
    if homographies.len() < 3 {
        return None;
    }

    let m = homographies.len();
    let mut vmtx = DMatrix::<f64>::zeros(2 * m, 6);
    for (k, h) in homographies.iter().enumerate() {
        // Scale-normalize each H so every view weighs the same.
        let h = h / h.norm();
        let v11 = v_ij(&h, 0, 0);
        let v22 = v_ij(&h, 1, 1);
        let v12 = v_ij(&h, 0, 1);

        vmtx.row_mut(2 * k).copy_from(&v12.transpose());
        vmtx.row_mut(2 * k + 1).copy_from(&(v11 - v22).transpose());
    }

    // V b = 0: right singular vector of the smallest singular value.
    let svd = vmtx.svd(false, true);
    let v_t = svd.v_t?;
    let (best, _) = svd
        .singular_values
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))?;
    let b = v_t.row(best);

    let (b11, b12, b22, b13, b23, b33) = (b[0], b[1], b[2], b[3], b[4], b[5]);

    // v0 = (B12 B13 - B11 B23) / (B11 B22 - B12^2)
    // λ  = B33 - (B13^2 + v0 (B12 B13 - B11 B23)) / B11
    // α  = sqrt(λ / B11), β = sqrt(λ B11 / (B11 B22 - B12^2))
    // γ  = -B12 α^2 β / λ, u0 = γ v0 / β - B13 α^2 / λ
    let denom = b11 * b22 - b12 * b12;
    let denom_norm = b11 * b11 + b22 * b22;
    if denom_norm <= 0.0 || denom.abs() / denom_norm <= 1e-6 || b11 == 0.0 {
        return None;
    }

    let v0 = (b12 * b13 - b11 * b23) / denom;
    let lambda = b33 - (b13 * b13 + v0 * (b12 * b13 - b11 * b23)) / b11;
    if lambda.signum() != b11.signum() {
        return None;
    }

    let alpha = (lambda / b11).sqrt();
    let beta = (lambda * b11 / denom).sqrt();
    let gamma = -b12 * alpha * alpha * beta / lambda;
    let u0 = gamma * v0 / beta - b13 * alpha * alpha / lambda;

    let k = Intrinsics {
        fx: alpha,
        fy: beta,
        cx: u0,
        cy: v0,
        skew: gamma,
    };
    k.is_valid().then_some(k)
}

/// Focal lengths with the principal point fixed at `(cx, cy)`.
///
/// With `K = diag(fx, fy, 1)` after shifting the principal point to the
/// origin, each view contributes `r1·r2 = 0` and `|r1| = |r2|`, which are
/// linear in `1/fx²` and `1/fy²`. Falls back to a single shared focal length,
/// and returns `None` when the views carry no perspective (fronto-parallel
/// boards).
pub fn centered_focal(homographies: &[Matrix3<f64>], cx: f64, cy: f64) -> Option<(f64, f64)> {
    let shift = Matrix3::new(1.0, 0.0, -cx, 0.0, 1.0, -cy, 0.0, 0.0, 1.0);
    let mut a = DMatrix::<f64>::zeros(2 * homographies.len(), 2);
    let mut rhs = DMatrix::<f64>::zeros(2 * homographies.len(), 1);

    for (k, h) in homographies.iter().enumerate() {
        let h = shift * h;
        let h = h / h.norm();
        let (h1, h2) = (h.column(0), h.column(1));

        a[(2 * k, 0)] = h1[0] * h2[0];
        a[(2 * k, 1)] = h1[1] * h2[1];
        rhs[(2 * k, 0)] = -h1[2] * h2[2];

        a[(2 * k + 1, 0)] = h1[0] * h1[0] - h2[0] * h2[0];
        a[(2 * k + 1, 1)] = h1[1] * h1[1] - h2[1] * h2[1];
        rhs[(2 * k + 1, 0)] = -(h1[2] * h1[2] - h2[2] * h2[2]);
    }

    let focal = |inv_sq: f64| (inv_sq > 0.0 && inv_sq.is_finite()).then(|| 1.0 / inv_sq.sqrt());

    let ata = a.transpose() * &a;
    let atb = a.transpose() * &rhs;
    if let Some(sol) = ata.lu().solve(&atb) {
        if let (Some(fx), Some(fy)) = (focal(sol[(0, 0)]), focal(sol[(1, 0)])) {
            return Some((fx, fy));
        }
    }

    // Shared focal length: one unknown, least squares over both constraints.
    let col = a.column(0) + a.column(1);
    let den = col.dot(&col);
    if den <= 0.0 {
        return None;
    }
    let f = focal(col.dot(&rhs.column(0)) / den)?;
    Some((f, f))
}

/// Decompose a board-to-image homography into a board-to-camera pose.
///
/// The board lies on `Z = 0`; the sign of `H` is chosen so the board is in
/// front of the camera. Returns `None` if `K` or the decomposition is singular.
pub fn planar_pose(k: &Matrix3<f64>, h: &Matrix3<f64>) -> Option<Isometry3<f64>> {
    let k_inv = k.try_inverse()?;

    let k_inv_h1 = k_inv * h.column(0);
    let k_inv_h2 = k_inv * h.column(1);
    let k_inv_h3 = k_inv * h.column(2);

    // Scale factor λ: normalize first two columns (average for robustness).
    let norm = 0.5 * (k_inv_h1.norm() + k_inv_h2.norm());
    if norm <= 0.0 || !norm.is_finite() {
        return None;
    }
    let mut lambda = 1.0 / norm;
    if k_inv_h3[2] * lambda < 0.0 {
        lambda = -lambda;
    }

    let r1 = lambda * k_inv_h1;
    let r2 = lambda * k_inv_h2;
    let r3 = r1.cross(&r2);
    let r_mat = Matrix3::from_columns(&[r1, r2, r3]);

    // Project onto SO(3) (polar decomposition via SVD).
    let svd = r_mat.svd(true, true);
    let u = svd.u?;
    let v_t = svd.v_t?;
    let mut r_orth = u * v_t;
    if r_orth.determinant() < 0.0 {
        let mut u_flipped = u;
        u_flipped.column_mut(2).neg_mut();
        r_orth = u_flipped * v_t;
    }

    let t: Vector3<f64> = lambda * k_inv_h3;
    let rot = UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(r_orth));
    Some(Isometry3::from_parts(Translation3::from(t), rot))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn kmtx() -> Matrix3<f64> {
        Matrix3::new(900.0, 0.0, 640.0, 0.0, 880.0, 360.0, 0.0, 0.0, 1.0)
    }

    fn homography(k: &Matrix3<f64>, rot: Rotation3<f64>, t: Vector3<f64>) -> Matrix3<f64> {
        // For Z=0 plane, H = K [r1 r2 t]
        let r = rot.matrix();
        let m = Matrix3::from_columns(&[r.column(0).into_owned(), r.column(1).into_owned(), t]);
        k * m
    }

    fn views() -> Vec<Matrix3<f64>> {
        let k = kmtx();
        vec![
            homography(&k, Rotation3::from_euler_angles(0.1, 0.0, 0.05), Vector3::new(0.1, -0.05, 1.0)),
            homography(&k, Rotation3::from_euler_angles(-0.05, 0.15, -0.1), Vector3::new(-0.1, 0.05, 1.2)),
            homography(&k, Rotation3::from_euler_angles(0.2, -0.1, 0.0), Vector3::new(0.05, 0.1, 0.9)),
        ]
    }

    #[test]
    fn zhang_recovers_kmtx() {
        let k = zhang_intrinsics(&views()).expect("non-degenerate");
        assert_relative_eq!(k.fx, 900.0, max_relative = 1e-7);
        assert_relative_eq!(k.fy, 880.0, max_relative = 1e-7);
        assert_relative_eq!(k.cx, 640.0, max_relative = 1e-7);
        assert_relative_eq!(k.cy, 360.0, max_relative = 1e-7);
        assert!(k.skew.abs() < 1e-4);
    }

    #[test]
    fn zhang_needs_three_views() {
        assert!(zhang_intrinsics(&views()[..2]).is_none());
    }

    #[test]
    fn centered_focal_recovers_focal_lengths() {
        let (fx, fy) = centered_focal(&views()[..2], 640.0, 360.0).expect("tilted views");
        assert_relative_eq!(fx, 900.0, max_relative = 1e-7);
        assert_relative_eq!(fy, 880.0, max_relative = 1e-7);
    }

    #[test]
    fn centered_focal_rejects_fronto_parallel_views() {
        let k = kmtx();
        let h = homography(&k, Rotation3::identity(), Vector3::new(0.0, 0.0, 2.0));
        assert!(centered_focal(&[h], 640.0, 360.0).is_none());
    }

    #[test]
    fn planar_pose_recovers_ground_truth_and_sign() {
        let k = kmtx();
        let rot = Rotation3::from_euler_angles(0.1, -0.2, 0.3);
        let t = Vector3::new(0.1, -0.05, 1.5);
        let h = homography(&k, rot, t);

        for scale in [1.0, -3.0] {
            let iso = planar_pose(&k, &(h * scale)).expect("pose");
            assert_relative_eq!(iso.translation.vector, t, epsilon = 1e-9);
            assert_relative_eq!(
                iso.rotation.to_rotation_matrix().matrix(),
                rot.matrix(),
                epsilon = 1e-9
            );
        }
    }
}
