use nalgebra::{Isometry3, Matrix3, Point2, Point3, Rotation3, Translation3, UnitQuaternion, Vector2, Vector3};
use serde::{Deserialize, Serialize};

/// Pinhole intrinsics in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Intrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
    #[serde(default)]
    pub skew: f64,
}

impl Intrinsics {
    pub fn new(fx: f64, fy: f64, cx: f64, cy: f64) -> Self {
        Self {
            fx,
            fy,
            cx,
            cy,
            skew: 0.0,
        }
    }

    /// Camera matrix `K`.
    pub fn k_matrix(&self) -> Matrix3<f64> {
        Matrix3::new(
            self.fx, self.skew, self.cx, //
            0.0, self.fy, self.cy, //
            0.0, 0.0, 1.0,
        )
    }

    /// Finite, with positive focal lengths.
    pub fn is_valid(&self) -> bool {
        [self.fx, self.fy, self.cx, self.cy, self.skew]
            .iter()
            .all(|v| v.is_finite())
            && self.fx > 0.0
            && self.fy > 0.0
    }

    /// Pixel -> normalized image coordinates (`K⁻¹`).
    #[inline]
    pub fn normalize(&self, p: Point2<f64>) -> Vector2<f64> {
        let y = (p.y - self.cy) / self.fy;
        let x = (p.x - self.cx - self.skew * y) / self.fx;
        Vector2::new(x, y)
    }

    /// Normalized image coordinates -> pixel (`K`).
    #[inline]
    pub fn denormalize(&self, n: Vector2<f64>) -> Point2<f64> {
        Point2::new(
            self.fx * n.x + self.skew * n.y + self.cx,
            self.fy * n.y + self.cy,
        )
    }
}

/// Brown-Conrady distortion: radial `k1, k2, k3`, tangential `p1, p2`.
///
/// Serialized field order follows the common `(k1, k2, p1, p2, k3)` layout.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Distortion {
    pub k1: f64,
    pub k2: f64,
    pub p1: f64,
    pub p2: f64,
    pub k3: f64,
}

impl Distortion {
    pub fn from_array(c: [f64; 5]) -> Self {
        Self {
            k1: c[0],
            k2: c[1],
            p1: c[2],
            p2: c[3],
            k3: c[4],
        }
    }

    /// `[k1, k2, p1, p2, k3]`.
    pub fn to_array(&self) -> [f64; 5] {
        [self.k1, self.k2, self.p1, self.p2, self.k3]
    }

    pub fn is_zero(&self) -> bool {
        self.to_array().iter().all(|&c| c == 0.0)
    }

    /// Apply the model to an ideal normalized point.
    #[inline]
    pub fn distort(&self, n: Vector2<f64>) -> Vector2<f64> {
        let (x, y) = (n.x, n.y);
        let r2 = x * x + y * y;
        let r4 = r2 * r2;
        let r6 = r4 * r2;

        let radial = 1.0 + self.k1 * r2 + self.k2 * r4 + self.k3 * r6;

        let x_tan = 2.0 * self.p1 * x * y + self.p2 * (r2 + 2.0 * x * x);
        let y_tan = self.p1 * (r2 + 2.0 * y * y) + 2.0 * self.p2 * x * y;

        Vector2::new(x * radial + x_tan, y * radial + y_tan)
    }

    /// Invert [`Distortion::distort`] by fixed-point iteration.
    pub fn undistort_normalized(&self, nd: Vector2<f64>) -> Vector2<f64> {
        const MAX_ITERS: usize = 20;
        let mut n = nd;
        for _ in 0..MAX_ITERS {
            let err = self.distort(n) - nd;
            n -= err;
            if !(n.x.is_finite() && n.y.is_finite()) {
                return nd;
            }
            if err.norm_squared() < 1e-24 {
                break;
            }
        }
        n
    }
}

/// Board-to-camera pose: Rodrigues rotation vector and translation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ViewPose {
    pub rvec: [f64; 3],
    pub tvec: [f64; 3],
}

impl ViewPose {
    pub fn isometry(&self) -> Isometry3<f64> {
        let rot = Rotation3::new(Vector3::from(self.rvec));
        Isometry3::from_parts(
            Translation3::from(Vector3::from(self.tvec)),
            UnitQuaternion::from_rotation_matrix(&rot),
        )
    }

    pub fn from_isometry(iso: &Isometry3<f64>) -> Self {
        let r = iso.rotation.scaled_axis();
        let t = iso.translation.vector;
        Self {
            rvec: [r.x, r.y, r.z],
            tvec: [t.x, t.y, t.z],
        }
    }
}

// Closest depth used for points at or behind the camera plane.
const MIN_DEPTH: f64 = 1e-6;

/// Project a point given in camera coordinates.
#[inline]
pub(crate) fn project_camera_point(
    intrinsics: &Intrinsics,
    distortion: &Distortion,
    pc: &Point3<f64>,
) -> Point2<f64> {
    let z = pc.z.max(MIN_DEPTH);
    let n = Vector2::new(pc.x / z, pc.y / z);
    intrinsics.denormalize(distortion.distort(n))
}

/// Project a board point through pose, lens distortion and `K`.
///
/// Returns `None` for points at or behind the camera.
pub fn project_point(
    intrinsics: &Intrinsics,
    distortion: &Distortion,
    pose: &Isometry3<f64>,
    p: &Point3<f64>,
) -> Option<Point2<f64>> {
    let pc = pose * p;
    if pc.z <= MIN_DEPTH {
        return None;
    }
    Some(project_camera_point(intrinsics, distortion, &pc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn undistort_inverts_distort() {
        let d = Distortion {
            k1: -0.28,
            k2: 0.07,
            p1: 0.001,
            p2: -0.0005,
            k3: 0.0,
        };
        for n in [
            Vector2::new(0.0, 0.0),
            Vector2::new(0.3, -0.2),
            Vector2::new(-0.5, 0.35),
        ] {
            let back = d.undistort_normalized(d.distort(n));
            assert_relative_eq!(back, n, epsilon = 1e-9);
        }
    }

    #[test]
    fn normalize_round_trips() {
        let k = Intrinsics::new(820.0, 790.0, 319.5, 241.0);
        let p = Point2::new(100.25, 400.5);
        assert_relative_eq!(k.denormalize(k.normalize(p)), p, epsilon = 1e-12);
    }

    #[test]
    fn pose_round_trips_through_isometry() {
        let pose = ViewPose {
            rvec: [0.2, -0.4, 0.1],
            tvec: [-3.0, 1.5, 40.0],
        };
        let back = ViewPose::from_isometry(&pose.isometry());
        for i in 0..3 {
            assert_relative_eq!(back.rvec[i], pose.rvec[i], epsilon = 1e-12);
            assert_relative_eq!(back.tvec[i], pose.tvec[i], epsilon = 1e-12);
        }
    }

    #[test]
    fn points_behind_the_camera_do_not_project() {
        let k = Intrinsics::new(500.0, 500.0, 320.0, 240.0);
        let pose = ViewPose {
            rvec: [0.0; 3],
            tvec: [0.0, 0.0, -1.0],
        }
        .isometry();
        assert!(project_point(&k, &Distortion::default(), &pose, &Point3::origin()).is_none());
    }
}
