//! Synthetic camera views of a chessboard, for tests and demos.

use crate::camera::{project_point, Distortion, Intrinsics, ViewPose};
use nalgebra::{Isometry3, Point2, Point3, Rotation3, Translation3, UnitQuaternion, Vector3};
use std::f64::consts::TAU;
use unwarp_core::synthetic::{render_checkerboard, CheckerboardSpec};
use unwarp_core::Image;

/// Project board points into the image; `None` if any lands behind the camera.
pub fn project_board(
    intrinsics: &Intrinsics,
    distortion: &Distortion,
    pose: &ViewPose,
    object: &[Point3<f64>],
) -> Option<Vec<Point2<f64>>> {
    let iso = pose.isometry();
    object
        .iter()
        .map(|p| project_point(intrinsics, distortion, &iso, p))
        .collect()
}

/// `n` deterministic poses looking at `target` from about `distance` away.
///
/// The board is tilted by 0.25-0.45 rad about an axis that turns around the
/// optical axis from view to view, with a small roll and lateral offset, so
/// that consecutive views constrain the intrinsics independently.
pub fn orbit_poses(n: usize, distance: f64, target: Point3<f64>) -> Vec<ViewPose> {
    (0..n)
        .map(|i| {
            let a = TAU * i as f64 / n.max(1) as f64;
            let tilt = if i % 2 == 0 { 0.25 } else { 0.45 };
            let axis = Vector3::new(a.cos(), a.sin(), 0.0);
            let roll = 0.1 * (2.0 * a).sin();
            let rot = Rotation3::from_axis_angle(&nalgebra::Unit::new_normalize(axis), tilt)
                * Rotation3::from_axis_angle(&Vector3::z_axis(), roll);
            let offset = Vector3::new(0.05 * (3.0 * a).cos(), 0.05 * (2.0 * a).sin(), 1.0) * distance;
            let t = offset - rot * target.coords;
            ViewPose::from_isometry(&Isometry3::from_parts(
                Translation3::from(t),
                UnitQuaternion::from_rotation_matrix(&rot),
            ))
        })
        .collect()
}

/// Render `board` through the full camera model, distortion included.
///
/// Each pixel is undistorted, cast as a ray and intersected with the board
/// plane `z = 0`. The result is single-channel.
pub fn render_view(
    width: usize,
    height: usize,
    board: &CheckerboardSpec,
    intrinsics: &Intrinsics,
    distortion: &Distortion,
    pose: &ViewPose,
    supersample: usize,
) -> Image {
    let cam_to_board = pose.isometry().inverse();
    let origin = cam_to_board.translation.vector;
    render_checkerboard(width, height, board, supersample, |u, v| {
        let nd = intrinsics.normalize(Point2::new(u, v));
        let n = distortion.undistort_normalized(nd);
        let dir = cam_to_board.rotation * Vector3::new(n.x, n.y, 1.0);
        if dir.z.abs() < 1e-12 {
            return None;
        }
        let s = -origin.z / dir.z;
        if s <= 0.0 {
            return None;
        }
        let p = origin + dir * s;
        Some(Point2::new(p.x, p.y))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::board_points;

    #[test]
    fn orbit_views_face_the_board() {
        let target = Point3::new(3.5, 2.5, 0.0);
        for pose in orbit_poses(8, 20.0, target) {
            let pc = pose.isometry() * target;
            assert!((pc.z - 20.0).abs() < 1e-9);
            assert!(pc.x.abs() <= 1.0 + 1e-9 && pc.y.abs() <= 1.0 + 1e-9);
        }
    }

    #[test]
    fn rendered_corners_sit_on_projected_points() {
        let k = Intrinsics::new(600.0, 600.0, 159.5, 119.5);
        let d = Distortion {
            k1: -0.1,
            ..Distortion::default()
        };
        let board = CheckerboardSpec::new(4, 3, 1.0);
        let pose = orbit_poses(1, 12.0, Point3::new(1.5, 1.0, 0.0))[0];
        let img = render_view(320, 240, &board, &k, &d, &pose, 1);
        let pts = project_board(&k, &d, &pose, &board_points(4, 3, 1.0)).unwrap();

        // Pixels just inside the dark square at the first inner corner's
        // top-left are dark; the diagonal neighbour's square is dark too.
        let p = pts[0];
        let at = |dx: f64, dy: f64| {
            let x = (p.x + dx).round() as usize;
            let y = (p.y + dy).round() as usize;
            img.data[y * img.width + x]
        };
        let tl = at(-6.0, -6.0);
        let tr = at(6.0, -6.0);
        assert!(tl < 128 && tr > 128, "tl={tl} tr={tr}");
    }
}
