//! Camera calibration from planar chessboard views.
//!
//! Pipeline: per-view homography (normalized DLT) -> closed-form intrinsics
//! (Zhang, or a principal-point-centred focal solve for fewer than three
//! distinct views) -> per-view planar pose -> joint Levenberg-Marquardt
//! refinement of `[fx, fy, cx, cy, k1, k2, p1, p2, k3]` and all poses on the
//! reprojection error.

use crate::camera::{project_camera_point, Distortion, Intrinsics, ViewPose};
use crate::init::{centered_focal, planar_pose, zhang_intrinsics};
use crate::model::CalibrationModel;
use levenberg_marquardt::{LeastSquaresProblem, LevenbergMarquardt, TerminationReason};
use log::{debug, info, warn};
use nalgebra::{storage::Owned, DMatrix, DVector, Dyn, Matrix3, Point2, Point3, Rotation3, Vector3};
use std::cell::Cell;
use serde::{Deserialize, Serialize};
use unwarp_core::{estimate_homography, CornerSet};

#[cfg(feature = "tracing")]
use tracing::instrument;

const N_INTR: usize = 9;
const N_VIEW: usize = 6;

// Indices into the intrinsic block.
const K3: usize = 8;
const P1: usize = 6;
const P2: usize = 7;

// Homographies closer than this (after scale normalization) count as the same pose.
const SAME_POSE_EPS: f64 = 1e-6;

/// Solver settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationOptions {
    pub max_iterations: usize,
    /// Relative reduction of the sum of squares below which the solve has converged.
    pub ftol: f64,
    /// Relative step size below which the solve has converged.
    pub xtol: f64,
    /// Keep `k3` at zero.
    pub fix_k3: bool,
    /// Keep `p1` and `p2` at zero.
    pub fix_tangential: bool,
    /// Fewer views than this are accepted with a warning.
    pub recommended_views: usize,
}

impl Default for CalibrationOptions {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            ftol: 1e-10,
            xtol: 1e-10,
            fix_k3: false,
            fix_tangential: false,
            recommended_views: 12,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibrationReport {
    pub model: CalibrationModel,
    /// Root-mean-square reprojection error over all points, in pixels.
    pub rms_error: f64,
    pub per_view_rms: Vec<f64>,
    pub iterations: usize,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum CalibrationError {
    #[error("no calibration views")]
    NoViews,
    #[error("{corner_sets} corner sets but {object_sets} object point sets")]
    ViewCountMismatch {
        corner_sets: usize,
        object_sets: usize,
    },
    #[error("view {view}: {image_points} image points but {object_points} object points")]
    DimensionMismatch {
        view: usize,
        image_points: usize,
        object_points: usize,
    },
    #[error("view {view}: chessboard was not found")]
    ViewNotFound { view: usize },
    #[error("view {view}: {points} points, at least 4 are needed")]
    TooFewPoints { view: usize, points: usize },
    #[error("view {view}: object points are not on the z = 0 plane")]
    NonPlanarTarget { view: usize },
    #[error("invalid image size {width}x{height}")]
    InvalidImageSize { width: usize, height: usize },
    #[error("view {view}: degenerate point configuration")]
    DegenerateView { view: usize },
    #[error("all {views} views show the board in the same pose")]
    IdenticalViews { views: usize },
    #[error("solved intrinsics are invalid (non-finite or non-positive focal length)")]
    InvalidIntrinsics,
    #[error("not converged after {iterations} iterations (rms {rms:.4} px)")]
    NotConverged { iterations: usize, rms: f64 },
    #[error("only {found} usable views, at least {required} required")]
    NotEnoughViews { found: usize, required: usize },
}

struct View {
    object: Vec<Point3<f64>>,
    image: Vec<Point2<f64>>,
}

/// Planar object points of an `nx x ny` board: `(col * s, row * s, 0)`, row-major.
///
/// The ordering matches [`CornerSet`] so that index `i` pairs the same corner.
pub fn board_points(nx: usize, ny: usize, square_size: f64) -> Vec<Point3<f64>> {
    (0..ny)
        .flat_map(|r| {
            (0..nx).map(move |c| Point3::new(c as f64 * square_size, r as f64 * square_size, 0.0))
        })
        .collect()
}

fn validate(
    corner_sets: &[CornerSet],
    object_points: &[Vec<Point3<f64>>],
    image_size: (usize, usize),
) -> Result<Vec<View>, CalibrationError> {
    if corner_sets.is_empty() {
        return Err(CalibrationError::NoViews);
    }
    if corner_sets.len() != object_points.len() {
        return Err(CalibrationError::ViewCountMismatch {
            corner_sets: corner_sets.len(),
            object_sets: object_points.len(),
        });
    }
    if image_size.0 == 0 || image_size.1 == 0 {
        return Err(CalibrationError::InvalidImageSize {
            width: image_size.0,
            height: image_size.1,
        });
    }

    corner_sets
        .iter()
        .zip(object_points)
        .enumerate()
        .map(|(view, (set, obj))| {
            if !set.found {
                return Err(CalibrationError::ViewNotFound { view });
            }
            if set.points.len() != obj.len() {
                return Err(CalibrationError::DimensionMismatch {
                    view,
                    image_points: set.points.len(),
                    object_points: obj.len(),
                });
            }
            if obj.len() < 4 {
                return Err(CalibrationError::TooFewPoints {
                    view,
                    points: obj.len(),
                });
            }
            if obj.iter().any(|p| p.z.abs() > 1e-9) {
                return Err(CalibrationError::NonPlanarTarget { view });
            }
            Ok(View {
                object: obj.clone(),
                image: set
                    .points
                    .iter()
                    .map(|p| Point2::new(p.x as f64, p.y as f64))
                    .collect(),
            })
        })
        .collect()
}

/// Points spread along a line (or collapsed to one spot) give no homography.
fn is_collinear(points: impl Iterator<Item = Point2<f64>> + Clone) -> bool {
    let n = points.clone().count() as f64;
    let mean = points.clone().fold(Point2::origin(), |acc, p| acc + p.coords / n);
    let (mut sxx, mut sxy, mut syy) = (0.0, 0.0, 0.0);
    for p in points {
        let d = p - mean;
        sxx += d.x * d.x;
        sxy += d.x * d.y;
        syy += d.y * d.y;
    }
    // Eigenvalues of the 2x2 scatter matrix.
    let half_trace = 0.5 * (sxx + syy);
    let disc = (0.25 * (sxx - syy).powi(2) + sxy * sxy).sqrt();
    let (lo, hi) = (half_trace - disc, half_trace + disc);
    hi <= 0.0 || lo <= 1e-9 * hi
}

fn count_distinct_poses(homographies: &[Matrix3<f64>]) -> usize {
    let normalized: Vec<Matrix3<f64>> = homographies
        .iter()
        .map(|h| {
            let s = if h[(2, 2)] < 0.0 { -h.norm() } else { h.norm() };
            h / s
        })
        .collect();
    let mut distinct: Vec<&Matrix3<f64>> = Vec::new();
    for h in &normalized {
        if distinct.iter().all(|d| (*d - h).norm() > SAME_POSE_EPS) {
            distinct.push(h);
        }
    }
    distinct.len()
}

fn initial_intrinsics(
    homographies: &[Matrix3<f64>],
    distinct_poses: usize,
    image_size: (usize, usize),
) -> Intrinsics {
    let (w, h) = (image_size.0 as f64, image_size.1 as f64);

    if distinct_poses >= 3 {
        if let Some(k) = zhang_intrinsics(homographies) {
            let ratio = k.fx / k.fy;
            if (0.0..=w).contains(&k.cx) && (0.0..=h).contains(&k.cy) && (0.5..=2.0).contains(&ratio) {
                debug!("zhang init: fx={:.2} fy={:.2} cx={:.2} cy={:.2}", k.fx, k.fy, k.cx, k.cy);
                return Intrinsics::new(k.fx, k.fy, k.cx, k.cy);
            }
            debug!("zhang init implausible, using centred principal point");
        }
    }

    let cx = (w - 1.0) * 0.5;
    let cy = (h - 1.0) * 0.5;
    let (fx, fy) = centered_focal(homographies, cx, cy).unwrap_or_else(|| {
        let f = w.max(h);
        debug!("no perspective cue for focal length, assuming {f}");
        (f, f)
    });
    Intrinsics::new(fx, fy, cx, cy)
}

fn split_intrinsics(p: &[f64]) -> (Intrinsics, Distortion) {
    (
        Intrinsics::new(p[0], p[1], p[2], p[3]),
        Distortion {
            k1: p[4],
            k2: p[5],
            p1: p[6],
            p2: p[7],
            k3: p[8],
        },
    )
}

fn view_residuals(intr: &[f64], pose: &[f64], view: &View, out: &mut [f64]) {
    let (k, d) = split_intrinsics(intr);
    let rot = Rotation3::new(Vector3::new(pose[0], pose[1], pose[2]));
    let t = Vector3::new(pose[3], pose[4], pose[5]);
    for (i, (obj, img)) in view.object.iter().zip(&view.image).enumerate() {
        let pc = Point3::from(rot * obj.coords + t);
        let proj = project_camera_point(&k, &d, &pc);
        out[2 * i] = proj.x - img.x;
        out[2 * i + 1] = proj.y - img.y;
    }
}

fn view_cost(params: &[f64], k: usize, view: &View, buf: &mut Vec<f64>) -> f64 {
    buf.resize(2 * view.object.len(), 0.0);
    view_residuals(&params[..N_INTR], &params[pose_range(k)], view, buf);
    buf.iter().map(|r| r * r).sum()
}

fn total_cost(params: &[f64], views: &[View]) -> f64 {
    let mut buf = Vec::new();
    views
        .iter()
        .enumerate()
        .map(|(k, v)| view_cost(params, k, v, &mut buf))
        .sum()
}

#[inline]
fn fd_step(value: f64) -> f64 {
    1e-6 * value.abs().max(1.0)
}

fn pose_range(k: usize) -> std::ops::Range<usize> {
    N_INTR + N_VIEW * k..N_INTR + N_VIEW * (k + 1)
}

/// Reprojection residuals of every view as a least-squares problem over the
/// free parameters. Fixed intrinsic entries keep their initial value.
struct ReprojectionProblem<'a> {
    views: &'a [View],
    params: Vec<f64>,
    /// Indices into `params` exposed to the optimizer, ascending.
    free: Vec<usize>,
    rows: usize,
    /// Jacobian evaluations so far; one per outer LM iteration.
    jacobians: Cell<usize>,
    max_iterations: usize,
}

impl<'a> ReprojectionProblem<'a> {
    fn new(views: &'a [View], params: Vec<f64>, free_intr: &[bool; N_INTR], max_iterations: usize) -> Self {
        let free = (0..params.len())
            .filter(|&i| i >= N_INTR || free_intr[i])
            .collect();
        let rows = views.iter().map(|v| 2 * v.object.len()).sum();
        Self {
            views,
            params,
            free,
            rows,
            jacobians: Cell::new(0),
            max_iterations,
        }
    }

    fn iterations(&self) -> usize {
        self.jacobians.get().min(self.max_iterations)
    }
}

impl LeastSquaresProblem<f64, Dyn, Dyn> for ReprojectionProblem<'_> {
    type ResidualStorage = Owned<f64, Dyn>;
    type JacobianStorage = Owned<f64, Dyn, Dyn>;
    type ParameterStorage = Owned<f64, Dyn>;

    fn set_params(&mut self, x: &DVector<f64>) {
        for (&g, &v) in self.free.iter().zip(x.iter()) {
            self.params[g] = v;
        }
    }

    fn params(&self) -> DVector<f64> {
        DVector::from_iterator(self.free.len(), self.free.iter().map(|&g| self.params[g]))
    }

    fn residuals(&self) -> Option<DVector<f64>> {
        let mut out = DVector::<f64>::zeros(self.rows);
        let mut offset = 0;
        for (k, view) in self.views.iter().enumerate() {
            let n = 2 * view.object.len();
            view_residuals(
                &self.params[..N_INTR],
                &self.params[pose_range(k)],
                view,
                &mut out.as_mut_slice()[offset..offset + n],
            );
            offset += n;
        }
        Some(out)
    }

    /// Central differences, block by block: each view only touches the
    /// intrinsic block and its own pose.
    fn jacobian(&self) -> Option<DMatrix<f64>> {
        let calls = self.jacobians.get() + 1;
        self.jacobians.set(calls);
        if calls > self.max_iterations {
            return None;
        }

        let mut column = vec![None; self.params.len()];
        for (c, &g) in self.free.iter().enumerate() {
            column[g] = Some(c);
        }

        let mut jac = DMatrix::<f64>::zeros(self.rows, self.free.len());
        let mut p = self.params.clone();
        let (mut rp, mut rm) = (Vec::new(), Vec::new());
        let mut offset = 0;
        for (k, view) in self.views.iter().enumerate() {
            let n = 2 * view.object.len();
            let globals = (0..N_INTR).chain(pose_range(k));
            for g in globals {
                let Some(c) = column[g] else {
                    continue;
                };
                let orig = p[g];
                let h = fd_step(orig);
                p[g] = orig + h;
                view_cost(&p, k, view, &mut rp);
                p[g] = orig - h;
                view_cost(&p, k, view, &mut rm);
                p[g] = orig;
                for r in 0..n {
                    jac[(offset + r, c)] = (rp[r] - rm[r]) / (2.0 * h);
                }
            }
            offset += n;
        }
        Some(jac)
    }
}

struct LmOutcome {
    params: Vec<f64>,
    iterations: usize,
    converged: bool,
}

fn levenberg_marquardt(
    params: Vec<f64>,
    views: &[View],
    free_intr: &[bool; N_INTR],
    options: &CalibrationOptions,
) -> LmOutcome {
    let problem = ReprojectionProblem::new(views, params, free_intr, options.max_iterations);
    let lm = LevenbergMarquardt::new()
        .with_ftol(options.ftol)
        .with_xtol(options.xtol)
        .with_patience(options.max_iterations.max(1));

    let (problem, report) = lm.minimize(problem);
    // Tolerances below machine precision end with "no improvement possible";
    // the parameters are as good as they get.
    let converged = report.termination.was_successful()
        || matches!(report.termination, TerminationReason::NoImprovementPossible(_));
    debug!(
        "lm finished after {} iterations ({} evaluations): {:?}",
        problem.iterations(),
        report.number_of_evaluations,
        report.termination
    );

    LmOutcome {
        iterations: problem.iterations(),
        converged,
        params: problem.params,
    }
}

/// Solve intrinsics, distortion and per-view poses from chessboard views.
///
/// `corner_sets[i]` and `object_points[i]` describe the same view and must
/// pair point-for-point (see [`board_points`]). Every view must be `found`.
/// `image_size` is `(width, height)` of the calibration images.
///
/// Fewer than `options.recommended_views` views are accepted with a warning;
/// the result is a local optimum of the reprojection error.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "info", skip(corner_sets, object_points, options), fields(views = corner_sets.len()))
)]
pub fn calibrate(
    corner_sets: &[CornerSet],
    object_points: &[Vec<Point3<f64>>],
    image_size: (usize, usize),
    options: &CalibrationOptions,
) -> Result<CalibrationReport, CalibrationError> {
    let views = validate(corner_sets, object_points, image_size)?;
    if views.len() < options.recommended_views {
        warn!(
            "calibrating from {} views; at least {} are recommended",
            views.len(),
            options.recommended_views
        );
    }

    let homographies = views
        .iter()
        .enumerate()
        .map(|(view, v)| {
            if is_collinear(v.object.iter().map(|p| Point2::new(p.x, p.y)))
                || is_collinear(v.image.iter().copied())
            {
                return Err(CalibrationError::DegenerateView { view });
            }
            let src: Vec<Point2<f64>> = v.object.iter().map(|p| Point2::new(p.x, p.y)).collect();
            estimate_homography(&src, &v.image)
                .map(|h| h.h)
                .ok_or(CalibrationError::DegenerateView { view })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let distinct = count_distinct_poses(&homographies);
    if views.len() >= 2 && distinct == 1 {
        return Err(CalibrationError::IdenticalViews { views: views.len() });
    }

    let k0 = initial_intrinsics(&homographies, distinct, image_size);
    if !k0.is_valid() {
        return Err(CalibrationError::InvalidIntrinsics);
    }

    let mut params = vec![k0.fx, k0.fy, k0.cx, k0.cy, 0.0, 0.0, 0.0, 0.0, 0.0];
    let kmtx = k0.k_matrix();
    for (view, h) in homographies.iter().enumerate() {
        let iso = planar_pose(&kmtx, h).ok_or(CalibrationError::DegenerateView { view })?;
        let pose = ViewPose::from_isometry(&iso);
        params.extend_from_slice(&pose.rvec);
        params.extend_from_slice(&pose.tvec);
    }

    let mut free = [true; N_INTR];
    if options.fix_k3 {
        free[K3] = false;
    }
    if options.fix_tangential {
        free[P1] = false;
        free[P2] = false;
    }

    let n_points: usize = views.iter().map(|v| v.object.len()).sum();
    let outcome = levenberg_marquardt(params, &views, &free, options);
    let params = outcome.params;
    let rms_error = (total_cost(&params, &views) / n_points as f64).sqrt();

    let (intrinsics, distortion) = split_intrinsics(&params[..N_INTR]);
    if !intrinsics.is_valid() || distortion.to_array().iter().any(|c| !c.is_finite()) {
        return Err(CalibrationError::InvalidIntrinsics);
    }
    if !outcome.converged {
        return Err(CalibrationError::NotConverged {
            iterations: outcome.iterations,
            rms: rms_error,
        });
    }

    let mut buf = Vec::new();
    let per_view_rms = views
        .iter()
        .enumerate()
        .map(|(k, v)| (view_cost(&params, k, v, &mut buf) / v.object.len() as f64).sqrt())
        .collect();
    let poses = (0..views.len())
        .map(|k| {
            let p = &params[pose_range(k)];
            ViewPose {
                rvec: [p[0], p[1], p[2]],
                tvec: [p[3], p[4], p[5]],
            }
        })
        .collect();

    info!(
        "calibrated from {} views in {} iterations: rms {:.4} px, fx={:.2} fy={:.2} cx={:.2} cy={:.2}",
        views.len(),
        outcome.iterations,
        rms_error,
        intrinsics.fx,
        intrinsics.fy,
        intrinsics.cx,
        intrinsics.cy
    );

    Ok(CalibrationReport {
        model: CalibrationModel {
            intrinsics,
            distortion,
            image_size: Some(image_size),
            views: poses,
        },
        rms_error,
        per_view_rms,
        iterations: outcome.iterations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn found(points: Vec<Point2<f32>>, nx: usize, ny: usize) -> CornerSet {
        CornerSet::from_points(nx, ny, points).unwrap()
    }

    #[test]
    fn board_points_are_row_major_on_z0() {
        let pts = board_points(8, 6, 25.0);
        assert_eq!(pts.len(), 48);
        assert_eq!(pts[7], Point3::new(175.0, 0.0, 0.0));
        assert_eq!(pts[8], Point3::new(0.0, 25.0, 0.0));
        assert!(pts.iter().all(|p| p.z == 0.0));
    }

    #[test]
    fn validation_errors() {
        let obj = board_points(3, 2, 1.0);
        let img: Vec<Point2<f32>> = obj.iter().map(|p| Point2::new(p.x as f32 * 10.0, p.y as f32 * 10.0)).collect();
        let set = found(img.clone(), 3, 2);
        let opts = CalibrationOptions::default();

        assert_eq!(calibrate(&[], &[], (640, 480), &opts), Err(CalibrationError::NoViews));
        assert_eq!(
            calibrate(&[set.clone()], &[obj.clone(), obj.clone()], (640, 480), &opts),
            Err(CalibrationError::ViewCountMismatch {
                corner_sets: 1,
                object_sets: 2
            })
        );
        assert_eq!(
            calibrate(&[set.clone()], &[obj[..5].to_vec()], (640, 480), &opts),
            Err(CalibrationError::DimensionMismatch {
                view: 0,
                image_points: 6,
                object_points: 5
            })
        );
        assert_eq!(
            calibrate(&[set.clone(), CornerSet::not_found(3, 2)], &[obj.clone(), obj.clone()], (640, 480), &opts),
            Err(CalibrationError::ViewNotFound { view: 1 })
        );
        let mut lifted = obj.clone();
        lifted[2].z = 1.0;
        assert_eq!(
            calibrate(&[set], &[lifted], (640, 480), &opts),
            Err(CalibrationError::NonPlanarTarget { view: 0 })
        );
    }

    #[test]
    fn collinear_view_is_degenerate() {
        let obj: Vec<Point3<f64>> = (0..6).map(|i| Point3::new(i as f64, 0.0, 0.0)).collect();
        let img: Vec<Point2<f32>> = (0..6).map(|i| Point2::new(i as f32 * 10.0, 5.0)).collect();
        let set = found(img, 6, 1);
        assert_eq!(
            calibrate(&[set], &[obj], (640, 480), &CalibrationOptions::default()),
            Err(CalibrationError::DegenerateView { view: 0 })
        );
    }

    #[test]
    fn fixed_terms_are_hidden_from_the_optimizer() {
        let object = board_points(3, 2, 1.0);
        let views = vec![View {
            image: object.iter().map(|p| Point2::new(p.x * 10.0, p.y * 10.0)).collect(),
            object,
        }];
        let mut params = vec![500.0, 500.0, 320.0, 240.0, 0.0, 0.0, 0.0, 0.0, 0.0];
        params.extend_from_slice(&[0.0, 0.0, 0.0, 0.0, 0.0, 50.0]);
        let mut free = [true; N_INTR];
        free[P1] = false;
        free[P2] = false;
        free[K3] = false;

        let mut problem = ReprojectionProblem::new(&views, params, &free, 1);
        assert_eq!(problem.params().len(), 6 + 6);
        assert_eq!(problem.residuals().map(|r| r.len()), Some(12));
        let jac = problem.jacobian().unwrap();
        assert_eq!(jac.shape(), (12, 12));

        let mut x = problem.params();
        x[4] = 0.1;
        problem.set_params(&x);
        assert_eq!(problem.params[4], 0.1);
        assert_eq!(problem.params[K3], 0.0);

        // The budget allows one Jacobian.
        assert!(problem.jacobian().is_none());
        assert_eq!(problem.iterations(), 1);
    }

    #[test]
    fn distinct_pose_counting() {
        let a = Matrix3::new(1.0, 0.1, 5.0, 0.0, 1.0, 3.0, 0.0, 0.001, 1.0);
        let b = Matrix3::new(0.9, 0.0, 5.0, 0.1, 1.0, 3.0, 0.001, 0.0, 1.0);
        assert_eq!(count_distinct_poses(&[a, a * 2.0, a * -0.5]), 1);
        assert_eq!(count_distinct_poses(&[a, b, a]), 2);
    }
}
