//! Pinhole camera calibration with Brown-Conrady lens distortion.
//!
//! [`calibrate`] solves intrinsics `(fx, fy, cx, cy)`, distortion
//! `(k1, k2, p1, p2, k3)` and one board pose per view from ordered chessboard
//! corners; [`undistort`] and [`UndistortMap`] apply the resulting
//! [`CalibrationModel`] to images.
//!
//! ```
//! use unwarp_calib::{board_points, calibrate, CalibrationError, CalibrationOptions};
//!
//! let object = board_points(8, 6, 25.0);
//! assert_eq!(object.len(), 48);
//! assert_eq!(
//!     calibrate(&[], &[], (640, 480), &CalibrationOptions::default()),
//!     Err(CalibrationError::NoViews)
//! );
//! ```

mod camera;
mod init;
mod model;
mod solver;
mod undistort;
pub mod synthetic;

pub use camera::{project_point, Distortion, Intrinsics, ViewPose};
pub use model::{CalibrationModel, ModelIoError};
pub use solver::{board_points, calibrate, CalibrationError, CalibrationOptions, CalibrationReport};
pub use undistort::{undistort, undistort_points, UndistortError, UndistortMap, UndistortOptions};
