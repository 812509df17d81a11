//! High-level facade crate for the `unwarp-*` workspace.
//!
//! This crate provides:
//! - re-exports of the underlying crates (`core`, `chessboard`, `calib`)
//! - the end-to-end flows [`calibrate_from_images`] and [`corners_unwarp`]
//! - (feature `image`) adapters between `image` crate buffers and [`core::Image`]
//!
//! ## Quickstart
//!
//! ```no_run
//! use unwarp::{calibrate_from_images, corners_unwarp, CalibrationSetup, UnwarpParams};
//! use unwarp::io::{load_image, save_image};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let shots = ["cal1.png", "cal2.png", "cal3.png"]
//!     .iter()
//!     .map(load_image)
//!     .collect::<Result<Vec<_>, _>>()?;
//! let views: Vec<_> = shots.iter().map(|img| img.view()).collect();
//! let run = calibrate_from_images(&views, &CalibrationSetup::default())?;
//! println!("rms {:.3} px", run.report.rms_error);
//!
//! let img = load_image("test_image.png")?;
//! let result = corners_unwarp(&img.view(), &run.report.model, &UnwarpParams::default())?;
//! save_image(&result.warped, "top_down.png")?;
//! # Ok(())
//! # }
//! ```
//!
//! ## API map
//! - `unwarp::core`: images, bilinear sampling, corner sets, homographies, warping.
//! - `unwarp::chessboard`: chessboard inner-corner detection and overlays.
//! - `unwarp::calib`: calibration solver, camera model, undistortion.
//! - `unwarp::io` (feature `image`): file loading/saving and buffer conversion.

pub use unwarp_calib as calib;
pub use unwarp_chessboard as chessboard;
pub use unwarp_core as core;

pub use unwarp_calib::{CalibrationModel, CalibrationOptions, CalibrationReport};
pub use unwarp_chessboard::{detect_chessboard, ChessboardParams};
pub use unwarp_core::{CornerSet, GridIndex, Image, ImageView, PerspectiveTransform};

mod pipeline;

pub use pipeline::{
    calibrate_from_images, corners_unwarp, CalibrationRun, CalibrationSetup, DestinationQuad,
    PipelineError, UnwarpParams, UnwarpResult,
};

#[cfg(feature = "image")]
pub mod io;
