//! End-to-end flows: calibration from a batch of chessboard images, and
//! undistort -> detect -> rectify for a single image.

use crate::calib::{
    board_points, calibrate, undistort, CalibrationError, CalibrationModel, CalibrationOptions,
    CalibrationReport, UndistortError, UndistortOptions,
};
use crate::chessboard::{draw_corners, ChessboardDetector, ChessboardParams};
use crate::core::{
    warp_perspective, BorderMode, CornerSet, GeometryError, GridIndex, Image, ImageView,
    PerspectiveTransform,
};
use log::{debug, info, warn};
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("chessboard with {nx}x{ny} inner corners not found")]
    DetectionFailure { nx: usize, ny: usize },
    #[error("grid cell (row {row}, col {col}) is outside the {nx}x{ny} board")]
    InvalidGridIndex {
        row: usize,
        col: usize,
        nx: usize,
        ny: usize,
    },
    #[error("output size {width}x{height} is empty")]
    EmptyOutput { width: usize, height: usize },
    #[error("calibration images have different sizes: {expected:?} and {got:?} (image {index})")]
    MixedImageSizes {
        index: usize,
        expected: (usize, usize),
        got: (usize, usize),
    },
    #[error(transparent)]
    Geometry(#[from] GeometryError),
    #[error(transparent)]
    Undistort(#[from] UndistortError),
    #[error(transparent)]
    Calibration(#[from] CalibrationError),
}

/// Where the four selected corners land in the rectified image.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DestinationQuad {
    /// Output pixel positions, in the order of the source corners.
    Explicit([[f32; 2]; 4]),
    /// Rectangle inset from the output border, ordered top-left, top-right,
    /// bottom-left, bottom-right.
    Margin { x: f32, y: f32 },
}

impl Default for DestinationQuad {
    fn default() -> Self {
        DestinationQuad::Margin { x: 100.0, y: 100.0 }
    }
}

impl DestinationQuad {
    /// Destination points for a `width x height` output.
    pub fn resolve(&self, width: usize, height: usize) -> [Point2<f32>; 4] {
        match *self {
            DestinationQuad::Explicit(pts) => pts.map(|[x, y]| Point2::new(x, y)),
            DestinationQuad::Margin { x, y } => {
                let right = width as f32 - 1.0 - x;
                let bottom = height as f32 - 1.0 - y;
                [
                    Point2::new(x, y),
                    Point2::new(right, y),
                    Point2::new(x, bottom),
                    Point2::new(right, bottom),
                ]
            }
        }
    }
}

/// Settings of [`corners_unwarp`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnwarpParams {
    /// Inner corners per row.
    pub nx: usize,
    /// Inner corners per column.
    pub ny: usize,
    pub detector: ChessboardParams,
    pub undistort: UndistortOptions,
    /// Grid cells used as source points; the outer corners when `None`.
    pub source_corners: Option<[GridIndex; 4]>,
    pub destination: DestinationQuad,
    /// `(width, height)` of the rectified image; the input size when `None`.
    pub output_size: Option<(usize, usize)>,
    pub border: BorderMode,
    /// Also return the detected corners drawn on the rectified image.
    pub annotate: bool,
}

impl Default for UnwarpParams {
    fn default() -> Self {
        Self {
            nx: 8,
            ny: 6,
            detector: ChessboardParams::default(),
            undistort: UndistortOptions::default(),
            source_corners: None,
            destination: DestinationQuad::default(),
            output_size: None,
            border: BorderMode::default(),
            annotate: false,
        }
    }
}

#[derive(Clone, Debug)]
pub struct UnwarpResult {
    /// Top-down view.
    pub warped: Image,
    /// Undistorted image -> `warped`.
    pub transform: PerspectiveTransform,
    /// Corners detected in the undistorted image.
    pub corners: CornerSet,
    pub undistorted: Image,
    /// `warped` with the detected corners drawn in, when requested.
    pub overlay: Option<Image>,
}

fn select_quad(corners: &CornerSet, cells: [GridIndex; 4]) -> Result<[Point2<f32>; 4], PipelineError> {
    if let Some(bad) = cells.iter().find(|c| corners.index_of(**c).is_none()) {
        return Err(PipelineError::InvalidGridIndex {
            row: bad.row,
            col: bad.col,
            nx: corners.nx,
            ny: corners.ny,
        });
    }
    corners.quad(cells).ok_or(PipelineError::DetectionFailure {
        nx: corners.nx,
        ny: corners.ny,
    })
}

/// Undistort `image`, find the chessboard and warp it to a top-down view.
///
/// The four source points are picked by grid position (by default the outer
/// corners of the detected board) and mapped onto `params.destination`.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "info", skip(image, model, params), fields(width = image.width, height = image.height, nx = params.nx, ny = params.ny))
)]
pub fn corners_unwarp(
    image: &ImageView<'_>,
    model: &CalibrationModel,
    params: &UnwarpParams,
) -> Result<UnwarpResult, PipelineError> {
    let (width, height) = params.output_size.unwrap_or((image.width, image.height));
    if width == 0 || height == 0 {
        return Err(PipelineError::EmptyOutput { width, height });
    }

    let undistorted = undistort(image, model, &params.undistort)?;

    let detector = ChessboardDetector::new(params.detector.clone());
    let corners = detector.detect(&undistorted.view(), params.nx, params.ny);
    if !corners.found {
        return Err(PipelineError::DetectionFailure {
            nx: params.nx,
            ny: params.ny,
        });
    }

    let cells = params.source_corners.unwrap_or_else(|| corners.outer_indices());
    let src = select_quad(&corners, cells)?;
    let dst = params.destination.resolve(width, height);
    debug!("rectifying {src:?} -> {dst:?}");

    let transform = PerspectiveTransform::from_points(&src, &dst)?;
    let warped = warp_perspective(&undistorted.view(), &transform, width, height, params.border);

    let overlay = params.annotate.then(|| {
        let drawn = draw_corners(&undistorted.view(), &corners);
        warp_perspective(&drawn.view(), &transform, width, height, params.border)
    });

    Ok(UnwarpResult {
        warped,
        transform,
        corners,
        undistorted,
        overlay,
    })
}

/// Settings of [`calibrate_from_images`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationSetup {
    pub nx: usize,
    pub ny: usize,
    /// Edge length of one board square, in the unit of the reported poses.
    pub square_size: f64,
    /// Fewest images with a detected board needed to attempt a solve.
    pub min_views: usize,
    pub detector: ChessboardParams,
    pub options: CalibrationOptions,
}

impl Default for CalibrationSetup {
    fn default() -> Self {
        Self {
            nx: 8,
            ny: 6,
            square_size: 1.0,
            min_views: 1,
            detector: ChessboardParams::default(),
            options: CalibrationOptions::default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct CalibrationRun {
    pub report: CalibrationReport,
    /// Indices of the images the model was solved from, in input order.
    pub used: Vec<usize>,
    /// Indices of the images where no board was found.
    pub skipped: Vec<usize>,
}

/// Detect the board in every image and calibrate from the ones where it was found.
///
/// All images must share one size. Images without a complete board are
/// skipped and reported; at least `setup.min_views` must remain.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "info", skip(images, setup), fields(images = images.len(), nx = setup.nx, ny = setup.ny))
)]
pub fn calibrate_from_images(
    images: &[ImageView<'_>],
    setup: &CalibrationSetup,
) -> Result<CalibrationRun, PipelineError> {
    let first = images.first().ok_or(CalibrationError::NoViews)?;
    let size = (first.width, first.height);

    let detector = ChessboardDetector::new(setup.detector.clone());
    let mut sets = Vec::new();
    let mut used = Vec::new();
    let mut skipped = Vec::new();

    for (index, image) in images.iter().enumerate() {
        if (image.width, image.height) != size {
            return Err(PipelineError::MixedImageSizes {
                index,
                expected: size,
                got: (image.width, image.height),
            });
        }
        let corners = detector.detect(image, setup.nx, setup.ny);
        if corners.found {
            sets.push(corners);
            used.push(index);
        } else {
            warn!("image {index}: {}x{} chessboard not found, skipping", setup.nx, setup.ny);
            skipped.push(index);
        }
    }

    let required = setup.min_views.max(1);
    if sets.len() < required {
        return Err(CalibrationError::NotEnoughViews {
            found: sets.len(),
            required,
        }
        .into());
    }
    info!("board found in {} of {} images", sets.len(), images.len());

    let object = board_points(setup.nx, setup.ny, setup.square_size);
    let objects = vec![object; sets.len()];
    let report = calibrate(&sets, &objects, size, &setup.options)?;

    Ok(CalibrationRun {
        report,
        used,
        skipped,
    })
}
