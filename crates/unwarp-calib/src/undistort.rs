//! Lens-distortion removal for images and point sets.
//!
//! For each output pixel the ideal ray is taken through the output camera
//! matrix, pushed through the distortion model, and sampled bilinearly from
//! the distorted source image. The per-pixel source coordinates are cached in
//! an [`UndistortMap`] so a sequence of frames from one camera pays for the
//! model evaluation once.

use crate::camera::Intrinsics;
use crate::model::CalibrationModel;
use log::debug;
use nalgebra::{Point2, Vector2};
use serde::{Deserialize, Serialize};
use unwarp_core::{sample_bilinear_u8, BorderMode, Image, ImageView};

#[cfg(feature = "tracing")]
use tracing::instrument;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UndistortOptions {
    /// Value for output pixels whose source falls outside the input.
    pub border: BorderMode,
    /// Camera matrix of the output image; defaults to the model's own.
    pub new_intrinsics: Option<Intrinsics>,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum UndistortError {
    #[error("image is {got:?}, expected {expected:?}")]
    DimensionMismatch {
        expected: (usize, usize),
        got: (usize, usize),
    },
    #[error("camera model has invalid intrinsics or distortion")]
    InvalidModel,
}

fn check_model(model: &CalibrationModel, options: &UndistortOptions) -> Result<Intrinsics, UndistortError> {
    let out = options.new_intrinsics.unwrap_or(model.intrinsics);
    let finite = model.distortion.to_array().iter().all(|c| c.is_finite());
    if !finite || !model.intrinsics.is_valid() || !out.is_valid() {
        return Err(UndistortError::InvalidModel);
    }
    Ok(out)
}

/// Precomputed source coordinates for every output pixel.
#[derive(Clone, Debug)]
pub struct UndistortMap {
    width: usize,
    height: usize,
    border: BorderMode,
    map: Vec<[f32; 2]>,
}

impl UndistortMap {
    pub fn new(
        model: &CalibrationModel,
        width: usize,
        height: usize,
        options: &UndistortOptions,
    ) -> Result<Self, UndistortError> {
        let out = check_model(model, options)?;
        let mut map = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                let n = out.normalize(Point2::new(x as f64, y as f64));
                let src = model.intrinsics.denormalize(model.distortion.distort(n));
                map.push([src.x as f32, src.y as f32]);
            }
        }
        Ok(Self {
            width,
            height,
            border: options.border,
            map,
        })
    }

    pub fn size(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    /// Source position sampled for output pixel `(x, y)`.
    pub fn source(&self, x: usize, y: usize) -> Option<Point2<f32>> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let [sx, sy] = self.map[y * self.width + x];
        Some(Point2::new(sx, sy))
    }

    /// Remap `src`, which must have the size the map was built for.
    pub fn apply(&self, src: &ImageView<'_>) -> Result<Image, UndistortError> {
        if (src.width, src.height) != (self.width, self.height) {
            return Err(UndistortError::DimensionMismatch {
                expected: (self.width, self.height),
                got: (src.width, src.height),
            });
        }
        let ch = src.channels;
        let mut data = Vec::with_capacity(self.map.len() * ch);
        for &[sx, sy] in &self.map {
            for c in 0..ch {
                data.push(sample_bilinear_u8(src, sx, sy, c, self.border));
            }
        }
        Ok(Image {
            width: self.width,
            height: self.height,
            channels: ch,
            data,
        })
    }
}

/// Remove lens distortion from `src`.
///
/// The output has the input's size and channel count. When the model records
/// the calibration image size, `src` must match it.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "debug", skip(src, model, options), fields(width = src.width, height = src.height))
)]
pub fn undistort(
    src: &ImageView<'_>,
    model: &CalibrationModel,
    options: &UndistortOptions,
) -> Result<Image, UndistortError> {
    if let Some(expected) = model.image_size {
        if expected != (src.width, src.height) {
            return Err(UndistortError::DimensionMismatch {
                expected,
                got: (src.width, src.height),
            });
        }
    }
    if model.distortion.is_zero() && options.new_intrinsics.is_none() {
        check_model(model, options)?;
        debug!("zero distortion, undistort is a copy");
        return Ok(src.to_owned());
    }
    UndistortMap::new(model, src.width, src.height, options)?.apply(src)
}

/// Map distorted pixel positions to where an ideal pinhole camera sees them.
///
/// `new_intrinsics` selects the output camera matrix (default: the model's).
pub fn undistort_points(
    points: &[Point2<f32>],
    model: &CalibrationModel,
    new_intrinsics: Option<&Intrinsics>,
) -> Vec<Point2<f32>> {
    let out = new_intrinsics.unwrap_or(&model.intrinsics);
    points
        .iter()
        .map(|p| {
            let nd: Vector2<f64> = model
                .intrinsics
                .normalize(Point2::new(p.x as f64, p.y as f64));
            let n = model.distortion.undistort_normalized(nd);
            let q = out.denormalize(n);
            Point2::new(q.x as f32, q.y as f32)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::Distortion;
    use approx::assert_relative_eq;

    fn model(distortion: Distortion) -> CalibrationModel {
        CalibrationModel::new(Intrinsics::new(300.0, 300.0, 79.5, 59.5), distortion, (160, 120))
    }

    fn gradient() -> Image {
        Image::from_fn(160, 120, 3, |x, y| [x as u8, y as u8, (x + y) as u8])
    }

    #[test]
    fn zero_distortion_is_identity() {
        let img = gradient();
        let out = undistort(&img.view(), &model(Distortion::default()), &UndistortOptions::default()).unwrap();
        assert_eq!(out, img);
    }

    #[test]
    fn zero_distortion_map_is_identity() {
        let img = gradient();
        let map = UndistortMap::new(&model(Distortion::default()), 160, 120, &UndistortOptions::default()).unwrap();
        assert_eq!(map.apply(&img.view()).unwrap(), img);
    }

    #[test]
    fn size_mismatch_is_rejected() {
        let img = Image::filled(100, 100, 1, 0);
        let err = undistort(&img.view(), &model(Distortion::default()), &UndistortOptions::default()).unwrap_err();
        assert_eq!(
            err,
            UndistortError::DimensionMismatch {
                expected: (160, 120),
                got: (100, 100)
            }
        );
    }

    #[test]
    fn invalid_model_is_rejected() {
        let mut m = model(Distortion::default());
        m.intrinsics.fx = 0.0;
        let img = gradient();
        assert_eq!(
            undistort(&img.view(), &m, &UndistortOptions::default()),
            Err(UndistortError::InvalidModel)
        );
    }

    #[test]
    fn barrel_distortion_pulls_corners_outward() {
        let m = model(Distortion {
            k1: -0.3,
            ..Distortion::default()
        });
        let map = UndistortMap::new(&m, 160, 120, &UndistortOptions::default()).unwrap();
        // The principal point is a fixed point.
        let c = map.source(80, 60).unwrap();
        assert!((c.x - 80.0).abs() < 0.01 && (c.y - 60.0).abs() < 0.01);
        // Off-centre output pixels read from closer to the centre.
        let s = map.source(0, 0).unwrap();
        assert!(s.x > 0.0 && s.y > 0.0);
        assert!(map.source(160, 0).is_none());
    }

    #[test]
    fn points_round_trip_through_the_model() {
        let m = model(Distortion {
            k1: -0.25,
            k2: 0.05,
            p1: 0.001,
            p2: -0.001,
            k3: 0.0,
        });
        let ideal = Point2::new(20.0_f64, 100.0);
        let n = m.intrinsics.normalize(ideal);
        let distorted = m.intrinsics.denormalize(m.distortion.distort(n));
        let back = undistort_points(&[Point2::new(distorted.x as f32, distorted.y as f32)], &m, None);
        assert_relative_eq!(back[0].x, ideal.x as f32, epsilon = 1e-3);
        assert_relative_eq!(back[0].y, ideal.y as f32, epsilon = 1e-3);
    }
}
