//! Calibration result and its JSON persistence.

use crate::camera::{Distortion, Intrinsics, ViewPose};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(thiserror::Error, Debug)]
pub enum ModelIoError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Intrinsics and lens distortion of one camera, plus the board poses they were solved with.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibrationModel {
    pub intrinsics: Intrinsics,
    pub distortion: Distortion,
    /// `(width, height)` of the calibration images; `None` for hand-built models.
    #[serde(default)]
    pub image_size: Option<(usize, usize)>,
    /// Per-view board poses, in input order.
    #[serde(default)]
    pub views: Vec<ViewPose>,
}

impl CalibrationModel {
    pub fn new(intrinsics: Intrinsics, distortion: Distortion, image_size: (usize, usize)) -> Self {
        Self {
            intrinsics,
            distortion,
            image_size: Some(image_size),
            views: Vec::new(),
        }
    }

    /// Camera matrix, row-major.
    pub fn camera_matrix(&self) -> [[f64; 3]; 3] {
        let k = self.intrinsics.k_matrix();
        [
            [k[(0, 0)], k[(0, 1)], k[(0, 2)]],
            [k[(1, 0)], k[(1, 1)], k[(1, 2)]],
            [k[(2, 0)], k[(2, 1)], k[(2, 2)]],
        ]
    }

    pub fn to_json_string(&self) -> Result<String, ModelIoError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json_str(raw: &str) -> Result<Self, ModelIoError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Load a model written by [`CalibrationModel::save_json`].
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, ModelIoError> {
        let raw = fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Write this model to disk as pretty JSON.
    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<(), ModelIoError> {
        fs::write(path, self.to_json_string()?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> CalibrationModel {
        let mut m = CalibrationModel::new(
            Intrinsics::new(812.5, 809.25, 321.0, 238.75),
            Distortion::from_array([-0.21, 0.05, 0.001, -0.002, 0.0]),
            (640, 480),
        );
        m.views.push(ViewPose {
            rvec: [0.1, -0.2, 0.05],
            tvec: [-3.5, -2.5, 30.0],
        });
        m
    }

    #[test]
    fn file_round_trip_is_lossless() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("camera.json");
        let m = model();
        m.save_json(&path).unwrap();
        assert_eq!(CalibrationModel::load_json(&path).unwrap(), m);
    }

    #[test]
    fn minimal_json_is_accepted() {
        let raw = r#"{
            "intrinsics": { "fx": 500.0, "fy": 500.0, "cx": 320.0, "cy": 240.0 },
            "distortion": { "k1": 0.0, "k2": 0.0, "p1": 0.0, "p2": 0.0, "k3": 0.0 }
        }"#;
        let m = CalibrationModel::from_json_str(raw).unwrap();
        assert_eq!(m.image_size, None);
        assert_eq!(m.intrinsics.skew, 0.0);
        assert!(m.views.is_empty());
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = CalibrationModel::load_json(dir.path().join("nope.json")).unwrap_err();
        assert!(matches!(err, ModelIoError::Io(_)));
        assert!(matches!(
            CalibrationModel::from_json_str("{ not json").unwrap_err(),
            ModelIoError::Json(_)
        ));
    }
}
