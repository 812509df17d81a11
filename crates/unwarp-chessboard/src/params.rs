use chess_corners::ChessConfig;
use serde::{Deserialize, Serialize};

/// ChESS corner extraction, forwarded to `chess-corners`.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ChessParams {
    /// Keep pixels whose response exceeds `threshold_rel * max(R)`.
    pub threshold_rel: f32,
    /// Half-size of the non-maximum suppression window.
    pub nms_radius: u32,
    /// Minimum number of above-threshold pixels around a peak.
    pub min_cluster_size: u32,
    /// Corners closer than this (pixels) are merged into the stronger one.
    pub merge_radius: f32,
}

impl Default for ChessParams {
    fn default() -> Self {
        Self {
            threshold_rel: 0.2,
            nms_radius: 2,
            min_cluster_size: 2,
            merge_radius: 2.5,
        }
    }
}

impl ChessParams {
    /// Single-scale `chess-corners` configuration with these thresholds.
    pub fn to_chess_config(&self) -> ChessConfig {
        let mut cfg = ChessConfig::single_scale();
        cfg.params.threshold_rel = self.threshold_rel;
        cfg.params.nms_radius = self.nms_radius;
        cfg.params.min_cluster_size = self.min_cluster_size;
        cfg
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct GridGraphParams {
    pub k_neighbors: usize,
    /// Reject a neighbor farther than this multiple of the node's closest neighbor.
    pub max_spacing_ratio: f32,
    pub orientation_tolerance_deg: f32,
}

impl Default for GridGraphParams {
    fn default() -> Self {
        Self {
            k_neighbors: 8,
            max_spacing_ratio: 2.0,
            orientation_tolerance_deg: 22.5,
        }
    }
}

/// Gradient-orthogonality sub-pixel refinement.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RefineParams {
    pub enabled: bool,
    /// Upper bound on the window half-size; the actual size follows local spacing.
    pub max_half_window: usize,
    pub max_iters: usize,
    /// Stop once an update moves the corner less than this (pixels).
    pub epsilon: f32,
}

impl Default for RefineParams {
    fn default() -> Self {
        Self {
            enabled: true,
            max_half_window: 5,
            max_iters: 10,
            epsilon: 0.01,
        }
    }
}

/// Parameters of the chessboard detector.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ChessboardParams {
    pub chess: ChessParams,
    pub graph: GridGraphParams,
    pub refine: RefineParams,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let params: ChessboardParams =
            serde_json::from_str(r#"{ "chess": { "threshold_rel": 0.35 } }"#).unwrap();
        assert_eq!(params.chess.threshold_rel, 0.35);
        assert_eq!(params.chess.nms_radius, 2);
        assert_eq!(params.graph, GridGraphParams::default());
        assert!(params.refine.enabled);
    }
}
