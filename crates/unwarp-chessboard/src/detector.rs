use crate::corners::{find_corners, Corner};
use crate::grid_alignment::label_board;
use crate::gridgraph::{assign_grid_coordinates, connected_components, GridGraph};
use crate::params::ChessboardParams;
use crate::refine::{half_window_for_spacing, refine_corner};
use log::{debug, warn};
use nalgebra::Point2;
use unwarp_core::{CornerSet, ImageView};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Chessboard detector: ChESS candidates -> grid graph -> ordered, refined corners.
#[derive(Debug, Default)]
pub struct ChessboardDetector {
    pub params: ChessboardParams,
}

impl ChessboardDetector {
    pub fn new(params: ChessboardParams) -> Self {
        Self { params }
    }

    /// Unordered X-junction candidates of an image (diagnostics).
    pub fn candidates(&self, image: &ImageView<'_>) -> Vec<Corner> {
        if !image.is_valid() {
            return Vec::new();
        }
        find_corners(&image.to_gray().view(), &self.params.chess)
    }

    /// Locate the `nx x ny` inner corners of a chessboard.
    ///
    /// The result is either complete (`nx * ny` points, row-major, first
    /// point top-left in the image) or not found. A board of a different size,
    /// a partially visible board or an image without a board all yield
    /// `found == false`.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "info", skip(self, image), fields(w = image.width, h = image.height))
    )]
    pub fn detect(&self, image: &ImageView<'_>, nx: usize, ny: usize) -> CornerSet {
        if nx < 2 || ny < 2 {
            warn!("chessboard needs at least 2x2 inner corners, got {nx}x{ny}");
            return CornerSet::not_found(nx, ny);
        }
        let Some(n) = nx.checked_mul(ny) else {
            warn!("{nx}x{ny} board is too large");
            return CornerSet::not_found(nx, ny);
        };
        if !image.is_valid() {
            warn!(
                "malformed image view ({}x{}, {} channels, {} bytes)",
                image.width,
                image.height,
                image.channels,
                image.data.len()
            );
            return CornerSet::not_found(nx, ny);
        }

        let gray = image.to_gray();
        let gray = gray.view();
        let corners = find_corners(&gray, &self.params.chess);
        debug!("{} ChESS candidates", corners.len());
        if corners.len() < n {
            debug!("not enough candidates for a {nx}x{ny} board");
            return CornerSet::not_found(nx, ny);
        }

        let graph = GridGraph::new(&corners, &self.params.graph);
        let mut components = connected_components(&graph);
        components.sort_by_key(|c| std::cmp::Reverse(c.len()));

        for component in components.iter().filter(|c| c.len() == n) {
            let coords = assign_grid_coordinates(&graph, component);
            if coords.conflicts > 0 {
                debug!(
                    "component of {} corners rejected: {} labeling conflicts",
                    component.len(),
                    coords.conflicts
                );
                continue;
            }
            let Some(order) = label_board(&coords.nodes, &corners, nx, ny) else {
                debug!("component of {} corners does not span {nx}x{ny}", component.len());
                continue;
            };

            let points: Vec<Point2<f32>> = order.iter().map(|&i| corners[i].position).collect();
            let points = if self.params.refine.enabled {
                self.refine(&gray, &points, nx, ny)
            } else {
                points
            };
            if let Some(set) = CornerSet::from_points(nx, ny, points) {
                debug!("chessboard {nx}x{ny} found");
                return set;
            }
        }

        debug!(
            "no component matches {nx}x{ny} (largest has {} corners)",
            components.first().map_or(0, |c| c.len())
        );
        CornerSet::not_found(nx, ny)
    }

    fn refine(&self, gray: &ImageView<'_>, points: &[Point2<f32>], nx: usize, ny: usize) -> Vec<Point2<f32>> {
        let at = |r: usize, c: usize| points[r * nx + c];
        (0..ny)
            .flat_map(|r| (0..nx).map(move |c| (r, c)))
            .map(|(r, c)| {
                let p = at(r, c);
                let mut spacing = f32::INFINITY;
                let mut nearest = |q: Point2<f32>| spacing = spacing.min((q - p).norm());
                if c > 0 {
                    nearest(at(r, c - 1));
                }
                if c + 1 < nx {
                    nearest(at(r, c + 1));
                }
                if r > 0 {
                    nearest(at(r - 1, c));
                }
                if r + 1 < ny {
                    nearest(at(r + 1, c));
                }
                let hw = half_window_for_spacing(spacing, &self.params.refine);
                refine_corner(gray, p, hw, &self.params.refine)
            })
            .collect()
    }
}

/// [`ChessboardDetector::detect`] with default parameters.
pub fn detect_chessboard(image: &ImageView<'_>, nx: usize, ny: usize) -> CornerSet {
    ChessboardDetector::default().detect(image, nx, ny)
}
