use nalgebra::Point2;
use serde::{Deserialize, Serialize};

/// Address of an inner chessboard corner: `row` in `0..ny`, `col` in `0..nx`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GridIndex {
    pub row: usize,
    pub col: usize,
}

impl GridIndex {
    pub const fn new(row: usize, col: usize) -> Self {
        Self { row, col }
    }
}

/// Ordered inner corners of one chessboard view.
///
/// Invariants:
/// - `found == false` implies `points` is empty;
/// - `found == true` implies `points.len() == nx * ny`;
/// - `points` is row-major: index `i` is the corner at `col = i % nx`, `row = i / nx`.
///
/// A not-found set must not be fed into calibration or rectification.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CornerSet {
    pub found: bool,
    pub nx: usize,
    pub ny: usize,
    pub points: Vec<Point2<f32>>,
}

impl CornerSet {
    /// Detection outcome for a board that could not be located.
    pub fn not_found(nx: usize, ny: usize) -> Self {
        Self {
            found: false,
            nx,
            ny,
            points: Vec::new(),
        }
    }

    /// Wrap an ordered point list; `None` unless it holds exactly `nx * ny` points.
    pub fn from_points(nx: usize, ny: usize, points: Vec<Point2<f32>>) -> Option<Self> {
        if nx == 0 || ny == 0 || points.len() != nx.checked_mul(ny)? {
            return None;
        }
        Some(Self {
            found: true,
            nx,
            ny,
            points,
        })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Flat index of a grid cell, `None` if the cell is outside the grid or the set is empty.
    #[inline]
    pub fn index_of(&self, idx: GridIndex) -> Option<usize> {
        if !self.found || idx.row >= self.ny || idx.col >= self.nx {
            return None;
        }
        Some(idx.row * self.nx + idx.col)
    }

    /// Inverse of [`CornerSet::index_of`].
    #[inline]
    pub fn grid_index(&self, flat: usize) -> Option<GridIndex> {
        if !self.found || flat >= self.points.len() {
            return None;
        }
        Some(GridIndex::new(flat / self.nx, flat % self.nx))
    }

    #[inline]
    pub fn at(&self, idx: GridIndex) -> Option<Point2<f32>> {
        self.points.get(self.index_of(idx)?).copied()
    }

    /// Look up four corners by grid address, in the given order.
    pub fn quad(&self, cells: [GridIndex; 4]) -> Option<[Point2<f32>; 4]> {
        Some([
            self.at(cells[0])?,
            self.at(cells[1])?,
            self.at(cells[2])?,
            self.at(cells[3])?,
        ])
    }

    /// Grid addresses of the outermost inner corners:
    /// top-left, top-right, bottom-left, bottom-right.
    pub fn outer_indices(&self) -> [GridIndex; 4] {
        let last_col = self.nx.saturating_sub(1);
        let last_row = self.ny.saturating_sub(1);
        [
            GridIndex::new(0, 0),
            GridIndex::new(0, last_col),
            GridIndex::new(last_row, 0),
            GridIndex::new(last_row, last_col),
        ]
    }

    /// Pixel positions of [`CornerSet::outer_indices`].
    pub fn outer_quad(&self) -> Option<[Point2<f32>; 4]> {
        self.quad(self.outer_indices())
    }

    /// Iterate `(GridIndex, point)` pairs in storage order.
    pub fn iter_grid(&self) -> impl Iterator<Item = (GridIndex, Point2<f32>)> + '_ {
        let nx = self.nx.max(1);
        self.points
            .iter()
            .enumerate()
            .map(move |(i, &p)| (GridIndex::new(i / nx, i % nx), p))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(nx: usize, ny: usize) -> CornerSet {
        let pts = (0..ny)
            .flat_map(|r| (0..nx).map(move |c| Point2::new(c as f32 * 10.0, r as f32 * 10.0)))
            .collect();
        CornerSet::from_points(nx, ny, pts).expect("complete grid")
    }

    #[test]
    fn row_major_addressing() {
        let set = grid(8, 6);
        assert_eq!(set.index_of(GridIndex::new(0, 7)), Some(7));
        assert_eq!(set.index_of(GridIndex::new(5, 0)), Some(40));
        assert_eq!(set.index_of(GridIndex::new(5, 7)), Some(47));
        assert_eq!(set.index_of(GridIndex::new(6, 0)), None);
        assert_eq!(set.grid_index(41), Some(GridIndex::new(5, 1)));
        assert_eq!(set.at(GridIndex::new(2, 3)), Some(Point2::new(30.0, 20.0)));
    }

    #[test]
    fn outer_quad_matches_flat_corners() {
        let set = grid(8, 6);
        let quad = set.outer_quad().expect("found");
        assert_eq!(quad[0], set.points[0]);
        assert_eq!(quad[1], set.points[7]);
        assert_eq!(quad[2], set.points[40]);
        assert_eq!(quad[3], set.points[47]);
    }

    #[test]
    fn incomplete_or_missing_sets_are_rejected() {
        assert!(CornerSet::from_points(3, 3, vec![Point2::origin(); 8]).is_none());
        let missing = CornerSet::not_found(8, 6);
        assert!(missing.is_empty());
        assert!(missing.outer_quad().is_none());
    }
}
