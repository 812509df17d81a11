use crate::corners::Corner;
use std::collections::HashSet;

/// Integer 2D grid transform (a 2×2 matrix) relabeling detected grid coordinates.
///
/// `(i', j') = (a*i + b*j, c*i + d*j)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GridTransform {
    pub a: i32,
    pub b: i32,
    pub c: i32,
    pub d: i32,
}

impl GridTransform {
    #[inline]
    pub fn apply(&self, i: i32, j: i32) -> [i32; 2] {
        [self.a * i + self.b * j, self.c * i + self.d * j]
    }
}

/// The 8 dihedral transforms `D4` on the integer grid.
pub const GRID_TRANSFORMS_D4: [GridTransform; 8] = [
    // rotations: 0°, 90°, 180°, 270°
    GridTransform { a: 1, b: 0, c: 0, d: 1 },
    GridTransform { a: 0, b: 1, c: -1, d: 0 },
    GridTransform { a: -1, b: 0, c: 0, d: -1 },
    GridTransform { a: 0, b: -1, c: 1, d: 0 },
    // reflections
    GridTransform { a: -1, b: 0, c: 0, d: 1 },
    GridTransform { a: 1, b: 0, c: 0, d: -1 },
    GridTransform { a: 0, b: 1, c: 1, d: 0 },
    GridTransform { a: 0, b: -1, c: -1, d: 0 },
];

/// Order a labeled component as an `nx x ny` row-major board.
///
/// `nodes` holds `(corner index, i, j)`. The component must contain exactly
/// `nx * ny` distinct cells spanning an `nx x ny` box (in either axis
/// order). Among the dihedral relabelings that fit, the one whose `+col`
/// best follows image `+x` and `+row` image `+y` wins, so the first corner
/// is the top-left one in the image.
///
/// Returns corner indices in row-major order, or `None` if the component does
/// not fit the board.
pub fn label_board(
    nodes: &[(usize, i32, i32)],
    corners: &[Corner],
    nx: usize,
    ny: usize,
) -> Option<Vec<usize>> {
    if nx < 2 || ny < 2 || nx.checked_mul(ny) != Some(nodes.len()) {
        return None;
    }
    let distinct: HashSet<(i32, i32)> = nodes.iter().map(|&(_, i, j)| (i, j)).collect();
    if distinct.len() != nodes.len() {
        return None;
    }

    let mut best: Option<(f32, Vec<usize>)> = None;
    for t in GRID_TRANSFORMS_D4.iter() {
        let Some(grid) = arrange(nodes, t, nx, ny) else {
            continue;
        };
        let score = axis_score(&grid, corners, nx, ny);
        if best.as_ref().map_or(true, |(s, _)| score > *s) {
            best = Some((score, grid));
        }
    }
    best.map(|(_, grid)| grid)
}

fn arrange(nodes: &[(usize, i32, i32)], t: &GridTransform, nx: usize, ny: usize) -> Option<Vec<usize>> {
    let mapped: Vec<(usize, [i32; 2])> = nodes.iter().map(|&(idx, i, j)| (idx, t.apply(i, j))).collect();
    let min_c = mapped.iter().map(|(_, p)| p[0]).min()?;
    let max_c = mapped.iter().map(|(_, p)| p[0]).max()?;
    let min_r = mapped.iter().map(|(_, p)| p[1]).min()?;
    let max_r = mapped.iter().map(|(_, p)| p[1]).max()?;
    if (max_c - min_c + 1) as usize != nx || (max_r - min_r + 1) as usize != ny {
        return None;
    }

    let mut grid = vec![usize::MAX; nx * ny];
    for (idx, [c, r]) in mapped {
        let slot = (r - min_r) as usize * nx + (c - min_c) as usize;
        grid[slot] = idx;
    }
    if grid.contains(&usize::MAX) {
        return None;
    }
    Some(grid)
}

// Mean x-component of unit row steps plus mean y-component of unit column steps.
fn axis_score(grid: &[usize], corners: &[Corner], nx: usize, ny: usize) -> f32 {
    let p = |r: usize, c: usize| corners[grid[r * nx + c]].position;
    let (mut sx, mut nxs) = (0.0f32, 0usize);
    let (mut sy, mut nys) = (0.0f32, 0usize);
    for r in 0..ny {
        for c in 0..nx {
            if c + 1 < nx {
                let d = p(r, c + 1) - p(r, c);
                let n = d.norm();
                if n > 0.0 {
                    sx += d.x / n;
                    nxs += 1;
                }
            }
            if r + 1 < ny {
                let d = p(r + 1, c) - p(r, c);
                let n = d.norm();
                if n > 0.0 {
                    sy += d.y / n;
                    nys += 1;
                }
            }
        }
    }
    sx / nxs.max(1) as f32 + sy / nys.max(1) as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Point2;

    fn corner(x: f32, y: f32) -> Corner {
        Corner {
            position: Point2::new(x, y),
            orientation: 0.0,
            strength: 1.0,
        }
    }

    #[test]
    fn d4_has_eight_distinct_unimodular_elements() {
        let distinct: HashSet<[i32; 4]> = GRID_TRANSFORMS_D4.iter().map(|t| [t.a, t.b, t.c, t.d]).collect();
        assert_eq!(distinct.len(), 8);
        assert!(GRID_TRANSFORMS_D4.iter().all(|t| (t.a * t.d - t.b * t.c).abs() == 1));
    }

    #[test]
    fn relabels_a_flipped_transposed_component() {
        // 3 x 2 board; BFS labels came out transposed and mirrored.
        let mut corners = Vec::new();
        let mut nodes = Vec::new();
        for row in 0..2 {
            for col in 0..3 {
                corners.push(corner(col as f32 * 10.0, row as f32 * 10.0));
                let idx = corners.len() - 1;
                nodes.push((idx, -row, -(col as i32)));
            }
        }
        let grid = label_board(&nodes, &corners, 3, 2).expect("fits");
        assert_eq!(grid, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn rejects_wrong_size_or_holes() {
        let corners: Vec<Corner> = (0..6).map(|k| corner(k as f32, 0.0)).collect();
        let nodes: Vec<(usize, i32, i32)> = (0..6).map(|k| (k, k as i32 % 3, k as i32 / 3)).collect();
        assert!(label_board(&nodes, &corners, 3, 2).is_some());
        assert!(label_board(&nodes, &corners, 2, 3).is_some());
        assert!(label_board(&nodes, &corners, 4, 2).is_none());

        let mut holes = nodes.clone();
        holes[5] = (5, 3, 1);
        assert!(label_board(&holes, &corners, 3, 2).is_none());
    }
}
