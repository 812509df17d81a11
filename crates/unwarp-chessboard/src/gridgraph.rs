use crate::corners::Corner;
use crate::geom::{axis_diff, is_orthogonal};
use crate::params::GridGraphParams;
use kiddo::{KdTree, SquaredEuclidean};
use nalgebra::Vector2;
use std::collections::{HashMap, VecDeque};
use std::f32::consts::{FRAC_PI_2, FRAC_PI_4, PI};

#[derive(Clone, Debug)]
pub struct NodeNeighbor {
    /// Quadrant around the node's own grid axes, `0..4`.
    pub slot: usize,
    pub index: usize,
    pub distance: f32,
    /// Unit vector from the node to the neighbor.
    pub direction: Vector2<f32>,
}

/// Check the X-junction relations between two candidate neighbors.
///
/// Adjacent inner corners have orthogonal bright diagonals, and the edge
/// joining them runs at ~45° to both diagonals. Diagonal neighbors share
/// the same diagonal and fail the first test.
fn is_good_neighbor(
    corner: &Corner,
    neighbor: &Corner,
    neighbor_index: usize,
    tolerance: f32,
) -> Option<NodeNeighbor> {
    if !is_orthogonal(corner.orientation, neighbor.orientation, tolerance) {
        return None;
    }

    let vec_to_neighbor = neighbor.position - corner.position;
    let distance = vec_to_neighbor.norm();
    if distance < 1e-3 {
        return None;
    }

    let edge_angle = vec_to_neighbor.y.atan2(vec_to_neighbor.x);
    let score_corner = (axis_diff(corner.orientation, edge_angle) - FRAC_PI_4).abs();
    let score_neighbor = (axis_diff(neighbor.orientation, edge_angle) - FRAC_PI_4).abs();
    if score_corner > tolerance || score_neighbor > tolerance {
        return None;
    }

    // The node's grid axes sit at orientation ± 45°; number the four half-axes.
    let rel = (edge_angle - corner.orientation - FRAC_PI_4).rem_euclid(2.0 * PI);
    let slot = (rel / FRAC_PI_2).round() as usize % 4;

    Some(NodeNeighbor {
        slot,
        index: neighbor_index,
        distance,
        direction: vec_to_neighbor / distance,
    })
}

/// Keep the closest candidate per slot, then drop outliers in distance.
fn select_neighbors(candidates: Vec<NodeNeighbor>, max_spacing_ratio: f32) -> Vec<NodeNeighbor> {
    let mut best: [Option<NodeNeighbor>; 4] = [None, None, None, None];

    for candidate in candidates.into_iter() {
        let slot = &mut best[candidate.slot];
        let replace = match slot {
            None => true,
            Some(current) => candidate.distance < current.distance,
        };
        if replace {
            *slot = Some(candidate);
        }
    }

    let kept: Vec<NodeNeighbor> = best.into_iter().flatten().collect();
    let closest = kept
        .iter()
        .map(|n| n.distance)
        .fold(f32::INFINITY, f32::min);
    kept.into_iter()
        .filter(|n| n.distance <= max_spacing_ratio * closest)
        .collect()
}

/// Undirected 4-connected graph over detected corners.
pub struct GridGraph {
    pub neighbors: Vec<Vec<NodeNeighbor>>, // For each node, list of neighbors
}

impl GridGraph {
    pub fn new(corners: &[Corner], params: &GridGraphParams) -> Self {
        if corners.len() < 2 {
            return Self {
                neighbors: vec![Vec::new(); corners.len()],
            };
        }

        let coords = corners
            .iter()
            .map(|c| [c.position.x, c.position.y])
            .collect::<Vec<_>>();
        let tree: KdTree<f32, 2> = (&coords).into();
        let tolerance = params.orientation_tolerance_deg.to_radians();
        let mut neighbors = Vec::with_capacity(corners.len());

        for (i, corner) in corners.iter().enumerate() {
            let mut node_neighbors = Vec::new();

            let query_point = [corner.position.x, corner.position.y];
            let results = tree.nearest_n::<SquaredEuclidean>(&query_point, params.k_neighbors + 1);

            for nn in results.into_iter() {
                let neighbor_index = nn.item as usize;
                if neighbor_index == i {
                    continue; // Skip self
                }
                if let Some(entry) =
                    is_good_neighbor(corner, &corners[neighbor_index], neighbor_index, tolerance)
                {
                    node_neighbors.push(entry);
                }
            }

            neighbors.push(select_neighbors(node_neighbors, params.max_spacing_ratio));
        }

        // Keep only mutual edges.
        let snapshot: Vec<Vec<usize>> = neighbors
            .iter()
            .map(|ns| ns.iter().map(|n| n.index).collect())
            .collect();
        for (i, ns) in neighbors.iter_mut().enumerate() {
            ns.retain(|n| snapshot[n.index].contains(&i));
        }

        Self { neighbors }
    }
}

pub fn connected_components(graph: &GridGraph) -> Vec<Vec<usize>> {
    let mut visited = vec![false; graph.neighbors.len()];
    let mut components = Vec::new();

    for start in 0..graph.neighbors.len() {
        if visited[start] {
            continue;
        }

        let mut component = Vec::new();
        let mut stack = vec![start];

        while let Some(node) = stack.pop() {
            if visited[node] {
                continue;
            }
            visited[node] = true;
            component.push(node);

            for neighbor in &graph.neighbors[node] {
                if !visited[neighbor.index] {
                    stack.push(neighbor.index);
                }
            }
        }

        components.push(component);
    }

    components
}

/// Integer coordinates of one component.
#[derive(Debug, Default)]
pub struct GridCoords {
    /// `(corner index, i, j)`; `i` steps along the seed's first axis.
    pub nodes: Vec<(usize, i32, i32)>,
    /// Edges or cells that disagreed with an earlier assignment.
    pub conflicts: usize,
}

/// BFS over a component, carrying a local image-space basis along the tree.
///
/// Each step is classified against the parent's `(u, v)` axes and the
/// matched axis is replaced by the observed edge direction, so the labeling
/// follows gradual perspective and lens bending.
pub fn assign_grid_coordinates(graph: &GridGraph, component: &[usize]) -> GridCoords {
    let mut out = GridCoords::default();
    // Seed at the best-connected node; lowest index on ties.
    let Some(&start) = component
        .iter()
        .max_by_key(|&&n| (graph.neighbors[n].len(), std::cmp::Reverse(n)))
    else {
        return out;
    };

    let u0 = graph.neighbors[start]
        .first()
        .map(|n| n.direction)
        .unwrap_or_else(|| Vector2::new(1.0, 0.0));
    let v0 = Vector2::new(-u0.y, u0.x);

    let mut coords: HashMap<usize, (i32, i32)> = HashMap::new();
    let mut queue = VecDeque::new();
    coords.insert(start, (0, 0));
    queue.push_back((start, 0i32, 0i32, u0, v0));

    while let Some((node, i, j, u, v)) = queue.pop_front() {
        for neighbor in &graph.neighbors[node] {
            let e = neighbor.direction;
            let du = e.dot(&u);
            let dv = e.dot(&v);
            let (target, u2, v2) = if du.abs() >= dv.abs() {
                let s = du.signum();
                ((i + s as i32, j), e * s, v)
            } else {
                let s = dv.signum();
                ((i, j + s as i32), u, e * s)
            };

            match coords.get(&neighbor.index) {
                Some(&existing) => {
                    if existing != target {
                        out.conflicts += 1;
                    }
                }
                None => {
                    coords.insert(neighbor.index, target);
                    queue.push_back((neighbor.index, target.0, target.1, u2, v2));
                }
            }
        }
    }

    let mut cells: HashMap<(i32, i32), usize> = HashMap::new();
    let mut nodes: Vec<(usize, i32, i32)> =
        coords.into_iter().map(|(idx, (i, j))| (idx, i, j)).collect();
    nodes.sort_unstable();
    for &(idx, i, j) in &nodes {
        if cells.insert((i, j), idx).is_some() {
            out.conflicts += 1;
        }
    }
    out.nodes = nodes;
    out
}
