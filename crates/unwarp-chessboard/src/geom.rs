use std::f32::consts::{FRAC_PI_2, PI};

/// Angle between two undirected axes (each defined modulo π), in `[0, π/2]`.
pub fn axis_diff(a: f32, b: f32) -> f32 {
    let d = (b - a).rem_euclid(PI);
    d.min(PI - d)
}

/// Whether two axes are orthogonal within `tolerance` (radians).
pub fn is_orthogonal(reference_axis: f32, other_axis: f32, tolerance: f32) -> bool {
    (FRAC_PI_2 - axis_diff(reference_axis, other_axis)).abs() <= tolerance.abs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::FRAC_PI_4;

    #[test]
    fn aligned_and_orthogonal_cases() {
        let tol = 1e-3;
        assert!(is_orthogonal(0.0, FRAC_PI_2, tol));
        assert!(is_orthogonal(FRAC_PI_4, -FRAC_PI_4, tol));
        // Axes are undirected: 80° and -80° are 20° apart.
        assert!(!is_orthogonal(80f32.to_radians(), (-80f32).to_radians(), 0.1));
        assert!(!is_orthogonal(0.0, 0.25, 0.05));
    }

    #[test]
    fn axis_diff_wraps() {
        assert!((axis_diff(0.0, PI - 0.1) - 0.1).abs() < 1e-5);
        assert!((axis_diff(0.1, 2.0 * PI - 0.1) - 0.2).abs() < 1e-5);
    }
}
