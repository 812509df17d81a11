use crate::params::ChessParams;
use chess_corners::{find_chess_corners_image, CornerDescriptor};
use image::GrayImage;
use nalgebra::Point2;
use unwarp_core::ImageView;

/// X-junction candidate reported by the ChESS detector.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Corner {
    /// Sub-pixel position, pixel centers at integer coordinates.
    pub position: Point2<f32>,
    /// Bright-diagonal direction in radians, modulo π.
    pub orientation: f32,
    /// ChESS response at the corner.
    pub strength: f32,
}

/// Copy a single-channel view into the buffer type `chess-corners` consumes.
fn gray_image(gray: &ImageView<'_>) -> Option<GrayImage> {
    let width = u32::try_from(gray.width).ok()?;
    let height = u32::try_from(gray.height).ok()?;
    GrayImage::from_raw(width, height, gray.data.to_vec())
}

fn adapt_chess_corner(c: &CornerDescriptor) -> Corner {
    Corner {
        position: Point2::new(c.x, c.y),
        orientation: c.orientation,
        strength: c.response,
    }
}

/// ChESS corners of a grayscale view, strongest first.
pub fn find_corners(gray: &ImageView<'_>, params: &ChessParams) -> Vec<Corner> {
    if gray.channels != 1 {
        return Vec::new();
    }
    let Some(img) = gray_image(gray) else {
        return Vec::new();
    };
    let mut corners: Vec<Corner> = find_chess_corners_image(&img, &params.to_chess_config())
        .iter()
        .map(adapt_chess_corner)
        .collect();
    merge_close(&mut corners, params.merge_radius);
    corners
}

fn merge_close(corners: &mut Vec<Corner>, radius: f32) {
    corners.sort_by(|a, b| b.strength.total_cmp(&a.strength));
    let r2 = radius * radius;
    let mut kept: Vec<Corner> = Vec::with_capacity(corners.len());
    for c in corners.drain(..) {
        if kept
            .iter()
            .all(|k| (k.position - c.position).norm_squared() > r2)
        {
            kept.push(c);
        }
    }
    *corners = kept;
}

#[cfg(test)]
mod tests {
    use super::*;
    use unwarp_core::Image;

    #[test]
    fn single_x_junction_gives_one_corner() {
        // Junction between pixels 19 and 20 in both axes.
        let img = Image::from_fn(40, 40, 1, |x, y| {
            let v = if (x < 20) == (y < 20) { 10 } else { 240 };
            [v, v, v]
        });
        let corners = find_corners(&img.view(), &ChessParams::default());
        assert_eq!(corners.len(), 1, "{corners:?}");
        let p = corners[0].position;
        assert!((p.x - 19.5).abs() < 1.0 && (p.y - 19.5).abs() < 1.0, "{p:?}");
    }

    #[test]
    fn flat_and_rgb_inputs_give_nothing() {
        let flat = Image::filled(40, 40, 1, 128);
        assert!(find_corners(&flat.view(), &ChessParams::default()).is_empty());
        let rgb = Image::filled(40, 40, 3, 128);
        assert!(find_corners(&rgb.view(), &ChessParams::default()).is_empty());
    }

    #[test]
    fn merge_keeps_strongest() {
        let mk = |x: f32, s: f32| Corner {
            position: Point2::new(x, 0.0),
            orientation: 0.0,
            strength: s,
        };
        let mut corners = vec![mk(0.0, 1.0), mk(1.0, 3.0), mk(10.0, 2.0)];
        merge_close(&mut corners, 2.5);
        assert_eq!(corners.len(), 2);
        assert_eq!(corners[0].position.x, 1.0);
        assert_eq!(corners[1].position.x, 10.0);
    }
}
