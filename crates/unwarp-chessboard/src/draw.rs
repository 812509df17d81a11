use unwarp_core::{CornerSet, Image, ImageView};

const ROW_COLORS: [[u8; 3]; 6] = [
    [255, 0, 0],
    [255, 128, 0],
    [200, 200, 0],
    [0, 200, 0],
    [0, 128, 255],
    [160, 0, 255],
];

/// Draw a line in place with Bresenham's algorithm.
pub fn draw_line(img: &mut Image, p0: (i64, i64), p1: (i64, i64), color: [u8; 3]) {
    let (mut x0, mut y0) = p0;
    let (x1, y1) = p1;

    let dx = (x1 - x0).abs();
    let dy = (y1 - y0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx - dy;

    loop {
        img.put_pixel(x0, y0, color);
        if x0 == x1 && y0 == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 > -dy {
            err -= dy;
            x0 += sx;
        }
        if e2 < dx {
            err += dx;
            y0 += sy;
        }
    }
}

fn draw_cross(img: &mut Image, c: (i64, i64), r: i64, color: [u8; 3]) {
    draw_line(img, (c.0 - r, c.1 - r), (c.0 + r, c.1 + r), color);
    draw_line(img, (c.0 - r, c.1 + r), (c.0 + r, c.1 - r), color);
}

/// Annotated RGB copy of `image` showing a detection.
///
/// Corners are marked with crosses colored per row and joined in storage
/// order, so the polyline zig-zags row by row from the first corner. A
/// not-found set leaves the copy unannotated. The input is not modified.
pub fn draw_corners(image: &ImageView<'_>, corners: &CornerSet) -> Image {
    let mut out = image.to_rgb();
    if !corners.found || corners.nx == 0 {
        return out;
    }

    let to_px = |p: nalgebra::Point2<f32>| (p.x.round() as i64, p.y.round() as i64);
    let mut prev: Option<(i64, i64)> = None;
    for (idx, p) in corners.iter_grid() {
        let color = ROW_COLORS[idx.row % ROW_COLORS.len()];
        let q = to_px(p);
        if let Some(prev) = prev {
            draw_line(&mut out, prev, q, color);
        }
        draw_cross(&mut out, q, 3, color);
        prev = Some(q);
    }
    out
}
