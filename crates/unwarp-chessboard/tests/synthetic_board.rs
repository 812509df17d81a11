use nalgebra::{Matrix3, Point2};
use unwarp_chessboard::{detect_chessboard, draw_corners, ChessboardDetector, ChessboardParams};
use unwarp_core::synthetic::{render_checkerboard_homography, CheckerboardSpec};
use unwarp_core::{Homography, Image, ImageView};

const NX: usize = 8;
const NY: usize = 6;

fn board_to_image() -> Homography {
    Homography::new(Matrix3::new(
        40.0, 4.0, 150.0, //
        -3.0, 38.0, 120.0, //
        0.00005, 0.0001, 1.0,
    ))
}

fn render(h: &Homography) -> Image {
    let board = CheckerboardSpec::new(NX, NY, 1.0);
    render_checkerboard_homography(640, 480, &board, h, 4)
}

fn expected_corners(h: &Homography) -> Vec<Point2<f64>> {
    (0..NY)
        .flat_map(|r| (0..NX).map(move |c| Point2::new(c as f64, r as f64)))
        .map(|p| h.apply_f64(p))
        .collect()
}

fn max_error(found: &[Point2<f32>], expected: &[Point2<f64>]) -> f64 {
    found
        .iter()
        .zip(expected)
        .map(|(a, b)| ((a.x as f64 - b.x).powi(2) + (a.y as f64 - b.y).powi(2)).sqrt())
        .fold(0.0, f64::max)
}

#[test]
fn detects_ordered_corners_within_half_a_pixel() {
    let _ = env_logger::builder().is_test(true).try_init();
    let h = board_to_image();
    let img = render(&h);

    let corners = detect_chessboard(&img.view(), NX, NY);
    assert!(corners.found);
    assert_eq!(corners.points.len(), NX * NY);

    let err = max_error(&corners.points, &expected_corners(&h));
    assert!(err < 0.5, "max corner error {err:.3} px");
}

#[test]
fn rgb_input_gives_same_result() {
    let h = board_to_image();
    let gray = render(&h);
    let rgb = gray.to_rgb();

    let a = detect_chessboard(&gray.view(), NX, NY);
    let b = detect_chessboard(&rgb.view(), NX, NY);
    assert_eq!(a, b);
}

#[test]
fn upside_down_board_is_still_labeled_from_the_image_top_left() {
    let h = board_to_image();
    let flip = Homography::new(Matrix3::new(
        -1.0, 0.0, (NX - 1) as f64, //
        0.0, -1.0, (NY - 1) as f64, //
        0.0, 0.0, 1.0,
    ));
    let img = render(&h.compose(&flip));

    let corners = detect_chessboard(&img.view(), NX, NY);
    assert!(corners.found);
    let err = max_error(&corners.points, &expected_corners(&h));
    assert!(err < 0.5, "max corner error {err:.3} px");
}

#[test]
fn blank_image_is_not_found() {
    let blank = Image::filled(640, 480, 1, 255);
    let corners = detect_chessboard(&blank.view(), NX, NY);
    assert!(!corners.found);
    assert!(corners.points.is_empty());
}

#[test]
fn wrong_pattern_size_is_not_found() {
    let img = render(&board_to_image());
    let detector = ChessboardDetector::new(ChessboardParams::default());
    for (nx, ny) in [(7, 6), (9, 6), (8, 5), (5, 8)] {
        let corners = detector.detect(&img.view(), nx, ny);
        assert!(!corners.found, "{nx}x{ny} unexpectedly found");
        assert!(corners.points.is_empty());
    }
    // Degenerate sizes are rejected without panicking.
    assert!(!detector.detect(&img.view(), 1, 6).found);
    assert!(!detector.detect(&img.view(), 0, 0).found);
}

#[test]
fn oversized_pattern_request_is_not_found() {
    let img = render(&board_to_image());
    let huge = 1usize << (usize::BITS / 2 + 1);
    let corners = detect_chessboard(&img.view(), huge, huge);
    assert!(!corners.found);
    assert_eq!((corners.nx, corners.ny), (huge, huge));
    assert!(corners.points.is_empty());
}

#[test]
fn malformed_view_is_not_found() {
    let img = render(&board_to_image());
    let view = ImageView {
        channels: 2,
        ..img.view()
    };
    assert!(!detect_chessboard(&view, NX, NY).found);
    assert!(ChessboardDetector::default().candidates(&view).is_empty());
}

#[test]
fn transposed_pattern_size_finds_the_same_board() {
    let img = render(&board_to_image());
    // The same board turned by 90 degrees.
    let corners = detect_chessboard(&img.view(), NY, NX);
    assert!(corners.found);
    assert_eq!((corners.nx, corners.ny), (NY, NX));
    assert_eq!(corners.points.len(), NX * NY);
}

#[test]
fn overlay_marks_detected_corners() {
    let img = render(&board_to_image());
    let corners = detect_chessboard(&img.view(), NX, NY);
    let overlay = draw_corners(&img.view(), &corners);
    assert_eq!(overlay.size(), img.size());
    assert_eq!(overlay.channels, 3);
    assert_ne!(overlay.data, img.to_rgb().data);
}
