//! Chessboard inner-corner detector built on top of `unwarp-core`.
//!
//! ## Quickstart
//!
//! ```
//! use unwarp_chessboard::{ChessboardDetector, ChessboardParams};
//! use unwarp_core::Image;
//!
//! let detector = ChessboardDetector::new(ChessboardParams::default());
//! let blank = Image::filled(64, 48, 1, 128);
//! let corners = detector.detect(&blank.view(), 8, 6);
//! assert!(!corners.found);
//! ```
//!
//! Algorithm:
//! 1. `chess-corners` finds X-junction candidates on the grayscale image,
//!    each with its bright-diagonal orientation; near-duplicates are merged.
//! 2. Each candidate links to at most one neighbor per local grid half-axis
//!    (k-nearest neighbors, orientation and distance gates, mutual edges).
//! 3. BFS over each connected component assigns integer grid coordinates,
//!    following the local axes as they bend under perspective and distortion.
//! 4. A component is accepted only if it fills an `nx x ny` box exactly; it is
//!    then relabeled so that the first corner is top-left in the image.
//! 5. Gradient-orthogonality refinement moves every corner to sub-pixel accuracy.

mod corners;
mod detector;
mod draw;
mod geom;
mod grid_alignment;
mod gridgraph;
mod params;
mod refine;

pub use corners::{find_corners, Corner};
pub use detector::{detect_chessboard, ChessboardDetector};
pub use draw::{draw_corners, draw_line};
pub use params::{ChessParams, ChessboardParams, GridGraphParams, RefineParams};
