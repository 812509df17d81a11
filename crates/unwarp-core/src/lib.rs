//! Core types and utilities shared by the `unwarp-*` crates.
//!
//! This crate is intentionally small and purely geometric. It does *not*
//! know how corners are detected or how a camera is calibrated; it provides
//! the image buffers, the ordered [`CornerSet`], and the projective tools
//! ([`Homography`], [`PerspectiveTransform`], [`warp_perspective`]) the other
//! crates build on.

mod corner_set;
mod homography;
mod image;
mod logger;
pub mod synthetic;

pub use corner_set::{CornerSet, GridIndex};
pub use homography::{
    estimate_homography, homography_from_4pt, warp_perspective, GeometryError, Homography,
    PerspectiveTransform, PointRole,
};
pub use image::{sample_bilinear, sample_bilinear_u8, BorderMode, Image, ImageError, ImageView};

#[cfg(feature = "tracing")]
pub use logger::init_tracing;

pub use logger::{init_with_level, parse_level, resolve_level, LOG_ENV_VAR};
