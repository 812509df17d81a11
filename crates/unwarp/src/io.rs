//! Conversions between `image` crate buffers and [`crate::core::Image`].

use crate::core::{Image, ImageView};
use ::image::{DynamicImage, GrayImage, ImageReader, RgbImage};
use std::path::Path;

#[derive(thiserror::Error, Debug)]
pub enum ImageIoError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Codec(#[from] ::image::ImageError),
    #[error("image buffer does not match {width}x{height}x{channels}")]
    InvalidBuffer {
        width: usize,
        height: usize,
        channels: usize,
    },
}

/// Borrow an RGB8 buffer.
pub fn from_rgb(img: &RgbImage) -> ImageView<'_> {
    ImageView {
        width: img.width() as usize,
        height: img.height() as usize,
        channels: 3,
        data: img.as_raw(),
    }
}

/// Borrow a gray buffer.
pub fn from_luma(img: &GrayImage) -> ImageView<'_> {
    ImageView {
        width: img.width() as usize,
        height: img.height() as usize,
        channels: 1,
        data: img.as_raw(),
    }
}

/// Copy a decoded image; gray stays single-channel, everything else becomes RGB8.
pub fn from_dynamic(img: &DynamicImage) -> Image {
    match img {
        DynamicImage::ImageLuma8(gray) => from_luma(gray).to_owned(),
        other => from_rgb(&other.to_rgb8()).to_owned(),
    }
}

fn invalid(img: &Image) -> ImageIoError {
    ImageIoError::InvalidBuffer {
        width: img.width,
        height: img.height,
        channels: img.channels,
    }
}

/// RGB8 copy; gray images are replicated into all three channels.
pub fn to_rgb_image(img: &Image) -> Result<RgbImage, ImageIoError> {
    let rgb = img.to_rgb();
    RgbImage::from_raw(img.width as u32, img.height as u32, rgb.data).ok_or_else(|| invalid(img))
}

pub fn to_dynamic(img: &Image) -> Result<DynamicImage, ImageIoError> {
    match img.channels {
        1 => GrayImage::from_raw(img.width as u32, img.height as u32, img.data.clone())
            .map(DynamicImage::ImageLuma8)
            .ok_or_else(|| invalid(img)),
        3 => RgbImage::from_raw(img.width as u32, img.height as u32, img.data.clone())
            .map(DynamicImage::ImageRgb8)
            .ok_or_else(|| invalid(img)),
        _ => Err(invalid(img)),
    }
}

/// Decode an image file (format from the content).
pub fn load_image(path: impl AsRef<Path>) -> Result<Image, ImageIoError> {
    let decoded = ImageReader::open(path)?.with_guessed_format()?.decode()?;
    Ok(from_dynamic(&decoded))
}

/// Encode `img` with the format implied by the file extension.
pub fn save_image(img: &Image, path: impl AsRef<Path>) -> Result<(), ImageIoError> {
    to_dynamic(img)?.save(path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gray_and_rgb_survive_conversion() {
        let gray = Image::from_fn(5, 4, 1, |x, y| [(x * 40 + y) as u8; 3]);
        let dynamic = to_dynamic(&gray).unwrap();
        assert_eq!(from_dynamic(&dynamic), gray);

        let rgb = Image::from_fn(5, 4, 3, |x, y| [x as u8, y as u8, 7]);
        let dynamic = to_dynamic(&rgb).unwrap();
        assert_eq!(from_dynamic(&dynamic), rgb);
        assert_eq!(to_rgb_image(&gray).unwrap().get_pixel(2, 1).0, [81, 81, 81]);
    }

    #[test]
    fn png_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("img.png");
        let rgb = Image::from_fn(6, 3, 3, |x, y| [x as u8 * 30, y as u8 * 60, 200]);
        save_image(&rgb, &path).unwrap();
        assert_eq!(load_image(&path).unwrap(), rgb);
    }

    #[test]
    fn bad_buffer_is_reported() {
        let broken = Image {
            width: 4,
            height: 4,
            channels: 3,
            data: vec![0; 5],
        };
        assert!(matches!(to_dynamic(&broken), Err(ImageIoError::InvalidBuffer { .. })));
    }
}
