use serde::{Deserialize, Serialize};

/// Errors raised when wrapping raw pixel buffers.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ImageError {
    #[error("invalid image buffer length (expected {expected} bytes, got {got})")]
    InvalidBuffer { expected: usize, got: usize },
    #[error("unsupported channel count {0} (expected 1 or 3)")]
    UnsupportedChannels(usize),
    #[error("invalid image dimensions (width={width}, height={height})")]
    InvalidDimensions { width: usize, height: usize },
}

/// What to read when a sample falls outside the source image.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BorderMode {
    /// Every out-of-bounds tap reads this value (all channels).
    Constant(u8),
    /// Out-of-bounds taps read the nearest edge pixel.
    Replicate,
}

impl Default for BorderMode {
    fn default() -> Self {
        BorderMode::Constant(0)
    }
}

/// Borrowed, row-major, interleaved 8-bit image.
///
/// Fields are public for cheap construction, so the layout invariant
/// (`channels` is 1 or 3, `data.len() == width * height * channels`) is only
/// checked by [`ImageView::new`]. Views built by hand can be tested with
/// [`ImageView::is_valid`]; the detector rejects views that fail it.
#[derive(Clone, Copy, Debug)]
pub struct ImageView<'a> {
    pub width: usize,
    pub height: usize,
    pub channels: usize,
    pub data: &'a [u8], // len = w*h*channels
}

/// Owned, row-major, interleaved 8-bit image (1 = gray, 3 = RGB).
///
/// Same layout invariant as [`ImageView`]; [`Image::new`] checks it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Image {
    pub width: usize,
    pub height: usize,
    pub channels: usize,
    pub data: Vec<u8>,
}

fn check_layout(width: usize, height: usize, channels: usize, len: usize) -> Result<(), ImageError> {
    if channels != 1 && channels != 3 {
        return Err(ImageError::UnsupportedChannels(channels));
    }
    let expected = width
        .checked_mul(height)
        .and_then(|n| n.checked_mul(channels))
        .ok_or(ImageError::InvalidDimensions { width, height })?;
    if len != expected {
        return Err(ImageError::InvalidBuffer { expected, got: len });
    }
    Ok(())
}

impl<'a> ImageView<'a> {
    pub fn new(
        width: usize,
        height: usize,
        channels: usize,
        data: &'a [u8],
    ) -> Result<Self, ImageError> {
        check_layout(width, height, channels, data.len())?;
        Ok(Self {
            width,
            height,
            channels,
            data,
        })
    }

    #[inline]
    pub fn size(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    /// Whether the fields describe a well-formed 1- or 3-channel buffer.
    pub fn is_valid(&self) -> bool {
        check_layout(self.width, self.height, self.channels, self.data.len()).is_ok()
    }

    /// Interleaved samples of pixel `(x, y)`, or `None` outside the image.
    #[inline]
    pub fn pixel(&self, x: usize, y: usize) -> Option<&'a [u8]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let start = (y * self.width + x) * self.channels;
        self.data.get(start..start + self.channels)
    }

    /// Single-channel copy of this view. RGB is converted with BT.601 luma weights.
    pub fn to_gray(&self) -> Image {
        if self.channels == 1 {
            return self.to_owned();
        }
        let data = self
            .data
            .chunks_exact(self.channels.max(1))
            .map(|px| match px {
                &[r, g, b, ..] => {
                    let y = 0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32;
                    y.round().clamp(0.0, 255.0) as u8
                }
                // Malformed layouts: first sample stands in for luma.
                &[v, ..] => v,
                &[] => 0,
            })
            .collect();
        Image {
            width: self.width,
            height: self.height,
            channels: 1,
            data,
        }
    }

    /// Three-channel copy of this view (gray is replicated into R, G and B).
    pub fn to_rgb(&self) -> Image {
        if self.channels == 3 {
            return self.to_owned();
        }
        let data = self.data.iter().flat_map(|&v| [v, v, v]).collect();
        Image {
            width: self.width,
            height: self.height,
            channels: 3,
            data,
        }
    }

    pub fn to_owned(&self) -> Image {
        Image {
            width: self.width,
            height: self.height,
            channels: self.channels,
            data: self.data.to_vec(),
        }
    }
}

impl Image {
    pub fn new(
        width: usize,
        height: usize,
        channels: usize,
        data: Vec<u8>,
    ) -> Result<Self, ImageError> {
        check_layout(width, height, channels, data.len())?;
        Ok(Self {
            width,
            height,
            channels,
            data,
        })
    }

    /// Image with every sample set to `value`.
    pub fn filled(width: usize, height: usize, channels: usize, value: u8) -> Self {
        Self {
            width,
            height,
            channels,
            data: vec![value; width * height * channels],
        }
    }

    /// Build an image by evaluating `f(x, y)` for every pixel.
    pub fn from_fn<F>(width: usize, height: usize, channels: usize, mut f: F) -> Self
    where
        F: FnMut(usize, usize) -> [u8; 3],
    {
        let mut data = Vec::with_capacity(width * height * channels);
        for y in 0..height {
            for x in 0..width {
                let px = f(x, y);
                data.extend_from_slice(&px[..channels.min(3)]);
            }
        }
        Self {
            width,
            height,
            channels,
            data,
        }
    }

    #[inline]
    pub fn view(&self) -> ImageView<'_> {
        ImageView {
            width: self.width,
            height: self.height,
            channels: self.channels,
            data: &self.data,
        }
    }

    #[inline]
    pub fn size(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    #[inline]
    pub fn pixel(&self, x: usize, y: usize) -> Option<&[u8]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let start = (y * self.width + x) * self.channels;
        self.data.get(start..start + self.channels)
    }

    pub(crate) fn pixel_mut(&mut self, x: usize, y: usize) -> Option<&mut [u8]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let start = (y * self.width + x) * self.channels;
        self.data.get_mut(start..start + self.channels)
    }

    /// Write `color` into pixel `(x, y)`; coordinates outside the image are ignored.
    ///
    /// Only the first `channels` entries of `color` are used. This is meant for
    /// building fresh images (overlays, synthetic data); no public operation of
    /// this workspace mutates its input image.
    pub fn put_pixel(&mut self, x: i64, y: i64, color: [u8; 3]) {
        if x < 0 || y < 0 {
            return;
        }
        if let Some(px) = self.pixel_mut(x as usize, y as usize) {
            let n = px.len().min(3);
            px[..n].copy_from_slice(&color[..n]);
        }
    }

    pub fn to_gray(&self) -> Image {
        self.view().to_gray()
    }

    pub fn to_rgb(&self) -> Image {
        self.view().to_rgb()
    }
}

#[inline]
fn fetch(src: &ImageView<'_>, x: i64, y: i64, channel: usize, border: BorderMode) -> f32 {
    let w = src.width as i64;
    let h = src.height as i64;
    let (x, y) = if x < 0 || y < 0 || x >= w || y >= h {
        match border {
            BorderMode::Constant(v) => return v as f32,
            BorderMode::Replicate => {
                if w == 0 || h == 0 {
                    return 0.0;
                }
                (x.clamp(0, w - 1), y.clamp(0, h - 1))
            }
        }
    } else {
        (x, y)
    };
    let idx = (y as usize * src.width + x as usize) * src.channels + channel;
    src.data.get(idx).copied().unwrap_or(0) as f32
}

/// Bilinear sample of `channel` at `(x, y)`, pixel centers at integer coordinates.
///
/// Taps outside the image are resolved with `border`. Non-finite coordinates
/// return the constant border value (or 0 for [`BorderMode::Replicate`]).
#[inline]
pub fn sample_bilinear(
    src: &ImageView<'_>,
    x: f32,
    y: f32,
    channel: usize,
    border: BorderMode,
) -> f32 {
    if !x.is_finite() || !y.is_finite() {
        return match border {
            BorderMode::Constant(v) => v as f32,
            BorderMode::Replicate => 0.0,
        };
    }
    let x0f = x.floor();
    let y0f = y.floor();
    let fx = x - x0f;
    let fy = y - y0f;
    let x0 = x0f as i64;
    let y0 = y0f as i64;

    let p00 = fetch(src, x0, y0, channel, border);
    let p10 = fetch(src, x0 + 1, y0, channel, border);
    let p01 = fetch(src, x0, y0 + 1, channel, border);
    let p11 = fetch(src, x0 + 1, y0 + 1, channel, border);

    let a = p00 + fx * (p10 - p00);
    let b = p01 + fx * (p11 - p01);
    a + fy * (b - a)
}

#[inline]
pub fn sample_bilinear_u8(
    src: &ImageView<'_>,
    x: f32,
    y: f32,
    channel: usize,
    border: BorderMode,
) -> u8 {
    sample_bilinear(src, x, y, channel, border)
        .round()
        .clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp() -> Image {
        Image::from_fn(4, 3, 1, |x, y| {
            let v = (x * 10 + y * 100) as u8;
            [v, v, v]
        })
    }

    #[test]
    fn rejects_bad_buffers() {
        assert_eq!(
            Image::new(2, 2, 1, vec![0; 3]),
            Err(ImageError::InvalidBuffer {
                expected: 4,
                got: 3
            })
        );
        assert_eq!(
            Image::new(2, 2, 2, vec![0; 8]),
            Err(ImageError::UnsupportedChannels(2))
        );
    }

    #[test]
    fn bilinear_hits_pixel_centers_exactly() {
        let img = ramp();
        let v = img.view();
        assert_eq!(sample_bilinear_u8(&v, 2.0, 1.0, 0, BorderMode::default()), 120);
        let mid = sample_bilinear(&v, 1.5, 0.5, 0, BorderMode::default());
        assert!((mid - 65.0).abs() < 1e-4, "got {mid}");
    }

    #[test]
    fn border_modes_differ_outside() {
        let img = ramp();
        let v = img.view();
        assert_eq!(sample_bilinear_u8(&v, -5.0, 1.0, 0, BorderMode::Constant(7)), 7);
        assert_eq!(sample_bilinear_u8(&v, -5.0, 1.0, 0, BorderMode::Replicate), 100);
        assert_eq!(sample_bilinear_u8(&v, 9.0, 9.0, 0, BorderMode::Replicate), 230);
    }

    #[test]
    fn gray_conversion_uses_luma_weights() {
        let rgb = Image::new(1, 1, 3, vec![255, 0, 0]).unwrap();
        assert_eq!(rgb.to_gray().data, vec![76]);
        let back = rgb.to_gray().to_rgb();
        assert_eq!(back.data, vec![76, 76, 76]);
    }

    #[test]
    fn hand_built_views_are_checked_without_panicking() {
        let data = [10u8, 20, 30, 40, 50, 60, 70, 80];
        let two_channel = ImageView {
            width: 2,
            height: 2,
            channels: 2,
            data: &data,
        };
        assert!(!two_channel.is_valid());
        assert_eq!(two_channel.to_gray().data, vec![10, 30, 50, 70]);

        let short = ImageView {
            width: 4,
            height: 4,
            channels: 1,
            data: &data,
        };
        assert!(!short.is_valid());
        assert!(ramp().view().is_valid());
    }
}
