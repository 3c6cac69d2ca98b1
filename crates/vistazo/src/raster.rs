//! RGB raster images.
//!
//! Every screenshot entering the engine is decoded into a [`RasterImage`]:
//! 8-bit RGB, no alpha, width and height both non-zero. Decoding failures are
//! reported as [`VistazoError::Decode`] and never produce an empty image.

use crate::result::{VistazoError, VistazoResult};
use image::imageops::FilterType;
use image::{GrayImage, ImageEncoder, Luma, Rgb, RgbImage};
use std::borrow::Cow;
use std::path::Path;

/// Pure red, the canonical highlight color
pub const HIGHLIGHT_RED: [u8; 3] = [255, 0, 0];

/// Convert an RGB triple to 8-bit luminance (ITU-R BT.601 weights)
#[must_use]
pub fn luminance(rgb: [u8; 3]) -> u8 {
    let [r, g, b] = rgb;
    let y = 0.299 * f64::from(r) + 0.587 * f64::from(g) + 0.114 * f64::from(b);
    y.round().clamp(0.0, 255.0) as u8
}

/// A decoded RGB image with non-zero dimensions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RasterImage {
    pixels: RgbImage,
}

impl RasterImage {
    /// Wrap an RGB buffer, rejecting zero-sized images
    pub fn from_rgb(pixels: RgbImage) -> VistazoResult<Self> {
        if pixels.width() == 0 || pixels.height() == 0 {
            return Err(VistazoError::ImageProcessing {
                message: format!(
                    "image has zero dimension ({}x{})",
                    pixels.width(),
                    pixels.height()
                ),
            });
        }
        Ok(Self { pixels })
    }

    /// Create an image filled with a single color
    pub fn filled(width: u32, height: u32, color: [u8; 3]) -> VistazoResult<Self> {
        Self::from_rgb(RgbImage::from_pixel(width, height, Rgb(color)))
    }

    /// Create an image from a per-pixel function
    pub fn from_fn(
        width: u32,
        height: u32,
        mut f: impl FnMut(u32, u32) -> [u8; 3],
    ) -> VistazoResult<Self> {
        Self::from_rgb(RgbImage::from_fn(width, height, |x, y| Rgb(f(x, y))))
    }

    /// Decode an image file (PNG or JPEG)
    pub fn open(path: impl AsRef<Path>) -> VistazoResult<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|e| VistazoError::decode(path, e.to_string()))?;
        Self::decode_with_origin(&bytes, path)
    }

    /// Decode in-memory image bytes
    pub fn decode(bytes: &[u8]) -> VistazoResult<Self> {
        Self::decode_with_origin(bytes, Path::new("<memory>"))
    }

    fn decode_with_origin(bytes: &[u8], origin: &Path) -> VistazoResult<Self> {
        let decoded =
            image::load_from_memory(bytes).map_err(|e| VistazoError::decode(origin, e.to_string()))?;
        Self::from_rgb(decoded.to_rgb8()).map_err(|e| VistazoError::decode(origin, e.to_string()))
    }

    /// Image width
    #[must_use]
    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    /// Image height
    #[must_use]
    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    /// Image dimensions as `(width, height)`
    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        self.pixels.dimensions()
    }

    /// Total number of pixels
    #[must_use]
    pub fn pixel_count(&self) -> u64 {
        u64::from(self.width()) * u64::from(self.height())
    }

    /// Pixel at `(x, y)`
    #[must_use]
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
        self.pixels.get_pixel(x, y).0
    }

    /// Set the pixel at `(x, y)`; out-of-bounds writes are ignored
    pub fn put_pixel(&mut self, x: u32, y: u32, color: [u8; 3]) {
        if x < self.width() && y < self.height() {
            self.pixels.put_pixel(x, y, Rgb(color));
        }
    }

    /// Fill a rectangle, clipped to the image bounds
    pub fn fill_rect(&mut self, x: u32, y: u32, width: u32, height: u32, color: [u8; 3]) {
        let x_end = x.saturating_add(width).min(self.width());
        let y_end = y.saturating_add(height).min(self.height());
        for py in y..y_end {
            for px in x..x_end {
                self.pixels.put_pixel(px, py, Rgb(color));
            }
        }
    }

    /// Borrow the underlying buffer
    #[must_use]
    pub fn as_rgb(&self) -> &RgbImage {
        &self.pixels
    }

    /// Single-channel luminance copy
    #[must_use]
    pub fn to_luma(&self) -> GrayImage {
        GrayImage::from_fn(self.width(), self.height(), |x, y| {
            Luma([luminance(self.pixel(x, y))])
        })
    }

    /// Resize to exact dimensions (bilinear)
    #[must_use]
    pub fn resized(&self, width: u32, height: u32) -> Self {
        let pixels = image::imageops::resize(&self.pixels, width, height, FilterType::Triangle);
        Self { pixels }
    }

    /// This image at `reference`'s dimensions, resizing only when they differ
    #[must_use]
    pub fn aligned_to(&self, reference: &Self) -> Cow<'_, Self> {
        if self.dimensions() == reference.dimensions() {
            Cow::Borrowed(self)
        } else {
            Cow::Owned(self.resized(reference.width(), reference.height()))
        }
    }

    /// Whether every pixel has the same color
    #[must_use]
    pub fn is_uniform(&self) -> bool {
        let first = self.pixels.get_pixel(0, 0);
        self.pixels.pixels().all(|p| p == first)
    }

    /// Encode as PNG
    pub fn encode_png(&self) -> VistazoResult<Vec<u8>> {
        let mut buffer = Vec::new();
        let encoder = image::codecs::png::PngEncoder::new(&mut buffer);
        encoder
            .write_image(
                self.pixels.as_raw(),
                self.width(),
                self.height(),
                image::ExtendedColorType::Rgb8,
            )
            .map_err(|e| VistazoError::ImageProcessing {
                message: format!("Failed to encode PNG: {e}"),
            })?;
        Ok(buffer)
    }

    /// Encode as PNG and write to `path`
    pub fn save_png(&self, path: impl AsRef<Path>) -> VistazoResult<()> {
        let data = self.encode_png()?;
        std::fs::write(path.as_ref(), data)?;
        Ok(())
    }
}
