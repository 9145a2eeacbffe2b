//! Consumer-facing converted image.

use image::RgbaImage;
use std::sync::Arc;

/// How the alpha channel relates to the colour channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlphaMode {
    /// Colour channels are already multiplied by alpha.
    Premultiplied,
    /// Colour channels are independent of alpha.
    Straight,
}

/// An immutable device-RGB image produced from one raw frame.
///
/// Pixels are stored as R, G, B, A bytes. Cloning is cheap; the pixel data
/// is shared and freed when the last clone is dropped.
#[derive(Clone)]
pub struct CapturedImage {
    pixels: Arc<RgbaImage>,
    alpha: AlphaMode,
}

impl CapturedImage {
    pub(crate) fn new(pixels: RgbaImage, alpha: AlphaMode) -> Self {
        Self {
            pixels: Arc::new(pixels),
            alpha,
        }
    }

    /// Width in pixels.
    #[inline]
    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    /// Height in pixels.
    #[inline]
    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    /// Alpha representation of the pixel data.
    #[inline]
    pub fn alpha_mode(&self) -> AlphaMode {
        self.alpha
    }

    /// RGBA bytes of the pixel at (`x`, `y`), if in bounds.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        (x < self.width() && y < self.height()).then(|| self.pixels.get_pixel(x, y).0)
    }

    /// The underlying image buffer.
    pub fn as_rgba(&self) -> &RgbaImage {
        &self.pixels
    }

    /// Raw RGBA bytes, row-major and tightly packed.
    pub fn as_bytes(&self) -> &[u8] {
        self.pixels.as_raw()
    }
}

impl std::fmt::Debug for CapturedImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapturedImage")
            .field("width", &self.width())
            .field("height", &self.height())
            .field("alpha", &self.alpha)
            .finish()
    }
}
