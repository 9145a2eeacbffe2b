//! Raw pixel memory to [`CapturedImage`] conversion.
//!
//! The raw buffer belongs to the device's pool and is reclaimed as soon as
//! the delivery callback returns, so conversion always copies. Row padding
//! is skipped and BGRA is reordered to RGBA; premultiplied alpha is kept.

use image::RgbaImage;
use thiserror::Error;

use super::captured::{AlphaMode, CapturedImage};
use crate::capture::{FrameLayout, PixelFormat};

/// Reasons a locked frame could not be converted.
#[derive(Debug, Clone, Error)]
pub enum ConversionError {
    #[error("frame has no pixels ({width}x{height})")]
    EmptyFrame { width: u32, height: u32 },
    #[error("row stride {bytes_per_row} is shorter than a {width}-pixel row")]
    StrideTooSmall { bytes_per_row: usize, width: u32 },
    #[error("pixel data truncated: need {expected} bytes, have {actual}")]
    Truncated { expected: usize, actual: usize },
    #[error("frame dimensions overflow addressable memory")]
    Overflow,
    #[error("conversion panicked: {0}")]
    Panicked(String),
}

/// Copies a locked frame into an owned device-RGB image.
pub fn convert_frame(layout: FrameLayout, bytes: &[u8]) -> Result<CapturedImage, ConversionError> {
    let FrameLayout {
        width,
        height,
        bytes_per_row,
        format,
    } = layout;

    if width == 0 || height == 0 {
        return Err(ConversionError::EmptyFrame { width, height });
    }

    let row_len = (width as usize)
        .checked_mul(format.bytes_per_pixel())
        .ok_or(ConversionError::Overflow)?;
    if bytes_per_row < row_len {
        return Err(ConversionError::StrideTooSmall {
            bytes_per_row,
            width,
        });
    }

    // The final row does not need its padding.
    let expected = bytes_per_row
        .checked_mul(height as usize - 1)
        .and_then(|n| n.checked_add(row_len))
        .ok_or(ConversionError::Overflow)?;
    if bytes.len() < expected {
        return Err(ConversionError::Truncated {
            expected,
            actual: bytes.len(),
        });
    }

    let mut rgba = Vec::with_capacity(row_len * height as usize);
    for row in bytes.chunks(bytes_per_row).take(height as usize) {
        let row = row.get(..row_len).ok_or(ConversionError::Truncated {
            expected,
            actual: bytes.len(),
        })?;
        match format {
            PixelFormat::Bgra8 => {
                for px in row.chunks_exact(4) {
                    rgba.extend_from_slice(&[px[2], px[1], px[0], px[3]]);
                }
            }
            PixelFormat::Rgba8 => rgba.extend_from_slice(row),
        }
    }

    let actual = rgba.len();
    let pixels = RgbaImage::from_raw(width, height, rgba).ok_or(ConversionError::Truncated {
        expected: row_len * height as usize,
        actual,
    })?;

    Ok(CapturedImage::new(pixels, AlphaMode::Premultiplied))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn bgra_frame(width: u32, height: u32, padding: usize) -> (FrameLayout, Vec<u8>) {
        let layout = FrameLayout::packed(width, height, PixelFormat::Bgra8).with_row_padding(padding);
        let mut bytes = vec![0xEE; layout.byte_len()];
        for y in 0..height as usize {
            for x in 0..width as usize {
                let offset = y * layout.bytes_per_row + x * 4;
                bytes[offset..offset + 4].copy_from_slice(&[x as u8, y as u8, 0x80, 0xFF]);
            }
        }
        (layout, bytes)
    }

    #[test]
    fn test_bgra_is_reordered_to_rgba() {
        let (layout, bytes) = bgra_frame(3, 2, 0);
        let image = convert_frame(layout, &bytes).unwrap();

        assert_eq!(image.width(), 3);
        assert_eq!(image.height(), 2);
        assert_eq!(image.pixel(2, 1), Some([0x80, 1, 2, 0xFF]));
        assert_eq!(image.alpha_mode(), AlphaMode::Premultiplied);
    }

    #[test]
    fn test_row_padding_is_skipped() {
        let (layout, bytes) = bgra_frame(4, 3, 12);
        let image = convert_frame(layout, &bytes).unwrap();

        assert_eq!(image.as_bytes().len(), 4 * 3 * 4);
        assert!(!image.as_bytes().contains(&0xEE));
    }

    #[test]
    fn test_last_row_may_omit_padding() {
        let (layout, mut bytes) = bgra_frame(2, 2, 8);
        bytes.truncate(layout.bytes_per_row + 8);
        assert!(convert_frame(layout, &bytes).is_ok());
    }

    #[test]
    fn test_rgba_passthrough() {
        let layout = FrameLayout::packed(1, 1, PixelFormat::Rgba8);
        let image = convert_frame(layout, &[1, 2, 3, 4]).unwrap();
        assert_eq!(image.pixel(0, 0), Some([1, 2, 3, 4]));
        assert_eq!(image.pixel(1, 0), None);
    }

    #[test]
    fn test_rejects_empty_frame() {
        let layout = FrameLayout::packed(0, 10, PixelFormat::Bgra8);
        assert!(matches!(
            convert_frame(layout, &[]),
            Err(ConversionError::EmptyFrame { .. })
        ));
    }

    #[test]
    fn test_rejects_short_stride() {
        let layout = FrameLayout {
            width: 4,
            height: 1,
            bytes_per_row: 12,
            format: PixelFormat::Bgra8,
        };
        assert!(matches!(
            convert_frame(layout, &[0u8; 16]),
            Err(ConversionError::StrideTooSmall { .. })
        ));
    }

    #[test]
    fn test_rejects_truncated_data() {
        let (layout, bytes) = bgra_frame(4, 4, 0);
        assert!(matches!(
            convert_frame(layout, &bytes[..bytes.len() - 1]),
            Err(ConversionError::Truncated { .. })
        ));
    }

    proptest! {
        #[test]
        fn prop_output_matches_frame_dimensions(
            width in 1u32..48,
            height in 1u32..48,
            padding in 0usize..32,
        ) {
            let (layout, bytes) = bgra_frame(width, height, padding);
            let image = convert_frame(layout, &bytes).unwrap();
            prop_assert_eq!(image.width(), width);
            prop_assert_eq!(image.height(), height);
            prop_assert_eq!(image.as_bytes().len(), (width * height * 4) as usize);
        }
    }
}
