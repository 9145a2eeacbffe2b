//! Live preview surface.
//!
//! The preview mirrors raw frames straight from the capture thread, ahead of
//! the sampler. It does no colour conversion and raises no events; a host
//! view polls [`PreviewSink::latest_frame`] and lays it out with
//! [`PreviewSink::viewport`].

use std::sync::{Arc, Mutex, PoisonError};

use crate::capture::{ConfigError, FrameLayout, PreviewConfig, RawFrameBuffer};

/// Most recent raw frame, bytes exactly as the device produced them.
#[derive(Debug, Clone)]
pub struct PreviewFrame {
    /// Geometry of `data`, padding included.
    pub layout: FrameLayout,
    /// Device sequence number.
    pub sequence: u64,
    /// Raw pixel bytes.
    pub data: Arc<[u8]>,
}

/// Where the frame lands inside the host surface, in logical units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    /// Left edge.
    pub x: f32,
    /// Top edge.
    pub y: f32,
    /// Fitted width.
    pub width: f32,
    /// Fitted height.
    pub height: f32,
}

/// Passive rendering target for the live camera feed.
#[derive(Debug)]
pub struct PreviewSink {
    surface: Mutex<PreviewConfig>,
    latest: Mutex<Option<PreviewFrame>>,
}

impl PreviewSink {
    /// Creates an empty preview for a surface of the given size.
    pub fn new(surface: PreviewConfig) -> Self {
        Self {
            surface: Mutex::new(surface),
            latest: Mutex::new(None),
        }
    }

    /// Current host surface size.
    pub fn surface(&self) -> PreviewConfig {
        *self.surface.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Resizes the host surface.
    pub fn resize(&self, width: f32, height: f32) -> Result<(), ConfigError> {
        let surface = PreviewConfig { width, height };
        surface.validate()?;
        *self.surface.lock().unwrap_or_else(PoisonError::into_inner) = surface;
        Ok(())
    }

    /// Mirrors `buffer` into the preview. Returns false if it could not be read.
    pub fn present(&self, buffer: &mut RawFrameBuffer) -> bool {
        let sequence = buffer.sequence();
        let frame = match buffer.lock_pixels() {
            Ok(pixels) => match pixels.bytes() {
                Ok(bytes) => PreviewFrame {
                    layout: pixels.layout(),
                    sequence,
                    data: Arc::from(bytes),
                },
                Err(err) => {
                    tracing::trace!(sequence, error = %err, "Preview skipped frame");
                    return false;
                }
            },
            Err(err) => {
                tracing::trace!(sequence, error = %err, "Preview skipped frame");
                return false;
            }
        };

        *self.latest.lock().unwrap_or_else(PoisonError::into_inner) = Some(frame);
        true
    }

    /// The most recent frame, or `None` when there is nothing to show.
    pub fn latest_frame(&self) -> Option<PreviewFrame> {
        self.latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Forgets the last frame (the session stopped).
    pub fn clear(&self) {
        *self.latest.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Aspect-preserving placement of the latest frame within the surface.
    pub fn viewport(&self) -> Option<Viewport> {
        let layout = self.latest_frame()?.layout;
        Some(fit(layout.width, layout.height, self.surface()))
    }
}

/// Letterboxes a `width` x `height` frame into `surface`.
fn fit(width: u32, height: u32, surface: PreviewConfig) -> Viewport {
    if width == 0 || height == 0 {
        return Viewport {
            x: 0.0,
            y: 0.0,
            width: 0.0,
            height: 0.0,
        };
    }

    let scale = (surface.width / width as f32).min(surface.height / height as f32);
    let fitted_width = width as f32 * scale;
    let fitted_height = height as f32 * scale;
    Viewport {
        x: (surface.width - fitted_width) / 2.0,
        y: (surface.height - fitted_height) / 2.0,
        width: fitted_width,
        height: fitted_height,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{BufferPool, PixelFormat};
    use std::time::Duration;

    fn surface(width: f32, height: f32) -> PreviewConfig {
        PreviewConfig { width, height }
    }

    #[test]
    fn test_nothing_to_show_before_first_frame() {
        let preview = PreviewSink::new(PreviewConfig::default());
        assert!(preview.latest_frame().is_none());
        assert!(preview.viewport().is_none());
    }

    #[test]
    fn test_present_copies_raw_bytes_and_unlocks() {
        let pool = BufferPool::new(1);
        let layout = FrameLayout::packed(2, 2, PixelFormat::Bgra8).with_row_padding(4);
        let mut store = pool.acquire(layout).unwrap();
        store.data_mut()[0] = 42;
        let mut buffer = RawFrameBuffer::new(Box::new(store), 5, Duration::ZERO);

        let preview = PreviewSink::new(surface(100.0, 100.0));
        assert!(preview.present(&mut buffer));

        let frame = preview.latest_frame().unwrap();
        assert_eq!(frame.sequence, 5);
        assert_eq!(frame.data.len(), layout.byte_len());
        assert_eq!(frame.data[0], 42);
        let stats = pool.stats();
        assert_eq!((stats.locks, stats.unlocks), (1, 1));

        preview.clear();
        assert!(preview.latest_frame().is_none());
    }

    #[test]
    fn test_present_without_store_keeps_previous_frame() {
        let preview = PreviewSink::new(PreviewConfig::default());
        let mut buffer = RawFrameBuffer::without_store(1, Duration::ZERO);
        assert!(!preview.present(&mut buffer));
        assert!(preview.latest_frame().is_none());
    }

    #[test]
    fn test_fit_letterboxes_wide_frame() {
        let viewport = fit(640, 360, surface(400.0, 300.0));
        assert_eq!(viewport.width, 400.0);
        assert_eq!(viewport.height, 225.0);
        assert_eq!(viewport.x, 0.0);
        assert_eq!(viewport.y, 37.5);
    }

    #[test]
    fn test_fit_pillarboxes_tall_frame() {
        let viewport = fit(300, 600, surface(400.0, 300.0));
        assert_eq!(viewport.height, 300.0);
        assert_eq!(viewport.width, 150.0);
        assert_eq!(viewport.x, 125.0);
    }

    #[test]
    fn test_resize_validates() {
        let preview = PreviewSink::new(PreviewConfig::default());
        assert!(preview.resize(-1.0, 10.0).is_err());
        preview.resize(800.0, 600.0).unwrap();
        assert_eq!(preview.surface(), surface(800.0, 600.0));
    }
}
