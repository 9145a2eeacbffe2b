//! Raw frame buffers delivered by the capture device.
//!
//! A [`RawFrameBuffer`] is exclusively owned by one delivery callback. Its
//! pixel memory is only readable through a [`PixelLock`], which unlocks the
//! store when it goes out of scope. Dropping the buffer hands the store back
//! to whatever pool it came from.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Pixel layout of a raw frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    /// 32-bit BGRA, premultiplied alpha first in native (little-endian) word order.
    Bgra8,
    /// 32-bit RGBA, byte order R, G, B, A.
    Rgba8,
}

impl PixelFormat {
    /// Bytes per pixel.
    #[inline]
    pub fn bytes_per_pixel(self) -> usize {
        4
    }
}

/// Describes the memory behind a locked pixel store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLayout {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Row stride in bytes (may include padding).
    pub bytes_per_row: usize,
    /// Pixel format.
    pub format: PixelFormat,
}

impl FrameLayout {
    /// Tightly packed layout with no row padding.
    pub fn packed(width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            width,
            height,
            bytes_per_row: width as usize * format.bytes_per_pixel(),
            format,
        }
    }

    /// Adds `padding` bytes to the end of every row.
    pub fn with_row_padding(mut self, padding: usize) -> Self {
        self.bytes_per_row += padding;
        self
    }

    /// Total number of bytes covered by the layout.
    #[inline]
    pub fn byte_len(&self) -> usize {
        self.bytes_per_row * self.height as usize
    }
}

/// Failure to lock a pixel store.
#[derive(Debug, Clone, Error)]
#[error("failed to lock pixel buffer: {0}")]
pub struct LockError(pub String);

/// Errors accessing the pixel memory of a raw frame.
#[derive(Debug, Clone, Error)]
pub enum BufferAccessError {
    #[error("frame has no addressable pixel store")]
    NoPixelStore,
    #[error("pixel store returned no base address while locked")]
    NoBaseAddress,
    #[error(transparent)]
    Lock(#[from] LockError),
}

/// Hardware-backed pixel memory for one frame.
///
/// `base_address` must only return bytes between a successful `lock` and the
/// matching `unlock`.
pub trait PixelStore: Send {
    /// Layout of the pixel memory.
    fn layout(&self) -> FrameLayout;

    /// Locks the store for read access.
    fn lock(&mut self) -> Result<(), LockError>;

    /// Releases a lock taken by `lock`.
    fn unlock(&mut self);

    /// Pixel bytes, available only while locked.
    fn base_address(&self) -> Option<&[u8]>;
}

/// One captured raw frame as handed to the frame sink.
pub struct RawFrameBuffer {
    store: Option<Box<dyn PixelStore>>,
    sequence: u64,
    presentation_time: Duration,
}

impl RawFrameBuffer {
    /// Wraps a pixel store.
    pub fn new(store: Box<dyn PixelStore>, sequence: u64, presentation_time: Duration) -> Self {
        Self {
            store: Some(store),
            sequence,
            presentation_time,
        }
    }

    /// A frame whose pixel memory could not be obtained from the platform.
    pub fn without_store(sequence: u64, presentation_time: Duration) -> Self {
        Self {
            store: None,
            sequence,
            presentation_time,
        }
    }

    /// Monotonic frame sequence number.
    #[inline]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Time since the stream started.
    #[inline]
    pub fn presentation_time(&self) -> Duration {
        self.presentation_time
    }

    /// Returns true if the frame carries addressable pixel memory.
    pub fn has_pixel_store(&self) -> bool {
        self.store.is_some()
    }

    /// Layout of the pixel store, if there is one.
    pub fn layout(&self) -> Option<FrameLayout> {
        self.store.as_ref().map(|store| store.layout())
    }

    /// Acquires the pixel store and locks it for reading.
    ///
    /// The returned guard unlocks the store when dropped, on every exit path.
    pub fn lock_pixels(&mut self) -> Result<PixelLock<'_>, BufferAccessError> {
        let store = self.store.as_mut().ok_or(BufferAccessError::NoPixelStore)?;
        store.lock()?;
        Ok(PixelLock { store })
    }

    /// Hands the buffer back to the capture pipeline.
    pub fn release(self) {
        tracing::trace!(sequence = self.sequence, "Released raw frame buffer");
    }
}

impl std::fmt::Debug for RawFrameBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawFrameBuffer")
            .field("sequence", &self.sequence)
            .field("presentation_time", &self.presentation_time)
            .field("layout", &self.layout())
            .finish()
    }
}

/// Scoped read lock over a frame's pixel store.
pub struct PixelLock<'a> {
    store: &'a mut Box<dyn PixelStore>,
}

impl PixelLock<'_> {
    /// Layout of the locked memory.
    pub fn layout(&self) -> FrameLayout {
        self.store.layout()
    }

    /// The locked pixel bytes.
    pub fn bytes(&self) -> Result<&[u8], BufferAccessError> {
        self.store
            .base_address()
            .ok_or(BufferAccessError::NoBaseAddress)
    }
}

impl Drop for PixelLock<'_> {
    fn drop(&mut self) {
        self.store.unlock();
    }
}
