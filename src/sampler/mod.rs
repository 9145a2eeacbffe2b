//! Per-frame conversion and event publication.
//!
//! [`FrameSampler`] is the [`FrameSink`] bound to the frame source. For each
//! delivered buffer it locks the pixel memory, copies it into a
//! [`CapturedImage`], unlocks, releases the buffer back to the device and
//! only then publishes the outcome. Per-frame failures become
//! `CaptureError` events; nothing escapes the callback.

mod captured;
mod convert;

pub use captured::{AlphaMode, CapturedImage};
pub use convert::{convert_frame, ConversionError};

use chrono::Utc;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use thiserror::Error;

use crate::capture::{BufferAccessError, FrameSink, RawFrameBuffer, SourceConnection};
use crate::events::{panic_message, CaptureEvent, EventChannel};
use crate::metrics::PipelineStats;

/// Recoverable per-frame failures.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame {sequence}: pixel buffer unavailable: {source}")]
    BufferUnavailable {
        sequence: u64,
        #[source]
        source: BufferAccessError,
    },
    #[error("frame {sequence}: conversion failed: {source}")]
    ConversionFailure {
        sequence: u64,
        #[source]
        source: ConversionError,
    },
}

impl FrameError {
    /// Sequence number of the frame that failed.
    pub fn sequence(&self) -> u64 {
        match self {
            Self::BufferUnavailable { sequence, .. } | Self::ConversionFailure { sequence, .. } => {
                *sequence
            }
        }
    }
}

/// Converts delivered frames and publishes [`CaptureEvent`]s.
pub struct FrameSampler {
    events: Arc<EventChannel>,
    stats: Arc<PipelineStats>,
}

impl FrameSampler {
    /// Creates a sampler publishing on `events`.
    pub fn new(events: Arc<EventChannel>) -> Self {
        Self::with_stats(events, Arc::new(PipelineStats::new()))
    }

    /// Creates a sampler that records outcomes in `stats`.
    pub fn with_stats(events: Arc<EventChannel>, stats: Arc<PipelineStats>) -> Self {
        Self { events, stats }
    }

    /// The channel events are published on.
    pub fn events(&self) -> &Arc<EventChannel> {
        &self.events
    }

    /// Locks the buffer and, if `build_image`, converts it.
    ///
    /// The pixel lock is released before this returns, whatever the outcome.
    fn sample(
        buffer: &mut RawFrameBuffer,
        build_image: bool,
    ) -> Result<Option<CapturedImage>, FrameError> {
        let sequence = buffer.sequence();
        let pixels = buffer
            .lock_pixels()
            .map_err(|source| FrameError::BufferUnavailable { sequence, source })?;

        if !build_image {
            return Ok(None);
        }

        let bytes = pixels
            .bytes()
            .map_err(|source| FrameError::BufferUnavailable { sequence, source })?;
        let image = convert_frame(pixels.layout(), bytes)
            .map_err(|source| FrameError::ConversionFailure { sequence, source })?;
        Ok(Some(image))
    }

    fn publish_image(&self, image: CapturedImage, sequence: u64) {
        self.stats.record_image();
        if !self.events.has_subscribers() {
            return;
        }
        let event = CaptureEvent::ImageCaptured {
            image,
            captured_at: Utc::now(),
            sequence,
        };
        self.events.emit(&event);
    }

    fn publish_error(&self, error: FrameError) {
        self.stats.record_error();
        tracing::warn!(sequence = error.sequence(), error = %error, "Frame dropped");
        if !self.events.has_subscribers() {
            return;
        }
        let event = CaptureEvent::CaptureError {
            message: format!("Failed to capture image: {error}"),
            cause: Arc::new(error),
        };
        self.events.emit(&event);
    }
}

impl FrameSink for FrameSampler {
    fn on_frame_delivered(&self, mut buffer: RawFrameBuffer, connection: &SourceConnection) {
        let sequence = buffer.sequence();
        // Nobody is listening: still cycle the lock, but skip the copy.
        let build_image = self.events.has_subscribers();

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            Self::sample(&mut buffer, build_image)
        }))
        .unwrap_or_else(|payload| {
            Err(FrameError::ConversionFailure {
                sequence,
                source: ConversionError::Panicked(panic_message(payload.as_ref())),
            })
        });

        // Hand the buffer back before notifying anyone, so a slow listener
        // never holds a pool slot.
        buffer.release();

        match outcome {
            Ok(Some(image)) => {
                tracing::trace!(
                    sequence,
                    device = %connection.device,
                    width = image.width(),
                    height = image.height(),
                    "Frame converted"
                );
                self.publish_image(image, sequence);
            }
            Ok(None) => {}
            Err(error) => self.publish_error(error),
        }
    }
}
