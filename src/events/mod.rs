//! Capture events and their fan-out to consumers.
//!
//! Every raw frame delivery ends in exactly one [`CaptureEvent`]: an
//! `ImageCaptured` on success or a `CaptureError` on any failure. Events are
//! published through an [`EventChannel`] on the delivery thread.

mod channel;

pub use channel::{EventChannel, Listener, SubscriptionId};

use chrono::{DateTime, Utc};
use std::any::Any;
use std::sync::Arc;

use crate::sampler::{CapturedImage, FrameError};

/// Outcome of one frame delivery.
#[derive(Debug, Clone)]
pub enum CaptureEvent {
    /// A frame was converted into an image.
    ImageCaptured {
        /// The converted frame.
        image: CapturedImage,
        /// Wall-clock time the conversion finished.
        captured_at: DateTime<Utc>,
        /// Device sequence number.
        sequence: u64,
    },
    /// A frame could not be converted.
    CaptureError {
        /// Human-readable description.
        message: String,
        /// Underlying failure.
        cause: Arc<FrameError>,
    },
}

impl CaptureEvent {
    /// Returns true for `ImageCaptured`.
    pub fn is_image(&self) -> bool {
        matches!(self, Self::ImageCaptured { .. })
    }

    /// Frame sequence number the event refers to.
    pub fn sequence(&self) -> u64 {
        match self {
            Self::ImageCaptured { sequence, .. } => *sequence,
            Self::CaptureError { cause, .. } => cause.sequence(),
        }
    }
}

/// Best-effort text for a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
