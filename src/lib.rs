//! Frame Capture Library
//!
//! Acquires raw frames from a video capture device at a pinned frame rate,
//! converts each one into an owned RGBA image, and publishes the outcome of
//! every frame to subscribers.
//!
//! # Architecture
//!
//! The system follows an explicit data flow:
//!
//! ```text
//! device → FrameSource ─┬→ FrameSampler → EventChannel → listeners
//!                       └→ PreviewSink (raw mirror, optional)
//! ```
//!
//! # Design Principles
//!
//! - **Scoped buffer ownership**: raw buffers are pooled by the device; the
//!   pixel lock and the buffer itself are released before any event is
//!   published
//! - **One outcome per frame**: every delivery yields exactly one
//!   `ImageCaptured` or `CaptureError`
//! - **Failures stay local**: per-frame and listener failures never stop
//!   the session
//! - **Backpressure by dropping**: with `drop_late_frames` a frame arriving
//!   while the sampler is busy is discarded, not queued
//!
//! # Example
//!
//! ```no_run
//! use frame_capture::{
//!     capture::{CaptureConfig, MockDevice, MockProvider},
//!     events::CaptureEvent,
//!     CapturePipeline,
//! };
//!
//! let provider = MockProvider::new(MockDevice::new());
//! let mut pipeline = CapturePipeline::build(&provider, &CaptureConfig::default()).unwrap();
//!
//! let (_id, events) = pipeline.events().subscribe_channel(16);
//! pipeline.start().unwrap();
//!
//! for event in events.iter().take(10) {
//!     match event {
//!         CaptureEvent::ImageCaptured { image, sequence, .. } => {
//!             println!("frame {sequence}: {}x{}", image.width(), image.height());
//!         }
//!         CaptureEvent::CaptureError { message, .. } => eprintln!("{message}"),
//!     }
//! }
//!
//! pipeline.stop();
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod capture;
pub mod events;
pub mod metrics;
pub mod pipeline;
pub mod preview;
pub mod sampler;

// Re-export commonly used types at crate root
pub use capture::{CaptureConfig, CaptureError, FrameSource, RawFrameBuffer};
pub use events::{CaptureEvent, EventChannel};
pub use pipeline::CapturePipeline;
pub use preview::PreviewSink;
pub use sampler::{CapturedImage, FrameError, FrameSampler};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
