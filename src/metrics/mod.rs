//! Pipeline counters and their Prometheus exporter.
//!
//! [`PipelineStats`] is updated lock-free by the capture and delivery
//! threads. A [`MetricsRegistry`] turns snapshots of it into Prometheus
//! metrics, and with the `metrics` feature a small HTTP server exposes them.
//!
//! # Metrics Exposed
//!
//! - `frame_capture_session_running` - Session state (1=running, 0=stopped)
//! - `frame_capture_frames_captured_total` - Frames handed out by the device
//! - `frame_capture_frames_dropped_total` - Late frames discarded before sampling
//! - `frame_capture_frames_stalled_total` - Ticks with no free device buffer
//! - `frame_capture_images_emitted_total` - `ImageCaptured` outcomes
//! - `frame_capture_errors_emitted_total` - `CaptureError` outcomes
//! - `frame_capture_listener_failures_total` - Listener callbacks that panicked
//!
//! # Example
//!
//! ```
//! use frame_capture::metrics::{MetricsRegistry, PipelineStats};
//!
//! let stats = PipelineStats::new();
//! let registry = MetricsRegistry::new().expect("Failed to create registry");
//!
//! registry.update(&stats.snapshot());
//! assert!(registry.encode().unwrap().contains("frame_capture_session_running 0"));
//! ```

mod collector;
#[cfg(feature = "metrics")]
mod server;
mod stats;

pub use collector::{MetricsError, MetricsRegistry};
#[cfg(feature = "metrics")]
pub use server::{MetricsServer, MetricsServerConfig, MetricsState, ServerError};
pub use stats::{PipelineStats, StatsSnapshot};
